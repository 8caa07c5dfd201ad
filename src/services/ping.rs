//! Reachability checks through an external ICMP echo tool (ping).

use std::time::Duration;

use serde::Serialize;

use crate::error::{DiagError, DiagResult};
use crate::services::runner::{run_tool, ExecutionBound, ToolInvocation};
use crate::utils::{validate_host, validate_packet_count};

/// Reduce a URL or hostname to its bare host token.
///
/// Strips an `http://` or `https://` scheme, a leading `www.` and anything
/// from the first `/`, `?` or `#` on. Applying it twice gives the same result.
pub fn normalize_target(target: &str) -> String {
    let mut host = target.trim();

    for scheme in ["http://", "https://"] {
        if starts_with_ignore_case(host, scheme) {
            host = host[scheme.len()..].trim_start();
            break;
        }
    }

    while starts_with_ignore_case(host, "www.") {
        host = host[4..].trim_start();
    }

    let end = host.find(['/', '?', '#']).unwrap_or(host.len());
    host[..end].trim().to_string()
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Output of a reachability check, keyed by the normalized host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReachabilityResult {
    pub normalized_target: String,
    pub lines: Vec<String>,
}

/// Runs the reachability tool against sanitized targets.
#[derive(Debug, Clone)]
pub struct ReachabilityProbe {
    tool: String,
    deadline: Option<Duration>,
    max_packet_count: i64,
}

impl ReachabilityProbe {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            deadline: None,
            max_packet_count: i64::from(u32::MAX),
        }
    }

    /// Wall-clock limit for one probe; `None` relies on the tool's own count.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_max_packet_count(mut self, max: i64) -> Self {
        self.max_packet_count = max;
        self
    }

    pub fn build_invocation(&self, host: &str, packet_count: i64) -> DiagResult<ToolInvocation> {
        let count = validate_packet_count(packet_count, self.max_packet_count)?;
        validate_host(host)?;

        Ok(ToolInvocation::new(self.tool.as_str())
            .args(["-c".to_string(), count.to_string()])
            .arg(host))
    }

    /// Normalize `target` and send `packet_count` echo requests to it.
    pub async fn probe(&self, target: &str, packet_count: i64) -> DiagResult<ReachabilityResult> {
        let host = normalize_target(target);
        let invocation = self.build_invocation(&host, packet_count)?;

        tracing::info!("Probing {} ({} packet(s))", host, packet_count);

        let bound = ExecutionBound { timeout: self.deadline };
        let output = run_tool(&invocation, bound).await.map_err(|e| match e {
            DiagError::Timeout { .. } => DiagError::Timeout { target: host.clone() },
            other => other,
        })?;

        Ok(ReachabilityResult {
            normalized_target: host,
            lines: output.lines,
        })
    }
}
