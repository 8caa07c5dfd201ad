//! Packet capture through an external capture tool (tcpdump).
//!
//! Each call builds a fresh argv from a validated [`CaptureRequest`], runs it
//! behind the configured privilege wrapper and returns the tool's output
//! lines. The invoker holds no per-call state.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{DiagError, DiagResult};
use crate::services::runner::{run_tool, ExecutionBound, ToolInvocation};
use crate::utils::{validate_host, validate_interface, validate_packet_count};

/// Protocol primitive placed at the head of the capture filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolFilter {
    Ip,
    Ip6,
    Arp,
    Tcp,
    Udp,
    Icmp,
    Vlan,
    Wlan,
}

impl ProtocolFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolFilter::Ip => "ip",
            ProtocolFilter::Ip6 => "ip6",
            ProtocolFilter::Arp => "arp",
            ProtocolFilter::Tcp => "tcp",
            ProtocolFilter::Udp => "udp",
            ProtocolFilter::Icmp => "icmp",
            ProtocolFilter::Vlan => "vlan",
            ProtocolFilter::Wlan => "wlan",
        }
    }
}

impl FromStr for ProtocolFilter {
    type Err = DiagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ip" => Ok(ProtocolFilter::Ip),
            "ip6" => Ok(ProtocolFilter::Ip6),
            "arp" => Ok(ProtocolFilter::Arp),
            "tcp" => Ok(ProtocolFilter::Tcp),
            "udp" => Ok(ProtocolFilter::Udp),
            "icmp" => Ok(ProtocolFilter::Icmp),
            "vlan" => Ok(ProtocolFilter::Vlan),
            "wlan" => Ok(ProtocolFilter::Wlan),
            other => Err(DiagError::InvalidRequest(format!(
                "Invalid packet type '{}': expected one of ip, ip6, arp, tcp, udp, icmp, vlan, wlan",
                other
            ))),
        }
    }
}

impl fmt::Display for ProtocolFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a single capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub interface: String,
    /// Signed so that zero and negative counts from clients are rejected here
    /// rather than lost in deserialization.
    pub packet_count: i64,
    pub protocol: Option<ProtocolFilter>,
    pub resolve_dns: bool,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl CaptureRequest {
    pub fn new(interface: impl Into<String>, packet_count: i64) -> Self {
        Self {
            interface: interface.into(),
            packet_count,
            protocol: None,
            resolve_dns: false,
            host: None,
            port: None,
        }
    }

    pub fn with_protocol(mut self, protocol: ProtocolFilter) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn with_dns(mut self, resolve_dns: bool) -> Self {
        self.resolve_dns = resolve_dns;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Filter expression tokens, clauses joined by `and`.
    pub fn filter_expression(&self) -> Vec<String> {
        let mut clauses: Vec<Vec<String>> = Vec::new();
        if let Some(protocol) = self.protocol {
            clauses.push(vec![protocol.to_string()]);
        }
        if let Some(host) = &self.host {
            clauses.push(vec!["host".to_string(), host.clone()]);
        }
        if let Some(port) = self.port {
            clauses.push(vec!["port".to_string(), port.to_string()]);
        }

        let mut tokens = Vec::new();
        for (i, clause) in clauses.into_iter().enumerate() {
            if i > 0 {
                tokens.push("and".to_string());
            }
            tokens.extend(clause);
        }
        tokens
    }
}

/// Output of a completed capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureResult {
    pub interface: String,
    pub lines: Vec<String>,
}

/// Runs the capture tool on behalf of HTTP handlers.
#[derive(Debug, Clone)]
pub struct CaptureInvoker {
    tool: String,
    privilege_command: Vec<String>,
    max_packet_count: i64,
}

impl CaptureInvoker {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            privilege_command: Vec::new(),
            max_packet_count: i64::from(u32::MAX),
        }
    }

    /// Set the non-interactive elevation wrapper (e.g. `["sudo", "-n"]`).
    pub fn with_privilege_command(mut self, command: Vec<String>) -> Self {
        self.privilege_command = command;
        self
    }

    pub fn with_max_packet_count(mut self, max: i64) -> Self {
        self.max_packet_count = max;
        self
    }

    /// Validate `request` and build the full command line, wrapper included.
    pub fn build_invocation(&self, request: &CaptureRequest) -> DiagResult<ToolInvocation> {
        let count = validate_packet_count(request.packet_count, self.max_packet_count)?;
        validate_interface(&request.interface)?;
        if let Some(host) = &request.host {
            validate_host(host)?;
        }

        let mut invocation = ToolInvocation::new(self.tool.as_str())
            .args(["-i", request.interface.as_str(), "-l"])
            .args(["-c".to_string(), count.to_string()])
            .arg("-t");
        if !request.resolve_dns {
            invocation = invocation.arg("-n");
        }
        invocation = invocation.args(request.filter_expression());

        Ok(invocation.wrapped(&self.privilege_command))
    }

    /// Capture packets described by `request`, bounded by `bound`.
    ///
    /// Invalid requests are rejected before any process is spawned. A timeout
    /// is reported as `DiagError::Timeout` targeting the interface.
    pub async fn capture(&self, request: &CaptureRequest, bound: ExecutionBound) -> DiagResult<CaptureResult> {
        let invocation = self.build_invocation(request)?;

        tracing::info!(
            "Capturing {} packet(s) on {} (filter: {:?})",
            request.packet_count,
            request.interface,
            request.filter_expression().join(" ")
        );

        let output = run_tool(&invocation, bound).await.map_err(|e| match e {
            DiagError::Timeout { .. } => DiagError::Timeout {
                target: request.interface.clone(),
            },
            other => other,
        })?;

        Ok(CaptureResult {
            interface: request.interface.clone(),
            lines: output.lines,
        })
    }
}
