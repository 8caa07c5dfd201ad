use std::sync::LazyLock;

use regex::Regex;

use crate::error::{DiagError, DiagResult};

/// Linux IFNAMSIZ minus the trailing NUL.
const MAX_INTERFACE_LEN: usize = 15;
const MAX_HOST_LEN: usize = 253;

static INTERFACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._:@-]+$").expect("valid interface regex"));

// Hostnames, IPv4 and IPv6 literals (with optional zone index).
static HOST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._:%-]+$").expect("valid host regex"));

/// Validate an interface name before it reaches a tool's argv.
pub fn validate_interface(name: &str) -> DiagResult<()> {
    if name.is_empty() || name.len() > MAX_INTERFACE_LEN {
        return Err(DiagError::InvalidRequest(format!(
            "Invalid interface name '{}': must be 1-{} characters",
            name, MAX_INTERFACE_LEN
        )));
    }
    if name.starts_with('-') || !INTERFACE_RE.is_match(name) {
        return Err(DiagError::InvalidRequest(format!("Invalid interface name '{}'", name)));
    }
    Ok(())
}

/// Validate a hostname or IP literal passed as a single tool argument.
pub fn validate_host(host: &str) -> DiagResult<()> {
    if host.is_empty() || host.len() > MAX_HOST_LEN {
        return Err(DiagError::InvalidRequest(format!("Invalid host '{}'", host)));
    }
    if host.starts_with('-') || !HOST_RE.is_match(host) {
        return Err(DiagError::InvalidRequest(format!("Invalid host '{}'", host)));
    }
    Ok(())
}

/// Check a requested packet count against `1..=max`.
pub fn validate_packet_count(count: i64, max: i64) -> DiagResult<u32> {
    if count < 1 {
        return Err(DiagError::InvalidRequest(format!(
            "count_pkt must be at least 1, got {}",
            count
        )));
    }
    if count > max {
        return Err(DiagError::InvalidRequest(format!(
            "count_pkt must be at most {}, got {}",
            max, count
        )));
    }
    u32::try_from(count)
        .map_err(|_| DiagError::InvalidRequest(format!("count_pkt out of range: {}", count)))
}
