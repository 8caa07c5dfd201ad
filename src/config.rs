use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::AppError;
use crate::services::capture::CaptureInvoker;
use crate::services::external_ip::ExternalIpService;
use crate::services::ping::ReachabilityProbe;
use crate::services::traffic::{CounterSource, SystemCounters};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/netmond.conf";
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_INTERFACE: &str = "wlp4s0";
const DEFAULT_CAPTURE_TOOL: &str = "tcpdump";
const DEFAULT_PING_TOOL: &str = "ping";
const DEFAULT_PRIVILEGE_COMMAND: &str = "sudo -n";
const DEFAULT_CAPTURE_TIMEOUT_SECS: u64 = 15;
const DEFAULT_PING_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_PACKET_COUNT: i64 = 10_000;
const DEFAULT_MAX_WINDOW_MS: u64 = 60_000;
const DEFAULT_IP_ECHO_URL: &str = "https://ident.me";
const DEFAULT_IP_ECHO_TIMEOUT_SECS: u64 = 5;
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: IpAddr,
    pub port: u16,
    pub default_interface: String,
    pub capture_tool: String,
    pub ping_tool: String,
    /// Non-interactive elevation wrapper placed before the capture tool.
    pub privilege_command: Vec<String>,
    pub capture_timeout: Duration,
    /// Zero disables the deadline.
    pub ping_timeout: Duration,
    pub max_packet_count: i64,
    pub max_window_ms: u64,
    pub ip_echo_url: String,
    pub ip_echo_timeout: Duration,
    pub log_filter: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            default_interface: DEFAULT_INTERFACE.to_string(),
            capture_tool: DEFAULT_CAPTURE_TOOL.to_string(),
            ping_tool: DEFAULT_PING_TOOL.to_string(),
            privilege_command: split_command(DEFAULT_PRIVILEGE_COMMAND),
            capture_timeout: Duration::from_secs(DEFAULT_CAPTURE_TIMEOUT_SECS),
            ping_timeout: Duration::from_secs(DEFAULT_PING_TIMEOUT_SECS),
            max_packet_count: DEFAULT_MAX_PACKET_COUNT,
            max_window_ms: DEFAULT_MAX_WINDOW_MS,
            ip_echo_url: DEFAULT_IP_ECHO_URL.to_string(),
            ip_echo_timeout: Duration::from_secs(DEFAULT_IP_ECHO_TIMEOUT_SECS),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from `path` (if it exists), then apply `NETMOND_*`
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                AppError::Config(format!("Failed to read {}: {}", path.display(), e))
            })?;
            Self::parse(&content)?
        } else {
            Config::default()
        };

        config.apply_overrides(|env| std::env::var(env).ok())?;
        Ok(config)
    }

    /// Apply `NETMOND_*` overrides for every known key, reading values
    /// through `lookup`.
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (key, env) in ENV_OVERRIDES {
            if let Some(val) = lookup(env) {
                self.set(key, &val)?;
            }
        }
        Ok(())
    }

    /// Parse `key = value` lines on top of the defaults.
    pub fn parse(content: &str) -> Result<Self, AppError> {
        let mut config = Config::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                config.set(key.trim(), value.trim())?;
            }
        }
        Ok(config)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), AppError> {
        match key {
            "bind_address" => self.bind_address = parse_value(key, value)?,
            "port" => self.port = parse_value(key, value)?,
            "default_interface" => self.default_interface = value.to_string(),
            "capture_tool" => self.capture_tool = value.to_string(),
            "ping_tool" => self.ping_tool = value.to_string(),
            "privilege_command" => self.privilege_command = split_command(value),
            "capture_timeout_secs" => {
                self.capture_timeout = Duration::from_secs(parse_value(key, value)?)
            }
            "ping_timeout_secs" => self.ping_timeout = Duration::from_secs(parse_value(key, value)?),
            "max_packet_count" => {
                self.max_packet_count = parse_value(key, value)?;
                if self.max_packet_count < 1 {
                    return Err(AppError::Config(format!("Invalid max_packet_count: {}", value)));
                }
            }
            "max_window_ms" => self.max_window_ms = parse_value(key, value)?,
            "ip_echo_url" => self.ip_echo_url = value.to_string(),
            "ip_echo_timeout_secs" => {
                self.ip_echo_timeout = Duration::from_secs(parse_value(key, value)?)
            }
            "log_filter" => self.log_filter = value.to_string(),
            "log_dir" => {
                self.log_dir = if value.is_empty() { None } else { Some(PathBuf::from(value)) }
            }
            _ => tracing::debug!("Ignoring unknown config key: {}", key),
        }
        Ok(())
    }
}

const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("bind_address", "NETMOND_BIND_ADDRESS"),
    ("port", "NETMOND_PORT"),
    ("default_interface", "NETMOND_DEFAULT_INTERFACE"),
    ("capture_tool", "NETMOND_CAPTURE_TOOL"),
    ("ping_tool", "NETMOND_PING_TOOL"),
    ("privilege_command", "NETMOND_PRIVILEGE_COMMAND"),
    ("capture_timeout_secs", "NETMOND_CAPTURE_TIMEOUT_SECS"),
    ("ping_timeout_secs", "NETMOND_PING_TIMEOUT_SECS"),
    ("max_packet_count", "NETMOND_MAX_PACKET_COUNT"),
    ("max_window_ms", "NETMOND_MAX_WINDOW_MS"),
    ("ip_echo_url", "NETMOND_IP_ECHO_URL"),
    ("ip_echo_timeout_secs", "NETMOND_IP_ECHO_TIMEOUT_SECS"),
    ("log_filter", "NETMOND_LOG_FILTER"),
    ("log_dir", "NETMOND_LOG_DIR"),
];

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, AppError> {
    value
        .parse()
        .map_err(|_| AppError::Config(format!("Invalid {}: {}", key, value)))
}

fn split_command(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub capture: Arc<CaptureInvoker>,
    pub probe: Arc<ReachabilityProbe>,
    pub counters: Arc<dyn CounterSource>,
    pub external_ip: Arc<ExternalIpService>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, AppError> {
        let counters: Arc<dyn CounterSource> = Arc::new(SystemCounters);
        Self::with_counters(config, counters)
    }

    /// Build state with an explicit counter source.
    pub fn with_counters(config: Config, counters: Arc<dyn CounterSource>) -> Result<Self, AppError> {
        let capture = CaptureInvoker::new(config.capture_tool.clone())
            .with_privilege_command(config.privilege_command.clone())
            .with_max_packet_count(config.max_packet_count);

        let ping_deadline = (!config.ping_timeout.is_zero()).then_some(config.ping_timeout);
        let probe = ReachabilityProbe::new(config.ping_tool.clone())
            .with_deadline(ping_deadline)
            .with_max_packet_count(config.max_packet_count);

        let external_ip =
            ExternalIpService::new(config.ip_echo_url.clone(), config.ip_echo_timeout)?;

        Ok(AppState {
            config: Arc::new(config),
            capture: Arc::new(capture),
            probe: Arc::new(probe),
            counters,
            external_ip: Arc::new(external_ip),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.default_interface, "wlp4s0");
        assert_eq!(config.privilege_command, vec!["sudo", "-n"]);
        assert_eq!(config.capture_timeout, Duration::from_secs(15));
        assert_eq!(config.ip_echo_timeout, Duration::from_secs(5));
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_parse_overrides_defaults() {
        let content = "\
# netmond settings
port = 9090
bind_address = 127.0.0.1
privilege_command =
capture_timeout_secs = 3
log_dir = /var/log/netmond
unknown_key = whatever
";
        let config = Config::parse(content).unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.bind_address, IpAddr::from([127, 0, 0, 1]));
        assert!(config.privilege_command.is_empty());
        assert_eq!(config.capture_timeout, Duration::from_secs(3));
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/netmond")));
        assert_eq!(config.capture_tool, "tcpdump");
    }

    #[test]
    fn test_parse_invalid_port() {
        let result = Config::parse("port = eighty");
        assert!(matches!(result, Err(AppError::Config(ref m)) if m == "Invalid port: eighty"));
    }

    #[test]
    fn test_parse_rejects_zero_max_packet_count() {
        assert!(Config::parse("max_packet_count = 0").is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load(Path::new("/nonexistent/netmond.conf")).unwrap();
        assert_eq!(config.ping_tool, "ping");
    }

    #[test]
    fn test_env_overrides_cover_every_key() {
        let content = "\
bind_address = 127.0.0.1
port = 1
default_interface = x
capture_tool = x
ping_tool = x
privilege_command = x
capture_timeout_secs = 1
ping_timeout_secs = 1
max_packet_count = 1
max_window_ms = 1
ip_echo_url = x
ip_echo_timeout_secs = 1
log_filter = x
log_dir = x
";
        let file_keys: Vec<&str> = content
            .lines()
            .filter_map(|l| l.split_once('=').map(|(k, _)| k.trim()))
            .collect();
        assert!(Config::parse(content).is_ok());

        let env_keys: Vec<&str> = ENV_OVERRIDES.iter().map(|(key, _)| *key).collect();
        assert_eq!(env_keys, file_keys);
        for (key, env) in ENV_OVERRIDES {
            assert_eq!(*env, format!("NETMOND_{}", key.to_uppercase()));
        }
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(|env| match env {
                "NETMOND_PING_TIMEOUT_SECS" => Some("0".to_string()),
                "NETMOND_MAX_WINDOW_MS" => Some("2500".to_string()),
                "NETMOND_IP_ECHO_URL" => Some("http://127.0.0.1:9/".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.ping_timeout, Duration::ZERO);
        assert_eq!(config.max_window_ms, 2500);
        assert_eq!(config.ip_echo_url, "http://127.0.0.1:9/");
        assert_eq!(config.port, 8000);
    }

    #[test]
    fn test_apply_overrides_rejects_invalid_value() {
        let mut config = Config::default();
        let result = config.apply_overrides(|env| {
            (env == "NETMOND_MAX_PACKET_COUNT").then(|| "0".to_string())
        });
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
