use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{bail, Context, Result};
use shared::protocol::{HTTP_SERVICE_TYPE, SHELLY_SERVICE_TYPE};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub hosts: HostsConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// Emit JSON lines instead of the human readable format
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// How long one mDNS scan round listens for announcements
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_secs: u64,
    #[serde(default = "default_service_types")]
    pub service_types: Vec<String>,
    /// Fall back to IPv6 addresses when a device announces no IPv4 address
    #[serde(default)]
    pub ipv6: bool,
}

/// Statically configured hosts per device family.
/// Entries are `host` or `host:port`, optionally comma-delimited.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostsConfig {
    #[serde(default)]
    pub plug: Vec<String>,
    #[serde(default)]
    pub plus: Vec<String>,
    #[serde(default)]
    pub pro: Vec<String>,
    #[serde(default)]
    pub em3: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Scrape deadline used when Prometheus sends no timeout header
    #[serde(default = "default_probe_timeout")]
    pub default_timeout_secs: f64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_refresh_interval() -> u64 {
    900
}

fn default_scan_timeout() -> u64 {
    5
}

fn default_service_types() -> Vec<String> {
    vec![HTTP_SERVICE_TYPE.to_string(), SHELLY_SERVICE_TYPE.to_string()]
}

fn default_probe_timeout() -> f64 {
    30.0
}

fn default_request_timeout() -> u64 {
    5
}

fn default_user_agent() -> String {
    format!("shelly-discoveryd/{}", env!("CARGO_PKG_VERSION"))
}

fn default_listen() -> String {
    "[::]:8080".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            scan_timeout_secs: default_scan_timeout(),
            service_types: default_service_types(),
            ipv6: false,
        }
    }
}

impl DiscoveryConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_probe_timeout(),
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
            username: String::new(),
            password: String::new(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.discovery.validate()?;
        Ok(config)
    }
}

impl DiscoveryConfig {
    /// Every service type must be a fully qualified DNS-SD type the browser accepts
    fn validate(&self) -> Result<()> {
        if self.service_types.is_empty() {
            bail!("discovery.service_types must name at least one service type");
        }

        for service_type in &self.service_types {
            let valid = service_type.starts_with('_')
                && (service_type.ends_with("._tcp.local.") || service_type.ends_with("._udp.local."));
            if !valid {
                bail!(
                    "Invalid mDNS service type \"{}\", expected \"_<name>._tcp.local.\" or \"_<name>._udp.local.\"",
                    service_type
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.discovery.scan_timeout(), Duration::from_secs(5));
        assert_eq!(config.discovery.refresh_interval(), Duration::from_secs(900));
        assert_eq!(
            config.discovery.service_types,
            vec![HTTP_SERVICE_TYPE.to_string(), SHELLY_SERVICE_TYPE.to_string()]
        );
        assert!(config.hosts.plug.is_empty());
        assert_eq!(config.api.listen, "[::]:8080");
        assert!(!config.log.json);
    }

    #[test]
    fn test_parse_hosts_and_overrides() {
        let config = Config::parse(
            r#"
            [discovery]
            scan_timeout_secs = 2
            service_types = ["_shelly._tcp.local."]

            [hosts]
            plug = ["10.0.0.5:80", "10.0.0.6"]
            pro = ["10.0.1.1,10.0.1.2:8080"]
            "#,
        )
        .unwrap();

        assert_eq!(config.discovery.scan_timeout_secs, 2);
        assert_eq!(config.discovery.service_types.len(), 1);
        assert_eq!(config.hosts.plug.len(), 2);
        assert_eq!(config.hosts.pro, vec!["10.0.1.1,10.0.1.2:8080".to_string()]);
        assert_eq!(config.probe.default_timeout_secs, 30.0);
    }

    #[test]
    fn test_rejects_malformed_service_types() {
        for service_type in ["_http._tcp", "_http._tcp.local", "http._tcp.local.", "_shelly._sctp.local."] {
            let contents = format!("[discovery]\nservice_types = [\"{}\"]\n", service_type);
            let err = Config::parse(&contents).unwrap_err();
            assert!(err.to_string().contains(service_type), "{:#}", err);
        }

        assert!(Config::parse("[discovery]\nservice_types = []\n").is_err());
        assert!(Config::parse("[discovery]\nservice_types = [\"_coap._udp.local.\"]\n").is_ok());
    }

    #[test]
    fn test_load_reports_bad_service_type() {
        let path = std::env::temp_dir().join(format!("discoveryd-test-{}.toml", std::process::id()));
        std::fs::write(&path, "[discovery]\nservice_types = [\"_http._tcp\"]\n").unwrap();

        let result = Config::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(format!("{:#}", result.unwrap_err()).contains("_http._tcp"));
    }

    #[test]
    fn test_rejects_unknown_types() {
        let result = Config::parse("[discovery]\nscan_timeout_secs = \"soon\"\n");
        assert!(result.is_err());
    }
}
