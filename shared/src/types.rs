use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Health score of a freshly observed or positively probed target
pub const TARGET_HEALTH_GOOD: u8 = 10;

/// Health a target drops to after its first missed discovery round
pub const TARGET_HEALTH_LOW: u8 = 2;

/// Targets at or below this score are evicted
pub const TARGET_HEALTH_DEAD: u8 = 0;

/// Device family, derived from the announced name or configured host list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Plug,
    Plus,
    Pro,
    Em3,
    Unknown,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Plug => "plug",
            DeviceKind::Plus => "plus",
            DeviceKind::Pro => "pro",
            DeviceKind::Em3 => "em3",
            DeviceKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One device endpoint tracked for polling.
/// This is the record held by the discovery directory and handed to scrape consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRecord {
    /// Resolvable host or IP; unique key within the directory
    pub address: String,

    /// HTTP port of the device
    pub port: u16,

    /// Hostname as announced or configured
    pub hostname: String,

    /// Device family
    #[serde(rename = "type")]
    pub kind: DeviceKind,

    /// Protocol generation ("1" or "2"), when advertised
    pub generation: Option<String>,

    /// Firmware version, when advertised
    pub version: Option<String>,

    /// Liveness score in [TARGET_HEALTH_DEAD, TARGET_HEALTH_GOOD]
    pub health: u8,

    /// Configured by the operator; exempt from decay and eviction
    pub is_static: bool,

    /// Name the device reports about itself, filled in after probing
    pub device_name: Option<String>,

    /// Last discovery round that observed this target
    pub last_seen: Option<DateTime<Utc>>,
}

impl TargetRecord {
    pub fn new(address: impl Into<String>, port: u16, kind: DeviceKind) -> Self {
        let address = address.into();
        Self {
            hostname: address.clone(),
            address,
            port,
            kind,
            generation: None,
            version: None,
            health: TARGET_HEALTH_GOOD,
            is_static: false,
            device_name: None,
            last_seen: None,
        }
    }

    /// Human readable label, e.g. "shellyplug-s-abc [10.0.0.5]"
    pub fn name(&self) -> String {
        format!("{} [{}]", self.hostname, self.address)
    }

    /// Base URL for HTTP requests to the device
    pub fn base_url(&self) -> String {
        if self.address.contains(':') {
            format!("http://[{}]:{}", self.address, self.port)
        } else {
            format!("http://{}:{}", self.address, self.port)
        }
    }

    /// Full URL for a device path, tolerating a missing leading slash
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url(), path.trim_start_matches('/'))
    }
}
