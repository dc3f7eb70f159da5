//! Typed records describing a switch and the data read from it.

use std::fmt;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Connection parameters for one device.
///
/// A session manager takes ownership of the config when it is spawned, so the
/// values cannot change under an open session.
#[derive(Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConnectionConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    /// Privilege elevation secret (`enable` password).
    #[serde(default)]
    pub secret: Option<String>,
    /// CLI dialect tag, e.g. `cisco_ios`.
    #[serde(default = "default_device_type")]
    pub device_type: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds allowed for TCP connect, authentication and the first prompt.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Seconds of inactivity after which the transport may drop the session.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
}

fn default_device_type() -> String {
    "cisco_ios".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    45
}

fn default_session_timeout() -> u64 {
    120
}

impl ConnectionConfig {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
            secret: None,
            device_type: default_device_type(),
            port: default_port(),
            connect_timeout_secs: default_connect_timeout(),
            session_timeout_secs: default_session_timeout(),
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = device_type.into();
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// `user@host:port`, used in log lines and recordings.
    pub fn device_addr(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("device_type", &self.device_type)
            .field("port", &self.port)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("session_timeout_secs", &self.session_timeout_secs)
            .finish()
    }
}

/// Operational link state of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Up,
    Down,
    #[default]
    Unknown,
}

impl LinkStatus {
    /// Maps the status words Cisco CLIs print to a link state.
    pub fn from_device_text(text: &str) -> Self {
        let lower = text.trim().to_ascii_lowercase();
        match lower.as_str() {
            "connected" | "up" => LinkStatus::Up,
            "notconnect" | "notconnected" | "down" | "disabled" | "err-disabled"
            | "administratively down" | "shutdown" | "inactive" => LinkStatus::Down,
            _ => LinkStatus::Unknown,
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Up => f.write_str("up"),
            LinkStatus::Down => f.write_str("down"),
            LinkStatus::Unknown => f.write_str("unknown"),
        }
    }
}

/// VLAN membership as shown in the status table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Vlan {
    Access(u16),
    Trunk,
    Routed,
    #[default]
    Unassigned,
}

impl Vlan {
    pub fn from_device_text(text: &str) -> Self {
        let lower = text.trim().to_ascii_lowercase();
        match lower.as_str() {
            "trunk" => Vlan::Trunk,
            "routed" => Vlan::Routed,
            other => other.parse::<u16>().map(Vlan::Access).unwrap_or_default(),
        }
    }
}

impl fmt::Display for Vlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vlan::Access(id) => write!(f, "{id}"),
            Vlan::Trunk => f.write_str("trunk"),
            Vlan::Routed => f.write_str("routed"),
            Vlan::Unassigned => f.write_str("-"),
        }
    }
}

/// One interface as seen in a single poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InterfaceState {
    pub name: String,
    pub status: LinkStatus,
    /// Status word exactly as printed by the device (`connected`, `disabled`, ...).
    pub status_text: String,
    pub vlan: Vlan,
    pub speed: String,
    pub duplex: String,
    pub port_type: String,
    pub description: String,
    /// The table line this record was parsed from.
    pub raw: String,
}

impl InterfaceState {
    /// A record with only a name and status; the rest reads as unknown.
    pub fn new(name: impl Into<String>, status: LinkStatus) -> Self {
        Self {
            name: name.into(),
            status,
            status_text: status.to_string(),
            vlan: Vlan::Unassigned,
            speed: "unknown".to_string(),
            duplex: "unknown".to_string(),
            port_type: "unknown".to_string(),
            description: String::new(),
            raw: String::new(),
        }
    }

    pub fn with_vlan(mut self, vlan: Vlan) -> Self {
        self.vlan = vlan;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Identity data from `show version`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeviceIdentity {
    pub hostname: String,
    pub model: String,
    pub serial: String,
    pub version: String,
    pub uptime: String,
}

/// A row of the MAC address table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MacEntry {
    pub vlan: String,
    pub mac: String,
    pub entry_type: String,
    pub ports: String,
}

impl MacEntry {
    /// True when the entry was learned on the given port.
    pub fn is_on_port(&self, port: &str) -> bool {
        self.ports.split([',', ' ']).any(|p| p.trim() == port)
    }
}

/// A row of the ARP table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArpEntry {
    pub ip: String,
    pub age: String,
    pub mac: String,
    pub entry_type: String,
    pub interface: String,
}

/// Point-in-time copy of the telemetry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TelemetrySnapshot {
    pub commands_executed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub connection_attempts: u64,
    pub successful_connections: u64,
    pub errors: u64,
    /// Cumulative mean command latency in seconds.
    pub avg_response_time: f64,
}

impl TelemetrySnapshot {
    /// Cache hit ratio in percent; zero before the first lookup.
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / total as f64 * 100.0
    }
}

/// Result of [`crate::device::SwitchManager::health_check`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HealthReport {
    pub connected: bool,
    pub connectivity_test_passed: bool,
    pub last_error: Option<String>,
    pub telemetry: TelemetrySnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_status_maps_cisco_words() {
        assert_eq!(LinkStatus::from_device_text("connected"), LinkStatus::Up);
        assert_eq!(LinkStatus::from_device_text("notconnect"), LinkStatus::Down);
        assert_eq!(LinkStatus::from_device_text("disabled"), LinkStatus::Down);
        assert_eq!(LinkStatus::from_device_text("err-disabled"), LinkStatus::Down);
        assert_eq!(LinkStatus::from_device_text("monitoring"), LinkStatus::Unknown);
    }

    #[test]
    fn vlan_column_variants() {
        assert_eq!(Vlan::from_device_text("10"), Vlan::Access(10));
        assert_eq!(Vlan::from_device_text("trunk"), Vlan::Trunk);
        assert_eq!(Vlan::from_device_text("routed"), Vlan::Routed);
        assert_eq!(Vlan::from_device_text("unassigned"), Vlan::Unassigned);
    }

    #[test]
    fn debug_redacts_credentials() {
        let config = ConnectionConfig::new("10.0.0.1", "admin", "hunter2").with_secret("s3cret");
        let text = format!("{config:?}");
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("s3cret"));
        assert!(text.contains("10.0.0.1"));
    }

    #[test]
    fn connection_config_fills_defaults_from_json() {
        let config: ConnectionConfig = serde_json::from_str(
            r#"{"host":"sw1","username":"admin","password":"pw"}"#,
        )
        .expect("decode");
        assert_eq!(config.port, 22);
        assert_eq!(config.device_type, "cisco_ios");
        assert_eq!(config.connect_timeout(), Duration::from_secs(45));
    }

    #[test]
    fn mac_entry_port_match_is_exact() {
        let entry = MacEntry {
            vlan: "10".to_string(),
            mac: "0011.2233.4455".to_string(),
            entry_type: "DYNAMIC".to_string(),
            ports: "Gi1/0/1".to_string(),
        };
        assert!(entry.is_on_port("Gi1/0/1"));
        assert!(!entry.is_on_port("Gi1/0/10"));
    }

    #[test]
    fn hit_ratio_handles_empty_counters() {
        let mut snapshot = TelemetrySnapshot::default();
        assert_eq!(snapshot.cache_hit_ratio(), 0.0);
        snapshot.cache_hits = 3;
        snapshot.cache_misses = 1;
        assert_eq!(snapshot.cache_hit_ratio(), 75.0);
    }
}
