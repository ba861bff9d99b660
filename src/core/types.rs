use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{Error, Result};

/// Transport protocol used to reach the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Connectionless datagram link (default for SITL)
    Udp,
    /// Stream link, framed by the codec
    Tcp,
}

impl Default for TransportKind {
    fn default() -> Self {
        TransportKind::Udp
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(TransportKind::Udp),
            "tcp" => Ok(TransportKind::Tcp),
            other => Err(Error::config(format!(
                "unknown transport protocol '{}', expected 'udp' or 'tcp'",
                other
            ))),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Udp => write!(f, "udp"),
            TransportKind::Tcp => write!(f, "tcp"),
        }
    }
}

/// Identifies one physical vehicle link
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Vehicle host name or address
    pub host: String,
    /// Vehicle port
    pub port: u16,
    /// Transport protocol
    pub kind: TransportKind,
}

impl Endpoint {
    /// Creates a new endpoint
    pub fn new(host: impl Into<String>, port: u16, kind: TransportKind) -> Self {
        Endpoint {
            host: host.into(),
            port,
            kind,
        }
    }

    /// Default SITL endpoint (udp 127.0.0.1:14552)
    pub fn default_sitl() -> Self {
        Endpoint::new(super::DEFAULT_HOST, super::DEFAULT_PORT, TransportKind::Udp)
    }

    /// Key under which connections to this endpoint share a pooled transport
    pub fn pool_key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Loads the endpoint from environment variables, falling back to the
    /// default SITL endpoint. Validates the port range.
    pub fn from_env() -> Result<Self> {
        let host = env::var("GCS_LINK_HOST").unwrap_or_else(|_| super::DEFAULT_HOST.to_string());
        let port = match env::var("GCS_LINK_PORT") {
            Ok(raw) => {
                let port: u32 = raw
                    .parse()
                    .map_err(|_| Error::config(format!("invalid port '{}'", raw)))?;
                if port == 0 || port > 65535 {
                    return Err(Error::config(format!(
                        "port {} out of range, expected 1..=65535",
                        port
                    )));
                }
                port as u16
            }
            Err(_) => super::DEFAULT_PORT,
        };
        let kind = match env::var("GCS_LINK_PROTOCOL") {
            Ok(raw) => raw.parse()?,
            Err(_) => TransportKind::Udp,
        };
        Ok(Endpoint::new(host, port, kind))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.host, self.port)
    }
}

/// Session parameters, immutable for the lifetime of a connection manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Source system id used on outbound frames
    pub source_system_id: u8,
    /// Source component id used on outbound frames
    pub source_component_id: u8,
    /// Timeout applied to transport opens and individual sends
    #[serde(with = "super::serde::duration")]
    pub timeout: Duration,
    /// Whether connect failures schedule bounded retries
    pub auto_reconnect: bool,
    /// Maximum reconnect attempts before the manager gives up
    pub max_reconnect_attempts: u32,
    /// Fixed delay between reconnect attempts (linear, no jitter)
    #[serde(with = "super::serde::duration")]
    pub reconnect_interval: Duration,
    /// Interval between outbound ground-station heartbeats
    #[serde(with = "super::serde::duration")]
    pub heartbeat_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            source_system_id: super::SOURCE_SYSTEM_ID,
            source_component_id: super::SOURCE_COMPONENT_ID,
            timeout: Duration::from_millis(super::DEFAULT_TIMEOUT_MS),
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_interval: Duration::from_millis(2000),
            heartbeat_interval: Duration::from_millis(super::DEFAULT_HEARTBEAT_INTERVAL_MS),
        }
    }
}

impl SessionConfig {
    /// Loads session parameters from environment variables, starting from the
    /// defaults. Validation happens once here, at startup.
    pub fn from_env() -> Result<Self> {
        let mut config = SessionConfig::default();
        if let Some(ms) = read_env_u64("GCS_LINK_TIMEOUT_MS")? {
            config.timeout = Duration::from_millis(ms);
        }
        if let Ok(raw) = env::var("GCS_LINK_AUTO_RECONNECT") {
            config.auto_reconnect = match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(Error::config(format!(
                        "invalid auto-reconnect flag '{}'",
                        other
                    )))
                }
            };
        }
        if let Some(n) = read_env_u64("GCS_LINK_MAX_RECONNECT_ATTEMPTS")? {
            config.max_reconnect_attempts = n as u32;
        }
        if let Some(ms) = read_env_u64("GCS_LINK_RECONNECT_INTERVAL_MS")? {
            config.reconnect_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = read_env_u64("GCS_LINK_HEARTBEAT_INTERVAL_MS")? {
            config.heartbeat_interval = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks the documented parameter ranges
    pub fn validate(&self) -> Result<()> {
        if self.timeout < Duration::from_millis(1000) {
            return Err(Error::config(format!(
                "timeout {:?} too short, expected at least 1000 ms",
                self.timeout
            )));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(Error::config("heartbeat interval must be non-zero"));
        }
        Ok(())
    }
}

fn read_env_u64(key: &str) -> Result<Option<u64>> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| Error::config(format!("invalid value '{}' for {}", raw, key))),
        Err(_) => Ok(None),
    }
}

/// Lifecycle state of a connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No transport held
    Disconnected,
    /// Transport open in progress
    Connecting,
    /// Link established, heartbeat and receive loops running
    Connected,
    /// Waiting out the reconnect interval before the next attempt
    Reconnecting,
    /// Reconnect attempts exhausted; stays here until connect()/reconnect()
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Bit set on `base_mode` while the vehicle is armed
pub const BASE_MODE_ARMED: u8 = 0x80;

/// Last heartbeat observed from the vehicle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSnapshot {
    /// Vehicle airframe type
    pub vehicle_type: u8,
    /// Autopilot flavour
    pub autopilot_type: u8,
    /// Base mode bit field; bit 0x80 is the armed flag
    pub base_mode: u8,
    /// Autopilot-specific mode number
    pub custom_mode: u32,
    /// Overall system status
    pub system_status: u8,
    /// Protocol version advertised by the vehicle
    pub protocol_version: u8,
    /// When the heartbeat was received
    pub received_at: DateTime<Utc>,
}

impl HeartbeatSnapshot {
    /// Whether the armed bit is set
    pub fn armed(&self) -> bool {
        self.base_mode & BASE_MODE_ARMED != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_pool_key() {
        let ep = Endpoint::new("127.0.0.1", 14552, TransportKind::Udp);
        assert_eq!(ep.pool_key(), "127.0.0.1:14552");
        // udp and tcp endpoints to the same address share a pool slot
        let tcp = Endpoint::new("127.0.0.1", 14552, TransportKind::Tcp);
        assert_eq!(ep.pool_key(), tcp.pool_key());
    }

    #[test]
    fn test_transport_kind_parse() {
        assert_eq!("udp".parse::<TransportKind>().unwrap(), TransportKind::Udp);
        assert_eq!("TCP".parse::<TransportKind>().unwrap(), TransportKind::Tcp);
        assert!("serial".parse::<TransportKind>().is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SessionConfig::default();
        config.validate().unwrap();

        config.timeout = Duration::from_millis(500);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_endpoint_from_env_rejects_port_zero() {
        env::set_var("GCS_LINK_PORT", "0");
        let err = Endpoint::from_env().unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        env::set_var("GCS_LINK_PORT", "14552");
        let ep = Endpoint::from_env().unwrap();
        assert_eq!(ep.port, 14552);
        env::remove_var("GCS_LINK_PORT");
    }

    #[test]
    fn test_default_config_values() {
        let config = SessionConfig::default();
        assert_eq!(config.source_system_id, 1);
        assert_eq!(config.source_component_id, 90);
        assert!(config.auto_reconnect);
        assert_eq!(config.heartbeat_interval, Duration::from_millis(1000));
    }

    #[test]
    fn test_armed_flag() {
        let mut hb = HeartbeatSnapshot {
            vehicle_type: 2,
            autopilot_type: 3,
            base_mode: 0x51,
            custom_mode: 4,
            system_status: 4,
            protocol_version: 3,
            received_at: Utc::now(),
        };
        assert!(!hb.armed());
        hb.base_mode |= BASE_MODE_ARMED;
        assert!(hb.armed());
    }
}
