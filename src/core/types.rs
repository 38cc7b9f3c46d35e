use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{
    Error, Result, DEFAULT_EVENT_CAPACITY, DEFAULT_PING_INTERVAL, DEFAULT_RECONNECT_DELAY,
    DEFAULT_RESPONSE_TIMEOUT, DEFAULT_TCP_PORT, DISCOVERY_PORT,
};

/// Configuration for a session with one device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// IP address or host name of the device
    pub host: String,
    /// TCP port of the device
    pub port: u16,
    /// Passcode of the device; queried from the device during authentication if unknown
    pub passcode: Option<String>,
    /// Reconnect automatically after the connection was lost
    pub auto_reconnect: bool,
    /// Delay between losing the connection and the next connect attempt
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub reconnect_delay: Duration,
    /// How long a request waits for its response
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub response_timeout: Duration,
    /// Interval between keepalive pings once authenticated
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub ping_interval: Duration,
    /// Capacity of the notification channel
    pub event_capacity: usize,
}

impl DeviceConfig {
    /// Creates a configuration with default settings for the given host
    pub fn new(host: impl Into<String>) -> Self {
        DeviceConfig {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Checks that the configuration can drive a session
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::config("No IP provided for device"));
        }
        if self.ping_interval.is_zero() {
            return Err(Error::config("Ping interval must be greater than zero"));
        }
        if self.response_timeout.is_zero() {
            return Err(Error::config("Response timeout must be greater than zero"));
        }
        if self.event_capacity == 0 {
            return Err(Error::config("Event capacity must be greater than zero"));
        }
        Ok(())
    }

    /// Returns the `host:port` pair to connect to
    pub fn target(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            host: String::new(),
            port: DEFAULT_TCP_PORT,
            passcode: None,
            auto_reconnect: true,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Configuration for UDP discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Local address to listen on
    pub bind_addr: SocketAddr,
    /// Where probes are sent, normally the broadcast address
    pub target: SocketAddr,
    /// Capacity of the notification channel
    pub event_capacity: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            target: SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DISCOVERY_PORT),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}
