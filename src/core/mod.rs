//! Core types shared by the codec, the device session and discovery
//!
//! This module contains errors, configuration and the protocol-wide constants.

pub mod error;
pub mod serde;
pub mod types;

pub use self::error::{Error, FramingError, Result};
pub use self::types::{DeviceConfig, DiscoveryConfig};

use std::time::Duration;

/// Default TCP port of the device
pub const DEFAULT_TCP_PORT: u16 = 12416;

/// UDP port the device listens on for discovery probes
pub const DISCOVERY_PORT: u16 = 12414;

/// Default interval between keepalive pings
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(4000);

/// Default delay before reconnecting after the connection was lost
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(10000);

/// Default time to wait for a response before rejecting the request
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default capacity of the notification channels
pub const DEFAULT_EVENT_CAPACITY: usize = 64;
