//! PH803-W: client for the PH803-W pH/redox pool controller
//!
//! The device speaks a small binary protocol over TCP (port 12416). A session
//! authenticates with a passcode, keeps itself alive with pings and receives
//! telemetry either on request or pushed by the device. Devices on the local
//! network can be found with a UDP broadcast probe (port 12414).
//!
//! ```no_run
//! use ph803w::{Device, DeviceConfig, DeviceEvent};
//!
//! # async fn run() -> ph803w::Result<()> {
//! let device = Device::spawn(DeviceConfig::new("192.168.1.50"))?;
//! let mut events = device.subscribe();
//! device.connect().await?;
//! device.authenticate(None).await?;
//! let reading = device.retrieve_data().await?;
//! println!("pH {} redox {}", reading.ph, reading.redox);
//!
//! while let Ok(event) = events.recv().await {
//!     if let DeviceEvent::Data(reading) = event {
//!         println!("pH {} redox {}", reading.ph, reading.redox);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
pub mod core;
pub mod network;
pub mod protocol;
pub mod util;

// Re-export commonly used items
pub use crate::core::{DeviceConfig, DiscoveryConfig, Error, FramingError, Result};
pub use crate::network::{
    discover, DiscoveredDevice, Discovery, DiscoveryEvent, Device, DeviceEvent, ResponseHandle,
};
pub use crate::protocol::{Request, Response, SessionState, TelemetryReading};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
