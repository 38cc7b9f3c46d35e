//! Device sessions and discovery
//!
//! A [`Device`] handle drives one TCP session on its own task: connect,
//! authenticate, keepalive, telemetry and reconnects. [`Discovery`] finds
//! devices on the local network through UDP broadcast.

mod connection;
mod correlator;
mod device;
mod discovery;

#[cfg(test)]
pub(crate) mod fake_device;

pub use self::correlator::ResponseHandle;
pub use self::device::{Device, DeviceEvent};
pub use self::discovery::{
    decode_reply, discover, DiscoveredDevice, Discovery, DiscoveryEvent, PROBE,
};
