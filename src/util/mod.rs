//! Utility module
//!
//! Small formatting helpers shared by logging, serialization and diagnostics.

use std::fmt::Write;

/// Formats bytes as a lowercase hex string without separators
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        // Writing into a String cannot fail
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Formats a byte as a binary string without leading zeros
pub fn to_binary(byte: u8) -> String {
    format!("{:b}", byte)
}
