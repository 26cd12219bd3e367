//! USB and UVC type definitions shared by the driver and its collaborators
//!
//! This module defines the bus speed, class version and transfer status types
//! that cross the boundary between the UVC function driver and the
//! host-controller transfer layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// USB device speed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UsbSpeed {
    /// Low speed - 1.5 Mbps (USB 1.0)
    Low,
    /// Full speed - 12 Mbps (USB 1.1)
    Full,
    /// High speed - 480 Mbps (USB 2.0)
    High,
    /// SuperSpeed - 5 Gbps (USB 3.0)
    Super,
    /// SuperSpeed+ - 10 Gbps (USB 3.1)
    SuperPlus,
}

impl UsbSpeed {
    /// Scheduling intervals per second (frames or micro-frames)
    pub fn intervals_per_second(self) -> u32 {
        match self {
            UsbSpeed::Low | UsbSpeed::Full => 1000,
            UsbSpeed::High | UsbSpeed::Super | UsbSpeed::SuperPlus => 8000,
        }
    }
}

/// UVC specification release number (bcdUVC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UvcVersion(pub u16);

impl UvcVersion {
    pub const V1_0: UvcVersion = UvcVersion(0x0100);
    pub const V1_1: UvcVersion = UvcVersion(0x0110);
    pub const V1_5: UvcVersion = UvcVersion(0x0150);

    pub fn major(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn minor(self) -> u8 {
        (self.0 & 0xff) as u8
    }
}

impl Default for UvcVersion {
    fn default() -> Self {
        UvcVersion::V1_0
    }
}

impl fmt::Display for UvcVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}.{:02x}", self.major(), self.minor())
    }
}

/// USB transfer status reported by the transfer layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum UsbError {
    /// Transfer timed out
    Timeout,
    /// Endpoint stalled (protocol error)
    Pipe,
    /// Device was disconnected
    NoDevice,
    /// Transfer was cancelled before completion
    Cancelled,
    /// Device returned more data than requested
    Overflow,
    /// Device returned fewer bytes than the request required
    ShortTransfer { expected: usize, actual: usize },
    /// Host controller ran out of transfer resources
    NoResources,
    /// I/O error
    Io,
    /// Invalid parameter
    InvalidParam,
    /// Other error with message
    Other { message: String },
}

impl fmt::Display for UsbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsbError::Timeout => write!(f, "transfer timed out"),
            UsbError::Pipe => write!(f, "endpoint stalled"),
            UsbError::NoDevice => write!(f, "device disconnected"),
            UsbError::Cancelled => write!(f, "transfer cancelled"),
            UsbError::Overflow => write!(f, "transfer overflow"),
            UsbError::ShortTransfer { expected, actual } => {
                write!(f, "short transfer: expected {} bytes, got {}", expected, actual)
            }
            UsbError::NoResources => write!(f, "no transfer resources"),
            UsbError::Io => write!(f, "I/O error"),
            UsbError::InvalidParam => write!(f, "invalid parameter"),
            UsbError::Other { message } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for UsbError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering_and_display() {
        assert!(UvcVersion(0x0100) < UvcVersion::V1_1);
        assert!(UvcVersion(0x0150) >= UvcVersion::V1_5);
        assert_eq!(UvcVersion::V1_1.to_string(), "1.10");
        assert_eq!(UvcVersion(0x0100).to_string(), "1.00");
    }

    #[test]
    fn test_speed_intervals() {
        assert_eq!(UsbSpeed::Full.intervals_per_second(), 1000);
        assert_eq!(UsbSpeed::High.intervals_per_second(), 8000);
        assert!(UsbSpeed::Super > UsbSpeed::High);
    }

    #[test]
    fn test_usb_error_display() {
        let err = UsbError::ShortTransfer {
            expected: 26,
            actual: 2,
        };
        assert!(err.to_string().contains("26"));
        assert_eq!(UsbError::Pipe.to_string(), "endpoint stalled");
    }
}
