//! Device quirk flags and vendor/product identifiers

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

bitflags! {
    /// Workarounds for non-compliant cameras
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Quirks: u32 {
        /// GET_MIN/GET_MAX on the probe control are broken; skip refinement
        const PROBE_MINMAX = 0x0000_0002;
        /// Use the 34-byte probe block even on UVC 1.0 devices, and copy
        /// dwMaxVideoFrameSize into probe requests since the device stalls
        /// when it is zero
        const PROBE_EXTRAFIELDS = 0x0000_0004;
        /// The FID bit never toggles; derive frame boundaries from EOF
        const STREAM_NO_FID = 0x0000_0010;
        /// dwMaxPayloadTransferSize is bogus; compute it from the frame
        const FIX_BANDWIDTH = 0x0000_0080;
        /// GET_DEF on the probe control is broken; never send it
        const PROBE_DEF = 0x0000_0100;
        /// Restore control values when the device is initialised
        const RESTORE_CTRLS_ON_INIT = 0x0000_0400;
    }
}

impl Quirks {
    /// Parse a flag name such as `"probe_minmax"` (case-insensitive)
    pub fn parse_name(name: &str) -> Option<Self> {
        Self::from_name(&name.trim().to_ascii_uppercase())
    }
}

/// USB vendor/product pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsbId {
    pub vendor: u16,
    pub product: u16,
}

impl UsbId {
    pub const fn new(vendor: u16, product: u16) -> Self {
        Self { vendor, product }
    }
}

impl fmt::Display for UsbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor, self.product)
    }
}

impl FromStr for UsbId {
    type Err = crate::Error;

    /// Accepts `vvvv:pppp` with optional `0x` prefixes
    fn from_str(s: &str) -> crate::Result<Self> {
        let (vid, pid) = s
            .split_once(':')
            .ok_or_else(|| crate::Error::Config(format!("Invalid device id '{}', expected VID:PID", s)))?;
        Ok(Self {
            vendor: parse_hex_id(vid, "VID")?,
            product: parse_hex_id(pid, "PID")?,
        })
    }
}

fn parse_hex_id(id: &str, name: &str) -> crate::Result<u16> {
    let id = id.trim();
    let hex = id
        .strip_prefix("0x")
        .or_else(|| id.strip_prefix("0X"))
        .unwrap_or(id);
    if hex.is_empty() || hex.len() > 4 {
        return Err(crate::Error::Config(format!(
            "Invalid {} '{}', hex part must be 1-4 digits",
            name, id
        )));
    }
    u16::from_str_radix(hex, 16)
        .map_err(|_| crate::Error::Config(format!("Invalid {} '{}', not a valid hex number", name, id)))
}
