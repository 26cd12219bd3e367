//! Video probe and commit control block
//!
//! The probe/commit controls carry the streaming parameters negotiated between
//! host and device. The block grows with the class version:
//!
//! ```text
//! offset size field
//!  0     2    bmHint
//!  2     1    bFormatIndex
//!  3     1    bFrameIndex
//!  4     4    dwFrameInterval            (100 ns units)
//!  8     2    wKeyFrameRate
//! 10     2    wPFrameRate
//! 12     2    wCompQuality
//! 14     2    wCompWindowSize
//! 16     2    wDelay
//! 18     4    dwMaxVideoFrameSize
//! 22     4    dwMaxPayloadTransferSize   -- 26 bytes (UVC 1.0)
//! 26     4    dwClockFrequency
//! 30     1    bmFramingInfo
//! 31     1    bPreferedVersion
//! 32     1    bMinVersion
//! 33     1    bMaxVersion                -- 34 bytes (UVC 1.1)
//! 34     1    bUsage
//! 35     1    bBitDepthLuma
//! 36     1    bmSettings
//! 37     1    bMaxNumberOfRefFramesPlus1
//! 38     2    bmRateControlModes
//! 40     8    bmLayoutPerStream          -- 48 bytes (UVC 1.5)
//! ```
//!
//! All fields are little-endian.

use crate::error::{ProtocolError, Result};
use crate::types::UvcVersion;
use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

/// Block size for UVC 1.0 devices
pub const PROBE_SIZE_V10: usize = 26;
/// Block size for UVC 1.1 devices
pub const PROBE_SIZE_V11: usize = 34;
/// Block size for UVC 1.5 devices
pub const PROBE_SIZE_V15: usize = 48;

bitflags! {
    /// bmHint: which fields the device must keep fixed while negotiating
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct ProbeHint: u16 {
        const FRAME_INTERVAL = 1 << 0;
        const KEY_FRAME_RATE = 1 << 1;
        const P_FRAME_RATE = 1 << 2;
        const COMP_QUALITY = 1 << 3;
        const COMP_WINDOW_SIZE = 1 << 4;
    }
}

bitflags! {
    /// bmFramingInfo
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct FramingInfo: u8 {
        /// The FID bit is required in payload headers
        const FID_REQUIRED = 1 << 0;
        /// The EOF bit may be present in payload headers
        const EOF_PRESENT = 1 << 1;
    }
}

/// Probe/commit block size for a device of the given version
pub fn probe_size(version: UvcVersion, extra_fields: bool) -> usize {
    if version >= UvcVersion::V1_5 {
        PROBE_SIZE_V15
    } else if version >= UvcVersion::V1_1 || extra_fields {
        PROBE_SIZE_V11
    } else {
        PROBE_SIZE_V10
    }
}

/// Negotiated streaming parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamControl {
    pub hint: ProbeHint,
    pub format_index: u8,
    pub frame_index: u8,
    /// Frame interval in 100 ns units
    pub frame_interval: u32,
    pub key_frame_rate: u16,
    pub p_frame_rate: u16,
    pub comp_quality: u16,
    pub comp_window_size: u16,
    pub delay: u16,
    pub max_video_frame_size: u32,
    pub max_payload_transfer_size: u32,
    pub clock_frequency: u32,
    pub framing_info: FramingInfo,
    pub preferred_version: u8,
    pub min_version: u8,
    pub max_version: u8,
    pub usage: u8,
    pub bit_depth_luma: u8,
    pub settings: u8,
    pub max_ref_frames_plus_one: u8,
    pub rate_control_modes: u16,
    pub layout_per_stream: u64,
}

impl StreamControl {
    /// Decode a block of exactly 26, 34 or 48 bytes
    ///
    /// Fields beyond the received size keep their default value; the caller
    /// fills `clock_frequency` from the control interface header for 26-byte
    /// devices.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < PROBE_SIZE_V10 {
            return Err(ProtocolError::Truncated {
                what: "probe control",
                needed: PROBE_SIZE_V10,
                available: data.len(),
            });
        }

        let mut ctrl = StreamControl {
            hint: ProbeHint::from_bits_retain(LittleEndian::read_u16(&data[0..2])),
            format_index: data[2],
            frame_index: data[3],
            frame_interval: LittleEndian::read_u32(&data[4..8]),
            key_frame_rate: LittleEndian::read_u16(&data[8..10]),
            p_frame_rate: LittleEndian::read_u16(&data[10..12]),
            comp_quality: LittleEndian::read_u16(&data[12..14]),
            comp_window_size: LittleEndian::read_u16(&data[14..16]),
            delay: LittleEndian::read_u16(&data[16..18]),
            max_video_frame_size: LittleEndian::read_u32(&data[18..22]),
            max_payload_transfer_size: LittleEndian::read_u32(&data[22..26]),
            ..Default::default()
        };

        if data.len() >= PROBE_SIZE_V11 {
            ctrl.clock_frequency = LittleEndian::read_u32(&data[26..30]);
            ctrl.framing_info = FramingInfo::from_bits_retain(data[30]);
            ctrl.preferred_version = data[31];
            ctrl.min_version = data[32];
            ctrl.max_version = data[33];
        }

        if data.len() >= PROBE_SIZE_V15 {
            ctrl.usage = data[34];
            ctrl.bit_depth_luma = data[35];
            ctrl.settings = data[36];
            ctrl.max_ref_frames_plus_one = data[37];
            ctrl.rate_control_modes = LittleEndian::read_u16(&data[38..40]);
            ctrl.layout_per_stream = LittleEndian::read_u64(&data[40..48]);
        }

        Ok(ctrl)
    }

    /// Synthesize a block from a reply that only carries wCompQuality
    ///
    /// Some chipsets answer GET_MIN/GET_MAX on the probe control with two bytes.
    pub fn from_quality_only(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(ProtocolError::Truncated {
                what: "probe control quality",
                needed: 2,
                available: data.len(),
            });
        }
        Ok(StreamControl {
            comp_quality: LittleEndian::read_u16(&data[0..2]),
            ..Default::default()
        })
    }

    /// Encode into a block of `size` bytes (26, 34 or 48)
    pub fn encode(&self, size: usize) -> Result<Vec<u8>> {
        if !matches!(size, PROBE_SIZE_V10 | PROBE_SIZE_V11 | PROBE_SIZE_V15) {
            return Err(ProtocolError::invalid(
                "probe control size",
                format!("{} is not 26, 34 or 48", size),
            ));
        }

        let mut out = Vec::with_capacity(size);
        out.write_u16::<LittleEndian>(self.hint.bits())?;
        out.write_u8(self.format_index)?;
        out.write_u8(self.frame_index)?;
        out.write_u32::<LittleEndian>(self.frame_interval)?;
        out.write_u16::<LittleEndian>(self.key_frame_rate)?;
        out.write_u16::<LittleEndian>(self.p_frame_rate)?;
        out.write_u16::<LittleEndian>(self.comp_quality)?;
        out.write_u16::<LittleEndian>(self.comp_window_size)?;
        out.write_u16::<LittleEndian>(self.delay)?;
        out.write_u32::<LittleEndian>(self.max_video_frame_size)?;
        out.write_u32::<LittleEndian>(self.max_payload_transfer_size)?;

        if size >= PROBE_SIZE_V11 {
            out.write_u32::<LittleEndian>(self.clock_frequency)?;
            out.write_u8(self.framing_info.bits())?;
            out.write_u8(self.preferred_version)?;
            out.write_u8(self.min_version)?;
            out.write_u8(self.max_version)?;
        }

        if size >= PROBE_SIZE_V15 {
            out.write_u8(self.usage)?;
            out.write_u8(self.bit_depth_luma)?;
            out.write_u8(self.settings)?;
            out.write_u8(self.max_ref_frames_plus_one)?;
            out.write_u16::<LittleEndian>(self.rate_control_modes)?;
            out.write_u64::<LittleEndian>(self.layout_per_stream)?;
        }

        Ok(out)
    }

    /// Frames per second implied by the frame interval
    pub fn frames_per_second(&self) -> f64 {
        if self.frame_interval == 0 {
            0.0
        } else {
            10_000_000.0 / self.frame_interval as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StreamControl {
        StreamControl {
            hint: ProbeHint::FRAME_INTERVAL,
            format_index: 1,
            frame_index: 2,
            frame_interval: 333_333,
            comp_quality: 5000,
            max_video_frame_size: 614_400,
            max_payload_transfer_size: 3072,
            clock_frequency: 48_000_000,
            framing_info: FramingInfo::FID_REQUIRED | FramingInfo::EOF_PRESENT,
            ..Default::default()
        }
    }

    #[test]
    fn test_probe_size_by_version() {
        assert_eq!(probe_size(UvcVersion::V1_0, false), 26);
        assert_eq!(probe_size(UvcVersion::V1_0, true), 34);
        assert_eq!(probe_size(UvcVersion::V1_1, false), 34);
        assert_eq!(probe_size(UvcVersion::V1_5, false), 48);
    }

    #[test]
    fn test_field_offsets() {
        let bytes = sample().encode(PROBE_SIZE_V11).unwrap();
        assert_eq!(bytes.len(), 34);
        assert_eq!(&bytes[0..2], &[0x01, 0x00]);
        assert_eq!(bytes[2], 1);
        assert_eq!(bytes[3], 2);
        assert_eq!(LittleEndian::read_u32(&bytes[4..8]), 333_333);
        assert_eq!(LittleEndian::read_u32(&bytes[18..22]), 614_400);
        assert_eq!(LittleEndian::read_u32(&bytes[22..26]), 3072);
        assert_eq!(LittleEndian::read_u32(&bytes[26..30]), 48_000_000);
        assert_eq!(bytes[30], 0x03);
    }

    #[test]
    fn test_short_block_drops_extended_fields() {
        let bytes = sample().encode(PROBE_SIZE_V10).unwrap();
        assert_eq!(bytes.len(), 26);
        let decoded = StreamControl::decode(&bytes).unwrap();
        assert_eq!(decoded.format_index, 1);
        assert_eq!(decoded.clock_frequency, 0);
        assert!(decoded.framing_info.is_empty());
    }

    #[test]
    fn test_decode_rejects_truncated() {
        assert!(matches!(
            StreamControl::decode(&[0u8; 20]),
            Err(ProtocolError::Truncated { needed: 26, .. })
        ));
    }

    #[test]
    fn test_encode_rejects_odd_size() {
        assert!(sample().encode(30).is_err());
    }

    #[test]
    fn test_quality_only_reply() {
        let ctrl = StreamControl::from_quality_only(&[0x10, 0x27]).unwrap();
        assert_eq!(ctrl.comp_quality, 10_000);
        assert_eq!(ctrl.format_index, 0);
    }

    #[test]
    fn test_frames_per_second() {
        assert!((sample().frames_per_second() - 30.0).abs() < 0.01);
        assert_eq!(StreamControl::default().frames_per_second(), 0.0);
    }
}
