//! Video payload header
//!
//! Every isochronous packet or bulk payload starts with a header:
//!
//! ```text
//! [bHeaderLength][bmHeaderInfo][PTS (4)?][SCR: STC (4) + SOF (2)?][...]
//! ```
//!
//! The header is 2, 6, 8 or 12 bytes long depending on which of the PTS and
//! SCR fields are present. PTS always sits at offset 2; the SCR occupies the
//! last six bytes of the header.

use crate::error::{ProtocolError, Result};
use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

bitflags! {
    /// bmHeaderInfo
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct HeaderFlags: u8 {
        /// Frame identifier, toggles at each frame start
        const FID = 1 << 0;
        /// End of frame
        const EOF = 1 << 1;
        /// Presentation time stamp present
        const PTS = 1 << 2;
        /// Source clock reference present
        const SCR = 1 << 3;
        /// Payload-specific bit
        const RES = 1 << 4;
        /// Still image
        const STI = 1 << 5;
        /// Error
        const ERR = 1 << 6;
        /// End of header
        const EOH = 1 << 7;
    }
}

/// Source clock reference carried in a payload header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scr {
    /// Device source time clock sample
    pub stc: u32,
    /// Device USB frame number (11 bits used)
    pub sof: u16,
}

/// Decoded payload header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadHeader {
    /// bHeaderLength, validated against the payload size
    pub length: u8,
    pub flags: HeaderFlags,
    pub pts: Option<u32>,
    pub scr: Option<Scr>,
}

impl PayloadHeader {
    /// Header size implied by the PTS/SCR presence bits
    pub fn timestamp_layout_size(flags: HeaderFlags) -> usize {
        match (flags.contains(HeaderFlags::PTS), flags.contains(HeaderFlags::SCR)) {
            (true, true) => 12,
            (true, false) => 6,
            (false, true) => 8,
            (false, false) => 2,
        }
    }

    /// Parse and validate the header at the start of `payload`
    ///
    /// The payload must be at least 2 bytes long and `bHeaderLength` must lie
    /// between 2 and the payload size. Timestamps are only extracted when the
    /// declared header is long enough to hold them.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < 2 {
            return Err(ProtocolError::Truncated {
                what: "payload header",
                needed: 2,
                available: payload.len(),
            });
        }

        let length = payload[0];
        if length < 2 || length as usize > payload.len() {
            return Err(ProtocolError::invalid(
                "payload header length",
                format!("{} for a {}-byte payload", length, payload.len()),
            ));
        }

        let flags = HeaderFlags::from_bits_retain(payload[1]);
        let layout = Self::timestamp_layout_size(flags);
        let mut header = PayloadHeader {
            length,
            flags,
            pts: None,
            scr: None,
        };

        if (length as usize) < layout {
            return Ok(header);
        }

        if flags.contains(HeaderFlags::PTS) {
            header.pts = Some(LittleEndian::read_u32(&payload[2..6]));
        }
        if flags.contains(HeaderFlags::SCR) {
            header.scr = Some(Scr {
                stc: LittleEndian::read_u32(&payload[layout - 6..layout - 2]),
                sof: LittleEndian::read_u16(&payload[layout - 2..layout]),
            });
        }

        Ok(header)
    }

    /// Frame identifier bit
    pub fn fid(&self) -> bool {
        self.flags.contains(HeaderFlags::FID)
    }

    /// End-of-frame bit
    pub fn eof(&self) -> bool {
        self.flags.contains(HeaderFlags::EOF)
    }

    /// Error bit
    pub fn error(&self) -> bool {
        self.flags.contains(HeaderFlags::ERR)
    }

    /// Serialize a header with the given fields, used to build payloads
    pub fn encode(flags: HeaderFlags, pts: Option<u32>, scr: Option<Scr>) -> Vec<u8> {
        let mut flags = flags - (HeaderFlags::PTS | HeaderFlags::SCR);
        if pts.is_some() {
            flags |= HeaderFlags::PTS;
        }
        if scr.is_some() {
            flags |= HeaderFlags::SCR;
        }

        let size = Self::timestamp_layout_size(flags);
        let mut out = vec![0u8; size];
        out[0] = size as u8;
        out[1] = flags.bits();
        if let Some(pts) = pts {
            LittleEndian::write_u32(&mut out[2..6], pts);
        }
        if let Some(scr) = scr {
            LittleEndian::write_u32(&mut out[size - 6..size - 2], scr.stc);
            LittleEndian::write_u16(&mut out[size - 2..size], scr.sof);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_header() {
        let header = PayloadHeader::parse(&[2, 0x01, 0xaa, 0xbb]).unwrap();
        assert_eq!(header.length, 2);
        assert!(header.fid());
        assert!(!header.eof());
        assert_eq!(header.pts, None);
        assert_eq!(header.scr, None);
    }

    #[test]
    fn test_header_sizes() {
        assert_eq!(PayloadHeader::timestamp_layout_size(HeaderFlags::empty()), 2);
        assert_eq!(PayloadHeader::timestamp_layout_size(HeaderFlags::PTS), 6);
        assert_eq!(PayloadHeader::timestamp_layout_size(HeaderFlags::SCR), 8);
        assert_eq!(
            PayloadHeader::timestamp_layout_size(HeaderFlags::PTS | HeaderFlags::SCR),
            12
        );
    }

    #[test]
    fn test_pts_and_scr_offsets() {
        let data = [
            12, 0x0c | 0x80, 0x78, 0x56, 0x34, 0x12, 0x04, 0x03, 0x02, 0x01, 0x34, 0x02,
        ];
        let header = PayloadHeader::parse(&data).unwrap();
        assert_eq!(header.pts, Some(0x1234_5678));
        assert_eq!(
            header.scr,
            Some(Scr {
                stc: 0x0102_0304,
                sof: 0x0234
            })
        );
    }

    #[test]
    fn test_scr_only_sits_at_tail() {
        let data = PayloadHeader::encode(
            HeaderFlags::EOH,
            None,
            Some(Scr {
                stc: 77,
                sof: 1500,
            }),
        );
        assert_eq!(data.len(), 8);
        assert_eq!(&data[2..6], &77u32.to_le_bytes());
        let header = PayloadHeader::parse(&data).unwrap();
        assert_eq!(header.scr.map(|s| s.sof), Some(1500));
    }

    #[test]
    fn test_rejects_bad_lengths() {
        assert!(PayloadHeader::parse(&[2]).is_err());
        assert!(PayloadHeader::parse(&[1, 0x00, 0x00]).is_err());
        assert!(PayloadHeader::parse(&[5, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_declared_length_too_short_for_timestamps() {
        // PTS flagged but the header only claims 2 bytes
        let header = PayloadHeader::parse(&[2, 0x04, 1, 2, 3, 4]).unwrap();
        assert!(header.flags.contains(HeaderFlags::PTS));
        assert_eq!(header.pts, None);
    }
}
