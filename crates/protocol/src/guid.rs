//! GUIDs and FourCC pixel codes
//!
//! Entity GUIDs identify which static control tables apply to a unit or
//! terminal, and format GUIDs identify the pixel encoding of uncompressed and
//! frame-based formats.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 16-byte GUID in wire (mixed-endian) byte order
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Guid([u8; 16]);

impl Guid {
    /// Camera terminal entity GUID
    pub const CAMERA: Guid = Guid::uvc_entity(0x00, 0x01);
    /// Media transport input terminal entity GUID
    pub const MEDIA: Guid = Guid::uvc_entity(0x00, 0x02);
    /// Output terminal entity GUID
    pub const OUTPUT: Guid = Guid::uvc_entity(0x00, 0x03);
    /// Processing unit entity GUID
    pub const PROCESSING: Guid = Guid::uvc_entity(0x01, 0x01);
    /// Selector unit entity GUID
    pub const SELECTOR: Guid = Guid::uvc_entity(0x01, 0x02);

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Standard-entity GUIDs are all zero except for the last two bytes
    const fn uvc_entity(b14: u8, b15: u8) -> Self {
        let mut bytes = [0u8; 16];
        bytes[14] = b14;
        bytes[15] = b15;
        Self(bytes)
    }

    /// Media subtype GUID built from a FourCC
    /// (`XXXXXXXX-0000-0010-8000-00AA00389B71`)
    pub const fn from_fourcc(code: &[u8; 4]) -> Self {
        Self([
            code[0], code[1], code[2], code[3], 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xaa,
            0x00, 0x38, 0x9b, 0x71,
        ])
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-",
            b[3], b[2], b[1], b[0], b[5], b[4], b[7], b[6], b[8], b[9]
        )?;
        for byte in &b[10..] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self)
    }
}

/// Four-character pixel format code
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const YUYV: FourCc = FourCc(*b"YUYV");
    pub const UYVY: FourCc = FourCc(*b"UYVY");
    pub const NV12: FourCc = FourCc(*b"NV12");
    pub const YV12: FourCc = FourCc(*b"YV12");
    pub const YU12: FourCc = FourCc(*b"YU12");
    pub const M420: FourCc = FourCc(*b"M420");
    pub const GREY: FourCc = FourCc(*b"GREY");
    pub const Y16: FourCc = FourCc(*b"Y16 ");
    pub const BA81: FourCc = FourCc(*b"BA81");
    pub const RGBP: FourCc = FourCc(*b"RGBP");
    pub const BGR3: FourCc = FourCc(*b"BGR3");
    pub const MJPG: FourCc = FourCc(*b"MJPG");
    pub const H264: FourCc = FourCc(*b"H264");
    pub const HEVC: FourCc = FourCc(*b"HEVC");

    /// Parse a code such as `"MJPG"`; shorter codes are space padded
    pub fn parse(code: &str) -> Option<Self> {
        let bytes = code.as_bytes();
        if bytes.is_empty() || bytes.len() > 4 || !bytes.iter().all(u8::is_ascii_graphic) {
            return None;
        }
        let mut out = [b' '; 4];
        out[..bytes.len()].copy_from_slice(bytes);
        Some(FourCc(out))
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self)
    }
}

/// Known pixel format
#[derive(Debug, Clone, Copy)]
pub struct FormatInfo {
    pub name: &'static str,
    pub guid: Guid,
    pub fourcc: FourCc,
}

/// Formats recognised by GUID
pub static FORMATS: &[FormatInfo] = &[
    FormatInfo {
        name: "YUV 4:2:2 (YUYV)",
        guid: Guid::from_fourcc(b"YUY2"),
        fourcc: FourCc::YUYV,
    },
    FormatInfo {
        name: "YUV 4:2:2 (YUYV)",
        guid: Guid::from_fourcc(b"YUYV"),
        fourcc: FourCc::YUYV,
    },
    FormatInfo {
        name: "YUV 4:2:2 (UYVY)",
        guid: Guid::from_fourcc(b"UYVY"),
        fourcc: FourCc::UYVY,
    },
    FormatInfo {
        name: "YUV 4:2:0 (NV12)",
        guid: Guid::from_fourcc(b"NV12"),
        fourcc: FourCc::NV12,
    },
    FormatInfo {
        name: "YVU 4:2:0 (YV12)",
        guid: Guid::from_fourcc(b"YV12"),
        fourcc: FourCc::YV12,
    },
    FormatInfo {
        name: "YUV 4:2:0 (I420)",
        guid: Guid::from_fourcc(b"I420"),
        fourcc: FourCc::YU12,
    },
    FormatInfo {
        name: "YUV 4:2:0 (M420)",
        guid: Guid::from_fourcc(b"M420"),
        fourcc: FourCc::M420,
    },
    FormatInfo {
        name: "Greyscale 8-bit (Y800)",
        guid: Guid::from_fourcc(b"Y800"),
        fourcc: FourCc::GREY,
    },
    FormatInfo {
        name: "Greyscale 8-bit (Y8  )",
        guid: Guid::from_fourcc(b"Y8  "),
        fourcc: FourCc::GREY,
    },
    FormatInfo {
        name: "Greyscale 16-bit (Y16 )",
        guid: Guid::from_fourcc(b"Y16 "),
        fourcc: FourCc::Y16,
    },
    FormatInfo {
        name: "BGGR Bayer (BY8 )",
        guid: Guid::from_fourcc(b"BY8 "),
        fourcc: FourCc::BA81,
    },
    FormatInfo {
        name: "RGB565",
        guid: Guid::from_fourcc(b"RGBP"),
        fourcc: FourCc::RGBP,
    },
    FormatInfo {
        name: "BGR 8:8:8 (BGR3)",
        guid: Guid::from_bytes([
            0x7d, 0xeb, 0x36, 0xe4, 0x4f, 0x52, 0xce, 0x11, 0x9f, 0x53, 0x00, 0x20, 0xaf, 0x0b,
            0xa7, 0x70,
        ]),
        fourcc: FourCc::BGR3,
    },
    FormatInfo {
        name: "H.264",
        guid: Guid::from_fourcc(b"H264"),
        fourcc: FourCc::H264,
    },
    FormatInfo {
        name: "H.265",
        guid: Guid::from_fourcc(b"HEVC"),
        fourcc: FourCc::HEVC,
    },
];

/// Look up a format by its GUID
pub fn format_by_guid(guid: &Guid) -> Option<&'static FormatInfo> {
    FORMATS.iter().find(|info| info.guid == *guid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_guids_are_distinct() {
        let all = [
            Guid::CAMERA,
            Guid::MEDIA,
            Guid::OUTPUT,
            Guid::PROCESSING,
            Guid::SELECTOR,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_guid_display_is_mixed_endian() {
        let guid = Guid::from_fourcc(b"YUY2");
        assert_eq!(guid.to_string(), "32595559-0000-0010-8000-00aa00389b71");
    }

    #[test]
    fn test_format_lookup() {
        let info = format_by_guid(&Guid::from_fourcc(b"NV12")).unwrap();
        assert_eq!(info.fourcc, FourCc::NV12);
        assert!(format_by_guid(&Guid::from_fourcc(b"ZZZZ")).is_none());
    }

    #[test]
    fn test_fourcc_parse() {
        assert_eq!(FourCc::parse("MJPG"), Some(FourCc::MJPG));
        assert_eq!(FourCc::parse("Y16"), Some(FourCc::Y16));
        assert_eq!(FourCc::parse(""), None);
        assert_eq!(FourCc::parse("TOOLONG"), None);
        assert_eq!(FourCc::MJPG.to_string(), "MJPG");
    }
}
