//! USB Video Class codes
//!
//! Numeric values from the UVC 1.5 class specification, appendix A.

/// Video interface class code
pub const CC_VIDEO: u8 = 0x0e;

/// Video interface subclass codes
pub mod subclass {
    pub const UNDEFINED: u8 = 0x00;
    pub const VIDEO_CONTROL: u8 = 0x01;
    pub const VIDEO_STREAMING: u8 = 0x02;
    pub const VIDEO_INTERFACE_COLLECTION: u8 = 0x03;
}

/// Class-specific descriptor types
pub mod descriptor_type {
    pub const INTERFACE: u8 = 0x04;
    pub const ENDPOINT: u8 = 0x05;
    pub const CS_INTERFACE: u8 = 0x24;
    pub const CS_ENDPOINT: u8 = 0x25;
}

/// Video control interface descriptor subtypes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VcSubtype {
    Header = 0x01,
    InputTerminal = 0x02,
    OutputTerminal = 0x03,
    SelectorUnit = 0x04,
    ProcessingUnit = 0x05,
    ExtensionUnit = 0x06,
    EncodingUnit = 0x07,
}

impl VcSubtype {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Header),
            0x02 => Some(Self::InputTerminal),
            0x03 => Some(Self::OutputTerminal),
            0x04 => Some(Self::SelectorUnit),
            0x05 => Some(Self::ProcessingUnit),
            0x06 => Some(Self::ExtensionUnit),
            0x07 => Some(Self::EncodingUnit),
            _ => None,
        }
    }
}

/// Video streaming interface descriptor subtypes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VsSubtype {
    InputHeader = 0x01,
    OutputHeader = 0x02,
    StillImageFrame = 0x03,
    FormatUncompressed = 0x04,
    FrameUncompressed = 0x05,
    FormatMjpeg = 0x06,
    FrameMjpeg = 0x07,
    FormatMpeg2Ts = 0x0a,
    FormatDv = 0x0c,
    ColorFormat = 0x0d,
    FormatFrameBased = 0x10,
    FrameFrameBased = 0x11,
    FormatStreamBased = 0x12,
}

impl VsSubtype {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::InputHeader),
            0x02 => Some(Self::OutputHeader),
            0x03 => Some(Self::StillImageFrame),
            0x04 => Some(Self::FormatUncompressed),
            0x05 => Some(Self::FrameUncompressed),
            0x06 => Some(Self::FormatMjpeg),
            0x07 => Some(Self::FrameMjpeg),
            0x0a => Some(Self::FormatMpeg2Ts),
            0x0c => Some(Self::FormatDv),
            0x0d => Some(Self::ColorFormat),
            0x10 => Some(Self::FormatFrameBased),
            0x11 => Some(Self::FrameFrameBased),
            0x12 => Some(Self::FormatStreamBased),
            _ => None,
        }
    }

    /// True for descriptors that open a new format
    pub fn is_format(self) -> bool {
        matches!(
            self,
            Self::FormatUncompressed
                | Self::FormatMjpeg
                | Self::FormatFrameBased
                | Self::FormatMpeg2Ts
                | Self::FormatDv
                | Self::FormatStreamBased
        )
    }

    /// True for descriptors that describe a frame of the current format
    pub fn is_frame(self) -> bool {
        matches!(
            self,
            Self::FrameUncompressed | Self::FrameMjpeg | Self::FrameFrameBased
        )
    }
}

/// Terminal types (wTerminalType)
pub mod terminal_type {
    pub const TT_VENDOR_SPECIFIC: u16 = 0x0100;
    pub const TT_STREAMING: u16 = 0x0101;

    pub const ITT_VENDOR_SPECIFIC: u16 = 0x0200;
    pub const ITT_CAMERA: u16 = 0x0201;
    pub const ITT_MEDIA_TRANSPORT_INPUT: u16 = 0x0202;

    pub const OTT_VENDOR_SPECIFIC: u16 = 0x0300;
    pub const OTT_DISPLAY: u16 = 0x0301;
    pub const OTT_MEDIA_TRANSPORT_OUTPUT: u16 = 0x0302;

    pub const EXTERNAL_VENDOR_SPECIFIC: u16 = 0x0400;
    pub const COMPOSITE_CONNECTOR: u16 = 0x0401;
    pub const SVIDEO_CONNECTOR: u16 = 0x0402;
    pub const COMPONENT_CONNECTOR: u16 = 0x0403;
}

/// Class-specific request codes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Request {
    SetCur = 0x01,
    GetCur = 0x81,
    GetMin = 0x82,
    GetMax = 0x83,
    GetRes = 0x84,
    GetLen = 0x85,
    GetInfo = 0x86,
    GetDef = 0x87,
}

impl Request {
    /// True for device-to-host requests
    pub fn is_in(self) -> bool {
        (self as u8) & 0x80 != 0
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::SetCur => "SET_CUR",
            Self::GetCur => "GET_CUR",
            Self::GetMin => "GET_MIN",
            Self::GetMax => "GET_MAX",
            Self::GetRes => "GET_RES",
            Self::GetLen => "GET_LEN",
            Self::GetInfo => "GET_INFO",
            Self::GetDef => "GET_DEF",
        }
    }
}

/// bmRequestType for class requests addressed to an interface
pub mod request_type {
    pub const CLASS_INTERFACE_OUT: u8 = 0x21;
    pub const CLASS_INTERFACE_IN: u8 = 0xa1;
}

/// Video streaming interface control selectors
pub mod vs_control {
    pub const PROBE: u8 = 0x01;
    pub const COMMIT: u8 = 0x02;
    pub const STILL_PROBE: u8 = 0x03;
    pub const STILL_COMMIT: u8 = 0x04;
}

/// Camera terminal control selectors
pub mod ct_control {
    pub const SCANNING_MODE: u8 = 0x01;
    pub const AE_MODE: u8 = 0x02;
    pub const AE_PRIORITY: u8 = 0x03;
    pub const EXPOSURE_TIME_ABSOLUTE: u8 = 0x04;
    pub const EXPOSURE_TIME_RELATIVE: u8 = 0x05;
    pub const FOCUS_ABSOLUTE: u8 = 0x06;
    pub const FOCUS_RELATIVE: u8 = 0x07;
    pub const FOCUS_AUTO: u8 = 0x08;
    pub const IRIS_ABSOLUTE: u8 = 0x09;
    pub const IRIS_RELATIVE: u8 = 0x0a;
    pub const ZOOM_ABSOLUTE: u8 = 0x0b;
    pub const ZOOM_RELATIVE: u8 = 0x0c;
    pub const PANTILT_ABSOLUTE: u8 = 0x0d;
    pub const PANTILT_RELATIVE: u8 = 0x0e;
    pub const ROLL_ABSOLUTE: u8 = 0x0f;
    pub const ROLL_RELATIVE: u8 = 0x10;
    pub const PRIVACY: u8 = 0x11;
}

/// Processing unit control selectors
pub mod pu_control {
    pub const BACKLIGHT_COMPENSATION: u8 = 0x01;
    pub const BRIGHTNESS: u8 = 0x02;
    pub const CONTRAST: u8 = 0x03;
    pub const GAIN: u8 = 0x04;
    pub const POWER_LINE_FREQUENCY: u8 = 0x05;
    pub const HUE: u8 = 0x06;
    pub const SATURATION: u8 = 0x07;
    pub const SHARPNESS: u8 = 0x08;
    pub const GAMMA: u8 = 0x09;
    pub const WHITE_BALANCE_TEMPERATURE: u8 = 0x0a;
    pub const WHITE_BALANCE_TEMPERATURE_AUTO: u8 = 0x0b;
    pub const WHITE_BALANCE_COMPONENT: u8 = 0x0c;
    pub const WHITE_BALANCE_COMPONENT_AUTO: u8 = 0x0d;
    pub const DIGITAL_MULTIPLIER: u8 = 0x0e;
    pub const DIGITAL_MULTIPLIER_LIMIT: u8 = 0x0f;
    pub const HUE_AUTO: u8 = 0x10;
    pub const ANALOG_VIDEO_STANDARD: u8 = 0x11;
    pub const ANALOG_LOCK_STATUS: u8 = 0x12;
}

/// GET_INFO capability bits
pub mod info_caps {
    pub const GET: u8 = 1 << 0;
    pub const SET: u8 = 1 << 1;
    pub const DISABLED: u8 = 1 << 2;
    pub const AUTO_UPDATE: u8 = 1 << 3;
    pub const ASYNCHRONOUS: u8 = 1 << 4;
}

/// Frequency of the USB start-of-frame counter, in counts per second
pub const SOF_PER_SECOND_FULL_SPEED: u32 = 1000;

/// Frame numbers reported by the host controller wrap at 11 bits
pub const SOF_MASK: u16 = 0x07ff;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_direction() {
        assert!(!Request::SetCur.is_in());
        assert!(Request::GetCur.is_in());
        assert!(Request::GetDef.is_in());
    }

    #[test]
    fn test_vs_subtype_classification() {
        assert!(VsSubtype::FormatMjpeg.is_format());
        assert!(!VsSubtype::FormatMjpeg.is_frame());
        assert!(VsSubtype::FrameFrameBased.is_frame());
        assert_eq!(VsSubtype::from_u8(0x0d), Some(VsSubtype::ColorFormat));
        assert_eq!(VsSubtype::from_u8(0x20), None);
    }
}
