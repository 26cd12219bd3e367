//! Logical control mappings
//!
//! A mapping exposes a bit field of a raw control value as a logical control
//! such as "Brightness". Most mappings use the little-endian bit-field codec;
//! relative zoom and pan/tilt speed pack a direction byte and a speed byte and
//! have their own codecs.

use serde::Serialize;
use std::fmt;
use uvc_protocol::constants::{ct_control, pu_control};
use uvc_protocol::{Guid, Request};

/// Logical control identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ControlId {
    Brightness,
    Contrast,
    Hue,
    Saturation,
    Sharpness,
    Gamma,
    BacklightCompensation,
    Gain,
    PowerLineFrequency,
    HueAuto,
    WhiteBalanceTemperatureAuto,
    WhiteBalanceTemperature,
    WhiteBalanceComponentAuto,
    BlueBalance,
    RedBalance,
    ExposureAuto,
    ExposureAutoPriority,
    ExposureAbsolute,
    FocusAbsolute,
    FocusAuto,
    IrisAbsolute,
    IrisRelative,
    ZoomAbsolute,
    ZoomContinuous,
    PanAbsolute,
    TiltAbsolute,
    PanSpeed,
    TiltSpeed,
    Privacy,
}

impl ControlId {
    pub fn name(self) -> &'static str {
        match self {
            ControlId::Brightness => "Brightness",
            ControlId::Contrast => "Contrast",
            ControlId::Hue => "Hue",
            ControlId::Saturation => "Saturation",
            ControlId::Sharpness => "Sharpness",
            ControlId::Gamma => "Gamma",
            ControlId::BacklightCompensation => "Backlight Compensation",
            ControlId::Gain => "Gain",
            ControlId::PowerLineFrequency => "Power Line Frequency",
            ControlId::HueAuto => "Hue, Auto",
            ControlId::WhiteBalanceTemperatureAuto => "White Balance Temperature, Auto",
            ControlId::WhiteBalanceTemperature => "White Balance Temperature",
            ControlId::WhiteBalanceComponentAuto => "White Balance Component, Auto",
            ControlId::BlueBalance => "White Balance Blue Component",
            ControlId::RedBalance => "White Balance Red Component",
            ControlId::ExposureAuto => "Exposure, Auto",
            ControlId::ExposureAutoPriority => "Exposure, Auto Priority",
            ControlId::ExposureAbsolute => "Exposure (Absolute)",
            ControlId::FocusAbsolute => "Focus (absolute)",
            ControlId::FocusAuto => "Focus, Auto",
            ControlId::IrisAbsolute => "Iris, Absolute",
            ControlId::IrisRelative => "Iris, Relative",
            ControlId::ZoomAbsolute => "Zoom, Absolute",
            ControlId::ZoomContinuous => "Zoom, Continuous",
            ControlId::PanAbsolute => "Pan (Absolute)",
            ControlId::TiltAbsolute => "Tilt (Absolute)",
            ControlId::PanSpeed => "Pan (Speed)",
            ControlId::TiltSpeed => "Tilt (Speed)",
            ControlId::Privacy => "Privacy",
        }
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Menu entry; the logical value of a menu control is the entry index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MenuEntry {
    pub value: u32,
    pub name: &'static str,
}

/// Semantic type of a mapped value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Signed,
    Unsigned,
    Boolean,
    /// Raw value is one of the entry values
    Enum(&'static [MenuEntry]),
    /// Raw value is a single bit; GET_RES lists the supported bits
    Bitmask(&'static [MenuEntry]),
}

impl ValueKind {
    pub fn menu(&self) -> Option<&'static [MenuEntry]> {
        match *self {
            ValueKind::Enum(menu) | ValueKind::Bitmask(menu) => Some(menu),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Signed | ValueKind::Unsigned => "integer",
            ValueKind::Boolean => "boolean",
            ValueKind::Enum(_) | ValueKind::Bitmask(_) => "menu",
        }
    }
}

/// How the mapped value is packed into the raw control bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Little-endian bit field at `offset`, `size` bits wide
    BitField,
    /// bZoom direction at byte 0, bSpeed at byte 2
    ZoomContinuous,
    /// Direction byte at `offset / 8`, speed byte right after it
    RelativeSpeed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub id: ControlId,
    pub entity: Guid,
    pub selector: u8,
    /// Field width in bits
    pub size: u8,
    /// Field offset in bits
    pub offset: u8,
    pub kind: ValueKind,
    pub codec: Codec,
    /// Controlling auto control and the value that puts it in manual mode
    pub master: Option<(ControlId, i64)>,
}

impl Mapping {
    /// Decode the mapped value from raw control bytes
    pub fn get(&self, query: Request, data: &[u8]) -> i64 {
        match self.codec {
            Codec::BitField => get_bits(
                data,
                self.offset,
                self.size,
                matches!(self.kind, ValueKind::Signed),
            ),
            Codec::ZoomContinuous => get_speed(data, 0, 2, query),
            Codec::RelativeSpeed => {
                let first = (self.offset / 8) as usize;
                get_speed(data, first, first + 1, query)
            }
        }
    }

    /// Encode `value` into raw control bytes, leaving other bits untouched
    pub fn set(&self, value: i64, data: &mut [u8]) {
        match self.codec {
            Codec::BitField => set_bits(data, self.offset, self.size, value),
            Codec::ZoomContinuous => set_speed(data, 0, 2, value),
            Codec::RelativeSpeed => {
                let first = (self.offset / 8) as usize;
                set_speed(data, first, first + 1, value)
            }
        }
    }
}

fn get_bits(data: &[u8], offset: u8, size: u8, signed: bool) -> i64 {
    let mut value: i64 = 0;
    for i in 0..size as usize {
        let bit = offset as usize + i;
        match data.get(bit / 8) {
            Some(byte) if byte & (1u8 << (bit % 8)) != 0 => value |= 1i64 << i,
            Some(_) => {}
            None => break,
        }
    }
    if signed && size > 0 && size < 64 && value & (1i64 << (size - 1)) != 0 {
        value |= -1i64 << size;
    }
    value
}

fn set_bits(data: &mut [u8], offset: u8, size: u8, value: i64) {
    for i in 0..size as usize {
        let bit = offset as usize + i;
        let Some(byte) = data.get_mut(bit / 8) else {
            break;
        };
        let mask = 1u8 << (bit % 8);
        if (value >> i) & 1 != 0 {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
    }
}

fn get_speed(data: &[u8], direction: usize, speed: usize, query: Request) -> i64 {
    let dir = data.get(direction).copied().unwrap_or(0) as i8;
    let speed = data.get(speed).copied().unwrap_or(0) as i64;
    match query {
        Request::GetCur if dir == 0 => 0,
        Request::GetCur if dir > 0 => speed,
        Request::GetCur => -speed,
        Request::GetMin => -speed,
        _ => speed,
    }
}

fn set_speed(data: &mut [u8], direction: usize, speed: usize, value: i64) {
    if let Some(dir) = data.get_mut(direction) {
        *dir = match value {
            0 => 0,
            v if v > 0 => 1,
            _ => 0xff,
        };
    }
    if let Some(slot) = data.get_mut(speed) {
        *slot = value.unsigned_abs().min(0xff) as u8;
    }
}

const POWER_LINE_FREQUENCY: &[MenuEntry] = &[
    MenuEntry {
        value: 0,
        name: "Disabled",
    },
    MenuEntry {
        value: 1,
        name: "50 Hz",
    },
    MenuEntry {
        value: 2,
        name: "60 Hz",
    },
];

/// Exposure modes in the conventional menu order (auto first, manual second)
const EXPOSURE_AUTO: &[MenuEntry] = &[
    MenuEntry {
        value: 2,
        name: "Auto Mode",
    },
    MenuEntry {
        value: 1,
        name: "Manual Mode",
    },
    MenuEntry {
        value: 4,
        name: "Shutter Priority Mode",
    },
    MenuEntry {
        value: 8,
        name: "Aperture Priority Mode",
    },
];

/// Menu index of "Manual Mode" in the exposure menu
pub const EXPOSURE_MANUAL_INDEX: i64 = 1;

const fn bits(
    id: ControlId,
    entity: Guid,
    selector: u8,
    size: u8,
    offset: u8,
    kind: ValueKind,
    master: Option<(ControlId, i64)>,
) -> Mapping {
    Mapping {
        id,
        entity,
        selector,
        size,
        offset,
        kind,
        codec: Codec::BitField,
        master,
    }
}

const PU: Guid = Guid::PROCESSING;
const CT: Guid = Guid::CAMERA;

pub static MAPPINGS: &[Mapping] = &[
    bits(ControlId::Brightness, PU, pu_control::BRIGHTNESS, 16, 0, ValueKind::Signed, None),
    bits(ControlId::Contrast, PU, pu_control::CONTRAST, 16, 0, ValueKind::Unsigned, None),
    bits(
        ControlId::Hue,
        PU,
        pu_control::HUE,
        16,
        0,
        ValueKind::Signed,
        Some((ControlId::HueAuto, 0)),
    ),
    bits(ControlId::Saturation, PU, pu_control::SATURATION, 16, 0, ValueKind::Unsigned, None),
    bits(ControlId::Sharpness, PU, pu_control::SHARPNESS, 16, 0, ValueKind::Unsigned, None),
    bits(ControlId::Gamma, PU, pu_control::GAMMA, 16, 0, ValueKind::Unsigned, None),
    bits(
        ControlId::BacklightCompensation,
        PU,
        pu_control::BACKLIGHT_COMPENSATION,
        16,
        0,
        ValueKind::Unsigned,
        None,
    ),
    bits(ControlId::Gain, PU, pu_control::GAIN, 16, 0, ValueKind::Unsigned, None),
    bits(
        ControlId::PowerLineFrequency,
        PU,
        pu_control::POWER_LINE_FREQUENCY,
        2,
        0,
        ValueKind::Enum(POWER_LINE_FREQUENCY),
        None,
    ),
    bits(ControlId::HueAuto, PU, pu_control::HUE_AUTO, 1, 0, ValueKind::Boolean, None),
    bits(
        ControlId::WhiteBalanceTemperatureAuto,
        PU,
        pu_control::WHITE_BALANCE_TEMPERATURE_AUTO,
        1,
        0,
        ValueKind::Boolean,
        None,
    ),
    bits(
        ControlId::WhiteBalanceTemperature,
        PU,
        pu_control::WHITE_BALANCE_TEMPERATURE,
        16,
        0,
        ValueKind::Unsigned,
        Some((ControlId::WhiteBalanceTemperatureAuto, 0)),
    ),
    bits(
        ControlId::WhiteBalanceComponentAuto,
        PU,
        pu_control::WHITE_BALANCE_COMPONENT_AUTO,
        1,
        0,
        ValueKind::Boolean,
        None,
    ),
    bits(
        ControlId::BlueBalance,
        PU,
        pu_control::WHITE_BALANCE_COMPONENT,
        16,
        0,
        ValueKind::Unsigned,
        Some((ControlId::WhiteBalanceComponentAuto, 0)),
    ),
    bits(
        ControlId::RedBalance,
        PU,
        pu_control::WHITE_BALANCE_COMPONENT,
        16,
        16,
        ValueKind::Unsigned,
        Some((ControlId::WhiteBalanceComponentAuto, 0)),
    ),
    bits(
        ControlId::ExposureAuto,
        CT,
        ct_control::AE_MODE,
        4,
        0,
        ValueKind::Bitmask(EXPOSURE_AUTO),
        None,
    ),
    bits(
        ControlId::ExposureAutoPriority,
        CT,
        ct_control::AE_PRIORITY,
        1,
        0,
        ValueKind::Boolean,
        None,
    ),
    bits(
        ControlId::ExposureAbsolute,
        CT,
        ct_control::EXPOSURE_TIME_ABSOLUTE,
        32,
        0,
        ValueKind::Unsigned,
        Some((ControlId::ExposureAuto, EXPOSURE_MANUAL_INDEX)),
    ),
    bits(
        ControlId::FocusAbsolute,
        CT,
        ct_control::FOCUS_ABSOLUTE,
        16,
        0,
        ValueKind::Unsigned,
        Some((ControlId::FocusAuto, 0)),
    ),
    bits(ControlId::FocusAuto, CT, ct_control::FOCUS_AUTO, 1, 0, ValueKind::Boolean, None),
    bits(
        ControlId::IrisAbsolute,
        CT,
        ct_control::IRIS_ABSOLUTE,
        16,
        0,
        ValueKind::Unsigned,
        None,
    ),
    bits(ControlId::IrisRelative, CT, ct_control::IRIS_RELATIVE, 8, 0, ValueKind::Signed, None),
    bits(
        ControlId::ZoomAbsolute,
        CT,
        ct_control::ZOOM_ABSOLUTE,
        16,
        0,
        ValueKind::Unsigned,
        None,
    ),
    Mapping {
        id: ControlId::ZoomContinuous,
        entity: CT,
        selector: ct_control::ZOOM_RELATIVE,
        size: 24,
        offset: 0,
        kind: ValueKind::Signed,
        codec: Codec::ZoomContinuous,
        master: None,
    },
    bits(ControlId::PanAbsolute, CT, ct_control::PANTILT_ABSOLUTE, 32, 0, ValueKind::Signed, None),
    bits(
        ControlId::TiltAbsolute,
        CT,
        ct_control::PANTILT_ABSOLUTE,
        32,
        32,
        ValueKind::Signed,
        None,
    ),
    Mapping {
        id: ControlId::PanSpeed,
        entity: CT,
        selector: ct_control::PANTILT_RELATIVE,
        size: 16,
        offset: 0,
        kind: ValueKind::Signed,
        codec: Codec::RelativeSpeed,
        master: None,
    },
    Mapping {
        id: ControlId::TiltSpeed,
        entity: CT,
        selector: ct_control::PANTILT_RELATIVE,
        size: 16,
        offset: 16,
        kind: ValueKind::Signed,
        codec: Codec::RelativeSpeed,
        master: None,
    },
    bits(ControlId::Privacy, CT, ct_control::PRIVACY, 1, 0, ValueKind::Boolean, None),
];

/// Mappings for the control with the given entity GUID and selector
pub fn mappings_for(entity: &Guid, selector: u8) -> Vec<&'static Mapping> {
    MAPPINGS
        .iter()
        .filter(|m| m.entity == *entity && m.selector == selector)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(id: ControlId) -> &'static Mapping {
        MAPPINGS.iter().find(|m| m.id == id).unwrap()
    }

    #[test]
    fn test_signed_field_sign_extends() {
        let brightness = mapping(ControlId::Brightness);
        assert_eq!(brightness.get(Request::GetCur, &[0xf6, 0xff]), -10);
        assert_eq!(brightness.get(Request::GetCur, &[0x40, 0x00]), 64);

        let contrast = mapping(ControlId::Contrast);
        assert_eq!(contrast.get(Request::GetCur, &[0xf6, 0xff]), 0xfff6);
    }

    #[test]
    fn test_partial_field_preserves_neighbours() {
        let red = mapping(ControlId::RedBalance);
        let mut data = [0x34, 0x12, 0x00, 0x00];
        red.set(0x0abc, &mut data);
        assert_eq!(data, [0x34, 0x12, 0xbc, 0x0a]);
        assert_eq!(red.get(Request::GetCur, &data), 0x0abc);
        assert_eq!(mapping(ControlId::BlueBalance).get(Request::GetCur, &data), 0x1234);
    }

    #[test]
    fn test_tilt_absolute_upper_word() {
        let tilt = mapping(ControlId::TiltAbsolute);
        let mut data = [0u8; 8];
        tilt.set(-3600, &mut data);
        assert_eq!(&data[0..4], &[0, 0, 0, 0]);
        assert_eq!(tilt.get(Request::GetCur, &data), -3600);
    }

    #[test]
    fn test_zoom_continuous_codec() {
        let zoom = mapping(ControlId::ZoomContinuous);
        let mut data = [0u8; 3];
        zoom.set(-5, &mut data);
        assert_eq!(data, [0xff, 0, 5]);
        assert_eq!(zoom.get(Request::GetCur, &data), -5);

        zoom.set(300, &mut data);
        assert_eq!(data, [1, 0, 0xff]);
        assert_eq!(zoom.get(Request::GetMax, &[0, 0, 7]), 7);
        assert_eq!(zoom.get(Request::GetMin, &[0, 0, 7]), -7);
    }

    #[test]
    fn test_relative_speed_codec() {
        let tilt = mapping(ControlId::TiltSpeed);
        let mut data = [0xff, 3, 0, 0];
        tilt.set(12, &mut data);
        assert_eq!(data, [0xff, 3, 1, 12]);
        assert_eq!(tilt.get(Request::GetCur, &data), 12);
        assert_eq!(mapping(ControlId::PanSpeed).get(Request::GetCur, &data), -3);
    }

    #[test]
    fn test_mappings_for_shared_selector() {
        let found = mappings_for(&Guid::PROCESSING, pu_control::WHITE_BALANCE_COMPONENT);
        let ids: Vec<_> = found.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![ControlId::BlueBalance, ControlId::RedBalance]);
    }
}
