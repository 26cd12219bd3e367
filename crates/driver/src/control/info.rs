//! Static control information for standard entities
//!
//! Camera terminal and processing unit controls are identified by the bit
//! index in the entity's bmControls bitmap. Each entry gives the selector,
//! the size of the control value and the requests the control supports.

use bitflags::bitflags;
use serde::Serialize;
use uvc_common::UsbId;
use uvc_protocol::Guid;
use uvc_protocol::constants::{ct_control, pu_control};

use crate::entity::Entity;

bitflags! {
    /// Requests supported by a control
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
    pub struct ControlFlags: u16 {
        const SET_CUR = 1 << 0;
        const GET_CUR = 1 << 1;
        const GET_MIN = 1 << 2;
        const GET_MAX = 1 << 3;
        const GET_RES = 1 << 4;
        const GET_DEF = 1 << 5;
        /// Value is written back after resume
        const RESTORE = 1 << 6;
        /// Device may change the value on its own
        const AUTO_UPDATE = 1 << 7;

        const GET_RANGE = Self::GET_CUR.bits()
            | Self::GET_MIN.bits()
            | Self::GET_MAX.bits()
            | Self::GET_RES.bits()
            | Self::GET_DEF.bits();
    }
}

/// Static description of one standard control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlInfo {
    pub entity: Guid,
    /// Bit index in bmControls
    pub index: u8,
    pub selector: u8,
    /// Value size in bytes
    pub size: u16,
    pub flags: ControlFlags,
}

const SET: ControlFlags = ControlFlags::SET_CUR;
const CUR: ControlFlags = ControlFlags::GET_CUR;
const DEF: ControlFlags = ControlFlags::GET_DEF;
const RES: ControlFlags = ControlFlags::GET_RES;
const RANGE: ControlFlags = ControlFlags::GET_RANGE;
const RESTORE: ControlFlags = ControlFlags::RESTORE;
const AUTO: ControlFlags = ControlFlags::AUTO_UPDATE;
const REL: ControlFlags = ControlFlags::GET_MIN
    .union(ControlFlags::GET_MAX)
    .union(ControlFlags::GET_RES)
    .union(ControlFlags::GET_DEF);

const fn pu(index: u8, selector: u8, size: u16, flags: ControlFlags) -> ControlInfo {
    ControlInfo {
        entity: Guid::PROCESSING,
        index,
        selector,
        size,
        flags,
    }
}

const fn ct(index: u8, selector: u8, size: u16, flags: ControlFlags) -> ControlInfo {
    ControlInfo {
        entity: Guid::CAMERA,
        index,
        selector,
        size,
        flags,
    }
}

pub static CONTROL_INFO: &[ControlInfo] = &[
    pu(0, pu_control::BRIGHTNESS, 2, SET.union(RANGE).union(RESTORE)),
    pu(1, pu_control::CONTRAST, 2, SET.union(RANGE).union(RESTORE)),
    pu(2, pu_control::HUE, 2, SET.union(RANGE).union(RESTORE).union(AUTO)),
    pu(3, pu_control::SATURATION, 2, SET.union(RANGE).union(RESTORE)),
    pu(4, pu_control::SHARPNESS, 2, SET.union(RANGE).union(RESTORE)),
    pu(5, pu_control::GAMMA, 2, SET.union(RANGE).union(RESTORE)),
    pu(6, pu_control::WHITE_BALANCE_TEMPERATURE, 2, SET.union(RANGE).union(RESTORE).union(AUTO)),
    pu(7, pu_control::WHITE_BALANCE_COMPONENT, 4, SET.union(RANGE).union(RESTORE).union(AUTO)),
    pu(8, pu_control::BACKLIGHT_COMPENSATION, 2, SET.union(RANGE).union(RESTORE)),
    pu(9, pu_control::GAIN, 2, SET.union(RANGE).union(RESTORE)),
    pu(10, pu_control::POWER_LINE_FREQUENCY, 1, SET.union(CUR).union(DEF).union(RESTORE)),
    pu(11, pu_control::HUE_AUTO, 1, SET.union(CUR).union(DEF).union(RESTORE)),
    pu(12, pu_control::WHITE_BALANCE_TEMPERATURE_AUTO, 1, SET.union(CUR).union(DEF).union(RESTORE)),
    pu(13, pu_control::WHITE_BALANCE_COMPONENT_AUTO, 1, SET.union(CUR).union(DEF).union(RESTORE)),
    pu(14, pu_control::DIGITAL_MULTIPLIER, 2, SET.union(RANGE).union(RESTORE)),
    pu(15, pu_control::DIGITAL_MULTIPLIER_LIMIT, 2, SET.union(RANGE).union(RESTORE)),
    pu(16, pu_control::ANALOG_VIDEO_STANDARD, 1, CUR),
    pu(17, pu_control::ANALOG_LOCK_STATUS, 1, CUR),
    ct(0, ct_control::SCANNING_MODE, 1, SET.union(CUR).union(RESTORE)),
    ct(1, ct_control::AE_MODE, 1, SET.union(CUR).union(DEF).union(RES).union(RESTORE)),
    ct(2, ct_control::AE_PRIORITY, 1, SET.union(CUR).union(RESTORE)),
    ct(3, ct_control::EXPOSURE_TIME_ABSOLUTE, 4, SET.union(RANGE).union(RESTORE).union(AUTO)),
    ct(4, ct_control::EXPOSURE_TIME_RELATIVE, 1, SET.union(RESTORE)),
    ct(5, ct_control::FOCUS_ABSOLUTE, 2, SET.union(RANGE).union(RESTORE).union(AUTO)),
    ct(6, ct_control::FOCUS_RELATIVE, 2, SET.union(REL).union(AUTO)),
    ct(7, ct_control::IRIS_ABSOLUTE, 2, SET.union(RANGE).union(RESTORE).union(AUTO)),
    ct(8, ct_control::IRIS_RELATIVE, 1, SET.union(AUTO)),
    ct(9, ct_control::ZOOM_ABSOLUTE, 2, SET.union(RANGE).union(RESTORE).union(AUTO)),
    ct(10, ct_control::ZOOM_RELATIVE, 3, SET.union(REL).union(AUTO)),
    ct(11, ct_control::PANTILT_ABSOLUTE, 8, SET.union(RANGE).union(RESTORE).union(AUTO)),
    ct(12, ct_control::PANTILT_RELATIVE, 4, SET.union(REL).union(AUTO)),
    ct(13, ct_control::ROLL_ABSOLUTE, 2, SET.union(RANGE).union(RESTORE).union(AUTO)),
    ct(14, ct_control::ROLL_RELATIVE, 2, SET.union(REL).union(AUTO)),
    ct(17, ct_control::FOCUS_AUTO, 1, SET.union(CUR).union(DEF).union(RESTORE)),
    ct(18, ct_control::PRIVACY, 1, SET.union(CUR).union(RESTORE).union(AUTO)),
];

/// Control info for a (GUID, bit index) pair
pub fn find_info(entity: &Guid, index: u8) -> Option<&'static ControlInfo> {
    CONTROL_INFO
        .iter()
        .find(|info| info.entity == *entity && info.index == index)
}

/// Control bit that must be ignored on a specific device
#[derive(Debug, Clone, Copy)]
struct BlacklistEntry {
    device: UsbId,
    entity: Guid,
    index: u8,
}

static BLACKLIST: &[BlacklistEntry] = &[
    // Gain
    BlacklistEntry {
        device: UsbId::new(0x13d3, 0x509b),
        entity: Guid::PROCESSING,
        index: 9,
    },
    // White balance temperature
    BlacklistEntry {
        device: UsbId::new(0x1c4f, 0x3000),
        entity: Guid::PROCESSING,
        index: 6,
    },
    // Hue
    BlacklistEntry {
        device: UsbId::new(0x5986, 0x0241),
        entity: Guid::PROCESSING,
        index: 2,
    },
    // Zoom absolute
    BlacklistEntry {
        device: UsbId::new(0x06f8, 0x3005),
        entity: Guid::CAMERA,
        index: 9,
    },
];

/// Control bitmap of `entity` with blacklisted bits cleared
pub fn pruned_bitmap(entity: &Entity, device: UsbId) -> Vec<u8> {
    let mut bitmap = entity.kind.controls().to_vec();
    let Some(guid) = entity.kind.guid() else {
        return bitmap;
    };

    for entry in BLACKLIST
        .iter()
        .filter(|entry| entry.device == device && entry.entity == guid)
    {
        let byte = (entry.index / 8) as usize;
        if let Some(slot) = bitmap.get_mut(byte) {
            let mask = 1u8 << (entry.index % 8);
            if *slot & mask != 0 {
                tracing::debug!(
                    "{} control {} blacklisted on {}, ignoring",
                    entity.kind.label(),
                    entry.index,
                    device
                );
                *slot &= !mask;
            }
        }
    }
    bitmap
}

/// Bit indices of the controls an entity supports on `device`
pub fn supported_controls(entity: &Entity, device: UsbId) -> Vec<u8> {
    pruned_bitmap(entity, device)
        .iter()
        .enumerate()
        .take(32)
        .flat_map(|(byte, bits)| {
            (0..8u8)
                .filter(move |bit| bits & (1u8 << *bit) != 0)
                .map(move |bit| (byte * 8) as u8 + bit)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityKind, ProcessingUnit};

    fn processing_unit(controls: Vec<u8>) -> Entity {
        Entity::new(
            2,
            EntityKind::ProcessingUnit(ProcessingUnit {
                max_multiplier: 0,
                controls,
                video_standards: 0,
            }),
            vec![1],
            0,
        )
    }

    #[test]
    fn test_table_lookup() {
        let info = find_info(&Guid::PROCESSING, 9).unwrap();
        assert_eq!(info.selector, pu_control::GAIN);
        assert_eq!(info.size, 2);
        assert!(info.flags.contains(ControlFlags::GET_RANGE | ControlFlags::SET_CUR));

        let info = find_info(&Guid::CAMERA, 17).unwrap();
        assert_eq!(info.selector, ct_control::FOCUS_AUTO);
        assert!(find_info(&Guid::CAMERA, 15).is_none());
    }

    #[test]
    fn test_table_counts() {
        let camera = CONTROL_INFO.iter().filter(|i| i.entity == Guid::CAMERA).count();
        let processing = CONTROL_INFO
            .iter()
            .filter(|i| i.entity == Guid::PROCESSING)
            .count();
        assert_eq!(camera, 17);
        assert_eq!(processing, 18);
    }

    #[test]
    fn test_blacklist_clears_bit() {
        // brightness, contrast, gain
        let pu = processing_unit(vec![0x03, 0x02]);
        assert_eq!(supported_controls(&pu, UsbId::new(0x046d, 0x0825)), vec![0, 1, 9]);
        assert_eq!(supported_controls(&pu, UsbId::new(0x13d3, 0x509b)), vec![0, 1]);
    }
}
