//! Per-device quirk lookup

use tracing::debug;
use uvc_common::{Quirks, UsbId};

/// Devices known to need workarounds
static QUIRK_TABLE: &[(UsbId, Quirks)] = &[
    // Genius eFace 2025
    (UsbId::new(0x0458, 0x706e), Quirks::PROBE_MINMAX),
    // Microsoft Lifecam NX-6000
    (UsbId::new(0x045e, 0x00f8), Quirks::PROBE_MINMAX),
    // Microsoft Lifecam VX-7000
    (UsbId::new(0x045e, 0x0723), Quirks::PROBE_MINMAX),
    // Alcor Micro AU3820
    (UsbId::new(0x058f, 0x3820), Quirks::PROBE_MINMAX),
    // Apple built-in iSight
    (UsbId::new(0x05ac, 0x8501), Quirks::PROBE_MINMAX),
    // Syntek DC-1125
    (UsbId::new(0x174f, 0x5212), Quirks::STREAM_NO_FID),
    // Ophir Optronics SPCAM 620U
    (UsbId::new(0x18cd, 0xcafe), Quirks::PROBE_EXTRAFIELDS),
    // Hercules Classic Silver
    (UsbId::new(0x06f8, 0x300c), Quirks::FIX_BANDWIDTH),
    // ViMicro Vega
    (UsbId::new(0x0ac8, 0x332d), Quirks::FIX_BANDWIDTH),
    // ViMicro generic
    (UsbId::new(0x0ac8, 0x3410), Quirks::FIX_BANDWIDTH),
    (UsbId::new(0x0ac8, 0x3420), Quirks::FIX_BANDWIDTH),
];

/// Quirks for `device`
///
/// An entry in `overrides` replaces the built-in entry for the same device,
/// so a configured empty flag list disables the built-in workarounds.
pub fn quirks_for(device: UsbId, overrides: &[(UsbId, Quirks)]) -> Quirks {
    if let Some((_, quirks)) = overrides.iter().find(|(id, _)| *id == device) {
        debug!("Using configured quirks {:?} for {}", quirks, device);
        return *quirks;
    }

    QUIRK_TABLE
        .iter()
        .find(|(id, _)| *id == device)
        .map(|(_, quirks)| *quirks)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table() {
        assert_eq!(
            quirks_for(UsbId::new(0x05ac, 0x8501), &[]),
            Quirks::PROBE_MINMAX
        );
        assert_eq!(
            quirks_for(UsbId::new(0x0ac8, 0x3420), &[]),
            Quirks::FIX_BANDWIDTH
        );
        assert!(quirks_for(UsbId::new(0x046d, 0x0825), &[]).is_empty());
    }

    #[test]
    fn test_override_replaces_builtin() {
        let device = UsbId::new(0x174f, 0x5212);
        let overrides = [(device, Quirks::empty())];
        assert!(quirks_for(device, &overrides).is_empty());

        let other = UsbId::new(0x1234, 0x5678);
        let overrides = [(other, Quirks::PROBE_DEF | Quirks::PROBE_EXTRAFIELDS)];
        assert!(quirks_for(other, &overrides).contains(Quirks::PROBE_DEF));
    }
}
