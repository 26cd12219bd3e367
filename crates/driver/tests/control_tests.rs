//! Control registry tests against a scripted camera

use std::sync::Arc;

use uvc_common::test_utils::{
    camera_terminal, concat, extension_unit, output_terminal, simple_camera_control_interface,
    vc_header,
};
use uvc_common::{Error, UsbId};
use uvc_driver::control::{ControlId, ControlRegistry};
use uvc_driver::entity::parse_control_interface;
use uvc_driver::testing::MockCamera;
use uvc_driver::transport::NoStrings;
use uvc_protocol::constants::{ct_control, pu_control, terminal_type};
use uvc_protocol::{Guid, Request, UsbError};

const VC: u8 = 0;
const CT: u8 = 1;
const PU: u8 = 2;
const XU: u8 = 4;

const DEVICE: UsbId = UsbId::new(0x1234, 0x5678);

// ============================================================================
// Fixtures
// ============================================================================

fn registry_for(camera: &Arc<MockCamera>, extra: &[u8]) -> ControlRegistry {
    let vc = parse_control_interface(extra, &NoStrings).unwrap();
    ControlRegistry::new(camera.clone(), VC, DEVICE, &vc.entities)
}

fn brightness_camera() -> Arc<MockCamera> {
    let camera = MockCamera::new();
    let sel = pu_control::BRIGHTNESS;
    camera.set_response(VC, PU, sel, Request::GetMin, &(-100i16).to_le_bytes());
    camera.set_response(VC, PU, sel, Request::GetMax, &100i16.to_le_bytes());
    camera.set_response(VC, PU, sel, Request::GetRes, &10i16.to_le_bytes());
    camera.set_response(VC, PU, sel, Request::GetDef, &0i16.to_le_bytes());
    camera.set_current(VC, PU, sel, &20i16.to_le_bytes());
    camera
}

fn exposure_camera() -> Arc<MockCamera> {
    let camera = MockCamera::new();
    let mode = ct_control::AE_MODE;
    camera.set_response(VC, CT, mode, Request::GetRes, &[0x03]);
    camera.set_response(VC, CT, mode, Request::GetDef, &[0x02]);
    camera.set_current(VC, CT, mode, &[0x02]);

    let abs = ct_control::EXPOSURE_TIME_ABSOLUTE;
    camera.set_response(VC, CT, abs, Request::GetMin, &1u32.to_le_bytes());
    camera.set_response(VC, CT, abs, Request::GetMax, &10_000u32.to_le_bytes());
    camera.set_response(VC, CT, abs, Request::GetRes, &1u32.to_le_bytes());
    camera.set_response(VC, CT, abs, Request::GetDef, &156u32.to_le_bytes());
    camera.set_current(VC, CT, abs, &156u32.to_le_bytes());
    camera
}

fn extension_interface() -> Vec<u8> {
    concat(&[
        vc_header(0x0110, 48_000_000, &[1]),
        camera_terminal(CT, &[0x00, 0x00, 0x00]),
        extension_unit(XU, Guid::from_bytes([0x5a; 16]), 3, &[CT], &[0x05]),
        output_terminal(3, terminal_type::TT_STREAMING, XU),
    ])
}

// ============================================================================
// Standard controls
// ============================================================================

mod standard {
    use super::*;

    #[test]
    fn test_available_controls() {
        let camera = MockCamera::new();
        let registry = registry_for(&camera, &simple_camera_control_interface(0x0110));

        assert_eq!(registry.controls().len(), 5);
        let ids = registry.available();
        for id in [
            ControlId::Brightness,
            ControlId::Contrast,
            ControlId::Gain,
            ControlId::ExposureAuto,
            ControlId::ExposureAbsolute,
        ] {
            assert!(ids.contains(&id), "{} missing", id);
        }
        assert!(!ids.contains(&ControlId::Hue));
    }

    #[test]
    fn test_unknown_control_not_supported() {
        let camera = brightness_camera();
        let mut registry = registry_for(&camera, &simple_camera_control_interface(0x0110));

        assert!(matches!(registry.get(ControlId::Hue), Err(Error::NotSupported(_))));
        assert!(matches!(registry.set(ControlId::Hue, 1), Err(Error::NotSupported(_))));
    }

    #[test]
    fn test_get_reads_current_once() {
        let camera = brightness_camera();
        let mut registry = registry_for(&camera, &simple_camera_control_interface(0x0110));

        assert_eq!(registry.get(ControlId::Brightness).unwrap(), 20);
        assert_eq!(registry.get(ControlId::Brightness).unwrap(), 20);
        assert_eq!(camera.count_for(PU, pu_control::BRIGHTNESS, Request::GetCur), 1);

        registry.invalidate(ControlId::Brightness).unwrap();
        assert_eq!(registry.get(ControlId::Brightness).unwrap(), 20);
        assert_eq!(camera.count_for(PU, pu_control::BRIGHTNESS, Request::GetCur), 2);
    }

    #[test]
    fn test_set_rounds_to_step_and_commits() {
        let camera = brightness_camera();
        let mut registry = registry_for(&camera, &simple_camera_control_interface(0x0110));

        registry.set(ControlId::Brightness, 37).unwrap();
        assert_eq!(camera.count(Request::SetCur), 0);
        assert_eq!(registry.get(ControlId::Brightness).unwrap(), 40);

        registry.commit().unwrap();
        assert_eq!(
            camera.current(VC, PU, pu_control::BRIGHTNESS),
            Some(40i16.to_le_bytes().to_vec())
        );
    }

    #[test]
    fn test_set_clamps_to_range() {
        let camera = brightness_camera();
        let mut registry = registry_for(&camera, &simple_camera_control_interface(0x0110));

        registry.set(ControlId::Brightness, 1000).unwrap();
        assert_eq!(registry.get(ControlId::Brightness).unwrap(), 100);
        registry.set(ControlId::Brightness, -1000).unwrap();
        assert_eq!(registry.get(ControlId::Brightness).unwrap(), -100);
    }

    #[test]
    fn test_commit_failure_rolls_back() {
        let camera = brightness_camera();
        let mut registry = registry_for(&camera, &simple_camera_control_interface(0x0110));
        camera.fail(VC, PU, pu_control::BRIGHTNESS, Request::SetCur, UsbError::Pipe);

        registry.set(ControlId::Brightness, 60).unwrap();
        assert!(registry.commit().is_err());
        assert_eq!(registry.get(ControlId::Brightness).unwrap(), 20);
        assert!(registry.controls().iter().all(|c| !c.is_dirty()));

        camera.clear_failure(VC, PU, pu_control::BRIGHTNESS, Request::SetCur);
        registry.set(ControlId::Brightness, 60).unwrap();
        registry.commit().unwrap();
        assert_eq!(
            camera.current(VC, PU, pu_control::BRIGHTNESS),
            Some(60i16.to_le_bytes().to_vec())
        );
    }

    #[test]
    fn test_rollback_discards_staged_value() {
        let camera = brightness_camera();
        let mut registry = registry_for(&camera, &simple_camera_control_interface(0x0110));

        registry.set(ControlId::Brightness, 80).unwrap();
        registry.rollback();
        assert_eq!(registry.get(ControlId::Brightness).unwrap(), 20);
        registry.commit().unwrap();
        assert!(camera.writes().is_empty());
    }

    #[test]
    fn test_read_only_from_get_info() {
        let camera = brightness_camera();
        camera.set_response(VC, PU, pu_control::BRIGHTNESS, Request::GetInfo, &[0x01]);
        let mut registry = registry_for(&camera, &simple_camera_control_interface(0x0110));

        assert!(matches!(
            registry.set(ControlId::Brightness, 10),
            Err(Error::Permission(_))
        ));
        let desc = registry.describe(ControlId::Brightness).unwrap();
        assert!(desc.read_only);
        assert_eq!(registry.get(ControlId::Brightness).unwrap(), 20);
    }

    #[test]
    fn test_describe_brightness() {
        let camera = brightness_camera();
        let mut registry = registry_for(&camera, &simple_camera_control_interface(0x0110));

        let desc = registry.describe(ControlId::Brightness).unwrap();
        assert_eq!(desc.minimum, -100);
        assert_eq!(desc.maximum, 100);
        assert_eq!(desc.step, 10);
        assert_eq!(desc.default, 0);
        assert_eq!(desc.entity, PU);
        assert!(!desc.read_only);
        assert!(!desc.inactive);
    }

    #[test]
    fn test_restore_values_rewrites_committed() {
        let camera = brightness_camera();
        let mut registry = registry_for(&camera, &simple_camera_control_interface(0x0110));

        registry.set(ControlId::Brightness, 50).unwrap();
        registry.commit().unwrap();
        camera.clear_log();
        camera.set_current(VC, PU, pu_control::BRIGHTNESS, &0i16.to_le_bytes());

        registry.restore_values().unwrap();
        let writes = camera.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, 50i16.to_le_bytes().to_vec());
    }
}

// ============================================================================
// Menu controls
// ============================================================================

mod menu {
    use super::*;

    #[test]
    fn test_exposure_mode_reads_as_menu_index() {
        let camera = exposure_camera();
        let mut registry = registry_for(&camera, &simple_camera_control_interface(0x0110));

        assert_eq!(registry.get(ControlId::ExposureAuto).unwrap(), 0);
        let desc = registry.describe(ControlId::ExposureAuto).unwrap();
        let names: Vec<_> = desc.menu.iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["Auto Mode", "Manual Mode"]);
    }

    #[test]
    fn test_unsupported_mode_rejected() {
        let camera = exposure_camera();
        let mut registry = registry_for(&camera, &simple_camera_control_interface(0x0110));

        registry.set(ControlId::ExposureAuto, 1).unwrap();
        assert!(matches!(
            registry.set(ControlId::ExposureAuto, 2),
            Err(Error::OutOfRange(_))
        ));
        assert!(matches!(
            registry.set(ControlId::ExposureAuto, 9),
            Err(Error::OutOfRange(_))
        ));

        registry.commit().unwrap();
        assert_eq!(camera.current(VC, CT, ct_control::AE_MODE), Some(vec![0x01]));
    }

    #[test]
    fn test_exposure_inactive_until_manual() {
        let camera = exposure_camera();
        let mut registry = registry_for(&camera, &simple_camera_control_interface(0x0110));

        assert!(registry.describe(ControlId::ExposureAbsolute).unwrap().inactive);

        registry.set(ControlId::ExposureAuto, 1).unwrap();
        registry.commit().unwrap();
        assert!(!registry.describe(ControlId::ExposureAbsolute).unwrap().inactive);
    }

    #[test]
    fn test_restore_defaults() {
        let camera = exposure_camera();
        camera.set_current(VC, CT, ct_control::AE_MODE, &[0x01]);
        let mut registry = registry_for(&camera, &simple_camera_control_interface(0x0110));

        registry.restore_defaults();
        assert_eq!(camera.current(VC, CT, ct_control::AE_MODE), Some(vec![0x02]));
        assert_eq!(
            camera.current(VC, CT, ct_control::EXPOSURE_TIME_ABSOLUTE),
            Some(156u32.to_le_bytes().to_vec())
        );
    }
}

// ============================================================================
// Extension units
// ============================================================================

mod extension {
    use super::*;

    fn extension_camera() -> Arc<MockCamera> {
        let camera = MockCamera::new();
        camera.set_response(VC, XU, 1, Request::GetLen, &[4, 0]);
        camera.set_response(VC, XU, 1, Request::GetInfo, &[0x03]);
        camera.set_current(VC, XU, 1, &[9, 8, 7, 6]);
        camera
    }

    #[test]
    fn test_controls_bound_lazily() {
        let camera = extension_camera();
        let mut registry = registry_for(&camera, &extension_interface());

        let xu: Vec<_> = registry.controls_for(XU).collect();
        assert_eq!(xu.len(), 2);
        assert!(xu.iter().all(|c| c.is_extension() && !c.is_bound()));
        assert_eq!(camera.count(Request::GetLen), 0);

        let value = registry.query_raw(XU, 1, Request::GetCur).unwrap();
        assert_eq!(value, vec![9, 8, 7, 6]);
        assert_eq!(camera.count(Request::GetLen), 1);

        registry.query_raw(XU, 1, Request::GetCur).unwrap();
        assert_eq!(camera.count(Request::GetLen), 1);
    }

    #[test]
    fn test_set_raw_checks_length() {
        let camera = extension_camera();
        let mut registry = registry_for(&camera, &extension_interface());

        assert!(matches!(
            registry.set_raw(XU, 1, &[1, 2, 3]),
            Err(Error::OutOfRange(_))
        ));
        registry.set_raw(XU, 1, &[1, 2, 3, 4]).unwrap();
        assert_eq!(camera.current(VC, XU, 1), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_unknown_selector() {
        let camera = extension_camera();
        let mut registry = registry_for(&camera, &extension_interface());

        assert!(matches!(
            registry.query_raw(XU, 2, Request::GetCur),
            Err(Error::NotSupported(_))
        ));
    }

    #[test]
    fn test_read_only_extension_control() {
        let camera = extension_camera();
        camera.set_response(VC, XU, 1, Request::GetInfo, &[0x01]);
        let mut registry = registry_for(&camera, &extension_interface());

        assert!(matches!(
            registry.set_raw(XU, 1, &[0; 4]),
            Err(Error::Permission(_))
        ));
    }

    #[test]
    fn test_zero_length_rejected() {
        let camera = extension_camera();
        camera.set_response(VC, XU, 3, Request::GetLen, &[0, 0]);
        let mut registry = registry_for(&camera, &extension_interface());

        assert!(matches!(
            registry.query_raw(XU, 3, Request::GetCur),
            Err(Error::Malformed(_))
        ));
    }
}
