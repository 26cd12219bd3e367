//! Device report assembled from the driver's parsers

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::warn;
use uvc_common::{Quirks, UsbId};
use uvc_driver::chain::{self, Chain};
use uvc_driver::control::{ControlDescription, ControlRegistry};
use uvc_driver::entity::{ControlInterface, parse_control_interface};
use uvc_driver::{ControlTransport, DeviceDescription, StreamingInterface, StringFetcher, quirks_for};
use uvc_protocol::{UsbSpeed, UvcVersion};

#[derive(Debug, Serialize)]
pub struct ChainReport {
    pub summary: String,
    #[serde(flatten)]
    pub chain: Chain,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub device: UsbId,
    pub speed: UsbSpeed,
    pub version: UvcVersion,
    pub clock_frequency: u32,
    pub quirks: Vec<String>,
    pub control_interface: u8,
    pub chains: Vec<ChainReport>,
    pub streams: Vec<StreamingInterface>,
    /// Only filled when a control endpoint is available
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub controls: Vec<ControlDescription>,
}

fn quirk_names(quirks: Quirks) -> Vec<String> {
    quirks.iter_names().map(|(name, _)| name.to_ascii_lowercase()).collect()
}

/// Parse every video interface of `description`
///
/// With a control endpoint the registry is built and every control
/// described as well.
pub fn build(
    description: &DeviceDescription,
    strings: &dyn StringFetcher,
    overrides: &[(UsbId, Quirks)],
    control: Option<Arc<dyn ControlTransport>>,
) -> Result<Report> {
    let vc = description
        .video_control()
        .with_context(|| format!("{} has no video control interface", description.id))?;
    let info: ControlInterface =
        parse_control_interface(&vc.extra, strings).context("Failed to parse video control interface")?;
    let quirks = quirks_for(description.id, overrides);

    let chains = match chain::scan_chains(&info.entities) {
        Ok(chains) => chains,
        Err(e) => {
            warn!("No usable video chain: {}", e);
            Vec::new()
        }
    };

    let mut streams = Vec::new();
    for &number in &info.streaming_interfaces {
        let alts = description.alt_settings(number);
        match StreamingInterface::parse(&alts, description.speed) {
            Ok(stream) => streams.push(stream),
            Err(e) => warn!("Skipping streaming interface {}: {}", number, e),
        }
    }

    let controls = match control {
        Some(transport) => {
            let mut registry = ControlRegistry::new(transport, vc.number, description.id, &info.entities);
            registry.describe_all()
        }
        None => Vec::new(),
    };

    Ok(Report {
        device: description.id,
        speed: description.speed,
        version: info.version,
        clock_frequency: info.clock_frequency,
        quirks: quirk_names(quirks),
        control_interface: vc.number,
        chains: chains
            .into_iter()
            .map(|c| ChainReport {
                summary: chain::describe(&info.entities, &c),
                chain: c,
            })
            .collect(),
        streams,
        controls,
    })
}

fn interval_fps(interval: u32) -> f64 {
    if interval == 0 {
        0.0
    } else {
        10_000_000.0 / interval as f64
    }
}

/// Human-readable rendering
pub fn render(report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Device {} ({:?} speed), UVC {}, clock {} Hz",
        report.device, report.speed, report.version, report.clock_frequency
    );
    if !report.quirks.is_empty() {
        let _ = writeln!(out, "Quirks: {}", report.quirks.join(", "));
    }

    let _ = writeln!(out, "\nChains:");
    if report.chains.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for chain in &report.chains {
        let _ = writeln!(out, "  {}", chain.summary);
    }

    for stream in &report.streams {
        let _ = writeln!(
            out,
            "\nStreaming interface {} (endpoint {:#04x}, {}, terminal {}):",
            stream.number,
            stream.endpoint,
            if stream.bulk { "bulk" } else { "isochronous" },
            stream.terminal_link
        );
        for format in &stream.formats {
            let _ = writeln!(out, "  Format {}: {}", format.index, format.name);
            for frame in &format.frames {
                let _ = writeln!(
                    out,
                    "    Frame {}: {}x{} @ {:.2} fps, {} bytes max",
                    frame.index,
                    frame.width,
                    frame.height,
                    interval_fps(frame.default_interval),
                    frame.max_video_frame_buffer_size
                );
            }
        }
        for alt in stream.alt_settings.iter().filter(|a| a.bytes_per_interval > 0) {
            let _ = writeln!(
                out,
                "  Alternate {}: {} bytes per interval",
                alt.alternate, alt.bytes_per_interval
            );
        }
    }

    if !report.controls.is_empty() {
        let _ = writeln!(out, "\nControls:");
        for control in &report.controls {
            let mut flags = Vec::new();
            if control.read_only {
                flags.push("read-only");
            }
            if control.inactive {
                flags.push("inactive");
            }
            let _ = writeln!(
                out,
                "  {:<32} {:<8} [{}..{} step {}] default {}{}",
                control.name,
                control.kind,
                control.minimum,
                control.maximum,
                control.step,
                control.default,
                if flags.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", flags.join(", "))
                }
            );
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use uvc_common::test_utils::{concat, simple_camera_control_interface, simple_streaming_interface};
    use uvc_driver::testing::MockCamera;
    use uvc_driver::transport::NoStrings;
    use uvc_protocol::Request;
    use uvc_protocol::constants::pu_control;

    fn configuration() -> Vec<u8> {
        concat(&[
            vec![9, 2, 0, 0, 2, 1, 0, 0x80, 250],
            vec![9, 4, 0, 0, 0, 0x0e, 1, 0, 0],
            simple_camera_control_interface(0x0110),
            vec![9, 4, 1, 0, 0, 0x0e, 2, 0, 0],
            simple_streaming_interface(0x81),
            vec![9, 4, 1, 1, 1, 0x0e, 2, 0, 0],
            vec![7, 5, 0x81, 0x05, 0x00, 0x14, 1],
        ])
    }

    fn description() -> DeviceDescription {
        DeviceDescription::from_configuration(UsbId::new(0x046d, 0x0825), UsbSpeed::High, &configuration())
            .unwrap()
    }

    #[test]
    fn test_report_without_controls() {
        let report = build(&description(), &NoStrings, &[], None).unwrap();
        assert_eq!(report.version, UvcVersion::V1_1);
        assert_eq!(report.chains.len(), 1);
        assert_eq!(report.chains[0].chain.entities, vec![1, 2, 3]);
        assert_eq!(report.streams.len(), 1);
        assert_eq!(report.streams[0].formats.len(), 2);
        assert!(report.controls.is_empty());

        let text = render(&report);
        assert!(text.contains("046d:0825"));
        assert!(text.contains("640x480"));
    }

    #[test]
    fn test_report_with_controls() {
        let camera = MockCamera::new();
        let sel = pu_control::BRIGHTNESS;
        camera.set_response(0, 2, sel, Request::GetMin, &0i16.to_le_bytes());
        camera.set_response(0, 2, sel, Request::GetMax, &255i16.to_le_bytes());
        camera.set_response(0, 2, sel, Request::GetRes, &1i16.to_le_bytes());
        camera.set_response(0, 2, sel, Request::GetDef, &128i16.to_le_bytes());

        let report = build(&description(), &NoStrings, &[], Some(camera as Arc<dyn ControlTransport>)).unwrap();
        let brightness = report
            .controls
            .iter()
            .find(|c| c.name == "Brightness")
            .unwrap();
        assert_eq!(brightness.maximum, 255);
        assert_eq!(brightness.default, 128);
        assert!(render(&report).contains("Controls:"));
    }

    #[test]
    fn test_quirk_override_reported() {
        let overrides = [(UsbId::new(0x046d, 0x0825), Quirks::PROBE_MINMAX)];
        let report = build(&description(), &NoStrings, &overrides, None).unwrap();
        assert_eq!(report.quirks, vec!["probe_minmax".to_string()]);
    }

    #[test]
    fn test_json_output() {
        let report = build(&description(), &NoStrings, &[], None).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["control_interface"], 0);
        assert!(json.get("controls").is_none());
    }
}
