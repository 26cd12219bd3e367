//! Test utilities for the UVC host driver
//!
//! Builders for synthetic class-specific descriptors and payloads. Every
//! builder emits a correctly sized descriptor; tests that need a malformed
//! one truncate or patch the returned bytes.
//!
//! # Example
//!
//! ```
//! use uvc_common::test_utils::{camera_terminal, concat, output_terminal, vc_header};
//!
//! let extra = concat(&[
//!     vc_header(0x0110, 48_000_000, &[1]),
//!     camera_terminal(1, &[0x0a, 0x00, 0x00]),
//!     output_terminal(2, 0x0101, 1),
//! ]);
//! assert_eq!(extra[0], 13);
//! ```

use uvc_protocol::constants::{VcSubtype, VsSubtype, descriptor_type, terminal_type};
use uvc_protocol::{Guid, HeaderFlags, PayloadHeader};

const CS_INTERFACE: u8 = descriptor_type::CS_INTERFACE;

/// Concatenate descriptors into one extra-bytes range
pub fn concat(parts: &[Vec<u8>]) -> Vec<u8> {
    parts.iter().flatten().copied().collect()
}

fn finish(mut desc: Vec<u8>) -> Vec<u8> {
    desc[0] = desc.len() as u8;
    desc
}

/// Video control interface header
pub fn vc_header(version: u16, clock_frequency: u32, streaming_interfaces: &[u8]) -> Vec<u8> {
    let mut desc = vec![0, CS_INTERFACE, VcSubtype::Header as u8];
    desc.extend_from_slice(&version.to_le_bytes());
    desc.extend_from_slice(&0u16.to_le_bytes());
    desc.extend_from_slice(&clock_frequency.to_le_bytes());
    desc.push(streaming_interfaces.len() as u8);
    desc.extend_from_slice(streaming_interfaces);
    finish(desc)
}

/// Camera input terminal with the given control bitmap
pub fn camera_terminal(id: u8, controls: &[u8]) -> Vec<u8> {
    let mut desc = vec![0, CS_INTERFACE, VcSubtype::InputTerminal as u8, id];
    desc.extend_from_slice(&terminal_type::ITT_CAMERA.to_le_bytes());
    desc.extend_from_slice(&[0, 0]);
    desc.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
    desc.push(controls.len() as u8);
    desc.extend_from_slice(controls);
    finish(desc)
}

/// Input terminal without type-specific fields
pub fn input_terminal(id: u8, kind: u16) -> Vec<u8> {
    let mut desc = vec![0, CS_INTERFACE, VcSubtype::InputTerminal as u8, id];
    desc.extend_from_slice(&kind.to_le_bytes());
    desc.extend_from_slice(&[0, 0]);
    finish(desc)
}

pub fn output_terminal(id: u8, kind: u16, source: u8) -> Vec<u8> {
    let mut desc = vec![0, CS_INTERFACE, VcSubtype::OutputTerminal as u8, id];
    desc.extend_from_slice(&kind.to_le_bytes());
    desc.extend_from_slice(&[0, source, 0]);
    finish(desc)
}

pub fn selector_unit(id: u8, sources: &[u8]) -> Vec<u8> {
    let mut desc = vec![
        0,
        CS_INTERFACE,
        VcSubtype::SelectorUnit as u8,
        id,
        sources.len() as u8,
    ];
    desc.extend_from_slice(sources);
    desc.push(0);
    finish(desc)
}

/// Processing unit in the UVC 1.1 layout (with bmVideoStandards)
pub fn processing_unit(id: u8, source: u8, controls: &[u8]) -> Vec<u8> {
    let mut desc = processing_unit_v10(id, source, controls);
    desc.push(0);
    finish(desc)
}

/// Processing unit in the UVC 1.0 layout
pub fn processing_unit_v10(id: u8, source: u8, controls: &[u8]) -> Vec<u8> {
    let mut desc = vec![0, CS_INTERFACE, VcSubtype::ProcessingUnit as u8, id, source];
    desc.extend_from_slice(&0u16.to_le_bytes());
    desc.push(controls.len() as u8);
    desc.extend_from_slice(controls);
    desc.push(0);
    finish(desc)
}

pub fn extension_unit(id: u8, guid: Guid, num_controls: u8, sources: &[u8], controls: &[u8]) -> Vec<u8> {
    let mut desc = vec![0, CS_INTERFACE, VcSubtype::ExtensionUnit as u8, id];
    desc.extend_from_slice(guid.as_bytes());
    desc.push(num_controls);
    desc.push(sources.len() as u8);
    desc.extend_from_slice(sources);
    desc.push(controls.len() as u8);
    desc.extend_from_slice(controls);
    desc.push(0);
    finish(desc)
}

/// Camera (1) -> processing unit (2) -> streaming output terminal (3)
///
/// The camera exposes exposure auto and exposure absolute; the processing
/// unit exposes brightness, contrast and gain.
pub fn simple_camera_control_interface(version: u16) -> Vec<u8> {
    let pu = if version >= 0x0110 {
        processing_unit(2, 1, &[0x03, 0x02])
    } else {
        processing_unit_v10(2, 1, &[0x03, 0x02])
    };
    concat(&[
        vc_header(version, 48_000_000, &[1]),
        camera_terminal(1, &[0x0a, 0x00, 0x00]),
        pu,
        output_terminal(3, terminal_type::TT_STREAMING, 2),
    ])
}

/// Video streaming input header
pub fn vs_input_header(num_formats: u8, endpoint: u8, terminal_link: u8) -> Vec<u8> {
    let mut desc = vec![0, CS_INTERFACE, VsSubtype::InputHeader as u8, num_formats];
    desc.extend_from_slice(&0u16.to_le_bytes());
    desc.extend_from_slice(&[endpoint, 0, terminal_link, 0, 0, 0, 1]);
    for _ in 0..num_formats {
        desc.push(0);
    }
    finish(desc)
}

pub fn uncompressed_format(index: u8, fourcc: &[u8; 4], bpp: u8, num_frames: u8) -> Vec<u8> {
    let mut desc = vec![
        0,
        CS_INTERFACE,
        VsSubtype::FormatUncompressed as u8,
        index,
        num_frames,
    ];
    desc.extend_from_slice(Guid::from_fourcc(fourcc).as_bytes());
    desc.extend_from_slice(&[bpp, 1, 0, 0, 0, 0]);
    finish(desc)
}

pub fn mjpeg_format(index: u8, num_frames: u8) -> Vec<u8> {
    finish(vec![
        0,
        CS_INTERFACE,
        VsSubtype::FormatMjpeg as u8,
        index,
        num_frames,
        0x01,
        1,
        0,
        0,
        0,
        0,
    ])
}

fn frame(
    subtype: VsSubtype,
    index: u8,
    width: u16,
    height: u16,
    max_buffer: u32,
    intervals: &[u32],
) -> Vec<u8> {
    let mut desc = vec![0, CS_INTERFACE, subtype as u8, index, 0];
    desc.extend_from_slice(&width.to_le_bytes());
    desc.extend_from_slice(&height.to_le_bytes());
    desc.extend_from_slice(&1_000_000u32.to_le_bytes());
    desc.extend_from_slice(&100_000_000u32.to_le_bytes());
    desc.extend_from_slice(&max_buffer.to_le_bytes());
    desc.extend_from_slice(&intervals.first().copied().unwrap_or(0).to_le_bytes());
    desc.push(intervals.len() as u8);
    for interval in intervals {
        desc.extend_from_slice(&interval.to_le_bytes());
    }
    finish(desc)
}

/// Uncompressed frame with a discrete interval list
///
/// The declared buffer size is deliberately zero; parsing recomputes it.
pub fn uncompressed_frame(index: u8, width: u16, height: u16, intervals: &[u32]) -> Vec<u8> {
    frame(VsSubtype::FrameUncompressed, index, width, height, 0, intervals)
}

pub fn mjpeg_frame(index: u8, width: u16, height: u16, max_buffer: u32, intervals: &[u32]) -> Vec<u8> {
    frame(VsSubtype::FrameMjpeg, index, width, height, max_buffer, intervals)
}

pub fn color_matching() -> Vec<u8> {
    vec![6, CS_INTERFACE, VsSubtype::ColorFormat as u8, 1, 1, 4]
}

/// YUYV 640x480 / 320x240 followed by MJPEG 1280x720, linked to terminal 3
pub fn simple_streaming_interface(endpoint: u8) -> Vec<u8> {
    concat(&[
        vs_input_header(2, endpoint, 3),
        uncompressed_format(1, b"YUY2", 16, 2),
        uncompressed_frame(1, 640, 480, &[333_333, 666_666]),
        uncompressed_frame(2, 320, 240, &[333_333]),
        color_matching(),
        mjpeg_format(2, 1),
        mjpeg_frame(1, 1280, 720, 1280 * 720 * 2, &[333_333]),
    ])
}

/// Payload of `total_len` bytes with a minimal 2-byte header
///
/// Data bytes are filled with `fill`.
pub fn payload(flags: HeaderFlags, total_len: usize, fill: u8) -> Vec<u8> {
    let mut data = PayloadHeader::encode(flags | HeaderFlags::EOH, None, None);
    data.resize(total_len.max(data.len()), fill);
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use uvc_protocol::DescriptorIter;

    #[test]
    fn test_builders_emit_declared_lengths() {
        let extra = simple_camera_control_interface(0x0110);
        let descriptors: Vec<_> = DescriptorIter::new(&extra)
            .collect::<uvc_protocol::Result<Vec<_>>>()
            .unwrap();
        assert_eq!(descriptors.len(), 4);
        assert_eq!(descriptors[1].bytes.len(), 18);
        assert_eq!(descriptors[2].bytes.len(), 12);
        assert_eq!(descriptors[3].bytes.len(), 9);
    }

    #[test]
    fn test_extension_unit_layout() {
        let desc = extension_unit(4, Guid::from_bytes([7; 16]), 3, &[2], &[0x05]);
        assert_eq!(desc.len(), 24 + 1 + 1);
        assert_eq!(desc[21], 1);
        assert_eq!(desc[22], 2);
        assert_eq!(desc[23], 1);
        assert_eq!(desc[24], 0x05);
    }

    #[test]
    fn test_payload_builder() {
        let data = payload(HeaderFlags::FID, 200, 0xaa);
        assert_eq!(data.len(), 200);
        assert_eq!(data[0], 2);
        assert_eq!(data[1], 0x81);
        assert_eq!(data[199], 0xaa);
    }
}
