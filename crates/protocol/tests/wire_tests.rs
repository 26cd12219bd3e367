//! Integration tests for descriptor and payload decoding
//!
//! Exercises the public API the driver relies on, including hostile inputs
//! that must fail cleanly instead of reading out of range.

use proptest::prelude::*;
use uvc_protocol::{
    DescriptorIter, Format, FormatKind, FrameIntervals, Guid, HeaderFlags, PROBE_SIZE_V15,
    PayloadHeader, ProtocolError, StreamControl, VsSubtype,
};

fn mjpeg_format(index: u8, frames: u8) -> Vec<u8> {
    vec![11, 0x24, VsSubtype::FormatMjpeg as u8, index, frames, 0x01, 1, 0, 0, 0, 0]
}

fn mjpeg_frame(index: u8, width: u16, height: u16, buffer: u32, intervals: &[u32]) -> Vec<u8> {
    let mut desc = vec![0, 0x24, VsSubtype::FrameMjpeg as u8, index, 0];
    desc.extend_from_slice(&width.to_le_bytes());
    desc.extend_from_slice(&height.to_le_bytes());
    desc.extend_from_slice(&[0u8; 8]);
    desc.extend_from_slice(&buffer.to_le_bytes());
    desc.extend_from_slice(&intervals[0].to_le_bytes());
    desc.push(intervals.len() as u8);
    for interval in intervals {
        desc.extend_from_slice(&interval.to_le_bytes());
    }
    desc[0] = desc.len() as u8;
    desc
}

mod formats {
    use super::*;

    #[test]
    fn test_mjpeg_keeps_device_buffer_size() {
        let format = Format::parse(&mjpeg_format(2, 1)).unwrap();
        assert_eq!(format.kind, FormatKind::Mjpeg);
        assert!(format.compressed);
        assert_eq!(format.index, 2);

        let frame = format
            .parse_frame(&mjpeg_frame(1, 1280, 720, 1_843_200, &[333_333]))
            .unwrap();
        assert_eq!(frame.max_video_frame_buffer_size, 1_843_200);
        assert_eq!(frame.intervals, FrameIntervals::Discrete(vec![333_333]));
    }

    #[test]
    fn test_frame_based_format() {
        let mut desc = vec![28, 0x24, VsSubtype::FormatFrameBased as u8, 1, 1];
        desc.extend_from_slice(Guid::from_fourcc(b"H264").as_bytes());
        desc.extend_from_slice(&[16, 1, 0, 0, 0, 0, 1]);
        let format = Format::parse(&desc).unwrap();
        assert_eq!(format.kind, FormatKind::FrameBased);
        assert_eq!(format.name, "H.264");
        assert!(format.compressed);
    }

    #[test]
    fn test_unknown_guid_is_named() {
        let mut desc = vec![27, 0x24, VsSubtype::FormatUncompressed as u8, 1, 1];
        desc.extend_from_slice(Guid::from_fourcc(b"ZZZZ").as_bytes());
        desc.extend_from_slice(&[12, 1, 0, 0, 0, 0]);
        let format = Format::parse(&desc).unwrap();
        assert!(format.name.starts_with("Unknown"));
        assert_eq!(format.fourcc, None);
    }

    #[test]
    fn test_short_format_rejected() {
        let desc = [10, 0x24, VsSubtype::FormatMjpeg as u8, 1, 1, 0, 1, 0, 0, 0];
        assert!(matches!(
            Format::parse(&desc),
            Err(ProtocolError::Truncated { needed: 11, .. })
        ));
    }
}

mod payloads {
    use super::*;

    #[test]
    fn test_header_length_beyond_payload() {
        let result = PayloadHeader::parse(&[12, 0x8c, 0, 0]);
        assert!(matches!(result, Err(ProtocolError::InvalidField { .. })));
    }

    #[test]
    fn test_error_bit() {
        let data = PayloadHeader::encode(HeaderFlags::ERR | HeaderFlags::EOH, None, None);
        assert!(PayloadHeader::parse(&data).unwrap().error());
    }

    proptest! {
        #[test]
        fn prop_header_parse_never_panics(data in proptest::collection::vec(any::<u8>(), 0..32)) {
            if let Ok(header) = PayloadHeader::parse(&data) {
                prop_assert!(header.length as usize <= data.len());
                prop_assert!(header.length >= 2);
            }
        }
    }
}

mod descriptors {
    use super::*;

    proptest! {
        #[test]
        fn prop_descriptor_walk_stays_in_bounds(data in proptest::collection::vec(any::<u8>(), 0..128)) {
            let mut covered = 0usize;
            for item in DescriptorIter::new(&data) {
                match item {
                    Ok(desc) => {
                        prop_assert_eq!(desc.offset, covered);
                        covered += desc.bytes.len();
                    }
                    Err(_) => break,
                }
            }
            prop_assert!(covered <= data.len());
        }

        #[test]
        fn prop_probe_decode_accepts_any_full_block(data in proptest::collection::vec(any::<u8>(), PROBE_SIZE_V15)) {
            let ctrl = StreamControl::decode(&data).unwrap();
            prop_assert_eq!(ctrl.encode(PROBE_SIZE_V15).unwrap(), data);
        }
    }
}
