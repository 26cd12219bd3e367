//! Wire formats for the USB Video Class host driver
//!
//! This crate decodes and encodes everything the driver exchanges with a
//! camera: class-specific descriptors, the probe/commit control block and the
//! payload headers that prefix streamed video data. It performs no I/O.
//!
//! # Example
//!
//! ```
//! use uvc_protocol::{HeaderFlags, PayloadHeader, PROBE_SIZE_V11, StreamControl};
//!
//! // Negotiation block
//! let ctrl = StreamControl {
//!     format_index: 1,
//!     frame_index: 1,
//!     frame_interval: 333_333,
//!     ..Default::default()
//! };
//! let bytes = ctrl.encode(PROBE_SIZE_V11).unwrap();
//! assert_eq!(bytes.len(), 34);
//!
//! // Payload header with a presentation timestamp
//! let header = PayloadHeader::encode(HeaderFlags::FID | HeaderFlags::EOH, Some(42), None);
//! let parsed = PayloadHeader::parse(&header).unwrap();
//! assert!(parsed.fid());
//! assert_eq!(parsed.pts, Some(42));
//! ```
//!
//! # Descriptors
//!
//! Descriptor ranges are walked with [`DescriptorIter`]; individual fields are
//! read through [`DescriptorReader`], which validates every offset first:
//!
//! ```
//! use uvc_protocol::{DescriptorIter, VcSubtype};
//!
//! let extra = [3, 0x24, 0x01, 3, 0x24, 0x05];
//! let subtypes: Vec<_> = DescriptorIter::new(&extra)
//!     .filter_map(Result::ok)
//!     .filter_map(|d| VcSubtype::from_u8(d.subtype))
//!     .collect();
//! assert_eq!(subtypes, vec![VcSubtype::Header, VcSubtype::ProcessingUnit]);
//! ```

pub mod constants;
pub mod error;
pub mod format;
pub mod guid;
pub mod payload;
pub mod probe;
pub mod reader;
pub mod types;

pub use constants::{CC_VIDEO, Request, SOF_MASK, VcSubtype, VsSubtype};
pub use error::{ProtocolError, Result};
pub use format::{ColorMatching, Format, FormatKind, Frame, FrameIntervals};
pub use guid::{FORMATS, FormatInfo, FourCc, Guid, format_by_guid};
pub use payload::{HeaderFlags, PayloadHeader, Scr};
pub use probe::{
    FramingInfo, PROBE_SIZE_V10, PROBE_SIZE_V11, PROBE_SIZE_V15, ProbeHint, StreamControl,
    probe_size,
};
pub use reader::{DescriptorIter, DescriptorReader, RawDescriptor};
pub use types::{UsbError, UsbSpeed, UvcVersion};
