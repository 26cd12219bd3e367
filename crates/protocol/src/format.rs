//! Video streaming format and frame descriptors
//!
//! A streaming interface lists its formats as a format descriptor followed by
//! the frame descriptors belonging to it. This module decodes the individual
//! descriptors; grouping them into a format list is done by the driver.

use crate::constants::VsSubtype;
use crate::error::{ProtocolError, Result};
use crate::guid::{FourCc, Guid, format_by_guid};
use crate::reader::DescriptorReader;
use serde::{Deserialize, Serialize};

/// Kind of payload a format carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormatKind {
    Uncompressed,
    Mjpeg,
    FrameBased,
}

impl FormatKind {
    /// Frame descriptor subtype that belongs to this format kind
    pub fn frame_subtype(self) -> VsSubtype {
        match self {
            FormatKind::Uncompressed => VsSubtype::FrameUncompressed,
            FormatKind::Mjpeg => VsSubtype::FrameMjpeg,
            FormatKind::FrameBased => VsSubtype::FrameFrameBased,
        }
    }
}

/// Supported frame intervals, in 100 ns units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameIntervals {
    /// Fixed list of intervals
    Discrete(Vec<u32>),
    /// Continuous range with a step
    Continuous { min: u32, max: u32, step: u32 },
}

impl FrameIntervals {
    /// Shortest supported interval
    pub fn min(&self) -> u32 {
        match self {
            FrameIntervals::Discrete(list) => list.iter().copied().min().unwrap_or(0),
            FrameIntervals::Continuous { min, .. } => *min,
        }
    }

    /// Longest supported interval
    pub fn max(&self) -> u32 {
        match self {
            FrameIntervals::Discrete(list) => list.iter().copied().max().unwrap_or(0),
            FrameIntervals::Continuous { max, .. } => *max,
        }
    }

    /// Closest supported interval to `interval`
    ///
    /// Discrete lists are assumed sorted the way devices report them (either
    /// direction); the scan stops as soon as the distance starts to grow.
    /// Continuous ranges round to the nearest step and clamp to the maximum.
    pub fn nearest(&self, interval: u32) -> u32 {
        match self {
            FrameIntervals::Discrete(list) => {
                let mut best = u32::MAX;
                let mut chosen = list.first().copied().unwrap_or(interval);
                for &candidate in list {
                    let distance = candidate.abs_diff(interval);
                    if distance > best {
                        break;
                    }
                    best = distance;
                    chosen = candidate;
                }
                chosen
            }
            FrameIntervals::Continuous { min, max, step } => {
                let step = (*step).max(1);
                if interval <= *min {
                    return *min;
                }
                let offset = (interval - min).saturating_add(step / 2) / step * step;
                min.saturating_add(offset).min(*max)
            }
        }
    }

    /// Clamp a device-reported default into the supported range
    fn clamp_default(&self, default: u32) -> u32 {
        match self {
            FrameIntervals::Discrete(list) => match (list.first(), list.last()) {
                (Some(&first), Some(&last)) => default.max(first).min(last),
                _ => default,
            },
            FrameIntervals::Continuous { min, max, .. } => default.max(*min).min(*max),
        }
    }
}

/// Color matching descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorMatching {
    pub primaries: u8,
    pub transfer: u8,
    pub matrix: u8,
}

impl ColorMatching {
    pub fn parse(desc: &[u8]) -> Result<Self> {
        let r = DescriptorReader::new(desc, "color matching descriptor");
        r.require(6)?;
        Ok(Self {
            primaries: r.u8_at(3)?,
            transfer: r.u8_at(4)?,
            matrix: r.u8_at(5)?,
        })
    }
}

/// One frame size of a format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub index: u8,
    pub capabilities: u8,
    pub width: u16,
    pub height: u16,
    pub min_bit_rate: u32,
    pub max_bit_rate: u32,
    pub max_video_frame_buffer_size: u32,
    pub default_interval: u32,
    pub intervals: FrameIntervals,
    /// Frame-based formats only
    pub bytes_per_line: Option<u32>,
}

/// One format of a streaming interface with its frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    pub index: u8,
    pub kind: FormatKind,
    pub name: String,
    pub guid: Option<Guid>,
    pub fourcc: Option<FourCc>,
    pub bpp: u8,
    pub compressed: bool,
    pub default_frame_index: u8,
    /// bNumFrameDescriptors as declared
    pub declared_frames: u8,
    pub frames: Vec<Frame>,
    pub color: Option<ColorMatching>,
}

impl Format {
    /// Decode a format descriptor; frames are attached afterwards
    pub fn parse(desc: &[u8]) -> Result<Self> {
        let subtype = desc.get(2).copied().unwrap_or(0);
        match VsSubtype::from_u8(subtype) {
            Some(VsSubtype::FormatUncompressed) => Self::parse_guid_format(desc, 27, false),
            Some(VsSubtype::FormatFrameBased) => Self::parse_guid_format(desc, 28, true),
            Some(VsSubtype::FormatMjpeg) => {
                let r = DescriptorReader::new(desc, "MJPEG format descriptor");
                r.require(11)?;
                Ok(Format {
                    index: r.u8_at(3)?,
                    kind: FormatKind::Mjpeg,
                    name: "MJPEG".to_string(),
                    guid: None,
                    fourcc: Some(FourCc::MJPG),
                    bpp: 0,
                    compressed: true,
                    default_frame_index: r.u8_at(6)?,
                    declared_frames: r.u8_at(4)?,
                    frames: Vec::new(),
                    color: None,
                })
            }
            _ => Err(ProtocolError::UnexpectedSubtype {
                expected: VsSubtype::FormatUncompressed as u8,
                found: subtype,
            }),
        }
    }

    fn parse_guid_format(desc: &[u8], min_len: usize, frame_based: bool) -> Result<Self> {
        let what = if frame_based {
            "frame-based format descriptor"
        } else {
            "uncompressed format descriptor"
        };
        let r = DescriptorReader::new(desc, what);
        r.require(min_len)?;

        let guid = r.guid_at(5)?;
        let known = format_by_guid(&guid);
        let name = match known {
            Some(info) => info.name.to_string(),
            None => format!("Unknown ({})", guid),
        };

        Ok(Format {
            index: r.u8_at(3)?,
            kind: if frame_based {
                FormatKind::FrameBased
            } else {
                FormatKind::Uncompressed
            },
            name,
            guid: Some(guid),
            fourcc: known.map(|info| info.fourcc),
            bpp: r.u8_at(21)?,
            compressed: frame_based,
            default_frame_index: r.u8_at(22)?,
            declared_frames: r.u8_at(4)?,
            frames: Vec::new(),
            color: None,
        })
    }

    /// Decode a frame descriptor belonging to this format
    ///
    /// Repairs the values devices commonly get wrong: null intervals become 1,
    /// the default interval is clamped into the supported range, and the
    /// maximum buffer size of uncompressed frames is recomputed from the
    /// dimensions.
    pub fn parse_frame(&self, desc: &[u8]) -> Result<Frame> {
        let expected = self.kind.frame_subtype() as u8;
        let subtype = desc.get(2).copied().unwrap_or(0);
        if subtype != expected {
            return Err(ProtocolError::UnexpectedSubtype {
                expected,
                found: subtype,
            });
        }

        let r = DescriptorReader::new(desc, "frame descriptor");
        r.require(26)?;

        let frame_based = self.kind == FormatKind::FrameBased;
        let (interval_type_at, default_at) = if frame_based { (21, 17) } else { (25, 21) };
        let interval_type = r.u8_at(interval_type_at)? as usize;
        let count = if interval_type == 0 { 3 } else { interval_type };
        r.require(26 + 4 * count)?;

        let mut values = Vec::with_capacity(count);
        for i in 0..count {
            let value = r.u32_at(26 + 4 * i)?;
            values.push(if value == 0 { 1 } else { value });
        }
        let intervals = if interval_type == 0 {
            FrameIntervals::Continuous {
                min: values[0],
                max: values[1],
                step: values[2],
            }
        } else {
            FrameIntervals::Discrete(values)
        };

        let width = r.u16_at(5)?;
        let height = r.u16_at(7)?;
        let computed_size = self.bpp as u32 * width as u32 * height as u32 / 8;
        let max_video_frame_buffer_size = if frame_based || !self.compressed {
            computed_size
        } else {
            r.u32_at(17)?
        };

        let default_interval = intervals.clamp_default(r.u32_at(default_at)?);

        Ok(Frame {
            index: r.u8_at(3)?,
            capabilities: r.u8_at(4)?,
            width,
            height,
            min_bit_rate: r.u32_at(9)?,
            max_bit_rate: r.u32_at(13)?,
            max_video_frame_buffer_size,
            default_interval,
            intervals,
            bytes_per_line: if frame_based {
                Some(r.u32_at(22)?)
            } else {
                None
            },
        })
    }

    /// Frame with the given bFrameIndex
    pub fn frame(&self, index: u8) -> Option<&Frame> {
        self.frames.iter().find(|frame| frame.index == index)
    }
}
