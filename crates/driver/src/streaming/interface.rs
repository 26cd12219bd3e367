//! Video streaming interface: formats, frames and alternate settings

use serde::Serialize;
use tracing::{debug, warn};
use uvc_common::{Error, Result};
use uvc_protocol::constants::descriptor_type::CS_INTERFACE;
use uvc_protocol::{ColorMatching, DescriptorIter, Format, FourCc, Frame, UsbSpeed, VsSubtype};

use crate::device::{EndpointDescription, InterfaceDescription};
use crate::transport::EndpointConfig;

/// One alternate setting of the streaming interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AltSetting {
    pub alternate: u8,
    /// Video endpoint in this setting, if any
    #[serde(skip)]
    pub endpoint: Option<EndpointConfig>,
    /// Bytes the endpoint may move per (micro)frame
    pub bytes_per_interval: u32,
}

/// Bytes per (micro)frame an endpoint can move at `speed`
pub fn bytes_per_interval(endpoint: &EndpointDescription, speed: UsbSpeed) -> u32 {
    let size = (endpoint.max_packet_size & 0x07ff) as u32;
    match speed {
        UsbSpeed::Super | UsbSpeed::SuperPlus => endpoint
            .bytes_per_interval
            .map(u32::from)
            .unwrap_or(size),
        UsbSpeed::High => {
            let transactions = 1 + ((endpoint.max_packet_size >> 11) & 3) as u32;
            size * transactions
        }
        UsbSpeed::Full | UsbSpeed::Low => size,
    }
}

/// Parsed video streaming interface
#[derive(Debug, Clone, Serialize)]
pub struct StreamingInterface {
    pub number: u8,
    /// Video endpoint address from the input header
    pub endpoint: u8,
    /// Output terminal this interface is connected to
    pub terminal_link: u8,
    /// Bulk transfers on alternate setting 0 instead of isochronous settings
    pub bulk: bool,
    pub formats: Vec<Format>,
    pub alt_settings: Vec<AltSetting>,
}

impl StreamingInterface {
    /// Parse the class-specific descriptors of a streaming interface
    ///
    /// `alts` are the standard interface descriptors of every alternate
    /// setting, the class-specific block is read from the first one.
    /// Formats that fail to parse are skipped; an interface without any usable
    /// format is not supported.
    pub fn parse(alts: &[&InterfaceDescription], speed: UsbSpeed) -> Result<Self> {
        let first = alts
            .iter()
            .find(|alt| alt.alternate == 0)
            .or_else(|| alts.first())
            .ok_or_else(|| Error::Malformed("streaming interface without settings".into()))?;
        let number = first.number;

        let mut header: Option<(u8, u8)> = None;
        let mut formats: Vec<Format> = Vec::new();
        // Frames after a rejected format must not attach to the previous one
        let mut accepting = false;

        for desc in DescriptorIter::new(&first.extra) {
            let desc = match desc {
                Ok(desc) => desc,
                Err(e) => {
                    warn!("Interface {}: descriptor walk stopped: {}", number, e);
                    break;
                }
            };
            if desc.descriptor_type != CS_INTERFACE {
                continue;
            }

            let Some(subtype) = VsSubtype::from_u8(desc.subtype) else {
                debug!("Interface {}: skipping VS subtype {:#04x}", number, desc.subtype);
                continue;
            };

            match subtype {
                VsSubtype::InputHeader => {
                    let r = desc.reader("VS input header");
                    r.require(13)?;
                    header = Some((r.u8_at(6)?, r.u8_at(8)?));
                }
                VsSubtype::OutputHeader => {
                    let r = desc.reader("VS output header");
                    r.require(8)?;
                    header = Some((r.u8_at(6)?, r.u8_at(7)?));
                }
                VsSubtype::FormatUncompressed | VsSubtype::FormatMjpeg | VsSubtype::FormatFrameBased => {
                    match Format::parse(desc.bytes) {
                        Ok(format) => {
                            debug!(
                                "Interface {}: format {} '{}'",
                                number, format.index, format.name
                            );
                            formats.push(format);
                            accepting = true;
                        }
                        Err(e) => {
                            warn!("Interface {}: skipping format: {}", number, e);
                            accepting = false;
                        }
                    }
                }
                s if s.is_format() => {
                    warn!("Interface {}: unsupported format subtype {:?}", number, s);
                    accepting = false;
                }
                s if s.is_frame() => {
                    let Some(format) = formats.last_mut().filter(|_| accepting) else {
                        continue;
                    };
                    match format.parse_frame(desc.bytes) {
                        Ok(frame) => format.frames.push(frame),
                        Err(e) => warn!(
                            "Interface {}: skipping frame of format {}: {}",
                            number, format.index, e
                        ),
                    }
                }
                VsSubtype::ColorFormat => {
                    if let Some(format) = formats.last_mut().filter(|_| accepting) {
                        match ColorMatching::parse(desc.bytes) {
                            Ok(color) => format.color = Some(color),
                            Err(e) => warn!("Interface {}: bad color matching descriptor: {}", number, e),
                        }
                    }
                }
                _ => {}
            }
        }

        let (endpoint, terminal_link) = header.ok_or_else(|| {
            Error::Malformed(format!("streaming interface {} has no header", number))
        })?;

        formats.retain(|format| {
            if format.frames.is_empty() {
                warn!(
                    "Interface {}: format {} has no frames, ignoring",
                    number, format.index
                );
                return false;
            }
            if format.frames.len() != format.declared_frames as usize {
                debug!(
                    "Interface {}: format {} declares {} frames, found {}",
                    number,
                    format.index,
                    format.declared_frames,
                    format.frames.len()
                );
            }
            true
        });
        if formats.is_empty() {
            return Err(Error::NotSupported(format!(
                "streaming interface {} has no supported format",
                number
            )));
        }

        let mut alt_settings: Vec<AltSetting> = alts
            .iter()
            .map(|alt| {
                let ep = alt.endpoints.iter().find(|ep| ep.address == endpoint);
                AltSetting {
                    alternate: alt.alternate,
                    endpoint: ep.map(EndpointDescription::config),
                    bytes_per_interval: ep.map(|ep| bytes_per_interval(ep, speed)).unwrap_or(0),
                }
            })
            .collect();
        alt_settings.sort_by_key(|alt| alt.alternate);

        let bulk = alt_settings.len() == 1
            && alts
                .iter()
                .flat_map(|alt| alt.endpoints.iter())
                .any(|ep| ep.address == endpoint && ep.is_bulk());

        debug!(
            "Interface {}: {} formats, {} alternate settings, endpoint {:#04x}{}",
            number,
            formats.len(),
            alt_settings.len(),
            endpoint,
            if bulk { " (bulk)" } else { "" }
        );

        Ok(Self {
            number,
            endpoint,
            terminal_link,
            bulk,
            formats,
            alt_settings,
        })
    }

    pub fn format(&self, index: u8) -> Option<&Format> {
        self.formats.iter().find(|format| format.index == index)
    }

    /// Format and frame referenced by a probe control
    pub fn format_frame(&self, format_index: u8, frame_index: u8) -> Option<(&Format, &Frame)> {
        let format = self.format(format_index)?;
        Some((format, format.frame(frame_index)?))
    }

    /// Largest bandwidth any alternate setting offers
    pub fn best_bandwidth(&self) -> u32 {
        self.alt_settings
            .iter()
            .map(|alt| alt.bytes_per_interval)
            .max()
            .unwrap_or(0)
    }

    /// Whether several alternate settings carry the video endpoint
    pub fn is_isochronous(&self) -> bool {
        !self.bulk && self.alt_settings.len() > 1
    }

    /// Smallest alternate setting that carries `required` bytes per interval
    pub fn select_alternate(&self, required: u32) -> Result<&AltSetting> {
        // A zero request still needs an endpoint
        let required = required.max(1);
        self.alt_settings
            .iter()
            .filter(|alt| alt.endpoint.is_some() && alt.bytes_per_interval >= required)
            .min_by_key(|alt| alt.bytes_per_interval)
            .ok_or_else(|| {
                Error::ResourceExhausted(format!(
                    "no alternate setting of interface {} provides {} bytes per interval (best {})",
                    self.number,
                    required,
                    self.best_bandwidth()
                ))
            })
    }

    /// Pick the format, frame and interval closest to a request
    ///
    /// Without a FourCC the first format is used. The frame minimises the
    /// area outside the overlap of the requested and available sizes; the
    /// interval is rounded to the nearest supported one, 0 selects the frame
    /// default.
    pub fn select_format(
        &self,
        fourcc: Option<FourCc>,
        width: u16,
        height: u16,
        interval: u32,
    ) -> Result<(&Format, &Frame, u32)> {
        let format = match fourcc {
            Some(code) => self
                .formats
                .iter()
                .find(|format| format.fourcc == Some(code))
                .ok_or_else(|| Error::NotSupported(format!("format {} not offered", code)))?,
            None => self
                .formats
                .first()
                .ok_or_else(|| Error::NotSupported("no format".into()))?,
        };

        let (rw, rh) = (width as u64, height as u64);
        let frame = format
            .frames
            .iter()
            .min_by_key(|frame| {
                let (w, h) = (frame.width as u64, frame.height as u64);
                let overlap = w.min(rw) * h.min(rh);
                w * h + rw * rh - 2 * overlap
            })
            .ok_or_else(|| Error::NotSupported(format!("format {} has no frames", format.index)))?;

        let interval = if interval == 0 {
            frame.default_interval
        } else {
            frame.intervals.nearest(interval)
        };

        debug!(
            "Selected format {} frame {} ({}x{}) interval {}",
            format.index, frame.index, frame.width, frame.height, interval
        );
        Ok((format, frame, interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uvc_common::test_utils::simple_streaming_interface;

    fn endpoint(max_packet_size: u16, attributes: u8) -> EndpointDescription {
        EndpointDescription {
            address: 0x81,
            attributes,
            max_packet_size,
            interval: 1,
            bytes_per_interval: None,
        }
    }

    fn alt(alternate: u8, endpoints: Vec<EndpointDescription>, extra: Vec<u8>) -> InterfaceDescription {
        InterfaceDescription {
            number: 1,
            alternate,
            class: 0x0e,
            subclass: 0x02,
            protocol: 0,
            endpoints,
            extra,
        }
    }

    #[test]
    fn test_bytes_per_interval() {
        // 2 additional transactions of 1024 bytes
        assert_eq!(bytes_per_interval(&endpoint(0x1400, 5), UsbSpeed::High), 3072);
        assert_eq!(bytes_per_interval(&endpoint(0x1400, 5), UsbSpeed::Full), 1024);

        let mut ss = endpoint(1024, 5);
        ss.bytes_per_interval = Some(24576);
        assert_eq!(bytes_per_interval(&ss, UsbSpeed::Super), 24576);
    }

    #[test]
    fn test_parse_and_select_alternate() {
        let alts = [
            alt(0, vec![], simple_streaming_interface(0x81)),
            alt(1, vec![endpoint(128, 5)], vec![]),
            alt(2, vec![endpoint(512, 5)], vec![]),
            alt(3, vec![endpoint(0x1400, 5)], vec![]),
        ];
        let refs: Vec<_> = alts.iter().collect();
        let vs = StreamingInterface::parse(&refs, UsbSpeed::High).unwrap();

        assert_eq!(vs.terminal_link, 3);
        assert_eq!(vs.formats.len(), 2);
        assert_eq!(vs.formats[0].frames.len(), 2);
        assert!(vs.formats[0].color.is_some());
        assert!(!vs.bulk);
        assert_eq!(vs.best_bandwidth(), 3072);

        assert_eq!(vs.select_alternate(0).unwrap().alternate, 1);
        assert_eq!(vs.select_alternate(300).unwrap().alternate, 2);
        assert_eq!(vs.select_alternate(512).unwrap().alternate, 2);
        assert_eq!(vs.select_alternate(3000).unwrap().alternate, 3);
        assert!(matches!(
            vs.select_alternate(4000),
            Err(Error::ResourceExhausted(_))
        ));
    }

    #[test]
    fn test_select_format() {
        let alts = [alt(0, vec![endpoint(512, 2)], simple_streaming_interface(0x81))];
        let refs: Vec<_> = alts.iter().collect();
        let vs = StreamingInterface::parse(&refs, UsbSpeed::High).unwrap();
        assert!(vs.bulk);

        let (format, frame, interval) = vs.select_format(Some(FourCc::YUYV), 352, 288, 400_000).unwrap();
        assert_eq!(format.index, 1);
        assert_eq!((frame.width, frame.height), (320, 240));
        assert_eq!(interval, 333_333);

        let (format, frame, _) = vs.select_format(Some(FourCc::MJPG), 1920, 1080, 0).unwrap();
        assert_eq!(format.index, 2);
        assert_eq!(frame.width, 1280);

        assert!(matches!(
            vs.select_format(Some(FourCc::NV12), 640, 480, 0),
            Err(Error::NotSupported(_))
        ));
    }
}
