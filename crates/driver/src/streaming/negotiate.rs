//! Probe and commit negotiation
//!
//! The host proposes streaming parameters with SET_CUR on the probe control
//! and reads back what the device accepted with GET_CUR. On isochronous
//! interfaces the result is compared with the best alternate setting and
//! compression parameters are lowered toward their minimum when the device
//! asks for more bandwidth than the bus offers.

use serde::Serialize;
use tracing::{debug, warn};
use uvc_common::{Error, Quirks, Result};
use uvc_protocol::constants::vs_control::{COMMIT, PROBE};
use uvc_protocol::probe::probe_size;
use uvc_protocol::{FormatKind, Request, StreamControl, UsbError, UsbSpeed, UvcVersion};

use super::interface::StreamingInterface;
use crate::transport::{ClassRequest, ControlTransport};

/// Upper bound on SET_CUR/GET_CUR cycles in one negotiation
pub const MAX_PROBE_ROUNDS: usize = 2;

/// Result of a probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Negotiation {
    pub control: StreamControl,
    /// SET_CUR/GET_CUR cycles performed
    pub rounds: usize,
    /// Whether an alternate setting can carry the negotiated payload size
    pub fits: bool,
}

pub struct Negotiator<'a> {
    transport: &'a dyn ControlTransport,
    interface: &'a StreamingInterface,
    version: UvcVersion,
    clock_frequency: u32,
    speed: UsbSpeed,
    quirks: Quirks,
}

impl<'a> Negotiator<'a> {
    pub fn new(
        transport: &'a dyn ControlTransport,
        interface: &'a StreamingInterface,
        version: UvcVersion,
        clock_frequency: u32,
        speed: UsbSpeed,
        quirks: Quirks,
    ) -> Self {
        Self {
            transport,
            interface,
            version,
            clock_frequency,
            speed,
            quirks,
        }
    }

    /// Size of the probe/commit block this device expects
    pub fn block_size(&self) -> usize {
        probe_size(self.version, self.quirks.contains(Quirks::PROBE_EXTRAFIELDS))
    }

    fn request(&self, request: Request, selector: u8) -> ClassRequest {
        ClassRequest::new(request, selector, 0, self.interface.number)
    }

    /// Read the probe or commit control
    pub fn get(&self, request: Request, selector: u8) -> Result<StreamControl> {
        if self.quirks.contains(Quirks::PROBE_DEF) && request == Request::GetDef {
            return Err(Error::NotSupported("GET_DEF disabled by quirk".into()));
        }

        let size = self.block_size();
        let mut data = vec![0u8; size];
        let received = self.transport.read(&self.request(request, selector), &mut data)?;

        let mut ctrl = if received == size {
            StreamControl::decode(&data)?
        } else if received == 2 && matches!(request, Request::GetMin | Request::GetMax) {
            warn!(
                "Interface {}: {} on probe returned 2 bytes, working around non-compliant device",
                self.interface.number,
                request.name()
            );
            return Ok(StreamControl::from_quality_only(&data[..2])?);
        } else {
            return Err(Error::Transport(UsbError::ShortTransfer {
                expected: size,
                actual: received,
            }));
        };

        // Not part of the 26-byte block
        if size < uvc_protocol::probe::PROBE_SIZE_V11 {
            ctrl.clock_frequency = self.clock_frequency;
        }
        self.fix_control(&mut ctrl);
        Ok(ctrl)
    }

    /// Write the probe or commit control
    pub fn set(&self, selector: u8, ctrl: &StreamControl) -> Result<()> {
        let data = ctrl.encode(self.block_size())?;
        debug!(
            "Interface {}: SET_CUR {} format {} frame {} interval {}",
            self.interface.number,
            if selector == PROBE { "probe" } else { "commit" },
            ctrl.format_index,
            ctrl.frame_index,
            ctrl.frame_interval
        );
        self.transport
            .write(&self.request(Request::SetCur, selector), &data)
            .map_err(Error::from)
    }

    /// Correct the size fields devices are known to get wrong
    pub fn fix_control(&self, ctrl: &mut StreamControl) {
        let Some((format, frame)) = self
            .interface
            .format_frame(ctrl.format_index, ctrl.frame_index)
        else {
            return;
        };

        if !format.compressed
            || (ctrl.max_video_frame_size == 0 && self.version < UvcVersion::V1_1)
        {
            ctrl.max_video_frame_size = frame.max_video_frame_buffer_size;
        }

        // Some devices put garbage in the upper half
        if ctrl.max_payload_transfer_size & 0xffff_0000 == 0xffff_0000 {
            ctrl.max_payload_transfer_size &= 0x0000_ffff;
        }

        if format.kind == FormatKind::Uncompressed
            && self.quirks.contains(Quirks::FIX_BANDWIDTH)
            && self.interface.is_isochronous()
        {
            let interval = if ctrl.frame_interval > 100_000 {
                ctrl.frame_interval
            } else {
                frame.default_interval.max(1)
            } as u64;

            // Frame size times frames per second over bus intervals per
            // second, plus a 12-byte header
            let mut bandwidth = frame.width as u64 * frame.height as u64 / 8 * format.bpp as u64;
            bandwidth *= 10_000_000 / interval + 1;
            bandwidth /= 1000;
            // High speed counts microframes; SuperSpeed payloads are sized per frame
            if self.speed == UsbSpeed::High {
                bandwidth /= 8;
            }
            bandwidth += 12;
            let bandwidth = bandwidth.max(1024).min(u32::MAX as u64) as u32;

            debug!(
                "Interface {}: overriding payload size {} with {}",
                self.interface.number, ctrl.max_payload_transfer_size, bandwidth
            );
            ctrl.max_payload_transfer_size = bandwidth;
        }
    }

    /// Negotiate `candidate` with the device
    ///
    /// At most [`MAX_PROBE_ROUNDS`] cycles are attempted. When the device
    /// still requires more than the best alternate setting afterwards the
    /// result is returned with `fits == false` and the caller proceeds on a
    /// best-effort basis.
    pub fn probe(&self, candidate: &StreamControl) -> Result<Negotiation> {
        let mut probe = candidate.clone();
        let isochronous = self.interface.is_isochronous();
        let bandwidth = self.interface.best_bandwidth();

        let min = if isochronous && !self.quirks.contains(Quirks::PROBE_MINMAX) {
            let min = self.get(Request::GetMin, PROBE)?;
            let max = self.get(Request::GetMax, PROBE)?;
            probe.comp_quality = max.comp_quality;
            Some(min)
        } else {
            None
        };

        let mut rounds = 0;
        loop {
            self.set(PROBE, &probe)?;
            probe = self.get(Request::GetCur, PROBE)?;
            rounds += 1;

            if !isochronous || probe.max_payload_transfer_size <= bandwidth {
                break;
            }
            let Some(min) = &min else {
                break;
            };
            if rounds >= MAX_PROBE_ROUNDS {
                break;
            }

            debug!(
                "Interface {}: payload size {} exceeds {} bytes, lowering compression",
                self.interface.number, probe.max_payload_transfer_size, bandwidth
            );
            probe.key_frame_rate = min.key_frame_rate;
            probe.p_frame_rate = min.p_frame_rate;
            probe.comp_quality = min.comp_quality;
            probe.comp_window_size = min.comp_window_size;
        }

        let fits = !isochronous || probe.max_payload_transfer_size <= bandwidth;
        if !fits {
            warn!(
                "Interface {}: device requires {} bytes per interval, best setting offers {}",
                self.interface.number, probe.max_payload_transfer_size, bandwidth
            );
        }

        Ok(Negotiation {
            control: probe,
            rounds,
            fits,
        })
    }

    /// Make the negotiated parameters effective
    pub fn commit(&self, ctrl: &StreamControl) -> Result<()> {
        self.set(COMMIT, ctrl)
    }

    /// Initial probe state read when the stream is opened
    ///
    /// The device default is written to the probe control when GET_DEF works,
    /// then GET_CUR is read. Format and frame indices the device reports but
    /// does not describe fall back to the first format and its first frame.
    pub fn initial_control(&self) -> Result<StreamControl> {
        match self.get(Request::GetDef, PROBE) {
            Ok(def) => {
                if let Err(e) = self.set(PROBE, &def) {
                    debug!("Interface {}: setting default probe failed: {}", self.interface.number, e);
                }
            }
            Err(e) => debug!(
                "Interface {}: GET_DEF on probe failed, keeping current: {}",
                self.interface.number, e
            ),
        }

        let mut ctrl = self.get(Request::GetCur, PROBE)?;

        let format = match self.interface.format(ctrl.format_index) {
            Some(format) => format,
            None => self
                .interface
                .formats
                .first()
                .ok_or_else(|| Error::NotSupported("no format".into()))?,
        };
        let frame = match format.frame(ctrl.frame_index) {
            Some(frame) => frame,
            None => format
                .frames
                .first()
                .ok_or_else(|| Error::NotSupported("no frame".into()))?,
        };

        if ctrl.format_index != format.index || ctrl.frame_index != frame.index {
            debug!(
                "Interface {}: device reports format {} frame {}, using {} {}",
                self.interface.number, ctrl.format_index, ctrl.frame_index, format.index, frame.index
            );
        }
        ctrl.format_index = format.index;
        ctrl.frame_index = frame.index;
        if ctrl.frame_interval == 0 {
            ctrl.frame_interval = frame.default_interval;
        }
        Ok(ctrl)
    }
}
