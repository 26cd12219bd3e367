//! Video stream lifecycle and transfer handling
//!
//! A [`VideoStream`] owns one streaming interface. Control-plane calls and
//! transfer completions are serialized by the stream lock; the queue it
//! borrows from the pool has its own lock. Stopping is synchronous: every
//! outstanding transfer is cancelled and the call returns once the active
//! transfer counter has drained to zero or the cancel timeout has elapsed.

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};
use uvc_common::{DriverConfig, Error, Quirks, Result};
use uvc_protocol::probe::ProbeHint;
use uvc_protocol::{FourCc, StreamControl, UsbError, UsbSpeed, UvcVersion};

use super::decode::{DecodeStats, Decoder, DecoderSettings, PayloadContext};
use super::interface::StreamingInterface;
use super::negotiate::{Negotiation, Negotiator};
use super::queue::{QueueLease, QueuePool, VideoQueue};
use crate::transport::{
    Completion, CompletionHandler, CompletionStatus, ControlTransport, EndpointConfig, TransferKind,
    TransferLayer, TransferRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamState {
    Closed,
    Open,
    Configured,
    Started,
    Suspended,
    Stopped,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Closed => "closed",
            StreamState::Open => "open",
            StreamState::Configured => "configured",
            StreamState::Started => "started",
            StreamState::Suspended => "suspended",
            StreamState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Tunables taken from the driver configuration
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub lock_timeout: Duration,
    pub transfer_count: usize,
    pub packets_per_transfer: usize,
    pub resubmit_retries: u32,
    pub cancel_poll_interval: Duration,
    pub cancel_timeout: Duration,
    pub drop_corrupted: bool,
    pub buffers_per_queue: usize,
}

impl From<&DriverConfig> for StreamSettings {
    fn from(config: &DriverConfig) -> Self {
        Self {
            lock_timeout: config.locking.timeout(),
            transfer_count: config.streaming.transfer_count,
            packets_per_transfer: config.streaming.packets_per_transfer,
            resubmit_retries: config.streaming.resubmit_retries,
            cancel_poll_interval: config.streaming.cancel_poll_interval(),
            cancel_timeout: config.streaming.cancel_timeout(),
            drop_corrupted: config.streaming.drop_corrupted,
            buffers_per_queue: config.queues.buffers_per_queue,
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::from(&DriverConfig::default())
    }
}

/// Device-wide parameters a stream needs for negotiation
#[derive(Debug, Clone, Copy)]
pub struct StreamParams {
    pub version: UvcVersion,
    /// Device clock frequency from the control interface header
    pub clock_frequency: u32,
    pub speed: UsbSpeed,
    pub quirks: Quirks,
}

#[derive(Debug)]
struct Slot {
    request: TransferRequest,
    /// Submitted and not yet given up on
    active: bool,
}

struct StreamInner {
    state: StreamState,
    /// Last probe state read from or committed to the device
    control: StreamControl,
    endpoint: Option<EndpointConfig>,
    lease: Option<QueueLease>,
    decoder: Option<Decoder>,
    slots: Vec<Slot>,
    /// Counters of the last stopped run
    stats: DecodeStats,
    /// Transfers are being cancelled with the lock released
    draining: bool,
    disconnected: bool,
}

struct StreamShared {
    interface: StreamingInterface,
    control: Arc<dyn ControlTransport>,
    transfers: Arc<dyn TransferLayer>,
    pool: Arc<QueuePool>,
    params: StreamParams,
    settings: StreamSettings,
    inner: Mutex<StreamInner>,
    /// Submitted transfers whose completion has not run yet
    active: AtomicUsize,
    handler: Arc<dyn CompletionHandler>,
    epoch: Instant,
}

/// Routes transfer completions back to their stream
struct SlotCompletion {
    shared: Weak<StreamShared>,
}

impl CompletionHandler for SlotCompletion {
    fn on_complete(&self, slot: usize, completion: Completion) {
        match self.shared.upgrade() {
            Some(shared) => shared.handle_completion(slot, completion),
            None => trace!("Completion for slot {} after stream was dropped", slot),
        }
    }
}

pub struct VideoStream {
    shared: Arc<StreamShared>,
}

impl fmt::Debug for VideoStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoStream")
            .field("interface", &self.shared.interface.number)
            .finish_non_exhaustive()
    }
}

impl VideoStream {
    pub fn new(
        interface: StreamingInterface,
        control: Arc<dyn ControlTransport>,
        transfers: Arc<dyn TransferLayer>,
        pool: Arc<QueuePool>,
        params: StreamParams,
        settings: StreamSettings,
    ) -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<StreamShared>| StreamShared {
            interface,
            control,
            transfers,
            pool,
            params,
            settings,
            inner: Mutex::new(StreamInner {
                state: StreamState::Closed,
                control: StreamControl::default(),
                endpoint: None,
                lease: None,
                decoder: None,
                slots: Vec::new(),
                stats: DecodeStats::default(),
                draining: false,
                disconnected: false,
            }),
            active: AtomicUsize::new(0),
            handler: Arc::new(SlotCompletion {
                shared: weak.clone(),
            }),
            epoch: Instant::now(),
        });
        Self { shared }
    }

    pub fn interface(&self) -> &StreamingInterface {
        &self.shared.interface
    }

    pub fn state(&self) -> Result<StreamState> {
        Ok(self.shared.lock()?.state)
    }

    /// Current probe/commit state
    pub fn control(&self) -> Result<StreamControl> {
        Ok(self.shared.lock()?.control.clone())
    }

    /// Queue frames are delivered to while the stream runs
    pub fn queue(&self) -> Result<Option<Arc<VideoQueue>>> {
        Ok(self.shared.lock()?.lease.as_ref().map(|l| Arc::clone(l.queue())))
    }

    /// Decode counters of the running stream, or of the last run
    pub fn stats(&self) -> Result<DecodeStats> {
        let inner = self.shared.lock()?;
        Ok(inner
            .decoder
            .as_ref()
            .map(|d| *d.stats())
            .unwrap_or(inner.stats))
    }

    /// Host time of a device presentation timestamp
    pub fn estimate_host_time(&self, pts: u32) -> Result<Option<u64>> {
        let inner = self.shared.lock()?;
        Ok(inner
            .decoder
            .as_ref()
            .and_then(|d| d.clock().estimate_host_time(pts)))
    }

    pub fn active_transfers(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Read the initial probe state on alternate setting 0
    pub fn open(&self) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.lock()?;
        shared.expect_state(&inner, "open", &[StreamState::Closed])?;

        shared
            .transfers
            .set_interface(shared.interface.number, 0)?;
        inner.control = shared.negotiator().initial_control()?;
        inner.state = StreamState::Open;
        info!(
            "Stream {}: opened, format {} frame {}",
            shared.interface.number, inner.control.format_index, inner.control.frame_index
        );
        Ok(())
    }

    /// Negotiate a format, frame and interval
    ///
    /// An interval of 0 selects the frame default; other values are rounded
    /// to the nearest interval the frame supports.
    pub fn configure(&self, format_index: u8, frame_index: u8, interval: u32) -> Result<Negotiation> {
        let shared = &self.shared;
        let mut inner = shared.lock()?;
        shared.expect_state(
            &inner,
            "configure",
            &[StreamState::Open, StreamState::Configured, StreamState::Stopped],
        )?;

        let (format, frame) = shared
            .interface
            .format_frame(format_index, frame_index)
            .ok_or_else(|| {
                Error::NotSupported(format!("format {} frame {}", format_index, frame_index))
            })?;

        let mut candidate = inner.control.clone();
        candidate.hint = ProbeHint::FRAME_INTERVAL;
        candidate.format_index = format.index;
        candidate.frame_index = frame.index;
        candidate.frame_interval = if interval == 0 {
            frame.default_interval
        } else {
            frame.intervals.nearest(interval)
        };
        if shared.params.quirks.contains(Quirks::PROBE_EXTRAFIELDS) {
            candidate.max_video_frame_size = frame.max_video_frame_buffer_size;
        }

        let negotiation = shared.negotiator().probe(&candidate)?;
        inner.control = negotiation.control.clone();
        inner.state = StreamState::Configured;
        info!(
            "Stream {}: configured {} {}x{} interval {} ({} rounds)",
            shared.interface.number,
            format.name,
            frame.width,
            frame.height,
            negotiation.control.frame_interval,
            negotiation.rounds
        );
        Ok(negotiation)
    }

    /// Configure from a pixel format and size rather than descriptor indices
    pub fn configure_format(
        &self,
        fourcc: Option<FourCc>,
        width: u16,
        height: u16,
        interval: u32,
    ) -> Result<Negotiation> {
        let (format, frame, interval) =
            self.shared
                .interface
                .select_format(fourcc, width, height, interval)?;
        self.configure(format.index, frame.index, interval)
    }

    /// Commit the negotiated parameters and begin streaming
    pub fn start(&self) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.lock()?;
        shared.expect_state(&inner, "start", &[StreamState::Configured, StreamState::Stopped])?;
        shared.start_locked(&mut inner)
    }

    /// Cancel transfers and release the queue, keeping the negotiated state
    pub fn suspend(&self) -> Result<()> {
        self.shared.halt("suspend", &[StreamState::Started], StreamState::Suspended)
    }

    /// Renegotiate and restart a suspended stream
    pub fn resume(&self) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.lock()?;
        shared.expect_state(&inner, "resume", &[StreamState::Suspended])?;

        let negotiation = shared.negotiator().probe(&inner.control)?;
        inner.control = negotiation.control;
        shared.start_locked(&mut inner)?;
        info!("Stream {}: resumed", shared.interface.number);
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.shared.halt(
            "stop",
            &[StreamState::Started, StreamState::Suspended],
            StreamState::Stopped,
        )
    }

    pub fn close(&self) -> Result<()> {
        let state = self.state()?;
        if state == StreamState::Closed {
            return Err(Error::state_violation("close", state));
        }
        if matches!(state, StreamState::Started | StreamState::Suspended) {
            self.stop()?;
        }

        let mut inner = self.shared.lock()?;
        inner.state = StreamState::Closed;
        info!("Stream {}: closed", self.shared.interface.number);
        Ok(())
    }

    /// Device is gone: wake consumers and refuse further work
    pub fn disconnect(&self) -> Result<()> {
        let mut inner = self.shared.lock()?;
        self.shared.disconnect_locked(&mut inner);
        Ok(())
    }
}

impl Drop for VideoStream {
    fn drop(&mut self) {
        match self.state() {
            Ok(StreamState::Closed) => {}
            Ok(_) => {
                if let Err(e) = self.close() {
                    warn!("Stream {}: close on drop failed: {}", self.shared.interface.number, e);
                }
            }
            Err(e) => warn!("Stream {}: {}", self.shared.interface.number, e),
        }
    }
}

impl StreamShared {
    fn lock(&self) -> Result<MutexGuard<'_, StreamInner>> {
        self.inner
            .try_lock_for(self.settings.lock_timeout)
            .ok_or_else(|| Error::Timeout(format!("stream {} lock", self.interface.number)))
    }

    fn expect_state(
        &self,
        inner: &StreamInner,
        operation: &'static str,
        allowed: &[StreamState],
    ) -> Result<()> {
        if inner.draining {
            return Err(Error::state_violation(operation, "draining"));
        }
        if !allowed.contains(&inner.state) {
            return Err(Error::state_violation(operation, inner.state));
        }
        if inner.disconnected && operation != "stop" {
            return Err(Error::Disconnected);
        }
        Ok(())
    }

    fn negotiator(&self) -> Negotiator<'_> {
        Negotiator::new(
            self.control.as_ref(),
            &self.interface,
            self.params.version,
            self.params.clock_frequency,
            self.params.speed,
            self.params.quirks,
        )
    }

    fn context(&self) -> PayloadContext {
        PayloadContext {
            host_sof: self.transfers.frame_number(),
            host_time_ns: self.epoch.elapsed().as_nanos() as u64,
        }
    }

    fn start_locked(&self, inner: &mut StreamInner) -> Result<()> {
        let ctrl = inner.control.clone();
        let (format, frame) = self
            .interface
            .format_frame(ctrl.format_index, ctrl.frame_index)
            .ok_or_else(|| {
                Error::NotSupported(format!(
                    "format {} frame {}",
                    ctrl.format_index, ctrl.frame_index
                ))
            })?;

        let lease = self.pool.checkout()?;
        self.negotiator().commit(&ctrl)?;

        let capacity = (ctrl.max_video_frame_size as usize).max(frame.max_video_frame_buffer_size as usize);
        let queue = Arc::clone(lease.queue());
        queue.allocate(self.settings.buffers_per_queue, capacity)?;
        queue.queue_all()?;

        let (alternate, endpoint, kind) = if self.interface.bulk {
            let endpoint = self
                .interface
                .alt_settings
                .first()
                .and_then(|alt| alt.endpoint)
                .ok_or_else(|| Error::NotSupported("bulk interface without endpoint".into()))?;
            let length = (ctrl.max_payload_transfer_size as usize).max(endpoint.max_packet_size as usize);
            (0, endpoint, TransferKind::Bulk { length })
        } else {
            let alt = self.interface.select_alternate(ctrl.max_payload_transfer_size)?;
            let endpoint = alt
                .endpoint
                .ok_or_else(|| Error::NotSupported("alternate setting without endpoint".into()))?;
            let kind = TransferKind::Isochronous {
                packets: self.settings.packets_per_transfer,
                packet_size: alt.bytes_per_interval as usize,
            };
            (alt.alternate, endpoint, kind)
        };

        if let Err(e) = self.bring_up(alternate, &endpoint) {
            self.bring_down(&endpoint);
            return Err(e);
        }

        let settings = DecoderSettings {
            quirks: self.params.quirks,
            expected_frame_size: (!format.compressed).then_some(ctrl.max_video_frame_size as usize),
            drop_corrupted: self.settings.drop_corrupted,
            max_payload_size: ctrl.max_payload_transfer_size as usize,
        };
        inner.decoder = Some(Decoder::new(Arc::clone(&queue), settings));
        inner.lease = Some(lease);
        inner.endpoint = Some(endpoint);
        inner.slots = (0..self.settings.transfer_count)
            .map(|slot| Slot {
                request: TransferRequest {
                    slot,
                    endpoint: endpoint.address,
                    kind,
                },
                active: false,
            })
            .collect();

        let mut submitted = 0;
        for slot in 0..inner.slots.len() {
            if self.submit(inner, slot) {
                submitted += 1;
            }
        }
        if submitted == 0 {
            self.release_locked(inner);
            return Err(Error::ResourceExhausted(format!(
                "stream {}: no transfer could be submitted",
                self.interface.number
            )));
        }

        inner.state = StreamState::Started;
        info!(
            "Stream {}: started on alternate {} endpoint {:#04x}, {} transfers, queue {}",
            self.interface.number,
            alternate,
            endpoint.address,
            submitted,
            queue.id()
        );
        Ok(())
    }

    fn bring_up(&self, alternate: u8, endpoint: &EndpointConfig) -> Result<()> {
        self.transfers.set_interface(self.interface.number, alternate)?;
        self.transfers.enable_endpoint(endpoint)?;
        Ok(())
    }

    fn bring_down(&self, endpoint: &EndpointConfig) {
        if let Err(e) = self.transfers.disable_endpoint(endpoint.address) {
            debug!("Stream {}: disable endpoint: {}", self.interface.number, e);
        }
        if let Err(e) = self.transfers.set_interface(self.interface.number, 0) {
            debug!("Stream {}: reset alternate setting: {}", self.interface.number, e);
        }
    }

    /// Submit a slot, retrying a bounded number of times
    fn submit(&self, inner: &mut StreamInner, slot: usize) -> bool {
        let Some(entry) = inner.slots.get_mut(slot) else {
            return false;
        };

        for attempt in 0..=self.settings.resubmit_retries {
            self.active.fetch_add(1, Ordering::AcqRel);
            match self.transfers.submit(&entry.request, Arc::clone(&self.handler)) {
                Ok(()) => {
                    entry.active = true;
                    return true;
                }
                Err(e) => {
                    self.release_active();
                    if e == UsbError::NoDevice {
                        entry.active = false;
                        return false;
                    }
                    debug!(
                        "Stream {}: submit of slot {} failed (attempt {}): {}",
                        self.interface.number,
                        slot,
                        attempt + 1,
                        e
                    );
                }
            }
        }

        warn!(
            "Stream {}: giving up on transfer slot {}",
            self.interface.number, slot
        );
        entry.active = false;
        false
    }

    fn release_active(&self) {
        // Saturating: completions may trail a forced reclaim
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn handle_completion(&self, slot: usize, completion: Completion) {
        let Some(mut inner) = self.inner.try_lock_for(self.settings.lock_timeout) else {
            warn!(
                "Stream {}: lock timeout, dropping completion of slot {}",
                self.interface.number, slot
            );
            self.release_active();
            return;
        };
        let inner = &mut *inner;

        let running = inner.state == StreamState::Started && !inner.draining && !inner.disconnected;
        let mut resubmit = running;

        match &completion.status {
            CompletionStatus::Cancelled => {
                trace!("Stream {}: slot {} cancelled", self.interface.number, slot);
                resubmit = false;
            }
            CompletionStatus::Error(UsbError::NoDevice) => {
                self.disconnect_locked(inner);
                resubmit = false;
            }
            CompletionStatus::Error(e) => {
                warn!(
                    "Stream {}: transfer on slot {} failed: {}",
                    self.interface.number, slot, e
                );
                if let Some(decoder) = inner.decoder.as_mut() {
                    if let Err(e) = decoder.mark_error() {
                        warn!("Stream {}: {}", self.interface.number, e);
                    }
                }
            }
            CompletionStatus::Completed if running => {
                let ctx = self.context();
                let kind = inner.slots.get(slot).map(|s| s.request.kind);
                if let (Some(decoder), Some(kind)) = (inner.decoder.as_mut(), kind) {
                    let result = match kind {
                        TransferKind::Isochronous { .. } => {
                            decoder.decode_isochronous(&completion.packets, ctx)
                        }
                        TransferKind::Bulk { .. } => {
                            decoder.decode_bulk(&completion.data, completion.requested, ctx)
                        }
                    };
                    if let Err(e) = result {
                        warn!("Stream {}: decode failed: {}", self.interface.number, e);
                    }
                }
            }
            CompletionStatus::Completed => {}
        }

        if resubmit {
            self.submit(inner, slot);
        } else if let Some(entry) = inner.slots.get_mut(slot) {
            entry.active = false;
        }
        // After a resubmit so the counter never reads zero in between
        self.release_active();
    }

    /// Cancel transfers and wait for them with the lock released
    fn halt(&self, operation: &'static str, allowed: &[StreamState], target: StreamState) -> Result<()> {
        let pending: Vec<(u8, usize)> = {
            let mut inner = self.lock()?;
            self.expect_state(&inner, operation, allowed)?;

            if inner.state == StreamState::Suspended {
                // Already drained
                inner.state = target;
                return Ok(());
            }
            inner.draining = true;
            inner
                .slots
                .iter()
                .filter(|slot| slot.active)
                .map(|slot| (slot.request.endpoint, slot.request.slot))
                .collect()
        };

        self.drain(&pending);

        let mut inner = self.lock()?;
        inner.draining = false;
        self.release_locked(&mut inner);
        inner.state = target;
        info!("Stream {}: {}", self.interface.number, target);
        Ok(())
    }

    fn drain(&self, pending: &[(u8, usize)]) {
        for &(endpoint, slot) in pending {
            if let Err(e) = self.transfers.cancel(endpoint, slot) {
                debug!("Stream {}: cancel slot {}: {}", self.interface.number, slot, e);
            }
        }

        let deadline = Instant::now() + self.settings.cancel_timeout;
        loop {
            let active = self.active.load(Ordering::Acquire);
            if active == 0 {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    "Stream {}: {} transfers still active after {:?}, reclaiming",
                    self.interface.number, active, self.settings.cancel_timeout
                );
                self.active.store(0, Ordering::Release);
                break;
            }
            std::thread::sleep(self.settings.cancel_poll_interval);
        }
    }

    /// Drop the decoder and queue, return to alternate setting 0
    fn release_locked(&self, inner: &mut StreamInner) {
        if let Some(decoder) = inner.decoder.take() {
            inner.stats = *decoder.stats();
        }
        inner.slots.clear();
        // Returns the queue to the pool
        inner.lease = None;
        if let Some(endpoint) = inner.endpoint.take() {
            if !inner.disconnected {
                self.bring_down(&endpoint);
            }
        }
    }

    fn disconnect_locked(&self, inner: &mut StreamInner) {
        if inner.disconnected {
            return;
        }
        warn!("Stream {}: device disconnected", self.interface.number);
        inner.disconnected = true;
        // Slots stay active so that stop still cancels what is in flight
        if let Some(lease) = &inner.lease {
            lease.queue().disconnect();
        }
    }
}
