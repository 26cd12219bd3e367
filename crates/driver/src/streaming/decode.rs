//! Payload decoding and frame reassembly
//!
//! Each payload goes through three stages:
//!
//! 1. header: validation, frame boundary detection and clock sampling
//! 2. data: copy into the current buffer, bounded by its capacity
//! 3. end: end-of-frame handling
//!
//! The header and end stages run even when no buffer is available, so that
//! the FID tracking and the clock stay in sync with the device; only the copy
//! is skipped.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace};
use uvc_common::{Quirks, Result};
use uvc_protocol::PayloadHeader;

use super::clock::ClockRecovery;
use super::queue::{BufferState, Completion, VideoQueue};
use crate::transport::IsoPacket;

/// Counters kept per stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    pub payloads: u64,
    pub empty_payloads: u64,
    pub invalid_headers: u64,
    /// Payloads with the ERR bit set
    pub errored_payloads: u64,
    pub lost_packets: u64,
    /// Frames handed to the consumer
    pub frames: u64,
    /// Frames recycled by the drop-corrupted policy
    pub corrupted_frames: u64,
    /// Frames that started while no buffer was queued
    pub dropped_frames: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DecoderSettings {
    pub quirks: Quirks,
    /// Exact frame size uncompressed formats must produce
    pub expected_frame_size: Option<usize>,
    pub drop_corrupted: bool,
    /// Bulk payload size negotiated with the device
    pub max_payload_size: usize,
}

/// Host-side timing of one payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayloadContext {
    pub host_sof: u16,
    pub host_time_ns: u64,
}

/// Outcome of the header stage
enum Start {
    /// Payload data starts at this offset
    Data(usize),
    /// The current buffer is complete; fetch the next one and retry
    NextBuffer,
    /// Nothing to copy
    Skip,
}

#[derive(Debug, Default)]
struct BulkState {
    header: Option<PayloadHeader>,
    skip: bool,
    payload_size: usize,
}

pub struct Decoder {
    queue: Arc<VideoQueue>,
    settings: DecoderSettings,
    current: Option<usize>,
    last_fid: Option<bool>,
    bulk: BulkState,
    clock: ClockRecovery,
    stats: DecodeStats,
}

impl Decoder {
    pub fn new(queue: Arc<VideoQueue>, settings: DecoderSettings) -> Self {
        Self {
            queue,
            settings,
            current: None,
            last_fid: None,
            bulk: BulkState::default(),
            clock: ClockRecovery::new(),
            stats: DecodeStats::default(),
        }
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    pub fn clock(&self) -> &ClockRecovery {
        &self.clock
    }

    /// Buffer being filled, if any
    pub fn current_buffer(&self) -> Option<usize> {
        self.current
    }

    /// Forget the frame in progress
    pub fn reset(&mut self) {
        self.current = None;
        self.last_fid = None;
        self.bulk = BulkState::default();
    }

    fn ensure_buffer(&mut self) -> Result<()> {
        if self.current.is_none() {
            self.current = self.queue.take_next()?;
        }
        Ok(())
    }

    /// Complete the current buffer and move to the next queued one
    fn next_buffer(&mut self) -> Result<()> {
        if let Some(index) = self.current.take() {
            match self.queue.complete(
                index,
                self.settings.expected_frame_size,
                self.settings.drop_corrupted,
            )? {
                Completion::Delivered(_) => self.stats.frames += 1,
                Completion::Recycled => self.stats.corrupted_frames += 1,
            }
        }
        self.current = self.queue.take_next()?;
        Ok(())
    }

    /// Mark the frame in progress as damaged
    pub fn mark_error(&mut self) -> Result<()> {
        if let Some(index) = self.current {
            self.queue.mark_error(index)?;
        }
        Ok(())
    }

    fn decode_start(&mut self, header: &PayloadHeader, ctx: PayloadContext) -> Result<Start> {
        let fid = header.fid();
        let Some(index) = self.current else {
            if self.last_fid != Some(fid) {
                debug!("No buffer queued, dropping frame");
                self.stats.dropped_frames += 1;
            }
            self.last_fid = Some(fid);
            return Ok(Start::Skip);
        };

        // Synchronise on the first FID toggle after the buffer was queued
        if self.queue.state(index)? == BufferState::Queued {
            if self.last_fid == Some(fid) {
                trace!("Dropping payload (out of sync)");
                if self.settings.quirks.contains(Quirks::STREAM_NO_FID) {
                    self.last_fid = Some(!fid);
                }
                return Ok(Start::Skip);
            }
            self.queue.activate(index, ctx.host_time_ns, header.pts)?;
        }

        if self.last_fid != Some(fid) && self.queue.bytes_used(index)? != 0 {
            trace!("Frame complete (FID bit toggled)");
            self.queue.mark_ready(index)?;
            return Ok(Start::NextBuffer);
        }

        self.last_fid = Some(fid);
        Ok(Start::Data(header.length as usize))
    }

    fn decode_data(&mut self, data: &[u8]) -> Result<()> {
        let Some(index) = self.current else {
            return Ok(());
        };
        if data.is_empty() {
            return Ok(());
        }
        let append = self.queue.append(index, data)?;
        if append.overflow {
            debug!("Frame overflow, buffer {} full", index);
        }
        Ok(())
    }

    fn decode_end(&mut self, header: &PayloadHeader, payload_len: usize) -> Result<()> {
        if !header.eof() {
            return Ok(());
        }
        if let Some(index) = self.current {
            if self.queue.state(index)? == BufferState::Active && self.queue.bytes_used(index)? != 0 {
                trace!("Frame complete (EOF found)");
                if header.length as usize == payload_len {
                    trace!("EOF in empty payload");
                }
                self.queue.mark_ready(index)?;
            }
        }
        if self.settings.quirks.contains(Quirks::STREAM_NO_FID) {
            self.last_fid = self.last_fid.map(|fid| !fid);
        }
        Ok(())
    }

    fn current_is_ready(&self) -> Result<bool> {
        match self.current {
            Some(index) => Ok(self.queue.state(index)? == BufferState::Ready),
            None => Ok(false),
        }
    }

    /// Header stage with buffer rotation on a FID toggle
    ///
    /// The ERR bit and the clock sample are accounted once per payload, the
    /// error flag lands on the buffer that receives the payload data.
    fn start_payload(&mut self, header: &PayloadHeader, ctx: PayloadContext) -> Result<Start> {
        self.ensure_buffer()?;
        if let Some(scr) = header.scr {
            self.clock.sample(scr.stc, scr.sof, ctx.host_sof, ctx.host_time_ns);
        }

        let outcome = loop {
            match self.decode_start(header, ctx)? {
                Start::NextBuffer => self.next_buffer()?,
                outcome => break outcome,
            }
        };

        if header.error() {
            trace!("Payload with ERR bit set");
            self.stats.errored_payloads += 1;
            if let Start::Data(_) = outcome {
                self.mark_error()?;
            }
        }
        Ok(outcome)
    }

    /// Decode one isochronous payload
    pub fn decode_payload(&mut self, payload: &[u8], ctx: PayloadContext) -> Result<()> {
        if payload.is_empty() {
            self.stats.empty_payloads += 1;
            return Ok(());
        }
        self.stats.payloads += 1;

        let header = match PayloadHeader::parse(payload) {
            Ok(header) => header,
            Err(e) => {
                trace!("Invalid payload header: {}", e);
                self.stats.invalid_headers += 1;
                return Ok(());
            }
        };

        if let Start::Data(offset) = self.start_payload(&header, ctx)? {
            self.decode_data(&payload[offset..])?;
        }
        self.decode_end(&header, payload.len())?;

        if self.current_is_ready()? {
            self.next_buffer()?;
        }
        Ok(())
    }

    /// Decode the packets of a completed isochronous transfer
    pub fn decode_isochronous(&mut self, packets: &[IsoPacket], ctx: PayloadContext) -> Result<()> {
        for packet in packets {
            if let Err(e) = &packet.status {
                trace!("Isochronous packet lost: {}", e);
                self.stats.lost_packets += 1;
                self.mark_error()?;
                continue;
            }
            self.decode_payload(&packet.data, ctx)?;
        }
        Ok(())
    }

    /// Decode one completed bulk transfer of `requested` bytes
    ///
    /// A payload may span several transfers; only the first carries the
    /// header. The payload ends with a short transfer or once the negotiated
    /// payload size has been received.
    pub fn decode_bulk(&mut self, data: &[u8], requested: usize, ctx: PayloadContext) -> Result<()> {
        let result = self.decode_bulk_transfer(data, requested, ctx);
        if result.is_err() {
            self.bulk = BulkState::default();
        }
        result
    }

    fn decode_bulk_transfer(&mut self, data: &[u8], requested: usize, ctx: PayloadContext) -> Result<()> {
        let received = data.len();
        self.bulk.payload_size += received;
        let mut data = data;

        if self.bulk.header.is_none() && !self.bulk.skip {
            if data.is_empty() {
                self.stats.empty_payloads += 1;
                self.bulk.skip = true;
            } else {
                self.stats.payloads += 1;
                match PayloadHeader::parse(data) {
                    Ok(header) => {
                        data = match self.start_payload(&header, ctx)? {
                            Start::Data(offset) => &data[offset..],
                            // The end stage still needs the header
                            _ => &[],
                        };
                        self.bulk.header = Some(header);
                    }
                    Err(e) => {
                        trace!("Invalid bulk payload header: {}", e);
                        self.stats.invalid_headers += 1;
                        self.bulk.skip = true;
                    }
                }
            }
        }

        if !self.bulk.skip {
            self.decode_data(data)?;
            // Overflow: the rest of this payload has nowhere to go
            if self.current_is_ready()? {
                self.bulk.skip = true;
            }
        }

        let short = received < requested;
        let full = self.settings.max_payload_size > 0
            && self.bulk.payload_size >= self.settings.max_payload_size;
        if short || full {
            if let Some(header) = self.bulk.header.take() {
                self.decode_end(&header, self.bulk.payload_size)?;
                if self.current_is_ready()? {
                    self.next_buffer()?;
                }
            }
            self.bulk = BulkState::default();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uvc_common::test_utils::payload;
    use uvc_protocol::{HeaderFlags, Scr};

    fn setup(buffers: usize, capacity: usize) -> (Arc<VideoQueue>, Decoder) {
        let queue = Arc::new(VideoQueue::new(0, Duration::from_millis(100)));
        queue.allocate(buffers, capacity).unwrap();
        queue.queue_all().unwrap();
        let decoder = Decoder::new(queue.clone(), DecoderSettings::default());
        (queue, decoder)
    }

    #[test]
    fn test_eof_completes_frame() {
        let (queue, mut dec) = setup(2, 1024);
        let ctx = PayloadContext::default();
        dec.decode_payload(&payload(HeaderFlags::empty(), 200, 1), ctx).unwrap();
        dec.decode_payload(&payload(HeaderFlags::EOF, 150, 2), ctx).unwrap();

        let info = queue.info(0).unwrap();
        assert_eq!(info.state, BufferState::Ready);
        assert_eq!(info.bytes_used, 346);
        assert_eq!(dec.current_buffer(), Some(1));
        assert_eq!(dec.stats().frames, 1);
    }

    #[test]
    fn test_no_buffer_keeps_fid_state() {
        let (queue, mut dec) = setup(1, 1024);
        let ctx = PayloadContext::default();
        // Fill and complete the only buffer
        dec.decode_payload(&payload(HeaderFlags::EOF, 10, 0), ctx).unwrap();
        assert_eq!(dec.current_buffer(), None);

        // Next frame arrives with nothing queued
        dec.decode_payload(&payload(HeaderFlags::FID, 10, 0), ctx).unwrap();
        assert_eq!(dec.stats().dropped_frames, 1);

        // Buffer comes back mid-frame: wait for the next toggle
        queue.dequeue().unwrap().unwrap();
        queue.queue_buffer(0).unwrap();
        dec.decode_payload(&payload(HeaderFlags::FID, 10, 0), ctx).unwrap();
        assert_eq!(queue.state(0).unwrap(), BufferState::Queued);
        dec.decode_payload(&payload(HeaderFlags::empty(), 10, 0), ctx).unwrap();
        assert_eq!(queue.state(0).unwrap(), BufferState::Active);
        assert_eq!(queue.bytes_used(0).unwrap(), 8);
    }

    #[test]
    fn test_err_bit_flags_buffer() {
        let (queue, mut dec) = setup(2, 1024);
        let ctx = PayloadContext::default();
        dec.decode_payload(&payload(HeaderFlags::empty(), 20, 0), ctx).unwrap();
        dec.decode_payload(&payload(HeaderFlags::ERR | HeaderFlags::EOF, 20, 0), ctx).unwrap();
        assert!(queue.info(0).unwrap().error);
        assert_eq!(dec.stats().errored_payloads, 1);
    }

    #[test]
    fn test_invalid_header_skipped() {
        let (queue, mut dec) = setup(1, 64);
        dec.decode_payload(&[40, 0x80, 1, 2], PayloadContext::default()).unwrap();
        assert_eq!(dec.stats().invalid_headers, 1);
        assert_eq!(queue.state(0).unwrap(), BufferState::Queued);
    }

    #[test]
    fn test_scr_feeds_clock() {
        let (_queue, mut dec) = setup(1, 64);
        let mut data = PayloadHeader::encode(
            HeaderFlags::EOH,
            None,
            Some(Scr { stc: 1234, sof: 300 }),
        );
        data.extend_from_slice(&[0; 4]);
        let ctx = PayloadContext {
            host_sof: 302,
            host_time_ns: 5,
        };
        dec.decode_payload(&data, ctx).unwrap();
        dec.decode_payload(&data, ctx).unwrap();
        assert_eq!(dec.clock().len(), 1);
    }

    #[test]
    fn test_bulk_payload_spanning_transfers() {
        let queue = Arc::new(VideoQueue::new(0, Duration::from_millis(100)));
        queue.allocate(2, 4096).unwrap();
        queue.queue_all().unwrap();
        let mut dec = Decoder::new(
            queue.clone(),
            DecoderSettings {
                max_payload_size: 1000,
                ..Default::default()
            },
        );
        let ctx = PayloadContext::default();

        // 512 + 488 = 1000 bytes: header + 998 bytes of data
        let first = payload(HeaderFlags::EOF, 512, 7);
        dec.decode_bulk(&first, 512, ctx).unwrap();
        assert_eq!(queue.state(0).unwrap(), BufferState::Active);
        dec.decode_bulk(&[7; 488], 512, ctx).unwrap();

        let info = queue.info(0).unwrap();
        assert_eq!(info.state, BufferState::Ready);
        assert_eq!(info.bytes_used, 998);
    }

    #[test]
    fn test_bulk_overflow_recovers_on_next_payload() {
        let queue = Arc::new(VideoQueue::new(0, Duration::from_millis(100)));
        queue.allocate(2, 100).unwrap();
        queue.queue_all().unwrap();
        let mut dec = Decoder::new(
            queue.clone(),
            DecoderSettings {
                max_payload_size: 1000,
                ..Default::default()
            },
        );
        let ctx = PayloadContext::default();

        // First payload overflows buffer 0 in its first transfer
        dec.decode_bulk(&payload(HeaderFlags::empty(), 512, 1), 512, ctx).unwrap();
        assert_eq!(queue.state(0).unwrap(), BufferState::Ready);
        dec.decode_bulk(&[1; 488], 512, ctx).unwrap();

        let info = queue.info(0).unwrap();
        assert_eq!(info.bytes_used, 100);
        assert!(info.error);
        assert_eq!(dec.current_buffer(), Some(1));

        // Next frame lands in buffer 1
        dec.decode_bulk(&payload(HeaderFlags::FID | HeaderFlags::EOF, 50, 2), 512, ctx).unwrap();
        let info = queue.info(1).unwrap();
        assert_eq!(info.state, BufferState::Ready);
        assert_eq!(info.bytes_used, 48);
        assert!(!info.error);
        assert_eq!(dec.stats().frames, 2);
    }

    #[test]
    fn test_err_bit_on_new_frame_counted_once() {
        let (queue, mut dec) = setup(3, 1024);
        let ctx = PayloadContext::default();
        dec.decode_payload(&payload(HeaderFlags::empty(), 20, 0), ctx).unwrap();
        // FID toggles: buffer 0 completes, the errored payload starts buffer 1
        dec.decode_payload(&payload(HeaderFlags::FID | HeaderFlags::ERR, 20, 0), ctx).unwrap();

        assert_eq!(dec.stats().errored_payloads, 1);
        assert!(!queue.info(0).unwrap().error);
        assert!(queue.info(1).unwrap().error);
        assert_eq!(dec.current_buffer(), Some(1));
    }
}
