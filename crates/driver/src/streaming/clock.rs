//! Device to host clock correlation
//!
//! Payload headers carrying an SCR give a (device STC, device SOF) pair. Each
//! one is stored together with the host SOF and host time at which it was
//! received, forming the window used to translate device presentation times
//! into host time.

use serde::Serialize;
use tracing::{debug, trace};
use uvc_protocol::SOF_MASK;

/// Number of samples kept in the ring
pub const CLOCK_SAMPLES: usize = 32;

/// Device/host SOF deltas below this are treated as jitter
const SOF_OFFSET_THRESHOLD: u16 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClockSample {
    pub dev_stc: u32,
    /// Device SOF corrected by the device/host offset
    pub dev_sof: u16,
    pub host_sof: u16,
    pub host_time_ns: u64,
}

#[derive(Debug, Clone)]
pub struct ClockRecovery {
    ring: [Option<ClockSample>; CLOCK_SAMPLES],
    /// Slot the next sample is written to
    head: usize,
    count: usize,
    last_sof: Option<u16>,
    sof_offset: Option<u16>,
}

impl Default for ClockRecovery {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockRecovery {
    pub fn new() -> Self {
        Self {
            ring: [None; CLOCK_SAMPLES],
            head: 0,
            count: 0,
            last_sof: None,
            sof_offset: None,
        }
    }

    /// Record one SCR sample, returns false when it was dropped
    pub fn sample(&mut self, dev_stc: u32, dev_sof: u16, host_sof: u16, host_time_ns: u64) -> bool {
        let dev_sof = dev_sof & SOF_MASK;
        let host_sof = host_sof & SOF_MASK;

        // The SCR is repeated in every payload of a (micro)frame
        if self.last_sof == Some(dev_sof) {
            return false;
        }
        self.last_sof = Some(dev_sof);

        let offset = *self.sof_offset.get_or_insert_with(|| {
            let delta = host_sof.wrapping_sub(dev_sof) & 0xff;
            let offset = if delta >= SOF_OFFSET_THRESHOLD { delta } else { 0 };
            debug!(
                "Clock: device SOF {} host SOF {}, using offset {}",
                dev_sof, host_sof, offset
            );
            offset
        });

        let sample = ClockSample {
            dev_stc,
            dev_sof: (dev_sof + offset) & SOF_MASK,
            host_sof,
            host_time_ns,
        };
        trace!("Clock sample {:?} in slot {}", sample, self.head);

        self.ring[self.head] = Some(sample);
        self.head = (self.head + 1) % CLOCK_SAMPLES;
        self.count = (self.count + 1).min(CLOCK_SAMPLES);
        true
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Offset applied to device SOF values, once estimated
    pub fn sof_offset(&self) -> Option<u16> {
        self.sof_offset
    }

    /// Samples from oldest to newest
    pub fn samples(&self) -> impl Iterator<Item = &ClockSample> {
        let start = (self.head + CLOCK_SAMPLES - self.count) % CLOCK_SAMPLES;
        (0..self.count).filter_map(move |i| self.ring[(start + i) % CLOCK_SAMPLES].as_ref())
    }

    /// Forget every sample and the SOF offset
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Host time of a device clock value, interpolated between the oldest and
    /// newest samples
    ///
    /// Device clock values wrap at 32 bits; values are taken relative to the
    /// oldest sample. Returns `None` until two samples with distinct STC values
    /// are available.
    pub fn estimate_host_time(&self, dev_stc: u32) -> Option<u64> {
        let first = self.samples().next()?;
        let last = self.samples().last()?;

        let stc_span = last.dev_stc.wrapping_sub(first.dev_stc) as i128;
        if stc_span == 0 {
            return None;
        }
        let host_span = last.host_time_ns as i128 - first.host_time_ns as i128;
        // Signed so that values slightly before the window extrapolate backwards
        let stc_delta = dev_stc.wrapping_sub(first.dev_stc) as i32 as i128;

        let host = first.host_time_ns as i128 + stc_delta * host_span / stc_span;
        u64::try_from(host).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_sof_dropped() {
        let mut clock = ClockRecovery::new();
        assert!(clock.sample(1000, 100, 100, 1_000));
        assert_eq!(clock.head(), 1);
        assert!(!clock.sample(2000, 100, 101, 2_000));
        assert_eq!(clock.head(), 1);
        assert_eq!(clock.len(), 1);
    }

    #[test]
    fn test_offset_estimated_once() {
        let mut clock = ClockRecovery::new();
        clock.sample(0, 2040, 20, 0);
        // (20 - 2040) mod 256 = 28
        assert_eq!(clock.sof_offset(), Some(28));
        assert_eq!(clock.samples().next().unwrap().dev_sof, 20);

        clock.sample(0, 5, 100, 0);
        assert_eq!(clock.sof_offset(), Some(28));
        assert_eq!(clock.samples().last().unwrap().dev_sof, 33);
    }

    #[test]
    fn test_small_delta_means_no_offset() {
        let mut clock = ClockRecovery::new();
        clock.sample(0, 100, 105, 0);
        assert_eq!(clock.sof_offset(), Some(0));
    }

    #[test]
    fn test_ring_wraps() {
        let mut clock = ClockRecovery::new();
        for i in 0..40u16 {
            clock.sample(i as u32, i, i, i as u64);
        }
        assert_eq!(clock.len(), CLOCK_SAMPLES);
        assert_eq!(clock.head(), 40 % CLOCK_SAMPLES);
        assert_eq!(clock.samples().next().unwrap().dev_stc, 8);
        assert_eq!(clock.samples().last().unwrap().dev_stc, 39);
    }

    #[test]
    fn test_estimate_host_time() {
        let mut clock = ClockRecovery::new();
        assert_eq!(clock.estimate_host_time(0), None);
        clock.sample(u32::MAX - 999, 1, 1, 1_000_000);
        clock.sample(1000, 2, 2, 3_000_000);

        // Midway across the wrap
        assert_eq!(clock.estimate_host_time(0), Some(2_000_000));
        assert_eq!(clock.estimate_host_time(1000), Some(3_000_000));
    }
}
