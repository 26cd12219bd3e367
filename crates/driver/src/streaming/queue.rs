//! Video buffer queues
//!
//! A [`VideoQueue`] owns a fixed set of buffers cycling through
//!
//! ```text
//! Idle -> Queued -> Active -> Ready -> Done -> Idle
//!                      \        \
//!                       +--------+--> Error -> Done
//! ```
//!
//! The consumer queues empty buffers and dequeues completed ones; the decoder
//! takes queued buffers, fills them and completes them. Every completed
//! buffer is announced on the queue's event channel.
//!
//! Queues are checked out of a [`QueuePool`] shared by all streams of the
//! driver and given back automatically when the [`QueueLease`] drops.

use async_channel::{Receiver, Sender};
use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};
use uvc_common::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BufferState {
    /// Owned by the consumer, not available to the decoder
    Idle,
    /// Waiting for the decoder
    Queued,
    /// Being filled
    Active,
    /// Complete, waiting to be dequeued
    Ready,
    /// Complete but failed validation
    Error,
    /// Dequeued by the consumer
    Done,
}

/// Snapshot of a buffer's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferInfo {
    pub index: usize,
    pub state: BufferState,
    pub capacity: usize,
    pub bytes_used: usize,
    pub error: bool,
    pub sequence: u32,
    /// Host time of the first payload, in nanoseconds
    pub timestamp_ns: u64,
    pub pts: Option<u32>,
}

/// Completed frame handed to the consumer
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub index: usize,
    pub data: Bytes,
    pub error: bool,
    pub sequence: u32,
    pub timestamp_ns: u64,
    pub pts: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    FrameReady {
        index: usize,
        sequence: u32,
        bytes_used: usize,
        error: bool,
    },
    /// The device went away; no further frames will arrive
    Disconnected,
}

/// Result of appending payload data to a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Append {
    pub copied: usize,
    /// Data was truncated because the buffer is full
    pub overflow: bool,
}

/// What happened to a buffer handed back by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Delivered(BufferState),
    /// Errored buffer recycled to the front of the queue
    Recycled,
}

#[derive(Debug)]
struct Buffer {
    state: BufferState,
    data: Vec<u8>,
    bytes_used: usize,
    error: bool,
    sequence: u32,
    timestamp_ns: u64,
    pts: Option<u32>,
}

impl Buffer {
    fn new(capacity: usize) -> Self {
        Self {
            state: BufferState::Idle,
            data: vec![0; capacity],
            bytes_used: 0,
            error: false,
            sequence: 0,
            timestamp_ns: 0,
            pts: None,
        }
    }

    fn clear(&mut self) {
        self.bytes_used = 0;
        self.error = false;
        self.pts = None;
        self.timestamp_ns = 0;
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    buffers: Vec<Buffer>,
    queued: VecDeque<usize>,
    ready: VecDeque<usize>,
    sequence: u32,
    disconnected: bool,
}

impl QueueInner {
    fn buffer(&mut self, index: usize) -> Result<&mut Buffer> {
        let count = self.buffers.len();
        self.buffers
            .get_mut(index)
            .ok_or_else(|| Error::OutOfRange(format!("buffer {} of {}", index, count)))
    }
}

pub struct VideoQueue {
    id: usize,
    inner: Mutex<QueueInner>,
    lock_timeout: Duration,
    events_tx: Sender<QueueEvent>,
    events_rx: Receiver<QueueEvent>,
}

impl std::fmt::Debug for VideoQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoQueue").field("id", &self.id).finish_non_exhaustive()
    }
}

impl VideoQueue {
    pub fn new(id: usize, lock_timeout: Duration) -> Self {
        let (events_tx, events_rx) = async_channel::unbounded();
        Self {
            id,
            inner: Mutex::new(QueueInner::default()),
            lock_timeout,
            events_tx,
            events_rx,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueInner>> {
        self.inner
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| Error::Timeout(format!("queue {} lock", self.id)))
    }

    /// Completion notifications; `recv().await` or `recv_blocking()`
    pub fn events(&self) -> Receiver<QueueEvent> {
        self.events_rx.clone()
    }

    fn publish(&self, event: QueueEvent) {
        // Unbounded, fails only when every receiver is gone
        let _ = self.events_tx.try_send(event);
    }

    /// Replace every buffer with `count` fresh ones of `capacity` bytes
    pub fn allocate(&self, count: usize, capacity: usize) -> Result<()> {
        let mut inner = self.lock()?;
        if inner
            .buffers
            .iter()
            .any(|b| matches!(b.state, BufferState::Active))
        {
            return Err(Error::state_violation("allocate buffers", "streaming"));
        }
        inner.buffers = (0..count).map(|_| Buffer::new(capacity)).collect();
        inner.queued.clear();
        inner.ready.clear();
        inner.sequence = 0;
        inner.disconnected = false;
        debug!(
            "Queue {}: allocated {} buffers of {} bytes",
            self.id, count, capacity
        );
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.buffers.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.buffers.is_empty())
    }

    /// Hand an idle or dequeued buffer to the decoder
    pub fn queue_buffer(&self, index: usize) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.disconnected {
            return Err(Error::Disconnected);
        }
        let buf = inner.buffer(index)?;
        match buf.state {
            BufferState::Idle | BufferState::Done => {
                buf.state = BufferState::Queued;
                buf.clear();
                inner.queued.push_back(index);
                trace!("Queue {}: buffer {} queued", self.id, index);
                Ok(())
            }
            state => Err(Error::state_violation("queue buffer", format!("{:?}", state))),
        }
    }

    /// Queue every idle buffer
    pub fn queue_all(&self) -> Result<usize> {
        let count = self.len()?;
        let mut queued = 0;
        for index in 0..count {
            if self.queue_buffer(index).is_ok() {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Oldest completed buffer, if any; the buffer moves to `Done`
    pub fn dequeue(&self) -> Result<Option<VideoFrame>> {
        let mut inner = self.lock()?;
        let Some(index) = inner.ready.pop_front() else {
            return Ok(None);
        };
        let buf = inner.buffer(index)?;
        buf.state = BufferState::Done;
        Ok(Some(VideoFrame {
            index,
            data: Bytes::copy_from_slice(&buf.data[..buf.bytes_used]),
            error: buf.error,
            sequence: buf.sequence,
            timestamp_ns: buf.timestamp_ns,
            pts: buf.pts,
        }))
    }

    /// Return a dequeued buffer to `Idle` without queueing it
    pub fn release(&self, index: usize) -> Result<()> {
        let mut inner = self.lock()?;
        let buf = inner.buffer(index)?;
        match buf.state {
            BufferState::Done | BufferState::Idle => {
                buf.state = BufferState::Idle;
                Ok(())
            }
            state => Err(Error::state_violation("release buffer", format!("{:?}", state))),
        }
    }

    pub fn info(&self, index: usize) -> Result<BufferInfo> {
        let mut inner = self.lock()?;
        let buf = inner.buffer(index)?;
        Ok(BufferInfo {
            index,
            state: buf.state,
            capacity: buf.data.len(),
            bytes_used: buf.bytes_used,
            error: buf.error,
            sequence: buf.sequence,
            timestamp_ns: buf.timestamp_ns,
            pts: buf.pts,
        })
    }

    /// Next buffer for the decoder, still in `Queued` state
    pub fn take_next(&self) -> Result<Option<usize>> {
        let mut inner = self.lock()?;
        if inner.disconnected {
            return Ok(None);
        }
        Ok(inner.queued.pop_front())
    }

    /// Start filling a taken buffer
    pub fn activate(&self, index: usize, timestamp_ns: u64, pts: Option<u32>) -> Result<()> {
        let mut inner = self.lock()?;
        let sequence = inner.sequence;
        let buf = inner.buffer(index)?;
        if buf.state != BufferState::Queued {
            return Err(Error::state_violation("activate buffer", format!("{:?}", buf.state)));
        }
        buf.state = BufferState::Active;
        buf.clear();
        buf.sequence = sequence;
        buf.timestamp_ns = timestamp_ns;
        buf.pts = pts;
        Ok(())
    }

    pub fn state(&self, index: usize) -> Result<BufferState> {
        Ok(self.lock()?.buffer(index)?.state)
    }

    pub fn bytes_used(&self, index: usize) -> Result<usize> {
        Ok(self.lock()?.buffer(index)?.bytes_used)
    }

    /// Copy as much of `data` as fits; a full buffer becomes `Ready` with the
    /// error flag set
    pub fn append(&self, index: usize, data: &[u8]) -> Result<Append> {
        let mut inner = self.lock()?;
        let buf = inner.buffer(index)?;
        if buf.state != BufferState::Active {
            return Err(Error::state_violation("append to buffer", format!("{:?}", buf.state)));
        }

        let room = buf.data.len() - buf.bytes_used;
        let copied = data.len().min(room);
        let start = buf.bytes_used;
        buf.data[start..start + copied].copy_from_slice(&data[..copied]);
        buf.bytes_used += copied;

        let overflow = copied < data.len();
        if overflow {
            debug!(
                "Queue {}: frame overflow in buffer {}, {} bytes dropped",
                self.id,
                index,
                data.len() - copied
            );
            buf.error = true;
            buf.state = BufferState::Ready;
        }
        Ok(Append { copied, overflow })
    }

    /// Flag the buffer as corrupted
    pub fn mark_error(&self, index: usize) -> Result<()> {
        self.lock()?.buffer(index)?.error = true;
        Ok(())
    }

    /// Mark an active buffer `Ready` without completing it
    pub fn mark_ready(&self, index: usize) -> Result<()> {
        let mut inner = self.lock()?;
        let buf = inner.buffer(index)?;
        if buf.state == BufferState::Active {
            buf.state = BufferState::Ready;
        }
        Ok(())
    }

    /// Hand a filled buffer to the consumer
    ///
    /// With `expected_size` set the payload must fill exactly that many bytes,
    /// otherwise the buffer moves to `Error`. Errored buffers are put back at
    /// the head of the queue when `drop_corrupted` is set.
    pub fn complete(&self, index: usize, expected_size: Option<usize>, drop_corrupted: bool) -> Result<Completion> {
        let mut inner = self.lock()?;
        let id = self.id;
        let buf = inner.buffer(index)?;
        if !matches!(buf.state, BufferState::Active | BufferState::Ready) {
            return Err(Error::state_violation("complete buffer", format!("{:?}", buf.state)));
        }

        buf.state = BufferState::Ready;
        if let Some(expected) = expected_size {
            if buf.bytes_used != expected {
                debug!(
                    "Queue {}: buffer {} holds {} bytes, expected {}",
                    id, index, buf.bytes_used, expected
                );
                buf.error = true;
                buf.state = BufferState::Error;
            }
        }

        if buf.error && drop_corrupted {
            trace!("Queue {}: dropping corrupted buffer {}", id, index);
            buf.clear();
            buf.state = BufferState::Queued;
            inner.queued.push_front(index);
            return Ok(Completion::Recycled);
        }

        let state = buf.state;
        let event = QueueEvent::FrameReady {
            index,
            sequence: buf.sequence,
            bytes_used: buf.bytes_used,
            error: buf.error,
        };
        inner.ready.push_back(index);
        inner.sequence = inner.sequence.wrapping_add(1);
        drop(inner);

        self.publish(event);
        Ok(Completion::Delivered(state))
    }

    /// Give every buffer back to the consumer and drop pending frames
    pub fn reset(&self) -> Result<()> {
        let mut inner = self.lock()?;
        for buf in &mut inner.buffers {
            buf.state = BufferState::Idle;
            buf.clear();
        }
        inner.queued.clear();
        inner.ready.clear();
        inner.disconnected = false;
        drop(inner);

        // Stale notifications must not reach the next user
        while self.events_rx.try_recv().is_ok() {}
        Ok(())
    }

    /// Refuse further buffers and wake up consumers
    pub fn disconnect(&self) {
        match self.lock() {
            Ok(mut inner) => {
                inner.disconnected = true;
                inner.queued.clear();
            }
            Err(e) => warn!("Queue {}: cannot mark disconnected: {}", self.id, e),
        }
        self.publish(QueueEvent::Disconnected);
    }

    pub fn is_disconnected(&self) -> Result<bool> {
        Ok(self.lock()?.disconnected)
    }
}

/// Fixed set of queues shared by every stream of the driver
#[derive(Debug)]
pub struct QueuePool {
    queues: Vec<Arc<VideoQueue>>,
    in_use: Mutex<Vec<bool>>,
    lock_timeout: Duration,
}

impl QueuePool {
    pub fn new(size: usize, lock_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            queues: (0..size)
                .map(|id| Arc::new(VideoQueue::new(id, lock_timeout)))
                .collect(),
            in_use: Mutex::new(vec![false; size]),
            lock_timeout,
        })
    }

    pub fn size(&self) -> usize {
        self.queues.len()
    }

    pub fn available(&self) -> Result<usize> {
        let in_use = self
            .in_use
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| Error::Timeout("queue pool lock".into()))?;
        Ok(in_use.iter().filter(|used| !**used).count())
    }

    /// Claim a free queue
    pub fn checkout(self: &Arc<Self>) -> Result<QueueLease> {
        let mut in_use = self
            .in_use
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| Error::Timeout("queue pool lock".into()))?;

        let slot = in_use
            .iter()
            .position(|used| !used)
            .ok_or_else(|| Error::ResourceExhausted(format!("all {} queues in use", self.queues.len())))?;
        in_use[slot] = true;
        debug!("Checked out queue {}", slot);

        Ok(QueueLease {
            pool: Arc::clone(self),
            queue: Arc::clone(&self.queues[slot]),
        })
    }

    fn give_back(&self, id: usize) {
        let Some(mut in_use) = self.in_use.try_lock_for(self.lock_timeout) else {
            warn!("Queue pool lock timed out, queue {} stays checked out", id);
            return;
        };
        if let Some(used) = in_use.get_mut(id) {
            *used = false;
            debug!("Returned queue {}", id);
        }
    }
}

/// A queue checked out of the pool, returned on drop
#[derive(Debug)]
pub struct QueueLease {
    pool: Arc<QueuePool>,
    queue: Arc<VideoQueue>,
}

impl QueueLease {
    pub fn queue(&self) -> &Arc<VideoQueue> {
        &self.queue
    }
}

impl Drop for QueueLease {
    fn drop(&mut self) {
        if let Err(e) = self.queue.reset() {
            warn!("Queue {}: reset on return failed: {}", self.queue.id(), e);
        }
        self.pool.give_back(self.queue.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(count: usize, capacity: usize) -> VideoQueue {
        let queue = VideoQueue::new(0, Duration::from_millis(100));
        queue.allocate(count, capacity).unwrap();
        queue
    }

    #[test]
    fn test_buffer_cycle() {
        let q = queue(2, 16);
        q.queue_buffer(0).unwrap();
        assert_eq!(q.state(0).unwrap(), BufferState::Queued);

        let index = q.take_next().unwrap().unwrap();
        q.activate(index, 42, Some(7)).unwrap();
        q.append(index, &[1, 2, 3]).unwrap();
        assert_eq!(
            q.complete(index, None, false).unwrap(),
            Completion::Delivered(BufferState::Ready)
        );
        assert_eq!(
            q.events().try_recv().unwrap(),
            QueueEvent::FrameReady {
                index: 0,
                sequence: 0,
                bytes_used: 3,
                error: false
            }
        );

        let frame = q.dequeue().unwrap().unwrap();
        assert_eq!(&frame.data[..], &[1, 2, 3]);
        assert_eq!(frame.timestamp_ns, 42);
        assert_eq!(frame.pts, Some(7));
        assert_eq!(q.state(0).unwrap(), BufferState::Done);

        q.queue_buffer(0).unwrap();
        assert_eq!(q.bytes_used(0).unwrap(), 0);
    }

    #[test]
    fn test_overflow_truncates() {
        let q = queue(1, 4);
        q.queue_buffer(0).unwrap();
        q.take_next().unwrap();
        q.activate(0, 0, None).unwrap();

        let append = q.append(0, &[9; 6]).unwrap();
        assert_eq!(append, Append { copied: 4, overflow: true });
        let info = q.info(0).unwrap();
        assert_eq!(info.state, BufferState::Ready);
        assert_eq!(info.bytes_used, 4);
        assert!(info.error);
    }

    #[test]
    fn test_size_mismatch_and_drop_policy() {
        let q = queue(1, 8);
        q.queue_buffer(0).unwrap();
        q.take_next().unwrap();
        q.activate(0, 0, None).unwrap();
        q.append(0, &[0; 5]).unwrap();
        assert_eq!(
            q.complete(0, Some(8), false).unwrap(),
            Completion::Delivered(BufferState::Error)
        );
        assert!(q.dequeue().unwrap().unwrap().error);

        q.queue_buffer(0).unwrap();
        q.take_next().unwrap();
        q.activate(0, 0, None).unwrap();
        q.append(0, &[0; 5]).unwrap();
        assert_eq!(q.complete(0, Some(8), true).unwrap(), Completion::Recycled);
        assert_eq!(q.state(0).unwrap(), BufferState::Queued);
        assert_eq!(q.take_next().unwrap(), Some(0));
    }

    #[test]
    fn test_illegal_transitions() {
        let q = queue(1, 8);
        assert!(matches!(q.activate(0, 0, None), Err(Error::StateViolation { .. })));
        q.queue_buffer(0).unwrap();
        assert!(matches!(q.queue_buffer(0), Err(Error::StateViolation { .. })));
        assert!(matches!(q.queue_buffer(5), Err(Error::OutOfRange(_))));
    }

    #[test]
    fn test_pool_checkout_and_return() {
        let pool = QueuePool::new(2, Duration::from_millis(100));
        let a = pool.checkout().unwrap();
        let b = pool.checkout().unwrap();
        assert_ne!(a.queue().id(), b.queue().id());
        assert!(matches!(pool.checkout(), Err(Error::ResourceExhausted(_))));

        drop(a);
        assert_eq!(pool.available().unwrap(), 1);
        let c = pool.checkout().unwrap();
        assert_ne!(c.queue().id(), b.queue().id());
    }

    #[test]
    fn test_return_gives_up_on_held_pool_lock() {
        let pool = QueuePool::new(1, Duration::from_millis(10));
        let lease = pool.checkout().unwrap();

        let guard = pool.in_use.lock();
        drop(lease);
        drop(guard);

        assert_eq!(pool.available().unwrap(), 0);
    }
}
