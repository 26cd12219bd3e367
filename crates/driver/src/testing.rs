//! Scripted collaborators for tests
//!
//! [`MockCamera`] answers class-specific control requests from tables and
//! remembers SET_CUR values so that a following GET_CUR returns them.
//! [`MockTransferLayer`] records submissions and lets a test complete them
//! one by one; cancellation completes the transfer synchronously.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uvc_protocol::{Request, UsbError};

use crate::transport::{
    ClassRequest, Completion, CompletionHandler, ControlTransport, EndpointConfig, IsoPacket,
    TransferLayer, TransferRequest,
};

/// (interface, entity, selector)
type ControlKey = (u8, u8, u8);

type WriteHook = Box<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

#[derive(Default)]
struct CameraState {
    responses: HashMap<(ControlKey, Request), Vec<u8>>,
    current: HashMap<ControlKey, Vec<u8>>,
    failures: HashMap<(ControlKey, Request), UsbError>,
    hooks: HashMap<ControlKey, WriteHook>,
    log: Vec<ClassRequest>,
    writes: Vec<(ClassRequest, Vec<u8>)>,
}

/// Control endpoint of a fake camera
#[derive(Default)]
pub struct MockCamera {
    state: Mutex<CameraState>,
}

fn key(request: &ClassRequest) -> ControlKey {
    (request.interface, request.entity, request.selector)
}

impl MockCamera {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reply to `request` on a control
    pub fn set_response(&self, interface: u8, entity: u8, selector: u8, request: Request, data: &[u8]) {
        self.state
            .lock()
            .responses
            .insert(((interface, entity, selector), request), data.to_vec());
    }

    /// Value GET_CUR returns until the next SET_CUR
    pub fn set_current(&self, interface: u8, entity: u8, selector: u8, data: &[u8]) {
        self.state
            .lock()
            .current
            .insert((interface, entity, selector), data.to_vec());
    }

    pub fn current(&self, interface: u8, entity: u8, selector: u8) -> Option<Vec<u8>> {
        self.state.lock().current.get(&(interface, entity, selector)).cloned()
    }

    /// Make `request` on a control fail until cleared
    pub fn fail(&self, interface: u8, entity: u8, selector: u8, request: Request, error: UsbError) {
        self.state
            .lock()
            .failures
            .insert(((interface, entity, selector), request), error);
    }

    pub fn clear_failure(&self, interface: u8, entity: u8, selector: u8, request: Request) {
        self.state
            .lock()
            .failures
            .remove(&((interface, entity, selector), request));
    }

    /// Transform SET_CUR data before it is stored, as a device adjusting a
    /// probe would
    pub fn on_write<F>(&self, interface: u8, entity: u8, selector: u8, hook: F)
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        self.state
            .lock()
            .hooks
            .insert((interface, entity, selector), Box::new(hook));
    }

    pub fn requests(&self) -> Vec<ClassRequest> {
        self.state.lock().log.clone()
    }

    pub fn count(&self, request: Request) -> usize {
        self.state.lock().log.iter().filter(|r| r.request == request).count()
    }

    pub fn count_for(&self, entity: u8, selector: u8, request: Request) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|r| r.entity == entity && r.selector == selector && r.request == request)
            .count()
    }

    /// SET_CUR payloads in order
    pub fn writes(&self) -> Vec<(ClassRequest, Vec<u8>)> {
        self.state.lock().writes.clone()
    }

    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.log.clear();
        state.writes.clear();
    }
}

impl ControlTransport for MockCamera {
    fn read(&self, request: &ClassRequest, buf: &mut [u8]) -> Result<usize, UsbError> {
        let mut state = self.state.lock();
        state.log.push(*request);

        let k = key(request);
        if let Some(error) = state.failures.get(&(k, request.request)) {
            return Err(error.clone());
        }

        let data = match request.request {
            Request::GetCur => state
                .current
                .get(&k)
                .or_else(|| state.responses.get(&(k, Request::GetCur))),
            other => state.responses.get(&(k, other)),
        }
        .ok_or(UsbError::Pipe)?;

        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn write(&self, request: &ClassRequest, data: &[u8]) -> Result<(), UsbError> {
        let mut state = self.state.lock();
        state.log.push(*request);

        let k = key(request);
        if let Some(error) = state.failures.get(&(k, request.request)) {
            return Err(error.clone());
        }

        let stored = match state.hooks.get(&k) {
            Some(hook) => hook(data),
            None => data.to_vec(),
        };
        state.writes.push((*request, data.to_vec()));
        state.current.insert(k, stored);
        Ok(())
    }
}

struct Pending {
    request: TransferRequest,
    handler: Arc<dyn CompletionHandler>,
}

#[derive(Default)]
struct TransferState {
    pending: VecDeque<Pending>,
    submitted: usize,
    failing_submits: usize,
    submit_error: Option<UsbError>,
    hold_cancels: bool,
    held: Vec<Pending>,
    frame_number: u16,
    alternates: Vec<(u8, u8)>,
    enabled: Vec<EndpointConfig>,
    disabled: Vec<u8>,
}

/// Host controller stand-in
#[derive(Default)]
pub struct MockTransferLayer {
    state: Mutex<TransferState>,
}

impl MockTransferLayer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `count` submissions with `error`
    pub fn fail_submits(&self, count: usize, error: UsbError) {
        let mut state = self.state.lock();
        state.failing_submits = count;
        state.submit_error = Some(error);
    }

    /// Accept cancellations without completing the transfers
    pub fn hold_cancels(&self, hold: bool) {
        self.state.lock().hold_cancels = hold;
    }

    pub fn set_frame_number(&self, frame: u16) {
        self.state.lock().frame_number = frame & 0x7ff;
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn submitted(&self) -> usize {
        self.state.lock().submitted
    }

    /// Requests waiting for completion, oldest first
    pub fn pending_requests(&self) -> Vec<TransferRequest> {
        self.state.lock().pending.iter().map(|p| p.request.clone()).collect()
    }

    /// SET_INTERFACE calls as (interface, alternate)
    pub fn alternates(&self) -> Vec<(u8, u8)> {
        self.state.lock().alternates.clone()
    }

    pub fn enabled_endpoints(&self) -> Vec<EndpointConfig> {
        self.state.lock().enabled.clone()
    }

    pub fn disabled_endpoints(&self) -> Vec<u8> {
        self.state.lock().disabled.clone()
    }

    /// Complete the oldest pending transfer, returns false when none is
    /// pending
    ///
    /// The handler runs without the mock's lock held, so it may resubmit.
    pub fn complete_next(&self, completion: Completion) -> bool {
        let next = self.state.lock().pending.pop_front();
        match next {
            Some(pending) => {
                pending.handler.on_complete(pending.request.slot, completion);
                true
            }
            None => false,
        }
    }

    /// Complete the oldest transfer with one isochronous packet per payload
    pub fn complete_isochronous(&self, payloads: Vec<Vec<u8>>) -> bool {
        let packets = payloads.into_iter().map(IsoPacket::ok).collect();
        self.complete_next(Completion::isochronous(packets))
    }

    /// Complete the oldest transfer as a bulk transfer carrying `data`
    pub fn complete_bulk(&self, data: Vec<u8>) -> bool {
        let requested = match self.state.lock().pending.front() {
            Some(pending) => pending.request.length(),
            None => return false,
        };
        self.complete_next(Completion::bulk(data, requested))
    }

    /// Deliver the cancellations held back by [`Self::hold_cancels`]
    pub fn release_cancels(&self) -> usize {
        let held = std::mem::take(&mut self.state.lock().held);
        let count = held.len();
        for pending in held {
            pending.handler.on_complete(pending.request.slot, Completion::cancelled());
        }
        count
    }
}

impl TransferLayer for MockTransferLayer {
    fn submit(&self, request: &TransferRequest, handler: Arc<dyn CompletionHandler>) -> Result<(), UsbError> {
        let mut state = self.state.lock();
        if state.failing_submits > 0 {
            state.failing_submits -= 1;
            return Err(state.submit_error.clone().unwrap_or(UsbError::NoResources));
        }
        state.submitted += 1;
        state.pending.push_back(Pending {
            request: request.clone(),
            handler,
        });
        Ok(())
    }

    fn cancel(&self, endpoint: u8, slot: usize) -> Result<(), UsbError> {
        let cancelled = {
            let mut state = self.state.lock();
            let position = state
                .pending
                .iter()
                .position(|p| p.request.endpoint == endpoint && p.request.slot == slot);
            let Some(pending) = position.and_then(|i| state.pending.remove(i)) else {
                return Err(UsbError::InvalidParam);
            };
            if state.hold_cancels {
                state.held.push(pending);
                return Ok(());
            }
            pending
        };
        cancelled
            .handler
            .on_complete(cancelled.request.slot, Completion::cancelled());
        Ok(())
    }

    fn frame_number(&self) -> u16 {
        self.state.lock().frame_number
    }

    fn enable_endpoint(&self, endpoint: &EndpointConfig) -> Result<(), UsbError> {
        self.state.lock().enabled.push(*endpoint);
        Ok(())
    }

    fn disable_endpoint(&self, endpoint: u8) -> Result<(), UsbError> {
        self.state.lock().disabled.push(endpoint);
        Ok(())
    }

    fn set_interface(&self, interface: u8, alternate: u8) -> Result<(), UsbError> {
        self.state.lock().alternates.push((interface, alternate));
        Ok(())
    }
}
