//! Boundary to the host-controller transfer layer and enumeration
//!
//! The driver never talks to hardware directly. Class-specific control
//! requests go through [`ControlTransport`], streaming transfers through
//! [`TransferLayer`], and string descriptors through [`StringFetcher`].
//! Completions are delivered to a [`CompletionHandler`] exactly once per
//! submission, from whatever context the transfer layer runs its callbacks in.

use std::sync::Arc;
use uvc_protocol::constants::request_type;
use uvc_protocol::{Request, UsbError};

/// Class-specific request addressed to an entity or streaming interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassRequest {
    pub request: Request,
    /// Control selector, sent in the high byte of wValue
    pub selector: u8,
    /// Entity id, or 0 for streaming interface controls
    pub entity: u8,
    pub interface: u8,
}

impl ClassRequest {
    pub fn new(request: Request, selector: u8, entity: u8, interface: u8) -> Self {
        Self {
            request,
            selector,
            entity,
            interface,
        }
    }

    pub fn request_type(&self) -> u8 {
        if self.request.is_in() {
            request_type::CLASS_INTERFACE_IN
        } else {
            request_type::CLASS_INTERFACE_OUT
        }
    }

    pub fn value(&self) -> u16 {
        (self.selector as u16) << 8
    }

    pub fn index(&self) -> u16 {
        ((self.entity as u16) << 8) | self.interface as u16
    }
}

/// Synchronous class-specific control transfers on endpoint 0
pub trait ControlTransport: Send + Sync {
    /// Device-to-host request; returns the number of bytes received
    fn read(&self, request: &ClassRequest, buf: &mut [u8]) -> Result<usize, UsbError>;

    /// Host-to-device request
    fn write(&self, request: &ClassRequest, data: &[u8]) -> Result<(), UsbError>;
}

/// Read exactly `len` bytes; a short reply is a transport error
pub fn read_exact(
    transport: &dyn ControlTransport,
    request: &ClassRequest,
    len: usize,
) -> Result<Vec<u8>, UsbError> {
    let mut buf = vec![0u8; len];
    let got = transport.read(request, &mut buf)?;
    if got != len {
        return Err(UsbError::ShortTransfer {
            expected: len,
            actual: got,
        });
    }
    Ok(buf)
}

/// String descriptor lookup provided by enumeration
pub trait StringFetcher {
    fn string(&self, index: u8) -> Option<String>;
}

/// Fetcher for devices whose strings are unavailable
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStrings;

impl StringFetcher for NoStrings {
    fn string(&self, _index: u8) -> Option<String> {
        None
    }
}

/// Shape of one streaming transfer request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Isochronous { packets: usize, packet_size: usize },
    Bulk { length: usize },
}

/// One transfer slot of a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub slot: usize,
    pub endpoint: u8,
    pub kind: TransferKind,
}

impl TransferRequest {
    /// Total buffer size of the request
    pub fn length(&self) -> usize {
        match self.kind {
            TransferKind::Isochronous {
                packets,
                packet_size,
            } => packets * packet_size,
            TransferKind::Bulk { length } => length,
        }
    }
}

/// Result of one isochronous packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoPacket {
    pub status: Result<(), UsbError>,
    /// Received bytes (actual length)
    pub data: Vec<u8>,
}

impl IsoPacket {
    pub fn ok(data: Vec<u8>) -> Self {
        Self {
            status: Ok(()),
            data,
        }
    }

    pub fn lost(error: UsbError) -> Self {
        Self {
            status: Err(error),
            data: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionStatus {
    Completed,
    /// Cancelled through [`TransferLayer::cancel`] or endpoint shutdown
    Cancelled,
    Error(UsbError),
}

/// Completed transfer handed back to the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: CompletionStatus,
    /// Per-packet results for isochronous transfers
    pub packets: Vec<IsoPacket>,
    /// Received bytes for bulk transfers
    pub data: Vec<u8>,
    /// Buffer length of the original request
    pub requested: usize,
}

impl Completion {
    pub fn isochronous(packets: Vec<IsoPacket>) -> Self {
        Self {
            status: CompletionStatus::Completed,
            packets,
            data: Vec::new(),
            requested: 0,
        }
    }

    pub fn bulk(data: Vec<u8>, requested: usize) -> Self {
        Self {
            status: CompletionStatus::Completed,
            packets: Vec::new(),
            data,
            requested,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: CompletionStatus::Cancelled,
            packets: Vec::new(),
            data: Vec::new(),
            requested: 0,
        }
    }

    pub fn failed(error: UsbError) -> Self {
        Self {
            status: CompletionStatus::Error(error),
            packets: Vec::new(),
            data: Vec::new(),
            requested: 0,
        }
    }
}

/// Receives exactly one callback per submitted transfer
pub trait CompletionHandler: Send + Sync {
    fn on_complete(&self, slot: usize, completion: Completion);
}

/// Endpoint parameters needed to enable an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointConfig {
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

/// Host-controller transfer layer
pub trait TransferLayer: Send + Sync {
    fn submit(
        &self,
        request: &TransferRequest,
        handler: Arc<dyn CompletionHandler>,
    ) -> Result<(), UsbError>;

    /// Ask for a submitted transfer to be cancelled; its handler still runs once
    fn cancel(&self, endpoint: u8, slot: usize) -> Result<(), UsbError>;

    /// Current 11-bit USB frame number
    fn frame_number(&self) -> u16;

    fn enable_endpoint(&self, endpoint: &EndpointConfig) -> Result<(), UsbError>;

    fn disable_endpoint(&self, endpoint: u8) -> Result<(), UsbError>;

    /// SET_INTERFACE on the given interface
    fn set_interface(&self, interface: u8, alternate: u8) -> Result<(), UsbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_request_setup_fields() {
        let req = ClassRequest::new(Request::GetCur, 0x02, 3, 0);
        assert_eq!(req.request_type(), 0xa1);
        assert_eq!(req.value(), 0x0200);
        assert_eq!(req.index(), 0x0300);

        let req = ClassRequest::new(Request::SetCur, 0x01, 0, 1);
        assert_eq!(req.request_type(), 0x21);
        assert_eq!(req.index(), 0x0001);
    }

    #[test]
    fn test_request_length() {
        let req = TransferRequest {
            slot: 0,
            endpoint: 0x81,
            kind: TransferKind::Isochronous {
                packets: 32,
                packet_size: 3072,
            },
        };
        assert_eq!(req.length(), 32 * 3072);
    }
}
