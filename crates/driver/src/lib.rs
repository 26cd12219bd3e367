//! USB Video Class function driver
//!
//! Binds to a device whose configuration carries a video interface
//! collection and exposes it as:
//!
//! - an entity graph and the video chains built from it ([`entity`], [`chain`])
//! - a registry of camera and processing unit controls ([`control`])
//! - one [`VideoStream`] per streaming interface, which negotiates a format,
//!   drives transfers through the host controller and reassembles frames
//!   into a queue ([`streaming`])
//!
//! Hardware access goes through the traits in [`transport`]; enumeration
//! hands over a [`DeviceDescription`] and [`UvcDevice::attach`] does the rest.

pub mod chain;
pub mod control;
pub mod device;
pub mod entity;
pub mod quirks;
pub mod streaming;
pub mod testing;
pub mod transport;

pub use chain::{Chain, TopologyError, scan_chain, scan_chains};
pub use control::{ControlDescription, ControlId, ControlRegistry};
pub use device::{DeviceDescription, EndpointDescription, InterfaceDescription, UvcDevice};
pub use entity::{ControlInterface, Entity, EntityArena, EntityKind, parse_control_interface};
pub use quirks::quirks_for;
pub use streaming::{
    DecodeStats, QueueEvent, QueuePool, StreamSettings, StreamState, StreamingInterface, VideoFrame,
    VideoQueue, VideoStream,
};
pub use transport::{ClassRequest, CompletionHandler, ControlTransport, StringFetcher, TransferLayer};
