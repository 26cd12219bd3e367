//! Video streaming: interface parsing, negotiation, transfers and decoding

pub mod clock;
pub mod decode;
pub mod interface;
pub mod negotiate;
pub mod queue;
pub mod stream;

pub use clock::{CLOCK_SAMPLES, ClockRecovery, ClockSample};
pub use decode::{DecodeStats, Decoder, DecoderSettings, PayloadContext};
pub use interface::{AltSetting, StreamingInterface, bytes_per_interval};
pub use negotiate::{MAX_PROBE_ROUNDS, Negotiation, Negotiator};
pub use queue::{BufferInfo, BufferState, QueueEvent, QueueLease, QueuePool, VideoFrame, VideoQueue};
pub use stream::{StreamParams, StreamSettings, StreamState, VideoStream};
