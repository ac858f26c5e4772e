//! Media engine boundary
//!
//! Traits the relay drives (pipelines, data channels, recordings, device
//! control) plus a loopback implementation used by the binary and the tests.

pub mod device;
pub mod error;
pub mod loopback;
pub mod pipeline;
pub mod source;

pub use device::{Control, DeviceControl, VirtualDevice};
pub use error::EngineError;
pub use loopback::{LoopbackEngine, SessionProbe};
pub use pipeline::{
    ChannelDirection, DataChannel, EngineEvent, IceCandidate, MediaEngine, PeerConnectionState,
    PipelineRole, ReceivePipeline, RecordingPipeline, SdpKind, SendPipeline,
};
pub use source::TestSource;
