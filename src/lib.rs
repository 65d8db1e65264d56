pub mod capture;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod live_link;
pub mod pcm;
pub mod protocol;
pub mod scheduler;
pub mod transcript;
pub mod transport;

pub use capture::CapturePipeline;
pub use catalog::DeviceCatalog;
pub use config::Config;
pub use controller::{
    ConnectionStatus, ControllerConfig, ControllerHandle, SessionController, SessionEvent,
};
pub use engine::{
    AudioBuffer, AudioEngine, CaptureChunk, DeviceDescriptor, DeviceKind, InputContext,
    MediaConstraints, MediaDevices, MediaStream, MediaTrack, OutputContext, SourceId,
};
pub use error::{DecodeError, DeviceError, EngineError, SessionError, TransportError};
pub use live_link::{LinkConfig, LiveTransport};
pub use scheduler::PlaybackScheduler;
pub use transcript::{Speaker, TranscriptAggregator, TranscriptEntry};
pub use transport::{
    InboundAudioChunk, OutboundAudioFrame, SessionDescriptor, SessionLink, Transport,
    TransportEvent,
};
