//! Error types for pitchcoach.

use thiserror::Error;

/// Device enumeration and acquisition failures.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("capture permission denied: {0}")]
    PermissionDenied(String),

    #[error("no capture device found")]
    NoDeviceFound,

    #[error("failed to acquire device '{device}': {message}")]
    Acquisition { device: String, message: String },
}

/// Remote session failures.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to open session: {0}")]
    Open(String),

    #[error("session link failed: {0}")]
    Link(String),
}

/// Audio engine failures.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to create audio context: {0}")]
    Context(String),

    #[error("failed to attach capture tap: {0}")]
    Tap(String),

    #[error("failed to schedule playback: {0}")]
    Schedule(String),
}

/// Malformed inbound audio payload. Non-fatal: the chunk is dropped and
/// logged, connection state is unaffected.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty audio payload")]
    EmptyPayload,

    #[error("truncated audio payload ({len} bytes)")]
    TruncatedPayload { len: usize },

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),
}

/// The fatal funnel. Every error that ends a session goes through this type
/// and the controller's single error path, which completes full teardown
/// before surfacing a message.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
