//! Abstract duplex channel to the remote conversational session.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transcript::Speaker;

/// Default system instruction sent with the session descriptor.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a presentation coach. \
    The user is rehearsing a pitch. Listen, then give short spoken feedback \
    on clarity, pacing and structure.";

/// Fixed per-session configuration. The response modality (audio),
/// two-direction transcription and the PCM16 16 kHz / 24 kHz formats are
/// part of the wire contract and not represented here; see
/// [`crate::protocol::SetupMessage`].
#[derive(Debug, Clone)]
pub struct SessionDescriptor {
    pub system_instruction: String,
    pub voice: Option<String>,
}

impl Default for SessionDescriptor {
    fn default() -> Self {
        Self {
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            voice: None,
        }
    }
}

/// One outbound PCM16 frame. Ephemeral, not retained after send.
#[derive(Debug, Clone)]
pub struct OutboundAudioFrame {
    pub payload: Bytes,
}

/// One inbound audio payload, decoded immediately and not retained.
#[derive(Debug, Clone)]
pub struct InboundAudioChunk {
    pub payload: Bytes,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Asynchronous events delivered by the transport, in arrival order.
#[derive(Debug)]
pub enum TransportEvent {
    /// The remote confirmed the session is open.
    Ready {
        session_id: String,
        output_sample_rate: u32,
        output_channels: u16,
    },
    /// A partial transcription fragment for the current turn.
    Transcript { speaker: Speaker, text: String },
    /// The current turn finished.
    TurnComplete,
    /// Generated audio to schedule for playback.
    Audio(InboundAudioChunk),
    /// Mid-session failure reported by the remote.
    Error(String),
    /// The remote ended the session; a normal disconnect, not an error.
    Closed,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session with the fixed descriptor. Events flow into `events`
    /// until the link closes.
    async fn open(
        &self,
        descriptor: &SessionDescriptor,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn SessionLink>, TransportError>;
}

/// The open half-session. Outbound frames travel through it.
pub trait SessionLink: Send {
    /// Fire-and-forget: no acknowledgment, no retry. A congested link drops
    /// the frame rather than stalling the capture path.
    fn send_frame(&self, frame: OutboundAudioFrame);

    /// Best-effort close; never blocks on the outcome.
    fn close(&mut self);
}
