//! Wire protocol for the remote coaching session.
//!
//! The client sends one JSON `setup` text message after connecting, then raw
//! binary PCM16 frames. The server answers with JSON signalling (`ready`,
//! `transcript`, `turn_complete`, `error`) plus binary audio payloads, and
//! closes the socket to end the session.

use serde::{Deserialize, Serialize};

use crate::pcm;
use crate::transport::SessionDescriptor;

pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    fn pcm16(sample_rate: u32) -> Self {
        Self {
            encoding: "pcm16".to_string(),
            sample_rate,
            channels: pcm::WIRE_CHANNELS,
        }
    }
}

/// First message on the socket. Everything except the instruction and voice
/// is fixed: audio response modality, transcription on both directions, and
/// the PCM16 16 kHz in / 24 kHz out formats.
#[derive(Debug, Serialize)]
pub struct SetupMessage {
    #[serde(rename = "type")]
    msg_type: &'static str,
    pub version: u8,
    pub system_instruction: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    pub response_modality: &'static str,
    pub input_transcription: bool,
    pub output_transcription: bool,
    pub input_format: AudioFormat,
    pub output_format: AudioFormat,
}

impl SetupMessage {
    pub fn new(descriptor: &SessionDescriptor) -> Self {
        Self {
            msg_type: "setup",
            version: PROTOCOL_VERSION,
            system_instruction: descriptor.system_instruction.clone(),
            voice: descriptor.voice.clone(),
            response_modality: "audio",
            input_transcription: true,
            output_transcription: true,
            input_format: AudioFormat::pcm16(pcm::CAPTURE_SAMPLE_RATE),
            output_format: AudioFormat::pcm16(pcm::PLAYBACK_SAMPLE_RATE),
        }
    }
}

/// Any JSON text message from the server. Fields are optional because each
/// message type carries a different subset.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub session_id: Option<String>,
    /// "user" or "coach", on `transcript` messages.
    pub role: Option<String>,
    pub text: Option<String>,
    /// Human-readable description on `error` messages.
    pub message: Option<String>,
    /// Effective output params on `ready` messages.
    pub audio_params: Option<AudioFormat>,
}
