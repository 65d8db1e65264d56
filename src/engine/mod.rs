//! Audio engine and media subsystem abstractions.
//!
//! The session controller only talks to these traits; `engine::alsa`
//! implements them over ALSA and V4L2. Test suites drive the controller with
//! in-test fakes instead.

pub mod alsa;
mod alsa_io;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{DecodeError, DeviceError, EngineError};

/// Handle for one scheduled playback source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    AudioInput,
    VideoInput,
}

/// Immutable snapshot of one capture device, refreshed on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: String,
    pub kind: DeviceKind,
    pub label: String,
}

/// Device ids requested for acquisition, chosen by the device catalog.
#[derive(Debug, Clone, Default)]
pub struct MediaConstraints {
    pub audio_device: Option<String>,
    pub video_device: Option<String>,
}

/// One fixed-size chunk of captured mono float samples in [-1, 1].
#[derive(Debug, Clone)]
pub struct CaptureChunk {
    pub samples: Vec<f32>,
}

/// A decoded, playable buffer.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    /// Duration in seconds on the output clock.
    pub fn duration(&self) -> f64 {
        let frames = self.samples.len() / self.channels.max(1) as usize;
        frames as f64 / self.sample_rate as f64
    }
}

/// A live media stream of stoppable tracks.
pub trait MediaTrack: Send {
    fn kind(&self) -> DeviceKind;
    fn stop(&mut self);
}

pub trait MediaStream: Send {
    fn tracks(&mut self) -> &mut [Box<dyn MediaTrack>];
    /// Device id backing the audio track, used to attach the capture tap.
    fn audio_device_id(&self) -> Option<&str>;
}

/// Device enumeration and acquisition.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Request transient capture permission, release it immediately, and
    /// list audio-input and video-input devices.
    async fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError>;

    /// Acquire a media stream for the constrained device ids.
    async fn acquire(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Box<dyn MediaStream>, DeviceError>;
}

/// Platform audio capability: contexts at a fixed sample rate, a fixed-size
/// capture tap, decode, and clock-scheduled playback with completion
/// notification.
pub trait AudioEngine: Send + Sync {
    fn create_input(&self, sample_rate: u32) -> Result<Box<dyn InputContext>, EngineError>;

    fn create_output(
        &self,
        sample_rate: u32,
        channels: u16,
        completions: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn OutputContext>, EngineError>;
}

pub trait InputContext: Send {
    /// Tap the stream in fixed-size chunks, delivering each chunk into the
    /// controller's event loop. The tap must never block on the receiver
    /// going away.
    fn attach_tap(
        &mut self,
        stream: &mut dyn MediaStream,
        chunk_frames: usize,
        chunks: mpsc::Sender<CaptureChunk>,
    ) -> Result<(), EngineError>;

    /// No-op if already closed.
    fn close(&mut self);
}

pub trait OutputContext: Send {
    /// Current time on the output clock, in seconds since the context was
    /// created.
    fn now(&self) -> f64;

    /// Decode an opaque payload into a playable buffer.
    fn decode(
        &self,
        payload: &[u8],
        sample_rate: u32,
        channels: u16,
    ) -> Result<AudioBuffer, DecodeError>;

    /// Schedule a buffer to start at `at` on the output clock. The returned
    /// handle is posted to the completion channel when playback finishes
    /// naturally.
    fn schedule(&mut self, buffer: AudioBuffer, at: f64) -> Result<SourceId, EngineError>;

    /// Force-stop one scheduled source. No completion is posted for it.
    fn stop_source(&mut self, id: SourceId);

    /// No-op if already closed.
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_duration_accounts_for_channels() {
        let mono = AudioBuffer {
            samples: vec![0.0; 24_000],
            sample_rate: 24_000,
            channels: 1,
        };
        assert!((mono.duration() - 1.0).abs() < 1e-9);

        let stereo = AudioBuffer {
            samples: vec![0.0; 24_000],
            sample_rate: 24_000,
            channels: 2,
        };
        assert!((stereo.duration() - 0.5).abs() < 1e-9);
    }
}
