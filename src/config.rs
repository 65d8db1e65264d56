//! Runtime configuration.
//!
//! Loaded from an optional `pitchcoach.toml` next to the binary, with
//! `PITCHCOACH_*` environment overrides. Every field has a default so an
//! empty environment still yields a usable config.

use std::path::Path;

use serde::Deserialize;

use crate::scheduler::DEFAULT_MAX_LOOKAHEAD;
use crate::transport::DEFAULT_SYSTEM_INSTRUCTION;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub link: LinkSettings,
    pub audio: AudioSettings,
    pub session: SessionSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    pub url: String,
    pub token: String,
    /// Stable per-install id sent as the Client-Id header. Generated and
    /// persisted on first run when empty.
    pub client_id: String,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            url: "wss://coach.pitchcoach.app/session".to_string(),
            token: String::new(),
            client_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// ALSA capture device opened when the selected catalog id is used.
    pub capture_device: String,
    /// ALSA playback device.
    pub playback_device: String,
    /// Capture tap chunk length in mono samples.
    pub chunk_frames: usize,
    /// Desired ALSA playback period size in frames (0 = let ALSA decide).
    pub playback_period_frames: usize,
    /// Maximum seconds of audio buffered ahead of real time.
    pub max_lookahead_secs: f64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            capture_device: "default".to_string(),
            playback_device: "default".to_string(),
            chunk_frames: 4096,
            playback_period_frames: 1024,
            max_lookahead_secs: DEFAULT_MAX_LOOKAHEAD,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub system_instruction: String,
    pub voice: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            voice: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("pitchcoach").required(false))
            .add_source(config::Environment::with_prefix("PITCHCOACH").separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()
    }
}
