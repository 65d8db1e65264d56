use std::sync::Arc;

use tokio::signal;
use tracing::{info, warn};
use uuid::Uuid;

use pitchcoach::config::Config;
use pitchcoach::controller::{ControllerConfig, SessionController, SessionEvent};
use pitchcoach::engine::alsa::{AlsaEngine, AlsaMediaDevices};
use pitchcoach::live_link::{LinkConfig, LiveTransport};
use pitchcoach::transcript::{Speaker, TranscriptEntry};
use pitchcoach::transport::SessionDescriptor;

const CLIENT_ID_FILE: &str = "pitchcoach_client_id";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut config = Config::load()?;

    // Keep the Client-Id stable across restarts: read it from a local file,
    // generating and saving a fresh one on first run.
    if config.link.client_id.is_empty() {
        if let Ok(content) = std::fs::read_to_string(CLIENT_ID_FILE) {
            let trimmed = content.trim();
            if !trimmed.is_empty() {
                config.link.client_id = trimmed.to_string();
            }
        }
    }
    if config.link.client_id.is_empty() {
        config.link.client_id = Uuid::new_v4().to_string();
        if let Err(e) = std::fs::write(CLIENT_ID_FILE, &config.link.client_id) {
            warn!("failed to persist client id: {e}");
        }
    }

    let engine = Arc::new(AlsaEngine::new(config.audio.clone()));
    let media = Arc::new(AlsaMediaDevices::new(config.audio.clone()));
    let transport = Arc::new(LiveTransport::new(LinkConfig {
        url: config.link.url.clone(),
        token: config.link.token.clone(),
        client_id: config.link.client_id.clone(),
    }));

    let controller_config = ControllerConfig {
        descriptor: SessionDescriptor {
            system_instruction: config.session.system_instruction.clone(),
            voice: config.session.voice.clone(),
        },
        chunk_frames: config.audio.chunk_frames,
        max_lookahead: config.audio.max_lookahead_secs,
    };
    let (handle, mut events) = SessionController::spawn(engine, media, transport, controller_config);

    handle.refresh_devices();
    handle.start();
    info!("pitchcoach started, press Ctrl+C to stop");

    let mut transcript: Vec<TranscriptEntry> = Vec::new();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("shutting down");
                handle.stop();
                handle.shutdown();
                break;
            }
            event = events.recv() => {
                match event {
                    Some(SessionEvent::Status(status)) => info!("session status: {status:?}"),
                    Some(SessionEvent::Transcript(entry)) => {
                        let who = match entry.speaker {
                            Speaker::Local => "you",
                            Speaker::Remote => "coach",
                        };
                        println!("{who}: {}", entry.text);
                        transcript.push(entry);
                    }
                    Some(SessionEvent::TranscriptCleared) => transcript.clear(),
                    Some(SessionEvent::ErrorCleared) => {}
                    Some(SessionEvent::Error(message)) => warn!("session error: {message}"),
                    Some(SessionEvent::Devices(devices)) => {
                        for device in &devices {
                            info!("device {:?} '{}' ({})", device.kind, device.label, device.id);
                        }
                    }
                    None => break,
                }
            }
        }
    }

    info!("session ended with {} transcript entries", transcript.len());
    Ok(())
}
