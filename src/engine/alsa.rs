//! ALSA implementation of the audio engine and media subsystem.
//!
//! Capture and playback each run on a dedicated named OS thread, never on
//! tokio tasks: real-time audio I/O must not contend with async network
//! work. The threads deliver capture chunks and playback completions into
//! the controller's event loop through channels and are the only code that
//! touches the PCM devices.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use alsa::device_name::HintIter;
use alsa::pcm::PCM;
use alsa::Direction;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::alsa_io::{self, PcmHandle};
use super::{
    AudioBuffer, AudioEngine, CaptureChunk, DeviceDescriptor, DeviceKind, InputContext,
    MediaConstraints, MediaDevices, MediaStream, MediaTrack, OutputContext, SourceId,
};
use crate::config::AudioSettings;
use crate::error::{DecodeError, DeviceError, EngineError};
use crate::pcm;

pub struct AlsaEngine {
    settings: AudioSettings,
}

impl AlsaEngine {
    pub fn new(settings: AudioSettings) -> Self {
        Self { settings }
    }
}

impl AudioEngine for AlsaEngine {
    fn create_input(&self, sample_rate: u32) -> Result<Box<dyn InputContext>, EngineError> {
        Ok(Box::new(AlsaInput {
            sample_rate,
            running: Arc::new(AtomicBool::new(true)),
            handle: None,
        }))
    }

    fn create_output(
        &self,
        sample_rate: u32,
        channels: u16,
        completions: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn OutputContext>, EngineError> {
        let handle = alsa_io::open_playback(
            &self.settings.playback_device,
            sample_rate,
            channels as u32,
            (self.settings.playback_period_frames > 0)
                .then_some(self.settings.playback_period_frames),
        )
        .map_err(|e| EngineError::Context(e.to_string()))?;

        let clock = Instant::now();
        let cancelled = Arc::new(Mutex::new(HashSet::new()));
        let running = Arc::new(AtomicBool::new(true));
        let (cmd_tx, cmd_rx) = std_mpsc::channel();

        let thread_handle = {
            let cancelled = cancelled.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("audio-play".into())
                .spawn(move || {
                    if let Err(e) = play_thread(handle, cmd_rx, completions, cancelled, running, clock)
                    {
                        warn!("playback thread error: {e}");
                    }
                })
                .map_err(|e| EngineError::Context(e.to_string()))?
        };

        Ok(Box::new(AlsaOutput {
            clock,
            cmd_tx: Some(cmd_tx),
            cancelled,
            running,
            next_id: 0,
            handle: Some(thread_handle),
        }))
    }
}

// ======================== Capture ========================

pub struct AlsaInput {
    sample_rate: u32,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl InputContext for AlsaInput {
    fn attach_tap(
        &mut self,
        stream: &mut dyn MediaStream,
        chunk_frames: usize,
        chunks: mpsc::Sender<CaptureChunk>,
    ) -> Result<(), EngineError> {
        if self.handle.is_some() {
            return Err(EngineError::Tap("capture tap already attached".into()));
        }
        let device = stream
            .audio_device_id()
            .ok_or_else(|| EngineError::Tap("media stream has no audio track".into()))?
            .to_string();

        let running = self.running.clone();
        let wire_rate = self.sample_rate;
        let handle = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                if let Err(e) = capture_thread(&device, wire_rate, chunk_frames, chunks, &running) {
                    warn!("capture thread error: {e}");
                }
            })
            .map_err(|e| EngineError::Tap(e.to_string()))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AlsaInput {
    fn drop(&mut self) {
        self.close();
    }
}

fn capture_thread(
    device: &str,
    wire_rate: u32,
    chunk_frames: usize,
    chunks: mpsc::Sender<CaptureChunk>,
    running: &AtomicBool,
) -> anyhow::Result<()> {
    let handle = alsa_io::open_capture(device, wire_rate, 1)?;
    let channels = handle.channels as usize;
    let mut read_buf = vec![0i16; handle.period_frames * channels];
    let mut accum: Vec<f32> = Vec::with_capacity(chunk_frames * 2);
    let io = handle.pcm.io_i16()?;

    info!(
        "capture started: device={device} rate={} channels={channels} chunk={chunk_frames}",
        handle.rate
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                let mono = alsa_io::downmix_to_mono(&read_buf[..frames * channels], channels);
                accum.extend(alsa_io::resample_linear(&mono, handle.rate, wire_rate));
                while accum.len() >= chunk_frames {
                    let samples: Vec<f32> = accum.drain(..chunk_frames).collect();
                    if chunks.blocking_send(CaptureChunk { samples }).is_err() {
                        // Receiver dropped: the session is gone.
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                warn!("alsa capture error: {e}, recovering");
                handle.pcm.prepare()?;
            }
        }
    }

    info!("capture stopped");
    Ok(())
}

// ======================== Playback ========================

enum PlayCommand {
    Play {
        id: SourceId,
        buffer: AudioBuffer,
        at: f64,
    },
}

pub struct AlsaOutput {
    clock: Instant,
    cmd_tx: Option<std_mpsc::Sender<PlayCommand>>,
    cancelled: Arc<Mutex<HashSet<SourceId>>>,
    running: Arc<AtomicBool>,
    next_id: u64,
    handle: Option<JoinHandle<()>>,
}

impl OutputContext for AlsaOutput {
    fn now(&self) -> f64 {
        self.clock.elapsed().as_secs_f64()
    }

    fn decode(
        &self,
        payload: &[u8],
        sample_rate: u32,
        channels: u16,
    ) -> Result<AudioBuffer, DecodeError> {
        if channels == 0 {
            return Err(DecodeError::UnsupportedFormat("zero channels".into()));
        }
        Ok(AudioBuffer {
            samples: pcm::decode(payload)?,
            sample_rate,
            channels,
        })
    }

    fn schedule(&mut self, buffer: AudioBuffer, at: f64) -> Result<SourceId, EngineError> {
        let tx = self
            .cmd_tx
            .as_ref()
            .ok_or_else(|| EngineError::Schedule("output context closed".into()))?;
        let id = SourceId(self.next_id);
        self.next_id += 1;
        tx.send(PlayCommand::Play { id, buffer, at })
            .map_err(|_| EngineError::Schedule("playback thread gone".into()))?;
        Ok(id)
    }

    fn stop_source(&mut self, id: SourceId) {
        lock_ignore_poison(&self.cancelled).insert(id);
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // Dropping the sender ends the thread after the current buffer; we
        // detach rather than block the event loop on a long write.
        self.cmd_tx.take();
        self.handle.take();
    }
}

impl Drop for AlsaOutput {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock_ignore_poison<'a>(
    set: &'a Mutex<HashSet<SourceId>>,
) -> std::sync::MutexGuard<'a, HashSet<SourceId>> {
    set.lock().unwrap_or_else(|e| e.into_inner())
}

fn play_thread(
    handle: PcmHandle,
    cmd_rx: std_mpsc::Receiver<PlayCommand>,
    completions: mpsc::UnboundedSender<SourceId>,
    cancelled: Arc<Mutex<HashSet<SourceId>>>,
    running: Arc<AtomicBool>,
    clock: Instant,
) -> anyhow::Result<()> {
    let io = handle.pcm.io_i16()?;
    let channels = handle.channels as usize;

    info!(
        "playback started: rate={} channels={channels} period={}",
        handle.rate, handle.period_frames
    );

    while running.load(Ordering::Relaxed) {
        let PlayCommand::Play { id, buffer, at } = match cmd_rx.recv() {
            Ok(cmd) => cmd,
            Err(_) => break,
        };

        let now = clock.elapsed().as_secs_f64();
        if at > now && !sleep_until(&clock, at, &running) {
            break;
        }
        if lock_ignore_poison(&cancelled).remove(&id) {
            continue;
        }

        let samples = render_interleaved(&buffer, handle.rate, channels);
        let frames_total = samples.len() / channels;
        let period = handle.period_frames.max(1);
        let mut written = 0;
        let mut halted = false;
        while written < frames_total && running.load(Ordering::Relaxed) {
            if lock_ignore_poison(&cancelled).remove(&id) {
                halted = true;
                break;
            }
            let end = (written + period).min(frames_total);
            match io.writei(&samples[written * channels..end * channels]) {
                Ok(n) => written += n,
                Err(e) => {
                    warn!("alsa playback error: {e}, recovering");
                    if handle.pcm.prepare().is_err() {
                        halted = true;
                        break;
                    }
                }
            }
        }

        if !halted && written >= frames_total {
            let _ = completions.send(id);
        }
    }

    info!("playback stopped");
    Ok(())
}

/// Sleep until `deadline` on `clock`, in short slices so a cleared `running`
/// flag interrupts the wait. A far-future deadline must not keep the thread
/// (and the PCM device it holds) alive after close. Returns false when
/// interrupted.
fn sleep_until(clock: &Instant, deadline: f64, running: &AtomicBool) -> bool {
    loop {
        if !running.load(Ordering::Relaxed) {
            return false;
        }
        let remaining = deadline - clock.elapsed().as_secs_f64();
        if remaining <= 0.0 {
            return true;
        }
        thread::sleep(Duration::from_secs_f64(remaining.min(0.1)));
    }
}

/// Convert a decoded buffer to interleaved i16 at the negotiated device rate
/// and channel count.
fn render_interleaved(buffer: &AudioBuffer, device_rate: u32, device_channels: usize) -> Vec<i16> {
    let mono: Vec<f32> = if buffer.channels <= 1 {
        buffer.samples.clone()
    } else {
        buffer
            .samples
            .chunks_exact(buffer.channels as usize)
            .map(|frame| frame.iter().sum::<f32>() / buffer.channels as f32)
            .collect()
    };
    let resampled = alsa_io::resample_linear(&mono, buffer.sample_rate, device_rate);

    let mut out = Vec::with_capacity(resampled.len() * device_channels);
    for sample in resampled {
        let value = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        for _ in 0..device_channels {
            out.push(value);
        }
    }
    out
}

// ======================== Media subsystem ========================

pub struct AlsaMediaDevices {
    settings: AudioSettings,
}

impl AlsaMediaDevices {
    pub fn new(settings: AudioSettings) -> Self {
        Self { settings }
    }

    fn audio_inputs(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        let mut devices = Vec::new();
        let hints = HintIter::new(None, c"pcm")
            .map_err(|_| DeviceError::NoDeviceFound)?;
        for hint in hints {
            // Playback-only entries and the null sink are not capture devices.
            if matches!(hint.direction, Some(Direction::Playback)) {
                continue;
            }
            let Some(name) = hint.name else { continue };
            if name == "null" {
                continue;
            }
            let label = hint
                .desc
                .map(|d| d.lines().next().unwrap_or_default().to_string())
                .unwrap_or_else(|| name.clone());
            devices.push(DeviceDescriptor {
                id: name,
                kind: DeviceKind::AudioInput,
                label,
            });
        }
        if devices.is_empty() {
            return Err(DeviceError::NoDeviceFound);
        }

        // Transient permission probe: open the default capture device and
        // release it immediately.
        let probe = &self.settings.capture_device;
        PCM::new(probe, Direction::Capture, false)
            .map_err(|e| DeviceError::PermissionDenied(e.to_string()))?;

        Ok(devices)
    }

    fn video_inputs(&self) -> Vec<DeviceDescriptor> {
        let mut devices = Vec::new();
        let Ok(entries) = std::fs::read_dir("/dev") else {
            return devices;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with("video") {
                continue;
            }
            let label = std::fs::read_to_string(format!("/sys/class/video4linux/{name}/name"))
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| name.clone());
            devices.push(DeviceDescriptor {
                id: format!("/dev/{name}"),
                kind: DeviceKind::VideoInput,
                label,
            });
        }
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }
}

#[async_trait]
impl MediaDevices for AlsaMediaDevices {
    async fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        let mut devices = self.audio_inputs()?;
        devices.extend(self.video_inputs());
        Ok(devices)
    }

    async fn acquire(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Box<dyn MediaStream>, DeviceError> {
        let audio_id = constraints
            .audio_device
            .clone()
            .ok_or(DeviceError::NoDeviceFound)?;

        // Probe the device now so acquisition failures surface here; the
        // long-lived open happens on the capture thread when the tap
        // attaches.
        PCM::new(&audio_id, Direction::Capture, false).map_err(|e| DeviceError::Acquisition {
            device: audio_id.clone(),
            message: e.to_string(),
        })?;

        let mut tracks: Vec<Box<dyn MediaTrack>> = vec![Box::new(AlsaTrack {
            id: audio_id.clone(),
            kind: DeviceKind::AudioInput,
            stopped: false,
        })];

        if let Some(video_id) = &constraints.video_device {
            if !std::path::Path::new(video_id).exists() {
                return Err(DeviceError::Acquisition {
                    device: video_id.clone(),
                    message: "video device node missing".into(),
                });
            }
            tracks.push(Box::new(AlsaTrack {
                id: video_id.clone(),
                kind: DeviceKind::VideoInput,
                stopped: false,
            }));
        }

        Ok(Box::new(AlsaMediaStream { audio_id, tracks }))
    }
}

struct AlsaTrack {
    id: String,
    kind: DeviceKind,
    stopped: bool,
}

impl MediaTrack for AlsaTrack {
    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn stop(&mut self) {
        if !self.stopped {
            debug!("stopping {:?} track {}", self.kind, self.id);
            self.stopped = true;
        }
    }
}

struct AlsaMediaStream {
    audio_id: String,
    tracks: Vec<Box<dyn MediaTrack>>,
}

impl MediaStream for AlsaMediaStream {
    fn tracks(&mut self) -> &mut [Box<dyn MediaTrack>] {
        &mut self.tracks
    }

    fn audio_device_id(&self) -> Option<&str> {
        Some(&self.audio_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduled_wait_completes_at_deadline() {
        let clock = Instant::now();
        let running = AtomicBool::new(true);
        assert!(sleep_until(&clock, 0.05, &running));
        assert!(clock.elapsed().as_secs_f64() >= 0.05);
    }

    #[test]
    fn scheduled_wait_aborts_promptly_when_stopped() {
        let clock = Instant::now();
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            flag.store(false, Ordering::SeqCst);
        });

        // A deadline far beyond the stop must not pin the thread.
        let started = Instant::now();
        assert!(!sleep_until(&clock, 30.0, &running));
        assert!(started.elapsed() < Duration::from_secs(1));
        stopper.join().unwrap();
    }
}
