//! Session controller: the state machine and resource owner.
//!
//! One controller task is the single cooperative event loop. Commands from
//! the handle, transport events, capture chunks and playback completions all
//! arrive as messages on this loop, so there is no shared mutable state
//! between handlers. The ALSA threads and the link task only ever talk to
//! the loop through channels.
//!
//! Resource discipline: the media stream, both audio contexts and the
//! session link are owned by exactly one session, created in start and
//! released together in the single teardown path. A stop during a pending
//! start bumps the session epoch; when the acquisition outcome arrives with
//! a stale epoch its resources are released on the spot instead of being
//! installed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::capture::CapturePipeline;
use crate::catalog::DeviceCatalog;
use crate::engine::{
    AudioEngine, CaptureChunk, DeviceDescriptor, InputContext, MediaConstraints, MediaDevices,
    MediaStream, OutputContext, SourceId,
};
use crate::error::{DeviceError, SessionError, TransportError};
use crate::pcm;
use crate::scheduler::{DEFAULT_MAX_LOOKAHEAD, PlaybackScheduler};
use crate::transcript::{TranscriptAggregator, TranscriptEntry};
use crate::transport::{SessionDescriptor, SessionLink, Transport, TransportEvent};

/// Externally observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Live,
    Error,
}

/// Events for the surrounding UI. Delivered on an unbounded channel so the
/// loop never blocks on a slow consumer.
#[derive(Debug)]
pub enum SessionEvent {
    Status(ConnectionStatus),
    Transcript(TranscriptEntry),
    /// A new session started; any displayed transcript is stale.
    TranscriptCleared,
    /// A restart got its resources in place; the previous error message
    /// should be dismissed.
    ErrorCleared,
    Error(String),
    Devices(Vec<DeviceDescriptor>),
}

#[derive(Debug)]
enum Command {
    Start,
    Stop,
    RefreshDevices,
    SelectDevice(String),
    Shutdown,
}

/// Controller tuning. The sample rates are not here: 16 kHz capture and
/// 24 kHz playback are part of the wire contract and never renegotiated.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub descriptor: SessionDescriptor,
    /// Capture tap chunk length in mono samples.
    pub chunk_frames: usize,
    /// Maximum seconds the playback cursor may run ahead of the clock.
    pub max_lookahead: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            descriptor: SessionDescriptor::default(),
            chunk_frames: 4096,
            max_lookahead: DEFAULT_MAX_LOOKAHEAD,
        }
    }
}

/// Cloneable handle to the controller task. This is the only surface the
/// surrounding UI sees.
#[derive(Clone)]
pub struct ControllerHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    admitted: Arc<AtomicBool>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl ControllerHandle {
    /// Request a session start. No-op while a session is already admitted:
    /// the atomic guard rejects a second start without queuing a restart.
    pub fn start(&self) {
        if self
            .admitted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("start ignored, a session is already admitted");
            return;
        }
        let _ = self.cmd_tx.send(Command::Start);
    }

    /// Request teardown. Idempotent and safe from any state.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(Command::Stop);
    }

    pub fn refresh_devices(&self) {
        let _ = self.cmd_tx.send(Command::RefreshDevices);
    }

    pub fn select_device(&self, id: impl Into<String>) {
        let _ = self.cmd_tx.send(Command::SelectDevice(id.into()));
    }

    /// Tear down and end the controller task.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Watch channel mirroring every status transition.
    pub fn status_stream(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }
}

/// Everything one session owns. Released together, exactly once.
struct SessionResources {
    stream: Box<dyn MediaStream>,
    input: Box<dyn InputContext>,
    output: Box<dyn OutputContext>,
    link: Box<dyn SessionLink>,
    transport_rx: mpsc::Receiver<TransportEvent>,
    capture_tx: mpsc::Sender<CaptureChunk>,
    capture_rx: mpsc::Receiver<CaptureChunk>,
    completions_rx: mpsc::UnboundedReceiver<SourceId>,
}

impl SessionResources {
    /// Release without installing, for stale start outcomes.
    fn release(mut self) {
        self.link.close();
        for track in self.stream.tracks() {
            track.stop();
        }
        self.capture_rx.close();
        self.input.close();
        self.output.close();
    }
}

struct ActiveSession {
    resources: SessionResources,
    capture: CapturePipeline,
    live: bool,
}

struct StartOutcome {
    epoch: u64,
    result: Result<SessionResources, SessionError>,
}

enum SessionIo {
    Transport(TransportEvent),
    Capture(CaptureChunk),
    Completed(SourceId),
}

pub struct SessionController {
    engine: Arc<dyn AudioEngine>,
    media: Arc<dyn MediaDevices>,
    transport: Arc<dyn Transport>,
    config: ControllerConfig,
    status_tx: watch::Sender<ConnectionStatus>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    admitted: Arc<AtomicBool>,
    catalog: DeviceCatalog,
    aggregator: TranscriptAggregator,
    scheduler: PlaybackScheduler,
    epoch: u64,
    session: Option<ActiveSession>,
    pending: Option<mpsc::Receiver<StartOutcome>>,
}

impl SessionController {
    /// Spawn the controller task. Returns the handle and the UI event
    /// stream.
    pub fn spawn(
        engine: Arc<dyn AudioEngine>,
        media: Arc<dyn MediaDevices>,
        transport: Arc<dyn Transport>,
        config: ControllerConfig,
    ) -> (ControllerHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let admitted = Arc::new(AtomicBool::new(false));

        let max_lookahead = config.max_lookahead;
        let controller = Self {
            engine,
            media,
            transport,
            config,
            status_tx,
            events_tx,
            admitted: admitted.clone(),
            catalog: DeviceCatalog::new(),
            aggregator: TranscriptAggregator::new(),
            scheduler: PlaybackScheduler::new(max_lookahead),
            epoch: 0,
            session: None,
            pending: None,
        };
        tokio::spawn(controller.run(cmd_rx));

        let handle = ControllerHandle {
            cmd_tx,
            admitted,
            status_rx,
        };
        (handle, events_rx)
    }

    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Start) => self.handle_start(),
                        Some(Command::Stop) => self.handle_stop(),
                        Some(Command::RefreshDevices) => self.handle_refresh().await,
                        Some(Command::SelectDevice(id)) => self.handle_select(&id),
                        Some(Command::Shutdown) | None => {
                            self.handle_stop();
                            break;
                        }
                    }
                }
                outcome = Self::next_outcome(&mut self.pending) => {
                    self.handle_start_outcome(outcome);
                }
                io = Self::next_session_io(&mut self.session) => {
                    match io {
                        SessionIo::Transport(event) => self.handle_transport_event(event),
                        SessionIo::Capture(chunk) => self.handle_capture_chunk(chunk),
                        SessionIo::Completed(id) => self.scheduler.on_complete(id),
                    }
                }
            }
        }
        debug!("controller task finished");
    }

    async fn next_outcome(pending: &mut Option<mpsc::Receiver<StartOutcome>>) -> StartOutcome {
        match pending {
            Some(rx) => match rx.recv().await {
                Some(outcome) => outcome,
                None => std::future::pending().await,
            },
            None => std::future::pending().await,
        }
    }

    async fn next_session_io(session: &mut Option<ActiveSession>) -> SessionIo {
        let Some(s) = session.as_mut() else {
            return std::future::pending().await;
        };
        tokio::select! {
            event = s.resources.transport_rx.recv() => {
                // A silently dropped channel counts as a normal close.
                SessionIo::Transport(event.unwrap_or(TransportEvent::Closed))
            }
            chunk = recv_or_pending(&mut s.resources.capture_rx) => SessionIo::Capture(chunk),
            id = recv_unbounded_or_pending(&mut s.resources.completions_rx) => {
                SessionIo::Completed(id)
            }
        }
    }

    fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status() != status {
            self.status_tx.send_replace(status);
            let _ = self.events_tx.send(SessionEvent::Status(status));
        }
    }

    fn handle_start(&mut self) {
        match self.status() {
            ConnectionStatus::Disconnected | ConnectionStatus::Error => {}
            other => {
                // The handle guard normally prevents this; stay safe anyway.
                debug!("start ignored in state {other:?}");
                return;
            }
        }

        self.aggregator.reset();
        let _ = self.events_tx.send(SessionEvent::TranscriptCleared);

        let Some(audio_device) = self.catalog.selected_audio().map(String::from) else {
            self.fail(SessionError::Device(DeviceError::NoDeviceFound));
            return;
        };
        let constraints = MediaConstraints {
            audio_device: Some(audio_device),
            video_device: self.catalog.selected_video().map(String::from),
        };

        self.set_status(ConnectionStatus::Connecting);
        self.epoch += 1;
        let epoch = self.epoch;

        let (outcome_tx, outcome_rx) = mpsc::channel(1);
        self.pending = Some(outcome_rx);

        let engine = self.engine.clone();
        let media = self.media.clone();
        let transport = self.transport.clone();
        let descriptor = self.config.descriptor.clone();
        tokio::spawn(async move {
            let result = acquire_session(engine, media, transport, descriptor, constraints).await;
            if let Err(rejected) =
                outcome_tx.try_send(StartOutcome { epoch, result })
                && let StartOutcome { result: Ok(resources), .. } = rejected.into_inner()
            {
                // Controller is gone; do not leak what we acquired.
                resources.release();
            }
        });
    }

    fn handle_start_outcome(&mut self, outcome: StartOutcome) {
        self.pending = None;
        if outcome.epoch != self.epoch {
            if let Ok(resources) = outcome.result {
                debug!("releasing resources from a cancelled start");
                resources.release();
            }
            return;
        }
        match outcome.result {
            Ok(resources) => {
                // The new session's resources are in place; a displayed
                // error message from the previous one is now stale.
                let _ = self.events_tx.send(SessionEvent::ErrorCleared);
                self.scheduler.reset();
                self.session = Some(ActiveSession {
                    resources,
                    capture: CapturePipeline::new(),
                    live: false,
                });
                // Still Connecting: Live waits for the remote confirmation.
            }
            Err(e) => self.fail(e),
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Ready {
                session_id,
                output_sample_rate,
                output_channels,
            } => {
                info!(
                    "remote session {session_id} open, output {output_sample_rate} Hz \
                     x{output_channels}"
                );
                let result = match self.session.as_mut() {
                    Some(s) => {
                        if s.live {
                            debug!("ignoring duplicate open confirmation");
                            return;
                        }
                        let chunks = s.resources.capture_tx.clone();
                        let attached = s.resources.input.attach_tap(
                            s.resources.stream.as_mut(),
                            self.config.chunk_frames,
                            chunks,
                        );
                        if attached.is_ok() {
                            s.live = true;
                        }
                        attached
                    }
                    None => return,
                };
                match result {
                    Ok(()) => self.set_status(ConnectionStatus::Live),
                    Err(e) => self.fail(SessionError::Engine(e)),
                }
            }
            TransportEvent::Transcript { speaker, text } => {
                self.aggregator.push(speaker, &text);
            }
            TransportEvent::TurnComplete => {
                for entry in self.aggregator.flush_turn() {
                    let _ = self.events_tx.send(SessionEvent::Transcript(entry));
                }
            }
            TransportEvent::Audio(chunk) => {
                let result = match self.session.as_mut() {
                    Some(s) => self.scheduler.on_chunk(s.resources.output.as_mut(), chunk),
                    None => Ok(()),
                };
                if let Err(e) = result {
                    self.fail(SessionError::Engine(e));
                }
            }
            TransportEvent::Error(message) => {
                self.fail(SessionError::Transport(TransportError::Link(message)));
            }
            TransportEvent::Closed => {
                info!("remote session closed");
                self.handle_stop();
            }
        }
    }

    fn handle_capture_chunk(&mut self, chunk: CaptureChunk) {
        let Some(s) = self.session.as_mut() else {
            return;
        };
        if !s.live {
            return;
        }
        s.capture.forward(s.resources.link.as_ref(), &chunk);
    }

    async fn handle_refresh(&mut self) {
        let result = self.media.enumerate().await;
        match self.catalog.apply_enumeration(result) {
            Ok(()) => {
                let _ = self
                    .events_tx
                    .send(SessionEvent::Devices(self.catalog.devices().to_vec()));
            }
            Err(e) => {
                warn!("device enumeration failed: {e}");
                let _ = self.events_tx.send(SessionEvent::Error(e.to_string()));
            }
        }
    }

    fn handle_select(&mut self, id: &str) {
        if !self.catalog.select(id) {
            warn!("ignoring selection of unknown device '{id}'");
        }
    }

    /// The single teardown path. Idempotent: running it with no session is a
    /// no-op apart from resetting playback state and the start guard.
    fn handle_stop(&mut self) {
        self.teardown_resources();
        self.set_status(ConnectionStatus::Disconnected);
    }

    /// The single error path: full teardown first, only then surface the
    /// message. No partially torn-down state is externally visible.
    fn fail(&mut self, err: SessionError) {
        error!("session failed: {err}");
        let message = err.to_string();
        self.teardown_resources();
        self.set_status(ConnectionStatus::Error);
        let _ = self.events_tx.send(SessionEvent::Error(message));
    }

    fn teardown_resources(&mut self) {
        // Invalidate any in-flight start.
        self.epoch += 1;
        if let Some(mut s) = self.session.take() {
            s.resources.link.close();
            for track in s.resources.stream.tracks() {
                track.stop();
            }
            // Close the chunk channel first: a capture thread blocked on a
            // full channel must error out so the join inside close() returns.
            s.resources.capture_rx.close();
            s.resources.input.close();
            self.scheduler.stop_all(s.resources.output.as_mut());
            s.resources.output.close();
        } else {
            self.scheduler.reset();
        }
        self.aggregator.reset();
        self.admitted.store(false, Ordering::SeqCst);
    }
}

async fn recv_or_pending<T>(rx: &mut mpsc::Receiver<T>) -> T {
    match rx.recv().await {
        Some(value) => value,
        None => std::future::pending().await,
    }
}

async fn recv_unbounded_or_pending<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    match rx.recv().await {
        Some(value) => value,
        None => std::future::pending().await,
    }
}

/// Acquire everything one session needs, releasing partial acquisitions on
/// the way out. Runs as a spawned task so the event loop stays responsive;
/// the outcome travels back tagged with the session epoch.
async fn acquire_session(
    engine: Arc<dyn AudioEngine>,
    media: Arc<dyn MediaDevices>,
    transport: Arc<dyn Transport>,
    descriptor: SessionDescriptor,
    constraints: MediaConstraints,
) -> Result<SessionResources, SessionError> {
    let mut stream = media.acquire(&constraints).await?;

    let mut input = match engine.create_input(pcm::CAPTURE_SAMPLE_RATE) {
        Ok(input) => input,
        Err(e) => {
            stop_tracks(stream.as_mut());
            return Err(e.into());
        }
    };

    let (completions_tx, completions_rx) = mpsc::unbounded_channel();
    let mut output =
        match engine.create_output(pcm::PLAYBACK_SAMPLE_RATE, pcm::WIRE_CHANNELS, completions_tx) {
            Ok(output) => output,
            Err(e) => {
                input.close();
                stop_tracks(stream.as_mut());
                return Err(e.into());
            }
        };

    let (event_tx, transport_rx) = mpsc::channel(256);
    let link = match transport.open(&descriptor, event_tx).await {
        Ok(link) => link,
        Err(e) => {
            output.close();
            input.close();
            stop_tracks(stream.as_mut());
            return Err(e.into());
        }
    };

    let (capture_tx, capture_rx) = mpsc::channel(64);
    Ok(SessionResources {
        stream,
        input,
        output,
        link,
        transport_rx,
        capture_tx,
        capture_rx,
        completions_rx,
    })
}

fn stop_tracks(stream: &mut dyn MediaStream) {
    for track in stream.tracks() {
        track.stop();
    }
}
