//! Live WebSocket transport to the coaching service.
//!
//! One socket per session: the upgrade request carries the bearer token and
//! client id, the first text message is the `setup` descriptor, then binary
//! PCM16 frames flow out while signalling and generated audio flow in. There
//! is no reconnect here; a failed link surfaces as a transport event and the
//! controller decides what happens next.

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::pcm;
use crate::protocol::{ServerMessage, SetupMessage};
use crate::transcript::Speaker;
use crate::transport::{
    InboundAudioChunk, OutboundAudioFrame, SessionDescriptor, SessionLink, Transport,
    TransportEvent,
};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Connection settings for the live service.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub url: String,
    pub token: String,
    pub client_id: String,
}

pub struct LiveTransport {
    config: LinkConfig,
}

impl LiveTransport {
    pub fn new(config: LinkConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for LiveTransport {
    async fn open(
        &self,
        descriptor: &SessionDescriptor,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn SessionLink>, TransportError> {
        let url =
            Url::parse(&self.config.url).map_err(|e| TransportError::Open(e.to_string()))?;
        let host = url.host_str().unwrap_or_default().to_string();

        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .method("GET")
            .uri(self.config.url.as_str())
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header("Authorization", format!("Bearer {}", self.config.token))
            .header("Client-Id", &self.config.client_id)
            .body(())
            .map_err(|e| TransportError::Open(e.to_string()))?;

        info!("connecting to {}", self.config.url);
        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| TransportError::Open(e.to_string()))?;
        let (mut write, read) = ws_stream.split();

        let setup = SetupMessage::new(descriptor);
        let setup_json =
            serde_json::to_string(&setup).map_err(|e| TransportError::Open(e.to_string()))?;
        write
            .send(Message::Text(setup_json.into()))
            .await
            .map_err(|e| TransportError::Open(e.to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        tokio::spawn(run_link(write, read, cmd_rx, events));

        Ok(Box::new(LiveSessionLink { cmd_tx }))
    }
}

enum LinkCommand {
    Frame(Bytes),
    Close,
}

pub struct LiveSessionLink {
    cmd_tx: mpsc::Sender<LinkCommand>,
}

impl SessionLink for LiveSessionLink {
    fn send_frame(&self, frame: OutboundAudioFrame) {
        if self.cmd_tx.try_send(LinkCommand::Frame(frame.payload)).is_err() {
            debug!("link command channel full, dropping audio frame");
        }
    }

    fn close(&mut self) {
        let _ = self.cmd_tx.try_send(LinkCommand::Close);
    }
}

async fn run_link(
    mut write: WsSink,
    mut read: WsSource,
    mut cmd_rx: mpsc::Receiver<LinkCommand>,
    events: mpsc::Sender<TransportEvent>,
) {
    // Effective output format; updated from the ready message.
    let mut output_rate = pcm::PLAYBACK_SAMPLE_RATE;
    let mut output_channels = pcm::WIRE_CHANNELS;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(server_msg) = serde_json::from_str::<ServerMessage>(text.as_str())
                        else {
                            debug!("ignoring non-protocol text message");
                            continue;
                        };
                        let Some(event) =
                            map_server_message(server_msg, &mut output_rate, &mut output_channels)
                        else {
                            continue;
                        };
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let chunk = InboundAudioChunk {
                            payload: data,
                            sample_rate: output_rate,
                            channels: output_channels,
                        };
                        if events.send(TransportEvent::Audio(chunk)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!("server closed the session: {frame:?}");
                        let _ = events.send(TransportEvent::Closed).await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = events.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                    None => {
                        let _ = events.send(TransportEvent::Closed).await;
                        break;
                    }
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(LinkCommand::Frame(payload)) => {
                        if let Err(e) = write.send(Message::Binary(payload)).await {
                            let _ = events.send(TransportEvent::Error(e.to_string())).await;
                            break;
                        }
                    }
                    Some(LinkCommand::Close) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }
    debug!("link task finished");
}

fn map_server_message(
    msg: ServerMessage,
    output_rate: &mut u32,
    output_channels: &mut u16,
) -> Option<TransportEvent> {
    match msg.msg_type.as_str() {
        "ready" => {
            if let Some(params) = msg.audio_params {
                *output_rate = params.sample_rate;
                *output_channels = params.channels;
            }
            Some(TransportEvent::Ready {
                session_id: msg.session_id.unwrap_or_default(),
                output_sample_rate: *output_rate,
                output_channels: *output_channels,
            })
        }
        "transcript" => {
            let speaker = match msg.role.as_deref() {
                Some("user") => Speaker::Local,
                Some("coach") => Speaker::Remote,
                other => {
                    warn!("transcript with unknown role {other:?}");
                    return None;
                }
            };
            Some(TransportEvent::Transcript {
                speaker,
                text: msg.text.unwrap_or_default(),
            })
        }
        "turn_complete" => Some(TransportEvent::TurnComplete),
        "error" => Some(TransportEvent::Error(
            msg.message.unwrap_or_else(|| "unknown server error".to_string()),
        )),
        other => {
            debug!("unhandled message type: {other}");
            None
        }
    }
}
