// Loopback tests for the live WebSocket transport: a local server accepts
// the upgrade, checks the setup message, and exchanges signalling and audio
// with the client link.

use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;

use pitchcoach::live_link::{LinkConfig, LiveTransport};
use pitchcoach::pcm;
use pitchcoach::transcript::Speaker;
use pitchcoach::transport::{
    OutboundAudioFrame, SessionDescriptor, Transport, TransportEvent,
};

async fn recv_event(rx: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event channel closed")
}

fn transport_for(addr: std::net::SocketAddr) -> LiveTransport {
    LiveTransport::new(LinkConfig {
        url: format!("ws://{addr}"),
        token: "test-token".into(),
        client_id: "test-client".into(),
    })
}

#[tokio::test]
async fn setup_is_sent_first_and_events_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let audio_payload = pcm::encode(&[0.1, -0.1, 0.2]);
    let server_audio = audio_payload.clone();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        // The first message on the socket must be the setup descriptor.
        let first = ws.next().await.unwrap().unwrap();
        let setup: serde_json::Value =
            serde_json::from_str(first.into_text().unwrap().as_str()).unwrap();
        assert_eq!(setup["type"], "setup");
        assert_eq!(setup["response_modality"], "audio");
        assert_eq!(setup["input_transcription"], true);
        assert_eq!(setup["output_transcription"], true);
        assert_eq!(setup["system_instruction"], "coach me");
        assert_eq!(setup["input_format"]["sample_rate"], 16_000);
        assert_eq!(setup["output_format"]["sample_rate"], 24_000);

        ws.send(Message::Text(
            r#"{"type":"ready","session_id":"s1",
                "audio_params":{"encoding":"pcm16","sample_rate":24000,"channels":1}}"#
                .into(),
        ))
        .await
        .unwrap();
        ws.send(Message::Text(
            r#"{"type":"transcript","role":"user","text":"Hello"}"#.into(),
        ))
        .await
        .unwrap();
        ws.send(Message::Text(
            r#"{"type":"transcript","role":"coach","text":"Hi there"}"#.into(),
        ))
        .await
        .unwrap();
        ws.send(Message::Binary(server_audio)).await.unwrap();
        ws.send(Message::Text(r#"{"type":"turn_complete"}"#.into()))
            .await
            .unwrap();

        // One binary frame back from the client.
        let frame = loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Binary(data) => break data,
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected message from client: {other:?}"),
            }
        };

        ws.close(None).await.unwrap();
        frame
    });

    let transport = transport_for(addr);
    let descriptor = SessionDescriptor {
        system_instruction: "coach me".into(),
        voice: None,
    };
    let (events_tx, mut events) = mpsc::channel(32);
    let mut link = transport.open(&descriptor, events_tx).await.unwrap();

    match recv_event(&mut events).await {
        TransportEvent::Ready {
            session_id,
            output_sample_rate,
            output_channels,
        } => {
            assert_eq!(session_id, "s1");
            assert_eq!(output_sample_rate, 24_000);
            assert_eq!(output_channels, 1);
        }
        other => panic!("expected Ready, got {other:?}"),
    }
    match recv_event(&mut events).await {
        TransportEvent::Transcript { speaker, text } => {
            assert_eq!(speaker, Speaker::Local);
            assert_eq!(text, "Hello");
        }
        other => panic!("expected local transcript, got {other:?}"),
    }
    match recv_event(&mut events).await {
        TransportEvent::Transcript { speaker, text } => {
            assert_eq!(speaker, Speaker::Remote);
            assert_eq!(text, "Hi there");
        }
        other => panic!("expected remote transcript, got {other:?}"),
    }
    match recv_event(&mut events).await {
        TransportEvent::Audio(chunk) => {
            assert_eq!(chunk.payload, audio_payload);
            // Tagged with the effective output format from ready.
            assert_eq!(chunk.sample_rate, 24_000);
            assert_eq!(chunk.channels, 1);
        }
        other => panic!("expected audio, got {other:?}"),
    }
    assert!(matches!(
        recv_event(&mut events).await,
        TransportEvent::TurnComplete
    ));

    let outbound = pcm::encode(&[0.5, -0.5]);
    link.send_frame(OutboundAudioFrame {
        payload: outbound.clone(),
    });

    // Server close ends the session as a normal disconnect.
    assert!(matches!(
        recv_event(&mut events).await,
        TransportEvent::Closed
    ));

    let received = server.await.unwrap();
    assert_eq!(Bytes::from(received), outbound);
    link.close();
}

#[tokio::test]
async fn server_error_message_maps_to_error_event() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _setup = ws.next().await.unwrap().unwrap();
        ws.send(Message::Text(
            r#"{"type":"error","message":"quota exceeded"}"#.into(),
        ))
        .await
        .unwrap();
        // Unknown message types are ignored, not errors.
        ws.send(Message::Text(r#"{"type":"heartbeat"}"#.into()))
            .await
            .unwrap();
    });

    let transport = transport_for(addr);
    let (events_tx, mut events) = mpsc::channel(32);
    let _link = transport
        .open(&SessionDescriptor::default(), events_tx)
        .await
        .unwrap();

    match recv_event(&mut events).await {
        TransportEvent::Error(message) => assert_eq!(message, "quota exceeded"),
        other => panic!("expected Error, got {other:?}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn open_fails_cleanly_when_nobody_listens() {
    // Bind then drop to get an address with no listener behind it.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = transport_for(addr);
    let (events_tx, _events) = mpsc::channel(8);
    let result = transport.open(&SessionDescriptor::default(), events_tx).await;
    assert!(result.is_err());
}
