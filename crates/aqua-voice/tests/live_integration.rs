//! Integration tests for the duplex channel against a real WebSocket server.
//!
//! The server is a local tokio-tungstenite acceptor, so these run without
//! network access. The microphone test is ignored by default since it
//! requires audio hardware.

use aqua_voice::{
    AudioCapture, CaptureConfig, ChannelState, ControlMessage, DuplexChannel, SessionEvent,
    VoiceError,
};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

async fn recv_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

/// One local server socket; returns its ws:// URL and the listener.
async fn local_server() -> (String, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (url, listener)
}

#[tokio::test]
async fn channel_round_trip_with_live_server() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let (url, listener) = local_server().await;

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();

        // Inbound to the client: control, audio, garbage, control.
        ws.send(Message::Text(
            r#"{"type":"transcription","text":"hello"}"#.into(),
        ))
        .await
        .unwrap();
        ws.send(Message::Binary(vec![1u8, 2, 3].into()))
            .await
            .unwrap();
        ws.send(Message::Text("{not json".into())).await.unwrap();
        ws.send(Message::Text(r#"{"type":"text_response","text":"hi"}"#.into()))
            .await
            .unwrap();

        // Then collect what the client sends: exact wire bytes matter.
        let first = ws.next().await.unwrap().unwrap();
        assert_eq!(first.to_text().unwrap(), r#"{"type":"interrupt"}"#);
        let second = ws.next().await.unwrap().unwrap();
        assert_eq!(second.to_text().unwrap(), r#"{"type":"commit"}"#);
        let third = ws.next().await.unwrap().unwrap();
        match third {
            Message::Binary(data) => assert_eq!(&data[..], &[9u8, 9, 9]),
            other => panic!("expected binary frame, got {:?}", other),
        }

        ws.send(Message::Close(None)).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let handle = DuplexChannel::open(&url, event_tx).await.unwrap();
    assert!(handle.is_open());

    // Inbound arrives in order; the malformed text frame is dropped without
    // disturbing the stream.
    match recv_event(&mut event_rx).await {
        SessionEvent::ControlReceived(ControlMessage::Transcription { text }) => {
            assert_eq!(text, "hello");
        }
        other => panic!("unexpected event: {:?}", other),
    }
    match recv_event(&mut event_rx).await {
        SessionEvent::FrameReceived(frame) => assert_eq!(frame.as_bytes(), &[1, 2, 3]),
        other => panic!("unexpected event: {:?}", other),
    }
    match recv_event(&mut event_rx).await {
        SessionEvent::ControlReceived(ControlMessage::TextResponse { text }) => {
            assert_eq!(text, "hi");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // Outbound: barge-in interrupt, utterance commit, one audio chunk.
    handle.send_control(ControlMessage::Interrupt).unwrap();
    handle.send_control(ControlMessage::Commit).unwrap();
    handle.send_binary(vec![9u8, 9, 9].into()).unwrap();

    // Remote close surfaces as a clean ChannelClosed.
    match recv_event(&mut event_rx).await {
        SessionEvent::ChannelClosed => {}
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(handle.state(), ChannelState::Closed);

    // Let the write pump finish the close handshake so the server's drain
    // loop terminates.
    handle.close();
    server.await.unwrap();
}

#[tokio::test]
async fn sends_are_rejected_after_remote_close() {
    let (url, listener) = local_server().await;

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
        ws.send(Message::Close(None)).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let handle = DuplexChannel::open(&url, event_tx).await.unwrap();

    match recv_event(&mut event_rx).await {
        SessionEvent::ChannelClosed => {}
        other => panic!("unexpected event: {:?}", other),
    }

    let err = handle.send_control(ControlMessage::Commit).unwrap_err();
    assert!(matches!(err, VoiceError::ChannelClosed));

    handle.close();
    server.await.unwrap();
}

#[tokio::test]
async fn connect_fails_fast_when_nobody_listens() {
    let (url, listener) = local_server().await;
    drop(listener);

    let (event_tx, _event_rx) = mpsc::unbounded_channel();
    let result = DuplexChannel::open(&url, event_tx).await;
    assert!(matches!(result, Err(VoiceError::Connection(_))));
}

#[tokio::test]
#[ignore] // Requires audio hardware
async fn microphone_can_be_acquired() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let devices = AudioCapture::list_input_devices().expect("could not enumerate devices");
    println!("Available input devices: {:?}", devices);

    let capture = AudioCapture::new(CaptureConfig::default()).expect("could not acquire mic");
    let (window_tx, mut window_rx) = mpsc::unbounded_channel();
    let _stream = capture.start(window_tx).expect("could not start capture");

    // One 30ms window should arrive almost immediately.
    let window = timeout(WAIT, window_rx.recv())
        .await
        .expect("no audio within timeout")
        .expect("capture channel closed");
    assert_eq!(window.len(), CaptureConfig::default().window_samples());
}
