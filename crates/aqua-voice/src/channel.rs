//! Duplex WebSocket channel carrying binary audio and JSON control frames
//!
//! One connection per session, created on session start and closed on
//! session end or fatal transport error. The channel owns no audio data,
//! only transport; it never retries or reconnects. That policy belongs to
//! whoever owns the session.

use crate::error::{VoiceError, VoiceResult};
use crate::protocol::{AudioFrame, ControlMessage};
use crate::session::SessionEvent;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Connection lifecycle. `Closed` and `Errored` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
    Errored,
}

const STATE_CONNECTING: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_CLOSED: u8 = 2;
const STATE_ERRORED: u8 = 3;

fn state_from(raw: u8) -> ChannelState {
    match raw {
        STATE_CONNECTING => ChannelState::Connecting,
        STATE_OPEN => ChannelState::Open,
        STATE_CLOSED => ChannelState::Closed,
        _ => ChannelState::Errored,
    }
}

/// Outbound traffic queued for the write pump.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outbound {
    Binary(AudioFrame),
    Control(ControlMessage),
    Pong(bytes::Bytes),
    Close,
}

/// Cheap-to-clone sender half of the channel. Every send is rejected with
/// `ChannelClosed` once the connection leaves `Open`; messages are never
/// queued across a close.
#[derive(Clone)]
pub struct ChannelHandle {
    tx: mpsc::UnboundedSender<Outbound>,
    state: Arc<AtomicU8>,
}

impl ChannelHandle {
    pub fn state(&self) -> ChannelState {
        state_from(self.state.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Queue one captured audio frame for transmission.
    pub fn send_binary(&self, frame: AudioFrame) -> VoiceResult<()> {
        self.send(Outbound::Binary(frame))
    }

    /// Queue one control message for transmission.
    pub fn send_control(&self, msg: ControlMessage) -> VoiceResult<()> {
        self.send(Outbound::Control(msg))
    }

    /// Close the connection. Pending sends are best-effort and may be
    /// dropped. Idempotent.
    pub fn close(&self) {
        let _ = self.state.compare_exchange(
            STATE_OPEN,
            STATE_CLOSED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        let _ = self.tx.send(Outbound::Close);
    }

    fn send(&self, out: Outbound) -> VoiceResult<()> {
        if !self.is_open() {
            return Err(VoiceError::ChannelClosed);
        }
        self.tx.send(out).map_err(|_| VoiceError::ChannelClosed)
    }

    /// Handle whose outbound traffic is captured on a receiver instead of a
    /// socket. Session tests wire against this.
    #[cfg(test)]
    pub(crate) fn loopback() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            tx,
            state: Arc::new(AtomicU8::new(STATE_OPEN)),
        };
        (handle, rx)
    }

    #[cfg(test)]
    pub(crate) fn mark(&self, state: ChannelState) {
        let raw = match state {
            ChannelState::Connecting => STATE_CONNECTING,
            ChannelState::Open => STATE_OPEN,
            ChannelState::Closed => STATE_CLOSED,
            ChannelState::Errored => STATE_ERRORED,
        };
        self.state.store(raw, Ordering::SeqCst);
    }
}

/// The bidirectional connection. `open` performs the handshake and spawns
/// the read/write pumps; inbound traffic is delivered as `SessionEvent`s.
pub struct DuplexChannel;

impl DuplexChannel {
    /// Connect to `url` (e.g. `ws://host:5000/ws/live`). Handshake failure
    /// is fatal for the session.
    pub async fn open(
        url: &str,
        event_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> VoiceResult<ChannelHandle> {
        let state = Arc::new(AtomicU8::new(STATE_CONNECTING));

        let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
        info!("duplex channel open: {}", url);
        state.store(STATE_OPEN, Ordering::SeqCst);

        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

        // Write pump: serializes control messages, forwards binary frames.
        let write_state = state.clone();
        tokio::spawn(async move {
            while let Some(out) = rx.recv().await {
                let msg = match out {
                    Outbound::Binary(frame) => Message::Binary(frame.into_bytes()),
                    Outbound::Control(ctrl) => match serde_json::to_string(&ctrl) {
                        Ok(json) => Message::Text(json.into()),
                        Err(e) => {
                            warn!("failed to serialize control message: {}", e);
                            continue;
                        }
                    },
                    Outbound::Pong(data) => Message::Pong(data),
                    Outbound::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = sink.send(msg).await {
                    warn!("channel send failed: {}", e);
                    write_state.store(STATE_ERRORED, Ordering::SeqCst);
                    break;
                }
            }
            debug!("channel write pump ended");
        });

        // Read pump: classifies inbound frames and forwards them to the
        // session event queue. Malformed control text is dropped, not fatal.
        let read_state = state.clone();
        let pong_tx = tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        if event_tx
                            .send(SessionEvent::FrameReceived(AudioFrame::new(data)))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<ControlMessage>(text.as_str()) {
                            Ok(ctrl) => {
                                if event_tx.send(SessionEvent::ControlReceived(ctrl)).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(
                                    "dropping malformed control message: {} ({})",
                                    e,
                                    VoiceError::MalformedControl(text.as_str().into())
                                );
                            }
                        }
                    }
                    Ok(Message::Ping(data)) => {
                        let _ = pong_tx.send(Outbound::Pong(data));
                    }
                    Ok(Message::Close(_)) => {
                        info!("channel closed by remote");
                        let _ = read_state.compare_exchange(
                            STATE_OPEN,
                            STATE_CLOSED,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        );
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("channel transport error: {}", e);
                        read_state.store(STATE_ERRORED, Ordering::SeqCst);
                        break;
                    }
                }
            }
            // Whatever ended the read half ends the session's inbound flow.
            if state_from(read_state.load(Ordering::SeqCst)) == ChannelState::Open {
                read_state.store(STATE_CLOSED, Ordering::SeqCst);
            }
            let _ = event_tx.send(SessionEvent::ChannelClosed);
            debug!("channel read pump ended");
        });

        Ok(ChannelHandle { tx, state })
    }
}
