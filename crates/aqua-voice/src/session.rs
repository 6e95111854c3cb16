//! Live session coordinator
//!
//! Owns one duplex channel, one VAD, one capture gate and one playback
//! scheduler, and runs the event loop that ties them together. All
//! coordination flows through a single event queue processed one event at a
//! time, so VAD decisions, inbound frames and playback transitions are
//! serialized and cannot race.

use crate::capture::{run_capture_pump, AudioCapture, CaptureConfig, CaptureGate};
use crate::channel::{ChannelHandle, ChannelState, DuplexChannel};
use crate::error::{VoiceError, VoiceResult};
use crate::playback::{PlaybackHandle, PlaybackScheduler};
use crate::protocol::{AudioFrame, ControlMessage};
use crate::vad::{VadConfig, VadEvent, VoiceActivityDetector};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// User-visible session phase. Advisory only: no control decision is derived
/// from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Ready,
    Listening,
    Thinking,
    Speaking,
    Error,
}

/// Everything the session loop reacts to, in arrival order.
#[derive(Debug)]
pub enum SessionEvent {
    /// One normalized energy measurement from the capture pump.
    EnergySample(f32),
    /// Inbound synthesized audio from the channel.
    FrameReceived(AudioFrame),
    /// Inbound control message from the channel.
    ControlReceived(ControlMessage),
    /// Playback scheduler went from idle to playing.
    PlaybackStarted,
    /// Playback scheduler drained its queue.
    PlaybackIdle,
    /// Manual end-of-utterance request (tap-to-send).
    ForceCommit,
    /// The channel's read side ended; check the channel state for why.
    ChannelClosed,
}

/// Who said a line of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// Where transcript lines go. The demo prints them; embedders render them.
pub trait DisplaySink: Send + Sync {
    fn entry(&self, role: Role, text: &str);
}

/// Discards every entry.
pub struct NullDisplay;

impl DisplaySink for NullDisplay {
    fn entry(&self, _role: Role, _text: &str) {}
}

/// Configuration for a live session
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:5000/ws/live`.
    pub url: String,
    pub vad: VadConfig,
    pub capture: CaptureConfig,
}

impl LiveConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            vad: VadConfig::default(),
            capture: CaptureConfig::default(),
        }
    }

    /// Build from environment variables. `AQUA_LIVE_URL` is required;
    /// `AQUA_VAD_THRESHOLD` and `AQUA_SILENCE_MS` override the VAD defaults.
    pub fn from_env() -> VoiceResult<Self> {
        let url = std::env::var("AQUA_LIVE_URL")
            .map_err(|_| VoiceError::Config("AQUA_LIVE_URL is not set".to_string()))?;
        let mut config = Self::new(url);

        if let Ok(raw) = std::env::var("AQUA_VAD_THRESHOLD") {
            config.vad.threshold = raw
                .parse()
                .map_err(|_| VoiceError::Config(format!("bad AQUA_VAD_THRESHOLD: {}", raw)))?;
        }
        if let Ok(raw) = std::env::var("AQUA_SILENCE_MS") {
            let ms: u64 = raw
                .parse()
                .map_err(|_| VoiceError::Config(format!("bad AQUA_SILENCE_MS: {}", raw)))?;
            config.vad.silence_duration = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

/// Cheap-to-clone control surface over a running session.
#[derive(Clone)]
pub struct SessionHandle {
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    channel: ChannelHandle,
}

impl SessionHandle {
    /// Commit the current utterance now instead of waiting out the silence
    /// debounce. No-op when the user is not speaking.
    pub fn force_commit(&self) {
        let _ = self.event_tx.send(SessionEvent::ForceCommit);
    }

    /// End the session by closing the channel.
    pub fn close(&self) {
        self.channel.close();
    }
}

/// One live voice conversation.
pub struct LiveSession {
    vad: VoiceActivityDetector,
    gate: CaptureGate,
    channel: ChannelHandle,
    playback: PlaybackHandle,
    display: Arc<dyn DisplaySink>,
    status_tx: watch::Sender<SessionStatus>,
    volume_tx: watch::Sender<f32>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    event_rx: mpsc::UnboundedReceiver<SessionEvent>,
    // Capture stops the moment this is dropped.
    _mic_stream: Option<cpal::Stream>,
}

impl LiveSession {
    /// Open the channel, acquire the microphone and spawn the playback
    /// scheduler and capture pump. Any failure here is fatal; nothing is
    /// retried.
    pub async fn connect(config: LiveConfig, display: Arc<dyn DisplaySink>) -> VoiceResult<Self> {
        info!("🎭 Starting live session against {}", config.url);
        let (status_tx, _) = watch::channel(SessionStatus::Connecting);
        let (volume_tx, _) = watch::channel(0.0f32);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let vad = VoiceActivityDetector::new(config.vad.clone())?;
        let channel = DuplexChannel::open(&config.url, event_tx.clone()).await?;
        let playback = PlaybackScheduler::spawn(event_tx.clone())?;

        let gate = CaptureGate::new();
        let capture = AudioCapture::new(config.capture.clone())?;
        let (window_tx, window_rx) = mpsc::unbounded_channel();
        let mic_stream = capture.start(window_tx)?;
        tokio::spawn(run_capture_pump(
            window_rx,
            config.capture,
            gate.clone(),
            channel.clone(),
            event_tx.clone(),
        ));

        status_tx.send_replace(SessionStatus::Ready);
        info!("✅ Live session ready");

        Ok(Self {
            vad,
            gate,
            channel,
            playback,
            display,
            status_tx,
            volume_tx,
            event_tx,
            event_rx,
            _mic_stream: Some(mic_stream),
        })
    }

    /// Observe status transitions.
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Observe the live input level (one value per energy window).
    pub fn volume(&self) -> watch::Receiver<f32> {
        self.volume_tx.subscribe()
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            event_tx: self.event_tx.clone(),
            channel: self.channel.clone(),
        }
    }

    /// Frames the playback scheduler skipped because they failed to decode.
    pub fn decode_failures(&self) -> u64 {
        self.playback.decode_failures()
    }

    /// Run the session loop until the channel closes. Returns `Ok` on a
    /// clean close (local or remote) and `Err` on transport failure.
    pub async fn run(&mut self) -> VoiceResult<()> {
        self.status_tx.send_replace(SessionStatus::Listening);

        let result = loop {
            let Some(event) = self.event_rx.recv().await else {
                break Ok(());
            };
            match event {
                SessionEvent::EnergySample(energy) => {
                    self.volume_tx.send_replace(energy);
                    if let Some(vad_event) = self.vad.sample(energy) {
                        self.apply_vad(vad_event);
                    }
                }
                SessionEvent::ForceCommit => {
                    if let Some(vad_event) = self.vad.force_commit() {
                        self.apply_vad(vad_event);
                    }
                }
                SessionEvent::FrameReceived(frame) => {
                    self.playback.enqueue(frame);
                }
                SessionEvent::ControlReceived(msg) => {
                    self.apply_control(msg);
                }
                SessionEvent::PlaybackStarted => {
                    self.status_tx.send_replace(SessionStatus::Speaking);
                }
                SessionEvent::PlaybackIdle => {
                    self.status_tx.send_replace(SessionStatus::Listening);
                }
                SessionEvent::ChannelClosed => match self.channel.state() {
                    ChannelState::Errored => {
                        self.status_tx.send_replace(SessionStatus::Error);
                        break Err(VoiceError::Connection(
                            "channel ended with a transport error".to_string(),
                        ));
                    }
                    _ => {
                        info!("session ended: channel closed");
                        break Ok(());
                    }
                },
            }
        };

        self.gate.close();
        self.playback.interrupt();
        result
    }

    fn apply_vad(&mut self, event: VadEvent) {
        match event {
            VadEvent::SpeechStart { .. } => {
                // Barge-in: silence the local speaker before telling the
                // remote to stop, so the user never talks over stale audio.
                self.playback.interrupt();
                if let Err(e) = self.channel.send_control(ControlMessage::Interrupt) {
                    warn!("could not send interrupt: {}", e);
                }
                self.gate.open();
                self.status_tx.send_replace(SessionStatus::Listening);
            }
            VadEvent::SpeechEnd { .. } => {
                self.gate.close();
                if let Err(e) = self.channel.send_control(ControlMessage::Commit) {
                    warn!("could not send commit: {}", e);
                }
                self.status_tx.send_replace(SessionStatus::Thinking);
            }
        }
    }

    fn apply_control(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::Transcription { text } => {
                self.display.entry(Role::User, &text);
                self.status_tx.send_replace(SessionStatus::Thinking);
            }
            ControlMessage::TextResponse { text } => {
                self.display.entry(Role::Assistant, &text);
                self.status_tx.send_replace(SessionStatus::Speaking);
            }
            ControlMessage::AudioEnd => {
                // Advisory: playback completion is detected by queue drain.
                debug!("remote signalled end of audio");
            }
            ControlMessage::Commit | ControlMessage::Interrupt => {
                warn!("ignoring client-only control message from remote: {:?}", msg);
            }
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.playback.shutdown();
        self.channel.close();
    }
}
