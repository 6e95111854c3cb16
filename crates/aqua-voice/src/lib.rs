//! # Aqua Voice - Live Duplex Voice Sessions
//!
//! This crate implements hands-free, full-duplex voice conversation over a
//! single WebSocket: continuous microphone capture with energy-threshold
//! VAD, strictly ordered playback of synthesized replies, and barge-in that
//! silences the assistant the moment the user starts talking.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Session Coordinator                       │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │   Audio In   │→ │  Energy VAD  │→ │ Capture Gate │       │
//! │  │    (cpal)    │  │ (2s silence) │  │  (100ms pcm) │       │
//! │  └──────────────┘  └──────────────┘  └──────┬───────┘       │
//! │         ↓                                    ↓               │
//! │  ┌──────────────┐   Kill Signal    ┌────────────────┐       │
//! │  │  Audio Out   │←─────────────────│ Duplex Channel │       │
//! │  │   (rodio)    │    (barge-in)    │  (websocket)   │       │
//! │  └──────────────┘                  └────────────────┘       │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod capture;
pub mod channel;
pub mod error;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod vad;

pub use capture::{AudioCapture, CaptureConfig, CaptureGate};
pub use channel::{ChannelHandle, ChannelState, DuplexChannel};
pub use error::{VoiceError, VoiceResult};
pub use playback::{AudioSink, PlaybackHandle, PlaybackScheduler, RodioSink};
pub use protocol::{AudioFrame, ControlMessage};
pub use session::{
    DisplaySink, LiveConfig, LiveSession, NullDisplay, Role, SessionEvent, SessionHandle,
    SessionStatus,
};
pub use vad::{VadConfig, VadEvent, VadState, VoiceActivityDetector};
