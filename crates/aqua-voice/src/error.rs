//! Error types for the live voice engine

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the live voice session
///
/// Transport and device-acquisition failures are fatal for the session.
/// Frame-level failures (`Decode`, `MalformedControl`) are recovered locally
/// by skipping the offending frame or message.
#[derive(Error, Debug)]
pub enum VoiceError {
    /// The duplex channel failed to open. Fatal for the session.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A send was attempted after the channel left `Open`. The message is
    /// dropped; callers log and continue (non-fatal if the session is ending).
    #[error("channel is closed")]
    ChannelClosed,

    /// The microphone could not be acquired. Fatal, no retry.
    #[error("microphone unavailable: {0}")]
    MicrophoneUnavailable(String),

    /// One inbound audio frame failed to decode. The frame is skipped and
    /// playback continues.
    #[error("audio decode failed: {0}")]
    Decode(String),

    /// Unparseable inbound control text. Dropped and logged.
    #[error("malformed control message: {0}")]
    MalformedControl(String),

    #[error("audio playback error: {0}")]
    Playback(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("event channel send error: {0}")]
    ChannelSend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::MicrophoneUnavailable(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        VoiceError::MicrophoneUnavailable(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::MicrophoneUnavailable(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for VoiceError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        VoiceError::Connection(err.to_string())
    }
}
