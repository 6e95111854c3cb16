//! Wire protocol for the live duplex channel
//!
//! Two frame shapes flow over the socket: binary frames carrying raw audio
//! bytes in either direction, and text frames carrying a JSON object with a
//! `type` tag. `transcription`, `text_response` and `audio_end` are
//! server→client; `commit` and `interrupt` are client→server.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A one-shot control message. No identity beyond its tag and payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Recognized user speech (inbound only).
    Transcription { text: String },
    /// Assistant reply text (inbound only).
    TextResponse { text: String },
    /// Advisory end-of-utterance marker (inbound only). Playback completion
    /// is detected by queue-empty, never by this.
    AudioEnd,
    /// Marks the end of one user utterance (outbound only).
    Commit,
    /// Tells the remote to stop any in-flight synthesis for this turn
    /// (outbound only).
    Interrupt,
}

/// An opaque audio buffer. Outbound frames are captured speech chunks,
/// inbound frames are synthesized speech chunks. There is no ordering field;
/// ordering is arrival order on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame(Bytes);

impl AudioFrame {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for AudioFrame {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for AudioFrame {
    fn from(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }
}
