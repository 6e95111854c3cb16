//! Energy-threshold voice activity detection
//!
//! Converts a periodic sample of normalized signal energy into discrete
//! speech-boundary events. Silence is debounced: every above-threshold
//! sample re-arms a single deadline, and the segment commits only once the
//! deadline passes with no further crossing. Re-arming replaces the
//! deadline; there are never two timers in flight.

use crate::error::{VoiceError, VoiceResult};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Configuration for VAD detection
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Normalized energy in [0,1] above this counts as speech (default 0.012).
    /// Raise to reject ambient noise, lower to catch quiet speech onsets.
    pub threshold: f32,

    /// Continuous silence required before a segment commits (default 2000ms).
    /// Shorter values chop trailing words; longer values feel sluggish.
    pub silence_duration: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.012,
            silence_duration: Duration::from_millis(2000),
        }
    }
}

/// Speech/silence state machine. Owned exclusively by the detector and
/// mutated only by its own `sample`/`force_commit` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// No speech segment in progress.
    Idle,
    /// Speech in progress; the silence deadline re-arms on every crossing.
    Speaking,
    /// Below threshold after speech; the silence deadline is counting down.
    SilencePending,
}

/// Speech-boundary events emitted by the detector
#[derive(Debug, Clone, PartialEq)]
pub enum VadEvent {
    /// First above-threshold sample of a segment. This is the barge-in
    /// trigger: emitted at most once per segment.
    SpeechStart { timestamp: DateTime<Utc> },

    /// Segment committed: the silence deadline passed, or the commit was
    /// forced. Emitted exactly once per segment.
    SpeechEnd { timestamp: DateTime<Utc> },
}

/// Voice activity detector over a normalized energy signal
///
/// Feed it one sample per tick (any fixed cadence of 20 Hz or more). There
/// is no minimum speech duration: a single above-threshold sample followed
/// by silence still commits.
pub struct VoiceActivityDetector {
    config: VadConfig,
    state: VadState,
    /// The single cancelable silence deadline. Re-arming means replacing it.
    deadline: Option<Instant>,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> VoiceResult<Self> {
        if !(0.0..=1.0).contains(&config.threshold) {
            return Err(VoiceError::Config(format!(
                "VAD threshold must be in [0,1], got {}",
                config.threshold
            )));
        }
        if config.silence_duration.is_zero() {
            return Err(VoiceError::Config(
                "VAD silence duration must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            config,
            state: VadState::Idle,
            deadline: None,
        })
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    /// Process one energy sample against the wall clock.
    pub fn sample(&mut self, energy: f32) -> Option<VadEvent> {
        self.sample_at(energy, Instant::now())
    }

    /// Process one energy sample at an explicit instant. Tests inject
    /// synthetic clocks here; `sample` is the production entry point.
    pub fn sample_at(&mut self, energy: f32, now: Instant) -> Option<VadEvent> {
        if energy > self.config.threshold {
            // Cancel-then-reschedule: one deadline, re-armed on every crossing.
            self.deadline = Some(now + self.config.silence_duration);
            match self.state {
                VadState::Idle => {
                    info!("speech start (energy {:.4})", energy);
                    self.state = VadState::Speaking;
                    Some(VadEvent::SpeechStart {
                        timestamp: Utc::now(),
                    })
                }
                VadState::SilencePending => {
                    debug!("speech resumed before deadline");
                    self.state = VadState::Speaking;
                    None
                }
                VadState::Speaking => None,
            }
        } else {
            match self.state {
                VadState::Idle => None,
                VadState::Speaking | VadState::SilencePending => {
                    self.state = VadState::SilencePending;
                    match self.deadline {
                        Some(deadline) if now >= deadline => self.commit(),
                        _ => None,
                    }
                }
            }
        }
    }

    /// Manual commit (e.g. tap-to-send): cancels the pending deadline and
    /// ends the segment immediately regardless of current energy. No-op
    /// when no segment is in progress.
    pub fn force_commit(&mut self) -> Option<VadEvent> {
        match self.state {
            VadState::Idle => None,
            VadState::Speaking | VadState::SilencePending => {
                info!("forced commit");
                self.commit()
            }
        }
    }

    fn commit(&mut self) -> Option<VadEvent> {
        info!("speech end (commit)");
        self.state = VadState::Idle;
        self.deadline = None;
        Some(VadEvent::SpeechEnd {
            timestamp: Utc::now(),
        })
    }
}
