//! Microphone capture using CPAL
//!
//! The capture stream runs for the whole session and never stops on speech
//! boundaries. Gating happens downstream: chunks produced while the gate is
//! closed are discarded, not buffered, so nothing stale is flushed when the
//! gate reopens.

use crate::channel::ChannelHandle;
use crate::error::{VoiceError, VoiceResult};
use crate::protocol::AudioFrame;
use crate::session::SessionEvent;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Sample rate in Hz (default: 16000)
    pub sample_rate: u32,

    /// Number of channels (default: 1 for mono)
    pub channels: u16,

    /// Energy measurement window in ms (default: 30). One normalized energy
    /// sample is produced per window, feeding the VAD and the volume meter.
    pub energy_window_ms: u32,

    /// Outbound chunk length in ms (default: 100).
    pub chunk_ms: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            energy_window_ms: 30,
            chunk_ms: 100,
        }
    }
}

impl CaptureConfig {
    /// Samples per energy window (480 at the defaults).
    pub fn window_samples(&self) -> usize {
        (self.sample_rate as usize * self.energy_window_ms as usize) / 1000
    }

    /// Samples per outbound chunk (1600 at the defaults).
    pub fn chunk_samples(&self) -> usize {
        (self.sample_rate as usize * self.chunk_ms as usize) / 1000
    }
}

/// Switch between the always-on capture stream and the channel. Open while
/// the user is speaking (plus the silence debounce window), closed otherwise.
#[derive(Clone)]
pub struct CaptureGate(Arc<AtomicBool>);

impl CaptureGate {
    /// Gates start closed; speech onset opens them.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn open(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for CaptureGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Microphone capture system
pub struct AudioCapture {
    config: CaptureConfig,
    device: Device,
    stream_config: StreamConfig,
}

impl AudioCapture {
    /// Acquire the default input device. Failure here is fatal for the
    /// session; there is no retry.
    pub fn new(config: CaptureConfig) -> VoiceResult<Self> {
        info!(
            "🎤 Initializing capture ({}Hz, {} channels)",
            config.sample_rate, config.channels
        );

        let device = cpal::default_host().default_input_device().ok_or_else(|| {
            VoiceError::MicrophoneUnavailable("no input device available".to_string())
        })?;

        info!(
            "📱 Using input device: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );

        // Validate that the device exists and is usable.
        let _default_config = device.default_input_config()?;

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            config,
            device,
            stream_config,
        })
    }

    /// Start capturing. Windows of `energy_window_ms` samples are sent to
    /// `window_tx` for the whole session; the returned stream must be kept
    /// alive or capture stops.
    pub fn start(self, window_tx: mpsc::UnboundedSender<Vec<f32>>) -> VoiceResult<Stream> {
        let window_size = self.config.window_samples();
        let mut sample_buffer: Vec<f32> = Vec::with_capacity(window_size);

        let stream = self.device.build_input_stream(
            &self.stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    sample_buffer.push(sample);
                    if sample_buffer.len() >= window_size {
                        if window_tx.send(std::mem::take(&mut sample_buffer)).is_err() {
                            // Session is gone; nothing useful left to do here.
                            return;
                        }
                        sample_buffer.reserve(window_size);
                    }
                }
            },
            move |err| {
                warn!("capture stream error: {}", err);
            },
            None,
        )?;

        stream.play()?;
        info!("✅ Capture started");

        Ok(stream)
    }

    /// List available input devices
    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;

        let mut device_names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                device_names.push(name);
            }
        }

        Ok(device_names)
    }
}

/// Root-mean-square energy of a sample window, normalized to [0,1] for
/// full-scale input.
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Convert f32 samples to 16-bit little-endian PCM bytes for the wire.
pub fn pcm_to_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Fan captured windows out to the session (energy) and the channel (audio).
///
/// Every window yields one `EnergySample` regardless of the gate, so the VAD
/// and volume meter keep running through silence. Chunk bytes only go to the
/// channel while the gate is open; closed-gate chunks are dropped on the
/// floor.
pub async fn run_capture_pump(
    mut window_rx: mpsc::UnboundedReceiver<Vec<f32>>,
    config: CaptureConfig,
    gate: CaptureGate,
    channel: ChannelHandle,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) {
    let chunk_size = config.chunk_samples();
    let mut chunk: Vec<f32> = Vec::with_capacity(chunk_size);

    while let Some(window) = window_rx.recv().await {
        let energy = rms_energy(&window);
        if event_tx.send(SessionEvent::EnergySample(energy)).is_err() {
            break;
        }

        chunk.extend_from_slice(&window);
        while chunk.len() >= chunk_size {
            let samples: Vec<f32> = chunk.drain(..chunk_size).collect();
            if gate.is_open() {
                let frame = AudioFrame::from(pcm_to_bytes(&samples));
                if let Err(e) = channel.send_binary(frame) {
                    // Channel is gone; the session will see ChannelClosed.
                    debug!("dropping captured chunk: {}", e);
                }
            }
        }
    }
    debug!("capture pump ended");
}
