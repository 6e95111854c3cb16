//! Strictly ordered playback of inbound audio frames
//!
//! The scheduler owns the playback queue and guarantees FIFO, non-overlapping
//! playback: one frame is decoded and played to completion, then the next is
//! dequeued automatically. Malformed frames are skipped, never fatal.
//! `interrupt()` is the barge-in path: hard stop plus a full queue clear in
//! one step, with no partial drain left behind.
//!
//! The scheduler runs on a dedicated thread because the rodio output stream
//! is not `Send` on some platforms; the sink is created inside that thread
//! (same pattern as the capture/VAD threads).

use crate::error::{VoiceError, VoiceResult};
use crate::protocol::AudioFrame;
use crate::session::SessionEvent;
use rodio::Source;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How often the scheduler thread polls for frame completion between
/// commands.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Output seam: decodes and plays one audio unit at a time. `RodioSink` is
/// the device-backed implementation; tests substitute an in-memory one.
pub trait AudioSink {
    /// Decode `bytes` and begin playing them as one unit. Returns
    /// `VoiceError::Decode` when the frame is malformed; nothing is queued
    /// in that case.
    fn play(&self, bytes: &[u8]) -> VoiceResult<()>;

    /// Whether the current unit has finished (or was stopped).
    fn is_idle(&self) -> bool;

    /// Hard stop of the current unit, no fade. Safe to call when idle.
    fn stop(&self);
}

/// Speaker-backed sink. Holds the output device exclusively for the session
/// lifetime.
pub struct RodioSink {
    _stream: rodio::OutputStream,
    _stream_handle: rodio::OutputStreamHandle,
    sink: rodio::Sink,
}

impl RodioSink {
    pub fn new() -> VoiceResult<Self> {
        let (stream, stream_handle) = rodio::OutputStream::try_default()
            .map_err(|e| VoiceError::Playback(e.to_string()))?;
        let sink = rodio::Sink::try_new(&stream_handle)
            .map_err(|e| VoiceError::Playback(e.to_string()))?;
        info!("🔊 playback sink ready");
        Ok(Self {
            _stream: stream,
            _stream_handle: stream_handle,
            sink,
        })
    }
}

impl AudioSink for RodioSink {
    fn play(&self, bytes: &[u8]) -> VoiceResult<()> {
        let cursor = Cursor::new(bytes.to_vec());
        let source = rodio::Decoder::new(cursor).map_err(|e| VoiceError::Decode(e.to_string()))?;
        self.sink.append(source.convert_samples::<f32>());
        Ok(())
    }

    fn is_idle(&self) -> bool {
        self.sink.empty()
    }

    fn stop(&self) {
        self.sink.stop();
    }
}

enum Cmd {
    Enqueue(AudioFrame),
    Interrupt,
    Shutdown,
}

/// Cheap-to-clone control handle over the scheduler thread.
#[derive(Clone)]
pub struct PlaybackHandle {
    cmd_tx: std_mpsc::Sender<Cmd>,
    is_playing: Arc<AtomicBool>,
    decode_failures: Arc<AtomicU64>,
}

impl PlaybackHandle {
    /// Append a frame to the queue; playback starts immediately when the
    /// scheduler is idle.
    pub fn enqueue(&self, frame: AudioFrame) {
        if self.cmd_tx.send(Cmd::Enqueue(frame)).is_err() {
            warn!("playback scheduler is gone, dropping frame");
        }
    }

    /// Barge-in: stop the active unit and clear the queue together.
    /// Idempotent; safe to call when nothing is playing.
    pub fn interrupt(&self) {
        let _ = self.cmd_tx.send(Cmd::Interrupt);
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing.load(Ordering::SeqCst)
    }

    /// Frames skipped because they failed to decode.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::SeqCst)
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.cmd_tx.send(Cmd::Shutdown);
    }
}

/// Spawns the scheduler thread and returns its handle.
pub struct PlaybackScheduler;

impl PlaybackScheduler {
    /// Spawn with the default speaker sink.
    pub fn spawn(event_tx: mpsc::UnboundedSender<SessionEvent>) -> VoiceResult<PlaybackHandle> {
        Self::spawn_with(RodioSink::new, event_tx)
    }

    /// Spawn with a caller-provided sink. The factory runs inside the
    /// scheduler thread, so the sink type does not need to be `Send`.
    pub fn spawn_with<S, F>(
        make_sink: F,
        event_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> VoiceResult<PlaybackHandle>
    where
        S: AudioSink,
        F: FnOnce() -> VoiceResult<S> + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let is_playing = Arc::new(AtomicBool::new(false));
        let decode_failures = Arc::new(AtomicU64::new(0));

        let thread_playing = is_playing.clone();
        let thread_failures = decode_failures.clone();
        thread::Builder::new()
            .name("playback-scheduler".into())
            .spawn(move || {
                let sink = match make_sink() {
                    Ok(s) => {
                        let _ = ready_tx.send(Ok(()));
                        s
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                run_scheduler(sink, cmd_rx, thread_playing, thread_failures, event_tx);
                debug!("playback scheduler thread ended");
            })
            .map_err(|e| VoiceError::Playback(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| VoiceError::Playback("scheduler thread died during init".to_string()))??;

        Ok(PlaybackHandle {
            cmd_tx,
            is_playing,
            decode_failures,
        })
    }
}

fn run_scheduler<S: AudioSink>(
    sink: S,
    cmd_rx: std_mpsc::Receiver<Cmd>,
    is_playing: Arc<AtomicBool>,
    decode_failures: Arc<AtomicU64>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut queue: VecDeque<AudioFrame> = VecDeque::new();
    // Whether one unit is in the sink right now. Invariant: at most one.
    let mut active = false;

    'outer: loop {
        // Block for the next command, then drain the rest of the burst so a
        // skipped frame never reports idle while its successors are still in
        // the command queue.
        let mut pending = Vec::new();
        match cmd_rx.recv_timeout(POLL_INTERVAL) {
            Ok(cmd) => pending.push(cmd),
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                sink.stop();
                break;
            }
        }
        while let Ok(cmd) = cmd_rx.try_recv() {
            pending.push(cmd);
        }

        for cmd in pending {
            match cmd {
                Cmd::Enqueue(frame) => queue.push_back(frame),
                Cmd::Interrupt => {
                    // Active unit and queued frames go together, atomically
                    // from the session's point of view.
                    sink.stop();
                    queue.clear();
                    active = false;
                    is_playing.store(false, Ordering::SeqCst);
                    debug!("playback interrupted, queue cleared");
                }
                Cmd::Shutdown => {
                    sink.stop();
                    break 'outer;
                }
            }
        }

        if active && sink.is_idle() {
            active = false;
        }

        if !active {
            while let Some(frame) = queue.pop_front() {
                match sink.play(frame.as_bytes()) {
                    Ok(()) => {
                        active = true;
                        if !is_playing.swap(true, Ordering::SeqCst) {
                            let _ = event_tx.send(SessionEvent::PlaybackStarted);
                        }
                        break;
                    }
                    Err(e) => {
                        // Skip the malformed frame, keep the queue moving.
                        decode_failures.fetch_add(1, Ordering::SeqCst);
                        warn!("skipping frame that failed to decode: {}", e);
                    }
                }
            }
            if !active && is_playing.swap(false, Ordering::SeqCst) {
                let _ = event_tx.send(SessionEvent::PlaybackIdle);
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{fake_sink, SinkProbe};
    use super::*;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn spawn_fake(
        auto_finish: bool,
    ) -> (
        PlaybackHandle,
        SinkProbe,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (sink, probe) = fake_sink(auto_finish);
        let handle = PlaybackScheduler::spawn_with(move || Ok(sink), event_tx).unwrap();
        (handle, probe, event_rx)
    }

    async fn wait_for_idle_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) {
        timeout(WAIT, async {
            while let Some(event) = rx.recv().await {
                if matches!(event, SessionEvent::PlaybackIdle) {
                    return;
                }
            }
            panic!("event channel closed before PlaybackIdle");
        })
        .await
        .expect("no PlaybackIdle within timeout");
    }

    fn wait_until(cond: impl Fn() -> bool) {
        let deadline = std::time::Instant::now() + WAIT;
        while !cond() {
            assert!(std::time::Instant::now() < deadline, "condition timed out");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[tokio::test]
    async fn frames_play_in_fifo_order() {
        let (handle, probe, mut event_rx) = spawn_fake(true);

        handle.enqueue(AudioFrame::from(b"one".to_vec()));
        handle.enqueue(AudioFrame::from(b"two".to_vec()));
        handle.enqueue(AudioFrame::from(b"three".to_vec()));

        wait_for_idle_event(&mut event_rx).await;
        wait_until(|| probe.played().len() == 3);
        assert_eq!(
            probe.played(),
            vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
        );
        wait_until(|| !handle.is_playing());
        assert_eq!(handle.decode_failures(), 0);
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped_not_fatal() {
        let (handle, probe, mut event_rx) = spawn_fake(true);

        handle.enqueue(AudioFrame::from(b"one".to_vec()));
        handle.enqueue(AudioFrame::from(b"!bad frame".to_vec()));
        handle.enqueue(AudioFrame::from(b"three".to_vec()));

        wait_for_idle_event(&mut event_rx).await;
        wait_until(|| handle.decode_failures() == 1 && probe.played().len() == 2);
        assert_eq!(probe.played(), vec![b"one".to_vec(), b"three".to_vec()]);
    }

    #[tokio::test]
    async fn playback_started_emitted_on_first_frame() {
        let (handle, _probe, mut event_rx) = spawn_fake(false);

        handle.enqueue(AudioFrame::from(b"one".to_vec()));

        let event = timeout(WAIT, event_rx.recv()).await.unwrap().unwrap();
        assert!(matches!(event, SessionEvent::PlaybackStarted));
        wait_until(|| handle.is_playing());
    }

    #[tokio::test]
    async fn interrupt_clears_active_unit_and_queue_together() {
        let (handle, probe, _event_rx) = spawn_fake(false);

        handle.enqueue(AudioFrame::from(b"one".to_vec()));
        handle.enqueue(AudioFrame::from(b"two".to_vec()));
        handle.enqueue(AudioFrame::from(b"three".to_vec()));
        wait_until(|| handle.is_playing());

        // Frame one finishes; frame two starts.
        probe.finish_current();
        wait_until(|| probe.played().len() == 2);

        handle.interrupt();
        wait_until(|| !handle.is_playing());
        assert!(probe.stops() >= 1);

        // Frame three was dropped: completing the stopped unit must not
        // resume the queue.
        probe.finish_current();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(probe.played(), vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[tokio::test]
    async fn interrupt_is_idempotent_when_nothing_plays() {
        let (handle, probe, _event_rx) = spawn_fake(false);

        handle.interrupt();
        handle.interrupt();
        wait_until(|| probe.stops() >= 2);
        assert!(!handle.is_playing());

        // Scheduler still works after spurious interrupts.
        handle.enqueue(AudioFrame::from(b"later".to_vec()));
        wait_until(|| probe.played() == vec![b"later".to_vec()]);
    }

    #[tokio::test]
    async fn resumes_after_idle() {
        let (handle, probe, mut event_rx) = spawn_fake(true);

        handle.enqueue(AudioFrame::from(b"one".to_vec()));
        wait_for_idle_event(&mut event_rx).await;

        handle.enqueue(AudioFrame::from(b"two".to_vec()));
        wait_for_idle_event(&mut event_rx).await;
        assert_eq!(probe.played(), vec![b"one".to_vec(), b"two".to_vec()]);
    }
}
