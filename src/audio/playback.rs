//! Audio playback to system speakers via cpal.
//!
//! Two pieces: [`PlaybackScheduler`] does the pure start-time bookkeeping
//! that guarantees gapless, non-overlapping fragment playback, and
//! [`PlaybackSink`] owns a persistent cpal output stream fed from a shared
//! sample queue. The stream lives on a dedicated thread because cpal
//! streams are not `Send`; the handle is safe to use from tokio tasks.

use crate::config::AudioConfig;
use crate::error::{MentorError, Result};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, info};

/// Events emitted by the playback sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The sample queue ran dry — the last queued fragment finished playing.
    Drained,
}

/// One scheduled output fragment, in playback-clock seconds.
#[derive(Debug, Clone, Copy)]
struct ScheduledFragment {
    end: f64,
}

/// Start-time bookkeeping for streamed output fragments.
///
/// Fragments arrive at arbitrary wall-clock times; each is assigned a start
/// time no earlier than both the playback clock and the previously scheduled
/// end, so playback is strictly sequential with no overlap regardless of
/// network jitter.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    /// Monotonic cursor: the end time of the last scheduled fragment.
    next_start: f64,
    /// Fragments scheduled but not yet finished.
    scheduled: VecDeque<ScheduledFragment>,
}

impl PlaybackScheduler {
    /// Create an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a fragment of `duration` seconds at playback clock `now`.
    ///
    /// Returns the assigned start time: the later of `now` and the previous
    /// fragment's end.
    pub fn schedule(&mut self, now: f64, duration: f64) -> f64 {
        let start = now.max(self.next_start);
        let end = start + duration;
        self.next_start = end;
        self.scheduled.push_back(ScheduledFragment { end });
        start
    }

    /// Retire every scheduled fragment: the sink reported its queue empty,
    /// so all enqueued audio has played.
    ///
    /// Returns `true` when this call emptied a non-empty schedule — the
    /// single transition on which speaking ends. Comparing per-fragment end
    /// times against the sink clock is deliberately avoided: the ends are
    /// accumulated `f64` sums and routinely exceed the one-division clock
    /// by an ulp.
    pub fn drain(&mut self) -> bool {
        if self.scheduled.is_empty() {
            return false;
        }
        self.scheduled.clear();
        true
    }

    /// Drop every scheduled fragment and reset the cursor (barge-in).
    pub fn clear(&mut self) {
        self.scheduled.clear();
        self.next_start = 0.0;
    }

    /// Whether any fragment remains scheduled.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.scheduled.is_empty()
    }

    /// Number of fragments currently scheduled.
    #[must_use]
    pub fn scheduled_count(&self) -> usize {
        self.scheduled.len()
    }
}

/// Shared state between the playback handle and the audio callback.
struct SinkState {
    queue: VecDeque<f32>,
    /// Total samples consumed from the queue since creation.
    consumed: u64,
    /// Whether the queue held samples the last time the callback ran.
    active: bool,
}

/// Commands for the playback thread.
enum SinkCommand {
    Shutdown,
}

/// Handle to the playback output stream.
///
/// Dropping the handle shuts the audio thread down; `shutdown` does the
/// same explicitly and is idempotent.
pub struct PlaybackSink {
    state: Arc<Mutex<SinkState>>,
    sample_rate: u32,
    cmd_tx: Option<std::sync::mpsc::Sender<SinkCommand>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl PlaybackSink {
    /// Open the output device and start a silent persistent stream.
    ///
    /// `event_tx` receives a [`PlaybackEvent::Drained`] each time the queue
    /// transitions from playing to empty.
    ///
    /// # Errors
    ///
    /// Returns an error if no output device is available or the stream
    /// cannot be created.
    pub fn spawn(
        config: &AudioConfig,
        event_tx: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<Self> {
        let state = Arc::new(Mutex::new(SinkState {
            queue: VecDeque::new(),
            consumed: 0,
            active: false,
        }));

        let (cmd_tx, cmd_rx) = std::sync::mpsc::channel::<SinkCommand>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

        let thread_state = Arc::clone(&state);
        let output_device = config.output_device.clone();
        let sample_rate = config.output_sample_rate;

        let thread = std::thread::Builder::new()
            .name("mentora-playback".into())
            .spawn(move || {
                run_output_stream(
                    output_device,
                    sample_rate,
                    thread_state,
                    event_tx,
                    &ready_tx,
                    &cmd_rx,
                );
            })
            .map_err(|e| MentorError::Audio(format!("failed to spawn playback thread: {e}")))?;

        // Wait for the stream to come up (or fail) before returning.
        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(MentorError::Audio(
                    "playback thread exited before initializing".into(),
                ));
            }
        }

        Ok(Self {
            state,
            sample_rate,
            cmd_tx: Some(cmd_tx),
            thread: Some(thread),
        })
    }

    /// Append a decoded fragment to the output queue.
    pub fn enqueue(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        };
        state.queue.extend(samples.iter().copied());
        state.active = true;
    }

    /// Stop all queued and playing fragments immediately (barge-in).
    ///
    /// Stopping when nothing is playing is tolerated and ignored.
    pub fn stop(&self) {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        };
        state.queue.clear();
        state.active = false;
    }

    /// Playback clock in seconds: total queued audio actually played.
    #[must_use]
    pub fn position_secs(&self) -> f64 {
        let state = match self.state.lock() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        };
        state.consumed as f64 / f64::from(self.sample_rate)
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| MentorError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }

    /// Shut the audio thread down and close the stream.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(SinkCommand::Shutdown);
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PlaybackSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Body of the playback thread: build the stream, then block until shutdown.
fn run_output_stream(
    output_device: Option<String>,
    sample_rate: u32,
    state: Arc<Mutex<SinkState>>,
    event_tx: mpsc::UnboundedSender<PlaybackEvent>,
    ready_tx: &std::sync::mpsc::Sender<Result<()>>,
    cmd_rx: &std::sync::mpsc::Receiver<SinkCommand>,
) {
    let stream = match build_output_stream(output_device, sample_rate, state, event_tx) {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(MentorError::Audio(format!(
            "failed to start output stream: {e}"
        ))));
        return;
    }

    let _ = ready_tx.send(Ok(()));
    info!("audio playback started: {sample_rate}Hz mono");

    // Hold the stream alive until shutdown; a closed channel counts too.
    let _ = cmd_rx.recv();

    drop(stream);
    info!("audio playback stopped");
}

fn build_output_stream(
    output_device: Option<String>,
    sample_rate: u32,
    state: Arc<Mutex<SinkState>>,
    event_tx: mpsc::UnboundedSender<PlaybackEvent>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = if let Some(ref name) = output_device {
        host.output_devices()
            .map_err(|e| MentorError::Audio(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| MentorError::Audio(format!("output device '{name}' not found")))?
    } else {
        host.default_output_device()
            .ok_or_else(|| MentorError::Audio("no default output device".into()))?
    };

    let device_name = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("using output device: {device_name}");

    let stream_config = StreamConfig {
        channels: 1,
        sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let mut s = match state.lock() {
                    Ok(s) => s,
                    Err(p) => p.into_inner(),
                };
                for out in data.iter_mut() {
                    if let Some(sample) = s.queue.pop_front() {
                        *out = sample;
                        s.consumed += 1;
                    } else {
                        *out = 0.0;
                    }
                }
                if s.active && s.queue.is_empty() {
                    s.active = false;
                    let _ = event_tx.send(PlaybackEvent::Drained);
                }
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| MentorError::Audio(format!("failed to build output stream: {e}")))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn fragments_never_overlap() {
        let mut sched = PlaybackScheduler::new();
        // Fragments arriving at arbitrary clock times with known durations.
        let arrivals = [
            (0.0, 0.5),
            (0.1, 0.5), // arrives while first still playing
            (0.2, 0.3),
            (2.5, 0.4), // arrives after a gap
            (2.55, 0.1),
        ];
        let mut prev_end = 0.0;
        for (now, duration) in arrivals {
            let start = sched.schedule(now, duration);
            assert!(
                start >= prev_end,
                "fragment starting at {start} overlaps previous end {prev_end}"
            );
            assert!(start >= now);
            prev_end = start + duration;
        }
    }

    #[test]
    fn gap_in_arrivals_snaps_start_to_clock() {
        let mut sched = PlaybackScheduler::new();
        sched.schedule(0.0, 0.5);
        // Arrives well after the first fragment ended: starts at the clock.
        let start = sched.schedule(3.0, 0.5);
        assert!((start - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn back_to_back_fragments_are_gapless() {
        let mut sched = PlaybackScheduler::new();
        let s1 = sched.schedule(0.0, 0.25);
        let s2 = sched.schedule(0.01, 0.25);
        let s3 = sched.schedule(0.02, 0.25);
        assert!((s2 - (s1 + 0.25)).abs() < f64::EPSILON);
        assert!((s3 - (s2 + 0.25)).abs() < f64::EPSILON);
    }

    #[test]
    fn drain_retires_exactly_once() {
        let mut sched = PlaybackScheduler::new();
        sched.schedule(0.0, 0.5);
        sched.schedule(0.0, 0.5);

        assert!(sched.drain()); // schedule emptied: speaking ends here
        assert!(sched.is_idle());
        assert!(!sched.drain()); // already empty: no second transition
    }

    #[test]
    fn drain_retires_fragments_whose_ends_outrun_the_sink_clock() {
        // Fragment durations are per-fragment divisions summed into the end
        // times, while the sink clock is a single division over the total
        // consumed samples. For these two lengths at 24 kHz the last end is
        // one ulp past the clock, so a `end <= clock` retire would miss.
        let mut sched = PlaybackScheduler::new();
        let d1 = 32_723.0 / 24_000.0;
        let d2 = 30_762.0 / 24_000.0;
        let s1 = sched.schedule(0.0, d1);
        let s2 = sched.schedule(0.0, d2);
        let last_end = s2 + d2;
        let clock = (32_723.0 + 30_762.0) / 24_000.0;
        assert!(last_end > clock, "expected the rounding gap: {last_end} vs {clock}");
        assert!((s1 - 0.0).abs() < f64::EPSILON);

        assert!(sched.drain());
        assert!(sched.is_idle());
    }

    #[test]
    fn clear_resets_cursor_and_schedule() {
        let mut sched = PlaybackScheduler::new();
        sched.schedule(0.0, 1.0);
        sched.schedule(0.0, 1.0);
        sched.clear();
        assert!(sched.is_idle());
        assert_eq!(sched.scheduled_count(), 0);
        // Cursor reset: next fragment starts at its arrival clock.
        let start = sched.schedule(0.3, 0.5);
        assert!((start - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn idle_scheduler_drain_is_noop() {
        let mut sched = PlaybackScheduler::new();
        assert!(!sched.drain());
        assert!(sched.is_idle());
    }
}
