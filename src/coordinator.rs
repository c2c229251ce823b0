//! Live conversation coordinator that wires capture, session, and playback.
//!
//! Owns the full lifecycle of a voice conversation: microphone frames flow
//! into the live session, streamed responses flow out into the playback
//! sink, and transcription fragments are reconciled into the shared
//! transcript log. A single event loop task multiplexes all three channels
//! and tears everything down when the cancellation token fires.

use crate::audio::codec;
use crate::audio::{CaptureFrame, CpalCapture, PlaybackEvent, PlaybackScheduler, PlaybackSink};
use crate::config::MentorConfig;
use crate::error::Result;
use crate::profile::{MIC_ERROR_LINE, SESSION_ERROR_LINE, StudentProfile};
use crate::session::{LiveSession, SessionEvent};
use crate::transcript::{Sender as TranscriptSender, TranscriptLog};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capture channel buffer size, in frames.
const CAPTURE_CHANNEL_SIZE: usize = 64;

/// Event channel capacity for UI subscribers.
const EVENT_CHANNEL_SIZE: usize = 64;

/// Notifications for UI frontends.
///
/// The transcript itself lives behind [`Coordinator::transcript`]; these
/// events only signal that something changed and the view should refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationEvent {
    /// The transcript log gained or rewrote a message.
    TranscriptChanged,
    /// The microphone/session went up or down.
    ListeningChanged(bool),
    /// Mentor audio started or finished playing.
    SpeakingChanged(bool),
}

/// Handles for a running conversation, dropped together on teardown.
struct ActiveConversation {
    cancel: CancellationToken,
    capture_handle: JoinHandle<()>,
    loop_handle: JoinHandle<()>,
}

/// Orchestrates one live voice conversation at a time.
///
/// `start` is a no-op while a conversation is active and `stop` is a no-op
/// while idle, so UI toggles can call them without guarding.
pub struct Coordinator {
    config: MentorConfig,
    transcript: Arc<Mutex<TranscriptLog>>,
    listening: Arc<AtomicBool>,
    speaking: Arc<AtomicBool>,
    event_tx: broadcast::Sender<ConversationEvent>,
    active: Option<ActiveConversation>,
}

impl Coordinator {
    /// Create an idle coordinator.
    #[must_use]
    pub fn new(config: MentorConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            config,
            transcript: Arc::new(Mutex::new(TranscriptLog::new())),
            listening: Arc::new(AtomicBool::new(false)),
            speaking: Arc::new(AtomicBool::new(false)),
            event_tx,
            active: None,
        }
    }

    /// Shared transcript log, also written to by the conversation loop.
    #[must_use]
    pub fn transcript(&self) -> Arc<Mutex<TranscriptLog>> {
        Arc::clone(&self.transcript)
    }

    /// Subscribe to change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.event_tx.subscribe()
    }

    /// Whether a conversation is currently active.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Whether mentor audio is currently playing.
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    /// Start a live conversation for the given student.
    ///
    /// No-op if a conversation is already active. Microphone and device
    /// failures are absorbed: a mentor-authored error line is appended to
    /// the transcript and the coordinator stays idle.
    ///
    /// # Errors
    ///
    /// Returns an error only when the API key cannot be resolved; device
    /// and connection problems surface through the transcript instead.
    pub fn start(&mut self, profile: &StudentProfile) -> Result<()> {
        if self.listening.load(Ordering::SeqCst) {
            debug!("start ignored: conversation already active");
            return Ok(());
        }
        // A conversation that ended on its own leaves its handles behind;
        // reap them so the old token cannot outlive this restart.
        self.stop();

        let api_key = self.config.api_key.resolve()?;

        let capture = match CpalCapture::new(&self.config.audio) {
            Ok(c) => c,
            Err(e) => {
                warn!("microphone unavailable: {e}");
                self.push_mentor_line(MIC_ERROR_LINE);
                return Ok(());
            }
        };

        let (playback_tx, playback_rx) = mpsc::unbounded_channel::<PlaybackEvent>();
        let sink = match PlaybackSink::spawn(&self.config.audio, playback_tx) {
            Ok(s) => s,
            Err(e) => {
                warn!("speaker unavailable: {e}");
                self.push_mentor_line(SESSION_ERROR_LINE);
                return Ok(());
            }
        };

        let (session, session_rx) = match LiveSession::connect(
            &self.config.session,
            &api_key,
            &profile.system_instruction(),
        ) {
            Ok(pair) => pair,
            Err(e) => {
                warn!("live session connect failed: {e}");
                self.push_mentor_line(SESSION_ERROR_LINE);
                return Ok(());
            }
        };

        let cancel = CancellationToken::new();
        let (frame_tx, frame_rx) = mpsc::channel::<CaptureFrame>(CAPTURE_CHANNEL_SIZE);

        // Fresh flags per conversation: a previous loop still tearing down
        // only ever clears its own clones.
        self.listening = Arc::new(AtomicBool::new(true));
        self.speaking = Arc::new(AtomicBool::new(false));

        let capture_handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = capture.run(frame_tx, cancel).await {
                    error!("capture stage error: {e}");
                }
            })
        };

        let loop_handle = {
            let ctx = LoopContext {
                transcript: Arc::clone(&self.transcript),
                listening: Arc::clone(&self.listening),
                speaking: Arc::clone(&self.speaking),
                event_tx: self.event_tx.clone(),
                output_sample_rate: self.config.audio.output_sample_rate,
            };
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run_conversation_loop(ctx, session, sink, frame_rx, session_rx, playback_rx, cancel)
                    .await;
            })
        };

        let _ = self.event_tx.send(ConversationEvent::ListeningChanged(true));
        info!("conversation started for {}", profile.name);

        self.active = Some(ActiveConversation {
            cancel,
            capture_handle,
            loop_handle,
        });
        Ok(())
    }

    /// Stop the active conversation. No-op while idle; safe to call twice.
    pub fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            debug!("stop ignored: no active conversation");
            return;
        };
        active.cancel.cancel();
        // Cleared here as well as in the loop teardown, so an immediate
        // restart does not see a stale true and bail out. The swap guard
        // keeps the down notification single-shot across both sites.
        if self.listening.swap(false, Ordering::SeqCst) {
            let _ = self.event_tx.send(ConversationEvent::ListeningChanged(false));
        }
        // The loop task performs the actual teardown; the handles are left
        // to finish on their own.
        drop(active.capture_handle);
        drop(active.loop_handle);
        info!("conversation stop requested");
    }

    /// Reset the transcript and end any active conversation.
    pub fn reset(&mut self) {
        self.stop();
        self.with_log(TranscriptLog::reset);
        let _ = self.event_tx.send(ConversationEvent::TranscriptChanged);
    }

    /// Append a finalized mentor message outside the live session.
    pub fn push_mentor_line(&self, text: &str) -> String {
        let id = self.with_log(|log| log.push_final(TranscriptSender::Mentor, text));
        let _ = self.event_tx.send(ConversationEvent::TranscriptChanged);
        id
    }

    /// Snapshot of the message log for the presentation layer.
    #[must_use]
    pub fn snapshot(&self) -> Vec<crate::transcript::Message> {
        self.with_log(|log| log.snapshot())
    }

    /// Id of the most recent mentor message, if any.
    #[must_use]
    pub fn last_mentor_id(&self) -> Option<String> {
        self.with_log(|log| log.last_mentor_id().map(str::to_owned))
    }

    /// Text of the most recent finalized user message, if any.
    #[must_use]
    pub fn last_final_user_text(&self) -> Option<String> {
        self.with_log(|log| log.last_final_user_text().map(str::to_owned))
    }

    /// Mark a mentor message as having an illustration request in flight.
    pub fn begin_image(&self, id: &str) {
        self.with_log(|log| log.begin_image(id));
        let _ = self.event_tx.send(ConversationEvent::TranscriptChanged);
    }

    /// Attach a generated illustration to a mentor message.
    pub fn attach_image(&self, id: &str, url: String) {
        self.with_log(|log| log.attach_image(id, url));
        let _ = self.event_tx.send(ConversationEvent::TranscriptChanged);
    }

    /// Revert a failed illustration request. Absorbed silently: no chat
    /// message, only the progress flag is cleared.
    pub fn abort_image(&self, id: &str) {
        self.with_log(|log| log.abort_image(id));
        let _ = self.event_tx.send(ConversationEvent::TranscriptChanged);
    }

    fn with_log<R>(&self, f: impl FnOnce(&mut TranscriptLog) -> R) -> R {
        let mut log = match self.transcript.lock() {
            Ok(log) => log,
            Err(p) => p.into_inner(),
        };
        f(&mut log)
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Shared state the conversation loop needs from the coordinator.
struct LoopContext {
    transcript: Arc<Mutex<TranscriptLog>>,
    listening: Arc<AtomicBool>,
    speaking: Arc<AtomicBool>,
    event_tx: broadcast::Sender<ConversationEvent>,
    output_sample_rate: u32,
}

impl LoopContext {
    fn emit(&self, ev: ConversationEvent) {
        let _ = self.event_tx.send(ev);
    }

    fn with_transcript<R>(&self, f: impl FnOnce(&mut TranscriptLog) -> R) -> R {
        let mut log = match self.transcript.lock() {
            Ok(log) => log,
            Err(p) => p.into_inner(),
        };
        f(&mut log)
    }

    fn set_speaking(&self, value: bool) {
        if self.speaking.swap(value, Ordering::SeqCst) != value {
            self.emit(ConversationEvent::SpeakingChanged(value));
        }
    }
}

/// Output side of the conversation loop. [`PlaybackSink`] is the real
/// implementation; the seam keeps the loop logic runnable without audio
/// hardware.
trait OutputSink {
    fn enqueue(&self, samples: &[f32]);
    fn stop(&self);
    fn position_secs(&self) -> f64;
    fn shutdown(&mut self);
}

impl OutputSink for PlaybackSink {
    fn enqueue(&self, samples: &[f32]) {
        PlaybackSink::enqueue(self, samples);
    }

    fn stop(&self) {
        PlaybackSink::stop(self);
    }

    fn position_secs(&self) -> f64 {
        PlaybackSink::position_secs(self)
    }

    fn shutdown(&mut self) {
        PlaybackSink::shutdown(self);
    }
}

/// Multiplexes capture frames, session events, and playback events until
/// cancelled or the session ends, then tears everything down.
async fn run_conversation_loop<S: OutputSink>(
    ctx: LoopContext,
    session: LiveSession,
    mut sink: S,
    mut frame_rx: mpsc::Receiver<CaptureFrame>,
    mut session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    mut playback_rx: mpsc::UnboundedReceiver<PlaybackEvent>,
    cancel: CancellationToken,
) {
    let mut scheduler = PlaybackScheduler::new();

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("conversation loop cancelled");
                break;
            }
            frame = frame_rx.recv() => {
                match frame {
                    Some(frame) => session.send_audio(&frame.samples),
                    None => break,
                }
            }
            ev = session_rx.recv() => {
                match ev {
                    Some(ev) => {
                        if !handle_session_event(&ctx, ev, &sink, &mut scheduler) {
                            break;
                        }
                    }
                    None => break,
                }
            }
            pb = playback_rx.recv() => {
                match pb {
                    Some(PlaybackEvent::Drained) => {
                        if scheduler.drain() {
                            ctx.set_speaking(false);
                        }
                    }
                    None => break,
                }
            }
        }
    }

    // Also reached without an external stop (session error, server close,
    // closed channel); the capture task parks on this token and must go
    // down with the loop.
    cancel.cancel();
    session.close();
    sink.stop();
    sink.shutdown();
    ctx.set_speaking(false);
    if ctx.listening.swap(false, Ordering::SeqCst) {
        ctx.emit(ConversationEvent::ListeningChanged(false));
    }
    info!("conversation ended");
}

/// Apply one session event. Returns `false` when the loop should exit.
fn handle_session_event<S: OutputSink>(
    ctx: &LoopContext,
    ev: SessionEvent,
    sink: &S,
    scheduler: &mut PlaybackScheduler,
) -> bool {
    match ev {
        SessionEvent::SetupComplete => {
            debug!("live session setup complete");
        }
        SessionEvent::InputTranscript(text) => {
            ctx.with_transcript(|log| log.push_fragment(TranscriptSender::User, &text));
            ctx.emit(ConversationEvent::TranscriptChanged);
        }
        SessionEvent::OutputTranscript(text) => {
            ctx.with_transcript(|log| log.push_fragment(TranscriptSender::Mentor, &text));
            ctx.emit(ConversationEvent::TranscriptChanged);
        }
        SessionEvent::Audio(bytes) => match codec::decode_pcm16(&bytes) {
            Ok(samples) => {
                let duration = samples.len() as f64 / f64::from(ctx.output_sample_rate);
                scheduler.schedule(sink.position_secs(), duration);
                sink.enqueue(&samples);
                ctx.set_speaking(true);
            }
            Err(e) => warn!("dropping undecodable audio fragment: {e}"),
        },
        SessionEvent::Interrupted => {
            debug!("barge-in: flushing scheduled playback");
            sink.stop();
            scheduler.clear();
            ctx.set_speaking(false);
        }
        SessionEvent::TurnComplete => {
            ctx.with_transcript(TranscriptLog::complete_turn);
            ctx.emit(ConversationEvent::TranscriptChanged);
        }
        SessionEvent::Error(msg) => {
            warn!("live session error: {msg}");
            ctx.with_transcript(|log| {
                log.push_final(TranscriptSender::Mentor, SESSION_ERROR_LINE);
            });
            ctx.emit(ConversationEvent::TranscriptChanged);
            return false;
        }
        SessionEvent::Closed => {
            debug!("live session closed by server");
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::config::SessionConfig;
    use crate::transcript::Sender;
    use std::sync::atomic::AtomicUsize;

    fn test_config() -> MentorConfig {
        MentorConfig::default()
    }

    /// Records calls instead of touching an audio device.
    #[derive(Default)]
    struct RecordingSink {
        enqueued: Mutex<Vec<usize>>,
        stops: AtomicUsize,
    }

    impl OutputSink for RecordingSink {
        fn enqueue(&self, samples: &[f32]) {
            self.enqueued.lock().unwrap().push(samples.len());
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn position_secs(&self) -> f64 {
            0.0
        }

        fn shutdown(&mut self) {}
    }

    fn loop_ctx() -> LoopContext {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        LoopContext {
            transcript: Arc::new(Mutex::new(TranscriptLog::new())),
            listening: Arc::new(AtomicBool::new(true)),
            speaking: Arc::new(AtomicBool::new(false)),
            event_tx,
            output_sample_rate: 24_000,
        }
    }

    #[tokio::test]
    async fn stop_while_idle_is_noop() {
        let mut coord = Coordinator::new(test_config());
        coord.stop();
        coord.stop();
        assert!(!coord.is_listening());
        assert!(!coord.is_speaking());
    }

    #[tokio::test]
    async fn start_while_listening_is_noop() {
        let mut coord = Coordinator::new(test_config());
        coord.listening.store(true, Ordering::SeqCst);

        coord.start(&StudentProfile::default()).unwrap();
        assert!(coord.active.is_none());
        assert!(coord.snapshot().is_empty());
    }

    #[tokio::test]
    async fn push_mentor_line_appends_final_message() {
        let coord = Coordinator::new(test_config());
        let mut rx = coord.subscribe();
        let id = coord.push_mentor_line("hola");

        let log = coord.transcript();
        let log = log.lock().unwrap();
        let last = log.messages().last().unwrap();
        assert_eq!(last.id, id);
        assert_eq!(last.text, "hola");
        assert_eq!(last.sender, Sender::Mentor);
        assert!(last.is_final);
        assert_eq!(
            rx.try_recv().unwrap(),
            ConversationEvent::TranscriptChanged
        );
    }

    #[tokio::test]
    async fn image_entrypoints_drive_the_log() {
        let coord = Coordinator::new(test_config());
        let id = coord.push_mentor_line("La gravedad es...");

        coord.begin_image(&id);
        assert!(coord.snapshot()[0].is_generating_image);

        coord.attach_image(&id, "data:image/png;base64,QUJD".to_owned());
        let msg = &coord.snapshot()[0];
        assert!(!msg.is_generating_image);
        assert!(msg.image_url.is_some());

        // A failed request on another message reverts silently.
        let id2 = coord.push_mentor_line("Otra respuesta");
        coord.begin_image(&id2);
        coord.abort_image(&id2);
        let msg2 = &coord.snapshot()[1];
        assert!(!msg2.is_generating_image);
        assert!(msg2.image_url.is_none());
        assert_eq!(coord.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn stop_clears_listening_synchronously() {
        let mut coord = Coordinator::new(test_config());
        coord.listening.store(true, Ordering::SeqCst);
        coord.active = Some(ActiveConversation {
            cancel: CancellationToken::new(),
            capture_handle: tokio::spawn(async {}),
            loop_handle: tokio::spawn(async {}),
        });

        coord.stop();
        // Down before the loop task has run its teardown, so an immediate
        // restart is not rejected.
        assert!(!coord.is_listening());
        assert!(coord.active.is_none());
    }

    #[tokio::test]
    async fn start_reaps_a_conversation_that_ended_on_its_own() {
        let mut coord = Coordinator::new(test_config());
        let stale = CancellationToken::new();
        coord.active = Some(ActiveConversation {
            cancel: stale.clone(),
            capture_handle: tokio::spawn(async {}),
            loop_handle: tokio::spawn(async {}),
        });
        // `listening` is already false, as after a session-side failure.

        let _ = coord.start(&StudentProfile::default());
        assert!(stale.is_cancelled());
    }

    #[tokio::test]
    async fn session_error_finalizes_mentor_line_and_ends_loop() {
        let ctx = loop_ctx();
        let sink = RecordingSink::default();
        let mut scheduler = PlaybackScheduler::new();

        let keep_going = handle_session_event(
            &ctx,
            SessionEvent::Error("boom".to_owned()),
            &sink,
            &mut scheduler,
        );
        assert!(!keep_going);

        let log = ctx.transcript.lock().unwrap();
        let last = log.messages().last().unwrap();
        assert_eq!(last.text, SESSION_ERROR_LINE);
        assert_eq!(last.sender, Sender::Mentor);
        assert!(last.is_final);
    }

    #[tokio::test]
    async fn audio_event_schedules_enqueues_and_marks_speaking() {
        let ctx = loop_ctx();
        let sink = RecordingSink::default();
        let mut scheduler = PlaybackScheduler::new();
        let bytes = codec::quantize_pcm16(&[0.25; 480]);

        let keep_going =
            handle_session_event(&ctx, SessionEvent::Audio(bytes), &sink, &mut scheduler);
        assert!(keep_going);
        assert_eq!(*sink.enqueued.lock().unwrap(), vec![480]);
        assert_eq!(scheduler.scheduled_count(), 1);
        assert!(ctx.speaking.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn interruption_flushes_sink_and_schedule() {
        let ctx = loop_ctx();
        ctx.speaking.store(true, Ordering::SeqCst);
        let sink = RecordingSink::default();
        let mut scheduler = PlaybackScheduler::new();
        scheduler.schedule(0.0, 1.0);

        let keep_going =
            handle_session_event(&ctx, SessionEvent::Interrupted, &sink, &mut scheduler);
        assert!(keep_going);
        assert_eq!(sink.stops.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_idle());
        assert!(!ctx.speaking.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn loop_teardown_cancels_capture_token_on_session_error() {
        let ctx = loop_ctx();
        let transcript = Arc::clone(&ctx.transcript);
        let listening = Arc::clone(&ctx.listening);

        // Unreachable endpoint: the session task reports a connect error
        // and the loop must wind itself down.
        let session_config = SessionConfig {
            endpoint: "wss://127.0.0.1:9/unreachable".to_owned(),
            ..SessionConfig::default()
        };
        let (session, session_rx) =
            LiveSession::connect(&session_config, "test-key", "instrucciones").unwrap();

        let cancel = CancellationToken::new();
        let (_frame_tx, frame_rx) = mpsc::channel(CAPTURE_CHANNEL_SIZE);
        let (_playback_tx, playback_rx) = mpsc::unbounded_channel();

        run_conversation_loop(
            ctx,
            session,
            RecordingSink::default(),
            frame_rx,
            session_rx,
            playback_rx,
            cancel.clone(),
        )
        .await;

        assert!(cancel.is_cancelled());
        assert!(!listening.load(Ordering::SeqCst));
        let log = transcript.lock().unwrap();
        assert_eq!(log.messages().last().unwrap().text, SESSION_ERROR_LINE);
    }

    #[tokio::test]
    async fn reset_clears_transcript() {
        let mut coord = Coordinator::new(test_config());
        coord.push_mentor_line("uno");
        coord.push_mentor_line("dos");
        coord.reset();

        let log = coord.transcript();
        assert!(log.lock().unwrap().messages().is_empty());
        assert!(!coord.is_listening());
    }
}
