//! Live dialogue session — WebSocket client for the streaming endpoint.
//!
//! [`LiveSession`] owns a background task that performs the handshake and
//! then pumps frames in both directions. Outbound audio is fire-and-forget:
//! frames are queued on an unbounded channel in capture order and flushed
//! once the handshake resolves, so a close requested before the connection
//! is up is simply queued behind it.

use crate::audio::codec;
use crate::config::SessionConfig;
use crate::error::{MentorError, Result};
use crate::session::protocol::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Events surfaced to the conversation coordinator.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Handshake acknowledged — the server is ready for realtime input.
    SetupComplete,
    /// Partial transcript of the user's speech.
    InputTranscript(String),
    /// Partial transcript of the mentor's speech.
    OutputTranscript(String),
    /// An inbound audio fragment, base64-decoded to raw PCM bytes.
    Audio(Vec<u8>),
    /// The user started talking over the mentor (barge-in).
    Interrupted,
    /// The current turn is complete.
    TurnComplete,
    /// Session-level error; the session is dead after this.
    Error(String),
    /// The connection closed cleanly.
    Closed,
}

/// Outbound instructions for the background task.
enum Outbound {
    Frame(String),
    Close,
}

/// Handle to one live conversation session.
///
/// At most one exists per coordinator. Dropping the handle without calling
/// [`LiveSession::close`] ends the background task once the channel drains.
pub struct LiveSession {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl LiveSession {
    /// Open a session to the remote dialogue endpoint.
    ///
    /// Spawns a background task that connects, sends the setup message
    /// (audio response modality + transcription of both directions), and
    /// relays traffic. Returns immediately; handshake completion is
    /// reported via [`SessionEvent::SetupComplete`] on the event channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint URL is invalid. Connection
    /// failures are reported asynchronously as [`SessionEvent::Error`].
    pub fn connect(
        config: &SessionConfig,
        api_key: &str,
        system_instruction: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        let mut url = url::Url::parse(&config.endpoint)
            .map_err(|e| MentorError::Session(format!("invalid endpoint: {e}")))?;
        url.query_pairs_mut().append_pair("key", api_key);

        let setup = ClientMessage::setup(&config.model, &config.voice, system_instruction);
        let setup_json = serde_json::to_string(&setup)?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            run_session(url, setup_json, outbound_rx, event_tx).await;
        });

        Ok((
            Self {
                outbound: outbound_tx,
            },
            event_rx,
        ))
    }

    /// Enqueue one capture frame for the realtime input stream.
    ///
    /// Fire-and-forget: no acknowledgment is awaited and send errors after
    /// the session died are ignored. Frames are delivered in call order.
    pub fn send_audio(&self, samples: &[f32]) {
        let data = codec::encode(&codec::quantize_pcm16(samples));
        let msg = ClientMessage::audio_chunk(data);
        if let Ok(json) = serde_json::to_string(&msg) {
            let _ = self.outbound.send(Outbound::Frame(json));
        }
    }

    /// Request an orderly close.
    ///
    /// If the handshake is still pending the request is queued behind it
    /// and honored once the connection resolves.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

/// Connect, handshake, then pump frames until close or error. No reconnect:
/// every recovery is user-initiated.
async fn run_session(
    url: url::Url,
    setup_json: String,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::{connect_async, tungstenite::Message};

    let (ws_stream, _) = match connect_async(url.as_str()).await {
        Ok(ok) => ok,
        Err(e) => {
            let _ = event_tx.send(SessionEvent::Error(format!("connect failed: {e}")));
            return;
        }
    };
    info!("live session connected");

    let (mut write, mut read) = ws_stream.split();

    if let Err(e) = write.send(Message::Text(setup_json)).await {
        let _ = event_tx.send(SessionEvent::Error(format!("setup send failed: {e}")));
        return;
    }

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_server_frame(&text, &event_tx);
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        // The service also delivers JSON frames as binary.
                        match String::from_utf8(bytes) {
                            Ok(text) => handle_server_frame(&text, &event_tx),
                            Err(e) => debug!("ignoring non-UTF-8 binary frame: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = event_tx.send(SessionEvent::Closed);
                        break;
                    }
                    Some(Err(e)) => {
                        let _ = event_tx.send(SessionEvent::Error(format!("read error: {e}")));
                        break;
                    }
                    _ => {} // Ping/Pong handled by tungstenite.
                }
            }
            out = outbound_rx.recv() => {
                match out {
                    Some(Outbound::Frame(json)) => {
                        if let Err(e) = write.send(Message::Text(json)).await {
                            let _ = event_tx.send(SessionEvent::Error(format!("send error: {e}")));
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        let _ = event_tx.send(SessionEvent::Closed);
                        break;
                    }
                }
            }
        }
    }

    info!("live session ended");
}

/// Translate one server frame into zero or more session events.
fn handle_server_frame(text: &str, event_tx: &mpsc::UnboundedSender<SessionEvent>) {
    let msg: ServerMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            debug!("ignoring unparseable server frame: {e}");
            return;
        }
    };

    if msg.setup_complete.is_some() {
        let _ = event_tx.send(SessionEvent::SetupComplete);
    }

    let Some(content) = msg.server_content else {
        return;
    };

    if let Some(fragment) = &content.input_transcription
        && !fragment.text.is_empty()
    {
        let _ = event_tx.send(SessionEvent::InputTranscript(fragment.text.clone()));
    }
    if let Some(fragment) = &content.output_transcription
        && !fragment.text.is_empty()
    {
        let _ = event_tx.send(SessionEvent::OutputTranscript(fragment.text.clone()));
    }

    if let Some(blob) = content.inline_audio() {
        match codec::decode(&blob.data) {
            Ok(bytes) => {
                let _ = event_tx.send(SessionEvent::Audio(bytes));
            }
            Err(e) => warn!("dropping undecodable audio fragment: {e}"),
        }
    }

    if content.interrupted {
        let _ = event_tx.send(SessionEvent::Interrupted);
    }
    if content.turn_complete {
        let _ = event_tx.send(SessionEvent::TurnComplete);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn collect(json: &str) -> Vec<SessionEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle_server_frame(json, &tx);
        drop(tx);
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[test]
    fn frame_with_setup_complete_yields_event() {
        let events = collect(r#"{"setupComplete":{}}"#);
        assert!(matches!(events.as_slice(), [SessionEvent::SetupComplete]));
    }

    #[test]
    fn frame_with_transcripts_yields_both_events() {
        let events = collect(
            r#"{"serverContent":{"inputTranscription":{"text":"Hola"},"outputTranscription":{"text":"mundo"}}}"#,
        );
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], SessionEvent::InputTranscript(t) if t == "Hola"));
        assert!(matches!(&events[1], SessionEvent::OutputTranscript(t) if t == "mundo"));
    }

    #[test]
    fn frame_with_audio_decodes_base64() {
        // "AAEC" = bytes [0, 1, 2]
        let events = collect(
            r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAEC"}}]}}}"#,
        );
        assert!(matches!(&events[..], [SessionEvent::Audio(b)] if b == &vec![0u8, 1, 2]));
    }

    #[test]
    fn empty_transcript_fragments_are_skipped() {
        let events = collect(r#"{"serverContent":{"inputTranscription":{"text":""}}}"#);
        assert!(events.is_empty());
    }

    #[test]
    fn interrupted_and_turn_complete_are_ordered() {
        let events = collect(r#"{"serverContent":{"interrupted":true,"turnComplete":true}}"#);
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Interrupted, SessionEvent::TurnComplete]
        ));
    }

    #[test]
    fn garbage_frames_are_ignored() {
        assert!(collect("not json").is_empty());
        assert!(collect("{}").is_empty());
        assert!(collect(r#"{"unknown":true}"#).is_empty());
    }

    #[test]
    fn connect_rejects_invalid_endpoint() {
        let config = SessionConfig {
            endpoint: "not a url".to_owned(),
            ..SessionConfig::default()
        };
        assert!(LiveSession::connect(&config, "key", "instr").is_err());
    }
}
