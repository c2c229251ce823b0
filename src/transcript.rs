//! Chat message log and incremental transcript reconciliation.
//!
//! Transcript fragments stream in faster than turns complete, so the log
//! keeps one unfinished entry per speaking side and rewrites its text in
//! place as fragments accumulate. Merging is keyed on "is the last entry
//! from this sender and not yet final" — positional, not per-turn; see
//! DESIGN.md for the open question on keyed merges.

use serde::Serialize;
use uuid::Uuid;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Mentor,
}

/// One chat message.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    /// Stable id, used by the presentation layer to attach images.
    pub id: String,
    pub text: String,
    pub sender: Sender,
    /// False while fragments for this turn are still arriving.
    pub is_final: bool,
    /// Generated illustration, when one has been attached.
    pub image_url: Option<String>,
    /// True while an illustration request for this message is in flight.
    pub is_generating_image: bool,
}

impl Message {
    fn new(sender: Sender, text: String, is_final: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text,
            sender,
            is_final,
            image_url: None,
            is_generating_image: false,
        }
    }
}

/// The conversation coordinator's message log plus the running transcript
/// buffers for the current user and mentor turns.
#[derive(Debug, Default)]
pub struct TranscriptLog {
    messages: Vec<Message>,
    input_buffer: String,
    output_buffer: String,
}

impl TranscriptLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a partial transcript fragment for `sender`.
    ///
    /// The fragment extends the running buffer for that side; the last log
    /// entry is rewritten in place when it is an unfinished entry from the
    /// same sender, otherwise a new unfinished entry is appended.
    pub fn push_fragment(&mut self, sender: Sender, fragment: &str) {
        let buffer = match sender {
            Sender::User => &mut self.input_buffer,
            Sender::Mentor => &mut self.output_buffer,
        };
        buffer.push_str(fragment);
        let text = buffer.clone();

        match self.messages.last_mut() {
            Some(last) if last.sender == sender && !last.is_final => {
                last.text = text;
            }
            _ => self.messages.push(Message::new(sender, text, false)),
        }
    }

    /// Finalize trailing unfinished entries and reset both running buffers.
    ///
    /// Called on the turn-complete signal. A side's entries are finalized
    /// only when that side accumulated transcript during this turn.
    pub fn complete_turn(&mut self) {
        if !self.input_buffer.is_empty() {
            self.finalize_sender(Sender::User);
        }
        if !self.output_buffer.is_empty() {
            self.finalize_sender(Sender::Mentor);
        }
        self.input_buffer.clear();
        self.output_buffer.clear();
    }

    fn finalize_sender(&mut self, sender: Sender) {
        for msg in &mut self.messages {
            if msg.sender == sender && !msg.is_final {
                msg.is_final = true;
            }
        }
    }

    /// Append an already-final message (scripted mentor lines, errors).
    ///
    /// Returns the new message's id.
    pub fn push_final(&mut self, sender: Sender, text: impl Into<String>) -> String {
        let msg = Message::new(sender, text.into(), true);
        let id = msg.id.clone();
        self.messages.push(msg);
        id
    }

    /// Mark a message as having an illustration request in flight.
    pub fn begin_image(&mut self, id: &str) {
        if let Some(msg) = self.find_mut(id) {
            msg.is_generating_image = true;
        }
    }

    /// Attach a generated illustration and clear the in-flight flag.
    pub fn attach_image(&mut self, id: &str, url: String) {
        if let Some(msg) = self.find_mut(id) {
            msg.image_url = Some(url);
            msg.is_generating_image = false;
        }
    }

    /// Revert an in-flight illustration request that failed.
    ///
    /// Failure is absorbed: no image, no chat message, flag cleared.
    pub fn abort_image(&mut self, id: &str) {
        if let Some(msg) = self.find_mut(id) {
            msg.is_generating_image = false;
        }
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Read-only view of the log.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Snapshot for the presentation layer.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// The most recent final user message, if any.
    #[must_use]
    pub fn last_final_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.sender == Sender::User && m.is_final)
            .map(|m| m.text.as_str())
    }

    /// Id of the most recent mentor message, if any.
    #[must_use]
    pub fn last_mentor_id(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.sender == Sender::Mentor)
            .map(|m| m.id.as_str())
    }

    /// Drop every message and buffer (full reset).
    pub fn reset(&mut self) {
        self.messages.clear();
        self.input_buffer.clear();
        self.output_buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn consecutive_fragments_merge_into_one_entry() {
        let mut log = TranscriptLog::new();
        log.push_fragment(Sender::User, "Hola");
        log.push_fragment(Sender::User, " mundo");

        assert_eq!(log.messages().len(), 1);
        assert_eq!(log.messages()[0].text, "Hola mundo");
        assert!(!log.messages()[0].is_final);
    }

    #[test]
    fn turn_complete_finalizes_without_altering_text() {
        let mut log = TranscriptLog::new();
        log.push_fragment(Sender::User, "Hola");
        log.push_fragment(Sender::User, " mundo");
        log.complete_turn();

        assert_eq!(log.messages().len(), 1);
        assert_eq!(log.messages()[0].text, "Hola mundo");
        assert!(log.messages()[0].is_final);
    }

    #[test]
    fn interleaved_senders_get_separate_entries() {
        let mut log = TranscriptLog::new();
        log.push_fragment(Sender::User, "¿Qué es la fotosíntesis?");
        log.push_fragment(Sender::Mentor, "Imagina que");
        log.push_fragment(Sender::Mentor, " las plantas");

        assert_eq!(log.messages().len(), 2);
        assert_eq!(log.messages()[1].text, "Imagina que las plantas");
    }

    #[test]
    fn new_turn_after_completion_starts_fresh_entry() {
        let mut log = TranscriptLog::new();
        log.push_fragment(Sender::User, "Primera");
        log.complete_turn();
        log.push_fragment(Sender::User, "Segunda");

        assert_eq!(log.messages().len(), 2);
        assert_eq!(log.messages()[0].text, "Primera");
        assert!(log.messages()[0].is_final);
        assert_eq!(log.messages()[1].text, "Segunda");
        assert!(!log.messages()[1].is_final);
    }

    #[test]
    fn complete_turn_only_finalizes_sides_with_transcript() {
        let mut log = TranscriptLog::new();
        let id = log.push_final(Sender::Mentor, "Bienvenido");
        log.push_fragment(Sender::User, "Hola");
        log.complete_turn();

        // The scripted mentor line is untouched; the user entry finalized.
        assert_eq!(log.messages()[0].id, id);
        assert!(log.messages()[1].is_final);
    }

    #[test]
    fn push_final_is_immediately_final() {
        let mut log = TranscriptLog::new();
        log.push_final(Sender::Mentor, "Hubo un error en la conexión.");
        assert!(log.messages()[0].is_final);
        // A following fragment must not merge into the final entry.
        log.push_fragment(Sender::Mentor, "nuevo");
        assert_eq!(log.messages().len(), 2);
    }

    #[test]
    fn image_attach_flow() {
        let mut log = TranscriptLog::new();
        let id = log.push_final(Sender::Mentor, "La fotosíntesis es...");
        log.begin_image(&id);
        assert!(log.messages()[0].is_generating_image);

        log.attach_image(&id, "data:image/png;base64,QUJD".to_owned());
        assert!(!log.messages()[0].is_generating_image);
        assert_eq!(
            log.messages()[0].image_url.as_deref(),
            Some("data:image/png;base64,QUJD")
        );
    }

    #[test]
    fn failed_image_generation_is_absorbed() {
        let mut log = TranscriptLog::new();
        let id = log.push_final(Sender::Mentor, "fotosíntesis");
        log.begin_image(&id);
        log.abort_image(&id);

        let msg = &log.messages()[0];
        assert!(!msg.is_generating_image);
        assert!(msg.image_url.is_none());
        // No error message was appended.
        assert_eq!(log.messages().len(), 1);
    }

    #[test]
    fn image_ops_on_unknown_id_are_ignored() {
        let mut log = TranscriptLog::new();
        log.begin_image("missing");
        log.attach_image("missing", "url".to_owned());
        log.abort_image("missing");
        assert!(log.messages().is_empty());
    }

    #[test]
    fn last_final_user_text_skips_unfinished() {
        let mut log = TranscriptLog::new();
        log.push_fragment(Sender::User, "lista");
        log.complete_turn();
        log.push_fragment(Sender::User, "a medias");

        assert_eq!(log.last_final_user_text(), Some("lista"));
    }

    #[test]
    fn reset_clears_everything() {
        let mut log = TranscriptLog::new();
        log.push_fragment(Sender::User, "Hola");
        log.push_final(Sender::Mentor, "Adiós");
        log.reset();
        assert!(log.messages().is_empty());
        // Buffers cleared too: next fragment starts from scratch.
        log.push_fragment(Sender::User, "Nuevo");
        assert_eq!(log.messages()[0].text, "Nuevo");
    }
}
