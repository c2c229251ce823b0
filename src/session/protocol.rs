//! Wire types for the bidirectional generate-content WebSocket API.
//!
//! Mirrors the service's JSON schema: the client first sends a `setup`
//! message, then streams `realtimeInput` media chunks; the server replies
//! with `setupComplete` followed by `serverContent` messages carrying any
//! combination of transcription fragments, inline audio, an interruption
//! signal, and a turn-complete signal.

use serde::{Deserialize, Serialize};

/// MIME descriptor for outbound capture frames.
pub const INPUT_AUDIO_MIME: &str = "audio/pcm;rate=16000";

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// Messages sent from client to server. Exactly one field is set per frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// Session handshake: model, modalities, system instruction.
    Setup(Setup),
    /// A realtime media chunk (capture audio).
    RealtimeInput(RealtimeInput),
}

/// Session setup payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    /// Presence enables transcription of the user's audio.
    pub input_audio_transcription: TranscriptionConfig,
    /// Presence enables transcription of the model's audio.
    pub output_audio_transcription: TranscriptionConfig,
}

/// Generation settings for the live session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

/// Voice selection for audio responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Empty marker object; its presence turns transcription on.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptionConfig {}

/// Realtime input payload: ordered media chunks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaBlob>,
}

/// A base64 media payload tagged with its MIME descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub mime_type: String,
    /// Base64-encoded bytes.
    pub data: String,
}

/// Plain content: a list of parts.
#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

impl Content {
    /// Content holding a single text part (system instructions).
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![TextPart { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

impl ClientMessage {
    /// Build the setup handshake for a live audio conversation.
    #[must_use]
    pub fn setup(model: &str, voice: &str, system_instruction: &str) -> Self {
        Self::Setup(Setup {
            model: model.to_owned(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_owned()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.to_owned(),
                        },
                    },
                },
            },
            system_instruction: Content::from_text(system_instruction),
            input_audio_transcription: TranscriptionConfig {},
            output_audio_transcription: TranscriptionConfig {},
        })
    }

    /// Build a realtime input frame from already base64-encoded PCM.
    #[must_use]
    pub fn audio_chunk(data: String) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaBlob {
                mime_type: INPUT_AUDIO_MIME.to_owned(),
                data,
            }],
        })
    }
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// A server frame. Fields are optional; a frame carries whichever are set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<SetupComplete>,
    pub server_content: Option<ServerContent>,
}

/// Handshake acknowledgement.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetupComplete {}

/// Incremental conversation content from the server.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    /// Partial transcript of the user's speech.
    pub input_transcription: Option<TranscriptionFragment>,
    /// Partial transcript of the model's speech.
    pub output_transcription: Option<TranscriptionFragment>,
    /// Streamed model output; audio arrives as inline data parts.
    pub model_turn: Option<ModelTurn>,
    /// The user started talking over the model (barge-in).
    pub interrupted: bool,
    /// The current turn is complete.
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptionFragment {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelTurn {
    pub parts: Vec<ServerPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerPart {
    pub inline_data: Option<MediaBlob>,
    pub text: Option<String>,
}

impl ServerContent {
    /// First inline audio payload in this frame, if any.
    #[must_use]
    pub fn inline_audio(&self) -> Option<&MediaBlob> {
        self.model_turn
            .as_ref()
            .and_then(|turn| turn.parts.iter().find_map(|p| p.inline_data.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn setup_serializes_camel_case() {
        let msg = ClientMessage::setup("models/test-live", "Zephyr", "Eres un tutor.");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"setup\""));
        assert!(json.contains("\"model\":\"models/test-live\""));
        assert!(json.contains("\"responseModalities\":[\"AUDIO\"]"));
        assert!(json.contains("\"voiceName\":\"Zephyr\""));
        assert!(json.contains("\"systemInstruction\""));
        assert!(json.contains("\"inputAudioTranscription\":{}"));
        assert!(json.contains("\"outputAudioTranscription\":{}"));
    }

    #[test]
    fn audio_chunk_carries_mime_and_data() {
        let msg = ClientMessage::audio_chunk("QUJD".to_owned());
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"realtimeInput\""));
        assert!(json.contains("\"mediaChunks\""));
        assert!(json.contains("\"mimeType\":\"audio/pcm;rate=16000\""));
        assert!(json.contains("\"data\":\"QUJD\""));
    }

    #[test]
    fn server_message_parses_setup_complete() {
        let msg: ServerMessage = serde_json::from_str(r#"{"setupComplete":{}}"#).unwrap();
        assert!(msg.setup_complete.is_some());
        assert!(msg.server_content.is_none());
    }

    #[test]
    fn server_message_parses_transcriptions() {
        let json = r#"{
            "serverContent": {
                "inputTranscription": {"text": "Hola"},
                "outputTranscription": {"text": "¡Qué onda!"}
            }
        }"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        let content = msg.server_content.unwrap();
        assert_eq!(content.input_transcription.unwrap().text, "Hola");
        assert_eq!(content.output_transcription.unwrap().text, "¡Qué onda!");
        assert!(!content.interrupted);
        assert!(!content.turn_complete);
    }

    #[test]
    fn server_message_parses_inline_audio() {
        let json = r#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        {"text": "aside"},
                        {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAEC"}}
                    ]
                }
            }
        }"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        let content = msg.server_content.unwrap();
        let blob = content.inline_audio().unwrap();
        assert_eq!(blob.mime_type, "audio/pcm;rate=24000");
        assert_eq!(blob.data, "AAEC");
    }

    #[test]
    fn server_message_parses_interrupted_and_turn_complete() {
        let json = r#"{"serverContent": {"interrupted": true, "turnComplete": true}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        let content = msg.server_content.unwrap();
        assert!(content.interrupted);
        assert!(content.turn_complete);
    }

    #[test]
    fn server_message_tolerates_unknown_fields() {
        let json = r#"{"usageMetadata": {"totalTokenCount": 42}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(msg.setup_complete.is_none());
        assert!(msg.server_content.is_none());
    }

    #[test]
    fn empty_model_turn_has_no_audio() {
        let content = ServerContent::default();
        assert!(content.inline_audio().is_none());
    }
}
