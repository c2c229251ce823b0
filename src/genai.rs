//! One-shot generative API client: speech synthesis and image generation.
//!
//! Independent of the live session lifecycle; both calls may run while a
//! conversation is active. The client is constructed explicitly and passed
//! where needed — no global instance. No retries: failures propagate to the
//! call site, which converts them into a chat message or a silent UI-state
//! reversion per the error policy.

use crate::config::{ImageConfig, TtsConfig};
use crate::error::{MentorError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fixed stylistic wrapper applied to illustration prompts.
const IMAGE_PROMPT_TEMPLATE: &str = "Una ilustración vivida y colorida al estilo de un cómic o \
     anime que represente el siguiente concepto para un adolescente:";

/// Client for one-shot `generateContent` calls.
pub struct GenAiClient {
    http: reqwest::Client,
    tts: TtsConfig,
    image: ImageConfig,
    api_key: String,
}

impl GenAiClient {
    /// Create a client with a resolved API credential.
    #[must_use]
    pub fn new(tts: TtsConfig, image: ImageConfig, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            tts,
            image,
            api_key,
        }
    }

    /// Synthesize speech for a scripted mentor line.
    ///
    /// Returns the base64-encoded 24kHz mono PCM payload.
    ///
    /// # Errors
    ///
    /// Returns an API error if the call fails or no audio payload is
    /// returned. Not retried.
    pub async fn text_to_speech(&self, text: &str) -> Result<String> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: text.into() }],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_owned()],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.tts.voice.clone(),
                        },
                    },
                }),
            },
        };

        let response = self
            .generate(&self.tts.api_url, &self.tts.model, &request)
            .await?;

        response
            .first_inline_data()
            .map(|blob| blob.data.clone())
            .ok_or_else(|| MentorError::Api("no audio data received".to_owned()))
    }

    /// Generate an illustration for a concept.
    ///
    /// The prompt is wrapped in the fixed stylistic template; returns a
    /// `data:image/png;base64,...` URL.
    ///
    /// # Errors
    ///
    /// Returns an API error if the call fails or no image payload is
    /// returned. Not retried.
    pub async fn generate_image(&self, prompt: &str) -> Result<String> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: format!("{IMAGE_PROMPT_TEMPLATE} {prompt}"),
                }],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["IMAGE".to_owned()],
                speech_config: None,
            },
        };

        let response = self
            .generate(&self.image.api_url, &self.image.model, &request)
            .await?;

        response
            .first_inline_data()
            .map(|blob| format!("data:image/png;base64,{}", blob.data))
            .ok_or_else(|| MentorError::Api("no image data received".to_owned()))
    }

    async fn generate(
        &self,
        base_url: &str,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        let url = format!(
            "{}/v1beta/models/{model}:generateContent",
            base_url.trim_end_matches('/')
        );
        debug!("generateContent: {model}");

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(request)
            .send()
            .await
            .map_err(|e| MentorError::Api(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MentorError::Api(format!(
                "generateContent returned {status}: {body}"
            )));
        }

        response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| MentorError::Api(format!("invalid response body: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CandidatePart {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct InlineData {
    mime_type: String,
    data: String,
}

impl GenerateContentResponse {
    /// First inline payload across all candidates and parts.
    fn first_inline_data(&self) -> Option<&InlineData> {
        self.candidates
            .iter()
            .flat_map(|c| c.content.parts.iter())
            .find_map(|p| p.inline_data.as_ref())
    }
}
