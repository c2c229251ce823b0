//! Configuration types for the voice tutoring pipeline.

use crate::error::{MentorError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for mentora.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MentorConfig {
    /// Audio capture/playback settings.
    pub audio: AudioConfig,
    /// Live conversation session settings.
    pub session: SessionConfig,
    /// One-shot speech synthesis settings.
    pub tts: TtsConfig,
    /// One-shot image generation settings.
    pub image: ImageConfig,
    /// API credential reference.
    pub api_key: ApiKeyRef,
}

/// Audio I/O configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture sample rate in Hz. The live API expects 16kHz mono input.
    pub input_sample_rate: u32,
    /// Playback sample rate in Hz. The live API streams 24kHz mono output.
    pub output_sample_rate: u32,
    /// Samples per outbound capture frame.
    pub frame_size: usize,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            frame_size: 4096,
            input_device: None,
            output_device: None,
        }
    }
}

/// Live dialogue session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// WebSocket endpoint for the bidirectional generate-content service.
    pub endpoint: String,
    /// Model used for the live audio conversation.
    pub model: String,
    /// Prebuilt voice for the mentor's live responses.
    pub voice: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_owned(),
            model: "models/gemini-2.5-flash-native-audio-preview-09-2025".to_owned(),
            voice: "Zephyr".to_owned(),
        }
    }
}

/// One-shot speech synthesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// REST base URL for `generateContent` calls.
    pub api_url: String,
    /// Model used for text-to-speech.
    pub model: String,
    /// Prebuilt voice for scripted mentor lines.
    pub voice: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_url: "https://generativelanguage.googleapis.com".to_owned(),
            model: "gemini-2.5-flash-preview-tts".to_owned(),
            voice: "Kore".to_owned(),
        }
    }
}

/// One-shot image generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// REST base URL for `generateContent` calls.
    pub api_url: String,
    /// Model used for illustrative images.
    pub model: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            api_url: "https://generativelanguage.googleapis.com".to_owned(),
            model: "gemini-2.5-flash-image".to_owned(),
        }
    }
}

/// Reference to the API credential.
///
/// Every remote operation fails at first use when the reference resolves
/// to nothing; there is no anonymous mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiKeyRef {
    /// Resolve the key from an environment variable.
    Env { var: String },
    /// Inline literal key (discouraged; use env when possible).
    Literal { value: String },
    /// Resolve the key by running a local command.
    Command { cmd: String },
}

impl Default for ApiKeyRef {
    fn default() -> Self {
        Self::Env {
            var: "GEMINI_API_KEY".to_owned(),
        }
    }
}

impl ApiKeyRef {
    /// Resolve the credential to a usable key string.
    ///
    /// # Errors
    ///
    /// Returns a config error when the reference resolves to nothing
    /// (missing/empty env var, empty literal, failing command).
    pub fn resolve(&self) -> Result<String> {
        match self {
            Self::Env { var } => {
                let value = std::env::var(var).map_err(|_| {
                    MentorError::Config(format!("API key env var is missing: {var}"))
                })?;
                if value.trim().is_empty() {
                    return Err(MentorError::Config(format!(
                        "API key env var is empty: {var}"
                    )));
                }
                Ok(value)
            }
            Self::Literal { value } => {
                if value.trim().is_empty() {
                    return Err(MentorError::Config("API key literal is empty".to_owned()));
                }
                Ok(value.clone())
            }
            Self::Command { cmd } => {
                if cmd.trim().is_empty() {
                    return Err(MentorError::Config("API key command is empty".to_owned()));
                }
                let output = std::process::Command::new("/bin/sh")
                    .arg("-lc")
                    .arg(cmd)
                    .output()
                    .map_err(|e| {
                        MentorError::Config(format!("failed to run API key command: {e}"))
                    })?;
                if !output.status.success() {
                    return Err(MentorError::Config(format!(
                        "API key command failed with status {}",
                        output
                            .status
                            .code()
                            .map_or_else(|| "unknown".to_owned(), |c| c.to_string())
                    )));
                }
                let value = String::from_utf8_lossy(&output.stdout).trim().to_owned();
                if value.is_empty() {
                    return Err(MentorError::Config(
                        "API key command returned empty output".to_owned(),
                    ));
                }
                Ok(value)
            }
        }
    }
}

impl MentorConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| MentorError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| MentorError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/mentora/config.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("mentora").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("mentora")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/mentora-config/config.toml")
        }
    }
}
