//! Mentora: voice-based AI tutoring companion for secundaria students.
//!
//! A live audio conversation pipeline built on the Gemini Live API:
//! Microphone → realtime session → streamed audio + transcripts → Speaker
//!
//! # Architecture
//!
//! Independent pieces connected by async channels:
//! - **Audio capture**: Records 16kHz mono frames from the microphone via `cpal`
//! - **Live session**: Bidirectional WebSocket to the generate-content service
//! - **Transcript log**: Reconciles streamed fragments into chat messages
//! - **Playback**: Schedules and plays 24kHz response audio gaplessly via `cpal`
//! - **GenAI client**: One-shot speech synthesis and image generation over HTTP
//!
//! The [`coordinator::Coordinator`] owns the conversation lifecycle; the
//! [`app::App`] wraps it in a terminal frontend.

pub mod app;
pub mod audio;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod genai;
pub mod profile;
pub mod session;
pub mod transcript;

pub use config::MentorConfig;
pub use coordinator::{ConversationEvent, Coordinator};
pub use error::{MentorError, Result};
pub use genai::GenAiClient;
pub use profile::StudentProfile;
