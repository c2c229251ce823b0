//! Audio capture, playback scheduling, and PCM/base64 codecs via cpal.

pub mod capture;
pub mod codec;
pub mod playback;

pub use capture::{CaptureFrame, CpalCapture};
pub use playback::{PlaybackEvent, PlaybackScheduler, PlaybackSink};
