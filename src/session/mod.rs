//! Live streaming session: wire protocol and WebSocket client.

pub mod live;
pub mod protocol;

pub use live::{LiveSession, SessionEvent};
pub use protocol::INPUT_AUDIO_MIME;
