//! Recording session management
//!
//! A `RecordingSession` covers one online period of a room:
//! - the stream task supervising the capture process and publishing segments
//! - the chat task writing the transcript of the current segment
//! - a shared stop token that ends both

mod config;
mod session;
mod stats;

pub use config::SessionConfig;
pub use session::RecordingSession;
pub use stats::SessionStats;
