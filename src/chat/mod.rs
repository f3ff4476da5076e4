//! Chat ingestion
//!
//! Two protocol clients feed the same output contract, a lazy
//! [`ChatStream`] of [`ChatMessage`] that ends when the stop token fires:
//! - `socket`: length-prefixed binary frames over a persistent websocket
//!   connection, with heartbeats and gateway re-resolution on reconnect
//! - `longpoll`: continuation-token polling against a chat page endpoint
//!
//! Reconnects are internal to each client; consumers only ever see one
//! continuous sequence.

pub mod danmaku;
pub mod frame;
pub mod longpoll;
pub mod socket;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use frame::{decode_frames, Frame, FrameCodec, FrameError, Operation};
pub use longpoll::{LongPollChatClient, LongPollTransport};
pub use socket::{Gateway, GatewayResolver, SocketChatClient};

/// Kind of a surfaced chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChatKind {
    /// Plain text chat, the only kind the clients surface today
    #[default]
    Text,
}

/// One chat message as received from a platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
    /// Platform send time, milliseconds since the unix epoch
    pub timestamp_ms: i64,
    pub author: String,
    pub kind: ChatKind,
}

impl ChatMessage {
    pub fn text(text: impl Into<String>, author: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            text: text.into(),
            timestamp_ms,
            author: author.into(),
            kind: ChatKind::Text,
        }
    }
}

/// Restartable, cancellable message sequence handed to the chat writer
pub type ChatStream = BoxStream<'static, ChatMessage>;

/// Reconnect pacing shared by both chat clients
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Fixed delay between a failure and the next attempt
    pub backoff: Duration,
    /// Consecutive failures tolerated before the sequence ends.
    /// `None` retries forever.
    pub max_consecutive_failures: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(3),
            max_consecutive_failures: Some(100),
        }
    }
}

impl RetryPolicy {
    /// True once `failures` consecutive failures exhaust the budget
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_consecutive_failures
            .map(|max| failures >= max)
            .unwrap_or(false)
    }
}
