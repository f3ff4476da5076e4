//! Decoding of JSON commands pushed in `Message` frames

use serde_json::Value;
use tracing::trace;

use super::ChatMessage;

/// Command type carrying ordinary text chat
pub const TEXT_COMMAND: &str = "DANMU_MSG";

/// Turn a `Message` frame body into a chat message.
///
/// Returns `None` for bodies that are not JSON, for every command other than
/// text chat, and for paid/gift variants of text chat (their `info[0][5]`
/// marker is zero).
pub fn decode_command(body: &[u8]) -> Option<ChatMessage> {
    let command: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            trace!("Dropping non-JSON message body: {}", e);
            return None;
        }
    };

    // Newer servers append flags to the command name, e.g. "DANMU_MSG:4:0:2:2:2:0"
    let cmd = command.get("cmd").and_then(Value::as_str)?;
    if cmd.split(':').next() != Some(TEXT_COMMAND) {
        return None;
    }

    let info = command.get("info")?;
    if info.pointer("/0/5").and_then(Value::as_i64).unwrap_or(0) == 0 {
        return None;
    }

    Some(ChatMessage::text(
        info.pointer("/1").and_then(Value::as_str).unwrap_or_default(),
        info.pointer("/2/1").and_then(Value::as_str).unwrap_or_default(),
        info.pointer("/0/4").and_then(Value::as_i64).unwrap_or_default(),
    ))
}
