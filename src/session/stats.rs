use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about a recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,

    /// When the session was created
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Number of capture segments started so far
    pub segments: usize,

    /// Number of chat messages written
    pub chat_messages: usize,

    /// Base-name of the segment currently being written, if any
    pub base_name: Option<String>,
}
