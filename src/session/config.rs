use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Root under which `<platform>/<author>/<date>` directories are created
    pub out_root: PathBuf,

    /// Delay before retrying target resolution or a quickly failing capture
    /// Default: 3 seconds
    pub retry_backoff: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            out_root: PathBuf::from("./Lives"),
            retry_backoff: Duration::from_secs(3),
        }
    }
}
