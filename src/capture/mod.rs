//! External capture process supervision
//!
//! The video itself is remuxed by an external tool; this module only knows
//! how to start it, wait for it and kill it.

mod ffmpeg;

pub use ffmpeg::{FfmpegConfig, FfmpegSupervisor};

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::RecorderResult;

/// What to capture and where to put it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub input_url: String,
    pub output_path: PathBuf,
}

/// How a capture process ended.
///
/// Callers never branch on success: every exit sends the stream task back to
/// its restart-or-stop decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code, `None` when killed by a signal or when waiting failed
    pub code: Option<i32>,
}

impl From<std::process::ExitStatus> for ExitOutcome {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// Handle to one running capture process
#[async_trait]
pub trait CaptureProcess: Send {
    /// OS process id, if still known
    fn id(&self) -> Option<u32>;

    /// Block until the process exits
    async fn wait(&mut self) -> ExitOutcome;

    /// Forcefully terminate the process.
    ///
    /// Safe to call on an already exited process; failures are swallowed.
    async fn kill(&mut self);
}

/// Spawns capture processes
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Start capturing `request`; fails with [`crate::RecorderError::Launch`]
    /// when the tool is missing or cannot be spawned.
    async fn spawn(&self, request: &CaptureRequest) -> RecorderResult<Box<dyn CaptureProcess>>;
}
