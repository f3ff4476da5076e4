use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::{CaptureProcess, CaptureRequest, ExitOutcome, ProcessSupervisor};
use crate::error::{RecorderError, RecorderResult};

/// Capture tool settings
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    /// Executable name or path
    pub program: PathBuf,
    /// Network I/O timeout handed to the tool
    pub io_timeout: Duration,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            io_timeout: Duration::from_secs(30),
        }
    }
}

/// Runs `ffmpeg` as a codec-copy remuxer
pub struct FfmpegSupervisor {
    config: FfmpegConfig,
}

impl FfmpegSupervisor {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }

    /// Check that the tool can be launched at all
    pub async fn ensure_available(&self) -> RecorderResult<()> {
        let status = Command::new(&self.config.program)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                RecorderError::Launch(format!("{}: {}", self.config.program.display(), e))
            })?;

        if !status.success() {
            return Err(RecorderError::Launch(format!(
                "{} -version exited with {}",
                self.config.program.display(),
                status
            )));
        }

        Ok(())
    }

    /// Arguments for a fixed-timeout, codec-copy remux of `request`
    pub fn build_args(&self, request: &CaptureRequest) -> Vec<String> {
        vec![
            "-loglevel".to_string(),
            "warning".to_string(),
            "-y".to_string(),
            "-timeout".to_string(),
            self.config.io_timeout.as_micros().to_string(),
            "-i".to_string(),
            request.input_url.clone(),
            "-c".to_string(),
            "copy".to_string(),
            request.output_path.display().to_string(),
        ]
    }
}

#[async_trait]
impl ProcessSupervisor for FfmpegSupervisor {
    async fn spawn(&self, request: &CaptureRequest) -> RecorderResult<Box<dyn CaptureProcess>> {
        let child = Command::new(&self.config.program)
            .args(self.build_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RecorderError::Launch(format!("{}: {}", self.config.program.display(), e))
            })?;

        info!(
            "Capture process started (pid {}): {}",
            child.id().unwrap_or(0),
            request.output_path.display()
        );

        Ok(Box::new(ChildProcess { child }))
    }
}

/// A spawned OS process
pub(crate) struct ChildProcess {
    child: Child,
}

#[async_trait]
impl CaptureProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> ExitOutcome {
        match self.child.wait().await {
            Ok(status) => {
                debug!("Capture process exited: {}", status);
                status.into()
            }
            Err(e) => {
                warn!("Failed to wait for capture process: {}", e);
                ExitOutcome { code: None }
            }
        }
    }

    async fn kill(&mut self) {
        // Errors mean the process is already gone
        if let Err(e) = self.child.kill().await {
            debug!("Kill on finished capture process ignored: {}", e);
        }
    }
}
