use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::FfmpegConfig;
use crate::session::SessionConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub debug: bool,
    /// Poll interval in seconds
    pub interval: u64,
    pub log_path: Option<String>,
    pub out_path: String,
    pub rooms: Vec<String>,
    pub capture: CaptureConfig,
    /// Status API, disabled when absent
    pub http: Option<HttpConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub program: String,
    pub timeout_secs: u64,
    pub retry_backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

/// Values given on the command line; they win over the file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub debug: bool,
    pub interval: Option<u64>,
    pub log_path: Option<String>,
    pub out_path: Option<String>,
    /// Appended to the configured rooms
    pub rooms: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            interval: 10,
            log_path: None,
            out_path: "./Lives".to_string(),
            rooms: Vec::new(),
            capture: CaptureConfig::default(),
            http: None,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            timeout_secs: 30,
            retry_backoff_secs: 3,
        }
    }
}

impl Config {
    /// Defaults, then `file` if given, then `overrides`
    pub fn load(file: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        if overrides.debug {
            builder = builder.set_override("debug", true)?;
        }
        if let Some(interval) = overrides.interval {
            builder = builder.set_override("interval", interval as i64)?;
        }
        if let Some(log_path) = &overrides.log_path {
            builder = builder.set_override("log_path", log_path.as_str())?;
        }
        if let Some(out_path) = &overrides.out_path {
            builder = builder.set_override("out_path", out_path.as_str())?;
        }

        let settings = builder.build().context("Failed to read configuration")?;
        let mut config: Config = settings
            .try_deserialize()
            .context("Invalid configuration")?;

        for url in &overrides.rooms {
            if !config.rooms.contains(url) {
                config.rooms.push(url.clone());
            }
        }

        if config.interval == 0 {
            anyhow::bail!("interval must be at least 1 second");
        }

        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            out_root: PathBuf::from(&self.out_path),
            retry_backoff: Duration::from_secs(self.capture.retry_backoff_secs),
        }
    }

    pub fn ffmpeg_config(&self) -> FfmpegConfig {
        FfmpegConfig {
            program: PathBuf::from(&self.capture.program),
            io_timeout: Duration::from_secs(self.capture.timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = Config::load(None, &ConfigOverrides::default()).unwrap();
        assert_eq!(config.interval, 10);
        assert_eq!(config.out_path, "./Lives");
        assert_eq!(config.capture.program, "ffmpeg");
        assert!(config.rooms.is_empty());
        assert!(config.http.is_none());
    }

    #[test]
    fn test_file_then_overrides() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "interval: 30\nout_path: /data\nrooms:\n  - https://live.bilibili.com/1\ncapture:\n  program: /usr/bin/ffmpeg\nhttp:\n  bind: 127.0.0.1\n  port: 8080"
        )
        .unwrap();

        let overrides = ConfigOverrides {
            interval: Some(5),
            rooms: vec![
                "https://live.bilibili.com/1".to_string(),
                "https://www.youtube.com/channel/abc".to_string(),
            ],
            ..Default::default()
        };
        let config = Config::load(Some(file.path()), &overrides).unwrap();

        assert_eq!(config.interval, 5);
        assert_eq!(config.out_path, "/data");
        assert_eq!(config.rooms.len(), 2);
        assert_eq!(config.capture.program, "/usr/bin/ffmpeg");
        assert_eq!(config.capture.timeout_secs, 30);
        assert_eq!(config.http.unwrap().port, 8080);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let overrides = ConfigOverrides {
            interval: Some(0),
            ..Default::default()
        };
        assert!(Config::load(None, &overrides).is_err());
    }
}
