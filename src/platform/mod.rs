//! Platform adapters
//!
//! One adapter per monitored room. The core only talks to the
//! [`PlatformAdapter`] capability:
//! - live status and room metadata (title, author)
//! - stream target resolution for the capture process
//! - a chat message stream bound to the session's stop token

mod bilibili;
mod youtube;

pub use bilibili::{pick_gateway, BilibiliAdapter, BILIBILI_API_BASE};
pub use youtube::{YouTubeAdapter, YouTubeChatTransport, YOUTUBE_BASE};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::chat::ChatStream;
use crate::error::{RecorderError, RecorderResult};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Supported streaming platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Bilibili,
    YouTube,
}

impl Platform {
    /// Name used in logs and output paths
    pub fn display_name(self) -> &'static str {
        match self {
            Platform::Bilibili => "哔哩哔哩",
            Platform::YouTube => "YouTube",
        }
    }

    /// Pick the platform serving `url`, by host
    pub fn detect(url: &url::Url) -> Option<Self> {
        match url.host_str()? {
            "live.bilibili.com" => Some(Platform::Bilibili),
            "www.youtube.com" | "youtube.com" => Some(Platform::YouTube),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Title and author of a room, refreshed by the adapter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMetadata {
    pub title: String,
    pub author: String,
}

/// A resolved stream the capture process can read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamTarget {
    pub url: String,
    /// Container extension of the captured file, e.g. `flv` or `ts`
    pub container: String,
}

/// Capability interface of one platform room
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Room URL as configured
    fn live_url(&self) -> &str;

    /// Last known metadata
    fn metadata(&self) -> RoomMetadata;

    async fn query_live_status(&self) -> RecorderResult<bool>;

    /// Refresh title and author
    async fn refresh_metadata(&self) -> RecorderResult<()>;

    async fn resolve_stream_targets(&self) -> RecorderResult<Vec<StreamTarget>>;

    /// Open a lazy chat stream that ends once `stop` is cancelled.
    ///
    /// The stream reconnects internally; it only ends early when the
    /// adapter gives up.
    fn open_chat_stream(&self, stop: CancellationToken) -> ChatStream;
}

/// Shared HTTP client for all adapters
pub fn http_client() -> RecorderResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(RecorderError::from)
}

/// Build the adapter matching `room_url`
pub fn adapter_for_url(
    room_url: &str,
    client: &reqwest::Client,
) -> RecorderResult<Arc<dyn PlatformAdapter>> {
    let parsed = url::Url::parse(room_url)
        .map_err(|e| RecorderError::UnsupportedRoom(format!("{}: {}", room_url, e)))?;

    match Platform::detect(&parsed) {
        Some(Platform::Bilibili) => Ok(Arc::new(BilibiliAdapter::new(
            room_url,
            client.clone(),
            BILIBILI_API_BASE,
        )?)),
        Some(Platform::YouTube) => Ok(Arc::new(YouTubeAdapter::new(
            room_url,
            client.clone(),
            YOUTUBE_BASE,
        )?)),
        None => Err(RecorderError::UnsupportedRoom(room_url.to_string())),
    }
}
