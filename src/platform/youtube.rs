use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Platform, PlatformAdapter, RoomMetadata, StreamTarget};
use crate::chat::longpoll::extract_embedded_json;
use crate::chat::{ChatStream, LongPollChatClient, LongPollTransport, RetryPolicy};
use crate::error::{RecorderError, RecorderResult};

pub const YOUTUBE_BASE: &str = "https://www.youtube.com";

const CHANNEL_URL_PATTERN: &str = r"^(?:https?://)?(?:www\.)?youtube\.com/channel/([^/?#]+)";
const PLAYER_RESPONSE_MARKERS: [&str; 3] = [
    "var ytInitialPlayerResponse",
    "window[\"ytInitialPlayerResponse\"]",
    "ytInitialPlayerResponse",
];
const STREAM_CONTAINER: &str = "ts";

#[derive(Debug, Default)]
struct BroadcastState {
    metadata: RoomMetadata,
    video_id: String,
}

/// YouTube channel live page
pub struct YouTubeAdapter {
    live_url: String,
    channel_id: String,
    client: reqwest::Client,
    base: String,
    state: Arc<RwLock<BroadcastState>>,
    retry: RetryPolicy,
}

impl YouTubeAdapter {
    pub fn new(live_url: &str, client: reqwest::Client, base: &str) -> RecorderResult<Self> {
        let pattern = Regex::new(CHANNEL_URL_PATTERN)
            .map_err(|e| RecorderError::UnsupportedRoom(e.to_string()))?;
        let channel_id = pattern
            .captures(live_url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| RecorderError::UnsupportedRoom(live_url.to_string()))?;

        Ok(Self {
            live_url: live_url.to_string(),
            channel_id,
            client,
            base: base.trim_end_matches('/').to_string(),
            state: Arc::new(RwLock::new(BroadcastState::default())),
            retry: RetryPolicy::default(),
        })
    }

    /// Override chat reconnect settings
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Chat transport following this adapter's current broadcast
    pub fn chat_transport(&self) -> YouTubeChatTransport {
        YouTubeChatTransport {
            client: self.client.clone(),
            base: self.base.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Current video id of the broadcast, empty until a status query succeeds
    pub fn video_id(&self) -> String {
        self.state.read().video_id.clone()
    }

    async fn player_response(&self) -> RecorderResult<Value> {
        let page = self
            .client
            .get(format!("{}/channel/{}/live", self.base, self.channel_id))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        extract_embedded_json(&page, &PLAYER_RESPONSE_MARKERS).ok_or_else(|| {
            RecorderError::ProtocolShape("live page carries no player response".to_string())
        })
    }

    /// Record metadata from a player response and report whether it is live
    fn apply(&self, player: &Value) -> bool {
        let playable = player.pointer("/playabilityStatus/status").and_then(Value::as_str) == Some("OK");
        let live = player
            .pointer("/videoDetails/isLive")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let field = |pointer: &str| {
            player
                .pointer(pointer)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let mut state = self.state.write();
        state.metadata.title = field("/videoDetails/title");
        state.metadata.author = field("/videoDetails/author");
        state.video_id = field("/videoDetails/videoId");

        playable && live
    }
}

#[async_trait]
impl PlatformAdapter for YouTubeAdapter {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    fn live_url(&self) -> &str {
        &self.live_url
    }

    fn metadata(&self) -> RoomMetadata {
        self.state.read().metadata.clone()
    }

    async fn query_live_status(&self) -> RecorderResult<bool> {
        let player = self.player_response().await?;
        Ok(self.apply(&player))
    }

    async fn refresh_metadata(&self) -> RecorderResult<()> {
        let player = self.player_response().await?;
        self.apply(&player);
        Ok(())
    }

    async fn resolve_stream_targets(&self) -> RecorderResult<Vec<StreamTarget>> {
        let player = self.player_response().await?;

        Ok(player
            .pointer("/streamingData/hlsManifestUrl")
            .and_then(Value::as_str)
            .filter(|url| url::Url::parse(url).is_ok())
            .map(|url| StreamTarget {
                url: url.to_string(),
                container: STREAM_CONTAINER.to_string(),
            })
            .into_iter()
            .collect())
    }

    fn open_chat_stream(&self, stop: CancellationToken) -> ChatStream {
        let transport = Arc::new(self.chat_transport());
        LongPollChatClient::new(transport, self.retry.clone()).into_stream(stop)
    }
}

/// Long-poll transport bound to the adapter's current broadcast
pub struct YouTubeChatTransport {
    client: reqwest::Client,
    base: String,
    state: Arc<RwLock<BroadcastState>>,
}

#[async_trait]
impl LongPollTransport for YouTubeChatTransport {
    async fn fetch_chat_page(&self) -> RecorderResult<String> {
        let video_id = self.state.read().video_id.clone();
        if video_id.is_empty() {
            return Err(RecorderError::ProtocolShape(
                "no broadcast video id known yet".to_string(),
            ));
        }

        debug!("Fetching chat page for video {}", video_id);
        let page = self
            .client
            .get(format!("{}/live_chat", self.base))
            .query(&[("is_popout", "1"), ("v", video_id.as_str())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(page)
    }

    async fn fetch_continuation(&self, token: &str) -> RecorderResult<String> {
        let body = self
            .client
            .get(format!("{}/live_chat/get_live_chat", self.base))
            .query(&[("continuation", token), ("pbj", "1")])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }
}
