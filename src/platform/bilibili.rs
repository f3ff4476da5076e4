use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Platform, PlatformAdapter, RoomMetadata, StreamTarget};
use crate::chat::socket::SocketChatConfig;
use crate::chat::{ChatStream, Gateway, GatewayResolver, SocketChatClient};
use crate::error::{RecorderError, RecorderResult};

pub const BILIBILI_API_BASE: &str = "https://api.live.bilibili.com";

const ROOM_URL_PATTERN: &str = r"^(?:https?://)?live\.bilibili\.com/(\d+)(?:[/?#].*)?$";
const STREAM_CONTAINER: &str = "ts";

/// Bilibili live room
pub struct BilibiliAdapter {
    live_url: String,
    api: Arc<BilibiliApi>,
    metadata: RwLock<RoomMetadata>,
    chat: SocketChatConfig,
}

impl BilibiliAdapter {
    pub fn new(live_url: &str, client: reqwest::Client, api_base: &str) -> RecorderResult<Self> {
        let pattern =
            Regex::new(ROOM_URL_PATTERN).map_err(|e| RecorderError::UnsupportedRoom(e.to_string()))?;
        let short_id = pattern
            .captures(live_url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| RecorderError::UnsupportedRoom(live_url.to_string()))?;

        Ok(Self {
            live_url: live_url.to_string(),
            api: Arc::new(BilibiliApi {
                client,
                base: api_base.trim_end_matches('/').to_string(),
                short_id,
                room_id: Mutex::new(None),
            }),
            metadata: RwLock::new(RoomMetadata::default()),
            chat: SocketChatConfig::default(),
        })
    }

    /// Current chat gateway of the room
    pub async fn chat_gateway(&self) -> RecorderResult<Gateway> {
        self.api.resolve().await
    }

    /// Override chat reconnect settings
    pub fn with_chat_config(mut self, chat: SocketChatConfig) -> Self {
        self.chat = chat;
        self
    }
}

#[async_trait]
impl PlatformAdapter for BilibiliAdapter {
    fn platform(&self) -> Platform {
        Platform::Bilibili
    }

    fn live_url(&self) -> &str {
        &self.live_url
    }

    fn metadata(&self) -> RoomMetadata {
        self.metadata.read().clone()
    }

    async fn query_live_status(&self) -> RecorderResult<bool> {
        let (info, anchor) = tokio::join!(self.api.room_info(), self.api.anchor());
        let (live, title) = info?;

        let mut metadata = self.metadata.write();
        metadata.title = title;
        match anchor {
            Ok(author) => metadata.author = author,
            Err(e) => warn!("Failed to refresh author of {}: {}", self.live_url, e),
        }
        Ok(live)
    }

    async fn refresh_metadata(&self) -> RecorderResult<()> {
        let (_, title) = self.api.room_info().await?;
        let author = self.api.anchor().await?;

        let mut metadata = self.metadata.write();
        metadata.title = title;
        metadata.author = author;
        Ok(())
    }

    async fn resolve_stream_targets(&self) -> RecorderResult<Vec<StreamTarget>> {
        self.api.play_urls().await
    }

    fn open_chat_stream(&self, stop: CancellationToken) -> ChatStream {
        let resolver: Arc<dyn GatewayResolver> = self.api.clone();
        SocketChatClient::new(resolver, self.chat.clone()).into_stream(stop)
    }
}

/// First gateway entry exposing both a host and a secure websocket port
pub fn pick_gateway(servers: &Value) -> Option<(String, u16)> {
    servers.as_array()?.iter().find_map(|server| {
        let host = server.get("host")?.as_str()?;
        let port = server.get("wss_port")?.as_u64()?;
        Some((host.to_string(), u16::try_from(port).ok()?))
    })
}

struct BilibiliApi {
    client: reqwest::Client,
    base: String,
    short_id: String,
    /// Real room id behind the short id in the URL, resolved once
    room_id: Mutex<Option<u64>>,
}

impl BilibiliApi {
    async fn get_data(&self, path: &str, query: &[(&str, String)]) -> RecorderResult<Value> {
        let body: Value = self
            .client
            .get(format!("{}{}", self.base, path))
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match body.get("code").and_then(Value::as_i64) {
            Some(0) => Ok(body.get("data").cloned().unwrap_or(Value::Null)),
            Some(code) => {
                let msg = body
                    .get("msg")
                    .or_else(|| body.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Err(RecorderError::Network(format!("{} - {} ({})", path, msg, code)))
            }
            None => Err(RecorderError::ProtocolShape(format!("{} is broken", path))),
        }
    }

    async fn room_id(&self) -> RecorderResult<u64> {
        let cached = *self.room_id.lock();
        if let Some(id) = cached {
            return Ok(id);
        }

        let data = self
            .get_data("/room/v1/Room/room_init", &[("id", self.short_id.clone())])
            .await?;
        let id = data
            .get("room_id")
            .and_then(Value::as_u64)
            .ok_or_else(|| RecorderError::ProtocolShape("room_init: missing room_id".to_string()))?;

        debug!("Resolved room {} to real id {}", self.short_id, id);
        *self.room_id.lock() = Some(id);
        Ok(id)
    }

    /// Live flag and title
    async fn room_info(&self) -> RecorderResult<(bool, String)> {
        let room_id = self.room_id().await?;
        let data = self
            .get_data("/room/v1/Room/get_info", &[("room_id", room_id.to_string())])
            .await?;

        let live = data.get("live_status").and_then(Value::as_i64) == Some(1);
        let title = data
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok((live, title))
    }

    async fn anchor(&self) -> RecorderResult<String> {
        let room_id = self.room_id().await?;
        let data = self
            .get_data(
                "/live_user/v1/UserInfo/get_anchor_in_room",
                &[("roomid", room_id.to_string())],
            )
            .await?;

        Ok(data
            .pointer("/info/uname")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn play_urls(&self) -> RecorderResult<Vec<StreamTarget>> {
        let room_id = self.room_id().await?;
        let data = self
            .get_data("/room/v1/Room/playUrl", &[("cid", room_id.to_string())])
            .await?;

        Ok(data
            .get("durl")
            .and_then(Value::as_array)
            .map(|durl| {
                durl.iter()
                    .filter_map(|entry| entry.get("url").and_then(Value::as_str))
                    .filter(|url| url::Url::parse(url).is_ok())
                    .map(|url| StreamTarget {
                        url: url.to_string(),
                        container: STREAM_CONTAINER.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl GatewayResolver for BilibiliApi {
    async fn resolve(&self) -> RecorderResult<Gateway> {
        let room_id = self.room_id().await?;
        let data = self
            .get_data(
                "/room/v1/Danmu/getConf",
                &[
                    ("room_id", room_id.to_string()),
                    ("platform", "pc".to_string()),
                    ("player", "web".to_string()),
                ],
            )
            .await?;

        let (host, port) = data
            .get("host_server_list")
            .and_then(pick_gateway)
            .ok_or_else(|| RecorderError::ProtocolShape("getConf: no usable gateway".to_string()))?;

        Ok(Gateway::secure(&host, port, room_id))
    }
}
