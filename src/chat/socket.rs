//! Persistent-socket chat client
//!
//! Connection lifecycle, driven one step per poll of the returned stream:
//!
//! ```text
//!   Resolve ──> Connect ──> Streaming ──(read error / close)──┐
//!      ^                                                      │
//!      └──────────────────── Backoff <────────────────────────┘
//! ```
//!
//! The gateway is a websocket endpoint; every binary message carries one or
//! more length-prefixed frames. The gateway is resolved again on every
//! reconnect because the server may assign a different one. The stop token is
//! raced against every suspension point; once it fires the socket is closed
//! and the stream ends.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{interval_at, Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::danmaku::decode_command;
use super::frame::{decode_frames, Frame, Operation};
use super::{ChatMessage, ChatStream, RetryPolicy};
use crate::error::RecorderResult;

const CLIENT_VERSION: &str = "1.5.10.1";
const CLIENT_PLATFORM: &str = "web";
const ENTER_UID: u64 = 2;

const GATEWAY_PATH: &str = "/sub";

/// A chat gateway endpoint for one room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gateway {
    /// Websocket URL of the gateway
    pub url: String,
    /// Room id sent in the `Enter` frame
    pub room_id: u64,
}

impl Gateway {
    /// TLS endpoint on `host:port`
    pub fn secure(host: &str, port: u16, room_id: u64) -> Self {
        Self {
            url: format!("wss://{}:{}{}", host, port, GATEWAY_PATH),
            room_id,
        }
    }
}

/// Looks up the current gateway of a room
#[async_trait]
pub trait GatewayResolver: Send + Sync {
    async fn resolve(&self) -> RecorderResult<Gateway>;
}

#[derive(Debug, Clone)]
pub struct SocketChatConfig {
    pub heartbeat_interval: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SocketChatConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Serialize)]
struct EnterRoom<'a> {
    clientver: &'a str,
    platform: &'a str,
    protover: u16,
    roomid: u64,
    uid: u64,
}

/// Build the `Enter` frame joining `room_id`
pub fn enter_frame(room_id: u64) -> RecorderResult<Frame> {
    let body = serde_json::to_vec(&EnterRoom {
        clientver: CLIENT_VERSION,
        platform: CLIENT_PLATFORM,
        protover: 1,
        roomid: room_id,
        uid: ENTER_UID,
    })?;
    Ok(Frame::new(Operation::Enter, body))
}

/// Binary-framed chat client
pub struct SocketChatClient {
    resolver: Arc<dyn GatewayResolver>,
    config: SocketChatConfig,
}

impl SocketChatClient {
    pub fn new(resolver: Arc<dyn GatewayResolver>, config: SocketChatConfig) -> Self {
        Self { resolver, config }
    }

    /// Turn the client into a lazy message sequence that ends when `stop` fires
    /// or the retry budget runs out.
    pub fn into_stream(self, stop: CancellationToken) -> ChatStream {
        let driver = Driver {
            resolver: self.resolver,
            config: self.config,
            stop,
            phase: Phase::Resolve,
            pending: VecDeque::new(),
            failures: 0,
        };

        futures::stream::unfold(driver, |mut driver| async move {
            let message = driver.next_message().await?;
            Some((message, driver))
        })
        .boxed()
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Connection {
    socket: Socket,
    heartbeat: Interval,
}

async fn send_frame(socket: &mut Socket, frame: &Frame) -> anyhow::Result<()> {
    let bytes = frame.to_bytes()?;
    socket.send(Message::binary(bytes.to_vec())).await?;
    Ok(())
}

enum Phase {
    Resolve,
    Connect(Gateway),
    Streaming(Box<Connection>),
    Backoff,
    Done,
}

struct Driver {
    resolver: Arc<dyn GatewayResolver>,
    config: SocketChatConfig,
    stop: CancellationToken,
    phase: Phase,
    pending: VecDeque<ChatMessage>,
    failures: u32,
}

impl Driver {
    async fn next_message(&mut self) -> Option<ChatMessage> {
        loop {
            if self.stop.is_cancelled() {
                if let Phase::Streaming(mut conn) = std::mem::replace(&mut self.phase, Phase::Done) {
                    let _ = conn.socket.close(None).await;
                }
                self.pending.clear();
                self.phase = Phase::Done;
            }

            if let Some(message) = self.pending.pop_front() {
                return Some(message);
            }

            self.phase = match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Done => return None,
                Phase::Resolve => self.resolve().await,
                Phase::Connect(gateway) => self.connect(gateway).await,
                Phase::Streaming(conn) => self.read(conn).await,
                Phase::Backoff => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.retry.backoff) => Phase::Resolve,
                        _ = self.stop.cancelled() => Phase::Done,
                    }
                }
            };
        }
    }

    async fn resolve(&mut self) -> Phase {
        let result = tokio::select! {
            result = self.resolver.resolve() => result,
            _ = self.stop.cancelled() => return Phase::Done,
        };

        match result {
            Ok(gateway) => {
                debug!("Resolved chat gateway {}", gateway.url);
                Phase::Connect(gateway)
            }
            Err(e) => {
                error!("Failed to resolve chat gateway: {}", e);
                self.fail()
            }
        }
    }

    async fn connect(&mut self, gateway: Gateway) -> Phase {
        let connect = tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(gateway.url.as_str()),
        );

        let mut socket = tokio::select! {
            result = connect => match result {
                Ok(Ok((socket, _))) => socket,
                Ok(Err(e)) => {
                    error!("Failed to connect to chat gateway {}: {}", gateway.url, e);
                    return self.fail();
                }
                Err(_) => {
                    error!("Timed out connecting to chat gateway {}", gateway.url);
                    return self.fail();
                }
            },
            _ = self.stop.cancelled() => return Phase::Done,
        };

        let enter = match enter_frame(gateway.room_id) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to build enter frame: {}", e);
                return self.fail();
            }
        };

        if let Err(e) = send_frame(&mut socket, &enter).await {
            error!("Failed to send enter frame: {}", e);
            return self.fail();
        }

        info!("Connected to chat gateway {} (room {})", gateway.url, gateway.room_id);
        self.failures = 0;

        let period = self.config.heartbeat_interval;
        Phase::Streaming(Box::new(Connection {
            socket,
            heartbeat: interval_at(Instant::now() + period, period),
        }))
    }

    async fn read(&mut self, mut conn: Box<Connection>) -> Phase {
        tokio::select! {
            _ = self.stop.cancelled() => {
                let _ = conn.socket.close(None).await;
                Phase::Done
            }
            _ = conn.heartbeat.tick() => {
                match send_frame(&mut conn.socket, &Frame::heartbeat()).await {
                    Ok(()) => Phase::Streaming(conn),
                    Err(e) => {
                        warn!("Failed to send heartbeat, reconnecting: {}", e);
                        self.fail()
                    }
                }
            }
            message = conn.socket.next() => match message {
                Some(Ok(Message::Binary(data))) => match decode_frames(&data) {
                    Ok(frames) => {
                        self.pending.extend(
                            frames
                                .iter()
                                .filter(|frame| frame.operation == Operation::Message)
                                .filter_map(|frame| decode_command(&frame.body)),
                        );
                        Phase::Streaming(conn)
                    }
                    Err(e) => {
                        warn!("Malformed chat frames, reconnecting: {}", e);
                        self.fail()
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("Chat socket closed by server, reconnecting");
                    self.fail()
                }
                // Pings are answered by the websocket layer
                Some(Ok(_)) => Phase::Streaming(conn),
                Some(Err(e)) => {
                    warn!("Chat socket read failed, reconnecting: {}", e);
                    self.fail()
                }
            },
        }
    }

    fn fail(&mut self) -> Phase {
        self.failures += 1;
        if self.config.retry.exhausted(self.failures) {
            error!("Giving up on chat after {} consecutive failures", self.failures);
            Phase::Done
        } else {
            Phase::Backoff
        }
    }
}
