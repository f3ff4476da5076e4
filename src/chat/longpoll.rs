//! Continuation-token long-poll chat client
//!
//! 1. Fetch the chat page and pull the embedded initial-state JSON out of it.
//! 2. Read the first continuation token and the server-suggested wait from
//!    either the "invalidation" or the "timed" continuation shape, and surface
//!    any messages already embedded.
//! 3. Sleep the suggested interval, fetch the continuation endpoint, repeat.
//!
//! A failed fetch or a body carrying neither continuation shape means the
//! session is lost; the client backs off and starts over at step 1.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{ChatMessage, ChatStream, RetryPolicy};
use crate::error::RecorderResult;

/// Textual markers preceding the initial-state JSON in the chat page
pub const INITIAL_DATA_MARKERS: [&str; 2] = ["window[\"ytInitialData\"]", "var ytInitialData"];

/// JSON pointer of the renderer inside the chat page's initial state
pub const INITIAL_ROOT: &str = "/contents/liveChatRenderer";

/// JSON pointer of the renderer inside a continuation response
pub const CONTINUATION_ROOT: &str = "/response/continuationContents/liveChatContinuation";

const CONTINUATION_SHAPES: [&str; 2] = ["invalidationContinuationData", "timedContinuationData"];
const DEFAULT_WAIT_MS: u64 = 1000;

/// HTTP side of the long-poll protocol
#[async_trait]
pub trait LongPollTransport: Send + Sync {
    /// Fetch the chat page of the current broadcast
    async fn fetch_chat_page(&self) -> RecorderResult<String>;

    /// Fetch the next batch for `token`
    async fn fetch_continuation(&self, token: &str) -> RecorderResult<String>;
}

/// One parsed poll result
#[derive(Debug, Clone, PartialEq)]
pub struct ChatBatch {
    pub continuation: String,
    pub wait: Duration,
    pub messages: Vec<ChatMessage>,
}

/// Locate the initial-state JSON of a chat page.
pub fn extract_initial_data(page: &str) -> Option<Value> {
    extract_embedded_json(page, &INITIAL_DATA_MARKERS)
}

/// Parse the first JSON object assigned right after one of `markers`.
pub fn extract_embedded_json(page: &str, markers: &[&str]) -> Option<Value> {
    markers.iter().find_map(|marker| {
        let start = page.find(marker)? + marker.len();
        let rest = &page[start..];
        let json_start = rest.find('{')?;
        // Only whitespace and '=' may sit between the marker and the object
        if !rest[..json_start].chars().all(|c| c.is_whitespace() || c == '=') {
            return None;
        }

        serde_json::Deserializer::from_str(&rest[json_start..])
            .into_iter::<Value>()
            .next()?
            .ok()
    })
}

/// Parse the continuation and messages under `root`.
///
/// Returns `None` when neither continuation shape is present.
pub fn parse_batch(data: &Value, root: &str) -> Option<ChatBatch> {
    let renderer = data.pointer(root)?;
    let continuation = renderer.pointer("/continuations/0")?;
    let shape = CONTINUATION_SHAPES
        .iter()
        .find_map(|name| continuation.get(*name))?;

    let token = shape.get("continuation")?.as_str()?.to_string();
    let wait_ms = shape
        .get("timeoutMs")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_WAIT_MS);

    let messages = renderer
        .get("actions")
        .and_then(Value::as_array)
        .map(|actions| {
            actions
                .iter()
                .filter_map(|action| {
                    action.pointer("/addChatItemAction/item/liveChatTextMessageRenderer")
                })
                .map(text_message)
                .collect()
        })
        .unwrap_or_default();

    Some(ChatBatch {
        continuation: token,
        wait: Duration::from_millis(wait_ms),
        messages,
    })
}

/// Parse a continuation endpoint body, which is either an object or an
/// array of objects depending on the endpoint flavour.
pub fn parse_continuation(body: &str) -> Option<ChatBatch> {
    let data: Value = serde_json::from_str(body).ok()?;
    match &data {
        Value::Array(items) => items
            .iter()
            .find_map(|item| parse_batch(item, CONTINUATION_ROOT)),
        _ => parse_batch(&data, CONTINUATION_ROOT),
    }
}

fn text_message(renderer: &Value) -> ChatMessage {
    let text = renderer
        .pointer("/message/runs")
        .and_then(Value::as_array)
        .map(|runs| {
            runs.iter()
                .filter_map(|run| run.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default();

    let author = renderer
        .pointer("/authorName/simpleText")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let timestamp_usec = match renderer.get("timestampUsec") {
        Some(Value::String(s)) => s.parse::<i64>().unwrap_or_default(),
        Some(v) => v.as_i64().unwrap_or_default(),
        None => 0,
    };

    ChatMessage::text(text, author, timestamp_usec / 1000)
}

/// Long-poll chat client
pub struct LongPollChatClient {
    transport: Arc<dyn LongPollTransport>,
    retry: RetryPolicy,
}

impl LongPollChatClient {
    pub fn new(transport: Arc<dyn LongPollTransport>, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    /// Turn the client into a lazy message sequence that ends when `stop` fires
    /// or the retry budget runs out.
    pub fn into_stream(self, stop: CancellationToken) -> ChatStream {
        let driver = Driver {
            transport: self.transport,
            retry: self.retry,
            stop,
            phase: Phase::FetchPage,
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

enum Phase {
    FetchPage,
    Wait { token: String, wait: Duration },
    Poll(String),
    Backoff,
    Done,
}

struct Driver {
    transport: Arc<dyn LongPollTransport>,
    retry: RetryPolicy,
    stop: CancellationToken,
    phase: Phase,
    pending: VecDeque<ChatMessage>,
    failures: u32,
}

impl Driver {
    async fn next_message(&mut self) -> Option<ChatMessage> {
        loop {
            if self.stop.is_cancelled() {
                self.pending.clear();
                self.phase = Phase::Done;
            }

            if let Some(message) = self.pending.pop_front() {
                return Some(message);
            }

            self.phase = match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Done => return None,
                Phase::FetchPage => self.fetch_page().await,
                Phase::Wait { token, wait } => {
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => Phase::Poll(token),
                        _ = self.stop.cancelled() => Phase::Done,
                    }
                }
                Phase::Poll(token) => self.poll(&token).await,
                Phase::Backoff => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry.backoff) => Phase::FetchPage,
                        _ = self.stop.cancelled() => Phase::Done,
                    }
                }
            };
        }
    }

    async fn fetch_page(&mut self) -> Phase {
        let page = tokio::select! {
            page = self.transport.fetch_chat_page() => page,
            _ = self.stop.cancelled() => return Phase::Done,
        };

        let batch = match page {
            Ok(page) => extract_initial_data(&page).and_then(|data| parse_batch(&data, INITIAL_ROOT)),
            Err(e) => {
                error!("Failed to fetch chat page: {}", e);
                return self.fail();
            }
        };

        match batch {
            Some(batch) => {
                debug!("Chat session established, {} initial messages", batch.messages.len());
                self.accept(batch)
            }
            None => {
                warn!("Chat page carries no continuation");
                self.fail()
            }
        }
    }

    async fn poll(&mut self, token: &str) -> Phase {
        let body = tokio::select! {
            body = self.transport.fetch_continuation(token) => body,
            _ = self.stop.cancelled() => return Phase::Done,
        };

        match body {
            Ok(body) => match parse_continuation(&body) {
                Some(batch) => self.accept(batch),
                None => {
                    warn!("Chat continuation lost, restarting session");
                    self.fail()
                }
            },
            Err(e) => {
                error!("Failed to fetch chat continuation: {}", e);
                self.fail()
            }
        }
    }

    fn accept(&mut self, batch: ChatBatch) -> Phase {
        self.failures = 0;
        self.pending.extend(batch.messages);
        Phase::Wait {
            token: batch.continuation,
            wait: batch.wait,
        }
    }

    fn fail(&mut self) -> Phase {
        self.failures += 1;
        if self.retry.exhausted(self.failures) {
            error!("Giving up on chat after {} consecutive failures", self.failures);
            Phase::Done
        } else {
            Phase::Backoff
        }
    }
}
