// Integration tests for the continuation-token long-poll chat client
//
// A scripted transport plays back one chat page and a list of continuation
// bodies. The client must surface every addChatItemAction in response order
// and go back to the chat page when a continuation is lost.

use anyhow::Result;
use async_trait::async_trait;
use dd_recorder::chat::longpoll::{extract_initial_data, parse_batch, parse_continuation, INITIAL_ROOT};
use dd_recorder::chat::{LongPollChatClient, LongPollTransport, RetryPolicy};
use dd_recorder::{RecorderError, RecorderResult};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

fn item(text: &str, author: &str, usec: i64) -> Value {
    json!({
        "addChatItemAction": {
            "item": {
                "liveChatTextMessageRenderer": {
                    "message": { "runs": [ { "text": text } ] },
                    "authorName": { "simpleText": author },
                    "timestampUsec": usec.to_string()
                }
            }
        }
    })
}

fn renderer(shape: &str, token: &str, wait_ms: u64, actions: Vec<Value>) -> Value {
    json!({
        "continuations": [ { shape: { "continuation": token, "timeoutMs": wait_ms } } ],
        "actions": actions
    })
}

fn chat_page(shape: &str, token: &str, actions: Vec<Value>) -> String {
    let data = json!({ "contents": { "liveChatRenderer": renderer(shape, token, 10, actions) } });
    format!(
        "<html><script>window[\"ytInitialData\"] = {};</script></html>",
        data
    )
}

fn continuation(shape: &str, token: &str, actions: Vec<Value>) -> String {
    json!({
        "response": {
            "continuationContents": { "liveChatContinuation": renderer(shape, token, 10, actions) }
        }
    })
    .to_string()
}

/// Plays back a script; once exhausted every fetch hangs
struct ScriptedTransport {
    page: String,
    continuations: Mutex<VecDeque<RecorderResult<String>>>,
    page_fetches: AtomicUsize,
    tokens: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new(page: String, continuations: Vec<RecorderResult<String>>) -> Arc<Self> {
        Arc::new(Self {
            page,
            continuations: Mutex::new(continuations.into()),
            page_fetches: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LongPollTransport for ScriptedTransport {
    async fn fetch_chat_page(&self) -> RecorderResult<String> {
        self.page_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.page.clone())
    }

    async fn fetch_continuation(&self, token: &str) -> RecorderResult<String> {
        self.tokens.lock().push(token.to_string());
        let next = self.continuations.lock().pop_front();
        match next {
            Some(body) => body,
            None => futures::future::pending().await,
        }
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        backoff: Duration::from_millis(10),
        max_consecutive_failures: Some(5),
    }
}

#[tokio::test]
async fn test_messages_follow_response_order() -> Result<()> {
    let page = chat_page(
        "invalidationContinuationData",
        "t1",
        vec![item("a", "alice", 1_000_000)],
    );
    let transport = ScriptedTransport::new(
        page,
        vec![
            Ok(continuation(
                "timedContinuationData",
                "t2",
                vec![item("b", "bob", 2_000_000), item("c", "carol", 3_000_000)],
            )),
            Ok(continuation("invalidationContinuationData", "t3", vec![])),
            Ok(continuation(
                "invalidationContinuationData",
                "t4",
                vec![item("d", "dave", 4_000_000)],
            )),
        ],
    );

    let stop = CancellationToken::new();
    let mut messages =
        LongPollChatClient::new(transport.clone(), fast_retry()).into_stream(stop.clone());

    let mut received = Vec::new();
    for _ in 0..4 {
        let message = timeout(TIMEOUT, messages.next()).await?.expect("scripted message");
        received.push((message.text, message.author, message.timestamp_ms));
    }

    assert_eq!(
        received,
        vec![
            ("a".to_string(), "alice".to_string(), 1_000),
            ("b".to_string(), "bob".to_string(), 2_000),
            ("c".to_string(), "carol".to_string(), 3_000),
            ("d".to_string(), "dave".to_string(), 4_000),
        ]
    );
    assert_eq!(*transport.tokens.lock(), vec!["t1", "t2", "t3"]);
    assert_eq!(transport.page_fetches.load(Ordering::SeqCst), 1);

    stop.cancel();
    assert!(timeout(TIMEOUT, messages.next()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_lost_continuation_restarts_from_chat_page() -> Result<()> {
    let page = chat_page("timedContinuationData", "t1", vec![]);
    let transport = ScriptedTransport::new(
        page,
        vec![
            Ok(json!({ "response": {} }).to_string()),
            Err(RecorderError::Network("connection reset".to_string())),
            Ok(continuation("timedContinuationData", "t2", vec![item("back", "x", 5_000)])),
        ],
    );

    let stop = CancellationToken::new();
    let mut messages =
        LongPollChatClient::new(transport.clone(), fast_retry()).into_stream(stop.clone());

    let message = timeout(TIMEOUT, messages.next()).await?.expect("message after recovery");
    assert_eq!(message.text, "back");
    assert_eq!(transport.page_fetches.load(Ordering::SeqCst), 3);

    stop.cancel();
    assert!(timeout(TIMEOUT, messages.next()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_stop_interrupts_wait() -> Result<()> {
    let data = json!({
        "contents": { "liveChatRenderer": renderer("timedContinuationData", "t1", 60_000, vec![]) }
    });
    let page = format!("var ytInitialData = {};", data);
    let transport = ScriptedTransport::new(page, vec![]);

    let stop = CancellationToken::new();
    let mut messages =
        LongPollChatClient::new(transport.clone(), fast_retry()).into_stream(stop.clone());

    let canceller = {
        let stop = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop.cancel();
        })
    };

    // The server asked for a one-minute wait; stop must cut it short
    assert!(timeout(TIMEOUT, messages.next()).await?.is_none());
    assert!(transport.tokens.lock().is_empty());
    canceller.await?;
    Ok(())
}

#[tokio::test]
async fn test_stream_ends_after_consecutive_failures() -> Result<()> {
    let transport = ScriptedTransport::new("<html>no data</html>".to_string(), vec![]);

    let retry = RetryPolicy {
        backoff: Duration::from_millis(1),
        max_consecutive_failures: Some(3),
    };
    let mut messages =
        LongPollChatClient::new(transport.clone(), retry).into_stream(CancellationToken::new());

    assert!(timeout(TIMEOUT, messages.next()).await?.is_none());
    assert_eq!(transport.page_fetches.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn test_parse_helpers() {
    let page = chat_page("invalidationContinuationData", "tok", vec![item("hi", "a", 7_000)]);
    let data = extract_initial_data(&page).expect("initial data");
    let batch = parse_batch(&data, INITIAL_ROOT).expect("batch");
    assert_eq!(batch.continuation, "tok");
    assert_eq!(batch.wait, Duration::from_millis(10));
    assert_eq!(batch.messages.len(), 1);

    // Some endpoints wrap the response in an array
    let wrapped = format!("[{{}}, {}]", continuation("timedContinuationData", "next", vec![]));
    assert_eq!(parse_continuation(&wrapped).expect("wrapped").continuation, "next");

    assert!(parse_continuation("{}").is_none());
    assert!(parse_continuation("not json").is_none());
    assert!(extract_initial_data("ytInitialData is mentioned but not assigned").is_none());
}
