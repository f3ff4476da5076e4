//! Stub collaborators shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use dd_recorder::capture::{CaptureProcess, CaptureRequest, ExitOutcome, ProcessSupervisor};
use dd_recorder::chat::{ChatMessage, ChatStream};
use dd_recorder::platform::{Platform, PlatformAdapter, RoomMetadata, StreamTarget};
use dd_recorder::{RecorderError, RecorderResult};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Adapter answering from a script
pub struct StubAdapter {
    statuses: Mutex<VecDeque<RecorderResult<bool>>>,
    last_status: Mutex<bool>,
    targets: Vec<StreamTarget>,
    resolutions: Mutex<VecDeque<RecorderResult<Vec<StreamTarget>>>>,
    messages: Vec<ChatMessage>,
    metadata: RoomMetadata,
    pub status_queries: AtomicUsize,
    pub chat_opens: AtomicUsize,
    pub refreshes: AtomicUsize,
    pub resolves: AtomicUsize,
}

impl StubAdapter {
    /// Statuses are answered in order; the last one repeats forever
    pub fn new(statuses: Vec<RecorderResult<bool>>, messages: Vec<ChatMessage>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            last_status: Mutex::new(false),
            targets: vec![stub_target()],
            resolutions: Mutex::new(VecDeque::new()),
            messages,
            metadata: RoomMetadata {
                title: "stub room".to_string(),
                author: "tester".to_string(),
            },
            status_queries: AtomicUsize::new(0),
            chat_opens: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            resolves: AtomicUsize::new(0),
        }
    }

    /// Target resolutions answered in order before falling back to the
    /// single stub target
    pub fn with_resolutions(self, resolutions: Vec<RecorderResult<Vec<StreamTarget>>>) -> Self {
        *self.resolutions.lock() = resolutions.into();
        self
    }

    pub fn resolve_count(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.status_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformAdapter for StubAdapter {
    fn platform(&self) -> Platform {
        Platform::Bilibili
    }

    fn live_url(&self) -> &str {
        "https://live.bilibili.com/1"
    }

    fn metadata(&self) -> RoomMetadata {
        self.metadata.clone()
    }

    async fn query_live_status(&self) -> RecorderResult<bool> {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        match self.statuses.lock().pop_front() {
            Some(Ok(live)) => {
                *self.last_status.lock() = live;
                Ok(live)
            }
            Some(Err(e)) => Err(e),
            None => Ok(*self.last_status.lock()),
        }
    }

    async fn refresh_metadata(&self) -> RecorderResult<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn resolve_stream_targets(&self) -> RecorderResult<Vec<StreamTarget>> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        match self.resolutions.lock().pop_front() {
            Some(result) => result,
            None => Ok(self.targets.clone()),
        }
    }

    fn open_chat_stream(&self, stop: CancellationToken) -> ChatStream {
        self.chat_opens.fetch_add(1, Ordering::SeqCst);
        // Scripted messages, then silence until stopped
        let tail = futures::stream::once(async move { stop.cancelled().await })
            .filter_map(|_| async { None::<ChatMessage> });
        futures::stream::iter(self.messages.clone()).chain(tail).boxed()
    }
}

pub fn stub_target() -> StreamTarget {
    StreamTarget {
        url: "http://stream.invalid/live.flv".to_string(),
        container: "ts".to_string(),
    }
}

/// Supervisor whose processes run until killed, unless scripted to exit
#[derive(Default)]
pub struct FakeSupervisor {
    pub spawns: AtomicUsize,
    pub kills: Arc<AtomicUsize>,
    pub requests: Mutex<Vec<CaptureRequest>>,
    /// Per-spawn lifetimes; `None` or an exhausted script runs until killed
    lifetimes: Mutex<VecDeque<Option<Duration>>>,
}

impl FakeSupervisor {
    pub fn with_lifetimes(lifetimes: Vec<Option<Duration>>) -> Self {
        Self {
            lifetimes: Mutex::new(lifetimes.into()),
            ..Default::default()
        }
    }

    pub fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessSupervisor for FakeSupervisor {
    async fn spawn(&self, request: &CaptureRequest) -> RecorderResult<Box<dyn CaptureProcess>> {
        // Stand in for the capture tool creating its output file
        std::fs::write(&request.output_path, b"").map_err(RecorderError::from)?;

        self.spawns.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        let lifetime = self.lifetimes.lock().pop_front().flatten();

        Ok(Box::new(FakeProcess {
            lifetime,
            kills: Arc::clone(&self.kills),
        }))
    }
}

pub struct FakeProcess {
    lifetime: Option<Duration>,
    kills: Arc<AtomicUsize>,
}

#[async_trait]
impl CaptureProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> ExitOutcome {
        match self.lifetime {
            Some(lifetime) => {
                tokio::time::sleep(lifetime).await;
                ExitOutcome { code: Some(0) }
            }
            None => futures::future::pending().await,
        }
    }

    async fn kill(&mut self) {
        self.kills.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn chat(text: &str, timestamp_ms: i64) -> ChatMessage {
    ChatMessage::text(text, "viewer", timestamp_ms)
}

/// Every file under `root` with extension `ext`
pub fn files_with_ext(root: &Path, ext: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut dirs = vec![root.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some(ext) {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}

/// Poll `condition` every 10ms until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
