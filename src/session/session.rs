use super::config::SessionConfig;
use super::stats::SessionStats;
use crate::capture::ProcessSupervisor;
use crate::chat::ChatStream;
use crate::error::RecorderResult;
use crate::platform::PlatformAdapter;
use crate::recording::{output_dir, ChatRecorder, Segment, StreamCapture};
use chrono::{DateTime, Local, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument, Span};

/// One continuous recording of a room's online period
pub struct RecordingSession {
    /// md5 of room id and start time
    id: String,

    adapter: Arc<dyn PlatformAdapter>,

    supervisor: Arc<dyn ProcessSupervisor>,

    config: SessionConfig,

    /// When the session was created
    started_at: DateTime<Utc>,

    /// Current segment, written by the stream task and read by the chat task
    segments: Arc<watch::Sender<Option<Segment>>>,

    /// Shared stop signal, never reset
    stop: CancellationToken,

    /// Whether `start` is currently running
    is_running: Arc<AtomicBool>,

    /// Number of segments published
    segment_count: Arc<AtomicUsize>,

    /// Number of chat records written
    chat_messages: Arc<AtomicUsize>,

    span: Span,
}

impl RecordingSession {
    /// Create a new session; `parent` is the owning room's span
    pub fn new(
        room_id: &str,
        adapter: Arc<dyn PlatformAdapter>,
        supervisor: Arc<dyn ProcessSupervisor>,
        config: SessionConfig,
        parent: &Span,
    ) -> Self {
        let started_at = Utc::now();
        let id = format!(
            "{:x}",
            md5::compute(format!("{}@{}", room_id, started_at.to_rfc3339()))
        );
        let span = info_span!(parent: parent, "session", session_id = %id);
        let (segments, _) = watch::channel(None);

        Self {
            id,
            adapter,
            supervisor,
            config,
            started_at,
            segments: Arc::new(segments),
            stop: CancellationToken::new(),
            is_running: Arc::new(AtomicBool::new(false)),
            segment_count: Arc::new(AtomicUsize::new(0)),
            chat_messages: Arc::new(AtomicUsize::new(0)),
            span,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run the session; returns once both capture tasks have exited
    pub async fn start(&self) -> RecorderResult<()> {
        self.run().instrument(self.span.clone()).await
    }

    async fn run(&self) -> RecorderResult<()> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!("Session already running");
            return Ok(());
        }

        if self.stop.is_cancelled() {
            warn!("Session was stopped before it started");
            self.is_running.store(false, Ordering::SeqCst);
            return Ok(());
        }

        let metadata = self.adapter.metadata();
        let dir = output_dir(
            &self.config.out_root,
            self.adapter.platform(),
            &metadata.author,
            Local::now().date_naive(),
        );
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            error!("Failed to create output directory {}: {}", dir.display(), e);
            self.is_running.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        info!("Recording session started: {}", dir.display());

        let stream = StreamCapture {
            adapter: Arc::clone(&self.adapter),
            supervisor: Arc::clone(&self.supervisor),
            dir,
            segments: Arc::clone(&self.segments),
            segment_count: Arc::clone(&self.segment_count),
            retry_backoff: self.config.retry_backoff,
        };
        let stream_task = tokio::spawn(
            stream
                .run(self.stop.clone())
                .instrument(info_span!("stream")),
        );

        let messages = self.adapter.open_chat_stream(self.stop.clone());
        let chat_task = tokio::spawn(
            capture_chat(
                messages,
                self.segments.subscribe(),
                Arc::clone(&self.chat_messages),
                self.stop.clone(),
            )
            .instrument(info_span!("chat")),
        );

        let (stream_result, chat_result) = tokio::join!(stream_task, chat_task);
        if let Err(e) = stream_result {
            error!("Stream task panicked: {}", e);
        }
        if let Err(e) = chat_result {
            error!("Chat task panicked: {}", e);
        }

        self.segments.send_replace(None);
        self.is_running.store(false, Ordering::SeqCst);

        info!(
            "Recording session finished: {} segments, {} chat messages",
            self.segment_count.load(Ordering::Relaxed),
            self.chat_messages.load(Ordering::Relaxed)
        );

        Ok(())
    }

    /// Arm the stop signal; never blocks and may be called any number of times
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            let _entered = self.span.enter();
            info!("Stopping recording session");
        }
        self.stop.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Get current session statistics
    pub fn stats(&self) -> SessionStats {
        let duration = Utc::now().signed_duration_since(self.started_at);

        SessionStats {
            session_id: self.id.clone(),
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            segments: self.segment_count.load(Ordering::Relaxed),
            chat_messages: self.chat_messages.load(Ordering::Relaxed),
            base_name: self
                .segments
                .borrow()
                .as_ref()
                .map(|segment| segment.base_name.clone()),
        }
    }
}

/// Wait for the first segment, then write the chat stream into it
async fn capture_chat(
    messages: ChatStream,
    mut segments: watch::Receiver<Option<Segment>>,
    written: Arc<AtomicUsize>,
    stop: CancellationToken,
) {
    let ready = tokio::select! {
        published = segments.wait_for(Option::is_some) => published.is_ok(),
        _ = stop.cancelled() => false,
    };
    if !ready {
        info!("Chat capture ended before the first segment");
        return;
    }

    match ChatRecorder::new(segments, written).record(messages, stop).await {
        Ok(files) => info!("Chat capture finished, {} files written", files.len()),
        Err(e) => error!("Chat capture failed: {}", e),
    }
}
