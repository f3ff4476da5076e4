//! Per-room polling loop
//!
//! Each poll computes a [`LiveStatusEdge`]; `false → true` starts a
//! [`RecordingSession`], `true → false` stops it and waits for it to drain.
//! A failed status query is logged and produces no edge.

mod status;

pub use status::{RoomStatus, StatusBoard};

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::capture::ProcessSupervisor;
use crate::platform::PlatformAdapter;
use crate::session::{RecordingSession, SessionConfig};

/// Stable room id: md5 of the canonical room URL
pub fn room_id(url: &str) -> String {
    let canonical = url::Url::parse(url.trim())
        .map(|parsed| parsed.to_string())
        .unwrap_or_else(|_| url.trim().to_string());
    format!("{:x}", md5::compute(canonical.trim_end_matches('/')))
}

/// One monitored room
pub struct Room {
    pub id: String,
    pub url: String,
    pub adapter: Arc<dyn PlatformAdapter>,
    pub interval: Duration,
    /// Last successfully polled live status
    pub last_status: bool,
}

impl Room {
    pub fn new(adapter: Arc<dyn PlatformAdapter>, interval: Duration) -> Self {
        let url = adapter.live_url().to_string();
        Self {
            id: room_id(&url),
            url,
            adapter,
            interval,
            last_status: false,
        }
    }
}

/// What a poll asks the monitor to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Stop,
    None,
}

/// Live status of two consecutive successful polls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveStatusEdge {
    pub previous: bool,
    pub current: bool,
}

impl LiveStatusEdge {
    pub fn transition(self) -> Transition {
        match (self.previous, self.current) {
            (false, true) => Transition::Start,
            (true, false) => Transition::Stop,
            _ => Transition::None,
        }
    }
}

enum MonitorState {
    Idle,
    Recording {
        session: Arc<RecordingSession>,
        task: JoinHandle<()>,
    },
}

/// Everything a monitor shares with the rest of the fleet
#[derive(Clone)]
pub struct MonitorContext {
    pub supervisor: Arc<dyn ProcessSupervisor>,
    pub session: SessionConfig,
    pub board: StatusBoard,
    /// Tracks session tasks so the fleet can drain them
    pub tracker: TaskTracker,
}

/// Polling state machine for one room
pub struct RoomMonitor {
    room: Room,
    context: MonitorContext,
    state: MonitorState,
    span: Span,
}

impl RoomMonitor {
    pub fn new(room: Room, context: MonitorContext, span: Span) -> Self {
        Self {
            room,
            context,
            state: MonitorState::Idle,
            span,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room.id
    }

    /// Poll until `cancel` fires, then stop any running session and return
    pub async fn run(self, cancel: CancellationToken) {
        let span = self.span.clone();
        self.run_inner(cancel).instrument(span).await
    }

    async fn run_inner(mut self, cancel: CancellationToken) {
        info!("Monitoring {} every {:?}", self.room.url, self.room.interval);
        self.publish_status().await;

        // First tick completes immediately
        let mut ticker = tokio::time::interval(self.room.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => break,
            }

            self.poll(&cancel).await;
        }

        self.stop_session().await;
        self.publish_status().await;
        info!("Monitor stopped");
    }

    async fn poll(&mut self, cancel: &CancellationToken) {
        self.reap_finished_session().await;

        let status = tokio::select! {
            status = self.room.adapter.query_live_status() => status,
            _ = cancel.cancelled() => return,
        };

        let current = match status {
            Ok(live) => live,
            Err(e) => {
                error!("Failed to query live status: {}", e);
                return;
            }
        };

        let edge = LiveStatusEdge {
            previous: self.room.last_status,
            current,
        };
        self.room.last_status = current;
        debug!("Polled live status: {:?}", edge);

        match edge.transition() {
            Transition::Start => {
                info!("Room went live");
                self.start_session().await;
            }
            Transition::Stop => {
                info!("Room went offline");
                self.stop_session().await;
            }
            Transition::None => {}
        }

        self.publish_status().await;
    }

    async fn start_session(&mut self) {
        if let MonitorState::Recording { .. } = self.state {
            warn!("Session already running, ignoring start");
            return;
        }

        if let Err(e) = self.room.adapter.refresh_metadata().await {
            warn!("Failed to refresh room metadata: {}", e);
        }

        let session = Arc::new(RecordingSession::new(
            &self.room.id,
            Arc::clone(&self.room.adapter),
            Arc::clone(&self.context.supervisor),
            self.context.session.clone(),
            &self.span,
        ));

        let running = Arc::clone(&session);
        let task = self.context.tracker.spawn(async move {
            if let Err(e) = running.start().await {
                error!("Recording session failed: {}", e);
            }
        });

        self.state = MonitorState::Recording { session, task };
    }

    /// Stop the current session and wait until it has fully terminated
    async fn stop_session(&mut self) {
        if let MonitorState::Recording { session, task } =
            std::mem::replace(&mut self.state, MonitorState::Idle)
        {
            session.stop();
            if let Err(e) = task.await {
                error!("Session task panicked: {}", e);
            }
            info!("Session {} terminated", session.id());
        }
    }

    /// A session that ended on its own leaves the room re-armable
    async fn reap_finished_session(&mut self) {
        let finished = matches!(&self.state, MonitorState::Recording { task, .. } if task.is_finished());
        if finished {
            warn!("Session ended while the room was live");
            self.stop_session().await;
            self.room.last_status = false;
        }
    }

    async fn publish_status(&self) {
        let session = match &self.state {
            MonitorState::Recording { session, .. } => Some(Arc::clone(session)),
            MonitorState::Idle => None,
        };
        self.context.board.update(&self.room, session).await;
    }
}
