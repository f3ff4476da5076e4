//! Fans out one room monitor per configured room and drains them on shutdown.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, info_span, warn};

use crate::capture::ProcessSupervisor;
use crate::monitor::{MonitorContext, Room, RoomMonitor, StatusBoard};
use crate::platform::{adapter_for_url, PlatformAdapter};
use crate::session::SessionConfig;

pub struct FleetCoordinator {
    context: MonitorContext,
    interval: Duration,
    cancel: CancellationToken,
    monitors: TaskTracker,
}

impl FleetCoordinator {
    pub fn new(
        supervisor: Arc<dyn ProcessSupervisor>,
        session: SessionConfig,
        interval: Duration,
    ) -> Self {
        Self {
            context: MonitorContext {
                supervisor,
                session,
                board: StatusBoard::new(),
                tracker: TaskTracker::new(),
            },
            interval,
            cancel: CancellationToken::new(),
            monitors: TaskTracker::new(),
        }
    }

    pub fn board(&self) -> StatusBoard {
        self.context.board.clone()
    }

    /// Token cancelled by [`shutdown`](Self::shutdown)
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn monitors for every URL a platform adapter accepts.
    ///
    /// Returns the number of monitors started; rejected URLs are logged.
    pub fn spawn_urls(&self, urls: &[String], client: &reqwest::Client) -> usize {
        let mut started = 0;
        for url in urls {
            match adapter_for_url(url, client) {
                Ok(adapter) => {
                    self.spawn_room(adapter);
                    started += 1;
                }
                Err(e) => warn!("Skipping room {}: {}", url, e),
            }
        }
        started
    }

    /// Spawn a monitor for one room; returns its room id
    pub fn spawn_room(&self, adapter: Arc<dyn PlatformAdapter>) -> String {
        let room = Room::new(adapter, self.interval);
        let room_id = room.id.clone();
        let span = info_span!(
            "room",
            room_id = %room.id,
            platform = %room.adapter.platform()
        );

        let monitor = RoomMonitor::new(room, self.context.clone(), span);
        self.monitors.spawn(monitor.run(self.cancel.child_token()));
        info!("Room monitor spawned: {}", room_id);
        room_id
    }

    /// Cancel every monitor and wait for monitors and sessions to drain
    pub async fn shutdown(&self) {
        info!("Shutting down fleet");
        self.cancel.cancel();

        self.monitors.close();
        self.monitors.wait().await;

        self.context.tracker.close();
        self.context.tracker.wait().await;
        info!("Fleet drained");
    }
}
