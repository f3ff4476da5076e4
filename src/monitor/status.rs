use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::Room;
use crate::platform::Platform;
use crate::session::{RecordingSession, SessionStats};

/// Snapshot of one room for the status API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomStatus {
    pub room_id: String,
    pub url: String,
    pub platform: Platform,
    pub live: bool,
    pub recording: bool,
    pub session: Option<SessionStats>,
}

struct RoomEntry {
    url: String,
    platform: Platform,
    live: bool,
    session: Option<Arc<RecordingSession>>,
}

impl RoomEntry {
    fn status(&self, room_id: &str) -> RoomStatus {
        RoomStatus {
            room_id: room_id.to_string(),
            url: self.url.clone(),
            platform: self.platform,
            live: self.live,
            recording: self.session.as_ref().is_some_and(|s| s.is_running()),
            session: self.session.as_ref().map(|s| s.stats()),
        }
    }
}

/// Rooms and their current sessions, written by the monitors
#[derive(Clone, Default)]
pub struct StatusBoard {
    rooms: Arc<RwLock<HashMap<String, RoomEntry>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update(&self, room: &Room, session: Option<Arc<RecordingSession>>) {
        let entry = RoomEntry {
            url: room.url.clone(),
            platform: room.adapter.platform(),
            live: room.last_status,
            session,
        };
        self.rooms.write().await.insert(room.id.clone(), entry);
    }

    /// All rooms, ordered by URL
    pub async fn list(&self) -> Vec<RoomStatus> {
        let rooms = self.rooms.read().await;
        let mut statuses: Vec<RoomStatus> = rooms
            .iter()
            .map(|(id, entry)| entry.status(id))
            .collect();
        statuses.sort_by(|a, b| a.url.cmp(&b.url));
        statuses
    }

    pub async fn get(&self, room_id: &str) -> Option<RoomStatus> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map(|entry| entry.status(room_id))
    }
}
