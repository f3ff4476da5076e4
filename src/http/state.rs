use crate::monitor::StatusBoard;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Room statuses published by the monitors
    pub board: StatusBoard,
}

impl AppState {
    pub fn new(board: StatusBoard) -> Self {
        Self { board }
    }
}
