use super::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// GET /rooms
/// List every monitored room
pub async fn list_rooms(State(state): State<AppState>) -> impl IntoResponse {
    let rooms = state.board.list().await;
    (StatusCode::OK, Json(rooms))
}

/// GET /rooms/:room_id
/// Status of one room and its current session
pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> impl IntoResponse {
    match state.board.get(&room_id).await {
        Some(status) => (StatusCode::OK, Json(status)).into_response(),
        None => {
            debug!("Room {} not found", room_id);
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: format!("Room {} not found", room_id),
                }),
            )
                .into_response()
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
