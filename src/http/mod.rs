//! Read-only status API
//!
//! - GET /health - Health check
//! - GET /rooms - All monitored rooms with their current session
//! - GET /rooms/:room_id - One room

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
