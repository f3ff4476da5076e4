pub mod capture;
pub mod chat;
pub mod config;
pub mod error;
pub mod fleet;
pub mod http;
pub mod logging;
pub mod monitor;
pub mod platform;
pub mod recording;
pub mod session;

pub use capture::{
    CaptureProcess, CaptureRequest, ExitOutcome, FfmpegConfig, FfmpegSupervisor, ProcessSupervisor,
};
pub use chat::{ChatKind, ChatMessage, ChatStream, RetryPolicy};
pub use config::{Config, ConfigOverrides};
pub use error::{RecorderError, RecorderResult};
pub use fleet::FleetCoordinator;
pub use http::{create_router, AppState};
pub use monitor::{LiveStatusEdge, Room, RoomMonitor, RoomStatus, StatusBoard, Transition};
pub use platform::{Platform, PlatformAdapter, RoomMetadata, StreamTarget};
pub use session::{RecordingSession, SessionConfig, SessionStats};
