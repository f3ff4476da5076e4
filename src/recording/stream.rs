use chrono::Local;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::naming::{base_name, Segment};
use crate::capture::{CaptureRequest, ProcessSupervisor};
use crate::platform::{PlatformAdapter, StreamTarget};

/// Capture runs shorter than this are followed by a backoff before restarting
pub const QUICK_EXIT: Duration = Duration::from_secs(10);

/// Supervises the external capture process for one session.
///
/// Every (re)start publishes a fresh [`Segment`] before spawning, which is
/// what makes the chat task rotate its file.
pub struct StreamCapture {
    pub adapter: Arc<dyn PlatformAdapter>,
    pub supervisor: Arc<dyn ProcessSupervisor>,
    pub dir: PathBuf,
    pub segments: Arc<watch::Sender<Option<Segment>>>,
    pub segment_count: Arc<AtomicUsize>,
    pub retry_backoff: Duration,
}

impl StreamCapture {
    pub async fn run(self, stop: CancellationToken) {
        info!("Stream capture started");

        while !stop.is_cancelled() {
            let target = tokio::select! {
                targets = self.adapter.resolve_stream_targets() => targets,
                _ = stop.cancelled() => break,
            };

            let target = match target.map(|targets| targets.into_iter().next()) {
                Ok(Some(target)) => target,
                Ok(None) => {
                    warn!("No stream target available, retrying");
                    if !pause(&stop, self.retry_backoff).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    error!("Failed to resolve stream targets: {}", e);
                    if !pause(&stop, self.retry_backoff).await {
                        break;
                    }
                    continue;
                }
            };

            let request = self.publish_segment(&target);

            let mut process = match self.supervisor.spawn(&request).await {
                Ok(process) => process,
                Err(e) => {
                    error!("Failed to start capture: {}", e);
                    if !pause(&stop, self.retry_backoff).await {
                        break;
                    }
                    continue;
                }
            };

            let spawned_at = Instant::now();
            tokio::select! {
                outcome = process.wait() => {
                    info!("Capture process exited with {:?}, restarting", outcome.code);
                    if spawned_at.elapsed() < QUICK_EXIT && !pause(&stop, self.retry_backoff).await {
                        break;
                    }
                }
                _ = stop.cancelled() => {
                    info!("Stopping capture process {:?}", process.id());
                    process.kill().await;
                    break;
                }
            }
        }

        info!("Stream capture finished");
    }

    fn publish_segment(&self, target: &StreamTarget) -> CaptureRequest {
        let metadata = self.adapter.metadata();
        let name = base_name(
            &Local::now(),
            self.adapter.platform(),
            &metadata.author,
            &metadata.title,
        );
        let segment = Segment::new(self.dir.clone(), name);
        let request = CaptureRequest {
            input_url: target.url.clone(),
            output_path: segment.path(&target.container),
        };

        info!("New segment: {}", segment.base_name);
        self.segments.send_replace(Some(segment));
        self.segment_count.fetch_add(1, Ordering::Relaxed);
        request
    }
}

/// Sleep for `delay` unless `stop` fires first; false when stopped
pub(crate) async fn pause(stop: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = stop.cancelled() => false,
    }
}
