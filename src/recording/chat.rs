use futures::StreamExt;
use std::borrow::Cow;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::naming::Segment;
use crate::chat::{ChatMessage, ChatStream};
use crate::error::RecorderResult;

/// Opening of every chat transcript
pub const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?><i><chatserver>chat.bilibili.com</chatserver><chatid>0</chatid><mission>0</mission><maxlimit>0</maxlimit><source>k-v</source>\n";

/// Closing of every chat transcript
pub const XML_FOOTER: &str = "</i>";

/// Escape the characters that would break a `<d>` element
pub fn escape_xml(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"']) {
        return Cow::Borrowed(text);
    }

    let mut escaped = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// One `<d>` record: elapsed seconds into the segment, then the platform
/// timestamp
pub fn format_record(elapsed: Duration, message: &ChatMessage) -> String {
    format!(
        "<d p=\"{:.3},1,25,16777215,{},0,0,0\">{}</d>\n",
        elapsed.as_secs_f64(),
        message.timestamp_ms,
        escape_xml(&message.text)
    )
}

/// A chat transcript file that always ends with the footer
pub struct DanmakuFile {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    records: usize,
}

impl DanmakuFile {
    /// Open `path` for appending and write the header
    pub fn create(path: PathBuf) -> RecorderResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(XML_HEADER.as_bytes())?;

        debug!("Chat file opened: {}", path.display());

        Ok(Self {
            writer: Some(writer),
            path,
            records: 0,
        })
    }

    pub fn write(&mut self, elapsed: Duration, message: &ChatMessage) -> RecorderResult<()> {
        if let Some(writer) = &mut self.writer {
            writer.write_all(format_record(elapsed, message).as_bytes())?;
            self.records += 1;
        }
        Ok(())
    }

    pub fn records(&self) -> usize {
        self.records
    }

    /// Write the footer and close the file
    pub fn finish(mut self) -> RecorderResult<PathBuf> {
        if let Some(writer) = self.writer.take() {
            close(writer)?;
        }
        Ok(self.path.clone())
    }
}

fn close(mut writer: BufWriter<File>) -> std::io::Result<()> {
    writer.write_all(XML_FOOTER.as_bytes())?;
    writer.flush()
}

impl Drop for DanmakuFile {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = close(writer) {
                warn!("Failed to finalize chat file {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Writes a chat stream into the file matching the session's current segment,
/// rotating whenever the stream task publishes a new one.
///
/// A file that cannot be opened costs only the messages that arrive while it
/// is unavailable; the open is retried with the next message.
pub struct ChatRecorder {
    segments: watch::Receiver<Option<Segment>>,
    written: Arc<AtomicUsize>,
    current: Option<(Segment, DanmakuFile)>,
    closed: Vec<PathBuf>,
}

impl ChatRecorder {
    pub fn new(segments: watch::Receiver<Option<Segment>>, written: Arc<AtomicUsize>) -> Self {
        Self {
            segments,
            written,
            current: None,
            closed: Vec::new(),
        }
    }

    /// Consume `messages` until the sequence ends or `stop` fires.
    ///
    /// Returns the finished chat files in creation order.
    pub async fn record(
        mut self,
        mut messages: ChatStream,
        stop: CancellationToken,
    ) -> RecorderResult<Vec<PathBuf>> {
        loop {
            let message = tokio::select! {
                message = messages.next() => message,
                _ = stop.cancelled() => None,
            };

            let Some(message) = message else {
                break;
            };

            let segment = self.segments.borrow().clone();
            let Some(segment) = segment else {
                debug!("Dropping chat message received before any segment");
                continue;
            };

            if let Err(e) = self.rotate_to(&segment).await {
                warn!(
                    "Failed to open chat file for {}, dropping message: {}",
                    segment.base_name, e
                );
                continue;
            }

            if let Some((current, file)) = &mut self.current {
                match file.write(current.started_at.elapsed(), &message) {
                    Ok(()) => {
                        self.written.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => warn!("Failed to write chat record, dropping message: {}", e),
                }
            }
        }

        self.close_current().await;
        info!("Chat recording finished: {} files", self.closed.len());
        Ok(self.closed)
    }

    async fn rotate_to(&mut self, segment: &Segment) -> RecorderResult<()> {
        if let Some((current, _)) = &self.current {
            if current.same_file(segment) {
                return Ok(());
            }
        }

        self.close_current().await;
        let path = segment.path("xml");
        let file = tokio::task::spawn_blocking(move || DanmakuFile::create(path)).await??;
        info!("Chat rotated to {}", segment.base_name);
        self.current = Some((segment.clone(), file));
        Ok(())
    }

    async fn close_current(&mut self) {
        let Some((segment, file)) = self.current.take() else {
            return;
        };

        let records = file.records();
        match tokio::task::spawn_blocking(move || file.finish()).await {
            Ok(Ok(path)) => {
                debug!("Chat file closed with {} records: {}", records, path.display());
                self.closed.push(path);
            }
            Ok(Err(e)) => warn!("Failed to close chat file {}: {}", segment.base_name, e),
            Err(e) => warn!("Chat file close task failed for {}: {}", segment.base_name, e),
        }
    }
}
