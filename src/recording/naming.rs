use chrono::{DateTime, NaiveDate, TimeZone};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::platform::Platform;

/// Characters that are not allowed in file names on common filesystems
const ILLEGAL_CHARS: &[char] = &['/', '\\', '!', ':', '*', '?', '"', '<', '>', '|'];

/// Replace characters illegal in file names with `_`
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if ILLEGAL_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// `<root>/<platform>/<author>/<YYYY-MM-DD>`
pub fn output_dir(root: &Path, platform: Platform, author: &str, date: NaiveDate) -> PathBuf {
    root.join(platform.display_name())
        .join(sanitize(author))
        .join(date.format("%Y-%m-%d").to_string())
}

/// `[<YYYY-MM-DD HH-MM-SS>][<platform>][<author>] <title>`, sanitized
pub fn base_name<Tz>(time: &DateTime<Tz>, platform: Platform, author: &str, title: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    sanitize(&format!(
        "[{}][{}][{}] {}",
        time.format("%Y-%m-%d %H-%M-%S"),
        platform.display_name(),
        author,
        title
    ))
}

/// One published output identity: the stream task's current capture file
/// stem, shared with the chat task for rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub dir: PathBuf,
    pub base_name: String,
    /// When the stream task published this segment
    pub started_at: Instant,
}

impl Segment {
    pub fn new(dir: impl Into<PathBuf>, base_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            base_name: base_name.into(),
            started_at: Instant::now(),
        }
    }

    /// Path of this segment's file with extension `ext`
    pub fn path(&self, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", self.base_name, ext))
    }

    /// Whether both segments write to the same files
    pub fn same_file(&self, other: &Segment) -> bool {
        self.dir == other.dir && self.base_name == other.base_name
    }
}
