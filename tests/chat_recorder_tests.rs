// Integration tests for the XML chat writer
//
// These tests verify that chat records land in the file of the segment most
// recently published by the stream task, and that every file is closed with
// the footer whether the stream ends or the stop token fires.

mod common;

use anyhow::Result;
use common::{chat, wait_until};
use dd_recorder::chat::ChatMessage;
use dd_recorder::recording::{
    escape_xml, format_record, ChatRecorder, DanmakuFile, Segment, XML_FOOTER, XML_HEADER,
};
use futures::StreamExt;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

fn count_records(xml: &str) -> usize {
    xml.matches("<d p=\"").count()
}

fn assert_closed(xml: &str) {
    assert!(xml.starts_with(XML_HEADER), "missing header: {}", xml);
    assert!(xml.ends_with(XML_FOOTER), "missing footer: {}", xml);
    assert_eq!(xml.matches("<i>").count(), 1);
    assert_eq!(xml.matches("</i>").count(), 1);
}

#[tokio::test]
async fn test_rotation_produces_one_closed_file_per_segment() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let dir = temp_dir.path().to_path_buf();

    let (segments, receiver) = watch::channel(Some(Segment::new(&dir, "[t1][p][a] first")));
    let written = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = futures::channel::mpsc::unbounded::<ChatMessage>();

    let recorder = ChatRecorder::new(receiver, Arc::clone(&written));
    let handle = tokio::spawn(recorder.record(rx.boxed(), CancellationToken::new()));

    tx.unbounded_send(chat("one", 1))?;
    tx.unbounded_send(chat("two", 2))?;
    assert!(wait_until(TIMEOUT, || written.load(Ordering::SeqCst) == 2).await);

    // The stream task restarted its capture process
    segments.send_replace(Some(Segment::new(&dir, "[t2][p][a] second")));
    tx.unbounded_send(chat("three", 3))?;
    drop(tx);

    let files = tokio::time::timeout(TIMEOUT, handle).await???;
    assert_eq!(
        files,
        vec![
            dir.join("[t1][p][a] first.xml"),
            dir.join("[t2][p][a] second.xml"),
        ]
    );

    let first = fs::read_to_string(&files[0])?;
    let second = fs::read_to_string(&files[1])?;
    assert_closed(&first);
    assert_closed(&second);
    assert_eq!(count_records(&first), 2);
    assert_eq!(count_records(&second), 1);
    assert!(first.contains(">one</d>") && first.contains(">two</d>"));
    assert!(second.contains(">three</d>"));
    assert_eq!(written.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn test_stop_closes_current_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (_segments, receiver) = watch::channel(Some(Segment::new(temp_dir.path(), "live")));
    let (tx, rx) = futures::channel::mpsc::unbounded::<ChatMessage>();

    let stop = CancellationToken::new();
    let written = Arc::new(AtomicUsize::new(0));
    let handle = tokio::spawn(ChatRecorder::new(receiver, Arc::clone(&written)).record(rx.boxed(), stop.clone()));

    tx.unbounded_send(chat("only", 10))?;
    assert!(wait_until(TIMEOUT, || written.load(Ordering::SeqCst) == 1).await);

    // The sender stays open: only the stop token ends the recording
    stop.cancel();
    let files = tokio::time::timeout(TIMEOUT, handle).await???;
    assert_eq!(files.len(), 1);

    let xml = fs::read_to_string(&files[0])?;
    assert_closed(&xml);
    assert_eq!(count_records(&xml), 1);
    drop(tx);
    Ok(())
}

#[tokio::test]
async fn test_unopenable_segment_drops_messages_but_keeps_recording() -> Result<()> {
    let temp_dir = TempDir::new()?;

    // A plain file where the first segment's directory should be
    let blocked = temp_dir.path().join("blocked");
    fs::write(&blocked, b"not a directory")?;

    let (segments, receiver) = watch::channel(Some(Segment::new(&blocked, "lost")));
    let written = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = futures::channel::mpsc::unbounded::<ChatMessage>();
    let handle = tokio::spawn(
        ChatRecorder::new(receiver, Arc::clone(&written)).record(rx.boxed(), CancellationToken::new()),
    );

    tx.unbounded_send(chat("nowhere", 1))?;
    tx.unbounded_send(chat("still nowhere", 2))?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished());
    assert_eq!(written.load(Ordering::SeqCst), 0);

    // The next segment is writable again
    let good_dir = temp_dir.path().join("good");
    segments.send_replace(Some(Segment::new(&good_dir, "good")));
    tx.unbounded_send(chat("kept", 3))?;
    assert!(wait_until(TIMEOUT, || written.load(Ordering::SeqCst) == 1).await);
    drop(tx);

    let files = tokio::time::timeout(TIMEOUT, handle).await???;
    assert_eq!(files, vec![good_dir.join("good.xml")]);

    let xml = fs::read_to_string(&files[0])?;
    assert_closed(&xml);
    assert_eq!(count_records(&xml), 1);
    assert!(xml.contains(">kept</d>"));
    Ok(())
}

#[tokio::test]
async fn test_no_messages_no_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (_segments, receiver) = watch::channel(Some(Segment::new(temp_dir.path(), "quiet")));

    let files = ChatRecorder::new(receiver, Arc::new(AtomicUsize::new(0)))
        .record(futures::stream::empty().boxed(), CancellationToken::new())
        .await?;

    assert!(files.is_empty());
    assert_eq!(fs::read_dir(temp_dir.path())?.count(), 0);
    Ok(())
}

#[test]
fn test_record_format_and_escaping() {
    let message = ChatMessage::text("a < b & \"c\" > d", "x", 1_700_000_000_123);
    let record = format_record(Duration::from_millis(12_345), &message);
    assert_eq!(
        record,
        "<d p=\"12.345,1,25,16777215,1700000000123,0,0,0\">a &lt; b &amp; &quot;c&quot; &gt; d</d>\n"
    );
    assert_eq!(escape_xml("plain"), "plain");
}

#[test]
fn test_dropped_file_still_gets_footer() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("nested").join("dropped.xml");

    {
        let mut file = DanmakuFile::create(path.clone())?;
        file.write(Duration::from_secs(1), &ChatMessage::text("hi", "x", 1))?;
        assert_eq!(file.records(), 1);
    }

    let xml = fs::read_to_string(&path)?;
    assert_closed(&xml);
    assert_eq!(count_records(&xml), 1);
    Ok(())
}
