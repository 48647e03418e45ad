//! JSONL capture of item updates.
//!
//! Each merged item is written as one line by a background thread, so the
//! processor never blocks on file I/O.

use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::hooks::{ItemObserver, ObserverError};
use crate::model::{ItemStatus, WorkItem};

#[derive(Debug, Clone, Serialize)]
pub struct ItemUpdateTrace {
    pub timestamp_ms: i64,
    pub sequence: u64,
    pub item_id: String,
    pub status: ItemStatus,
    /// Profile ids with a suggestion, sorted.
    pub suggestion_profiles: Vec<String>,
    /// blake3 of the item content, for joining traces without copying payloads.
    pub content_hash: String,
    pub item: WorkItem,
}

impl ItemUpdateTrace {
    pub fn from_item(sequence: u64, item: &WorkItem) -> Self {
        let mut suggestion_profiles: Vec<String> = item.ai_suggestions.keys().cloned().collect();
        suggestion_profiles.sort();
        Self {
            timestamp_ms: now_epoch_ms(),
            sequence,
            item_id: item.id.clone(),
            status: item.status,
            suggestion_profiles,
            content_hash: blake3::hash(item.content.as_bytes()).to_hex().to_string(),
            item: item.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("trace channel closed")]
    Closed,
    #[error("trace worker failed: {0}")]
    Join(String),
}

/// Sends item updates to a JSONL file.
pub struct JsonlUpdateSink {
    sender: mpsc::Sender<ItemUpdateTrace>,
    sequence: std::sync::atomic::AtomicU64,
}

pub struct TraceWorker {
    handle: Option<std::thread::JoinHandle<Result<(), TraceError>>>,
}

impl TraceWorker {
    /// Wait for the writer to drain. Drop every sink first or this blocks.
    pub fn join(mut self) -> Result<(), TraceError> {
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(TraceError::Join("trace worker panicked".to_string())),
            },
            None => Ok(()),
        }
    }
}

impl JsonlUpdateSink {
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, TraceWorker), TraceError> {
        let file = std::fs::File::create(path)?;
        let (sender, receiver) = mpsc::channel::<ItemUpdateTrace>();
        let handle = std::thread::spawn(move || write_trace_loop(file, receiver));
        Ok((
            Self {
                sender,
                sequence: std::sync::atomic::AtomicU64::new(0),
            },
            TraceWorker {
                handle: Some(handle),
            },
        ))
    }

    pub fn record(&self, item: &WorkItem) -> Result<(), TraceError> {
        let sequence = self
            .sequence
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.sender
            .send(ItemUpdateTrace::from_item(sequence, item))
            .map_err(|_| TraceError::Closed)
    }
}

#[async_trait::async_trait]
impl ItemObserver for JsonlUpdateSink {
    async fn on_item_updated(&self, item: &WorkItem) -> Result<(), ObserverError> {
        self.record(item)
            .map_err(|e| ObserverError::Message(e.to_string()))
    }
}

fn write_trace_loop(
    file: std::fs::File,
    receiver: mpsc::Receiver<ItemUpdateTrace>,
) -> Result<(), TraceError> {
    let mut writer = BufWriter::new(file);
    for event in receiver {
        let line = serde_json::to_string(&event).map_err(|e| TraceError::Serde(e.to_string()))?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
