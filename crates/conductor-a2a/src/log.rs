use crate::signal::{Signal, SignalFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_core::{ConductorError, ConductorResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

/// Append-only signal storage.
///
/// `append` assigns a strictly increasing `seq`; appends are serialized, so
/// signals from one sender are stored in the order they were sent.
#[async_trait]
pub trait SignalLog: Send + Sync {
    /// Stores a signal and returns it with its sequence number.
    async fn append(&self, signal: Signal) -> ConductorResult<Signal>;

    /// Up to `limit` signals with `seq > after`, in log order.
    async fn read_after(&self, after: u64, limit: usize) -> ConductorResult<Vec<Signal>>;

    /// Sets the processed marker. Returns `false` for an unknown id.
    async fn mark_processed(&self, id: Uuid) -> ConductorResult<bool>;

    /// Looks up one signal.
    async fn get(&self, id: Uuid) -> ConductorResult<Option<Signal>>;

    /// Signals matching `filter`, in log order.
    async fn query(&self, filter: &SignalFilter) -> ConductorResult<Vec<Signal>>;
}

fn read_window(signals: &[Signal], after: u64, limit: usize) -> Vec<Signal> {
    // seq is 1-based and dense, so it doubles as an index.
    let start = usize::try_from(after).unwrap_or(usize::MAX).min(signals.len());
    signals[start..].iter().take(limit).cloned().collect()
}

fn set_processed(signals: &mut [Signal], id: Uuid) -> bool {
    match signals.iter_mut().find(|s| s.id == id) {
        Some(signal) => {
            signal.processed = true;
            true
        }
        None => false,
    }
}

// ---------------------------------------------------------------------------
// MemorySignalLog
// ---------------------------------------------------------------------------

/// Process-local log, used in mock mode and tests.
#[derive(Default)]
pub struct MemorySignalLog {
    signals: Mutex<Vec<Signal>>,
}

impl MemorySignalLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalLog for MemorySignalLog {
    async fn append(&self, mut signal: Signal) -> ConductorResult<Signal> {
        let mut signals = self.signals.lock();
        signal.seq = signals.len() as u64 + 1;
        signals.push(signal.clone());
        Ok(signal)
    }

    async fn read_after(&self, after: u64, limit: usize) -> ConductorResult<Vec<Signal>> {
        Ok(read_window(&self.signals.lock(), after, limit))
    }

    async fn mark_processed(&self, id: Uuid) -> ConductorResult<bool> {
        Ok(set_processed(&mut self.signals.lock(), id))
    }

    async fn get(&self, id: Uuid) -> ConductorResult<Option<Signal>> {
        Ok(self.signals.lock().iter().find(|s| s.id == id).cloned())
    }

    async fn query(&self, filter: &SignalFilter) -> ConductorResult<Vec<Signal>> {
        Ok(filter.apply(self.signals.lock().iter()))
    }
}

// ---------------------------------------------------------------------------
// FileSignalLog
// ---------------------------------------------------------------------------

/// One line of the JSONL file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum LogRecord {
    Signal(Signal),
    Processed { id: Uuid, at: DateTime<Utc> },
}

/// Durable log backed by a JSONL file.
///
/// Every signal is one line; processed markers are appended as separate
/// lines and folded in when the file is loaded. An in-memory index mirrors
/// the file for reads.
pub struct FileSignalLog {
    path: PathBuf,
    signals: tokio::sync::Mutex<Vec<Signal>>,
}

impl FileSignalLog {
    /// Opens the log at `path`, creating parent directories and replaying
    /// existing records.
    pub async fn open(path: impl AsRef<Path>) -> ConductorResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut signals: Vec<Signal> = Vec::new();
        if tokio::fs::try_exists(&path).await? {
            let data = tokio::fs::read_to_string(&path).await?;
            for (lineno, line) in data.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogRecord>(line) {
                    Ok(LogRecord::Signal(mut signal)) => {
                        signal.seq = signals.len() as u64 + 1;
                        signals.push(signal);
                    }
                    Ok(LogRecord::Processed { id, .. }) => {
                        set_processed(&mut signals, id);
                    }
                    Err(e) => warn!(
                        path = %path.display(),
                        line = lineno + 1,
                        error = %e,
                        "Skipping unreadable signal log line"
                    ),
                }
            }
        }

        Ok(Self {
            path,
            signals: tokio::sync::Mutex::new(signals),
        })
    }

    /// Location of the JSONL file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_record(&self, record: &LogRecord) -> ConductorResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| ConductorError::Store(format!("cannot open signal log: {e}")))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl SignalLog for FileSignalLog {
    async fn append(&self, mut signal: Signal) -> ConductorResult<Signal> {
        // Held across the write: file order and seq order must agree.
        let mut signals = self.signals.lock().await;
        signal.seq = signals.len() as u64 + 1;
        signal.processed = false;
        self.write_record(&LogRecord::Signal(signal.clone())).await?;
        signals.push(signal.clone());
        Ok(signal)
    }

    async fn read_after(&self, after: u64, limit: usize) -> ConductorResult<Vec<Signal>> {
        Ok(read_window(&self.signals.lock().await, after, limit))
    }

    async fn mark_processed(&self, id: Uuid) -> ConductorResult<bool> {
        let mut signals = self.signals.lock().await;
        match signals.iter().find(|s| s.id == id) {
            None => return Ok(false),
            Some(s) if s.processed => return Ok(true),
            Some(_) => {}
        }
        self.write_record(&LogRecord::Processed { id, at: Utc::now() })
            .await?;
        Ok(set_processed(&mut signals, id))
    }

    async fn get(&self, id: Uuid) -> ConductorResult<Option<Signal>> {
        Ok(self.signals.lock().await.iter().find(|s| s.id == id).cloned())
    }

    async fn query(&self, filter: &SignalFilter) -> ConductorResult<Vec<Signal>> {
        Ok(filter.apply(self.signals.lock().await.iter()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn signal(n: u32) -> Signal {
        Signal::new("tick", "clock", None, serde_json::json!({ "n": n }))
    }

    #[tokio::test]
    async fn test_memory_log_sequencing() {
        let log = MemorySignalLog::new();
        for n in 0..5 {
            let stored = log.append(signal(n)).await.unwrap();
            assert_eq!(stored.seq, u64::from(n) + 1);
        }
        let window = log.read_after(2, 2).await.unwrap();
        assert_eq!(window.iter().map(|s| s.seq).collect::<Vec<_>>(), vec![3, 4]);
        assert!(log.read_after(5, 10).await.unwrap().is_empty());
        assert!(log.read_after(99, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_log_processed() {
        let log = MemorySignalLog::new();
        let stored = log.append(signal(1)).await.unwrap();
        assert!(log.mark_processed(stored.id).await.unwrap());
        assert!(!log.mark_processed(Uuid::new_v4()).await.unwrap());
        assert!(log.get(stored.id).await.unwrap().unwrap().processed);

        let unprocessed = SignalFilter {
            processed: Some(false),
            ..SignalFilter::default()
        };
        assert!(log.query(&unprocessed).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_log_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("signals/bus.jsonl");

        let first_id = {
            let log = FileSignalLog::open(&path).await.unwrap();
            let first = log.append(signal(1)).await.unwrap();
            log.append(signal(2)).await.unwrap();
            log.mark_processed(first.id).await.unwrap();
            first.id
        };

        let reopened = FileSignalLog::open(&path).await.unwrap();
        let all = reopened.read_after(0, 100).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, first_id);
        assert!(all[0].processed);
        assert!(!all[1].processed);
        assert_eq!(all[1].payload["n"], 2);

        let next = reopened.append(signal(3)).await.unwrap();
        assert_eq!(next.seq, 3);
    }

    #[tokio::test]
    async fn test_file_log_is_append_only() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bus.jsonl");
        let log = FileSignalLog::open(&path).await.unwrap();
        let stored = log.append(signal(1)).await.unwrap();
        log.mark_processed(stored.id).await.unwrap();
        log.mark_processed(stored.id).await.unwrap();

        let data = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = data.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"record\":\"signal\""));
        assert!(lines[1].contains("\"record\":\"processed\""));
    }

    #[tokio::test]
    async fn test_file_log_skips_garbage_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bus.jsonl");
        let log = FileSignalLog::open(&path).await.unwrap();
        log.append(signal(1)).await.unwrap();
        let mut data = tokio::fs::read_to_string(&path).await.unwrap();
        data.push_str("{truncated\n");
        tokio::fs::write(&path, data).await.unwrap();

        let reopened = FileSignalLog::open(&path).await.unwrap();
        assert_eq!(reopened.read_after(0, 10).await.unwrap().len(), 1);
    }
}
