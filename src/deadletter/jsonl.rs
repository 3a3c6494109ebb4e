// src/deadletter/jsonl.rs

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::deadletter::{DeadLetterError, DeadLetterRecord, DeadLetterSink, SinkFuture};

/// Appends one JSON object per line to a file.
///
/// A record counts as accepted once its line is written and synced.
#[derive(Debug)]
pub struct JsonlDeadLetterSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
    count: AtomicU64,
}

impl JsonlDeadLetterSink {
    /// Prepare a sink writing to `path`; parent directories are created.
    ///
    /// The file itself is opened lazily on the first submission, so the
    /// constructor works outside a runtime.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DeadLetterError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        debug!(path = %path.display(), "dead-letter file sink ready");

        Ok(Self {
            path,
            file: Mutex::new(None),
            count: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeadLetterSink for JsonlDeadLetterSink {
    fn submit(&self, record: DeadLetterRecord) -> SinkFuture<'_, ()> {
        Box::pin(async move {
            let mut line = serde_json::to_vec(&record)?;
            line.push(b'\n');

            let mut guard = self.file.lock().await;
            if guard.is_none() {
                let file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .await?;
                *guard = Some(file);
            }

            if let Some(file) = guard.as_mut() {
                if let Err(e) = write_line(file, &line).await {
                    // Reopen on the next attempt rather than reuse a broken handle.
                    *guard = None;
                    return Err(e.into());
                }
            }

            self.count.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

async fn write_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await?;
    file.sync_data().await
}
