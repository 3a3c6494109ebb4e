// src/deadletter/memory.rs

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::deadletter::{DeadLetterRecord, DeadLetterSink, SinkFuture};

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryDeadLetterSink {
    records: Mutex<Vec<DeadLetterRecord>>,
    count: AtomicU64,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records, oldest first.
    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl DeadLetterSink for MemoryDeadLetterSink {
    fn submit(&self, record: DeadLetterRecord) -> SinkFuture<'_, ()> {
        Box::pin(async move {
            self.records
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(record);
            self.count.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}
