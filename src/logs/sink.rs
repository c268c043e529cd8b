//! Shared log sink
//!
//! Lock-free multi-producer queue. Producers `append`, the drain loop
//! `poll_next`s in arrival order.

use super::entry::LogEntry;
use crossbeam::queue::SegQueue;

#[derive(Debug, Default)]
pub struct LogSink {
    queue: SegQueue<LogEntry>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, entry: LogEntry) {
        self.queue.push(entry);
    }

    /// Next queued entry, without blocking
    pub fn poll_next(&self) -> Option<LogEntry> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
