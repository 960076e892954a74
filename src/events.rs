//! Event sinks consumed by the build and test coordinators.
//!
//! Worker threads push into these from many threads at once; a single consumer
//! (the UI poll loop) drains them. Both the append and the drain-and-clear are
//! done under the same mutex.

use std::sync::{Mutex, PoisonError};

/// Receives free-text build log lines tagged with the emitting task id.
pub trait BuildEvents: Send + Sync {
    fn message(&self, id: u64, text: &str);
}

/// Receives structured status transitions for unit tests.
pub trait TestEvents: Send + Sync {
    fn test_running(&self, index: usize);
    fn test_passed(&self, index: usize);
    fn test_failed(&self, index: usize, description: &str);
}

/// Log queue rendering each message as `"<id>> <text>"`.
#[derive(Debug, Default)]
pub struct MessageQueue {
    lines: Mutex<Vec<String>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every queued line, leaving the queue empty.
    pub fn drain(&self) -> Vec<String> {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *lines)
    }
}

impl BuildEvents for MessageQueue {
    fn message(&self, id: u64, text: &str) {
        let line = format!("{}> {}", id, text.trim_end());
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Pending,
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestUpdate {
    pub index: usize,
    pub status: TestStatus,
    pub description: String,
}

/// Thread-safe queue of [`TestUpdate`] records.
#[derive(Debug, Default)]
pub struct TestUpdateQueue {
    updates: Mutex<Vec<TestUpdate>>,
}

impl TestUpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<TestUpdate> {
        let mut updates = self.updates.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *updates)
    }

    fn push(&self, index: usize, status: TestStatus, description: &str) {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TestUpdate {
                index,
                status,
                description: description.to_string(),
            });
    }
}

impl TestEvents for TestUpdateQueue {
    fn test_running(&self, index: usize) {
        self.push(index, TestStatus::Running, "");
    }

    fn test_passed(&self, index: usize) {
        self.push(index, TestStatus::Success, "");
    }

    fn test_failed(&self, index: usize, description: &str) {
        self.push(index, TestStatus::Failed, description);
    }
}
