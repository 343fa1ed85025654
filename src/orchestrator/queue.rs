//! Task Queue - pending tasks ordered by priority, then arrival

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Ordering key: higher priority first, then lower sequence (FIFO)
type QueueKey = (Reverse<u32>, u64);

/// Pending task ids. Entries can be removed from the middle (cancellation)
/// and scanned in order without popping.
#[derive(Debug, Default)]
pub struct TaskQueue {
    entries: BTreeMap<QueueKey, String>,
    index: HashMap<String, QueueKey>,
    sequence_counter: u64,
    enqueued_count: u64,
    dequeued_count: u64,
    requeued_count: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task. Returns `false` if it is already queued.
    pub fn push(&mut self, task_id: &str, priority: u32) -> bool {
        if self.index.contains_key(task_id) {
            return false;
        }
        let key = (Reverse(priority), self.sequence_counter);
        self.sequence_counter += 1;
        debug!(task_id, priority, sequence = key.1, "task queued");
        self.entries.insert(key, task_id.to_string());
        self.index.insert(task_id.to_string(), key);
        self.enqueued_count += 1;
        true
    }

    /// Re-add a task after a failure or reclamation; it queues behind its peers
    pub fn requeue(&mut self, task_id: &str, priority: u32) -> bool {
        let pushed = self.push(task_id, priority);
        if pushed {
            self.requeued_count += 1;
        }
        pushed
    }

    /// Remove a task taken by assignment
    pub fn take(&mut self, task_id: &str) -> bool {
        let removed = self.remove(task_id);
        if removed {
            self.dequeued_count += 1;
        }
        removed
    }

    /// Remove a task without counting it as dequeued (cancellation)
    pub fn remove(&mut self, task_id: &str) -> bool {
        match self.index.remove(task_id) {
            Some(key) => {
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.index.contains_key(task_id)
    }

    /// Task ids in assignment order
    pub fn ordered(&self) -> Vec<String> {
        self.entries.values().cloned().collect()
    }

    pub fn peek(&self) -> Option<&str> {
        self.entries.values().next().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            current_size: self.entries.len(),
            enqueued_total: self.enqueued_count,
            dequeued_total: self.dequeued_count,
            requeued_total: self.requeued_count,
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub current_size: usize,
    pub enqueued_total: u64,
    pub dequeued_total: u64,
    pub requeued_total: u64,
}

impl std::fmt::Display for QueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Queue[{}, enq={}, deq={}, req={}]",
            self.current_size, self.enqueued_total, self.dequeued_total, self.requeued_total
        )
    }
}
