// src/task/queue.rs

//! Priority queue of pending tasks.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use tracing::debug;

use crate::errors::{Result, RunpoolError};

/// Queue entry: the ordering key of a pending task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub priority: Option<i64>,
    pub uid: u64,
}

impl QueueEntry {
    /// `(has no priority, priority, uid)`: explicit priorities first, lower
    /// values first, ties broken by uid.
    fn key(&self) -> (bool, i64, u64) {
        (self.priority.is_none(), self.priority.unwrap_or(0), self.uid)
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap over [`QueueEntry`] that never holds a uid twice.
#[derive(Debug, Default)]
pub struct TaskQueue {
    heap: BinaryHeap<Reverse<QueueEntry>>,
    queued: HashSet<u64>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, uid: u64) -> bool {
        self.queued.contains(&uid)
    }

    pub fn enqueue(&mut self, priority: Option<i64>, uid: u64) -> Result<()> {
        if !self.queued.insert(uid) {
            return Err(RunpoolError::DuplicateUid(uid));
        }
        self.heap.push(Reverse(QueueEntry { priority, uid }));
        debug!(uid, ?priority, queued = self.heap.len(), "enqueued task");
        Ok(())
    }

    /// Remove and return the entry with the lowest `(priority, uid)`.
    ///
    /// Fails with [`RunpoolError::QueueEmpty`] if nothing is pending.
    pub fn dequeue_highest_priority(&mut self) -> Result<QueueEntry> {
        let Reverse(entry) = self.heap.pop().ok_or(RunpoolError::QueueEmpty)?;
        self.queued.remove(&entry.uid);
        Ok(entry)
    }

    /// Peek at the next entry without removing it.
    pub fn peek(&self) -> Option<QueueEntry> {
        self.heap.peek().map(|Reverse(entry)| *entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(queue: &mut TaskQueue) -> Vec<u64> {
        let mut out = Vec::new();
        while let Ok(entry) = queue.dequeue_highest_priority() {
            out.push(entry.uid);
        }
        out
    }

    #[test]
    fn lower_priority_values_are_served_first() {
        let mut q = TaskQueue::new();
        q.enqueue(Some(5), 0).unwrap();
        q.enqueue(Some(-1), 1).unwrap();
        q.enqueue(Some(2), 2).unwrap();
        assert_eq!(drain(&mut q), vec![1, 2, 0]);
    }

    #[test]
    fn unset_priority_sorts_after_explicit_ones() {
        let mut q = TaskQueue::new();
        q.enqueue(None, 0).unwrap();
        q.enqueue(Some(100), 5).unwrap();
        q.enqueue(None, 1).unwrap();
        assert_eq!(q.peek().map(|e| e.uid), Some(5));
        assert_eq!(drain(&mut q), vec![5, 0, 1]);
    }

    #[test]
    fn equal_priorities_dequeue_in_uid_order() {
        let mut q = TaskQueue::new();
        for uid in [7, 3, 9, 1] {
            q.enqueue(Some(1), uid).unwrap();
        }
        assert_eq!(drain(&mut q), vec![1, 3, 7, 9]);
    }

    #[test]
    fn rejects_duplicates_and_reports_empty() {
        let mut q = TaskQueue::new();
        q.enqueue(None, 4).unwrap();
        assert!(matches!(q.enqueue(Some(0), 4), Err(RunpoolError::DuplicateUid(4))));
        assert_eq!(q.len(), 1);

        q.dequeue_highest_priority().unwrap();
        assert!(!q.contains(4));
        assert!(matches!(
            q.dequeue_highest_priority(),
            Err(RunpoolError::QueueEmpty)
        ));
    }
}
