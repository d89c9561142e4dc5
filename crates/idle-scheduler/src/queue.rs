//! Priority-ordered task queue: ascending priority, FIFO within a priority.

use idle_types::Task;
use std::collections::VecDeque;

struct Entry {
    seq: u64,
    task: Task,
}

impl Entry {
    fn key(&self) -> (i32, u64) {
        (self.task.priority, self.seq)
    }
}

/// Ordered container the scheduler owns. The head is always the next task to run.
#[derive(Default)]
pub struct TaskQueue {
    entries: VecDeque<Entry>,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert behind every task with the same or a smaller priority.
    pub fn push(&mut self, task: Task) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.insert(Entry { seq, task });
    }

    fn insert(&mut self, entry: Entry) {
        let key = entry.key();
        let at = self.entries.partition_point(|e| e.key() < key);
        self.entries.insert(at, entry);
    }

    pub fn peek(&self) -> Option<&Task> {
        self.entries.front().map(|e| &e.task)
    }

    pub fn pop(&mut self) -> Option<Task> {
        self.entries.pop_front().map(|e| e.task)
    }

    /// Remove a queued task by id.
    pub fn remove(&mut self, id: &str) -> Option<Task> {
        let idx = self.entries.iter().position(|e| e.task.id == id)?;
        self.entries.remove(idx).map(|e| e.task)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.task.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Ids in execution order.
    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.task.id.clone()).collect()
    }
}
