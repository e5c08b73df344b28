//! Ready-task scheduling policies.
//!
//! The graph hands every task that becomes ready to its scheduler and asks
//! it for the next task to run. The scheduler is free to hold tasks back or
//! reorder them; the graph runs whatever `pop` returns.

use crate::graph::TaskId;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

pub trait Scheduler {
    fn push(&mut self, ready: &[TaskId]);

    fn pop(&mut self) -> Option<TaskId>;

    /// No task is held locally
    fn is_empty(&self) -> bool;

    /// No task is held anywhere in this policy's scope. Policies that only
    /// see local work answer for this location; the fence combines the
    /// answers of all locations.
    fn global_empty(&self) -> bool {
        self.is_empty()
    }

    fn len(&self) -> usize;
}

/// Runs tasks in the order they became ready
#[derive(Debug, Default)]
pub struct FifoScheduler {
    queue: VecDeque<TaskId>,
}

impl FifoScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for FifoScheduler {
    fn push(&mut self, ready: &[TaskId]) {
        self.queue.extend(ready.iter().copied());
    }

    fn pop(&mut self) -> Option<TaskId> {
        self.queue.pop_front()
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Runs the most recently readied task first (depth-first traversal)
#[derive(Debug, Default)]
pub struct LifoScheduler {
    stack: Vec<TaskId>,
}

impl LifoScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for LifoScheduler {
    fn push(&mut self, ready: &[TaskId]) {
        self.stack.extend(ready.iter().copied());
    }

    fn pop(&mut self) -> Option<TaskId> {
        self.stack.pop()
    }

    fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    fn len(&self) -> usize {
        self.stack.len()
    }
}

/// Runs the ready task with the highest priority; ties run in ready order
pub struct PriorityScheduler {
    priority: Box<dyn Fn(TaskId) -> i64>,
    heap: BinaryHeap<(i64, Reverse<u64>, TaskId)>,
    pushed: u64,
}

impl PriorityScheduler {
    pub fn new(priority: impl Fn(TaskId) -> i64 + 'static) -> Self {
        Self {
            priority: Box::new(priority),
            heap: BinaryHeap::new(),
            pushed: 0,
        }
    }
}

impl Scheduler for PriorityScheduler {
    fn push(&mut self, ready: &[TaskId]) {
        for task in ready {
            let priority = (self.priority)(*task);
            self.heap.push((priority, Reverse(self.pushed), *task));
            self.pushed += 1;
        }
    }

    fn pop(&mut self) -> Option<TaskId> {
        self.heap.pop().map(|(_, _, task)| task)
    }

    fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}
