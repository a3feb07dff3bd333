//! Bounded two-class task queue shared by the worker pool.

use std::collections::VecDeque;
use std::pin::pin;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::task::{BuildPriority, BuildTask};
use crate::error::{PipelineError, Result};

#[derive(Debug, Default)]
struct QueueState {
    elevated: VecDeque<BuildTask>,
    normal: VecDeque<BuildTask>,
    closed: bool,
}

impl QueueState {
    fn len(&self) -> usize {
        self.elevated.len() + self.normal.len()
    }

    fn push(&mut self, task: BuildTask) {
        match task.priority {
            BuildPriority::Elevated => self.elevated.push_back(task),
            BuildPriority::Normal => self.normal.push_back(task),
        }
    }

    fn pop(&mut self) -> Option<BuildTask> {
        self.elevated.pop_front().or_else(|| self.normal.pop_front())
    }
}

/// FIFO per priority class; elevated tasks are dequeued before normal ones.
/// Capacity counts both classes together.
#[derive(Debug)]
pub(crate) struct TaskQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    available: Notify,
    space: Notify,
}

impl TaskQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity: capacity.max(1),
            available: Notify::new(),
            space: Notify::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().len()
    }

    /// Enqueue without waiting.
    pub(crate) fn try_push(&self, task: BuildTask) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PipelineError::Stopped);
            }
            if state.len() >= self.capacity {
                return Err(PipelineError::QueueFull {
                    capacity: self.capacity,
                });
            }
            state.push(task);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Enqueue, waiting for a free slot while the queue is full.
    pub(crate) async fn push_wait(&self, task: BuildTask) -> Result<()> {
        loop {
            let mut space = pin!(self.space.notified());
            space.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(PipelineError::Stopped);
                }
                if state.len() < self.capacity {
                    state.push(task);
                    drop(state);
                    self.available.notify_one();
                    return Ok(());
                }
            }

            space.await;
        }
    }

    /// Wait for the next task. Returns `None` once `token` is cancelled or
    /// the queue is closed; tasks still queued at that point are abandoned.
    pub(crate) async fn pop(&self, token: &CancellationToken) -> Option<BuildTask> {
        loop {
            if token.is_cancelled() {
                return None;
            }

            let mut available = pin!(self.available.notified());
            available.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(task) = state.pop() {
                    let more = state.len() > 0;
                    drop(state);
                    self.space.notify_one();
                    if more {
                        // Pass the wakeup on so idle workers pick up the backlog.
                        self.available.notify_one();
                    }
                    return Some(task);
                }
                if state.closed {
                    return None;
                }
            }

            tokio::select! {
                _ = token.cancelled() => return None,
                _ = available => {}
            }
        }
    }

    /// Refuse further pushes, wake every waiter and return how many queued
    /// tasks were abandoned.
    pub(crate) fn close(&self) -> usize {
        let abandoned = {
            let mut state = self.state.lock();
            state.closed = true;
            let abandoned = state.len();
            state.elevated.clear();
            state.normal.clear();
            abandoned
        };
        self.available.notify_waiters();
        self.space.notify_waiters();
        abandoned
    }
}
