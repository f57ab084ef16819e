//! Bounded message queue for host queues.
//!
//! Provides FIFO ordering with explicit depth and item-size limits.

use crate::clock::SimClock;
use crate::lock;
use crate::sync::block_on;
use kernel_api::{HostQueue, KernelError, Wait};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Queue error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    Full,
    TooLarge { size: usize, max: usize },
}

impl From<QueueError> for KernelError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Full => KernelError::Full,
            QueueError::TooLarge { size, max } => KernelError::MessageTooLarge { size, max },
        }
    }
}

/// Bounded FIFO of byte messages.
#[derive(Debug, Clone)]
pub struct MessageQueue {
    capacity: usize,
    item_size: usize,
    messages: VecDeque<Vec<u8>>,
}

impl MessageQueue {
    /// Creates a queue holding at most `capacity` messages of `item_size` bytes.
    pub fn with_capacity(capacity: usize, item_size: usize) -> Self {
        Self {
            capacity,
            item_size,
            messages: VecDeque::with_capacity(capacity),
        }
    }

    /// Returns the configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the maximum message size.
    pub fn item_size(&self) -> usize {
        self.item_size
    }

    /// Returns the number of queued messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns remaining capacity.
    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.messages.len())
    }

    /// Pushes a copy of `message` onto the queue.
    pub fn push(&mut self, message: &[u8]) -> Result<(), QueueError> {
        if message.len() > self.item_size {
            return Err(QueueError::TooLarge {
                size: message.len(),
                max: self.item_size,
            });
        }
        if self.messages.len() >= self.capacity {
            return Err(QueueError::Full);
        }
        self.messages.push_back(message.to_vec());
        Ok(())
    }

    /// Pops the next message.
    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.messages.pop_front()
    }
}

#[derive(Debug)]
struct QueueState {
    queue: MessageQueue,
    destroyed: bool,
}

/// [`MessageQueue`] shared between tasks with blocking receive
#[derive(Debug)]
pub struct SimQueue {
    clock: SimClock,
    state: Mutex<QueueState>,
    not_empty: Condvar,
}

impl SimQueue {
    pub fn new(clock: SimClock, depth: usize, item_size: usize) -> Self {
        Self {
            clock,
            state: Mutex::new(QueueState {
                queue: MessageQueue::with_capacity(depth, item_size),
                destroyed: false,
            }),
            not_empty: Condvar::new(),
        }
    }
}

impl HostQueue for SimQueue {
    fn send(&self, message: &[u8]) -> Result<(), KernelError> {
        let mut state = lock(&self.state);
        if state.destroyed {
            return Err(KernelError::Destroyed);
        }
        state.queue.push(message)?;
        self.not_empty.notify_one();
        Ok(())
    }

    fn receive(&self, wait: Wait) -> Result<Vec<u8>, KernelError> {
        let state = lock(&self.state);
        let result = block_on(state, &self.not_empty, self.clock.deadline(wait), |s| {
            if s.destroyed {
                Some(Err(KernelError::Destroyed))
            } else {
                s.queue.pop().map(Ok)
            }
        });
        match result {
            Err(KernelError::WouldBlock) => Err(KernelError::Empty),
            other => other,
        }
    }

    fn len(&self) -> usize {
        lock(&self.state).queue.len()
    }

    fn destroy(&self) {
        lock(&self.state).destroyed = true;
        self.not_empty.notify_all();
    }
}
