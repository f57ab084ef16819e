//! Host kernel trait and primitive handles
//!
//! The abstraction layer never talks to threads, locks or timers directly.
//! It asks a [`HostKernel`] for primitives and drives them through the
//! narrow traits below, so the same layer runs over a real RTOS binding or
//! over the simulated kernel used in tests.

use crate::net::HostNetStack;
use crate::KernelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// How long a host primitive may block, in host ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Wait {
    /// Block until the operation completes
    Forever,
    /// Don't block
    Poll,
    /// Block for at most this many ticks
    Ticks(u64),
}

/// Host-side identity of a spawned task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostTaskId(pub u64);

impl fmt::Display for HostTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host-task-{}", self.0)
    }
}

/// Descriptor for creating a new host task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Host-visible name (already truncated to the host's limit)
    pub name: String,
    /// Requested stack size in bytes
    pub stack_size: usize,
    /// Host priority (larger is more urgent)
    pub priority: u8,
}

impl TaskDescriptor {
    /// Default stack size when the caller doesn't care
    pub const DEFAULT_STACK_SIZE: usize = 16 * 1024;

    /// Creates a new task descriptor
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stack_size: Self::DEFAULT_STACK_SIZE,
            priority: 0,
        }
    }

    /// Sets the stack size
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Sets the host priority
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// Task body handed to the host
pub type TaskEntry = Box<dyn FnOnce() + Send + 'static>;

/// Callback run by the host when a one-shot timer expires
///
/// The expiring timer is passed in so the callback can re-arm it.
pub type TimerCallback = Arc<dyn Fn(&dyn HostTimer) + Send + Sync + 'static>;

/// Binary or counting semaphore
pub trait HostSemaphore: Send + Sync {
    /// Increments the count, waking one waiter
    ///
    /// Fails with [`KernelError::Overflow`] at the maximum count.
    fn give(&self) -> Result<(), KernelError>;

    /// Decrements the count, blocking according to `wait`
    fn take(&self, wait: Wait) -> Result<(), KernelError>;

    /// Current count
    fn value(&self) -> u32;

    /// Releases the primitive; blocked and future callers get [`KernelError::Destroyed`]
    fn destroy(&self);
}

/// Recursive mutex owned by the task that locked it
pub trait HostMutex: Send + Sync {
    fn lock(&self, wait: Wait) -> Result<(), KernelError>;

    /// Fails with [`KernelError::NotOwner`] when the caller doesn't hold it
    fn unlock(&self) -> Result<(), KernelError>;

    fn destroy(&self);
}

/// Bounded queue of fixed-maximum-size byte messages
pub trait HostQueue: Send + Sync {
    /// Enqueues without blocking
    fn send(&self, message: &[u8]) -> Result<(), KernelError>;

    /// Dequeues, blocking according to `wait`
    ///
    /// [`Wait::Poll`] on an empty queue yields [`KernelError::Empty`]; an
    /// expired tick budget yields [`KernelError::Timeout`].
    fn receive(&self, wait: Wait) -> Result<Vec<u8>, KernelError>;

    /// Messages currently queued
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn destroy(&self);
}

/// One-shot hardware-style timer
pub trait HostTimer: Send + Sync {
    /// Arms (or re-arms) the timer to fire once after `ticks`
    fn start(&self, ticks: u64) -> Result<(), KernelError>;

    /// Disarms the timer; a pending expiry is discarded
    fn stop(&self) -> Result<(), KernelError>;

    fn is_active(&self) -> bool;

    /// Stops the timer and guarantees the callback will not run again
    fn destroy(&self);
}

/// The host kernel seam
///
/// Multiple implementations are possible:
/// - Simulated kernel on std threads (for testing)
/// - A binding to a real RTOS
///
/// # Blocking and cancellation
///
/// Every blocking call made from a task that has been deleted returns
/// [`KernelError::Cancelled`] so the task body can unwind. There is no
/// forced termination.
pub trait HostKernel: Send + Sync {
    /// Tick rate of the monotonic tick source
    fn tick_rate_hz(&self) -> u32;

    /// Ticks elapsed since the kernel started
    fn tick_count(&self) -> u64;

    /// Spawns a preemptive task running `entry`
    fn spawn_task(
        &self,
        descriptor: TaskDescriptor,
        entry: TaskEntry,
    ) -> Result<HostTaskId, KernelError>;

    /// Requests termination of a task
    fn delete_task(&self, task: HostTaskId) -> Result<(), KernelError>;

    /// Host identity of the calling task, `None` outside any host task
    fn current_task(&self) -> Option<HostTaskId>;

    /// True once the calling task has been deleted
    fn cancellation_requested(&self) -> bool;

    fn set_task_priority(&self, task: HostTaskId, priority: u8) -> Result<(), KernelError>;

    /// Blocks the caller for `ticks`
    fn delay(&self, ticks: u64) -> Result<(), KernelError>;

    /// Creates a binary semaphore; initial values above 1 are clamped
    fn create_binary_semaphore(&self, initial: u32) -> Result<Arc<dyn HostSemaphore>, KernelError>;

    fn create_counting_semaphore(
        &self,
        max: u32,
        initial: u32,
    ) -> Result<Arc<dyn HostSemaphore>, KernelError>;

    fn create_mutex(&self) -> Result<Arc<dyn HostMutex>, KernelError>;

    fn create_queue(&self, depth: usize, item_size: usize)
        -> Result<Arc<dyn HostQueue>, KernelError>;

    fn create_timer(
        &self,
        name: &str,
        callback: TimerCallback,
    ) -> Result<Arc<dyn HostTimer>, KernelError>;

    /// The host TCP/IP stack, if one is linked in
    fn network(&self) -> Option<Arc<dyn HostNetStack>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_descriptor_builder() {
        let desc = TaskDescriptor::new("worker")
            .with_stack_size(8192)
            .with_priority(200);
        assert_eq!(desc.name, "worker");
        assert_eq!(desc.stack_size, 8192);
        assert_eq!(desc.priority, 200);
    }

    #[test]
    fn test_task_descriptor_defaults() {
        let desc = TaskDescriptor::new("idle");
        assert_eq!(desc.stack_size, TaskDescriptor::DEFAULT_STACK_SIZE);
        assert_eq!(desc.priority, 0);
    }

    #[test]
    fn test_host_task_display() {
        assert_eq!(HostTaskId(7).to_string(), "host-task-7");
    }
}
