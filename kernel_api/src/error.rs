//! Kernel error types

use thiserror::Error;

/// Errors that can occur when interacting with the host kernel
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// Task spawn failed
    #[error("Failed to spawn task: {0}")]
    SpawnFailed(String),

    /// No such host task
    #[error("Task not found")]
    TaskNotFound,

    /// A bounded wait expired
    #[error("Operation timed out")]
    Timeout,

    /// The calling task has been asked to terminate
    #[error("Task cancelled")]
    Cancelled,

    /// The primitive was destroyed while (or before) the caller used it
    #[error("Primitive destroyed")]
    Destroyed,

    /// Queue is full
    #[error("Queue full")]
    Full,

    /// Queue is empty and the caller asked not to wait
    #[error("Queue empty")]
    Empty,

    /// Message exceeds the queue's item size
    #[error("Message too large: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// Semaphore would exceed its maximum count
    #[error("Semaphore count overflow")]
    Overflow,

    /// Mutex released by a task that doesn't hold it
    #[error("Caller does not own the mutex")]
    NotOwner,

    /// Non-blocking operation had nothing to do
    #[error("Operation would block")]
    WouldBlock,

    /// A blocking call was interrupted by an internal signal
    #[error("Interrupted")]
    Interrupted,

    /// Argument rejected by the kernel
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Resource exhausted
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Capability not available on this host
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Socket-layer failure
    #[error("Network error: {0}")]
    Network(String),
}
