//! # Kernel API
//!
//! This crate defines the interface between the abstraction layer and the
//! host real-time kernel it runs on.
//!
//! ## Philosophy
//!
//! The host provides **mechanisms**, the abstraction layer provides policy:
//! - Task spawning and cancellation (not naming, not bookkeeping)
//! - Semaphores, mutexes and queues (not handle tables)
//! - One-shot timers and a tick counter (not periodic timebases)
//! - A socket stack with a single set-based readiness wait (not bitmaps)
//!
//! ## Design Goals
//!
//! 1. **Testability**: The whole seam can be implemented in-process
//! 2. **Explicitness**: Every blocking call says how long it may block
//! 3. **Narrowness**: Only what the layer above actually consumes
//!
//! ## Non-Goals
//!
//! This is NOT:
//! - A portable threading library
//! - A filesystem interface (files go through `std::fs`)

pub mod error;
pub mod kernel;
pub mod net;
pub mod time;

pub use error::KernelError;
pub use kernel::{
    HostKernel, HostMutex, HostQueue, HostSemaphore, HostTaskId, HostTimer, TaskDescriptor,
    TaskEntry, TimerCallback, Wait,
};
pub use net::{
    HostNetStack, HostSocket, SelectBits, SocketDomain, SocketSet, SocketSetEntry, SocketType,
};
pub use time::TickClock;
