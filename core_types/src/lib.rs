//! # Core Types
//!
//! This crate defines the fundamental types shared by every layer of the
//! abstraction: the numeric handle space, the timeout convention and the
//! stream readiness flags.
//!
//! ## Philosophy
//!
//! - **One handle space**: every object kind is addressed by an [`ObjectId`].
//! - **Handles are checked, not trusted**: kind, generation and slot index
//!   are all encoded, so corrupted or stale handles are rejected.
//! - **No hidden state**: nothing in here touches a table or a lock.
//!
//! ## Key Types
//!
//! - [`ObjectId`]: Opaque handle (kind + generation + slot index)
//! - [`ObjectKind`]: Which resource table a handle indexes
//! - [`Timeout`]: Wait forever / don't wait / millisecond budget
//! - [`StreamState`]: READABLE / WRITABLE readiness bits

pub mod ids;
pub mod stream_state;
pub mod timeout;

pub use ids::{ObjectId, ObjectKind};
pub use stream_state::StreamState;
pub use timeout::Timeout;
