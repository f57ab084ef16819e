//! # Resources
//!
//! This crate provides the resource table every object kind is stored in.
//!
//! ## Philosophy
//!
//! - **Capacity is finite and explicit**: each kind has its own fixed table
//! - **Handles are checked**: kind, slot and generation must all match
//! - **Locks are short**: host primitives are built and torn down with the
//!   table unlocked, against a reserved slot
//! - **Failures never leak slots**: a failed or panicking constructor
//!   returns its reservation
//!
//! ## Core Concepts
//!
//! - [`ResourceTable`]: Arena of slots with a free list and name registry
//! - [`Record`]: A live entry (handle, names, creator, payload)
//! - [`TableError`]: Table-level failures shared by every kind
//!
//! ## Non-Goals
//!
//! This is NOT:
//! - A general-purpose allocator
//! - Aware of what its payloads are (that is the caller's business)

pub mod error;
pub mod table;

pub use error::{CreateError, DeleteError, TableError};
pub use table::{Record, ResourceTable};
