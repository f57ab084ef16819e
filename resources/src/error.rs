//! Resource table errors

use thiserror::Error;

/// Table-level failures, independent of what the table stores
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("Name too long: {len} bytes, limit is {limit}")]
    NameTooLong { len: usize, limit: usize },

    #[error("Name already in use")]
    NameTaken,

    #[error("No free slots")]
    NoFreeIds,

    #[error("Invalid object id")]
    InvalidId,

    #[error("Name not found")]
    NameNotFound,
}

/// Failure of [`ResourceTable::create`](crate::ResourceTable::create)
#[derive(Debug, Error)]
pub enum CreateError<E> {
    /// Rejected before the constructor ran
    #[error(transparent)]
    Table(#[from] TableError),

    /// The constructor failed; the reserved slot has been released
    #[error("Constructor failed: {0}")]
    Constructor(E),
}

/// Failure of [`ResourceTable::delete`](crate::ResourceTable::delete)
#[derive(Debug, Error)]
pub enum DeleteError<E> {
    #[error(transparent)]
    Table(#[from] TableError),

    /// The destructor failed; the entry is still valid
    #[error("Destructor failed: {0}")]
    Destructor(E),
}
