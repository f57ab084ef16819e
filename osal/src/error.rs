//! Error types for the abstraction layer
//!
//! Every variant maps to a stable negative status code through
//! [`OsalError::code`], so callers that only understand numbers (a C
//! binding, a test harness) see the same values on every host.

use crate::config::ConfigError;
use core_types::ObjectKind;
use kernel_api::KernelError;
use resources::{CreateError, DeleteError, TableError};
use thiserror::Error;

/// Result alias used throughout the facade
pub type OsalResult<T> = Result<T, OsalError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OsalError {
    #[error("Operation failed: {0}")]
    Failure(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Timed out")]
    Timeout,

    #[error("Semaphore failure")]
    SemFailure,

    #[error("Semaphore timed out")]
    SemTimeout,

    #[error("Queue empty")]
    QueueEmpty,

    #[error("Queue full")]
    QueueFull,

    #[error("Queue timed out")]
    QueueTimeout,

    #[error("Invalid queue size")]
    QueueInvalidSize,

    #[error("Name too long: {len} bytes, limit is {limit}")]
    NameTooLong { len: usize, limit: usize },

    #[error("No free ids")]
    NoFreeIds,

    #[error("Name already taken")]
    NameTaken,

    #[error("Invalid id")]
    InvalidId,

    #[error("Name not found")]
    NameNotFound,

    #[error("Invalid priority: {0}")]
    InvalidPriority(u32),

    #[error("Invalid semaphore value: {0}")]
    InvalidSemValue(u32),

    #[error("File error: {0}")]
    File(String),

    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("Invalid timer arguments")]
    TimerInvalidArgs,

    #[error("Invalid timer id")]
    TimerId,

    #[error("Timer unavailable")]
    TimerUnavailable,

    #[error("Timer internal error: {0}")]
    TimerInternal(String),

    #[error("Object in use")]
    ObjectInUse,

    #[error("Bad address")]
    BadAddress,

    #[error("Incorrect object state")]
    IncorrectObjState,

    #[error("Incorrect object type")]
    IncorrectObjType,

    #[error("Failed to allocate host {kind}: {reason}")]
    AllocationFailed { kind: ObjectKind, reason: String },
}

impl OsalError {
    pub const ERROR: i32 = -1;
    pub const INVALID_POINTER: i32 = -2;
    pub const ERROR_TIMEOUT: i32 = -4;
    pub const SEM_FAILURE: i32 = -6;
    pub const SEM_TIMEOUT: i32 = -7;
    pub const QUEUE_EMPTY: i32 = -8;
    pub const QUEUE_FULL: i32 = -9;
    pub const QUEUE_TIMEOUT: i32 = -10;
    pub const QUEUE_INVALID_SIZE: i32 = -11;
    pub const ERR_NAME_TOO_LONG: i32 = -13;
    pub const ERR_NO_FREE_IDS: i32 = -14;
    pub const ERR_NAME_TAKEN: i32 = -15;
    pub const ERR_INVALID_ID: i32 = -16;
    pub const ERR_NAME_NOT_FOUND: i32 = -17;
    pub const ERR_INVALID_PRIORITY: i32 = -19;
    pub const INVALID_SEM_VALUE: i32 = -20;
    pub const ERR_FILE: i32 = -27;
    pub const ERR_NOT_IMPLEMENTED: i32 = -28;
    pub const TIMER_ERR_INVALID_ARGS: i32 = -29;
    pub const TIMER_ERR_TIMER_ID: i32 = -30;
    pub const TIMER_ERR_UNAVAILABLE: i32 = -31;
    pub const TIMER_ERR_INTERNAL: i32 = -32;
    pub const ERR_OBJECT_IN_USE: i32 = -33;
    pub const ERR_BAD_ADDRESS: i32 = -34;
    pub const ERR_INCORRECT_OBJ_STATE: i32 = -35;
    pub const ERR_INCORRECT_OBJ_TYPE: i32 = -36;

    /// Stable numeric status code
    pub fn code(&self) -> i32 {
        match self {
            OsalError::Failure(_) => Self::ERROR,
            OsalError::InvalidArgument(_) => Self::INVALID_POINTER,
            OsalError::Timeout => Self::ERROR_TIMEOUT,
            OsalError::SemFailure => Self::SEM_FAILURE,
            OsalError::SemTimeout => Self::SEM_TIMEOUT,
            OsalError::QueueEmpty => Self::QUEUE_EMPTY,
            OsalError::QueueFull => Self::QUEUE_FULL,
            OsalError::QueueTimeout => Self::QUEUE_TIMEOUT,
            OsalError::QueueInvalidSize => Self::QUEUE_INVALID_SIZE,
            OsalError::NameTooLong { .. } => Self::ERR_NAME_TOO_LONG,
            OsalError::NoFreeIds => Self::ERR_NO_FREE_IDS,
            OsalError::NameTaken => Self::ERR_NAME_TAKEN,
            OsalError::InvalidId => Self::ERR_INVALID_ID,
            OsalError::NameNotFound => Self::ERR_NAME_NOT_FOUND,
            OsalError::InvalidPriority(_) => Self::ERR_INVALID_PRIORITY,
            OsalError::InvalidSemValue(_) => Self::INVALID_SEM_VALUE,
            OsalError::File(_) => Self::ERR_FILE,
            OsalError::NotImplemented(_) => Self::ERR_NOT_IMPLEMENTED,
            OsalError::TimerInvalidArgs => Self::TIMER_ERR_INVALID_ARGS,
            OsalError::TimerId => Self::TIMER_ERR_TIMER_ID,
            OsalError::TimerUnavailable => Self::TIMER_ERR_UNAVAILABLE,
            OsalError::TimerInternal(_) => Self::TIMER_ERR_INTERNAL,
            OsalError::ObjectInUse => Self::ERR_OBJECT_IN_USE,
            OsalError::BadAddress => Self::ERR_BAD_ADDRESS,
            OsalError::IncorrectObjState => Self::ERR_INCORRECT_OBJ_STATE,
            OsalError::IncorrectObjType => Self::ERR_INCORRECT_OBJ_TYPE,
            OsalError::AllocationFailed { kind, .. } => match kind {
                ObjectKind::BinSem | ObjectKind::CountSem | ObjectKind::Mutex => {
                    Self::SEM_FAILURE
                }
                ObjectKind::TimeBase | ObjectKind::Timer => Self::TIMER_ERR_INTERNAL,
                _ => Self::ERROR,
            },
        }
    }

    /// Wraps a host failure that happened while building an object
    pub fn allocation(kind: ObjectKind, err: KernelError) -> Self {
        OsalError::AllocationFailed {
            kind,
            reason: err.to_string(),
        }
    }

    /// True for the "nothing happened in time" family
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            OsalError::Timeout
                | OsalError::SemTimeout
                | OsalError::QueueTimeout
                | OsalError::QueueEmpty
        )
    }
}

impl From<TableError> for OsalError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::NameTooLong { len, limit } => OsalError::NameTooLong { len, limit },
            TableError::NameTaken => OsalError::NameTaken,
            TableError::NoFreeIds => OsalError::NoFreeIds,
            TableError::InvalidId => OsalError::InvalidId,
            TableError::NameNotFound => OsalError::NameNotFound,
        }
    }
}

impl From<CreateError<OsalError>> for OsalError {
    fn from(err: CreateError<OsalError>) -> Self {
        match err {
            CreateError::Table(err) => err.into(),
            CreateError::Constructor(err) => err,
        }
    }
}

impl From<DeleteError<OsalError>> for OsalError {
    fn from(err: DeleteError<OsalError>) -> Self {
        match err {
            DeleteError::Table(err) => err.into(),
            DeleteError::Destructor(err) => err,
        }
    }
}

impl From<ConfigError> for OsalError {
    fn from(err: ConfigError) -> Self {
        OsalError::InvalidArgument(err.to_string())
    }
}

impl From<std::io::Error> for OsalError {
    fn from(err: std::io::Error) -> Self {
        OsalError::File(err.to_string())
    }
}
