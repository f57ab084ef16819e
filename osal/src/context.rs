//! Caller identity
//!
//! Creation calls record which task created the object. Rather than
//! looking the current thread up in the task table, the caller says who it
//! is by passing a [`CallerContext`].

use crate::error::OsalResult;
use crate::Osal;
use core_types::ObjectId;
use std::ops::Deref;
use std::sync::Arc;

/// Identity of the task making a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CallerContext {
    task: ObjectId,
}

impl CallerContext {
    /// Code running outside any layer task (startup, tests)
    pub const ROOT: CallerContext = CallerContext {
        task: ObjectId::UNDEFINED,
    };

    pub fn root() -> Self {
        Self::ROOT
    }

    pub(crate) fn for_task(task: ObjectId) -> Self {
        Self { task }
    }

    /// Handle of the calling task, [`ObjectId::UNDEFINED`] for the root
    pub fn task(&self) -> ObjectId {
        self.task
    }

    pub fn is_root(&self) -> bool {
        self.task.is_undefined()
    }
}

/// Handed to every task entry point
///
/// Derefs to [`Osal`], so a task calls the layer directly through it.
pub struct TaskContext {
    osal: Arc<Osal>,
    caller: CallerContext,
}

impl TaskContext {
    pub(crate) fn new(osal: Arc<Osal>, task: ObjectId) -> Self {
        Self {
            osal,
            caller: CallerContext::for_task(task),
        }
    }

    /// Handle of this task
    pub fn id(&self) -> ObjectId {
        self.caller.task()
    }

    /// Context to pass to creation calls made by this task
    pub fn caller(&self) -> CallerContext {
        self.caller
    }

    pub fn osal(&self) -> &Arc<Osal> {
        &self.osal
    }

    /// True once this task has been deleted and should return
    pub fn should_exit(&self) -> bool {
        self.osal.kernel.cancellation_requested()
    }

    /// Starts a task from inside this one
    ///
    /// Same as [`Osal::task_create`], which needs the shared handle the
    /// deref to [`Osal`] can't give.
    pub fn task_create<F>(
        &self,
        caller: CallerContext,
        name: &str,
        stack_size: usize,
        priority: u32,
        entry: F,
    ) -> OsalResult<ObjectId>
    where
        F: FnOnce(TaskContext) + Send + 'static,
    {
        self.osal.task_create(caller, name, stack_size, priority, entry)
    }
}

impl Deref for TaskContext {
    type Target = Osal;

    fn deref(&self) -> &Osal {
        &self.osal
    }
}
