//! Tasks
//!
//! A task is a host task plus a table entry. The host task is held at a
//! start gate until its entry is published, so the body never runs under
//! a handle that doesn't resolve yet. When the body returns (or panics)
//! the task removes its own entry.

use crate::context::{CallerContext, TaskContext};
use crate::error::{OsalError, OsalResult};
use crate::Osal;
use core_types::{ObjectId, ObjectKind};
use kernel_api::{HostSemaphore, HostTaskId, KernelError, TaskDescriptor, TaskEntry, Wait};
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Table payload for a task
pub struct TaskRecord {
    host: HostTaskId,
    stack_size: usize,
    priority: AtomicU8,
}

impl TaskRecord {
    pub fn host(&self) -> HostTaskId {
        self.host
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskInfo {
    pub name: String,
    pub creator: ObjectId,
    pub stack_size: usize,
    pub priority: u8,
}

/// Removes the task's entry however the body ends
struct ExitGuard {
    osal: Arc<Osal>,
    id: ObjectId,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        // Already gone when the task was deleted from outside
        if self.osal.tasks.delete(self.id, |_| Ok::<(), OsalError>(())).is_ok() {
            self.osal
                .logger
                .debug(|e| e.with_source(self.id), "task exited");
        }
    }
}

fn priority_from(priority: u32) -> OsalResult<u8> {
    u8::try_from(priority).map_err(|_| OsalError::InvalidPriority(priority))
}

impl Osal {
    /// Creates and starts a task
    ///
    /// `priority` runs from 0 (most urgent) to 255.
    pub fn task_create<F>(
        self: &Arc<Self>,
        caller: CallerContext,
        name: &str,
        stack_size: usize,
        priority: u32,
        entry: F,
    ) -> OsalResult<ObjectId>
    where
        F: FnOnce(TaskContext) + Send + 'static,
    {
        if stack_size == 0 {
            return Err(OsalError::InvalidArgument(
                "stack size must be non-zero".to_string(),
            ));
        }
        let priority = priority_from(priority)?;
        self.tasks.validate_name(name)?;

        let osal = Arc::clone(self);
        let mut start_gate: Option<Arc<dyn HostSemaphore>> = None;
        let result = self.create_object(&self.tasks, caller, Some(name), |id, display| {
            let gate = self
                .kernel
                .create_binary_semaphore(0)
                .map_err(|e| OsalError::allocation(ObjectKind::Task, e))?;
            let body_gate = Arc::clone(&gate);
            let descriptor = TaskDescriptor::new(display)
                .with_stack_size(stack_size)
                .with_priority(self.config.host_priority(priority));
            let body: TaskEntry = Box::new(move || {
                if body_gate.take(Wait::Forever).is_err() {
                    return;
                }
                let guard = ExitGuard {
                    osal: Arc::clone(&osal),
                    id,
                };
                entry(TaskContext::new(osal, id));
                drop(guard);
            });
            let host = match self.kernel.spawn_task(descriptor, body) {
                Ok(host) => host,
                Err(err) => {
                    gate.destroy();
                    return Err(OsalError::allocation(ObjectKind::Task, err));
                }
            };
            start_gate = Some(gate);
            Ok(TaskRecord {
                host,
                stack_size,
                priority: AtomicU8::new(priority),
            })
        });

        // The slot is published (or released) by now
        if let Some(gate) = start_gate {
            match result {
                Ok(_) => {
                    let _ = gate.give();
                }
                Err(_) => gate.destroy(),
            }
        }
        result
    }

    /// Deletes a task
    ///
    /// The host task is asked to stop; its next blocking call fails so the
    /// body can return. Resources it holds are not released.
    pub fn task_delete(&self, id: ObjectId) -> OsalResult<()> {
        self.delete_object(&self.tasks, id, |record| {
            match self.kernel.delete_task(record.payload().host) {
                Ok(()) | Err(KernelError::TaskNotFound) => Ok(()),
                Err(err) => Err(OsalError::Failure(err.to_string())),
            }
        })?;
        Ok(())
    }

    /// Blocks the calling task for at least `millis`
    pub fn task_delay(&self, millis: u32) -> OsalResult<()> {
        self.kernel
            .delay(self.clock.millis_to_ticks(millis))
            .map_err(|e| OsalError::Failure(e.to_string()))
    }

    pub fn task_set_priority(&self, id: ObjectId, priority: u32) -> OsalResult<()> {
        let priority = priority_from(priority)?;
        let record = self.tasks.lookup(id)?;
        let task = record.payload();
        self.kernel
            .set_task_priority(task.host, self.config.host_priority(priority))
            .map_err(|e| OsalError::Failure(e.to_string()))?;
        task.priority.store(priority, Ordering::Relaxed);
        Ok(())
    }

    pub fn task_get_info(&self, id: ObjectId) -> OsalResult<TaskInfo> {
        let record = self.tasks.lookup(id)?;
        let task = record.payload();
        Ok(TaskInfo {
            name: record.name().unwrap_or_default().to_string(),
            creator: record.creator(),
            stack_size: task.stack_size,
            priority: task.priority.load(Ordering::Relaxed),
        })
    }

    pub fn task_get_id_by_name(&self, name: &str) -> OsalResult<ObjectId> {
        Ok(self.tasks.find_by_name(name)?)
    }

    /// Handle of the calling task, found from the host's identity
    ///
    /// For callers without a [`TaskContext`] (timer callbacks, foreign
    /// threads). Yields [`ObjectId::UNDEFINED`] outside any layer task.
    pub fn task_get_id(&self) -> ObjectId {
        let Some(current) = self.kernel.current_task() else {
            return ObjectId::UNDEFINED;
        };
        self.tasks
            .find(|record| record.payload().host == current)
            .map(|record| record.id())
            .unwrap_or(ObjectId::UNDEFINED)
    }
}
