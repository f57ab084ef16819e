//! Host tasks on std threads
//!
//! Every task is a real preemptive thread. Deleting a task raises its
//! cancellation flag; the next blocking kernel call the task makes returns
//! [`KernelError::Cancelled`] and the task body is expected to unwind.

use crate::lock;
use kernel_api::{HostTaskId, KernelError, TaskDescriptor, TaskEntry};
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// Smallest stack handed to std; RTOS-sized stacks are too small for it
const MIN_THREAD_STACK: usize = 64 * 1024;

thread_local! {
    static CURRENT: RefCell<Option<Arc<TaskControl>>> = const { RefCell::new(None) };
}

/// Per-task control block
#[derive(Debug)]
pub struct TaskControl {
    id: HostTaskId,
    name: String,
    priority: AtomicU8,
    cancelled: AtomicBool,
}

impl TaskControl {
    pub fn id(&self) -> HostTaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> u8 {
        self.priority.load(Ordering::Relaxed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Returns the control block of the calling task, if any
pub(crate) fn current() -> Option<Arc<TaskControl>> {
    CURRENT.with(|slot| slot.borrow().clone())
}

/// Fails with `Cancelled` when the calling task has been deleted
pub(crate) fn check_cancelled() -> Result<(), KernelError> {
    match current() {
        Some(task) if task.is_cancelled() => Err(KernelError::Cancelled),
        _ => Ok(()),
    }
}

/// Live task registry
#[derive(Debug, Default)]
pub struct TaskRegistry {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<HostTaskId, Arc<TaskControl>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a thread running `entry`
    ///
    /// A panic in the task body ends that task only. The registry entry is
    /// removed when the body returns.
    pub fn spawn(
        self: &Arc<Self>,
        descriptor: TaskDescriptor,
        entry: TaskEntry,
    ) -> Result<HostTaskId, KernelError> {
        let id = HostTaskId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let control = Arc::new(TaskControl {
            id,
            name: descriptor.name.clone(),
            priority: AtomicU8::new(descriptor.priority),
            cancelled: AtomicBool::new(false),
        });
        lock(&self.tasks).insert(id, control.clone());

        let registry = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(descriptor.name.clone())
            .stack_size(descriptor.stack_size.max(MIN_THREAD_STACK))
            .spawn(move || {
                CURRENT.with(|slot| *slot.borrow_mut() = Some(control));
                let _ = panic::catch_unwind(AssertUnwindSafe(entry));
                CURRENT.with(|slot| slot.borrow_mut().take());
                lock(&registry.tasks).remove(&id);
            });

        match spawned {
            Ok(_) => Ok(id),
            Err(err) => {
                lock(&self.tasks).remove(&id);
                Err(KernelError::SpawnFailed(err.to_string()))
            }
        }
    }

    /// Raises the cancellation flag of a task
    pub fn cancel(&self, id: HostTaskId) -> Result<(), KernelError> {
        let tasks = lock(&self.tasks);
        let task = tasks.get(&id).ok_or(KernelError::TaskNotFound)?;
        task.cancelled.store(true, Ordering::Release);
        Ok(())
    }

    pub fn set_priority(&self, id: HostTaskId, priority: u8) -> Result<(), KernelError> {
        let tasks = lock(&self.tasks);
        let task = tasks.get(&id).ok_or(KernelError::TaskNotFound)?;
        task.priority.store(priority, Ordering::Relaxed);
        Ok(())
    }

    pub fn get(&self, id: HostTaskId) -> Option<Arc<TaskControl>> {
        lock(&self.tasks).get(&id).cloned()
    }

    /// Number of task bodies still running
    pub fn live_count(&self) -> usize {
        lock(&self.tasks).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_spawn_runs_body() {
        let registry = Arc::new(TaskRegistry::new());
        let (tx, rx) = mpsc::channel();
        registry
            .spawn(
                TaskDescriptor::new("runner"),
                Box::new(move || {
                    tx.send(current().map(|t| t.name().to_string())).unwrap();
                }),
            )
            .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(name.as_deref(), Some("runner"));
    }

    #[test]
    fn test_cancel_is_observed() {
        let registry = Arc::new(TaskRegistry::new());
        let (tx, rx) = mpsc::channel();
        let id = registry
            .spawn(
                TaskDescriptor::new("spinner"),
                Box::new(move || {
                    while check_cancelled().is_ok() {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    tx.send(()).unwrap();
                }),
            )
            .unwrap();

        registry.cancel(id).unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn test_unknown_task() {
        let registry = TaskRegistry::new();
        assert_eq!(
            registry.cancel(HostTaskId(99)),
            Err(KernelError::TaskNotFound)
        );
        assert_eq!(
            registry.set_priority(HostTaskId(99), 1),
            Err(KernelError::TaskNotFound)
        );
    }

    #[test]
    fn test_panicking_task_is_reaped() {
        let registry = Arc::new(TaskRegistry::new());
        registry
            .spawn(
                TaskDescriptor::new("boom"),
                Box::new(|| panic!("task body failure")),
            )
            .unwrap();

        for _ in 0..200 {
            if registry.live_count() == 0 {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("panicking task was never removed");
    }

    #[test]
    fn test_outside_task_is_not_cancelled() {
        assert!(current().is_none());
        assert!(check_cancelled().is_ok());
    }
}
