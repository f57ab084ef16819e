//! # Simulated Kernel
//!
//! This crate provides a simulated implementation of the host kernel seam.
//!
//! ## Purpose
//!
//! The simulated kernel allows testing the abstraction layer without an
//! RTOS or a board:
//! - Runs under `cargo test`
//! - Real preemption (every task is a std thread)
//! - Real time (ticks come from the monotonic clock)
//! - Inspectable (live task, timer and socket counts are exposed)
//!
//! ## Philosophy
//!
//! **Testability is a first-class design constraint.**
//!
//! This is not a mock. Semaphores block, timers fire from their own
//! "interrupt" thread and sockets carry bytes, so races and timeouts in
//! the layer above show up here the way they would on target.

pub mod clock;
pub mod fault_injection;
pub mod message_queue;
pub mod net;
pub mod sync;
pub mod tasks;
pub mod test_utils;
pub mod timer;

use clock::SimClock;
use fault_injection::{FaultInjector, FaultPlan, Primitive};
use kernel_api::{
    HostKernel, HostMutex, HostNetStack, HostQueue, HostSemaphore, HostTaskId, HostTimer,
    KernelError, TaskDescriptor, TaskEntry, TimerCallback,
};
use message_queue::SimQueue;
use net::SimNetStack;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use sync::{SimMutex, SimSemaphore, CANCEL_POLL_SLICE};
use tasks::TaskRegistry;
use timer::TimerService;

/// Locks a std mutex, recovering the data if a panicking thread poisoned it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Simulated kernel state
///
/// The timer daemon and the network stack are started on first use.
pub struct SimulatedKernel {
    clock: SimClock,
    tasks: Arc<TaskRegistry>,
    timers: OnceLock<TimerService>,
    network_enabled: bool,
    network: OnceLock<Arc<SimNetStack>>,
    faults: Arc<Mutex<FaultInjector>>,
}

impl SimulatedKernel {
    /// Creates a kernel ticking at 1000 Hz with networking enabled
    pub fn new() -> Self {
        Self {
            clock: SimClock::default(),
            tasks: Arc::new(TaskRegistry::new()),
            timers: OnceLock::new(),
            network_enabled: true,
            network: OnceLock::new(),
            faults: Arc::new(Mutex::new(FaultInjector::default())),
        }
    }

    /// Sets the tick rate
    pub fn with_tick_rate(mut self, tick_rate_hz: u32) -> Self {
        self.clock = SimClock::new(tick_rate_hz);
        self
    }

    /// Installs a fault plan
    pub fn with_fault_plan(self, plan: FaultPlan) -> Self {
        *lock(&self.faults) = FaultInjector::new(plan);
        self
    }

    /// Enables or disables the loopback network stack
    pub fn with_network(mut self, enabled: bool) -> Self {
        self.network_enabled = enabled;
        self
    }

    pub fn clock(&self) -> SimClock {
        self.clock
    }

    /// Number of task bodies still running
    pub fn live_task_count(&self) -> usize {
        self.tasks.live_count()
    }

    /// Priority a task is currently running at
    pub fn task_priority(&self, task: HostTaskId) -> Option<u8> {
        self.tasks.get(task).map(|t| t.priority())
    }

    /// Number of host timers in existence
    pub fn timer_count(&self) -> usize {
        self.timers.get().map_or(0, |t| t.timer_count())
    }

    /// Number of faults injected so far
    pub fn injected_fault_count(&self) -> usize {
        lock(&self.faults).injected_count()
    }

    /// The concrete loopback stack, for inspection
    pub fn loopback(&self) -> Option<Arc<SimNetStack>> {
        if !self.network_enabled {
            return None;
        }
        Some(Arc::clone(self.network.get_or_init(|| {
            Arc::new(SimNetStack::new(self.clock, Arc::clone(&self.faults)))
        })))
    }

    fn inject(&self, primitive: Primitive) -> Result<(), KernelError> {
        if lock(&self.faults).should_fail_create(primitive) {
            return Err(KernelError::ResourceExhausted(format!(
                "injected {:?} failure",
                primitive
            )));
        }
        Ok(())
    }

    fn timer_service(&self) -> Result<&TimerService, KernelError> {
        if let Some(service) = self.timers.get() {
            return Ok(service);
        }
        let service = TimerService::new(self.clock)?;
        // A concurrent initializer may win; its service is kept and ours is dropped.
        let _ = self.timers.set(service);
        self.timers
            .get()
            .ok_or_else(|| KernelError::ResourceExhausted("timer service".into()))
    }
}

impl Default for SimulatedKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl HostKernel for SimulatedKernel {
    fn tick_rate_hz(&self) -> u32 {
        self.clock.tick_rate_hz()
    }

    fn tick_count(&self) -> u64 {
        self.clock.tick_count()
    }

    fn spawn_task(
        &self,
        descriptor: TaskDescriptor,
        entry: TaskEntry,
    ) -> Result<HostTaskId, KernelError> {
        if lock(&self.faults).should_fail_create(Primitive::Task) {
            return Err(KernelError::SpawnFailed("injected task failure".into()));
        }
        self.tasks.spawn(descriptor, entry)
    }

    fn delete_task(&self, task: HostTaskId) -> Result<(), KernelError> {
        self.tasks.cancel(task)
    }

    fn current_task(&self) -> Option<HostTaskId> {
        tasks::current().map(|t| t.id())
    }

    fn cancellation_requested(&self) -> bool {
        tasks::current().is_some_and(|t| t.is_cancelled())
    }

    fn set_task_priority(&self, task: HostTaskId, priority: u8) -> Result<(), KernelError> {
        self.tasks.set_priority(task, priority)
    }

    fn delay(&self, ticks: u64) -> Result<(), KernelError> {
        let until = std::time::Instant::now() + self.clock.ticks_to_std(ticks);
        loop {
            tasks::check_cancelled()?;
            let now = std::time::Instant::now();
            if now >= until {
                return Ok(());
            }
            std::thread::sleep((until - now).min(CANCEL_POLL_SLICE));
        }
    }

    fn create_binary_semaphore(&self, initial: u32) -> Result<Arc<dyn HostSemaphore>, KernelError> {
        self.inject(Primitive::BinarySemaphore)?;
        Ok(Arc::new(SimSemaphore::binary(self.clock, initial)))
    }

    fn create_counting_semaphore(
        &self,
        max: u32,
        initial: u32,
    ) -> Result<Arc<dyn HostSemaphore>, KernelError> {
        self.inject(Primitive::CountingSemaphore)?;
        if initial > max {
            return Err(KernelError::InvalidArgument(format!(
                "initial count {} exceeds maximum {}",
                initial, max
            )));
        }
        Ok(Arc::new(SimSemaphore::new(self.clock, max, initial)))
    }

    fn create_mutex(&self) -> Result<Arc<dyn HostMutex>, KernelError> {
        self.inject(Primitive::Mutex)?;
        Ok(Arc::new(SimMutex::new(self.clock)))
    }

    fn create_queue(
        &self,
        depth: usize,
        item_size: usize,
    ) -> Result<Arc<dyn HostQueue>, KernelError> {
        self.inject(Primitive::Queue)?;
        if depth == 0 || item_size == 0 {
            return Err(KernelError::InvalidArgument("empty queue geometry".into()));
        }
        Ok(Arc::new(SimQueue::new(self.clock, depth, item_size)))
    }

    fn create_timer(
        &self,
        name: &str,
        callback: TimerCallback,
    ) -> Result<Arc<dyn HostTimer>, KernelError> {
        self.inject(Primitive::Timer)?;
        let service = self.timer_service()?;
        Ok(Arc::new(service.create(name, callback)))
    }

    fn network(&self) -> Option<Arc<dyn HostNetStack>> {
        self.loopback().map(|net| net as Arc<dyn HostNetStack>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fault_injection::Fault;
    use kernel_api::Wait;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_kernel_creation() {
        let kernel = SimulatedKernel::new();
        assert_eq!(kernel.tick_rate_hz(), 1000);
        assert_eq!(kernel.live_task_count(), 0);
        assert_eq!(kernel.timer_count(), 0);
        assert!(kernel.network().is_some());
    }

    #[test]
    fn test_builder_options() {
        let kernel = SimulatedKernel::new()
            .with_tick_rate(100)
            .with_network(false);
        assert_eq!(kernel.tick_rate_hz(), 100);
        assert!(kernel.network().is_none());
    }

    #[test]
    fn test_spawned_task_sees_its_own_id() {
        let kernel = Arc::new(SimulatedKernel::new());
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&kernel);
        let id = kernel
            .spawn_task(
                TaskDescriptor::new("self-aware"),
                Box::new(move || {
                    tx.send(inner.current_task()).unwrap();
                }),
            )
            .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), Some(id));
        assert_eq!(kernel.current_task(), None);
    }

    #[test]
    fn test_delete_interrupts_delay() {
        let kernel = Arc::new(SimulatedKernel::new());
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&kernel);
        let id = kernel
            .spawn_task(
                TaskDescriptor::new("sleeper"),
                Box::new(move || {
                    tx.send(inner.delay(60_000)).unwrap();
                }),
            )
            .unwrap();

        std::thread::sleep(Duration::from_millis(20));
        kernel.delete_task(id).unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            Err(KernelError::Cancelled)
        );
    }

    #[test]
    fn test_delete_interrupts_blocked_take() {
        let kernel = Arc::new(SimulatedKernel::new());
        let sem = kernel.create_binary_semaphore(0).unwrap();
        let (tx, rx) = mpsc::channel();
        let id = kernel
            .spawn_task(
                TaskDescriptor::new("waiter"),
                Box::new(move || {
                    tx.send(sem.take(Wait::Forever)).unwrap();
                }),
            )
            .unwrap();

        std::thread::sleep(Duration::from_millis(20));
        kernel.delete_task(id).unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            Err(KernelError::Cancelled)
        );
    }

    #[test]
    fn test_priority_updates() {
        let kernel = Arc::new(SimulatedKernel::new());
        let (tx, rx) = mpsc::channel::<()>();
        let id = kernel
            .spawn_task(
                TaskDescriptor::new("prio").with_priority(10),
                Box::new(move || {
                    let _ = rx.recv_timeout(Duration::from_secs(2));
                }),
            )
            .unwrap();
        assert_eq!(kernel.task_priority(id), Some(10));
        kernel.set_task_priority(id, 42).unwrap();
        assert_eq!(kernel.task_priority(id), Some(42));
        tx.send(()).unwrap();
    }

    #[test]
    fn test_injected_create_failure() {
        let kernel = SimulatedKernel::new().with_fault_plan(FaultPlan::new().with_fault(
            Fault::FailCreate {
                primitive: Primitive::Queue,
                nth: 1,
            },
        ));
        assert!(matches!(
            kernel.create_queue(4, 8),
            Err(KernelError::ResourceExhausted(_))
        ));
        assert!(kernel.create_queue(4, 8).is_ok());
        assert_eq!(kernel.injected_fault_count(), 1);
    }

    #[test]
    fn test_counting_semaphore_initial_above_max() {
        let kernel = SimulatedKernel::new();
        assert!(matches!(
            kernel.create_counting_semaphore(2, 3),
            Err(KernelError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_timer_created_lazily() {
        let kernel = SimulatedKernel::new();
        let timer = kernel
            .create_timer("t", Arc::new(|_: &dyn HostTimer| {}))
            .unwrap();
        assert_eq!(kernel.timer_count(), 1);
        timer.destroy();
        assert_eq!(kernel.timer_count(), 0);
    }
}
