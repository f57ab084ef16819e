//! Test utilities for timing-sensitive tests
//!
//! Every task in the simulated kernel is a real thread, so tests observe
//! effects asynchronously. These helpers poll instead of sleeping for a
//! fixed amount, which keeps tests fast on quiet machines and tolerant on
//! loaded ones.

use crate::fault_injection::FaultPlan;
use crate::SimulatedKernel;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Polling interval used by [`wait_until`]
pub const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Polls `condition` until it holds or `timeout` elapses
///
/// Returns whether the condition was observed to hold.
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Builds a shared kernel with the given fault plan applied
///
/// # Example
///
/// ```
/// use sim_kernel::test_utils::kernel_with_faults;
/// use sim_kernel::fault_injection::{Fault, FaultPlan};
///
/// let kernel = kernel_with_faults(
///     FaultPlan::new().with_fault(Fault::InterruptSelect { count: 1 }),
/// );
/// assert_eq!(kernel.injected_fault_count(), 0);
/// ```
pub fn kernel_with_faults(plan: FaultPlan) -> Arc<SimulatedKernel> {
    Arc::new(SimulatedKernel::new().with_fault_plan(plan))
}

/// Waits for every task body started on `kernel` to return
pub fn wait_for_tasks_to_exit(kernel: &SimulatedKernel, timeout: Duration) -> bool {
    wait_until(timeout, || kernel.live_task_count() == 0)
}
