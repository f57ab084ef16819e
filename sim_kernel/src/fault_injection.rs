//! Deterministic fault injection for testing
//!
//! This module lets tests make the simulated kernel fail in precise,
//! repeatable ways: the N-th construction of a primitive kind, or the next
//! few readiness waits being interrupted.
//!
//! ## Design Philosophy
//!
//! - **Deterministic**: Faults trigger by count, never by chance
//! - **Composable**: A plan holds any number of faults
//! - **Test-focused**: Not intended for production use
//!
//! ## Example
//!
//! ```
//! use sim_kernel::fault_injection::{Fault, FaultPlan, Primitive};
//!
//! let plan = FaultPlan::new()
//!     .with_fault(Fault::FailCreate { primitive: Primitive::Timer, nth: 1 })
//!     .with_fault(Fault::InterruptSelect { count: 2 });
//! assert_eq!(plan.faults().len(), 2);
//! ```

use std::collections::HashMap;

/// Kinds of host primitive the kernel constructs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Task,
    BinarySemaphore,
    CountingSemaphore,
    Mutex,
    Queue,
    Timer,
    Socket,
}

/// A fault to inject
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail the `nth` (1-based) construction of `primitive`
    FailCreate { primitive: Primitive, nth: usize },

    /// Interrupt the next `count` select calls before they wait
    InterruptSelect { count: usize },
}

/// A plan describing all faults to inject
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    faults: Vec<Fault>,
}

impl FaultPlan {
    /// Creates a new empty fault plan
    pub fn new() -> Self {
        Self { faults: Vec::new() }
    }

    /// Adds a fault to the plan
    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    /// Returns a reference to the faults
    pub fn faults(&self) -> &[Fault] {
        &self.faults
    }
}

/// Fault injector that tracks which faults have triggered
#[derive(Debug, Default)]
pub struct FaultInjector {
    plan: FaultPlan,
    creates_seen: HashMap<Primitive, usize>,
    interrupts_left: usize,
    injected: usize,
}

impl FaultInjector {
    /// Creates a new fault injector with the given plan
    pub fn new(plan: FaultPlan) -> Self {
        let interrupts_left = plan
            .faults()
            .iter()
            .map(|fault| match fault {
                Fault::InterruptSelect { count } => *count,
                _ => 0,
            })
            .sum();
        Self {
            plan,
            creates_seen: HashMap::new(),
            interrupts_left,
            injected: 0,
        }
    }

    /// Counts a construction of `primitive`; returns true if it must fail
    pub fn should_fail_create(&mut self, primitive: Primitive) -> bool {
        let seen = self.creates_seen.entry(primitive).or_insert(0);
        *seen += 1;
        let seen = *seen;
        let fail = self.plan.faults().iter().any(|fault| {
            matches!(fault, Fault::FailCreate { primitive: p, nth } if *p == primitive && *nth == seen)
        });
        if fail {
            self.injected += 1;
        }
        fail
    }

    /// Returns true if this select call must be interrupted
    pub fn should_interrupt_select(&mut self) -> bool {
        if self.interrupts_left > 0 {
            self.interrupts_left -= 1;
            self.injected += 1;
            true
        } else {
            false
        }
    }

    /// Number of faults that have fired so far
    pub fn injected_count(&self) -> usize {
        self.injected
    }
}
