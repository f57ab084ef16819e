//! # Simulated Timer Device
//!
//! One-shot timers serviced by a single daemon thread.
//!
//! ## Philosophy
//!
//! **Expiry is a signal, not a place to do work.**
//!
//! The daemon plays the role of the timer interrupt: it fires callbacks
//! one at a time with no lock held, and callbacks are expected to do
//! little more than re-arm the timer and post a semaphore. Anything that
//! may block belongs in a task woken by that semaphore.

use crate::clock::SimClock;
use crate::lock;
use kernel_api::{HostTimer, KernelError, TimerCallback};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{JoinHandle, ThreadId};
use std::time::Instant as StdInstant;

struct TimerEntry {
    name: String,
    callback: TimerCallback,
    deadline: Option<StdInstant>,
}

#[derive(Default)]
struct TimerState {
    timers: HashMap<u64, TimerEntry>,
    next_id: u64,
    /// Timer whose callback is running right now
    firing: Option<u64>,
    daemon: Option<ThreadId>,
    shutdown: bool,
}

struct TimerShared {
    clock: SimClock,
    state: Mutex<TimerState>,
    /// Signalled whenever the earliest deadline may have moved
    rearmed: Condvar,
    /// Signalled whenever a callback finishes
    idle: Condvar,
}

/// Handle to one timer
pub struct SimTimer {
    id: u64,
    shared: Arc<TimerShared>,
}

impl SimTimer {
    /// Name the timer was created with
    pub fn name(&self) -> Option<String> {
        lock(&self.shared.state)
            .timers
            .get(&self.id)
            .map(|entry| entry.name.clone())
    }
}

impl HostTimer for SimTimer {
    fn start(&self, ticks: u64) -> Result<(), KernelError> {
        let mut state = lock(&self.shared.state);
        let entry = state
            .timers
            .get_mut(&self.id)
            .ok_or(KernelError::Destroyed)?;
        let delay = self.shared.clock.ticks_to_std(ticks.max(1));
        entry.deadline = Some(StdInstant::now() + delay);
        self.shared.rearmed.notify_all();
        Ok(())
    }

    fn stop(&self) -> Result<(), KernelError> {
        let mut state = lock(&self.shared.state);
        let entry = state
            .timers
            .get_mut(&self.id)
            .ok_or(KernelError::Destroyed)?;
        entry.deadline = None;
        Ok(())
    }

    fn is_active(&self) -> bool {
        lock(&self.shared.state)
            .timers
            .get(&self.id)
            .is_some_and(|entry| entry.deadline.is_some())
    }

    fn destroy(&self) {
        let mut state = lock(&self.shared.state);
        state.timers.remove(&self.id);
        let on_daemon = state.daemon == Some(std::thread::current().id());
        while !on_daemon && state.firing == Some(self.id) {
            state = match self.shared.idle.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

/// Owner of the timer daemon thread
///
/// Dropping the service stops the daemon.
pub struct TimerService {
    shared: Arc<TimerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TimerService {
    pub fn new(clock: SimClock) -> Result<Self, KernelError> {
        let shared = Arc::new(TimerShared {
            clock,
            state: Mutex::new(TimerState::default()),
            rearmed: Condvar::new(),
            idle: Condvar::new(),
        });
        let daemon_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("sim-timer-daemon".to_string())
            .spawn(move || run_daemon(daemon_shared))
            .map_err(|err| KernelError::ResourceExhausted(err.to_string()))?;
        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Creates a disarmed timer
    pub fn create(&self, name: &str, callback: TimerCallback) -> SimTimer {
        let mut state = lock(&self.shared.state);
        state.next_id += 1;
        let id = state.next_id;
        state.timers.insert(
            id,
            TimerEntry {
                name: name.to_string(),
                callback,
                deadline: None,
            },
        );
        SimTimer {
            id,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of timers that exist (armed or not)
    pub fn timer_count(&self) -> usize {
        lock(&self.shared.state).timers.len()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        let on_daemon = {
            let mut state = lock(&self.shared.state);
            state.shutdown = true;
            self.shared.rearmed.notify_all();
            state.daemon == Some(std::thread::current().id())
        };
        if let Some(worker) = lock(&self.worker).take() {
            if !on_daemon {
                let _ = worker.join();
            }
        }
    }
}

fn run_daemon(shared: Arc<TimerShared>) {
    let mut state = lock(&shared.state);
    state.daemon = Some(std::thread::current().id());
    loop {
        if state.shutdown {
            return;
        }
        let now = StdInstant::now();
        let mut due: Option<(u64, StdInstant)> = None;
        let mut next: Option<StdInstant> = None;
        for (id, entry) in &state.timers {
            if let Some(deadline) = entry.deadline {
                if deadline <= now {
                    if due.map_or(true, |(_, earliest)| deadline < earliest) {
                        due = Some((*id, deadline));
                    }
                } else if next.map_or(true, |earliest| deadline < earliest) {
                    next = Some(deadline);
                }
            }
        }

        if let Some((id, _)) = due {
            let callback = match state.timers.get_mut(&id) {
                Some(entry) => {
                    entry.deadline = None;
                    entry.callback.clone()
                }
                None => continue,
            };
            state.firing = Some(id);
            drop(state);

            let handle = SimTimer {
                id,
                shared: Arc::clone(&shared),
            };
            callback(&handle);

            state = lock(&shared.state);
            state.firing = None;
            shared.idle.notify_all();
            continue;
        }

        state = match next {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(now);
                match shared.rearmed.wait_timeout(state, timeout) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                }
            }
            None => match shared.rearmed.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            },
        };
    }
}
