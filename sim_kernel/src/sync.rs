//! Semaphores and recursive mutexes on `Mutex` + `Condvar`

use crate::clock::{Deadline, SimClock};
use crate::{lock, tasks};
use kernel_api::{HostMutex, HostSemaphore, KernelError, Wait};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::ThreadId;
use std::time::{Duration as StdDuration, Instant as StdInstant};

/// Longest a blocked task sleeps before re-checking its cancellation flag
pub(crate) const CANCEL_POLL_SLICE: StdDuration = StdDuration::from_millis(5);

/// Blocks on `condvar` until `attempt` produces a result
///
/// `attempt` runs under the lock each time the state may have changed and
/// returns `None` while the caller must keep waiting. An expired deadline
/// yields [`KernelError::Timeout`]; [`Deadline::Now`] yields
/// [`KernelError::WouldBlock`] so callers can tell a poll from a timed wait.
pub(crate) fn block_on<S, T>(
    mut guard: MutexGuard<'_, S>,
    condvar: &Condvar,
    deadline: Deadline,
    mut attempt: impl FnMut(&mut S) -> Option<Result<T, KernelError>>,
) -> Result<T, KernelError> {
    loop {
        if let Some(result) = attempt(&mut guard) {
            return result;
        }
        let slice = match deadline {
            Deadline::Now => return Err(KernelError::WouldBlock),
            Deadline::Never => CANCEL_POLL_SLICE,
            Deadline::At(at) => {
                let now = StdInstant::now();
                if now >= at {
                    return Err(KernelError::Timeout);
                }
                (at - now).min(CANCEL_POLL_SLICE)
            }
        };
        tasks::check_cancelled()?;
        guard = match condvar.wait_timeout(guard, slice) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        };
    }
}

#[derive(Debug)]
struct SemState {
    count: u32,
    max: u32,
    destroyed: bool,
}

/// Counting semaphore; a binary semaphore is one with `max == 1`
#[derive(Debug)]
pub struct SimSemaphore {
    clock: SimClock,
    state: Mutex<SemState>,
    available: Condvar,
}

impl SimSemaphore {
    pub fn new(clock: SimClock, max: u32, initial: u32) -> Self {
        let max = max.max(1);
        Self {
            clock,
            state: Mutex::new(SemState {
                count: initial.min(max),
                max,
                destroyed: false,
            }),
            available: Condvar::new(),
        }
    }

    pub fn binary(clock: SimClock, initial: u32) -> Self {
        Self::new(clock, 1, initial)
    }
}

impl HostSemaphore for SimSemaphore {
    fn give(&self) -> Result<(), KernelError> {
        let mut state = lock(&self.state);
        if state.destroyed {
            return Err(KernelError::Destroyed);
        }
        if state.count >= state.max {
            return Err(KernelError::Overflow);
        }
        state.count += 1;
        self.available.notify_one();
        Ok(())
    }

    fn take(&self, wait: Wait) -> Result<(), KernelError> {
        let state = lock(&self.state);
        let result = block_on(state, &self.available, self.clock.deadline(wait), |s| {
            if s.destroyed {
                Some(Err(KernelError::Destroyed))
            } else if s.count > 0 {
                s.count -= 1;
                Some(Ok(()))
            } else {
                None
            }
        });
        match result {
            Err(KernelError::WouldBlock) => Err(KernelError::Timeout),
            other => other,
        }
    }

    fn value(&self) -> u32 {
        lock(&self.state).count
    }

    fn destroy(&self) {
        lock(&self.state).destroyed = true;
        self.available.notify_all();
    }
}

#[derive(Debug, Default)]
struct MutexState {
    owner: Option<ThreadId>,
    depth: u32,
    destroyed: bool,
}

/// Recursive mutex owned by the locking thread
#[derive(Debug)]
pub struct SimMutex {
    clock: SimClock,
    state: Mutex<MutexState>,
    released: Condvar,
}

impl SimMutex {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            state: Mutex::new(MutexState::default()),
            released: Condvar::new(),
        }
    }

    /// Recursion depth held by the current owner
    pub fn depth(&self) -> u32 {
        lock(&self.state).depth
    }
}

impl HostMutex for SimMutex {
    fn lock(&self, wait: Wait) -> Result<(), KernelError> {
        let me = std::thread::current().id();
        let state = lock(&self.state);
        let result = block_on(state, &self.released, self.clock.deadline(wait), |s| {
            if s.destroyed {
                return Some(Err(KernelError::Destroyed));
            }
            match s.owner {
                Some(owner) if owner == me => {
                    s.depth += 1;
                    Some(Ok(()))
                }
                Some(_) => None,
                None => {
                    s.owner = Some(me);
                    s.depth = 1;
                    Some(Ok(()))
                }
            }
        });
        match result {
            Err(KernelError::WouldBlock) => Err(KernelError::Timeout),
            other => other,
        }
    }

    fn unlock(&self) -> Result<(), KernelError> {
        let me = std::thread::current().id();
        let mut state = lock(&self.state);
        if state.destroyed {
            return Err(KernelError::Destroyed);
        }
        if state.owner != Some(me) {
            return Err(KernelError::NotOwner);
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            self.released.notify_one();
        }
        Ok(())
    }

    fn destroy(&self) {
        lock(&self.state).destroyed = true;
        self.released.notify_all();
    }
}
