//! # Timebases
//!
//! A timebase turns a tick source into a steady stream of "this much time
//! passed" notifications, and services the logical timers attached to it.
//!
//! ## Philosophy
//!
//! **Expiry posts a signal; a task does the work.**
//!
//! Without an external sync function the timebase is self-clocked: a
//! one-shot host timer fires after the start delay, re-arms itself for the
//! interval, and gives a binary semaphore each time. A dedicated helper
//! task waits on that semaphore and runs the attached timers' callbacks,
//! so callbacks may block.
//!
//! The helper reports the *nominal* elapsed time (the configured start
//! delay on the first tick after a reset, the interval afterwards), not
//! what the tick source actually delivered, so timers see a jitter-free
//! period.
//!
//! ## Teardown
//!
//! Deletion runs in the reverse of construction: host timer, helper task,
//! then the semaphore and lock. A construction failure undoes every step
//! already taken.

use crate::context::CallerContext;
use crate::error::{OsalError, OsalResult};
use crate::timer::TimerCallbackFn;
use crate::{lock, Osal};
use core_types::{ObjectId, ObjectKind};
use kernel_api::{
    HostKernel, HostMutex, HostSemaphore, HostTaskId, HostTimer, KernelError, TaskDescriptor,
    TickClock, TimerCallback, Wait,
};
use logger::Logger;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// Blocks until the next tick of an externally clocked timebase
///
/// Receives the timebase handle and returns the microseconds that elapsed.
/// Returning 0 skips timer servicing for that wake-up.
pub type ExternalSync = Arc<dyn Fn(ObjectId) -> u32 + Send + Sync + 'static>;

/// Expiries serviced per timer and tick before the backlog is dropped
const MAX_CATCH_UP: u32 = 10;

/// Timer periods and start delays must stay below this
pub(crate) const TIME_LIMIT_US: u32 = u32::MAX / 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimebaseInfo {
    pub name: String,
    pub creator: ObjectId,
    pub nominal_start_us: u32,
    pub nominal_interval_us: u32,
    /// Running total of nominal elapsed time (wraps)
    pub freerun_us: u32,
    /// Configured period rounded to host ticks
    pub accuracy_us: u32,
    /// Wake-ups the helper task has processed
    pub ticks_serviced: u64,
    pub external_sync: bool,
}

/// Posted by the host timer on every expiry
struct TickSignal {
    sem: Arc<dyn HostSemaphore>,
    /// Re-arm period; held across every host timer start or stop
    interval_ticks: Mutex<u64>,
}

impl TickSignal {
    /// Runs in the host timer's context: re-arm, then post
    fn on_expiry(&self, timer: &dyn HostTimer) {
        let interval = lock(&self.interval_ticks);
        if *interval > 0 {
            let _ = timer.start(*interval);
        }
        // A tick that is already pending absorbs this one
        let _ = self.sem.give();
    }

    /// Installs a new schedule; a zero start stops the host timer
    ///
    /// An expiry that fired under the old schedule either finished its
    /// re-arm before this runs or re-arms with the new interval.
    fn reprogram(
        &self,
        timer: &dyn HostTimer,
        start_ticks: u64,
        interval_ticks: u64,
    ) -> Result<(), KernelError> {
        let mut interval = lock(&self.interval_ticks);
        *interval = interval_ticks;
        // Drop a tick the old schedule already posted
        let _ = self.sem.take(Wait::Poll);
        if start_ticks == 0 {
            timer.stop()
        } else {
            timer.start(start_ticks)
        }
    }
}

#[derive(Debug, Default)]
struct Schedule {
    start_us: u32,
    interval_us: u32,
    accuracy_us: u32,
    reset_pending: bool,
}

/// One logical timer's countdown
pub(crate) struct TimerSlot {
    timer: ObjectId,
    callback: TimerCallbackFn,
    start_us: u32,
    interval_us: u32,
    /// Microseconds until the next expiry; disarmed at or below zero
    remaining_us: i64,
}

impl TimerSlot {
    pub(crate) fn new(timer: ObjectId, callback: TimerCallbackFn) -> Self {
        Self {
            timer,
            callback,
            start_us: 0,
            interval_us: 0,
            remaining_us: 0,
        }
    }

    /// A zero start delay means "first expiry after one interval"
    fn arm(&mut self, start_us: u32, interval_us: u32) {
        self.start_us = start_us;
        self.interval_us = interval_us;
        self.remaining_us = if start_us == 0 {
            i64::from(interval_us)
        } else {
            i64::from(start_us)
        };
    }

    /// Advances the countdown and returns how many expiries are due
    fn advance(&mut self, elapsed_us: u32) -> u32 {
        if self.remaining_us <= 0 {
            return 0;
        }
        self.remaining_us -= i64::from(elapsed_us);
        let mut fired = 0;
        while self.remaining_us <= 0 {
            fired += 1;
            if self.interval_us == 0 {
                break;
            }
            self.remaining_us += i64::from(self.interval_us);
            if fired >= MAX_CATCH_UP {
                self.remaining_us = i64::from(self.interval_us);
                break;
            }
        }
        fired
    }
}

/// State shared by the table entry, the helper task and attached timers
pub(crate) struct TimebaseShared {
    host_timer: Option<Arc<dyn HostTimer>>,
    signal: Arc<TickSignal>,
    handler_lock: Arc<dyn HostMutex>,
    helper: OnceLock<HostTaskId>,
    external_sync: Option<ExternalSync>,
    schedule: Mutex<Schedule>,
    timers: Mutex<Vec<TimerSlot>>,
    freerun_us: AtomicU32,
    ticks_serviced: AtomicU64,
}

impl TimebaseShared {
    /// True when called from this timebase's own helper task
    pub(crate) fn is_helper(&self, kernel: &dyn HostKernel) -> bool {
        match (kernel.current_task(), self.helper.get()) {
            (Some(current), Some(helper)) => current == *helper,
            _ => false,
        }
    }

    /// Runs `f` with the handler lock held, so the helper isn't servicing
    fn locked<R>(&self, f: impl FnOnce(&Self) -> R) -> OsalResult<R> {
        self.handler_lock
            .lock(Wait::Forever)
            .map_err(|e| OsalError::TimerInternal(e.to_string()))?;
        let result = f(self);
        self.handler_lock
            .unlock()
            .map_err(|e| OsalError::TimerInternal(e.to_string()))?;
        Ok(result)
    }

    pub(crate) fn attach(&self, slot: TimerSlot) -> OsalResult<()> {
        self.locked(|shared| lock(&shared.timers).push(slot))
    }

    pub(crate) fn detach(&self, timer: ObjectId) -> OsalResult<()> {
        self.locked(|shared| lock(&shared.timers).retain(|slot| slot.timer != timer))
    }

    pub(crate) fn arm_timer(&self, timer: ObjectId, start_us: u32, interval_us: u32) -> OsalResult<()> {
        let found = self.locked(|shared| {
            let mut timers = lock(&shared.timers);
            match timers.iter_mut().find(|slot| slot.timer == timer) {
                Some(slot) => {
                    slot.arm(start_us, interval_us);
                    true
                }
                None => false,
            }
        })?;
        if found {
            Ok(())
        } else {
            Err(OsalError::TimerId)
        }
    }

    /// Configured start and interval of an attached timer
    pub(crate) fn timer_settings(&self, timer: ObjectId) -> Option<(u32, u32)> {
        lock(&self.timers)
            .iter()
            .find(|slot| slot.timer == timer)
            .map(|slot| (slot.start_us, slot.interval_us))
    }

    pub(crate) fn attached_count(&self) -> usize {
        lock(&self.timers).len()
    }

    pub(crate) fn accuracy_us(&self) -> u32 {
        lock(&self.schedule).accuracy_us
    }

    /// Reprograms the tick source; a zero start disarms it
    fn program(&self, clock: &TickClock, start_us: u32, interval_us: u32) -> OsalResult<()> {
        let interval_us = if start_us == 0 { 0 } else { interval_us };
        let start_ticks = clock.micros_to_ticks(u64::from(start_us));
        let interval_ticks = clock.micros_to_ticks(u64::from(interval_us));

        self.locked(|shared| {
            {
                let mut schedule = lock(&shared.schedule);
                schedule.start_us = start_us;
                schedule.interval_us = interval_us;
                schedule.reset_pending = true;
                let period = if interval_ticks > 0 {
                    interval_ticks
                } else {
                    start_ticks
                };
                schedule.accuracy_us = clock.ticks_to_micros(period).min(u64::from(u32::MAX)) as u32;
            }
            let Some(timer) = &shared.host_timer else {
                return Ok(());
            };
            let start_ticks = if start_us == 0 { 0 } else { start_ticks.max(1) };
            shared.signal.reprogram(timer.as_ref(), start_ticks, interval_ticks)
        })?
        .map_err(|e| OsalError::TimerInternal(e.to_string()))
    }

    /// Blocks for the next self-clocked tick and returns its nominal length
    fn wait_for_tick(&self) -> Result<u32, KernelError> {
        self.signal.sem.take(Wait::Forever)?;
        let mut schedule = lock(&self.schedule);
        if schedule.reset_pending {
            schedule.reset_pending = false;
            Ok(schedule.start_us)
        } else {
            Ok(schedule.interval_us)
        }
    }

    /// Charges `elapsed_us` to every attached timer and runs what expired
    fn service(&self, elapsed_us: u32) -> Result<(), KernelError> {
        self.freerun_us.fetch_add(elapsed_us, Ordering::Relaxed);
        self.ticks_serviced.fetch_add(1, Ordering::Relaxed);

        self.handler_lock.lock(Wait::Forever)?;
        let due: Vec<(ObjectId, TimerCallbackFn)> = {
            let mut timers = lock(&self.timers);
            timers
                .iter_mut()
                .flat_map(|slot| {
                    let fired = slot.advance(elapsed_us);
                    std::iter::repeat((slot.timer, Arc::clone(&slot.callback))).take(fired as usize)
                })
                .collect()
        };
        for (timer, callback) in due {
            callback(timer);
        }
        self.handler_lock.unlock()
    }

    /// Releases the host primitives in reverse order of construction
    fn release(&self, kernel: &dyn HostKernel) {
        if let Some(timer) = &self.host_timer {
            timer.destroy();
        }
        if let Some(helper) = self.helper.get() {
            let _ = kernel.delete_task(*helper);
        }
        self.signal.sem.destroy();
        self.handler_lock.destroy();
    }
}

fn run_helper(kernel: Arc<dyn HostKernel>, shared: Arc<TimebaseShared>, id: ObjectId, logger: Logger) {
    loop {
        let elapsed_us = match &shared.external_sync {
            Some(sync) => sync(id),
            None => match shared.wait_for_tick() {
                Ok(elapsed) => elapsed,
                Err(_) => break,
            },
        };
        if kernel.cancellation_requested() {
            break;
        }
        if elapsed_us == 0 {
            continue;
        }
        if shared.service(elapsed_us).is_err() {
            break;
        }
    }
    logger.debug(|e| e.with_source(id), "timebase helper stopped");
}

pub struct TimebaseRecord {
    shared: Arc<TimebaseShared>,
}

impl TimebaseRecord {
    pub(crate) fn shared(&self) -> &Arc<TimebaseShared> {
        &self.shared
    }
}

impl Osal {
    /// Creates a timebase and its helper task
    ///
    /// With `external_sync` the helper calls it for every tick instead of
    /// waiting on a host timer.
    pub fn timebase_create(
        &self,
        caller: CallerContext,
        name: &str,
        external_sync: Option<ExternalSync>,
    ) -> OsalResult<ObjectId> {
        if self.kernel.current_task().is_some()
            && self
                .timebases
                .find(|record| record.payload().shared.is_helper(self.kernel.as_ref()))
                .is_some()
        {
            return Err(OsalError::IncorrectObjState);
        }
        self.create_object(&self.timebases, caller, Some(name), |id, display| {
            let shared = self.build_timebase(id, display, external_sync)?;
            Ok(TimebaseRecord { shared })
        })
    }

    fn build_timebase(
        &self,
        id: ObjectId,
        display: &str,
        external_sync: Option<ExternalSync>,
    ) -> OsalResult<Arc<TimebaseShared>> {
        let alloc = |err| OsalError::allocation(ObjectKind::TimeBase, err);

        let sem = self.kernel.create_binary_semaphore(0).map_err(alloc)?;
        let handler_lock = match self.kernel.create_mutex() {
            Ok(mutex) => mutex,
            Err(err) => {
                sem.destroy();
                return Err(alloc(err));
            }
        };
        let signal = Arc::new(TickSignal {
            sem,
            interval_ticks: Mutex::new(0),
        });

        let host_timer = if external_sync.is_none() {
            let tick = Arc::clone(&signal);
            let callback: TimerCallback = Arc::new(move |timer: &dyn HostTimer| tick.on_expiry(timer));
            match self.kernel.create_timer(display, callback) {
                Ok(timer) => Some(timer),
                Err(err) => {
                    handler_lock.destroy();
                    signal.sem.destroy();
                    return Err(alloc(err));
                }
            }
        } else {
            None
        };

        let shared = Arc::new(TimebaseShared {
            host_timer,
            signal,
            handler_lock,
            helper: OnceLock::new(),
            external_sync,
            schedule: Mutex::new(Schedule::default()),
            timers: Mutex::new(Vec::new()),
            freerun_us: AtomicU32::new(0),
            ticks_serviced: AtomicU64::new(0),
        });

        let descriptor = TaskDescriptor::new(display)
            .with_stack_size(self.config.timebase_task_stack_size)
            .with_priority(self.config.host_priority(self.config.timebase_task_priority));
        let helper = {
            let kernel = Arc::clone(&self.kernel);
            let shared = Arc::clone(&shared);
            let logger = self.logger.clone();
            Box::new(move || run_helper(kernel, shared, id, logger))
        };
        match self.kernel.spawn_task(descriptor, helper) {
            Ok(task) => {
                let _ = shared.helper.set(task);
                Ok(shared)
            }
            Err(err) => {
                shared.release(self.kernel.as_ref());
                Err(alloc(err))
            }
        }
    }

    /// Programs the tick source of a timebase
    ///
    /// `start_us == 0` stops it (and forces the interval to 0). Otherwise
    /// the first tick comes after `start_us` and then every `interval_us`;
    /// a zero interval makes it one-shot.
    pub fn timebase_set(&self, id: ObjectId, start_us: u32, interval_us: u32) -> OsalResult<()> {
        if start_us >= TIME_LIMIT_US || interval_us >= TIME_LIMIT_US {
            return Err(OsalError::TimerInvalidArgs);
        }
        let record = self.timebases.lookup(id)?;
        let shared = &record.payload().shared;
        if shared.is_helper(self.kernel.as_ref()) {
            return Err(OsalError::IncorrectObjState);
        }
        shared.program(&self.clock, start_us, interval_us)
    }

    /// Deletes a timebase that has no timers attached
    pub fn timebase_delete(&self, id: ObjectId) -> OsalResult<()> {
        let record = self.timebases.lookup(id)?;
        let shared = &record.payload().shared;
        if shared.is_helper(self.kernel.as_ref()) {
            return Err(OsalError::IncorrectObjState);
        }
        if shared.attached_count() > 0 {
            return Err(OsalError::ObjectInUse);
        }
        self.delete_object(&self.timebases, id, |record| {
            if record.payload().shared.attached_count() > 0 {
                return Err(OsalError::ObjectInUse);
            }
            record.payload().shared.release(self.kernel.as_ref());
            Ok(())
        })?;
        Ok(())
    }

    pub fn timebase_get_info(&self, id: ObjectId) -> OsalResult<TimebaseInfo> {
        let record = self.timebases.lookup(id)?;
        let shared = &record.payload().shared;
        let schedule = lock(&shared.schedule);
        Ok(TimebaseInfo {
            name: record.name().unwrap_or_default().to_string(),
            creator: record.creator(),
            nominal_start_us: schedule.start_us,
            nominal_interval_us: schedule.interval_us,
            freerun_us: shared.freerun_us.load(Ordering::Relaxed),
            accuracy_us: schedule.accuracy_us,
            ticks_serviced: shared.ticks_serviced.load(Ordering::Relaxed),
            external_sync: shared.external_sync.is_some(),
        })
    }

    /// Free-running microsecond counter of a timebase
    pub fn timebase_get_freerun(&self, id: ObjectId) -> OsalResult<u32> {
        let record = self.timebases.lookup(id)?;
        Ok(record.payload().shared.freerun_us.load(Ordering::Relaxed))
    }

    pub fn timebase_get_id_by_name(&self, name: &str) -> OsalResult<ObjectId> {
        Ok(self.timebases.find_by_name(name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use logger::LogLevel;
    use sim_kernel::fault_injection::{Fault, FaultPlan, Primitive};
    use sim_kernel::test_utils::{kernel_with_faults, wait_until};
    use sim_kernel::SimulatedKernel;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    /// Host timer whose `start` stalls, widening the re-arm window
    #[derive(Default)]
    struct SlowStartTimer {
        armed: Mutex<Option<u64>>,
        starting: AtomicBool,
    }

    impl HostTimer for SlowStartTimer {
        fn start(&self, ticks: u64) -> Result<(), KernelError> {
            self.starting.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
            *lock(&self.armed) = Some(ticks);
            Ok(())
        }

        fn stop(&self) -> Result<(), KernelError> {
            *lock(&self.armed) = None;
            Ok(())
        }

        fn is_active(&self) -> bool {
            lock(&self.armed).is_some()
        }

        fn destroy(&self) {
            *lock(&self.armed) = None;
        }
    }

    fn slot(interval_us: u32, start_us: u32) -> TimerSlot {
        let mut slot = TimerSlot::new(ObjectId::UNDEFINED, Arc::new(|_| {}));
        slot.arm(start_us, interval_us);
        slot
    }

    #[test]
    fn test_slot_periodic_countdown() {
        let mut periodic = slot(10_000, 25_000);
        assert_eq!(periodic.advance(10_000), 0);
        assert_eq!(periodic.advance(10_000), 0);
        assert_eq!(periodic.advance(10_000), 1);
        assert_eq!(periodic.remaining_us, 5_000);
        assert_eq!(periodic.advance(10_000), 1);
    }

    #[test]
    fn test_slot_one_shot_disarms() {
        let mut once = slot(0, 5_000);
        assert_eq!(once.advance(10_000), 1);
        assert_eq!(once.advance(10_000), 0);
        assert_eq!(once.advance(10_000), 0);
    }

    #[test]
    fn test_slot_zero_start_waits_one_interval() {
        let mut late = slot(20_000, 0);
        assert_eq!(late.advance(10_000), 0);
        assert_eq!(late.advance(10_000), 1);
    }

    #[test]
    fn test_slot_catch_up_is_bounded() {
        let mut fast = slot(1_000, 1_000);
        assert_eq!(fast.advance(1_000_000), MAX_CATCH_UP);
        assert_eq!(fast.remaining_us, 1_000);
    }

    #[test]
    fn test_unset_slot_never_fires() {
        let mut idle = TimerSlot::new(ObjectId::UNDEFINED, Arc::new(|_| {}));
        assert_eq!(idle.advance(1_000), 0);
    }

    #[test]
    fn test_disarm_wins_over_rearm_in_flight() {
        let kernel = SimulatedKernel::new();
        let signal = Arc::new(TickSignal {
            sem: kernel.create_binary_semaphore(0).unwrap(),
            interval_ticks: Mutex::new(10),
        });
        let timer = Arc::new(SlowStartTimer::default());

        let expiry = {
            let signal = Arc::clone(&signal);
            let timer = Arc::clone(&timer);
            std::thread::spawn(move || signal.on_expiry(timer.as_ref()))
        };
        assert!(wait_until(Duration::from_secs(1), || timer.starting.load(Ordering::SeqCst)));
        signal.reprogram(timer.as_ref(), 0, 0).unwrap();
        expiry.join().unwrap();

        assert!(!timer.is_active());
        assert_eq!(*lock(&signal.interval_ticks), 0);
        // The tick posted under the old schedule was dropped
        assert_eq!(signal.sem.value(), 0);
    }

    #[test]
    fn test_reprogram_replaces_period_of_in_flight_expiry() {
        let kernel = SimulatedKernel::new();
        let signal = Arc::new(TickSignal {
            sem: kernel.create_binary_semaphore(0).unwrap(),
            interval_ticks: Mutex::new(10),
        });
        let timer = Arc::new(SlowStartTimer::default());

        let expiry = {
            let signal = Arc::clone(&signal);
            let timer = Arc::clone(&timer);
            std::thread::spawn(move || signal.on_expiry(timer.as_ref()))
        };
        assert!(wait_until(Duration::from_secs(1), || timer.starting.load(Ordering::SeqCst)));
        signal.reprogram(timer.as_ref(), 7, 50).unwrap();
        expiry.join().unwrap();

        assert_eq!(*lock(&timer.armed), Some(7));
        assert_eq!(*lock(&signal.interval_ticks), 50);
    }

    #[test]
    fn test_self_clocked_ticks() {
        let osal = test_support::osal();
        let tb = osal.timebase_create(CallerContext::ROOT, "tick10", None).unwrap();
        osal.timebase_set(tb, 10_000, 10_000).unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            osal.timebase_get_info(tb).unwrap().ticks_serviced >= 3
        }));
        let info = osal.timebase_get_info(tb).unwrap();
        assert_eq!(info.nominal_interval_us, 10_000);
        assert_eq!(info.accuracy_us, 10_000);
        assert!(info.freerun_us >= 30_000);
        assert_eq!(info.freerun_us % 10_000, 0);

        osal.timebase_delete(tb).unwrap();
        assert_eq!(osal.timebase_get_info(tb), Err(OsalError::InvalidId));
    }

    #[test]
    fn test_zero_start_disarms() {
        let osal = test_support::osal();
        let tb = osal.timebase_create(CallerContext::ROOT, "off", None).unwrap();
        osal.timebase_set(tb, 0, 5_000).unwrap();
        let info = osal.timebase_get_info(tb).unwrap();
        assert_eq!(info.nominal_interval_us, 0);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(osal.timebase_get_info(tb).unwrap().ticks_serviced, 0);
    }

    #[test]
    fn test_external_sync_drives_helper() {
        let osal = test_support::osal();
        let sync: ExternalSync = Arc::new(|_| {
            std::thread::sleep(Duration::from_millis(2));
            500
        });
        let tb = osal
            .timebase_create(CallerContext::ROOT, "ext", Some(sync))
            .unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            osal.timebase_get_freerun(tb).unwrap() >= 2_000
        }));
        assert!(osal.timebase_get_info(tb).unwrap().external_sync);
    }

    #[test]
    fn test_invalid_arguments() {
        let osal = test_support::osal();
        let tb = osal.timebase_create(CallerContext::ROOT, "args", None).unwrap();
        assert_eq!(
            osal.timebase_set(tb, TIME_LIMIT_US, 10),
            Err(OsalError::TimerInvalidArgs)
        );
        assert_eq!(
            osal.timebase_create(CallerContext::ROOT, "args", None),
            Err(OsalError::NameTaken)
        );
        assert_eq!(osal.timebase_get_id_by_name("args").unwrap(), tb);
    }

    #[test]
    fn test_rollback_on_timer_failure() {
        let kernel = kernel_with_faults(FaultPlan::new().with_fault(Fault::FailCreate {
            primitive: Primitive::Timer,
            nth: 1,
        }));
        let sink = Arc::new(logger::MemorySink::new());
        let osal = Osal::builder(kernel.clone())
            .with_log_sink(sink.clone())
            .build()
            .unwrap();

        let err = osal
            .timebase_create(CallerContext::ROOT, "fails", None)
            .unwrap_err();
        assert!(matches!(
            err,
            OsalError::AllocationFailed {
                kind: ObjectKind::TimeBase,
                ..
            }
        ));
        assert_eq!(err.code(), OsalError::TIMER_ERR_INTERNAL);
        assert_eq!(osal.free_slots(ObjectKind::TimeBase), osal.config().max_timebases);
        assert_eq!(kernel.timer_count(), 0);
        assert_eq!(sink.entries_at(LogLevel::Error).len(), 1);

        // The name is free again
        osal.timebase_create(CallerContext::ROOT, "fails", None).unwrap();
    }
}
