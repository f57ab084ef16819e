//! Logical timers
//!
//! A timer is a countdown attached to a timebase; its callback runs in
//! the timebase's helper task. [`Osal::timer_create`] gives a timer its own
//! dedicated timebase (of the same name) whose tick follows the timer's
//! settings; [`Osal::timer_add`] shares an existing one.

use crate::context::CallerContext;
use crate::error::{OsalError, OsalResult};
use crate::timebase::{TimebaseShared, TimerSlot, TIME_LIMIT_US};
use crate::Osal;
use core_types::ObjectId;
use serde::Serialize;
use std::sync::Arc;

/// Timer callback, handed the timer's own handle
pub type TimerCallbackFn = Arc<dyn Fn(ObjectId) + Send + Sync + 'static>;

pub struct TimerRecord {
    timebase: ObjectId,
    dedicated: bool,
    shared: Arc<TimebaseShared>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimerInfo {
    pub name: String,
    pub creator: ObjectId,
    pub timebase: ObjectId,
    pub start_us: u32,
    pub interval_us: u32,
    pub accuracy_us: u32,
}

impl Osal {
    /// Creates a timer on a dedicated timebase of the same name
    pub fn timer_create<F>(&self, caller: CallerContext, name: &str, callback: F) -> OsalResult<ObjectId>
    where
        F: Fn(ObjectId) + Send + Sync + 'static,
    {
        self.timers.validate_name(name)?;
        if self.timers.find_by_name(name).is_ok() {
            return Err(OsalError::NameTaken);
        }
        let timebase = self.timebase_create(caller, name, None)?;
        match self.attach_timer(caller, name, timebase, true, Arc::new(callback)) {
            Ok(id) => Ok(id),
            Err(err) => {
                if let Err(cleanup) = self.timebase_delete(timebase) {
                    self.logger.error(
                        |e| e.with_source(timebase).with_field("error", &cleanup),
                        "dedicated timebase left behind",
                    );
                }
                Err(err)
            }
        }
    }

    /// Attaches a new timer to an existing timebase
    pub fn timer_add<F>(
        &self,
        caller: CallerContext,
        name: &str,
        timebase: ObjectId,
        callback: F,
    ) -> OsalResult<ObjectId>
    where
        F: Fn(ObjectId) + Send + Sync + 'static,
    {
        self.attach_timer(caller, name, timebase, false, Arc::new(callback))
    }

    fn attach_timer(
        &self,
        caller: CallerContext,
        name: &str,
        timebase: ObjectId,
        dedicated: bool,
        callback: TimerCallbackFn,
    ) -> OsalResult<ObjectId> {
        let shared = Arc::clone(self.timebases.lookup(timebase)?.payload().shared());
        if shared.is_helper(self.kernel.as_ref()) {
            return Err(OsalError::IncorrectObjState);
        }
        self.create_object(&self.timers, caller, Some(name), |id, _| {
            shared.attach(TimerSlot::new(id, callback))?;
            Ok(TimerRecord {
                timebase,
                dedicated,
                shared: Arc::clone(&shared),
            })
        })
    }

    /// Arms a timer
    ///
    /// The first expiry comes after `start_us` (or after one interval when
    /// `start_us` is 0), then every `interval_us`; a zero interval makes it
    /// one-shot.
    pub fn timer_set(&self, id: ObjectId, start_us: u32, interval_us: u32) -> OsalResult<()> {
        if (start_us == 0 && interval_us == 0)
            || start_us >= TIME_LIMIT_US
            || interval_us >= TIME_LIMIT_US
        {
            return Err(OsalError::TimerInvalidArgs);
        }
        let record = self.timers.lookup(id)?;
        let timer = record.payload();
        if timer.shared.is_helper(self.kernel.as_ref()) {
            return Err(OsalError::IncorrectObjState);
        }
        timer.shared.arm_timer(id, start_us, interval_us)?;
        if timer.dedicated {
            let first = if start_us == 0 { interval_us } else { start_us };
            self.timebase_set(timer.timebase, first, interval_us)?;
        }
        Ok(())
    }

    /// Deletes a timer, and its timebase when that was dedicated to it
    pub fn timer_delete(&self, id: ObjectId) -> OsalResult<()> {
        let record = self.timers.lookup(id)?;
        if record.payload().shared.is_helper(self.kernel.as_ref()) {
            return Err(OsalError::IncorrectObjState);
        }
        let record = self.delete_object(&self.timers, id, |record| {
            record.payload().shared.detach(id)
        })?;
        let timer = record.payload();
        if timer.dedicated {
            self.timebase_delete(timer.timebase)?;
        }
        Ok(())
    }

    pub fn timer_get_info(&self, id: ObjectId) -> OsalResult<TimerInfo> {
        let record = self.timers.lookup(id)?;
        let timer = record.payload();
        let (start_us, interval_us) = timer.shared.timer_settings(id).unwrap_or((0, 0));
        Ok(TimerInfo {
            name: record.name().unwrap_or_default().to_string(),
            creator: record.creator(),
            timebase: timer.timebase,
            start_us,
            interval_us,
            accuracy_us: timer.shared.accuracy_us(),
        })
    }

    pub fn timer_get_id_by_name(&self, name: &str) -> OsalResult<ObjectId> {
        Ok(self.timers.find_by_name(name)?)
    }
}
