//! Binary and counting semaphores
//!
//! Both kinds share one payload; they differ in their limits and in what
//! giving past the limit means. A binary semaphore absorbs extra gives, a
//! counting semaphore reports them.

use crate::context::CallerContext;
use crate::error::{OsalError, OsalResult};
use crate::Osal;
use core_types::{ObjectId, ObjectKind};
use kernel_api::{HostSemaphore, KernelError, Wait};
use resources::ResourceTable;
use serde::Serialize;
use std::sync::Arc;

/// Largest count a counting semaphore can hold
pub const MAX_SEM_VALUE: u32 = 0x7FFF_FFFF;

pub struct SemRecord {
    host: Arc<dyn HostSemaphore>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SemInfo {
    pub name: String,
    pub creator: ObjectId,
    pub value: u32,
}

fn take(host: &dyn HostSemaphore, wait: Wait) -> OsalResult<()> {
    host.take(wait).map_err(|err| match err {
        KernelError::Timeout | KernelError::WouldBlock => OsalError::SemTimeout,
        _ => OsalError::SemFailure,
    })
}

fn info(table: &ResourceTable<SemRecord>, id: ObjectId) -> OsalResult<SemInfo> {
    let record = table.lookup(id)?;
    Ok(SemInfo {
        name: record.name().unwrap_or_default().to_string(),
        creator: record.creator(),
        value: record.payload().host.value(),
    })
}

impl Osal {
    fn sem_delete(&self, table: &ResourceTable<SemRecord>, id: ObjectId) -> OsalResult<()> {
        self.delete_object(table, id, |record| {
            record.payload().host.destroy();
            Ok(())
        })?;
        Ok(())
    }

    /// Creates a binary semaphore; `initial` values above 1 count as 1
    pub fn bin_sem_create(
        &self,
        caller: CallerContext,
        name: &str,
        initial: u32,
    ) -> OsalResult<ObjectId> {
        let initial = initial.min(1);
        self.create_object(&self.bin_sems, caller, Some(name), |_, _| {
            let host = self
                .kernel
                .create_binary_semaphore(initial)
                .map_err(|e| OsalError::allocation(ObjectKind::BinSem, e))?;
            Ok(SemRecord { host })
        })
    }

    pub fn bin_sem_delete(&self, id: ObjectId) -> OsalResult<()> {
        self.sem_delete(&self.bin_sems, id)
    }

    /// Gives the semaphore; giving one that is already full is not an error
    pub fn bin_sem_give(&self, id: ObjectId) -> OsalResult<()> {
        let record = self.bin_sems.lookup(id)?;
        match record.payload().host.give() {
            Ok(()) | Err(KernelError::Overflow) => Ok(()),
            Err(_) => Err(OsalError::SemFailure),
        }
    }

    pub fn bin_sem_take(&self, id: ObjectId) -> OsalResult<()> {
        let record = self.bin_sems.lookup(id)?;
        take(record.payload().host.as_ref(), Wait::Forever)
    }

    pub fn bin_sem_timed_wait(&self, id: ObjectId, millis: u32) -> OsalResult<()> {
        let record = self.bin_sems.lookup(id)?;
        let wait = Wait::Ticks(self.clock.millis_to_ticks(millis));
        take(record.payload().host.as_ref(), wait)
    }

    /// Releasing every waiter at once isn't offered by the host
    pub fn bin_sem_flush(&self, id: ObjectId) -> OsalResult<()> {
        self.bin_sems.lookup(id)?;
        Err(OsalError::NotImplemented("binary semaphore flush"))
    }

    pub fn bin_sem_get_info(&self, id: ObjectId) -> OsalResult<SemInfo> {
        info(&self.bin_sems, id)
    }

    pub fn bin_sem_get_id_by_name(&self, name: &str) -> OsalResult<ObjectId> {
        Ok(self.bin_sems.find_by_name(name)?)
    }

    pub fn count_sem_create(
        &self,
        caller: CallerContext,
        name: &str,
        initial: u32,
    ) -> OsalResult<ObjectId> {
        if initial > MAX_SEM_VALUE {
            return Err(OsalError::InvalidSemValue(initial));
        }
        self.create_object(&self.count_sems, caller, Some(name), |_, _| {
            let host = self
                .kernel
                .create_counting_semaphore(MAX_SEM_VALUE, initial)
                .map_err(|e| OsalError::allocation(ObjectKind::CountSem, e))?;
            Ok(SemRecord { host })
        })
    }

    pub fn count_sem_delete(&self, id: ObjectId) -> OsalResult<()> {
        self.sem_delete(&self.count_sems, id)
    }

    /// Gives the semaphore; fails at [`MAX_SEM_VALUE`]
    pub fn count_sem_give(&self, id: ObjectId) -> OsalResult<()> {
        let record = self.count_sems.lookup(id)?;
        record
            .payload()
            .host
            .give()
            .map_err(|_| OsalError::SemFailure)
    }

    pub fn count_sem_take(&self, id: ObjectId) -> OsalResult<()> {
        let record = self.count_sems.lookup(id)?;
        take(record.payload().host.as_ref(), Wait::Forever)
    }

    pub fn count_sem_timed_wait(&self, id: ObjectId, millis: u32) -> OsalResult<()> {
        let record = self.count_sems.lookup(id)?;
        let wait = Wait::Ticks(self.clock.millis_to_ticks(millis));
        take(record.payload().host.as_ref(), wait)
    }

    pub fn count_sem_get_info(&self, id: ObjectId) -> OsalResult<SemInfo> {
        info(&self.count_sems, id)
    }

    pub fn count_sem_get_id_by_name(&self, name: &str) -> OsalResult<ObjectId> {
        Ok(self.count_sems.find_by_name(name)?)
    }
}
