//! Recursive mutexes

use crate::context::CallerContext;
use crate::error::{OsalError, OsalResult};
use crate::Osal;
use core_types::{ObjectId, ObjectKind};
use kernel_api::{HostMutex, Wait};
use serde::Serialize;
use std::sync::Arc;

pub struct MutexRecord {
    host: Arc<dyn HostMutex>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutexInfo {
    pub name: String,
    pub creator: ObjectId,
}

impl Osal {
    pub fn mut_sem_create(&self, caller: CallerContext, name: &str) -> OsalResult<ObjectId> {
        self.create_object(&self.mutexes, caller, Some(name), |_, _| {
            let host = self
                .kernel
                .create_mutex()
                .map_err(|e| OsalError::allocation(ObjectKind::Mutex, e))?;
            Ok(MutexRecord { host })
        })
    }

    /// Deletes the mutex even while held; blocked takers fail
    pub fn mut_sem_delete(&self, id: ObjectId) -> OsalResult<()> {
        self.delete_object(&self.mutexes, id, |record| {
            record.payload().host.destroy();
            Ok(())
        })?;
        Ok(())
    }

    /// Releases one level of ownership; only the owner may give
    pub fn mut_sem_give(&self, id: ObjectId) -> OsalResult<()> {
        let record = self.mutexes.lookup(id)?;
        record
            .payload()
            .host
            .unlock()
            .map_err(|_| OsalError::SemFailure)
    }

    pub fn mut_sem_take(&self, id: ObjectId) -> OsalResult<()> {
        let record = self.mutexes.lookup(id)?;
        record
            .payload()
            .host
            .lock(Wait::Forever)
            .map_err(|_| OsalError::SemFailure)
    }

    pub fn mut_sem_get_info(&self, id: ObjectId) -> OsalResult<MutexInfo> {
        let record = self.mutexes.lookup(id)?;
        Ok(MutexInfo {
            name: record.name().unwrap_or_default().to_string(),
            creator: record.creator(),
        })
    }

    pub fn mut_sem_get_id_by_name(&self, name: &str) -> OsalResult<ObjectId> {
        Ok(self.mutexes.find_by_name(name)?)
    }
}
