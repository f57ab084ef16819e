//! Platform hooks: the idle loop, and capabilities the host doesn't offer
//!
//! The interrupt, heap and FPU calls answer `NotImplemented` so
//! applications can check for the capability instead of getting a silent
//! no-op.

use crate::error::{OsalError, OsalResult};
use crate::{lock, Osal};
use kernel_api::{HostSemaphore, Wait};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Heap statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapInfo {
    pub free_bytes: usize,
    pub free_blocks: usize,
    pub largest_free_block: usize,
}

impl Osal {
    fn shutdown_gate(&self) -> OsalResult<Arc<dyn HostSemaphore>> {
        let mut gate = lock(&self.shutdown_gate);
        if let Some(sem) = gate.as_ref() {
            return Ok(Arc::clone(sem));
        }
        let sem = self
            .kernel
            .create_binary_semaphore(0)
            .map_err(|e| OsalError::Failure(e.to_string()))?;
        *gate = Some(Arc::clone(&sem));
        Ok(sem)
    }

    /// Parks the calling thread until shutdown is requested
    ///
    /// Meant for the startup thread once the application's tasks are
    /// running. Wake-ups without a shutdown request go back to sleep.
    pub fn idle_loop(&self) -> OsalResult<()> {
        let gate = self.shutdown_gate()?;
        while !self.shutdown_requested() {
            gate.take(Wait::Forever)
                .map_err(|e| OsalError::Failure(e.to_string()))?;
        }
        self.logger.info(|e| e, "idle loop released for shutdown");
        Ok(())
    }

    /// Wakes [`Osal::idle_loop`]; `should_shutdown` makes it return
    pub fn application_shutdown(&self, should_shutdown: bool) -> OsalResult<()> {
        if should_shutdown {
            self.shutdown_requested.store(true, Ordering::Release);
        }
        self.shutdown_gate()?
            .give()
            .map_err(|e| OsalError::Failure(e.to_string()))
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    pub fn int_attach_handler<F>(&self, _vector: u32, _handler: F) -> OsalResult<()>
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        Err(OsalError::NotImplemented("interrupt attach"))
    }

    pub fn int_lock(&self) -> OsalResult<u32> {
        Err(OsalError::NotImplemented("interrupt lock"))
    }

    pub fn int_unlock(&self, _level: u32) -> OsalResult<()> {
        Err(OsalError::NotImplemented("interrupt unlock"))
    }

    pub fn int_enable(&self, _level: u32) -> OsalResult<()> {
        Err(OsalError::NotImplemented("interrupt enable"))
    }

    pub fn int_disable(&self, _level: u32) -> OsalResult<()> {
        Err(OsalError::NotImplemented("interrupt disable"))
    }

    pub fn int_set_mask(&self, _mask: u32) -> OsalResult<()> {
        Err(OsalError::NotImplemented("interrupt mask"))
    }

    pub fn int_get_mask(&self) -> OsalResult<u32> {
        Err(OsalError::NotImplemented("interrupt mask"))
    }

    pub fn heap_get_info(&self) -> OsalResult<HeapInfo> {
        Err(OsalError::NotImplemented("heap info"))
    }

    pub fn fpu_exc_attach_handler<F>(&self, _trap: u32, _handler: F) -> OsalResult<()>
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        Err(OsalError::NotImplemented("fpu exception handler"))
    }

    pub fn fpu_exc_enable(&self, _trap: u32) -> OsalResult<()> {
        Err(OsalError::NotImplemented("fpu exception enable"))
    }

    pub fn fpu_exc_disable(&self, _trap: u32) -> OsalResult<()> {
        Err(OsalError::NotImplemented("fpu exception disable"))
    }

    pub fn fpu_exc_set_mask(&self, _mask: u32) -> OsalResult<()> {
        Err(OsalError::NotImplemented("fpu exception mask"))
    }

    pub fn fpu_exc_get_mask(&self) -> OsalResult<u32> {
        Err(OsalError::NotImplemented("fpu exception mask"))
    }
}
