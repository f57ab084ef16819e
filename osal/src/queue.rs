//! Message queues
//!
//! Fixed-depth queues of byte messages no larger than the size given at
//! creation. Sending never blocks.

use crate::context::CallerContext;
use crate::error::{OsalError, OsalResult};
use crate::Osal;
use core_types::{ObjectId, ObjectKind, Timeout};
use kernel_api::{HostQueue, KernelError};
use serde::Serialize;
use std::sync::Arc;

pub struct QueueRecord {
    host: Arc<dyn HostQueue>,
    depth: usize,
    msg_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueInfo {
    pub name: String,
    pub creator: ObjectId,
    pub depth: usize,
    pub msg_size: usize,
    /// Messages waiting right now
    pub queued: usize,
}

impl Osal {
    pub fn queue_create(
        &self,
        caller: CallerContext,
        name: &str,
        depth: usize,
        msg_size: usize,
    ) -> OsalResult<ObjectId> {
        if depth == 0 || depth > self.config.queue_max_depth || msg_size == 0 {
            return Err(OsalError::QueueInvalidSize);
        }
        self.create_object(&self.queues, caller, Some(name), |_, _| {
            let host = self
                .kernel
                .create_queue(depth, msg_size)
                .map_err(|e| OsalError::allocation(ObjectKind::Queue, e))?;
            Ok(QueueRecord {
                host,
                depth,
                msg_size,
            })
        })
    }

    pub fn queue_delete(&self, id: ObjectId) -> OsalResult<()> {
        self.delete_object(&self.queues, id, |record| {
            record.payload().host.destroy();
            Ok(())
        })?;
        Ok(())
    }

    /// Enqueues a copy of `data`
    pub fn queue_put(&self, id: ObjectId, data: &[u8]) -> OsalResult<()> {
        let record = self.queues.lookup(id)?;
        let queue = record.payload();
        if data.len() > queue.msg_size {
            return Err(OsalError::QueueInvalidSize);
        }
        queue.host.send(data).map_err(|err| match err {
            KernelError::Full => OsalError::QueueFull,
            KernelError::MessageTooLarge { .. } => OsalError::QueueInvalidSize,
            other => OsalError::Failure(other.to_string()),
        })
    }

    /// Dequeues the oldest message
    ///
    /// [`Timeout::Check`] on an empty queue yields `QueueEmpty`; an expired
    /// timed wait yields `QueueTimeout`.
    pub fn queue_get(&self, id: ObjectId, timeout: Timeout) -> OsalResult<Vec<u8>> {
        let record = self.queues.lookup(id)?;
        let wait = self.clock.wait_for(timeout);
        record.payload().host.receive(wait).map_err(|err| match err {
            KernelError::Empty | KernelError::WouldBlock => OsalError::QueueEmpty,
            KernelError::Timeout => OsalError::QueueTimeout,
            other => OsalError::Failure(other.to_string()),
        })
    }

    pub fn queue_get_id_by_name(&self, name: &str) -> OsalResult<ObjectId> {
        Ok(self.queues.find_by_name(name)?)
    }

    pub fn queue_get_info(&self, id: ObjectId) -> OsalResult<QueueInfo> {
        let record = self.queues.lookup(id)?;
        let queue = record.payload();
        Ok(QueueInfo {
            name: record.name().unwrap_or_default().to_string(),
            creator: record.creator(),
            depth: queue.depth,
            msg_size: queue.msg_size,
            queued: queue.host.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use std::time::{Duration, Instant};

    #[test]
    fn test_put_and_get() {
        let osal = test_support::osal();
        let q = osal.queue_create(CallerContext::ROOT, "cmds", 4, 16).unwrap();
        osal.queue_put(q, b"first").unwrap();
        osal.queue_put(q, b"second").unwrap();

        assert_eq!(osal.queue_get_info(q).unwrap().queued, 2);
        assert_eq!(osal.queue_get(q, Timeout::Check).unwrap(), b"first");
        assert_eq!(osal.queue_get(q, Timeout::Pend).unwrap(), b"second");
    }

    #[test]
    fn test_size_limits() {
        let osal = test_support::osal();
        assert_eq!(
            osal.queue_create(CallerContext::ROOT, "zero", 0, 8),
            Err(OsalError::QueueInvalidSize)
        );
        assert_eq!(
            osal.queue_create(CallerContext::ROOT, "deep", 51, 8),
            Err(OsalError::QueueInvalidSize)
        );
        assert_eq!(
            osal.queue_create(CallerContext::ROOT, "empty", 4, 0),
            Err(OsalError::QueueInvalidSize)
        );

        let q = osal.queue_create(CallerContext::ROOT, "small", 1, 4).unwrap();
        assert_eq!(osal.queue_put(q, b"12345"), Err(OsalError::QueueInvalidSize));
        osal.queue_put(q, b"1234").unwrap();
        assert_eq!(osal.queue_put(q, b"x"), Err(OsalError::QueueFull));
    }

    #[test]
    fn test_empty_and_timeout() {
        let osal = test_support::osal();
        let q = osal.queue_create(CallerContext::ROOT, "idle", 2, 4).unwrap();
        assert_eq!(osal.queue_get(q, Timeout::Check), Err(OsalError::QueueEmpty));

        let start = Instant::now();
        assert_eq!(
            osal.queue_get(q, Timeout::Millis(30)),
            Err(OsalError::QueueTimeout)
        );
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_get_blocks_until_put() {
        let osal = test_support::osal();
        let q = osal.queue_create(CallerContext::ROOT, "handoff", 2, 8).unwrap();
        let sender = osal.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            sender.queue_put(q, b"ping").unwrap();
        });
        assert_eq!(osal.queue_get(q, Timeout::Millis(2000)).unwrap(), b"ping");
        handle.join().unwrap();
    }

    #[test]
    fn test_info_and_lookup() {
        let osal = test_support::osal();
        let q = osal.queue_create(CallerContext::ROOT, "telemetry", 8, 32).unwrap();
        assert_eq!(osal.queue_get_id_by_name("telemetry").unwrap(), q);
        let info = osal.queue_get_info(q).unwrap();
        assert_eq!(info.depth, 8);
        assert_eq!(info.msg_size, 32);
        assert_eq!(info.creator, ObjectId::UNDEFINED);

        osal.queue_delete(q).unwrap();
        assert_eq!(osal.queue_put(q, b"late"), Err(OsalError::InvalidId));
        assert_eq!(
            osal.queue_get_id_by_name("telemetry"),
            Err(OsalError::NameNotFound)
        );
    }
}
