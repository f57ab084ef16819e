//! Readiness multiplexing
//!
//! The host offers a single blocking wait over a socket set. This module
//! builds that set from one stream or from read/write bitmaps, waits once,
//! and translates the host's answer back.
//!
//! ## Disconnects
//!
//! A peer's orderly close is not a readiness event on the host. Before and
//! after each wait the connection state of every socket is probed; once a
//! connected socket is seen disconnected it latches `disconnected`, and
//! from then on it reports every requested direction as ready so the
//! caller reads the end of stream instead of timing out forever. Only
//! [`Osal::stream_clear_disconnect`] resets the latch.

use crate::error::{OsalError, OsalResult};
use crate::stream::{SocketStream, StreamRecord};
use crate::Osal;
use core_types::{ObjectId, ObjectKind, StreamState, Timeout};
use kernel_api::{HostNetStack, KernelError, SelectBits, SocketSet, Wait};
use resources::Record;
use std::sync::Arc;

/// Bitmap of streams, indexed by slot index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FdSet {
    bits: [u64; FdSet::WORDS],
}

impl FdSet {
    const WORDS: usize = 4;

    /// Streams a set can hold
    pub const CAPACITY: usize = Self::WORDS * 64;

    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a stream; anything that isn't a stream handle is rejected
    pub fn insert(&mut self, id: ObjectId) -> OsalResult<()> {
        let index = Self::checked_index(id)?;
        self.bits[index / 64] |= 1 << (index % 64);
        Ok(())
    }

    pub fn remove(&mut self, id: ObjectId) -> OsalResult<()> {
        let index = Self::checked_index(id)?;
        self.clear_index(index);
        Ok(())
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        match Self::checked_index(id) {
            Ok(index) => self.contains_index(index),
            Err(_) => false,
        }
    }

    pub fn clear(&mut self) {
        self.bits = [0; Self::WORDS];
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|word| *word == 0)
    }

    pub fn len(&self) -> usize {
        self.bits.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Slot indices present, lowest first
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..Self::CAPACITY).filter(move |index| self.contains_index(*index))
    }

    fn contains_index(&self, index: usize) -> bool {
        index < Self::CAPACITY && self.bits[index / 64] & (1 << (index % 64)) != 0
    }

    fn clear_index(&mut self, index: usize) {
        if index < Self::CAPACITY {
            self.bits[index / 64] &= !(1 << (index % 64));
        }
    }

    fn checked_index(id: ObjectId) -> OsalResult<usize> {
        if id.kind() != Some(ObjectKind::Stream) || id.index() >= Self::CAPACITY {
            return Err(OsalError::InvalidId);
        }
        Ok(id.index())
    }
}

pub(crate) fn to_select_bits(state: StreamState) -> SelectBits {
    let mut bits = SelectBits::empty();
    if state.contains(StreamState::READABLE) {
        bits |= SelectBits::READ;
    }
    if state.contains(StreamState::WRITABLE) {
        bits |= SelectBits::WRITE;
    }
    bits
}

pub(crate) fn to_stream_state(bits: SelectBits) -> StreamState {
    let mut state = StreamState::empty();
    if bits.contains(SelectBits::READ) {
        state |= StreamState::READABLE;
    }
    if bits.contains(SelectBits::WRITE) {
        state |= StreamState::WRITABLE;
    }
    state
}

impl Osal {
    /// Waits until `id` is ready for any of `requested`
    ///
    /// Returns the confirmed subset. Files are always ready. A latched
    /// disconnect reports the whole request as ready.
    pub fn select_single(
        &self,
        id: ObjectId,
        requested: StreamState,
        timeout: Timeout,
    ) -> OsalResult<StreamState> {
        let record = self.streams.lookup(id)?;
        match record.payload().socket() {
            Some(socket) => self.wait_ready(socket, requested, timeout),
            None => Ok(requested),
        }
    }

    /// Waits until any stream in `read` is readable or any in `write` is
    /// writable
    ///
    /// On success each set keeps only its own confirmed members: read
    /// outcomes land in `read`, write outcomes in `write`. Members that no
    /// longer name an open stream are cleared. Files stay set and make
    /// the wait a poll. Empty or absent sets return at once.
    pub fn select_multiple(
        &self,
        mut read: Option<&mut FdSet>,
        mut write: Option<&mut FdSet>,
        timeout: Timeout,
    ) -> OsalResult<()> {
        let read_set = read.as_deref().copied().unwrap_or_default();
        let write_set = write.as_deref().copied().unwrap_or_default();
        if read_set.is_empty() && write_set.is_empty() {
            return Ok(());
        }

        let mut members: Vec<(usize, Arc<Record<StreamRecord>>)> = Vec::new();
        let mut host_set = SocketSet::new();
        let mut always_ready = false;
        for index in read_set.indices().chain(write_set.indices()) {
            if members.iter().any(|(i, _)| *i == index) {
                continue;
            }
            let record = self
                .streams
                .id_at(index)
                .and_then(|id| self.streams.lookup(id).ok());
            let Some(record) = record else {
                if let Some(set) = read.as_deref_mut() {
                    set.clear_index(index);
                }
                if let Some(set) = write.as_deref_mut() {
                    set.clear_index(index);
                }
                continue;
            };
            if let Some(socket) = record.payload().socket() {
                let mut bits = SelectBits::empty();
                if read_set.contains_index(index) {
                    bits |= SelectBits::READ;
                }
                if write_set.contains_index(index) {
                    bits |= SelectBits::WRITE;
                }
                host_set.add(socket.host(), bits);
            } else {
                always_ready = true;
            }
            members.push((index, record));
        }

        if !host_set.is_empty() {
            let net = self.net()?;
            let mut poll = always_ready;
            for (_, record) in &members {
                if let Some(socket) = record.payload().socket() {
                    poll |= socket.refresh(net.as_ref()).disconnected;
                }
            }
            let wait = if poll {
                Wait::Poll
            } else {
                self.clock.wait_for(timeout)
            };
            self.host_select(net.as_ref(), &mut host_set, wait)?;

            for (index, record) in &members {
                let Some(socket) = record.payload().socket() else {
                    continue;
                };
                if socket.refresh(net.as_ref()).disconnected {
                    continue;
                }
                let returned = host_set.returned(socket.host());
                if !returned.contains(SelectBits::READ) {
                    if let Some(set) = read.as_deref_mut() {
                        set.clear_index(*index);
                    }
                }
                if !returned.contains(SelectBits::WRITE) {
                    if let Some(set) = write.as_deref_mut() {
                        set.clear_index(*index);
                    }
                }
            }
        }

        let read_empty = read.as_deref().map_or(true, FdSet::is_empty);
        let write_empty = write.as_deref().map_or(true, FdSet::is_empty);
        if read_empty && write_empty {
            return Err(OsalError::Timeout);
        }
        Ok(())
    }

    /// Single-socket wait shared by [`Osal::select_single`] and stream I/O
    pub(crate) fn wait_ready(
        &self,
        socket: &SocketStream,
        requested: StreamState,
        timeout: Timeout,
    ) -> OsalResult<StreamState> {
        let requested = requested & (StreamState::READABLE | StreamState::WRITABLE);
        if requested.is_empty() {
            return Ok(requested);
        }
        let net = self.net()?;

        let wait = if socket.refresh(net.as_ref()).disconnected {
            Wait::Poll
        } else {
            self.clock.wait_for(timeout)
        };
        let mut host_set = SocketSet::new();
        host_set.add(socket.host(), to_select_bits(requested));
        self.host_select(net.as_ref(), &mut host_set, wait)?;

        if socket.refresh(net.as_ref()).disconnected {
            return Ok(requested);
        }
        let confirmed = to_stream_state(host_set.returned(socket.host())) & requested;
        if confirmed.is_empty() {
            return Err(OsalError::Timeout);
        }
        Ok(confirmed)
    }

    /// One host wait, retried transparently when interrupted
    fn host_select(
        &self,
        net: &dyn HostNetStack,
        set: &mut SocketSet,
        wait: Wait,
    ) -> OsalResult<usize> {
        loop {
            set.clear_returned();
            match net.select(set, wait) {
                Ok(ready) => return Ok(ready),
                Err(KernelError::Interrupted) => {
                    self.logger.debug(|e| e, "host select interrupted, retrying");
                }
                Err(err) => {
                    self.logger.warn(
                        |e| e.with_field("sockets", set.len()).with_field("error", &err),
                        "host select failed",
                    );
                    return Err(OsalError::Failure(err.to_string()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(index: u16) -> ObjectId {
        ObjectId::new(ObjectKind::Stream, 1, index)
    }

    #[test]
    fn test_fd_set_membership() {
        let mut set = FdSet::new();
        assert!(set.is_empty());
        set.insert(stream(0)).unwrap();
        set.insert(stream(65)).unwrap();
        set.insert(stream(255)).unwrap();

        assert_eq!(set.len(), 3);
        assert!(set.contains(stream(65)));
        assert!(!set.contains(stream(64)));
        assert_eq!(set.indices().collect::<Vec<_>>(), vec![0, 65, 255]);

        set.remove(stream(65)).unwrap();
        assert!(!set.contains(stream(65)));
        set.clear();
        assert!(set.is_empty());
    }

    #[test]
    fn test_fd_set_rejects_foreign_handles() {
        let mut set = FdSet::new();
        assert_eq!(
            set.insert(ObjectId::new(ObjectKind::Queue, 1, 0)),
            Err(OsalError::InvalidId)
        );
        assert_eq!(set.insert(stream(256)), Err(OsalError::InvalidId));
        assert_eq!(set.insert(ObjectId::UNDEFINED), Err(OsalError::InvalidId));
        assert!(set.is_empty());
    }

    #[test]
    fn test_generation_is_ignored_by_membership() {
        let mut set = FdSet::new();
        set.insert(ObjectId::new(ObjectKind::Stream, 1, 7)).unwrap();
        assert!(set.contains(ObjectId::new(ObjectKind::Stream, 2, 7)));
    }

    #[test]
    fn test_flag_translation() {
        let both = StreamState::READABLE | StreamState::WRITABLE;
        assert_eq!(to_select_bits(both), SelectBits::READ | SelectBits::WRITE);
        assert_eq!(
            to_stream_state(SelectBits::WRITE | SelectBits::EXCEPT),
            StreamState::WRITABLE
        );
    }

    #[test]
    fn test_empty_request_returns_immediately() {
        let osal = crate::test_support::osal();
        let mut read = FdSet::new();
        let mut write = FdSet::new();
        osal.select_multiple(Some(&mut read), Some(&mut write), Timeout::Pend)
            .unwrap();
        osal.select_multiple(None, None, Timeout::Pend).unwrap();
    }
}
