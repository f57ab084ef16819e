//! Host TCP/IP stack seam
//!
//! The host exposes exactly one readiness primitive: [`HostNetStack::select`]
//! over a [`SocketSet`]. Everything the abstraction layer offers on top of
//! it (single-stream waits, bitmap multiplexing, sticky disconnects) is
//! built from this one call plus [`HostNetStack::is_connected`].

use crate::kernel::Wait;
use crate::KernelError;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Host socket descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostSocket(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SocketDomain {
    Inet,
    Inet6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SocketType {
    Datagram,
    Stream,
}

bitflags! {
    /// Directions tracked per descriptor in a [`SocketSet`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SelectBits: u8 {
        const READ = 0x01;
        const WRITE = 0x02;
        const EXCEPT = 0x04;
    }
}

/// One descriptor in a [`SocketSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketSetEntry {
    pub socket: HostSocket,
    /// Directions the caller is waiting on
    pub requested: SelectBits,
    /// Directions the host confirmed; filled in by `select`
    pub returned: SelectBits,
}

/// Descriptor set handed to the host's single readiness primitive
///
/// Each socket appears at most once; adding it again merges the requested
/// directions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketSet {
    entries: Vec<SocketSetEntry>,
}

impl SocketSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds interest in `bits` for `socket`
    pub fn add(&mut self, socket: HostSocket, bits: SelectBits) {
        if bits.is_empty() {
            return;
        }
        match self.entries.iter_mut().find(|e| e.socket == socket) {
            Some(entry) => entry.requested |= bits,
            None => self.entries.push(SocketSetEntry {
                socket,
                requested: bits,
                returned: SelectBits::empty(),
            }),
        }
    }

    /// Directions requested for `socket`
    pub fn requested(&self, socket: HostSocket) -> SelectBits {
        self.entry(socket)
            .map(|e| e.requested)
            .unwrap_or(SelectBits::empty())
    }

    /// Directions confirmed for `socket` by the last `select`
    pub fn returned(&self, socket: HostSocket) -> SelectBits {
        self.entry(socket)
            .map(|e| e.returned)
            .unwrap_or(SelectBits::empty())
    }

    /// Records confirmed directions; only requested bits are kept
    pub fn set_returned(&mut self, socket: HostSocket, bits: SelectBits) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.socket == socket) {
            entry.returned = bits & entry.requested;
        }
    }

    /// Clears every confirmed direction
    pub fn clear_returned(&mut self) {
        for entry in &mut self.entries {
            entry.returned = SelectBits::empty();
        }
    }

    /// Number of descriptors with at least one confirmed direction
    pub fn ready_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.returned.is_empty()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SocketSetEntry> {
        self.entries.iter()
    }

    fn entry(&self, socket: HostSocket) -> Option<&SocketSetEntry> {
        self.entries.iter().find(|e| e.socket == socket)
    }
}

/// Host TCP/IP stack
///
/// All data calls are non-blocking and return [`KernelError::WouldBlock`]
/// when nothing can be done; blocking is only ever done through
/// [`HostNetStack::select`].
pub trait HostNetStack: Send + Sync {
    fn socket(&self, domain: SocketDomain, ty: SocketType) -> Result<HostSocket, KernelError>;

    fn bind(&self, socket: HostSocket, addr: SocketAddr) -> Result<(), KernelError>;

    fn listen(&self, socket: HostSocket, backlog: usize) -> Result<(), KernelError>;

    /// Starts a connection; completion is observed through `select`/`is_connected`
    fn connect(&self, socket: HostSocket, addr: SocketAddr) -> Result<(), KernelError>;

    fn accept(&self, socket: HostSocket) -> Result<(HostSocket, SocketAddr), KernelError>;

    fn send(&self, socket: HostSocket, data: &[u8]) -> Result<usize, KernelError>;

    /// `Ok(0)` means the peer closed and every byte has been consumed
    fn recv(&self, socket: HostSocket, buf: &mut [u8]) -> Result<usize, KernelError>;

    fn send_to(&self, socket: HostSocket, data: &[u8], addr: SocketAddr)
        -> Result<usize, KernelError>;

    fn recv_from(
        &self,
        socket: HostSocket,
        buf: &mut [u8],
    ) -> Result<(usize, SocketAddr), KernelError>;

    fn local_addr(&self, socket: HostSocket) -> Result<SocketAddr, KernelError>;

    fn close(&self, socket: HostSocket) -> Result<(), KernelError>;

    /// Connectivity probe; a peer's orderly shutdown shows up here, not in `select`
    fn is_connected(&self, socket: HostSocket) -> Result<bool, KernelError>;

    /// Blocks until a requested direction is ready on some member of `set`
    ///
    /// Returns the number of ready descriptors; `0` means the wait expired.
    /// May fail with [`KernelError::Interrupted`], in which case the
    /// caller is expected to retry.
    fn select(&self, set: &mut SocketSet, wait: Wait) -> Result<usize, KernelError>;

    /// Name this host answers to on the network
    fn host_name(&self) -> Result<String, KernelError>;

    /// Numeric host identifier
    ///
    /// Most stacks have no such thing and keep this default.
    fn host_id(&self) -> Result<i32, KernelError> {
        Err(KernelError::NotSupported("host id".to_string()))
    }
}
