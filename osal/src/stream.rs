//! Byte streams: files and sockets
//!
//! Files and sockets share one handle table. What a stream is gets fixed
//! when it is opened: files are never selectable, sockets always are.

use crate::context::CallerContext;
use crate::error::{OsalError, OsalResult};
use crate::{lock, Osal};
use bitflags::bitflags;
use core_types::{ObjectId, ObjectKind, StreamState, Timeout};
use kernel_api::{HostNetStack, HostSocket, KernelError, SocketDomain, SocketType};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

bitflags! {
    /// Options for [`Osal::file_open`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FileFlags: u32 {
        /// Create the file if it doesn't exist
        const CREATE = 0x01;
        /// Discard existing contents
        const TRUNCATE = 0x02;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Connection state as last observed by the layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct LinkState {
    pub connected: bool,
    /// Latched once a connected peer goes away
    pub disconnected: bool,
}

pub(crate) struct SocketStream {
    host: HostSocket,
    ty: SocketType,
    bound: AtomicBool,
    link: Mutex<LinkState>,
}

impl SocketStream {
    fn new(host: HostSocket, ty: SocketType, connected: bool) -> Self {
        Self {
            host,
            ty,
            bound: AtomicBool::new(false),
            link: Mutex::new(LinkState {
                connected,
                disconnected: false,
            }),
        }
    }

    pub(crate) fn host(&self) -> HostSocket {
        self.host
    }

    fn link(&self) -> LinkState {
        *lock(&self.link)
    }

    /// Probes the host and updates the link state
    ///
    /// A socket that was connected and no longer is latches
    /// `disconnected`. A failed probe counts as not connected.
    pub(crate) fn refresh(&self, net: &dyn HostNetStack) -> LinkState {
        let connected = net.is_connected(self.host).unwrap_or(false);
        let mut link = lock(&self.link);
        if !connected && link.connected {
            link.disconnected = true;
        }
        link.connected = connected;
        *link
    }

    fn mark_connected(&self) {
        lock(&self.link).connected = true;
    }

    fn clear_disconnect(&self) {
        lock(&self.link).disconnected = false;
    }
}

enum StreamVariant {
    File(Mutex<File>),
    Socket(SocketStream),
}

pub struct StreamRecord {
    variant: StreamVariant,
}

impl StreamRecord {
    fn from_file(file: File) -> Self {
        Self {
            variant: StreamVariant::File(Mutex::new(file)),
        }
    }

    fn from_socket(socket: SocketStream) -> Self {
        Self {
            variant: StreamVariant::Socket(socket),
        }
    }

    /// Whether readiness can be waited on
    pub fn selectable(&self) -> bool {
        matches!(self.variant, StreamVariant::Socket(_))
    }

    pub(crate) fn socket(&self) -> Option<&SocketStream> {
        match &self.variant {
            StreamVariant::Socket(socket) => Some(socket),
            StreamVariant::File(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    pub creator: ObjectId,
    pub selectable: bool,
    pub socket: bool,
    pub connected: bool,
    pub disconnected: bool,
}

fn net_error(err: KernelError) -> OsalError {
    match err {
        KernelError::WouldBlock => OsalError::Timeout,
        other => OsalError::Failure(other.to_string()),
    }
}

impl Osal {
    /// The host stack, or `NotImplemented` when networking is unavailable
    pub(crate) fn net(&self) -> OsalResult<Arc<dyn HostNetStack>> {
        self.network
            .clone()
            .ok_or(OsalError::NotImplemented("network"))
    }

    fn with_socket<R, F>(&self, id: ObjectId, f: F) -> OsalResult<R>
    where
        F: FnOnce(&SocketStream, &dyn HostNetStack) -> OsalResult<R>,
    {
        let net = self.net()?;
        let record = self.streams.lookup(id)?;
        let socket = record
            .payload()
            .socket()
            .ok_or(OsalError::IncorrectObjType)?;
        f(socket, net.as_ref())
    }

    pub fn file_open(
        &self,
        caller: CallerContext,
        path: impl AsRef<Path>,
        access: FileAccess,
        flags: FileFlags,
    ) -> OsalResult<ObjectId> {
        let path = path.as_ref();
        self.create_object(&self.streams, caller, None, |_, _| {
            let mut options = OpenOptions::new();
            match access {
                FileAccess::ReadOnly => {
                    options.read(true);
                }
                FileAccess::WriteOnly => {
                    options.write(true);
                }
                FileAccess::ReadWrite => {
                    options.read(true).write(true);
                }
            }
            options
                .create(flags.contains(FileFlags::CREATE))
                .truncate(flags.contains(FileFlags::TRUNCATE));
            Ok(StreamRecord::from_file(options.open(path)?))
        })
    }

    /// Closes a file or socket
    pub fn stream_close(&self, id: ObjectId) -> OsalResult<()> {
        self.delete_object(&self.streams, id, |record| match &record.payload().variant {
            StreamVariant::File(_) => Ok(()),
            StreamVariant::Socket(socket) => {
                self.net()?.close(socket.host).map_err(net_error)
            }
        })?;
        Ok(())
    }

    pub fn stream_read(&self, id: ObjectId, buf: &mut [u8]) -> OsalResult<usize> {
        self.stream_timed_read(id, buf, Timeout::Pend)
    }

    /// Reads once; sockets first wait up to `timeout` for data
    ///
    /// `Ok(0)` from a socket means the peer closed.
    pub fn stream_timed_read(
        &self,
        id: ObjectId,
        buf: &mut [u8],
        timeout: Timeout,
    ) -> OsalResult<usize> {
        let record = self.streams.lookup(id)?;
        match &record.payload().variant {
            StreamVariant::File(file) => Ok(lock(file).read(buf)?),
            StreamVariant::Socket(socket) => {
                self.wait_ready(socket, StreamState::READABLE, timeout)?;
                let net = self.net()?;
                match socket.ty {
                    SocketType::Stream => net.recv(socket.host, buf),
                    SocketType::Datagram => net.recv_from(socket.host, buf).map(|(n, _)| n),
                }
                .map_err(net_error)
            }
        }
    }

    pub fn stream_write(&self, id: ObjectId, data: &[u8]) -> OsalResult<usize> {
        self.stream_timed_write(id, data, Timeout::Pend)
    }

    /// Writes once; sockets first wait up to `timeout` for room
    pub fn stream_timed_write(
        &self,
        id: ObjectId,
        data: &[u8],
        timeout: Timeout,
    ) -> OsalResult<usize> {
        let record = self.streams.lookup(id)?;
        match &record.payload().variant {
            StreamVariant::File(file) => Ok(lock(file).write(data)?),
            StreamVariant::Socket(socket) => {
                self.wait_ready(socket, StreamState::WRITABLE, timeout)?;
                self.net()?.send(socket.host, data).map_err(net_error)
            }
        }
    }

    pub fn stream_info(&self, id: ObjectId) -> OsalResult<StreamInfo> {
        let record = self.streams.lookup(id)?;
        let stream = record.payload();
        let link = stream.socket().map(SocketStream::link).unwrap_or_default();
        Ok(StreamInfo {
            creator: record.creator(),
            selectable: stream.selectable(),
            socket: stream.socket().is_some(),
            connected: link.connected,
            disconnected: link.disconnected,
        })
    }

    /// Resets the latched disconnect so waits can time out again
    pub fn stream_clear_disconnect(&self, id: ObjectId) -> OsalResult<()> {
        let record = self.streams.lookup(id)?;
        let socket = record
            .payload()
            .socket()
            .ok_or(OsalError::IncorrectObjType)?;
        socket.clear_disconnect();
        Ok(())
    }

    pub fn socket_open(
        &self,
        caller: CallerContext,
        domain: SocketDomain,
        ty: SocketType,
    ) -> OsalResult<ObjectId> {
        let net = self.net()?;
        if domain == SocketDomain::Inet6 {
            return Err(OsalError::NotImplemented("IPv6 sockets"));
        }
        self.create_object(&self.streams, caller, None, |_, _| {
            let host = net.socket(domain, ty).map_err(|err| match err {
                KernelError::NotSupported(_) => OsalError::NotImplemented("socket domain"),
                other => OsalError::allocation(ObjectKind::Stream, other),
            })?;
            Ok(StreamRecord::from_socket(SocketStream::new(host, ty, false)))
        })
    }

    /// Binds a socket; stream sockets start listening straight away
    pub fn socket_bind(&self, id: ObjectId, addr: SocketAddr) -> OsalResult<()> {
        self.with_socket(id, |socket, net| {
            if socket.bound.load(Ordering::Acquire) || socket.link().connected {
                return Err(OsalError::IncorrectObjState);
            }
            net.bind(socket.host, addr).map_err(net_error)?;
            if socket.ty == SocketType::Stream {
                net.listen(socket.host, self.config.socket_listen_backlog)
                    .map_err(net_error)?;
            }
            socket.bound.store(true, Ordering::Release);
            Ok(())
        })
    }

    /// Connects a stream socket, waiting up to `timeout` for completion
    pub fn socket_connect(&self, id: ObjectId, addr: SocketAddr, timeout: Timeout) -> OsalResult<()> {
        self.with_socket(id, |socket, net| {
            if socket.ty != SocketType::Stream {
                return Err(OsalError::IncorrectObjType);
            }
            if socket.bound.load(Ordering::Acquire) || socket.link().connected {
                return Err(OsalError::IncorrectObjState);
            }
            net.connect(socket.host, addr).map_err(net_error)?;
            self.wait_ready(socket, StreamState::WRITABLE, timeout)?;
            socket.mark_connected();
            Ok(())
        })
    }

    /// Waits up to `timeout` for a connection on a bound stream socket
    ///
    /// The connection becomes a new stream owned by `caller`.
    pub fn socket_accept(
        &self,
        caller: CallerContext,
        id: ObjectId,
        timeout: Timeout,
    ) -> OsalResult<(ObjectId, SocketAddr)> {
        let listener = self.with_socket(id, |socket, _| {
            if socket.ty != SocketType::Stream {
                return Err(OsalError::IncorrectObjType);
            }
            if !socket.bound.load(Ordering::Acquire) {
                return Err(OsalError::IncorrectObjState);
            }
            self.wait_ready(socket, StreamState::READABLE, timeout)?;
            Ok(socket.host)
        })?;

        let net = self.net()?;
        let mut peer = None;
        let conn = self.create_object(&self.streams, caller, None, |_, _| {
            let (host, addr) = net.accept(listener).map_err(net_error)?;
            peer = Some(addr);
            Ok(StreamRecord::from_socket(SocketStream::new(
                host,
                SocketType::Stream,
                true,
            )))
        })?;
        let peer = peer.ok_or_else(|| OsalError::Failure("accept yielded no peer".into()))?;
        Ok((conn, peer))
    }

    /// Receives one datagram, waiting up to `timeout`
    pub fn socket_recv_from(
        &self,
        id: ObjectId,
        buf: &mut [u8],
        timeout: Timeout,
    ) -> OsalResult<(usize, SocketAddr)> {
        self.with_socket(id, |socket, net| {
            if socket.ty != SocketType::Datagram {
                return Err(OsalError::IncorrectObjType);
            }
            self.wait_ready(socket, StreamState::READABLE, timeout)?;
            net.recv_from(socket.host, buf).map_err(net_error)
        })
    }

    pub fn socket_send_to(&self, id: ObjectId, data: &[u8], addr: SocketAddr) -> OsalResult<usize> {
        self.with_socket(id, |socket, net| {
            if socket.ty != SocketType::Datagram {
                return Err(OsalError::IncorrectObjType);
            }
            net.send_to(socket.host, data, addr).map_err(net_error)
        })
    }

    pub fn socket_local_addr(&self, id: ObjectId) -> OsalResult<SocketAddr> {
        self.with_socket(id, |socket, net| {
            net.local_addr(socket.host).map_err(net_error)
        })
    }

    /// Numeric id of this host, where the stack has one
    pub fn network_get_id(&self) -> OsalResult<i32> {
        self.net()?.host_id().map_err(|err| match err {
            KernelError::NotSupported(_) => OsalError::NotImplemented("network host id"),
            other => net_error(other),
        })
    }

    /// Host name, cut to fit a buffer of `buf_len` bytes with a terminator
    pub fn network_get_host_name(&self, buf_len: usize) -> OsalResult<String> {
        if buf_len == 0 {
            return Err(OsalError::Failure("host name buffer is empty".to_string()));
        }
        let mut name = self.net()?.host_name().map_err(net_error)?;
        let mut cut = name.len().min(buf_len - 1);
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
        Ok(name)
    }
}
