//! # Loopback Network Stack
//!
//! In-process TCP/UDP stack for tests. Every socket lives in one table, so
//! a connect reaches the listener bound to the target address directly and
//! bytes move between peers' receive buffers without touching the OS.
//!
//! ## Readiness
//!
//! - A listener is readable when a connection is waiting to be accepted.
//! - A connected socket is readable when bytes are buffered, and writable
//!   while its peer's receive buffer has room.
//! - A datagram socket is readable when a datagram is queued and is always
//!   writable.
//!
//! Like the hosts it stands in for, a peer's orderly close is **not**
//! reported as readiness once the buffered bytes are gone. Callers learn
//! about it from [`HostNetStack::is_connected`] or a zero-length `recv`.

use crate::clock::SimClock;
use crate::fault_injection::{FaultInjector, Primitive};
use crate::lock;
use crate::sync::block_on;
use kernel_api::{
    HostNetStack, HostSocket, KernelError, SelectBits, SocketDomain, SocketSet, SocketType, Wait,
};
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Condvar, Mutex};

/// Bytes a stream socket buffers before its peer stops being writable
pub const RX_BUFFER_BYTES: usize = 16 * 1024;

/// Datagrams a socket queues before further ones are dropped
pub const RX_DATAGRAM_SLOTS: usize = 64;

const EPHEMERAL_PORT_BASE: u16 = 49152;

#[derive(Debug)]
enum Mode {
    Unbound,
    Listening {
        backlog: VecDeque<(HostSocket, SocketAddr)>,
        limit: usize,
    },
    Connected {
        peer: HostSocket,
    },
    PeerClosed,
}

#[derive(Debug)]
struct SimSocket {
    ty: SocketType,
    local: Option<SocketAddr>,
    mode: Mode,
    rx: VecDeque<u8>,
    datagrams: VecDeque<(Vec<u8>, SocketAddr)>,
}

impl SimSocket {
    fn new(ty: SocketType) -> Self {
        Self {
            ty,
            local: None,
            mode: Mode::Unbound,
            rx: VecDeque::new(),
            datagrams: VecDeque::new(),
        }
    }
}

#[derive(Debug, Default)]
struct NetState {
    sockets: HashMap<HostSocket, SimSocket>,
    bindings: HashMap<SocketAddr, HostSocket>,
    next_socket: u32,
    next_port: u16,
}

impl NetState {
    fn socket(&self, socket: HostSocket) -> Result<&SimSocket, KernelError> {
        self.sockets
            .get(&socket)
            .ok_or_else(|| KernelError::Network(format!("bad descriptor {}", socket.0)))
    }

    fn socket_mut(&mut self, socket: HostSocket) -> Result<&mut SimSocket, KernelError> {
        self.sockets
            .get_mut(&socket)
            .ok_or_else(|| KernelError::Network(format!("bad descriptor {}", socket.0)))
    }

    fn allocate(&mut self, ty: SocketType) -> HostSocket {
        self.next_socket += 1;
        let socket = HostSocket(self.next_socket);
        self.sockets.insert(socket, SimSocket::new(ty));
        socket
    }

    fn ephemeral_addr(&mut self) -> SocketAddr {
        loop {
            self.next_port = self.next_port.wrapping_add(1);
            let port = EPHEMERAL_PORT_BASE.wrapping_add(self.next_port % 16000);
            let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
            if !self.bindings.contains_key(&addr) {
                return addr;
            }
        }
    }

    /// Binds `socket` to a fresh local port if it isn't bound yet
    fn ensure_bound(&mut self, socket: HostSocket) -> Result<SocketAddr, KernelError> {
        if let Some(local) = self.socket(socket)?.local {
            return Ok(local);
        }
        let addr = self.ephemeral_addr();
        self.bindings.insert(addr, socket);
        self.socket_mut(socket)?.local = Some(addr);
        Ok(addr)
    }

    fn peer_has_room(&self, peer: HostSocket) -> bool {
        self.sockets
            .get(&peer)
            .is_some_and(|p| p.rx.len() < RX_BUFFER_BYTES)
    }

    fn readiness(&self, socket: HostSocket) -> Result<SelectBits, KernelError> {
        let sock = self.socket(socket)?;
        let mut bits = SelectBits::empty();
        match sock.ty {
            SocketType::Datagram => {
                if !sock.datagrams.is_empty() {
                    bits |= SelectBits::READ;
                }
                bits |= SelectBits::WRITE;
            }
            SocketType::Stream => match &sock.mode {
                Mode::Listening { backlog, .. } => {
                    if !backlog.is_empty() {
                        bits |= SelectBits::READ;
                    }
                }
                Mode::Connected { peer, .. } => {
                    if !sock.rx.is_empty() {
                        bits |= SelectBits::READ;
                    }
                    if self.peer_has_room(*peer) {
                        bits |= SelectBits::WRITE;
                    }
                }
                Mode::PeerClosed => {
                    if !sock.rx.is_empty() {
                        bits |= SelectBits::READ;
                    }
                }
                Mode::Unbound => {}
            },
        }
        Ok(bits)
    }

    fn resolve_addr(addr: SocketAddr) -> SocketAddr {
        if addr.ip().is_unspecified() {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        } else {
            addr
        }
    }

    fn lookup_binding(&self, addr: SocketAddr) -> Option<HostSocket> {
        let wildcard = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), addr.port());
        self.bindings
            .get(&addr)
            .or_else(|| self.bindings.get(&wildcard))
            .or_else(|| self.bindings.get(&Self::resolve_addr(addr)))
            .copied()
    }
}

/// Host name reported by the loopback stack
pub const SIM_HOST_NAME: &str = "localhost";

/// Host id reported by the loopback stack: 127.0.0.1 as a number
pub const SIM_HOST_ID: i32 = 0x7f00_0001;

/// Loopback TCP/UDP stack
pub struct SimNetStack {
    clock: SimClock,
    faults: Arc<Mutex<FaultInjector>>,
    state: Mutex<NetState>,
    changed: Condvar,
}

impl SimNetStack {
    pub fn new(clock: SimClock, faults: Arc<Mutex<FaultInjector>>) -> Self {
        Self {
            clock,
            faults,
            state: Mutex::new(NetState::default()),
            changed: Condvar::new(),
        }
    }

    /// Number of open sockets
    pub fn socket_count(&self) -> usize {
        lock(&self.state).sockets.len()
    }
}

impl HostNetStack for SimNetStack {
    fn host_name(&self) -> Result<String, KernelError> {
        Ok(SIM_HOST_NAME.to_string())
    }

    fn host_id(&self) -> Result<i32, KernelError> {
        Ok(SIM_HOST_ID)
    }

    fn socket(&self, domain: SocketDomain, ty: SocketType) -> Result<HostSocket, KernelError> {
        if domain == SocketDomain::Inet6 {
            return Err(KernelError::NotSupported("IPv6".to_string()));
        }
        if lock(&self.faults).should_fail_create(Primitive::Socket) {
            return Err(KernelError::ResourceExhausted("injected socket failure".into()));
        }
        Ok(lock(&self.state).allocate(ty))
    }

    fn bind(&self, socket: HostSocket, addr: SocketAddr) -> Result<(), KernelError> {
        let mut state = lock(&self.state);
        if state.socket(socket)?.local.is_some() {
            return Err(KernelError::InvalidArgument("socket already bound".into()));
        }
        let addr = if addr.port() == 0 {
            let eph = state.ephemeral_addr();
            SocketAddr::new(addr.ip(), eph.port())
        } else {
            addr
        };
        if state.lookup_binding(addr).is_some() {
            return Err(KernelError::Network(format!("address in use: {}", addr)));
        }
        state.bindings.insert(addr, socket);
        state.socket_mut(socket)?.local = Some(addr);
        Ok(())
    }

    fn listen(&self, socket: HostSocket, backlog: usize) -> Result<(), KernelError> {
        let mut state = lock(&self.state);
        let sock = state.socket_mut(socket)?;
        if sock.ty != SocketType::Stream {
            return Err(KernelError::InvalidArgument("listen on datagram socket".into()));
        }
        if sock.local.is_none() {
            return Err(KernelError::InvalidArgument("listen on unbound socket".into()));
        }
        sock.mode = Mode::Listening {
            backlog: VecDeque::new(),
            limit: backlog.max(1),
        };
        Ok(())
    }

    fn connect(&self, socket: HostSocket, addr: SocketAddr) -> Result<(), KernelError> {
        let mut state = lock(&self.state);
        if state.socket(socket)?.ty != SocketType::Stream {
            return Err(KernelError::InvalidArgument("connect on datagram socket".into()));
        }
        if !matches!(state.socket(socket)?.mode, Mode::Unbound) {
            return Err(KernelError::InvalidArgument("socket already in use".into()));
        }
        let listener = state
            .lookup_binding(addr)
            .ok_or_else(|| KernelError::Network(format!("connection refused: {}", addr)))?;
        match &state.socket(listener)?.mode {
            Mode::Listening { backlog, limit } if backlog.len() < *limit => {}
            _ => return Err(KernelError::Network(format!("connection refused: {}", addr))),
        }

        let client_addr = state.ensure_bound(socket)?;
        let server_addr = state.socket(listener)?.local.unwrap_or(addr);
        let server = state.allocate(SocketType::Stream);
        {
            let accepted = state.socket_mut(server)?;
            accepted.local = Some(server_addr);
            accepted.mode = Mode::Connected { peer: socket };
        }
        state.socket_mut(socket)?.mode = Mode::Connected { peer: server };
        if let Mode::Listening { backlog, .. } = &mut state.socket_mut(listener)?.mode {
            backlog.push_back((server, client_addr));
        }
        self.changed.notify_all();
        Ok(())
    }

    fn accept(&self, socket: HostSocket) -> Result<(HostSocket, SocketAddr), KernelError> {
        let mut state = lock(&self.state);
        match &mut state.socket_mut(socket)?.mode {
            Mode::Listening { backlog, .. } => backlog.pop_front().ok_or(KernelError::WouldBlock),
            _ => Err(KernelError::InvalidArgument("accept on non-listening socket".into())),
        }
    }

    fn send(&self, socket: HostSocket, data: &[u8]) -> Result<usize, KernelError> {
        let mut state = lock(&self.state);
        let peer = match &state.socket(socket)?.mode {
            Mode::Connected { peer, .. } => *peer,
            Mode::PeerClosed => return Err(KernelError::Network("connection reset".into())),
            _ => return Err(KernelError::Network("not connected".into())),
        };
        let rx = &mut state.socket_mut(peer)?.rx;
        let room = RX_BUFFER_BYTES.saturating_sub(rx.len());
        if room == 0 {
            return Err(KernelError::WouldBlock);
        }
        let n = data.len().min(room);
        rx.extend(&data[..n]);
        self.changed.notify_all();
        Ok(n)
    }

    fn recv(&self, socket: HostSocket, buf: &mut [u8]) -> Result<usize, KernelError> {
        let mut state = lock(&self.state);
        let sock = state.socket_mut(socket)?;
        if !sock.rx.is_empty() {
            let n = buf.len().min(sock.rx.len());
            for (dst, src) in buf.iter_mut().zip(sock.rx.drain(..n)) {
                *dst = src;
            }
            self.changed.notify_all();
            return Ok(n);
        }
        match sock.mode {
            Mode::PeerClosed => Ok(0),
            Mode::Connected { .. } => Err(KernelError::WouldBlock),
            _ => Err(KernelError::Network("not connected".into())),
        }
    }

    fn send_to(
        &self,
        socket: HostSocket,
        data: &[u8],
        addr: SocketAddr,
    ) -> Result<usize, KernelError> {
        let mut state = lock(&self.state);
        if state.socket(socket)?.ty != SocketType::Datagram {
            return Err(KernelError::InvalidArgument("send_to on stream socket".into()));
        }
        let from = state.ensure_bound(socket)?;
        if let Some(target) = state.lookup_binding(addr) {
            if let Ok(dest) = state.socket_mut(target) {
                if dest.ty == SocketType::Datagram && dest.datagrams.len() < RX_DATAGRAM_SLOTS {
                    dest.datagrams.push_back((data.to_vec(), from));
                    self.changed.notify_all();
                }
            }
        }
        Ok(data.len())
    }

    fn recv_from(
        &self,
        socket: HostSocket,
        buf: &mut [u8],
    ) -> Result<(usize, SocketAddr), KernelError> {
        let mut state = lock(&self.state);
        let sock = state.socket_mut(socket)?;
        let (datagram, from) = sock.datagrams.pop_front().ok_or(KernelError::WouldBlock)?;
        let n = buf.len().min(datagram.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        Ok((n, from))
    }

    fn local_addr(&self, socket: HostSocket) -> Result<SocketAddr, KernelError> {
        lock(&self.state)
            .socket(socket)?
            .local
            .ok_or_else(|| KernelError::Network("socket not bound".into()))
    }

    fn close(&self, socket: HostSocket) -> Result<(), KernelError> {
        let mut state = lock(&self.state);
        let sock = state
            .sockets
            .remove(&socket)
            .ok_or_else(|| KernelError::Network(format!("bad descriptor {}", socket.0)))?;
        if let Some(local) = sock.local {
            if state.bindings.get(&local) == Some(&socket) {
                state.bindings.remove(&local);
            }
        }

        let mut orphaned_peers = Vec::new();
        match sock.mode {
            Mode::Connected { peer, .. } => orphaned_peers.push(peer),
            Mode::Listening { backlog, .. } => {
                for (pending, _) in backlog {
                    if let Some(Mode::Connected { peer, .. }) =
                        state.sockets.remove(&pending).map(|s| s.mode)
                    {
                        orphaned_peers.push(peer);
                    }
                }
            }
            _ => {}
        }
        for peer in orphaned_peers {
            if let Some(peer_sock) = state.sockets.get_mut(&peer) {
                peer_sock.mode = Mode::PeerClosed;
            }
        }
        self.changed.notify_all();
        Ok(())
    }

    fn is_connected(&self, socket: HostSocket) -> Result<bool, KernelError> {
        let state = lock(&self.state);
        Ok(matches!(state.socket(socket)?.mode, Mode::Connected { .. }))
    }

    fn select(&self, set: &mut SocketSet, wait: Wait) -> Result<usize, KernelError> {
        if lock(&self.faults).should_interrupt_select() {
            return Err(KernelError::Interrupted);
        }
        let state = lock(&self.state);
        let result = block_on(state, &self.changed, self.clock.deadline(wait), |state| {
            set.clear_returned();
            let sockets: Vec<HostSocket> = set.iter().map(|e| e.socket).collect();
            for socket in sockets {
                match state.readiness(socket) {
                    Ok(bits) => set.set_returned(socket, bits),
                    Err(err) => return Some(Err(err)),
                }
            }
            match set.ready_count() {
                0 => None,
                n => Some(Ok(n)),
            }
        });
        match result {
            Err(KernelError::WouldBlock) | Err(KernelError::Timeout) => {
                set.clear_returned();
                Ok(0)
            }
            other => other,
        }
    }
}
