//! UNIX-domain socket subsystem.
//!
//! Implements `socket/bind/listen/accept/connect/sendmsg/recvmsg/
//! getsockname/getpeername/close` for `AF_UNIX`. Grounded on
//! `original_source/kernel/net/unix.c`'s state machine and rendezvous
//! protocol, using this workspace's [`pastoral_lib::WaitQueue`] for
//! suspension and [`pastoral_fs::StreamStore`] for the per-socket inbox.
//!
//! The original dispatches per-family operations through a function-pointer
//! vector on each socket. Here family is a tagged variant
//! ([`FamilyState`]) matched in each operation instead — `AF_NETLINK`
//! sockets can be created (validated) but every operation past creation
//! returns [`SocketError::NotImplemented`], since the source only
//! specifies `AF_UNIX` behavior in full.
//!
//! Each connected socket's inbox is its own [`StreamStore`]: `sendmsg`
//! writes into the *peer's* store and fires the peer's `PollIn` trigger;
//! `recvmsg` reads from its own store. This gives full-duplex delivery
//! from a single store per side, matching the "dangling ramfs inode"
//! attached at creation time.

extern crate alloc;

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use pastoral_fs::StreamStore;
use pastoral_lib::waitqueue::WaitEvent;
use pastoral_lib::{IrqMutex, WaitQueue};

pub const AF_UNIX: u16 = 1;
pub const AF_NETLINK: u16 = 16;

/// Traditional `sizeof(((struct sockaddr_un *)0)->sun_path)`.
pub const PATH_MAX_UN: usize = 108;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketError {
    InvalidArgument,
    FamilyUnsupported,
    OpNotSupported,
    AddressInUse,
    AlreadyConnected,
    NotConnected,
    WouldBlock,
    NotSocket,
    BadDescriptor,
    NotImplemented,
    /// `backlog_max` exceeded at connect time. The source records
    /// `backlog_max` but never checks it (see module docs, Open Questions);
    /// this implementation enforces it and reports this kind instead.
    ConnectionRefused,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SockType {
    Stream,
    SeqPacket,
    Dgram,
    Raw,
}

impl SockType {
    fn is_connection_oriented(self) -> bool {
        matches!(self, SockType::Stream | SockType::SeqPacket)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketState {
    Unconnected,
    /// `listen` was called; `backlog` accepts incoming connects.
    Passive,
    /// A blocking `connect` pushed itself onto a target's backlog and is
    /// waiting on its own wait queue for the acceptor's wake.
    Connecting,
    Connected,
}

/// An address the caller bound or is connecting to: the raw `sun_path`
/// bytes, compared by byte-equality over the declared length window.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct SockAddrUn {
    pub path: Vec<u8>,
}

impl SockAddrUn {
    pub fn new(path: &[u8]) -> Self {
        Self { path: path.to_vec() }
    }

    pub fn unnamed() -> Self {
        Self { path: Vec::new() }
    }

    /// `sizeof(sa_family_t) + strlen(path)`, the length `getsockname`
    /// reports back.
    pub fn wire_len(&self) -> usize {
        2 + self.path.len()
    }
}

/// Per-family state, matched rather than dispatched through function
/// pointers. `AF_UNIX` carries the stream backing store every connection-
/// oriented operation reads and writes through.
enum FamilyState {
    Unix { store: Arc<StreamStore> },
    Netlink,
}

struct Inner {
    state: SocketState,
    sock_type: SockType,
    address: Option<SockAddrUn>,
    peer: Option<Arc<Socket>>,
    backlog: Vec<Arc<Socket>>,
    backlog_max: usize,
    recv_cursor: usize,
}

pub struct Socket {
    family: FamilyState,
    waitq: WaitQueue,
    inner: IrqMutex<Inner>,
}

/// A live socket handle, as a file descriptor would be. Cloning an
/// `Arc<Socket>` is how the address table and backlog entries reference a
/// socket without owning its lifetime outright.
pub type SocketHandle = Arc<Socket>;

/// `socket(family, type, protocol)`.
pub fn socket(family: u16, sock_type: SockType) -> Result<SocketHandle, SocketError> {
    let family_state = match family {
        AF_UNIX => FamilyState::Unix {
            store: Arc::new(StreamStore::new()),
        },
        AF_NETLINK => FamilyState::Netlink,
        _ => return Err(SocketError::FamilyUnsupported),
    };

    Ok(Arc::new(Socket {
        family: family_state,
        waitq: WaitQueue::new(),
        inner: IrqMutex::new(Inner {
            state: SocketState::Unconnected,
            sock_type,
            address: None,
            peer: None,
            backlog: Vec::new(),
            backlog_max: 0,
            recv_cursor: 0,
        }),
    }))
}

struct AddrTable {
    entries: Vec<(SockAddrUn, Weak<Socket>)>,
}

impl AddrTable {
    const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn find(&mut self, addr: &SockAddrUn) -> Option<Arc<Socket>> {
        self.entries.retain(|(_, weak)| weak.strong_count() > 0);
        self.entries
            .iter()
            .find(|(a, _)| a == addr)
            .and_then(|(_, weak)| weak.upgrade())
    }

    fn insert(&mut self, addr: SockAddrUn, socket: &Arc<Socket>) {
        self.entries.push((addr, Arc::downgrade(socket)));
    }

    fn remove(&mut self, addr: &SockAddrUn) {
        self.entries.retain(|(a, _)| a != addr);
    }
}

static UNIX_ADDR_TABLE: IrqMutex<AddrTable> = IrqMutex::new(AddrTable::new());

/// `bind(fd, addr, len)`.
pub fn bind(sock: &SocketHandle, addr: SockAddrUn) -> Result<(), SocketError> {
    if addr.path.is_empty() || addr.path.len() > PATH_MAX_UN {
        return Err(SocketError::InvalidArgument);
    }

    let mut inner = sock.inner.lock();
    if matches!(inner.state, SocketState::Connected | SocketState::Connecting) {
        return Err(SocketError::InvalidArgument);
    }

    let mut table = UNIX_ADDR_TABLE.lock();
    if table.find(&addr).is_some() {
        return Err(SocketError::AddressInUse);
    }
    table.insert(addr.clone(), sock);
    inner.address = Some(addr);
    Ok(())
}

/// `listen(fd, backlog)`.
pub fn listen(sock: &SocketHandle, backlog_max: usize) -> Result<(), SocketError> {
    let mut inner = sock.inner.lock();
    if !inner.sock_type.is_connection_oriented() {
        return Err(SocketError::OpNotSupported);
    }
    inner.state = SocketState::Passive;
    inner.backlog_max = backlog_max;
    inner.backlog.clear();
    Ok(())
}

/// `connect(fd, addr, len)`. `blocking` selects whether the caller
/// suspends awaiting the acceptor's wake (the non-blocking path still
/// completes the rendezvous handshake, it just doesn't wait for it).
pub fn connect(sock: &SocketHandle, addr: &SockAddrUn, blocking: bool) -> Result<(), SocketError> {
    {
        let inner = sock.inner.lock();
        if matches!(inner.state, SocketState::Connected | SocketState::Connecting) {
            return Err(SocketError::AlreadyConnected);
        }
    }

    let target = UNIX_ADDR_TABLE
        .lock()
        .find(addr)
        .ok_or(SocketError::FamilyUnsupported)?;

    {
        let mut target_inner = target.inner.lock();
        if target_inner.backlog_max > 0 && target_inner.backlog.len() >= target_inner.backlog_max {
            return Err(SocketError::ConnectionRefused);
        }
        target_inner.backlog.push(sock.clone());
    }

    {
        let mut inner = sock.inner.lock();
        inner.peer = Some(target.clone());
        inner.state = SocketState::Connecting;
    }

    if blocking {
        target.waitq.fire(WaitEvent::Socket);
        let trigger = sock.waitq.allocate(WaitEvent::Socket);
        sock.waitq.wait(&trigger);
        sock.waitq.remove(trigger);
    }

    sock.inner.lock().state = SocketState::Connected;
    Ok(())
}

/// Mint a fresh, unconnected socket sharing `template`'s family (a new
/// `StreamStore` for `AF_UNIX`, nothing for `AF_NETLINK`). Used by
/// [`accept`] to give the accepted connection its own server-side
/// identity rather than aliasing the connecting client's.
fn sibling(template: &Socket, sock_type: SockType) -> Arc<Socket> {
    let family_state = match &template.family {
        FamilyState::Unix { .. } => FamilyState::Unix {
            store: Arc::new(StreamStore::new()),
        },
        FamilyState::Netlink => FamilyState::Netlink,
    };

    Arc::new(Socket {
        family: family_state,
        waitq: WaitQueue::new(),
        inner: IrqMutex::new(Inner {
            state: SocketState::Unconnected,
            sock_type,
            address: None,
            peer: None,
            backlog: Vec::new(),
            backlog_max: 0,
            recv_cursor: 0,
        }),
    })
}

/// `accept(fd, out_addr, inout_len)`. Returns the new connected socket
/// handle (the caller mints its own descriptor number around it) and,
/// when `out_addr` was requested, the peer's bound address.
pub fn accept(sock: &SocketHandle, blocking: bool) -> Result<(SocketHandle, Option<SockAddrUn>), SocketError> {
    let sock_type = {
        let inner = sock.inner.lock();
        if !inner.sock_type.is_connection_oriented() {
            return Err(SocketError::OpNotSupported);
        }
        inner.sock_type
    };

    let backlog_empty = sock.inner.lock().backlog.is_empty();
    if backlog_empty {
        if !blocking {
            return Err(SocketError::WouldBlock);
        }
        let trigger = sock.waitq.allocate(WaitEvent::Socket);
        sock.waitq.wait(&trigger);
        sock.waitq.remove(trigger);
    }

    // Tail-pop: the source pops from the back of the backlog, yielding
    // LIFO acceptance order. Preserved here rather than FIFO-ified, and
    // must be asserted by name in rendezvous-ordering tests.
    let client = {
        let mut inner = sock.inner.lock();
        match inner.backlog.pop() {
            Some(client) => client,
            None => return Err(SocketError::WouldBlock),
        }
    };

    let out_addr = client.inner.lock().address.clone();

    // The client's own socket object can't double as the server-side
    // endpoint: sendmsg writes into peer's store and recvmsg reads its
    // own, so reusing one object for both ends would have sendmsg and
    // recvmsg racing over the same store instead of rendezvousing across
    // two. Mint a distinct server-side socket and re-peer the client to
    // it instead of to the listener.
    let server_side = sibling(sock, sock_type);
    {
        let mut server_inner = server_side.inner.lock();
        server_inner.peer = Some(client.clone());
        server_inner.state = SocketState::Connected;
    }
    client.inner.lock().peer = Some(server_side.clone());

    sock.inner.lock().peer = Some(client.clone());
    sock.inner.lock().state = SocketState::Connected;

    client.waitq.fire(WaitEvent::Socket);

    Ok((server_side, out_addr))
}

/// `getsockname(fd, out_addr, inout_len)`.
pub fn getsockname(sock: &SocketHandle) -> Result<SockAddrUn, SocketError> {
    Ok(sock.inner.lock().address.clone().unwrap_or_default())
}

/// `getpeername(fd, out_addr, inout_len)`.
pub fn getpeername(sock: &SocketHandle) -> Result<SockAddrUn, SocketError> {
    let inner = sock.inner.lock();
    let peer = inner.peer.as_ref().ok_or(SocketError::NotConnected)?;
    Ok(peer.inner.lock().address.clone().unwrap_or_default())
}

/// `sendmsg(fd, msghdr, flags)`. `dest` must be `None` for
/// connection-oriented sockets already bound to a peer (an explicit
/// destination on a connected stream socket is `EISCONN`).
pub fn sendmsg(sock: &SocketHandle, buf: &[u8], dest: Option<&SockAddrUn>) -> Result<usize, SocketError> {
    let (sock_type, peer) = {
        let inner = sock.inner.lock();
        if inner.state != SocketState::Connected {
            return Err(SocketError::NotConnected);
        }
        (inner.sock_type, inner.peer.clone())
    };
    let peer = peer.ok_or(SocketError::NotConnected)?;

    if sock_type.is_connection_oriented() && dest.is_some() {
        return Err(SocketError::AlreadyConnected);
    }

    let store = match &peer.family {
        FamilyState::Unix { store } => store.clone(),
        FamilyState::Netlink => return Err(SocketError::NotImplemented),
    };

    let written = store.write(buf);
    peer.waitq.fire(WaitEvent::PollIn);
    Ok(written)
}

/// `recvmsg(fd, msghdr, flags)`.
///
/// Checks `state == CONNECTED` before touching `peer` at all — the
/// source dereferences `peer` first and only implicitly relies on
/// `CONNECTED` implying non-null, which is backwards (see module docs).
pub fn recvmsg(sock: &SocketHandle, buf: &mut [u8], blocking: bool) -> Result<usize, SocketError> {
    {
        let inner = sock.inner.lock();
        if inner.state != SocketState::Connected {
            return Err(SocketError::NotConnected);
        }
    }

    if blocking {
        let trigger = sock.waitq.allocate(WaitEvent::PollIn);
        sock.waitq.wait(&trigger);
        sock.waitq.remove(trigger);
    }

    let store = match &sock.family {
        FamilyState::Unix { store } => store.clone(),
        FamilyState::Netlink => return Err(SocketError::NotImplemented),
    };

    let mut inner = sock.inner.lock();
    let cursor = inner.recv_cursor;
    let n = store.read_at(cursor, buf);
    inner.recv_cursor += n;
    Ok(n)
}

/// `close(fd)`. Infallible: a never-connected socket's close is a no-op
/// past address-table cleanup, matching POSIX rather than the source
/// (which fails close on a socket with no live peer — see module docs).
pub fn close(sock: &SocketHandle) {
    let (peer, address) = {
        let mut inner = sock.inner.lock();
        inner.state = SocketState::Unconnected;
        (inner.peer.take(), inner.address.take())
    };

    if let Some(peer) = peer {
        peer.inner.lock().peer = None;
        peer.inner.lock().state = SocketState::Unconnected;
    }

    if let Some(address) = address {
        UNIX_ADDR_TABLE.lock().remove(&address);
    }
}

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod tests {
    use super::*;
    use pastoral_lib::kernel_services::scheduler::{self, SchedulerServices};

    fn install_test_scheduler() {
        fn current_task() -> pastoral_lib::TaskHandle {
            pastoral_lib::TaskHandle(1)
        }
        fn block_current_task() {}
        fn unblock_task(_handle: pastoral_lib::TaskHandle) {}
        scheduler::register(SchedulerServices {
            current_task,
            block_current_task,
            unblock_task,
        });
    }

    #[test]
    fn bind_roundtrips_through_getsockname() {
        install_test_scheduler();
        let s = socket(AF_UNIX, SockType::Stream).unwrap();
        bind(&s, SockAddrUn::new(b"/tmp/roundtrip")).unwrap();
        let out = getsockname(&s).unwrap();
        assert_eq!(out.path, b"/tmp/roundtrip");
        assert_eq!(out.wire_len(), 2 + "/tmp/roundtrip".len());
    }

    #[test]
    fn bind_collision_then_free_after_close() {
        install_test_scheduler();
        let s1 = socket(AF_UNIX, SockType::Stream).unwrap();
        let s2 = socket(AF_UNIX, SockType::Stream).unwrap();

        bind(&s1, SockAddrUn::new(b"/a")).unwrap();
        assert_eq!(bind(&s2, SockAddrUn::new(b"/a")), Err(SocketError::AddressInUse));

        close(&s1);
        bind(&s2, SockAddrUn::new(b"/a")).unwrap();
    }

    #[test]
    fn stream_rendezvous_lifo_backlog_order() {
        install_test_scheduler();
        let listener = socket(AF_UNIX, SockType::Stream).unwrap();
        bind(&listener, SockAddrUn::new(b"/tmp/s")).unwrap();
        listen(&listener, 4).unwrap();

        let c1 = socket(AF_UNIX, SockType::Stream).unwrap();
        let c2 = socket(AF_UNIX, SockType::Stream).unwrap();
        connect(&c1, &SockAddrUn::new(b"/tmp/s"), false).unwrap();
        connect(&c2, &SockAddrUn::new(b"/tmp/s"), false).unwrap();

        let (first, _) = accept(&listener, false).unwrap();
        let (second, _) = accept(&listener, false).unwrap();

        // Tail-pop backlog: C2 connected last, so it's accepted first.
        // `accept` mints a distinct server-side socket per connection, so
        // LIFO order is checked through which client each is peered with.
        assert!(Arc::ptr_eq(first.inner.lock().peer.as_ref().unwrap(), &c2));
        assert!(Arc::ptr_eq(second.inner.lock().peer.as_ref().unwrap(), &c1));
    }

    #[test]
    fn connected_pair_sees_each_other_as_peer() {
        install_test_scheduler();
        let listener = socket(AF_UNIX, SockType::Stream).unwrap();
        bind(&listener, SockAddrUn::new(b"/tmp/pair")).unwrap();
        listen(&listener, 1).unwrap();

        let client = socket(AF_UNIX, SockType::Stream).unwrap();
        connect(&client, &SockAddrUn::new(b"/tmp/pair"), false).unwrap();
        let (server_side, _) = accept(&listener, false).unwrap();

        assert_eq!(client.inner.lock().state, SocketState::Connected);
        assert_eq!(server_side.inner.lock().state, SocketState::Connected);
        assert!(Arc::ptr_eq(client.inner.lock().peer.as_ref().unwrap(), &server_side));
        assert!(Arc::ptr_eq(server_side.inner.lock().peer.as_ref().unwrap(), &client));
        // The listener itself also records the accepted client as its peer.
        assert!(Arc::ptr_eq(listener.inner.lock().peer.as_ref().unwrap(), &client));
    }

    #[test]
    fn sendmsg_then_recvmsg_delivers_bytes() {
        install_test_scheduler();
        let listener = socket(AF_UNIX, SockType::Stream).unwrap();
        bind(&listener, SockAddrUn::new(b"/tmp/io")).unwrap();
        listen(&listener, 1).unwrap();

        let client = socket(AF_UNIX, SockType::Stream).unwrap();
        connect(&client, &SockAddrUn::new(b"/tmp/io"), false).unwrap();
        let (server_side, _) = accept(&listener, false).unwrap();

        assert_eq!(sendmsg(&client, b"hello", None).unwrap(), 5);
        let mut buf = [0u8; 8];
        assert_eq!(recvmsg(&server_side, &mut buf, false).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn send_without_connect_fails_not_connected() {
        install_test_scheduler();
        let s = socket(AF_UNIX, SockType::Stream).unwrap();
        assert_eq!(sendmsg(&s, b"x", None), Err(SocketError::NotConnected));
    }

    #[test]
    fn non_blocking_accept_on_empty_backlog_is_eagain() {
        install_test_scheduler();
        let listener = socket(AF_UNIX, SockType::Stream).unwrap();
        bind(&listener, SockAddrUn::new(b"/tmp/empty")).unwrap();
        listen(&listener, 4).unwrap();

        assert_eq!(accept(&listener, false), Err(SocketError::WouldBlock));
        assert!(listener.inner.lock().backlog.is_empty());
    }

    #[test]
    fn connect_refused_past_backlog_max() {
        install_test_scheduler();
        let listener = socket(AF_UNIX, SockType::Stream).unwrap();
        bind(&listener, SockAddrUn::new(b"/tmp/full")).unwrap();
        listen(&listener, 1).unwrap();

        let c1 = socket(AF_UNIX, SockType::Stream).unwrap();
        let c2 = socket(AF_UNIX, SockType::Stream).unwrap();
        connect(&c1, &SockAddrUn::new(b"/tmp/full"), false).unwrap();
        assert_eq!(
            connect(&c2, &SockAddrUn::new(b"/tmp/full"), false),
            Err(SocketError::ConnectionRefused)
        );
    }

    #[test]
    fn close_on_never_connected_socket_is_infallible() {
        install_test_scheduler();
        let s = socket(AF_UNIX, SockType::Stream).unwrap();
        close(&s); // must not panic or error
        assert_eq!(s.inner.lock().state, SocketState::Unconnected);
    }
}
