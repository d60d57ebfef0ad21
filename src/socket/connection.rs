//! Ownership-tracked handle to one pooled transport connection.
//!
//! A [`ClientConnection`] is created when the HTTP engine checks a socket out
//! of the [`ClientSocketPool`]. The exchange that sends the upgrade request
//! is its first owner. After a successful upgrade the WebSocket claims it,
//! which takes it out of HTTP reuse and exposes the raw socket halves; when
//! the session is done the halves go back through a [`ConnectionRecycler`].

use crate::base::neterror::NetError;
use crate::socket::pool::ClientSocketPool;
use crate::socket::stream::BoxedSocket;
use bytes::Bytes;
use std::fmt;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, Chain, ReadHalf, WriteHalf};
use url::Url;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Who currently controls a [`ClientConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionOwner {
    /// The connection was handed back to the pool (or discarded).
    Pool = 0,
    /// An HTTP exchange is using it.
    Exchange = 1,
    /// A WebSocket session has exclusive use of it.
    WebSocket = 2,
}

impl ConnectionOwner {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionOwner::Exchange,
            2 => ConnectionOwner::WebSocket,
            _ => ConnectionOwner::Pool,
        }
    }
}

pub type SocketReadHalf = ReadHalf<BoxedSocket>;
pub type SocketWriteHalf = WriteHalf<BoxedSocket>;

/// Inbound side of an owned connection: bytes the HTTP engine had already
/// buffered past the response head, then the live socket.
pub type ConnectionSource = Chain<Cursor<Bytes>, SocketReadHalf>;

/// A checked-out pool socket plus its ownership state.
pub struct ClientConnection {
    id: u64,
    url: Url,
    pool: ClientSocketPool,
    owner: AtomicU8,
    socket: Option<BoxedSocket>,
    leftover: Bytes,
    reused: bool,
    keep_alive: bool,
    settled: bool,
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("url", &self.url.as_str())
            .field("owner", &self.owner())
            .field("has_socket", &self.socket.is_some())
            .field("reused", &self.reused)
            .finish()
    }
}

impl ClientConnection {
    /// Wrap a socket the pool just handed out. The exchange owns it.
    pub fn checked_out(pool: ClientSocketPool, url: Url, socket: BoxedSocket, reused: bool) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            url,
            pool,
            owner: AtomicU8::new(ConnectionOwner::Exchange as u8),
            socket: Some(socket),
            leftover: Bytes::new(),
            reused,
            keep_alive: true,
            settled: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The pool key this connection belongs to (`http`/`https` form).
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn owner(&self) -> ConnectionOwner {
        ConnectionOwner::from_u8(self.owner.load(Ordering::Acquire))
    }

    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Lend the socket to the HTTP codec for the duration of an exchange.
    pub fn take_socket(&mut self) -> Option<BoxedSocket> {
        self.socket.take()
    }

    /// Put the socket back after an exchange, together with any bytes the
    /// codec read past the end of the response.
    pub fn restore_socket(&mut self, socket: BoxedSocket, leftover: Bytes) {
        self.socket = Some(socket);
        self.leftover = leftover;
    }

    /// Mark the connection as not reusable for further HTTP requests.
    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }

    pub fn has_socket(&self) -> bool {
        self.socket.is_some()
    }

    /// Atomically move ownership from the HTTP exchange to a WebSocket.
    ///
    /// Returns false if the connection is owned by anyone other than the
    /// exchange that served the handshake.
    pub fn claim_exclusive_ownership(&self) -> bool {
        self.owner
            .compare_exchange(
                ConnectionOwner::Exchange as u8,
                ConnectionOwner::WebSocket as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Give the connection back to the pool.
    ///
    /// The socket re-enters the idle list only when it is intact: present,
    /// keep-alive, no unread leftover bytes, still connected. Otherwise the
    /// pool slot is freed and the socket closed.
    pub fn release_to_pool(mut self) {
        self.settle();
    }

    fn settle(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        let previous = self.owner.swap(ConnectionOwner::Pool as u8, Ordering::AcqRel);

        match self.socket.take() {
            Some(socket) if self.keep_alive && self.leftover.is_empty() => {
                tracing::debug!(
                    id = self.id,
                    url = %self.url,
                    from = ?ConnectionOwner::from_u8(previous),
                    "returning connection to pool"
                );
                self.pool.release_socket(&self.url, socket);
            }
            _ => {
                tracing::debug!(id = self.id, url = %self.url, "discarding connection");
                self.pool.discard_socket(&self.url);
            }
        }
    }

    /// Split an owned connection into framed-I/O halves.
    ///
    /// Only valid after [`claim_exclusive_ownership`](Self::claim_exclusive_ownership)
    /// succeeded.
    pub fn into_owned_io(mut self) -> Result<OwnedIo, NetError> {
        if self.owner() != ConnectionOwner::WebSocket {
            return Err(NetError::IllegalState("Connection is owned by another party"));
        }
        let socket = self.socket.take().ok_or(NetError::SocketNotConnected)?;
        let leftover = std::mem::take(&mut self.leftover);
        let (read, write) = tokio::io::split(socket);

        Ok(OwnedIo {
            source: Cursor::new(leftover).chain(read),
            sink: write,
            recycler: ConnectionRecycler::new(self),
        })
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        // An abandoned handle must still free its pool slot.
        self.settle();
    }
}

/// Raw I/O of a connection owned by a WebSocket.
pub struct OwnedIo {
    pub source: ConnectionSource,
    pub sink: SocketWriteHalf,
    pub recycler: ConnectionRecycler,
}

struct RecycleState {
    connection: Option<ClientConnection>,
    read: Option<SocketReadHalf>,
    write: Option<SocketWriteHalf>,
    reusable: bool,
}

/// Reunites the two halves of an owned socket and releases the connection.
///
/// The reader task and the session each return their half independently;
/// whichever comes back second triggers the release. A half returned as
/// unclean (unread buffered bytes, protocol state unknown) makes the whole
/// connection non-reusable.
#[derive(Clone)]
pub struct ConnectionRecycler {
    state: Arc<Mutex<RecycleState>>,
}

impl ConnectionRecycler {
    fn new(connection: ClientConnection) -> Self {
        Self {
            state: Arc::new(Mutex::new(RecycleState {
                connection: Some(connection),
                read: None,
                write: None,
                reusable: true,
            })),
        }
    }

    pub fn return_read_half(&self, source: ConnectionSource, clean: bool) {
        let (leftover, read) = source.into_inner();
        let fully_drained = leftover.position() as usize >= leftover.get_ref().len();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.reusable &= clean && fully_drained;
        state.read = Some(read);
        Self::try_release(&mut state);
    }

    pub fn return_write_half(&self, sink: SocketWriteHalf, clean: bool) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.reusable &= clean;
        state.write = Some(sink);
        Self::try_release(&mut state);
    }

    /// True once both halves came back and the connection was released.
    pub fn is_released(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.connection.is_none()
    }

    fn try_release(state: &mut RecycleState) {
        if state.read.is_none() || state.write.is_none() {
            return;
        }
        let (Some(read), Some(write), Some(mut connection)) =
            (state.read.take(), state.write.take(), state.connection.take())
        else {
            return;
        };

        connection.restore_socket(read.unsplit(write), Bytes::new());
        connection.set_keep_alive(state.reusable);
        connection.release_to_pool();
    }
}
