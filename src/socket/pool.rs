use crate::base::neterror::NetError;
use crate::socket::connectjob::ConnectJob;
use crate::socket::stream::BoxedSocket;
use crate::socket::tls::TlsConfig;
use dashmap::DashMap;
use std::cmp::Ordering as CmpOrdering;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use url::Url;

/// Request priority (matches Chromium's RequestPriority).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum RequestPriority {
    Throttled = 0,
    Idle = 1,
    Lowest = 2,
    Low = 3,
    #[default]
    Medium = 4,
    Highest = 5,
}

/// Pool limits and idle timeouts.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Sockets per (scheme, host, port). Chromium uses 6.
    pub max_sockets_per_group: usize,
    /// Sockets across all groups. Chromium uses 256.
    pub max_sockets_total: usize,
    /// How long a previously used idle socket is kept.
    pub used_idle_timeout: Duration,
    /// How long a never used idle socket is kept.
    pub unused_idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sockets_per_group: 6,
            max_sockets_total: 256,
            used_idle_timeout: Duration::from_secs(300),
            unused_idle_timeout: Duration::from_secs(10),
        }
    }
}

/// Identifies a connection group (scheme, host, port).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupId {
    scheme: String,
    host: String,
    port: u16,
}

impl GroupId {
    fn from_url(url: &Url) -> Option<Self> {
        Some(GroupId {
            scheme: url.scheme().to_string(),
            host: url.host_str()?.to_string(),
            port: url.port_or_known_default()?,
        })
    }
}

/// A pending socket request waiting in queue.
struct PendingRequest {
    priority: RequestPriority,
    sender: oneshot::Sender<Result<(BoxedSocket, bool), NetError>>,
    url: Url,
    created_at: Instant,
}

impl PartialEq for PendingRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.created_at == other.created_at
    }
}

impl Eq for PendingRequest {}

impl PartialOrd for PendingRequest {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingRequest {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Higher priority first, older requests first (FIFO within priority)
        match self.priority.cmp(&other.priority) {
            CmpOrdering::Equal => other.created_at.cmp(&self.created_at),
            other => other,
        }
    }
}

/// Idle socket with metadata for timeout tracking.
struct IdleSocket {
    socket: BoxedSocket,
    /// When this socket was returned to the pool
    start_time: Instant,
    /// Whether the socket was ever used for data transfer
    was_used: bool,
}

impl IdleSocket {
    /// Chromium's IdleSocket::IsUsable(): a used socket must also be idle,
    /// unread bytes on it belong to some earlier exchange.
    fn is_usable(&self) -> bool {
        if self.was_used {
            self.socket.is_connected_and_idle()
        } else {
            self.socket.is_connected()
        }
    }
}

/// Per-group state tracking.
struct Group {
    idle_sockets: VecDeque<IdleSocket>,
    active_count: usize,
    pending_requests: Vec<PendingRequest>,
}

impl Group {
    fn new() -> Self {
        Self { idle_sockets: VecDeque::new(), active_count: 0, pending_requests: Vec::new() }
    }

    fn total_slots(&self) -> usize {
        self.active_count + self.idle_sockets.len()
    }

    fn has_available_slot(&self, max_per_group: usize) -> bool {
        self.total_slots() < max_per_group
    }

    fn pop_highest_priority_request(&mut self) -> Option<PendingRequest> {
        // Waiters whose caller went away are skipped.
        self.pending_requests.retain(|r| !r.sender.is_closed());
        let max_idx = self
            .pending_requests
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.cmp(b))
            .map(|(i, _)| i)?;
        Some(self.pending_requests.swap_remove(max_idx))
    }
}

/// Manages a pool of sockets, enforcing Chromium-like limits.
/// Requests beyond the limits are queued until a socket is released.
///
/// A socket handed out by [`request_socket`](Self::request_socket) counts as
/// active until it comes back through [`release_socket`](Self::release_socket)
/// or [`discard_socket`](Self::discard_socket); WebSocket upgrades keep their
/// socket active for the whole session.
#[derive(Clone)]
pub struct ClientSocketPool {
    config: Arc<PoolConfig>,
    tls: Arc<TlsConfig>,
    groups: Arc<DashMap<GroupId, Group>>,
    total_active: Arc<AtomicUsize>,
}

impl std::fmt::Debug for ClientSocketPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSocketPool")
            .field("max_sockets_per_group", &self.config.max_sockets_per_group)
            .field("max_sockets_total", &self.config.max_sockets_total)
            .field("total_active", &self.total_active.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for ClientSocketPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientSocketPool {
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default(), TlsConfig::default())
    }

    pub fn with_config(config: PoolConfig, tls: TlsConfig) -> Self {
        Self {
            config: Arc::new(config),
            tls: Arc::new(tls),
            groups: Arc::new(DashMap::new()),
            total_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Request a socket with default priority.
    /// Returns the socket and whether it was reused from the idle list.
    pub async fn request_socket(&self, url: &Url) -> Result<(BoxedSocket, bool), NetError> {
        self.request_socket_with_priority(url, RequestPriority::default()).await
    }

    /// Request a socket with specified priority.
    /// If limits are reached, the request is queued and will be fulfilled when a socket becomes available.
    pub async fn request_socket_with_priority(
        &self,
        url: &Url,
        priority: RequestPriority,
    ) -> Result<(BoxedSocket, bool), NetError> {
        let group_id = GroupId::from_url(url).ok_or(NetError::InvalidUrl)?;

        if let Some(result) = self.try_get_socket_immediate(&group_id, url).await? {
            return Ok(result);
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut group = self.groups.entry(group_id).or_insert_with(Group::new);
            group.pending_requests.push(PendingRequest {
                priority,
                sender: tx,
                url: url.clone(),
                created_at: Instant::now(),
            });
        }
        tracing::debug!(url = %url, ?priority, "socket request queued");

        rx.await.map_err(|_| NetError::ConnectionAborted)?
    }

    /// Try to get a socket immediately without queuing.
    async fn try_get_socket_immediate(
        &self,
        group_id: &GroupId,
        url: &Url,
    ) -> Result<Option<(BoxedSocket, bool)>, NetError> {
        let mut group = self.groups.entry(group_id.clone()).or_insert_with(Group::new);

        // 1. Check for idle socket
        while let Some(idle_socket) = group.idle_sockets.pop_front() {
            if idle_socket.is_usable() {
                group.active_count += 1;
                self.total_active.fetch_add(1, Ordering::Relaxed);
                return Ok(Some((idle_socket.socket, true)));
            }
            tracing::debug!(url = %url, "dropping unusable idle socket");
        }

        // 2. Check limits
        if !group.has_available_slot(self.config.max_sockets_per_group) {
            return Ok(None);
        }
        if self.total_active.load(Ordering::Relaxed) >= self.config.max_sockets_total {
            return Ok(None);
        }

        // 3. Create new connection
        group.active_count += 1;
        self.total_active.fetch_add(1, Ordering::Relaxed);
        drop(group); // Release lock before async connect

        match ConnectJob::connect(url, &self.tls).await {
            Ok(socket) => Ok(Some((BoxedSocket::new(socket), false))),
            Err(e) => {
                self.release_slot(group_id);
                Err(e)
            }
        }
    }

    fn release_slot(&self, group_id: &GroupId) {
        if let Some(mut group) = self.groups.get_mut(group_id) {
            group.active_count = group.active_count.saturating_sub(1);
        }
        let _ = self
            .total_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Release a socket back to the pool.
    ///
    /// A socket that is no longer connected is dropped and only its slot is
    /// freed.
    pub fn release_socket(&self, url: &Url, socket: BoxedSocket) {
        let Some(group_id) = GroupId::from_url(url) else {
            return;
        };

        if !socket.is_connected_and_idle() {
            tracing::debug!(url = %url, "released socket is not reusable, discarding");
            drop(socket);
            self.discard_socket(url);
            return;
        }

        let pending_request = {
            let mut group = self.groups.entry(group_id.clone()).or_insert_with(Group::new);
            group.pop_highest_priority_request()
        };

        if let Some(request) = pending_request {
            // Hand socket to waiting request; the slot stays active.
            if let Err(Ok((socket, _))) = request.sender.send(Ok((socket, true))) {
                self.park_idle(&group_id, socket);
            }
        } else {
            self.park_idle(&group_id, socket);
        }
    }

    fn park_idle(&self, group_id: &GroupId, socket: BoxedSocket) {
        self.release_slot(group_id);
        let mut group = self.groups.entry(group_id.clone()).or_insert_with(Group::new);
        group.idle_sockets.push_back(IdleSocket {
            socket,
            start_time: Instant::now(),
            was_used: true,
        });
    }

    /// Discard a socket without returning it to the pool.
    pub fn discard_socket(&self, url: &Url) {
        let Some(group_id) = GroupId::from_url(url) else {
            return;
        };

        self.release_slot(&group_id);
        let pending = self.groups.get_mut(&group_id).and_then(|mut g| g.pop_highest_priority_request());

        let Some(request) = pending else {
            return;
        };

        // Discards can happen from Drop impls outside of any runtime.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            let _ = request.sender.send(Err(NetError::ConnectionAborted));
            return;
        };

        // Start a new connection for the waiting request
        let pool = self.clone();
        handle.spawn(async move {
            let result = pool.try_get_socket_immediate(&group_id, &request.url).await;
            let _ = match result {
                Ok(Some(socket_result)) => request.sender.send(Ok(socket_result)),
                Ok(None) => request.sender.send(Err(NetError::PreconnectMaxSocketLimit)),
                Err(e) => request.sender.send(Err(e)),
            };
        });
    }

    /// Get number of pending requests for a group.
    pub fn pending_request_count(&self, url: &Url) -> usize {
        GroupId::from_url(url)
            .and_then(|gid| self.groups.get(&gid).map(|g| g.pending_requests.len()))
            .unwrap_or(0)
    }

    /// Get total active socket count.
    pub fn total_active_count(&self) -> usize {
        self.total_active.load(Ordering::Relaxed)
    }

    /// Get total idle socket count across all groups.
    pub fn idle_socket_count(&self) -> usize {
        self.groups.iter().map(|g| g.idle_sockets.len()).sum()
    }

    /// Clean up idle sockets based on timeout.
    pub fn cleanup_idle_sockets(&self) {
        let now = Instant::now();
        let mut groups_to_remove = Vec::new();

        for mut entry in self.groups.iter_mut() {
            let group = entry.value_mut();

            group.idle_sockets.retain(|idle_socket| {
                let elapsed = now.duration_since(idle_socket.start_time);
                let timeout = if idle_socket.was_used {
                    self.config.used_idle_timeout
                } else {
                    self.config.unused_idle_timeout
                };
                elapsed < timeout && idle_socket.socket.is_connected()
            });

            if group.idle_sockets.is_empty()
                && group.active_count == 0
                && group.pending_requests.is_empty()
            {
                groups_to_remove.push(entry.key().clone());
            }
        }

        for gid in groups_to_remove {
            self.groups.remove_if(&gid, |_, g| {
                g.idle_sockets.is_empty() && g.active_count == 0 && g.pending_requests.is_empty()
            });
        }
    }

    /// Start a background task to periodically clean up idle sockets.
    /// Should be called once during initialization.
    pub fn start_cleanup_task(&self) -> tokio::task::JoinHandle<()> {
        const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

        let pool = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(CLEANUP_INTERVAL).await;
                pool.cleanup_idle_sockets();
            }
        })
    }
}
