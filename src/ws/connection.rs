//! WebSocket session over an upgraded pooled connection.

use super::frame::Role;
use super::handshake::{self, HandshakeKey};
use super::listener::WebSocketListener;
use super::logging::{LoggingSink, LoggingSource};
use super::message::{CloseCode, CloseFrame, PayloadType};
use super::reader::{FrameReader, ReaderLoop};
use super::writer::{FrameWriter, MessageSink, WriterSlot};
use super::{entropy_random, SharedRandom};
use crate::base::neterror::{ErrorCategory, NetError};
use crate::http::engine::{HttpEngine, PooledHttpEngine, UpgradeExchange};
use crate::http::response::HttpResponse;
use crate::socket::connection::{ConnectionRecycler, ConnectionSource, SocketWriteHalf};
use bytes::Bytes;
use http::header::SEC_WEBSOCKET_PROTOCOL;
use http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use std::sync::Arc;
use tokio::io::{BufReader, BufWriter};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::Instrument;
use url::Url;

/// Inbound messages larger than this fail the reader with `MsgTooBig`.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

type SessionSource = BufReader<LoggingSource<ConnectionSource>>;
type SessionSink = BufWriter<LoggingSink<SocketWriteHalf>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    New,
    Connected,
    Closed,
}

/// Client WebSocket.
///
/// Lifecycle is `New -> Connected -> Closed`. [`connect`](Self::connect)
/// performs the upgrade and starts a reader task that feeds the listener;
/// the caller then sends from its own task. Sends are not serialized
/// beyond the frame writer's lock: one message at a time per session.
///
/// A send holds that lock until the bytes reach the socket, and the reader
/// needs it to answer pings. A peer that stops reading stalls both.
pub struct WebSocket {
    engine: Arc<dyn HttpEngine>,
    request: Request<()>,
    key: HandshakeKey,
    random: SharedRandom,
    max_message_size: usize,
    state: SessionState,
    writer: Option<WriterSlot<SessionSink>>,
    recycler: Option<ConnectionRecycler>,
    reader_task: Option<JoinHandle<()>>,
    reader_stop: Option<Arc<Notify>>,
}

impl std::fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("uri", self.request.uri())
            .field("state", &self.state)
            .field("reader_running", &self.is_reader_running())
            .finish()
    }
}

impl WebSocket {
    /// Prepare a session for a `GET ws://` or `GET wss://` request.
    ///
    /// No I/O happens here. The nonce is drawn from `random`, which also
    /// supplies the mask keys of every outbound frame.
    pub fn new(engine: Arc<dyn HttpEngine>, request: Request<()>, random: SharedRandom) -> Result<Self, NetError> {
        let key = HandshakeKey::generate(&random);
        let request = handshake::build_upgrade_request(request, &key)?;

        Ok(Self {
            engine,
            request,
            key,
            random,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            state: SessionState::New,
            writer: None,
            recycler: None,
            reader_task: None,
            reader_stop: None,
        })
    }

    /// The upgrade request as sent (`http`/`https` URI, upgrade headers).
    pub fn request(&self) -> &Request<()> {
        &self.request
    }

    /// Nonce, request key and expected accept digest of this session.
    pub fn handshake_key(&self) -> &HandshakeKey {
        &self.key
    }

    /// True once the session was closed locally.
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// True while the reader task is alive. It outlives `close()` until the
    /// transport fails.
    pub fn is_reader_running(&self) -> bool {
        self.reader_task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Perform the opening handshake and start the reader task.
    ///
    /// A response other than `101` is returned unchanged and leaves the
    /// session unconnected; the connection goes back to the pool. A `101`
    /// with wrong upgrade headers or accept digest is a protocol error.
    pub async fn connect(&mut self, listener: Arc<dyn WebSocketListener>) -> Result<HttpResponse, NetError> {
        match self.state {
            SessionState::New => {}
            SessionState::Connected => return Err(NetError::IllegalState("Already connected")),
            SessionState::Closed => return Err(NetError::IllegalState("Closed")),
        }

        let UpgradeExchange { response, mut connection } =
            self.engine.execute_upgrade(handshake::clone_request(&self.request)).await?;

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            tracing::debug!(status = response.code(), uri = %self.request.uri(), "upgrade rejected");
            connection.release_to_pool();
            return Ok(response);
        }
        if let Err(e) = handshake::validate_upgrade_response(&response, &self.key) {
            tracing::debug!(error = %e, "handshake validation failed");
            // The peer already switched protocols; the socket is no longer HTTP.
            connection.set_keep_alive(false);
            connection.release_to_pool();
            return Err(e);
        }

        if !connection.claim_exclusive_ownership() {
            tracing::warn!(id = connection.id(), owner = ?connection.owner(), "connection already claimed");
            return Err(NetError::IllegalState("Connection is owned by another party"));
        }
        let io = connection.into_owned_io()?;

        let source: SessionSource = BufReader::new(LoggingSource::new(io.source));
        let sink: SessionSink = BufWriter::new(LoggingSink::new(io.sink));
        let writer: WriterSlot<SessionSink> =
            Arc::new(Mutex::new(Some(FrameWriter::new(Role::Client, sink, self.random.clone()))));
        let reader = FrameReader::new(Role::Client, source, listener, writer.clone())
            .with_max_message_size(self.max_message_size);

        let reader_loop = ReaderLoop::new(reader);
        self.reader_stop = Some(reader_loop.stop_handle());
        self.reader_task = Some(self.spawn_reader(reader_loop, io.recycler.clone()));
        self.writer = Some(writer);
        self.recycler = Some(io.recycler);
        self.state = SessionState::Connected;

        tracing::debug!(uri = %self.request.uri(), "websocket connected");
        Ok(response)
    }

    fn spawn_reader(
        &self,
        reader_loop: ReaderLoop<SessionSource, SessionSink>,
        recycler: ConnectionRecycler,
    ) -> JoinHandle<()> {
        let span = tracing::info_span!("ws_reader", url = %self.request.uri());
        tokio::spawn(
            async move {
                let (source, error) = reader_loop.run().await;
                let clean = source.buffer().is_empty()
                    && error.category() == ErrorCategory::TransportFailure
                    && !matches!(error, NetError::MsgTooBig | NetError::Aborted);
                recycler.return_read_half(source.into_inner().into_inner(), clean);
            }
            .instrument(span),
        )
    }

    /// Stop the reader task without waiting for a transport failure.
    ///
    /// The listener receives one final `on_failure` with
    /// [`NetError::Aborted`]. A frame cut off mid-read leaves the stream
    /// unusable, so the connection is discarded rather than pooled. No-op
    /// before `connect` or once the reader has ended.
    pub fn stop_reader(&self) {
        if let Some(stop) = &self.reader_stop {
            if self.is_reader_running() {
                stop.notify_one();
            }
        }
    }

    fn writer_slot(&self) -> Result<&WriterSlot<SessionSink>, NetError> {
        match self.state {
            SessionState::Closed => Err(NetError::IllegalState("Closed")),
            SessionState::New => Err(NetError::IllegalState("Not connected")),
            SessionState::Connected => self.writer.as_ref().ok_or(NetError::IllegalState("Not connected")),
        }
    }

    /// Open a streaming sink for one message.
    pub async fn new_message_sink(&self, payload_type: PayloadType) -> Result<MessageSink<SessionSink>, NetError> {
        let slot = self.writer_slot()?;
        MessageSink::open(slot.clone(), payload_type).await
    }

    /// Send a whole message; returns once it is written to the socket.
    pub async fn send_message(&self, payload_type: PayloadType, payload: impl AsRef<[u8]>) -> Result<(), NetError> {
        let slot = self.writer_slot()?;
        let mut guard = slot.lock().await;
        let writer = guard.as_mut().ok_or(NetError::IllegalState("Closed"))?;
        writer.send_message(payload_type, payload.as_ref()).await
    }

    /// Send one text message.
    pub async fn send_text(&self, text: impl AsRef<str>) -> Result<(), NetError> {
        self.send_message(PayloadType::Text, text.as_ref().as_bytes()).await
    }

    /// Send one binary message.
    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), NetError> {
        self.send_message(PayloadType::Binary, data.into()).await
    }

    /// Send a ping control frame (at most 125 bytes).
    pub async fn ping(&self, payload: impl AsRef<[u8]>) -> Result<(), NetError> {
        let slot = self.writer_slot()?;
        let mut guard = slot.lock().await;
        let writer = guard.as_mut().ok_or(NetError::IllegalState("Closed"))?;
        writer.write_ping(payload.as_ref()).await
    }

    /// Close with an empty close frame. See [`close_with`](Self::close_with).
    pub async fn close(&mut self) -> Result<(), NetError> {
        self.close_with(0, "").await
    }

    /// Send a close frame and give the connection back.
    ///
    /// Idempotent. Does not wait for the peer's close frame and does not stop
    /// the reader task; the listener keeps receiving until the transport
    /// fails. The socket re-enters the pool once the reader hands back its
    /// half, and only if it is still healthy then.
    pub async fn close_with(&mut self, code: u16, reason: &str) -> Result<(), NetError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        // A bad code or reason must not cost the caller the session.
        CloseFrame::new(CloseCode(code), reason).encode()?;
        self.state = SessionState::Closed;

        let Some(slot) = self.writer.take() else {
            return Ok(());
        };
        let Some(mut writer) = slot.lock().await.take() else {
            return Ok(());
        };

        let result = if writer.is_close_sent() { Ok(()) } else { writer.write_close(code, reason).await };
        let sink = writer.into_sink();
        let clean = result.is_ok() && sink.buffer().is_empty();
        if let Some(recycler) = self.recycler.take() {
            recycler.return_write_half(sink.into_inner().into_inner(), clean);
        }
        tracing::debug!(uri = %self.request.uri(), code, "websocket closed");
        result
    }
}

/// WebSocket connection builder.
#[derive(Clone)]
pub struct WebSocketBuilder {
    url: Option<Url>,
    headers: HeaderMap,
    subprotocols: Vec<String>,
    random: Option<SharedRandom>,
    engine: Option<Arc<dyn HttpEngine>>,
    max_message_size: usize,
}

impl std::fmt::Debug for WebSocketBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketBuilder")
            .field("url", &self.url.as_ref().map(Url::as_str))
            .field("headers", &self.headers)
            .field("subprotocols", &self.subprotocols)
            .field("max_message_size", &self.max_message_size)
            .finish()
    }
}

impl Default for WebSocketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketBuilder {
    pub fn new() -> Self {
        Self {
            url: None,
            headers: HeaderMap::new(),
            subprotocols: Vec::new(),
            random: None,
            engine: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Set the URL to connect to.
    pub fn url(mut self, url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|_| NetError::InvalidUrl)?;

        // Validate scheme
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(NetError::InvalidArgument(format!(
                "Request url must use 'ws' or 'wss' scheme: {url}"
            )));
        }

        self.url = Some(url);
        Ok(self)
    }

    /// Add a header to the WebSocket handshake.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.headers.append(name, value);
        }
        self
    }

    /// Add a subprotocol.
    pub fn subprotocol(mut self, protocol: impl Into<String>) -> Self {
        self.subprotocols.push(protocol.into());
        self
    }

    /// Randomness for the nonce and mask keys. Defaults to OS entropy.
    pub fn random(mut self, random: SharedRandom) -> Self {
        self.random = Some(random);
        self
    }

    /// Engine that executes the upgrade. Defaults to a fresh
    /// [`PooledHttpEngine`].
    pub fn engine(mut self, engine: Arc<dyn HttpEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Get the URL if set.
    pub fn get_url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// Get the headers.
    pub fn get_headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Check if secure (wss://).
    pub fn is_secure(&self) -> bool {
        self.url.as_ref().is_some_and(|u| u.scheme() == "wss")
    }

    pub fn build(self) -> Result<WebSocket, NetError> {
        let url = self.url.ok_or(NetError::InvalidUrl)?;

        let mut request = Request::get(url.as_str()).body(()).map_err(|_| NetError::InvalidUrl)?;
        *request.headers_mut() = self.headers;
        if !self.subprotocols.is_empty() {
            let value = HeaderValue::try_from(self.subprotocols.join(", "))
                .map_err(|_| NetError::InvalidArgument("Invalid subprotocol".into()))?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }

        let engine = self.engine.unwrap_or_else(|| Arc::new(PooledHttpEngine::default()));
        let random = self.random.unwrap_or_else(entropy_random);
        let mut ws = WebSocket::new(engine, request, random)?;
        ws.max_message_size = self.max_message_size;
        Ok(ws)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::connection::ClientConnection;
    use crate::socket::pool::ClientSocketPool;
    use crate::socket::stream::BoxedSocket;
    use crate::ws::frame::{apply_mask, FrameHeader};
    use crate::ws::handshake::accept_digest;
    use crate::ws::listener::{ChannelListener, WebSocketEvent};
    use futures::future::BoxFuture;
    use rand::rngs::mock::StepRng;
    use std::sync::Mutex as StdMutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    /// Serves one canned response over an in-memory socket and keeps the
    /// server end for the test.
    struct MockEngine {
        pool: ClientSocketPool,
        status: StatusCode,
        headers: Vec<(&'static str, String)>,
        server: StdMutex<Option<DuplexStream>>,
        precheck_owner: bool,
    }

    impl MockEngine {
        fn new(status: StatusCode, headers: Vec<(&'static str, String)>) -> Arc<Self> {
            Arc::new(Self {
                pool: ClientSocketPool::new(),
                status,
                headers,
                server: StdMutex::new(None),
                precheck_owner: false,
            })
        }

        fn take_server(&self) -> DuplexStream {
            self.server.lock().unwrap().take().unwrap()
        }
    }

    impl HttpEngine for MockEngine {
        fn execute_upgrade(&self, request: Request<()>) -> BoxFuture<'_, Result<UpgradeExchange, NetError>> {
            Box::pin(async move {
                let (client, server) = tokio::io::duplex(4096);
                *self.server.lock().unwrap() = Some(server);
                let url = Url::parse(&request.uri().to_string()).unwrap();
                let connection =
                    ClientConnection::checked_out(self.pool.clone(), url, BoxedSocket::new(client), false);
                if self.precheck_owner {
                    assert!(connection.claim_exclusive_ownership());
                }

                let mut headers = HeaderMap::new();
                for (name, value) in &self.headers {
                    headers.insert(*name, value.parse().unwrap());
                }
                Ok(UpgradeExchange { response: HttpResponse::new(self.status, headers), connection })
            })
        }
    }

    fn sequential_random() -> SharedRandom {
        Arc::new(StdMutex::new(StepRng::new(0x0807060504030201, 0x0808080808080808)))
    }

    const KEY: &str = "AQIDBAUGBwgJCgsMDQ4PEA==";

    fn upgrade_headers(accept: String) -> Vec<(&'static str, String)> {
        vec![
            ("upgrade", "websocket".into()),
            ("connection", "Upgrade".into()),
            ("sec-websocket-accept", accept),
        ]
    }

    fn websocket(engine: Arc<MockEngine>) -> WebSocket {
        let request = Request::get("ws://example.com/chat").body(()).unwrap();
        WebSocket::new(engine, request, sequential_random()).unwrap()
    }

    async fn read_client_frame(server: &mut DuplexStream) -> (FrameHeader, Vec<u8>) {
        let header = FrameHeader::read(server, Role::Server).await.unwrap();
        let mut payload = vec![0u8; header.payload_len as usize];
        server.read_exact(&mut payload).await.unwrap();
        if let Some(mask) = header.mask {
            apply_mask(&mut payload, mask);
        }
        (header, payload)
    }

    #[test]
    fn test_new_builds_upgrade_request() {
        let ws = websocket(MockEngine::new(StatusCode::NOT_FOUND, vec![]));
        assert_eq!(ws.request().uri(), "http://example.com/chat");
        assert_eq!(ws.request().headers()["Sec-WebSocket-Key"], KEY);
        assert_eq!(ws.request().headers()["Sec-WebSocket-Version"], "13");
        assert!(!ws.is_closed());
    }

    #[test]
    fn test_new_rejects_non_get() {
        let engine = MockEngine::new(StatusCode::NOT_FOUND, vec![]);
        let request = Request::put("ws://example.com/chat").body(()).unwrap();
        let err = WebSocket::new(engine, request, sequential_random()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidArgument);
    }

    #[tokio::test]
    async fn test_sends_before_connect_are_illegal() {
        let ws = websocket(MockEngine::new(StatusCode::NOT_FOUND, vec![]));
        assert!(matches!(
            ws.send_message(PayloadType::Text, "x").await,
            Err(NetError::IllegalState("Not connected"))
        ));
        assert!(matches!(
            ws.new_message_sink(PayloadType::Binary).await,
            Err(NetError::IllegalState("Not connected"))
        ));
    }

    #[tokio::test]
    async fn test_non_101_returns_response_and_releases() {
        let engine = MockEngine::new(StatusCode::NOT_FOUND, vec![]);
        let mut ws = websocket(engine.clone());
        let (listener, _events) = ChannelListener::new();

        let response = ws.connect(Arc::new(listener)).await.unwrap();
        assert_eq!(response.code(), 404);
        assert!(!ws.is_closed());
        assert!(!ws.is_reader_running());
        assert_eq!(engine.pool.idle_socket_count(), 1);
        assert!(matches!(ws.send_text("x").await, Err(NetError::IllegalState("Not connected"))));
    }

    #[tokio::test]
    async fn test_bad_accept_is_protocol_violation() {
        let engine = MockEngine::new(StatusCode::SWITCHING_PROTOCOLS, upgrade_headers("bogus".into()));
        let mut ws = websocket(engine.clone());
        let (listener, _events) = ChannelListener::new();

        let err = ws.connect(Arc::new(listener)).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ProtocolViolation);
        assert!(!ws.is_reader_running());
        assert_eq!(engine.pool.total_active_count(), 0);
        // The peer switched protocols, so the socket is not parked for HTTP.
        assert_eq!(engine.pool.idle_socket_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_upgrade_header_is_protocol_violation() {
        let headers = vec![("connection", "Upgrade".to_string()), ("sec-websocket-accept", accept_digest(KEY))];
        let engine = MockEngine::new(StatusCode::SWITCHING_PROTOCOLS, headers);
        let mut ws = websocket(engine);
        let (listener, _events) = ChannelListener::new();

        assert!(matches!(ws.connect(Arc::new(listener)).await, Err(NetError::WsProtocolError(_))));
        assert!(!ws.is_reader_running());
    }

    #[tokio::test]
    async fn test_claimed_connection_is_illegal_state() {
        let mut engine = MockEngine::new(StatusCode::SWITCHING_PROTOCOLS, upgrade_headers(accept_digest(KEY)));
        Arc::get_mut(&mut engine).unwrap().precheck_owner = true;
        let mut ws = websocket(engine);
        let (listener, _events) = ChannelListener::new();

        assert!(matches!(
            ws.connect(Arc::new(listener)).await,
            Err(NetError::IllegalState("Connection is owned by another party"))
        ));
    }

    #[tokio::test]
    async fn test_connected_session_sends_and_receives() {
        let engine = MockEngine::new(StatusCode::SWITCHING_PROTOCOLS, upgrade_headers(accept_digest(KEY)));
        let mut ws = websocket(engine.clone());
        let (listener, mut events) = ChannelListener::new();

        let response = ws.connect(Arc::new(listener)).await.unwrap();
        assert_eq!(response.code(), 101);
        assert!(ws.is_reader_running());
        assert!(!ws.is_closed());
        let mut server = engine.take_server();

        ws.send_text("hello").await.unwrap();
        let (header, payload) = read_client_frame(&mut server).await;
        assert!(header.mask.is_some());
        assert_eq!(payload, b"hello");

        let mut sink = ws.new_message_sink(PayloadType::Binary).await.unwrap();
        sink.write(b"ab");
        sink.close().await.unwrap();
        let (header, payload) = read_client_frame(&mut server).await;
        assert!(header.fin);
        assert_eq!(payload, b"ab");

        server.write_all(b"\x81\x02hi").await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            WebSocketEvent::Message(PayloadType::Text, Bytes::from_static(b"hi"))
        );

        assert!(matches!(
            ws.connect(Arc::new(ChannelListener::new().0)).await,
            Err(NetError::IllegalState("Already connected"))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_sends() {
        let engine = MockEngine::new(StatusCode::SWITCHING_PROTOCOLS, upgrade_headers(accept_digest(KEY)));
        let mut ws = websocket(engine.clone());
        let (listener, mut events) = ChannelListener::new();
        ws.connect(Arc::new(listener)).await.unwrap();
        let mut server = engine.take_server();

        ws.close().await.unwrap();
        assert!(ws.is_closed());
        let (header, payload) = read_client_frame(&mut server).await;
        assert_eq!(header.opcode, crate::ws::frame::OpCode::Close);
        assert!(payload.is_empty());

        ws.close().await.unwrap();
        assert!(matches!(ws.send_text("late").await, Err(NetError::IllegalState("Closed"))));
        assert!(matches!(
            ws.connect(Arc::new(ChannelListener::new().0)).await,
            Err(NetError::IllegalState("Closed"))
        ));

        // The reader still sees the peer's close, then the transport ending.
        server.write_all(b"\x88\x02\x03\xe8").await.unwrap();
        assert_eq!(events.recv().await.unwrap(), WebSocketEvent::Close(1000, String::new()));
        drop(server);
        assert!(matches!(events.recv().await.unwrap(), WebSocketEvent::Failure { .. }));
    }

    #[tokio::test]
    async fn test_invalid_close_keeps_session_open() {
        let engine = MockEngine::new(StatusCode::SWITCHING_PROTOCOLS, upgrade_headers(accept_digest(KEY)));
        let mut ws = websocket(engine.clone());
        let (listener, _events) = ChannelListener::new();
        ws.connect(Arc::new(listener)).await.unwrap();
        let mut server = engine.take_server();

        let err = ws.close_with(999, "").await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidArgument);
        let err = ws.close_with(0, "why").await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidArgument);
        assert!(!ws.is_closed());

        ws.send_text("still here").await.unwrap();
        let (_, payload) = read_client_frame(&mut server).await;
        assert_eq!(payload, b"still here");

        ws.close_with(1000, "bye").await.unwrap();
        assert!(ws.is_closed());
        let (header, payload) = read_client_frame(&mut server).await;
        assert_eq!(header.opcode, crate::ws::frame::OpCode::Close);
        assert_eq!(payload, b"\x03\xe8bye");
    }

    #[tokio::test]
    async fn test_connection_returns_after_reader_ends() {
        let engine = MockEngine::new(StatusCode::SWITCHING_PROTOCOLS, upgrade_headers(accept_digest(KEY)));
        let mut ws = websocket(engine.clone());
        let (listener, mut events) = ChannelListener::new();
        ws.connect(Arc::new(listener)).await.unwrap();
        let server = engine.take_server();

        // The write half is back but the reader still holds the other one.
        ws.close().await.unwrap();
        assert_eq!(engine.pool.idle_socket_count(), 0);

        drop(server);
        assert!(matches!(events.recv().await.unwrap(), WebSocketEvent::Failure { .. }));
        for _ in 0..50 {
            if !ws.is_reader_running() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!ws.is_reader_running());
        // An in-memory pipe cannot report the hang-up, so the pool keeps it.
        assert_eq!(engine.pool.idle_socket_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_reader_discards_connection() {
        let engine = MockEngine::new(StatusCode::SWITCHING_PROTOCOLS, upgrade_headers(accept_digest(KEY)));
        let mut ws = websocket(engine.clone());
        let (listener, mut events) = ChannelListener::new();
        ws.stop_reader();
        ws.connect(Arc::new(listener)).await.unwrap();
        let _server = engine.take_server();

        ws.stop_reader();
        match events.recv().await.unwrap() {
            WebSocketEvent::Failure { category, message } => {
                assert_eq!(category, ErrorCategory::TransportFailure);
                assert_eq!(message, "Operation aborted");
            }
            other => panic!("Expected failure, got {other:?}"),
        }
        for _ in 0..50 {
            if !ws.is_reader_running() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!ws.is_reader_running());

        // Sends still work until close; the socket is not pooled afterwards.
        ws.send_text("still open").await.unwrap();
        ws.close().await.unwrap();
        assert_eq!(engine.pool.idle_socket_count(), 0);
        assert_eq!(engine.pool.total_active_count(), 0);
    }

    #[test]
    fn test_builder_url() {
        let builder = WebSocketBuilder::new().url("ws://example.com/ws").unwrap();
        assert!(builder.get_url().is_some());
        assert!(!builder.is_secure());
        assert!(WebSocketBuilder::new().url("wss://example.com/ws").unwrap().is_secure());
        assert!(WebSocketBuilder::new().url("http://example.com").is_err());
    }

    #[test]
    fn test_builder_sets_headers_and_subprotocols() {
        let ws = WebSocketBuilder::new()
            .url("wss://example.com/feed")
            .unwrap()
            .header("Origin", "https://example.com")
            .subprotocol("chat")
            .subprotocol("superchat")
            .random(sequential_random())
            .build()
            .unwrap();

        let headers = ws.request().headers();
        assert_eq!(headers["Origin"], "https://example.com");
        assert_eq!(headers["Sec-WebSocket-Protocol"], "chat, superchat");
        assert_eq!(headers["Sec-WebSocket-Key"], KEY);
        assert_eq!(ws.request().uri(), "https://example.com/feed");
    }
}
