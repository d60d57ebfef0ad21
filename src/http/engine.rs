//! Upgrade-request execution over pooled connections.
//!
//! The engine runs exactly one HTTP/1.1 request/response exchange on a socket
//! checked out of the [`ClientSocketPool`] and then hands the socket back to
//! the caller inside a [`ClientConnection`], whatever the status code. It does
//! not follow redirects and does not retry: a failed exchange is terminal.

use crate::base::neterror::NetError;
use crate::http::response::HttpResponse;
use crate::socket::connection::ClientConnection;
use crate::socket::pool::ClientSocketPool;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{CONNECTION, HOST};
use http::{Request, StatusCode, Version};
use http_body_util::{BodyExt, Empty};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::sync::oneshot;
use url::Url;

/// Outcome of one upgrade exchange.
#[derive(Debug)]
pub struct UpgradeExchange {
    pub response: HttpResponse,
    /// The connection that served the exchange, still owned by the exchange.
    pub connection: ClientConnection,
}

/// Executes WebSocket upgrade requests.
///
/// The request arrives in its HTTP form (`http`/`https` URI, upgrade headers
/// already set). Implementations must return the serving connection with
/// its owner set to [`ConnectionOwner::Exchange`](crate::socket::connection::ConnectionOwner).
pub trait HttpEngine: Send + Sync + 'static {
    fn execute_upgrade(
        &self,
        request: Request<()>,
    ) -> BoxFuture<'_, Result<UpgradeExchange, NetError>>;
}

/// [`HttpEngine`] backed by a [`ClientSocketPool`] and hyper's HTTP/1.1 codec.
#[derive(Debug, Clone, Default)]
pub struct PooledHttpEngine {
    pool: ClientSocketPool,
}

impl PooledHttpEngine {
    pub fn new(pool: ClientSocketPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &ClientSocketPool {
        &self.pool
    }

    async fn execute(&self, request: Request<()>) -> Result<UpgradeExchange, NetError> {
        let url = Url::parse(&request.uri().to_string()).map_err(|_| NetError::InvalidUrl)?;
        let (socket, reused) = self.pool.request_socket(&url).await?;
        tracing::debug!(url = %url, reused, "executing upgrade request");

        let mut connection = ClientConnection::checked_out(self.pool.clone(), url.clone(), socket, reused);
        let socket = connection.take_socket().ok_or(NetError::SocketNotConnected)?;

        let (mut sender, conn) = http1::handshake(TokioIo::new(socket)).await.map_err(|e| {
            tracing::debug!(url = %url, error = %e, "HTTP/1.1 handshake failed");
            NetError::ConnectionFailed
        })?;

        // Drive the connection without shutting the socket down, so that it
        // comes back to us after a 101 as well as after a plain response.
        let (parts_tx, parts_rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = parts_tx.send(conn.without_shutdown().await);
        });

        let response = sender.send_request(to_wire_request(request, &url)?).await.map_err(|e| {
            tracing::debug!(url = %url, error = %e, "upgrade request failed");
            NetError::ConnectionClosed
        })?;

        let (parts, body) = response.into_parts();
        let body = if parts.status == StatusCode::SWITCHING_PROTOCOLS {
            Bytes::new()
        } else {
            body.collect().await.map_err(|_| NetError::HttpBodyError)?.to_bytes()
        };
        drop(sender);

        match parts_rx.await {
            Ok(Ok(io)) => connection.restore_socket(io.io.into_inner(), io.read_buf),
            Ok(Err(e)) => {
                tracing::debug!(url = %url, error = %e, "connection ended with the exchange");
            }
            Err(_) => tracing::debug!(url = %url, "connection driver vanished"),
        }
        if !is_keep_alive(&parts) {
            connection.set_keep_alive(false);
        }

        tracing::debug!(url = %url, status = parts.status.as_u16(), "upgrade response received");
        Ok(UpgradeExchange { response: HttpResponse::from_parts(parts, body), connection })
    }
}

impl HttpEngine for PooledHttpEngine {
    fn execute_upgrade(
        &self,
        request: Request<()>,
    ) -> BoxFuture<'_, Result<UpgradeExchange, NetError>> {
        Box::pin(self.execute(request))
    }
}

/// Origin-form URI and an explicit Host header, as HTTP/1.1 servers expect.
fn to_wire_request(request: Request<()>, url: &Url) -> Result<Request<Empty<Bytes>>, NetError> {
    let (mut parts, ()) = request.into_parts();
    parts.uri = url[url::Position::BeforePath..].parse().map_err(|_| NetError::InvalidUrl)?;
    parts.version = Version::HTTP_11;

    if !parts.headers.contains_key(HOST) {
        let host = url.host_str().ok_or(NetError::InvalidUrl)?;
        let value = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        parts.headers.insert(HOST, value.parse().map_err(|_| NetError::InvalidUrl)?);
    }

    Ok(Request::from_parts(parts, Empty::new()))
}

fn is_keep_alive(parts: &http::response::Parts) -> bool {
    let close = parts
        .headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("close"));
    !close && parts.version != Version::HTTP_10
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::connection::ConnectionOwner;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn read_head(socket: &mut tokio::net::TcpStream) -> String {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            socket.read_exact(&mut byte).await.unwrap();
            head.push(byte[0]);
        }
        String::from_utf8(head).unwrap()
    }

    #[test]
    fn test_wire_request_is_origin_form_with_host() {
        let url = Url::parse("http://example.com:8080/chat?room=1").unwrap();
        let request = Request::get(url.as_str()).body(()).unwrap();
        let wire = to_wire_request(request, &url).unwrap();

        assert_eq!(wire.uri(), "/chat?room=1");
        assert_eq!(wire.headers()[HOST], "example.com:8080");
    }

    #[test]
    fn test_connection_close_disables_keep_alive() {
        let (parts, ()) =
            http::Response::builder().header("Connection", "close").body(()).unwrap().into_parts();
        assert!(!is_keep_alive(&parts));

        let (parts, ()) = http::Response::builder().body(()).unwrap().into_parts();
        assert!(is_keep_alive(&parts));
    }

    #[tokio::test]
    async fn test_non_upgrade_response_returns_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let head = read_head(&mut socket).await;
            assert!(head.starts_with("GET /chat HTTP/1.1\r\n"));
            socket
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 4\r\n\r\nnope")
                .await
                .unwrap();
            // Keep the socket open until the client is done.
            let mut rest = Vec::new();
            let _ = socket.read_to_end(&mut rest).await;
        });

        let engine = PooledHttpEngine::default();
        let request = Request::get(format!("http://{addr}/chat")).body(()).unwrap();
        let exchange = engine.execute_upgrade(request).await.unwrap();

        assert_eq!(exchange.response.code(), 404);
        assert_eq!(exchange.response.body().as_ref(), b"nope");
        assert_eq!(exchange.connection.owner(), ConnectionOwner::Exchange);
        assert!(exchange.connection.has_socket());

        exchange.connection.release_to_pool();
        assert_eq!(engine.pool().idle_socket_count(), 1);
        assert_eq!(engine.pool().total_active_count(), 0);
    }

    #[tokio::test]
    async fn test_switching_protocols_keeps_early_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_head(&mut socket).await;
            socket
                .write_all(
                    b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\
                      Connection: Upgrade\r\n\r\n\x81\x02hi",
                )
                .await
                .unwrap();
            let mut rest = Vec::new();
            let _ = socket.read_to_end(&mut rest).await;
        });

        let engine = PooledHttpEngine::default();
        let request = Request::get(format!("http://{addr}/ws"))
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .body(())
            .unwrap();
        let exchange = engine.execute_upgrade(request).await.unwrap();
        assert_eq!(exchange.response.code(), 101);

        let connection = exchange.connection;
        assert!(connection.claim_exclusive_ownership());
        let mut io = connection.into_owned_io().unwrap();
        let mut frame = [0u8; 4];
        io.source.read_exact(&mut frame).await.unwrap();
        assert_eq!(&frame, b"\x81\x02hi");
    }
}
