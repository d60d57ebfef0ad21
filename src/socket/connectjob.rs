use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::socket::client::SocketType;
use crate::socket::tls::TlsConfig;
use tokio::net::TcpStream;
use url::Url;

/// Manages the connection process: DNS -> TCP -> SSL.
/// Roughly equivalent to net::ConnectJob.
///
/// The URL is the HTTP form of the WebSocket target (`http`/`https`);
/// the scheme decides whether TLS is layered on top.
pub struct ConnectJob;

impl ConnectJob {
    pub async fn connect(url: &Url, tls: &TlsConfig) -> Result<SocketType, NetError> {
        let host = url.host_str().ok_or(NetError::InvalidUrl)?;
        let port = url.port_or_known_default().ok_or(NetError::InvalidUrl)?;

        // 1. DNS Resolution
        let addrs: Vec<_> =
            tokio::net::lookup_host((host, port)).await.dns_context(host)?.collect();
        if addrs.is_empty() {
            return Err(NetError::NameNotResolved);
        }

        // 2. TCP Connect, first address that answers wins
        let mut last_error = None;
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_error = Some(e),
            }
        }
        let stream = match (stream, last_error) {
            (Some(s), _) => s,
            (None, Some(e)) => return Err(e).connection_context(host, port),
            (None, None) => return Err(NetError::ConnectionFailed),
        };
        // Frames are small and latency-sensitive.
        let _ = stream.set_nodelay(true);

        tracing::debug!(host = %host, port, scheme = url.scheme(), "socket connected");

        // 3. SSL Handshake (if https)
        match url.scheme() {
            "https" => {
                let connector = tls.connector()?;
                let mut config = connector.configure().map_err(|_| NetError::SslProtocolError)?;
                if !TlsConfig::should_set_sni(host) {
                    config.set_use_server_name_indication(false);
                    config.set_verify_hostname(false);
                }

                let tls_stream = tokio_boring::connect(config, host, stream).await.map_err(|e| {
                    tracing::debug!(host = %host, error = ?e, "SSL handshake failed");
                    NetError::SslProtocolError
                })?;
                Ok(SocketType::Ssl(tls_stream))
            }
            "http" => Ok(SocketType::Tcp(stream)),
            _ => Err(NetError::InvalidUrl),
        }
    }
}
