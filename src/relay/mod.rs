//! Client connection handling
//!
//! Each accepted connection is served by [`handle_connection`]: it reads
//! request heads in a loop and hands `CONNECT` requests to the tunnel relay
//! and everything else to the request relay.

mod request;
mod tunnel;

pub use request::handle_request;
pub use tunnel::{handle_connect, parse_authority};

use crate::client::PooledHttpClient;
use crate::error::{GatewayStatus, ProxyError};
use crate::helper::DEFAULT_BUFFER_SIZE;
use crate::http::read_request_head;
use crate::transport::Connector;
use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Shared state for serving client connections
#[derive(Debug)]
pub struct RelayContext<C: Connector> {
    /// Client for plain requests
    client: PooledHttpClient<C>,
    /// Connector for tunnels
    connector: Arc<C>,
    /// Value of the Proxy-Agent header
    proxy_agent: String,
    /// Largest request head accepted
    max_head_size: usize,
    /// Bound on any single read or write pause
    idle_timeout: Duration,
}

impl<C: Connector> RelayContext<C> {
    /// Create a new context; tunnels use the client's connector
    pub fn new(
        client: PooledHttpClient<C>,
        proxy_agent: impl Into<String>,
        max_head_size: usize,
        idle_timeout: Duration,
    ) -> Self {
        let connector = client.pool().connector().clone();
        RelayContext {
            client,
            connector,
            proxy_agent: proxy_agent.into(),
            max_head_size,
            idle_timeout,
        }
    }

    /// Client for plain requests
    pub fn client(&self) -> &PooledHttpClient<C> {
        &self.client
    }

    /// Connector for tunnels
    pub fn connector(&self) -> &Arc<C> {
        &self.connector
    }

    /// Value of the Proxy-Agent header
    pub fn proxy_agent(&self) -> &str {
        &self.proxy_agent
    }
}

/// Serve one client connection until it closes or fails
pub async fn handle_connection<S, C>(mut stream: S, ctx: Arc<RelayContext<C>>) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    C: Connector,
{
    let mut buf = BytesMut::with_capacity(DEFAULT_BUFFER_SIZE);

    loop {
        let head =
            match read_request_head(&mut stream, &mut buf, ctx.max_head_size, ctx.idle_timeout)
                .await
            {
                Ok(Some(head)) => head,
                Ok(None) => {
                    trace!("Client closed connection");
                    return Ok(());
                }
                Err(e) => {
                    if let Some(status) = e.status() {
                        let _ = write_error_response(&mut stream, status, &ctx.proxy_agent).await;
                    }
                    return Err(e);
                }
            };

        if head.is_connect() {
            return handle_connect(stream, buf, head, &ctx).await;
        }

        if !handle_request(&mut stream, &mut buf, head, &ctx).await? {
            return Ok(());
        }
    }
}

/// Resolves when reading from the client fails
///
/// Bytes the client sends meanwhile are kept in `buf`. EOF is a half-close:
/// the client may still be waiting for its answer, so watching stops and
/// this never resolves. A client that is really gone shows up as a write
/// error once something is sent to it. Once `buf` holds `limit` bytes the
/// client is no longer read either.
pub(crate) async fn client_failed<R>(reader: &mut R, buf: &mut BytesMut, limit: usize)
where
    R: AsyncRead + Unpin + ?Sized,
{
    loop {
        if buf.len() >= limit {
            std::future::pending::<()>().await;
        }
        buf.reserve(DEFAULT_BUFFER_SIZE);
        match reader.read_buf(buf).await {
            Ok(0) => {
                trace!("Client half-closed its connection");
                std::future::pending::<()>().await;
            }
            Ok(_) => {}
            Err(_) => return,
        }
    }
}

/// Gateway error response; the connection closes after it
pub(crate) fn error_response(status: GatewayStatus, proxy_agent: &str) -> Vec<u8> {
    let body = format!("{} {}\r\n", status.code, status.reason);
    format!(
        "HTTP/1.1 {} {}\r\nProxy-Agent: {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status.code,
        status.reason,
        proxy_agent,
        body.len(),
        body
    )
    .into_bytes()
}

/// Reply to a CONNECT whose tunnel is open
pub(crate) fn connect_established(proxy_agent: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 Connection established.\r\nProxy-Connection: close\r\nProxy-Agent: {}\r\n\r\n",
        proxy_agent
    )
    .into_bytes()
}

pub(crate) async fn write_error_response<W>(
    writer: &mut W,
    status: GatewayStatus,
    proxy_agent: &str,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer
        .write_all(&error_response(status, proxy_agent))
        .await?;
    writer.flush().await
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_connect_established_bytes() {
        assert_eq!(
            connect_established("Kneesocks"),
            b"HTTP/1.1 200 Connection established.\r\nProxy-Connection: close\r\nProxy-Agent: Kneesocks\r\n\r\n".to_vec()
        );
    }

    #[test]
    fn test_error_response() {
        let response = String::from_utf8(error_response(GatewayStatus::BAD_GATEWAY, "Agent")).unwrap();
        assert!(response.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
        assert!(response.contains("Proxy-Agent: Agent\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert!(response.contains("Content-Length: 17\r\n"));
        assert!(response.ends_with("\r\n\r\n502 Bad Gateway\r\n"));
    }

    /// Reader that fails like a reset connection
    struct ResetReader;

    impl AsyncRead for ResetReader {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::ErrorKind::ConnectionReset.into()))
        }
    }

    #[tokio::test]
    async fn test_client_failed_on_read_error() {
        let mut buf = BytesMut::new();
        tokio::time::timeout(
            Duration::from_secs(1),
            client_failed(&mut ResetReader, &mut buf, 1024),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_client_half_close_keeps_waiting() {
        let (mut client, mut peer) = tokio::io::duplex(1024);
        let mut buf = BytesMut::new();

        peer.write_all(b"pipelined").await.unwrap();
        peer.shutdown().await.unwrap();

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            client_failed(&mut client, &mut buf, 1024),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(&buf[..], b"pipelined");
    }

    #[tokio::test]
    async fn test_client_failed_pending_while_open() {
        let (mut client, _peer) = tokio::io::duplex(1024);
        let mut buf = BytesMut::new();

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            client_failed(&mut client, &mut buf, 1024),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_handle_connection_serves_keep_alive_requests() {
        let ctx = context(OriginConnector::new(|_, mut origin| {
            tokio::spawn(async move {
                for body in [&b"one"[..], &b"two"[..]] {
                    read_head(&mut origin).await;
                    let response = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len());
                    origin.write_all(response.as_bytes()).await.unwrap();
                    origin.write_all(body).await.unwrap();
                }
            });
        }));

        let (mut client, server_side) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(handle_connection(server_side, ctx.clone()));

        for expected in ["one", "two"] {
            client
                .write_all(b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n")
                .await
                .unwrap();
            let head = read_head(&mut client).await;
            assert!(head.starts_with(b"HTTP/1.1 200 OK\r\n"));
            let mut body = [0u8; 3];
            client.read_exact(&mut body).await.unwrap();
            assert_eq!(&body, expected.as_bytes());
        }

        drop(client);
        task.await.unwrap().unwrap();
        // Both requests went over one upstream connection
        assert_eq!(ctx.connector().targets.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_handle_connection_rejects_garbage() {
        let ctx = context(OriginConnector::new(|_, _| {}));
        let (mut client, server_side) = tokio::io::duplex(1024);
        let task = tokio::spawn(handle_connection(server_side, ctx));

        client.write_all(b"NOT HTTP AT ALL\r\n\r\n").await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();

        assert!(response.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
        assert!(matches!(
            task.await.unwrap(),
            Err(ProxyError::ClientProtocol(_))
        ));
    }

    #[tokio::test]
    async fn test_handle_connection_quiet_close() {
        let ctx = context(OriginConnector::new(|_, _| {}));
        let (client, server_side) = tokio::io::duplex(1024);
        drop(client);
        handle_connection(server_side, ctx).await.unwrap();
    }
}
