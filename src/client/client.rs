//! Pooled HTTP/1 client
//!
//! Sends requests to origins over pooled connections. The exchange is split
//! into phases so the relay can stream the request body in and the response
//! body out without buffering either.

use super::request::OutboundRequest;
use crate::error::ProxyError;
use crate::http::{copy_body, read_response_head, BodyKind, CopyError, ResponseHead};
use crate::pool::{ConnectionPool, PooledConnection};
use crate::transport::Connector;
use bytes::BytesMut;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// HTTP client sending requests over a [`ConnectionPool`]
#[derive(Debug)]
pub struct PooledHttpClient<C: Connector> {
    /// Pool the connections come from
    pool: Arc<ConnectionPool<C>>,
    /// Largest response head accepted
    max_head_size: usize,
    /// Bound on any single read or write pause
    idle_timeout: Duration,
}

impl<C: Connector> Clone for PooledHttpClient<C> {
    fn clone(&self) -> Self {
        PooledHttpClient {
            pool: self.pool.clone(),
            max_head_size: self.max_head_size,
            idle_timeout: self.idle_timeout,
        }
    }
}

impl<C: Connector> PooledHttpClient<C> {
    /// Create a new client
    pub fn new(pool: Arc<ConnectionPool<C>>, max_head_size: usize, idle_timeout: Duration) -> Self {
        PooledHttpClient {
            pool,
            max_head_size,
            idle_timeout,
        }
    }

    /// Get a reference to the pool
    pub fn pool(&self) -> &Arc<ConnectionPool<C>> {
        &self.pool
    }

    /// Check out a connection and send the request head
    pub async fn open(&self, request: &OutboundRequest) -> Result<PendingRequest<C>, ProxyError> {
        let mut conn = self.pool.acquire(request.target()).await?;
        trace!(
            "{} {}{} over {} connection",
            request.method(),
            request.target(),
            request.path(),
            if conn.is_reused() { "reused" } else { "new" }
        );

        let head = request.encode();
        conn.write_all(&head)
            .await
            .map_err(ProxyError::upstream_io)?;

        Ok(PendingRequest {
            conn,
            method: request.method().to_string(),
            request_close: request.wants_close(),
            max_head_size: self.max_head_size,
            idle_timeout: self.idle_timeout,
        })
    }

    /// Send a request with its body and wait for the response head
    ///
    /// `buf` holds body bytes already read from `body`.
    pub async fn send<R>(
        &self,
        request: &OutboundRequest,
        body: &mut R,
        buf: &mut BytesMut,
    ) -> Result<UpstreamResponse<C>, ProxyError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let kind = request.body_kind()?;
        let mut pending = self.open(request).await?;
        pending.write_body(body, buf, kind).await?;
        pending.response().await
    }
}

/// A request whose head was sent and whose response is not yet read
#[derive(Debug)]
pub struct PendingRequest<C: Connector> {
    conn: PooledConnection<C>,
    method: String,
    request_close: bool,
    max_head_size: usize,
    idle_timeout: Duration,
}

impl<C: Connector> PendingRequest<C> {
    /// Stream the request body from the client to the origin unchanged
    ///
    /// `buf` holds bytes already read from `reader`; bytes past the body
    /// remain in it.
    pub async fn write_body<R>(
        &mut self,
        reader: &mut R,
        buf: &mut BytesMut,
        kind: BodyKind,
    ) -> Result<u64, ProxyError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        copy_body(reader, buf, &mut *self.conn, kind, self.idle_timeout)
            .await
            .map_err(|e| match e {
                CopyError::Source(e) if e.kind() == io::ErrorKind::InvalidData => {
                    ProxyError::ClientProtocol(e.to_string())
                }
                CopyError::Source(e) => ProxyError::ClientIo(e),
                CopyError::Sink(e) => ProxyError::upstream_io(e),
            })
    }

    /// Wait for the response head
    pub async fn response(mut self) -> Result<UpstreamResponse<C>, ProxyError> {
        let mut buf = BytesMut::new();
        let head = read_response_head(
            &mut *self.conn,
            &mut buf,
            self.max_head_size,
            self.idle_timeout,
        )
        .await?;
        debug!("{} responded {} {}", self.conn.target(), head.status, head.reason);

        Ok(UpstreamResponse {
            conn: self.conn,
            head,
            buf,
            method: self.method,
            request_close: self.request_close,
            max_head_size: self.max_head_size,
            idle_timeout: self.idle_timeout,
        })
    }
}

/// A response head received from an origin, with the body still unread
#[derive(Debug)]
pub struct UpstreamResponse<C: Connector> {
    conn: PooledConnection<C>,
    head: ResponseHead,
    /// Bytes read past the head
    buf: BytesMut,
    method: String,
    request_close: bool,
    max_head_size: usize,
    idle_timeout: Duration,
}

impl<C: Connector> UpstreamResponse<C> {
    /// The response head
    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    /// Framing of the response body
    pub fn body_kind(&self) -> Result<BodyKind, ProxyError> {
        self.head.body_kind(&self.method)
    }

    /// Whether the connection stays usable once the body is read
    ///
    /// Requires an HTTP/1.1 response with a framed body and no
    /// `Connection: close`.
    pub fn keeps_alive(&self) -> bool {
        self.head.version >= 1
            && self.head.keeps_alive()
            && self.body_kind().map(|kind| kind.is_framed()).unwrap_or(false)
    }

    /// Read the response that follows an interim (1xx) response
    pub async fn next_response(mut self) -> Result<UpstreamResponse<C>, ProxyError> {
        self.head = read_response_head(
            &mut *self.conn,
            &mut self.buf,
            self.max_head_size,
            self.idle_timeout,
        )
        .await?;
        debug!(
            "{} responded {} {} after interim response",
            self.conn.target(),
            self.head.status,
            self.head.reason
        );
        Ok(self)
    }

    /// Stream the body to `writer` without modification
    ///
    /// The connection returns to the pool when the exchange allows reuse and
    /// is closed otherwise.
    pub async fn drain_into<W>(mut self, writer: &mut W) -> Result<u64, ProxyError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let kind = self.body_kind()?;
        let copied = copy_body(
            &mut *self.conn,
            &mut self.buf,
            writer,
            kind,
            self.idle_timeout,
        )
        .await
        .map_err(|e| match e {
            CopyError::Source(e) => ProxyError::upstream_io(e),
            CopyError::Sink(e) => ProxyError::ClientIo(e),
        })?;

        if self.keeps_alive() && !self.request_close && self.buf.is_empty() {
            self.conn.release().await;
        } else {
            trace!("Closing connection to {} after response", self.conn.target());
        }
        Ok(copied)
    }

    /// Take the connection after a `101 Switching Protocols`
    ///
    /// Returns the connection and any bytes already read past the head. The
    /// connection never returns to the pool.
    pub fn into_upgraded(self) -> (PooledConnection<C>, BytesMut) {
        (self.conn, self.buf)
    }
}
