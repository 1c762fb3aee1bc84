//! Plain HTTP request relay
//!
//! Forwards one absolute-form request through the pooled client and streams
//! the response back. Until the response head has been written the client
//! can still be answered with a gateway error; afterwards a failure can only
//! abort the connection.

use super::{client_failed, write_error_response, RelayContext};
use crate::client::OutboundRequest;
use crate::error::ProxyError;
use crate::helper::splice;
use crate::http::RequestHead;
use crate::transport::Connector;
use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Relay one request; returns whether the client connection may carry
/// another request
pub async fn handle_request<S, C>(
    client: &mut S,
    buf: &mut BytesMut,
    head: RequestHead,
    ctx: &RelayContext<C>,
) -> Result<bool, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    C: Connector,
{
    let mut responded = false;
    match relay(client, buf, head, ctx, &mut responded).await {
        Ok(keep_alive) => Ok(keep_alive),
        Err(e) => {
            match e.status() {
                Some(status) if !responded => {
                    warn!("Request failed, answering {}: {}", status.code, e);
                    let _ = write_error_response(client, status, ctx.proxy_agent()).await;
                }
                _ => debug!("Request aborted: {}", e),
            }
            Err(e)
        }
    }
}

async fn relay<S, C>(
    client: &mut S,
    buf: &mut BytesMut,
    head: RequestHead,
    ctx: &RelayContext<C>,
    responded: &mut bool,
) -> Result<bool, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    C: Connector,
{
    let request = OutboundRequest::from_proxy_head(head)?;
    let body_kind = request.body_kind()?;
    debug!(
        "{} {}{}",
        request.method(),
        request.target(),
        request.path()
    );

    let mut pending = ctx.client().open(&request).await?;
    pending.write_body(client, buf, body_kind).await?;

    let mut response = tokio::select! {
        response = pending.response() => response?,
        _ = client_failed(client, buf, ctx.max_head_size) => {
            return Err(ProxyError::ClientIo(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "client connection failed before the response arrived",
            )));
        }
    };

    while response.head().is_interim() {
        client
            .write_all(&response.head().raw)
            .await
            .map_err(ProxyError::ClientIo)?;
        response = response.next_response().await?;
    }

    if response.head().is_upgrade() {
        client
            .write_all(&response.head().raw)
            .await
            .map_err(ProxyError::ClientIo)?;
        *responded = true;

        let (mut upstream, leftover) = response.into_upgraded();
        if !leftover.is_empty() {
            client
                .write_all(&leftover)
                .await
                .map_err(ProxyError::ClientIo)?;
        }
        if !buf.is_empty() {
            upstream
                .write_all(buf)
                .await
                .map_err(ProxyError::upstream_io)?;
            buf.clear();
        }

        debug!("Switched protocols with {}", request.target());
        if let Err(e) = splice(&mut *client, &mut *upstream, ctx.idle_timeout).await {
            debug!("Upgraded connection to {} ended: {}", request.target(), e);
        }
        return Ok(false);
    }

    let keep_alive = !request.wants_close() && response.keeps_alive();

    client
        .write_all(&response.head().raw)
        .await
        .map_err(ProxyError::ClientIo)?;
    *responded = true;

    let copied = response.drain_into(client).await?;
    debug!(
        "{} {}{} relayed {} body bytes",
        request.method(),
        request.target(),
        request.path(),
        copied
    );
    Ok(keep_alive)
}
