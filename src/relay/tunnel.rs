//! CONNECT tunnel relay
//!
//! Opens a stream to the requested authority through the connector, confirms
//! the tunnel to the client and then splices both connections until either
//! side is done.

use super::{client_failed, connect_established, write_error_response, RelayContext};
use crate::error::ProxyError;
use crate::helper::splice;
use crate::http::RequestHead;
use crate::transport::{Connector, UpstreamTarget};
use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};
use url::Url;

/// Parse an authority-form CONNECT target (`host:port`, port defaults to 443)
pub fn parse_authority(authority: &str) -> Result<UpstreamTarget, ProxyError> {
    let invalid = || ProxyError::ClientProtocol(format!("invalid CONNECT target {:?}", authority));

    if authority.is_empty() || authority.contains(&['/', '?', '#', '@'][..]) {
        return Err(invalid());
    }
    let url = Url::parse(&format!("https://{}", authority)).map_err(|_| invalid())?;
    UpstreamTarget::from_url(&url).map_err(|_| invalid())
}

/// Serve a CONNECT request; the client connection is consumed
///
/// `buf` holds bytes the client sent after the CONNECT head. They are
/// forwarded to the target once the tunnel is open.
pub async fn handle_connect<S, C>(
    mut client: S,
    mut buf: BytesMut,
    head: RequestHead,
    ctx: &RelayContext<C>,
) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    C: Connector,
{
    let target = match parse_authority(&head.target) {
        Ok(target) => target,
        Err(e) => {
            warn!("Rejecting CONNECT: {}", e);
            if let Some(status) = e.status() {
                let _ = write_error_response(&mut client, status, ctx.proxy_agent()).await;
            }
            return Err(e);
        }
    };
    debug!("CONNECT {}", target);

    let connected = tokio::select! {
        connected = ctx.connector().connect(&target) => connected,
        _ = client_failed(&mut client, &mut buf, ctx.max_head_size) => {
            debug!("Client connection failed while connecting to {}", target);
            return Err(ProxyError::ClientIo(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "client connection failed during CONNECT",
            )));
        }
    };

    let mut upstream = match connected {
        Ok(stream) => stream,
        Err(e) => {
            warn!("CONNECT {} failed: {}", target, e);
            if let Some(status) = e.status() {
                let _ = write_error_response(&mut client, status, ctx.proxy_agent()).await;
            }
            return Err(e);
        }
    };

    client
        .write_all(&connect_established(ctx.proxy_agent()))
        .await
        .map_err(ProxyError::ClientIo)?;
    if !buf.is_empty() {
        upstream
            .write_all(&buf)
            .await
            .map_err(ProxyError::upstream_io)?;
    }

    match splice(client, upstream, ctx.idle_timeout).await {
        Ok((sent, received)) => debug!(
            "Tunnel to {} closed: {} bytes sent, {} bytes received",
            target, sent, received
        ),
        Err(e) => debug!("Tunnel to {} torn down: {}", target, e),
    }
    Ok(())
}
