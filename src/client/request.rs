//! Outbound requests
//!
//! A proxy request arrives in absolute form (`http://host[:port]/path`). The
//! origin gets the same request in origin form with every header untouched.

use crate::error::ProxyError;
use crate::http::{BodyKind, RequestHead};
use crate::transport::UpstreamTarget;
use url::Url;

/// Default port for `http` targets
pub const HTTP_DEFAULT_PORT: u16 = 80;

/// A request ready to be sent to an origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// Head as received from the client
    head: RequestHead,
    /// Origin server
    target: UpstreamTarget,
    /// Origin-form target (path and query)
    path: String,
}

impl OutboundRequest {
    /// Create a request for `target` with an origin-form `path`
    pub fn new(head: RequestHead, target: UpstreamTarget, path: impl Into<String>) -> Self {
        OutboundRequest {
            head,
            target,
            path: path.into(),
        }
    }

    /// Build from a proxy request with an absolute-form `http` target
    pub fn from_proxy_head(head: RequestHead) -> Result<Self, ProxyError> {
        let url = Url::parse(&head.target).map_err(|e| {
            ProxyError::ClientProtocol(format!(
                "expected absolute-form target, got {:?}: {}",
                head.target, e
            ))
        })?;
        if url.scheme() != "http" {
            return Err(ProxyError::ClientProtocol(format!(
                "unsupported scheme {:?}",
                url.scheme()
            )));
        }

        let target = UpstreamTarget::from_url(&url)?;
        let path = origin_form(&head.target);
        Ok(OutboundRequest::new(head, target, path))
    }

    /// Request method
    pub fn method(&self) -> &str {
        &self.head.method
    }

    /// Origin server
    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }

    /// Origin-form target sent on the request line
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Head as received from the client
    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    /// Framing of the request body
    pub fn body_kind(&self) -> Result<BodyKind, ProxyError> {
        self.head.body_kind()
    }

    /// Whether the client asked for the connection to close afterwards
    pub fn wants_close(&self) -> bool {
        self.head.wants_close()
    }

    /// Serialized head for the origin
    pub fn encode(&self) -> Vec<u8> {
        self.head
            .encode(&self.path, &self.target.host_header(HTTP_DEFAULT_PORT))
    }
}

/// Path and query of an absolute-form target exactly as the client wrote them
fn origin_form(target: &str) -> String {
    let after_scheme = match target.find("://") {
        Some(idx) => &target[idx + 3..],
        None => return "/".to_string(),
    };
    let rest = match after_scheme.find(|c: char| c == '/' || c == '?' || c == '#') {
        Some(idx) => &after_scheme[idx..],
        None => "",
    };
    // Fragments are never sent to the origin
    let rest = rest.split('#').next().unwrap_or_default();

    match rest.chars().next() {
        None => "/".to_string(),
        Some('?') => format!("/{}", rest),
        Some(_) => rest.to_string(),
    }
}
