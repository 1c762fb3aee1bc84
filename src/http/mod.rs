//! HTTP/1 message handling
//!
//! Only message heads are parsed. Bodies and headers are relayed exactly as
//! received; framing is tracked just far enough to find message boundaries.

mod body;
mod head;

pub use body::{copy_body, BodyKind, ChunkedTracker, CopyError};
pub use head::{
    read_request_head, read_response_head, Header, RequestHead, ResponseHead, MAX_HEADERS,
};

