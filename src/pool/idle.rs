//! Idle connection entries
//!
//! An idle connection keeps its pool permit, so parked connections count
//! against the pool bound exactly like active ones.

use futures::FutureExt;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::OwnedSemaphorePermit;

/// A connection parked in the pool with metadata
#[derive(Debug)]
pub struct IdleConnection<S> {
    /// The underlying stream
    pub(crate) stream: S,
    /// Slot held in the pool bound
    pub(crate) permit: OwnedSemaphorePermit,
    /// When the connection was opened
    pub(crate) created_at: Instant,
    /// When the connection was parked
    pub(crate) idle_since: Instant,
}

impl<S: AsyncRead + Unpin> IdleConnection<S> {
    /// Park a connection that was opened at `created_at`
    pub fn new(stream: S, permit: OwnedSemaphorePermit, created_at: Instant) -> Self {
        IdleConnection {
            stream,
            permit,
            created_at,
            idle_since: Instant::now(),
        }
    }

    /// Check if the connection sat idle longer than `idle_timeout`
    pub fn is_stale(&self, idle_timeout: Duration) -> bool {
        self.idle_since.elapsed() > idle_timeout
    }

    /// Get the age of the connection
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Get the time spent idle
    pub fn idle_time(&self) -> Duration {
        self.idle_since.elapsed()
    }

    /// Probe the stream without blocking
    ///
    /// A parked HTTP/1 connection must have nothing to read. EOF, an error,
    /// or unsolicited bytes all mean it cannot carry another request.
    pub fn is_alive(&mut self) -> bool {
        let mut probe = [0u8; 1];
        self.stream.read(&mut probe).now_or_never().is_none()
    }

    /// Split into the stream and its permit
    pub fn into_parts(self) -> (S, OwnedSemaphorePermit, Instant) {
        (self.stream, self.permit, self.created_at)
    }
}
