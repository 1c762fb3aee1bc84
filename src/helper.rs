//! Helper utilities for Kneesocks
//!
//! This module provides the splice used by CONNECT tunnels and protocol
//! upgrades, plus shared constants.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Default buffer size for IO operations
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Tracks the last time bytes moved in either direction of a splice
#[derive(Debug)]
struct Activity {
    start: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Activity {
            start: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let now = self.start.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(now, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let now = self.start.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_ms.load(Ordering::Relaxed)))
    }
}

/// Copy one direction until EOF, then shut down the write side
async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    idle: Duration,
    activity: &Activity,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = match tokio::time::timeout(idle, reader.read(&mut buf)).await {
            Ok(result) => result?,
            Err(_) => {
                // The other direction may still be busy
                if activity.idle_for() < idle {
                    continue;
                }
                return Err(io::Error::new(io::ErrorKind::TimedOut, "splice idle timeout"));
            }
        };

        if n == 0 {
            writer.shutdown().await?;
            return Ok(total);
        }

        activity.touch();
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}

/// Bidirectional copy between two streams
///
/// Each direction runs independently. When one side reaches EOF the write
/// half of the other side is shut down and the opposite direction may keep
/// running. Any error, or no traffic in either direction for `idle`, ends
/// both directions. Returns the byte counts `a -> b` and `b -> a`.
pub async fn splice<A, B>(a: A, b: B, idle: Duration) -> io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);
    let activity = Activity::new();

    let a_to_b = pump(&mut a_read, &mut b_write, idle, &activity);
    let b_to_a = pump(&mut b_read, &mut a_write, idle, &activity);

    let result = tokio::try_join!(a_to_b, b_to_a);
    match &result {
        Ok((up, down)) => debug!("Splice finished: {} bytes out, {} bytes back", up, down),
        Err(e) => debug!("Splice ended: {}", e),
    }
    result
}
