//! HTTP/1 body framing
//!
//! Bodies are relayed as raw bytes. Framing is tracked only to know where a
//! message ends, so chunked bodies pass through with their chunk headers and
//! trailers intact.

use super::head::read_more;
use bytes::BytesMut;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Longest chunk-size or trailer line accepted
const MAX_LINE: usize = 4096;

/// How a message body is delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// No body
    Empty,
    /// Exactly this many bytes
    Length(u64),
    /// Chunked transfer coding
    Chunked,
    /// Everything until the peer closes the connection
    CloseDelimited,
}

impl BodyKind {
    /// Whether the end of the body is known without closing the connection
    pub fn is_framed(&self) -> bool {
        !matches!(self, BodyKind::CloseDelimited)
    }
}

/// Failure while relaying a body, by side
#[derive(Debug, Error)]
pub enum CopyError {
    /// Reading from the body source failed or the body was malformed
    #[error("body source failed: {0}")]
    Source(#[source] io::Error),
    /// Writing to the destination failed
    #[error("body sink failed: {0}")]
    Sink(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    /// Reading a chunk-size line
    Size,
    /// Inside chunk data with this many bytes left
    Data(u64),
    /// Expecting the CRLF after chunk data
    DataEnd,
    /// Reading trailer lines after the last chunk
    Trailer,
    /// Final CRLF seen
    Done,
}

/// Tracks chunk boundaries in a raw chunked body
#[derive(Debug)]
pub struct ChunkedTracker {
    state: ChunkState,
    line: Vec<u8>,
}

impl Default for ChunkedTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedTracker {
    /// Create a tracker positioned at the first chunk-size line
    pub fn new() -> Self {
        ChunkedTracker {
            state: ChunkState::Size,
            line: Vec::new(),
        }
    }

    /// Whether the terminating chunk and trailers have been seen
    pub fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }

    /// Feed bytes, returning how many of them belong to the body
    ///
    /// Stops consuming at the end of the body; the remainder belongs to the
    /// next message.
    pub fn advance(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut pos = 0;
        while pos < data.len() {
            match self.state {
                ChunkState::Done => break,
                ChunkState::Data(remaining) => {
                    let available = (data.len() - pos) as u64;
                    let take = remaining.min(available);
                    pos += take as usize;
                    self.state = if take == remaining {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data(remaining - take)
                    };
                }
                _ => {
                    let byte = data[pos];
                    pos += 1;
                    if byte != b'\n' {
                        if self.line.len() >= MAX_LINE {
                            return Err(invalid("chunk line too long"));
                        }
                        self.line.push(byte);
                        continue;
                    }
                    let line = std::mem::take(&mut self.line);
                    self.end_line(&line)?;
                }
            }
        }
        Ok(pos)
    }

    fn end_line(&mut self, line: &[u8]) -> io::Result<()> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        match self.state {
            ChunkState::Size => {
                let size = parse_chunk_size(line)?;
                self.state = if size == 0 {
                    ChunkState::Trailer
                } else {
                    ChunkState::Data(size)
                };
            }
            ChunkState::DataEnd => {
                if !line.is_empty() {
                    return Err(invalid("missing CRLF after chunk data"));
                }
                self.state = ChunkState::Size;
            }
            ChunkState::Trailer => {
                if line.is_empty() {
                    self.state = ChunkState::Done;
                }
            }
            ChunkState::Data(_) | ChunkState::Done => {}
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// Parse the hex size at the start of a chunk-size line, ignoring extensions
fn parse_chunk_size(line: &[u8]) -> io::Result<u64> {
    let end = line
        .iter()
        .position(|b| *b == b';' || *b == b' ' || *b == b'\t')
        .unwrap_or(line.len());
    let digits = std::str::from_utf8(&line[..end]).map_err(|_| invalid("invalid chunk size"))?;
    if digits.is_empty() {
        return Err(invalid("empty chunk size"));
    }
    u64::from_str_radix(digits, 16).map_err(|_| invalid("invalid chunk size"))
}

/// Relay one body from `reader` to `writer` without modifying it
///
/// `buf` holds bytes already read from `reader`; they are sent first. Bytes
/// past the end of the body are left in `buf`. Each read waits at most
/// `idle` for data.
pub async fn copy_body<R, W>(
    reader: &mut R,
    buf: &mut BytesMut,
    writer: &mut W,
    kind: BodyKind,
    idle: Duration,
) -> Result<u64, CopyError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let total = match kind {
        BodyKind::Empty => return Ok(0),
        BodyKind::Length(len) => {
            let mut remaining = len;
            while remaining > 0 {
                if buf.is_empty() {
                    fill(reader, buf, idle).await?;
                }
                let take = (buf.len() as u64).min(remaining) as usize;
                let chunk = buf.split_to(take);
                writer.write_all(&chunk).await.map_err(CopyError::Sink)?;
                remaining -= take as u64;
            }
            len
        }
        BodyKind::Chunked => {
            let mut tracker = ChunkedTracker::new();
            let mut total = 0u64;
            while !tracker.is_done() {
                if buf.is_empty() {
                    fill(reader, buf, idle).await?;
                }
                let consumed = tracker.advance(buf).map_err(CopyError::Source)?;
                let chunk = buf.split_to(consumed);
                writer.write_all(&chunk).await.map_err(CopyError::Sink)?;
                total += consumed as u64;
            }
            total
        }
        BodyKind::CloseDelimited => {
            let mut total = 0u64;
            loop {
                if !buf.is_empty() {
                    let chunk = buf.split();
                    writer.write_all(&chunk).await.map_err(CopyError::Sink)?;
                    total += chunk.len() as u64;
                }
                let n = read_more(reader, buf, idle)
                    .await
                    .map_err(CopyError::Source)?;
                if n == 0 {
                    break;
                }
            }
            total
        }
    };

    writer.flush().await.map_err(CopyError::Sink)?;
    Ok(total)
}

/// Read at least one byte; EOF inside a framed body is an error
async fn fill<R>(reader: &mut R, buf: &mut BytesMut, idle: Duration) -> Result<(), CopyError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let n = read_more(reader, buf, idle)
        .await
        .map_err(CopyError::Source)?;
    if n == 0 {
        return Err(CopyError::Source(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before end of body",
        )));
    }
    Ok(())
}
