use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};

use super::{Frame, MAX_MESSAGE_BYTES, parse_frame};
use crate::error::FramingError;

/// Upper bound on draining the tail of an oversized line.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads NDJSON records from a byte stream (the child's stdout).
///
/// Each call to [`next_frame`](Self::next_frame) yields one record. A record
/// that fails to parse is returned as an error and the reader is already
/// positioned at the next line, so a malformed record never blocks the ones
/// after it. Blank lines are skipped.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
    max_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_bytes(reader, MAX_MESSAGE_BYTES)
    }

    pub fn with_max_bytes(reader: R, max_bytes: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::new(),
            max_bytes,
        }
    }

    /// Next record, or `None` at end of stream.
    ///
    /// `Some(Err(FramingError::Io(_)))` means the stream itself failed; all
    /// other errors are per-record.
    pub async fn next_frame(&mut self) -> Option<Result<Frame, FramingError>> {
        loop {
            self.buf.clear();
            match bounded_read_line(&mut self.inner, &mut self.buf, self.max_bytes).await {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e)),
            }

            let Ok(line) = std::str::from_utf8(&self.buf) else {
                return Some(Err(FramingError::InvalidUtf8));
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(parse_frame(line));
        }
    }
}

/// Read a single line, enforcing a byte limit.
///
/// Raw bytes are accumulated into a `Vec<u8>` so multi-byte UTF-8 characters
/// that straddle internal buffer boundaries are not corrupted.
///
/// - `Ok(n)` where `n > 0`: a complete (or final unterminated) line
/// - `Ok(0)`: EOF
/// - `Err(MessageTooLarge)`: limit exceeded; the rest of the line is drained
async fn bounded_read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_bytes: usize,
) -> Result<usize, FramingError> {
    let mut total = 0usize;
    loop {
        let available = reader.fill_buf().await?;

        if available.is_empty() {
            return Ok(total);
        }

        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let to_consume = pos + 1;
                if total + to_consume > max_bytes {
                    reader.consume(to_consume);
                    return Err(FramingError::MessageTooLarge { max_bytes });
                }
                buf.extend_from_slice(&available[..to_consume]);
                total += to_consume;
                reader.consume(to_consume);
                return Ok(total);
            }
            None => {
                let len = available.len();
                if total + len > max_bytes {
                    reader.consume(len);
                    drain_until_newline(reader).await;
                    return Err(FramingError::MessageTooLarge { max_bytes });
                }
                buf.extend_from_slice(available);
                total += len;
                reader.consume(len);
            }
        }
    }
}

/// Discard bytes up to and including the next newline (or EOF).
async fn drain_until_newline<R: AsyncBufRead + Unpin>(reader: &mut R) {
    let drain = async {
        loop {
            match reader.fill_buf().await {
                Ok([]) => return,
                Ok(buf) => {
                    if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                        reader.consume(pos + 1);
                        return;
                    }
                    let len = buf.len();
                    reader.consume(len);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "IO error while draining oversized message");
                    return;
                }
            }
        }
    };
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        tracing::warn!("drain of oversized message timed out");
    }
}
