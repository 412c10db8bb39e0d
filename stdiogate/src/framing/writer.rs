use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::WriteError;

type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Exclusive writer for the child's stdin.
///
/// Each [`send`](Self::send) writes one complete NDJSON line and flushes it
/// while holding the lock, so concurrent senders never interleave partial
/// writes. After the first I/O failure (or [`close`](Self::close)) every
/// subsequent send fails with [`WriteError::Closed`].
pub struct FrameWriter {
    inner: Mutex<Option<BoxedWrite>>,
}

impl FrameWriter {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Mutex::new(Some(Box::new(writer))),
        }
    }

    /// Serialize `message` as a single line and write it atomically.
    pub async fn send(&self, message: &Value) -> Result<(), WriteError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let mut guard = self.inner.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(WriteError::Closed);
        };
        let result = async {
            writer.write_all(&line).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            *guard = None;
            return Err(WriteError::Io(e));
        }
        Ok(())
    }

    /// Drop the underlying stream, signalling EOF to the child.
    pub async fn close(&self) {
        let taken = self.inner.lock().await.take();
        if let Some(mut writer) = taken {
            let _ = writer.shutdown().await;
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::FrameReader;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_send_writes_one_line_per_message() {
        let (tx, rx) = tokio::io::duplex(1024);
        let writer = FrameWriter::new(tx);
        writer
            .send(&json!({"jsonrpc":"2.0","id":1,"method":"ping"}))
            .await
            .unwrap();
        writer
            .send(&json!({"jsonrpc":"2.0","method":"notifications/initialized"}))
            .await
            .unwrap();
        writer.close().await;

        let mut reader = FrameReader::new(rx);
        assert_eq!(reader.next_frame().await.unwrap().unwrap().message["id"], 1);
        assert!(reader.next_frame().await.unwrap().is_ok());
        assert!(reader.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_interleave() {
        let (tx, rx) = tokio::io::duplex(64);
        let writer = Arc::new(FrameWriter::new(tx));

        let mut tasks = Vec::new();
        for i in 0..32 {
            let writer = writer.clone();
            tasks.push(tokio::spawn(async move {
                let padding = "p".repeat(200);
                writer
                    .send(&json!({"jsonrpc":"2.0","id":i,"method":"echo","params":{"pad":padding}}))
                    .await
                    .unwrap();
            }));
        }

        let reader_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(rx);
            let mut ids = Vec::new();
            while let Some(frame) = reader.next_frame().await {
                ids.push(frame.unwrap().message["id"].as_i64().unwrap());
            }
            ids
        });

        for task in tasks {
            task.await.unwrap();
        }
        writer.close().await;

        let mut ids = reader_task.await.unwrap();
        ids.sort_unstable();
        assert_eq!(ids, (0..32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (tx, _rx) = tokio::io::duplex(64);
        let writer = FrameWriter::new(tx);
        writer.close().await;
        assert!(writer.is_closed().await);
        let err = writer.send(&json!({"jsonrpc":"2.0","method":"x"})).await;
        assert!(matches!(err, Err(WriteError::Closed)));
    }

    #[tokio::test]
    async fn test_send_to_dropped_reader_fails_then_closes() {
        let (tx, rx) = tokio::io::duplex(64);
        drop(rx);
        let writer = FrameWriter::new(tx);
        let err = writer.send(&json!({"jsonrpc":"2.0","method":"x"})).await;
        assert!(matches!(err, Err(WriteError::Io(_))));
        assert!(writer.is_closed().await);
    }
}
