//! Line transport for JSON-RPC messages.
//!
//! A transport owns one byte stream in each direction. Reads and writes are
//! independently locked so a reader task and any number of writers can share
//! one instance; each write emits exactly one complete line.

use crate::error::{Result, TransportResult};
use crate::protocol::codec::{Frame, LineCodec};
use crate::protocol::types::Envelope;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, Stdin, Stdout};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{error, trace};

/// Transport trait for line-delimited JSON-RPC.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Next frame, or `None` once the input is exhausted.
    ///
    /// Dropping the returned future loses no buffered input.
    async fn read_frame(&self) -> TransportResult<Option<Frame>>;

    /// Write one line and flush. Concurrent callers never interleave.
    async fn write_line(&self, line: Bytes) -> TransportResult<()>;

    /// Encode and write a whole envelope.
    async fn send(&self, envelope: &Envelope) -> Result<()> {
        let line = envelope.encode()?;
        self.write_line(Bytes::from(line)).await?;
        Ok(())
    }
}

/// Transport over any async reader/writer pair.
pub struct LineTransport<R, W> {
    reader: Mutex<FramedRead<R, LineCodec>>,
    writer: Mutex<FramedWrite<W, LineCodec>>,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_codec(reader, writer, LineCodec::new())
    }

    pub fn with_max_line_bytes(reader: R, writer: W, max_line_bytes: usize) -> Self {
        Self::with_codec(reader, writer, LineCodec::with_max_line_bytes(max_line_bytes))
    }

    fn with_codec(reader: R, writer: W, codec: LineCodec) -> Self {
        Self {
            reader: Mutex::new(FramedRead::new(reader, codec.clone())),
            writer: Mutex::new(FramedWrite::new(writer, codec)),
        }
    }
}

/// Stdio-based transport for MCP.
pub type StdioTransport = LineTransport<Stdin, Stdout>;

impl StdioTransport {
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    pub fn stdio_with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self::with_max_line_bytes(tokio::io::stdin(), tokio::io::stdout(), max_line_bytes)
    }
}

#[async_trait::async_trait]
impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn read_frame(&self) -> TransportResult<Option<Frame>> {
        let mut reader = self.reader.lock().await;
        match reader.next().await {
            None => Ok(None),
            Some(Ok(frame)) => {
                if let Frame::Line(line) = &frame {
                    trace!(len = line.len(), "Received line");
                }
                Ok(Some(frame))
            }
            Some(Err(e)) => {
                error!(error = %e, "Error reading from transport");
                Err(e)
            }
        }
    }

    async fn write_line(&self, line: Bytes) -> TransportResult<()> {
        let mut writer = self.writer.lock().await;
        trace!(len = line.len(), "Sending line");
        // `send` flushes before returning.
        writer.send(line).await
    }
}
