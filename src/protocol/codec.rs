//! Newline framing for JSON-RPC messages.
//!
//! One message per line, terminated by `\n`. A trailing `\r` is tolerated on
//! input, blank lines are skipped, and lines above the configured limit are
//! discarded and reported as [`Frame::Oversized`] instead of failing the stream.

use crate::error::TransportError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

/// Default upper bound for a single line (16 MiB).
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// A decoded unit of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line with the terminator stripped.
    Line(Bytes),
    /// A line that exceeded the limit and was dropped.
    Oversized { len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Scanning for the next newline; bytes before the index hold none.
    Scan(usize),
    /// Dropping an oversized line; the count is bytes dropped so far.
    Discard(usize),
}

/// Newline-delimited codec over raw bytes.
///
/// Lines are not required to be valid UTF-8 here; JSON decoding reports that.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_line_bytes: usize,
    state: DecodeState,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes: max_line_bytes.max(1),
            state: DecodeState::Scan(0),
        }
    }

    pub fn max_line_bytes(&self) -> usize {
        self.max_line_bytes
    }

    fn finish_line(&self, mut line: BytesMut) -> Option<Frame> {
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        if line.len() > self.max_line_bytes {
            warn!(len = line.len(), "Dropping oversized line");
            return Some(Frame::Oversized { len: line.len() });
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        Some(Frame::Line(line.freeze()))
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = Frame;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, TransportError> {
        loop {
            match self.state {
                DecodeState::Scan(from) => {
                    let Some(offset) = src[from..].iter().position(|b| *b == b'\n') else {
                        if src.len() > self.max_line_bytes {
                            self.state = DecodeState::Discard(src.len());
                            src.clear();
                        } else {
                            self.state = DecodeState::Scan(src.len());
                        }
                        return Ok(None);
                    };

                    let newline = from + offset;
                    let mut line = src.split_to(newline + 1);
                    line.truncate(newline);
                    self.state = DecodeState::Scan(0);

                    if let Some(frame) = self.finish_line(line) {
                        return Ok(Some(frame));
                    }
                }
                DecodeState::Discard(dropped) => {
                    match src.iter().position(|b| *b == b'\n') {
                        Some(newline) => {
                            src.advance(newline + 1);
                            self.state = DecodeState::Scan(0);
                            let len = dropped + newline;
                            warn!(len, "Dropping oversized line");
                            return Ok(Some(Frame::Oversized { len }));
                        }
                        None => {
                            self.state = DecodeState::Discard(dropped + src.len());
                            src.clear();
                            return Ok(None);
                        }
                    }
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, TransportError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        match self.state {
            DecodeState::Discard(len) => {
                self.state = DecodeState::Scan(0);
                Ok(Some(Frame::Oversized { len }))
            }
            DecodeState::Scan(_) => {
                self.state = DecodeState::Scan(0);
                if src.is_empty() {
                    return Ok(None);
                }
                // Last line without a terminator.
                let line = src.split_to(src.len());
                Ok(self.finish_line(line))
            }
        }
    }
}

impl Encoder<Bytes> for LineCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), TransportError> {
        if item.contains(&b'\n') {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "message contains a raw newline",
            )));
        }
        dst.reserve(item.len() + 1);
        dst.put(item);
        dst.put_u8(b'\n');
        Ok(())
    }
}
