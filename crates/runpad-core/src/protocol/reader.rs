//! Buffered line reader for child output streams.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

use super::frame::{Frame, decode_frame, encode_frame};

/// Initial buffer size for child output.
pub const DEFAULT_CAPACITY: usize = 8 * 1024;

/// Splits an async byte stream into `\n`-terminated lines.
///
/// A single buffer is reused for the whole stream: consumed bytes are
/// compacted away before refilling, and the buffer only grows (doubling)
/// when one line is larger than the current capacity. A final line without
/// a terminator is returned at end of stream.
///
/// `next_line` and `next_frame` are cancel-safe: if the future is dropped,
/// no bytes already read from the stream are lost.
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
    /// First unconsumed byte.
    start: usize,
    /// End of valid data.
    end: usize,
    /// Bytes in `start..scanned` are known not to contain `\n`.
    scanned: usize,
    eof: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(inner: R, capacity: usize) -> Self {
        Self {
            inner,
            buf: vec![0; capacity.max(1)],
            start: 0,
            end: 0,
            scanned: 0,
            eof: false,
        }
    }

    /// Current buffer capacity.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Read the next line, without its `\n`. Returns `None` at end of stream.
    pub async fn next_line(&mut self) -> std::io::Result<Option<&[u8]>> {
        let range = loop {
            let from = self.scanned.max(self.start);
            if let Some(pos) = memchr::memchr(b'\n', &self.buf[from..self.end]) {
                let line = self.start..from + pos;
                self.start = from + pos + 1;
                self.scanned = self.start;
                break line;
            }
            self.scanned = self.end;

            if self.eof {
                if self.start == self.end {
                    return Ok(None);
                }
                let line = self.start..self.end;
                self.start = self.end;
                break line;
            }

            self.make_room();
            let n = self.inner.read(&mut self.buf[self.end..]).await?;
            if n == 0 {
                self.eof = true;
            } else {
                self.end += n;
            }
        };

        Ok(Some(&self.buf[range]))
    }

    /// Read and decode the next frame. Blank lines are skipped.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            let Some(line) = self.next_line().await? else {
                return Ok(None);
            };
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            return decode_frame(line).map(Some);
        }
    }

    /// Read the next line as text, replacing invalid UTF-8.
    pub async fn next_text_line(&mut self) -> Result<Option<String>> {
        let Some(line) = self.next_line().await? else {
            return Ok(None);
        };
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        Ok(Some(String::from_utf8_lossy(line).into_owned()))
    }

    fn make_room(&mut self) {
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
            self.scanned = 0;
        }
        if self.end < self.buf.len() {
            return;
        }
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.scanned -= self.start;
            self.start = 0;
        } else {
            let grown = self.buf.len() * 2;
            tracing::trace!(capacity = grown, "growing frame buffer");
            self.buf.resize(grown, 0);
        }
    }
}

/// Writes frames in the child's output format.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let line = encode_frame(frame)?;
        self.inner
            .write_all(line.as_bytes())
            .await
            .map_err(Error::Io)?;
        self.inner.flush().await.map_err(Error::Io)
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
