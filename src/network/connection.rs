//! Connection handling dengan buffered I/O
//!
//! Turns a byte stream without message boundaries into gateway frames.
//! Bytes stay in the read buffer until a whole frame has arrived; decoded
//! messages borrow that buffer, so it cannot be refilled while one is alive.

use std::io::{self, Read, Write};

use bytes::{Buf, BytesMut};

use crate::error::{CodecError, Result};
use crate::protocol::{DecodeStatus, MessageFactory, WireMessage, HEADER_LENGTH};

/// Buffer sizes - tuned untuk typical message sizes
const READ_BUFFER_SIZE: usize = 64 * 1024; // 64KB
const WRITE_BUFFER_SIZE: usize = 64 * 1024; // 64KB
const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024; // 16MB
const MAX_WRITE_PENDING: usize = 4 * WRITE_BUFFER_SIZE;

/// Per-connection buffer limits
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Initial read buffer size. Grows up to `max_frame_length` for big frames.
    pub read_buffer_size: usize,
    /// Pending output above this triggers a flush.
    pub write_buffer_size: usize,
    /// Frames declaring a larger length are rejected.
    pub max_frame_length: usize,
    /// Queueing fails once this much output is stuck behind a peer that
    /// does not read.
    pub max_write_pending: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: READ_BUFFER_SIZE,
            write_buffer_size: WRITE_BUFFER_SIZE,
            max_frame_length: MAX_FRAME_LENGTH,
            max_write_pending: MAX_WRITE_PENDING,
        }
    }
}

/// Buffered frame reader/writer over a non-blocking stream
pub struct Connection<S> {
    stream: S,
    config: ConnectionConfig,
    read_buffer: Vec<u8>,
    read_pos: usize,
    read_len: usize,
    write_buffer: BytesMut,
}

impl<S: Read + Write> Connection<S> {
    pub fn new(stream: S) -> Self {
        Self::with_config(stream, ConnectionConfig::default())
    }

    pub fn with_config(stream: S, config: ConnectionConfig) -> Self {
        Self {
            stream,
            read_buffer: vec![0u8; config.read_buffer_size.max(HEADER_LENGTH)],
            read_pos: 0,
            read_len: 0,
            write_buffer: BytesMut::with_capacity(config.write_buffer_size),
            config,
        }
    }

    /// Read whatever the stream has into the internal buffer.
    ///
    /// Returns the number of buffered, unconsumed bytes. `WouldBlock` is not
    /// an error; end of stream is [`CodecError::ConnectionClosed`].
    pub fn fill_read_buffer(&mut self) -> Result<usize> {
        // Compact buffer jika perlu
        if self.read_pos > 0 {
            let remaining = self.read_len - self.read_pos;
            if remaining > 0 {
                self.read_buffer
                    .copy_within(self.read_pos..self.read_len, 0);
            }
            self.read_len = remaining;
            self.read_pos = 0;
        }
        self.shrink_read_buffer();

        if self.read_len == self.read_buffer.len() {
            // full: frames must be drained before reading more
            return Ok(self.read_len);
        }

        loop {
            match self.stream.read(&mut self.read_buffer[self.read_len..]) {
                Ok(0) => return Err(CodecError::ConnectionClosed),
                Ok(n) => {
                    self.read_len += n;
                    return Ok(self.read_len);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(self.read_len),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Give back the space a large frame needed once no pending frame
    /// still depends on it.
    fn shrink_read_buffer(&mut self) {
        let base = self.config.read_buffer_size.max(HEADER_LENGTH);
        if self.read_buffer.len() <= base || self.read_len > base {
            return;
        }
        let pending_frame = match self.read_buffer[..self.read_len] {
            [a, b, c, d, ..] => u32::from_be_bytes([a, b, c, d]) as usize,
            _ => 0,
        };
        if pending_frame > base {
            return;
        }
        tracing::debug!(from = self.read_buffer.len(), to = base, "shrinking read buffer");
        self.read_buffer.truncate(base);
        self.read_buffer.shrink_to_fit();
    }

    /// Get readable data slice (zero-copy)
    #[inline(always)]
    pub fn readable(&self) -> &[u8] {
        &self.read_buffer[self.read_pos..self.read_len]
    }

    /// Next complete frame, or `None` until more bytes arrive.
    ///
    /// The header is peeked first so an oversized frame is rejected before it
    /// is buffered. The returned message borrows this connection; drop it
    /// before calling [`fill_read_buffer`](Self::fill_read_buffer) again.
    pub fn next_frame<'c, F: MessageFactory>(
        &'c mut self,
        factory: &F,
    ) -> Result<Option<F::Message<'c>>> {
        let length = {
            let mut header = factory.build_message();
            match header.decode_header(self.readable())? {
                DecodeStatus::Incomplete => return Ok(None),
                DecodeStatus::Complete(_) => header.length() as usize,
            }
        };

        if length > self.config.max_frame_length {
            return Err(CodecError::FrameTooLarge {
                size: length,
                max: self.config.max_frame_length,
            });
        }

        if self.read_len - self.read_pos < length {
            if self.read_buffer.len() < length {
                tracing::debug!(length, "growing read buffer for large frame");
                self.read_buffer.resize(length, 0);
            }
            return Ok(None);
        }

        let start = self.read_pos;
        self.read_pos += length;

        let frame = &self.read_buffer[start..start + length];
        let mut msg = factory.build_message();
        match msg.decode(frame)? {
            DecodeStatus::Complete(n) if n == length => Ok(Some(msg)),
            _ => Err(CodecError::malformed("frame body disagrees with its header")),
        }
    }

    /// Encode `msg` straight into the write buffer.
    ///
    /// A failed encode leaves the pending output as it was.
    pub fn send<'m, M: WireMessage<'m>>(&mut self, msg: &mut M) -> Result<()> {
        self.check_backlog()?;
        msg.encode(&mut self.write_buffer)?;
        self.flush_if_full()
    }

    /// Queue an already encoded frame.
    pub fn queue_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.check_backlog()?;
        self.write_buffer.extend_from_slice(frame);
        self.flush_if_full()
    }

    /// Pending output may exceed `max_write_pending` by at most one frame.
    fn check_backlog(&mut self) -> Result<()> {
        if self.write_buffer.len() >= self.config.max_write_pending {
            self.flush_write_buffer()?;
            if self.write_buffer.len() >= self.config.max_write_pending {
                return Err(CodecError::WriteBacklog {
                    pending: self.write_buffer.len(),
                    max: self.config.max_write_pending,
                });
            }
        }
        Ok(())
    }

    fn flush_if_full(&mut self) -> Result<()> {
        if self.write_buffer.len() >= self.config.write_buffer_size {
            self.flush_write_buffer()?;
        }
        Ok(())
    }

    /// Write as much pending output as the stream accepts.
    pub fn flush_write_buffer(&mut self) -> Result<()> {
        while !self.write_buffer.is_empty() {
            match self.stream.write(&self.write_buffer) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "Failed to write to socket",
                    )
                    .into());
                }
                Ok(n) => self.write_buffer.advance(n),
                // Partial write, sisanya dikirim saat writable
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Bytes pending in write buffer
    #[inline(always)]
    pub fn write_pending(&self) -> usize {
        self.write_buffer.len()
    }

    /// Get underlying stream untuk polling
    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}
