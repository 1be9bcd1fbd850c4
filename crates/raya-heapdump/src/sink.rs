//! Buffered big-endian output sink
//!
//! [`HprofSink`] owns one fixed-size buffer, allocated before the dump
//! starts, and never allocates afterwards. Writes land in the buffer and are
//! pushed to the [`DumpTarget`] when it fills up. Seeking inside the unflushed
//! part of the buffer is free; seeking elsewhere flushes and asks the target.
//!
//! I/O failures do not abort the dump. The first error is kept and later
//! writes are still attempted; the caller inspects the error once at the end.

use crate::format::IdSize;
use crate::{HeapDumpError, HeapDumpResult};
use std::io::{self, ErrorKind, Seek, SeekFrom, Write};

/// Smallest buffer the sink accepts
const MIN_BUFFER_SIZE: usize = 64;

/// Destination of a dump
pub trait DumpTarget {
    /// Write all bytes at the current position
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Move to an absolute position
    fn seek_to(&mut self, position: u64) -> io::Result<()>;

    /// Flush the underlying writer
    fn flush(&mut self) -> io::Result<()>;

    /// Whether [`DumpTarget::seek_to`] is supported
    fn is_seekable(&self) -> bool;
}

/// Target backed by a seekable writer (files, cursors)
#[derive(Debug)]
pub struct Seekable<W>(pub W);

impl<W: Write + Seek> Seekable<W> {
    /// Unwrap the writer
    pub fn into_inner(self) -> W {
        self.0
    }
}

impl<W: Write + Seek> DumpTarget for Seekable<W> {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.0.write_all(bytes)
    }

    fn seek_to(&mut self, position: u64) -> io::Result<()> {
        self.0.seek(SeekFrom::Start(position)).map(|_| ())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

/// Target backed by a forward-only writer (pipes, sockets)
#[derive(Debug)]
pub struct Streaming<W>(pub W);

impl<W: Write> Streaming<W> {
    /// Unwrap the writer
    pub fn into_inner(self) -> W {
        self.0
    }
}

impl<W: Write> DumpTarget for Streaming<W> {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.0.write_all(bytes)
    }

    fn seek_to(&mut self, _position: u64) -> io::Result<()> {
        Err(io::Error::from(ErrorKind::Unsupported))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }

    fn is_seekable(&self) -> bool {
        false
    }
}

/// Buffered, allocation-free writer over a [`DumpTarget`]
pub struct HprofSink<T: DumpTarget> {
    target: T,
    buffer: Box<[u8]>,
    /// Write position inside `buffer`
    cursor: usize,
    /// Number of valid bytes in `buffer`
    filled: usize,
    /// Stream offset of `buffer[0]`
    flushed: u64,
    error: Option<io::Error>,
}

impl<T: DumpTarget> HprofSink<T> {
    /// Create a sink with a buffer of `capacity` bytes.
    ///
    /// This is the only allocation the sink performs.
    pub fn new(target: T, capacity: usize) -> HeapDumpResult<Self> {
        let capacity = capacity.max(MIN_BUFFER_SIZE);
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(capacity)
            .map_err(|_| HeapDumpError::BufferAllocation { size: capacity })?;
        buffer.resize(capacity, 0);

        Ok(Self {
            target,
            buffer: buffer.into_boxed_slice(),
            cursor: 0,
            filled: 0,
            flushed: 0,
            error: None,
        })
    }

    /// Logical stream position
    #[inline]
    pub fn position(&self) -> u64 {
        self.flushed + self.cursor as u64
    }

    /// Buffer size in bytes
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes that can be written before the buffer must be flushed
    #[inline]
    pub fn buffer_space(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    /// Whether the target supports seeking
    #[inline]
    pub fn is_seekable(&self) -> bool {
        self.target.is_seekable()
    }

    /// First I/O error seen, if any
    pub fn first_error(&self) -> Option<&io::Error> {
        self.error.as_ref()
    }

    /// Take the first I/O error, clearing the slot
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    /// Record a failure; only the first one is kept
    pub fn record_error(&mut self, error: io::Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn record(&mut self, result: io::Result<()>) {
        if let Err(error) = result {
            self.record_error(error);
        }
    }

    /// Borrow the target
    pub fn target(&self) -> &T {
        &self.target
    }

    /// Unwrap the target, dropping unflushed bytes
    pub fn into_target(self) -> T {
        self.target
    }

    /// Write a byte slice
    pub fn write_bytes(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            if self.cursor == self.buffer.len() {
                self.flush_buffer();
            }
            let count = bytes.len().min(self.buffer.len() - self.cursor);
            self.buffer[self.cursor..self.cursor + count].copy_from_slice(&bytes[..count]);
            self.cursor += count;
            self.filled = self.filled.max(self.cursor);
            bytes = &bytes[count..];
        }
    }

    /// Write a byte
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.write_bytes(&[value]);
    }

    /// Write a big-endian `u16`
    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Write a big-endian `u32`
    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Write a big-endian `i32`
    #[inline]
    pub fn write_i32(&mut self, value: i32) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Write a big-endian `u64`
    #[inline]
    pub fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Write a big-endian IEEE 754 `f32`
    #[inline]
    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    /// Write a big-endian IEEE 754 `f64`
    #[inline]
    pub fn write_f64(&mut self, value: f64) {
        self.write_u64(value.to_bits());
    }

    /// Write an identifier of `id_size` bytes
    #[inline]
    pub fn write_id(&mut self, id_size: IdSize, value: u64) {
        match id_size {
            IdSize::Four => self.write_u32(value as u32),
            IdSize::Eight => self.write_u64(value),
        }
    }

    /// Move the logical position to `position`.
    ///
    /// Stays inside the buffer when `position` is part of the unflushed
    /// bytes; otherwise flushes and seeks the target.
    pub fn seek(&mut self, position: u64) {
        if position >= self.flushed && position <= self.flushed + self.filled as u64 {
            self.cursor = (position - self.flushed) as usize;
            return;
        }
        self.flush_buffer();
        if position != self.flushed {
            self.seek_target(position);
        }
    }

    fn seek_target(&mut self, position: u64) {
        let result = self.target.seek_to(position);
        self.record(result);
        self.flushed = position;
    }

    /// Push the buffered bytes to the target without flushing it
    pub fn flush_buffer(&mut self) {
        if self.filled > 0 {
            let result = self.target.write_all(&self.buffer[..self.filled]);
            self.record(result);
        }
        let end = self.flushed + self.filled as u64;
        let position = self.flushed + self.cursor as u64;
        self.flushed = end;
        self.cursor = 0;
        self.filled = 0;
        if position != end {
            self.seek_target(position);
        }
    }

    /// Push the buffered bytes and flush the target
    pub fn flush(&mut self) {
        self.flush_buffer();
        let result = self.target.flush();
        self.record(result);
    }
}
