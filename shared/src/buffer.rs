//! # Circular Line Buffer
//!
//! A fixed-capacity byte ring that hands data out in whole lines, where a
//! line is everything up to and including a configured terminator sequence.
//! Bytes that never see a terminator leave the buffer only through
//! [`LineBuffer::flush_if_idle`] once no write has happened for a while.
//!
//! ## Index Scheme
//!
//! `head` and `tail` are absolute stream positions and only ever grow. They
//! are reduced modulo the capacity when touching storage, so a full ring
//! (`head - tail == capacity`) and an empty ring (`head == tail`) are never
//! confused and no byte is reserved.
//!
//! ```text
//! ┌──────────┬───────────────────────┬────────────────────────┐
//! │   free   │   pending (unread)    │          free          │
//! └──────────┴───────────────────────┴────────────────────────┘
//!            ▲                       ▲
//!      tail % capacity         head % capacity
//! ```

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::traits::Millis;

/// Longest accepted terminator sequence
pub const MAX_TERMINATOR_LEN: usize = 4;

/// Terminator storage; never empty once a buffer is built
pub type Terminator = heapless::Vec<u8, MAX_TERMINATOR_LEN>;

/// A slice view into the pending bytes, split at the end of storage
#[derive(Debug)]
pub struct BufferSlice<'a> {
    /// First contiguous chunk (before wrap-around)
    pub first: &'a [u8],
    /// Second contiguous chunk (after wrap-around, may be empty)
    pub second: &'a [u8],
}

impl<'a> BufferSlice<'a> {
    /// Total length across both chunks
    pub fn len(&self) -> usize {
        self.first.len() + self.second.len()
    }

    /// Check if the slice is empty
    pub fn is_empty(&self) -> bool {
        self.first.is_empty() && self.second.is_empty()
    }

    /// Copy both chunks into one owned vector
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(self.first);
        out.extend_from_slice(self.second);
        out
    }
}

/// Errors specific to buffer operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferError {
    /// Attempted to commit more bytes than there is free space
    Overflow,
    /// Capacity of zero requested
    ZeroCapacity,
    /// Terminator is empty or longer than [`MAX_TERMINATOR_LEN`]
    InvalidTerminator,
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::Overflow => f.write_str("buffer overflow"),
            BufferError::ZeroCapacity => f.write_str("buffer capacity must be non-zero"),
            BufferError::InvalidTerminator => write!(
                f,
                "terminator must be 1 to {} bytes long",
                MAX_TERMINATOR_LEN
            ),
        }
    }
}

/// Fixed-capacity ring buffer with terminator-aware line extraction
///
/// # Example
///
/// ```rust
/// use line_shared::buffer::LineBuffer;
///
/// let mut buffer = LineBuffer::new(64, b"\r\n").unwrap();
/// buffer.write_many(b"abc\r\n def\r", 0);
///
/// assert_eq!(buffer.read_line().as_deref(), Some(&b"abc\r\n"[..]));
/// assert_eq!(buffer.read_line(), None);
/// assert_eq!(buffer.read_partial(), b" def\r");
/// ```
pub struct LineBuffer {
    /// Backing storage, allocated once
    data: Vec<u8>,

    /// Absolute position of the next byte to be written
    head: u64,

    /// Absolute position of the oldest unread byte
    tail: u64,

    terminator: Terminator,

    /// Timestamp of the most recent successful write
    last_write: Millis,
}

impl LineBuffer {
    /// Create an empty buffer of `capacity` bytes splitting on `terminator`
    pub fn new(capacity: usize, terminator: &[u8]) -> Result<Self, BufferError> {
        if capacity == 0 {
            return Err(BufferError::ZeroCapacity);
        }
        if terminator.is_empty() {
            return Err(BufferError::InvalidTerminator);
        }
        let terminator =
            Terminator::from_slice(terminator).map_err(|_| BufferError::InvalidTerminator)?;

        Ok(Self {
            data: vec![0u8; capacity],
            head: 0,
            tail: 0,
            terminator,
            last_write: 0,
        })
    }

    /// Get the total capacity of the buffer
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The configured line terminator
    #[inline]
    pub fn terminator(&self) -> &[u8] {
        &self.terminator
    }

    /// Number of buffered bytes not yet handed out
    #[inline]
    pub fn available(&self) -> usize {
        (self.head - self.tail) as usize
    }

    /// Number of bytes that can still be written
    #[inline]
    pub fn free_space(&self) -> usize {
        self.capacity() - self.available()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.free_space() == 0
    }

    /// Timestamp of the most recent successful write
    #[inline]
    pub fn last_write_time(&self) -> Millis {
        self.last_write
    }

    #[inline]
    fn index(&self, pos: u64) -> usize {
        (pos % self.data.len() as u64) as usize
    }

    /// Append one byte. Returns `false` without side effects when full.
    pub fn write(&mut self, byte: u8, now: Millis) -> bool {
        if self.is_full() {
            return false;
        }
        let idx = self.index(self.head);
        self.data[idx] = byte;
        self.head += 1;
        self.last_write = now;
        true
    }

    /// Append bytes until the first rejected one. Returns how many were taken.
    pub fn write_many(&mut self, bytes: &[u8], now: Millis) -> usize {
        let mut written = 0;
        for &byte in bytes {
            if !self.write(byte, now) {
                break;
            }
            written += 1;
        }
        written
    }

    /// Extract the oldest complete line, terminator included.
    ///
    /// Returns `None` when no terminator is buffered. Call repeatedly to drain
    /// every complete line.
    pub fn read_line(&mut self) -> Option<Vec<u8>> {
        let end = self.line_end()?;
        let line = self.span(self.tail, end).to_vec();
        self.tail = end;
        Some(line)
    }

    /// Like [`read_line`](Self::read_line) but leaves the line buffered.
    ///
    /// Pair with [`consume`](Self::consume) once the line has been delivered.
    pub fn peek_line(&self) -> Option<Vec<u8>> {
        let end = self.line_end()?;
        Some(self.span(self.tail, end).to_vec())
    }

    /// Drop up to `n` of the oldest pending bytes
    pub fn consume(&mut self, n: usize) {
        self.tail += n.min(self.available()) as u64;
    }

    /// Absolute position just past the first buffered terminator
    fn line_end(&self) -> Option<u64> {
        let term_len = self.terminator.len() as u64;
        let mut pos = self.tail;

        while pos + term_len <= self.head {
            let matched = self
                .terminator
                .iter()
                .enumerate()
                .all(|(i, &t)| self.data[self.index(pos + i as u64)] == t);
            if matched {
                return Some(pos + term_len);
            }
            pos += 1;
        }

        None
    }

    /// Copy of the pending bytes, leaving them in place
    pub fn read_partial(&self) -> Vec<u8> {
        self.pending().to_vec()
    }

    /// Borrowed view of the pending bytes, split at the end of storage
    pub fn pending(&self) -> BufferSlice<'_> {
        self.span(self.tail, self.head)
    }

    fn span(&self, from: u64, to: u64) -> BufferSlice<'_> {
        let len = (to - from) as usize;
        if len == 0 {
            return BufferSlice {
                first: &[],
                second: &[],
            };
        }

        let start = self.index(from);
        let end = start + len;
        if end <= self.capacity() {
            BufferSlice {
                first: &self.data[start..end],
                second: &[],
            }
        } else {
            BufferSlice {
                first: &self.data[start..],
                second: &self.data[..end - self.capacity()],
            }
        }
    }

    /// Hand out a stale partial.
    ///
    /// When at least `timeout` ms passed since the last write and bytes are
    /// pending, returns them and empties the buffer. Otherwise `None`.
    pub fn flush_if_idle(&mut self, now: Millis, timeout: Millis) -> Option<Vec<u8>> {
        if self.is_empty() || now.wrapping_sub(self.last_write) < timeout {
            return None;
        }
        let partial = self.read_partial();
        self.tail = self.head;
        Some(partial)
    }

    /// Drop everything pending without reallocating
    pub fn clear(&mut self) {
        self.tail = self.head;
    }

    /// Largest contiguous free run starting at the write position.
    ///
    /// Fill it directly (e.g. from a UART read), then call
    /// [`advance_head`](Self::advance_head) with the number of bytes written.
    /// The run never crosses the end of storage; once it is used up a second
    /// call exposes the wrapped remainder.
    pub fn next_write_chunk(&mut self) -> &mut [u8] {
        let start = self.index(self.head);
        let len = self.free_space().min(self.capacity() - start);
        &mut self.data[start..start + len]
    }

    /// Commit `n` bytes written through [`next_write_chunk`](Self::next_write_chunk)
    pub fn advance_head(&mut self, n: usize, now: Millis) -> Result<(), BufferError> {
        if n > self.free_space() {
            return Err(BufferError::Overflow);
        }
        if n > 0 {
            self.head += n as u64;
            self.last_write = now;
        }
        Ok(())
    }
}

impl fmt::Debug for LineBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineBuffer")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .field("terminator", &crate::Escaped(&self.terminator))
            .field("last_write", &self.last_write)
            .finish()
    }
}
