//! Circular receive buffer tolerant of partial reads.
//!
//! Socket reads deliver bytes with no regard for frame boundaries: a single
//! `recvmsg` may end halfway through a header, or contain a dozen frames.
//! [`MessageBuffer`] keeps whatever has not been consumed yet and lets the
//! dispatcher take exactly as many bytes as a frame needs.
//!
//! ```text
//!   capacity = 16
//!   ┌───┬───┬───┬───┬───┬───┬───┬───┬───┬───┬───┬───┬───┬───┬───┬───┐
//!   │ d │ e │   │   │   │   │   │   │   │   │   │   │ a │ b │ c │   │
//!   └───┴───┴───┴───┴───┴───┴───┴───┴───┴───┴───┴───┴───┴───┴───┴───┘
//!             ▲ write                                 ▲ read
//!   unread = (write − read) mod capacity = (2 − 12) mod 16 = 6
//! ```
//!
//! One slot always stays empty so that `read == write` unambiguously means
//! "empty".  When a write would fill that slot the storage doubles and the
//! unread bytes are moved to the front.

use thiserror::Error;

const DEFAULT_CAPACITY: usize = 256;
const MIN_CAPACITY: usize = 4;

/// A read asked for more bytes than are buffered.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("read of {requested} bytes exceeds the {available} unread bytes")]
pub struct Underrun {
    pub requested: usize,
    pub available: usize,
}

#[derive(Debug, Clone)]
pub struct MessageBuffer {
    storage: Vec<u8>,
    read: usize,
    write: usize,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0; capacity.max(MIN_CAPACITY)],
            read: 0,
            write: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        let cap = self.capacity();
        (self.write + cap - self.read) % cap
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    /// Appends `data` at the tail, growing first if it would overtake unread bytes.
    pub fn write(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let needed = self.len() + data.len() + 1;
        if needed > self.capacity() {
            self.grow(needed);
        }

        let cap = self.capacity();
        let first = data.len().min(cap - self.write);
        self.storage[self.write..self.write + first].copy_from_slice(&data[..first]);
        let rest = data.len() - first;
        self.storage[..rest].copy_from_slice(&data[first..]);
        self.write = (self.write + data.len()) % cap;
    }

    /// Copies the next `out.len()` bytes into `out` and consumes them.
    ///
    /// # Errors
    ///
    /// Returns [`Underrun`] if fewer bytes are buffered; nothing is consumed.
    pub fn read_into(&mut self, out: &mut [u8]) -> Result<(), Underrun> {
        self.peek_into(out)?;
        self.read = (self.read + out.len()) % self.capacity();
        Ok(())
    }

    /// Consumes and returns the next `n` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Underrun`] if fewer than `n` bytes are buffered.  Callers
    /// check [`MessageBuffer::len`] first, so this only fires on a logic error.
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, Underrun> {
        let mut out = vec![0; n];
        self.read_into(&mut out)?;
        Ok(out)
    }

    /// Consumes a little-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`Underrun`] if fewer than 4 bytes are buffered.
    pub fn read_u32(&mut self) -> Result<u32, Underrun> {
        let mut word = [0u8; 4];
        self.read_into(&mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    /// Drops every unread byte and shrinks back to the default capacity.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    fn peek_into(&self, out: &mut [u8]) -> Result<(), Underrun> {
        let available = self.len();
        if out.len() > available {
            return Err(Underrun {
                requested: out.len(),
                available,
            });
        }
        let cap = self.capacity();
        let first = out.len().min(cap - self.read);
        out[..first].copy_from_slice(&self.storage[self.read..self.read + first]);
        let rest = out.len() - first;
        out[first..].copy_from_slice(&self.storage[..rest]);
        Ok(())
    }

    fn grow(&mut self, needed: usize) {
        let mut new_cap = self.capacity() * 2;
        while new_cap < needed {
            new_cap *= 2;
        }
        let unread = self.len();
        let mut storage = vec![0; new_cap];
        // peek_into cannot fail: exactly `unread` bytes are available.
        if self.peek_into(&mut storage[..unread]).is_ok() {
            self.storage = storage;
            self.read = 0;
            self.write = unread;
        }
    }
}
