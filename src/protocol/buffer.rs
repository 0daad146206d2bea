//! The command buffer, holding the argument bytes drained from the FIFO, and
//! the routines used by instruction handlers to parse them.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use crate::constants::{BUFFER_SIZE, FILENAME_WINDOW};
use crate::protocol::ErrorCode;

/// Holds the argument bytes of the current transaction.
///
/// Only the first `len()` bytes are valid arguments.  Handlers which read file
/// data may reuse the whole buffer as scratch space via [`Self::scratch()`],
/// once they have finished parsing their arguments.
pub struct CommandBuffer {
    data: [u8; BUFFER_SIZE],
    len: usize,
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBuffer {
    pub const fn new() -> Self {
        Self {
            data: [0; BUFFER_SIZE],
            len: 0,
        }
    }

    /// Discards any arguments.  Called before draining the FIFO.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Appends a byte drained from the FIFO.  Returns false, and drops the
    /// byte, if the buffer is full.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.len >= BUFFER_SIZE {
            return false;
        }
        self.data[self.len] = byte;
        self.len += 1;
        true
    }

    pub fn is_full(&self) -> bool {
        self.len >= BUFFER_SIZE
    }

    /// The number of valid argument bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The valid argument bytes.
    pub fn args(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Returns the argument byte at `pos`, if there is one.
    pub fn byte_at(&self, pos: usize) -> Option<u8> {
        self.args().get(pos).copied()
    }

    /// Reads a little endian u16 from the arguments at `pos`.  None if the
    /// host didn't send enough bytes.
    pub fn read_u16(&self, pos: usize) -> Option<u16> {
        let bytes = self.args().get(pos..pos + 2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a little endian u32 from the arguments at `pos`.  None if the
    /// host didn't send enough bytes.
    pub fn read_u32(&self, pos: usize) -> Option<u32> {
        let bytes = self.args().get(pos..pos + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Locates a NUL terminated filename starting at `offset`.
    ///
    /// The terminator must be within the first 13 bytes (8.3 plus NUL), and
    /// within the bytes actually received.  A terminator at `offset` itself
    /// (an empty name) is rejected, as is a name which isn't valid UTF-8.
    pub fn filename_at(&self, offset: usize) -> Result<Filename<'_>, ErrorCode> {
        let window = self.args().get(offset..).ok_or(ErrorCode::BadArgument)?;
        let window = &window[..window.len().min(FILENAME_WINDOW)];

        let nul = window
            .iter()
            .position(|&b| b == 0)
            .ok_or(ErrorCode::BadArgument)?;
        if nul == 0 {
            return Err(ErrorCode::BadArgument);
        }

        let name = core::str::from_utf8(&window[..nul]).map_err(|_| ErrorCode::BadArgument)?;

        Ok(Filename {
            name,
            terminator: offset + nul,
        })
    }

    /// The whole buffer, for use as scratch space when moving file data.
    /// Invalidates the arguments.
    pub fn scratch(&mut self) -> &mut [u8; BUFFER_SIZE] {
        self.len = 0;
        &mut self.data
    }
}

/// A filename located in the command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filename<'a> {
    /// The name, without its terminator.
    pub name: &'a str,

    /// Index of the terminating NUL within the arguments.
    pub terminator: usize,
}
