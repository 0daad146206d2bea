//! This module implements the instruction protocol spoken with the host over
//! the FIFO.
//!
//! The host writes 0-512 argument bytes into the FIFO, then writes an opcode
//! to the control register.  That sets the request flip-flop, which the main
//! loop picks up.  The main loop drains the FIFO into the [`CommandBuffer`],
//! and the [`Dispatcher`] then executes the instruction and stages the
//! response in a [`Response`].
//!
//! The error convention is uniform across all instructions: if an instruction
//! fails, the error bit is set and the FIFO contains exactly one byte, the
//! [`ErrorCode`].  Nothing else the instruction may have produced is sent.
//! This is enforced by staging responses and only sending them on success.
//!
//! All multi-byte values, in both directions, are little endian.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

mod buffer;
mod diag;
mod dispatch;
mod file;

pub use buffer::{CommandBuffer, Filename};
pub use diag::crc16;
pub use dispatch::{Completion, Dispatcher};

use heapless::Vec;

use crate::constants::FIFO_CAPACITY;
#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};

/// The instructions supported by the firmware.  The values are the opcodes
/// the host writes to the control register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Opcode {
    /// List a page of the current directory.
    Dir = 9,
    /// Test whether a file exists.
    Exists = 10,
    /// Open a file.
    Open = 11,
    /// Delete a file.
    Delete = 12,
    /// Flush and close the open file.
    Close = 13,
    /// Length of the open file.
    Length = 14,
    /// Current position within the open file.
    Position = 15,
    /// Seek to an absolute position.
    Seek = 16,
    /// Read from the open file.
    Read = 17,
    /// Write to the open file.
    Write = 18,
    /// MD5 digest of a file.
    FileMd5 = 19,
    /// Read benchmark.
    BenchRead = 20,
    /// Write benchmark.
    BenchWrite = 21,
    /// Change directory.
    Chdir = 22,
    /// Seek relative to the current position.
    SeekRel = 23,
    /// CRC16 of the argument bytes.
    CrcTest = 0x68,
    /// Identity probe, returns 0xDEADBEEF.
    Hello = 0x69,
    /// Loopback of the argument bytes.
    Echo = 0x6A,
    /// Soft reset.  Any opcode with the top bit set decodes to this.
    Reset = 0x80,
}

impl Opcode {
    /// Whether the instruction needs the SD card.  Those which don't only
    /// exercise the bus and FIFO, so work even if the card failed to
    /// initialize, or has been removed.
    pub fn needs_storage(self) -> bool {
        !matches!(self, Self::CrcTest | Self::Hello | Self::Echo | Self::Reset)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value & Self::Reset as u8 != 0 {
            return Ok(Self::Reset);
        }

        match value {
            9 => Ok(Self::Dir),
            10 => Ok(Self::Exists),
            11 => Ok(Self::Open),
            12 => Ok(Self::Delete),
            13 => Ok(Self::Close),
            14 => Ok(Self::Length),
            15 => Ok(Self::Position),
            16 => Ok(Self::Seek),
            17 => Ok(Self::Read),
            18 => Ok(Self::Write),
            19 => Ok(Self::FileMd5),
            20 => Ok(Self::BenchRead),
            21 => Ok(Self::BenchWrite),
            22 => Ok(Self::Chdir),
            23 => Ok(Self::SeekRel),
            0x68 => Ok(Self::CrcTest),
            0x69 => Ok(Self::Hello),
            0x6A => Ok(Self::Echo),
            _ => Err(()),
        }
    }
}

/// Error codes returned to the host as the single response byte when an
/// instruction fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ErrorCode {
    /// Unused.
    Unknown = 128,
    /// OPEN while a file is already open.
    FileAlreadyOpen = 129,
    /// An instruction which requires an open file was issued without one.
    FileNotOpen = 130,
    /// The file could not be opened.
    FailedToOpen = 131,
    /// The arguments were malformed or too short.
    BadArgument = 132,
    /// Writing to the file failed.
    WriteError = 133,
    /// Reading from the file failed.
    ReadError = 134,
    /// CHDIR target is not a directory.
    InvalidDir = 135,
    /// Reserved.  No instruction currently produces this.
    DirMaxDepth = 136,
    /// EXISTS target does not exist.
    NonexistentFile = 137,
    /// The operation (seek, delete) failed.
    OperationFailed = 138,
    /// The SD card failed to initialize, or has been removed since.  Only a
    /// reset clears this.
    SdNotPresent = 139,
    /// The opcode is not recognised.
    UnknownInstruction = 140,
}

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for ErrorCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            128 => Ok(Self::Unknown),
            129 => Ok(Self::FileAlreadyOpen),
            130 => Ok(Self::FileNotOpen),
            131 => Ok(Self::FailedToOpen),
            132 => Ok(Self::BadArgument),
            133 => Ok(Self::WriteError),
            134 => Ok(Self::ReadError),
            135 => Ok(Self::InvalidDir),
            136 => Ok(Self::DirMaxDepth),
            137 => Ok(Self::NonexistentFile),
            138 => Ok(Self::OperationFailed),
            139 => Ok(Self::SdNotPresent),
            140 => Ok(Self::UnknownInstruction),
            _ => Err(()),
        }
    }
}

/// Describes the transaction currently being handled.  Recreated every time
/// the host raises the request flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transaction {
    /// The raw opcode read from the instruction latch.
    pub opcode: u8,

    /// Number of argument bytes drained from the FIFO.
    pub dlen: u16,
}

/// Something bytes can be emitted to, in FIFO order.  Multi-byte values are
/// emitted least significant byte first.
pub trait Emit {
    /// Emit a single byte.
    fn emit_byte(&mut self, byte: u8);

    /// Emit a u16, little endian.
    fn emit_u16(&mut self, value: u16) {
        self.emit_bytes(&value.to_le_bytes());
    }

    /// Emit a u32, little endian.
    fn emit_u32(&mut self, value: u32) {
        self.emit_bytes(&value.to_le_bytes());
    }

    /// Emit a slice of bytes, in order.
    fn emit_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.emit_byte(byte);
        }
    }
}

/// A response staged by an instruction handler.  It is only sent to the FIFO
/// if the handler succeeds.
///
/// The capacity is that of the FIFO, so a handler can never stage more than
/// the host could receive.  Bytes beyond that are dropped, as they would be
/// by the FIFO itself.
pub struct Response {
    data: Vec<u8, FIFO_CAPACITY>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub const fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Emit for Response {
    fn emit_byte(&mut self, byte: u8) {
        if self.data.push(byte).is_err() {
            warn!("Response full - dropping byte");
        }
    }

    fn emit_bytes(&mut self, bytes: &[u8]) {
        let space = self.data.capacity() - self.data.len();
        if bytes.len() > space {
            warn!(
                "Response full - dropping {} bytes",
                bytes.len() - space
            );
        }
        let take = bytes.len().min(space);

        // Can't fail, as we've limited it to the space available.
        let _ = self.data.extend_from_slice(&bytes[..take]);
    }
}
