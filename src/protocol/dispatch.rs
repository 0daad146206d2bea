//! The command dispatcher, which routes each transaction to its handler.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::marker::PhantomData;

use crate::bridge::BridgeConfig;
use crate::fs::{ContentHasher, FileSystem, Md5Hasher};
use crate::protocol::diag;
use crate::protocol::{CommandBuffer, ErrorCode, Opcode, Response, Transaction};
#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};

/// What the main loop should do once an instruction has been handled
/// successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Completion {
    /// Send the staged response.
    Respond,
    /// Send nothing, and hand over to the reset path.
    Reset,
}

/// The mounted file system, and the file the host has open, if any.  Only
/// one file can be open at a time.
pub(super) struct Storage<F: FileSystem> {
    pub(super) fs: F,
    pub(super) open: Option<F::File>,
}

/// Routes transactions to their handlers, and owns everything the handlers
/// share: the command buffer, the file system and the open file.
pub struct Dispatcher<F: FileSystem, H: ContentHasher = Md5Hasher> {
    storage: Option<Storage<F>>,

    // Cleared if the card is ever seen to be missing.  Only a reset sets it
    // again.
    card_available: bool,

    buffer: CommandBuffer,
    bench_file: &'static str,
    bench_write_chunks: u16,
    _hasher: PhantomData<H>,
}

impl<F: FileSystem, H: ContentHasher> Dispatcher<F, H> {
    /// Creates the dispatcher.  `fs` is None if the card couldn't be
    /// mounted, in which case only the bus diagnostics will succeed.
    pub fn new(fs: Option<F>, config: &BridgeConfig) -> Self {
        let card_available = fs.is_some();
        Self {
            storage: fs.map(|fs| Storage { fs, open: None }),
            card_available,
            buffer: CommandBuffer::new(),
            bench_file: config.bench_file,
            bench_write_chunks: config.bench_write_chunks,
            _hasher: PhantomData,
        }
    }

    /// The buffer the bus engine drains the FIFO into.
    pub fn buffer_mut(&mut self) -> &mut CommandBuffer {
        &mut self.buffer
    }

    /// Whether storage instructions can currently be executed.
    pub fn storage_available(&self) -> bool {
        self.card_available && self.storage.is_some()
    }

    /// The mounted file system, if any.
    pub fn fs(&self) -> Option<&F> {
        self.storage.as_ref().map(|storage| &storage.fs)
    }

    /// Whether the host has a file open.
    pub fn file_open(&self) -> bool {
        self.storage
            .as_ref()
            .is_some_and(|storage| storage.open.is_some())
    }

    /// Executes the transaction, whose arguments are in the command buffer.
    ///
    /// On success the response has been staged in `response`.  On failure
    /// the returned error code is the entire response, and anything staged
    /// must be discarded.
    ///
    /// The card detect switch is sampled for every transaction.  If the card
    /// has been removed, storage instructions fail with
    /// [`ErrorCode::SdNotPresent`] from then on, even if it is reinserted,
    /// as the file system state is no longer trustworthy.
    pub fn dispatch(
        &mut self,
        txn: Transaction,
        card_present: bool,
        response: &mut Response,
    ) -> Result<Completion, ErrorCode> {
        if self.card_available && !card_present {
            warn!("SD card removed - storage disabled until reset");
            self.card_available = false;
        }

        let Ok(opcode) = Opcode::try_from(txn.opcode) else {
            // Storage availability is reported in preference to an unknown
            // instruction.
            if !self.storage_available() {
                return Err(ErrorCode::SdNotPresent);
            }
            warn!("Unknown instruction: 0x{:02x}", txn.opcode);
            return Err(ErrorCode::UnknownInstruction);
        };
        trace!("Dispatching {} with {} bytes", opcode, txn.dlen);

        match opcode {
            Opcode::CrcTest => diag::crc_test(&self.buffer, response),
            Opcode::Hello => diag::hello(response),
            Opcode::Echo => diag::echo(&self.buffer, response),
            Opcode::Reset => {
                info!("Reset requested by host");
                return Ok(Completion::Reset);
            }
            _ => self.dispatch_storage(opcode, response)?,
        }

        Ok(Completion::Respond)
    }

    fn dispatch_storage(
        &mut self,
        opcode: Opcode,
        response: &mut Response,
    ) -> Result<(), ErrorCode> {
        if !self.card_available {
            return Err(ErrorCode::SdNotPresent);
        }
        let Some(storage) = self.storage.as_mut() else {
            return Err(ErrorCode::SdNotPresent);
        };
        let buffer = &mut self.buffer;

        match opcode {
            Opcode::Exists => storage.exists(buffer),
            Opcode::Dir => storage.dir(buffer, response),
            Opcode::Chdir => storage.chdir(buffer),
            Opcode::Delete => storage.delete(buffer),
            Opcode::FileMd5 => storage.file_md5::<H>(buffer, response),
            Opcode::BenchRead => storage.bench_read(self.bench_file, buffer, response),
            Opcode::BenchWrite => {
                storage.bench_write(self.bench_file, self.bench_write_chunks, buffer, response)
            }
            Opcode::Open => storage.open(buffer),
            Opcode::Close => storage.close(),
            Opcode::Length => storage.length(response),
            Opcode::Position => storage.position(response),
            Opcode::Seek => storage.seek(buffer),
            Opcode::SeekRel => storage.seek_relative(buffer),
            Opcode::Read => storage.read(buffer, response),
            Opcode::Write => storage.write(buffer, response),
            Opcode::CrcTest | Opcode::Hello | Opcode::Echo | Opcode::Reset => {
                Err(ErrorCode::UnknownInstruction)
            }
        }
    }
}
