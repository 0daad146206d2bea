//! Diagnostic instructions.
//!
//! CRCTEST, HELLO and ECHO only exercise the bus and FIFO, so they work with
//! no card.  FILE_MD5 and the benchmarks exercise the storage path.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use crate::constants::{DIGEST_SIZE, HELLO_MAGIC};
use crate::fs::{ContentHasher, FileSystem, FsError, OpenMode};
use crate::protocol::dispatch::Storage;
use crate::protocol::{CommandBuffer, Emit, ErrorCode, Response};
#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};

const CRC16_POLY: u16 = 0x1021;
const CRC16_INIT: u16 = 0xFFFF;

/// CRC-16/CCITT-FALSE: polynomial 0x1021, initial value 0xFFFF, no
/// reflection, no final xor.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(CRC16_INIT, |mut crc, &byte| {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
        }
        crc
    })
}

/// CRCTEST: responds with the argument count, then the CRC of the arguments.
pub(super) fn crc_test(buffer: &CommandBuffer, response: &mut Response) {
    response.emit_u16(buffer.len() as u16);
    response.emit_u16(crc16(buffer.args()));
}

/// HELLO: responds with the magic bytes.
pub(super) fn hello(response: &mut Response) {
    response.emit_bytes(&HELLO_MAGIC);
}

/// ECHO: responds with the arguments.
pub(super) fn echo(buffer: &CommandBuffer, response: &mut Response) {
    response.emit_bytes(buffer.args());
}

impl<F: FileSystem> Storage<F> {
    /// Closes a file opened by one of the diagnostics, logging any failure.
    fn close_quietly(&mut self, file: F::File) {
        if let Err(e) = self.fs.close(file) {
            warn!("Failed to close file: {}", e);
        }
    }

    /// Reads the file to its end, passing each chunk to `chunk`.  Returns the
    /// number of bytes read.
    fn read_to_end(
        &mut self,
        file: &mut F::File,
        buffer: &mut CommandBuffer,
        mut chunk: impl FnMut(&[u8]),
    ) -> Result<u32, ErrorCode> {
        let scratch = buffer.scratch();
        let mut total = 0u32;
        loop {
            match self.fs.read(file, scratch) {
                Ok(0) => return Ok(total),
                Ok(read) => {
                    chunk(&scratch[..read]);
                    total = total.wrapping_add(read as u32);
                }
                Err(e) => {
                    warn!("Read failed: {}", e);
                    return Err(ErrorCode::ReadError);
                }
            }
        }
    }

    /// Hashes the file from its current position, returning its size and
    /// digest.
    fn hash_file<H: ContentHasher>(
        &mut self,
        file: &mut F::File,
        buffer: &mut CommandBuffer,
    ) -> Result<(u32, [u8; DIGEST_SIZE]), ErrorCode> {
        let mut hasher = H::default();
        self.read_to_end(file, buffer, |data| hasher.update(data))?;
        let size = self.fs.size(file).map_err(|_| ErrorCode::ReadError)?;
        Ok((size, hasher.finalize()))
    }

    /// Hashes the file the host has open through its own handle, as the file
    /// system won't open it a second time.  The handle's position is
    /// restored afterwards.
    fn hash_open_file<H: ContentHasher>(
        &mut self,
        buffer: &mut CommandBuffer,
    ) -> Result<(u32, [u8; DIGEST_SIZE]), ErrorCode> {
        let Some(mut file) = self.open.take() else {
            return Err(ErrorCode::FailedToOpen);
        };
        let result = self.hash_from_start::<H>(&mut file, buffer);
        self.open = Some(file);
        result
    }

    fn hash_from_start<H: ContentHasher>(
        &mut self,
        file: &mut F::File,
        buffer: &mut CommandBuffer,
    ) -> Result<(u32, [u8; DIGEST_SIZE]), ErrorCode> {
        let position = self.fs.position(file).map_err(|_| ErrorCode::ReadError)?;
        self.fs.seek(file, 0).map_err(|_| ErrorCode::ReadError)?;
        let result = self.hash_file::<H>(file, buffer);
        if let Err(e) = self.fs.seek(file, position) {
            warn!("Failed to restore position {}: {}", position, e);
            return Err(ErrorCode::ReadError);
        }
        result
    }

    /// FILE_MD5: NUL terminated filename.  Responds with the file's size as
    /// a u32, then its 16 byte MD5 digest.  Works on the open file too.
    pub(super) fn file_md5<H: ContentHasher>(
        &mut self,
        buffer: &mut CommandBuffer,
        response: &mut Response,
    ) -> Result<(), ErrorCode> {
        let filename = buffer.filename_at(0)?;
        let result = match self.fs.open(filename.name, OpenMode::OPEN_READ) {
            Ok(mut file) => {
                let result = self.hash_file::<H>(&mut file, buffer);
                self.close_quietly(file);
                result
            }
            Err(FsError::AlreadyOpen) if self.open.is_some() => {
                debug!("{} is open, hashing through its handle", filename.name);
                self.hash_open_file::<H>(buffer)
            }
            Err(e) => {
                debug!("Failed to open {}: {}", filename.name, e);
                return Err(ErrorCode::FailedToOpen);
            }
        };

        let (size, digest) = result?;
        response.emit_u32(size);
        response.emit_bytes(&digest);
        Ok(())
    }

    /// BENCH_READ: reads the benchmark file to its end.  Responds with the
    /// number of bytes read as a u32.
    pub(super) fn bench_read(
        &mut self,
        name: &str,
        buffer: &mut CommandBuffer,
        response: &mut Response,
    ) -> Result<(), ErrorCode> {
        let mut file = self.fs.open(name, OpenMode::OPEN_READ).map_err(|e| {
            debug!("Failed to open {}: {}", name, e);
            ErrorCode::FailedToOpen
        })?;

        let total = self.read_to_end(&mut file, buffer, |_| {});
        self.close_quietly(file);
        let total = total?;

        debug!("Read benchmark read {} bytes", total);
        response.emit_u32(total);
        Ok(())
    }

    /// BENCH_WRITE: writes `chunks` buffers of a byte counting pattern to the
    /// benchmark file.  Responds with the number of bytes written as a u32.
    /// Any short write fails the benchmark.
    pub(super) fn bench_write(
        &mut self,
        name: &str,
        chunks: u16,
        buffer: &mut CommandBuffer,
        response: &mut Response,
    ) -> Result<(), ErrorCode> {
        let mut file = self.fs.open(name, OpenMode::OPEN_WRITE).map_err(|e| {
            debug!("Failed to open {}: {}", name, e);
            ErrorCode::FailedToOpen
        })?;

        let pattern = buffer.scratch();
        for (ii, byte) in pattern.iter_mut().enumerate() {
            *byte = ii as u8;
        }

        let mut total = 0u32;
        for _ in 0..chunks {
            match self.fs.write(&mut file, pattern) {
                Ok(written) if written == pattern.len() => total += written as u32,
                Ok(written) => {
                    warn!("Short write: {} of {} bytes", written, pattern.len());
                    self.close_quietly(file);
                    return Err(ErrorCode::WriteError);
                }
                Err(e) => {
                    warn!("Write failed: {}", e);
                    self.close_quietly(file);
                    return Err(ErrorCode::WriteError);
                }
            }
        }

        if let Err(e) = self.fs.flush(&mut file) {
            warn!("Flush failed: {}", e);
            self.close_quietly(file);
            return Err(ErrorCode::WriteError);
        }
        self.close_quietly(file);

        debug!("Write benchmark wrote {} bytes", total);
        response.emit_u32(total);
        Ok(())
    }
}
