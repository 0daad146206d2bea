//! Handlers for the file and directory instructions.
//!
//! Each handler parses its arguments from the command buffer, calls the file
//! system, and stages its response.  Any failure is returned as the error
//! code to send to the host, and whatever was staged is discarded.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::ops::ControlFlow;

use crate::constants::{
    DELETE_SENTINEL, DIR_NO_MORE_FILES, DIR_SUBDIR_SIZE, FILES_PER_DIR_PAGE, READ_MAX_SIZE,
};
use crate::fs::{DirTarget, EntryKind, FileSystem, FsError, OpenMode};
use crate::protocol::dispatch::Storage;
use crate::protocol::{CommandBuffer, Emit, ErrorCode, Response};
#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};

impl<F: FileSystem> Storage<F> {
    /// OPEN: mode byte, then a NUL terminated filename.
    pub(super) fn open(&mut self, buffer: &CommandBuffer) -> Result<(), ErrorCode> {
        if self.open.is_some() {
            return Err(ErrorCode::FileAlreadyOpen);
        }

        let mode = buffer
            .byte_at(0)
            .map(OpenMode::from_wire)
            .ok_or(ErrorCode::BadArgument)?;
        let filename = buffer.filename_at(1)?;

        if !mode.is_valid() {
            debug!("Open mode 0x{:02x} neither reads nor writes", mode.bits());
            return Err(ErrorCode::FailedToOpen);
        }

        let file = self.fs.open(filename.name, mode).map_err(|e| {
            debug!("Failed to open {}: {}", filename.name, e);
            ErrorCode::FailedToOpen
        })?;
        debug!("Opened {} mode 0x{:02x}", filename.name, mode.bits());
        self.open = Some(file);

        Ok(())
    }

    /// CLOSE: flushes and closes the open file.  Does nothing if there is
    /// no open file, and never fails.
    pub(super) fn close(&mut self) -> Result<(), ErrorCode> {
        if let Some(mut file) = self.open.take() {
            if let Err(e) = self.fs.flush(&mut file) {
                warn!("Failed to flush file: {}", e);
            }
            if let Err(e) = self.fs.close(file) {
                warn!("Failed to close file: {}", e);
            }
        }
        Ok(())
    }

    /// READ: optional u16 count, clamped so the response fits in the FIFO.
    /// Responds with the count actually read, then the data.
    pub(super) fn read(
        &mut self,
        buffer: &mut CommandBuffer,
        response: &mut Response,
    ) -> Result<(), ErrorCode> {
        let file = self.open.as_mut().ok_or(ErrorCode::FileNotOpen)?;

        let requested = buffer
            .read_u16(0)
            .map_or(READ_MAX_SIZE, |count| (count as usize).min(READ_MAX_SIZE));

        let data = &mut buffer.scratch()[..requested];
        let mut count = 0;
        while count < requested {
            let read = self.fs.read(file, &mut data[count..]).map_err(|e| {
                warn!("Read failed: {}", e);
                ErrorCode::ReadError
            })?;
            if read == 0 {
                break;
            }
            count += read;
        }

        response.emit_u16(count as u16);
        response.emit_bytes(&data[..count]);
        Ok(())
    }

    /// WRITE: the whole of the arguments is written.  Responds with the count
    /// written.
    pub(super) fn write(
        &mut self,
        buffer: &CommandBuffer,
        response: &mut Response,
    ) -> Result<(), ErrorCode> {
        let file = self.open.as_mut().ok_or(ErrorCode::FileNotOpen)?;
        if buffer.is_empty() {
            return Err(ErrorCode::WriteError);
        }

        let written = self.fs.write(file, buffer.args()).map_err(|e| {
            warn!("Write failed: {}", e);
            ErrorCode::WriteError
        })?;
        if written == 0 {
            return Err(ErrorCode::WriteError);
        }
        if written < buffer.len() {
            debug!("Short write: {} of {}", written, buffer.len());
        }

        response.emit_u16(written as u16);
        Ok(())
    }

    /// SEEK: u32 absolute position.
    pub(super) fn seek(&mut self, buffer: &CommandBuffer) -> Result<(), ErrorCode> {
        let file = self.open.as_mut().ok_or(ErrorCode::FileNotOpen)?;
        let position = buffer.read_u32(0).ok_or(ErrorCode::BadArgument)?;

        self.fs.seek(file, position).map_err(|e| {
            debug!("Seek to {} failed: {}", position, e);
            ErrorCode::OperationFailed
        })
    }

    /// SEEKREL: i32 offset from the current position.  A target outside the
    /// file fails, leaving the position where it was.
    pub(super) fn seek_relative(&mut self, buffer: &CommandBuffer) -> Result<(), ErrorCode> {
        let file = self.open.as_mut().ok_or(ErrorCode::FileNotOpen)?;
        let offset = buffer.read_u32(0).ok_or(ErrorCode::BadArgument)? as i32;

        let current = self
            .fs
            .position(file)
            .map_err(|_| ErrorCode::OperationFailed)?;
        let target = u32::try_from(i64::from(current) + i64::from(offset)).map_err(|_| {
            debug!("Relative seek {} from {} out of range", offset, current);
            ErrorCode::OperationFailed
        })?;

        self.fs.seek(file, target).map_err(|e| {
            debug!("Seek to {} failed: {}", target, e);
            ErrorCode::OperationFailed
        })
    }

    /// LENGTH: responds with the open file's size as a u32.
    pub(super) fn length(&mut self, response: &mut Response) -> Result<(), ErrorCode> {
        let file = self.open.as_ref().ok_or(ErrorCode::FileNotOpen)?;
        let size = self
            .fs
            .size(file)
            .map_err(|_| ErrorCode::OperationFailed)?;
        response.emit_u32(size);
        Ok(())
    }

    /// POSITION: responds with the current position as a u32.
    pub(super) fn position(&mut self, response: &mut Response) -> Result<(), ErrorCode> {
        let file = self.open.as_ref().ok_or(ErrorCode::FileNotOpen)?;
        let position = self
            .fs
            .position(file)
            .map_err(|_| ErrorCode::OperationFailed)?;
        response.emit_u32(position);
        Ok(())
    }

    /// EXISTS: succeeds, with no response, if the file exists.  The open
    /// file counts.
    pub(super) fn exists(&mut self, buffer: &CommandBuffer) -> Result<(), ErrorCode> {
        let filename = buffer.filename_at(0)?;

        match self.fs.exists(filename.name) {
            Ok(true) => Ok(()),
            // A name which isn't a valid 8.3 name can't exist.
            Ok(false) | Err(FsError::NotFound | FsError::InvalidName) => {
                Err(ErrorCode::NonexistentFile)
            }
            Err(e) => {
                warn!("Failed to look up {}: {}", filename.name, e);
                Err(ErrorCode::OperationFailed)
            }
        }
    }

    /// DELETE: filename, then the sentinel byte immediately after its
    /// terminator.  The sentinel guards against a stray delete.
    pub(super) fn delete(&mut self, buffer: &CommandBuffer) -> Result<(), ErrorCode> {
        let filename = buffer.filename_at(0)?;
        if buffer.byte_at(filename.terminator + 1) != Some(DELETE_SENTINEL) {
            debug!("Delete of {} without sentinel", filename.name);
            return Err(ErrorCode::BadArgument);
        }

        self.fs.remove(filename.name).map_err(|e| {
            debug!("Failed to delete {}: {}", filename.name, e);
            ErrorCode::OperationFailed
        })?;
        info!("Deleted {}", filename.name);
        Ok(())
    }

    /// CHDIR: `/` or `\` returns to the root, anything else must be a
    /// directory within the current one.
    pub(super) fn chdir(&mut self, buffer: &CommandBuffer) -> Result<(), ErrorCode> {
        let filename = buffer.filename_at(0)?;
        let target = match filename.name {
            "/" | "\\" => DirTarget::Root,
            name => DirTarget::Child(name),
        };

        self.fs.change_dir(target).map_err(|e| {
            debug!("Failed to change to {}: {}", filename.name, e);
            ErrorCode::InvalidDir
        })
    }

    /// DIR: optional page byte.  Responds with the page byte, then up to a
    /// page of entries, each an 11 byte name and a u32 size.  If the page
    /// isn't full the listing has ended, and the sentinel follows.
    ///
    /// Pages are counted in listable entries, so deleted and hidden slots
    /// never shift entries between pages.
    pub(super) fn dir(
        &mut self,
        buffer: &CommandBuffer,
        response: &mut Response,
    ) -> Result<(), ErrorCode> {
        let page = buffer.byte_at(0).unwrap_or(0);
        response.emit_byte(page);

        let mut skip = page as usize * FILES_PER_DIR_PAGE;
        let mut count = 0;
        let result = self.fs.for_each_entry(|entry| {
            if entry.is_end_marker() {
                return ControlFlow::Break(());
            }
            if !entry.is_listable() {
                return ControlFlow::Continue(());
            }
            if skip > 0 {
                skip -= 1;
                return ControlFlow::Continue(());
            }

            response.emit_bytes(&entry.name);
            match entry.kind {
                EntryKind::Directory => response.emit_u32(DIR_SUBDIR_SIZE),
                _ => response.emit_u32(entry.size),
            }

            count += 1;
            if count < FILES_PER_DIR_PAGE {
                ControlFlow::Continue(())
            } else {
                ControlFlow::Break(())
            }
        });

        // The host can't be told about a failure part way through a listing,
        // so it just ends early.
        if let Err(e) = result {
            warn!("Directory listing failed: {}", e);
        }

        if count < FILES_PER_DIR_PAGE {
            response.emit_byte(DIR_NO_MORE_FILES);
        }
        Ok(())
    }
}
