//! An in-memory file system with FAT-like directories: 8.3 upper case names,
//! slots kept in creation order, deleted slots left in place and marked.
//! Like the SD card, a file can only be open once at a time.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::ops::ControlFlow;

use crate::fs::{
    DIR_NAME_DELETED, DirEntry, DirTarget, EntryKind, FileSystem, FsError, OpenMode,
};

/// Index of the root directory.
pub const ROOT: usize = 0;

struct Slot {
    name: [u8; 11],
    kind: EntryKind,
    data: Vec<u8>,
    child: Option<usize>,
}

impl Slot {
    fn is_deleted(&self) -> bool {
        self.name[0] == DIR_NAME_DELETED
    }
}

/// An open file.
#[derive(Debug)]
pub struct MemFile {
    dir: usize,
    slot: usize,
    pos: usize,
    mode: OpenMode,
}

pub struct MemFs {
    dirs: Vec<Vec<Slot>>,
    cwd: usize,
    /// (directory, slot) of each open file.
    open: Vec<(usize, usize)>,
    flushes: usize,
    write_budget: Option<usize>,
    fail_reads: bool,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a name to its space padded 8.3 form.
fn short_name(name: &str) -> Result<[u8; 11], FsError> {
    let mut raw = [b' '; 11];
    if name == "." || name == ".." {
        raw[..name.len()].copy_from_slice(name.as_bytes());
        return Ok(raw);
    }

    let (base, ext) = match name.rsplit_once('.') {
        Some((base, ext)) => (base, ext),
        None => (name, ""),
    };
    if base.is_empty() || base.len() > 8 || ext.len() > 3 || base.contains('.') {
        return Err(FsError::InvalidName);
    }
    for (dst, src) in raw[..8].iter_mut().zip(base.bytes()) {
        *dst = src.to_ascii_uppercase();
    }
    for (dst, src) in raw[8..].iter_mut().zip(ext.bytes()) {
        *dst = src.to_ascii_uppercase();
    }
    Ok(raw)
}

impl MemFs {
    pub fn new() -> Self {
        Self {
            dirs: vec![Vec::new()],
            cwd: ROOT,
            open: Vec::new(),
            flushes: 0,
            write_budget: None,
            fail_reads: false,
        }
    }

    /// Adds a file to the given directory.
    pub fn add_file_in(&mut self, dir: usize, name: &str, data: &[u8]) {
        let name = short_name(name).unwrap();
        self.dirs[dir].push(Slot {
            name,
            kind: EntryKind::File,
            data: data.to_vec(),
            child: None,
        });
    }

    pub fn add_file(&mut self, name: &str, data: &[u8]) {
        self.add_file_in(ROOT, name, data);
    }

    /// Adds a directory, with `.` and `..` entries, and returns its index.
    pub fn add_dir_in(&mut self, parent: usize, name: &str) -> usize {
        let index = self.dirs.len();
        let dir_slot = |name: &str, child| Slot {
            name: short_name(name).unwrap(),
            kind: EntryKind::Directory,
            data: Vec::new(),
            child: Some(child),
        };
        self.dirs.push(vec![dir_slot(".", index), dir_slot("..", parent)]);
        self.dirs[parent].push(dir_slot(name, index));
        index
    }

    pub fn add_dir(&mut self, name: &str) -> usize {
        self.add_dir_in(ROOT, name)
    }

    /// Adds a slot exactly as given, e.g. a deleted entry or volume label.
    pub fn add_raw_slot(&mut self, dir: usize, name: [u8; 11], kind: EntryKind) {
        self.dirs[dir].push(Slot {
            name,
            kind,
            data: Vec::new(),
            child: None,
        });
    }

    /// Contents of a file in the given directory.
    pub fn contents_in(&self, dir: usize, name: &str) -> Option<&[u8]> {
        let index = self.find(dir, name).ok()?;
        Some(&self.dirs[dir][index].data)
    }

    pub fn contents(&self, name: &str) -> Option<&[u8]> {
        self.contents_in(ROOT, name)
    }

    pub fn cwd(&self) -> usize {
        self.cwd
    }

    pub fn open_files(&self) -> usize {
        self.open.len()
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Limits the total number of bytes which will be written from now on,
    /// as if the volume were nearly full.
    pub fn set_write_budget(&mut self, bytes: usize) {
        self.write_budget = Some(bytes);
    }

    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    fn find(&self, dir: usize, name: &str) -> Result<usize, FsError> {
        let raw = short_name(name)?;
        self.dirs[dir]
            .iter()
            .position(|slot| !slot.is_deleted() && slot.name == raw)
            .ok_or(FsError::NotFound)
    }

    fn slot_mut(&mut self, file: &MemFile) -> &mut Slot {
        &mut self.dirs[file.dir][file.slot]
    }
}

impl FileSystem for MemFs {
    type File = MemFile;

    fn open(&mut self, name: &str, mode: OpenMode) -> Result<MemFile, FsError> {
        let cwd = self.cwd;
        let slot = match self.find(cwd, name) {
            Ok(slot) => {
                if mode.contains(OpenMode::CREATE | OpenMode::EXCLUSIVE) {
                    return Err(FsError::AlreadyExists);
                }
                if self.dirs[cwd][slot].kind != EntryKind::File {
                    return Err(FsError::NotFound);
                }
                slot
            }
            Err(FsError::NotFound) if mode.contains(OpenMode::CREATE) => {
                self.add_file_in(cwd, name, &[]);
                self.dirs[cwd].len() - 1
            }
            Err(e) => return Err(e),
        };
        if self.open.contains(&(cwd, slot)) {
            return Err(FsError::AlreadyOpen);
        }

        if mode.contains(OpenMode::TRUNCATE) {
            self.dirs[cwd][slot].data.clear();
        }
        let pos = if mode.starts_at_beginning() {
            0
        } else {
            self.dirs[cwd][slot].data.len()
        };

        self.open.push((cwd, slot));
        Ok(MemFile {
            dir: cwd,
            slot,
            pos,
            mode,
        })
    }

    fn close(&mut self, file: MemFile) -> Result<(), FsError> {
        self.open.retain(|&open| open != (file.dir, file.slot));
        Ok(())
    }

    fn flush(&mut self, _file: &mut MemFile) -> Result<(), FsError> {
        self.flushes += 1;
        Ok(())
    }

    fn read(&mut self, file: &mut MemFile, buf: &mut [u8]) -> Result<usize, FsError> {
        if self.fail_reads {
            return Err(FsError::Io);
        }
        if !file.mode.contains(OpenMode::READ) {
            return Err(FsError::ReadOnly);
        }
        let pos = file.pos;
        let data = &self.slot_mut(file).data;
        let count = buf.len().min(data.len().saturating_sub(pos));
        if count == 0 {
            return Ok(0);
        }
        buf[..count].copy_from_slice(&data[pos..pos + count]);
        file.pos += count;
        Ok(count)
    }

    fn write(&mut self, file: &mut MemFile, buf: &[u8]) -> Result<usize, FsError> {
        if !file.mode.is_writable() {
            return Err(FsError::ReadOnly);
        }
        let count = match self.write_budget {
            Some(budget) => buf.len().min(budget),
            None => buf.len(),
        };
        if let Some(budget) = self.write_budget.as_mut() {
            *budget -= count;
        }

        let append = file.mode.contains(OpenMode::APPEND);
        let mut pos = file.pos;
        let data = &mut self.slot_mut(file).data;
        if append {
            pos = data.len();
        }
        let end = pos + count;
        if end > data.len() {
            data.resize(end, 0);
        }
        data[pos..end].copy_from_slice(&buf[..count]);
        file.pos = end;
        Ok(count)
    }

    fn seek(&mut self, file: &mut MemFile, position: u32) -> Result<(), FsError> {
        let len = self.slot_mut(file).data.len();
        if position as usize > len {
            return Err(FsError::OutOfRange);
        }
        file.pos = position as usize;
        Ok(())
    }

    fn size(&mut self, file: &MemFile) -> Result<u32, FsError> {
        Ok(self.dirs[file.dir][file.slot].data.len() as u32)
    }

    fn position(&mut self, file: &MemFile) -> Result<u32, FsError> {
        Ok(file.pos as u32)
    }

    fn exists(&mut self, name: &str) -> Result<bool, FsError> {
        match self.find(self.cwd, name) {
            Ok(slot) => Ok(self.dirs[self.cwd][slot].kind == EntryKind::File),
            Err(FsError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn remove(&mut self, name: &str) -> Result<(), FsError> {
        let cwd = self.cwd;
        let index = self.find(cwd, name)?;
        if self.open.contains(&(cwd, index)) {
            return Err(FsError::AlreadyOpen);
        }
        let slot = &mut self.dirs[cwd][index];
        if slot.kind != EntryKind::File {
            return Err(FsError::NotFound);
        }
        slot.name[0] = DIR_NAME_DELETED;
        slot.data.clear();
        Ok(())
    }

    fn change_dir(&mut self, target: DirTarget<'_>) -> Result<(), FsError> {
        match target {
            DirTarget::Root => self.cwd = ROOT,
            DirTarget::Child(name) => {
                let slot = self.find(self.cwd, name)?;
                let slot = &self.dirs[self.cwd][slot];
                match (slot.kind, slot.child) {
                    (EntryKind::Directory, Some(child)) => self.cwd = child,
                    _ => return Err(FsError::NotADirectory),
                }
            }
        }
        Ok(())
    }

    fn for_each_entry<V>(&mut self, mut visit: V) -> Result<(), FsError>
    where
        V: FnMut(&DirEntry) -> ControlFlow<()>,
    {
        for slot in &self.dirs[self.cwd] {
            let size = match slot.kind {
                EntryKind::File => slot.data.len() as u32,
                _ => 0,
            };
            let entry = DirEntry {
                name: slot.name,
                kind: slot.kind,
                size,
            };
            if visit(&entry).is_break() {
                break;
            }
        }
        Ok(())
    }
}
