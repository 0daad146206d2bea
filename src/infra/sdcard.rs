//! The SD card, accessed over SPI, and its FAT file system.
//!
//! [`SdFileSystem`] implements [`FileSystem`] over embedded-sdmmc's raw
//! handle API, so the open file and the current directory are plain handles
//! owned by the main loop.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::cell::RefCell;
use core::fmt::Debug;
use core::ops::ControlFlow;

#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};
use embassy_embedded_hal::shared_bus::blocking::spi::SpiDevice;
use embassy_rp::gpio::Output;
use embassy_rp::peripherals::SPI0;
use embassy_rp::spi::{self, Blocking, Spi};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Delay;
use embedded_sdmmc::{
    Mode, RawDirectory, RawFile, SdCard, TimeSource, Timestamp, VolumeIdx, VolumeManager,
};
use static_cell::StaticCell;

use crate::fs::{DirDepth, DirEntry, DirTarget, EntryKind, FileSystem, FsError, OpenMode};
use crate::infra::gpio::SdSpiPins;

/// SPI clock while the card is initialised.  Cards must accept 400kHz.
const SD_INIT_FREQUENCY: u32 = 400_000;

/// SPI clock once the card is up.
const SD_RUN_FREQUENCY: u32 = 16_000_000;

type SdSpiBus = Spi<'static, SPI0, Blocking>;
type SdSpiDevice = SpiDevice<'static, CriticalSectionRawMutex, SdSpiBus, Output<'static>>;
type Card = SdCard<SdSpiDevice, Delay>;
type Volumes = VolumeManager<Card, FixedTime>;

// The SPI bus is borrowed by the card's SPI device for the life of the
// firmware.
static SD_SPI_BUS: StaticCell<Mutex<CriticalSectionRawMutex, RefCell<SdSpiBus>>> =
    StaticCell::new();

/// There's no RTC, so everything is stamped with the same time.
pub struct FixedTime;

impl TimeSource for FixedTime {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 55,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

/// The mounted FAT volume.
pub struct SdFileSystem {
    volumes: Volumes,
    root: RawDirectory,
    cwd: RawDirectory,
    depth: DirDepth,
}

impl SdFileSystem {
    /// Initialises the card and mounts its first partition.  Can only be
    /// called once, as the SPI bus is moved into a static.
    pub fn mount(p_spi: SPI0, pins: SdSpiPins) -> Result<Self, FsError> {
        let mut config = spi::Config::default();
        config.frequency = SD_INIT_FREQUENCY;
        let spi = Spi::new_blocking(p_spi, pins.clk, pins.mosi, pins.miso, config.clone());
        let bus = SD_SPI_BUS.init(Mutex::new(RefCell::new(spi)));

        let card = SdCard::new(SpiDevice::new(bus, pins.cs), Delay);
        let size = card.num_bytes().map_err(|e| {
            warn!("SD card init failed: {}", defmt::Debug2Format(&e));
            FsError::Io
        })?;
        info!("SD card is {} bytes", size);

        config.frequency = SD_RUN_FREQUENCY;
        bus.lock(|spi| spi.borrow_mut().set_config(&config));

        let mut volumes = VolumeManager::new(card, FixedTime);
        let volume = volumes
            .open_raw_volume(VolumeIdx(0))
            .map_err(|e| map_error("open volume", e))?;
        let root = volumes
            .open_root_dir(volume)
            .map_err(|e| map_error("open root", e))?;

        info!("Mounted SD card volume 0");
        Ok(Self {
            volumes,
            root,
            cwd: root,
            depth: DirDepth::default(),
        })
    }

    fn close_cwd(&mut self) {
        if self.cwd != self.root {
            if let Err(e) = self.volumes.close_dir(self.cwd) {
                map_error("close dir", e);
            }
            self.cwd = self.root;
        }
    }
}

/// Logs an embedded-sdmmc error, and maps it to the closest [`FsError`].
fn map_error<E: Debug>(op: &str, e: embedded_sdmmc::Error<E>) -> FsError {
    use embedded_sdmmc::Error;

    debug!("SD {} failed: {}", op, defmt::Debug2Format(&e));
    match e {
        Error::NotFound => FsError::NotFound,
        Error::FileAlreadyExists => FsError::AlreadyExists,
        Error::FilenameError(_) => FsError::InvalidName,
        Error::OpenedFileAsDir | Error::OpenedDirAsFile => FsError::NotADirectory,
        Error::InvalidOffset | Error::EndOfFile => FsError::OutOfRange,
        Error::TooManyOpenFiles | Error::TooManyOpenDirs => FsError::TooManyOpen,
        Error::FileAlreadyOpen | Error::DirAlreadyOpen => FsError::AlreadyOpen,
        Error::ReadOnly => FsError::ReadOnly,
        _ => FsError::Io,
    }
}

/// Maps the wire mode onto the embedded-sdmmc modes.  Returns whether the
/// file then needs seeking back to the start, as the creating modes which
/// don't truncate all open at the end.
fn map_mode(mode: OpenMode) -> (Mode, bool) {
    if !mode.is_writable() {
        return (Mode::ReadOnly, false);
    }

    let create = mode.contains(OpenMode::CREATE);
    if mode.contains(OpenMode::TRUNCATE) {
        let m = if create {
            Mode::ReadWriteCreateOrTruncate
        } else {
            Mode::ReadWriteTruncate
        };
        return (m, false);
    }
    if create && mode.contains(OpenMode::EXCLUSIVE) {
        return (Mode::ReadWriteCreate, false);
    }

    let m = if create {
        Mode::ReadWriteCreateOrAppend
    } else {
        Mode::ReadWriteAppend
    };
    (m, mode.starts_at_beginning())
}

impl FileSystem for SdFileSystem {
    type File = RawFile;

    fn open(&mut self, name: &str, mode: OpenMode) -> Result<RawFile, FsError> {
        let (sd_mode, rewind) = map_mode(mode);
        let file = self
            .volumes
            .open_file_in_dir(self.cwd, name, sd_mode)
            .map_err(|e| map_error("open", e))?;

        if rewind {
            if let Err(e) = self.volumes.file_seek_from_start(file, 0) {
                let e = map_error("rewind", e);
                let _ = self.volumes.close_file(file);
                return Err(e);
            }
        }
        Ok(file)
    }

    fn close(&mut self, file: RawFile) -> Result<(), FsError> {
        self.volumes
            .close_file(file)
            .map_err(|e| map_error("close", e))
    }

    fn flush(&mut self, file: &mut RawFile) -> Result<(), FsError> {
        self.volumes
            .flush_file(*file)
            .map_err(|e| map_error("flush", e))
    }

    fn read(&mut self, file: &mut RawFile, buf: &mut [u8]) -> Result<usize, FsError> {
        self.volumes
            .read(*file, buf)
            .map_err(|e| map_error("read", e))
    }

    fn write(&mut self, file: &mut RawFile, buf: &[u8]) -> Result<usize, FsError> {
        // embedded-sdmmc writes all or nothing.
        self.volumes
            .write(*file, buf)
            .map(|_| buf.len())
            .map_err(|e| map_error("write", e))
    }

    fn seek(&mut self, file: &mut RawFile, position: u32) -> Result<(), FsError> {
        self.volumes
            .file_seek_from_start(*file, position)
            .map_err(|e| map_error("seek", e))
    }

    fn size(&mut self, file: &RawFile) -> Result<u32, FsError> {
        self.volumes
            .file_length(*file)
            .map_err(|e| map_error("length", e))
    }

    fn position(&mut self, file: &RawFile) -> Result<u32, FsError> {
        self.volumes
            .file_offset(*file)
            .map_err(|e| map_error("offset", e))
    }

    fn exists(&mut self, name: &str) -> Result<bool, FsError> {
        match self.volumes.find_directory_entry(self.cwd, name) {
            Ok(entry) => Ok(!entry.attributes.is_directory() && !entry.attributes.is_volume()),
            Err(embedded_sdmmc::Error::NotFound) => Ok(false),
            Err(e) => Err(map_error("find", e)),
        }
    }

    fn remove(&mut self, name: &str) -> Result<(), FsError> {
        self.volumes
            .delete_file_in_dir(self.cwd, name)
            .map_err(|e| map_error("delete", e))
    }

    fn change_dir(&mut self, target: DirTarget<'_>) -> Result<(), FsError> {
        let depth = self.depth.after(target).ok_or(FsError::NotFound)?;
        match target {
            // Covers `..` back up to the root, as the root stays open and
            // can't be opened a second time.
            _ if depth.is_root() => self.close_cwd(),
            DirTarget::Root | DirTarget::Child(".") => {}
            DirTarget::Child(name) => {
                let dir = self
                    .volumes
                    .open_dir(self.cwd, name)
                    .map_err(|e| map_error("open dir", e))?;
                self.close_cwd();
                self.cwd = dir;
            }
        }
        self.depth = depth;
        Ok(())
    }

    fn for_each_entry<V>(&mut self, mut visit: V) -> Result<(), FsError>
    where
        V: FnMut(&DirEntry) -> ControlFlow<()>,
    {
        // iterate_dir can't be stopped early, so the remaining entries are
        // skipped instead.
        let mut done = false;
        self.volumes
            .iterate_dir(self.cwd, |sd_entry| {
                if done {
                    return;
                }
                let attributes = sd_entry.attributes;
                let kind = if attributes.is_volume() {
                    EntryKind::Other
                } else if attributes.is_directory() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                };
                let entry = DirEntry::from_parts(
                    sd_entry.name.base_name(),
                    sd_entry.name.extension(),
                    kind,
                    sd_entry.size,
                );
                done = visit(&entry).is_break();
            })
            .map_err(|e| map_error("list dir", e))
    }
}
