//! This module contains constants for the sdbridge firmware.
//!
//! Protocol values (opcodes, error codes) live in the protocol module, as
//! they form part of the wire contract with the host.  This module holds the
//! sizes and timings that shape how the firmware implements that contract.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::Duration;
use static_assertions::const_assert;

//
// Buffers
//

/// Size of the command buffer, which is also the size of the hardware FIFO.
/// A host can send at most this many argument bytes with an instruction.
pub const BUFFER_SIZE: usize = 512;

/// Capacity of the outbound FIFO.  Responses can never be longer than this,
/// as the host must drain the FIFO before issuing another instruction.
pub const FIFO_CAPACITY: usize = BUFFER_SIZE;

/// Largest number of bytes returned by a single READ.  The response carries a
/// 2 byte count before the data, and the whole lot must fit in the FIFO.
pub const READ_MAX_SIZE: usize = BUFFER_SIZE - 2;

/// Filenames are 8.3 names, so at most 12 characters, plus the terminating
/// NUL.  The terminator must appear within this many bytes.
pub const FILENAME_WINDOW: usize = 13;

/// Number of directory entries returned per DIR page.  Each entry is 15 bytes
/// (11 byte name, 4 byte size), and the page also carries the page byte and a
/// possible end of listing sentinel.
pub const FILES_PER_DIR_PAGE: usize = 34;
const_assert!(1 + FILES_PER_DIR_PAGE * 15 + 1 <= FIFO_CAPACITY);

//
// Idle and reset timers
//

/// How long the main loop spins waiting for the request flag before arming
/// the wake interrupt and sleeping.
pub const IDLE_SPIN_TIMEOUT: Duration = Duration::from_millis(2500);

/// The hardware watchdog timeout armed by the reset path.  The device resets
/// this long after a reset has been requested.
pub const RESET_WATCHDOG_TIMEOUT: Duration = Duration::from_millis(15);

/// Time to let the bus settle after the data direction is changed or a read
/// strobe is asserted, before the bus is sampled.
pub const BUS_SETTLE_NS: u32 = 24;

//
// Benchmarks
//

/// File used by the read and write benchmarks, in the current directory.
pub const BENCH_FILE: &str = "BENCH.TXT";

/// Number of buffer sized chunks written by the write benchmark.
pub const BENCH_WRITE_CHUNKS: u16 = 2000;

//
// Diagnostics
//

/// Returned by the HELLO instruction.
pub const HELLO_MAGIC: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

/// Byte which must follow a filename's terminator for DELETE to proceed.
pub const DELETE_SENTINEL: u8 = 0xDE;

/// Marks the end of a directory listing.
pub const DIR_NO_MORE_FILES: u8 = 0xFF;

/// Reported as the size of a subdirectory in a directory listing.
pub const DIR_SUBDIR_SIZE: u32 = 0xFFFF_FFFF;

//
// Other constants
//

/// Size of the digest returned by FILE_MD5.
pub const DIGEST_SIZE: usize = 16;
