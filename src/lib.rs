//! sdbridge
//!
//! Firmware which bridges a host with an 8-bit parallel bus to the files on
//! an SD card.  The host talks to a hardware FIFO and an instruction latch;
//! the firmware drains instructions from the FIFO, executes them against the
//! card's FAT file system and writes the responses back into the FIFO.
//!
//! The bus sequencing, protocol and instruction handlers are independent of
//! the hardware, and are tested on the host with `cargo test`.  The pieces
//! which touch the RP2040/RP235x live in `infra`, and are only built with
//! the `pico` or `pico2` feature.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#![cfg_attr(not(test), no_std)]
#![allow(async_fn_in_trait)]

// Provide some feature guidance when compiling the firmware.
#[cfg(all(feature = "firmware", not(any(feature = "pico", feature = "pico2"))))]
compile_error!("Either 'pico' or 'pico2' feature must be enabled");
#[cfg(all(feature = "pico", feature = "pico2"))]
compile_error!("Features 'pico' and 'pico2' cannot be enabled simultaneously");

// Must come first, so the logging macros are available to the other modules.
mod fmt;

// Declare all of this library's modules.
pub mod bridge;
pub mod bus;
pub mod constants;
pub mod fs;
pub mod power;
pub mod protocol;

#[cfg(feature = "firmware")]
mod entry;
#[cfg(feature = "firmware")]
pub mod infra;
#[cfg(feature = "firmware")]
mod task;
#[cfg(feature = "firmware")]
mod util;

#[cfg(test)]
mod testing;

#[cfg(feature = "firmware")]
pub use entry::{common_main, defmt_panic_handler, panic_handler};

// Extra binary information that picotool can read.
#[cfg(feature = "firmware")]
#[unsafe(link_section = ".bi_entries")]
#[used]
pub static PICOTOOL_ENTRIES: [embassy_rp::binary_info::EntryAddr; 4] = [
    embassy_rp::binary_info::rp_program_name!(c"sdbridge"),
    embassy_rp::binary_info::rp_program_description!(c"Bridges a host's 8-bit parallel FIFO bus to the FAT file system on an SD card."),
    embassy_rp::binary_info::rp_cargo_version!(),
    embassy_rp::binary_info::rp_program_build_attribute!(),
];

// A note about Statics
//
// The firmware has very few statics.  The main loop owns the bus, the file
// system and the open file, so they don't need sharing.  The statics which
// remain are:
//
// - The SPI bus, in a StaticCell, as the SD card's SPI device borrows it for
//   the life of the firmware.
//
// - The reset request Signal, which the main loop uses to hand over to the
//   reset task, and the interrupt executor the reset task runs on.
//
// The statics are stored in the module that creates them.
