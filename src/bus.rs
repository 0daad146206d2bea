//! This file contains the bus engine: the shared 8-bit data bus, the strobes
//! used to move bytes through the FIFO, and the handshake lines to the host.
//!
//! The data bus is shared by the FIFO (both directions) and the instruction
//! latch, so the firmware must only drive it between draining the inbound
//! bytes and the end of the transaction.  All other times it is tri-stated.
//!
//! The read and write strobes are also shared with the host side, and are
//! only driven by the firmware while it is handling a transaction.
//!
//! [`BusPins`] abstracts the physical pins, and [`Bus`] implements the
//! sequencing on top of them.  The sequencing is what matters: the data
//! direction never changes with a strobe asserted, and the data lines are
//! never driven while the FIFO or latch might be driving them.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use crate::protocol::{CommandBuffer, Emit, Transaction};
#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};

/// State of the 8 data lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataMode {
    /// Inputs, and we are about to sample them.
    Input,
    /// Driven by the firmware.
    Output,
    /// High impedance, the idle state.
    Tristate,
}

/// The control outputs.  Asserting a line sets it to its active level,
/// whatever that is electrically.  The implementation of [`BusPins`] handles
/// the polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlLine {
    /// Output enable of the instruction latch.  While asserted the latch
    /// drives the opcode onto the data bus.
    LatchSelect,
    /// FIFO read strobe.  While asserted the FIFO drives the next byte onto
    /// the data bus, and the byte is consumed on release.
    ReadStrobe,
    /// FIFO write strobe.  The byte on the data bus is written on release.
    WriteStrobe,
    /// Resets the FIFO, emptying it.
    FifoReset,
    /// Resets the request flip-flop, lowering the busy flag seen by the host.
    FlagReset,
    /// Error bit readable by the host.
    Error,
    /// Activity LED.
    Led,
}

/// The physical pins the bus engine drives.
///
/// Implementations must not apply any sequencing of their own.  They do what
/// they're asked, immediately.
pub trait BusPins {
    /// Sets the data lines' mode.
    fn set_data_mode(&mut self, mode: DataMode);

    /// Sets the data lines' output value.  Only meaningful in
    /// [`DataMode::Output`].
    fn write_data(&mut self, value: u8);

    /// Samples the data lines.  Only meaningful in [`DataMode::Input`].
    fn read_data(&mut self) -> u8;

    /// Waits long enough for the data bus to settle after a direction change
    /// or after something has started driving it.
    fn settle(&mut self) {}

    fn assert_line(&mut self, line: ControlLine);

    fn release_line(&mut self, line: ControlLine);

    /// Switches the read and write strobes between driven (released, i.e.
    /// inactive high) and undriven (inputs, so the host side can use them).
    fn drive_strobes(&mut self, enabled: bool);

    /// Whether the request flip-flop is set, i.e. the host has written an
    /// opcode and is waiting for us.
    fn request_pending(&mut self) -> bool;

    /// Whether the FIFO's empty flag is asserted.
    fn fifo_empty(&mut self) -> bool;

    /// Whether the card detect switch shows a card inserted.
    fn card_present(&mut self) -> bool;

    /// Waits, without spinning, until the request line goes active.  Only
    /// the request line wakes this.
    async fn wait_for_request_edge(&mut self);
}

/// The bus engine.
pub struct Bus<P: BusPins> {
    pins: P,
    mode: DataMode,
    strobes_driven: bool,
}

impl<P: BusPins> Bus<P> {
    /// Takes ownership of the pins, and puts them in the idle state: data
    /// lines tri-stated, strobes undriven, control lines released.
    pub fn new(mut pins: P) -> Self {
        pins.set_data_mode(DataMode::Tristate);
        pins.drive_strobes(false);
        pins.release_line(ControlLine::LatchSelect);
        pins.release_line(ControlLine::FifoReset);
        pins.release_line(ControlLine::FlagReset);
        pins.release_line(ControlLine::Led);
        Self {
            pins,
            mode: DataMode::Tristate,
            strobes_driven: false,
        }
    }

    pub fn pins(&self) -> &P {
        &self.pins
    }

    pub fn pins_mut(&mut self) -> &mut P {
        &mut self.pins
    }

    pub fn data_mode(&self) -> DataMode {
        self.mode
    }

    fn set_mode(&mut self, mode: DataMode) {
        if self.mode != mode {
            self.pins.set_data_mode(mode);
            self.mode = mode;
        }
    }

    /// Stops driving the data lines.
    pub fn data_tri(&mut self) {
        self.set_mode(DataMode::Tristate);
    }

    /// Prepares to sample the data lines.
    pub fn data_in(&mut self) {
        self.set_mode(DataMode::Input);
        self.pins.settle();
    }

    /// Starts driving the data lines.  Only valid once the FIFO has been
    /// drained and the latch deselected.
    pub fn data_out(&mut self) {
        self.set_mode(DataMode::Output);
    }

    /// Takes control of the strobes for a transaction.
    pub fn enable_control(&mut self) {
        if !self.strobes_driven {
            self.pins.drive_strobes(true);
            self.strobes_driven = true;
        }
    }

    /// Hands the strobes back to the host side.
    pub fn disable_control(&mut self) {
        if self.strobes_driven {
            self.pins.drive_strobes(false);
            self.strobes_driven = false;
        }
    }

    /// Pulses the FIFO reset, emptying the FIFO.
    pub fn reset_fifo_hardware(&mut self) {
        self.pins.assert_line(ControlLine::FifoReset);
        self.pins.release_line(ControlLine::FifoReset);
    }

    /// Pulses the request flip-flop reset.  This drops the busy flag the
    /// host is waiting on, so is only done once a response is complete.
    pub fn reset_latch_hardware(&mut self) {
        self.pins.assert_line(ControlLine::FlagReset);
        self.pins.release_line(ControlLine::FlagReset);
    }

    pub fn set_error(&mut self, set: bool) {
        self.set_line(ControlLine::Error, set);
    }

    pub fn set_activity(&mut self, on: bool) {
        self.set_line(ControlLine::Led, on);
    }

    fn set_line(&mut self, line: ControlLine, asserted: bool) {
        if asserted {
            self.pins.assert_line(line);
        } else {
            self.pins.release_line(line);
        }
    }

    pub fn request_pending(&mut self) -> bool {
        self.pins.request_pending()
    }

    pub fn card_present(&mut self) -> bool {
        self.pins.card_present()
    }

    /// Sleeps until the host raises the request line.
    pub async fn sleep_until_request(&mut self) {
        self.pins.wait_for_request_edge().await;
    }

    /// Starts handling a transaction: clears the previous transaction's
    /// error bit, lights the LED and takes control of the strobes.
    pub fn begin_transaction(&mut self) {
        self.set_error(false);
        self.set_activity(true);
        self.enable_control();
    }

    /// Reads the opcode from the instruction latch.
    fn read_opcode(&mut self) -> u8 {
        self.pins.assert_line(ControlLine::LatchSelect);
        self.pins.settle();
        let opcode = self.pins.read_data();
        self.pins.release_line(ControlLine::LatchSelect);
        opcode
    }

    /// Reads the opcode, then drains the FIFO into `buffer` until the FIFO
    /// reports empty.  Bytes beyond the buffer's capacity are left in the
    /// FIFO, to be discarded by the subsequent FIFO reset.
    pub fn drain_inbound(&mut self, buffer: &mut CommandBuffer) -> Transaction {
        self.data_in();
        let opcode = self.read_opcode();

        buffer.clear();
        while !self.pins.fifo_empty() {
            if buffer.is_full() {
                warn!("Host sent more than a buffer of data - discarding remainder");
                break;
            }
            self.pins.assert_line(ControlLine::ReadStrobe);
            self.pins.settle();
            let byte = self.pins.read_data();
            self.pins.release_line(ControlLine::ReadStrobe);
            buffer.push(byte);
        }

        Transaction {
            opcode,
            dlen: buffer.len() as u16,
        }
    }

    /// Switches from receiving to responding: stops sampling the data lines,
    /// empties the FIFO of anything left in it, and starts driving.
    pub fn turn_around(&mut self) {
        self.data_tri();
        self.reset_fifo_hardware();
        self.data_out();
    }

    /// Ends the transaction: tri-states the data lines, hands back the
    /// strobes and turns the LED off.  Leaves the error bit as the handler
    /// set it.
    pub fn end_transaction(&mut self) {
        self.data_tri();
        self.disable_control();
        self.set_activity(false);
    }
}

impl<P: BusPins> Emit for Bus<P> {
    /// Writes a byte into the FIFO.
    fn emit_byte(&mut self, byte: u8) {
        if self.mode != DataMode::Output {
            warn!("Emit with data lines not driven - switching to output");
            self.data_out();
        }
        self.pins.write_data(byte);
        self.pins.assert_line(ControlLine::WriteStrobe);
        self.pins.release_line(ControlLine::WriteStrobe);
    }
}
