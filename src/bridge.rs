//! The main loop, tying the bus engine, power controller and dispatcher
//! together.
//!
//! Each cycle waits for a request, drains the instruction into the command
//! buffer, executes it, and writes either the staged response or the error
//! code into the FIFO.  Finally the request flag is reset, which drops the
//! busy flag and tells the host the response is ready.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::Duration;

use crate::bus::{Bus, BusPins};
use crate::constants::{BENCH_FILE, BENCH_WRITE_CHUNKS, IDLE_SPIN_TIMEOUT, RESET_WATCHDOG_TIMEOUT};
use crate::fs::{ContentHasher, FileSystem, Md5Hasher};
use crate::power::{Clock, PowerController, PowerState};
use crate::protocol::{Completion, Dispatcher, Emit, Response};
#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};

/// Runtime configuration.  The defaults are the values the host software
/// expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BridgeConfig {
    /// How long to spin waiting for a request before sleeping.
    pub idle_spin_timeout: Duration,

    /// Watchdog timeout armed by the reset path.
    pub reset_watchdog_timeout: Duration,

    /// File used by the benchmarks.
    pub bench_file: &'static str,

    /// Number of buffer sized chunks written by the write benchmark.
    pub bench_write_chunks: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            idle_spin_timeout: IDLE_SPIN_TIMEOUT,
            reset_watchdog_timeout: RESET_WATCHDOG_TIMEOUT,
            bench_file: BENCH_FILE,
            bench_write_chunks: BENCH_WRITE_CHUNKS,
        }
    }
}

/// Outcome of a single main loop cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Cycle {
    /// The instruction was handled, and the host can read the response.
    Completed,
    /// The host asked for a reset.  The busy flag is left set.
    ResetRequested,
}

/// The bridge between the host bus and the file system.
pub struct Bridge<P, F, C, H = Md5Hasher>
where
    P: BusPins,
    F: FileSystem,
    C: Clock,
    H: ContentHasher,
{
    bus: Bus<P>,
    power: PowerController<C>,
    dispatcher: Dispatcher<F, H>,
    response: Response,
}

impl<P, F, C, H> Bridge<P, F, C, H>
where
    P: BusPins,
    F: FileSystem,
    C: Clock,
    H: ContentHasher,
{
    /// Creates the bridge, and puts the bus in its idle state with the FIFO
    /// and request flag reset.
    ///
    /// `fs` is None if the card couldn't be mounted.  In that case the error
    /// bit is set, so the host can see that before sending anything.
    pub fn new(pins: P, fs: Option<F>, clock: C, config: &BridgeConfig) -> Self {
        let mut bus = Bus::new(pins);
        bus.reset_fifo_hardware();
        bus.reset_latch_hardware();

        if fs.is_none() {
            warn!("No file system - only diagnostics available");
            bus.set_error(true);
        }

        Self {
            bus,
            power: PowerController::new(clock, config.idle_spin_timeout),
            dispatcher: Dispatcher::new(fs, config),
            response: Response::new(),
        }
    }

    pub fn bus(&self) -> &Bus<P> {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus<P> {
        &mut self.bus
    }

    pub fn dispatcher(&self) -> &Dispatcher<F, H> {
        &self.dispatcher
    }

    pub fn power_state(&self) -> PowerState {
        self.power.state()
    }

    /// Waits for and handles a single instruction.
    pub async fn run_once(&mut self) -> Cycle {
        self.power.wait_for_request(&mut self.bus).await;

        self.bus.begin_transaction();
        let txn = self.bus.drain_inbound(self.dispatcher.buffer_mut());
        self.bus.turn_around();
        trace!("Instruction 0x{:02x} with {} bytes", txn.opcode, txn.dlen);

        let card_present = self.bus.card_present();
        self.response.clear();
        let cycle = match self
            .dispatcher
            .dispatch(txn, card_present, &mut self.response)
        {
            Ok(Completion::Respond) => {
                self.bus.emit_bytes(self.response.as_slice());
                Cycle::Completed
            }
            Ok(Completion::Reset) => Cycle::ResetRequested,
            Err(code) => {
                debug!("Instruction 0x{:02x} failed: {}", txn.opcode, code);
                self.bus.set_error(true);
                self.bus.emit_byte(code.into());
                Cycle::Completed
            }
        };

        self.bus.end_transaction();
        if cycle == Cycle::Completed {
            self.bus.reset_latch_hardware();
        }
        self.power.transaction_done();

        cycle
    }

    /// Handles instructions until the host requests a reset.
    pub async fn run(&mut self) {
        info!("Waiting for instructions");
        while self.run_once().await == Cycle::Completed {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ErrorCode, Opcode};
    use crate::testing::{FakeClock, MemFs, MockPins};
    use embassy_futures::block_on;

    type TestBridge = Bridge<MockPins, MemFs, FakeClock>;

    fn bridge(fs: Option<MemFs>) -> TestBridge {
        Bridge::new(
            MockPins::new(),
            fs,
            FakeClock::new(Duration::from_millis(1)),
            &BridgeConfig::default(),
        )
    }

    /// Sends an instruction as the host would, and returns the error bit and
    /// the bytes the host reads back.
    fn transact(bridge: &mut TestBridge, opcode: u8, args: &[u8]) -> (bool, Vec<u8>) {
        bridge.bus_mut().pins_mut().host_command(opcode, args);
        assert_eq!(block_on(bridge.run_once()), Cycle::Completed);
        let pins = bridge.bus_mut().pins_mut();
        assert!(!pins.request(), "busy flag left set");
        (pins.error_bit(), pins.take_outbound())
    }

    #[test]
    fn hello_round_trip() {
        let mut bridge = bridge(Some(MemFs::new()));
        assert_eq!(
            transact(&mut bridge, Opcode::Hello as u8, &[]),
            (false, vec![0xDE, 0xAD, 0xBE, 0xEF])
        );
        assert_eq!(bridge.power_state(), PowerState::IdlePoll);
    }

    #[test]
    fn echo_of_full_fifo() {
        let mut bridge = bridge(Some(MemFs::new()));
        let data: Vec<u8> = (0..512u16).map(|ii| (ii % 251) as u8).collect();
        assert_eq!(transact(&mut bridge, Opcode::Echo as u8, &data), (false, data));
    }

    #[test]
    fn failure_is_single_error_byte() {
        let mut bridge = bridge(Some(MemFs::new()));
        assert_eq!(
            transact(&mut bridge, Opcode::Read as u8, &[]),
            (true, vec![ErrorCode::FileNotOpen as u8])
        );
        // Cleared by the next transaction.
        assert_eq!(transact(&mut bridge, Opcode::Close as u8, &[]), (false, vec![]));
    }

    #[test]
    fn no_storage_sets_error_bit_at_boot() {
        let mut bridge = bridge(None);
        assert!(bridge.bus().pins().error_bit());
        assert_eq!(
            transact(&mut bridge, Opcode::Dir as u8, &[]),
            (true, vec![ErrorCode::SdNotPresent as u8])
        );
        assert_eq!(
            transact(&mut bridge, Opcode::Hello as u8, &[]),
            (false, vec![0xDE, 0xAD, 0xBE, 0xEF])
        );
    }

    #[test]
    fn unknown_instruction() {
        let mut bridge = bridge(Some(MemFs::new()));
        assert_eq!(
            transact(&mut bridge, 0x42, &[1, 2]),
            (true, vec![ErrorCode::UnknownInstruction as u8])
        );
    }

    #[test]
    fn card_removal_reported_after_it_happens() {
        let mut bridge = bridge(Some(MemFs::new()));
        assert_eq!(transact(&mut bridge, Opcode::Close as u8, &[]), (false, vec![]));
        bridge.bus_mut().pins_mut().set_card_present(false);
        assert_eq!(
            transact(&mut bridge, Opcode::Close as u8, &[]),
            (true, vec![ErrorCode::SdNotPresent as u8])
        );
        bridge.bus_mut().pins_mut().set_card_present(true);
        assert_eq!(
            transact(&mut bridge, Opcode::Close as u8, &[]),
            (true, vec![ErrorCode::SdNotPresent as u8])
        );
    }

    #[test]
    fn file_round_trip_over_the_bus() {
        let mut bridge = bridge(Some(MemFs::new()));
        assert_eq!(
            transact(&mut bridge, Opcode::Open as u8, b"\x13NOTES.TXT\0"),
            (false, vec![])
        );
        assert_eq!(
            transact(&mut bridge, Opcode::Write as u8, b"hello"),
            (false, vec![5, 0])
        );
        transact(&mut bridge, Opcode::Close as u8, &[]);
        transact(&mut bridge, Opcode::Open as u8, b"\x01NOTES.TXT\0");
        assert_eq!(
            transact(&mut bridge, Opcode::Read as u8, &[16, 0]),
            (false, b"\x05\x00hello".to_vec())
        );
    }

    #[test]
    fn reset_sends_nothing_and_leaves_busy() {
        let mut bridge = bridge(Some(MemFs::new()));
        bridge.bus_mut().pins_mut().host_command(0x80, &[]);
        assert_eq!(block_on(bridge.run_once()), Cycle::ResetRequested);

        let pins = bridge.bus().pins();
        assert!(pins.outbound().is_empty());
        assert!(pins.request());
        assert!(!pins.strobes_driven());
    }

    #[test]
    fn run_returns_on_reset() {
        let mut bridge = bridge(Some(MemFs::new()));
        bridge.bus_mut().pins_mut().host_command(0x69, &[]);
        assert_eq!(block_on(bridge.run_once()), Cycle::Completed);
        bridge.bus_mut().pins_mut().host_command(0xFF, &[]);
        block_on(bridge.run());
        assert_eq!(bridge.bus().pins().outbound(), &[0xDE, 0xAD, 0xBE, 0xEF]);
    }
}
