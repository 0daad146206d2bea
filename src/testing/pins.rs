//! A model of the bus hardware.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use std::collections::VecDeque;

use embassy_time::Duration;

use crate::bus::{BusPins, ControlLine, DataMode};
use crate::power::ResetHardware;

const LINES: usize = 7;

/// Something the bus engine did to the pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinEvent {
    Mode(DataMode),
    Assert(ControlLine),
    Release(ControlLine),
    Strobes(bool),
    Sleep,
}

/// Models the FIFO, instruction latch and request flip-flop.
///
/// Panics if the data direction changes with a strobe or the latch asserted,
/// if the data lines are written when not driven, or sampled when nothing is
/// driving them.
pub struct MockPins {
    mode: DataMode,
    strobes: bool,
    asserted: [bool; LINES],
    data_out: u8,

    latch: u8,
    request: bool,
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    card: bool,

    polls_before_request: u32,
    on_wake: Option<(u8, Vec<u8>)>,
    sleeps: u32,
    events: Vec<PinEvent>,
}

impl Default for MockPins {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPins {
    pub fn new() -> Self {
        Self {
            mode: DataMode::Tristate,
            strobes: false,
            asserted: [false; LINES],
            data_out: 0,
            latch: 0,
            request: false,
            inbound: VecDeque::new(),
            outbound: Vec::new(),
            card: true,
            polls_before_request: 0,
            on_wake: None,
            sleeps: 0,
            events: Vec::new(),
        }
    }

    /// The host writes `args` into the FIFO, then `opcode` to the latch,
    /// setting the request flag.
    pub fn host_command(&mut self, opcode: u8, args: &[u8]) {
        self.inbound.extend(args.iter().copied());
        self.latch = opcode;
        self.request = true;
    }

    /// As [`Self::host_command()`], but the request flag is only seen after
    /// it has been polled `polls` times.
    pub fn host_command_after(&mut self, polls: u32, opcode: u8, args: &[u8]) {
        self.host_command(opcode, args);
        self.polls_before_request = polls;
    }

    /// The host sends the command while the firmware is asleep.
    pub fn host_command_on_wake(&mut self, opcode: u8, args: &[u8]) {
        self.on_wake = Some((opcode, args.to_vec()));
    }

    /// The host reads the response out of the FIFO.
    pub fn take_outbound(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.outbound)
    }

    pub fn set_card_present(&mut self, present: bool) {
        self.card = present;
    }

    pub fn outbound(&self) -> &[u8] {
        &self.outbound
    }

    pub fn inbound_is_empty(&self) -> bool {
        self.inbound.is_empty()
    }

    pub fn events(&self) -> &[PinEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn sleeps(&self) -> u32 {
        self.sleeps
    }

    pub fn strobes_driven(&self) -> bool {
        self.strobes
    }

    pub fn mode(&self) -> DataMode {
        self.mode
    }

    pub fn error_bit(&self) -> bool {
        self.is_asserted(ControlLine::Error)
    }

    pub fn led(&self) -> bool {
        self.is_asserted(ControlLine::Led)
    }

    pub fn request(&self) -> bool {
        self.request
    }

    fn is_asserted(&self, line: ControlLine) -> bool {
        self.asserted[line as usize]
    }

    fn bus_driven_externally(&self) -> bool {
        self.is_asserted(ControlLine::LatchSelect) || self.is_asserted(ControlLine::ReadStrobe)
    }
}

impl BusPins for MockPins {
    fn set_data_mode(&mut self, mode: DataMode) {
        assert!(
            !self.bus_driven_externally() && !self.is_asserted(ControlLine::WriteStrobe),
            "data direction changed with a strobe asserted"
        );
        self.mode = mode;
        self.events.push(PinEvent::Mode(mode));
    }

    fn write_data(&mut self, value: u8) {
        assert_eq!(self.mode, DataMode::Output, "data written while not driven");
        self.data_out = value;
    }

    fn read_data(&mut self) -> u8 {
        assert_eq!(self.mode, DataMode::Input, "data sampled while not an input");
        if self.is_asserted(ControlLine::LatchSelect) {
            self.latch
        } else if self.is_asserted(ControlLine::ReadStrobe) {
            self.inbound.front().copied().unwrap_or(0xFF)
        } else {
            panic!("data sampled with nothing driving the bus");
        }
    }

    fn assert_line(&mut self, line: ControlLine) {
        match line {
            ControlLine::LatchSelect => {
                assert_ne!(self.mode, DataMode::Output, "latch selected while driving");
            }
            ControlLine::ReadStrobe => {
                assert!(self.strobes, "read strobe while strobes undriven");
                assert_ne!(self.mode, DataMode::Output, "read strobe while driving");
            }
            ControlLine::WriteStrobe => {
                assert!(self.strobes, "write strobe while strobes undriven");
                assert_eq!(self.mode, DataMode::Output, "write strobe while not driving");
            }
            ControlLine::FifoReset => self.inbound.clear(),
            ControlLine::FlagReset => self.request = false,
            ControlLine::Error | ControlLine::Led => {}
        }
        self.asserted[line as usize] = true;
        self.events.push(PinEvent::Assert(line));
    }

    fn release_line(&mut self, line: ControlLine) {
        let was_asserted = self.is_asserted(line);
        self.asserted[line as usize] = false;
        if was_asserted {
            match line {
                ControlLine::ReadStrobe => {
                    self.inbound.pop_front();
                }
                ControlLine::WriteStrobe => self.outbound.push(self.data_out),
                _ => {}
            }
        }
        self.events.push(PinEvent::Release(line));
    }

    fn drive_strobes(&mut self, enabled: bool) {
        assert!(
            !self.is_asserted(ControlLine::ReadStrobe) && !self.is_asserted(ControlLine::WriteStrobe),
            "strobes handed over while asserted"
        );
        self.strobes = enabled;
        self.events.push(PinEvent::Strobes(enabled));
    }

    fn request_pending(&mut self) -> bool {
        if self.request && self.polls_before_request > 0 {
            self.polls_before_request -= 1;
            return false;
        }
        self.request
    }

    fn fifo_empty(&mut self) -> bool {
        self.inbound.is_empty()
    }

    fn card_present(&mut self) -> bool {
        self.card
    }

    async fn wait_for_request_edge(&mut self) {
        self.sleeps += 1;
        self.events.push(PinEvent::Sleep);
        if let Some((opcode, args)) = self.on_wake.take() {
            self.host_command(opcode, &args);
        }
        self.polls_before_request = 0;
        self.request = true;
    }
}

/// Records what the reset path did, in order.
#[derive(Default)]
pub struct MockResetHardware {
    pub actions: Vec<&'static str>,
    pub watchdog: Option<Duration>,
}

impl ResetHardware for MockResetHardware {
    fn tristate_data_bus(&mut self) {
        self.actions.push("tristate");
    }

    fn release_control_lines(&mut self) {
        self.actions.push("release");
    }

    fn arm_watchdog(&mut self, timeout: Duration) {
        self.actions.push("watchdog");
        self.watchdog = Some(timeout);
    }
}
