//! Test doubles for the hardware seams, used by the unit tests.
//!
//! - [`MockPins`] models the FIFO, instruction latch and request flip-flop,
//!   and panics if the bus engine ever breaks the bus discipline.
//! - [`MemFs`] is an in-memory file system with FAT-like directory slots.
//! - [`FakeClock`] advances a fixed step every time it is read.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

mod memfs;
mod pins;

pub use memfs::{MemFile, MemFs};
pub use pins::{MockPins, MockResetHardware, PinEvent};

use core::cell::Cell;
use embassy_time::{Duration, Instant};

use crate::power::Clock;

/// A clock which advances by `step` every time it is read.
pub struct FakeClock {
    now: Cell<u64>,
    step: u64,
}

impl FakeClock {
    pub fn new(step: Duration) -> Self {
        Self {
            now: Cell::new(0),
            step: step.as_ticks(),
        }
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        let now = self.now.get();
        self.now.set(now + self.step);
        Instant::from_ticks(now)
    }
}
