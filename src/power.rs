//! Idle and reset handling.
//!
//! Between transactions the firmware spins, polling the request flag, so it
//! responds to a burst of instructions as quickly as possible.  If nothing
//! arrives for a while it sleeps until the request line wakes it.
//!
//! The reset path is separate, as it must work whatever the main loop is
//! doing.  It is triggered either by the host's reset line, or by a RESET
//! instruction, and ends with the watchdog resetting the device.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::{Duration, Instant};

use crate::bus::{Bus, BusPins};
#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};

/// Source of the current time.  Injected so the idle timeout can be tested
/// without a time driver.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// The embassy-time system clock.
#[cfg(feature = "firmware")]
pub struct SystemClock;

#[cfg(feature = "firmware")]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// What the firmware is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    /// Spinning, waiting for the request flag.
    IdlePoll,
    /// Asleep, waiting for the request line to wake us.
    IdleSleep,
    /// Handling a transaction.
    Active,
    /// The reset path has taken over.  The watchdog is armed and the device
    /// is about to reset.
    Resetting,
}

/// Tracks the power state, and implements the wait for the next request.
pub struct PowerController<C: Clock> {
    clock: C,
    spin_timeout: Duration,
    state: PowerState,
}

impl<C: Clock> PowerController<C> {
    pub fn new(clock: C, spin_timeout: Duration) -> Self {
        Self {
            clock,
            spin_timeout,
            state: PowerState::IdlePoll,
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    /// Waits until the host raises the request flag.
    ///
    /// Spins polling the flag until the spin timeout expires, then sleeps
    /// until the request line wakes us.  The flag is re-checked after waking,
    /// as it is the flag, not the wake, which indicates a request.
    pub async fn wait_for_request<P: BusPins>(&mut self, bus: &mut Bus<P>) {
        self.state = PowerState::IdlePoll;
        let mut deadline = self.clock.now() + self.spin_timeout;

        while !bus.request_pending() {
            if self.clock.now() >= deadline {
                self.state = PowerState::IdleSleep;
                trace!("No request - sleeping");
                bus.sleep_until_request().await;
                trace!("Woken");
                self.state = PowerState::IdlePoll;
                deadline = self.clock.now() + self.spin_timeout;
            }
        }

        self.state = PowerState::Active;
    }

    /// Called once a transaction has been completed.
    pub fn transaction_done(&mut self) {
        self.state = PowerState::IdlePoll;
    }
}

/// The hardware operations the reset path needs.  These must work regardless
/// of what state the main loop left the hardware in.
pub trait ResetHardware {
    /// Stops driving the data lines.
    fn tristate_data_bus(&mut self);

    /// Stops driving the strobes, and releases the other control lines.
    fn release_control_lines(&mut self);

    /// Arms the watchdog, which resets the device after `timeout`.
    fn arm_watchdog(&mut self, timeout: Duration);
}

/// Puts the bus into a safe state, then arms the watchdog.
pub fn quiesce_for_reset<R: ResetHardware>(hw: &mut R, timeout: Duration) {
    hw.tristate_data_bus();
    hw.release_control_lines();
    hw.arm_watchdog(timeout);
}

/// Quiesces the bus and waits for the watchdog to reset the device.  Never
/// returns.
pub fn reset<R: ResetHardware>(hw: &mut R, timeout: Duration) -> ! {
    info!("Power state -> {}", PowerState::Resetting);
    quiesce_for_reset(hw, timeout);
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeClock, MockPins, MockResetHardware, PinEvent};
    use embassy_futures::block_on;

    const TIMEOUT: Duration = Duration::from_millis(2500);

    #[test]
    fn pending_request_returns_without_sleeping() {
        let mut pins = MockPins::new();
        pins.host_command(0x69, &[]);
        let mut bus = Bus::new(pins);
        let mut power = PowerController::new(FakeClock::new(Duration::from_millis(1)), TIMEOUT);

        block_on(power.wait_for_request(&mut bus));

        assert_eq!(power.state(), PowerState::Active);
        assert_eq!(bus.pins().sleeps(), 0);
    }

    #[test]
    fn request_within_timeout_does_not_sleep() {
        let mut pins = MockPins::new();
        pins.host_command_after(100, 0x69, &[]);
        let mut bus = Bus::new(pins);
        let mut power = PowerController::new(FakeClock::new(Duration::from_millis(1)), TIMEOUT);

        block_on(power.wait_for_request(&mut bus));

        assert_eq!(bus.pins().sleeps(), 0);
    }

    #[test]
    fn sleeps_once_timeout_expires() {
        let mut pins = MockPins::new();
        pins.host_command_on_wake(0x69, &[]);
        let mut bus = Bus::new(pins);
        let mut power = PowerController::new(FakeClock::new(Duration::from_millis(100)), TIMEOUT);

        block_on(power.wait_for_request(&mut bus));

        assert_eq!(power.state(), PowerState::Active);
        assert_eq!(bus.pins().sleeps(), 1);
        assert_eq!(bus.pins().events().last(), Some(&PinEvent::Sleep));
    }

    #[test]
    fn transaction_done_returns_to_polling() {
        let mut pins = MockPins::new();
        pins.host_command(0x69, &[]);
        let mut bus = Bus::new(pins);
        let mut power = PowerController::new(FakeClock::new(Duration::from_millis(1)), TIMEOUT);
        block_on(power.wait_for_request(&mut bus));
        power.transaction_done();
        assert_eq!(power.state(), PowerState::IdlePoll);
    }

    #[test]
    fn reset_quiesces_bus_before_arming_watchdog() {
        let mut hw = MockResetHardware::default();
        quiesce_for_reset(&mut hw, Duration::from_millis(15));
        assert_eq!(hw.actions, ["tristate", "release", "watchdog"]);
        assert_eq!(hw.watchdog, Some(Duration::from_millis(15)));
    }
}
