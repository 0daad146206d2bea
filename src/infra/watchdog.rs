//! The reset path.
//!
//! A reset is requested either by the host pulling the reset line low, or by
//! the RESET instruction.  Either way the bus is quiesced and the hardware
//! watchdog armed, and the device resets when it fires.
//!
//! The reset task runs on an interrupt executor, so it preempts the main
//! loop even while an instruction handler is blocked on the SD card.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::cell::Cell;

#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};
use embassy_executor::{InterruptExecutor, SendSpawner};
use embassy_futures::select::{Either, select};
use embassy_rp::gpio::Input;
use embassy_rp::interrupt;
use embassy_rp::interrupt::{InterruptExt, Priority};
use embassy_rp::pac::SIO;
use embassy_rp::pac::WATCHDOG as PAC_WATCHDOG;
use embassy_rp::peripherals::WATCHDOG;
use embassy_rp::watchdog::Watchdog;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Duration;

use crate::infra::gpio::PinConfig;
use crate::power::{self, ResetHardware};

// The main loop signals this when it receives the RESET instruction.
static RESET_REQUEST: Signal<CriticalSectionRawMutex, ()> = Signal::new();

// The pin configuration in use, for the panic handler.  None until the
// pins are allocated, when there's nothing to quiesce.
static BUS_CONFIG: Mutex<CriticalSectionRawMutex, Cell<Option<PinConfig>>> =
    Mutex::new(Cell::new(None));

// Runs the reset task at a higher priority than the main loop.
static EXECUTOR_RESET: InterruptExecutor = InterruptExecutor::new();

#[cfg(feature = "pico")]
#[interrupt]
unsafe fn SWI_IRQ_1() {
    unsafe { EXECUTOR_RESET.on_interrupt() }
}

#[cfg(feature = "pico2")]
#[interrupt]
unsafe fn SPARE_IRQ_1() {
    unsafe { EXECUTOR_RESET.on_interrupt() }
}

/// Starts the interrupt executor the reset task runs on.
pub fn start_reset_executor() -> SendSpawner {
    #[cfg(feature = "pico")]
    let irq = interrupt::SWI_IRQ_1;
    #[cfg(feature = "pico2")]
    let irq = interrupt::SPARE_IRQ_1;

    irq.set_priority(Priority::P2);
    EXECUTOR_RESET.start(irq)
}

/// Asks the reset task to reset the device.
pub fn request_reset() {
    RESET_REQUEST.signal(());
}

/// Logs why the device last reset.
pub fn log_reset_reason() {
    // embassy-rp's Watchdog doesn't expose the reason, so read the register.
    let reason = PAC_WATCHDOG.reason().read();
    let reason = if reason.force() {
        "forced"
    } else if reason.timer() {
        "watchdog timer"
    } else {
        "power on"
    };
    info!("Last reset reason: {}", reason);
}

/// Records the pin configuration, so [`quiesce_bus`] knows which lines to
/// drop.
pub fn register_bus_config(config: PinConfig) {
    BUS_CONFIG.lock(|cell| cell.set(Some(config)));
}

/// Drops the bus lines straight through the SIO, without needing to own the
/// pins.  Used by the panic handler, which can't get at the pins.
pub fn quiesce_bus() {
    if let Some(config) = BUS_CONFIG.lock(Cell::get) {
        tristate_data_lines(&config);
        release_control_lines(&config);
    }
}

fn tristate_data_lines(config: &PinConfig) {
    SIO.gpio_oe_clr().write_value(config.data_mask());
    SIO.gpio_out_clr().write_value(config.data_mask());
}

fn release_control_lines(config: &PinConfig) {
    // Inputs first, so the strobes are never driven low.
    let strobes = config.strobe_mask();
    SIO.gpio_oe_clr().write_value(strobes);
    SIO.gpio_out_clr().write_value(strobes);

    let inactive_high =
        (1 << config.latch_select) | (1 << config.fifo_reset) | (1 << config.flag_reset);
    SIO.gpio_out_set().write_value(inactive_high);
}

/// The reset hardware: the bus, via the SIO, and the hardware watchdog.
pub struct RpResetHardware {
    config: PinConfig,
    watchdog: Watchdog,
}

impl RpResetHardware {
    pub fn new(config: PinConfig, p_watchdog: WATCHDOG) -> Self {
        Self {
            config,
            watchdog: Watchdog::new(p_watchdog),
        }
    }
}

impl ResetHardware for RpResetHardware {
    fn tristate_data_bus(&mut self) {
        tristate_data_lines(&self.config);
    }

    fn release_control_lines(&mut self) {
        release_control_lines(&self.config);
    }

    fn arm_watchdog(&mut self, timeout: Duration) {
        self.watchdog.start(timeout);
    }
}

/// Waits for the host's reset line to fall, or for the RESET instruction,
/// then resets the device.
#[embassy_executor::task]
pub async fn reset_task(
    mut reset_in: Input<'static>,
    mut hw: RpResetHardware,
    timeout: Duration,
) -> ! {
    match select(reset_in.wait_for_falling_edge(), RESET_REQUEST.wait()).await {
        Either::First(_) => info!("Reset line asserted"),
        Either::Second(_) => info!("Reset instruction received"),
    }
    power::reset(&mut hw, timeout)
}
