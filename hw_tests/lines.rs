//! test_lines
//!
//! Tests the sdbridge hardware by toggling each control line in turn, then
//! walking a single bit across the data bus.  The inputs are logged each
//! step, so a logic analyser or meter on the board can be checked against
//! the RTT output.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#![no_std]
#![no_main]

use defmt::info;
use embassy_executor::Spawner;
use embassy_time::Timer;
use sdbridge_rs::bus::{BusPins, ControlLine, DataMode};
use sdbridge_rs::infra::gpio::{Gpio, RpBusPins};
use {defmt_rtt as _, panic_probe as _};

pub const DELAY_MS: u64 = 2500;

const LINES: [ControlLine; 7] = [
    ControlLine::LatchSelect,
    ControlLine::ReadStrobe,
    ControlLine::WriteStrobe,
    ControlLine::FifoReset,
    ControlLine::FlagReset,
    ControlLine::Error,
    ControlLine::Led,
];

fn log_inputs(pins: &mut RpBusPins) {
    info!(
        "request: {} fifo empty: {} card present: {}",
        pins.request_pending(),
        pins.fifo_empty(),
        pins.card_present()
    );
}

#[embassy_executor::main]
async fn main(_spawner: Spawner) -> ! {
    info!("sdbridge test lines");

    let p = embassy_rp::init(Default::default());
    let mut gpio = Gpio::new(
        p.PIN_0, p.PIN_1, p.PIN_2, p.PIN_3, p.PIN_4, p.PIN_5, p.PIN_6, p.PIN_7, p.PIN_8, p.PIN_9,
        p.PIN_10, p.PIN_11, p.PIN_12, p.PIN_13, p.PIN_14, p.PIN_15, p.PIN_16, p.PIN_17, p.PIN_18,
        p.PIN_19, p.PIN_20, p.PIN_21, p.PIN_25, None,
    );
    let mut pins = gpio.take_bus_pins();
    pins.drive_strobes(true);

    loop {
        for line in LINES {
            info!("Assert {}", line);
            pins.assert_line(line);
            log_inputs(&mut pins);
            Timer::after_millis(DELAY_MS).await;

            info!("Release {}", line);
            pins.release_line(line);
            log_inputs(&mut pins);
            Timer::after_millis(DELAY_MS).await;
        }

        pins.set_data_mode(DataMode::Output);
        for bit in 0..8 {
            info!("Data bus 0x{:02x}", 1u8 << bit);
            pins.write_data(1 << bit);
            Timer::after_millis(DELAY_MS).await;
        }
        pins.set_data_mode(DataMode::Tristate);

        // Direction only changes while the latch is off the bus.
        pins.set_data_mode(DataMode::Input);
        pins.assert_line(ControlLine::LatchSelect);
        pins.settle();
        info!("Latch reads 0x{:02x}", pins.read_data());
        pins.release_line(ControlLine::LatchSelect);
        pins.settle();
        pins.set_data_mode(DataMode::Tristate);
    }
}
