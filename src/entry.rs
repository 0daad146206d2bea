//! The firmware's entry point and panic handling, shared by the binaries.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};
use embassy_executor::Spawner;
use embassy_time::Timer;

use crate::bridge::{Bridge, BridgeConfig};
use crate::bus::BusPins;
use crate::infra::gpio::{Gpio, RpBusPins};
use crate::infra::sdcard::SdFileSystem;
use crate::infra::watchdog::{
    RpResetHardware, log_reset_reason, quiesce_bus, register_bus_config, request_reset,
    reset_task, start_reset_executor,
};
use crate::power::SystemClock;
use crate::task::spawn_or_reboot;
use crate::util::built::log_fw_info;

/// Brings up the hardware, then runs the bridge until the host resets us.
pub async fn common_main(_spawner: Spawner, bin_name: &str) -> ! {
    let p = embassy_rp::init(Default::default());

    info!("-----");
    log_fw_info(bin_name);
    log_reset_reason();

    let config = BridgeConfig::default();
    let mut gpio = Gpio::new(
        p.PIN_0, p.PIN_1, p.PIN_2, p.PIN_3, p.PIN_4, p.PIN_5, p.PIN_6, p.PIN_7, p.PIN_8, p.PIN_9,
        p.PIN_10, p.PIN_11, p.PIN_12, p.PIN_13, p.PIN_14, p.PIN_15, p.PIN_16, p.PIN_17, p.PIN_18,
        p.PIN_19, p.PIN_20, p.PIN_21, p.PIN_25, None,
    );
    register_bus_config(*gpio.config());

    // The reset path comes up first, so the host can always reset us.
    let reset_hw = RpResetHardware::new(*gpio.config(), p.WATCHDOG);
    let reset_spawner = start_reset_executor();
    spawn_or_reboot(
        reset_spawner.spawn(reset_task(
            gpio.take_reset_in(),
            reset_hw,
            config.reset_watchdog_timeout,
        )),
        "Reset",
    );

    let mut pins = gpio.take_bus_pins();
    let spi_pins = gpio.take_sd_spi_pins();
    let fs = if pins.card_present() {
        match SdFileSystem::mount(p.SPI0, spi_pins) {
            Ok(fs) => Some(fs),
            Err(e) => {
                warn!("Failed to mount SD card: {}", e);
                None
            }
        }
    } else {
        warn!("No SD card inserted");
        None
    };

    let mut bridge: Bridge<RpBusPins, SdFileSystem, SystemClock> =
        Bridge::new(pins, fs, SystemClock, &config);
    bridge.run().await;

    // The reset task takes it from here.
    request_reset();
    loop {
        Timer::after_secs(1).await;
    }
}

/// Drops the bus and resets the device.  Nothing can be trusted after a
/// panic, so the pins are written directly.
fn reset_after_panic() -> ! {
    quiesce_bus();
    cortex_m::peripheral::SCB::sys_reset()
}

/// Core panic handler, used by the binaries.
pub fn panic_handler(info: &core::panic::PanicInfo) -> ! {
    error!("Panic: {}", defmt::Display2Format(info));
    reset_after_panic()
}

/// defmt panic handler, used by the binaries.
pub fn defmt_panic_handler() -> ! {
    error!("defmt panic");
    reset_after_panic()
}
