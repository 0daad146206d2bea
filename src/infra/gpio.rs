//! This file handles GPIO pin allocation, and implements the bus pins over
//! the RP2040/RP235x GPIOs.
//!
//! The source code serves as the master list of pin assignments for the
//! hardware.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};
use embassy_rp::gpio::{AnyPin, Flex, Input, Level, Output, Pull};
use embassy_rp::peripherals::{
    PIN_0, PIN_1, PIN_2, PIN_3, PIN_4, PIN_5, PIN_6, PIN_7, PIN_8, PIN_9, PIN_10, PIN_11, PIN_12,
    PIN_13, PIN_14, PIN_15, PIN_16, PIN_17, PIN_18, PIN_19, PIN_20, PIN_21, PIN_25,
};

use crate::bus::{BusPins, ControlLine, DataMode};
use crate::constants::BUS_SETTLE_NS;
use crate::util::time::block_ns;

/// GPIO configurations for different boards
pub mod config {
    use super::PinConfig;

    /// Configuration for the v0.1 board
    pub const fn standard_v0_1() -> PinConfig {
        PinConfig {
            data: [0, 1, 2, 3, 4, 5, 6, 7],
            latch_select: 8,
            read_strobe: 9,
            write_strobe: 10,
            fifo_reset: 11,
            flag_reset: 12,
            error: 13,
            request: 14,
            reset_in: 15,
            card_detect: 20,
            fifo_empty: 21,
            led: 25,
            sd_cs: 17,
        }
    }
}

/// Pin configuration.  All lines are active low except the data lines,
/// error, LED and request.
#[derive(Clone, Copy)]
pub struct PinConfig {
    /// D0-D7, shared by the FIFO and the instruction latch.
    pub data: [u8; 8],
    /// ~OE of the instruction latch.
    pub latch_select: u8,
    /// ~R of the FIFO.
    pub read_strobe: u8,
    /// ~W of the FIFO.
    pub write_strobe: u8,
    /// ~RS of the FIFO.
    pub fifo_reset: u8,
    /// Clears the request flip-flop.
    pub flag_reset: u8,
    /// Error bit readable by the host.
    pub error: u8,
    /// Q of the request flip-flop.  Also the wake source.
    pub request: u8,
    /// Reset line from the host.
    pub reset_in: u8,
    /// Card detect switch, low when a card is inserted.
    pub card_detect: u8,
    /// ~EF of the FIFO.
    pub fifo_empty: u8,
    pub led: u8,
    /// SD card chip select.  The other SD card lines are SPI0's, see
    /// [`SdSpiPins`].
    pub sd_cs: u8,
}

impl Default for PinConfig {
    fn default() -> Self {
        config::standard_v0_1()
    }
}

impl PinConfig {
    /// SIO mask of the data lines.
    pub const fn data_mask(&self) -> u32 {
        let mut mask = 0;
        let mut ii = 0;
        while ii < self.data.len() {
            mask |= 1 << self.data[ii];
            ii += 1;
        }
        mask
    }

    /// SIO mask of the strobes.
    pub const fn strobe_mask(&self) -> u32 {
        (1 << self.read_strobe) | (1 << self.write_strobe)
    }
}

/// Holds the GPIOs the firmware uses until they are taken.  Pins are taken
/// by number, using the [`PinConfig`], so the configuration is the only
/// place the assignments live.
pub struct Gpio {
    pin0: Option<PIN_0>,
    pin1: Option<PIN_1>,
    pin2: Option<PIN_2>,
    pin3: Option<PIN_3>,
    pin4: Option<PIN_4>,
    pin5: Option<PIN_5>,
    pin6: Option<PIN_6>,
    pin7: Option<PIN_7>,
    pin8: Option<PIN_8>,
    pin9: Option<PIN_9>,
    pin10: Option<PIN_10>,
    pin11: Option<PIN_11>,
    pin12: Option<PIN_12>,
    pin13: Option<PIN_13>,
    pin14: Option<PIN_14>,
    pin15: Option<PIN_15>,
    pin16: Option<PIN_16>,
    pin17: Option<PIN_17>,
    pin18: Option<PIN_18>,
    pin19: Option<PIN_19>,
    pin20: Option<PIN_20>,
    pin21: Option<PIN_21>,
    pin25: Option<PIN_25>,
    config: PinConfig,
}

/// The SPI pins for the SD card.  These are typed, as the SPI peripheral
/// needs to know which function each pin has, so they are fixed: SPI0 on
/// GPIO 16 (MISO), 18 (SCK) and 19 (MOSI).  Chip select is a plain output, so
/// comes from the [`PinConfig`].
pub struct SdSpiPins {
    pub clk: PIN_18,
    pub mosi: PIN_19,
    pub miso: PIN_16,
    pub cs: Output<'static>,
}

impl Gpio {
    #[allow(clippy::too_many_arguments)]
    #[allow(clippy::similar_names)]
    pub fn new(
        pin0: PIN_0,
        pin1: PIN_1,
        pin2: PIN_2,
        pin3: PIN_3,
        pin4: PIN_4,
        pin5: PIN_5,
        pin6: PIN_6,
        pin7: PIN_7,
        pin8: PIN_8,
        pin9: PIN_9,
        pin10: PIN_10,
        pin11: PIN_11,
        pin12: PIN_12,
        pin13: PIN_13,
        pin14: PIN_14,
        pin15: PIN_15,
        pin16: PIN_16,
        pin17: PIN_17,
        pin18: PIN_18,
        pin19: PIN_19,
        pin20: PIN_20,
        pin21: PIN_21,
        pin25: PIN_25,
        config: Option<PinConfig>,
    ) -> Self {
        Self {
            pin0: Some(pin0),
            pin1: Some(pin1),
            pin2: Some(pin2),
            pin3: Some(pin3),
            pin4: Some(pin4),
            pin5: Some(pin5),
            pin6: Some(pin6),
            pin7: Some(pin7),
            pin8: Some(pin8),
            pin9: Some(pin9),
            pin10: Some(pin10),
            pin11: Some(pin11),
            pin12: Some(pin12),
            pin13: Some(pin13),
            pin14: Some(pin14),
            pin15: Some(pin15),
            pin16: Some(pin16),
            pin17: Some(pin17),
            pin18: Some(pin18),
            pin19: Some(pin19),
            pin20: Some(pin20),
            pin21: Some(pin21),
            pin25: Some(pin25),
            config: config.unwrap_or_default(),
        }
    }

    pub fn config(&self) -> &PinConfig {
        &self.config
    }

    /// Takes the bus pins, putting them in their idle state as they are
    /// taken.  Panics if any of them have already been taken, as that is a
    /// configuration error.
    pub fn take_bus_pins(&mut self) -> RpBusPins {
        let c = self.config;
        let data = c.data.map(|num| self.take_flex(num));
        RpBusPins {
            data,
            latch_select: self.take_output(c.latch_select, Level::High),
            read_strobe: self.take_flex(c.read_strobe),
            write_strobe: self.take_flex(c.write_strobe),
            fifo_reset: self.take_output(c.fifo_reset, Level::High),
            flag_reset: self.take_output(c.flag_reset, Level::High),
            error: self.take_output(c.error, Level::Low),
            led: self.take_output(c.led, Level::Low),
            request: self.take_input(c.request, Pull::None),
            fifo_empty: self.take_input(c.fifo_empty, Pull::None),
            card_detect: self.take_input(c.card_detect, Pull::Up),
        }
    }

    /// Takes the host's reset line.
    pub fn take_reset_in(&mut self) -> Input<'static> {
        self.take_input(self.config.reset_in, Pull::Up)
    }

    /// Takes the SD card SPI pins.
    pub fn take_sd_spi_pins(&mut self) -> SdSpiPins {
        let cs = self.take_output(self.config.sd_cs, Level::High);
        match (self.pin18.take(), self.pin19.take(), self.pin16.take()) {
            (Some(clk), Some(mosi), Some(miso)) => SdSpiPins {
                clk,
                mosi,
                miso,
                cs,
            },
            _ => panic!("SD card SPI pins already taken"),
        }
    }

    fn take_flex(&mut self, index: u8) -> Flex<'static> {
        let mut pin = Flex::new(self.take_pin_as_any(index));
        pin.set_pull(Pull::None);
        pin.set_as_input();
        pin.set_low();
        pin
    }

    fn take_output(&mut self, index: u8, level: Level) -> Output<'static> {
        Output::new(self.take_pin_as_any(index), level)
    }

    fn take_input(&mut self, index: u8, pull: Pull) -> Input<'static> {
        Input::new(self.take_pin_as_any(index), pull)
    }

    /// Helper to take a pin by index
    fn take_pin_as_any(&mut self, index: u8) -> AnyPin {
        let pin = match index {
            0 => self.pin0.take().map(AnyPin::from),
            1 => self.pin1.take().map(AnyPin::from),
            2 => self.pin2.take().map(AnyPin::from),
            3 => self.pin3.take().map(AnyPin::from),
            4 => self.pin4.take().map(AnyPin::from),
            5 => self.pin5.take().map(AnyPin::from),
            6 => self.pin6.take().map(AnyPin::from),
            7 => self.pin7.take().map(AnyPin::from),
            8 => self.pin8.take().map(AnyPin::from),
            9 => self.pin9.take().map(AnyPin::from),
            10 => self.pin10.take().map(AnyPin::from),
            11 => self.pin11.take().map(AnyPin::from),
            12 => self.pin12.take().map(AnyPin::from),
            13 => self.pin13.take().map(AnyPin::from),
            14 => self.pin14.take().map(AnyPin::from),
            15 => self.pin15.take().map(AnyPin::from),
            16 => self.pin16.take().map(AnyPin::from),
            17 => self.pin17.take().map(AnyPin::from),
            18 => self.pin18.take().map(AnyPin::from),
            19 => self.pin19.take().map(AnyPin::from),
            20 => self.pin20.take().map(AnyPin::from),
            21 => self.pin21.take().map(AnyPin::from),
            25 => self.pin25.take().map(AnyPin::from),
            _ => None,
        };
        match pin {
            Some(pin) => pin,
            None => panic!("Pin {} not available", index),
        }
    }
}

/// The bus pins, implemented over the GPIOs.
pub struct RpBusPins {
    data: [Flex<'static>; 8],
    latch_select: Output<'static>,
    read_strobe: Flex<'static>,
    write_strobe: Flex<'static>,
    fifo_reset: Output<'static>,
    flag_reset: Output<'static>,
    error: Output<'static>,
    led: Output<'static>,
    request: Input<'static>,
    fifo_empty: Input<'static>,
    card_detect: Input<'static>,
}

impl RpBusPins {
    fn set_line(&mut self, line: ControlLine, asserted: bool) {
        // Everything but the error bit and LED is active low.
        let level = match line {
            ControlLine::Error | ControlLine::Led => Level::from(asserted),
            _ => Level::from(!asserted),
        };
        match line {
            ControlLine::LatchSelect => self.latch_select.set_level(level),
            ControlLine::ReadStrobe => self.read_strobe.set_level(level),
            ControlLine::WriteStrobe => self.write_strobe.set_level(level),
            ControlLine::FifoReset => self.fifo_reset.set_level(level),
            ControlLine::FlagReset => self.flag_reset.set_level(level),
            ControlLine::Error => self.error.set_level(level),
            ControlLine::Led => self.led.set_level(level),
        }
    }
}

impl BusPins for RpBusPins {
    fn set_data_mode(&mut self, mode: DataMode) {
        match mode {
            DataMode::Output => {
                for pin in self.data.iter_mut() {
                    pin.set_as_output();
                }
            }
            DataMode::Input | DataMode::Tristate => {
                for pin in self.data.iter_mut() {
                    pin.set_as_input();
                    pin.set_low();
                }
            }
        }
    }

    #[inline(always)]
    fn write_data(&mut self, value: u8) {
        for (ii, pin) in self.data.iter_mut().enumerate() {
            pin.set_level(Level::from(value & (1 << ii) != 0));
        }
    }

    #[inline(always)]
    fn read_data(&mut self) -> u8 {
        self.data
            .iter()
            .enumerate()
            .fold(0, |value, (ii, pin)| value | ((pin.is_high() as u8) << ii))
    }

    #[inline(always)]
    fn settle(&mut self) {
        block_ns!(BUS_SETTLE_NS);
    }

    fn assert_line(&mut self, line: ControlLine) {
        self.set_line(line, true);
    }

    fn release_line(&mut self, line: ControlLine) {
        self.set_line(line, false);
    }

    fn drive_strobes(&mut self, enabled: bool) {
        if enabled {
            // Set the level first, so the strobes don't glitch low when they
            // become outputs.
            self.read_strobe.set_high();
            self.write_strobe.set_high();
            self.read_strobe.set_as_output();
            self.write_strobe.set_as_output();
        } else {
            // And the reverse, so they're never driven low.
            self.read_strobe.set_as_input();
            self.write_strobe.set_as_input();
            self.read_strobe.set_low();
            self.write_strobe.set_low();
        }
    }

    fn request_pending(&mut self) -> bool {
        self.request.is_high()
    }

    fn fifo_empty(&mut self) -> bool {
        self.fifo_empty.is_low()
    }

    fn card_present(&mut self) -> bool {
        self.card_detect.is_low()
    }

    async fn wait_for_request_edge(&mut self) {
        self.request.wait_for_high().await;
    }
}
