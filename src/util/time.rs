//! Sub-microsecond busy waits, used to let the bus settle.
//!
//! embassy-time can't delay for less than a tick, which is 1us on the Pico,
//! so these count clock cycles instead.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

/// Blocks for at least the given number of nanoseconds, rounded up to whole
/// clock cycles.  A macro, so the delay can be checked at compile time.
macro_rules! block_ns {
    ($ns:expr) => {{
        #[cfg(feature = "pico")]
        const CLOCK_FREQ_MHZ: u32 = 125;

        #[cfg(feature = "pico2")]
        const CLOCK_FREQ_MHZ: u32 = 150;

        const NS_PER_CYCLE: u32 = 1000 / CLOCK_FREQ_MHZ;

        // Roughly the overhead of the delay loop itself
        #[allow(dead_code)]
        const MIN_PRACTICAL_NS: u32 = 3 * NS_PER_CYCLE;
        static_assertions::const_assert!($ns >= MIN_PRACTICAL_NS);

        cortex_m::asm::delay(($ns as u32).div_ceil(NS_PER_CYCLE));
    }};
}
pub(crate) use block_ns;
