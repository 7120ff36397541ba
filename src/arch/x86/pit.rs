//! Intel 8253/8254 PIT driver (§4.L step 3, §4.G): programs channel 0 for
//! periodic interrupts at the stable `TIMER_FREQUENCY` of 100 Hz and counts
//! the ticks that [`crate::time::monotonic_us`] and the scheduler's
//! `tick()` both read.

use super::port::{inb, outb};
use core::sync::atomic::{AtomicU64, Ordering};

/// PIT oscillator frequency in Hz.
pub const PIT_FREQUENCY: u32 = 1_193_182;

/// Stable constant: the timer interrupt fires 100 times a second.
pub const TIMER_FREQUENCY: u32 = 100;

const CHANNEL0: u16 = 0x40;
const COMMAND: u16 = 0x43;

static TICK_COUNT: AtomicU64 = AtomicU64::new(0);

/// Configure channel 0, mode 3 (square wave), lobyte/hibyte, for
/// `TIMER_FREQUENCY` interrupts per second. Must run with interrupts
/// disabled; the caller unmasks IRQ 0 once a handler is registered.
pub fn init() {
    let divisor = PIT_FREQUENCY / TIMER_FREQUENCY;
    unsafe {
        outb(COMMAND, 0x36);
        outb(CHANNEL0, (divisor & 0xFF) as u8);
        outb(CHANNEL0, ((divisor >> 8) & 0xFF) as u8);
    }
}

/// Called from the IRQ 0 handler. Advances the tick counter that backs
/// monotonic time and drives the scheduler's periodic `tick()`.
pub fn on_tick() {
    TICK_COUNT.fetch_add(1, Ordering::Relaxed);
}

pub fn ticks() -> u64 {
    TICK_COUNT.load(Ordering::Relaxed)
}

/// Microseconds per tick at `TIMER_FREQUENCY`.
pub const US_PER_TICK: u64 = 1_000_000 / TIMER_FREQUENCY as u64;

pub fn uptime_us() -> u64 {
    ticks() * US_PER_TICK
}

/// Latch and read the current countdown value of channel 0. Exposed for
/// diagnostics; not on any hot path.
pub fn read_counter() -> u16 {
    unsafe {
        outb(COMMAND, 0x00); // latch channel 0
        let low = inb(CHANNEL0);
        let high = inb(CHANNEL0);
        ((high as u16) << 8) | (low as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisor_matches_100_hz() {
        assert_eq!(PIT_FREQUENCY / TIMER_FREQUENCY, 11_931);
    }

    #[test]
    fn us_per_tick_is_10ms() {
        assert_eq!(US_PER_TICK, 10_000);
    }

    #[test]
    fn uptime_tracks_ticks() {
        let before = ticks();
        on_tick();
        on_tick();
        assert_eq!(ticks(), before + 2);
        assert_eq!(uptime_us(), ticks() * 10_000);
    }
}
