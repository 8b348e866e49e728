//! Tick state shared between the timer interrupt and the main loop.
//!
//! The interrupt side only ever increments the counter and sets the
//! pending flag; the scheduler side clears the flag, folds the counter at
//! the wrap window, and derives the seconds counter — each cell has
//! exactly one writer per direction. Every cross-context access runs under
//! a `critical-section` scope so a multi-byte counter can never be torn,
//! and the flag is cleared in the same scope that reads the counter, so a
//! hardware tick is observed at most once.
//!
//! The wrap window is a construction parameter because observed boards
//! divide ticks into seconds two ways: a decimal [`TICK_WINDOW`] of 1000
//! and an older power-of-two mask of [`TICK_WINDOW_POW2`]. The default is
//! the decimal window.

use core::cell::RefCell;
use critical_section::Mutex;

/// Default ticks per derived second.
pub const TICK_WINDOW: u16 = 1000;
/// Power-of-two alternative used by older boards.
pub const TICK_WINDOW_POW2: u16 = 1024;

struct TickCells {
    count: u16,
    seconds: u32,
    pending: bool,
}

/// What one consumed tick carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickEvent {
    /// The counter crossed the wrap window on this consume.
    pub second_elapsed: bool,
}

/// The shared tick counter, pending flag, and derived seconds.
///
/// Const-constructible so a real interrupt handler can reach it through a
/// `static`:
///
/// ```
/// use owbus::tick::TickClock;
///
/// static TICKS: TickClock = TickClock::new();
///
/// // timer ISR body:
/// TICKS.tick_from_isr();
///
/// // main loop:
/// let _ = TICKS.consume_tick();
/// ```
pub struct TickClock {
    cells: Mutex<RefCell<TickCells>>,
    window: u16,
}

impl TickClock {
    /// Clock with the default decimal wrap window.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_window(TICK_WINDOW)
    }

    #[must_use]
    pub const fn with_window(window: u16) -> Self {
        Self {
            cells: Mutex::new(RefCell::new(TickCells {
                count: 0,
                seconds: 0,
                pending: false,
            })),
            window,
        }
    }

    /// Interrupt side: count the tick and mark it pending. If the main
    /// loop lags, later ticks coalesce into one pending flag while the
    /// counter keeps the true total.
    pub fn tick_from_isr(&self) {
        critical_section::with(|cs| {
            let mut cells = self.cells.borrow_ref_mut(cs);
            cells.count = cells.count.wrapping_add(1);
            cells.pending = true;
        });
    }

    /// Scheduler side: take the pending tick, if any. Clearing the flag
    /// and folding the counter happen in one critical section, so each
    /// hardware tick is observed at most once and the counter is never
    /// read torn.
    pub fn consume_tick(&self) -> Option<TickEvent> {
        critical_section::with(|cs| {
            let mut cells = self.cells.borrow_ref_mut(cs);
            if !cells.pending {
                return None;
            }
            cells.pending = false;

            let mut second_elapsed = false;
            if cells.count >= self.window {
                cells.count = 0;
                cells.seconds = cells.seconds.wrapping_add(1);
                second_elapsed = true;
            }

            Some(TickEvent { second_elapsed })
        })
    }

    /// Counter value inside the current window.
    #[must_use]
    pub fn ticks(&self) -> u16 {
        critical_section::with(|cs| self.cells.borrow_ref(cs).count)
    }

    /// Seconds derived so far. Only advances while the main loop keeps
    /// consuming ticks.
    #[must_use]
    pub fn seconds(&self) -> u32 {
        critical_section::with(|cs| self.cells.borrow_ref(cs).seconds)
    }

    #[must_use]
    pub fn window(&self) -> u16 {
        self.window
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero_with_nothing_pending() {
        let clock = TickClock::new();
        assert_eq!(clock.ticks(), 0);
        assert_eq!(clock.seconds(), 0);
        assert_eq!(clock.consume_tick(), None);
    }

    #[test]
    fn one_tick_is_consumed_exactly_once() {
        let clock = TickClock::new();
        clock.tick_from_isr();

        assert_eq!(
            clock.consume_tick(),
            Some(TickEvent {
                second_elapsed: false
            })
        );
        assert_eq!(clock.consume_tick(), None);
        assert_eq!(clock.ticks(), 1);
    }

    #[test]
    fn lagging_consumer_coalesces_the_flag_but_not_the_count() {
        let clock = TickClock::new();
        clock.tick_from_isr();
        clock.tick_from_isr();
        clock.tick_from_isr();

        assert!(clock.consume_tick().is_some());
        assert_eq!(clock.consume_tick(), None);
        assert_eq!(clock.ticks(), 3);
    }

    #[test]
    fn window_of_ticks_wraps_counter_and_derives_one_second() {
        let clock = TickClock::new();
        let mut seconds_seen = 0;

        for _ in 0..TICK_WINDOW {
            clock.tick_from_isr();
            let event = clock.consume_tick().unwrap();
            if event.second_elapsed {
                seconds_seen += 1;
            }
        }

        assert_eq!(clock.ticks(), 0);
        assert_eq!(clock.seconds(), 1);
        assert_eq!(seconds_seen, 1);
    }

    #[test]
    fn power_of_two_window_wraps_at_1024() {
        let clock = TickClock::with_window(TICK_WINDOW_POW2);

        for _ in 0..TICK_WINDOW_POW2 {
            clock.tick_from_isr();
            clock.consume_tick().unwrap();
        }

        assert_eq!(clock.ticks(), 0);
        assert_eq!(clock.seconds(), 1);
    }

    #[test]
    fn interleaved_producer_and_consumer_stay_consistent() {
        let clock = TickClock::new();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..3000 {
                    clock.tick_from_isr();
                }
            });

            for _ in 0..20_000 {
                let _ = clock.consume_tick();
            }
        });

        // Drain whatever is left.
        while clock.consume_tick().is_some() {}

        // Coalesced ticks may fold several windows into one observation,
        // so seconds lands between 1 and 3 depending on interleaving.
        let seconds = clock.seconds();
        assert!((1..=3).contains(&seconds), "seconds = {}", seconds);
        assert!(clock.ticks() < TICK_WINDOW);
    }
}
