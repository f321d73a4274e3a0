//! Clock & Timer Wheel.
//!
//! Owns the two global clocks (`clock_realtime`, `clock_monotonic`) and the
//! timer list, driven by a periodic hardware tick. Grounded on the
//! original PIT interrupt handler (`pit_handler`/`pit_init`) for the
//! init/tick contract, and on the network timer wheel's lock-then-dispatch
//! discipline (`drivers/src/net/timer.rs`) for how the timer list is
//! mutated under a lock and fired outside it.

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use pastoral_lib::kernel_services::platform;
use pastoral_lib::ports::{
    PIT_BASE_FREQUENCY_HZ, PIT_CHANNEL0, PIT_COMMAND, PIT_COMMAND_ACCESS_LOHI,
    PIT_COMMAND_BINARY, PIT_COMMAND_CHANNEL0, PIT_COMMAND_MODE_SQUARE, PIT_IRQ_LINE,
};
use pastoral_lib::{IrqMutex, klog_info};

/// Rate the platform periodic timer is programmed to fire at.
pub const PIT_FREQ_HZ: u32 = 1000;
pub const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Nanoseconds advanced on each tick: `NSEC_PER_SEC / PIT_FREQ_HZ`.
pub const TICK_INTERVAL_NSEC: u64 = NSEC_PER_SEC / PIT_FREQ_HZ as u64;

/// A `{seconds, nanoseconds}` duration or absolute time, normalized so
/// `nsec < NSEC_PER_SEC`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct TimeSpec {
    pub sec: u64,
    pub nsec: u64,
}

impl TimeSpec {
    pub const ZERO: TimeSpec = TimeSpec { sec: 0, nsec: 0 };

    pub const fn new(sec: u64, nsec: u64) -> Self {
        Self { sec, nsec }
    }

    pub fn is_zero(&self) -> bool {
        self.sec == 0 && self.nsec == 0
    }

    /// Add two timespecs, carrying nanoseconds into seconds.
    pub fn add(self, other: TimeSpec) -> TimeSpec {
        let mut nsec = self.nsec + other.nsec;
        let mut sec = self.sec + other.sec;
        if nsec >= NSEC_PER_SEC {
            nsec -= NSEC_PER_SEC;
            sec += 1;
        }
        TimeSpec { sec, nsec }
    }

    /// Subtract `other` from `self`, borrowing from seconds as needed.
    /// Clamped at zero rather than wrapping: the tick handler only ever
    /// subtracts an interval that is, by construction, no larger than the
    /// remaining time of a still-live timer, but a clamp keeps this total
    /// for any caller that violates that precondition.
    pub fn saturating_sub(self, other: TimeSpec) -> TimeSpec {
        if self.sec < other.sec || (self.sec == other.sec && self.nsec < other.nsec) {
            return TimeSpec::ZERO;
        }
        let mut sec = self.sec - other.sec;
        let mut nsec = self.nsec;
        if nsec < other.nsec {
            sec -= 1;
            nsec += NSEC_PER_SEC;
        }
        nsec -= other.nsec;
        TimeSpec { sec, nsec }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ClockPair {
    realtime: TimeSpec,
    monotonic: TimeSpec,
}

/// Opaque handle to an inserted timer, usable with [`ClockTimerWheel::cancel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerHandle(u64);

struct TimerEntry {
    id: u64,
    remaining: TimeSpec,
    /// Wakeup handles fired when `remaining` reaches exactly zero. Each is
    /// a boxed thunk rather than a raw `WaitQueue` reference so the timer
    /// list stays free of lifetime parameters — callers close over
    /// whatever wait queue and event kind they need to fire.
    triggers: Vec<Box<dyn Fn() + Send>>,
}

struct TimerList {
    entries: Vec<TimerEntry>,
}

/// Owns the global clocks and timer list. Mutators from task context
/// (insert/cancel) and the tick handler (interrupt context) both go
/// through the same IRQ-safe locks.
pub struct ClockTimerWheel {
    clocks: IrqMutex<ClockPair>,
    timers: IrqMutex<TimerList>,
    next_timer_id: AtomicU64,
}

impl ClockTimerWheel {
    pub const fn new() -> Self {
        Self {
            clocks: IrqMutex::new(ClockPair {
                realtime: TimeSpec::ZERO,
                monotonic: TimeSpec::ZERO,
            }),
            timers: IrqMutex::new(TimerList {
                entries: Vec::new(),
            }),
            next_timer_id: AtomicU64::new(1),
        }
    }

    /// Program the platform periodic timer, allocate and route its
    /// interrupt vector, and seed both clocks. `clock_monotonic` starts
    /// at zero; `clock_realtime` is seeded from the platform's boot-time
    /// epoch.
    pub fn init(&self) {
        let divisor = Self::pit_divisor(PIT_FREQ_HZ);
        // SAFETY: single-threaded init, programming the PIT's own command
        // and channel-0 data ports.
        unsafe {
            PIT_COMMAND.write(PIT_COMMAND_CHANNEL0 | PIT_COMMAND_ACCESS_LOHI | PIT_COMMAND_MODE_SQUARE | PIT_COMMAND_BINARY);
            PIT_CHANNEL0.write((divisor & 0xFF) as u8);
            PIT_CHANNEL0.write(((divisor >> 8) & 0xFF) as u8);
        }

        let vector = platform::idt_alloc_vector();
        platform::ioapic_set_irq_redirection(PIT_IRQ_LINE, vector);

        let epoch = platform::boot_epoch_seconds();
        let mut clocks = self.clocks.lock();
        clocks.realtime = TimeSpec::new(epoch, 0);
        clocks.monotonic = TimeSpec::ZERO;

        klog_info!(
            "clock: PIT programmed at {} Hz (divisor {}), vector {}, epoch {}",
            PIT_FREQ_HZ,
            divisor,
            vector,
            epoch
        );
    }

    /// `round(PIT_BASE_FREQUENCY_HZ / freq)`.
    fn pit_divisor(freq: u32) -> u16 {
        let base = PIT_BASE_FREQUENCY_HZ as u64;
        let freq = freq as u64;
        (((base * 2 + freq) / (freq * 2)) as u16).max(1)
    }

    pub fn monotonic(&self) -> TimeSpec {
        self.clocks.lock().monotonic
    }

    pub fn realtime(&self) -> TimeSpec {
        self.clocks.lock().realtime
    }

    /// Insert a timer with the given remaining duration and wakeup
    /// thunks. Fired and removed once `remaining` reaches exactly zero.
    pub fn insert_timer(&self, remaining: TimeSpec, triggers: Vec<Box<dyn Fn() + Send>>) -> TimerHandle {
        let id = self.next_timer_id.fetch_add(1, Ordering::Relaxed);
        self.timers.lock().entries.push(TimerEntry {
            id,
            remaining,
            triggers,
        });
        TimerHandle(id)
    }

    /// Cancel a timer before it fires. Returns `false` if it already
    /// fired or the handle is unknown.
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        let mut timers = self.timers.lock();
        if let Some(pos) = timers.entries.iter().position(|e| e.id == handle.0) {
            timers.entries.swap_remove(pos);
            true
        } else {
            false
        }
    }

    pub fn pending_count(&self) -> usize {
        self.timers.lock().entries.len()
    }

    /// Advance both clocks by one tick interval and expire due timers.
    ///
    /// Runs at interrupt priority with the PIT line masked on the owning
    /// CPU. Expired entries are collected under the timer-list lock using
    /// swap-remove (so removal during iteration still visits every
    /// remaining live entry exactly once), then fired after the lock is
    /// released — a fired trigger may itself want to insert a new timer,
    /// which would deadlock if attempted while still holding the lock.
    pub fn tick(&self) {
        let interval = TimeSpec::new(0, TICK_INTERVAL_NSEC);
        {
            let mut clocks = self.clocks.lock();
            clocks.realtime = clocks.realtime.add(interval);
            clocks.monotonic = clocks.monotonic.add(interval);
        }

        let mut expired = Vec::new();
        {
            let mut timers = self.timers.lock();
            let mut i = 0;
            while i < timers.entries.len() {
                timers.entries[i].remaining = timers.entries[i].remaining.saturating_sub(interval);
                if timers.entries[i].remaining.is_zero() {
                    expired.push(timers.entries.swap_remove(i));
                } else {
                    i += 1;
                }
            }
        }

        for entry in &expired {
            for trigger in &entry.triggers {
                trigger();
            }
        }
    }
}

impl Default for ClockTimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

pub static CLOCK: ClockTimerWheel = ClockTimerWheel::new();

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicBool;

    #[test]
    fn timespec_add_carries_seconds() {
        let a = TimeSpec::new(1, NSEC_PER_SEC - 1);
        let b = TimeSpec::new(0, 2);
        assert_eq!(a.add(b), TimeSpec::new(2, 1));
    }

    #[test]
    fn timespec_sub_borrows_seconds() {
        let a = TimeSpec::new(2, 0);
        let b = TimeSpec::new(0, 1);
        assert_eq!(a.saturating_sub(b), TimeSpec::new(1, NSEC_PER_SEC - 1));
    }

    #[test]
    fn clock_advances_exactly_one_interval_per_tick() {
        let wheel = ClockTimerWheel::new();
        let start = wheel.monotonic();
        for _ in 0..10 {
            wheel.tick();
        }
        let elapsed = wheel.monotonic();
        assert_eq!(elapsed.sec * NSEC_PER_SEC + elapsed.nsec - (start.sec * NSEC_PER_SEC + start.nsec), 10 * TICK_INTERVAL_NSEC);
    }

    #[test]
    fn timer_fires_on_exact_multiple_of_tick() {
        let wheel = ClockTimerWheel::new();
        static FIRED: AtomicBool = AtomicBool::new(false);
        FIRED.store(false, Ordering::SeqCst);

        let remaining = TimeSpec::new(0, TICK_INTERVAL_NSEC * 3);
        let handle = wheel.insert_timer(
            remaining,
            alloc::vec![Box::new(|| FIRED.store(true, Ordering::SeqCst)) as Box<dyn Fn() + Send>],
        );
        assert_eq!(wheel.pending_count(), 1);

        wheel.tick();
        wheel.tick();
        assert!(!FIRED.load(Ordering::SeqCst));
        assert_eq!(wheel.pending_count(), 1);

        wheel.tick();
        assert!(FIRED.load(Ordering::SeqCst));
        assert_eq!(wheel.pending_count(), 0);
        assert!(!wheel.cancel(handle));
    }

    #[test]
    fn every_live_timer_visited_once_with_swap_remove() {
        let wheel = ClockTimerWheel::new();
        static FIRE_COUNT: AtomicU64 = AtomicU64::new(0);
        FIRE_COUNT.store(0, Ordering::SeqCst);

        // Three timers sharing a tick-boundary; the first two expire on
        // this tick, exercising swap_remove's index-reuse while the third
        // must still be visited and decremented.
        wheel.insert_timer(
            TimeSpec::new(0, TICK_INTERVAL_NSEC),
            alloc::vec![Box::new(|| { FIRE_COUNT.fetch_add(1, Ordering::SeqCst); }) as Box<dyn Fn() + Send>],
        );
        wheel.insert_timer(
            TimeSpec::new(0, TICK_INTERVAL_NSEC),
            alloc::vec![Box::new(|| { FIRE_COUNT.fetch_add(1, Ordering::SeqCst); }) as Box<dyn Fn() + Send>],
        );
        let long_lived = wheel.insert_timer(TimeSpec::new(0, TICK_INTERVAL_NSEC * 2), Vec::new());

        wheel.tick();
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 2);
        assert_eq!(wheel.pending_count(), 1);
        assert!(wheel.cancel(long_lived));
    }

    #[test]
    fn cancel_before_expiry_prevents_firing() {
        let wheel = ClockTimerWheel::new();
        static FIRED: AtomicBool = AtomicBool::new(false);
        FIRED.store(false, Ordering::SeqCst);
        let handle = wheel.insert_timer(
            TimeSpec::new(0, TICK_INTERVAL_NSEC),
            alloc::vec![Box::new(|| FIRED.store(true, Ordering::SeqCst)) as Box<dyn Fn() + Send>],
        );
        assert!(wheel.cancel(handle));
        wheel.tick();
        assert!(!FIRED.load(Ordering::SeqCst));
    }
}
