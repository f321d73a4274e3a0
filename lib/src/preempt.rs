//! Preemption control.
//!
//! RAII-based preemption guard. The scheduler and per-CPU task state are
//! external collaborators of this crate (out of scope), so unlike a full
//! kernel's per-CPU preempt count this tracks a single global counter — it
//! exists so [`crate::spinlock::IrqMutex`] can keep its IRQ-disable critical
//! sections free of reentrant preemption without depending on scheduler
//! internals.

use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, Ordering};

static PREEMPT_COUNT: AtomicU32 = AtomicU32::new(0);

/// RAII guard that disables preemption while held.
/// Guards are nestable - preemption re-enables only when all guards drop.
#[must_use = "if unused, preemption will be immediately re-enabled"]
pub struct PreemptGuard {
    _marker: PhantomData<*mut ()>,
}

impl PreemptGuard {
    #[inline]
    pub fn new() -> Self {
        PREEMPT_COUNT.fetch_add(1, Ordering::Relaxed);
        Self {
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn is_active() -> bool {
        PREEMPT_COUNT.load(Ordering::Relaxed) > 0
    }

    #[inline]
    pub fn count() -> u32 {
        PREEMPT_COUNT.load(Ordering::Relaxed)
    }
}

impl Default for PreemptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PreemptGuard {
    #[inline]
    fn drop(&mut self) {
        let prev = PREEMPT_COUNT.fetch_sub(1, Ordering::Release);
        debug_assert!(prev > 0, "preempt_count underflow");
    }
}

#[inline]
pub fn is_preemption_disabled() -> bool {
    PreemptGuard::is_active()
}

#[inline]
pub fn preempt_count() -> u32 {
    PreemptGuard::count()
}
