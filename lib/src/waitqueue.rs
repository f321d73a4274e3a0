//! Event-based suspend/resume primitive.
//!
//! A [`WaitQueue`] holds a set of **triggers**: opaque handles bound to a
//! `(wait queue, event kind)` pair. A caller that needs to block allocates a
//! trigger for the event it cares about, waits on it, and releases it on
//! wake. Another task makes progress possible by calling [`WaitQueue::fire`]
//! for that event kind, which marks every matching trigger runnable and
//! unblocks its owning task — firing is idempotent: a trigger that is
//! already runnable is left alone.
//!
//! This is the suspension primitive shared by the PTY and socket
//! subsystems (`accept`, `connect`, `recvmsg`): allocate → add to waitq →
//! wait on event → remove and release on wake. The woken task must re-check
//! its own predicate (backlog non-empty, peer paired, data available) since
//! a fire only promises runnability, not that the condition still holds.

extern crate alloc;

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::kernel_services::TaskHandle;
use crate::kernel_services::scheduler;
use crate::spinlock::IrqMutex;

/// The event kind a trigger is waiting for. Distinguishing kinds lets a
/// single wait queue serve more than one purpose (e.g. a socket's own
/// queue is used both for `EVENT_SOCKET` backlog wakeups as an acceptor
/// and is distinct from the per-file `EVENT_POLLIN` queue used by
/// `recvmsg`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitEvent {
    /// A connection became available in a listener's backlog, or a
    /// connector's peer accepted it.
    Socket,
    /// Data became available to read.
    PollIn,
    /// A timer attached to this queue expired.
    Timer,
}

/// Handle returned by [`WaitQueue::allocate`]. Belongs to exactly one
/// wait queue; must be released via [`WaitQueue::remove`] once the caller
/// is done waiting on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Trigger {
    id: u64,
    event: WaitEvent,
}

impl Trigger {
    pub fn event(&self) -> WaitEvent {
        self.event
    }
}

struct Entry {
    id: u64,
    event: WaitEvent,
    task: TaskHandle,
    fired: bool,
}

struct Inner {
    entries: Vec<Entry>,
}

pub struct WaitQueue {
    inner: IrqMutex<Inner>,
    next_id: AtomicU64,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            inner: IrqMutex::new(Inner {
                entries: Vec::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a trigger bound to `event` for the calling task and add it
    /// to this queue.
    pub fn allocate(&self, event: WaitEvent) -> Trigger {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = scheduler::current_task();
        self.inner.lock().entries.push(Entry {
            id,
            event,
            task,
            fired: false,
        });
        Trigger { id, event }
    }

    /// Block the calling task until `trigger` is fired. The caller must
    /// re-check its own predicate after this returns: a fire only
    /// guarantees the task is runnable again, not that the awaited
    /// condition still holds.
    pub fn wait(&self, trigger: &Trigger) {
        loop {
            let fired = self
                .inner
                .lock()
                .entries
                .iter()
                .find(|e| e.id == trigger.id)
                .map(|e| e.fired)
                .unwrap_or(true);
            if fired {
                return;
            }
            scheduler::block_current_task();
        }
    }

    /// Remove a trigger from this queue. Must be called once the caller is
    /// done waiting on it, whether or not it ever fired.
    pub fn remove(&self, trigger: Trigger) {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.entries.iter().position(|e| e.id == trigger.id) {
            inner.entries.swap_remove(pos);
        }
    }

    /// Fire every trigger bound to `event`, marking it runnable and waking
    /// its owning task. Idempotent: a trigger already marked fired is left
    /// alone and its task is not woken a second time.
    pub fn fire(&self, event: WaitEvent) {
        let mut woken: Vec<TaskHandle> = Vec::new();
        {
            let mut inner = self.inner.lock();
            for entry in inner.entries.iter_mut() {
                if entry.event == event && !entry.fired {
                    entry.fired = true;
                    woken.push(entry.task);
                }
            }
        }
        for task in woken {
            scheduler::unblock_task(task);
        }
    }

    /// Fire every trigger on this queue regardless of event kind.
    pub fn fire_all(&self) {
        let mut woken: Vec<TaskHandle> = Vec::new();
        {
            let mut inner = self.inner.lock();
            for entry in inner.entries.iter_mut() {
                if !entry.fired {
                    entry.fired = true;
                    woken.push(entry.task);
                }
            }
        }
        for task in woken {
            scheduler::unblock_task(task);
        }
    }

    pub fn has_waiters(&self) -> bool {
        !self.inner.lock().entries.is_empty()
    }

    pub fn waiter_count(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel_services::scheduler::{SchedulerServices, register};

    fn install_test_scheduler() {
        fn current_task() -> TaskHandle {
            TaskHandle(1)
        }
        fn block_current_task() {}
        fn unblock_task(_handle: TaskHandle) {}
        register(SchedulerServices {
            current_task,
            block_current_task,
            unblock_task,
        });
    }

    #[test]
    fn fire_wakes_only_matching_event() {
        install_test_scheduler();
        let wq = WaitQueue::new();
        let socket_trigger = wq.allocate(WaitEvent::Socket);
        let pollin_trigger = wq.allocate(WaitEvent::PollIn);

        wq.fire(WaitEvent::Socket);
        assert!(
            wq.inner
                .lock()
                .entries
                .iter()
                .find(|e| e.id == socket_trigger.id)
                .unwrap()
                .fired
        );
        assert!(
            !wq.inner
                .lock()
                .entries
                .iter()
                .find(|e| e.id == pollin_trigger.id)
                .unwrap()
                .fired
        );

        wq.remove(socket_trigger);
        wq.remove(pollin_trigger);
        assert!(!wq.has_waiters());
    }

    #[test]
    fn fire_is_idempotent() {
        install_test_scheduler();
        let wq = WaitQueue::new();
        let trigger = wq.allocate(WaitEvent::Timer);
        wq.fire(WaitEvent::Timer);
        wq.fire(WaitEvent::Timer);
        wq.wait(&trigger);
        wq.remove(trigger);
    }
}
