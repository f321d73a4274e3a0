//! Shared kernel primitives: locking, circular buffers, wait queues, logging,
//! one-shot initialization, and the named-service seams the core subsystems
//! use to reach their external collaborators (scheduler, VFS, interrupt
//! routing).
#![no_std]
#![allow(unsafe_op_in_unsafe_fn)]

pub mod cpu;
pub mod io;
pub mod kernel_services;
pub mod klog;
pub mod once_lock;
pub mod ports;
pub mod preempt;
pub mod ring_buffer;
pub mod services;
pub mod spinlock;
pub mod testing;
pub mod waitqueue;

pub use kernel_services::TaskHandle;
pub use once_lock::OnceLock;
pub use ring_buffer::RingBuffer;
pub use spinlock::{IrqMutex, IrqMutexGuard, IrqRwLock, IrqRwLockReadGuard, IrqRwLockWriteGuard};
pub use testing::TestResult;
pub use waitqueue::{Trigger, WaitEvent, WaitQueue};
