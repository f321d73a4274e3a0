//! Core kernel subsystems: the clock/timer wheel, the pseudo-terminal
//! driver, and the UNIX-domain socket subsystem. Each reaches its
//! external collaborators (scheduler, VFS, interrupt routing) through the
//! named services in `pastoral_lib::kernel_services`.
//!
//! Boot wiring: once `pastoral_lib::kernel_services::platform` is
//! registered, call [`CLOCK`]'s `init` and [`pty::init`] to register this
//! crate's static device nodes (`/dev/ptmx`) before any `ptmx_open` call.
#![no_std]

pub mod clock;
pub mod pty;
pub mod socket;

pub use clock::{ClockTimerWheel, TimeSpec, TimerHandle, CLOCK};
pub use pty::{init as pty_init, MasterHandle, PtyError, PtmIoctl, PtmIoctlResponse, PtsIoctl, SlaveHandle, WinSize};
pub use socket::{SockAddrUn, SockType, Socket, SocketError, SocketHandle, SocketState};
