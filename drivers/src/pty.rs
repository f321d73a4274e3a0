//! Pseudo-terminal driver.
//!
//! A master/slave character-device pair that behaves like a terminal:
//! bytes written to the master appear as slave input; bytes written to
//! the slave (once flushed through the line discipline) appear as
//! readable bytes on the master.
//!
//! The original driver ties master and slave together through mutual raw
//! pointers (`pts_data.master` / `ptm_data.slave`). Here the pair is a
//! single owning record, [`PtyPair`], held behind an `Arc`; [`MasterHandle`]
//! and [`SlaveHandle`] are just typed views onto clones of that `Arc` —
//! borrow-style handles rather than independent owners. The pair's `Drop`
//! runs exactly when the last handle (master or slave, whichever is
//! dropped last) goes away, which is also when the slave number is
//! returned to the bitmap and its `/dev/pts/<N>` node is removed.

extern crate alloc;

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use pastoral_lib::kernel_services::platform;
use pastoral_lib::{IrqMutex, OnceLock, RingBuffer};

/// Per-queue byte capacity. Matches the original's `circular_queue_init(..,
/// MAX_LINE, sizeof(char))` sizing for both the TTY queues and the
/// master's own input queue.
pub const MAX_LINE: usize = 4096;

pub const PTMX_MAJOR: u32 = 5;
pub const PTMX_MINOR: u32 = 2;
pub const PTS_MAJOR: u32 = 136;

/// Upper bound on live slave numbers; bitmap allocation past this fails
/// with [`PtyError::ResourceExhausted`] rather than growing unboundedly.
const MAX_SLAVES: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PtyError {
    /// The slave-number bitmap has no free entries left to grow into.
    ResourceExhausted,
    /// `pts_open` was given a slave number with no live pair.
    NoSuchSlave,
    /// The named `vfs_create_node`/`vfs_remove_node` service failed.
    NodeCreationFailed,
    /// An ioctl request this device doesn't support.
    NotImplemented,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WinSize {
    pub rows: u16,
    pub cols: u16,
    pub xpixel: u16,
    pub ypixel: u16,
}

/// `ptm_ioctl` request/response pairs.
pub enum PtmIoctl {
    GetPtyNumber,
    GetWinSize,
    SetWinSize(WinSize),
}

pub enum PtmIoctlResponse {
    PtyNumber(u32),
    WinSize(WinSize),
    Ack,
}

/// `pts_ioctl` request/response pairs — same winsize surface as the
/// master, anything else fails with [`PtyError::NotImplemented`].
pub enum PtsIoctl {
    GetWinSize,
    SetWinSize(WinSize),
}

// ---------------------------------------------------------------------------
// The growable slave-number bitmap, and the table used to look a live pair
// back up by slave number for `pts_open`. Both live under one lock so
// bitmap allocation, node creation, and table registration become visible
// atomically, mirroring the original's `pty_lock` discipline.
// ---------------------------------------------------------------------------

struct PtyGlobal {
    in_use: Vec<bool>,
    table: Vec<Option<Weak<PtyPair>>>,
}

impl PtyGlobal {
    const fn new() -> Self {
        Self {
            in_use: Vec::new(),
            table: Vec::new(),
        }
    }

    fn alloc_slave_no(&mut self) -> Result<u32, PtyError> {
        if let Some(pos) = self.in_use.iter().position(|&used| !used) {
            self.in_use[pos] = true;
            return Ok(pos as u32);
        }
        if self.in_use.len() >= MAX_SLAVES {
            return Err(PtyError::ResourceExhausted);
        }
        let n = self.in_use.len();
        self.in_use.push(true);
        self.table.push(None);
        Ok(n as u32)
    }

    fn free_slave_no(&mut self, n: u32) {
        if let Some(slot) = self.in_use.get_mut(n as usize) {
            *slot = false;
        }
        if let Some(slot) = self.table.get_mut(n as usize) {
            *slot = None;
        }
    }
}

static PTY_GLOBAL: IrqMutex<PtyGlobal> = IrqMutex::new(PtyGlobal::new());

fn pts_path(slave_no: u32) -> String {
    format!("/dev/pts/{slave_no}")
}

static PTMX_NODE: OnceLock<Result<(), PtyError>> = OnceLock::new();

/// Register the static `/dev/ptmx` device node (major 5, minor 2). This is
/// a distinct responsibility from [`ptmx_open`], which only creates the
/// per-open `/dev/pts/<N>` slave node — mirrors the original's `pty_init`,
/// called once at boot alongside the other static device registrations.
pub fn init() -> Result<(), PtyError> {
    PTMX_NODE.call_once(|| {
        platform::vfs_create_node("/dev/ptmx", PTMX_MAJOR, PTMX_MINOR, 0o666)
            .map_err(|_| PtyError::NodeCreationFailed)
    });
    *PTMX_NODE.get().unwrap()
}

// ---------------------------------------------------------------------------
// TTY and pair
// ---------------------------------------------------------------------------

struct Tty {
    /// Fed by master writes; drained by slave reads.
    input_queue: IrqMutex<RingBuffer<u8, MAX_LINE>>,
    /// Fed by slave writes; drained into the master's input queue by
    /// `flush_output`.
    output_queue: IrqMutex<RingBuffer<u8, MAX_LINE>>,
    winsize: IrqMutex<WinSize>,
}

impl Tty {
    fn new() -> Self {
        Self {
            input_queue: IrqMutex::new(RingBuffer::new()),
            output_queue: IrqMutex::new(RingBuffer::new()),
            winsize: IrqMutex::new(WinSize::default()),
        }
    }
}

struct PtyPair {
    slave_no: u32,
    tty: Tty,
    /// The master's own input queue (`ptm_data.input_queue`), fed only by
    /// `flush_output` draining `tty.output_queue`.
    master_input_queue: IrqMutex<RingBuffer<u8, MAX_LINE>>,
}

impl Drop for PtyPair {
    fn drop(&mut self) {
        PTY_GLOBAL.lock().free_slave_no(self.slave_no);
        let _ = platform::vfs_remove_node(Box::leak(pts_path(self.slave_no).into_boxed_str()));
    }
}

/// The master side of an open PTY pair.
pub struct MasterHandle(Arc<PtyPair>);

/// The slave side of an open PTY pair, obtained via [`pts_open`].
pub struct SlaveHandle(Arc<PtyPair>);

/// `ptmx_open`: allocate a fresh slave number, cross-linked tty and pair,
/// and a `/dev/pts/<N>` node. Returns the new master handle.
pub fn ptmx_open() -> Result<MasterHandle, PtyError> {
    let mut global = PTY_GLOBAL.lock();
    let slave_no = global.alloc_slave_no()?;

    let pair = Arc::new(PtyPair {
        slave_no,
        tty: Tty::new(),
        master_input_queue: IrqMutex::new(RingBuffer::new()),
    });

    if platform::vfs_create_node(
        Box::leak(pts_path(slave_no).into_boxed_str()),
        PTS_MAJOR,
        slave_no,
        0o620,
    )
    .is_err()
    {
        global.free_slave_no(slave_no);
        return Err(PtyError::NodeCreationFailed);
    }

    global.table[slave_no as usize] = Some(Arc::downgrade(&pair));
    drop(global);

    Ok(MasterHandle(pair))
}

/// Open the slave end of a live pair by slave number (as returned by
/// `TIOCGPTN`). Fails if the master has already been dropped.
pub fn pts_open(slave_no: u32) -> Result<SlaveHandle, PtyError> {
    let global = PTY_GLOBAL.lock();
    let pair = global
        .table
        .get(slave_no as usize)
        .and_then(|slot| slot.as_ref())
        .and_then(Weak::upgrade)
        .ok_or(PtyError::NoSuchSlave)?;
    Ok(SlaveHandle(pair))
}

impl MasterHandle {
    /// Pop up to `buf.len()` bytes from the master's input queue.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        self.0.master_input_queue.lock().pop_slice(buf)
    }

    /// Push up to `buf.len()` bytes into the slave TTY's input queue.
    pub fn write(&self, buf: &[u8]) -> usize {
        self.0.tty.input_queue.lock().push_slice(buf)
    }

    pub fn slave_no(&self) -> u32 {
        self.0.slave_no
    }

    pub fn ioctl(&self, req: PtmIoctl) -> PtmIoctlResponse {
        match req {
            PtmIoctl::GetPtyNumber => PtmIoctlResponse::PtyNumber(self.0.slave_no),
            PtmIoctl::GetWinSize => PtmIoctlResponse::WinSize(*self.0.tty.winsize.lock()),
            PtmIoctl::SetWinSize(ws) => {
                *self.0.tty.winsize.lock() = ws;
                PtmIoctlResponse::Ack
            }
        }
    }
}

impl SlaveHandle {
    /// Pop up to `buf.len()` bytes from the TTY input queue (fed by
    /// master writes).
    pub fn read(&self, buf: &mut [u8]) -> usize {
        self.0.tty.input_queue.lock().pop_slice(buf)
    }

    /// Push up to `buf.len()` bytes into the TTY output queue. Not
    /// visible to the master until [`flush_output`](Self::flush_output)
    /// runs.
    pub fn write(&self, buf: &[u8]) -> usize {
        self.0.tty.output_queue.lock().push_slice(buf)
    }

    /// Drain as many bytes as possible from the TTY output queue into the
    /// master's input queue, stopping on either empty-source or
    /// full-destination. Bytes that don't fit remain at the head of the
    /// TTY output queue for the next flush.
    ///
    /// Acquires the TTY output lock then the master input lock, in that
    /// order; no other path takes both locks together.
    pub fn flush_output(&self) {
        let mut output = self.0.tty.output_queue.lock();
        let mut master_input = self.0.master_input_queue.lock();
        while let Some(byte) = output.peek() {
            if master_input.try_push(byte).is_err() {
                break;
            }
            output.try_pop();
        }
    }

    pub fn ioctl(&self, req: PtsIoctl) -> Result<PtmIoctlResponse, PtyError> {
        match req {
            PtsIoctl::GetWinSize => Ok(PtmIoctlResponse::WinSize(*self.0.tty.winsize.lock())),
            PtsIoctl::SetWinSize(ws) => {
                *self.0.tty.winsize.lock() = ws;
                Ok(PtmIoctlResponse::Ack)
            }
        }
    }
}

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod tests {
    use super::*;

    fn install_test_platform() {
        fn vfs_create_node(_p: &'static str, _maj: u32, _min: u32, _mode: u32) -> Result<(), pastoral_lib::kernel_services::ServiceError> {
            Ok(())
        }
        fn vfs_remove_node(_p: &'static str) -> Result<(), pastoral_lib::kernel_services::ServiceError> {
            Ok(())
        }
        fn idt_alloc_vector() -> u8 {
            0x40
        }
        fn ioapic_set_irq_redirection(_irq: u8, _vector: u8) {}
        fn boot_epoch_seconds() -> u64 {
            0
        }
        platform::register(platform::PlatformServices {
            vfs_create_node,
            vfs_remove_node,
            idt_alloc_vector,
            ioapic_set_irq_redirection,
            boot_epoch_seconds,
        });
    }

    #[test]
    fn echo_scenario() {
        install_test_platform();
        let master = ptmx_open().unwrap();
        let n = master.slave_no();
        let slave = pts_open(n).unwrap();

        assert_eq!(master.write(b"hello"), 5);
        let mut buf = [0u8; 8];
        assert_eq!(slave.read(&mut buf), 5);
        assert_eq!(&buf[..5], b"hello");

        assert_eq!(slave.write(b"world\n"), 6);
        slave.flush_output();
        let mut buf2 = [0u8; 16];
        assert_eq!(master.read(&mut buf2), 6);
        assert_eq!(&buf2[..6], b"world\n");
    }

    #[test]
    fn window_size_roundtrip() {
        install_test_platform();
        let master = ptmx_open().unwrap();
        let slave = pts_open(master.slave_no()).unwrap();

        master.ioctl(PtmIoctl::SetWinSize(WinSize {
            rows: 24,
            cols: 80,
            xpixel: 0,
            ypixel: 0,
        }));

        match slave.ioctl(PtsIoctl::GetWinSize).unwrap() {
            PtmIoctlResponse::WinSize(ws) => {
                assert_eq!(ws, WinSize { rows: 24, cols: 80, xpixel: 0, ypixel: 0 });
            }
            _ => panic!("expected WinSize response"),
        }
    }

    #[test]
    fn flush_output_stops_on_full_destination() {
        install_test_platform();
        let master = ptmx_open().unwrap();
        let slave = pts_open(master.slave_no()).unwrap();

        // Fill the master's input queue to capacity via repeated flushes,
        // then confirm a flush with a full destination leaves the
        // remainder queued on the TTY side rather than dropping it.
        let chunk = [b'x'; MAX_LINE];
        assert_eq!(slave.write(&chunk), MAX_LINE);
        slave.flush_output();
        assert_eq!(slave.write(b"overflow"), 8);
        slave.flush_output();

        let mut drained = std::vec![0u8; MAX_LINE];
        assert_eq!(master.read(&mut drained), MAX_LINE);

        // The bytes that didn't fit on the first flush are still queued.
        slave.flush_output();
        let mut rest = [0u8; 8];
        assert_eq!(master.read(&mut rest), 8);
        assert_eq!(&rest, b"overflow");
    }

    #[test]
    fn master_drop_releases_slave_number() {
        install_test_platform();
        let slave_no = {
            let master = ptmx_open().unwrap();
            let n = master.slave_no();
            let _slave = pts_open(n).unwrap();
            n
        };
        // Both handles dropped; the slave number must now be free to reuse.
        let master2 = ptmx_open().unwrap();
        assert_eq!(master2.slave_no(), slave_no);
    }

    #[test]
    fn ptmx_init_registers_device_node_once() {
        install_test_platform();
        init().unwrap();
        // A second call must stay a no-op rather than re-creating the node.
        init().unwrap();
    }

    #[test]
    fn pts_open_fails_once_master_and_slave_both_gone() {
        install_test_platform();
        let n = {
            let master = ptmx_open().unwrap();
            master.slave_no()
        };
        assert_eq!(pts_open(n).unwrap_err(), PtyError::NoSuchSlave);
    }
}
