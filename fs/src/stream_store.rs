//! The UNIX-domain socket stream backing store.
//!
//! Path resolution and the virtual filesystem proper are out of scope for
//! this workspace — `/dev/pts/<N>` and socket pathname nodes are created
//! through the `vfs_create_node` named service in
//! `pastoral_lib::kernel_services::platform`. What *is* in scope is the
//! byte-addressable store a connected socket pair reads and writes
//! through: a "dangling ramfs inode" with no name and no parent directory,
//! existing only as long as a socket holds it.
//!
//! Grounded on the teacher's `ramfs` inode (`data` + `data_len`) and the
//! `fileio` file-descriptor's `position`-tracked read/write, but growable
//! (`alloc::vec::Vec`) rather than the fixed `[u8; 4096]` ramfs uses,
//! since a stream has no size ceiling.

extern crate alloc;

use alloc::vec::Vec;

use pastoral_lib::IrqMutex;

struct Inner {
    data: Vec<u8>,
}

/// A single growing byte log. `write` always appends at the current end
/// (mirroring the original's `write` at `st_size` offset); `read_at`
/// reads starting at a caller-tracked cursor and never removes data, so
/// multiple readers (or one reader re-reading) can coexist.
pub struct StreamStore {
    inner: IrqMutex<Inner>,
}

impl StreamStore {
    pub const fn new() -> Self {
        Self {
            inner: IrqMutex::new(Inner { data: Vec::new() }),
        }
    }

    /// Append `buf` to the end of the store. Returns the number of bytes
    /// written (always `buf.len()` — bounded only by the allocator).
    pub fn write(&self, buf: &[u8]) -> usize {
        let mut inner = self.inner.lock();
        inner.data.extend_from_slice(buf);
        buf.len()
    }

    /// Current length of the store, i.e. the offset the next `write`
    /// will land at.
    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read up to `buf.len()` bytes starting at `cursor`. Returns the
    /// number of bytes copied, which is `0` if `cursor >= len()`.
    pub fn read_at(&self, cursor: usize, buf: &mut [u8]) -> usize {
        let inner = self.inner.lock();
        if cursor >= inner.data.len() {
            return 0;
        }
        let available = &inner.data[cursor..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        n
    }
}

impl Default for StreamStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_appends_read_at_tracks_cursor() {
        let store = StreamStore::new();
        assert_eq!(store.write(b"hello"), 5);
        assert_eq!(store.len(), 5);

        let mut buf = [0u8; 8];
        let n = store.read_at(0, &mut buf);
        assert_eq!(n, 5);
        assert_eq!(&buf[..5], b"hello");

        assert_eq!(store.write(b" world"), 6);
        let n2 = store.read_at(5, &mut buf);
        assert_eq!(n2, 6);
        assert_eq!(&buf[..6], b" world");
    }

    #[test]
    fn read_past_end_returns_zero() {
        let store = StreamStore::new();
        store.write(b"abc");
        let mut buf = [0u8; 4];
        assert_eq!(store.read_at(10, &mut buf), 0);
    }
}
