//! The in-kernel stream backing store used by connected UNIX-domain
//! sockets. The virtual filesystem and path resolution proper are
//! external collaborators of this workspace (see
//! `pastoral_lib::kernel_services::platform`); this crate only supplies
//! the byte-addressable storage the socket subsystem reads and writes
//! through.
#![no_std]

pub mod stream_store;

pub use stream_store::StreamStore;
