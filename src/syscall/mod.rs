//! Kernel-side system-call surface for user programs.
//!
//! The trap shell decodes arguments and calls in here. Results follow
//! the user-visible convention: descriptor ids are small positive
//! integers, 0 is reserved, and -1 reports an error; `create` answers
//! 1 for success and 0 for failure.

use std::sync::Arc;

#[cfg(not(feature = "filesys-stub"))]
use crate::fs::FileSystem;
#[cfg(feature = "filesys-stub")]
use crate::fs::stub::StubFileSystem;
use crate::fs::OpenFileId;
use crate::machine::{Machine, SectorDevice};
use crate::sched::Scheduler;

pub struct Kernel {
    pub machine: Machine,
    pub scheduler: Scheduler,
    #[cfg(not(feature = "filesys-stub"))]
    pub filesys: FileSystem,
    #[cfg(feature = "filesys-stub")]
    pub filesys: StubFileSystem,
}

impl Kernel {
    #[cfg(not(feature = "filesys-stub"))]
    pub fn new(device: Arc<dyn SectorDevice>, format: bool) -> Self {
        Self {
            machine: Machine::new(),
            scheduler: Scheduler::new(),
            filesys: FileSystem::new(device, format),
        }
    }

    #[cfg(feature = "filesys-stub")]
    pub fn new(_device: Arc<dyn SectorDevice>, _format: bool) -> Self {
        Self {
            machine: Machine::new(),
            scheduler: Scheduler::new(),
            filesys: StubFileSystem::new(),
        }
    }

    #[cfg(not(feature = "filesys-stub"))]
    pub fn sys_create(&mut self, path: &str, initial_size: usize) -> i32 {
        match self.filesys.create(path, initial_size, false) {
            Ok(()) => 1,
            Err(e) => {
                log::debug!(target: "fs", "create {path} failed: {e}");
                0
            }
        }
    }

    #[cfg(feature = "filesys-stub")]
    pub fn sys_create(&mut self, path: &str) -> i32 {
        match self.filesys.create(path) {
            Ok(()) => 1,
            Err(e) => {
                log::debug!(target: "fs", "create {path} failed: {e}");
                0
            }
        }
    }

    pub fn sys_open(&mut self, path: &str) -> i32 {
        match self.filesys.open(path) {
            Ok(id) => id,
            Err(e) => {
                log::debug!(target: "fs", "open {path} failed: {e}");
                -1
            }
        }
    }

    pub fn sys_read(&mut self, buf: &mut [u8], id: OpenFileId) -> i32 {
        match self.filesys.read(id, buf) {
            Ok(n) => n as i32,
            Err(_) => -1,
        }
    }

    pub fn sys_write(&mut self, buf: &[u8], id: OpenFileId) -> i32 {
        match self.filesys.write(id, buf) {
            Ok(n) => n as i32,
            Err(_) => -1,
        }
    }

    pub fn sys_close(&mut self, id: OpenFileId) -> i32 {
        match self.filesys.close(id) {
            Ok(()) => 1,
            Err(_) => -1,
        }
    }
}
