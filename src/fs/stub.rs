//! Stub file system: the same descriptor-table contract, backed by the
//! host's file system instead of the simulated disk. Selected at
//! compile time with the `filesys-stub` feature; `create` takes no size
//! here because the host grows files on demand.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};

use array_macro::array;

use super::{FsError, OpenFileId, MAX_OPEN_FILES};

pub struct StubFileSystem {
    descriptors: [Option<File>; MAX_OPEN_FILES + 1],
    num_open: usize,
}

impl StubFileSystem {
    pub fn new() -> Self {
        Self {
            descriptors: array![_ => None; MAX_OPEN_FILES + 1],
            num_open: 0,
        }
    }

    pub fn create(&mut self, name: &str) -> Result<(), FsError> {
        File::create(name).map(|_| ()).map_err(|_| FsError::NotFound)
    }

    pub fn open(&mut self, name: &str) -> Result<OpenFileId, FsError> {
        if self.num_open == MAX_OPEN_FILES {
            return Err(FsError::TooManyOpenFiles);
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(name)
            .map_err(|_| FsError::NotFound)?;
        let slot = (1..=MAX_OPEN_FILES)
            .find(|&id| self.descriptors[id].is_none())
            .ok_or(FsError::TooManyOpenFiles)?;
        self.descriptors[slot] = Some(file);
        self.num_open += 1;
        Ok(slot as OpenFileId)
    }

    pub fn close(&mut self, id: OpenFileId) -> Result<(), FsError> {
        let slot = self.slot(id)?;
        if self.descriptors[slot].take().is_none() {
            return Err(FsError::BadDescriptor);
        }
        self.num_open -= 1;
        Ok(())
    }

    pub fn read(&mut self, id: OpenFileId, buf: &mut [u8]) -> Result<usize, FsError> {
        let slot = self.slot(id)?;
        let file = self.descriptors[slot]
            .as_mut()
            .ok_or(FsError::BadDescriptor)?;
        file.read(buf).map_err(|_| FsError::BadDescriptor)
    }

    pub fn write(&mut self, id: OpenFileId, buf: &[u8]) -> Result<usize, FsError> {
        let slot = self.slot(id)?;
        let file = self.descriptors[slot]
            .as_mut()
            .ok_or(FsError::BadDescriptor)?;
        file.write(buf).map_err(|_| FsError::BadDescriptor)
    }

    fn slot(&self, id: OpenFileId) -> Result<usize, FsError> {
        usize::try_from(id)
            .ok()
            .filter(|&slot| (1..=MAX_OPEN_FILES).contains(&slot))
            .ok_or(FsError::BadDescriptor)
    }
}

impl Default for StubFileSystem {
    fn default() -> Self {
        Self::new()
    }
}
