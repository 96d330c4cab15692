//! Open-file handles.
//!
//! An `OpenFile` is a fetched header plus a seek position. Files never
//! grow: reads and writes are clamped at the length fixed when the file
//! was created.

use std::sync::Arc;

use super::header::FileHeader;
use crate::machine::disk::{SectorDevice, SECTOR_SIZE};

pub struct OpenFile {
    device: Arc<dyn SectorDevice>,
    hdr: FileHeader,
    seek_pos: usize,
}

impl OpenFile {
    /// Open the file whose header lives at `sector`.
    pub fn new(device: Arc<dyn SectorDevice>, sector: usize) -> Self {
        let hdr = FileHeader::fetch_from(&device, sector);
        Self {
            device,
            hdr,
            seek_pos: 0,
        }
    }

    pub fn length(&self) -> usize {
        self.hdr.file_length()
    }

    pub fn seek(&mut self, position: usize) {
        self.seek_pos = position;
    }

    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.read_at(buf, self.seek_pos);
        self.seek_pos += n;
        n
    }

    pub fn write(&mut self, buf: &[u8]) -> usize {
        let n = self.write_at(buf, self.seek_pos);
        self.seek_pos += n;
        n
    }

    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        let len = self.length();
        if offset >= len || buf.is_empty() {
            return 0;
        }
        let n = buf.len().min(len - offset);
        let first = offset / SECTOR_SIZE;
        let last = (offset + n - 1) / SECTOR_SIZE;
        let mut tmp = [0u8; SECTOR_SIZE];
        let mut copied = 0;
        for s in first..=last {
            let sector = self.hdr.byte_to_sector(s * SECTOR_SIZE);
            self.device.read_sector(sector, &mut tmp);
            let start = if s == first { offset % SECTOR_SIZE } else { 0 };
            let end = if s == last {
                (offset + n - 1) % SECTOR_SIZE + 1
            } else {
                SECTOR_SIZE
            };
            buf[copied..copied + (end - start)].copy_from_slice(&tmp[start..end]);
            copied += end - start;
        }
        n
    }

    /// Write within the file, reading partially-covered sectors first
    /// so their untouched bytes survive. Returns the bytes written,
    /// clamped at the end of the file.
    pub fn write_at(&self, buf: &[u8], offset: usize) -> usize {
        let len = self.length();
        if offset >= len || buf.is_empty() {
            return 0;
        }
        let n = buf.len().min(len - offset);
        let first = offset / SECTOR_SIZE;
        let last = (offset + n - 1) / SECTOR_SIZE;
        let mut tmp = [0u8; SECTOR_SIZE];
        let mut copied = 0;
        for s in first..=last {
            let sector = self.hdr.byte_to_sector(s * SECTOR_SIZE);
            let start = if s == first { offset % SECTOR_SIZE } else { 0 };
            let end = if s == last {
                (offset + n - 1) % SECTOR_SIZE + 1
            } else {
                SECTOR_SIZE
            };
            if start != 0 || end != SECTOR_SIZE {
                self.device.read_sector(sector, &mut tmp);
            }
            tmp[start..end].copy_from_slice(&buf[copied..copied + (end - start)]);
            self.device.write_sector(sector, &tmp);
            copied += end - start;
        }
        n
    }
}
