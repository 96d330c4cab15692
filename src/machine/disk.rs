//! Raw sector disk.
//!
//! The disk is addressed in fixed-size sectors and assumed reliable;
//! out-of-range access is a kernel bug, not an I/O error.

use std::sync::Arc;

use spin::Mutex;

pub const SECTOR_SIZE: usize = 128;
pub const NUM_SECTORS: usize = 1024;

pub trait SectorDevice: Send + Sync {
    fn read_sector(&self, sector: usize, buf: &mut [u8; SECTOR_SIZE]);
    fn write_sector(&self, sector: usize, buf: &[u8; SECTOR_SIZE]);
}

/// In-memory disk image standing in for the real device.
pub struct MemDisk {
    sectors: Mutex<Vec<u8>>,
}

impl MemDisk {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sectors: Mutex::new(vec![0u8; NUM_SECTORS * SECTOR_SIZE]),
        })
    }
}

impl SectorDevice for MemDisk {
    fn read_sector(&self, sector: usize, buf: &mut [u8; SECTOR_SIZE]) {
        assert!(sector < NUM_SECTORS, "disk read past end: sector {sector}");
        let image = self.sectors.lock();
        buf.copy_from_slice(&image[sector * SECTOR_SIZE..(sector + 1) * SECTOR_SIZE]);
    }

    fn write_sector(&self, sector: usize, buf: &[u8; SECTOR_SIZE]) {
        assert!(sector < NUM_SECTORS, "disk write past end: sector {sector}");
        let mut image = self.sectors.lock();
        image[sector * SECTOR_SIZE..(sector + 1) * SECTOR_SIZE].copy_from_slice(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sectors_round_trip() {
        let disk = MemDisk::new();
        let mut out = [0u8; SECTOR_SIZE];
        let mut data = [0u8; SECTOR_SIZE];
        data[0] = 0xAB;
        data[SECTOR_SIZE - 1] = 0xCD;

        disk.write_sector(7, &data);
        disk.read_sector(7, &mut out);
        assert_eq!(out, data);

        disk.read_sector(8, &mut out);
        assert_eq!(out, [0u8; SECTOR_SIZE]);
    }

    #[test]
    #[should_panic(expected = "disk read past end")]
    fn out_of_range_read_panics() {
        let disk = MemDisk::new();
        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_sector(NUM_SECTORS, &mut buf);
    }
}
