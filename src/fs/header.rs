//! File headers.
//!
//! A header occupies exactly one sector and maps file bytes to data
//! sectors. Files larger than one header's table continue in a chain of
//! further header sectors, each allocated from the bitmap like any
//! other sector. The first header's sector is owned by the directory
//! entry pointing at it; continuation sectors are owned by the chain.

use std::sync::Arc;

use super::bitmap::PersistentBitmap;
use crate::machine::disk::{SectorDevice, SECTOR_SIZE};

/// Data-sector slots per header: one sector minus the three
/// bookkeeping words.
pub const NUM_DIRECT: usize = (SECTOR_SIZE - 3 * 4) / 4;

const _: () = assert!(3 * 4 + NUM_DIRECT * 4 == SECTOR_SIZE);

pub struct FileHeader {
    /// Bytes covered from this header to the end of the chain; on the
    /// first header this is the file length.
    num_bytes: u32,
    /// Data sectors listed in this header's table.
    num_sectors: u32,
    /// Sector of the continuation header, -1 at the end of the chain.
    next_sector: i32,
    data_sectors: [i32; NUM_DIRECT],
    next: Option<Box<FileHeader>>,
}

impl FileHeader {
    pub fn new() -> Self {
        Self {
            num_bytes: 0,
            num_sectors: 0,
            next_sector: -1,
            data_sectors: [-1; NUM_DIRECT],
            next: None,
        }
    }

    pub fn file_length(&self) -> usize {
        self.num_bytes as usize
    }

    /// Reserve data sectors (and continuation headers) for a file of
    /// `file_size` bytes. Returns the total bytes of header written for
    /// the file, or 0 if the disk cannot hold it — in which case the
    /// bitmap is left untouched.
    pub fn allocate(&mut self, free_map: &mut PersistentBitmap, file_size: usize) -> usize {
        let data_needed = file_size.div_ceil(SECTOR_SIZE);
        let extra_headers = data_needed.saturating_sub(1) / NUM_DIRECT;
        if free_map.count_clear() < data_needed + extra_headers {
            return 0;
        }

        self.num_bytes = file_size as u32;
        let first = data_needed.min(NUM_DIRECT);
        self.num_sectors = first as u32;
        for slot in self.data_sectors[..first].iter_mut() {
            *slot = free_map.find_and_set().expect("free count checked above") as i32;
        }

        // Continuation headers, each claiming its own sector before the
        // data sectors it describes.
        let mut placed = first;
        let mut tail: Vec<FileHeader> = Vec::new();
        let mut tail_sectors: Vec<i32> = Vec::new();
        while placed < data_needed {
            let sector = free_map.find_and_set().expect("free count checked above") as i32;
            let take = (data_needed - placed).min(NUM_DIRECT);
            let mut cont = FileHeader::new();
            cont.num_bytes = (file_size - placed * SECTOR_SIZE) as u32;
            cont.num_sectors = take as u32;
            for slot in cont.data_sectors[..take].iter_mut() {
                *slot = free_map.find_and_set().expect("free count checked above") as i32;
            }
            tail.push(cont);
            tail_sectors.push(sector);
            placed += take;
        }

        for i in 0..tail.len() {
            tail[i].next_sector = if i + 1 < tail.len() {
                tail_sectors[i + 1]
            } else {
                -1
            };
        }
        self.next_sector = *tail_sectors.first().unwrap_or(&-1);

        let mut chain: Option<Box<FileHeader>> = None;
        while let Some(mut hdr) = tail.pop() {
            hdr.next = chain;
            chain = Some(Box::new(hdr));
        }
        self.next = chain;

        (1 + extra_headers) * SECTOR_SIZE
    }

    /// Release every data sector and every continuation-header sector.
    /// The first header's own sector is released by the caller.
    pub fn deallocate(&self, free_map: &mut PersistentBitmap) {
        let mut hdr = self;
        loop {
            for &sector in &hdr.data_sectors[..hdr.num_sectors as usize] {
                free_map.clear(sector as usize);
            }
            match hdr.next.as_deref() {
                Some(next) => {
                    free_map.clear(hdr.next_sector as usize);
                    hdr = next;
                }
                None => break,
            }
        }
    }

    /// Load the header chain rooted at `sector`.
    pub fn fetch_from(device: &Arc<dyn SectorDevice>, sector: usize) -> Self {
        let mut buf = [0u8; SECTOR_SIZE];
        device.read_sector(sector, &mut buf);
        let mut hdr = Self::decode(&buf);
        if hdr.next_sector >= 0 {
            hdr.next = Some(Box::new(Self::fetch_from(device, hdr.next_sector as usize)));
        }
        hdr
    }

    /// Store the header chain, the first header going to `sector`.
    pub fn write_back(&self, device: &Arc<dyn SectorDevice>, sector: usize) {
        device.write_sector(sector, &self.encode());
        if let Some(next) = self.next.as_deref() {
            next.write_back(device, self.next_sector as usize);
        }
    }

    /// Which data sector holds the byte at `offset`?
    pub fn byte_to_sector(&self, offset: usize) -> usize {
        assert!(offset < self.num_bytes as usize, "offset past end of file");
        let mut idx = offset / SECTOR_SIZE;
        let mut hdr = self;
        while idx >= hdr.num_sectors as usize {
            idx -= hdr.num_sectors as usize;
            hdr = hdr.next.as_deref().expect("offset within file length");
        }
        hdr.data_sectors[idx] as usize
    }

    fn encode(&self) -> [u8; SECTOR_SIZE] {
        let mut buf = [0u8; SECTOR_SIZE];
        buf[0..4].copy_from_slice(&self.num_bytes.to_le_bytes());
        buf[4..8].copy_from_slice(&self.num_sectors.to_le_bytes());
        buf[8..12].copy_from_slice(&self.next_sector.to_le_bytes());
        for (i, sector) in self.data_sectors.iter().enumerate() {
            let at = 12 + i * 4;
            buf[at..at + 4].copy_from_slice(&sector.to_le_bytes());
        }
        buf
    }

    fn decode(buf: &[u8; SECTOR_SIZE]) -> Self {
        let word = |at: usize| [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]];
        let mut hdr = Self::new();
        hdr.num_bytes = u32::from_le_bytes(word(0));
        hdr.num_sectors = u32::from_le_bytes(word(4));
        hdr.next_sector = i32::from_le_bytes(word(8));
        for i in 0..NUM_DIRECT {
            hdr.data_sectors[i] = i32::from_le_bytes(word(12 + i * 4));
        }
        hdr
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}
