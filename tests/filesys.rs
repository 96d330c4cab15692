//! File-system scenarios against the simulated disk: data round trips,
//! allocation bookkeeping, failure atomicity, and recursive removal.

#![cfg(not(feature = "filesys-stub"))]

use std::sync::Arc;

use teal_os::fs::{
    Directory, FileHeader, FileSystem, FsError, OpenFile, PersistentBitmap, DIRECTORY_SECTOR,
    FREE_MAP_SECTOR, NUM_DIR_ENTRIES,
};
use teal_os::machine::{MemDisk, SectorDevice, NUM_SECTORS, SECTOR_SIZE};
use teal_os::Kernel;

fn disk_image(device: &Arc<MemDisk>) -> Vec<u8> {
    let mut image = Vec::with_capacity(NUM_SECTORS * SECTOR_SIZE);
    let mut buf = [0u8; SECTOR_SIZE];
    for sector in 0..NUM_SECTORS {
        device.read_sector(sector, &mut buf);
        image.extend_from_slice(&buf);
    }
    image
}

fn clear_count(device: &Arc<MemDisk>) -> usize {
    let map_file = OpenFile::new(device.clone(), FREE_MAP_SECTOR);
    PersistentBitmap::fetch_from(&map_file, NUM_SECTORS).count_clear()
}

fn root_directory(device: &Arc<MemDisk>) -> Directory {
    let dir_file = OpenFile::new(device.clone(), DIRECTORY_SECTOR);
    let mut dir = Directory::new(NUM_DIR_ENTRIES);
    dir.fetch_from(&dir_file);
    dir
}

#[test]
fn written_data_survives_reopening() {
    let device = MemDisk::new();
    let mut fs = FileSystem::new(device, true);
    fs.create("/data", 1000, false).unwrap();

    let pattern: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    let id = fs.open("/data").unwrap();
    assert_eq!(fs.write(id, &pattern).unwrap(), 1000);
    fs.close(id).unwrap();

    let id = fs.open("/data").unwrap();
    let mut out = vec![0u8; 1000];
    assert_eq!(fs.read(id, &mut out).unwrap(), 1000);
    fs.close(id).unwrap();
    assert_eq!(out, pattern);
}

#[test]
fn live_files_keep_their_sectors_marked_and_disjoint() {
    let device = MemDisk::new();
    let mut fs = FileSystem::new(device.clone(), true);
    fs.create("/a", 300, false).unwrap();
    fs.create("/b", 500, false).unwrap();

    let root = root_directory(&device);
    let map_file = OpenFile::new(device.clone(), FREE_MAP_SECTOR);
    let map = PersistentBitmap::fetch_from(&map_file, NUM_SECTORS);

    let device_dyn: Arc<dyn SectorDevice> = device.clone();
    let mut seen = Vec::new();
    for name in ["a", "b"] {
        let hdr_sector = root.find(name).unwrap();
        assert!(map.test(hdr_sector));
        let hdr = FileHeader::fetch_from(&device_dyn, hdr_sector);
        for offset in (0..hdr.file_length()).step_by(SECTOR_SIZE) {
            let sector = hdr.byte_to_sector(offset);
            assert!(map.test(sector), "sector {sector} of /{name} not marked");
            assert!(!seen.contains(&sector), "sector {sector} owned twice");
            seen.push(sector);
        }
    }
}

#[test]
fn failed_create_leaves_the_disk_byte_identical() {
    let device = MemDisk::new();
    let mut fs = FileSystem::new(device.clone(), true);
    fs.create("/a", 100, false).unwrap();

    let before = disk_image(&device);
    assert_eq!(
        fs.create("/big", NUM_SECTORS * SECTOR_SIZE, false),
        Err(FsError::NoSpace)
    );
    assert_eq!(disk_image(&device), before);
}

#[test]
fn create_open_remove_round_trip() {
    let device = MemDisk::new();
    let mut kernel = Kernel::new(device, true);

    kernel.filesys.create("/a", 120, true).unwrap();
    kernel.filesys.create("/a/b", 200, false).unwrap();

    let id = kernel.sys_open("/a/b");
    assert!(id >= 1);
    assert_eq!(kernel.sys_close(id), 1);

    kernel.filesys.remove(true, "/a").unwrap();
    assert_eq!(kernel.sys_open("/a/b"), -1);
    assert_eq!(kernel.sys_open("/a"), -1);
}

#[test]
fn recursive_remove_returns_every_bit() {
    let device = MemDisk::new();
    let mut fs = FileSystem::new(device.clone(), true);
    let baseline = clear_count(&device);

    fs.create("/a", 120, true).unwrap();
    fs.create("/a/b", 200, false).unwrap();
    fs.create("/a/c", 0, true).unwrap();
    fs.create("/a/c/d", 3000, false).unwrap();
    assert!(clear_count(&device) < baseline);

    fs.remove(true, "/a").unwrap();
    assert_eq!(clear_count(&device), baseline);
    assert_eq!(fs.list(false, "/").unwrap(), "");
}

#[test]
fn removing_one_file_spares_its_siblings() {
    let device = MemDisk::new();
    let mut fs = FileSystem::new(device, true);
    fs.create("/keep", 400, false).unwrap();
    fs.create("/drop", 400, false).unwrap();

    fs.remove(false, "/drop").unwrap();

    let pattern = vec![7u8; 400];
    let id = fs.open("/keep").unwrap();
    assert_eq!(fs.write(id, &pattern).unwrap(), 400);
    fs.close(id).unwrap();

    let id = fs.open("/keep").unwrap();
    let mut out = vec![0u8; 400];
    assert_eq!(fs.read(id, &mut out).unwrap(), 400);
    assert_eq!(out, pattern);
}

#[test]
fn attach_without_format_sees_the_old_tree() {
    let device = MemDisk::new();
    {
        let mut fs = FileSystem::new(device.clone(), true);
        fs.create("/persist", 64, false).unwrap();
        let id = fs.open("/persist").unwrap();
        fs.write(id, b"still here").unwrap();
        fs.close(id).unwrap();
    }

    let mut fs = FileSystem::new(device, false);
    let id = fs.open("/persist").unwrap();
    let mut out = [0u8; 10];
    assert_eq!(fs.read(id, &mut out).unwrap(), 10);
    assert_eq!(&out, b"still here");
}
