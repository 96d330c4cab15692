//! File-system facade: path resolution, create/open/remove/list, and
//! the per-session descriptor table.
//!
//! The free-map file and the root directory file stay open for the
//! facade's lifetime. Handles for sub-directories are opened per
//! operation and owned by that call alone.

use std::sync::Arc;

use array_macro::array;

use super::bitmap::PersistentBitmap;
use super::directory::Directory;
use super::header::FileHeader;
use super::openfile::OpenFile;
use super::{
    FsError, OpenFileId, DIRECTORY_FILE_SIZE, DIRECTORY_SECTOR, FREE_MAP_FILE_SIZE,
    FREE_MAP_SECTOR, MAX_OPEN_FILES, NUM_DIR_ENTRIES,
};
use crate::machine::disk::{SectorDevice, NUM_SECTORS};

/// Parent directory produced by path resolution. `Root` aliases the
/// always-open root handle; `Sub` is owned by the resolving call.
enum DirHandle {
    Root,
    Sub(OpenFile),
}

pub struct FileSystem {
    device: Arc<dyn SectorDevice>,
    free_map_file: OpenFile,
    directory_file: OpenFile,
    descriptors: [Option<OpenFile>; MAX_OPEN_FILES + 1],
    num_open: usize,
}

impl FileSystem {
    /// Attach to the disk. With `format` the disk is assumed blank: lay
    /// down a fresh bitmap and an empty root directory first.
    pub fn new(device: Arc<dyn SectorDevice>, format: bool) -> Self {
        log::debug!(target: "fs", "initializing the file system");
        if format {
            let mut free_map = PersistentBitmap::new(NUM_SECTORS);
            let directory = Directory::new(NUM_DIR_ENTRIES);
            let mut map_hdr = FileHeader::new();
            let mut dir_hdr = FileHeader::new();

            log::debug!(target: "fs", "formatting the file system");

            // The two header sectors first, so nothing else grabs them.
            free_map.mark(FREE_MAP_SECTOR);
            free_map.mark(DIRECTORY_SECTOR);

            assert!(
                map_hdr.allocate(&mut free_map, FREE_MAP_FILE_SIZE) > 0,
                "no room for the free-map file"
            );
            assert!(
                dir_hdr.allocate(&mut free_map, DIRECTORY_FILE_SIZE) > 0,
                "no room for the root directory"
            );

            // Headers must hit the disk before the files can be opened:
            // opening reads the header back, and the disk still holds
            // garbage.
            map_hdr.write_back(&device, FREE_MAP_SECTOR);
            dir_hdr.write_back(&device, DIRECTORY_SECTOR);

            let free_map_file = OpenFile::new(device.clone(), FREE_MAP_SECTOR);
            let directory_file = OpenFile::new(device.clone(), DIRECTORY_SECTOR);

            free_map.write_back(&free_map_file);
            directory.write_back(&directory_file);

            Self {
                device,
                free_map_file,
                directory_file,
                descriptors: array![_ => None; MAX_OPEN_FILES + 1],
                num_open: 0,
            }
        } else {
            let free_map_file = OpenFile::new(device.clone(), FREE_MAP_SECTOR);
            let directory_file = OpenFile::new(device.clone(), DIRECTORY_SECTOR);
            Self {
                device,
                free_map_file,
                directory_file,
                descriptors: array![_ => None; MAX_OPEN_FILES + 1],
                num_open: 0,
            }
        }
    }

    fn dir_file<'a>(&'a self, handle: &'a DirHandle) -> &'a OpenFile {
        match handle {
            DirHandle::Root => &self.directory_file,
            DirHandle::Sub(file) => file,
        }
    }

    /// Walk the tree from the root, consuming every path component but
    /// the last. Each intermediate component must name a sub-directory.
    /// Yields the parent's handle and an owned copy of the leaf name; a
    /// path with no components does not resolve.
    fn find_parent_dir(&self, path: &str) -> Option<(DirHandle, String)> {
        let mut components = path.split('/').filter(|s| !s.is_empty());
        let mut leaf = components.next()?;
        let mut handle = DirHandle::Root;
        let mut directory = Directory::new(NUM_DIR_ENTRIES);
        directory.fetch_from(self.dir_file(&handle));

        for next in components {
            if !directory.is_dir(leaf) {
                return None;
            }
            let sector = directory.find(leaf)?;
            handle = DirHandle::Sub(OpenFile::new(self.device.clone(), sector));
            directory.fetch_from(self.dir_file(&handle));
            leaf = next;
        }
        Some((handle, leaf.to_string()))
    }

    /// Create a file (or sub-directory) of a fixed size. All the
    /// checks happen against in-memory copies; only a fully successful
    /// create writes anything back, so a failed one leaves the disk
    /// exactly as it was.
    pub fn create(&mut self, path: &str, initial_size: usize, is_dir: bool) -> Result<(), FsError> {
        let size = if is_dir { DIRECTORY_FILE_SIZE } else { initial_size };
        log::debug!(target: "fs", "creating {path} (size {size})");

        let (parent, leaf) = self.find_parent_dir(path).ok_or(FsError::NotFound)?;
        let mut directory = Directory::new(NUM_DIR_ENTRIES);
        directory.fetch_from(self.dir_file(&parent));

        if directory.find(&leaf).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let mut free_map = PersistentBitmap::fetch_from(&self.free_map_file, NUM_SECTORS);
        let sector = free_map.find_and_set().ok_or(FsError::NoSpace)?;
        if !directory.add(&leaf, sector as i32, is_dir) {
            return Err(FsError::DirectoryFull);
        }

        let mut hdr = FileHeader::new();
        let header_bytes = hdr.allocate(&mut free_map, size);
        if header_bytes == 0 {
            return Err(FsError::NoSpace);
        }

        hdr.write_back(&self.device, sector);
        directory.write_back(self.dir_file(&parent));
        free_map.write_back(&self.free_map_file);
        log::debug!(target: "fs", "total header size: {header_bytes} bytes");
        Ok(())
    }

    /// Open a file and hand out the lowest free descriptor id.
    pub fn open(&mut self, path: &str) -> Result<OpenFileId, FsError> {
        if self.num_open == MAX_OPEN_FILES {
            return Err(FsError::TooManyOpenFiles);
        }
        log::debug!(target: "fs", "opening {path}");

        let (parent, leaf) = self.find_parent_dir(path).ok_or(FsError::NotFound)?;
        let mut directory = Directory::new(NUM_DIR_ENTRIES);
        directory.fetch_from(self.dir_file(&parent));
        let sector = directory.find(&leaf).ok_or(FsError::NotFound)?;

        let slot = (1..=MAX_OPEN_FILES)
            .find(|&id| self.descriptors[id].is_none())
            .ok_or(FsError::TooManyOpenFiles)?;
        self.descriptors[slot] = Some(OpenFile::new(self.device.clone(), sector));
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
        Ok(file.read(buf))
    }

    pub fn write(&mut self, id: OpenFileId, buf: &[u8]) -> Result<usize, FsError> {
        let slot = self.slot(id)?;
        let file = self.descriptors[slot]
            .as_mut()
            .ok_or(FsError::BadDescriptor)?;
        Ok(file.write(buf))
    }

    pub fn file(&self, id: OpenFileId) -> Option<&OpenFile> {
        self.descriptors[self.slot(id).ok()?].as_ref()
    }

    pub fn file_mut(&mut self, id: OpenFileId) -> Option<&mut OpenFile> {
        let slot = self.slot(id).ok()?;
        self.descriptors[slot].as_mut()
    }

    fn slot(&self, id: OpenFileId) -> Result<usize, FsError> {
        usize::try_from(id)
            .ok()
            .filter(|&slot| (1..=MAX_OPEN_FILES).contains(&slot))
            .ok_or(FsError::BadDescriptor)
    }

    /// Delete a file. For a directory with `recursive`, every in-use
    /// child goes first, each through its rebuilt absolute path. The
    /// header's data sectors, its chain, its own sector, and the parent
    /// entry are all released, then bitmap and parent hit the disk.
    pub fn remove(&mut self, recursive: bool, path: &str) -> Result<(), FsError> {
        let (parent, leaf) = self.find_parent_dir(path).ok_or(FsError::NotFound)?;
        let mut directory = Directory::new(NUM_DIR_ENTRIES);
        directory.fetch_from(self.dir_file(&parent));
        let sector = directory.find(&leaf).ok_or(FsError::NotFound)?;

        if recursive && directory.is_dir(&leaf) {
            let subdir_file = OpenFile::new(self.device.clone(), sector);
            let mut subdir = Directory::new(NUM_DIR_ENTRIES);
            subdir.fetch_from(&subdir_file);
            let children: Vec<String> =
                subdir.entries().map(|e| e.name().to_string()).collect();
            for child in children {
                let child_path = format!("{}/{}", path.trim_end_matches('/'), child);
                self.remove(recursive, &child_path)?;
            }
        }

        log::debug!(target: "fs", "removing {path}");
        let hdr = FileHeader::fetch_from(&self.device, sector);
        let mut free_map = PersistentBitmap::fetch_from(&self.free_map_file, NUM_SECTORS);
        hdr.deallocate(&mut free_map);
        free_map.clear(sector);
        directory.remove(&leaf);

        free_map.write_back(&self.free_map_file);
        directory.write_back(self.dir_file(&parent));
        Ok(())
    }

    /// Render a directory listing; `"/"` names the root. The leaf of
    /// any other path must be a sub-directory.
    pub fn list(&self, recursive: bool, dir_path: &str) -> Result<String, FsError> {
        let mut directory = Directory::new(NUM_DIR_ENTRIES);
        if dir_path == "/" {
            directory.fetch_from(&self.directory_file);
            return Ok(self.render(&directory, recursive));
        }

        let (parent, leaf) = self.find_parent_dir(dir_path).ok_or(FsError::NotFound)?;
        directory.fetch_from(self.dir_file(&parent));
        let sector = directory.find(&leaf).ok_or(FsError::NotFound)?;
        if !directory.is_dir(&leaf) {
            return Err(FsError::NotADirectory);
        }

        let target_file = OpenFile::new(self.device.clone(), sector);
        let mut target = Directory::new(NUM_DIR_ENTRIES);
        target.fetch_from(&target_file);
        Ok(self.render(&target, recursive))
    }

    fn render(&self, directory: &Directory, recursive: bool) -> String {
        if recursive {
            directory.list_recursive(&self.device)
        } else {
            directory.list()
        }
    }
}
