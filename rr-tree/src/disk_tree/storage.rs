//! Disk storage layer for the data tree.
//!
//! Handles direct disk I/O for individual pages. Each `read_page` call is
//! exactly one seek and one read; nothing is preloaded.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use super::constants::PAGE_SIZE;
use super::node::RRDiskNode;
use super::types::{FileHeader, FreePage, PageId, PageWithChecksum};
use crate::errors::{RRTreeError, RRTreeResult};

/// Handles reading/writing individual pages to disk.
pub struct Storage {
    file: RwLock<File>,
    path: PathBuf,
    page_size: usize,
}

impl Storage {
    /// Create a new storage file, truncating any existing one
    pub fn create(path: &Path) -> RRTreeResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            file: RwLock::new(file),
            path: path.to_path_buf(),
            page_size: PAGE_SIZE,
        })
    }

    /// Open an existing storage file
    pub fn open(path: &Path) -> RRTreeResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(Self {
            file: RwLock::new(file),
            path: path.to_path_buf(),
            page_size: PAGE_SIZE,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_header(&self) -> RRTreeResult<FileHeader> {
        let buffer = self.read_raw(0)?;
        bincode::serde::decode_from_slice(&buffer, bincode::config::legacy())
            .map(|(header, _)| header)
            .map_err(|e| RRTreeError::Serialization(e.to_string()))
    }

    pub fn write_header(&self, header: &FileHeader) -> RRTreeResult<()> {
        let bytes = bincode::serde::encode_to_vec(header, bincode::config::legacy())
            .map_err(|e| RRTreeError::Serialization(e.to_string()))?;
        self.write_raw(0, bytes)
    }

    /// Read a single node, verifying its checksum.
    pub fn read_page(&self, page_id: PageId) -> RRTreeResult<RRDiskNode> {
        Self::check_node_page(page_id)?;
        let buffer = self.read_raw(page_id)?;

        let page: PageWithChecksum =
            bincode::serde::decode_from_slice(&buffer, bincode::config::legacy())
                .map(|(page, _)| page)
                .map_err(|e| RRTreeError::Serialization(e.to_string()))?;

        page.into_node()
    }

    /// Write a single node with its checksum.
    pub fn write_page(&self, page_id: PageId, node: &RRDiskNode) -> RRTreeResult<()> {
        Self::check_node_page(page_id)?;

        let page = PageWithChecksum::new(node.clone())?;
        let bytes = bincode::serde::encode_to_vec(&page, bincode::config::legacy())
            .map_err(|e| RRTreeError::Serialization(e.to_string()))?;

        if bytes.len() > self.page_size {
            return Err(RRTreeError::Serialization(format!(
                "node too large: {} bytes (max {})",
                bytes.len(),
                self.page_size
            )));
        }

        self.write_raw(page_id, bytes)
    }

    pub fn read_free_page(&self, page_id: PageId) -> RRTreeResult<FreePage> {
        Self::check_node_page(page_id)?;
        let buffer = self.read_raw(page_id)?;
        bincode::serde::decode_from_slice(&buffer, bincode::config::legacy())
            .map(|(free, _)| free)
            .map_err(|e| RRTreeError::Serialization(e.to_string()))
    }

    pub fn write_free_page(&self, page_id: PageId, free_page: &FreePage) -> RRTreeResult<()> {
        Self::check_node_page(page_id)?;
        let bytes = bincode::serde::encode_to_vec(free_page, bincode::config::legacy())
            .map_err(|e| RRTreeError::Serialization(e.to_string()))?;
        self.write_raw(page_id, bytes)
    }

    /// Sync file to disk
    pub fn sync(&self) -> RRTreeResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    fn check_node_page(page_id: PageId) -> RRTreeResult<()> {
        if page_id == 0 {
            return Err(RRTreeError::InvalidOperation(
                "page 0 is reserved for the header".into(),
            ));
        }
        Ok(())
    }

    fn read_raw(&self, page_id: PageId) -> RRTreeResult<Vec<u8>> {
        let offset = page_id * self.page_size as u64;
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; self.page_size];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn write_raw(&self, page_id: PageId, mut bytes: Vec<u8>) -> RRTreeResult<()> {
        bytes.resize(self.page_size, 0);
        let offset = page_id * self.page_size as u64;
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounding_box::BoundingBox;
    use crate::disk_tree::types::ChildEntry;
    use crate::operation::DataObject;
    use tempfile::tempdir;

    #[test]
    fn test_storage_create_and_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rrtree");
        Storage::create(&path).unwrap();
        assert!(path.exists());
        let storage = Storage::open(&path).unwrap();
        assert_eq!(storage.path(), path.as_path());
    }

    #[test]
    fn test_storage_header_read_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rrtree");
        let storage = Storage::create(&path).unwrap();

        let mut header = FileHeader::new(4, 10);
        header.root_page = 3;
        header.next_page_id = 5;
        header.entry_count = 100;
        header.height = 2;

        storage.write_header(&header).unwrap();
        assert_eq!(storage.read_header().unwrap(), header);
    }

    #[test]
    fn test_storage_page_write_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rrtree");
        let storage = Storage::create(&path).unwrap();

        let leaf = RRDiskNode::new_leaf(vec![DataObject::new(7, BoundingBox::new(0.0, 0.0, 1.0, 1.0))]);
        let internal = RRDiskNode::new_internal(1, vec![ChildEntry::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 1)]);

        storage.write_page(1, &leaf).unwrap();
        storage.write_page(2, &internal).unwrap();

        assert_eq!(storage.read_page(1).unwrap(), leaf);
        assert_eq!(storage.read_page(2).unwrap(), internal);
    }

    #[test]
    fn test_storage_page_zero_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rrtree");
        let storage = Storage::create(&path).unwrap();

        let node = RRDiskNode::new_leaf(vec![]);
        assert!(storage.write_page(0, &node).is_err());
        assert!(storage.read_page(0).is_err());
    }

    #[test]
    fn test_storage_free_page_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rrtree");
        let storage = Storage::create(&path).unwrap();

        storage.write_free_page(4, &FreePage { next_free: 9 }).unwrap();
        assert_eq!(storage.read_free_page(4).unwrap().next_free, 9);
    }

    #[test]
    fn test_storage_oversized_node_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rrtree");
        let storage = Storage::create(&path).unwrap();

        let objects = (0..1000)
            .map(|i| DataObject::new(i, BoundingBox::point(i as f64, i as f64)))
            .collect();
        let result = storage.write_page(1, &RRDiskNode::new_leaf(objects));
        assert!(matches!(result, Err(RRTreeError::Serialization(_))));
    }
}
