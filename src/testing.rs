//! In-memory decoders, collaborators and hooks for unit tests

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::rc::Rc;

use crate::archive::{ArchiveContainer, ArchiveEntryType};
use crate::common::{compute_hash, HashAlgorithm};
use crate::error::{EngineError, EngineResult};
use crate::fs::{
    AttrType, Attribute, FileSystem, FileSystemDecoder, FsEntry, FsInfo, FsType, NameType, Timestamps,
};
use crate::image::ImageReader;
use crate::ingest::{BlobStore, DerivedFileRecord, ImageDb, NewDerivedFile, StoredBlob};
use crate::volume::{PartitionInfo, VolumeDecoder, VolumeSystem, VolumeSystemInfo};
use crate::walker::{FileVisit, WalkHooks, WalkOutcome};

// ---------------------------------------------------------------------------
// File system entries
// ---------------------------------------------------------------------------

/// Allocated regular file with one default data attribute
pub(crate) fn file(addr: u64, name: &str, size: u64) -> FsEntry {
    FsEntry {
        meta_addr: addr,
        name: name.to_string(),
        name_type: NameType::Regular,
        allocated: true,
        size,
        times: Timestamps::default(),
        attributes: vec![Attribute {
            index: 0,
            attr_type: AttrType::DEFAULT,
            name: None,
            resident: false,
            size,
        }],
    }
}

/// Allocated directory
pub(crate) fn dir(addr: u64, name: &str) -> FsEntry {
    FsEntry {
        meta_addr: addr,
        name: name.to_string(),
        name_type: NameType::Directory,
        allocated: true,
        size: 0,
        times: Timestamps::default(),
        attributes: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// TreeFs: directory listings keyed by meta address
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub(crate) struct TreeFs {
    info: FsInfo,
    dirs: HashMap<u64, Vec<FsEntry>>,
    failing: HashSet<u64>,
    unreadable: HashSet<u64>,
    content: HashMap<u64, Vec<u8>>,
    drops: Option<Rc<Cell<usize>>>,
}

impl TreeFs {
    /// Ext4-flavoured tree rooted at meta address 2
    pub(crate) fn new(dirs: Vec<(u64, Vec<FsEntry>)>) -> Self {
        Self {
            info: FsInfo {
                fs_type: FsType::Ext4,
                offset: 0,
                block_size: 4096,
                block_count: 1024,
                root_addr: 2,
                first_addr: 1,
                last_addr: 10_000,
            },
            dirs: dirs.into_iter().collect(),
            failing: HashSet::new(),
            unreadable: HashSet::new(),
            content: HashMap::new(),
            drops: None,
        }
    }

    /// Listing `addr` fails with a decoder error
    pub(crate) fn failing_dir(mut self, addr: u64) -> Self {
        self.failing.insert(addr);
        self
    }

    /// Listing `addr` fails with an image I/O error
    pub(crate) fn unreadable_dir(mut self, addr: u64) -> Self {
        self.unreadable.insert(addr);
        self
    }

    pub(crate) fn with_content(mut self, addr: u64, data: &[u8]) -> Self {
        self.content.insert(addr, data.to_vec());
        self
    }

    pub(crate) fn with_fs_type(mut self, fs_type: FsType) -> Self {
        self.info.fs_type = fs_type;
        self
    }

    /// Mark every entry pointing at `addr`
    pub(crate) fn set_allocated(&mut self, addr: u64, allocated: bool) {
        for entries in self.dirs.values_mut() {
            for entry in entries.iter_mut().filter(|e| e.meta_addr == addr) {
                entry.allocated = allocated;
            }
        }
    }
}

impl FileSystem for TreeFs {
    fn info(&self) -> &FsInfo {
        &self.info
    }

    fn read_dir(&self, dir_addr: u64) -> EngineResult<Vec<FsEntry>> {
        if self.failing.contains(&dir_addr) {
            return Err(EngineError::decoder("tree", format!("corrupt directory {}", dir_addr)));
        }
        if self.unreadable.contains(&dir_addr) {
            return Err(EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("directory {} past end of image", dir_addr),
            )));
        }
        Ok(self.dirs.get(&dir_addr).cloned().unwrap_or_default())
    }

    fn read_attribute(&self, entry: &FsEntry, attr: &Attribute) -> EngineResult<Vec<u8>> {
        Ok(self
            .content
            .get(&entry.meta_addr)
            .cloned()
            .unwrap_or_else(|| vec![0; attr.size as usize]))
    }
}

impl Drop for TreeFs {
    fn drop(&mut self) {
        if let Some(drops) = &self.drops {
            drops.set(drops.get() + 1);
        }
    }
}

/// Opens a [`TreeFs`] at each registered byte offset
pub(crate) struct TreeFsDecoder {
    trees: Vec<(u64, TreeFs)>,
    opens: Rc<Cell<usize>>,
    drops: Rc<Cell<usize>>,
}

impl TreeFsDecoder {
    pub(crate) fn new() -> Self {
        Self {
            trees: Vec::new(),
            opens: Rc::new(Cell::new(0)),
            drops: Rc::new(Cell::new(0)),
        }
    }

    pub(crate) fn with_fs(mut self, offset: u64, tree: TreeFs) -> Self {
        self.trees.push((offset, tree));
        self
    }

    pub(crate) fn opens(&self) -> usize {
        self.opens.get()
    }

    pub(crate) fn drops(&self) -> usize {
        self.drops.get()
    }
}

impl FileSystemDecoder for TreeFsDecoder {
    fn name(&self) -> &str {
        "tree"
    }

    fn open<'i>(&self, _image: &'i dyn ImageReader, offset: u64) -> EngineResult<Option<Box<dyn FileSystem + 'i>>> {
        let Some((_, tree)) = self.trees.iter().find(|(at, _)| *at == offset) else {
            return Ok(None);
        };
        let mut opened = tree.clone();
        opened.info.offset = offset;
        opened.drops = Some(Rc::clone(&self.drops));
        self.opens.set(self.opens.get() + 1);
        Ok(Some(Box::new(opened)))
    }
}

// ---------------------------------------------------------------------------
// MockVolumes: a fixed partition list at any offset
// ---------------------------------------------------------------------------

pub(crate) struct MockVolumes {
    layout: Option<(u32, Vec<PartitionInfo>)>,
    failing: bool,
    drops: Rc<Cell<usize>>,
}

impl MockVolumes {
    /// No volume system anywhere
    pub(crate) fn none() -> Self {
        Self {
            layout: None,
            failing: false,
            drops: Rc::new(Cell::new(0)),
        }
    }

    pub(crate) fn with_partitions(block_size: u32, partitions: Vec<PartitionInfo>) -> Self {
        Self {
            layout: Some((block_size, partitions)),
            failing: false,
            drops: Rc::new(Cell::new(0)),
        }
    }

    /// Every probe fails with a decoder error
    pub(crate) fn failing() -> Self {
        Self {
            failing: true,
            ..Self::none()
        }
    }

    pub(crate) fn drops(&self) -> usize {
        self.drops.get()
    }
}

struct MockVolumeSystem {
    info: VolumeSystemInfo,
    partitions: Vec<PartitionInfo>,
    drops: Rc<Cell<usize>>,
}

impl VolumeSystem for MockVolumeSystem {
    fn info(&self) -> &VolumeSystemInfo {
        &self.info
    }

    fn partitions(&self) -> EngineResult<Vec<PartitionInfo>> {
        Ok(self.partitions.clone())
    }
}

impl Drop for MockVolumeSystem {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

impl VolumeDecoder for MockVolumes {
    fn name(&self) -> &str {
        "mock"
    }

    fn open<'i>(&self, _image: &'i dyn ImageReader, offset: u64) -> EngineResult<Option<Box<dyn VolumeSystem + 'i>>> {
        if self.failing {
            return Err(EngineError::decoder("mock", format!("unreadable partition table at {}", offset)));
        }
        let Some((block_size, partitions)) = &self.layout else {
            return Ok(None);
        };
        Ok(Some(Box::new(MockVolumeSystem {
            info: VolumeSystemInfo {
                vs_type: "mock".to_string(),
                offset,
                block_size: *block_size,
            },
            partitions: partitions.clone(),
            drops: Rc::clone(&self.drops),
        })))
    }
}

// ---------------------------------------------------------------------------
// Recorder: remembers every visited entry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct Recorder {
    pub paths: Vec<String>,
    pub parents: Vec<u64>,
    pub parent_paths: Vec<String>,
    stop_after: Option<usize>,
}

impl Recorder {
    /// Record `n` entries, returning `Stop` on the last one
    pub(crate) fn stop_after(n: usize) -> Self {
        Self {
            stop_after: Some(n),
            ..Self::default()
        }
    }
}

impl WalkHooks for Recorder {
    fn process_file(&mut self, visit: &FileVisit<'_>) -> WalkOutcome {
        self.paths.push(visit.full_path());
        self.parents.push(visit.parent_addr);
        self.parent_paths.push(visit.path.to_string());
        match self.stop_after {
            Some(n) if self.paths.len() >= n => WalkOutcome::Stop,
            _ => WalkOutcome::Ok,
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryArchive: node 0 is the root
// ---------------------------------------------------------------------------

struct MemoryNode {
    name: String,
    entry_type: ArchiveEntryType,
    content: Vec<u8>,
    declared_size: u64,
    children: Vec<usize>,
    fail: bool,
}

pub(crate) struct MemoryArchive {
    nodes: Vec<MemoryNode>,
    has_root: bool,
}

impl MemoryArchive {
    pub(crate) fn new() -> Self {
        Self {
            nodes: vec![MemoryNode {
                name: String::new(),
                entry_type: ArchiveEntryType::Directory,
                content: Vec::new(),
                declared_size: 0,
                children: Vec::new(),
                fail: false,
            }],
            has_root: true,
        }
    }

    pub(crate) fn rootless() -> Self {
        Self {
            has_root: false,
            ..Self::new()
        }
    }

    fn push(&mut self, parent: usize, name: &str, entry_type: ArchiveEntryType, content: &[u8]) -> usize {
        let index = self.nodes.len();
        self.nodes.push(MemoryNode {
            name: name.to_string(),
            entry_type,
            content: content.to_vec(),
            declared_size: content.len() as u64,
            children: Vec::new(),
            fail: false,
        });
        self.nodes[parent].children.push(index);
        index
    }

    pub(crate) fn add_dir(&mut self, parent: usize, name: &str) -> usize {
        self.push(parent, name, ArchiveEntryType::Directory, &[])
    }

    pub(crate) fn add_file(&mut self, parent: usize, name: &str, content: &[u8]) -> usize {
        self.push(parent, name, ArchiveEntryType::File, content)
    }

    pub(crate) fn set_declared_size(&mut self, node: usize, size: u64) {
        self.nodes[node].declared_size = size;
    }

    /// Reading the node's name fails
    pub(crate) fn fail_node(&mut self, node: usize) {
        self.nodes[node].fail = true;
    }

    fn node(&self, node: usize) -> EngineResult<&MemoryNode> {
        self.nodes
            .get(node)
            .ok_or_else(|| EngineError::Archive(format!("no node {}", node)))
    }
}

impl ArchiveContainer for MemoryArchive {
    type Node = usize;

    fn root(&mut self) -> EngineResult<Option<usize>> {
        Ok(self.has_root.then_some(0))
    }

    fn name(&mut self, node: &usize) -> EngineResult<String> {
        let n = self.node(*node)?;
        if n.fail {
            return Err(EngineError::Archive(format!("unreadable node {}", node)));
        }
        Ok(n.name.clone())
    }

    fn entry_type(&mut self, node: &usize) -> EngineResult<ArchiveEntryType> {
        Ok(self.node(*node)?.entry_type)
    }

    fn size(&mut self, node: &usize) -> EngineResult<u64> {
        Ok(self.node(*node)?.declared_size)
    }

    fn child_count(&mut self, node: &usize) -> EngineResult<usize> {
        Ok(self.node(*node)?.children.len())
    }

    fn child(&mut self, node: &usize, index: usize) -> EngineResult<usize> {
        self.node(*node)?
            .children
            .get(index)
            .copied()
            .ok_or_else(|| EngineError::Archive(format!("node {} has no child {}", node, index)))
    }

    fn read_content(&mut self, node: &usize, len: u64) -> EngineResult<Vec<u8>> {
        let content = &self.node(*node)?.content;
        let len = (len as usize).min(content.len());
        Ok(content[..len].to_vec())
    }
}

// ---------------------------------------------------------------------------
// Ingestion collaborators
// ---------------------------------------------------------------------------

/// Image database kept in memory; can reject records by name
#[derive(Default)]
pub(crate) struct MemoryDb {
    records: RefCell<Vec<DerivedFileRecord>>,
    rejected: HashSet<String>,
}

impl MemoryDb {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reject_name(mut self, name: &str) -> Self {
        self.rejected.insert(name.to_string());
        self
    }

    pub(crate) fn records(&self) -> Vec<DerivedFileRecord> {
        self.records.borrow().clone()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.records.borrow().iter().map(|r| r.name.clone()).collect()
    }
}

impl ImageDb for MemoryDb {
    fn add_image_info(&self, _format: &str, _sector_size: u32) -> EngineResult<()> {
        Ok(())
    }

    fn add_image_name(&self, _name: &str) -> EngineResult<()> {
        Ok(())
    }

    fn add_derived_file(&self, file: &NewDerivedFile) -> EngineResult<u64> {
        if self.rejected.contains(&file.name) {
            return Err(EngineError::Persistence(format!("rejected {}", file.name)));
        }
        let mut records = self.records.borrow_mut();
        let file_id = records.len() as u64 + 1;
        records.push(DerivedFileRecord {
            file_id,
            parent_id: file.parent_id,
            name: file.name.clone(),
            full_path: file.full_path.clone(),
            is_directory: file.is_directory,
            size: file.size,
            ctime: file.ctime,
            crtime: file.crtime,
            atime: file.atime,
            mtime: file.mtime,
            details: file.details.clone(),
            status: "ready".to_string(),
        });
        Ok(file_id)
    }
}

/// Blob store kept in memory; can fail every store
#[derive(Default)]
pub(crate) struct MemoryBlobs {
    blobs: RefCell<HashMap<u64, Vec<u8>>>,
    fail: bool,
}

impl MemoryBlobs {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn stored(&self, file_id: u64) -> Option<Vec<u8>> {
        self.blobs.borrow().get(&file_id).cloned()
    }

    pub(crate) fn count(&self) -> usize {
        self.blobs.borrow().len()
    }
}

impl BlobStore for MemoryBlobs {
    fn store(&self, file_id: u64, content: &mut dyn Read) -> EngineResult<StoredBlob> {
        if self.fail {
            return Err(EngineError::Storage {
                file_id,
                reason: "store unavailable".to_string(),
            });
        }
        let mut data = Vec::new();
        content
            .read_to_end(&mut data)
            .map_err(|e| EngineError::Storage {
                file_id,
                reason: e.to_string(),
            })?;
        let blob = StoredBlob {
            file_id,
            size: data.len() as u64,
            digest: compute_hash(&data, HashAlgorithm::Sha256),
            algorithm: HashAlgorithm::Sha256,
        };
        self.blobs.borrow_mut().insert(file_id, data);
        Ok(blob)
    }
}
