//! Logical evidence archives
//!
//! A logical archive (AD1, L01) is a tree of named files and folders with
//! their content embedded. Format readers implement [`ArchiveContainer`];
//! [`walk_archive`] flattens the tree in pre-order and reads every file's
//! content into memory for the ingestion bridge.
//!
//! ## Module Structure
//! ```text
//! archive/
//! ├── mod.rs        - ArchiveContainer trait, walk_archive
//! └── ad1/          - AccessData AD1 reader
//! ```
//!
//! The root node stands for the container itself. It is never part of the
//! walk result; its descendants are.

pub mod ad1;

pub use ad1::Ad1Container;

use serde::Serialize;
use tracing::{debug, instrument, trace};

use crate::error::{EngineError, EngineResult};

/// Kind of archive node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveEntryType {
    File,
    Directory,
}

/// One archive node with its content read eagerly.
///
/// For files `content` holds exactly `size` bytes and is `None` only when
/// `size` is zero. Directories never carry content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedFile {
    /// Relative path inside the archive ("docs/readme.txt")
    pub name: String,
    pub entry_type: ArchiveEntryType,
    pub size: u64,
    pub content: Option<Vec<u8>>,
}

impl ArchivedFile {
    pub fn is_dir(&self) -> bool {
        self.entry_type == ArchiveEntryType::Directory
    }
}

/// Read access to a logical archive's tree
pub trait ArchiveContainer {
    /// Handle to one node in the tree
    type Node: Clone;

    /// `None` when the archive has no root entry
    fn root(&mut self) -> EngineResult<Option<Self::Node>>;

    fn name(&mut self, node: &Self::Node) -> EngineResult<String>;

    fn entry_type(&mut self, node: &Self::Node) -> EngineResult<ArchiveEntryType>;

    fn size(&mut self, node: &Self::Node) -> EngineResult<u64>;

    fn child_count(&mut self, node: &Self::Node) -> EngineResult<usize>;

    fn child(&mut self, node: &Self::Node, index: usize) -> EngineResult<Self::Node>;

    /// Read up to `len` bytes of a file's content from its start
    fn read_content(&mut self, node: &Self::Node, len: u64) -> EngineResult<Vec<u8>>;
}

/// Root node of a container, or an error when it has none
pub fn open_root<C: ArchiveContainer + ?Sized>(container: &mut C) -> EngineResult<C::Node> {
    container
        .root()?
        .ok_or_else(|| EngineError::Archive("Container has no root entry".to_string()))
}

/// Every descendant of `root` in pre-order, children in index order.
///
/// File content is read eagerly. Any failure (including short content)
/// aborts the walk; no partial list is returned.
#[instrument(skip_all)]
pub fn walk_archive<C: ArchiveContainer + ?Sized>(
    container: &mut C,
    root: &C::Node,
) -> EngineResult<Vec<ArchivedFile>> {
    let mut entries = Vec::new();
    let mut pending = children_of(container, root)?;
    pending.reverse();

    while let Some(node) = pending.pop() {
        entries.push(read_entry(container, &node)?);

        let mut children = children_of(container, &node)?;
        children.reverse();
        pending.extend(children);
    }

    debug!(entries = entries.len(), "Archive walk complete");
    Ok(entries)
}

/// Open the root and walk the whole container
pub fn extract_all<C: ArchiveContainer + ?Sized>(container: &mut C) -> EngineResult<Vec<ArchivedFile>> {
    let root = open_root(container)?;
    walk_archive(container, &root)
}

fn children_of<C: ArchiveContainer + ?Sized>(container: &mut C, node: &C::Node) -> EngineResult<Vec<C::Node>> {
    let count = container.child_count(node)?;
    (0..count).map(|index| container.child(node, index)).collect()
}

fn read_entry<C: ArchiveContainer + ?Sized>(container: &mut C, node: &C::Node) -> EngineResult<ArchivedFile> {
    let name = container.name(node)?;
    let entry_type = container.entry_type(node)?;
    let size = container.size(node)?;

    let content = match entry_type {
        ArchiveEntryType::File if size > 0 => {
            let data = container.read_content(node, size)?;
            if data.len() as u64 != size {
                return Err(EngineError::ShortRead {
                    name,
                    expected: size,
                    actual: data.len() as u64,
                });
            }
            Some(data)
        }
        _ => None,
    };
    trace!(name = %name, ?entry_type, size, "Archive entry");

    Ok(ArchivedFile {
        name,
        entry_type,
        size,
        content,
    })
}
