// Entry and attribute classification for building inclusion policy in hooks.
// Pure functions over decoder output; the walker itself never filters on them.

use crate::fs::{AttrType, Attribute, FsEntry, FsInfo, NameType};

/// Highest NTFS MFT entry number reserved for metadata files
const NTFS_RESERVED_ENTRIES: u64 = 20;

/// Reserved ext inode range (root directory 2 excluded)
const EXT_FIRST_RESERVED: u64 = 1;
const EXT_LAST_RESERVED: u64 = 10;
const EXT_ROOT_INODE: u64 = 2;

pub fn is_dir(entry: &FsEntry) -> bool {
    entry.name_type == NameType::Directory
}

pub fn is_file(entry: &FsEntry) -> bool {
    entry.name_type == NameType::Regular
}

/// `.` or `..`
pub fn is_dot_dir(entry: &FsEntry) -> bool {
    entry.name == "." || entry.name == ".."
}

/// Attribute type holding an entry's primary data
pub fn default_attr_type(fs: &FsInfo, entry: &FsEntry) -> AttrType {
    if fs.fs_type.is_ntfs() {
        if is_dir(entry) {
            AttrType::NTFS_INDEX_ROOT
        } else {
            AttrType::NTFS_DATA
        }
    } else {
        AttrType::DEFAULT
    }
}

pub fn is_default_attr(fs: &FsInfo, entry: &FsEntry, attr: &Attribute) -> bool {
    attr.attr_type == default_attr_type(fs, entry)
}

/// Content lives in separately addressed blocks
pub fn is_non_resident(attr: &Attribute) -> bool {
    !attr.resident
}

/// First unnamed default attribute, falling back to any default-typed one
pub fn default_attribute<'e>(fs: &FsInfo, entry: &'e FsEntry) -> Option<&'e Attribute> {
    let mut defaults = entry.attributes.iter().filter(|a| is_default_attr(fs, entry, a));
    let first = defaults.next()?;
    if first.name.is_none() {
        return Some(first);
    }
    defaults.find(|a| a.name.is_none()).or(Some(first))
}

/// NTFS metadata files ($MFT, $Bitmap, ...)
pub fn is_ntfs_system_file(fs: &FsInfo, entry: &FsEntry) -> bool {
    fs.fs_type.is_ntfs() && entry.name.starts_with('$') && entry.meta_addr < NTFS_RESERVED_ENTRIES
}

/// FAT virtual files ($MBR, $FAT1, $FAT2) which sit just below the last address
pub fn is_fat_system_file(fs: &FsInfo, entry: &FsEntry) -> bool {
    if !fs.fs_type.is_fat() || fs.last_addr < 3 {
        return false;
    }
    let mbr = fs.last_addr - 3;
    (mbr..fs.last_addr).contains(&entry.meta_addr)
}

/// ext reserved inodes (bad blocks, journal, resize, ...)
pub fn is_ext_system_file(fs: &FsInfo, entry: &FsEntry) -> bool {
    fs.fs_type.is_ext()
        && (EXT_FIRST_RESERVED..=EXT_LAST_RESERVED).contains(&entry.meta_addr)
        && entry.meta_addr != EXT_ROOT_INODE
}

pub fn is_system_file(fs: &FsInfo, entry: &FsEntry) -> bool {
    is_ntfs_system_file(fs, entry) || is_fat_system_file(fs, entry) || is_ext_system_file(fs, entry)
}
