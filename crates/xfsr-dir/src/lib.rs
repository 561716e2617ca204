#![forbid(unsafe_code)]
//! Directory lookup and iteration.
//!
//! XFS stores a directory in one of four encodings, chosen by size:
//!
//! | Format | Where the entries live |
//! |--------|------------------------|
//! | Local (shortform) | packed in the inode literal area |
//! | Block | one directory block holding data, hash index and tail |
//! | Leaf | data blocks plus one hash-sorted leaf block |
//! | Node | data blocks plus a da-node index over several leaf blocks |
//!
//! [`DirReader`] classifies a directory inode, then dispatches lookups and
//! cursor-driven iteration to the module for its format. Directory blocks
//! are fetched through the extent mapper and a shared [`DirBlockCache`].
//!
//! Missing names and the end of a listing are `Ok(None)`. Errors are
//! reserved for structural corruption and I/O.

mod block;
pub mod cache;
mod leaf;
mod node;
mod shortform;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::debug;
use xfsr_block::BlockDevice;
use xfsr_error::{Result, XfsError};
use xfsr_extent::ExtentMapper;
use xfsr_ondisk::{
    DataEntry, DataKind, DataSlot, DinodeFormat, XfsDinode, XfsGeometry, parse_data_header,
    parse_data_slot,
};
use xfsr_types::{FileBlock, InodeNumber, ParseError, XFS_MAXNAMELEN};

pub use cache::{CacheStats, DEFAULT_DIR_CACHE_SLOTS, DirBlockCache};
pub use xfsr_ondisk::XfsFileType as EntryType;

/// On-disk directory encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirFormat {
    Local,
    Block,
    Leaf,
    Node,
}

/// Opaque resume point for [`DirReader::next_entry`]. Start from
/// [`DirCursor::START`]; a returned cursor resumes after the entry it came
/// with.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct DirCursor(pub u64);

impl DirCursor {
    pub const START: Self = Self(0);
}

/// One directory entry as returned by iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub ino: InodeNumber,
    pub name: Vec<u8>,
    /// `Unknown` on volumes without the ftype feature.
    pub entry_type: EntryType,
}

impl DirEntry {
    #[must_use]
    pub fn name_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    fn from_data(entry: &DataEntry<'_>) -> Self {
        Self {
            ino: InodeNumber(entry.ino),
            name: entry.name.to_vec(),
            entry_type: entry_type(entry.ftype),
        }
    }
}

pub(crate) fn entry_type(ftype: Option<u8>) -> EntryType {
    ftype.map_or(EntryType::Unknown, EntryType::from_ftype)
}

pub(crate) fn dir_error(block: u64, detail: impl Into<String>) -> XfsError {
    XfsError::CorruptDirectory {
        block,
        detail: detail.into(),
    }
}

pub(crate) fn parse_error(block: FileBlock, dir: &XfsDinode, e: &ParseError) -> XfsError {
    dir_error(block.0, format!("directory inode {}: {e}", dir.ino))
}

/// Walk the packed entries of `block[start..end]`, handing each live entry
/// to `visit` until it returns `Some`.
pub(crate) fn walk_data<T>(
    dir: &XfsDinode,
    fb: FileBlock,
    block: &[u8],
    (start, end): (usize, usize),
    has_ftype: bool,
    mut visit: impl FnMut(&DataEntry<'_>) -> Option<T>,
) -> Result<Option<T>> {
    let mut off = start;
    while off < end {
        let slot = parse_data_slot(block, off, end, has_ftype)
            .map_err(|e| parse_error(fb, dir, &e))?;
        if let DataSlot::Entry(entry) = &slot {
            if let Some(found) = visit(entry) {
                return Ok(Some(found));
            }
        }
        off += slot.size();
    }
    Ok(None)
}

/// Reads directories of one mounted volume.
pub struct DirReader<'a> {
    dev: &'a dyn BlockDevice,
    geo: &'a XfsGeometry,
    cache: &'a Mutex<DirBlockCache>,
}

impl<'a> DirReader<'a> {
    pub fn new(
        dev: &'a dyn BlockDevice,
        geo: &'a XfsGeometry,
        cache: &'a Mutex<DirBlockCache>,
    ) -> Self {
        Self { dev, geo, cache }
    }

    fn mapper(&self) -> ExtentMapper<'a> {
        ExtentMapper::new(self.dev, self.geo)
    }

    /// Decide which encoding `dir` uses.
    pub fn classify(&self, dir: &XfsDinode) -> Result<DirFormat> {
        if !dir.is_dir() {
            return Err(XfsError::NotDirectory);
        }
        let format = match dir.format {
            DinodeFormat::Local => DirFormat::Local,
            DinodeFormat::Extents | DinodeFormat::Btree => {
                let fsbs = u64::from(self.geo.dir_blk_fsbs());
                if dir.nextents <= 1 {
                    DirFormat::Block
                } else {
                    let last = self.mapper().last_extent(dir)?.ok_or_else(|| {
                        dir_error(0, format!("directory inode {} has no extents", dir.ino))
                    })?;
                    if last.end() <= fsbs {
                        DirFormat::Block
                    } else if last.end() == self.geo.dir_leaf_offset().0 + fsbs {
                        DirFormat::Leaf
                    } else {
                        DirFormat::Node
                    }
                }
            }
            other => {
                return Err(XfsError::CorruptInode {
                    ino: dir.ino.0,
                    detail: format!("{other:?} fork on a directory"),
                });
            }
        };
        debug!(ino = dir.ino.0, ?format, "dir_classify");
        Ok(format)
    }

    /// Find `name` in `dir`.
    pub fn lookup(&self, dir: &XfsDinode, name: &[u8]) -> Result<Option<(InodeNumber, EntryType)>> {
        if name.len() > XFS_MAXNAMELEN {
            return Err(XfsError::NameTooLong);
        }
        if name.is_empty() {
            return Ok(None);
        }
        match self.classify(dir)? {
            DirFormat::Local => shortform::lookup(self, dir, name),
            DirFormat::Block => block::lookup(self, dir, name),
            DirFormat::Leaf => leaf::lookup(self, dir, name),
            DirFormat::Node => node::lookup(self, dir, name),
        }
    }

    /// The entry at `cursor` and the cursor of the one after it.
    pub fn next_entry(
        &self,
        dir: &XfsDinode,
        cursor: DirCursor,
    ) -> Result<Option<(DirEntry, DirCursor)>> {
        let format = self.classify(dir)?;
        self.next_entry_as(format, dir, cursor)
    }

    /// [`next_entry`](Self::next_entry) for a `format` already obtained
    /// from [`classify`](Self::classify), so listings classify once.
    pub fn next_entry_as(
        &self,
        format: DirFormat,
        dir: &XfsDinode,
        cursor: DirCursor,
    ) -> Result<Option<(DirEntry, DirCursor)>> {
        match format {
            DirFormat::Local => shortform::next(self, dir, cursor),
            DirFormat::Block => block::next(self, dir, cursor),
            DirFormat::Leaf => leaf::next(self, dir, cursor),
            DirFormat::Node => node::next(self, dir, cursor),
        }
    }

    /// Every entry of `dir`, in iteration order.
    pub fn read_all(&self, dir: &XfsDinode) -> Result<Vec<DirEntry>> {
        let format = self.classify(dir)?;
        let mut out = Vec::new();
        let mut cursor = DirCursor::START;
        while let Some((entry, next)) = self.next_entry_as(format, dir, cursor)? {
            out.push(entry);
            cursor = next;
        }
        Ok(out)
    }

    /// Directory block starting at file block `fb`. Blocks within one
    /// extent come from the cache; blocks split across extents are
    /// assembled piecewise and not cached.
    pub(crate) fn read_dir_block(&self, dir: &XfsDinode, fb: FileBlock) -> Result<Arc<[u8]>> {
        let unmapped = |e: XfsError| match e {
            XfsError::ExtentNotFound { .. } => dir_error(
                fb.0,
                format!("directory inode {}: block is not mapped", dir.ino),
            ),
            other => other,
        };
        let fsbs = self.geo.dir_blk_fsbs();
        let mapper = self.mapper();
        let rec = mapper.find_extent(dir, fb).map_err(unmapped)?;
        if rec.end() >= fb.0 + u64::from(fsbs) {
            let start = mapper.mapping_for(&rec, fb)?.physical;
            if start.0 + u64::from(fsbs) > self.dev.block_count() {
                return Err(dir_error(fb.0, "directory block past the device end"));
            }
            return self.cache.lock().get(self.dev, start, fsbs);
        }

        let mut out = Vec::with_capacity(usize::try_from(self.geo.dir_block_size).unwrap_or(0));
        for k in 0..u64::from(fsbs) {
            let m = mapper
                .map_block(dir, FileBlock(fb.0 + k))
                .map_err(unmapped)?;
            out.extend_from_slice(self.dev.read_block(m.physical)?.as_slice());
        }
        Ok(out.into())
    }

    /// Resolve a leaf address to the data entry it points at.
    pub(crate) fn data_entry(&self, dir: &XfsDinode, address: u32) -> Result<DirEntry> {
        let (db, off) = self.geo.dataptr_to_db_off(address);
        let fb = self.geo.db_to_file_block(db);
        if fb >= self.geo.dir_leaf_offset() {
            return Err(dir_error(
                fb.0,
                format!("leaf address {address:#x} beyond the data region"),
            ));
        }
        let block = self.read_dir_block(dir, fb)?;
        let hdr = parse_data_header(&block).map_err(|e| parse_error(fb, dir, &e))?;
        if hdr.kind != DataKind::Data || off < hdr.len {
            return Err(dir_error(
                fb.0,
                format!("leaf address {address:#x} does not point at a data entry"),
            ));
        }
        match parse_data_slot(&block, off, block.len(), self.geo.has_ftype)
            .map_err(|e| parse_error(fb, dir, &e))?
        {
            DataSlot::Entry(entry) => Ok(DirEntry::from_data(&entry)),
            DataSlot::Free(_) => Err(dir_error(
                fb.0,
                format!("leaf address {address:#x} points at free space"),
            )),
        }
    }
}
