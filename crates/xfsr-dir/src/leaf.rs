//! Leaf directories: data blocks indexed by a single hash-sorted leaf
//! block at the start of the leaf region. Also holds the hash-run scan
//! shared with node directories.

use crate::{DirCursor, DirEntry, DirReader, EntryType, dir_error, parse_error};
use tracing::trace;
use xfsr_error::Result;
use xfsr_ondisk::{LeafEntry, LeafHeader, LeafKind, XfsDinode, parse_leaf_header, xfs_da_hashname};
use xfsr_types::{FileBlock, InodeNumber};

/// Outcome of scanning one leaf for a hash run.
pub(crate) enum Run {
    Found(InodeNumber, EntryType),
    /// The run ended inside this leaf.
    Missing,
    /// The run reached the last entry; it may continue in the next leaf.
    ReachedEnd,
}

/// Header and entries of the leaf block at `fb`, which must be of `kind`.
pub(crate) fn read_leaf(
    reader: &DirReader<'_>,
    dir: &XfsDinode,
    fb: FileBlock,
    kind: LeafKind,
) -> Result<(LeafHeader, Vec<LeafEntry>)> {
    let block = reader.read_dir_block(dir, fb)?;
    let hdr = parse_leaf_header(&block).map_err(|e| parse_error(fb, dir, &e))?;
    if hdr.kind != kind {
        return Err(dir_error(
            fb.0,
            format!("directory inode {}: {:?} block where {kind:?} was expected", dir.ino, hdr.kind),
        ));
    }
    let entries = hdr.entries(&block).map_err(|e| parse_error(fb, dir, &e))?;
    Ok((hdr, entries))
}

/// Look for `name` among the entries hashing to `hash`. Stale entries are
/// skipped; every live one is resolved through its data block.
pub(crate) fn scan_run(
    reader: &DirReader<'_>,
    dir: &XfsDinode,
    entries: &[LeafEntry],
    hash: u32,
    name: &[u8],
) -> Result<Run> {
    let start = entries.partition_point(|e| e.hashval < hash);
    for e in &entries[start..] {
        if e.hashval != hash {
            return Ok(Run::Missing);
        }
        if e.is_stale() {
            continue;
        }
        let entry = reader.data_entry(dir, e.address)?;
        trace!(ino = dir.ino.0, hash, address = e.address, "dir_hash_probe");
        if entry.name == name {
            return Ok(Run::Found(entry.ino, entry.entry_type));
        }
    }
    Ok(Run::ReachedEnd)
}

pub(crate) fn lookup(
    reader: &DirReader<'_>,
    dir: &XfsDinode,
    name: &[u8],
) -> Result<Option<(InodeNumber, EntryType)>> {
    let (_, entries) = read_leaf(reader, dir, reader.geo.dir_leaf_offset(), LeafKind::Leaf1)?;
    let hash = xfs_da_hashname(name);
    trace!(ino = dir.ino.0, hash, "dir_leaf_lookup");
    match scan_run(reader, dir, &entries, hash, name)? {
        Run::Found(ino, ty) => Ok(Some((ino, ty))),
        Run::Missing | Run::ReachedEnd => Ok(None),
    }
}

/// First live entry at or after index `from`, resolved, with its index.
pub(crate) fn live_entry_from(
    reader: &DirReader<'_>,
    dir: &XfsDinode,
    entries: &[LeafEntry],
    from: usize,
) -> Result<Option<(DirEntry, usize)>> {
    match entries
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, e)| !e.is_stale())
    {
        Some((index, e)) => Ok(Some((reader.data_entry(dir, e.address)?, index))),
        None => Ok(None),
    }
}

/// Cursor `n` is the n-th slot of the leaf's hash index.
pub(crate) fn next(
    reader: &DirReader<'_>,
    dir: &XfsDinode,
    cursor: DirCursor,
) -> Result<Option<(DirEntry, DirCursor)>> {
    let (_, entries) = read_leaf(reader, dir, reader.geo.dir_leaf_offset(), LeafKind::Leaf1)?;
    let Ok(from) = usize::try_from(cursor.0) else {
        return Ok(None);
    };
    Ok(live_entry_from(reader, dir, &entries, from)?
        .map(|(entry, index)| (entry, DirCursor(index as u64 + 1))))
}
