//! Block directories: one directory block holding the data entries, a
//! hash index and a tail.

use crate::{DirCursor, DirEntry, DirReader, EntryType, dir_error, parse_error, walk_data};
use std::sync::Arc;
use tracing::trace;
use xfsr_error::Result;
use xfsr_ondisk::{DataKind, XfsDinode, parse_block_tail, parse_data_header};
use xfsr_types::{FileBlock, InodeNumber};

/// The block and the byte range of its data region.
fn data_region(reader: &DirReader<'_>, dir: &XfsDinode) -> Result<(Arc<[u8]>, (usize, usize))> {
    let fb = FileBlock(0);
    let block = reader.read_dir_block(dir, fb)?;
    let hdr = parse_data_header(&block).map_err(|e| parse_error(fb, dir, &e))?;
    if hdr.kind != DataKind::Block {
        return Err(dir_error(
            fb.0,
            format!("directory inode {}: data block where a block directory was expected", dir.ino),
        ));
    }
    let tail = parse_block_tail(&block, hdr.len).map_err(|e| parse_error(fb, dir, &e))?;
    Ok((block, (hdr.len, tail.leaf_offset)))
}

pub(crate) fn lookup(
    reader: &DirReader<'_>,
    dir: &XfsDinode,
    name: &[u8],
) -> Result<Option<(InodeNumber, EntryType)>> {
    let (block, region) = data_region(reader, dir)?;
    trace!(ino = dir.ino.0, "dir_block_lookup");
    walk_data(dir, FileBlock(0), &block, region, reader.geo.has_ftype, |e| {
        (e.name == name).then(|| (InodeNumber(e.ino), crate::entry_type(e.ftype)))
    })
}

/// Cursor `n` is the n-th live entry from the start of the block.
pub(crate) fn next(
    reader: &DirReader<'_>,
    dir: &XfsDinode,
    cursor: DirCursor,
) -> Result<Option<(DirEntry, DirCursor)>> {
    let (block, region) = data_region(reader, dir)?;
    let mut ordinal = 0_u64;
    let found = walk_data(dir, FileBlock(0), &block, region, reader.geo.has_ftype, |e| {
        let hit = ordinal == cursor.0;
        ordinal += 1;
        hit.then(|| DirEntry::from_data(e))
    })?;
    Ok(found.map(|entry| (entry, DirCursor(cursor.0 + 1))))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{dir_fixture, numbered};
    use crate::*;
    use xfsr_harness::{DirLayout, ImageOptions};
    use xfsr_ondisk::dir2::XFS_DIR2_DATA_FREE_TAG;

    fn block_offset(fx: &crate::test_support::DirFixture) -> u64 {
        let dir = fx.dir_inode();
        let rec = xfsr_extent::ExtentMapper::new(&fx.dev, &fx.geo)
            .map_block(&dir, FileBlock(0))
            .expect("map");
        rec.physical.0 * 4096
    }

    #[test]
    fn iteration_is_physical_order_and_resumable() {
        let fx = dir_fixture(ImageOptions::default(), numbered(10), DirLayout::Block);
        let dir = fx.dir_inode();
        let reader = fx.reader();
        let all = reader.read_all(&dir).expect("all");
        assert_eq!(all[0].name, b".");
        assert_eq!(all[1].name, b"..");
        assert_eq!(all[2].name, b"entry-0000");
        assert_eq!(all.len(), 12);

        let (e5, c5) = reader.next_entry(&dir, DirCursor(5)).expect("five").expect("some");
        assert_eq!(e5, all[5]);
        assert_eq!(c5, DirCursor(6));
        assert_eq!(reader.next_entry(&dir, DirCursor(12)).expect("end"), None);
    }

    #[test]
    fn freed_entries_are_skipped() {
        let fx = dir_fixture(ImageOptions::default(), numbered(10), DirLayout::Block);
        // v5 header is 64 bytes; ".", ".." and entry-0000 take 16 + 16 + 24.
        let victim = block_offset(&fx) + 64 + 16 + 16;
        let mut free = Vec::new();
        free.extend_from_slice(&XFS_DIR2_DATA_FREE_TAG.to_be_bytes());
        free.extend_from_slice(&24_u16.to_be_bytes());
        fx.dev.inner().patch(victim, &free).expect("patch");

        let dir = fx.dir_inode();
        let reader = fx.reader();
        assert_eq!(reader.lookup(&dir, b"entry-0000").expect("lookup"), None);
        assert!(reader.lookup(&dir, b"entry-0001").expect("lookup").is_some());
        assert_eq!(reader.read_all(&dir).expect("all").len(), 11);
    }

    #[test]
    fn bad_free_length_is_corrupt() {
        let fx = dir_fixture(ImageOptions::default(), numbered(10), DirLayout::Block);
        let victim = block_offset(&fx) + 64 + 16 + 16;
        let mut free = Vec::new();
        free.extend_from_slice(&XFS_DIR2_DATA_FREE_TAG.to_be_bytes());
        free.extend_from_slice(&0_u16.to_be_bytes());
        fx.dev.inner().patch(victim, &free).expect("patch");
        assert!(matches!(
            fx.reader().lookup(&fx.dir_inode(), b"entry-0009"),
            Err(XfsError::CorruptDirectory { .. })
        ));
    }

    #[test]
    fn wrong_magic_is_corrupt() {
        let fx = dir_fixture(ImageOptions::default(), numbered(10), DirLayout::Block);
        fx.dev.inner().patch(block_offset(&fx), b"XDD3").expect("patch");
        assert!(matches!(
            fx.reader().lookup(&fx.dir_inode(), b"entry-0001"),
            Err(XfsError::CorruptDirectory { .. })
        ));
        fx.dev.inner().patch(block_offset(&fx), b"JUNK").expect("patch");
        fx.cache.lock().clear();
        assert!(matches!(
            fx.reader().next_entry(&fx.dir_inode(), DirCursor::START),
            Err(XfsError::CorruptDirectory { .. })
        ));
    }

    #[test]
    fn tail_count_overrunning_the_block_is_corrupt() {
        let fx = dir_fixture(ImageOptions::default(), numbered(10), DirLayout::Block);
        fx.dev
            .inner()
            .patch(block_offset(&fx) + 4096 - 8, &u32::MAX.to_be_bytes())
            .expect("patch");
        assert!(matches!(
            fx.reader().lookup(&fx.dir_inode(), b"entry-0001"),
            Err(XfsError::CorruptDirectory { .. })
        ));
    }
}
