//! Node directories: data blocks indexed by several leaf blocks, which are
//! in turn indexed by a tree of da-node blocks rooted at the start of the
//! leaf region.
//!
//! Child selection takes the first entry whose hash is at least the wanted
//! hash, falling back to the last entry. Each node entry records the
//! largest hash under its child, so a hash below every key lands in the
//! first child and one above every key in the last.

use crate::leaf::{Run, live_entry_from, read_leaf, scan_run};
use crate::{DirCursor, DirEntry, DirReader, EntryType, dir_error, parse_error};
use tracing::trace;
use xfsr_error::Result;
use xfsr_ondisk::dir2::{XFS_DIR2_LEAFN_MAGIC, XFS_DIR3_LEAFN_MAGIC};
use xfsr_ondisk::{DaNode, DaNodeEntry, LeafKind, XfsDinode, parse_da_node, peek_da_magic, xfs_da_hashname};
use xfsr_types::{FileBlock, InodeNumber};

/// What sits at a block of the leaf region.
enum IndexBlock {
    Leaf,
    Node(DaNode),
}

fn check_leaf_region(reader: &DirReader<'_>, dir: &XfsDinode, fb: FileBlock) -> Result<()> {
    if fb < reader.geo.dir_leaf_offset() || fb >= reader.geo.dir_free_offset() {
        return Err(dir_error(
            fb.0,
            format!("directory inode {}: index pointer outside the leaf region", dir.ino),
        ));
    }
    Ok(())
}

fn read_index_block(
    reader: &DirReader<'_>,
    dir: &XfsDinode,
    fb: FileBlock,
    expect_level: Option<u16>,
) -> Result<IndexBlock> {
    check_leaf_region(reader, dir, fb)?;
    let block = reader.read_dir_block(dir, fb)?;
    let magic = peek_da_magic(&block).map_err(|e| parse_error(fb, dir, &e))?;
    if magic == XFS_DIR2_LEAFN_MAGIC || magic == XFS_DIR3_LEAFN_MAGIC {
        return match expect_level {
            None | Some(0) => Ok(IndexBlock::Leaf),
            Some(level) => Err(dir_error(
                fb.0,
                format!("leaf block where a level-{level} node was expected"),
            )),
        };
    }
    let node = parse_da_node(&block).map_err(|e| parse_error(fb, dir, &e))?;
    if let Some(level) = expect_level {
        if node.level != level {
            return Err(dir_error(
                fb.0,
                format!("node at level {} where level {level} was expected", node.level),
            ));
        }
    }
    trace!(ino = dir.ino.0, block = fb.0, level = node.level, "dir_da_node");
    Ok(IndexBlock::Node(node))
}

/// Entry to descend through for `hash`.
fn select_child(entries: &[DaNodeEntry], hash: u32) -> Option<&DaNodeEntry> {
    entries
        .iter()
        .find(|e| e.hashval >= hash)
        .or_else(|| entries.last())
}

/// Upper bound on the blocks a walk of `dir` may visit.
fn max_walk_blocks(reader: &DirReader<'_>, dir: &XfsDinode) -> u64 {
    dir.nblocks.min(reader.geo.dblocks)
}

/// Leaf block whose hash range covers `hash`.
fn find_leaf(reader: &DirReader<'_>, dir: &XfsDinode, hash: u32) -> Result<FileBlock> {
    let mut fb = reader.geo.dir_leaf_offset();
    let mut expect = None;
    loop {
        match read_index_block(reader, dir, fb, expect)? {
            IndexBlock::Leaf => return Ok(fb),
            IndexBlock::Node(node) => {
                let child = select_child(&node.entries, hash)
                    .ok_or_else(|| dir_error(fb.0, "empty da node"))?;
                expect = Some(node.level - 1);
                fb = FileBlock(u64::from(child.before));
            }
        }
    }
}

pub(crate) fn lookup(
    reader: &DirReader<'_>,
    dir: &XfsDinode,
    name: &[u8],
) -> Result<Option<(InodeNumber, EntryType)>> {
    let hash = xfs_da_hashname(name);
    let mut fb = find_leaf(reader, dir, hash)?;
    trace!(ino = dir.ino.0, hash, leaf = fb.0, "dir_node_lookup");
    let mut hops = 0_u64;
    loop {
        let (hdr, entries) = read_leaf(reader, dir, fb, LeafKind::LeafN)?;
        match scan_run(reader, dir, &entries, hash, name)? {
            Run::Found(ino, ty) => return Ok(Some((ino, ty))),
            Run::Missing => return Ok(None),
            Run::ReachedEnd if hdr.forw == 0 => return Ok(None),
            Run::ReachedEnd => {
                hops += 1;
                if hops > max_walk_blocks(reader, dir) {
                    return Err(dir_error(fb.0, "leaf sibling chain does not end"));
                }
                fb = FileBlock(u64::from(hdr.forw));
            }
        }
    }
}

/// Leftmost leaf of the da tree.
fn first_leaf(reader: &DirReader<'_>, dir: &XfsDinode) -> Result<FileBlock> {
    let mut fb = reader.geo.dir_leaf_offset();
    let mut expect = None;
    loop {
        match read_index_block(reader, dir, fb, expect)? {
            IndexBlock::Leaf => return Ok(fb),
            IndexBlock::Node(node) => {
                let child = node
                    .entries
                    .first()
                    .ok_or_else(|| dir_error(fb.0, "empty da node"))?;
                expect = Some(node.level - 1);
                fb = FileBlock(u64::from(child.before));
            }
        }
    }
}

const ENTRY_BITS: u32 = 32;

/// Cursor is `(leaf << 32) | slot`, where `leaf` is one past the leaf
/// block's offset into the leaf region and `slot` indexes its hash index.
/// A zero leaf half starts at the leftmost leaf; later leaves are reached
/// through the `forw` links.
pub(crate) fn next(
    reader: &DirReader<'_>,
    dir: &XfsDinode,
    cursor: DirCursor,
) -> Result<Option<(DirEntry, DirCursor)>> {
    let leaf_start = reader.geo.dir_leaf_offset();
    let Ok(mut slot) = usize::try_from(cursor.0 & u64::from(u32::MAX)) else {
        return Ok(None);
    };
    let mut fb = match cursor.0 >> ENTRY_BITS {
        0 => first_leaf(reader, dir)?,
        leaf => {
            let fb = FileBlock(leaf_start.0 + leaf - 1);
            check_leaf_region(reader, dir, fb)?;
            fb
        }
    };
    let mut hops = 0_u64;
    loop {
        let (hdr, entries) = read_leaf(reader, dir, fb, LeafKind::LeafN)?;
        if let Some((entry, index)) = live_entry_from(reader, dir, &entries, slot)? {
            let leaf = fb.0 - leaf_start.0 + 1;
            let next = (leaf << ENTRY_BITS) | (index as u64 + 1);
            return Ok(Some((entry, DirCursor(next))));
        }
        if hdr.forw == 0 {
            return Ok(None);
        }
        hops += 1;
        if hops > max_walk_blocks(reader, dir) {
            return Err(dir_error(fb.0, "leaf sibling chain does not end"));
        }
        fb = FileBlock(u64::from(hdr.forw));
        check_leaf_region(reader, dir, fb)?;
        slot = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::select_child;
    use crate::test_support::{DirFixture, colliding, dir_fixture, numbered};
    use crate::*;
    use xfsr_harness::{DirLayout, ImageOptions};
    use xfsr_ondisk::DaNodeEntry;

    fn node_fixture(names: Vec<Vec<u8>>, leaf_capacity: usize, fanout: usize) -> DirFixture {
        dir_fixture(
            ImageOptions::default(),
            names,
            DirLayout::Node {
                entries_per_block: 40,
                leaf_capacity,
                fanout,
            },
        )
    }

    fn root_offset(fx: &DirFixture) -> u64 {
        let dir = fx.dir_inode();
        let m = xfsr_extent::ExtentMapper::new(&fx.dev, &fx.geo)
            .map_block(&dir, fx.geo.dir_leaf_offset())
            .expect("map root");
        m.physical.0 * 4096
    }

    #[test]
    fn child_selection_boundaries() {
        let entries = [
            DaNodeEntry {
                hashval: 100,
                before: 1,
            },
            DaNodeEntry {
                hashval: 200,
                before: 2,
            },
            DaNodeEntry {
                hashval: 300,
                before: 3,
            },
        ];
        let pick = |hash| select_child(&entries, hash).map(|e| e.before);
        assert_eq!(pick(0), Some(1));
        assert_eq!(pick(100), Some(1));
        assert_eq!(pick(101), Some(2));
        assert_eq!(pick(200), Some(2));
        assert_eq!(pick(300), Some(3));
        assert_eq!(pick(u32::MAX), Some(3));
        assert_eq!(select_child(&[], 5), None);
    }

    #[test]
    fn two_level_tree_finds_everything() {
        // 9 leaves under 3 level-1 nodes under the root.
        let fx = node_fixture(numbered(200), 24, 3);
        let dir = fx.dir_inode();
        let reader = fx.reader();
        for name in &fx.names {
            assert!(reader.lookup(&dir, name).expect("lookup").is_some(), "{name:?}");
        }
        assert_eq!(reader.lookup(&dir, b"entry-9999").expect("absent"), None);
        assert_eq!(reader.read_all(&dir).expect("all").len(), 202);
    }

    #[test]
    fn collision_run_spanning_leaves_follows_forward_links() {
        // 64 names with one hash across leaves of 10 entries.
        let mut names = colliding(64);
        names.extend(numbered(40));
        let fx = node_fixture(names.clone(), 10, 4);
        let dir = fx.dir_inode();
        let reader = fx.reader();
        for name in &names {
            let (ino, _) = reader.lookup(&dir, name).expect("lookup").expect("found");
            assert_eq!(ino, fx.file);
        }
    }

    #[test]
    fn iteration_visits_leaves_in_order_and_resumes() {
        let fx = node_fixture(numbered(120), 16, 2);
        let dir = fx.dir_inode();
        let reader = fx.reader();
        let all = reader.read_all(&dir).expect("all");
        assert_eq!(all.len(), 122);

        // Entries come out in hash order across leaves.
        let hashes: Vec<u32> = all.iter().map(|e| xfsr_ondisk::xfs_da_hashname(&e.name)).collect();
        assert!(hashes.windows(2).all(|w| w[0] <= w[1]));

        // Resuming from any returned cursor yields the same suffix.
        let mut cursor = DirCursor::START;
        let mut cursors = Vec::new();
        while let Some((_, next)) = reader.next_entry(&dir, cursor).expect("next") {
            cursors.push(next);
            cursor = next;
        }
        for (i, c) in cursors.iter().enumerate() {
            let got = reader.next_entry(&dir, *c).expect("resume").map(|(e, _)| e);
            assert_eq!(got.as_ref(), all.get(i + 1));
        }
    }

    #[test]
    fn each_step_touches_only_its_leaf_and_data_block() {
        // 50 leaves under a two-level tree.
        let fx = node_fixture(numbered(400), 8, 4);
        let dir = fx.dir_inode();
        let reader = fx.reader();
        let block_lookups = || {
            let stats = fx.cache.lock().stats();
            stats.hits + stats.misses
        };

        let mut cursor = DirCursor::START;
        for _ in 0..200 {
            cursor = reader.next_entry(&dir, cursor).expect("next").expect("entry").1;
        }
        let before = block_lookups();
        for _ in 0..40 {
            cursor = reader.next_entry(&dir, cursor).expect("next").expect("entry").1;
        }
        // A leaf and a data block per entry, and the next leaf when crossing.
        let used = block_lookups() - before;
        assert!(used <= 40 * 3, "{used} block lookups for 40 entries");
    }

    #[test]
    fn cursor_naming_a_non_leaf_block_is_corrupt() {
        let fx = node_fixture(numbered(200), 24, 3);
        let dir = fx.dir_inode();
        let reader = fx.reader();
        // Leaf half 1 names the root node block.
        assert!(matches!(
            reader.next_entry(&dir, DirCursor(1 << 32)),
            Err(XfsError::CorruptDirectory { .. })
        ));
        // Past the leaf region.
        let span = fx.geo.dir_free_offset().0 - fx.geo.dir_leaf_offset().0;
        assert!(matches!(
            reader.next_entry(&dir, DirCursor((span + 1) << 32)),
            Err(XfsError::CorruptDirectory { .. })
        ));
    }

    #[test]
    fn cursor_carries_the_leaf_block() {
        let fx = node_fixture(numbered(120), 16, 2);
        let dir = fx.dir_inode();
        let reader = fx.reader();
        let (_, cursor) = reader
            .next_entry(&dir, DirCursor::START)
            .expect("next")
            .expect("entry");
        let leaf = cursor.0 >> 32;
        assert!(leaf > 1, "first leaf sits after the root node");
        assert_eq!(cursor.0 & u64::from(u32::MAX), 1);
    }

    #[test]
    fn leafn_root_is_accepted() {
        // Everything fits one leaf: the builder still emits a root node, so
        // copy the single leaf over the root position.
        let fx = node_fixture(numbered(20), 64, 4);
        let dir = fx.dir_inode();
        let mapper = xfsr_extent::ExtentMapper::new(&fx.dev, &fx.geo);
        let leaf_fb = FileBlock(fx.geo.dir_leaf_offset().0 + 1);
        let leaf = mapper.map_block(&dir, leaf_fb).expect("leaf");
        let bytes = fx.dev.read_block(leaf.physical).expect("read").into_inner();
        fx.dev.inner().patch(root_offset(&fx), &bytes).expect("patch");

        let reader = fx.reader();
        for name in &fx.names {
            assert!(reader.lookup(&dir, name).expect("lookup").is_some());
        }
        assert_eq!(reader.read_all(&dir).expect("all").len(), 22);
    }

    #[test]
    fn node_level_mismatch_is_corrupt() {
        let fx = node_fixture(numbered(200), 24, 3);
        // Root claims level 5; its children are level 1.
        fx.dev
            .inner()
            .patch(root_offset(&fx) + 58, &5_u16.to_be_bytes())
            .expect("patch");
        let dir = fx.dir_inode();
        assert!(matches!(
            fx.reader().lookup(&dir, b"entry-0001"),
            Err(XfsError::CorruptDirectory { .. })
        ));
        assert!(matches!(
            fx.reader().read_all(&dir),
            Err(XfsError::CorruptDirectory { .. })
        ));
    }

    #[test]
    fn self_referencing_node_is_corrupt() {
        let fx = node_fixture(numbered(200), 24, 3);
        let leaf_start = u32::try_from(fx.geo.dir_leaf_offset().0).expect("fits");
        // First root entry points back at the root.
        fx.dev
            .inner()
            .patch(root_offset(&fx) + 64 + 4, &leaf_start.to_be_bytes())
            .expect("patch");
        let dir = fx.dir_inode();
        assert!(matches!(
            fx.reader().read_all(&dir),
            Err(XfsError::CorruptDirectory { .. })
        ));
    }

    #[test]
    fn pointer_into_the_data_region_is_corrupt() {
        let fx = node_fixture(numbered(200), 24, 3);
        fx.dev
            .inner()
            .patch(root_offset(&fx) + 64 + 4, &0_u32.to_be_bytes())
            .expect("patch");
        let dir = fx.dir_inode();
        assert!(matches!(
            fx.reader().read_all(&dir),
            Err(XfsError::CorruptDirectory { .. })
        ));
    }
}
