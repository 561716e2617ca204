#![forbid(unsafe_code)]
//! Data-fork block mapping.
//!
//! Translates logical file blocks to device blocks for inodes whose data
//! fork is an inline extent list or a BMBT. Inline lists are scanned in
//! stored order. B+trees are walked iteratively from the inode root with
//! explicit level accounting, so a corrupt tree can neither recurse without
//! bound nor loop through a sibling chain.
//!
//! A logical block outside every extent is reported as
//! [`XfsError::ExtentNotFound`]; every structural problem is
//! [`XfsError::CorruptTree`].

use serde::Serialize;
use tracing::trace;
use xfsr_block::BlockDevice;
use xfsr_error::{Result, XfsError};
use xfsr_ondisk::bmbt::XFS_BMBT_REC_SIZE;
use xfsr_ondisk::{
    BmbtEntries, BmbtIrec, BmbtNode, DinodeFormat, XfsDinode, XfsGeometry, parse_bmbt_node,
    parse_bmdr_root, select_child,
};
use xfsr_types::{BlockNumber, FileBlock, FsBlock};

/// Deepest BMBT accepted, counting the inline root as level one.
pub const MAX_BMBT_DEPTH: u16 = 8;

/// A logical block resolved to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Mapping {
    pub logical: FileBlock,
    pub physical: BlockNumber,
    /// Preallocated but never written; reads as zeros.
    pub unwritten: bool,
}

fn tree_error(block: u64, detail: impl Into<String>) -> XfsError {
    XfsError::CorruptTree {
        block,
        detail: detail.into(),
    }
}

/// A BMBT leaf as seen by the walkers.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LeafBlock {
    at: FsBlock,
    block: BlockNumber,
    recs: Vec<BmbtIrec>,
    rightsib: FsBlock,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum CursorState {
    #[default]
    Start,
    Inline(usize),
    Leaf { leaf: LeafBlock, index: usize },
    Done,
}

/// Position of a sequential walk over a data fork.
///
/// Start from [`ExtentCursor::default`]. A cursor that has returned an
/// error stays exhausted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtentCursor {
    state: CursorState,
    prev_end: Option<u64>,
    leaves: u64,
}

impl ExtentCursor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == CursorState::Done
    }
}

enum Scan {
    Found(BmbtIrec),
    Past,
    Continue,
}

/// Records must be non-empty and strictly ordered without overlap.
fn check_record(block: u64, rec: &BmbtIrec, prev_end: Option<u64>) -> Result<()> {
    if rec.blockcount == 0 {
        return Err(tree_error(
            block,
            format!("zero-length extent at file block {}", rec.startoff.0),
        ));
    }
    if let Some(end) = prev_end {
        if rec.startoff.0 < end {
            return Err(tree_error(
                block,
                format!(
                    "extent at file block {} overlaps the previous one ending at {end}",
                    rec.startoff.0
                ),
            ));
        }
    }
    Ok(())
}

fn scan(recs: &[BmbtIrec], logical: u64, block: u64, prev_end: &mut Option<u64>) -> Result<Scan> {
    for rec in recs {
        check_record(block, rec, *prev_end)?;
        *prev_end = Some(rec.end());
        if rec.contains(logical) {
            return Ok(Scan::Found(*rec));
        }
        if rec.startoff.0 > logical {
            return Ok(Scan::Past);
        }
    }
    Ok(Scan::Continue)
}

/// Maps logical blocks of one volume's inodes.
pub struct ExtentMapper<'a> {
    dev: &'a dyn BlockDevice,
    geo: &'a XfsGeometry,
}

impl<'a> ExtentMapper<'a> {
    pub fn new(dev: &'a dyn BlockDevice, geo: &'a XfsGeometry) -> Self {
        Self { dev, geo }
    }

    /// Resolve `logical` to a device block.
    pub fn map_block(&self, inode: &XfsDinode, logical: FileBlock) -> Result<Mapping> {
        let rec = self.find_extent(inode, logical)?;
        self.mapping_for(&rec, logical)
    }

    /// Device block for `logical` inside `rec`.
    pub fn mapping_for(&self, rec: &BmbtIrec, logical: FileBlock) -> Result<Mapping> {
        let fsb = rec
            .fsblock_for(logical.0)
            .ok_or(XfsError::ExtentNotFound { logical: logical.0 })?;
        let physical = self
            .geo
            .fsb_to_block(fsb)
            .map_err(|e| tree_error(fsb.0, format!("extent at file block {}: {e}", rec.startoff.0)))?;
        if physical.0 >= self.geo.dblocks {
            return Err(tree_error(
                fsb.0,
                format!("block {physical} beyond sb_dblocks {}", self.geo.dblocks),
            ));
        }
        Ok(Mapping {
            logical,
            physical,
            unwritten: rec.unwritten,
        })
    }

    /// The extent record covering `logical`.
    pub fn find_extent(&self, inode: &XfsDinode, logical: FileBlock) -> Result<BmbtIrec> {
        let not_found = XfsError::ExtentNotFound { logical: logical.0 };
        match inode.format {
            DinodeFormat::Extents => {
                let recs = Self::inline_extents(inode)?;
                match scan(&recs, logical.0, 0, &mut None)? {
                    Scan::Found(rec) => Ok(rec),
                    Scan::Past | Scan::Continue => Err(not_found),
                }
            }
            DinodeFormat::Btree => {
                let mut leaf = self.descend(inode, |keys| select_child(keys, logical.0))?;
                let mut prev_end = None;
                let mut hops = 0_u64;
                loop {
                    match scan(&leaf.recs, logical.0, leaf.block.0, &mut prev_end)? {
                        Scan::Found(rec) => return Ok(rec),
                        Scan::Past => return Err(not_found),
                        Scan::Continue => {}
                    }
                    hops += 1;
                    match self.next_leaf(inode, &leaf, hops)? {
                        Some(next) => leaf = next,
                        None => return Err(not_found),
                    }
                }
            }
            other => Err(Self::unmapped(inode, other)),
        }
    }

    /// Advance `cursor` and return the next extent in file order.
    pub fn next_extent(
        &self,
        inode: &XfsDinode,
        cursor: &mut ExtentCursor,
    ) -> Result<Option<BmbtIrec>> {
        let state = std::mem::replace(&mut cursor.state, CursorState::Done);
        let (rec, next) = match state {
            CursorState::Done => return Ok(None),
            CursorState::Start => match inode.format {
                DinodeFormat::Extents => {
                    cursor.state = CursorState::Inline(0);
                    return self.next_extent(inode, cursor);
                }
                DinodeFormat::Btree => {
                    let leaf = self.descend(inode, |_| 0)?;
                    cursor.leaves = 1;
                    cursor.state = CursorState::Leaf { leaf, index: 0 };
                    return self.next_extent(inode, cursor);
                }
                other => return Err(Self::unmapped(inode, other)),
            },
            CursorState::Inline(index) => {
                if u64::try_from(index).map_or(true, |i| i >= inode.nextents) {
                    return Ok(None);
                }
                Self::inline_extents_fit(inode)?;
                let rec = BmbtIrec::parse(&inode.data_fork, index * XFS_BMBT_REC_SIZE)
                    .map_err(|e| tree_error(0, format!("inode {} extent {index}: {e}", inode.ino)))?;
                check_record(0, &rec, cursor.prev_end)?;
                (rec, CursorState::Inline(index + 1))
            }
            CursorState::Leaf { leaf, index } => {
                if let Some(rec) = leaf.recs.get(index).copied() {
                    check_record(leaf.block.0, &rec, cursor.prev_end)?;
                    (rec, CursorState::Leaf {
                        leaf,
                        index: index + 1,
                    })
                } else {
                    cursor.leaves += 1;
                    match self.next_leaf(inode, &leaf, cursor.leaves)? {
                        Some(next) => {
                            cursor.state = CursorState::Leaf {
                                leaf: next,
                                index: 0,
                            };
                            return self.next_extent(inode, cursor);
                        }
                        None => return Ok(None),
                    }
                }
            }
        };
        cursor.prev_end = Some(rec.end());
        cursor.state = next;
        Ok(Some(rec))
    }

    /// The extent with the highest file offset, if any.
    pub fn last_extent(&self, inode: &XfsDinode) -> Result<Option<BmbtIrec>> {
        match inode.format {
            DinodeFormat::Extents => Ok(Self::inline_extents(inode)?.last().copied()),
            DinodeFormat::Btree => {
                let mut leaf = self.descend(inode, |keys| keys.len().saturating_sub(1))?;
                let mut hops = 0_u64;
                // A rightmost child with a right sibling means the index is
                // stale; keep walking so the answer stays the true last one.
                loop {
                    hops += 1;
                    match self.next_leaf(inode, &leaf, hops)? {
                        Some(next) => leaf = next,
                        None => return Ok(leaf.recs.last().copied()),
                    }
                }
            }
            other => Err(Self::unmapped(inode, other)),
        }
    }

    /// Every extent of the fork in file order.
    pub fn collect_extents(&self, inode: &XfsDinode) -> Result<Vec<BmbtIrec>> {
        let mut cursor = ExtentCursor::new();
        let mut out = Vec::new();
        while let Some(rec) = self.next_extent(inode, &mut cursor)? {
            out.push(rec);
        }
        Ok(out)
    }

    fn unmapped(inode: &XfsDinode, format: DinodeFormat) -> XfsError {
        tree_error(
            0,
            format!("inode {} has a {format:?} fork with no block map", inode.ino),
        )
    }

    fn inline_extents_fit(inode: &XfsDinode) -> Result<()> {
        let fits = usize::try_from(inode.nextents)
            .ok()
            .and_then(|n| n.checked_mul(XFS_BMBT_REC_SIZE))
            .is_some_and(|bytes| bytes <= inode.data_fork.len());
        if fits {
            Ok(())
        } else {
            Err(tree_error(
                0,
                format!(
                    "inode {}: {} extents do not fit a {}-byte fork",
                    inode.ino,
                    inode.nextents,
                    inode.data_fork.len()
                ),
            ))
        }
    }

    fn inline_extents(inode: &XfsDinode) -> Result<Vec<BmbtIrec>> {
        Self::inline_extents_fit(inode)?;
        xfsr_ondisk::parse_extent_list(&inode.data_fork, inode.nextents)
            .map_err(|e| tree_error(0, format!("inode {} extent list: {e}", inode.ino)))
    }

    /// Walk from the inline root to a leaf, taking the child chosen by
    /// `pick` at every interior level.
    fn descend(&self, inode: &XfsDinode, pick: impl Fn(&[u64]) -> usize) -> Result<LeafBlock> {
        let root = parse_bmdr_root(&inode.data_fork)
            .map_err(|e| tree_error(0, format!("inode {} btree root: {e}", inode.ino)))?;
        if root.level >= MAX_BMBT_DEPTH {
            return Err(tree_error(
                0,
                format!("inode {} btree root at level {}", inode.ino, root.level),
            ));
        }
        let mut level = root.level - 1;
        let mut ptr = root
            .ptrs
            .get(pick(&root.keys))
            .copied()
            .ok_or_else(|| tree_error(0, "child index past the root records"))?;
        loop {
            let (block, node) = self.read_node(ptr, level)?;
            match node.entries {
                BmbtEntries::Leaf(recs) => {
                    return Ok(LeafBlock {
                        at: ptr,
                        block,
                        recs,
                        rightsib: node.rightsib,
                    });
                }
                BmbtEntries::Interior { keys, ptrs } => {
                    ptr = ptrs
                        .get(pick(&keys))
                        .copied()
                        .ok_or_else(|| tree_error(block.0, "child index past the node records"))?;
                    level -= 1;
                }
            }
        }
    }

    /// Right sibling of `leaf`, checking that it links back. `hops` counts
    /// leaves visited so far; a chain longer than the extent count loops.
    fn next_leaf(
        &self,
        inode: &XfsDinode,
        leaf: &LeafBlock,
        hops: u64,
    ) -> Result<Option<LeafBlock>> {
        if leaf.rightsib.is_null() {
            return Ok(None);
        }
        if hops > inode.nextents.min(self.geo.dblocks) {
            return Err(tree_error(
                leaf.block.0,
                format!("sibling chain longer than {} extents", inode.nextents),
            ));
        }
        let (block, node) = self.read_node(leaf.rightsib, 0)?;
        if node.leftsib != leaf.at {
            return Err(tree_error(
                block.0,
                format!(
                    "left sibling {} does not point back to {}",
                    node.leftsib, leaf.at
                ),
            ));
        }
        match node.entries {
            BmbtEntries::Leaf(recs) => Ok(Some(LeafBlock {
                at: leaf.rightsib,
                block,
                recs,
                rightsib: node.rightsib,
            })),
            BmbtEntries::Interior { .. } => Err(tree_error(block.0, "sibling is not a leaf")),
        }
    }

    fn read_node(&self, fsb: FsBlock, level: u16) -> Result<(BlockNumber, BmbtNode)> {
        let block = self
            .geo
            .fsb_to_block(fsb)
            .map_err(|e| tree_error(fsb.0, format!("btree pointer {fsb}: {e}")))?;
        if block.0 >= self.geo.dblocks || block.0 >= self.dev.block_count() {
            return Err(tree_error(block.0, "btree pointer beyond the device"));
        }
        let buf = self.dev.read_block(block)?;
        let node = parse_bmbt_node(buf.as_slice()).map_err(|e| tree_error(block.0, e.to_string()))?;
        if node.crc != self.geo.is_v5 {
            return Err(tree_error(
                block.0,
                "btree block header does not match the superblock version",
            ));
        }
        if node.level != level {
            return Err(tree_error(
                block.0,
                format!("node at level {} where {level} was expected", node.level),
            ));
        }
        trace!(block = block.0, level, "bmbt_node");
        Ok((block, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use xfsr_block::{ByteBlockDevice, MemByteDevice};
    use xfsr_harness::{
        BtreeShape, DirLayout, ExtentSpec, ImageBuilder, ImageOptions, block_pattern,
    };
    use xfsr_ondisk::XfsSuperblock;
    use xfsr_types::InodeNumber;

    struct Fixture {
        dev: ByteBlockDevice<MemByteDevice>,
        geo: XfsGeometry,
        ino: InodeNumber,
    }

    impl Fixture {
        fn inode(&self) -> XfsDinode {
            xfsr_inode::read_inode(&self.dev, &self.geo, self.ino).expect("inode")
        }

        fn mapper(&self) -> ExtentMapper<'_> {
            ExtentMapper::new(&self.dev, &self.geo)
        }

        fn block_offset(&self, fsb: FsBlock) -> u64 {
            self.geo.fsb_to_block(fsb).expect("fsb").0 * 4096
        }

        fn first_byte(&self, physical: BlockNumber) -> u8 {
            self.dev.read_block(physical).expect("read").as_slice()[0]
        }
    }

    fn fixture(
        opts: ImageOptions,
        extents: &[ExtentSpec],
        shape: Option<BtreeShape>,
    ) -> Fixture {
        let mut b = ImageBuilder::new(opts).expect("builder");
        let root = b.reserve_inode().expect("root");
        b.add_dir_at::<&[u8]>(root, root, &[], DirLayout::Shortform)
            .expect("root dir");
        b.set_root(root);
        let end = extents.last().map_or(0, |e| e.startoff + u64::from(e.len));
        let ino = match shape {
            Some(shape) => b.add_btree_file(end * 4096, extents, shape),
            None => b.add_file_with_extents(end * 4096, extents),
        }
        .expect("file");
        let image = b.finish().expect("image");
        let sb = XfsSuperblock::parse_superblock_region(&image[..512]).expect("sb");
        let geo = sb.geometry().expect("geometry");
        let dev = ByteBlockDevice::new(MemByteDevice::new(image), 4096).expect("device");
        Fixture { dev, geo, ino }
    }

    fn sparse_extents() -> Vec<ExtentSpec> {
        vec![
            ExtentSpec::new(1, 2),
            ExtentSpec::unwritten(5, 1),
            ExtentSpec::new(8, 2),
        ]
    }

    fn every_other(count: u64) -> Vec<ExtentSpec> {
        (0..count).map(|i| ExtentSpec::new(i * 2, 1)).collect()
    }

    fn deep_shape() -> BtreeShape {
        BtreeShape {
            leaf_capacity: 4,
            fanout: 2,
        }
    }

    #[test]
    fn inline_extents_map_holes_and_unwritten() {
        let fx = fixture(ImageOptions::default(), &sparse_extents(), None);
        let inode = fx.inode();
        assert_eq!(inode.format, DinodeFormat::Extents);
        let mapper = fx.mapper();

        for hole in [0, 3, 4, 6, 7, 10, 1 << 40] {
            assert!(matches!(
                mapper.map_block(&inode, FileBlock(hole)),
                Err(XfsError::ExtentNotFound { logical }) if logical == hole
            ));
        }
        for logical in [1, 2, 8, 9] {
            let m = mapper.map_block(&inode, FileBlock(logical)).expect("mapped");
            assert!(!m.unwritten);
            assert_eq!(fx.first_byte(m.physical), block_pattern(logical));
        }
        let m = mapper.map_block(&inode, FileBlock(5)).expect("unwritten");
        assert!(m.unwritten);
    }

    #[test]
    fn btree_mapping_matches_inline_mapping() {
        let extents = every_other(48);
        let flat = fixture(ImageOptions::default(), &extents, None);
        let tree = fixture(ImageOptions::default(), &extents, Some(deep_shape()));
        assert_eq!(tree.inode().format, DinodeFormat::Btree);

        let (fi, ti) = (flat.inode(), tree.inode());
        for logical in 0..100 {
            let a = flat.mapper().map_block(&fi, FileBlock(logical));
            let b = tree.mapper().map_block(&ti, FileBlock(logical));
            match (a, b) {
                (Ok(a), Ok(b)) => {
                    assert_eq!(flat.first_byte(a.physical), tree.first_byte(b.physical));
                    assert_eq!(tree.first_byte(b.physical), block_pattern(logical));
                }
                (Err(XfsError::ExtentNotFound { .. }), Err(XfsError::ExtentNotFound { .. })) => {}
                other => panic!("logical {logical}: {other:?}"),
            }
        }
    }

    #[test]
    fn v4_btree_uses_short_headers() {
        let fx = fixture(ImageOptions::v4(), &every_other(20), Some(deep_shape()));
        let inode = fx.inode();
        let m = fx.mapper().map_block(&inode, FileBlock(38)).expect("mapped");
        assert_eq!(fx.first_byte(m.physical), block_pattern(38));
    }

    #[test]
    fn cursor_walks_every_extent_in_order() {
        let extents = every_other(48);
        for shape in [None, Some(deep_shape())] {
            let fx = fixture(ImageOptions::default(), &extents, shape);
            let inode = fx.inode();
            let all = fx.mapper().collect_extents(&inode).expect("collect");
            let starts: Vec<u64> = all.iter().map(|r| r.startoff.0).collect();
            let want: Vec<u64> = extents.iter().map(|e| e.startoff).collect();
            assert_eq!(starts, want);

            let mut cursor = ExtentCursor::new();
            for _ in 0..48 {
                assert!(fx.mapper().next_extent(&inode, &mut cursor).expect("next").is_some());
            }
            assert_eq!(fx.mapper().next_extent(&inode, &mut cursor).expect("end"), None);
            assert!(cursor.is_done());
            assert_eq!(fx.mapper().next_extent(&inode, &mut cursor).expect("end"), None);
        }
    }

    #[test]
    fn last_extent_for_inline_and_btree() {
        let extents = every_other(48);
        for shape in [None, Some(deep_shape())] {
            let fx = fixture(ImageOptions::default(), &extents, shape);
            let last = fx.mapper().last_extent(&fx.inode()).expect("last").expect("some");
            assert_eq!(last.startoff.0, 94);
            assert_eq!(last.blockcount, 1);
        }
        let fx = fixture(ImageOptions::default(), &[], None);
        assert_eq!(fx.mapper().last_extent(&fx.inode()).expect("empty"), None);
    }

    #[test]
    fn non_mapping_forks_are_corrupt_tree_requests() {
        let fx = fixture(ImageOptions::default(), &sparse_extents(), None);
        let mut inode = fx.inode();
        inode.format = DinodeFormat::Local;
        assert!(matches!(
            fx.mapper().map_block(&inode, FileBlock(1)),
            Err(XfsError::CorruptTree { .. })
        ));
        inode.format = DinodeFormat::Dev;
        assert!(matches!(
            fx.mapper().collect_extents(&inode),
            Err(XfsError::CorruptTree { .. })
        ));
    }

    #[test]
    fn overlapping_inline_extents_are_corrupt() {
        let fx = fixture(ImageOptions::default(), &sparse_extents(), None);
        let mut inode = fx.inode();
        let mut second = BmbtIrec::parse(&inode.data_fork, 16).expect("rec");
        second.startoff = FileBlock(2);
        inode.data_fork[16..32].copy_from_slice(&second.encode());
        assert!(matches!(
            fx.mapper().map_block(&inode, FileBlock(9)),
            Err(XfsError::CorruptTree { .. })
        ));
        assert!(fx.mapper().collect_extents(&inode).is_err());
    }

    #[test]
    fn extent_count_past_the_fork_is_corrupt() {
        let fx = fixture(ImageOptions::default(), &sparse_extents(), None);
        let mut inode = fx.inode();
        inode.nextents = 1000;
        assert!(matches!(
            fx.mapper().map_block(&inode, FileBlock(1)),
            Err(XfsError::CorruptTree { .. })
        ));
        assert!(matches!(
            fx.mapper().collect_extents(&inode),
            Err(XfsError::CorruptTree { .. })
        ));
    }

    #[test]
    fn wrong_child_level_is_corrupt() {
        let fx = fixture(ImageOptions::default(), &every_other(48), Some(deep_shape()));
        let inode = fx.inode();
        let root = parse_bmdr_root(&inode.data_fork).expect("root");
        let child = fx.block_offset(root.ptrs[0]);
        // Claim the child sits at the same level as the root.
        fx.dev
            .inner()
            .patch(child + 4, &root.level.to_be_bytes())
            .expect("patch");
        assert!(matches!(
            fx.mapper().map_block(&inode, FileBlock(0)),
            Err(XfsError::CorruptTree { .. })
        ));
    }

    #[test]
    fn absurd_root_level_is_corrupt() {
        let fx = fixture(ImageOptions::default(), &every_other(48), Some(deep_shape()));
        let mut inode = fx.inode();
        inode.data_fork[0..2].copy_from_slice(&40_u16.to_be_bytes());
        assert!(matches!(
            fx.mapper().map_block(&inode, FileBlock(0)),
            Err(XfsError::CorruptTree { .. })
        ));
    }

    #[test]
    fn bad_btree_magic_is_corrupt() {
        let fx = fixture(ImageOptions::default(), &every_other(48), Some(deep_shape()));
        let inode = fx.inode();
        let root = parse_bmdr_root(&inode.data_fork).expect("root");
        fx.dev
            .inner()
            .patch(fx.block_offset(root.ptrs[0]), b"XXXX")
            .expect("patch");
        assert!(matches!(
            fx.mapper().map_block(&inode, FileBlock(0)),
            Err(XfsError::CorruptTree { .. })
        ));
    }

    #[test]
    fn sibling_cycle_is_detected() {
        // One interior level: root -> 12 leaves of 4 records.
        let shape = BtreeShape {
            leaf_capacity: 4,
            fanout: 16,
        };
        let fx = fixture(ImageOptions::default(), &every_other(48), Some(shape));
        let inode = fx.inode();
        let root = parse_bmdr_root(&inode.data_fork).expect("root");
        assert_eq!(root.level, 1);
        let first = root.ptrs[0];
        let second = root.ptrs[1];
        // Second leaf points right back at the first, which points at it.
        fx.dev
            .inner()
            .patch(fx.block_offset(second) + 16, &first.0.to_be_bytes())
            .expect("patch");
        assert!(matches!(
            fx.mapper().collect_extents(&inode),
            Err(XfsError::CorruptTree { .. })
        ));
        // Lookups that stay inside a leaf are unaffected.
        let m = fx.mapper().map_block(&inode, FileBlock(2)).expect("first leaf");
        assert_eq!(fx.first_byte(m.physical), block_pattern(2));
    }

    #[test]
    fn lookup_follows_right_sibling_past_a_stale_key() {
        let shape = BtreeShape {
            leaf_capacity: 4,
            fanout: 16,
        };
        let fx = fixture(ImageOptions::default(), &every_other(48), Some(shape));
        let mut inode = fx.inode();
        let root = parse_bmdr_root(&inode.data_fork).expect("root");
        assert_eq!(root.level, 1);
        assert_eq!(&root.keys[..3], &[0, 8, 16]);
        // Second key raised from 8 to 10: offset 8 now descends into the
        // first leaf, which ends at 6.
        inode.data_fork[12..20].copy_from_slice(&10_u64.to_be_bytes());
        assert_eq!(parse_bmdr_root(&inode.data_fork).expect("root").keys[1], 10);

        let m = fx.mapper().map_block(&inode, FileBlock(8)).expect("via sibling");
        assert!(!m.unwritten);
        assert_eq!(fx.first_byte(m.physical), block_pattern(8));
        assert!(matches!(
            fx.mapper().map_block(&inode, FileBlock(9)),
            Err(XfsError::ExtentNotFound { logical: 9 })
        ));
    }

    #[test]
    fn pointer_outside_the_volume_is_corrupt() {
        let fx = fixture(ImageOptions::default(), &every_other(48), Some(deep_shape()));
        let mut inode = fx.inode();
        let maxrecs = (inode.data_fork.len() - 4) / 16;
        let ptr_at = 4 + maxrecs * 8;
        // AG 9 on a two-AG volume.
        inode.data_fork[ptr_at..ptr_at + 8].copy_from_slice(&(9_u64 << 8).to_be_bytes());
        assert!(matches!(
            fx.mapper().map_block(&inode, FileBlock(0)),
            Err(XfsError::CorruptTree { .. })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn mapping_is_monotonic_within_extents(
            gaps in proptest::collection::vec((0_u64..4, 1_u32..4), 1..20),
            btree in any::<bool>(),
        ) {
            let mut extents = Vec::new();
            let mut next = 0_u64;
            for (gap, len) in gaps {
                let start = next + gap;
                extents.push(ExtentSpec::new(start, len));
                next = start + u64::from(len);
            }
            let shape = btree.then(deep_shape);
            let fx = fixture(ImageOptions::default(), &extents, shape);
            let inode = fx.inode();
            let mapper = fx.mapper();

            for ext in &extents {
                let base = mapper.map_block(&inode, FileBlock(ext.startoff)).expect("start");
                for k in 0..u64::from(ext.len) {
                    let m = mapper.map_block(&inode, FileBlock(ext.startoff + k)).expect("inside");
                    prop_assert_eq!(m.physical.0, base.physical.0 + k);
                    prop_assert_eq!(fx.first_byte(m.physical), block_pattern(ext.startoff + k));
                }
            }
            for logical in 0..next + 2 {
                let covered = extents.iter().any(|e| {
                    logical >= e.startoff && logical < e.startoff + u64::from(e.len)
                });
                let res = mapper.map_block(&inode, FileBlock(logical));
                prop_assert_eq!(covered, res.is_ok());
            }
        }
    }
}
