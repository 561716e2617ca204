#![forbid(unsafe_code)]
//! Synthetic XFS image builder.
//!
//! Lays out a small, valid XFS volume in memory: superblock, inode blocks,
//! file data, BMBT blocks and every directory format. Allocation is a bump
//! pointer per allocation group, so images are deterministic byte for byte.
//! Only the structures the read path consults are written; free-space and
//! inode btrees are absent.

use anyhow::{Context, Result, anyhow, bail, ensure};
use std::collections::BTreeMap;
use xfsr_block::MemByteDevice;
use xfsr_ondisk::bmbt::{
    XFS_BMAP_CRC_MAGIC, XFS_BMAP_MAGIC, XFS_BMBT_REC_SIZE, XFS_BMDR_HDR_SIZE,
    XFS_BTREE_LBLOCK_CRC_LEN, XFS_BTREE_LBLOCK_LEN,
};
use xfsr_ondisk::dinode::{XFS_DINODE_CORE_SIZE_V2, XFS_DINODE_CORE_SIZE_V3};
use xfsr_ondisk::dir2::{
    XFS_DA_NODE_HDR_SIZE, XFS_DA_NODE_MAGIC, XFS_DA3_NODE_HDR_SIZE, XFS_DA3_NODE_MAGIC,
    XFS_DIR2_BLOCK_MAGIC, XFS_DIR2_DATA_FREE_TAG, XFS_DIR2_DATA_HDR_SIZE, XFS_DIR2_DATA_MAGIC,
    XFS_DIR2_FREE_MAGIC, XFS_DIR2_LEAF_HDR_SIZE, XFS_DIR2_LEAF1_MAGIC, XFS_DIR2_LEAFN_MAGIC,
    XFS_DIR3_BLOCK_MAGIC, XFS_DIR3_DATA_HDR_SIZE, XFS_DIR3_DATA_MAGIC, XFS_DIR3_FREE_MAGIC,
    XFS_DIR3_LEAF_HDR_SIZE, XFS_DIR3_LEAF1_MAGIC, XFS_DIR3_LEAFN_MAGIC,
};
use xfsr_ondisk::sb::{
    XFS_DIR2_FREE_OFFSET_BYTES, XFS_DIR2_LEAF_OFFSET_BYTES, XFS_SB_FEAT_INCOMPAT_FTYPE,
    XFS_SB_VERSION_4, XFS_SB_VERSION_5, XFS_SB_VERSION_DIRV2BIT, XFS_SB_VERSION_MOREBITSBIT,
    XFS_SB_VERSION2_FTYPE, ceil_log2,
};
use xfsr_ondisk::{BmbtIrec, DinodeFormat, LeafEntry, XfsFileType, data_entry_size, xfs_da_hashname};
use xfsr_types::{
    FileBlock, FsBlock, InodeNumber, S_IFDIR, S_IFLNK, S_IFREG, XFS_DINODE_MAGIC, XFS_MAXNAMELEN,
    XFS_SB_MAGIC, XFS_SUPERBLOCK_SIZE, XFS_SYMLINK_HDR_SIZE, XFS_SYMLINK_MAGIC, XFS_SYMLINK_MAXLEN,
};

pub const BLOCK_SIZE: usize = 4096;
const BLOCK_LOG: u8 = 12;

/// Timestamp stamped into every inode.
pub const IMAGE_TIMESTAMP: u32 = 1_700_000_000;
pub const IMAGE_UID: u32 = 1000;
pub const IMAGE_GID: u32 = 1000;

fn put_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_be_bytes());
}

fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_be_bytes());
}

fn put_u64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_be_bytes());
}

/// Byte every data block of a patterned file is filled with.
#[must_use]
pub fn block_pattern(logical: u64) -> u8 {
    u8::try_from(logical % 251).unwrap_or(0).wrapping_add(1)
}

#[derive(Debug, Clone)]
pub struct ImageOptions {
    pub inode_size: u16,
    pub ag_blocks: u32,
    pub ag_count: u32,
    pub dir_blk_log: u8,
    pub v5: bool,
    pub ftype: bool,
    /// Allocate every filesystem block of a multi-block directory block on
    /// its own, with a gap after it, so directory blocks span extents.
    pub scatter_dir_blocks: bool,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            inode_size: 512,
            ag_blocks: 200,
            ag_count: 2,
            dir_blk_log: 0,
            v5: true,
            ftype: true,
            scatter_dir_blocks: false,
        }
    }
}

impl ImageOptions {
    /// Version 4 volume: 256-byte v2 inodes, no ftype, v2 directory magics.
    #[must_use]
    pub fn v4() -> Self {
        Self {
            inode_size: 256,
            v5: false,
            ftype: false,
            ..Self::default()
        }
    }
}

/// Directory format to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirLayout {
    Shortform,
    Block,
    Leaf {
        entries_per_block: usize,
    },
    Node {
        entries_per_block: usize,
        leaf_capacity: usize,
        fanout: usize,
    },
}

/// One extent of a patterned file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentSpec {
    pub startoff: u64,
    pub len: u32,
    pub unwritten: bool,
}

impl ExtentSpec {
    #[must_use]
    pub fn new(startoff: u64, len: u32) -> Self {
        Self {
            startoff,
            len,
            unwritten: false,
        }
    }

    #[must_use]
    pub fn unwritten(startoff: u64, len: u32) -> Self {
        Self {
            startoff,
            len,
            unwritten: true,
        }
    }
}

/// Shape of a generated BMBT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BtreeShape {
    /// Records per leaf block.
    pub leaf_capacity: usize,
    /// Children per interior block; levels are added until the root fits.
    pub fanout: usize,
}

impl Default for BtreeShape {
    fn default() -> Self {
        Self {
            leaf_capacity: usize::MAX,
            fanout: usize::MAX,
        }
    }
}

/// Raw inode contents for [`ImageBuilder::write_inode`].
#[derive(Debug, Clone)]
pub struct InodeSpec {
    pub mode: u16,
    pub format: DinodeFormat,
    pub size: u64,
    pub nblocks: u64,
    pub nextents: u32,
    pub nlink: u32,
    pub fork: Vec<u8>,
}

#[derive(Debug, Clone)]
struct DirRec {
    name: Vec<u8>,
    ino: u64,
    ftype: u8,
}

#[derive(Debug)]
pub struct ImageBuilder {
    opts: ImageOptions,
    ag_blk_log: u8,
    inode_log: u8,
    inopb_log: u8,
    image: Vec<u8>,
    next_agbno: Vec<u32>,
    inode_chunks: Vec<Option<(u32, u32)>>,
    modes: BTreeMap<u64, u16>,
    root: Option<InodeNumber>,
}

impl ImageBuilder {
    pub fn new(opts: ImageOptions) -> Result<Self> {
        ensure!(
            opts.inode_size.is_power_of_two() && (256..=2048).contains(&opts.inode_size),
            "unsupported inode size {}",
            opts.inode_size
        );
        ensure!(
            opts.ag_blocks >= 16 && opts.ag_count >= 1,
            "allocation groups too small"
        );
        ensure!(opts.dir_blk_log <= 4, "dir_blk_log {} too large", opts.dir_blk_log);
        let inode_log = u8::try_from(opts.inode_size.trailing_zeros())?;
        let total_blocks = u64::from(opts.ag_blocks) * u64::from(opts.ag_count);
        let len = usize::try_from(total_blocks)? * BLOCK_SIZE;
        let ag_count = usize::try_from(opts.ag_count)?;
        Ok(Self {
            ag_blk_log: ceil_log2(opts.ag_blocks),
            inode_log,
            inopb_log: BLOCK_LOG - inode_log,
            image: vec![0; len],
            // AG block 0 holds the superblock copy and AG headers.
            next_agbno: vec![1; ag_count],
            inode_chunks: vec![None; ag_count],
            modes: BTreeMap::new(),
            root: None,
            opts,
        })
    }

    #[must_use]
    pub fn options(&self) -> &ImageOptions {
        &self.opts
    }

    #[must_use]
    pub fn ag_blk_log(&self) -> u8 {
        self.ag_blk_log
    }

    fn dir_fsbs(&self) -> u32 {
        1 << self.opts.dir_blk_log
    }

    fn dir_block_size(&self) -> usize {
        BLOCK_SIZE << self.opts.dir_blk_log
    }

    /// Bytes of inode literal area (data fork, no attribute fork).
    #[must_use]
    pub fn literal_len(&self) -> usize {
        let core = if self.opts.v5 {
            XFS_DINODE_CORE_SIZE_V3
        } else {
            XFS_DINODE_CORE_SIZE_V2
        };
        usize::from(self.opts.inode_size) - core
    }

    // ── Allocation ──────────────────────────────────────────────────────

    fn take_blocks(&mut self, agno: u32, count: u32) -> Option<u32> {
        let next = self.next_agbno.get_mut(usize::try_from(agno).ok()?)?;
        if u64::from(*next) + u64::from(count) > u64::from(self.opts.ag_blocks) {
            return None;
        }
        let agbno = *next;
        *next += count;
        Some(agbno)
    }

    fn fsb(&self, agno: u32, agbno: u32) -> FsBlock {
        FsBlock((u64::from(agno) << self.ag_blk_log) | u64::from(agbno))
    }

    /// Allocate `count` contiguous blocks in a specific AG.
    pub fn alloc_blocks_in(&mut self, agno: u32, count: u32) -> Result<FsBlock> {
        let agbno = self
            .take_blocks(agno, count)
            .ok_or_else(|| anyhow!("AG {agno} cannot hold {count} more blocks"))?;
        Ok(self.fsb(agno, agbno))
    }

    /// Allocate `count` contiguous blocks in the first AG with room.
    pub fn alloc_blocks(&mut self, count: u32) -> Result<FsBlock> {
        for agno in 0..self.opts.ag_count {
            if let Some(agbno) = self.take_blocks(agno, count) {
                return Ok(self.fsb(agno, agbno));
            }
        }
        bail!("image full: no AG holds {count} contiguous blocks")
    }

    /// Byte offset of an AG-encoded block in the image.
    #[must_use]
    pub fn fsblock_offset(&self, fsb: FsBlock) -> usize {
        let agno = fsb.0 >> self.ag_blk_log;
        let agbno = fsb.0 & ((1_u64 << self.ag_blk_log) - 1);
        let block = agno * u64::from(self.opts.ag_blocks) + agbno;
        usize::try_from(block).unwrap_or(usize::MAX) * BLOCK_SIZE
    }

    fn write_fsb(&mut self, fsb: FsBlock, data: &[u8]) {
        let off = self.fsblock_offset(fsb);
        self.image[off..off + data.len()].copy_from_slice(data);
    }

    /// Reserve an inode slot in AG 0.
    pub fn reserve_inode(&mut self) -> Result<InodeNumber> {
        self.reserve_inode_in(0)
    }

    /// Reserve an inode slot in `agno`, allocating a new inode block when
    /// the current one is full.
    pub fn reserve_inode_in(&mut self, agno: u32) -> Result<InodeNumber> {
        let idx = usize::try_from(agno)?;
        let per_block = 1_u32 << self.inopb_log;
        let (agbno, slot) = match self.inode_chunks.get(idx).copied().flatten() {
            Some((agbno, slot)) if slot < per_block => (agbno, slot),
            _ => {
                let agbno = self
                    .take_blocks(agno, 1)
                    .ok_or_else(|| anyhow!("AG {agno} has no room for inodes"))?;
                (agbno, 0)
            }
        };
        self.inode_chunks[idx] = Some((agbno, slot + 1));
        let agino = (u64::from(agbno) << self.inopb_log) | u64::from(slot);
        let shift = u32::from(self.ag_blk_log) + u32::from(self.inopb_log);
        Ok(InodeNumber((u64::from(agno) << shift) | agino))
    }

    /// Byte offset of an inode slot in the image.
    #[must_use]
    pub fn inode_offset(&self, ino: InodeNumber) -> usize {
        let agino_log = u32::from(self.ag_blk_log) + u32::from(self.inopb_log);
        let agno = ino.0 >> agino_log;
        let agino = ino.0 & ((1_u64 << agino_log) - 1);
        let agbno = agino >> self.inopb_log;
        let index = agino & ((1_u64 << self.inopb_log) - 1);
        let block = agno * u64::from(self.opts.ag_blocks) + agbno;
        let byte = block * BLOCK_SIZE as u64 + (index << self.inode_log);
        usize::try_from(byte).unwrap_or(usize::MAX)
    }

    // ── Inodes ──────────────────────────────────────────────────────────

    pub fn write_inode(&mut self, ino: InodeNumber, spec: &InodeSpec) -> Result<()> {
        ensure!(
            spec.fork.len() <= self.literal_len(),
            "fork of {} bytes exceeds the {}-byte literal area",
            spec.fork.len(),
            self.literal_len()
        );
        let off = self.inode_offset(ino);
        let size = usize::from(self.opts.inode_size);
        let slot = self
            .image
            .get_mut(off..off + size)
            .with_context(|| format!("inode {ino} lies outside the image"))?;
        slot.fill(0);

        put_u16(slot, 0, XFS_DINODE_MAGIC);
        put_u16(slot, 2, spec.mode);
        slot[4] = if self.opts.v5 { 3 } else { 2 };
        slot[5] = match spec.format {
            DinodeFormat::Dev => 0,
            DinodeFormat::Local => 1,
            DinodeFormat::Extents => 2,
            DinodeFormat::Btree => 3,
            DinodeFormat::Uuid => 4,
        };
        put_u32(slot, 8, IMAGE_UID);
        put_u32(slot, 12, IMAGE_GID);
        put_u32(slot, 16, spec.nlink);
        for ts in [32, 40, 48] {
            put_u32(slot, ts, IMAGE_TIMESTAMP);
        }
        put_u64(slot, 56, spec.size);
        put_u64(slot, 64, spec.nblocks);
        put_u32(slot, 76, spec.nextents);
        slot[83] = 2;
        put_u32(slot, 92, 1);
        let core = if self.opts.v5 {
            put_u32(slot, 144, IMAGE_TIMESTAMP);
            put_u64(slot, 152, ino.0);
            XFS_DINODE_CORE_SIZE_V3
        } else {
            XFS_DINODE_CORE_SIZE_V2
        };
        slot[core..core + spec.fork.len()].copy_from_slice(&spec.fork);
        self.modes.insert(ino.0, spec.mode);
        Ok(())
    }

    fn bmbt_hdr_len(&self) -> usize {
        if self.opts.v5 {
            XFS_BTREE_LBLOCK_CRC_LEN
        } else {
            XFS_BTREE_LBLOCK_LEN
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn bmbt_block(
        &self,
        owner: InodeNumber,
        at: FsBlock,
        level: u16,
        numrecs: usize,
        left: FsBlock,
        right: FsBlock,
    ) -> Result<Vec<u8>> {
        let mut block = vec![0_u8; BLOCK_SIZE];
        let magic = if self.opts.v5 {
            XFS_BMAP_CRC_MAGIC
        } else {
            XFS_BMAP_MAGIC
        };
        put_u32(&mut block, 0, magic);
        put_u16(&mut block, 4, level);
        put_u16(&mut block, 6, u16::try_from(numrecs)?);
        put_u64(&mut block, 8, left.0);
        put_u64(&mut block, 16, right.0);
        if self.opts.v5 {
            let daddr = u64::try_from(self.fsblock_offset(at))? >> 9;
            put_u64(&mut block, 24, daddr);
            put_u64(&mut block, 56, owner.0);
        }
        Ok(block)
    }

    /// Write a BMBT for `recs`; returns the inline root fork and the number
    /// of btree blocks used.
    fn build_btree(
        &mut self,
        owner: InodeNumber,
        recs: &[BmbtIrec],
        shape: BtreeShape,
    ) -> Result<(Vec<u8>, u64)> {
        ensure!(!recs.is_empty(), "a btree fork needs at least one extent");
        ensure!(
            shape.leaf_capacity >= 1 && shape.fanout >= 2,
            "degenerate btree shape {shape:?}"
        );
        let hdr = self.bmbt_hdr_len();
        let block_max = (BLOCK_SIZE - hdr) / XFS_BMBT_REC_SIZE;
        let root_max = (self.literal_len() - XFS_BMDR_HDR_SIZE) / 16;
        let leaf_cap = shape.leaf_capacity.min(block_max);
        let fanout = shape.fanout.min(block_max);
        let mut used = 0_u64;

        let chunks: Vec<&[BmbtIrec]> = recs.chunks(leaf_cap).collect();
        let mut level_nodes = Vec::with_capacity(chunks.len());
        for _ in &chunks {
            level_nodes.push(self.alloc_blocks(1)?);
        }
        for (i, chunk) in chunks.iter().enumerate() {
            let left = if i == 0 { FsBlock::NULL } else { level_nodes[i - 1] };
            let right = level_nodes.get(i + 1).copied().unwrap_or(FsBlock::NULL);
            let mut block = self.bmbt_block(owner, level_nodes[i], 0, chunk.len(), left, right)?;
            for (j, rec) in chunk.iter().enumerate() {
                let at = hdr + j * XFS_BMBT_REC_SIZE;
                block[at..at + XFS_BMBT_REC_SIZE].copy_from_slice(&rec.encode());
            }
            self.write_fsb(level_nodes[i], &block);
            used += 1;
        }
        let mut level: Vec<(u64, FsBlock)> = chunks
            .iter()
            .zip(&level_nodes)
            .map(|(chunk, fsb)| (chunk[0].startoff.0, *fsb))
            .collect();

        let mut height = 0_u16;
        while level.len() > fanout.min(root_max) {
            height += 1;
            let groups: Vec<&[(u64, FsBlock)]> = level.chunks(fanout).collect();
            let mut parents = Vec::with_capacity(groups.len());
            for _ in &groups {
                parents.push(self.alloc_blocks(1)?);
            }
            let mut next_level = Vec::with_capacity(groups.len());
            for (i, group) in groups.iter().enumerate() {
                let left = if i == 0 { FsBlock::NULL } else { parents[i - 1] };
                let right = parents.get(i + 1).copied().unwrap_or(FsBlock::NULL);
                let mut block = self.bmbt_block(owner, parents[i], height, group.len(), left, right)?;
                for (j, (key, ptr)) in group.iter().enumerate() {
                    put_u64(&mut block, hdr + j * 8, *key);
                    put_u64(&mut block, hdr + block_max * 8 + j * 8, ptr.0);
                }
                self.write_fsb(parents[i], &block);
                used += 1;
                next_level.push((group[0].0, parents[i]));
            }
            level = next_level;
        }

        let mut fork = vec![0_u8; self.literal_len()];
        put_u16(&mut fork, 0, height + 1);
        put_u16(&mut fork, 2, u16::try_from(level.len())?);
        for (i, (key, ptr)) in level.iter().enumerate() {
            put_u64(&mut fork, XFS_BMDR_HDR_SIZE + i * 8, *key);
            put_u64(&mut fork, XFS_BMDR_HDR_SIZE + root_max * 8 + i * 8, ptr.0);
        }
        Ok((fork, used))
    }

    /// Encode a mapping as an inline extent list, or as a btree when asked
    /// or when the list does not fit.
    fn build_fork(
        &mut self,
        owner: InodeNumber,
        recs: &[BmbtIrec],
        shape: Option<BtreeShape>,
    ) -> Result<(DinodeFormat, Vec<u8>, u64)> {
        match shape {
            None if recs.len() * XFS_BMBT_REC_SIZE <= self.literal_len() => {
                let fork = recs.iter().flat_map(BmbtIrec::encode).collect();
                Ok((DinodeFormat::Extents, fork, 0))
            }
            _ => {
                let (fork, used) = self.build_btree(owner, recs, shape.unwrap_or_default())?;
                Ok((DinodeFormat::Btree, fork, used))
            }
        }
    }

    // ── Files ───────────────────────────────────────────────────────────

    /// Regular file holding `data` in one contiguous extent.
    pub fn add_file(&mut self, data: &[u8]) -> Result<InodeNumber> {
        let ino = self.reserve_inode()?;
        let nblocks = u32::try_from(data.len().div_ceil(BLOCK_SIZE))?;
        let mut recs = Vec::new();
        if nblocks > 0 {
            let fsb = self.alloc_blocks(nblocks)?;
            let off = self.fsblock_offset(fsb);
            self.image[off..off + data.len()].copy_from_slice(data);
            recs.push(BmbtIrec {
                startoff: FileBlock(0),
                startblock: fsb,
                blockcount: nblocks,
                unwritten: false,
            });
        }
        let (format, fork, extra) = self.build_fork(ino, &recs, None)?;
        self.write_inode(
            ino,
            &InodeSpec {
                mode: S_IFREG | 0o644,
                format,
                size: u64::try_from(data.len())?,
                nblocks: u64::from(nblocks) + extra,
                nextents: u32::try_from(recs.len())?,
                nlink: 1,
                fork,
            },
        )?;
        Ok(ino)
    }

    fn patterned_extents(&mut self, extents: &[ExtentSpec]) -> Result<(Vec<BmbtIrec>, u64)> {
        let mut recs = Vec::with_capacity(extents.len());
        let mut blocks = 0_u64;
        let mut prev_end = 0_u64;
        for ext in extents {
            ensure!(ext.len > 0, "zero-length extent at {}", ext.startoff);
            ensure!(
                recs.is_empty() || ext.startoff >= prev_end,
                "extents overlap or are unsorted at {}",
                ext.startoff
            );
            let fsb = self.alloc_blocks(ext.len)?;
            for k in 0..ext.len {
                let logical = ext.startoff + u64::from(k);
                let data = [block_pattern(logical); BLOCK_SIZE];
                self.write_fsb(FsBlock(fsb.0 + u64::from(k)), &data);
            }
            recs.push(BmbtIrec {
                startoff: FileBlock(ext.startoff),
                startblock: fsb,
                blockcount: ext.len,
                unwritten: ext.unwritten,
            });
            prev_end = ext.startoff + u64::from(ext.len);
            blocks += u64::from(ext.len);
        }
        Ok((recs, blocks))
    }

    /// Regular file of `size` bytes whose extents are filled with
    /// [`block_pattern`]. Gaps between extents are holes.
    pub fn add_file_with_extents(&mut self, size: u64, extents: &[ExtentSpec]) -> Result<InodeNumber> {
        self.add_mapped_file(size, extents, None)
    }

    /// Like [`Self::add_file_with_extents`] but always in btree format.
    pub fn add_btree_file(
        &mut self,
        size: u64,
        extents: &[ExtentSpec],
        shape: BtreeShape,
    ) -> Result<InodeNumber> {
        self.add_mapped_file(size, extents, Some(shape))
    }

    fn add_mapped_file(
        &mut self,
        size: u64,
        extents: &[ExtentSpec],
        shape: Option<BtreeShape>,
    ) -> Result<InodeNumber> {
        let ino = self.reserve_inode()?;
        let (recs, blocks) = self.patterned_extents(extents)?;
        let (format, fork, extra) = self.build_fork(ino, &recs, shape)?;
        self.write_inode(
            ino,
            &InodeSpec {
                mode: S_IFREG | 0o644,
                format,
                size,
                nblocks: blocks + extra,
                nextents: u32::try_from(recs.len())?,
                nlink: 1,
                fork,
            },
        )?;
        Ok(ino)
    }

    /// Symlink stored inline when it fits the literal area, remotely
    /// otherwise.
    pub fn add_symlink(&mut self, target: &[u8]) -> Result<InodeNumber> {
        if target.len() <= self.literal_len() {
            self.add_local_symlink(target)
        } else {
            self.add_remote_symlink(target)
        }
    }

    fn check_target(target: &[u8]) -> Result<()> {
        ensure!(
            !target.is_empty() && target.len() <= XFS_SYMLINK_MAXLEN,
            "symlink target length {} outside 1..=1024",
            target.len()
        );
        Ok(())
    }

    pub fn add_local_symlink(&mut self, target: &[u8]) -> Result<InodeNumber> {
        Self::check_target(target)?;
        let ino = self.reserve_inode()?;
        self.write_inode(
            ino,
            &InodeSpec {
                mode: S_IFLNK | 0o777,
                format: DinodeFormat::Local,
                size: u64::try_from(target.len())?,
                nblocks: 0,
                nextents: 0,
                nlink: 1,
                fork: target.to_vec(),
            },
        )?;
        Ok(ino)
    }

    pub fn add_remote_symlink(&mut self, target: &[u8]) -> Result<InodeNumber> {
        Self::check_target(target)?;
        let ino = self.reserve_inode()?;
        let hdr = if self.opts.v5 { XFS_SYMLINK_HDR_SIZE } else { 0 };
        let payload = BLOCK_SIZE - hdr;
        let chunks: Vec<&[u8]> = target.chunks(payload).collect();
        let nblocks = u32::try_from(chunks.len())?;
        let fsb = self.alloc_blocks(nblocks)?;
        for (i, chunk) in chunks.iter().enumerate() {
            let mut block = vec![0_u8; BLOCK_SIZE];
            if self.opts.v5 {
                put_u32(&mut block, 0, XFS_SYMLINK_MAGIC);
                put_u32(&mut block, 4, u32::try_from(i * payload)?);
                put_u32(&mut block, 8, u32::try_from(chunk.len())?);
                put_u64(&mut block, 32, ino.0);
            }
            block[hdr..hdr + chunk.len()].copy_from_slice(chunk);
            self.write_fsb(FsBlock(fsb.0 + u64::try_from(i)?), &block);
        }
        let recs = [BmbtIrec {
            startoff: FileBlock(0),
            startblock: fsb,
            blockcount: nblocks,
            unwritten: false,
        }];
        let (format, fork, extra) = self.build_fork(ino, &recs, None)?;
        self.write_inode(
            ino,
            &InodeSpec {
                mode: S_IFLNK | 0o777,
                format,
                size: u64::try_from(target.len())?,
                nblocks: u64::from(nblocks) + extra,
                nextents: 1,
                nlink: 1,
                fork,
            },
        )?;
        Ok(ino)
    }

    /// Device, FIFO or socket inode; `rdev` lands in the data fork.
    pub fn add_special(&mut self, mode: u16, rdev: u32) -> Result<InodeNumber> {
        let ino = self.reserve_inode()?;
        self.write_inode(
            ino,
            &InodeSpec {
                mode,
                format: DinodeFormat::Dev,
                size: 0,
                nblocks: 0,
                nextents: 0,
                nlink: 1,
                fork: rdev.to_be_bytes().to_vec(),
            },
        )?;
        Ok(ino)
    }

    // ── Directories ─────────────────────────────────────────────────────

    fn dir_records<N: AsRef<[u8]>>(&self, entries: &[(N, InodeNumber)]) -> Result<Vec<DirRec>> {
        entries
            .iter()
            .map(|(name, ino)| {
                let name = name.as_ref();
                ensure!(
                    !name.is_empty() && name.len() <= XFS_MAXNAMELEN,
                    "bad entry name length {}",
                    name.len()
                );
                let ftype = self
                    .modes
                    .get(&ino.0)
                    .map_or(0, |mode| XfsFileType::from_mode(*mode).to_ftype());
                Ok(DirRec {
                    name: name.to_vec(),
                    ino: ino.0,
                    ftype,
                })
            })
            .collect()
    }

    fn dots(dir: InodeNumber, parent: InodeNumber) -> [DirRec; 2] {
        let dir_ftype = XfsFileType::Directory.to_ftype();
        [
            DirRec {
                name: b".".to_vec(),
                ino: dir.0,
                ftype: dir_ftype,
            },
            DirRec {
                name: b"..".to_vec(),
                ino: parent.0,
                ftype: dir_ftype,
            },
        ]
    }

    /// Reserve an inode and write a directory into it.
    pub fn add_dir<N: AsRef<[u8]>>(
        &mut self,
        parent: InodeNumber,
        entries: &[(N, InodeNumber)],
        layout: DirLayout,
    ) -> Result<InodeNumber> {
        let ino = self.reserve_inode()?;
        self.add_dir_at(ino, parent, entries, layout)?;
        Ok(ino)
    }

    /// Write a directory into a reserved inode. Needed when children must
    /// name the directory as their parent before it exists.
    pub fn add_dir_at<N: AsRef<[u8]>>(
        &mut self,
        ino: InodeNumber,
        parent: InodeNumber,
        entries: &[(N, InodeNumber)],
        layout: DirLayout,
    ) -> Result<()> {
        let recs = self.dir_records(entries)?;
        if layout == DirLayout::Shortform {
            let fork = self.shortform_fork(parent, &recs)?;
            return self.write_inode(
                ino,
                &InodeSpec {
                    mode: S_IFDIR | 0o755,
                    format: DinodeFormat::Local,
                    size: u64::try_from(fork.len())?,
                    nblocks: 0,
                    nextents: 0,
                    nlink: 2,
                    fork,
                },
            );
        }

        let mut all: Vec<DirRec> = Self::dots(ino, parent).into();
        all.extend(recs);
        let (blocks, data_blocks) = match layout {
            DirLayout::Block => (vec![(0, self.single_block_dir(ino, &all)?)], 1),
            DirLayout::Leaf { entries_per_block } => {
                let (mut blocks, leaf, bests) = self.data_blocks(ino, &all, entries_per_block)?;
                let n = blocks.len();
                blocks.push((self.leaf_region_fb(0), self.leaf1_block(ino, leaf, &bests)?));
                (blocks, n)
            }
            DirLayout::Node {
                entries_per_block,
                leaf_capacity,
                fanout,
            } => {
                let (mut blocks, leaf, bests) = self.data_blocks(ino, &all, entries_per_block)?;
                let n = blocks.len();
                blocks.extend(self.node_blocks(ino, leaf, leaf_capacity, fanout)?);
                blocks.push((self.free_fb(), self.free_block(ino, &bests)?));
                (blocks, n)
            }
            DirLayout::Shortform => unreachable!("handled above"),
        };

        let (recs, blocks_used) = self.place_dir_blocks(blocks)?;
        let (format, fork, extra) = self.build_fork(ino, &recs, None)?;
        self.write_inode(
            ino,
            &InodeSpec {
                mode: S_IFDIR | 0o755,
                format,
                size: u64::try_from(data_blocks * self.dir_block_size())?,
                nblocks: blocks_used + extra,
                nextents: u32::try_from(recs.len())?,
                nlink: 2,
                fork,
            },
        )
    }

    fn shortform_fork(&self, parent: InodeNumber, recs: &[DirRec]) -> Result<Vec<u8>> {
        let wide_count = recs
            .iter()
            .map(|r| r.ino)
            .chain(std::iter::once(parent.0))
            .filter(|ino| *ino > u64::from(u32::MAX))
            .count();
        let width = if wide_count > 0 { 8 } else { 4 };
        let mut fork = vec![
            u8::try_from(recs.len()).context("too many shortform entries")?,
            u8::try_from(wide_count).unwrap_or(u8::MAX),
        ];
        let push_ino = |fork: &mut Vec<u8>, ino: u64| -> Result<()> {
            if width == 8 {
                fork.extend_from_slice(&ino.to_be_bytes());
            } else {
                fork.extend_from_slice(&u32::try_from(ino)?.to_be_bytes());
            }
            Ok(())
        };
        push_ino(&mut fork, parent.0)?;

        let mut offset = self.data_hdr_len()
            + data_entry_size(1, self.opts.ftype)
            + data_entry_size(2, self.opts.ftype);
        for rec in recs {
            fork.push(u8::try_from(rec.name.len())?);
            fork.extend_from_slice(&u16::try_from(offset)?.to_be_bytes());
            fork.extend_from_slice(&rec.name);
            if self.opts.ftype {
                fork.push(rec.ftype);
            }
            push_ino(&mut fork, rec.ino)?;
            offset += data_entry_size(rec.name.len(), self.opts.ftype);
        }
        ensure!(
            fork.len() <= self.literal_len(),
            "shortform directory of {} bytes does not fit the literal area",
            fork.len()
        );
        Ok(fork)
    }

    fn data_hdr_len(&self) -> usize {
        if self.opts.v5 {
            XFS_DIR3_DATA_HDR_SIZE
        } else {
            XFS_DIR2_DATA_HDR_SIZE
        }
    }

    fn leaf_region_fb(&self, index: u64) -> u64 {
        (XFS_DIR2_LEAF_OFFSET_BYTES >> BLOCK_LOG) + index * u64::from(self.dir_fsbs())
    }

    fn free_fb(&self) -> u64 {
        XFS_DIR2_FREE_OFFSET_BYTES >> BLOCK_LOG
    }

    fn dataptr(&self, db: u64, off: usize) -> Result<u32> {
        let byte = (db << (BLOCK_LOG + self.opts.dir_blk_log)) + u64::try_from(off)?;
        Ok(u32::try_from(byte >> 3)?)
    }

    /// Data header for a block or data-format directory block.
    fn data_block_header(&self, owner: InodeNumber, single: bool) -> Vec<u8> {
        let mut block = vec![0_u8; self.dir_block_size()];
        let magic = match (self.opts.v5, single) {
            (false, true) => XFS_DIR2_BLOCK_MAGIC,
            (false, false) => XFS_DIR2_DATA_MAGIC,
            (true, true) => XFS_DIR3_BLOCK_MAGIC,
            (true, false) => XFS_DIR3_DATA_MAGIC,
        };
        put_u32(&mut block, 0, magic);
        if self.opts.v5 {
            put_u64(&mut block, 40, owner.0);
        }
        block
    }

    /// Pack `recs` into `block[hdr..end]`, ending with a free marker.
    /// Returns the free length left behind.
    fn fill_data_region(
        &self,
        block: &mut [u8],
        db: u64,
        recs: &[DirRec],
        end: usize,
        leaf: &mut Vec<LeafEntry>,
    ) -> Result<u16> {
        let hdr = self.data_hdr_len();
        let mut off = hdr;
        for rec in recs {
            let n = rec.name.len();
            let size = data_entry_size(n, self.opts.ftype);
            ensure!(
                off + size <= end,
                "entries overflow directory data block {db}"
            );
            put_u64(block, off, rec.ino);
            block[off + 8] = u8::try_from(n)?;
            block[off + 9..off + 9 + n].copy_from_slice(&rec.name);
            if self.opts.ftype {
                block[off + 9 + n] = rec.ftype;
            }
            put_u16(block, off + size - 2, u16::try_from(off)?);
            leaf.push(LeafEntry {
                hashval: xfs_da_hashname(&rec.name),
                address: self.dataptr(db, off)?,
            });
            off += size;
        }
        let free = end - off;
        if free > 0 {
            put_u16(block, off, XFS_DIR2_DATA_FREE_TAG);
            put_u16(block, off + 2, u16::try_from(free)?);
            put_u16(block, end - 2, u16::try_from(off)?);
            let bestfree = if self.opts.v5 { 48 } else { 4 };
            put_u16(block, bestfree, u16::try_from(off)?);
            put_u16(block, bestfree + 2, u16::try_from(free)?);
        }
        Ok(u16::try_from(free)?)
    }

    fn single_block_dir(&self, owner: InodeNumber, all: &[DirRec]) -> Result<Vec<u8>> {
        let size = self.dir_block_size();
        let leaf_start = size
            .checked_sub(8 + 8 * all.len())
            .filter(|start| *start >= self.data_hdr_len())
            .context("entries do not fit a single directory block")?;
        let mut block = self.data_block_header(owner, true);
        let mut leaf = Vec::with_capacity(all.len());
        self.fill_data_region(&mut block, 0, all, leaf_start, &mut leaf)?;
        leaf.sort_by_key(|e| e.hashval);
        for (i, e) in leaf.iter().enumerate() {
            put_u32(&mut block, leaf_start + i * 8, e.hashval);
            put_u32(&mut block, leaf_start + i * 8 + 4, e.address);
        }
        put_u32(&mut block, size - 8, u32::try_from(all.len())?);
        put_u32(&mut block, size - 4, 0);
        Ok(block)
    }

    /// Data blocks `0..n`, each holding at most `per_block` entries. Returns
    /// the blocks, the hash-sorted leaf entries and each block's free length.
    #[allow(clippy::type_complexity)]
    fn data_blocks(
        &self,
        owner: InodeNumber,
        all: &[DirRec],
        per_block: usize,
    ) -> Result<(Vec<(u64, Vec<u8>)>, Vec<LeafEntry>, Vec<u16>)> {
        ensure!(per_block >= 2, "need room for at least two entries per block");
        let mut blocks = Vec::new();
        let mut leaf = Vec::with_capacity(all.len());
        let mut bests = Vec::new();
        for (db, chunk) in all.chunks(per_block).enumerate() {
            let db = u64::try_from(db)?;
            let mut block = self.data_block_header(owner, false);
            let end = block.len();
            bests.push(self.fill_data_region(&mut block, db, chunk, end, &mut leaf)?);
            blocks.push((db << self.opts.dir_blk_log, block));
        }
        leaf.sort_by_key(|e| e.hashval);
        Ok((blocks, leaf, bests))
    }

    fn da_header(&self, block: &mut [u8], magic_v2: u16, magic_v3: u16, owner: InodeNumber) {
        if self.opts.v5 {
            put_u16(block, 8, magic_v3);
            put_u64(block, 48, owner.0);
        } else {
            put_u16(block, 8, magic_v2);
        }
    }

    fn leaf_hdr_len(&self) -> usize {
        if self.opts.v5 {
            XFS_DIR3_LEAF_HDR_SIZE
        } else {
            XFS_DIR2_LEAF_HDR_SIZE
        }
    }

    fn count_offset(&self) -> usize {
        if self.opts.v5 { 56 } else { 12 }
    }

    fn leaf1_block(&self, owner: InodeNumber, leaf: Vec<LeafEntry>, bests: &[u16]) -> Result<Vec<u8>> {
        let size = self.dir_block_size();
        let hdr = self.leaf_hdr_len();
        let bests_at = size - 4 - 2 * bests.len();
        ensure!(
            hdr + 8 * leaf.len() <= bests_at,
            "{} leaf entries do not fit a leaf1 block",
            leaf.len()
        );
        let mut block = vec![0_u8; size];
        self.da_header(&mut block, XFS_DIR2_LEAF1_MAGIC, XFS_DIR3_LEAF1_MAGIC, owner);
        put_u16(&mut block, self.count_offset(), u16::try_from(leaf.len())?);
        for (i, e) in leaf.iter().enumerate() {
            put_u32(&mut block, hdr + i * 8, e.hashval);
            put_u32(&mut block, hdr + i * 8 + 4, e.address);
        }
        for (i, best) in bests.iter().enumerate() {
            put_u16(&mut block, bests_at + i * 2, *best);
        }
        put_u32(&mut block, size - 4, u32::try_from(bests.len())?);
        Ok(block)
    }

    /// Da node root at the start of the leaf region, leafn blocks after it,
    /// then interior nodes.
    fn node_blocks(
        &self,
        owner: InodeNumber,
        leaf: Vec<LeafEntry>,
        leaf_capacity: usize,
        fanout: usize,
    ) -> Result<Vec<(u64, Vec<u8>)>> {
        ensure!(leaf_capacity >= 1 && fanout >= 2, "degenerate node shape");
        let size = self.dir_block_size();
        let lhdr = self.leaf_hdr_len();
        let nhdr = if self.opts.v5 {
            XFS_DA3_NODE_HDR_SIZE
        } else {
            XFS_DA_NODE_HDR_SIZE
        };
        ensure!(lhdr + 8 * leaf_capacity <= size, "leaf capacity exceeds the block");
        ensure!(nhdr + 8 * fanout <= size, "fanout exceeds the block");
        let count_off = self.count_offset();

        let chunks: Vec<&[LeafEntry]> = leaf.chunks(leaf_capacity).collect();
        let mut out = Vec::new();
        let mut next_index = 1_u64;
        let mut children: Vec<(u32, u64)> = Vec::with_capacity(chunks.len());
        let n = u64::try_from(chunks.len())?;
        for (i, chunk) in chunks.iter().enumerate() {
            let i = u64::try_from(i)?;
            let fb = self.leaf_region_fb(next_index + i);
            let mut block = vec![0_u8; size];
            if i + 1 < n {
                put_u32(&mut block, 0, u32::try_from(self.leaf_region_fb(next_index + i + 1))?);
            }
            if i > 0 {
                put_u32(&mut block, 4, u32::try_from(self.leaf_region_fb(next_index + i - 1))?);
            }
            self.da_header(&mut block, XFS_DIR2_LEAFN_MAGIC, XFS_DIR3_LEAFN_MAGIC, owner);
            put_u16(&mut block, count_off, u16::try_from(chunk.len())?);
            for (j, e) in chunk.iter().enumerate() {
                put_u32(&mut block, lhdr + j * 8, e.hashval);
                put_u32(&mut block, lhdr + j * 8 + 4, e.address);
            }
            let last_hash = chunk.last().map_or(0, |e| e.hashval);
            children.push((last_hash, fb));
            out.push((fb, block));
        }
        next_index += n;

        let node_block = |level: u16, entries: &[(u32, u64)], forw: u64, back: u64| -> Result<Vec<u8>> {
            let mut block = vec![0_u8; size];
            put_u32(&mut block, 0, u32::try_from(forw)?);
            put_u32(&mut block, 4, u32::try_from(back)?);
            self.da_header(&mut block, XFS_DA_NODE_MAGIC, XFS_DA3_NODE_MAGIC, owner);
            put_u16(&mut block, count_off, u16::try_from(entries.len())?);
            put_u16(&mut block, count_off + 2, level);
            for (j, (hash, before)) in entries.iter().enumerate() {
                put_u32(&mut block, nhdr + j * 8, *hash);
                put_u32(&mut block, nhdr + j * 8 + 4, u32::try_from(*before)?);
            }
            Ok(block)
        };

        let mut level = 1_u16;
        while children.len() > fanout {
            let groups: Vec<&[(u32, u64)]> = children.chunks(fanout).collect();
            let g = u64::try_from(groups.len())?;
            let mut parents = Vec::with_capacity(groups.len());
            for (i, group) in groups.iter().enumerate() {
                let i = u64::try_from(i)?;
                let fb = self.leaf_region_fb(next_index + i);
                let forw = if i + 1 < g { self.leaf_region_fb(next_index + i + 1) } else { 0 };
                let back = if i > 0 { self.leaf_region_fb(next_index + i - 1) } else { 0 };
                out.push((fb, node_block(level, group, forw, back)?));
                parents.push((group.last().map_or(0, |c| c.0), fb));
            }
            next_index += g;
            children = parents;
            level += 1;
        }
        out.push((self.leaf_region_fb(0), node_block(level, &children, 0, 0)?));
        Ok(out)
    }

    fn free_block(&self, owner: InodeNumber, bests: &[u16]) -> Result<Vec<u8>> {
        let mut block = vec![0_u8; self.dir_block_size()];
        let n = u32::try_from(bests.len())?;
        let hdr = if self.opts.v5 {
            put_u32(&mut block, 0, XFS_DIR3_FREE_MAGIC);
            put_u64(&mut block, 40, owner.0);
            put_u32(&mut block, 52, n);
            put_u32(&mut block, 56, n);
            64
        } else {
            put_u32(&mut block, 0, XFS_DIR2_FREE_MAGIC);
            put_u32(&mut block, 8, n);
            put_u32(&mut block, 12, n);
            16
        };
        for (i, best) in bests.iter().enumerate() {
            put_u16(&mut block, hdr + i * 2, *best);
        }
        Ok(block)
    }

    fn push_extent(recs: &mut Vec<BmbtIrec>, startoff: u64, fsb: FsBlock, len: u32) {
        if let Some(last) = recs.last_mut() {
            let span = u64::from(last.blockcount);
            if last.startoff.0 + span == startoff && last.startblock.0 + span == fsb.0 {
                last.blockcount += len;
                return;
            }
        }
        recs.push(BmbtIrec {
            startoff: FileBlock(startoff),
            startblock: fsb,
            blockcount: len,
            unwritten: false,
        });
    }

    /// Allocate and write directory blocks keyed by file block; returns the
    /// merged extent list and the number of blocks used.
    fn place_dir_blocks(&mut self, mut blocks: Vec<(u64, Vec<u8>)>) -> Result<(Vec<BmbtIrec>, u64)> {
        blocks.sort_by_key(|(fb, _)| *fb);
        let fsbs = self.dir_fsbs();
        let mut recs = Vec::new();
        let mut used = 0_u64;
        for (fb, data) in blocks {
            if self.opts.scatter_dir_blocks && fsbs > 1 {
                for (k, piece) in data.chunks(BLOCK_SIZE).enumerate() {
                    let fsb = self.alloc_blocks(1)?;
                    self.write_fsb(fsb, piece);
                    self.alloc_blocks(1)?;
                    Self::push_extent(&mut recs, fb + u64::try_from(k)?, fsb, 1);
                }
            } else {
                let fsb = self.alloc_blocks(fsbs)?;
                self.write_fsb(fsb, &data);
                Self::push_extent(&mut recs, fb, fsb, fsbs);
            }
            used += u64::from(fsbs);
        }
        Ok((recs, used))
    }

    // ── Superblock and output ───────────────────────────────────────────

    pub fn set_root(&mut self, ino: InodeNumber) {
        self.root = Some(ino);
    }

    #[must_use]
    pub fn root(&self) -> Option<InodeNumber> {
        self.root
    }

    /// Encode the primary superblock for the current geometry.
    pub fn superblock_region(&self) -> Result<Vec<u8>> {
        let root = self.root.context("root inode not set")?;
        let mut sb = vec![0_u8; XFS_SUPERBLOCK_SIZE];
        put_u32(&mut sb, 0, XFS_SB_MAGIC);
        put_u32(&mut sb, 4, u32::try_from(BLOCK_SIZE)?);
        put_u64(&mut sb, 8, u64::from(self.opts.ag_blocks) * u64::from(self.opts.ag_count));
        sb[32..48].copy_from_slice(b"xfsr-synthetic!!");
        put_u64(&mut sb, 56, root.0);
        put_u32(&mut sb, 84, self.opts.ag_blocks);
        put_u32(&mut sb, 88, self.opts.ag_count);
        let version = if self.opts.v5 {
            XFS_SB_VERSION_5
        } else {
            let mut v = XFS_SB_VERSION_4 | XFS_SB_VERSION_DIRV2BIT;
            if self.opts.ftype {
                v |= XFS_SB_VERSION_MOREBITSBIT;
            }
            v
        };
        put_u16(&mut sb, 100, version);
        put_u16(&mut sb, 102, 512);
        put_u16(&mut sb, 104, self.opts.inode_size);
        put_u16(&mut sb, 106, 1 << self.inopb_log);
        sb[108..112].copy_from_slice(b"xfsr");
        sb[120] = BLOCK_LOG;
        sb[121] = 9;
        sb[122] = self.inode_log;
        sb[123] = self.inopb_log;
        sb[124] = self.ag_blk_log;
        sb[192] = self.opts.dir_blk_log;
        if self.opts.v5 {
            if self.opts.ftype {
                put_u32(&mut sb, 216, XFS_SB_FEAT_INCOMPAT_FTYPE);
            }
        } else if self.opts.ftype {
            put_u32(&mut sb, 200, XFS_SB_VERSION2_FTYPE);
            put_u32(&mut sb, 204, XFS_SB_VERSION2_FTYPE);
        }
        Ok(sb)
    }

    /// Finalize the image bytes.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        let sb = self.superblock_region()?;
        self.image[..sb.len()].copy_from_slice(&sb);
        Ok(self.image)
    }

    /// Finalize into an in-memory device.
    pub fn into_device(self) -> Result<MemByteDevice> {
        Ok(MemByteDevice::new(self.finish()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xfsr_ondisk::{XfsDinode, XfsSuperblock, parse_extent_list};

    #[test]
    fn superblock_round_trips_through_the_parser() {
        let mut b = ImageBuilder::new(ImageOptions::default()).expect("builder");
        let root = b.reserve_inode().expect("ino");
        b.add_dir_at::<&[u8]>(root, root, &[], DirLayout::Shortform)
            .expect("root");
        b.set_root(root);
        let image = b.finish().expect("finish");
        let sb = XfsSuperblock::parse_superblock_region(&image[..512]).expect("parse");
        sb.validate().expect("valid");
        assert_eq!(sb.root_ino, root);
        let geo = sb.geometry().expect("geometry");
        assert_eq!(geo.ag_blk_log, 8);
        assert_eq!(geo.inopb_log, 3);
    }

    #[test]
    fn inode_numbers_encode_ag_and_slot() {
        let mut b = ImageBuilder::new(ImageOptions::default()).expect("builder");
        let first = b.reserve_inode().expect("ino");
        let second = b.reserve_inode().expect("ino");
        assert_eq!(second.0, first.0 + 1);
        let far = b.reserve_inode_in(1).expect("ag1 ino");
        assert_eq!(far.0 >> (8 + 3), 1);
        assert_eq!(b.inode_offset(far), (200 + 1) * BLOCK_SIZE);
    }

    #[test]
    fn file_inode_decodes() {
        let mut b = ImageBuilder::new(ImageOptions::default()).expect("builder");
        let ino = b.add_file(b"hello").expect("file");
        let off = b.inode_offset(ino);
        b.set_root(ino);
        let image = b.finish().expect("finish");
        let dinode = XfsDinode::parse_from_bytes(&image[off..off + 512], ino).expect("inode");
        assert!(dinode.is_reg());
        assert_eq!(dinode.size, 5);
        let recs = parse_extent_list(&dinode.data_fork, dinode.nextents).expect("extents");
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].blockcount, 1);
    }

    #[test]
    fn oversized_shortform_is_refused() {
        let mut b = ImageBuilder::new(ImageOptions::default()).expect("builder");
        let file = b.add_file(b"").expect("file");
        let names: Vec<(Vec<u8>, InodeNumber)> = (0..40)
            .map(|i| (format!("entry-{i:04}").into_bytes(), file))
            .collect();
        let root = b.reserve_inode().expect("root");
        assert!(
            b.add_dir_at(root, root, &names, DirLayout::Shortform)
                .is_err()
        );
        assert!(b.add_dir_at(root, root, &names, DirLayout::Block).is_ok());
    }
}
