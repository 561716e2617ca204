#![forbid(unsafe_code)]
//! Superblock decoding and the geometry derived from it.

use serde::{Deserialize, Serialize};
use xfsr_types::{
    AgNumber, BlockNumber, FileBlock, FsBlock, InodeNumber, ParseError, XFS_SB_MAGIC,
    XFS_SUPPORTED_BLOCK_SIZE, read_be_u16, read_be_u32, read_be_u64, read_fixed, read_u8,
    trim_nul_padded,
};

pub const XFS_SB_VERSION_NUMBITS: u16 = 0x000F;
pub const XFS_SB_VERSION_4: u16 = 4;
pub const XFS_SB_VERSION_5: u16 = 5;
pub const XFS_SB_VERSION_DIRV2BIT: u16 = 0x2000;
pub const XFS_SB_VERSION_MOREBITSBIT: u16 = 0x8000;
pub const XFS_SB_VERSION2_FTYPE: u32 = 0x0000_0200;

pub const XFS_SB_FEAT_INCOMPAT_FTYPE: u32 = 1 << 0;
pub const XFS_SB_FEAT_INCOMPAT_SPINODES: u32 = 1 << 1;
pub const XFS_SB_FEAT_INCOMPAT_META_UUID: u32 = 1 << 2;
pub const XFS_SB_FEAT_INCOMPAT_BIGTIME: u32 = 1 << 3;
pub const XFS_SB_FEAT_INCOMPAT_NEEDSREPAIR: u32 = 1 << 4;
pub const XFS_SB_FEAT_INCOMPAT_NREXT64: u32 = 1 << 5;

/// Incompat features a read-only walk can honor.
pub const XFS_SB_FEAT_INCOMPAT_SUPPORTED: u32 = XFS_SB_FEAT_INCOMPAT_FTYPE
    | XFS_SB_FEAT_INCOMPAT_SPINODES
    | XFS_SB_FEAT_INCOMPAT_META_UUID
    | XFS_SB_FEAT_INCOMPAT_BIGTIME
    | XFS_SB_FEAT_INCOMPAT_NREXT64;

/// Directory leaf region starts 32 GiB into the directory address space.
pub const XFS_DIR2_LEAF_OFFSET_BYTES: u64 = 1 << 35;
/// Directory free-index region starts at 64 GiB.
pub const XFS_DIR2_FREE_OFFSET_BYTES: u64 = 1 << 36;
/// Leaf-entry addresses count 8-byte units.
pub const XFS_DIR2_DATA_ALIGN_LOG: u32 = 3;

/// Bytes of the superblock covered by the fields decoded here.
const XFS_SB_DECODED_LEN: usize = 264;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XfsSuperblock {
    pub block_size: u32,
    pub dblocks: u64,
    pub rblocks: u64,
    pub rextents: u64,
    pub uuid: [u8; 16],
    pub logstart: u64,
    pub root_ino: InodeNumber,
    pub rbm_ino: u64,
    pub rsum_ino: u64,
    pub rextsize: u32,
    pub ag_blocks: u32,
    pub ag_count: u32,
    pub rbm_blocks: u32,
    pub log_blocks: u32,
    pub version_num: u16,
    pub sect_size: u16,
    pub inode_size: u16,
    pub inodes_per_block: u16,
    pub fname: String,
    pub block_log: u8,
    pub sect_log: u8,
    pub inode_log: u8,
    pub inopb_log: u8,
    pub ag_blk_log: u8,
    pub rexts_log: u8,
    pub in_progress: u8,
    pub imax_pct: u8,
    pub icount: u64,
    pub ifree: u64,
    pub fdblocks: u64,
    pub frextents: u64,
    pub features2: u32,
    pub dir_blk_log: u8,
    // v5 only; zero on v4 volumes.
    pub features_compat: u32,
    pub features_ro_compat: u32,
    pub features_incompat: u32,
    pub features_log_incompat: u32,
    pub meta_uuid: [u8; 16],
}

impl XfsSuperblock {
    /// Parse a superblock from the first sector of the device.
    pub fn parse_superblock_region(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < XFS_SB_DECODED_LEN {
            return Err(ParseError::InsufficientData {
                needed: XFS_SB_DECODED_LEN,
                offset: 0,
                actual: region.len(),
            });
        }

        let magic = read_be_u32(region, 0)?;
        if magic != XFS_SB_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(XFS_SB_MAGIC),
                actual: u64::from(magic),
            });
        }

        let version_num = read_be_u16(region, 100)?;
        let is_v5 = version_num & XFS_SB_VERSION_NUMBITS == XFS_SB_VERSION_5;
        let v5_word = |offset: usize| -> Result<u32, ParseError> {
            if is_v5 { read_be_u32(region, offset) } else { Ok(0) }
        };

        Ok(Self {
            block_size: read_be_u32(region, 4)?,
            dblocks: read_be_u64(region, 8)?,
            rblocks: read_be_u64(region, 16)?,
            rextents: read_be_u64(region, 24)?,
            uuid: read_fixed::<16>(region, 32)?,
            logstart: read_be_u64(region, 48)?,
            root_ino: InodeNumber(read_be_u64(region, 56)?),
            rbm_ino: read_be_u64(region, 64)?,
            rsum_ino: read_be_u64(region, 72)?,
            rextsize: read_be_u32(region, 80)?,
            ag_blocks: read_be_u32(region, 84)?,
            ag_count: read_be_u32(region, 88)?,
            rbm_blocks: read_be_u32(region, 92)?,
            log_blocks: read_be_u32(region, 96)?,
            version_num,
            sect_size: read_be_u16(region, 102)?,
            inode_size: read_be_u16(region, 104)?,
            inodes_per_block: read_be_u16(region, 106)?,
            fname: trim_nul_padded(&read_fixed::<12>(region, 108)?),
            block_log: read_u8(region, 120)?,
            sect_log: read_u8(region, 121)?,
            inode_log: read_u8(region, 122)?,
            inopb_log: read_u8(region, 123)?,
            ag_blk_log: read_u8(region, 124)?,
            rexts_log: read_u8(region, 125)?,
            in_progress: read_u8(region, 126)?,
            imax_pct: read_u8(region, 127)?,
            icount: read_be_u64(region, 128)?,
            ifree: read_be_u64(region, 136)?,
            fdblocks: read_be_u64(region, 144)?,
            frextents: read_be_u64(region, 152)?,
            features2: read_be_u32(region, 200)?,
            dir_blk_log: read_u8(region, 192)?,
            features_compat: v5_word(208)?,
            features_ro_compat: v5_word(212)?,
            features_incompat: v5_word(216)?,
            features_log_incompat: v5_word(220)?,
            meta_uuid: if is_v5 {
                read_fixed::<16>(region, 248)?
            } else {
                [0; 16]
            },
        })
    }

    #[must_use]
    pub fn version(&self) -> u16 {
        self.version_num & XFS_SB_VERSION_NUMBITS
    }

    /// Version 5 superblock (metadata CRCs, v3 inodes and directory blocks).
    #[must_use]
    pub fn is_v5(&self) -> bool {
        self.version() == XFS_SB_VERSION_5
    }

    /// Directory entries carry a file-type byte.
    #[must_use]
    pub fn has_ftype(&self) -> bool {
        if self.is_v5() {
            self.features_incompat & XFS_SB_FEAT_INCOMPAT_FTYPE != 0
        } else {
            self.version_num & XFS_SB_VERSION_MOREBITSBIT != 0
                && self.features2 & XFS_SB_VERSION2_FTYPE != 0
        }
    }

    /// Mount-time consistency checks.
    ///
    /// Field names in the returned `InvalidField` follow the on-disk names so
    /// the mount path can classify the failure.
    pub fn validate(&self) -> Result<(), ParseError> {
        match self.version() {
            XFS_SB_VERSION_4 => {
                if self.version_num & XFS_SB_VERSION_DIRV2BIT == 0 {
                    return Err(ParseError::InvalidField {
                        field: "sb_versionnum",
                        reason: "version 1 directories are not supported",
                    });
                }
            }
            XFS_SB_VERSION_5 => {
                if self.features_incompat & !XFS_SB_FEAT_INCOMPAT_SUPPORTED != 0 {
                    return Err(ParseError::InvalidField {
                        field: "sb_features_incompat",
                        reason: "unknown incompatible feature bits",
                    });
                }
            }
            _ => {
                return Err(ParseError::InvalidField {
                    field: "sb_versionnum",
                    reason: "unsupported superblock version",
                });
            }
        }

        if !self.block_size.is_power_of_two()
            || !(512..=65536).contains(&self.block_size)
            || 1_u32.checked_shl(u32::from(self.block_log)) != Some(self.block_size)
        {
            return Err(ParseError::InvalidField {
                field: "sb_blocklog",
                reason: "does not match sb_blocksize",
            });
        }
        if self.block_size != XFS_SUPPORTED_BLOCK_SIZE {
            return Err(ParseError::InvalidField {
                field: "sb_blocksize",
                reason: "unsupported block size",
            });
        }

        if !(256..=2048).contains(&self.inode_size)
            || 1_u32.checked_shl(u32::from(self.inode_log)) != Some(u32::from(self.inode_size))
        {
            return Err(ParseError::InvalidField {
                field: "sb_inodesize",
                reason: "must be a power of two in 256..=2048 matching sb_inodelog",
            });
        }
        let expected_inopb = self.block_size / u32::from(self.inode_size);
        if u32::from(self.inodes_per_block) != expected_inopb
            || 1_u32.checked_shl(u32::from(self.inopb_log)) != Some(expected_inopb)
        {
            return Err(ParseError::InvalidField {
                field: "sb_inopblock",
                reason: "does not match block and inode sizes",
            });
        }

        if self.ag_blocks == 0 || self.ag_count == 0 {
            return Err(ParseError::InvalidField {
                field: "sb_agblocks",
                reason: "zero-sized allocation groups",
            });
        }
        if self.ag_blk_log != ceil_log2(self.ag_blocks) {
            return Err(ParseError::InvalidField {
                field: "sb_agblklog",
                reason: "does not match sb_agblocks",
            });
        }
        let max_blocks = u64::from(self.ag_blocks) * u64::from(self.ag_count);
        if self.dblocks == 0 || self.dblocks > max_blocks {
            return Err(ParseError::InvalidField {
                field: "sb_dblocks",
                reason: "outside the allocation-group span",
            });
        }

        if u32::from(self.block_log) + u32::from(self.dir_blk_log) > 16 {
            return Err(ParseError::InvalidField {
                field: "sb_dirblklog",
                reason: "directory block larger than 64 KiB",
            });
        }

        let agino_log = u32::from(self.ag_blk_log) + u32::from(self.inopb_log);
        if agino_log >= 64 || self.root_ino.0 >> agino_log >= u64::from(self.ag_count) {
            return Err(ParseError::InvalidField {
                field: "sb_rootino",
                reason: "root inode outside the volume",
            });
        }

        Ok(())
    }

    /// Derive the geometry record.
    ///
    /// Only the checks needed to keep shift arithmetic defined are repeated
    /// here, so geometry is available even when `validate` was skipped.
    pub fn geometry(&self) -> Result<XfsGeometry, ParseError> {
        if self.block_log > 16 || 1_u32.checked_shl(u32::from(self.block_log)) != Some(self.block_size)
        {
            return Err(ParseError::InvalidField {
                field: "sb_blocklog",
                reason: "does not match sb_blocksize",
            });
        }
        if u32::from(self.ag_blk_log) + u32::from(self.inopb_log) >= 64
            || self.inode_log > 15
            || self.ag_blocks == 0
            || self.ag_count == 0
        {
            return Err(ParseError::InvalidField {
                field: "sb_agblklog",
                reason: "geometry shifts out of range",
            });
        }
        if u32::from(self.block_log) + u32::from(self.dir_blk_log) > 16 {
            return Err(ParseError::InvalidField {
                field: "sb_dirblklog",
                reason: "directory block larger than 64 KiB",
            });
        }

        Ok(XfsGeometry {
            block_size: self.block_size,
            block_log: self.block_log,
            dblocks: self.dblocks,
            ag_blocks: self.ag_blocks,
            ag_blk_log: self.ag_blk_log,
            ag_count: self.ag_count,
            inode_size: self.inode_size,
            inode_log: self.inode_log,
            inopb_log: self.inopb_log,
            dir_blk_log: self.dir_blk_log,
            dir_block_size: self.block_size << self.dir_blk_log,
            root_ino: self.root_ino,
            is_v5: self.is_v5(),
            has_ftype: self.has_ftype(),
        })
    }
}

/// `ceil(log2(value))`, the rule `sb_agblklog` is derived with.
#[must_use]
pub fn ceil_log2(value: u32) -> u8 {
    if value <= 1 {
        return 0;
    }
    // 32 - lz(value - 1) is at most 32.
    u8::try_from(32 - (value - 1).leading_zeros()).unwrap_or(u8::MAX)
}

/// Geometry constants derived once at mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XfsGeometry {
    pub block_size: u32,
    pub block_log: u8,
    pub dblocks: u64,
    pub ag_blocks: u32,
    pub ag_blk_log: u8,
    pub ag_count: u32,
    pub inode_size: u16,
    pub inode_log: u8,
    pub inopb_log: u8,
    pub dir_blk_log: u8,
    /// Directory block size in bytes (`block_size << dir_blk_log`).
    pub dir_block_size: u32,
    pub root_ino: InodeNumber,
    pub is_v5: bool,
    pub has_ftype: bool,
}

/// Where an inode lives on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeLocation {
    pub agno: AgNumber,
    pub agbno: u32,
    /// Slot of the inode within its block.
    pub index: u32,
    pub block: BlockNumber,
    /// Byte offset of the inode within `block`.
    pub offset: usize,
}

impl XfsGeometry {
    /// Filesystem blocks per directory block.
    #[must_use]
    pub fn dir_blk_fsbs(&self) -> u32 {
        1 << self.dir_blk_log
    }

    /// First file block of the directory leaf region.
    #[must_use]
    pub fn dir_leaf_offset(&self) -> FileBlock {
        FileBlock(XFS_DIR2_LEAF_OFFSET_BYTES >> self.block_log)
    }

    /// First file block of the directory free-index region.
    #[must_use]
    pub fn dir_free_offset(&self) -> FileBlock {
        FileBlock(XFS_DIR2_FREE_OFFSET_BYTES >> self.block_log)
    }

    /// File block holding directory block `db`.
    #[must_use]
    pub fn db_to_file_block(&self, db: u64) -> FileBlock {
        FileBlock(db << self.dir_blk_log)
    }

    /// Split a leaf-entry address into (directory block, byte offset).
    #[must_use]
    pub fn dataptr_to_db_off(&self, address: u32) -> (u64, usize) {
        let byte = u64::from(address) << XFS_DIR2_DATA_ALIGN_LOG;
        let shift = u32::from(self.block_log) + u32::from(self.dir_blk_log);
        let db = byte >> shift;
        let off = byte & (u64::from(self.dir_block_size) - 1);
        // off < dir_block_size <= 64 KiB
        (db, usize::try_from(off).unwrap_or(usize::MAX))
    }

    /// Convert an AG-encoded block number to a device block.
    pub fn fsb_to_block(&self, fsb: FsBlock) -> Result<BlockNumber, ParseError> {
        let agno = fsb.0 >> self.ag_blk_log;
        let agbno = fsb.0 & ((1_u64 << self.ag_blk_log) - 1);
        if agno >= u64::from(self.ag_count) {
            return Err(ParseError::InvalidField {
                field: "fsblock",
                reason: "AG number beyond sb_agcount",
            });
        }
        if agbno >= u64::from(self.ag_blocks) {
            return Err(ParseError::InvalidField {
                field: "fsblock",
                reason: "AG block beyond sb_agblocks",
            });
        }
        Ok(BlockNumber(agno * u64::from(self.ag_blocks) + agbno))
    }

    /// Decode an inode number into its on-disk location.
    pub fn locate_inode(&self, ino: InodeNumber) -> Result<InodeLocation, ParseError> {
        let agino_log = u32::from(self.ag_blk_log) + u32::from(self.inopb_log);
        let agno = ino.0 >> agino_log;
        let agino = ino.0 & ((1_u64 << agino_log) - 1);
        let agbno = agino >> self.inopb_log;
        let index = agino & ((1_u64 << self.inopb_log) - 1);

        if agno >= u64::from(self.ag_count) {
            return Err(ParseError::InvalidField {
                field: "ino",
                reason: "AG number beyond sb_agcount",
            });
        }
        if agbno >= u64::from(self.ag_blocks) {
            return Err(ParseError::InvalidField {
                field: "ino",
                reason: "AG block beyond sb_agblocks",
            });
        }
        let offset = index << self.inode_log;
        if offset.saturating_add(u64::from(self.inode_size)) > u64::from(self.block_size) {
            return Err(ParseError::InvalidField {
                field: "ino",
                reason: "inode crosses the end of its block",
            });
        }

        let agno = u32::try_from(agno).map_err(|_| ParseError::IntegerConversion { field: "agno" })?;
        let agbno =
            u32::try_from(agbno).map_err(|_| ParseError::IntegerConversion { field: "agbno" })?;
        Ok(InodeLocation {
            agno: AgNumber(agno),
            agbno,
            index: u32::try_from(index)
                .map_err(|_| ParseError::IntegerConversion { field: "index" })?,
            block: BlockNumber(u64::from(agno) * u64::from(self.ag_blocks) + u64::from(agbno)),
            offset: usize::try_from(offset)
                .map_err(|_| ParseError::IntegerConversion { field: "offset" })?,
        })
    }
}
