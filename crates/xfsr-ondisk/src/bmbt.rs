#![forbid(unsafe_code)]
//! Block-map (BMBT) records and btree blocks.

use serde::{Deserialize, Serialize};
use xfsr_types::{FileBlock, FsBlock, ParseError, read_be_u16, read_be_u32, read_be_u64};

/// Packed extent record size.
pub const XFS_BMBT_REC_SIZE: usize = 16;
/// Inline root header: level + numrecs.
pub const XFS_BMDR_HDR_SIZE: usize = 4;
/// `"BMAP"`.
pub const XFS_BMAP_MAGIC: u32 = 0x424D_4150;
/// `"BMA3"`.
pub const XFS_BMAP_CRC_MAGIC: u32 = 0x424D_4133;
/// Long-format block header without CRC fields.
pub const XFS_BTREE_LBLOCK_LEN: usize = 24;
/// Long-format block header with CRC fields.
pub const XFS_BTREE_LBLOCK_CRC_LEN: usize = 72;

const STARTOFF_BITS: u32 = 54;
const STARTBLOCK_BITS: u32 = 52;
const BLOCKCOUNT_BITS: u32 = 21;

/// Decoded extent record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BmbtIrec {
    pub startoff: FileBlock,
    pub startblock: FsBlock,
    pub blockcount: u32,
    pub unwritten: bool,
}

impl BmbtIrec {
    /// Decode the 128-bit packed form.
    ///
    /// Layout, most significant bit first: 1-bit unwritten flag, 54-bit
    /// startoff, 52-bit startblock, 21-bit blockcount.
    #[must_use]
    pub fn decode(l0: u64, l1: u64) -> Self {
        let startoff_mask = (1_u64 << STARTOFF_BITS) - 1;
        let low9 = (1_u64 << (64 - 1 - STARTOFF_BITS)) - 1;
        Self {
            unwritten: l0 >> 63 != 0,
            startoff: FileBlock((l0 >> 9) & startoff_mask),
            startblock: FsBlock(((l0 & low9) << 43) | (l1 >> BLOCKCOUNT_BITS)),
            blockcount: u32::try_from(l1 & ((1_u64 << BLOCKCOUNT_BITS) - 1)).unwrap_or(0),
        }
    }

    /// Pack back into the on-disk form.
    #[must_use]
    pub fn encode(&self) -> [u8; XFS_BMBT_REC_SIZE] {
        let startblock = self.startblock.0 & ((1_u64 << STARTBLOCK_BITS) - 1);
        let l0 = (u64::from(self.unwritten) << 63)
            | ((self.startoff.0 & ((1_u64 << STARTOFF_BITS) - 1)) << 9)
            | (startblock >> 43);
        let l1 = (startblock << BLOCKCOUNT_BITS)
            | (u64::from(self.blockcount) & ((1_u64 << BLOCKCOUNT_BITS) - 1));
        let mut out = [0_u8; XFS_BMBT_REC_SIZE];
        out[..8].copy_from_slice(&l0.to_be_bytes());
        out[8..].copy_from_slice(&l1.to_be_bytes());
        out
    }

    pub fn parse(data: &[u8], offset: usize) -> Result<Self, ParseError> {
        Ok(Self::decode(
            read_be_u64(data, offset)?,
            read_be_u64(data, offset + 8)?,
        ))
    }

    /// First file block past the extent.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.startoff.0.saturating_add(u64::from(self.blockcount))
    }

    #[must_use]
    pub fn contains(&self, logical: u64) -> bool {
        logical >= self.startoff.0 && logical < self.end()
    }

    /// AG-encoded block backing `logical`, if the extent covers it.
    #[must_use]
    pub fn fsblock_for(&self, logical: u64) -> Option<FsBlock> {
        self.contains(logical)
            .then(|| FsBlock(self.startblock.0 + (logical - self.startoff.0)))
    }
}

/// Decode `count` consecutive extent records from an inline fork.
pub fn parse_extent_list(fork: &[u8], count: u64) -> Result<Vec<BmbtIrec>, ParseError> {
    let count = usize::try_from(count).map_err(|_| ParseError::IntegerConversion {
        field: "di_nextents",
    })?;
    if count
        .checked_mul(XFS_BMBT_REC_SIZE)
        .is_none_or(|bytes| bytes > fork.len())
    {
        return Err(ParseError::InvalidField {
            field: "di_nextents",
            reason: "extent list larger than the data fork",
        });
    }
    (0..count)
        .map(|i| BmbtIrec::parse(fork, i * XFS_BMBT_REC_SIZE))
        .collect()
}

/// Index of the child to descend into for `target`.
///
/// Keys are the first file offset under each child. Picks the last key
/// `<= target`; when every key is larger, picks the first child.
#[must_use]
pub fn select_child(keys: &[u64], target: u64) -> usize {
    keys.partition_point(|&key| key <= target).saturating_sub(1)
}

/// B+tree root stored in the inode literal area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BmdrRoot {
    pub level: u16,
    pub keys: Vec<u64>,
    pub ptrs: Vec<FsBlock>,
}

/// Decode the inline root. Pointers sit after `maxrecs` key slots, where
/// `maxrecs` is derived from the fork size.
pub fn parse_bmdr_root(fork: &[u8]) -> Result<BmdrRoot, ParseError> {
    let level = read_be_u16(fork, 0)?;
    let numrecs = usize::from(read_be_u16(fork, 2)?);
    let maxrecs = fork.len().saturating_sub(XFS_BMDR_HDR_SIZE) / 16;
    if level == 0 {
        return Err(ParseError::InvalidField {
            field: "bb_level",
            reason: "inline root must be an interior node",
        });
    }
    if numrecs == 0 || numrecs > maxrecs {
        return Err(ParseError::InvalidField {
            field: "bb_numrecs",
            reason: "record count outside 1..=maxrecs",
        });
    }
    let ptr_base = XFS_BMDR_HDR_SIZE + maxrecs * 8;
    let (keys, ptrs) = read_keys_ptrs(fork, XFS_BMDR_HDR_SIZE, ptr_base, numrecs)?;
    Ok(BmdrRoot { level, keys, ptrs })
}

fn read_keys_ptrs(
    data: &[u8],
    key_base: usize,
    ptr_base: usize,
    numrecs: usize,
) -> Result<(Vec<u64>, Vec<FsBlock>), ParseError> {
    let mut keys = Vec::with_capacity(numrecs);
    let mut ptrs = Vec::with_capacity(numrecs);
    for i in 0..numrecs {
        keys.push(read_be_u64(data, key_base + i * 8)?);
        ptrs.push(FsBlock(read_be_u64(data, ptr_base + i * 8)?));
    }
    if keys.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ParseError::InvalidField {
            field: "bmbt_key",
            reason: "keys not strictly increasing",
        });
    }
    Ok((keys, ptrs))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BmbtEntries {
    Interior { keys: Vec<u64>, ptrs: Vec<FsBlock> },
    Leaf(Vec<BmbtIrec>),
}

/// On-disk long-format BMBT block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BmbtNode {
    pub level: u16,
    pub leftsib: FsBlock,
    pub rightsib: FsBlock,
    /// `true` for `"BMA3"` blocks.
    pub crc: bool,
    pub entries: BmbtEntries,
}

/// Decode an on-disk BMBT block (either header variant).
pub fn parse_bmbt_node(block: &[u8]) -> Result<BmbtNode, ParseError> {
    let magic = read_be_u32(block, 0)?;
    let (crc, hdr_len) = match magic {
        XFS_BMAP_MAGIC => (false, XFS_BTREE_LBLOCK_LEN),
        XFS_BMAP_CRC_MAGIC => (true, XFS_BTREE_LBLOCK_CRC_LEN),
        _ => {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(XFS_BMAP_MAGIC),
                actual: u64::from(magic),
            });
        }
    };
    let level = read_be_u16(block, 4)?;
    let numrecs = usize::from(read_be_u16(block, 6)?);
    let leftsib = FsBlock(read_be_u64(block, 8)?);
    let rightsib = FsBlock(read_be_u64(block, 16)?);

    let maxrecs = block.len().saturating_sub(hdr_len) / 16;
    if numrecs == 0 || numrecs > maxrecs {
        return Err(ParseError::InvalidField {
            field: "bb_numrecs",
            reason: "record count outside 1..=maxrecs",
        });
    }

    let entries = if level == 0 {
        let recs = (0..numrecs)
            .map(|i| BmbtIrec::parse(block, hdr_len + i * XFS_BMBT_REC_SIZE))
            .collect::<Result<Vec<_>, _>>()?;
        BmbtEntries::Leaf(recs)
    } else {
        let (keys, ptrs) = read_keys_ptrs(block, hdr_len, hdr_len + maxrecs * 8, numrecs)?;
        BmbtEntries::Interior { keys, ptrs }
    };

    Ok(BmbtNode {
        level,
        leftsib,
        rightsib,
        crc,
        entries,
    })
}
