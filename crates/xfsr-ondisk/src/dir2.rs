#![forbid(unsafe_code)]
//! Directory version 2 / version 3 structures.
//!
//! Data blocks ("XD2B"/"XD2D", v3 "XDB3"/"XDD3") hold packed entries and
//! free-space markers. Leaf blocks map name hashes to 8-byte-unit entry
//! addresses; da node blocks index leaves by hash. Shortform directories
//! live in the inode literal area.

use serde::{Deserialize, Serialize};
use xfsr_types::{
    ParseError, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFMT, S_IFREG, S_IFSOCK, align_up,
    ensure_slice, read_be_u16, read_be_u32, read_be_u64, read_u8,
};

pub const XFS_DIR2_BLOCK_MAGIC: u32 = 0x5844_3242; // XD2B
pub const XFS_DIR2_DATA_MAGIC: u32 = 0x5844_3244; // XD2D
pub const XFS_DIR2_FREE_MAGIC: u32 = 0x5844_3246; // XD2F
pub const XFS_DIR3_BLOCK_MAGIC: u32 = 0x5844_4233; // XDB3
pub const XFS_DIR3_DATA_MAGIC: u32 = 0x5844_4433; // XDD3
pub const XFS_DIR3_FREE_MAGIC: u32 = 0x5844_4633; // XDF3

pub const XFS_DIR2_LEAF1_MAGIC: u16 = 0xD2F1;
pub const XFS_DIR2_LEAFN_MAGIC: u16 = 0xD2FF;
pub const XFS_DIR3_LEAF1_MAGIC: u16 = 0x3DF1;
pub const XFS_DIR3_LEAFN_MAGIC: u16 = 0x3DFF;
pub const XFS_DA_NODE_MAGIC: u16 = 0xFEBE;
pub const XFS_DA3_NODE_MAGIC: u16 = 0x3EBE;

pub const XFS_DIR2_DATA_HDR_SIZE: usize = 16;
pub const XFS_DIR3_DATA_HDR_SIZE: usize = 64;
pub const XFS_DIR2_LEAF_HDR_SIZE: usize = 16;
pub const XFS_DIR3_LEAF_HDR_SIZE: usize = 64;
pub const XFS_DA_NODE_HDR_SIZE: usize = 16;
pub const XFS_DA3_NODE_HDR_SIZE: usize = 64;

/// Offset of the magic inside both da blkinfo layouts.
pub const XFS_DA_BLKINFO_MAGIC_OFFSET: usize = 8;

pub const XFS_DIR2_DATA_FREE_TAG: u16 = 0xFFFF;
pub const XFS_DIR2_DATA_ALIGN: usize = 8;
/// Address of a stale leaf entry.
pub const XFS_DIR2_NULL_DATAPTR: u32 = 0;
pub const XFS_DIR2_BLOCK_TAIL_SIZE: usize = 8;
pub const XFS_DIR2_LEAF_ENTRY_SIZE: usize = 8;
pub const XFS_DIR2_LEAF_TAIL_SIZE: usize = 4;
pub const XFS_DA_NODE_ENTRY_SIZE: usize = 8;
/// Deepest da btree the kernel builds.
pub const XFS_DA_NODE_MAXDEPTH: u16 = 5;

/// The directory name hash (`xfs_da_hashname`).
#[must_use]
pub fn xfs_da_hashname(name: &[u8]) -> u32 {
    let mut hash = 0_u32;
    let mut chunks = name.chunks_exact(4);
    for c in &mut chunks {
        hash = (u32::from(c[0]) << 21)
            ^ (u32::from(c[1]) << 14)
            ^ (u32::from(c[2]) << 7)
            ^ u32::from(c[3])
            ^ hash.rotate_left(7 * 4);
    }
    match *chunks.remainder() {
        [a, b, c] => {
            (u32::from(a) << 14) ^ (u32::from(b) << 7) ^ u32::from(c) ^ hash.rotate_left(7 * 3)
        }
        [a, b] => (u32::from(a) << 7) ^ u32::from(b) ^ hash.rotate_left(7 * 2),
        [a] => u32::from(a) ^ hash.rotate_left(7),
        _ => hash,
    }
}

/// Entry file type, from the ftype byte or from an inode mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum XfsFileType {
    Unknown,
    RegularFile,
    Directory,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    Symlink,
}

impl XfsFileType {
    #[must_use]
    pub fn from_ftype(raw: u8) -> Self {
        match raw {
            1 => Self::RegularFile,
            2 => Self::Directory,
            3 => Self::CharDevice,
            4 => Self::BlockDevice,
            5 => Self::Fifo,
            6 => Self::Socket,
            7 => Self::Symlink,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub fn from_mode(mode: u16) -> Self {
        match mode & S_IFMT {
            S_IFREG => Self::RegularFile,
            S_IFDIR => Self::Directory,
            S_IFCHR => Self::CharDevice,
            S_IFBLK => Self::BlockDevice,
            S_IFIFO => Self::Fifo,
            S_IFSOCK => Self::Socket,
            S_IFLNK => Self::Symlink,
            _ => Self::Unknown,
        }
    }

    /// On-disk ftype byte.
    #[must_use]
    pub fn to_ftype(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::RegularFile => 1,
            Self::Directory => 2,
            Self::CharDevice => 3,
            Self::BlockDevice => 4,
            Self::Fifo => 5,
            Self::Socket => 6,
            Self::Symlink => 7,
        }
    }
}

/// Size of a data entry: inumber, namelen, name, optional ftype, tag,
/// rounded to 8 bytes.
#[must_use]
pub fn data_entry_size(namelen: usize, has_ftype: bool) -> usize {
    align_up(8 + 1 + namelen + usize::from(has_ftype) + 2, XFS_DIR2_DATA_ALIGN)
}

// ── Data blocks ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    /// Single-block directory: data plus leaf index and tail.
    Block,
    /// Data block of a leaf or node directory.
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub kind: DataKind,
    pub v3: bool,
    /// Header length; the first entry starts here.
    pub len: usize,
}

pub fn parse_data_header(block: &[u8]) -> Result<DataHeader, ParseError> {
    let magic = read_be_u32(block, 0)?;
    let (kind, v3) = match magic {
        XFS_DIR2_BLOCK_MAGIC => (DataKind::Block, false),
        XFS_DIR2_DATA_MAGIC => (DataKind::Data, false),
        XFS_DIR3_BLOCK_MAGIC => (DataKind::Block, true),
        XFS_DIR3_DATA_MAGIC => (DataKind::Data, true),
        _ => {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(XFS_DIR2_DATA_MAGIC),
                actual: u64::from(magic),
            });
        }
    };
    let len = if v3 {
        XFS_DIR3_DATA_HDR_SIZE
    } else {
        XFS_DIR2_DATA_HDR_SIZE
    };
    ensure_slice(block, 0, len)?;
    Ok(DataHeader { kind, v3, len })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataEntry<'a> {
    pub ino: u64,
    pub name: &'a [u8],
    pub ftype: Option<u8>,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSlot<'a> {
    Entry(DataEntry<'a>),
    /// Free-space marker of the given byte length.
    Free(usize),
}

impl DataSlot<'_> {
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Self::Entry(entry) => entry.size,
            Self::Free(len) => *len,
        }
    }
}

/// Decode the entry or free marker at `offset`, which must end at or
/// before `end`.
pub fn parse_data_slot(
    block: &[u8],
    offset: usize,
    end: usize,
    has_ftype: bool,
) -> Result<DataSlot<'_>, ParseError> {
    let region = ensure_slice(block, 0, end)?;
    if read_be_u16(region, offset)? == XFS_DIR2_DATA_FREE_TAG {
        let len = usize::from(read_be_u16(region, offset + 2)?);
        if len < XFS_DIR2_DATA_ALIGN || len % XFS_DIR2_DATA_ALIGN != 0 {
            return Err(ParseError::InvalidField {
                field: "dup_length",
                reason: "free length not a non-zero multiple of 8",
            });
        }
        ensure_slice(region, offset, len)?;
        return Ok(DataSlot::Free(len));
    }

    let ino = read_be_u64(region, offset)?;
    let namelen = usize::from(read_u8(region, offset + 8)?);
    if namelen == 0 {
        return Err(ParseError::InvalidField {
            field: "dep_namelen",
            reason: "zero-length name",
        });
    }
    let size = data_entry_size(namelen, has_ftype);
    ensure_slice(region, offset, size)?;
    let name = ensure_slice(region, offset + 9, namelen)?;
    let ftype = if has_ftype {
        Some(read_u8(region, offset + 9 + namelen)?)
    } else {
        None
    };
    Ok(DataSlot::Entry(DataEntry {
        ino,
        name,
        ftype,
        size,
    }))
}

/// Tail of a single-block directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTail {
    pub count: u32,
    pub stale: u32,
    /// Offset of the first leaf entry; also the end of the data region.
    pub leaf_offset: usize,
}

pub fn parse_block_tail(block: &[u8], data_hdr_len: usize) -> Result<BlockTail, ParseError> {
    let tail = block
        .len()
        .checked_sub(XFS_DIR2_BLOCK_TAIL_SIZE)
        .ok_or(ParseError::InsufficientData {
            needed: XFS_DIR2_BLOCK_TAIL_SIZE,
            offset: 0,
            actual: block.len(),
        })?;
    let count = read_be_u32(block, tail)?;
    let stale = read_be_u32(block, tail + 4)?;
    let leaf_bytes = usize::try_from(count)
        .ok()
        .and_then(|c| c.checked_mul(XFS_DIR2_LEAF_ENTRY_SIZE));
    let Some(leaf_offset) = leaf_bytes.and_then(|bytes| tail.checked_sub(bytes)) else {
        return Err(ParseError::InvalidField {
            field: "btp_count",
            reason: "leaf entries overrun the block",
        });
    };
    if leaf_offset < data_hdr_len || stale > count {
        return Err(ParseError::InvalidField {
            field: "btp_count",
            reason: "leaf entries overlap the data header",
        });
    }
    Ok(BlockTail {
        count,
        stale,
        leaf_offset,
    })
}

// ── Leaf blocks ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafEntry {
    pub hashval: u32,
    pub address: u32,
}

impl LeafEntry {
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.address == XFS_DIR2_NULL_DATAPTR
    }
}

pub fn parse_leaf_entries(
    block: &[u8],
    offset: usize,
    count: usize,
) -> Result<Vec<LeafEntry>, ParseError> {
    let bytes = count
        .checked_mul(XFS_DIR2_LEAF_ENTRY_SIZE)
        .ok_or(ParseError::IntegerConversion { field: "leaf count" })?;
    ensure_slice(block, offset, bytes)?;
    (0..count)
        .map(|i| {
            let at = offset + i * XFS_DIR2_LEAF_ENTRY_SIZE;
            Ok(LeafEntry {
                hashval: read_be_u32(block, at)?,
                address: read_be_u32(block, at + 4)?,
            })
        })
        .collect()
}

/// Magic at the da blkinfo position, shared by leaf and node blocks.
pub fn peek_da_magic(block: &[u8]) -> Result<u16, ParseError> {
    read_be_u16(block, XFS_DA_BLKINFO_MAGIC_OFFSET)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    /// Leaf of a leaf-format directory (carries a bests tail).
    Leaf1,
    /// Leaf of a node-format directory.
    LeafN,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafHeader {
    pub kind: LeafKind,
    pub v3: bool,
    pub forw: u32,
    pub back: u32,
    pub count: u16,
    pub stale: u16,
    /// Header length; entries start here.
    pub len: usize,
}

impl LeafHeader {
    pub fn entries(&self, block: &[u8]) -> Result<Vec<LeafEntry>, ParseError> {
        parse_leaf_entries(block, self.len, usize::from(self.count))
    }
}

pub fn parse_leaf_header(block: &[u8]) -> Result<LeafHeader, ParseError> {
    let magic = peek_da_magic(block)?;
    let (kind, v3) = match magic {
        XFS_DIR2_LEAF1_MAGIC => (LeafKind::Leaf1, false),
        XFS_DIR2_LEAFN_MAGIC => (LeafKind::LeafN, false),
        XFS_DIR3_LEAF1_MAGIC => (LeafKind::Leaf1, true),
        XFS_DIR3_LEAFN_MAGIC => (LeafKind::LeafN, true),
        _ => {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(XFS_DIR2_LEAF1_MAGIC),
                actual: u64::from(magic),
            });
        }
    };
    let (len, count_off) = if v3 {
        (XFS_DIR3_LEAF_HDR_SIZE, 56)
    } else {
        (XFS_DIR2_LEAF_HDR_SIZE, 12)
    };
    ensure_slice(block, 0, len)?;
    let count = read_be_u16(block, count_off)?;
    let stale = read_be_u16(block, count_off + 2)?;

    let mut limit = block.len();
    if kind == LeafKind::Leaf1 {
        // bests[bestcount] then bestcount at the very end.
        let tail = limit
            .checked_sub(XFS_DIR2_LEAF_TAIL_SIZE)
            .ok_or(ParseError::InsufficientData {
                needed: XFS_DIR2_LEAF_TAIL_SIZE,
                offset: 0,
                actual: limit,
            })?;
        let bestcount = usize::try_from(read_be_u32(block, tail)?)
            .map_err(|_| ParseError::IntegerConversion { field: "ltp_bestcount" })?;
        limit = bestcount
            .checked_mul(2)
            .and_then(|bytes| tail.checked_sub(bytes))
            .ok_or(ParseError::InvalidField {
                field: "ltp_bestcount",
                reason: "bests table overruns the block",
            })?;
    }
    if len + usize::from(count) * XFS_DIR2_LEAF_ENTRY_SIZE > limit || stale > count {
        return Err(ParseError::InvalidField {
            field: "leaf_count",
            reason: "entries overrun the leaf block",
        });
    }

    Ok(LeafHeader {
        kind,
        v3,
        forw: read_be_u32(block, 0)?,
        back: read_be_u32(block, 4)?,
        count,
        stale,
        len,
    })
}

// ── Da node blocks ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaNodeEntry {
    /// Largest hash stored under `before`.
    pub hashval: u32,
    /// Directory file block of the child.
    pub before: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaNode {
    pub v3: bool,
    pub forw: u32,
    pub back: u32,
    pub level: u16,
    pub entries: Vec<DaNodeEntry>,
}

pub fn parse_da_node(block: &[u8]) -> Result<DaNode, ParseError> {
    let magic = peek_da_magic(block)?;
    let v3 = match magic {
        XFS_DA_NODE_MAGIC => false,
        XFS_DA3_NODE_MAGIC => true,
        _ => {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(XFS_DA_NODE_MAGIC),
                actual: u64::from(magic),
            });
        }
    };
    let (len, count_off) = if v3 {
        (XFS_DA3_NODE_HDR_SIZE, 56)
    } else {
        (XFS_DA_NODE_HDR_SIZE, 12)
    };
    ensure_slice(block, 0, len)?;
    let count = usize::from(read_be_u16(block, count_off)?);
    let level = read_be_u16(block, count_off + 2)?;
    if count == 0 || len + count * XFS_DA_NODE_ENTRY_SIZE > block.len() {
        return Err(ParseError::InvalidField {
            field: "da_node_count",
            reason: "entry count outside the block",
        });
    }
    if level == 0 || level > XFS_DA_NODE_MAXDEPTH {
        return Err(ParseError::InvalidField {
            field: "da_node_level",
            reason: "level outside 1..=5",
        });
    }
    let entries = (0..count)
        .map(|i| {
            let at = len + i * XFS_DA_NODE_ENTRY_SIZE;
            Ok(DaNodeEntry {
                hashval: read_be_u32(block, at)?,
                before: read_be_u32(block, at + 4)?,
            })
        })
        .collect::<Result<Vec<_>, ParseError>>()?;
    Ok(DaNode {
        v3,
        forw: read_be_u32(block, 0)?,
        back: read_be_u32(block, 4)?,
        level,
        entries,
    })
}

// ── Shortform ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SfHeader {
    pub count: u8,
    pub i8count: u8,
    pub parent: u64,
    /// Inode number width in bytes (4 or 8).
    pub ino_width: usize,
    /// Header length; the first entry starts here.
    pub len: usize,
}

fn read_sf_ino(fork: &[u8], offset: usize, width: usize) -> Result<u64, ParseError> {
    if width == 8 {
        read_be_u64(fork, offset)
    } else {
        read_be_u32(fork, offset).map(u64::from)
    }
}

pub fn parse_sf_header(fork: &[u8]) -> Result<SfHeader, ParseError> {
    let count = read_u8(fork, 0)?;
    let i8count = read_u8(fork, 1)?;
    let ino_width = if i8count > 0 { 8 } else { 4 };
    Ok(SfHeader {
        count,
        i8count,
        parent: read_sf_ino(fork, 2, ino_width)?,
        ino_width,
        len: 2 + ino_width,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SfEntry<'a> {
    pub name: &'a [u8],
    /// Saved data-block offset (unused when reading).
    pub offset: u16,
    pub ftype: Option<u8>,
    pub ino: u64,
    pub size: usize,
}

pub fn parse_sf_entry(
    fork: &[u8],
    offset: usize,
    ino_width: usize,
    has_ftype: bool,
) -> Result<SfEntry<'_>, ParseError> {
    let namelen = usize::from(read_u8(fork, offset)?);
    if namelen == 0 {
        return Err(ParseError::InvalidField {
            field: "sfe_namelen",
            reason: "zero-length name",
        });
    }
    let name = ensure_slice(fork, offset + 3, namelen)?;
    let mut cursor = offset + 3 + namelen;
    let ftype = if has_ftype {
        let raw = read_u8(fork, cursor)?;
        cursor += 1;
        Some(raw)
    } else {
        None
    };
    let ino = read_sf_ino(fork, cursor, ino_width)?;
    Ok(SfEntry {
        name,
        offset: read_be_u16(fork, offset + 1)?,
        ftype,
        ino,
        size: cursor + ino_width - offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hashname_reference_values() {
        assert_eq!(xfs_da_hashname(b""), 0);
        assert_eq!(xfs_da_hashname(b"a"), 0x61);
        assert_eq!(xfs_da_hashname(b"."), 0x2E);
        assert_eq!(xfs_da_hashname(b".."), 0x172E);
        assert_eq!(xfs_da_hashname(b"ab"), 0x30E2);
        assert_eq!(xfs_da_hashname(b"abc"), 0x0018_7163);
        // 4-byte block: (b<<21)^(o<<14)^(o<<7)^t
        let expected = (u32::from(b'b') << 21)
            ^ (u32::from(b'o') << 14)
            ^ (u32::from(b'o') << 7)
            ^ u32::from(b't');
        assert_eq!(xfs_da_hashname(b"boot"), expected);
    }

    #[test]
    fn hashname_known_collisions() {
        // Flipping bit 4 of byte 3 rotates into bit 0, cancelled by bit 0 of byte 7.
        let base = xfs_da_hashname(b"aaaaaaaa");
        assert_eq!(xfs_da_hashname(b"aaaqaaa`"), base);
        assert_eq!(xfs_da_hashname(b"aaaAaaac"), base);
        assert_eq!(xfs_da_hashname(b"aaaQaaab"), base);
        assert_ne!(xfs_da_hashname(b"aaaaaaab"), base);
    }

    #[test]
    fn file_type_mapping() {
        for raw in 0..=7 {
            assert_eq!(XfsFileType::from_ftype(raw).to_ftype(), raw);
        }
        assert_eq!(XfsFileType::from_ftype(42), XfsFileType::Unknown);
        assert_eq!(XfsFileType::from_mode(S_IFDIR | 0o755), XfsFileType::Directory);
        assert_eq!(XfsFileType::from_mode(S_IFLNK | 0o777), XfsFileType::Symlink);
        assert_eq!(XfsFileType::from_mode(0), XfsFileType::Unknown);
    }

    #[test]
    fn entry_sizes_round_to_eight() {
        assert_eq!(data_entry_size(1, false), 16);
        assert_eq!(data_entry_size(4, false), 16);
        assert_eq!(data_entry_size(5, false), 16);
        assert_eq!(data_entry_size(6, false), 24);
        assert_eq!(data_entry_size(5, true), 24);
    }

    fn data_block(magic: u32, hdr: usize) -> Vec<u8> {
        let mut block = vec![0_u8; 4096];
        block[..4].copy_from_slice(&magic.to_be_bytes());
        // "boot" -> inode 200
        block[hdr..hdr + 8].copy_from_slice(&200_u64.to_be_bytes());
        block[hdr + 8] = 4;
        block[hdr + 9..hdr + 13].copy_from_slice(b"boot");
        block[hdr + 13] = 2;
        // free marker for the rest
        let free_at = hdr + 16;
        block[free_at..free_at + 2].copy_from_slice(&XFS_DIR2_DATA_FREE_TAG.to_be_bytes());
        let free_len = u16::try_from(4096 - free_at).expect("fits");
        block[free_at + 2..free_at + 4].copy_from_slice(&free_len.to_be_bytes());
        block
    }

    #[test]
    fn data_slots_v2_and_v3() {
        for (magic, hdr, v3) in [
            (XFS_DIR2_DATA_MAGIC, XFS_DIR2_DATA_HDR_SIZE, false),
            (XFS_DIR3_DATA_MAGIC, XFS_DIR3_DATA_HDR_SIZE, true),
        ] {
            let block = data_block(magic, hdr);
            let header = parse_data_header(&block).expect("header");
            assert_eq!(header.kind, DataKind::Data);
            assert_eq!(header.v3, v3);
            assert_eq!(header.len, hdr);

            let slot = parse_data_slot(&block, hdr, block.len(), true).expect("entry");
            let DataSlot::Entry(entry) = slot else {
                panic!("expected entry, got {slot:?}");
            };
            assert_eq!(entry.ino, 200);
            assert_eq!(entry.name, b"boot");
            assert_eq!(entry.ftype, Some(2));
            assert_eq!(entry.size, 16);

            let free = parse_data_slot(&block, hdr + 16, block.len(), true).expect("free");
            assert_eq!(free, DataSlot::Free(4096 - hdr - 16));
        }
    }

    #[test]
    fn data_slot_bounds_are_enforced() {
        let mut block = data_block(XFS_DIR2_DATA_MAGIC, 16);
        assert!(parse_data_slot(&block, 16, 20, true).is_err());

        block[16 + 8] = 0;
        assert!(parse_data_slot(&block, 16, block.len(), true).is_err());

        let mut block = data_block(XFS_DIR2_DATA_MAGIC, 16);
        block[34..36].copy_from_slice(&3_u16.to_be_bytes());
        assert!(parse_data_slot(&block, 32, block.len(), true).is_err());
        block[34..36].copy_from_slice(&0xFFF8_u16.to_be_bytes());
        assert!(parse_data_slot(&block, 32, block.len(), true).is_err());

        let mut block = data_block(0x1234_5678, 16);
        block[0] = 0;
        assert!(matches!(
            parse_data_header(&block),
            Err(ParseError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn block_tail_locates_leaf_entries() {
        let mut block = data_block(XFS_DIR2_BLOCK_MAGIC, 16);
        block[4088..4092].copy_from_slice(&3_u32.to_be_bytes());
        block[4092..4096].copy_from_slice(&1_u32.to_be_bytes());
        let tail = parse_block_tail(&block, 16).expect("tail");
        assert_eq!(tail.count, 3);
        assert_eq!(tail.stale, 1);
        assert_eq!(tail.leaf_offset, 4096 - 8 - 24);

        block[4088..4092].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(parse_block_tail(&block, 16).is_err());
    }

    fn leaf_block(magic: u16, v3: bool, entries: &[(u32, u32)]) -> Vec<u8> {
        let mut block = vec![0_u8; 4096];
        block[8..10].copy_from_slice(&magic.to_be_bytes());
        let (hdr, count_off) = if v3 { (64, 56) } else { (16, 12) };
        let count = u16::try_from(entries.len()).expect("count");
        block[count_off..count_off + 2].copy_from_slice(&count.to_be_bytes());
        for (i, (hash, addr)) in entries.iter().enumerate() {
            let at = hdr + i * 8;
            block[at..at + 4].copy_from_slice(&hash.to_be_bytes());
            block[at + 4..at + 8].copy_from_slice(&addr.to_be_bytes());
        }
        block
    }

    #[test]
    fn leaf_headers_all_magics() {
        let ents = [(5, 2), (9, 0), (9, 6)];
        for (magic, v3, kind) in [
            (XFS_DIR2_LEAF1_MAGIC, false, LeafKind::Leaf1),
            (XFS_DIR2_LEAFN_MAGIC, false, LeafKind::LeafN),
            (XFS_DIR3_LEAF1_MAGIC, true, LeafKind::Leaf1),
            (XFS_DIR3_LEAFN_MAGIC, true, LeafKind::LeafN),
        ] {
            let block = leaf_block(magic, v3, &ents);
            let hdr = parse_leaf_header(&block).expect("leaf header");
            assert_eq!(hdr.kind, kind);
            assert_eq!(hdr.v3, v3);
            assert_eq!(hdr.count, 3);
            let parsed = hdr.entries(&block).expect("entries");
            assert_eq!(parsed[1], LeafEntry { hashval: 9, address: 0 });
            assert!(parsed[1].is_stale());
            assert!(!parsed[2].is_stale());
        }
    }

    #[test]
    fn leaf1_bests_table_bounds_entries() {
        let mut block = leaf_block(XFS_DIR2_LEAF1_MAGIC, false, &[(1, 2)]);
        block[4092..4096].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(parse_leaf_header(&block).is_err());

        let mut block = leaf_block(XFS_DIR2_LEAFN_MAGIC, false, &[]);
        block[12..14].copy_from_slice(&600_u16.to_be_bytes());
        assert!(parse_leaf_header(&block).is_err());
    }

    #[test]
    fn da_node_parse() {
        let mut block = vec![0_u8; 4096];
        block[8..10].copy_from_slice(&XFS_DA3_NODE_MAGIC.to_be_bytes());
        block[56..58].copy_from_slice(&2_u16.to_be_bytes());
        block[58..60].copy_from_slice(&1_u16.to_be_bytes());
        block[64..68].copy_from_slice(&100_u32.to_be_bytes());
        block[68..72].copy_from_slice(&(1_u32 << 23).to_be_bytes());
        block[72..76].copy_from_slice(&200_u32.to_be_bytes());
        block[76..80].copy_from_slice(&((1_u32 << 23) + 1).to_be_bytes());
        let node = parse_da_node(&block).expect("node");
        assert!(node.v3);
        assert_eq!(node.level, 1);
        assert_eq!(
            node.entries,
            vec![
                DaNodeEntry {
                    hashval: 100,
                    before: 1 << 23
                },
                DaNodeEntry {
                    hashval: 200,
                    before: (1 << 23) + 1
                },
            ]
        );

        block[58..60].copy_from_slice(&9_u16.to_be_bytes());
        assert!(parse_da_node(&block).is_err());
        block[58..60].copy_from_slice(&1_u16.to_be_bytes());
        block[56..58].copy_from_slice(&0_u16.to_be_bytes());
        assert!(parse_da_node(&block).is_err());
    }

    #[test]
    fn shortform_header_and_entries() {
        // count=1, i8count=0, parent=128 (4 bytes), entry "ab" -> 300 with ftype
        let mut fork = vec![1_u8, 0, 0, 0, 0, 128];
        fork.extend_from_slice(&[2, 0, 0x30, b'a', b'b', 1]);
        fork.extend_from_slice(&300_u32.to_be_bytes());
        let hdr = parse_sf_header(&fork).expect("header");
        assert_eq!(hdr.count, 1);
        assert_eq!(hdr.parent, 128);
        assert_eq!(hdr.ino_width, 4);
        assert_eq!(hdr.len, 6);

        let entry = parse_sf_entry(&fork, hdr.len, hdr.ino_width, true).expect("entry");
        assert_eq!(entry.name, b"ab");
        assert_eq!(entry.offset, 0x30);
        assert_eq!(entry.ftype, Some(1));
        assert_eq!(entry.ino, 300);
        assert_eq!(entry.size, 10);

        // 8-byte inode numbers once i8count is set.
        let mut fork8 = vec![1_u8, 1];
        fork8.extend_from_slice(&(1_u64 << 40).to_be_bytes());
        fork8.extend_from_slice(&[1, 0, 0x30, b'x']);
        fork8.extend_from_slice(&((1_u64 << 40) + 1).to_be_bytes());
        let hdr = parse_sf_header(&fork8).expect("header8");
        assert_eq!(hdr.ino_width, 8);
        assert_eq!(hdr.parent, 1 << 40);
        let entry = parse_sf_entry(&fork8, hdr.len, hdr.ino_width, false).expect("entry8");
        assert_eq!(entry.ino, (1 << 40) + 1);

        assert!(parse_sf_entry(&fork, hdr.len + 100, 4, true).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_hash_depends_only_on_bytes(name in proptest::collection::vec(any::<u8>(), 0..64)) {
            prop_assert_eq!(xfs_da_hashname(&name), xfs_da_hashname(&name.clone()));
        }

        #[test]
        fn prop_dir_parsers_never_panic(
            data in proptest::collection::vec(any::<u8>(), 0..512),
            off in 0_usize..600,
        ) {
            let _ = parse_data_header(&data);
            let _ = parse_data_slot(&data, off, data.len(), true);
            let _ = parse_block_tail(&data, 16);
            let _ = parse_leaf_header(&data);
            let _ = parse_da_node(&data);
            let _ = parse_sf_header(&data);
            let _ = parse_sf_entry(&data, off, 8, true);
        }
    }
}
