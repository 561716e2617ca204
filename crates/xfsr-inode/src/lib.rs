#![forbid(unsafe_code)]
//! Inode core locator.
//!
//! Decodes an inode number into its (AG, block, offset) location, reads the
//! owning block through the raw block layer and returns an owned
//! [`XfsDinode`]. Every location is bounds-checked before any read, and the
//! decoded core is checked for a data fork that matches the file type.

use tracing::trace;
use xfsr_block::BlockDevice;
use xfsr_error::{Result, XfsError};
use xfsr_ondisk::bmbt::{XFS_BMBT_REC_SIZE, XFS_BMDR_HDR_SIZE};
use xfsr_ondisk::{DinodeFormat, InodeLocation, XfsDinode, XfsGeometry};
use xfsr_types::{
    InodeNumber, ParseError, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFREG, S_IFSOCK,
};

/// Map a decode failure for inode `ino` onto the runtime taxonomy.
#[must_use]
pub fn inode_error(ino: InodeNumber, e: &ParseError) -> XfsError {
    XfsError::CorruptInode {
        ino: ino.0,
        detail: e.to_string(),
    }
}

fn out_of_range(ino: InodeNumber, detail: impl Into<String>) -> XfsError {
    XfsError::OffsetOutOfRange {
        ino: ino.0,
        detail: detail.into(),
    }
}

/// Compute where `ino` lives, rejecting numbers that fall outside the
/// volume or whose slot would cross the end of its block.
pub fn locate(geo: &XfsGeometry, ino: InodeNumber) -> Result<InodeLocation> {
    let loc = geo
        .locate_inode(ino)
        .map_err(|e| out_of_range(ino, e.to_string()))?;
    if loc.block.0 >= geo.dblocks {
        return Err(out_of_range(
            ino,
            format!("block {} beyond sb_dblocks {}", loc.block, geo.dblocks),
        ));
    }
    Ok(loc)
}

/// Read and validate the inode core of `ino`.
pub fn read_inode(dev: &dyn BlockDevice, geo: &XfsGeometry, ino: InodeNumber) -> Result<XfsDinode> {
    let loc = locate(geo, ino)?;
    if loc.block.0 >= dev.block_count() {
        return Err(out_of_range(
            ino,
            format!("block {} beyond device end {}", loc.block, dev.block_count()),
        ));
    }
    let buf = dev.read_block(loc.block)?;
    let slot = buf
        .as_slice()
        .get(loc.offset..loc.offset + usize::from(geo.inode_size))
        .ok_or_else(|| out_of_range(ino, "inode slot crosses the block end"))?;
    trace!(ino = ino.0, block = loc.block.0, offset = loc.offset, "read_inode");

    let dinode = XfsDinode::parse_from_bytes(slot, ino).map_err(|e| inode_error(ino, &e))?;
    check_fork_layout(&dinode)?;
    Ok(dinode)
}

/// Reject data forks that cannot belong to the inode's file type or that
/// claim more content than the literal area holds.
pub fn check_fork_layout(dinode: &XfsDinode) -> Result<()> {
    let corrupt = |detail: String| XfsError::CorruptInode {
        ino: dinode.ino.0,
        detail,
    };
    let format = dinode.format;
    let allowed = match dinode.file_type_bits() {
        S_IFDIR | S_IFLNK => matches!(
            format,
            DinodeFormat::Local | DinodeFormat::Extents | DinodeFormat::Btree
        ),
        S_IFREG => matches!(format, DinodeFormat::Extents | DinodeFormat::Btree),
        S_IFCHR | S_IFBLK | S_IFIFO | S_IFSOCK => format == DinodeFormat::Dev,
        0 => return Err(corrupt("inode is not in use".to_owned())),
        other => return Err(corrupt(format!("unknown file type bits {other:#o}"))),
    };
    if !allowed {
        return Err(corrupt(format!(
            "{format:?} fork on mode {:#o}",
            dinode.mode
        )));
    }

    let fork_len = dinode.data_fork.len();
    match format {
        DinodeFormat::Extents => {
            let fits = usize::try_from(dinode.nextents)
                .ok()
                .and_then(|n| n.checked_mul(XFS_BMBT_REC_SIZE))
                .is_some_and(|bytes| bytes <= fork_len);
            if !fits {
                return Err(corrupt(format!(
                    "{} extents do not fit a {fork_len}-byte fork",
                    dinode.nextents
                )));
            }
        }
        DinodeFormat::Btree => {
            if fork_len < XFS_BMDR_HDR_SIZE + 16 {
                return Err(corrupt(format!(
                    "{fork_len}-byte fork cannot hold a btree root"
                )));
            }
        }
        DinodeFormat::Local => {
            if dinode.size > u64::try_from(fork_len).unwrap_or(u64::MAX) {
                return Err(corrupt(format!(
                    "inline size {} exceeds the {fork_len}-byte fork",
                    dinode.size
                )));
            }
        }
        DinodeFormat::Dev | DinodeFormat::Uuid => {}
    }
    Ok(())
}
