#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use xfsr_types::{
    InodeNumber, ParseError, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG, XFS_DINODE_MAGIC, ensure_slice,
    read_be_u16, read_be_u32, read_be_u64, read_u8,
};

/// Core size of v1/v2 inodes, including `di_next_unlinked`.
pub const XFS_DINODE_CORE_SIZE_V2: usize = 100;
/// Core size of v3 inodes.
pub const XFS_DINODE_CORE_SIZE_V3: usize = 176;

pub const XFS_DIFLAG2_BIGTIME: u64 = 1 << 3;
pub const XFS_DIFLAG2_NREXT64: u64 = 1 << 4;

/// Seconds between the bigtime epoch and the Unix epoch.
const XFS_BIGTIME_EPOCH_OFFSET: i64 = 1 << 31;
const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Data-fork encoding (`di_format`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DinodeFormat {
    Dev,
    Local,
    Extents,
    Btree,
    Uuid,
}

impl DinodeFormat {
    pub fn from_raw(raw: u8) -> Result<Self, ParseError> {
        match raw {
            0 => Ok(Self::Dev),
            1 => Ok(Self::Local),
            2 => Ok(Self::Extents),
            3 => Ok(Self::Btree),
            4 => Ok(Self::Uuid),
            _ => Err(ParseError::InvalidField {
                field: "di_format",
                reason: "unknown fork format",
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct XfsTimestamp {
    pub sec: i64,
    pub nsec: u32,
}

impl XfsTimestamp {
    fn parse(data: &[u8], offset: usize, bigtime: bool) -> Result<Self, ParseError> {
        if bigtime {
            let ns = read_be_u64(data, offset)?;
            // ns / 1e9 < 2^35, always fits i64.
            let secs = i64::try_from(ns / NSEC_PER_SEC).unwrap_or(i64::MAX);
            return Ok(Self {
                sec: secs - XFS_BIGTIME_EPOCH_OFFSET,
                nsec: u32::try_from(ns % NSEC_PER_SEC).unwrap_or(0),
            });
        }
        #[allow(clippy::cast_possible_wrap)] // on-disk seconds are a signed 32-bit value
        let sec = read_be_u32(data, offset)? as i32;
        Ok(Self {
            sec: i64::from(sec),
            nsec: read_be_u32(data, offset + 4)?,
        })
    }
}

/// Decoded inode core plus an owned copy of its data fork.
///
/// The fork is copied out of the block it was read from, so an `XfsDinode`
/// stays valid regardless of what happens to that block afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XfsDinode {
    pub ino: InodeNumber,
    pub mode: u16,
    pub version: u8,
    pub format: DinodeFormat,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub atime: XfsTimestamp,
    pub mtime: XfsTimestamp,
    pub ctime: XfsTimestamp,
    pub crtime: Option<XfsTimestamp>,
    pub size: u64,
    pub nblocks: u64,
    pub extsize: u32,
    /// Data-fork extent count.
    pub nextents: u64,
    pub anextents: u32,
    pub forkoff: u8,
    pub aformat: u8,
    pub flags: u16,
    pub flags2: u64,
    pub generation: u32,
    /// Data-fork bytes of the literal area.
    pub data_fork: Vec<u8>,
}

impl XfsDinode {
    /// Decode an inode from exactly one on-disk inode slot.
    ///
    /// `ino` is the number the slot was located from; v3 inodes record their
    /// own number and a mismatch is rejected.
    pub fn parse_from_bytes(bytes: &[u8], ino: InodeNumber) -> Result<Self, ParseError> {
        let magic = read_be_u16(bytes, 0)?;
        if magic != XFS_DINODE_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(XFS_DINODE_MAGIC),
                actual: u64::from(magic),
            });
        }

        let version = read_u8(bytes, 4)?;
        let core_size = match version {
            1 | 2 => XFS_DINODE_CORE_SIZE_V2,
            3 => XFS_DINODE_CORE_SIZE_V3,
            _ => {
                return Err(ParseError::InvalidField {
                    field: "di_version",
                    reason: "unknown inode version",
                });
            }
        };
        if bytes.len() < core_size {
            return Err(ParseError::InsufficientData {
                needed: core_size,
                offset: 0,
                actual: bytes.len(),
            });
        }

        let format = DinodeFormat::from_raw(read_u8(bytes, 5)?)?;
        let flags2 = if version == 3 {
            read_be_u64(bytes, 120)?
        } else {
            0
        };
        if version == 3 && read_be_u64(bytes, 152)? != ino.0 {
            return Err(ParseError::InvalidField {
                field: "di_ino",
                reason: "does not match the inode number",
            });
        }

        let bigtime = flags2 & XFS_DIFLAG2_BIGTIME != 0;
        let (nextents, anextents) = if flags2 & XFS_DIFLAG2_NREXT64 != 0 {
            (read_be_u64(bytes, 24)?, read_be_u32(bytes, 76)?)
        } else {
            (
                u64::from(read_be_u32(bytes, 76)?),
                u32::from(read_be_u16(bytes, 80)?),
            )
        };
        let nlink = if version == 1 {
            u32::from(read_be_u16(bytes, 6)?)
        } else {
            read_be_u32(bytes, 16)?
        };

        let literal_len = bytes.len() - core_size;
        let forkoff = read_u8(bytes, 82)?;
        let data_fork_len = if forkoff == 0 {
            literal_len
        } else {
            let len = usize::from(forkoff) << 3;
            if len > literal_len {
                return Err(ParseError::InvalidField {
                    field: "di_forkoff",
                    reason: "attribute fork starts past the literal area",
                });
            }
            len
        };

        Ok(Self {
            ino,
            mode: read_be_u16(bytes, 2)?,
            version,
            format,
            uid: read_be_u32(bytes, 8)?,
            gid: read_be_u32(bytes, 12)?,
            nlink,
            atime: XfsTimestamp::parse(bytes, 32, bigtime)?,
            mtime: XfsTimestamp::parse(bytes, 40, bigtime)?,
            ctime: XfsTimestamp::parse(bytes, 48, bigtime)?,
            crtime: if version == 3 {
                Some(XfsTimestamp::parse(bytes, 144, bigtime)?)
            } else {
                None
            },
            size: read_be_u64(bytes, 56)?,
            nblocks: read_be_u64(bytes, 64)?,
            extsize: read_be_u32(bytes, 72)?,
            nextents,
            anextents,
            forkoff,
            aformat: read_u8(bytes, 83)?,
            flags: read_be_u16(bytes, 90)?,
            flags2,
            generation: read_be_u32(bytes, 92)?,
            data_fork: ensure_slice(bytes, core_size, data_fork_len)?.to_vec(),
        })
    }

    #[must_use]
    pub fn file_type_bits(&self) -> u16 {
        self.mode & S_IFMT
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.file_type_bits() == S_IFDIR
    }

    #[must_use]
    pub fn is_reg(&self) -> bool {
        self.file_type_bits() == S_IFREG
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.file_type_bits() == S_IFLNK
    }

    /// Permission bits (lower 12 bits of mode).
    #[must_use]
    pub fn perm(&self) -> u16 {
        self.mode & 0o7777
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_inode(version: u8, inode_size: usize, ino: u64) -> Vec<u8> {
        let mut buf = vec![0_u8; inode_size];
        buf[0..2].copy_from_slice(&XFS_DINODE_MAGIC.to_be_bytes());
        buf[2..4].copy_from_slice(&(S_IFDIR | 0o755).to_be_bytes());
        buf[4] = version;
        buf[5] = 1;
        buf[16..20].copy_from_slice(&3_u32.to_be_bytes());
        buf[32..36].copy_from_slice(&1_700_000_000_u32.to_be_bytes());
        buf[36..40].copy_from_slice(&5_u32.to_be_bytes());
        buf[56..64].copy_from_slice(&42_u64.to_be_bytes());
        buf[76..80].copy_from_slice(&7_u32.to_be_bytes());
        if version == 3 {
            buf[152..160].copy_from_slice(&ino.to_be_bytes());
        }
        buf
    }

    #[test]
    fn parse_v3_core_and_fork() {
        let mut raw = make_inode(3, 512, 128);
        raw[176] = 0xAB;
        let inode = XfsDinode::parse_from_bytes(&raw, InodeNumber(128)).expect("parse");
        assert!(inode.is_dir());
        assert_eq!(inode.perm(), 0o755);
        assert_eq!(inode.format, DinodeFormat::Local);
        assert_eq!(inode.nlink, 3);
        assert_eq!(inode.size, 42);
        assert_eq!(inode.nextents, 7);
        assert_eq!(inode.data_fork.len(), 512 - 176);
        assert_eq!(inode.data_fork[0], 0xAB);
        assert_eq!(inode.atime.sec, 1_700_000_000);
        assert_eq!(inode.atime.nsec, 5);
        assert!(inode.crtime.is_some());
    }

    #[test]
    fn parse_v2_uses_short_core() {
        let raw = make_inode(2, 256, 99);
        let inode = XfsDinode::parse_from_bytes(&raw, InodeNumber(99)).expect("parse");
        assert_eq!(inode.data_fork.len(), 256 - 100);
        assert!(inode.crtime.is_none());
    }

    #[test]
    fn forkoff_limits_data_fork() {
        let mut raw = make_inode(3, 512, 128);
        raw[82] = 10;
        let inode = XfsDinode::parse_from_bytes(&raw, InodeNumber(128)).expect("parse");
        assert_eq!(inode.data_fork.len(), 80);

        raw[82] = 255;
        assert!(matches!(
            XfsDinode::parse_from_bytes(&raw, InodeNumber(128)),
            Err(ParseError::InvalidField {
                field: "di_forkoff",
                ..
            })
        ));
    }

    #[test]
    fn corrupt_cores_are_rejected() {
        let mut raw = make_inode(3, 512, 128);
        raw[0] = 0;
        assert!(matches!(
            XfsDinode::parse_from_bytes(&raw, InodeNumber(128)),
            Err(ParseError::InvalidMagic { .. })
        ));

        let raw = make_inode(3, 512, 128);
        assert!(matches!(
            XfsDinode::parse_from_bytes(&raw, InodeNumber(129)),
            Err(ParseError::InvalidField { field: "di_ino", .. })
        ));

        let mut raw = make_inode(3, 512, 128);
        raw[5] = 9;
        assert!(XfsDinode::parse_from_bytes(&raw, InodeNumber(128)).is_err());

        let mut raw = make_inode(2, 256, 1);
        raw[4] = 7;
        assert!(XfsDinode::parse_from_bytes(&raw, InodeNumber(1)).is_err());

        let raw = make_inode(3, 512, 128);
        assert!(XfsDinode::parse_from_bytes(&raw[..150], InodeNumber(128)).is_err());
    }

    #[test]
    fn bigtime_and_nrext64() {
        let mut raw = make_inode(3, 512, 128);
        let flags2 = XFS_DIFLAG2_BIGTIME | XFS_DIFLAG2_NREXT64;
        raw[120..128].copy_from_slice(&flags2.to_be_bytes());
        let ns = ((1_u64 << 31) + 10) * NSEC_PER_SEC + 7;
        raw[40..48].copy_from_slice(&ns.to_be_bytes());
        raw[24..32].copy_from_slice(&(1_u64 << 33).to_be_bytes());
        let inode = XfsDinode::parse_from_bytes(&raw, InodeNumber(128)).expect("parse");
        assert_eq!(inode.mtime, XfsTimestamp { sec: 10, nsec: 7 });
        assert_eq!(inode.nextents, 1 << 33);
        assert_eq!(inode.anextents, 7);
    }
}
