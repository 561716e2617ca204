#![forbid(unsafe_code)]
//! Error types for xfsr.
//!
//! # Error Taxonomy
//!
//! xfsr uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `xfsr-types` | Byte-level decode failures (short buffers, bad magic, bad fields) |
//! | Runtime | `XfsError` | `xfsr-error` (this crate) | Errors surfaced by the engine to its callers |
//!
//! `xfsr-error` does not depend on `xfsr-types`. Each engine crate converts
//! `ParseError` at its own boundary, because only the caller knows which
//! structure was being decoded:
//!
//! | Decoding | XfsError Variant |
//! |----------|------------------|
//! | Superblock | `InvalidSuperblock` / `InvalidGeometry` / `UnsupportedBlockSize` |
//! | Inode core | `CorruptInode { ino, detail }` |
//! | BMBT root or block | `CorruptTree { block, detail }` |
//! | Directory block or shortform area | `CorruptDirectory { block, detail }` |
//!
//! ## Outcomes that are not errors
//!
//! A missing name, a hole in a file and the end of a directory listing are
//! ordinary results. The engine reports them as `Option::None` or as an enum
//! variant. `NotFound` exists here only for path-level callers such as
//! [`XfsError::to_errno`] consumers and the CLI.
//!
//! `ExtentNotFound` is produced by the extent mapper when a logical block is
//! outside every extent. Callers that can tolerate holes convert it; callers
//! that need the block (directory reads) propagate it.
//!
//! ## errno Mapping
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Io` | raw OS error or `EIO` |
//! | `InvalidSuperblock` | `EINVAL` |
//! | `InvalidGeometry` | `EINVAL` |
//! | `UnsupportedBlockSize` | `EOPNOTSUPP` |
//! | `CorruptInode` | `EUCLEAN` |
//! | `CorruptTree` | `EUCLEAN` |
//! | `CorruptDirectory` | `EUCLEAN` |
//! | `OffsetOutOfRange` | `EINVAL` |
//! | `ExtentNotFound` | `ENXIO` |
//! | `NotFound` | `ENOENT` |
//! | `NotDirectory` | `ENOTDIR` |
//! | `IsDirectory` | `EISDIR` |
//! | `NotSymlink` | `EINVAL` |
//! | `NameTooLong` | `ENAMETOOLONG` |
//! | `InvalidPath` | `EINVAL` |

use thiserror::Error;

/// Unified error type for all xfsr operations.
#[derive(Debug, Error)]
pub enum XfsError {
    /// Error propagated from the block layer. Never retried.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Block 0 does not hold a usable XFS superblock.
    #[error("invalid superblock: {0}")]
    InvalidSuperblock(String),

    /// Superblock geometry fields are inconsistent with each other.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Well-formed block size that this engine does not mount.
    #[error("unsupported block size: {0}")]
    UnsupportedBlockSize(u32),

    /// Inode core failed validation (magic, format, version, self-pointer).
    #[error("corrupt inode {ino}: {detail}")]
    CorruptInode { ino: u64, detail: String },

    /// Ill-formed extent list or BMBT block (magic, level, record counts).
    #[error("corrupt extent tree at block {block}: {detail}")]
    CorruptTree { block: u64, detail: String },

    /// Ill-formed directory structure (bad magic on a fetched block, entry
    /// running past its container, impossible counts).
    #[error("corrupt directory block {block}: {detail}")]
    CorruptDirectory { block: u64, detail: String },

    /// An inode number decodes to a location outside the volume.
    #[error("inode {ino} out of range: {detail}")]
    OffsetOutOfRange { ino: u64, detail: String },

    /// The logical block is not covered by any extent.
    #[error("no extent maps logical block {logical}")]
    ExtentNotFound { logical: u64 },

    /// Named object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A directory operation was applied to a non-directory.
    #[error("not a directory")]
    NotDirectory,

    /// A file-data operation was applied to a directory.
    #[error("is a directory")]
    IsDirectory,

    /// `read_link` on an inode that is not a symlink.
    #[error("not a symlink")]
    NotSymlink,

    /// Name longer than 255 bytes.
    #[error("name too long")]
    NameTooLong,

    /// Path is not absolute or otherwise unusable.
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

impl XfsError {
    /// Convert this error into a POSIX errno.
    ///
    /// The match is exhaustive so a new variant cannot be added without an
    /// errno assignment.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::InvalidSuperblock(_)
            | Self::InvalidGeometry(_)
            | Self::OffsetOutOfRange { .. }
            | Self::NotSymlink
            | Self::InvalidPath(_) => libc::EINVAL,
            Self::UnsupportedBlockSize(_) => libc::EOPNOTSUPP,
            Self::CorruptInode { .. } | Self::CorruptTree { .. } | Self::CorruptDirectory { .. } => {
                libc::EUCLEAN
            }
            Self::ExtentNotFound { .. } => libc::ENXIO,
            Self::NotFound(_) => libc::ENOENT,
            Self::NotDirectory => libc::ENOTDIR,
            Self::IsDirectory => libc::EISDIR,
            Self::NameTooLong => libc::ENAMETOOLONG,
        }
    }

    /// True for structural corruption of on-disk metadata.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::InvalidSuperblock(_)
                | Self::InvalidGeometry(_)
                | Self::CorruptInode { .. }
                | Self::CorruptTree { .. }
                | Self::CorruptDirectory { .. }
                | Self::OffsetOutOfRange { .. }
        )
    }
}

/// Result alias using `XfsError`.
pub type Result<T> = std::result::Result<T, XfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_covers_all_variants() {
        let cases: Vec<(XfsError, libc::c_int)> = vec![
            (XfsError::Io(std::io::Error::other("test")), libc::EIO),
            (XfsError::InvalidSuperblock("magic".into()), libc::EINVAL),
            (XfsError::InvalidGeometry("agblocks=0".into()), libc::EINVAL),
            (XfsError::UnsupportedBlockSize(1024), libc::EOPNOTSUPP),
            (
                XfsError::CorruptInode {
                    ino: 128,
                    detail: "bad magic".into(),
                },
                libc::EUCLEAN,
            ),
            (
                XfsError::CorruptTree {
                    block: 9,
                    detail: "level".into(),
                },
                libc::EUCLEAN,
            ),
            (
                XfsError::CorruptDirectory {
                    block: 9,
                    detail: "magic".into(),
                },
                libc::EUCLEAN,
            ),
            (
                XfsError::OffsetOutOfRange {
                    ino: u64::MAX,
                    detail: "agno".into(),
                },
                libc::EINVAL,
            ),
            (XfsError::ExtentNotFound { logical: 7 }, libc::ENXIO),
            (XfsError::NotFound("boot".into()), libc::ENOENT),
            (XfsError::NotDirectory, libc::ENOTDIR),
            (XfsError::IsDirectory, libc::EISDIR),
            (XfsError::NotSymlink, libc::EINVAL),
            (XfsError::NameTooLong, libc::ENAMETOOLONG),
            (XfsError::InvalidPath("boot".into()), libc::EINVAL),
        ];

        for (error, expected_errno) in &cases {
            assert_eq!(
                error.to_errno(),
                *expected_errno,
                "wrong errno for {error:?}",
            );
        }
    }

    #[test]
    fn io_error_preserves_raw_os_error() {
        let raw = std::io::Error::from_raw_os_error(libc::EPERM);
        assert_eq!(XfsError::Io(raw).to_errno(), libc::EPERM);
    }

    #[test]
    fn display_formatting() {
        let err = XfsError::CorruptTree {
            block: 42,
            detail: "child level 3 under parent level 1".into(),
        };
        assert_eq!(
            err.to_string(),
            "corrupt extent tree at block 42: child level 3 under parent level 1"
        );
        assert_eq!(
            XfsError::UnsupportedBlockSize(1024).to_string(),
            "unsupported block size: 1024"
        );
        assert_eq!(
            XfsError::ExtentNotFound { logical: 5 }.to_string(),
            "no extent maps logical block 5"
        );
    }

    #[test]
    fn corruption_classification() {
        assert!(XfsError::InvalidSuperblock("x".into()).is_corruption());
        assert!(
            XfsError::CorruptDirectory {
                block: 1,
                detail: "x".into()
            }
            .is_corruption()
        );
        assert!(!XfsError::NotFound("x".into()).is_corruption());
        assert!(!XfsError::ExtentNotFound { logical: 0 }.is_corruption());
        assert!(!XfsError::Io(std::io::Error::other("x")).is_corruption());
    }
}
