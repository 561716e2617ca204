#![forbid(unsafe_code)]
//! Mounted XFS volume.
//!
//! [`Volume`] validates the superblock once at mount, owns the block device
//! and the directory block cache, and answers the read-only questions a
//! loader or inspector asks: name lookup, directory iteration, symlink
//! targets, file contents and logical-to-physical block mapping.
//! [`XfsOps`] is the VFS-shaped view of the same operations.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, trace, warn};
use xfsr_block::{
    BlockDevice, ByteBlockDevice, ByteDevice, FileByteDevice, read_xfs_superblock_region,
};
use xfsr_dir::{DirBlockCache, DirReader};
use xfsr_extent::ExtentMapper;
use xfsr_ondisk::{DinodeFormat, XfsTimestamp};
use xfsr_types::{
    BlockSize, ParseError, XFS_SUPPORTED_BLOCK_SIZE, XFS_SYMLINK_HDR_SIZE, XFS_SYMLINK_MAGIC,
    XFS_SYMLINK_MAXLEN, read_be_u32, read_be_u64,
};

pub use xfsr_dir::{
    CacheStats, DEFAULT_DIR_CACHE_SLOTS, DirCursor, DirEntry, DirFormat, EntryType,
};
pub use xfsr_error::{Result, XfsError};
pub use xfsr_ondisk::{BmbtIrec, XfsDinode, XfsGeometry, XfsSuperblock};
pub use xfsr_types::{BlockNumber, FileBlock, InodeNumber};

/// Blocks fetched per device read when copying out file data.
const MAX_READ_RUN: u64 = 64;

/// Superblock fields whose failures describe inconsistent geometry rather
/// than an unusable superblock.
const GEOMETRY_FIELDS: &[&str] = &[
    "sb_blocklog",
    "sb_inodesize",
    "sb_inopblock",
    "sb_agblocks",
    "sb_agblklog",
    "sb_dblocks",
    "sb_dirblklog",
    "sb_rootino",
];

/// Options controlling how a volume is mounted.
///
/// Validation is on by default. Turn it off only for diagnostics on images
/// whose superblock is known to be slightly off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountOptions {
    /// Parse the superblock without running the geometry checks.
    pub skip_validation: bool,
    /// Capacity of the directory block cache.
    pub dir_cache_slots: usize,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            skip_validation: false,
            dir_cache_slots: DEFAULT_DIR_CACHE_SLOTS,
        }
    }
}

/// Where a logical file block lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockMapping {
    Mapped {
        physical: BlockNumber,
        /// Allocated but never written; reads return zeros.
        unwritten: bool,
    },
    Hole,
}

/// A mounted, read-only XFS volume.
///
/// ```ignore
/// let vol = Volume::open("/dev/sdb1")?;
/// let (ino, _) = vol.resolve_path("/boot/vmlinuz")?;
/// let head = vol.read_file(ino, 0, 512)?;
/// ```
pub struct Volume {
    sb: XfsSuperblock,
    geo: XfsGeometry,
    dev: Box<dyn BlockDevice>,
    dir_cache: Mutex<DirBlockCache>,
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("geometry", &self.geo)
            .field("block_count", &self.dev.block_count())
            .field("dir_cache", &self.dir_cache.lock().stats())
            .finish_non_exhaustive()
    }
}

impl Volume {
    /// Open an image file or block device node with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, &MountOptions::default())
    }

    pub fn open_with_options(path: impl AsRef<Path>, options: &MountOptions) -> Result<Self> {
        let dev = FileByteDevice::open(path.as_ref())?;
        Self::from_byte_device(dev, options)
    }

    /// Mount a byte-addressed device, taking the block size from its
    /// superblock.
    pub fn from_byte_device<D: ByteDevice + 'static>(dev: D, options: &MountOptions) -> Result<Self> {
        let region = read_xfs_superblock_region(&dev)?;
        let sb = XfsSuperblock::parse_superblock_region(&region)
            .map_err(|e| XfsError::InvalidSuperblock(e.to_string()))?;
        let block_size =
            BlockSize::new(sb.block_size).map_err(|e| XfsError::InvalidGeometry(e.to_string()))?;
        if block_size.get() != XFS_SUPPORTED_BLOCK_SIZE {
            return Err(XfsError::UnsupportedBlockSize(block_size.get()));
        }
        let dev = ByteBlockDevice::new(dev, block_size.get())?;
        Self::mount(Box::new(dev), options)
    }

    /// Mount a block device: read and check the superblock, derive the
    /// geometry and set up an empty directory block cache.
    pub fn mount(dev: Box<dyn BlockDevice>, options: &MountOptions) -> Result<Self> {
        if dev.block_count() == 0 {
            return Err(XfsError::InvalidSuperblock("device is empty".to_owned()));
        }
        let block0 = dev.read_block(BlockNumber(0))?;
        let sb = XfsSuperblock::parse_superblock_region(block0.as_slice())
            .map_err(|e| XfsError::InvalidSuperblock(e.to_string()))?;

        if options.skip_validation {
            warn!(
                block_size = sb.block_size,
                version = sb.version(),
                "mounting without superblock validation"
            );
        } else {
            sb.validate().map_err(|e| validation_error(&sb, &e))?;
        }
        let geo = sb.geometry().map_err(|e| validation_error(&sb, &e))?;
        if geo.block_size != XFS_SUPPORTED_BLOCK_SIZE {
            return Err(XfsError::UnsupportedBlockSize(geo.block_size));
        }
        if dev.block_size() != geo.block_size {
            return Err(XfsError::InvalidGeometry(format!(
                "device block size {} does not match sb_blocksize {}",
                dev.block_size(),
                geo.block_size
            )));
        }
        if geo.dblocks > dev.block_count() {
            if !options.skip_validation {
                return Err(XfsError::InvalidGeometry(format!(
                    "sb_dblocks {} exceeds the device's {} blocks",
                    geo.dblocks,
                    dev.block_count()
                )));
            }
            warn!(
                dblocks = geo.dblocks,
                device_blocks = dev.block_count(),
                "volume extends past the device"
            );
        }

        debug!(
            block_size = geo.block_size,
            dblocks = geo.dblocks,
            ag_count = geo.ag_count,
            ag_blocks = geo.ag_blocks,
            inode_size = geo.inode_size,
            dir_block_size = geo.dir_block_size,
            root_ino = geo.root_ino.0,
            v5 = geo.is_v5,
            ftype = geo.has_ftype,
            "mount_geometry"
        );

        Ok(Self {
            sb,
            geo,
            dev,
            dir_cache: Mutex::new(DirBlockCache::new(options.dir_cache_slots)),
        })
    }

    #[must_use]
    pub fn geometry(&self) -> &XfsGeometry {
        &self.geo
    }

    #[must_use]
    pub fn superblock(&self) -> &XfsSuperblock {
        &self.sb
    }

    #[must_use]
    pub fn root_inode(&self) -> InodeNumber {
        self.geo.root_ino
    }

    #[must_use]
    pub fn device(&self) -> &dyn BlockDevice {
        &*self.dev
    }

    /// Hit/miss/eviction counters of the directory block cache.
    #[must_use]
    pub fn dir_cache_stats(&self) -> CacheStats {
        self.dir_cache.lock().stats()
    }

    fn mapper(&self) -> ExtentMapper<'_> {
        ExtentMapper::new(&*self.dev, &self.geo)
    }

    fn dir_reader(&self) -> DirReader<'_> {
        DirReader::new(&*self.dev, &self.geo, &self.dir_cache)
    }

    pub fn read_inode(&self, ino: InodeNumber) -> Result<XfsDinode> {
        xfsr_inode::read_inode(&*self.dev, &self.geo, ino)
    }

    // ── Directories ───────────────────────────────────────────────────

    /// On-disk encoding of directory `ino`.
    pub fn dir_format(&self, ino: InodeNumber) -> Result<DirFormat> {
        let dir = self.read_inode(ino)?;
        self.dir_reader().classify(&dir)
    }

    /// Look `name` up in directory `parent`.
    ///
    /// A missing name is `Ok(None)`. On volumes without the ftype feature
    /// the entry type is taken from the child inode's mode.
    pub fn lookup(
        &self,
        parent: InodeNumber,
        name: &[u8],
    ) -> Result<Option<(InodeNumber, EntryType)>> {
        let dir = self.read_inode(parent)?;
        self.dir_reader()
            .lookup(&dir, name)?
            .map(|(ino, ty)| Ok((ino, self.entry_type(ino, ty)?)))
            .transpose()
    }

    /// Entry at `cursor` in directory `dir` and the cursor of the entry
    /// after it. `Ok(None)` once the directory is exhausted.
    pub fn readdir(
        &self,
        dir: InodeNumber,
        cursor: DirCursor,
    ) -> Result<Option<(DirEntry, DirCursor)>> {
        let dir = self.read_inode(dir)?;
        let format = self.dir_reader().classify(&dir)?;
        self.next_typed(format, &dir, cursor)
    }

    /// Every entry of directory `ino`, in iteration order.
    pub fn read_dir_all(&self, ino: InodeNumber) -> Result<Vec<DirEntry>> {
        let dir = self.read_inode(ino)?;
        let format = self.dir_reader().classify(&dir)?;
        let mut out = Vec::new();
        let mut cursor = DirCursor::START;
        while let Some((entry, next)) = self.next_typed(format, &dir, cursor)? {
            out.push(entry);
            cursor = next;
        }
        Ok(out)
    }

    fn next_typed(
        &self,
        format: DirFormat,
        dir: &XfsDinode,
        cursor: DirCursor,
    ) -> Result<Option<(DirEntry, DirCursor)>> {
        let Some((mut entry, next)) = self.dir_reader().next_entry_as(format, dir, cursor)? else {
            return Ok(None);
        };
        entry.entry_type = self.entry_type(entry.ino, entry.entry_type)?;
        Ok(Some((entry, next)))
    }

    fn entry_type(&self, ino: InodeNumber, ty: EntryType) -> Result<EntryType> {
        if ty != EntryType::Unknown || self.geo.has_ftype {
            return Ok(ty);
        }
        Ok(EntryType::from_mode(self.read_inode(ino)?.mode))
    }

    /// Resolve an absolute path to an inode, starting at the root.
    ///
    /// Empty components are ignored and symlinks are not followed. An
    /// intermediate component that is not a directory is `NotDirectory`;
    /// a missing one is `NotFound`.
    pub fn resolve_path(&self, path: &str) -> Result<(InodeNumber, XfsDinode)> {
        if !path.starts_with('/') {
            return Err(XfsError::InvalidPath(format!("{path:?} is not absolute")));
        }
        let mut ino = self.root_inode();
        let mut inode = self.read_inode(ino)?;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if !inode.is_dir() {
                return Err(XfsError::NotDirectory);
            }
            let (next, _) = self
                .dir_reader()
                .lookup(&inode, component.as_bytes())?
                .ok_or_else(|| XfsError::NotFound(component.to_owned()))?;
            trace!(parent = ino.0, ino = next.0, component, "resolve_path_step");
            ino = next;
            inode = self.read_inode(ino)?;
        }
        Ok((ino, inode))
    }

    // ── Block mapping ─────────────────────────────────────────────────

    /// Translate logical block `logical` of inode `ino`.
    ///
    /// Inodes without a mapped data fork (inline data, devices) have only
    /// holes.
    pub fn map_block(&self, ino: InodeNumber, logical: FileBlock) -> Result<BlockMapping> {
        let inode = self.read_inode(ino)?;
        if !matches!(inode.format, DinodeFormat::Extents | DinodeFormat::Btree) {
            return Ok(BlockMapping::Hole);
        }
        match self.mapper().map_block(&inode, logical) {
            Ok(m) => Ok(BlockMapping::Mapped {
                physical: m.physical,
                unwritten: m.unwritten,
            }),
            Err(XfsError::ExtentNotFound { .. }) => Ok(BlockMapping::Hole),
            Err(e) => Err(e),
        }
    }

    /// All data-fork extents of `ino` in logical order.
    pub fn extents(&self, ino: InodeNumber) -> Result<Vec<BmbtIrec>> {
        let inode = self.read_inode(ino)?;
        if !matches!(inode.format, DinodeFormat::Extents | DinodeFormat::Btree) {
            return Ok(Vec::new());
        }
        self.mapper().collect_extents(&inode)
    }

    // ── File data ─────────────────────────────────────────────────────

    /// Read up to `size` bytes of `ino` starting at `offset`. Short at EOF.
    pub fn read_file(&self, ino: InodeNumber, offset: u64, size: u32) -> Result<Vec<u8>> {
        let inode = self.read_inode(ino)?;
        let len = usize::try_from(size).map_err(|_| corrupt_inode(ino, "read size overflow"))?;
        let mut buf = vec![0_u8; len];
        let n = self.read_file_data(&inode, offset, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Copy file bytes starting at `offset` into `buf`, returning how many
    /// were copied. Holes and unwritten extents read as zeros.
    pub fn read_file_data(&self, inode: &XfsDinode, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if inode.is_dir() {
            return Err(XfsError::IsDirectory);
        }
        if offset >= inode.size {
            return Ok(0);
        }
        let available = inode.size - offset;
        let to_read = usize::try_from(available).map_or(buf.len(), |a| a.min(buf.len()));
        let out = &mut buf[..to_read];

        match inode.format {
            DinodeFormat::Local => {
                let src = usize::try_from(offset)
                    .ok()
                    .and_then(|start| Some(start..start.checked_add(to_read)?))
                    .and_then(|range| inode.data_fork.get(range))
                    .ok_or_else(|| corrupt_inode(inode.ino, "inline data shorter than di_size"))?;
                out.copy_from_slice(src);
                Ok(to_read)
            }
            DinodeFormat::Extents | DinodeFormat::Btree => self.read_mapped(inode, offset, out),
            DinodeFormat::Dev | DinodeFormat::Uuid => Err(corrupt_inode(
                inode.ino,
                format!("{:?} fork holds no file data", inode.format),
            )),
        }
    }

    fn read_mapped(&self, inode: &XfsDinode, offset: u64, out: &mut [u8]) -> Result<usize> {
        let mapper = self.mapper();
        let bs = u64::from(self.geo.block_size);
        let mut done = 0_usize;
        while done < out.len() {
            let pos = offset + done as u64;
            let logical = pos / bs;
            let in_block = pos % bs;
            let remaining = (out.len() - done) as u64;

            let (len, source) = match mapper.find_extent(inode, FileBlock(logical)) {
                Ok(rec) => {
                    let run = (rec.end() - logical).min(MAX_READ_RUN) * bs - in_block;
                    (run.min(remaining), (!rec.unwritten).then_some(rec))
                }
                Err(XfsError::ExtentNotFound { .. }) => ((bs - in_block).min(remaining), None),
                Err(e) => return Err(e),
            };
            let len_bytes =
                usize::try_from(len).map_err(|_| corrupt_inode(inode.ino, "read run overflow"))?;
            let dst = &mut out[done..done + len_bytes];

            match source {
                Some(rec) => {
                    let m = mapper.mapping_for(&rec, FileBlock(logical))?;
                    let blocks = u32::try_from((in_block + len).div_ceil(bs))
                        .map_err(|_| corrupt_inode(inode.ino, "read run overflow"))?;
                    let data = self.dev.read_blocks(m.physical, blocks)?;
                    let start = usize::try_from(in_block).unwrap_or(usize::MAX);
                    let src = data
                        .as_slice()
                        .get(start..start.saturating_add(len_bytes))
                        .ok_or_else(|| corrupt_inode(inode.ino, "short device read"))?;
                    dst.copy_from_slice(src);
                    trace!(ino = inode.ino.0, logical, block = m.physical.0, blocks, "read_run");
                }
                None => dst.fill(0),
            }
            done += len_bytes;
        }
        Ok(done)
    }

    // ── Symlinks ──────────────────────────────────────────────────────

    /// Target of symlink `ino`.
    pub fn read_link(&self, ino: InodeNumber) -> Result<Vec<u8>> {
        let inode = self.read_inode(ino)?;
        self.read_symlink(&inode)
    }

    /// Target of an already-read symlink inode: inline in the fork or
    /// spread over remote blocks. v5 remote blocks carry a self-describing
    /// header that is checked and stripped.
    pub fn read_symlink(&self, inode: &XfsDinode) -> Result<Vec<u8>> {
        if !inode.is_symlink() {
            return Err(XfsError::NotSymlink);
        }
        let len = usize::try_from(inode.size)
            .ok()
            .filter(|len| (1..=XFS_SYMLINK_MAXLEN).contains(len))
            .ok_or_else(|| {
                corrupt_inode(
                    inode.ino,
                    format!("symlink length {} outside 1..={XFS_SYMLINK_MAXLEN}", inode.size),
                )
            })?;

        match inode.format {
            DinodeFormat::Local => inode
                .data_fork
                .get(..len)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| corrupt_inode(inode.ino, "inline target shorter than di_size")),
            DinodeFormat::Extents | DinodeFormat::Btree => self.read_remote_symlink(inode, len),
            other => Err(corrupt_inode(inode.ino, format!("{other:?} fork on a symlink"))),
        }
    }

    fn read_remote_symlink(&self, inode: &XfsDinode, len: usize) -> Result<Vec<u8>> {
        let mapper = self.mapper();
        let hdr = if self.geo.is_v5 { XFS_SYMLINK_HDR_SIZE } else { 0 };
        let mut target = Vec::with_capacity(len);
        let mut logical = 0_u64;
        while target.len() < len {
            let m = match mapper.map_block(inode, FileBlock(logical)) {
                Ok(m) => m,
                Err(XfsError::ExtentNotFound { .. }) => {
                    return Err(corrupt_inode(
                        inode.ino,
                        format!("symlink block {logical} is not mapped"),
                    ));
                }
                Err(e) => return Err(e),
            };
            let block = self.dev.read_block(m.physical)?;
            let data = block.as_slice();
            let want = (len - target.len()).min(data.len().saturating_sub(hdr));
            if want == 0 {
                return Err(corrupt_inode(inode.ino, "symlink block holds no payload"));
            }
            if self.geo.is_v5 {
                check_symlink_header(inode.ino, m.physical, data, target.len(), want)?;
            }
            target.extend_from_slice(&data[hdr..hdr + want]);
            logical += 1;
        }
        trace!(ino = inode.ino.0, len, blocks = logical, "read_remote_symlink");
        Ok(target)
    }

    // ── Attributes ────────────────────────────────────────────────────

    pub fn getattr(&self, ino: InodeNumber) -> Result<InodeAttr> {
        let inode = self.read_inode(ino)?;
        Ok(inode_to_attr(&self.geo, &inode))
    }
}

fn corrupt_inode(ino: InodeNumber, detail: impl Into<String>) -> XfsError {
    XfsError::CorruptInode {
        ino: ino.0,
        detail: detail.into(),
    }
}

/// Classify a superblock check failure by the field it names.
fn validation_error(sb: &XfsSuperblock, e: &ParseError) -> XfsError {
    match e {
        ParseError::InvalidField {
            field: "sb_blocksize",
            ..
        } => XfsError::UnsupportedBlockSize(sb.block_size),
        ParseError::InvalidField { field, .. } if GEOMETRY_FIELDS.contains(field) => {
            XfsError::InvalidGeometry(e.to_string())
        }
        _ => XfsError::InvalidSuperblock(e.to_string()),
    }
}

/// Check the v5 header of a remote symlink block holding `bytes` bytes of
/// the target starting at target offset `offset`.
fn check_symlink_header(
    ino: InodeNumber,
    block: BlockNumber,
    data: &[u8],
    offset: usize,
    bytes: usize,
) -> Result<()> {
    let corrupt = |detail: String| corrupt_inode(ino, format!("symlink block {block}: {detail}"));
    let field = |e: ParseError| corrupt(e.to_string());

    let magic = read_be_u32(data, 0).map_err(field)?;
    if magic != XFS_SYMLINK_MAGIC {
        return Err(corrupt(format!("bad magic {magic:#010x}")));
    }
    let hdr_offset = read_be_u32(data, 4).map_err(field)?;
    let hdr_bytes = read_be_u32(data, 8).map_err(field)?;
    if usize::try_from(hdr_offset).ok() != Some(offset)
        || usize::try_from(hdr_bytes).ok() != Some(bytes)
    {
        return Err(corrupt(format!(
            "header covers {hdr_bytes} bytes at {hdr_offset}, expected {bytes} at {offset}"
        )));
    }
    let owner = read_be_u64(data, 32).map_err(field)?;
    if owner != ino.0 {
        return Err(corrupt(format!("owned by inode {owner}")));
    }
    Ok(())
}

// ── VFS semantics layer ─────────────────────────────────────────────────────

/// File type as seen through [`XfsOps`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    RegularFile,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

impl FileType {
    /// Type of an inode from its mode bits. Unknown bits are treated as a
    /// regular file; the inode reader rejects them before they get here.
    #[must_use]
    pub fn from_mode(mode: u16) -> Self {
        match EntryType::from_mode(mode) {
            EntryType::Directory => Self::Directory,
            EntryType::Symlink => Self::Symlink,
            EntryType::BlockDevice => Self::BlockDevice,
            EntryType::CharDevice => Self::CharDevice,
            EntryType::Fifo => Self::Fifo,
            EntryType::Socket => Self::Socket,
            EntryType::RegularFile | EntryType::Unknown => Self::RegularFile,
        }
    }
}

/// Inode attributes returned by [`XfsOps::getattr`] and [`XfsOps::lookup`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeAttr {
    pub ino: InodeNumber,
    /// File size in bytes.
    pub size: u64,
    /// Number of 512-byte blocks allocated.
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    /// Creation time; v3 inodes only, otherwise the change time.
    pub crtime: SystemTime,
    pub kind: FileType,
    /// Lower 12 bits of the mode.
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    /// Device number for character and block devices.
    pub rdev: u32,
    /// Preferred I/O size.
    pub blksize: u32,
}

fn system_time(ts: XfsTimestamp) -> SystemTime {
    let secs = Duration::from_secs(ts.sec.unsigned_abs());
    let base = if ts.sec >= 0 {
        SystemTime::UNIX_EPOCH.checked_add(secs)
    } else {
        SystemTime::UNIX_EPOCH.checked_sub(secs)
    };
    base.and_then(|t| t.checked_add(Duration::from_nanos(u64::from(ts.nsec.min(999_999_999)))))
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn inode_to_attr(geo: &XfsGeometry, inode: &XfsDinode) -> InodeAttr {
    let rdev = if inode.format == DinodeFormat::Dev {
        read_be_u32(&inode.data_fork, 0).unwrap_or(0)
    } else {
        0
    };
    InodeAttr {
        ino: inode.ino,
        size: inode.size,
        blocks: inode.nblocks.saturating_mul(u64::from(geo.block_size / 512)),
        atime: system_time(inode.atime),
        mtime: system_time(inode.mtime),
        ctime: system_time(inode.ctime),
        crtime: system_time(inode.crtime.unwrap_or(inode.ctime)),
        kind: FileType::from_mode(inode.mode),
        perm: inode.perm(),
        nlink: inode.nlink,
        uid: inode.uid,
        gid: inode.gid,
        rdev,
        blksize: geo.block_size,
    }
}

/// Read-only VFS operations over a volume.
///
/// This is the surface a FUSE adapter or test harness drives. Errors map to
/// POSIX errnos via [`XfsError::to_errno`]. The trait is `Send + Sync` so
/// callers may share one volume across threads.
pub trait XfsOps: Send + Sync {
    /// Attributes of `ino`.
    fn getattr(&self, ino: InodeNumber) -> Result<InodeAttr>;

    /// Attributes of the child `name` of `parent`. A missing name is
    /// `XfsError::NotFound`.
    fn lookup(&self, parent: InodeNumber, name: &OsStr) -> Result<InodeAttr>;

    /// Entries of `ino` from cookie `offset` (0 for the first call) to the
    /// end. Each entry comes with the cookie that resumes after it.
    fn readdir(&self, ino: InodeNumber, offset: u64) -> Result<Vec<(DirEntry, DirCursor)>>;

    /// Up to `size` bytes at `offset`; fewer at EOF.
    fn read(&self, ino: InodeNumber, offset: u64, size: u32) -> Result<Vec<u8>>;

    /// Raw bytes of a symlink target.
    fn readlink(&self, ino: InodeNumber) -> Result<Vec<u8>>;
}

impl XfsOps for Volume {
    fn getattr(&self, ino: InodeNumber) -> Result<InodeAttr> {
        Volume::getattr(self, ino)
    }

    fn lookup(&self, parent: InodeNumber, name: &OsStr) -> Result<InodeAttr> {
        let (child, _) = Volume::lookup(self, parent, name.as_encoded_bytes())?
            .ok_or_else(|| XfsError::NotFound(name.to_string_lossy().into_owned()))?;
        Volume::getattr(self, child)
    }

    fn readdir(&self, ino: InodeNumber, offset: u64) -> Result<Vec<(DirEntry, DirCursor)>> {
        let dir = self.read_inode(ino)?;
        let format = self.dir_reader().classify(&dir)?;
        let mut out = Vec::new();
        let mut cursor = DirCursor(offset);
        while let Some((entry, next)) = self.next_typed(format, &dir, cursor)? {
            out.push((entry, next));
            cursor = next;
        }
        Ok(out)
    }

    fn read(&self, ino: InodeNumber, offset: u64, size: u32) -> Result<Vec<u8>> {
        self.read_file(ino, offset, size)
    }

    fn readlink(&self, ino: InodeNumber) -> Result<Vec<u8>> {
        self.read_link(ino)
    }
}
