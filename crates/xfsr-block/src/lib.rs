#![forbid(unsafe_code)]
//! Raw block layer.
//!
//! Provides the `ByteDevice` and `BlockDevice` traits the engine reads
//! through, a `pread`-backed file device and an in-memory device used by
//! tests and the image builder. All addressing above this crate is in
//! filesystem blocks; byte translation happens here.

use parking_lot::RwLock;
use std::fs::File;
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;
use xfsr_error::{Result, XfsError};
use xfsr_types::{BlockNumber, XFS_SUPERBLOCK_OFFSET, XFS_SUPERBLOCK_SIZE};

fn out_of_bounds(detail: String) -> XfsError {
    XfsError::Io(std::io::Error::new(ErrorKind::UnexpectedEof, detail))
}

fn invalid_input(detail: String) -> XfsError {
    XfsError::Io(std::io::Error::new(ErrorKind::InvalidInput, detail))
}

/// Owned buffer of one or more contiguous blocks.
///
/// Invariant: length == `count * block_size` of the originating read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuf {
    bytes: Vec<u8>,
}

impl BlockBuf {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

/// Byte-addressed device for fixed-offset reads (pread semantics).
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

impl<D: ByteDevice + ?Sized> ByteDevice for Box<D> {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

fn check_range(offset: u64, len: usize, device_len: u64) -> Result<()> {
    let len = u64::try_from(len).map_err(|_| invalid_input("read length overflows u64".into()))?;
    let end = offset
        .checked_add(len)
        .ok_or_else(|| invalid_input("read range overflows u64".into()))?;
    if end > device_len {
        return Err(out_of_bounds(format!(
            "read out of bounds: offset={offset} len={len} device_len={device_len}"
        )));
    }
    Ok(())
}

/// File-backed byte device using `pread`-style positional reads.
///
/// Opened read-only; the engine never writes.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
}

impl FileByteDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len)?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }
}

/// In-memory byte device.
///
/// `patch` overwrites bytes in place so tests can corrupt metadata after
/// an image has been built.
#[derive(Debug, Default)]
pub struct MemByteDevice {
    bytes: RwLock<Vec<u8>>,
}

impl MemByteDevice {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: RwLock::new(bytes),
        }
    }

    /// Overwrite `data.len()` bytes at `offset`.
    pub fn patch(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.write();
        check_range(offset, data.len(), u64::try_from(bytes.len()).unwrap_or(u64::MAX))?;
        let start = usize::try_from(offset).map_err(|_| invalid_input("offset overflow".into()))?;
        bytes[start..start + data.len()].copy_from_slice(data);
        drop(bytes);
        Ok(())
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }
}

impl ByteDevice for MemByteDevice {
    fn len_bytes(&self) -> u64 {
        u64::try_from(self.bytes.read().len()).unwrap_or(u64::MAX)
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.read();
        check_range(offset, buf.len(), u64::try_from(bytes.len()).unwrap_or(u64::MAX))?;
        let start = usize::try_from(offset).map_err(|_| invalid_input("offset overflow".into()))?;
        buf.copy_from_slice(&bytes[start..start + buf.len()]);
        drop(bytes);
        Ok(())
    }
}

impl<D: ByteDevice + ?Sized> ByteDevice for Arc<D> {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

/// Block-addressed read interface consumed by the engine.
pub trait BlockDevice: Send + Sync {
    /// Read `count` contiguous blocks starting at `start`.
    fn read_blocks(&self, start: BlockNumber, count: u32) -> Result<BlockBuf>;

    /// Read a single block.
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        self.read_blocks(block, 1)
    }

    /// Device block size in bytes.
    fn block_size(&self) -> u32;

    /// Total number of blocks.
    fn block_count(&self) -> u64;
}

/// Adapts a `ByteDevice` to block addressing.
#[derive(Debug)]
pub struct ByteBlockDevice<D: ByteDevice> {
    inner: D,
    block_size: u32,
    block_count: u64,
}

impl<D: ByteDevice> ByteBlockDevice<D> {
    pub fn new(inner: D, block_size: u32) -> Result<Self> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(invalid_input(format!(
                "invalid block_size={block_size} (must be power of two)"
            )));
        }

        let len = inner.len_bytes();
        let block_size_u64 = u64::from(block_size);
        let remainder = len % block_size_u64;
        if remainder != 0 {
            return Err(invalid_input(format!(
                "image length is not block-aligned: len_bytes={len} block_size={block_size} remainder={remainder}"
            )));
        }
        Ok(Self {
            inner,
            block_size,
            block_count: len / block_size_u64,
        })
    }

    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }
}

impl<D: ByteDevice> BlockDevice for ByteBlockDevice<D> {
    fn read_blocks(&self, start: BlockNumber, count: u32) -> Result<BlockBuf> {
        if count == 0 {
            return Err(invalid_input("read_blocks with count=0".into()));
        }
        let end = start
            .0
            .checked_add(u64::from(count))
            .ok_or_else(|| invalid_input("block range overflow".into()))?;
        if end > self.block_count {
            return Err(out_of_bounds(format!(
                "block range out of bounds: start={} count={count} block_count={}",
                start.0, self.block_count
            )));
        }

        let offset = start
            .0
            .checked_mul(u64::from(self.block_size))
            .ok_or_else(|| invalid_input("block offset overflow".into()))?;
        let len = u64::from(self.block_size) * u64::from(count);
        let len = usize::try_from(len).map_err(|_| invalid_input("read length overflow".into()))?;
        let mut buf = vec![0_u8; len];
        self.inner.read_exact_at(offset, &mut buf)?;
        trace!(block = start.0, count, "read_blocks");
        Ok(BlockBuf::new(buf))
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for Box<T> {
    fn read_blocks(&self, start: BlockNumber, count: u32) -> Result<BlockBuf> {
        (**self).read_blocks(start, count)
    }

    fn block_size(&self) -> u32 {
        (**self).block_size()
    }

    fn block_count(&self) -> u64 {
        (**self).block_count()
    }
}

/// Read the superblock probe region (first sector of the device).
pub fn read_xfs_superblock_region(dev: &dyn ByteDevice) -> Result<[u8; XFS_SUPERBLOCK_SIZE]> {
    let mut buf = [0_u8; XFS_SUPERBLOCK_SIZE];
    let offset = u64::try_from(XFS_SUPERBLOCK_OFFSET)
        .map_err(|_| invalid_input("superblock offset does not fit u64".into()))?;
    dev.read_exact_at(offset, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| u8::try_from(i % 251).unwrap()).collect()
    }

    #[test]
    fn byte_block_device_reads_contiguous_runs() {
        let data = patterned(4096 * 4);
        let dev = ByteBlockDevice::new(MemByteDevice::new(data.clone()), 4096).expect("device");
        assert_eq!(dev.block_count(), 4);
        assert_eq!(dev.block_size(), 4096);

        let one = dev.read_block(BlockNumber(2)).expect("read");
        assert_eq!(one.as_slice(), &data[8192..12288]);

        let two = dev.read_blocks(BlockNumber(1), 2).expect("read run");
        assert_eq!(two.as_slice(), &data[4096..12288]);
    }

    #[test]
    fn byte_block_device_rejects_out_of_range() {
        let dev = ByteBlockDevice::new(MemByteDevice::new(vec![0; 8192]), 4096).expect("device");
        assert!(matches!(
            dev.read_blocks(BlockNumber(1), 2),
            Err(XfsError::Io(_))
        ));
        assert!(dev.read_block(BlockNumber(u64::MAX)).is_err());
        assert!(dev.read_blocks(BlockNumber(0), 0).is_err());
    }

    #[test]
    fn byte_block_device_rejects_bad_geometry() {
        assert!(ByteBlockDevice::new(MemByteDevice::new(vec![0; 4096]), 3000).is_err());
        assert!(ByteBlockDevice::new(MemByteDevice::new(vec![0; 5000]), 4096).is_err());
    }

    #[test]
    fn mem_device_patch_is_visible_to_reads() {
        let mem = MemByteDevice::new(vec![0; 1024]);
        mem.patch(100, b"XFSB").expect("patch");
        let mut buf = [0_u8; 4];
        mem.read_exact_at(100, &mut buf).expect("read");
        assert_eq!(&buf, b"XFSB");
        assert!(mem.patch(1022, b"XFSB").is_err());
    }

    #[test]
    fn file_device_reads_superblock_region() {
        let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
        let mut data = patterned(8192);
        data[..4].copy_from_slice(b"XFSB");
        tmp.write_all(&data).expect("write");
        tmp.flush().expect("flush");

        let dev = FileByteDevice::open(tmp.path()).expect("open");
        assert_eq!(dev.len_bytes(), 8192);
        let region = read_xfs_superblock_region(&dev).expect("region");
        assert_eq!(&region[..4], b"XFSB");
        assert_eq!(&region[4..], &data[4..XFS_SUPERBLOCK_SIZE]);

        let mut past_end = [0_u8; 16];
        assert!(dev.read_exact_at(8190, &mut past_end).is_err());
    }
}
