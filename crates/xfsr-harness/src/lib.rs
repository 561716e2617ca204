#![forbid(unsafe_code)]
//! Test support for xfsr.
//!
//! `image` builds synthetic XFS volumes in memory. This module adds the
//! sparse JSON fixture format used by the conformance suite and a canned
//! sample volume shared by tests, benches and the CLI smoke checks.

pub mod image;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use xfsr_ondisk::XfsSuperblock;
use xfsr_types::{InodeNumber, S_IFCHR, S_IFIFO};

pub use image::{
    BLOCK_SIZE, BtreeShape, DirLayout, ExtentSpec, ImageBuilder, ImageOptions, InodeSpec,
    block_pattern,
};

#[derive(Debug, Clone, Deserialize)]
pub struct SparseFixture {
    pub size: usize,
    pub writes: Vec<FixtureWrite>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureWrite {
    pub offset: usize,
    pub hex: String,
}

pub fn load_sparse_fixture(path: &Path) -> Result<Vec<u8>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    let fixture: SparseFixture = serde_json::from_str(&text)
        .with_context(|| format!("invalid fixture json {}", path.display()))?;

    let mut bytes = vec![0_u8; fixture.size];
    for write in fixture.writes {
        let payload = hex::decode(write.hex)
            .with_context(|| format!("invalid hex at offset {}", write.offset))?;

        let end = write
            .offset
            .checked_add(payload.len())
            .context("fixture offset overflow")?;
        if end > bytes.len() {
            bail!(
                "fixture write out of bounds: offset={} payload={} size={}",
                write.offset,
                payload.len(),
                bytes.len()
            );
        }

        bytes[write.offset..end].copy_from_slice(&payload);
    }

    Ok(bytes)
}

pub fn validate_superblock_fixture(path: &Path) -> Result<XfsSuperblock> {
    let data = load_sparse_fixture(path)?;
    let sb = XfsSuperblock::parse_superblock_region(&data)
        .with_context(|| format!("failed superblock parse for fixture {}", path.display()))?;
    sb.validate()
        .with_context(|| format!("superblock validation failed for fixture {}", path.display()))?;
    Ok(sb)
}

/// Up to 64 distinct 8-byte names sharing one directory hash.
///
/// Within a 4-byte group the hash mixes `b0 << 21 ^ b1 << 14 ^ b2 << 7 ^ b3`,
/// so flipping the low bit of one byte and the high bit of the next cancels
/// out.
#[must_use]
pub fn colliding_names(count: usize) -> Vec<Vec<u8>> {
    fn toggle(mask: u8) -> [u8; 4] {
        let mut c = *b"abcd";
        for k in 0..3 {
            if mask & (1 << k) != 0 {
                c[k] ^= 1;
                c[k + 1] ^= 0x80;
            }
        }
        c
    }
    (0..64_u8)
        .map(|m| [toggle(m & 7), toggle(m >> 3)].concat())
        .take(count)
        .collect()
}

/// Inode numbers of the interesting objects in [`build_sample_image`].
#[derive(Debug, Clone, Copy)]
pub struct SampleInodes {
    pub root: InodeNumber,
    pub boot: InodeNumber,
    pub vmlinuz: InodeNumber,
    pub grub: InodeNumber,
    pub grub_cfg: InodeNumber,
    pub etc: InodeNumber,
    pub hostname: InodeNumber,
    pub motd: InodeNumber,
    pub home: InodeNumber,
    pub sparse: InodeNumber,
    pub big: InodeNumber,
    pub long_link: InodeNumber,
    pub null_dev: InodeNumber,
}

/// Contents of `/etc/hostname` in the sample volume.
pub const SAMPLE_HOSTNAME: &[u8] = b"xfsr-sample\n";
/// Contents of `/boot/grub/grub.cfg` in the sample volume.
pub const SAMPLE_GRUB_CFG: &[u8] = b"set default=0\nset timeout=5\n";
/// Entries in `/home` (node format).
pub const SAMPLE_HOME_ENTRIES: usize = 300;
/// Filler entries in `/` besides the named ones.
pub const SAMPLE_ROOT_FILLER: usize = 40;

/// Build a small volume exercising every directory format and every
/// data-fork mapping the engine reads:
///
/// ```text
/// /                 leaf directory (50 entries over several data blocks)
/// /boot             block directory
/// /boot/vmlinuz     3 contiguous patterned blocks
/// /boot/grub        shortform directory
/// /boot/grub/grub.cfg
/// /etc              shortform directory
/// /etc/hostname
/// /etc/motd         inline symlink -> /etc/hostname
/// /home             node directory (300 entries)
/// /sparse           holes and an unwritten extent
/// /big              two-level BMBT
/// /long-link        remote symlink
/// /null             character device
/// /file-NN          40 hard links to one empty file
/// ```
pub fn build_sample_image(opts: ImageOptions) -> Result<(Vec<u8>, SampleInodes)> {
    let mut b = ImageBuilder::new(opts)?;
    let root = b.reserve_inode()?;

    let boot = b.reserve_inode()?;
    let vmlinuz = b.add_file_with_extents(3 * 4096 - 100, &[ExtentSpec::new(0, 3)])?;
    let grub_cfg = b.add_file(SAMPLE_GRUB_CFG)?;
    let grub = b.add_dir(boot, &[(b"grub.cfg", grub_cfg)], DirLayout::Shortform)?;
    b.add_dir_at(
        boot,
        root,
        &[(&b"vmlinuz"[..], vmlinuz), (&b"grub"[..], grub)],
        DirLayout::Block,
    )?;

    let hostname = b.add_file(SAMPLE_HOSTNAME)?;
    let motd = b.add_symlink(b"/etc/hostname")?;
    let etc = b.add_dir(
        root,
        &[(&b"hostname"[..], hostname), (&b"motd"[..], motd)],
        DirLayout::Shortform,
    )?;

    let empty = b.add_file(b"")?;
    let home_entries: Vec<(Vec<u8>, InodeNumber)> = (0..SAMPLE_HOME_ENTRIES)
        .map(|i| (format!("user{i:04}").into_bytes(), empty))
        .collect();
    let home = b.add_dir(
        root,
        &home_entries,
        DirLayout::Node {
            entries_per_block: 64,
            leaf_capacity: 40,
            fanout: 4,
        },
    )?;

    let sparse = b.add_file_with_extents(
        12 * 4096,
        &[
            ExtentSpec::new(1, 2),
            ExtentSpec::unwritten(5, 1),
            ExtentSpec::new(8, 2),
        ],
    )?;
    let big_extents: Vec<ExtentSpec> = (0..48).map(|i| ExtentSpec::new(i * 2, 1)).collect();
    let big = b.add_btree_file(
        96 * 4096,
        &big_extents,
        BtreeShape {
            leaf_capacity: 6,
            fanout: 3,
        },
    )?;
    let long_target: Vec<u8> = (0..600).map(|i| b'a' + u8::try_from(i % 26).unwrap_or(0)).collect();
    let long_link = b.add_remote_symlink(&long_target)?;
    let null_dev = b.add_special(S_IFCHR | 0o666, (1 << 8) | 3)?;
    let fifo = b.add_special(S_IFIFO | 0o644, 0)?;

    let mut root_entries: Vec<(Vec<u8>, InodeNumber)> = vec![
        (b"boot".to_vec(), boot),
        (b"etc".to_vec(), etc),
        (b"home".to_vec(), home),
        (b"sparse".to_vec(), sparse),
        (b"big".to_vec(), big),
        (b"long-link".to_vec(), long_link),
        (b"null".to_vec(), null_dev),
        (b"fifo".to_vec(), fifo),
    ];
    root_entries.extend((0..SAMPLE_ROOT_FILLER).map(|i| (format!("file-{i:02}").into_bytes(), empty)));
    b.add_dir_at(
        root,
        root,
        &root_entries,
        DirLayout::Leaf {
            entries_per_block: 20,
        },
    )?;
    b.set_root(root);

    let inodes = SampleInodes {
        root,
        boot,
        vmlinuz,
        grub,
        grub_cfg,
        etc,
        hostname,
        motd,
        home,
        sparse,
        big,
        long_link,
        null_dev,
    };
    Ok((b.finish()?, inodes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_path(rel: &str) -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .and_then(Path::parent)
            .expect("workspace root")
            .join("conformance")
            .join("fixtures")
            .join(rel)
    }

    #[test]
    fn v5_superblock_fixture_parses() {
        let sb = validate_superblock_fixture(&fixture_path("xfs_superblock_v5.json"))
            .expect("v5 fixture");
        assert_eq!(sb.block_size, 4096);
        assert!(sb.is_v5());
        assert!(sb.has_ftype());
    }

    #[test]
    fn sparse_fixture_rejects_out_of_bounds_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"size": 4, "writes": [{"offset": 2, "hex": "aabbcc"}]}"#)
            .expect("write");
        assert!(load_sparse_fixture(&path).is_err());
    }

    #[test]
    fn colliding_names_share_a_hash() {
        let names = colliding_names(64);
        let hash = xfsr_ondisk::xfs_da_hashname(&names[0]);
        assert!(names.iter().all(|n| xfsr_ondisk::xfs_da_hashname(n) == hash));
        let distinct: std::collections::BTreeSet<&Vec<u8>> = names.iter().collect();
        assert_eq!(distinct.len(), 64);
    }

    #[test]
    fn sample_image_builds() {
        let (image, inodes) = build_sample_image(ImageOptions::default()).expect("sample");
        assert_eq!(image.len(), 400 * BLOCK_SIZE);
        assert_ne!(inodes.root, inodes.boot);
        let sb = XfsSuperblock::parse_superblock_region(&image[..512]).expect("sb");
        assert_eq!(sb.root_ino, inodes.root);
    }
}
