//! Shortform directories: entries packed in the inode literal area.
//!
//! "." and ".." are not stored; they are synthesized from the inode number
//! and the header's parent field, and come first in iteration.

use crate::{DirCursor, DirEntry, DirReader, EntryType, dir_error, entry_type};
use tracing::trace;
use xfsr_error::Result;
use xfsr_ondisk::{SfEntry, SfHeader, XfsDinode, parse_sf_entry, parse_sf_header};
use xfsr_types::InodeNumber;

fn sf_error(dir: &XfsDinode, detail: impl std::fmt::Display) -> xfsr_error::XfsError {
    dir_error(0, format!("shortform directory inode {}: {detail}", dir.ino))
}

/// Header and decoded entries of the inline area.
fn entries(dir: &XfsDinode, has_ftype: bool) -> Result<(SfHeader, Vec<SfEntry<'_>>)> {
    let len = usize::try_from(dir.size)
        .ok()
        .filter(|len| *len <= dir.data_fork.len())
        .ok_or_else(|| sf_error(dir, format!("size {} exceeds the fork", dir.size)))?;
    let fork = &dir.data_fork[..len];
    let hdr = parse_sf_header(fork).map_err(|e| sf_error(dir, e))?;

    let mut out = Vec::with_capacity(usize::from(hdr.count));
    let mut off = hdr.len;
    for _ in 0..hdr.count {
        let entry = parse_sf_entry(fork, off, hdr.ino_width, has_ftype)
            .map_err(|e| sf_error(dir, format!("entry at byte {off}: {e}")))?;
        off += entry.size;
        out.push(entry);
    }
    Ok((hdr, out))
}

pub(crate) fn lookup(
    reader: &DirReader<'_>,
    dir: &XfsDinode,
    name: &[u8],
) -> Result<Option<(InodeNumber, EntryType)>> {
    let (hdr, entries) = entries(dir, reader.geo.has_ftype)?;
    trace!(ino = dir.ino.0, count = hdr.count, "dir_sf_lookup");
    match name {
        b"." => return Ok(Some((dir.ino, EntryType::Directory))),
        b".." => return Ok(Some((InodeNumber(hdr.parent), EntryType::Directory))),
        _ => {}
    }
    Ok(entries
        .iter()
        .find(|e| e.name == name)
        .map(|e| (InodeNumber(e.ino), entry_type(e.ftype))))
}

/// Cursor 0 is ".", 1 is "..", `n + 2` is the n-th stored entry.
pub(crate) fn next(
    reader: &DirReader<'_>,
    dir: &XfsDinode,
    cursor: DirCursor,
) -> Result<Option<(DirEntry, DirCursor)>> {
    let (hdr, entries) = entries(dir, reader.geo.has_ftype)?;
    let entry = match cursor.0 {
        0 => DirEntry {
            ino: dir.ino,
            name: b".".to_vec(),
            entry_type: EntryType::Directory,
        },
        1 => DirEntry {
            ino: InodeNumber(hdr.parent),
            name: b"..".to_vec(),
            entry_type: EntryType::Directory,
        },
        n => {
            let Some(e) = usize::try_from(n - 2).ok().and_then(|i| entries.get(i)) else {
                return Ok(None);
            };
            DirEntry {
                ino: InodeNumber(e.ino),
                name: e.name.to_vec(),
                entry_type: entry_type(e.ftype),
            }
        }
    };
    Ok(Some((entry, DirCursor(cursor.0 + 1))))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{dir_fixture, numbered};
    use crate::*;
    use xfsr_harness::{DirLayout, ImageOptions};

    #[test]
    fn empty_shortform_lists_only_dots() {
        let fx = dir_fixture(ImageOptions::default(), Vec::new(), DirLayout::Shortform);
        let dir = fx.dir_inode();
        assert_eq!(dir.data_fork[0], 0);
        let reader = fx.reader();
        let all = reader.read_all(&dir).expect("all");
        let names: Vec<&[u8]> = all.iter().map(|e| e.name.as_slice()).collect();
        assert_eq!(names, [&b"."[..], &b".."[..]]);
        assert_eq!(all[1].ino, fx.root);
        assert_eq!(reader.lookup(&dir, b"anything").expect("lookup"), None);
        assert_eq!(
            reader.next_entry(&dir, DirCursor(2)).expect("end"),
            None
        );
    }

    #[test]
    fn iteration_follows_stored_order() {
        let names = vec![b"zeta".to_vec(), b"alpha".to_vec(), b"mid".to_vec()];
        let fx = dir_fixture(ImageOptions::default(), names.clone(), DirLayout::Shortform);
        let dir = fx.dir_inode();
        let all = fx.reader().read_all(&dir).expect("all");
        let got: Vec<Vec<u8>> = all[2..].iter().map(|e| e.name.clone()).collect();
        assert_eq!(got, names);
        assert!(all[2..].iter().all(|e| e.entry_type == EntryType::RegularFile));
    }

    #[test]
    fn entry_running_past_the_inline_size_is_corrupt() {
        let fx = dir_fixture(ImageOptions::default(), numbered(3), DirLayout::Shortform);
        let mut dir = fx.dir_inode();
        dir.data_fork[0] = 40;
        assert!(matches!(
            fx.reader().lookup(&dir, b"entry-0001"),
            Err(XfsError::CorruptDirectory { .. })
        ));
        assert!(matches!(
            fx.reader().next_entry(&dir, DirCursor::START),
            Err(XfsError::CorruptDirectory { .. })
        ));
    }

    #[test]
    fn wide_inode_numbers_use_eight_byte_slots() {
        let fx = dir_fixture(ImageOptions::default(), numbered(2), DirLayout::Shortform);
        let mut dir = fx.dir_inode();
        // Rewrite the fork with i8count = 1 and 8-byte numbers.
        let mut fork = vec![1_u8, 1];
        fork.extend_from_slice(&fx.root.0.to_be_bytes());
        fork.push(4);
        fork.extend_from_slice(&[0, 0x60]);
        fork.extend_from_slice(b"wide");
        fork.push(1);
        fork.extend_from_slice(&(1_u64 << 40).to_be_bytes());
        dir.size = fork.len() as u64;
        dir.data_fork[..fork.len()].copy_from_slice(&fork);
        let reader = fx.reader();
        assert_eq!(
            reader.lookup(&dir, b"wide").expect("lookup"),
            Some((InodeNumber(1 << 40), EntryType::RegularFile))
        );
        assert_eq!(
            reader.lookup(&dir, b"..").expect("parent").map(|(i, _)| i),
            Some(fx.root)
        );
    }
}
