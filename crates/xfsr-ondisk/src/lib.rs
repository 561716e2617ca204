#![forbid(unsafe_code)]
//! On-disk format decoding for XFS.
//!
//! Pure parsing crate: no I/O, no side effects. Every structure is decoded
//! from a byte slice by explicit big-endian field reads at fixed offsets;
//! nothing is reinterpreted in place. Covers the superblock and derived
//! geometry, inode cores, BMBT extent records and btree blocks, and the
//! version 2/3 directory structures.

pub mod bmbt;
pub mod dinode;
pub mod dir2;
pub mod sb;

pub use bmbt::{
    BmbtEntries, BmbtIrec, BmbtNode, BmdrRoot, parse_bmbt_node, parse_bmdr_root,
    parse_extent_list, select_child,
};
pub use dinode::{DinodeFormat, XfsDinode, XfsTimestamp};
pub use dir2::{
    BlockTail, DaNode, DaNodeEntry, DataEntry, DataHeader, DataKind, DataSlot, LeafEntry,
    LeafHeader, LeafKind, SfEntry, SfHeader, XfsFileType, data_entry_size, parse_block_tail,
    parse_da_node, parse_data_header, parse_data_slot, parse_leaf_entries, parse_leaf_header,
    parse_sf_entry, parse_sf_header, peek_da_magic, xfs_da_hashname,
};
pub use sb::{InodeLocation, XfsGeometry, XfsSuperblock};
