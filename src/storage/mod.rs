//! Index layer built on the pager.
//!
//! The B+ tree engine lives in [`btree`]; [`index`] wraps one tree together
//! with its database file and root of record.

/// Item pointer B+ tree.
pub mod btree;

/// Database-backed index owning the tree's root of record.
pub mod index;

pub use btree::{ItemPointerTree, TreeOptions, TreeReport};
pub use index::{IndexOptions, IndexStats, IptIndex};
