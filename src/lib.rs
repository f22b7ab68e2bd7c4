//! Persistent B+ tree index mapping item pointers to item pointers.
//!
//! Pages live in a single database file fronted by a full-page-image
//! write-ahead log. [`storage::IptIndex`] is the usual entry point; the raw
//! tree engine is available as [`storage::ItemPointerTree`].

#![warn(missing_docs)]

pub mod primitives;
pub mod storage;
pub mod types;

pub use storage::{IndexOptions, IptIndex, ItemPointerTree, TreeOptions};
pub use types::{IptError, ItemPointer, PageId, Result};
