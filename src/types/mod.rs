#![forbid(unsafe_code)]

//! Shared identifiers, error types and on-disk page metadata.

use std::fmt;

mod checksum;
mod item_pointer;
pub mod page;

pub use checksum::{crc32, frame_link, page_crc32, Crc32};
pub use item_pointer::{ItemPointer, ITEM_POINTER_LEN};

/// Page number inside the database file.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u64);

/// Log sequence number assigned to a committed WAL transaction.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Lsn(pub u64);

/// Errors surfaced by every layer of the crate.
#[derive(thiserror::Error, Debug)]
pub enum IptError {
    /// Underlying file I/O failed.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Stored bytes violate a format invariant.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller supplied an invalid argument or option.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Invalid argument with a formatted message.
    #[error("invalid argument: {0}")]
    InvalidOwned(String),
    /// Page reference beyond the current end of the store.
    #[error("page {page} is not valid (store holds {page_count} pages)")]
    InvalidPage {
        /// Requested page.
        page: PageId,
        /// Number of pages in the store when the request was checked.
        page_count: u64,
    },
    /// Requested entry does not exist.
    #[error("not found")]
    NotFound,
    /// Operation is not implemented by this index.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, IptError>;

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PageId {
    fn from(value: u64) -> Self {
        PageId(value)
    }
}

impl From<PageId> for u64 {
    fn from(value: PageId) -> Self {
        value.0
    }
}
