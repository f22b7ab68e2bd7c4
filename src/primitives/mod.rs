//! Low-level primitives for building the storage engine.
//!
//! Includes positioned file I/O, write-ahead logging (WAL), and the pager
//! that ties them into a latched, logged page store.

/// I/O abstractions and utilities.
///
/// Interfaces for reading/writing data and file operations.
pub mod io;

/// Paging subsystem: page cache, latches, WAL transactions and checkpoints.
pub mod pager;

/// Write-ahead logging (WAL) for crash recovery.
///
/// Ensures durability through sequential logging of full page images.
pub mod wal;
