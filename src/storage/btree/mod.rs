#![forbid(unsafe_code)]

//! Page-organised B+ tree mapping item pointers to item pointers.

/// Node layout, codec and in-memory node operations.
pub mod node;
mod stats;
mod tree;
mod verify;

pub use node::{InternalNode, LeafNode, Node, NodeLayout, MIN_ORDER};
pub use stats::{BTreeStats, BTreeStatsSnapshot};
pub use tree::{ItemPointerTree, TreeOptions};
pub use verify::TreeReport;
