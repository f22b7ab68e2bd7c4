use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use super::btree::{BTreeStatsSnapshot, ItemPointerTree, NodeLayout, TreeOptions, TreeReport};
use crate::primitives::pager::{Meta, Pager, PagerOptions, PagerStats};
use crate::types::{IptError, ItemPointer, Lsn, PageId, Result};

/// Options for opening an [`IptIndex`].
#[derive(Clone, Debug, Default)]
pub struct IndexOptions {
    /// Page store configuration.
    pub pager: PagerOptions,
    /// Tree configuration; only consulted when the tree is first created.
    pub tree: TreeOptions,
}

/// Point-in-time counters of an index.
#[derive(Clone, Debug, Serialize)]
pub struct IndexStats {
    /// Current root of record.
    pub root: u64,
    /// Tree fan-out.
    pub order: usize,
    /// Page size in bytes.
    pub page_size: u32,
    /// Pages in the database file.
    pub page_count: u64,
    /// Tree counters.
    pub btree: BTreeStatsSnapshot,
    /// Pager counters.
    pub pager: PagerStatsView,
}

/// Serializable copy of [`PagerStats`].
#[derive(Clone, Debug, Serialize)]
pub struct PagerStatsView {
    /// Cache hits.
    pub hits: u64,
    /// Cache misses.
    pub misses: u64,
    /// Cache evictions.
    pub evictions: u64,
    /// Pages allocated.
    pub allocations: u64,
    /// Committed WAL transactions.
    pub commits: u64,
    /// Aborted WAL transactions.
    pub aborts: u64,
    /// Page images logged.
    pub wal_frames: u64,
    /// Checkpoints completed.
    pub checkpoints: u64,
    /// Images redone while opening.
    pub replayed_frames: u64,
}

impl From<PagerStats> for PagerStatsView {
    fn from(stats: PagerStats) -> Self {
        Self {
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            allocations: stats.allocations,
            commits: stats.commits,
            aborts: stats.aborts,
            wal_frames: stats.wal_frames,
            checkpoints: stats.checkpoints,
            replayed_frames: stats.replayed_frames,
        }
    }
}

/// A single item pointer tree stored in its own database file.
///
/// Owns the root of record: page 0 holds the current root and the tree order,
/// and is rewritten whenever an insert grows the tree. Inserts are serialised;
/// searches run concurrently with each other and with inserts, and a search
/// that races a split may miss a key the split is moving.
pub struct IptIndex {
    pager: Arc<Pager>,
    tree: ItemPointerTree,
    root: AtomicU64,
    insert_lock: Mutex<()>,
}

impl IptIndex {
    /// Creates a new database at `path` with an empty tree.
    pub fn create(path: impl AsRef<Path>, options: IndexOptions) -> Result<Self> {
        let pager = Arc::new(Pager::create(path.as_ref(), options.pager)?);
        Self::attach(pager, &options.tree)
    }

    /// Opens an existing database.
    ///
    /// A requested order that disagrees with the stored one is rejected.
    pub fn open(path: impl AsRef<Path>, options: IndexOptions) -> Result<Self> {
        let pager = Arc::new(Pager::open(path.as_ref(), options.pager)?);
        Self::attach(pager, &options.tree)
    }

    /// Opens `path` if it holds a database, otherwise creates one.
    pub fn open_or_create(path: impl AsRef<Path>, options: IndexOptions) -> Result<Self> {
        let pager = Arc::new(Pager::open_or_create(path.as_ref(), options.pager)?);
        Self::attach(pager, &options.tree)
    }

    fn attach(pager: Arc<Pager>, options: &TreeOptions) -> Result<Self> {
        let meta = pager.meta()?;
        if meta.has_tree() {
            let stored = meta.tree_order as usize;
            if let Some(requested) = options.order {
                if requested != stored {
                    return Err(IptError::InvalidOwned(format!(
                        "tree order {requested} does not match stored order {stored}"
                    )));
                }
            }
            let layout = NodeLayout::new(pager.page_size(), Some(stored))?;
            let tree = ItemPointerTree::with_layout(Arc::clone(&pager), layout);
            tree.check_bound(meta.tree_root)?;
            debug!(root = meta.tree_root.0, order = stored, "index.open");
            return Ok(Self::from_parts(pager, tree, meta.tree_root));
        }
        let tree = ItemPointerTree::new(Arc::clone(&pager), options)?;
        let root = tree.create_root()?;
        let order = tree.layout().order() as u32;
        pager.update_meta(|meta| {
            meta.tree_order = order;
            meta.tree_root = root;
        })?;
        info!(root = root.0, order, "index.bootstrap");
        Ok(Self::from_parts(pager, tree, root))
    }

    fn from_parts(pager: Arc<Pager>, tree: ItemPointerTree, root: PageId) -> Self {
        Self {
            pager,
            tree,
            root: AtomicU64::new(root.0),
            insert_lock: Mutex::new(()),
        }
    }

    /// Current root of record.
    pub fn root(&self) -> PageId {
        PageId(self.root.load(AtomicOrdering::Acquire))
    }

    /// Underlying tree engine.
    pub fn tree(&self) -> &ItemPointerTree {
        &self.tree
    }

    /// Underlying page store.
    pub fn pager(&self) -> &Arc<Pager> {
        &self.pager
    }

    /// Stored metadata.
    pub fn meta(&self) -> Result<Meta> {
        self.pager.meta()
    }

    /// Looks up `key`.
    pub fn search(&self, key: ItemPointer) -> Result<Option<ItemPointer>> {
        self.tree.search(self.root(), key)
    }

    /// Looks up `key`, failing with [`IptError::NotFound`] when it is absent.
    pub fn get(&self, key: ItemPointer) -> Result<ItemPointer> {
        self.search(key)?.ok_or(IptError::NotFound)
    }

    /// Inserts `key -> value`, persisting a new root when the tree grows.
    pub fn insert(&self, key: ItemPointer, value: ItemPointer) -> Result<()> {
        let _guard = self.insert_lock.lock();
        let root = self.root();
        let new_root = self.tree.insert(root, key, value)?;
        if new_root != root {
            self.pager.update_meta(|meta| meta.tree_root = new_root)?;
            self.root.store(new_root.0, AtomicOrdering::Release);
            debug!(old_root = root.0, new_root = new_root.0, "index.root.persist");
        }
        Ok(())
    }

    /// Always fails; the tree does not support deletion.
    pub fn delete(&self, key: ItemPointer) -> Result<()> {
        self.tree.delete(self.root(), key)
    }

    /// Checks the structure of the whole tree.
    pub fn verify(&self) -> Result<TreeReport> {
        let _guard = self.insert_lock.lock();
        self.tree.verify(self.root())
    }

    /// Writes committed pages back to the database file and truncates the WAL.
    ///
    /// Tree counters are logged afterwards.
    pub fn checkpoint(&self) -> Result<Lsn> {
        let lsn = self.pager.checkpoint()?;
        self.tree.stats().emit_tracing();
        debug!(lsn = lsn.0, pager = %self.pager.stats(), "index.checkpoint");
        Ok(lsn)
    }

    /// Collects tree and pager counters.
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            root: self.root().0,
            order: self.tree.layout().order(),
            page_size: self.pager.page_size(),
            page_count: self.pager.page_count(),
            btree: self.tree.stats_snapshot(),
            pager: self.pager.stats().into(),
        }
    }
}
