use std::sync::Arc;

use tracing::{debug, trace};

use super::node::{self, InternalNode, LeafNode, Node, NodeLayout};
use super::stats::{BTreeStats, BTreeStatsSnapshot};
use crate::primitives::pager::Pager;
use crate::types::{page::PageKind, IptError, ItemPointer, PageId, Result};

/// Deepest tree a lookup will descend before reporting corruption.
const MAX_DEPTH: usize = 64;

/// Configuration knobs for the tree.
#[derive(Clone, Debug, Default)]
pub struct TreeOptions {
    /// Node fan-out; `None` uses the largest order the page size allows.
    pub order: Option<usize>,
}

/// Key/child pair a split hands to its parent.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Promotion {
    key: ItemPointer,
    child: ItemPointer,
}

/// B+ tree mapping item pointers to item pointers.
///
/// The tree is identified only by its root page; callers own the root of
/// record and must persist whatever [`ItemPointerTree::insert`] returns.
/// Each page mutation is logged in its own WAL transaction, so a crash in the
/// middle of a multi-level insert can leave a split sibling unlinked from its
/// parent.
pub struct ItemPointerTree {
    pager: Arc<Pager>,
    layout: NodeLayout,
    stats: Arc<BTreeStats>,
}

impl ItemPointerTree {
    /// Builds a tree handle over `pager` with the given options.
    pub fn new(pager: Arc<Pager>, options: &TreeOptions) -> Result<Self> {
        let layout = NodeLayout::new(pager.page_size(), options.order)?;
        Ok(Self::with_layout(pager, layout))
    }

    /// Builds a tree handle with an explicit layout.
    pub fn with_layout(pager: Arc<Pager>, layout: NodeLayout) -> Self {
        Self {
            pager,
            layout,
            stats: Arc::new(BTreeStats::default()),
        }
    }

    /// Node geometry used by this tree.
    pub fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    /// Underlying page store.
    pub fn pager(&self) -> &Arc<Pager> {
        &self.pager
    }

    /// Access the live statistics counters for this tree.
    pub fn stats(&self) -> Arc<BTreeStats> {
        Arc::clone(&self.stats)
    }

    /// Snapshot the current statistics counters.
    pub fn stats_snapshot(&self) -> BTreeStatsSnapshot {
        self.stats.snapshot()
    }

    /// Allocates an empty leaf to serve as the first root.
    pub fn create_root(&self) -> Result<PageId> {
        let mut txn = self.pager.begin_txn();
        let (slot, id) = txn.allocate()?;
        node::init_node(
            txn.page_mut(slot),
            id,
            PageKind::BTreeLeaf,
            &self.layout,
            self.pager.salt(),
        )?;
        txn.commit()?;
        debug!(root = id.0, order = self.layout.order(), "btree.root.create");
        Ok(id)
    }

    /// Looks up `key`, returning `None` when it is absent.
    ///
    /// Only one page is latched at a time; the latch is released before
    /// moving to the child.
    pub fn search(&self, root: PageId, key: ItemPointer) -> Result<Option<ItemPointer>> {
        let mut page_id = root;
        for _ in 0..MAX_DEPTH {
            self.check_bound(page_id)?;
            let current = {
                let page = self.pager.read_page(page_id)?;
                node::decode(&self.layout, page.data())?
            };
            match current {
                Node::Leaf(leaf) => {
                    self.stats.inc_leaf_searches();
                    return Ok(leaf.get(key));
                }
                Node::Internal(internal) => {
                    self.stats.inc_internal_searches();
                    let child = internal.child_for(key)?;
                    trace!(page = page_id.0, child = child.block, "btree.search.descend");
                    page_id = child.child_page();
                }
            }
        }
        Err(IptError::Corruption("tree deeper than supported"))
    }

    /// Inserts `key -> value` and returns the root of record afterwards.
    ///
    /// The returned page differs from `root` only when the root split.
    pub fn insert(&self, root: PageId, key: ItemPointer, value: ItemPointer) -> Result<PageId> {
        let promotion = self.insert_at(root, key, value, 0)?;
        self.stats.inc_inserts();
        match promotion {
            None => Ok(root),
            Some(promotion) => self.grow_root(root, promotion),
        }
    }

    /// Deletion is not supported; always fails without touching any page.
    pub fn delete(&self, root: PageId, key: ItemPointer) -> Result<()> {
        trace!(root = root.0, key = %key, "btree.delete.rejected");
        Err(IptError::Unsupported("item pointer tree does not implement delete"))
    }

    pub(crate) fn check_bound(&self, page: PageId) -> Result<()> {
        let page_count = self.pager.page_count();
        if page.0 >= page_count {
            return Err(IptError::InvalidPage { page, page_count });
        }
        Ok(())
    }

    /// Latches `page_id` exclusively for the whole recursive call.
    fn insert_at(
        &self,
        page_id: PageId,
        key: ItemPointer,
        value: ItemPointer,
        depth: usize,
    ) -> Result<Option<Promotion>> {
        if depth >= MAX_DEPTH {
            return Err(IptError::Corruption("tree deeper than supported"));
        }
        self.check_bound(page_id)?;
        let mut txn = self.pager.begin_txn();
        let slot = txn.write(page_id)?;
        let mut current = node::decode(&self.layout, txn.page(slot))?;
        let promotion = match &mut current {
            Node::Leaf(leaf) => {
                leaf.insert(key, value);
                if leaf.len() >= self.layout.max_keys() {
                    Some(self.split_leaf(page_id, leaf)?)
                } else {
                    None
                }
            }
            Node::Internal(internal) => {
                let pos = internal.child_index(key);
                let child = internal
                    .children
                    .get(pos)
                    .ok_or(IptError::Corruption("internal node missing child slot"))?
                    .child_page();
                trace!(page = page_id.0, child = child.0, "btree.insert.descend");
                match self.insert_at(child, key, value, depth + 1)? {
                    None => {
                        txn.abort();
                        self.stats.inc_aborted_levels();
                        return Ok(None);
                    }
                    Some(below) => {
                        internal.insert_child(pos, below.key, below.child);
                        if internal.len() >= self.layout.max_keys() {
                            Some(self.split_internal(page_id, internal)?)
                        } else {
                            None
                        }
                    }
                }
            }
        };
        node::encode(&self.layout, &current, txn.page_mut(slot))?;
        txn.commit()?;
        Ok(promotion)
    }

    /// Moves the upper half of `leaf` into a new sibling; the sibling commits first.
    fn split_leaf(&self, page_id: PageId, leaf: &mut LeafNode) -> Result<Promotion> {
        let sibling = leaf.split_off(self.layout.min_keys());
        let key = *sibling
            .keys
            .first()
            .ok_or(IptError::Corruption("leaf split produced an empty sibling"))?;
        let sibling_id = self.write_sibling(PageKind::BTreeLeaf, &Node::Leaf(sibling))?;
        self.stats.inc_leaf_splits();
        debug!(
            page = page_id.0,
            sibling = sibling_id.0,
            separator = %key,
            "btree.split.leaf"
        );
        Ok(Promotion {
            key,
            child: ItemPointer::child(sibling_id)?,
        })
    }

    /// Promotes `keys[min_keys]`; it is kept by neither half.
    fn split_internal(&self, page_id: PageId, internal: &mut InternalNode) -> Result<Promotion> {
        let (key, sibling) = internal.split_off(self.layout.min_keys())?;
        let sibling_id = self.write_sibling(PageKind::BTreeInternal, &Node::Internal(sibling))?;
        self.stats.inc_internal_splits();
        debug!(
            page = page_id.0,
            sibling = sibling_id.0,
            separator = %key,
            "btree.split.internal"
        );
        Ok(Promotion {
            key,
            child: ItemPointer::child(sibling_id)?,
        })
    }

    fn write_sibling(&self, kind: PageKind, node: &Node) -> Result<PageId> {
        let mut txn = self.pager.begin_txn();
        let (slot, id) = txn.allocate()?;
        node::init_node(txn.page_mut(slot), id, kind, &self.layout, self.pager.salt())?;
        node::encode(&self.layout, node, txn.page_mut(slot))?;
        txn.commit()?;
        Ok(id)
    }

    fn grow_root(&self, old_root: PageId, promotion: Promotion) -> Result<PageId> {
        let root = Node::Internal(InternalNode {
            keys: vec![promotion.key],
            children: vec![ItemPointer::child(old_root)?, promotion.child],
        });
        let new_root = self.write_sibling(PageKind::BTreeInternal, &root)?;
        self.stats.inc_root_splits();
        debug!(
            old_root = old_root.0,
            new_root = new_root.0,
            separator = %promotion.key,
            "btree.root.grow"
        );
        Ok(new_root)
    }
}
