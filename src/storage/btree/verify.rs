use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use super::node::{self, Node};
use super::tree::ItemPointerTree;
use crate::types::{IptError, ItemPointer, PageId, Result};

/// Summary of a structural check.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct TreeReport {
    /// Number of levels, counting the root.
    pub depth: usize,
    /// Leaf pages reached.
    pub leaf_nodes: u64,
    /// Internal pages reached.
    pub internal_nodes: u64,
    /// Keys stored in leaves.
    pub keys: u64,
    /// Leaf keys equal to the key before them in tree order.
    pub duplicate_keys: u64,
}

struct Walk {
    report: TreeReport,
    leaf_depth: Option<usize>,
    last_leaf_key: Option<ItemPointer>,
    /// Key equal to the upper separator of the previous leaf.
    shadowed: Option<ItemPointer>,
    visited: HashSet<PageId>,
}

impl ItemPointerTree {
    /// Walks every page reachable from `root` and checks the structural invariants.
    ///
    /// Fails with [`IptError::Corruption`] when keys are out of order, a key
    /// escapes its separator range, leaves sit at different depths, a node is
    /// over or under filled, or a page is reachable twice. A leaf may hold its
    /// upper separator only when the next leaf starts with a newer copy of it.
    pub fn verify(&self, root: PageId) -> Result<TreeReport> {
        let mut walk = Walk {
            report: TreeReport::default(),
            leaf_depth: None,
            last_leaf_key: None,
            shadowed: None,
            visited: HashSet::new(),
        };
        self.walk(root, None, None, 1, true, &mut walk)?;
        if walk.shadowed.is_some() {
            return Err(IptError::Corruption("leaf key equal to its separator is unreachable"));
        }
        walk.report.depth = walk.leaf_depth.unwrap_or(0);
        debug!(
            root = root.0,
            depth = walk.report.depth,
            keys = walk.report.keys,
            "btree.verify"
        );
        Ok(walk.report)
    }

    fn walk(
        &self,
        page_id: PageId,
        lower: Option<ItemPointer>,
        upper: Option<ItemPointer>,
        depth: usize,
        is_root: bool,
        walk: &mut Walk,
    ) -> Result<()> {
        self.check_bound(page_id)?;
        if !walk.visited.insert(page_id) {
            return Err(IptError::Corruption("page reachable through two parents"));
        }
        let current = {
            let page = self.pager().read_page(page_id)?;
            node::decode(self.layout(), page.data())?
        };
        let layout = self.layout();
        let keys = current.keys();
        if keys.len() > layout.max_keys() {
            return Err(IptError::Corruption("node holds more than max keys"));
        }
        for pair in keys.windows(2) {
            if pair[1] < pair[0] {
                return Err(IptError::Corruption("node keys out of order"));
            }
        }
        for key in keys {
            if lower.is_some_and(|low| *key < low) {
                return Err(IptError::Corruption("key below its separator range"));
            }
            if upper.is_some_and(|high| *key > high) {
                return Err(IptError::Corruption("key above its separator range"));
            }
        }
        match current {
            Node::Leaf(leaf) => {
                // Routing sends a key equal to a separator right, so a leaf may only
                // hold its upper separator as an older copy of a duplicate whose
                // run continues at the start of the next leaf.
                if let Some(shadowed) = walk.shadowed.take() {
                    if leaf.keys.first() != Some(&shadowed) {
                        return Err(IptError::Corruption(
                            "leaf key equal to its separator is unreachable",
                        ));
                    }
                }
                if let (Some(last), Some(high)) = (leaf.keys.last(), upper) {
                    if *last == high {
                        walk.shadowed = Some(high);
                    }
                }
                if !is_root && leaf.len() < layout.min_leaf_fill() {
                    return Err(IptError::Corruption("leaf below minimum fill"));
                }
                match walk.leaf_depth {
                    None => walk.leaf_depth = Some(depth),
                    Some(expected) if expected != depth => {
                        return Err(IptError::Corruption("leaves at different depths"));
                    }
                    Some(_) => {}
                }
                // Leaves are reached left to right, so this sees every key in order.
                for key in &leaf.keys {
                    match walk.last_leaf_key {
                        Some(prev) if *key < prev => {
                            return Err(IptError::Corruption("leaf keys out of order across pages"));
                        }
                        Some(prev) if *key == prev => walk.report.duplicate_keys += 1,
                        _ => {}
                    }
                    walk.last_leaf_key = Some(*key);
                }
                walk.report.leaf_nodes += 1;
                walk.report.keys += leaf.len() as u64;
                Ok(())
            }
            Node::Internal(internal) => {
                if is_root && internal.is_empty() {
                    return Err(IptError::Corruption("internal root without separator"));
                }
                if !is_root && internal.len() < layout.min_internal_fill() {
                    return Err(IptError::Corruption("internal node below minimum fill"));
                }
                walk.report.internal_nodes += 1;
                for (idx, child) in internal.children.iter().enumerate() {
                    if !child.is_valid() {
                        return Err(IptError::Corruption("invalid child reference"));
                    }
                    let child_lower = if idx == 0 {
                        lower
                    } else {
                        internal.keys.get(idx - 1).copied()
                    };
                    let child_upper = internal.keys.get(idx).copied().or(upper);
                    self.walk(
                        child.child_page(),
                        child_lower,
                        child_upper,
                        depth + 1,
                        false,
                        walk,
                    )?;
                }
                Ok(())
            }
        }
    }
}
