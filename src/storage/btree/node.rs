//! Fixed-slot node encoding.
//!
//! Every tree page holds exactly one node:
//!
//! ```text
//! | page header (32) | num_keys:u32 | reserved:u32 | keys[order] | values[order + 1] |
//! ```
//!
//! Keys and values are 6-byte big-endian item pointers. Leaf values are
//! payloads; internal values are child references (`block = page`, `offset = 1`).

use std::ops::Range;

use crate::types::{
    page::{self, PageHeader, PageKind, PAGE_HDR_LEN},
    IptError, ItemPointer, PageId, Result, ITEM_POINTER_LEN,
};

/// Bytes used by the node header after the page header.
pub const NODE_HDR_LEN: usize = 8;
/// Smallest fan-out the split algorithm supports.
pub const MIN_ORDER: usize = 4;

const NUM_KEYS: Range<usize> = PAGE_HDR_LEN..PAGE_HDR_LEN + 4;
const RESERVED: Range<usize> = PAGE_HDR_LEN + 4..PAGE_HDR_LEN + NODE_HDR_LEN;
const KEYS_START: usize = PAGE_HDR_LEN + NODE_HDR_LEN;

/// Geometry derived from the page size and the configured fan-out.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NodeLayout {
    page_size: usize,
    order: usize,
}

impl NodeLayout {
    /// Largest order a page of `page_size` bytes can hold.
    ///
    /// One key slot and one value slot stay free for the pre-split overflow state.
    pub const fn max_order(page_size: usize) -> usize {
        let usable = page_size.saturating_sub(KEYS_START + ITEM_POINTER_LEN);
        (usable / (2 * ITEM_POINTER_LEN)).saturating_sub(1)
    }

    /// Builds a layout, defaulting to [`NodeLayout::max_order`].
    pub fn new(page_size: u32, order: Option<usize>) -> Result<Self> {
        let page_size = page_size as usize;
        let max = Self::max_order(page_size);
        let order = order.unwrap_or(max);
        if order < MIN_ORDER || order > max {
            return Err(IptError::InvalidOwned(format!(
                "tree order {order} outside supported range {MIN_ORDER}..={max} for {page_size}-byte pages"
            )));
        }
        Ok(Self { page_size, order })
    }

    /// Maximum fan-out of a node.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Page size the layout was computed for.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// A node splits as soon as it holds this many keys.
    pub fn max_keys(&self) -> usize {
        self.order - 1
    }

    /// Split point: the number of keys the original node keeps.
    pub fn min_keys(&self) -> usize {
        (self.order + 1).div_ceil(2) - 1
    }

    /// Fewest keys a non-root leaf can hold after insert-only growth.
    pub fn min_leaf_fill(&self) -> usize {
        self.max_keys() - self.min_keys()
    }

    /// Fewest keys a non-root internal node can hold after insert-only growth.
    pub fn min_internal_fill(&self) -> usize {
        self.max_keys() - self.min_keys() - 1
    }

    fn key_slot(&self, idx: usize) -> Range<usize> {
        let start = KEYS_START + idx * ITEM_POINTER_LEN;
        start..start + ITEM_POINTER_LEN
    }

    fn value_slot(&self, idx: usize) -> Range<usize> {
        let start = KEYS_START + (self.order + idx) * ITEM_POINTER_LEN;
        start..start + ITEM_POINTER_LEN
    }

    fn slots_end(&self) -> usize {
        KEYS_START + (2 * self.order + 1) * ITEM_POINTER_LEN
    }
}

/// Leaf node: `values[i]` is the payload mapped to `keys[i]`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LeafNode {
    /// Ascending keys.
    pub keys: Vec<ItemPointer>,
    /// Payloads, one per key.
    pub values: Vec<ItemPointer>,
}

impl LeafNode {
    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True for an empty leaf.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Smallest index whose key is `> key`.
    pub fn upper_bound(&self, key: ItemPointer) -> usize {
        self.keys.partition_point(|k| *k <= key)
    }

    /// Exact-match lookup; the last of several equal keys wins.
    pub fn get(&self, key: ItemPointer) -> Option<ItemPointer> {
        let pos = self.upper_bound(key).checked_sub(1)?;
        match self.keys.get(pos) {
            Some(found) if *found == key => self.values.get(pos).copied(),
            _ => None,
        }
    }

    /// Inserts after any existing equal keys, so the newest copy is the last one.
    pub fn insert(&mut self, key: ItemPointer, value: ItemPointer) -> usize {
        let pos = self.upper_bound(key);
        self.keys.insert(pos, key);
        self.values.insert(pos, value);
        pos
    }

    /// Moves `keys[mid..]` and `values[mid..]` into a new leaf.
    pub fn split_off(&mut self, mid: usize) -> LeafNode {
        LeafNode {
            keys: self.keys.split_off(mid),
            values: self.values.split_off(mid),
        }
    }
}

/// Internal node: `children[i]` roots keys `k` with `keys[i-1] <= k < keys[i]`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InternalNode {
    /// Ascending separators.
    pub keys: Vec<ItemPointer>,
    /// Child references, always `keys.len() + 1` of them.
    pub children: Vec<ItemPointer>,
}

impl InternalNode {
    /// Number of separator keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when the node holds no separator.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Index of the child whose range contains `key`.
    pub fn child_index(&self, key: ItemPointer) -> usize {
        self.keys.partition_point(|k| *k <= key)
    }

    /// Child reference covering `key`.
    pub fn child_for(&self, key: ItemPointer) -> Result<ItemPointer> {
        self.children
            .get(self.child_index(key))
            .copied()
            .ok_or(IptError::Corruption("internal node missing child slot"))
    }

    /// Absorbs a promotion from `children[pos]`: separator at `pos`, new child at `pos + 1`.
    pub fn insert_child(&mut self, pos: usize, key: ItemPointer, child: ItemPointer) {
        self.keys.insert(pos, key);
        self.children.insert(pos + 1, child);
    }

    /// Removes `keys[mid]` and moves everything right of it into a new node.
    pub fn split_off(&mut self, mid: usize) -> Result<(ItemPointer, InternalNode)> {
        if mid >= self.keys.len() {
            return Err(IptError::Corruption("internal split point beyond key count"));
        }
        let right_keys = self.keys.split_off(mid + 1);
        let right_children = self.children.split_off(mid + 1);
        let separator = self
            .keys
            .pop()
            .ok_or(IptError::Corruption("internal split without separator"))?;
        Ok((
            separator,
            InternalNode {
                keys: right_keys,
                children: right_children,
            },
        ))
    }
}

/// Decoded node, tagged by page kind.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Node {
    /// Leaf node.
    Leaf(LeafNode),
    /// Internal node.
    Internal(InternalNode),
}

impl Node {
    /// Page kind this node is stored under.
    pub fn kind(&self) -> PageKind {
        match self {
            Node::Leaf(_) => PageKind::BTreeLeaf,
            Node::Internal(_) => PageKind::BTreeInternal,
        }
    }

    /// Number of keys.
    pub fn num_keys(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.len(),
            Node::Internal(internal) => internal.len(),
        }
    }

    /// Keys in slot order.
    pub fn keys(&self) -> &[ItemPointer] {
        match self {
            Node::Leaf(leaf) => &leaf.keys,
            Node::Internal(internal) => &internal.keys,
        }
    }
}

/// Formats a freshly allocated page as an empty node of `kind`.
pub fn init_node(
    buf: &mut [u8],
    id: PageId,
    kind: PageKind,
    layout: &NodeLayout,
    salt: u64,
) -> Result<()> {
    if kind == PageKind::Meta {
        return Err(IptError::Invalid("tree node cannot use the meta page kind"));
    }
    if buf.len() != layout.page_size || layout.slots_end() > buf.len() {
        return Err(IptError::Corruption("node does not fit its page"));
    }
    if !page::is_unformatted(buf) {
        return Err(IptError::Corruption("node initialised over a formatted page"));
    }
    buf.fill(0);
    PageHeader::new(id, kind, layout.page_size as u32, salt)?.encode(buf)
}

/// Reads the node stored in `buf`.
pub fn decode(layout: &NodeLayout, buf: &[u8]) -> Result<Node> {
    if buf.len() < layout.slots_end() {
        return Err(IptError::Corruption("node page shorter than layout"));
    }
    let header = PageHeader::decode(buf)?;
    if buf[RESERVED].iter().any(|b| *b != 0) {
        return Err(IptError::Corruption("node reserved bytes not zero"));
    }
    let num_keys = u32::from_be_bytes([
        buf[NUM_KEYS.start],
        buf[NUM_KEYS.start + 1],
        buf[NUM_KEYS.start + 2],
        buf[NUM_KEYS.start + 3],
    ]) as usize;
    if num_keys > layout.order {
        return Err(IptError::Corruption("node key count exceeds order"));
    }
    let keys = (0..num_keys)
        .map(|i| ItemPointer::decode(&buf[layout.key_slot(i)]))
        .collect::<Result<Vec<_>>>()?;
    match header.kind {
        PageKind::BTreeLeaf => {
            let values = (0..num_keys)
                .map(|i| ItemPointer::decode(&buf[layout.value_slot(i)]))
                .collect::<Result<Vec<_>>>()?;
            Ok(Node::Leaf(LeafNode { keys, values }))
        }
        PageKind::BTreeInternal => {
            let children = (0..=num_keys)
                .map(|i| ItemPointer::decode(&buf[layout.value_slot(i)]))
                .collect::<Result<Vec<_>>>()?;
            Ok(Node::Internal(InternalNode { keys, children }))
        }
        PageKind::Meta => Err(IptError::Corruption("meta page used as tree node")),
    }
}

/// Writes `node` into an initialised page, leaving the page header intact apart from its kind.
pub fn encode(layout: &NodeLayout, node: &Node, buf: &mut [u8]) -> Result<()> {
    if buf.len() < layout.slots_end() {
        return Err(IptError::Corruption("node page shorter than layout"));
    }
    let (keys, values) = match node {
        Node::Leaf(leaf) => {
            if leaf.keys.len() != leaf.values.len() {
                return Err(IptError::Corruption("leaf keys and values disagree"));
            }
            (&leaf.keys, &leaf.values)
        }
        Node::Internal(internal) => {
            if internal.children.len() != internal.keys.len() + 1 {
                return Err(IptError::Corruption("internal node child count mismatch"));
            }
            (&internal.keys, &internal.children)
        }
    };
    if keys.len() > layout.order || values.len() > layout.order + 1 {
        return Err(IptError::Corruption("node overflows its slot arrays"));
    }
    page::set_kind(buf, node.kind())?;
    buf[NUM_KEYS].copy_from_slice(&(keys.len() as u32).to_be_bytes());
    buf[RESERVED].fill(0);
    buf[KEYS_START..layout.slots_end()].fill(0);
    for (i, key) in keys.iter().enumerate() {
        key.encode(&mut buf[layout.key_slot(i)]);
    }
    for (i, value) in values.iter().enumerate() {
        value.encode(&mut buf[layout.value_slot(i)]);
    }
    Ok(())
}
