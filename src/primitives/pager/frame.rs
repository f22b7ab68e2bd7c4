use parking_lot::RwLock;
use std::sync::Arc;

use crate::types::PageId;

/// Cached page buffer shared between the cache and outstanding latches.
pub struct Frame {
    pub id: PageId,
    pub buf: Arc<RwLock<Box<[u8]>>>,
}

impl Frame {
    pub fn new(id: PageId, data: Box<[u8]>) -> Self {
        Self {
            id,
            buf: Arc::new(RwLock::new(data)),
        }
    }

    pub fn zeroed(id: PageId, page_size: usize) -> Self {
        Self::new(id, vec![0u8; page_size].into_boxed_slice())
    }

    /// A frame is pinned while any latch handle holds a clone of its buffer.
    pub fn is_pinned(&self) -> bool {
        Arc::strong_count(&self.buf) > 1
    }
}
