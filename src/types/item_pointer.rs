use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::{IptError, PageId, Result};

/// Encoded size of an [`ItemPointer`] (`block:u32` + `offset:u16`).
pub const ITEM_POINTER_LEN: usize = 6;

const INVALID_BLOCK: u32 = u32::MAX;
const INVALID_OFFSET: u16 = 0;
const CHILD_OFFSET: u16 = 1;

/// Fixed-size `(block, offset)` pair used as key, payload and child reference.
///
/// Ordering is by block number first, then offset.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ItemPointer {
    /// Block (page) number.
    pub block: u32,
    /// Offset inside the block; zero is reserved for the invalid pointer.
    pub offset: u16,
}

impl ItemPointer {
    /// Sentinel meaning "no pointer".
    pub const INVALID: ItemPointer = ItemPointer {
        block: INVALID_BLOCK,
        offset: INVALID_OFFSET,
    };

    /// Creates a pointer from its parts.
    pub const fn new(block: u32, offset: u16) -> Self {
        Self { block, offset }
    }

    /// Returns false for the sentinel and any pointer with a zero offset.
    pub const fn is_valid(&self) -> bool {
        self.offset != INVALID_OFFSET
    }

    /// Encodes `page` as an internal-node child reference.
    pub fn child(page: PageId) -> Result<Self> {
        let block = u32::try_from(page.0)
            .map_err(|_| IptError::Invalid("page number exceeds item pointer block range"))?;
        if block == INVALID_BLOCK {
            return Err(IptError::Invalid("page number collides with invalid block"));
        }
        Ok(Self::new(block, CHILD_OFFSET))
    }

    /// Interprets this pointer as a child page reference.
    pub fn child_page(&self) -> PageId {
        PageId(u64::from(self.block))
    }

    /// Writes the big-endian encoding into `dst`.
    pub fn encode(&self, dst: &mut [u8]) {
        dst[0..4].copy_from_slice(&self.block.to_be_bytes());
        dst[4..6].copy_from_slice(&self.offset.to_be_bytes());
    }

    /// Reads a pointer from the first [`ITEM_POINTER_LEN`] bytes of `src`.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < ITEM_POINTER_LEN {
            return Err(IptError::Corruption("item pointer truncated"));
        }
        let block = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        let offset = u16::from_be_bytes([src[4], src[5]]);
        Ok(Self { block, offset })
    }
}

impl Ord for ItemPointer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.block
            .cmp(&other.block)
            .then(self.offset.cmp(&other.offset))
    }
}

impl PartialOrd for ItemPointer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ItemPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.offset)
    }
}

impl FromStr for ItemPointer {
    type Err = IptError;

    fn from_str(s: &str) -> Result<Self> {
        let (block, offset) = s
            .split_once(':')
            .ok_or_else(|| IptError::InvalidOwned(format!("expected block:offset, got '{s}'")))?;
        let block = block
            .trim()
            .parse::<u32>()
            .map_err(|err| IptError::InvalidOwned(format!("bad block number '{block}': {err}")))?;
        let offset = offset
            .trim()
            .parse::<u16>()
            .map_err(|err| IptError::InvalidOwned(format!("bad offset '{offset}': {err}")))?;
        Ok(Self::new(block, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_block_then_offset() {
        let a = ItemPointer::new(1, 9);
        let b = ItemPointer::new(2, 1);
        let c = ItemPointer::new(2, 3);
        assert!(a < b);
        assert!(b < c);
        let mut all = vec![c, a, b];
        all.sort();
        assert_eq!(all, vec![a, b, c]);
    }

    #[test]
    fn invalid_sentinel_is_not_valid() {
        assert!(!ItemPointer::INVALID.is_valid());
        assert!(ItemPointer::new(0, 1).is_valid());
    }

    #[test]
    fn child_reference_roundtrip() {
        let child = ItemPointer::child(PageId(42)).unwrap();
        assert_eq!(child.child_page(), PageId(42));
        assert!(child.is_valid());
        assert!(ItemPointer::child(PageId(u64::from(u32::MAX) + 1)).is_err());
    }

    #[test]
    fn parses_block_offset_text() {
        let ptr: ItemPointer = "17:3".parse().unwrap();
        assert_eq!(ptr, ItemPointer::new(17, 3));
        assert_eq!(ptr.to_string(), "17:3");
        assert!("17".parse::<ItemPointer>().is_err());
        assert!("x:1".parse::<ItemPointer>().is_err());
        assert!("1:70000".parse::<ItemPointer>().is_err());
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let mut buf = [0u8; ITEM_POINTER_LEN];
        ItemPointer::new(0xDEAD_BEEF, 7).encode(&mut buf);
        assert_eq!(ItemPointer::decode(&buf).unwrap(), ItemPointer::new(0xDEAD_BEEF, 7));
        assert!(ItemPointer::decode(&buf[..5]).is_err());
    }
}
