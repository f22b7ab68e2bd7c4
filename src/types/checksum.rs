//! CRC32 (IEEE) over page images and WAL frames.

use super::PageId;

/// Running CRC32 fed one field at a time.
#[derive(Clone, Default)]
pub struct Crc32(crc32fast::Hasher);

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.0.update(bytes);
        self
    }

    /// Feeds `value` big-endian.
    #[must_use]
    pub fn u64(self, value: u64) -> Self {
        self.bytes(&value.to_be_bytes())
    }

    pub fn value(self) -> u32 {
        self.0.finalize()
    }
}

/// CRC32 of a single buffer.
pub fn crc32(bytes: &[u8]) -> u32 {
    Crc32::new().bytes(bytes).value()
}

/// CRC of a page image, salted with its page number and the database salt.
///
/// `image` must already have its CRC field zeroed, so a page copied to
/// another slot or another database fails verification.
pub fn page_crc32(page: PageId, salt: u64, image: &[u8]) -> u32 {
    Crc32::new().u64(page.0).u64(salt).bytes(image).value()
}

/// Next link of the WAL frame chain.
///
/// The high half carries the frame size and the low half the CRC of the
/// previous link, the frame header and the payload.
pub fn frame_link(prev: u64, header: &[u8], payload: &[u8], frame_size: usize) -> u64 {
    let crc = Crc32::new().u64(prev).bytes(header).bytes(payload).value();
    ((frame_size as u64) << 32) | u64::from(crc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_fields_match_one_buffer() {
        let joined = crc32(b"item pointer");
        assert_eq!(Crc32::new().bytes(b"item").bytes(b" pointer").value(), joined);
        assert_ne!(crc32(b"item"), joined);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn page_crc_depends_on_slot_and_salt() {
        let image = vec![7u8; 64];
        let base = page_crc32(PageId(3), 11, &image);
        assert_eq!(base, page_crc32(PageId(3), 11, &image));
        assert_ne!(base, page_crc32(PageId(4), 11, &image));
        assert_ne!(base, page_crc32(PageId(3), 12, &image));
    }

    #[test]
    fn frame_link_carries_size_and_previous_link() {
        let link = frame_link(0, b"hdr", b"payload", 548);
        assert_eq!(link >> 32, 548);
        assert_ne!(link, frame_link(1, b"hdr", b"payload", 548));
        assert_ne!(link, frame_link(0, b"hdr", b"payloaD", 548));
    }
}
