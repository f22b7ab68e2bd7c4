//! Shared on-disk page metadata used by the pager and the tree.

use core::convert::{TryFrom, TryInto};

use super::{page_crc32, IptError, PageId, Result};

/// Magic bytes opening every formatted page.
pub const PAGE_MAGIC: [u8; 4] = *b"IPTB";
/// Current page format version.
pub const PAGE_FORMAT_VERSION: u16 = 1;
/// Page size used when the caller does not pick one.
pub const DEFAULT_PAGE_SIZE: u32 = 8192;
/// Smallest page size accepted by the pager.
pub const MIN_PAGE_SIZE: u32 = 512;
/// Length of the fixed page header.
pub const PAGE_HDR_LEN: usize = 32;

pub mod header {
    //! Byte offsets for fixed header fields.
    use core::ops::Range;

    pub const MAGIC: Range<usize> = 0..4;
    pub const FORMAT_VERSION: Range<usize> = 4..6;
    pub const PAGE_KIND: usize = 6;
    pub const RESERVED: usize = 7;
    pub const PAGE_SIZE: Range<usize> = 8..12;
    pub const PAGE_NO: Range<usize> = 12..20;
    pub const SALT: Range<usize> = 20..28;
    pub const CRC32: Range<usize> = 28..32;
}

/// Role of a page, stored in its header.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PageKind {
    /// Page 0: database metadata.
    Meta = 1,
    /// Tree leaf node.
    BTreeLeaf = 2,
    /// Tree internal node.
    BTreeInternal = 3,
}

impl PageKind {
    /// Raw header byte.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PageKind {
    type Error = IptError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PageKind::Meta),
            2 => Ok(PageKind::BTreeLeaf),
            3 => Ok(PageKind::BTreeInternal),
            _ => Err(IptError::Corruption("unknown page kind")),
        }
    }
}

/// Decoded fixed page header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PageHeader {
    /// Format version the page was written with.
    pub format_version: u16,
    /// Role of the page.
    pub kind: PageKind,
    /// Page size the database was created with.
    pub page_size: u32,
    /// Page number the image belongs to.
    pub page_no: PageId,
    /// Database salt mixed into the CRC.
    pub salt: u64,
    /// Stored CRC32 of the page image.
    pub crc32: u32,
}

impl PageHeader {
    /// Builds a header with a zero CRC.
    pub fn new(page_no: PageId, kind: PageKind, page_size: u32, salt: u64) -> Result<Self> {
        if (page_size as usize) < PAGE_HDR_LEN {
            return Err(IptError::Invalid("page size smaller than header"));
        }
        Ok(Self {
            format_version: PAGE_FORMAT_VERSION,
            kind,
            page_size,
            page_no,
            salt,
            crc32: 0,
        })
    }

    /// Writes the header into the first [`PAGE_HDR_LEN`] bytes of `dst`.
    pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
        if dst.len() < PAGE_HDR_LEN {
            return Err(IptError::Invalid("page header buffer too small"));
        }
        let hdr = &mut dst[..PAGE_HDR_LEN];
        hdr[header::MAGIC].copy_from_slice(&PAGE_MAGIC);
        hdr[header::FORMAT_VERSION].copy_from_slice(&self.format_version.to_be_bytes());
        hdr[header::PAGE_KIND] = self.kind.as_u8();
        hdr[header::RESERVED] = 0;
        hdr[header::PAGE_SIZE].copy_from_slice(&self.page_size.to_be_bytes());
        hdr[header::PAGE_NO].copy_from_slice(&self.page_no.0.to_be_bytes());
        hdr[header::SALT].copy_from_slice(&self.salt.to_be_bytes());
        hdr[header::CRC32].copy_from_slice(&self.crc32.to_be_bytes());
        Ok(())
    }

    /// Parses and validates the header at the start of `src`.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < PAGE_HDR_LEN {
            return Err(IptError::Corruption("page header truncated"));
        }
        let hdr = &src[..PAGE_HDR_LEN];
        if hdr[header::MAGIC] != PAGE_MAGIC {
            return Err(IptError::Corruption("invalid page magic"));
        }
        let format_version = u16::from_be_bytes(read_array(hdr, header::FORMAT_VERSION)?);
        if format_version != PAGE_FORMAT_VERSION {
            return Err(IptError::Corruption("unsupported page format version"));
        }
        if hdr[header::RESERVED] != 0 {
            return Err(IptError::Corruption("page header reserved byte not zero"));
        }
        let kind = PageKind::try_from(hdr[header::PAGE_KIND])?;
        let page_size = u32::from_be_bytes(read_array(hdr, header::PAGE_SIZE)?);
        if (page_size as usize) < PAGE_HDR_LEN {
            return Err(IptError::Corruption("page size smaller than header"));
        }
        let page_no = PageId(u64::from_be_bytes(read_array(hdr, header::PAGE_NO)?));
        let salt = u64::from_be_bytes(read_array(hdr, header::SALT)?);
        let crc32 = u32::from_be_bytes(read_array(hdr, header::CRC32)?);
        Ok(Self {
            format_version,
            kind,
            page_size,
            page_no,
            salt,
            crc32,
        })
    }
}

/// Overwrites only the kind byte of an already formatted page.
pub fn set_kind(buf: &mut [u8], kind: PageKind) -> Result<()> {
    if buf.len() < PAGE_HDR_LEN {
        return Err(IptError::Invalid("page header buffer too small"));
    }
    buf[header::PAGE_KIND] = kind.as_u8();
    Ok(())
}

/// True for pages that were allocated but never formatted (all-zero header).
pub fn is_unformatted(buf: &[u8]) -> bool {
    buf.len() >= PAGE_HDR_LEN && buf[..PAGE_HDR_LEN].iter().all(|&b| b == 0)
}

/// Recomputes and stores the CRC of a formatted page image.
pub fn stamp_crc32(buf: &mut [u8], page_no: PageId, salt: u64) -> Result<()> {
    if buf.len() < PAGE_HDR_LEN {
        return Err(IptError::Invalid("page header buffer too small"));
    }
    buf[header::CRC32].fill(0);
    let crc = page_crc32(page_no, salt, buf);
    buf[header::CRC32].copy_from_slice(&crc.to_be_bytes());
    Ok(())
}

/// Checks the stored CRC of a page image read back from disk.
///
/// Unformatted pages carry no CRC and always pass.
pub fn verify_crc32(buf: &[u8], page_no: PageId, salt: u64) -> Result<()> {
    if is_unformatted(buf) {
        return Ok(());
    }
    let stored = PageHeader::decode(buf)?.crc32;
    let mut scratch = buf.to_vec();
    scratch[header::CRC32].fill(0);
    if page_crc32(page_no, salt, &scratch) != stored {
        return Err(IptError::Corruption("page crc mismatch"));
    }
    Ok(())
}

fn read_array<const N: usize>(src: &[u8], range: core::ops::Range<usize>) -> Result<[u8; N]> {
    src[range]
        .try_into()
        .map_err(|_| IptError::Corruption("page header field truncated"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_header_roundtrip() {
        let mut buf = [0u8; PAGE_HDR_LEN];
        let header = PageHeader::new(PageId(42), PageKind::BTreeLeaf, DEFAULT_PAGE_SIZE, 777)
            .unwrap();
        header.encode(&mut buf).unwrap();
        assert_eq!(PageHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn page_kind_from_u8_rejects_unknown() {
        assert!(PageKind::try_from(0).is_err());
        assert!(PageKind::try_from(9).is_err());
    }

    #[test]
    fn crc_stamp_detects_flipped_byte() {
        let mut buf = vec![0u8; 512];
        PageHeader::new(PageId(3), PageKind::BTreeInternal, 512, 99)
            .unwrap()
            .encode(&mut buf)
            .unwrap();
        buf[100] = 0x5A;
        stamp_crc32(&mut buf, PageId(3), 99).unwrap();
        verify_crc32(&buf, PageId(3), 99).unwrap();
        buf[101] ^= 0xFF;
        assert!(matches!(
            verify_crc32(&buf, PageId(3), 99),
            Err(IptError::Corruption("page crc mismatch"))
        ));
    }

    #[test]
    fn unformatted_page_skips_crc() {
        let buf = vec![0u8; 512];
        assert!(is_unformatted(&buf));
        verify_crc32(&buf, PageId(8), 1).unwrap();
    }

    #[test]
    fn set_kind_rewrites_only_kind_byte() {
        let mut buf = [0u8; PAGE_HDR_LEN];
        PageHeader::new(PageId(1), PageKind::BTreeLeaf, 4096, 5)
            .unwrap()
            .encode(&mut buf)
            .unwrap();
        set_kind(&mut buf, PageKind::BTreeInternal).unwrap();
        let decoded = PageHeader::decode(&buf).unwrap();
        assert_eq!(decoded.kind, PageKind::BTreeInternal);
        assert_eq!(decoded.page_no, PageId(1));
    }
}
