use crate::primitives::io::{is_eof, FileIo};
use crate::types::{
    page::{self, PageHeader, PageKind, PAGE_HDR_LEN},
    IptError, PageId, Result,
};
use rand::{rngs::OsRng, RngCore};
use std::convert::TryInto;
use std::fmt;
use std::ops::Range;

const META_SALT: Range<usize> = PAGE_HDR_LEN..PAGE_HDR_LEN + 8;
const META_PAGE_SIZE: Range<usize> = PAGE_HDR_LEN + 8..PAGE_HDR_LEN + 12;
const META_FORMAT_VERSION: Range<usize> = PAGE_HDR_LEN + 12..PAGE_HDR_LEN + 14;
const META_RESERVED: Range<usize> = PAGE_HDR_LEN + 14..PAGE_HDR_LEN + 16;
const META_WAL_SALT: Range<usize> = PAGE_HDR_LEN + 16..PAGE_HDR_LEN + 24;
const META_TREE_ORDER: Range<usize> = PAGE_HDR_LEN + 24..PAGE_HDR_LEN + 28;
const META_RESERVED_2: Range<usize> = PAGE_HDR_LEN + 28..PAGE_HDR_LEN + 32;
const META_TREE_ROOT: Range<usize> = PAGE_HDR_LEN + 32..PAGE_HDR_LEN + 40;

/// Byte length of the encoded meta record including the page header.
pub const META_LEN: usize = PAGE_HDR_LEN + 40;

/// Database metadata stored in page 0.
///
/// Holds the on-disk format parameters and the tree's root of record.
/// `tree_root == PageId(0)` means no tree has been created yet.
#[derive(Clone, Debug, PartialEq)]
pub struct Meta {
    /// Size of each page in bytes.
    pub page_size: u32,
    /// Random salt mixed into page checksums.
    pub salt: u64,
    /// Database format version number.
    pub format_version: u16,
    /// Random salt tying the WAL to this file.
    pub wal_salt: u64,
    /// Fan-out the tree was created with.
    pub tree_order: u32,
    /// Current root page of the tree.
    pub tree_root: PageId,
}

impl Meta {
    /// Builds fresh metadata with random salts and no tree root.
    pub fn fresh(page_size: u32, tree_order: u32) -> Result<Self> {
        if (page_size as usize) < META_LEN {
            return Err(IptError::Invalid("page size smaller than meta record"));
        }
        let mut rng = OsRng;
        Ok(Self {
            page_size,
            salt: rng.next_u64(),
            format_version: page::PAGE_FORMAT_VERSION,
            wal_salt: rng.next_u64(),
            tree_order,
            tree_root: PageId(0),
        })
    }

    /// True once a root has been recorded.
    pub fn has_tree(&self) -> bool {
        self.tree_root != PageId(0)
    }
}

/// Creates a new metadata page and writes it to page 0 of `io`.
///
/// The page is synced before returning.
pub fn create_meta(io: &dyn FileIo, page_size: u32, tree_order: u32) -> Result<Meta> {
    let meta = Meta::fresh(page_size, tree_order)?;
    let mut buf = vec![0u8; page_size as usize];
    write_meta_page(&mut buf, &meta)?;
    io.write_at(0, &buf)?;
    io.sync_all()?;
    Ok(meta)
}

/// Reads the page size recorded in page 0 without knowing it up front.
pub fn stored_page_size(io: &dyn FileIo) -> Result<u32> {
    let mut hdr = [0u8; PAGE_HDR_LEN];
    match io.read_at(0, &mut hdr) {
        Ok(()) => {}
        Err(err) if is_eof(&err) => return Err(IptError::Corruption("meta page truncated")),
        Err(err) => return Err(err),
    }
    let header = PageHeader::decode(&hdr)?;
    if header.kind != PageKind::Meta {
        return Err(IptError::Corruption("meta page has wrong kind"));
    }
    Ok(header.page_size)
}

/// Loads and verifies the metadata from page 0.
pub fn load_meta(io: &dyn FileIo, page_size: u32) -> Result<Meta> {
    if (page_size as usize) < META_LEN {
        return Err(IptError::Invalid("page size smaller than meta record"));
    }
    let mut buf = vec![0u8; page_size as usize];
    match io.read_at(0, &mut buf) {
        Ok(()) => {}
        Err(err) if is_eof(&err) => return Err(IptError::Corruption("meta page truncated")),
        Err(err) => return Err(err),
    }
    read_meta_page(&buf)
}

/// Encodes metadata into a page buffer and stamps its CRC.
pub fn write_meta_page(buf: &mut [u8], meta: &Meta) -> Result<()> {
    let page_size = meta.page_size as usize;
    if buf.len() < page_size || page_size < META_LEN {
        return Err(IptError::Invalid("meta buffer too small"));
    }
    buf[..page_size].fill(0);
    PageHeader::new(PageId(0), PageKind::Meta, meta.page_size, meta.salt)?
        .encode(&mut buf[..PAGE_HDR_LEN])?;
    buf[META_SALT].copy_from_slice(&meta.salt.to_be_bytes());
    buf[META_PAGE_SIZE].copy_from_slice(&meta.page_size.to_be_bytes());
    buf[META_FORMAT_VERSION].copy_from_slice(&meta.format_version.to_be_bytes());
    buf[META_RESERVED].fill(0);
    buf[META_WAL_SALT].copy_from_slice(&meta.wal_salt.to_be_bytes());
    buf[META_TREE_ORDER].copy_from_slice(&meta.tree_order.to_be_bytes());
    buf[META_RESERVED_2].fill(0);
    buf[META_TREE_ROOT].copy_from_slice(&meta.tree_root.0.to_be_bytes());
    page::stamp_crc32(&mut buf[..page_size], PageId(0), meta.salt)
}

/// Decodes metadata from a page image and verifies its integrity.
pub fn read_meta_page(buf: &[u8]) -> Result<Meta> {
    let header = PageHeader::decode(buf)?;
    if header.kind != PageKind::Meta {
        return Err(IptError::Corruption("meta page has wrong kind"));
    }
    let len = header.page_size as usize;
    if buf.len() < len || len < META_LEN {
        return Err(IptError::Corruption("meta page truncated"));
    }
    page::verify_crc32(&buf[..len], PageId(0), header.salt)
        .map_err(|_| IptError::Corruption("meta page crc mismatch"))?;
    let salt = u64::from_be_bytes(field(buf, META_SALT)?);
    if salt != header.salt {
        return Err(IptError::Corruption("meta salt disagrees with header"));
    }
    let page_size = u32::from_be_bytes(field(buf, META_PAGE_SIZE)?);
    if page_size != header.page_size {
        return Err(IptError::Corruption("meta page size disagrees with header"));
    }
    if buf[META_RESERVED].iter().any(|b| *b != 0) || buf[META_RESERVED_2].iter().any(|b| *b != 0)
    {
        return Err(IptError::Corruption("meta reserved field non-zero"));
    }
    Ok(Meta {
        page_size,
        salt,
        format_version: u16::from_be_bytes(field(buf, META_FORMAT_VERSION)?),
        wal_salt: u64::from_be_bytes(field(buf, META_WAL_SALT)?),
        tree_order: u32::from_be_bytes(field(buf, META_TREE_ORDER)?),
        tree_root: PageId(u64::from_be_bytes(field(buf, META_TREE_ROOT)?)),
    })
}

fn field<const N: usize>(buf: &[u8], range: Range<usize>) -> Result<[u8; N]> {
    buf[range]
        .try_into()
        .map_err(|_| IptError::Corruption("meta field truncated"))
}

impl fmt::Display for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Meta(page_size={}, format_version={}, tree_order={}, tree_root={})",
            self.page_size, self.format_version, self.tree_order, self.tree_root.0,
        )
    }
}
