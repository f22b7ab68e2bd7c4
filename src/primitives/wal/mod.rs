#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::primitives::io::{is_eof, FileIo};
use crate::types::{crc32, frame_link, IptError, Lsn, PageId, Result};

const WAL_MAGIC: [u8; 4] = *b"IPTW";
const WAL_FORMAT_VERSION: u16 = 1;
const FILE_HEADER_LEN: usize = 32;
const FRAME_HEADER_LEN: usize = 40;

/// Frame flag marking the last image of a transaction.
const FRAME_FLAG_COMMIT: u32 = 1;

/// Configuration options for opening a write-ahead log.
#[derive(Clone, Debug)]
pub struct WalOptions {
    /// Size of each page image in bytes.
    pub page_size: u32,
    /// Random salt tying the log to one database file.
    pub wal_salt: u64,
    /// First LSN a fresh log hands out.
    pub start_lsn: Lsn,
}

impl WalOptions {
    /// Creates a new WalOptions with the specified configuration.
    pub fn new(page_size: u32, wal_salt: u64, start_lsn: Lsn) -> Self {
        Self {
            page_size,
            wal_salt,
            start_lsn,
        }
    }
}

/// Statistics tracking WAL operations since the last reset.
#[derive(Clone, Debug, Default)]
pub struct WalStats {
    /// Page images appended.
    pub frames_appended: u64,
    /// Transactions appended.
    pub txns_appended: u64,
    /// Total bytes written to the log.
    pub bytes_appended: u64,
    /// Number of sync operations performed.
    pub syncs: u64,
}

#[derive(Clone, Debug)]
struct FileHeader {
    page_size: u32,
    wal_salt: u64,
    start_lsn: Lsn,
}

impl FileHeader {
    fn encode(&self) -> [u8; FILE_HEADER_LEN] {
        let mut buf = [0u8; FILE_HEADER_LEN];
        buf[0..4].copy_from_slice(&WAL_MAGIC);
        buf[4..6].copy_from_slice(&WAL_FORMAT_VERSION.to_be_bytes());
        buf[8..12].copy_from_slice(&self.page_size.to_be_bytes());
        buf[12..20].copy_from_slice(&self.wal_salt.to_be_bytes());
        buf[20..28].copy_from_slice(&self.start_lsn.0.to_be_bytes());
        let crc = crc32(&buf[..28]);
        buf[28..32].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < FILE_HEADER_LEN {
            return Err(IptError::Corruption("wal header truncated"));
        }
        if src[0..4] != WAL_MAGIC {
            return Err(IptError::Corruption("wal magic mismatch"));
        }
        if be_u16(&src[4..6]) != WAL_FORMAT_VERSION {
            return Err(IptError::Corruption("wal format version mismatch"));
        }
        if src[6..8] != [0, 0] {
            return Err(IptError::Corruption("wal reserved header bytes non-zero"));
        }
        if crc32(&src[..28]) != be_u32(&src[28..32]) {
            return Err(IptError::Corruption("wal header crc mismatch"));
        }
        Ok(Self {
            page_size: be_u32(&src[8..12]),
            wal_salt: be_u64(&src[12..20]),
            start_lsn: Lsn(be_u64(&src[20..28])),
        })
    }
}

#[derive(Clone, Debug)]
struct FrameHeader {
    lsn: Lsn,
    page_id: PageId,
    prev_chain: u64,
    payload_crc32: u32,
    flags: u32,
}

impl FrameHeader {
    fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut buf = [0u8; FRAME_HEADER_LEN];
        buf[0..8].copy_from_slice(&self.lsn.0.to_be_bytes());
        buf[8..16].copy_from_slice(&self.page_id.0.to_be_bytes());
        buf[16..24].copy_from_slice(&self.prev_chain.to_be_bytes());
        buf[24..28].copy_from_slice(&self.payload_crc32.to_be_bytes());
        buf[28..32].copy_from_slice(&self.flags.to_be_bytes());
        let crc = crc32(&buf[..32]);
        buf[32..36].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    /// Returns `None` for a header whose own CRC does not match (torn write).
    fn decode(src: &[u8]) -> Option<Self> {
        if src.len() < FRAME_HEADER_LEN || crc32(&src[..32]) != be_u32(&src[32..36]) {
            return None;
        }
        Some(Self {
            lsn: Lsn(be_u64(&src[0..8])),
            page_id: PageId(be_u64(&src[8..16])),
            prev_chain: be_u64(&src[16..24]),
            payload_crc32: be_u32(&src[24..28]),
            flags: be_u32(&src[28..32]),
        })
    }

    fn is_commit(&self) -> bool {
        self.flags & FRAME_FLAG_COMMIT != 0
    }
}

struct WalState {
    header: FileHeader,
    append_offset: u64,
    prev_chain: u64,
    stats: WalStats,
}

/// Append-only log of full page images.
///
/// Every transaction is a run of frames sharing one LSN; the last frame of the
/// run carries the commit flag. Frames are checksummed and chained so replay
/// stops at the first torn or foreign frame.
pub struct Wal {
    io: Arc<dyn FileIo>,
    page_size: usize,
    state: Mutex<WalState>,
}

impl Wal {
    /// Opens or creates a write-ahead log with the given options.
    ///
    /// An existing log must match the configured page size and salt.
    pub fn open(io: Arc<dyn FileIo>, options: WalOptions) -> Result<Self> {
        if options.page_size == 0 {
            return Err(IptError::Invalid("wal page size must be non-zero"));
        }
        let len = io.len()?;
        let header = if len < FILE_HEADER_LEN as u64 {
            let header = FileHeader {
                page_size: options.page_size,
                wal_salt: options.wal_salt,
                start_lsn: options.start_lsn,
            };
            io.write_at(0, &header.encode())?;
            io.truncate(FILE_HEADER_LEN as u64)?;
            header
        } else {
            let mut buf = [0u8; FILE_HEADER_LEN];
            io.read_at(0, &mut buf)?;
            let header = FileHeader::decode(&buf)?;
            if header.page_size != options.page_size {
                return Err(IptError::Corruption("wal page size mismatch"));
            }
            if header.wal_salt != options.wal_salt {
                return Err(IptError::Corruption("wal salt mismatch"));
            }
            header
        };
        let append_offset = io.len()?.max(FILE_HEADER_LEN as u64);
        Ok(Self {
            io,
            page_size: options.page_size as usize,
            state: Mutex::new(WalState {
                header,
                append_offset,
                prev_chain: 0,
                stats: WalStats::default(),
            }),
        })
    }

    /// First LSN recorded in the file header.
    pub fn start_lsn(&self) -> Lsn {
        self.state.lock().header.start_lsn
    }

    /// Truncates all frames and restarts the log at `start_lsn`.
    pub fn reset(&self, start_lsn: Lsn) -> Result<()> {
        let mut state = self.state.lock();
        state.header.start_lsn = start_lsn;
        state.prev_chain = 0;
        state.stats = WalStats::default();
        self.io.write_at(0, &state.header.encode())?;
        self.io.truncate(FILE_HEADER_LEN as u64)?;
        state.append_offset = FILE_HEADER_LEN as u64;
        debug!(start_lsn = start_lsn.0, "wal.reset");
        Ok(())
    }

    /// Appends one transaction: every frame gets `lsn`, the last one the commit flag.
    ///
    /// Does not sync; call [`Wal::sync`] for durability.
    pub fn append_txn(&self, lsn: Lsn, frames: &[WalFrame<'_>]) -> Result<()> {
        if frames.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock();
        if lsn < state.header.start_lsn {
            return Err(IptError::Invalid("wal frame lsn below start_lsn"));
        }
        let frame_size = FRAME_HEADER_LEN + self.page_size;
        let mut buf = Vec::with_capacity(frames.len() * frame_size);
        let mut chain = state.prev_chain;
        for (idx, frame) in frames.iter().enumerate() {
            if frame.payload.len() != self.page_size {
                return Err(IptError::Invalid("wal frame payload size mismatch"));
            }
            let header = FrameHeader {
                lsn,
                page_id: frame.page_id,
                prev_chain: chain,
                payload_crc32: crc32(frame.payload),
                flags: if idx + 1 == frames.len() {
                    FRAME_FLAG_COMMIT
                } else {
                    0
                },
            };
            let encoded = header.encode();
            chain = frame_link(chain, &encoded, frame.payload, frame_size);
            buf.extend_from_slice(&encoded);
            buf.extend_from_slice(frame.payload);
        }
        self.io.write_at(state.append_offset, &buf)?;
        state.append_offset += buf.len() as u64;
        state.prev_chain = chain;
        state.stats.frames_appended += frames.len() as u64;
        state.stats.txns_appended += 1;
        state.stats.bytes_appended += buf.len() as u64;
        Ok(())
    }

    /// Syncs all pending writes to persistent storage.
    pub fn sync(&self) -> Result<()> {
        self.io.sync_all()?;
        self.state.lock().stats.syncs += 1;
        Ok(())
    }

    /// Creates an iterator over the frames currently in the file.
    pub fn iter(&self) -> Result<WalIterator> {
        let len = self.io.len()?;
        if len < FILE_HEADER_LEN as u64 {
            return Err(IptError::Corruption("wal truncated header"));
        }
        let mut header_buf = [0u8; FILE_HEADER_LEN];
        self.io.read_at(0, &mut header_buf)?;
        let header = FileHeader::decode(&header_buf)?;
        Ok(WalIterator {
            io: Arc::clone(&self.io),
            page_size: self.page_size,
            offset: FILE_HEADER_LEN as u64,
            end: len,
            prev_chain: 0,
            start_lsn: header.start_lsn,
            valid_up_to: FILE_HEADER_LEN as u64,
        })
    }

    /// Returns current statistics for this WAL instance.
    pub fn stats(&self) -> WalStats {
        self.state.lock().stats.clone()
    }

    /// Returns the total size of the WAL file in bytes.
    pub fn len(&self) -> Result<u64> {
        self.io.len()
    }

    /// Returns true if the WAL contains no frames.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? <= FILE_HEADER_LEN as u64)
    }
}

/// Borrowed page image handed to [`Wal::append_txn`].
pub struct WalFrame<'a> {
    /// Page the image belongs to.
    pub page_id: PageId,
    /// Full page image.
    pub payload: &'a [u8],
}

/// Frame read back from the log.
pub struct WalFrameOwned {
    /// LSN of the transaction that wrote the frame.
    pub lsn: Lsn,
    /// Page the image belongs to.
    pub page_id: PageId,
    /// Full page image.
    pub payload: Vec<u8>,
}

impl fmt::Debug for WalFrameOwned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalFrameOwned")
            .field("lsn", &self.lsn)
            .field("page_id", &self.page_id)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Reader over the frames of a WAL file.
///
/// Stops at the end of the file, at the first torn frame, or at a chain break.
pub struct WalIterator {
    io: Arc<dyn FileIo>,
    page_size: usize,
    offset: u64,
    end: u64,
    prev_chain: u64,
    start_lsn: Lsn,
    valid_up_to: u64,
}

impl WalIterator {
    /// Reads the next intact frame together with its commit flag.
    pub fn next_frame(&mut self) -> Result<Option<(WalFrameOwned, bool)>> {
        let frame_size = FRAME_HEADER_LEN + self.page_size;
        if self.offset + frame_size as u64 > self.end {
            self.offset = self.end;
            return Ok(None);
        }
        let mut raw = vec![0u8; frame_size];
        if let Err(err) = self.io.read_at(self.offset, &mut raw) {
            if is_eof(&err) {
                self.offset = self.end;
                return Ok(None);
            }
            return Err(err);
        }
        let (header_bytes, payload) = raw.split_at(FRAME_HEADER_LEN);
        let Some(header) = FrameHeader::decode(header_bytes) else {
            self.offset = self.end;
            return Ok(None);
        };
        if header.prev_chain != self.prev_chain
            || header.payload_crc32 != crc32(payload)
        {
            self.offset = self.end;
            return Ok(None);
        }
        if header.lsn < self.start_lsn {
            return Err(IptError::Corruption("wal frame lsn below start_lsn"));
        }
        self.prev_chain = frame_link(self.prev_chain, header_bytes, payload, frame_size);
        self.offset += frame_size as u64;
        self.valid_up_to = self.offset;
        let commit = header.is_commit();
        Ok(Some((
            WalFrameOwned {
                lsn: header.lsn,
                page_id: header.page_id,
                payload: payload.to_vec(),
            },
            commit,
        )))
    }

    /// Reads the frames of the next fully committed transaction.
    ///
    /// A trailing run of frames without a commit frame is discarded.
    pub fn next_txn(&mut self) -> Result<Option<Vec<WalFrameOwned>>> {
        let mut pending = Vec::new();
        while let Some((frame, commit)) = self.next_frame()? {
            if let Some(first) = pending.first() {
                let first: &WalFrameOwned = first;
                if first.lsn != frame.lsn {
                    return Err(IptError::Corruption("wal transaction frames disagree on lsn"));
                }
            }
            pending.push(frame);
            if commit {
                return Ok(Some(pending));
            }
        }
        if !pending.is_empty() {
            warn!(frames = pending.len(), "wal.replay.discard_uncommitted_tail");
        }
        Ok(None)
    }

    /// Returns the file offset up to which frames have been validated.
    pub fn valid_up_to(&self) -> u64 {
        self.valid_up_to
    }
}

fn be_u16(src: &[u8]) -> u16 {
    u16::from_be_bytes([src[0], src[1]])
}

fn be_u32(src: &[u8]) -> u32 {
    u32::from_be_bytes([src[0], src[1], src[2], src[3]])
}

fn be_u64(src: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&src[..8]);
    u64::from_be_bytes(buf)
}
