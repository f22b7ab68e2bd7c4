use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{
    lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard},
    Mutex, RawRwLock,
};
use smallvec::SmallVec;
use tracing::{debug, info, trace};

use super::frame::Frame;
use super::meta::{create_meta, load_meta, stored_page_size, read_meta_page, write_meta_page, Meta};
use super::txn::{TxnPage, WalTxn};
use crate::primitives::{
    io::{FileIo, StdFileIo},
    wal::{Wal, WalFrame, WalOptions},
};
use crate::types::{
    page::{self, MIN_PAGE_SIZE},
    IptError, Lsn, PageId, Result,
};

/// Largest page size the pager accepts; item pointer offsets are 16-bit.
pub const MAX_PAGE_SIZE: u32 = 1 << 16;

/// Configuration options for the pager.
///
/// These options control page size, caching behavior, durability guarantees,
/// and automatic checkpoint triggers.
#[derive(Clone, Debug)]
pub struct PagerOptions {
    /// Size of each page in bytes for newly created databases.
    pub page_size: u32,
    /// Number of pages to cache in memory.
    pub cache_pages: usize,
    /// Durability mode for write-ahead log synchronization.
    pub synchronous: Synchronous,
    /// Number of WAL frames before triggering an automatic checkpoint (0 disables).
    pub autocheckpoint_pages: usize,
    /// Verify page checksums when reading from the database file.
    pub checksum_verify_on_read: bool,
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self {
            page_size: page::DEFAULT_PAGE_SIZE,
            cache_pages: 128,
            synchronous: Synchronous::Full,
            autocheckpoint_pages: 1024,
            checksum_verify_on_read: true,
        }
    }
}

/// Durability mode for write-ahead log synchronization.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum Synchronous {
    /// Sync the WAL after every commit.
    #[default]
    Full,
    /// Sync only at checkpoints.
    Normal,
    /// No explicit syncs.
    Off,
}

impl Synchronous {
    /// Returns the string representation of the synchronous mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Synchronous::Full => "full",
            Synchronous::Normal => "normal",
            Synchronous::Off => "off",
        }
    }

    /// Parses a synchronous mode from a string (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "full" => Some(Synchronous::Full),
            "normal" => Some(Synchronous::Normal),
            "off" => Some(Synchronous::Off),
            _ => None,
        }
    }
}

/// Statistics tracking pager operations.
#[derive(Default, Clone, Debug)]
pub struct PagerStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of page evictions from cache.
    pub evictions: u64,
    /// Pages appended to the database file.
    pub allocations: u64,
    /// Committed WAL transactions.
    pub commits: u64,
    /// Aborted WAL transactions.
    pub aborts: u64,
    /// Page images written to the WAL.
    pub wal_frames: u64,
    /// Completed checkpoints.
    pub checkpoints: u64,
    /// Page images redone from the WAL while opening.
    pub replayed_frames: u64,
}

impl fmt::Display for PagerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} evictions={} allocations={} commits={} aborts={} wal_frames={} checkpoints={}",
            self.hits,
            self.misses,
            self.evictions,
            self.allocations,
            self.commits,
            self.aborts,
            self.wal_frames,
            self.checkpoints
        )
    }
}

/// A shared latch on a page.
pub struct PageRef {
    /// Page identifier.
    pub id: PageId,
    guard: ArcRwLockReadGuard<RawRwLock, Box<[u8]>>,
}

impl PageRef {
    /// Returns the page data as a byte slice.
    pub fn data(&self) -> &[u8] {
        &self.guard[..]
    }
}

/// An exclusive latch on a page.
///
/// Changes made through a `PageMut` only become durable once the page is
/// registered with a [`WalTxn`] that commits.
pub struct PageMut {
    /// Page identifier.
    pub id: PageId,
    guard: ArcRwLockWriteGuard<RawRwLock, Box<[u8]>>,
}

impl PageMut {
    /// Returns the page data as an immutable byte slice.
    pub fn data(&self) -> &[u8] {
        &self.guard[..]
    }

    /// Returns the page data as a mutable byte slice.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.guard[..]
    }
}

struct WalState {
    next_lsn: u64,
    last_checkpoint_lsn: Lsn,
    frames_since_checkpoint: usize,
    /// Committed images not yet written back to the database file.
    dirty: HashMap<PageId, Arc<[u8]>>,
}

/// Page store over a database file and its write-ahead log.
///
/// Lock order: `extension` before `cache`, `cache` before `wal_state`. Page
/// latches are never awaited while the cache or WAL mutex is held.
pub struct Pager {
    db_io: Arc<dyn FileIo>,
    wal: Wal,
    page_size: usize,
    salt: u64,
    options: PagerOptions,
    cache: Mutex<LruCache<PageId, Frame>>,
    extension: Mutex<()>,
    page_count: AtomicU64,
    wal_state: Mutex<WalState>,
    stats: Mutex<PagerStats>,
}

impl Pager {
    /// Creates a new database at `path`. Fails if a non-empty file already exists.
    pub fn create(path: impl AsRef<Path>, options: PagerOptions) -> Result<Self> {
        let path = path.as_ref();
        validate_page_size(options.page_size)?;
        let db = StdFileIo::open(path)?;
        if !db.is_empty()? {
            return Err(IptError::InvalidOwned(format!(
                "database {} already exists",
                path.display()
            )));
        }
        let meta = create_meta(&db, options.page_size, 0)?;
        let wal_io = StdFileIo::open(wal_path(path))?;
        wal_io.truncate(0)?;
        info!(path = %path.display(), page_size = meta.page_size, "pager.create");
        Self::open_internal(Arc::new(db), Arc::new(wal_io), &meta, options)
    }

    /// Opens an existing database, redoing committed WAL transactions first.
    ///
    /// The page size recorded in the file wins over `options.page_size`.
    pub fn open(path: impl AsRef<Path>, options: PagerOptions) -> Result<Self> {
        let path = path.as_ref();
        let db = StdFileIo::open_existing(path)?;
        let page_size = stored_page_size(&db)?;
        validate_page_size(page_size)?;
        if page_size != options.page_size {
            debug!(
                requested = options.page_size,
                stored = page_size,
                "pager.open.page_size_from_file"
            );
        }
        let meta = load_meta(&db, page_size)?;
        let wal_io = StdFileIo::open(wal_path(path))?;
        Self::open_internal(Arc::new(db), Arc::new(wal_io), &meta, options)
    }

    /// Opens `path` if it holds a database, otherwise creates one.
    pub fn open_or_create(path: impl AsRef<Path>, options: PagerOptions) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > 0 => Self::open(path, options),
            Ok(_) => Self::create(path, options),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::create(path, options),
            Err(err) => Err(IptError::Io(err)),
        }
    }

    fn open_internal(
        db_io: Arc<dyn FileIo>,
        wal_io: Arc<dyn FileIo>,
        meta: &Meta,
        mut options: PagerOptions,
    ) -> Result<Self> {
        options.page_size = meta.page_size;
        let page_size = meta.page_size as usize;
        let wal = Wal::open(
            wal_io,
            WalOptions::new(meta.page_size, meta.wal_salt, Lsn(1)),
        )?;
        let (next_lsn, replayed) = recover_database(&wal, db_io.as_ref(), meta)?;

        let len = db_io.len()?;
        let pages = len.div_ceil(page_size as u64);
        if pages * page_size as u64 != len {
            db_io.truncate(pages * page_size as u64)?;
        }
        let stats = PagerStats {
            replayed_frames: replayed,
            ..PagerStats::default()
        };
        Ok(Self {
            db_io,
            wal,
            page_size,
            salt: meta.salt,
            options,
            cache: Mutex::new(LruCache::unbounded()),
            extension: Mutex::new(()),
            page_count: AtomicU64::new(pages),
            wal_state: Mutex::new(WalState {
                next_lsn: next_lsn.0,
                last_checkpoint_lsn: Lsn(next_lsn.0.saturating_sub(1)),
                frames_since_checkpoint: 0,
                dirty: HashMap::new(),
            }),
            stats: Mutex::new(stats),
        })
    }

    /// Returns the page size in bytes.
    pub fn page_size(&self) -> u32 {
        self.page_size as u32
    }

    /// Returns the database salt mixed into page checksums.
    pub fn salt(&self) -> u64 {
        self.salt
    }

    /// Number of pages in the store; valid page ids are `0..page_count`.
    pub fn page_count(&self) -> u64 {
        self.page_count.load(AtomicOrdering::Acquire)
    }

    /// Effective options the pager runs with.
    pub fn options(&self) -> &PagerOptions {
        &self.options
    }

    /// Returns a snapshot of pager statistics.
    pub fn stats(&self) -> PagerStats {
        self.stats.lock().clone()
    }

    /// LSN of the last completed checkpoint (or recovery).
    pub fn last_checkpoint_lsn(&self) -> Lsn {
        self.wal_state.lock().last_checkpoint_lsn
    }

    /// Takes a shared latch on `id`.
    pub fn read_page(&self, id: PageId) -> Result<PageRef> {
        let buf = self.fetch_frame(id)?;
        trace!(page = id.0, "pager.latch.shared");
        Ok(PageRef {
            id,
            guard: buf.read_arc(),
        })
    }

    /// Takes an exclusive latch on `id`.
    pub(crate) fn write_page(&self, id: PageId) -> Result<PageMut> {
        let buf = self.fetch_frame(id)?;
        trace!(page = id.0, "pager.latch.exclusive");
        Ok(PageMut {
            id,
            guard: buf.write_arc(),
        })
    }

    /// Appends a zeroed page to the store and returns it exclusively latched.
    pub(crate) fn allocate_page(&self) -> Result<PageMut> {
        let _extension = self.extension.lock();
        let next = self.page_count();
        if next >= u64::from(u32::MAX) {
            return Err(IptError::Invalid("page store exhausted item pointer block range"));
        }
        self.db_io.truncate((next + 1) * self.page_size as u64)?;
        let id = PageId(next);
        let frame = Frame::zeroed(id, self.page_size);
        let buf = Arc::clone(&frame.buf);
        {
            let mut cache = self.cache.lock();
            self.make_room(&mut cache);
            cache.put(id, frame);
        }
        self.page_count.store(next + 1, AtomicOrdering::Release);
        self.stats.lock().allocations += 1;
        debug!(page = id.0, "pager.allocate");
        Ok(PageMut {
            id,
            guard: buf.write_arc(),
        })
    }

    /// Starts a WAL transaction for full-page-image logging.
    pub fn begin_txn(&self) -> WalTxn<'_> {
        WalTxn::new(self)
    }

    /// Reads the metadata stored in page 0.
    pub fn meta(&self) -> Result<Meta> {
        let page = self.read_page(PageId(0))?;
        read_meta_page(page.data())
    }

    /// Rewrites page 0 under its own WAL transaction and returns the new metadata.
    pub fn update_meta<F>(&self, f: F) -> Result<Meta>
    where
        F: FnOnce(&mut Meta),
    {
        let mut txn = self.begin_txn();
        let slot = txn.write(PageId(0))?;
        let mut meta = read_meta_page(txn.page(slot))?;
        f(&mut meta);
        write_meta_page(txn.page_mut(slot), &meta)?;
        txn.commit()?;
        Ok(meta)
    }

    /// Writes committed images back to the database file and truncates the WAL.
    pub fn checkpoint(&self) -> Result<Lsn> {
        let mut state = self.wal_state.lock();
        self.checkpoint_locked(&mut state)
    }

    pub(super) fn commit_pages(&self, pages: &[TxnPage]) -> Result<Lsn> {
        let mut state = self.wal_state.lock();
        let lsn = Lsn(state.next_lsn);
        if pages.is_empty() {
            return Ok(Lsn(lsn.0.saturating_sub(1)));
        }
        let frames: SmallVec<[WalFrame<'_>; 4]> = pages
            .iter()
            .map(|entry| WalFrame {
                page_id: entry.page.id,
                payload: entry.page.data(),
            })
            .collect();
        self.wal.append_txn(lsn, &frames)?;
        if self.options.synchronous == Synchronous::Full {
            self.wal.sync()?;
        }
        state.next_lsn += 1;
        for entry in pages {
            state
                .dirty
                .insert(entry.page.id, Arc::from(entry.page.data()));
        }
        state.frames_since_checkpoint += pages.len();
        {
            let mut stats = self.stats.lock();
            stats.commits += 1;
            stats.wal_frames += pages.len() as u64;
        }
        trace!(lsn = lsn.0, pages = pages.len(), "pager.commit");
        let threshold = self.options.autocheckpoint_pages;
        if threshold > 0 && state.frames_since_checkpoint >= threshold {
            self.checkpoint_locked(&mut state)?;
        }
        Ok(lsn)
    }

    pub(super) fn record_abort(&self) {
        self.stats.lock().aborts += 1;
    }

    fn checkpoint_locked(&self, state: &mut WalState) -> Result<Lsn> {
        let mut ids: Vec<PageId> = state.dirty.keys().copied().collect();
        ids.sort_unstable();
        for id in &ids {
            if let Some(image) = state.dirty.get(id) {
                let mut buf = image.to_vec();
                if !page::is_unformatted(&buf) {
                    page::stamp_crc32(&mut buf, *id, self.salt)?;
                }
                self.db_io.write_at(self.offset_of(*id), &buf)?;
            }
        }
        if self.options.synchronous != Synchronous::Off {
            self.db_io.sync_all()?;
        }
        self.wal.reset(Lsn(state.next_lsn))?;
        state.dirty.clear();
        state.frames_since_checkpoint = 0;
        state.last_checkpoint_lsn = Lsn(state.next_lsn.saturating_sub(1));
        self.stats.lock().checkpoints += 1;
        debug!(
            pages = ids.len(),
            lsn = state.last_checkpoint_lsn.0,
            "pager.checkpoint"
        );
        Ok(state.last_checkpoint_lsn)
    }

    fn fetch_frame(&self, id: PageId) -> Result<Arc<parking_lot::RwLock<Box<[u8]>>>> {
        let page_count = self.page_count();
        if id.0 >= page_count {
            return Err(IptError::InvalidPage {
                page: id,
                page_count,
            });
        }
        let mut cache = self.cache.lock();
        if let Some(frame) = cache.get(&id) {
            self.stats.lock().hits += 1;
            return Ok(Arc::clone(&frame.buf));
        }
        let data = self.load_page(id)?;
        self.make_room(&mut cache);
        let frame = Frame::new(id, data);
        let buf = Arc::clone(&frame.buf);
        cache.put(id, frame);
        self.stats.lock().misses += 1;
        Ok(buf)
    }

    fn load_page(&self, id: PageId) -> Result<Box<[u8]>> {
        let state = self.wal_state.lock();
        if let Some(image) = state.dirty.get(&id) {
            return Ok(image.to_vec().into_boxed_slice());
        }
        let mut buf = vec![0u8; self.page_size];
        self.db_io.read_at(self.offset_of(id), &mut buf)?;
        drop(state);
        if self.options.checksum_verify_on_read {
            page::verify_crc32(&buf, id, self.salt)?;
        }
        Ok(buf.into_boxed_slice())
    }

    /// Evicts least recently used unpinned frames until there is room for one more.
    fn make_room(&self, cache: &mut LruCache<PageId, Frame>) {
        let capacity = self.options.cache_pages.max(1);
        while cache.len() >= capacity {
            let victim = cache
                .iter()
                .rev()
                .find(|(_, frame)| !frame.is_pinned())
                .map(|(_, frame)| frame.id);
            match victim {
                Some(id) => {
                    cache.pop(&id);
                    self.stats.lock().evictions += 1;
                }
                // Every cached frame is latched; grow past capacity.
                None => break,
            }
        }
    }

    fn offset_of(&self, id: PageId) -> u64 {
        id.0 * self.page_size as u64
    }
}

impl fmt::Debug for Pager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pager")
            .field("page_size", &self.page_size)
            .field("page_count", &self.page_count())
            .finish()
    }
}

/// Path of the WAL file that belongs to the database at `path`.
pub fn wal_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("iptree"));
    name.push("-wal");
    let mut new_path = path.to_path_buf();
    new_path.set_file_name(name);
    new_path
}

fn validate_page_size(page_size: u32) -> Result<()> {
    if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) || !page_size.is_power_of_two() {
        return Err(IptError::InvalidOwned(format!(
            "page size {page_size} must be a power of two between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}"
        )));
    }
    Ok(())
}

/// Redoes every committed WAL transaction onto the database file.
///
/// Returns the next LSN to hand out and the number of images applied.
fn recover_database(wal: &Wal, db_io: &dyn FileIo, meta: &Meta) -> Result<(Lsn, u64)> {
    let page_size = meta.page_size as u64;
    let mut iter = wal.iter()?;
    let mut last_lsn: Option<Lsn> = None;
    let mut replayed = 0u64;
    while let Some(txn) = iter.next_txn()? {
        for frame in txn {
            let mut image = frame.payload;
            if !page::is_unformatted(&image) {
                page::stamp_crc32(&mut image, frame.page_id, meta.salt)?;
            }
            db_io.write_at(frame.page_id.0 * page_size, &image)?;
            last_lsn = Some(frame.lsn);
            replayed += 1;
        }
    }
    if replayed > 0 {
        db_io.sync_all()?;
        debug!(
            frames = replayed,
            last_lsn = last_lsn.map(|l| l.0).unwrap_or(0),
            "wal.replay"
        );
    }
    let next = last_lsn
        .map(|lsn| lsn.0 + 1)
        .unwrap_or(0)
        .max(wal.start_lsn().0)
        .max(1);
    wal.reset(Lsn(next))?;
    Ok((Lsn(next), replayed))
}
