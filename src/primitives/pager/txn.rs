use smallvec::SmallVec;
use tracing::trace;

use super::pager::{PageMut, Pager};
use crate::types::{Lsn, PageId, Result};

pub(super) struct TxnPage {
    pub(super) page: PageMut,
    before: Box<[u8]>,
}

/// Full-page-image WAL transaction.
///
/// Pages are registered while exclusively latched. On [`WalTxn::commit`] the
/// after-images of every registered page are appended to the WAL as one
/// transaction; [`WalTxn::abort`] (or dropping the transaction) restores the
/// before-images. Latches are released when the transaction ends.
pub struct WalTxn<'p> {
    pager: &'p Pager,
    pages: SmallVec<[TxnPage; 4]>,
    finished: bool,
}

impl<'p> WalTxn<'p> {
    pub(super) fn new(pager: &'p Pager) -> Self {
        Self {
            pager,
            pages: SmallVec::new(),
            finished: false,
        }
    }

    /// Registers an exclusively latched page and returns its slot.
    pub fn register(&mut self, page: PageMut) -> usize {
        let before = page.data().to_vec().into_boxed_slice();
        self.pages.push(TxnPage { page, before });
        self.pages.len() - 1
    }

    /// Latches `id` exclusively and registers it.
    pub fn write(&mut self, id: PageId) -> Result<usize> {
        let page = self.pager.write_page(id)?;
        Ok(self.register(page))
    }

    /// Extends the store by one zeroed page and registers it.
    pub fn allocate(&mut self) -> Result<(usize, PageId)> {
        let page = self.pager.allocate_page()?;
        let id = page.id;
        Ok((self.register(page), id))
    }

    /// Page id registered at `slot`.
    pub fn page_id(&self, slot: usize) -> PageId {
        self.pages[slot].page.id
    }

    /// Current image of the page at `slot`.
    pub fn page(&self, slot: usize) -> &[u8] {
        self.pages[slot].page.data()
    }

    /// Mutable image of the page at `slot`.
    pub fn page_mut(&mut self, slot: usize) -> &mut [u8] {
        self.pages[slot].page.data_mut()
    }

    /// Number of registered pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// True if no page has been registered.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Logs every registered page and releases the latches.
    ///
    /// On failure the before-images are restored.
    pub fn commit(mut self) -> Result<Lsn> {
        match self.pager.commit_pages(&self.pages) {
            Ok(lsn) => {
                self.finished = true;
                Ok(lsn)
            }
            Err(err) => {
                self.rollback();
                Err(err)
            }
        }
    }

    /// Restores the before-images and releases the latches.
    pub fn abort(mut self) {
        self.rollback();
    }

    fn rollback(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        for entry in self.pages.iter_mut().rev() {
            entry.page.data_mut().copy_from_slice(&entry.before);
        }
        trace!(pages = self.pages.len(), "pager.txn.abort");
        self.pager.record_abort();
    }
}

impl Drop for WalTxn<'_> {
    fn drop(&mut self) {
        self.rollback();
    }
}
