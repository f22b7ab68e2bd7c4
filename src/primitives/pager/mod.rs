#![forbid(unsafe_code)]

mod frame;
mod meta;
mod pager;
mod txn;

pub use meta::{load_meta, read_meta_page, Meta};
pub use pager::{
    wal_path, PageMut, PageRef, Pager, PagerOptions, PagerStats, Synchronous, MAX_PAGE_SIZE,
};
pub use txn::WalTxn;
