#![allow(missing_docs)]

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use iptree::primitives::pager::{wal_path, PagerOptions, Synchronous};
use iptree::{IndexOptions, IptIndex, ItemPointer, Result, TreeOptions};
use tempfile::tempdir;

fn options(order: usize) -> IndexOptions {
    IndexOptions {
        pager: PagerOptions {
            page_size: 512,
            synchronous: Synchronous::Normal,
            autocheckpoint_pages: 0,
            ..PagerOptions::default()
        },
        tree: TreeOptions { order: Some(order) },
    }
}

fn key(block: u32) -> ItemPointer {
    ItemPointer::new(block, 3)
}

fn value(block: u32) -> ItemPointer {
    ItemPointer::new(block * 10, 1)
}

fn wal_len(db: &Path) -> u64 {
    std::fs::metadata(wal_path(db)).expect("wal metadata").len()
}

#[test]
fn committed_inserts_survive_drop_without_checkpoint() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("crash.ipt");
    let root_before_crash = {
        let index = IptIndex::create(&path, options(5))?;
        for block in 0..200 {
            index.insert(key(block), value(block))?;
        }
        index.root()
    };
    assert!(wal_len(&path) > 0, "nothing was checkpointed");

    let index = IptIndex::open(&path, options(5))?;
    assert!(index.pager().stats().replayed_frames > 0);
    assert_eq!(index.root(), root_before_crash);
    for block in 0..200 {
        assert_eq!(index.search(key(block))?, Some(value(block)));
    }
    let report = index.verify()?;
    assert_eq!(report.keys, 200);
    Ok(())
}

#[test]
fn garbage_after_last_commit_is_ignored() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("garbage.ipt");
    {
        let index = IptIndex::create(&path, options(6))?;
        for block in 0..50 {
            index.insert(key(block), value(block))?;
        }
    }
    let mut wal = OpenOptions::new()
        .append(true)
        .open(wal_path(&path))
        .expect("open wal");
    wal.write_all(&[0xAB; 300]).expect("append garbage");
    drop(wal);

    let index = IptIndex::open(&path, options(6))?;
    for block in 0..50 {
        assert_eq!(index.search(key(block))?, Some(value(block)));
    }
    index.verify()?;
    Ok(())
}

#[test]
fn torn_final_frame_loses_only_the_last_insert() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("torn.ipt");
    {
        // Eight keys fit one order-16 leaf, so every insert logs a single frame.
        let index = IptIndex::create(&path, options(16))?;
        for block in 1..=8 {
            index.insert(key(block), value(block))?;
        }
        assert_eq!(index.tree().stats_snapshot().leaf_splits, 0);
    }
    let wal = OpenOptions::new()
        .write(true)
        .open(wal_path(&path))
        .expect("open wal");
    let len = wal.metadata().expect("wal metadata").len();
    wal.set_len(len - 1).expect("truncate wal");
    drop(wal);

    let index = IptIndex::open(&path, options(16))?;
    for block in 1..=7 {
        assert_eq!(index.search(key(block))?, Some(value(block)));
    }
    assert_eq!(index.search(key(8))?, None);
    assert_eq!(index.verify()?.keys, 7);
    Ok(())
}

#[test]
fn checkpoint_empties_the_log() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("ckpt.ipt");
    {
        let index = IptIndex::create(&path, options(4))?;
        for block in 0..64 {
            index.insert(key(block), value(block))?;
        }
        index.checkpoint()?;
        assert_eq!(index.pager().stats().checkpoints, 1);
    }
    let index = IptIndex::open(&path, options(4))?;
    assert_eq!(index.pager().stats().replayed_frames, 0);
    for block in 0..64 {
        assert_eq!(index.search(key(block))?, Some(value(block)));
    }
    Ok(())
}

#[test]
fn inserts_after_replay_continue_the_log() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("resume.ipt");
    {
        let index = IptIndex::create(&path, options(4))?;
        for block in 0..30 {
            index.insert(key(block), value(block))?;
        }
    }
    {
        let index = IptIndex::open(&path, options(4))?;
        for block in 30..60 {
            index.insert(key(block), value(block))?;
        }
    }
    let index = IptIndex::open(&path, options(4))?;
    for block in 0..60 {
        assert_eq!(index.search(key(block))?, Some(value(block)));
    }
    assert_eq!(index.verify()?.keys, 60);
    Ok(())
}
