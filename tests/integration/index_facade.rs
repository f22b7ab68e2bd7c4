#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use iptree::primitives::pager::{PagerOptions, Synchronous};
use iptree::storage::btree::NodeLayout;
use iptree::{IndexOptions, IptError, IptIndex, ItemPointer, Result, TreeOptions};
use tempfile::tempdir;

fn options(order: Option<usize>) -> IndexOptions {
    IndexOptions {
        pager: PagerOptions {
            page_size: 1024,
            cache_pages: 16,
            synchronous: Synchronous::Off,
            ..PagerOptions::default()
        },
        tree: TreeOptions { order },
    }
}

#[test]
fn default_order_fills_the_page() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let index = IptIndex::create(dir.path().join("wide.ipt"), options(None))?;
    let expected = NodeLayout::max_order(1024);
    assert_eq!(index.tree().layout().order(), expected);
    assert_eq!(index.meta()?.tree_order as usize, expected);
    Ok(())
}

#[test]
fn out_of_range_orders_are_rejected() {
    let dir = tempdir().expect("tmpdir");
    for (name, order) in [("low", 3), ("high", NodeLayout::max_order(1024) + 1)] {
        let result = IptIndex::create(dir.path().join(name), options(Some(order)));
        assert!(
            matches!(result, Err(IptError::InvalidOwned(_))),
            "order {order} should be rejected"
        );
    }
}

#[test]
fn create_refuses_existing_database() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("twice.ipt");
    drop(IptIndex::create(&path, options(Some(4)))?);
    assert!(IptIndex::create(&path, options(Some(4))).is_err());
    let reopened = IptIndex::open_or_create(&path, options(None))?;
    assert_eq!(reopened.tree().layout().order(), 4);
    Ok(())
}

#[test]
fn open_requires_an_existing_file() {
    let dir = tempdir().expect("tmpdir");
    assert!(IptIndex::open(dir.path().join("missing.ipt"), options(None)).is_err());
}

#[test]
fn delete_is_unsupported_for_present_and_absent_keys() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let index = IptIndex::create(dir.path().join("del.ipt"), options(Some(4)))?;
    let present = ItemPointer::new(7, 1);
    index.insert(present, ItemPointer::new(70, 1))?;
    for target in [present, ItemPointer::new(8, 1)] {
        assert!(matches!(index.delete(target), Err(IptError::Unsupported(_))));
    }
    assert_eq!(index.get(present)?, ItemPointer::new(70, 1));
    Ok(())
}

#[test]
fn stats_track_inserts_and_splits() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let index = IptIndex::create(dir.path().join("stats.ipt"), options(Some(4)))?;
    for block in 0..40 {
        index.insert(ItemPointer::new(block, 1), ItemPointer::new(block, 2))?;
    }
    index.search(ItemPointer::new(5, 1))?;
    let stats = index.stats();
    assert_eq!(stats.order, 4);
    assert_eq!(stats.page_size, 1024);
    assert_eq!(stats.btree.inserts, 40);
    assert!(stats.btree.leaf_splits > 0);
    assert!(stats.btree.root_splits > 0);
    assert!(stats.btree.leaf_searches >= 1);
    assert!(stats.pager.commits >= 40);
    assert_eq!(stats.root, index.root().0);

    let json = serde_json::to_value(&stats).expect("stats serialize");
    assert_eq!(json["btree"]["inserts"], 40);
    assert!(json["pager"]["allocations"].as_u64().unwrap_or(0) > 0);
    Ok(())
}

#[test]
fn readers_run_alongside_a_writer() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let index = IptIndex::create(dir.path().join("mixed.ipt"), options(Some(5)))?;
    for block in 0..100 {
        index.insert(ItemPointer::new(block, 1), ItemPointer::new(block, 9))?;
    }
    let done = AtomicBool::new(false);
    thread::scope(|scope| -> Result<()> {
        let readers: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| -> Result<u64> {
                    let mut rounds = 0;
                    while !done.load(Ordering::Acquire) || rounds == 0 {
                        // A lookup racing a split may miss a key that is moving.
                        for block in 0..600 {
                            if let Some(found) = index.search(ItemPointer::new(block, 1))? {
                                assert_eq!(found, ItemPointer::new(block, 9));
                            }
                        }
                        rounds += 1;
                    }
                    Ok(rounds)
                })
            })
            .collect();
        for block in 100..600 {
            index.insert(ItemPointer::new(block, 1), ItemPointer::new(block, 9))?;
        }
        done.store(true, Ordering::Release);
        for reader in readers {
            let rounds = reader.join().expect("reader panicked")?;
            assert!(rounds > 0);
        }
        Ok(())
    })?;
    for block in 0..600 {
        assert_eq!(index.search(ItemPointer::new(block, 1))?, Some(ItemPointer::new(block, 9)));
    }
    let report = index.verify()?;
    assert_eq!(report.keys, 600);
    Ok(())
}

#[test]
fn writers_are_serialised() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let index = IptIndex::create(dir.path().join("writers.ipt"), options(Some(6)))?;
    thread::scope(|scope| {
        for lane in 0..4u32 {
            let index = &index;
            scope.spawn(move || {
                for i in 0..150u32 {
                    let block = i * 4 + lane;
                    index
                        .insert(ItemPointer::new(block, 1), ItemPointer::new(lane, 1))
                        .expect("insert");
                }
            });
        }
    });
    for block in 0..600u32 {
        assert_eq!(
            index.search(ItemPointer::new(block, 1))?,
            Some(ItemPointer::new(block % 4, 1))
        );
    }
    assert_eq!(index.verify()?.keys, 600);
    Ok(())
}
