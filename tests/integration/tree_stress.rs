#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use iptree::primitives::pager::{Pager, PagerOptions, Synchronous};
use iptree::{ItemPointer, ItemPointerTree, PageId, Result, TreeOptions};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::{tempdir, TempDir};

fn open(order: usize, cache_pages: usize) -> Result<(TempDir, ItemPointerTree)> {
    let dir = tempdir().expect("tmpdir");
    let options = PagerOptions {
        page_size: 512,
        cache_pages,
        synchronous: Synchronous::Off,
        autocheckpoint_pages: 64,
        ..PagerOptions::default()
    };
    let pager = Arc::new(Pager::create(dir.path().join("stress.ipt"), options)?);
    let tree = ItemPointerTree::new(pager, &TreeOptions { order: Some(order) })?;
    Ok((dir, tree))
}

fn load(tree: &ItemPointerTree, pairs: &[(ItemPointer, ItemPointer)]) -> Result<PageId> {
    let mut root = tree.create_root()?;
    for (key, value) in pairs {
        root = tree.insert(root, *key, *value)?;
    }
    Ok(root)
}

fn check_all(
    tree: &ItemPointerTree,
    root: PageId,
    expected: &BTreeMap<ItemPointer, ItemPointer>,
) -> Result<()> {
    for (key, value) in expected {
        assert_eq!(tree.search(root, *key)?, Some(*value), "key {key}");
    }
    let report = tree.verify(root)?;
    assert_eq!(report.keys, expected.len() as u64);
    assert_eq!(report.duplicate_keys, 0);
    Ok(())
}

#[test]
fn descending_inserts_split_on_the_left_edge() -> Result<()> {
    let (_dir, tree) = open(4, 32)?;
    let pairs: Vec<_> = (0..1_500u32)
        .rev()
        .map(|b| (ItemPointer::new(b, 1), ItemPointer::new(b, 2)))
        .collect();
    let root = load(&tree, &pairs)?;
    check_all(&tree, root, &pairs.iter().copied().collect())?;
    assert!(tree.stats_snapshot().internal_splits > 0);
    Ok(())
}

#[test]
fn shuffled_inserts_across_orders() -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed_0001);
    for order in [4usize, 5, 7, 16, 37] {
        let (_dir, tree) = open(order, 24)?;
        let mut pairs: Vec<_> = (0..2_000u32)
            .map(|b| {
                let key = ItemPointer::new(b / 8, (b % 8) as u16 + 1);
                (key, ItemPointer::new(rng.gen(), rng.gen_range(1..=u16::MAX)))
            })
            .collect();
        pairs.shuffle(&mut rng);
        let root = load(&tree, &pairs)?;
        check_all(&tree, root, &pairs.iter().copied().collect())?;
        let absent = ItemPointer::new(10_000, 1);
        assert_eq!(tree.search(root, absent)?, None);
    }
    Ok(())
}

#[test]
fn tiny_cache_forces_eviction_without_losing_pages() -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let (_dir, tree) = open(6, 2)?;
    let mut expected = BTreeMap::new();
    while expected.len() < 3_000 {
        let key = ItemPointer::new(rng.gen_range(0..1_000_000), rng.gen_range(1..4));
        expected
            .entry(key)
            .or_insert_with(|| ItemPointer::new(rng.gen(), 1));
    }
    let mut pairs: Vec<_> = expected.iter().map(|(k, v)| (*k, *v)).collect();
    pairs.shuffle(&mut rng);
    let root = load(&tree, &pairs)?;
    check_all(&tree, root, &expected)?;
    let pager_stats = tree.pager().stats();
    assert!(pager_stats.evictions > 0);
    assert!(pager_stats.checkpoints > 0);
    Ok(())
}

#[test]
fn repeated_keys_keep_every_copy() -> Result<()> {
    let (_dir, tree) = open(5, 32)?;
    let mut root = tree.create_root()?;
    for round in 0..6u32 {
        for block in 0..40u32 {
            root = tree.insert(
                root,
                ItemPointer::new(block, 1),
                ItemPointer::new(round, 1),
            )?;
        }
    }
    let report = tree.verify(root)?;
    assert_eq!(report.keys, 240);
    assert_eq!(report.duplicate_keys, 200);
    for block in 0..40u32 {
        assert_eq!(
            tree.search(root, ItemPointer::new(block, 1))?,
            Some(ItemPointer::new(5, 1)),
            "block {block} should return the last round"
        );
    }
    Ok(())
}
