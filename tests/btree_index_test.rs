use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use rand::seq::SliceRandom;
use rand::SeedableRng;

mod common;
use common::create_test_buffer_pool;

use crabdb::common::types::Rid;
use crabdb::index::btree::{BPlusTree, BTreeError};

fn rid_for(key: i64) -> Rid {
    Rid::new((key >> 16) as u32, (key & 0xFFFF) as u32)
}

#[test]
fn test_empty_tree() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<i64> = BPlusTree::new("empty", buffer_pool, 4, 4)?;

    assert!(tree.is_empty());
    assert_eq!(tree.get_value(&1)?, None);
    assert_eq!(tree.iter()?.count(), 0);
    tree.remove(&1)?;

    Ok(())
}

#[test]
fn test_insert_and_lookup() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<i64> = BPlusTree::new("lookup", buffer_pool, 4, 4)?;

    for key in 1..=10 {
        assert!(tree.insert(key, rid_for(key))?);
    }

    for key in 1..=10 {
        assert_eq!(tree.get_value(&key)?, Some(rid_for(key)));
    }
    assert_eq!(tree.get_value(&0)?, None);
    assert_eq!(tree.get_value(&11)?, None);

    tree.verify_integrity()?;
    Ok(())
}

#[test]
fn test_duplicate_insert_returns_false() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<i64> = BPlusTree::new("dups", buffer_pool, 4, 4)?;

    assert!(tree.insert(7, rid_for(7))?);
    assert!(!tree.insert(7, rid_for(99))?);

    // The original mapping survives.
    assert_eq!(tree.get_value(&7)?, Some(rid_for(7)));
    Ok(())
}

#[test]
fn test_sequential_inserts_split_correctly() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<i64> = BPlusTree::new("splits", buffer_pool, 4, 4)?;

    for key in 1..=10 {
        tree.insert(key, rid_for(key))?;
        tree.verify_integrity()?;
    }

    // With fan-out 4 the tree must have grown beyond a single leaf.
    assert!(!tree.is_empty());
    let entries: Vec<(i64, Rid)> = tree.iter()?.collect::<Result<_, _>>()?;
    let keys: Vec<i64> = entries.iter().map(|(k, _)| *k).collect();
    assert_eq!(keys, (1..=10).collect::<Vec<_>>());

    Ok(())
}

#[test]
fn test_iter_from_mid_key() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<i64> = BPlusTree::new("range", buffer_pool, 4, 4)?;

    for key in (2..=20).step_by(2) {
        tree.insert(key, rid_for(key))?;
    }

    // Start key present.
    let keys: Vec<i64> = tree
        .iter_from(&8)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, (8..=20).step_by(2).collect::<Vec<_>>());

    // Start key absent: scan begins at the next larger key.
    let keys: Vec<i64> = tree
        .iter_from(&9)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, (10..=20).step_by(2).collect::<Vec<_>>());

    // Past the end.
    assert_eq!(tree.iter_from(&21)?.count(), 0);

    Ok(())
}

#[test]
fn test_remove_with_redistribute_and_coalesce() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(64)?;
    let tree: BPlusTree<i64> = BPlusTree::new("shrink", buffer_pool, 4, 4)?;

    for key in 1..=32 {
        tree.insert(key, rid_for(key))?;
    }

    // Delete from the low end, forcing merges that bubble upward.
    for key in 1..=32 {
        tree.remove(&key)?;
        tree.verify_integrity()?;
        assert_eq!(tree.get_value(&key)?, None);
        for later in (key + 1)..=32 {
            assert_eq!(tree.get_value(&later)?, Some(rid_for(later)), "key {}", later);
        }
    }

    assert!(tree.is_empty());
    Ok(())
}

#[test]
fn test_insert_remove_round_trip_restores_shape() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(64)?;
    let tree: BPlusTree<i64> = BPlusTree::new("round_trip", buffer_pool, 4, 4)?;

    for key in 1..=3 {
        tree.insert(key, rid_for(key))?;
    }
    let root_before = tree.root_page_id();

    tree.insert(4, rid_for(4))?;
    tree.remove(&4)?;

    assert_eq!(tree.get_value(&4)?, None);
    for key in 1..=3 {
        assert_eq!(tree.get_value(&key)?, Some(rid_for(key)));
    }
    // The split and merge cancelled out: a single root leaf again.
    assert_eq!(tree.root_page_id(), root_before);
    tree.verify_integrity()?;

    Ok(())
}

#[test]
fn test_randomised_workload() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(128)?;
    let tree: BPlusTree<i64> = BPlusTree::new("random", buffer_pool, 5, 5)?;
    let mut rng = rand::rngs::StdRng::seed_from_u64(0xB7EE);

    let mut keys: Vec<i64> = (1..=200).collect();
    keys.shuffle(&mut rng);

    let mut present = BTreeSet::new();
    for &key in &keys {
        assert!(tree.insert(key, rid_for(key))?);
        present.insert(key);
    }
    tree.verify_integrity()?;

    keys.shuffle(&mut rng);
    for &key in keys.iter().take(150) {
        tree.remove(&key)?;
        present.remove(&key);
    }
    tree.verify_integrity()?;

    let remaining: Vec<i64> = tree
        .iter()?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(remaining, present.iter().copied().collect::<Vec<_>>());

    for key in 1..=200 {
        let expected = present.contains(&key).then(|| rid_for(key));
        assert_eq!(tree.get_value(&key)?, expected);
    }

    Ok(())
}

#[test]
fn test_split_without_free_frames_is_out_of_memory() -> Result<()> {
    // A single frame: the latched leaf occupies it, so the split cannot get
    // a page.
    let (buffer_pool, _file) = create_test_buffer_pool(1)?;
    let tree: BPlusTree<i64> = BPlusTree::new("oom", buffer_pool, 4, 4)?;

    for key in 1..=3 {
        tree.insert(key, rid_for(key))?;
    }

    let result = tree.insert(4, rid_for(4));
    assert!(matches!(result, Err(BTreeError::OutOfMemory)));

    // The failed insert left the tree intact.
    for key in 1..=3 {
        assert_eq!(tree.get_value(&key)?, Some(rid_for(key)));
    }
    assert_eq!(tree.get_value(&4)?, None);
    tree.verify_integrity()?;

    Ok(())
}

#[test]
fn test_root_survives_reopen() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(64)?;
    {
        let tree: BPlusTree<i64> = BPlusTree::new("persistent", buffer_pool.clone(), 4, 4)?;
        for key in 1..=20 {
            tree.insert(key, rid_for(key))?;
        }
    }

    // A second handle over the same pool finds the root via the header page.
    let reopened: BPlusTree<i64> = BPlusTree::new("persistent", buffer_pool, 4, 4)?;
    assert!(!reopened.is_empty());
    for key in 1..=20 {
        assert_eq!(reopened.get_value(&key)?, Some(rid_for(key)));
    }

    Ok(())
}

#[test]
fn test_two_indexes_share_header_page() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(64)?;

    let first: BPlusTree<i64> = BPlusTree::new("first", buffer_pool.clone(), 4, 4)?;
    let second: BPlusTree<i64> = BPlusTree::new("second", buffer_pool, 4, 4)?;

    first.insert(1, rid_for(1))?;
    second.insert(100, rid_for(100))?;

    assert_eq!(first.get_value(&100)?, None);
    assert_eq!(second.get_value(&1)?, None);
    assert_eq!(first.get_value(&1)?, Some(rid_for(1)));
    assert_eq!(second.get_value(&100)?, Some(rid_for(100)));

    Ok(())
}

#[test]
fn test_concurrent_inserts() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(256)?;
    let tree: Arc<BPlusTree<i64>> = Arc::new(BPlusTree::new("concurrent", buffer_pool, 8, 8)?);

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let tree = tree.clone();
            thread::spawn(move || {
                // Interleaved key ranges so threads collide on the same leaves.
                for i in 0..100i64 {
                    let key = i * 4 + t;
                    tree.insert(key, rid_for(key)).unwrap();
                }
            })
        })
        .collect();
    for handle in threads {
        handle.join().unwrap();
    }

    tree.verify_integrity()?;
    for key in 0..400 {
        assert_eq!(tree.get_value(&key)?, Some(rid_for(key)), "key {}", key);
    }
    let count = tree.iter()?.count();
    assert_eq!(count, 400);

    Ok(())
}

#[test]
fn test_concurrent_reads_during_inserts() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(256)?;
    let tree: Arc<BPlusTree<i64>> = Arc::new(BPlusTree::new("mixed", buffer_pool, 8, 8)?);

    for key in 0..100 {
        tree.insert(key, rid_for(key))?;
    }

    let writer = {
        let tree = tree.clone();
        thread::spawn(move || {
            for key in 100..300i64 {
                tree.insert(key, rid_for(key)).unwrap();
            }
        })
    };
    let reader = {
        let tree = tree.clone();
        thread::spawn(move || {
            // Keys below 100 are stable; they must always be found.
            for round in 0..20 {
                for key in 0..100i64 {
                    let found = tree.get_value(&key).unwrap();
                    assert_eq!(found, Some(rid_for(key)), "round {} key {}", round, key);
                }
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();
    tree.verify_integrity()?;

    Ok(())
}
