//! Property tests for the B+Tree index.
//!
//! Random insert/delete sequences are applied to a B+Tree and to the hash
//! index side by side. After every step the tree must be structurally valid
//! and both indexes must agree on every key.

use gossipkv::storage::{
    hash_key, BPlusTree, HashIndex, Insertion, Record, StorageIndex, TreeConfig,
};
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
enum Op {
    Insert(u16),
    Delete(u16),
}

fn op(key_range: u16) -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..key_range).prop_map(Op::Insert),
        2 => (0..key_range).prop_map(Op::Delete),
    ]
}

fn tree_config() -> impl Strategy<Value = TreeConfig> {
    prop_oneof![
        Just(TreeConfig { max_len: 2, least_len: 1 }),
        Just(TreeConfig { max_len: 3, least_len: 2 }),
        Just(TreeConfig { max_len: 4, least_len: 2 }),
        Just(TreeConfig { max_len: 5, least_len: 3 }),
        Just(TreeConfig { max_len: 8, least_len: 3 }),
    ]
}

fn key_name(k: u16) -> String {
    format!("key-{}", k)
}

/// Applies `ops` to a tree and to the oracle, checking after each step.
fn run(config: TreeConfig, space: u32, ops: &[Op]) -> Result<(), TestCaseError> {
    let mut tree = BPlusTree::with_config(config);
    let mut oracle = HashIndex::new();

    for (step, op) in ops.iter().enumerate() {
        match *op {
            Op::Insert(k) => {
                let key = key_name(k);
                let hashed = hash_key(&key, space);
                let a = tree.insert(hashed, Record::new(key.clone(), json!(step), step as i64));
                let b = oracle.insert(hashed, Record::new(key, json!(step), step as i64));
                prop_assert_eq!(a, b);
            }
            Op::Delete(k) => {
                let key = key_name(k);
                let hashed = hash_key(&key, space);
                prop_assert_eq!(tree.delete(hashed, &key), oracle.delete(hashed, &key));
            }
        }

        if let Err(violation) = tree.check_invariants() {
            return Err(TestCaseError::fail(format!("step {}: {}", step, violation)));
        }
        prop_assert_eq!(tree.len(), oracle.len());
    }

    let keys = tree.keys_in_order();
    prop_assert!(keys.windows(2).all(|w| w[0] < w[1]), "leaf chain out of order");

    let mut expected_hashes = BTreeSet::new();
    for k in ops.iter().map(|op| match op {
        Op::Insert(k) | Op::Delete(k) => *k,
    }) {
        let key = key_name(k);
        let hashed = hash_key(&key, space);
        let a = tree.search(hashed, &key).map(|hit| hit.record.value());
        let b = oracle.search(hashed, &key).map(|hit| hit.record.value());
        prop_assert_eq!(&a, &b);
        if a.is_some() {
            expected_hashes.insert(hashed);
        }
    }
    prop_assert_eq!(keys, expected_hashes.into_iter().collect::<Vec<_>>());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_tree_matches_hash_index(
        config in tree_config(),
        ops in prop::collection::vec(op(300), 1..400),
    ) {
        run(config, 0, &ops)?;
    }

    #[test]
    fn prop_tree_matches_hash_index_with_collisions(
        config in tree_config(),
        ops in prop::collection::vec(op(200), 1..400),
    ) {
        // A hash space of 16 forces most keys to share buckets.
        run(config, 16, &ops)?;
    }

    #[test]
    fn prop_insert_all_then_delete_all(
        config in tree_config(),
        keys in prop::collection::btree_set(0u16..1000, 1..200),
    ) {
        let mut tree = BPlusTree::with_config(config);
        for &k in &keys {
            let key = key_name(k);
            prop_assert_eq!(
                tree.insert(hash_key(&key, 0), Record::new(key, json!(k), 1)),
                Insertion::Created
            );
        }
        prop_assert!(tree.check_invariants().is_ok());
        prop_assert_eq!(tree.len(), keys.len());

        for &k in keys.iter().rev() {
            let key = key_name(k);
            prop_assert!(tree.delete(hash_key(&key, 0), &key));
            prop_assert!(tree.check_invariants().is_ok());
        }
        prop_assert!(tree.is_empty());
        prop_assert_eq!(tree.height(), 0);
        prop_assert_eq!(tree.node_count(), 0);
    }
}

#[test]
fn test_height_stays_logarithmic() {
    let mut tree = BPlusTree::new();
    for i in 0u32..4096 {
        tree.insert(i, Record::new(format!("k{}", i), json!(i), 1));
    }
    tree.check_invariants().unwrap();
    // Every node holds at least two keys, so 4096 keys need at most
    // log2(4096) levels.
    assert!(tree.height() <= 12, "height {}", tree.height());
    assert!(tree.stats().splits > 0);
}
