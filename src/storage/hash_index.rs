//! Hash Index Backend
//!
//! The simple reference implementation of [`StorageIndex`]: a `HashMap`
//! from hashed key to collision bucket. It has no ordering and no
//! structure to rebalance, which makes it a good oracle for the B+Tree.

use std::collections::HashMap;
use std::sync::Arc;

use super::index::{Backend, Insertion, Lookup, StorageIndex};
use super::record::{find_in_bucket, Bucket, Record};
use crate::replication::GossipUpdate;

/// Unordered storage backend.
#[derive(Debug, Default)]
pub struct HashIndex {
    buckets: HashMap<u32, Bucket>,
    records: usize,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageIndex for HashIndex {
    fn search(&self, hashed: u32, original_key: &str) -> Option<Lookup> {
        let bucket = self.buckets.get(&hashed)?;
        let bucket_index = find_in_bucket(bucket, original_key)?;
        Some(Lookup {
            record: Arc::clone(&bucket[bucket_index]),
            bucket_index,
        })
    }

    fn insert(&mut self, hashed: u32, record: Record) -> Insertion {
        let bucket = self.buckets.entry(hashed).or_default();
        match find_in_bucket(bucket, record.original_key()) {
            Some(i) => {
                let (value, version) = record.into_write();
                bucket[i].overwrite(value, version);
                Insertion::Updated
            }
            None => {
                bucket.push(Arc::new(record));
                self.records += 1;
                Insertion::Created
            }
        }
    }

    fn delete(&mut self, hashed: u32, original_key: &str) -> bool {
        let Some(bucket) = self.buckets.get_mut(&hashed) else {
            return false;
        };
        let Some(i) = find_in_bucket(bucket, original_key) else {
            return false;
        };
        bucket.remove(i);
        if bucket.is_empty() {
            self.buckets.remove(&hashed);
        }
        self.records -= 1;
        true
    }

    fn len(&self) -> usize {
        self.records
    }

    fn gossip_update(&self) -> Vec<GossipUpdate> {
        self.buckets
            .values()
            .flatten()
            .filter_map(|record| record.take_dirty())
            .collect()
    }

    fn backend(&self) -> Backend {
        Backend::HashMap
    }
}
