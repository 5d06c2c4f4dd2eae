//! B+Tree Storage Backend
//!
//! An in-memory B+Tree keyed on the hashed key. Leaves hold collision
//! buckets; internal nodes only route.
//!
//! ## Layout
//!
//! ```text
//!                  ┌───────────────┐
//!                  │   [ 17 | 42 ] │         internal: key[i] = max of child i
//!                  └───┬───────┬───┘
//!                      │       │
//!          ┌───────────┘       └───────────┐
//!          ▼                               ▼
//!   ┌─────────────┐   next          ┌─────────────┐
//!   │ [3 | 9 | 17]│ ──────────────> │ [25 | 42]   │   leaves: key[i] → bucket i
//!   └─────────────┘                 └─────────────┘
//! ```
//!
//! Nodes live in an arena (`Vec<Option<Node>>`) and refer to each other by
//! [`NodeId`]. Children are owned through their slot in the parent's
//! `children` list; `parent` and `next` are plain handles used for upward
//! walks and leaf scans, so there are no reference cycles.
//!
//! ## Invariants
//!
//! - keys strictly ascending inside every node
//! - internal `keys[i]` equals the largest key under `children[i]`
//! - non-root nodes hold `least_len..=max_len` keys
//! - all leaves sit at the same depth and are chained left to right

use std::iter::successors;
use std::sync::Arc;

use super::index::{Backend, Insertion, InvariantViolation, Lookup, StorageIndex};
use super::record::{find_in_bucket, Bucket, Record};
use crate::replication::GossipUpdate;

/// Handle of a node inside the arena.
pub type NodeId = usize;

/// Default fan-out of the tree.
pub const DEFAULT_ORDER: usize = 4;

/// Node size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    /// A node splits once it holds more keys than this.
    pub max_len: usize,
    /// A non-root node rebalances once it holds fewer keys than this.
    pub least_len: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_ORDER,
            least_len: DEFAULT_ORDER / 2,
        }
    }
}

/// Structural change counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    pub splits: u64,
    pub merges: u64,
    pub borrows: u64,
    pub root_collapses: u64,
}

#[derive(Debug)]
struct Node {
    keys: Vec<u32>,
    /// Internal nodes only, parallel to `keys`.
    children: Vec<NodeId>,
    /// Leaves only, parallel to `keys`.
    buckets: Vec<Bucket>,
    is_leaf: bool,
    /// Next leaf in key order.
    next: Option<NodeId>,
    parent: Option<NodeId>,
}

impl Node {
    fn leaf(parent: Option<NodeId>) -> Self {
        Self {
            keys: Vec::new(),
            children: Vec::new(),
            buckets: Vec::new(),
            is_leaf: true,
            next: None,
            parent,
        }
    }

    fn internal(parent: Option<NodeId>) -> Self {
        Self {
            is_leaf: false,
            ..Self::leaf(parent)
        }
    }

    fn max_key(&self) -> Option<u32> {
        self.keys.last().copied()
    }
}

/// Index of the first key `>= key`, or `keys.len()` if there is none.
#[inline]
fn find_index(keys: &[u32], key: u32) -> usize {
    keys.partition_point(|&k| k < key)
}

/// Ordered storage backend.
#[derive(Debug)]
pub struct BPlusTree {
    nodes: Vec<Option<Node>>,
    free: Vec<NodeId>,
    root: Option<NodeId>,
    first_leaf: Option<NodeId>,
    config: TreeConfig,
    stats: TreeStats,
}

impl Default for BPlusTree {
    fn default() -> Self {
        Self::new()
    }
}

impl BPlusTree {
    /// Creates an empty tree with order 4 (max 4 keys, min 2).
    pub fn new() -> Self {
        Self::with_config(TreeConfig::default())
    }

    /// Creates an empty tree with custom node limits.
    ///
    /// # Panics
    ///
    /// Panics if the limits cannot keep both halves of a split, and a
    /// merge of two minimal nodes, within bounds.
    pub fn with_config(config: TreeConfig) -> Self {
        assert!(config.least_len >= 1, "least_len must be at least 1");
        assert!(config.max_len >= 2, "max_len must be at least 2");
        assert!(
            config.max_len + 1 >= 2 * config.least_len,
            "max_len must be at least 2 * least_len - 1"
        );
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            first_leaf: None,
            config,
            stats: TreeStats::default(),
        }
    }

    pub fn config(&self) -> TreeConfig {
        self.config
    }

    pub fn stats(&self) -> TreeStats {
        self.stats
    }

    /// Number of levels, 0 for an empty tree.
    pub fn height(&self) -> usize {
        let mut height = 0;
        let mut current = self.root;
        while let Some(id) = current {
            height += 1;
            let node = self.node(id);
            current = if node.is_leaf {
                None
            } else {
                node.children.first().copied()
            };
        }
        height
    }

    /// Number of live nodes in the arena.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// All hashed keys, read along the leaf chain.
    pub fn keys_in_order(&self) -> Vec<u32> {
        self.leaves()
            .flat_map(|leaf| leaf.keys.iter().copied())
            .collect()
    }

    // ------------------------------------------------------------------
    // Arena
    // ------------------------------------------------------------------

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, id: NodeId) -> Node {
        match self.nodes[id].take() {
            Some(node) => {
                self.free.push(id);
                node
            }
            None => unreachable!("released node {id} twice"),
        }
    }

    fn node(&self, id: NodeId) -> &Node {
        match &self.nodes[id] {
            Some(node) => node,
            None => unreachable!("dangling node handle {id}"),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        match &mut self.nodes[id] {
            Some(node) => node,
            None => unreachable!("dangling node handle {id}"),
        }
    }

    fn leaves(&self) -> impl Iterator<Item = &Node> + '_ {
        successors(self.first_leaf.map(|id| self.node(id)), move |leaf| {
            leaf.next.map(|id| self.node(id))
        })
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    fn find_leaf(&self, root: NodeId, key: u32) -> NodeId {
        let mut current = root;
        loop {
            let node = self.node(current);
            if node.is_leaf {
                return current;
            }
            let index = find_index(&node.keys, key).min(node.children.len() - 1);
            current = node.children[index];
        }
    }

    fn child_position(&self, parent: NodeId, child: NodeId) -> usize {
        match self.node(parent).children.iter().position(|&c| c == child) {
            Some(pos) => pos,
            None => unreachable!("node {child} missing from parent {parent}"),
        }
    }

    /// Rewrites the separator keys above `id` after its maximum changed.
    ///
    /// Walks up while the updated slot is the last one of its node, since
    /// only then does the ancestor's own maximum change too.
    fn propagate_max(&mut self, mut id: NodeId) {
        while let Some(parent) = self.node(id).parent {
            let Some(max) = self.node(id).max_key() else {
                return;
            };
            let pos = self.child_position(parent, id);
            let parent_node = self.node_mut(parent);
            parent_node.keys[pos] = max;
            if pos + 1 != parent_node.keys.len() {
                return;
            }
            id = parent;
        }
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    fn split(&mut self, id: NodeId) {
        self.stats.splits += 1;

        let node = self.node_mut(id);
        let at = (node.keys.len() + 1) / 2;
        let mut sibling = if node.is_leaf {
            Node::leaf(node.parent)
        } else {
            Node::internal(node.parent)
        };
        sibling.keys = node.keys.split_off(at);
        if node.is_leaf {
            sibling.buckets = node.buckets.split_off(at);
            sibling.next = node.next;
        } else {
            sibling.children = node.children.split_off(at);
        }

        let moved = sibling.children.clone();
        let is_leaf = sibling.is_leaf;
        let right = self.alloc(sibling);
        if is_leaf {
            self.node_mut(id).next = Some(right);
        }
        for child in moved {
            self.node_mut(child).parent = Some(right);
        }

        self.insert_to_parent(id, right);
    }

    fn insert_to_parent(&mut self, left: NodeId, right: NodeId) {
        let (Some(left_max), Some(right_max)) =
            (self.node(left).max_key(), self.node(right).max_key())
        else {
            unreachable!("split produced an empty node");
        };

        let Some(parent) = self.node(left).parent else {
            let mut root = Node::internal(None);
            root.keys = vec![left_max, right_max];
            root.children = vec![left, right];
            let root = self.alloc(root);
            self.node_mut(left).parent = Some(root);
            self.node_mut(right).parent = Some(root);
            self.root = Some(root);
            return;
        };

        // The slot of `left` currently holds its pre-split maximum, which
        // is now the maximum of `right`.
        let max_len = self.config.max_len;
        let pos = self.child_position(parent, left);
        let parent_node = self.node_mut(parent);
        parent_node.keys.insert(pos, left_max);
        parent_node.children.insert(pos + 1, right);
        let overflow = parent_node.keys.len() > max_len;
        self.node_mut(right).parent = Some(parent);

        if overflow {
            self.split(parent);
        }
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    fn rebalance(&mut self, id: NodeId) {
        let Some(parent) = self.node(id).parent else {
            self.collapse_root();
            return;
        };

        let least = self.config.least_len;
        let pos = self.child_position(parent, id);
        let siblings = &self.node(parent).children;
        let left = pos.checked_sub(1).map(|i| siblings[i]);
        let right = siblings.get(pos + 1).copied();

        if let Some(left) = left {
            if self.node(left).keys.len() > least {
                self.borrow_from_left(id, left);
                return;
            }
        }
        if let Some(right) = right {
            if self.node(right).keys.len() > least {
                self.borrow_from_right(id, right);
                return;
            }
        }

        match (left, right) {
            (Some(left), _) => self.merge(left, id),
            (None, Some(right)) => self.merge(id, right),
            (None, None) => {}
        }

        if self.node(parent).parent.is_none() {
            self.collapse_root();
        } else if self.node(parent).keys.len() < least {
            self.rebalance(parent);
        }
    }

    fn borrow_from_left(&mut self, id: NodeId, left: NodeId) {
        self.stats.borrows += 1;

        let lender = self.node_mut(left);
        let Some(key) = lender.keys.pop() else {
            unreachable!("borrowing from an empty node");
        };
        let bucket = lender.buckets.pop();
        let child = lender.children.pop();

        let node = self.node_mut(id);
        node.keys.insert(0, key);
        if let Some(bucket) = bucket {
            node.buckets.insert(0, bucket);
        }
        if let Some(child) = child {
            node.children.insert(0, child);
            self.node_mut(child).parent = Some(id);
        }

        self.propagate_max(left);
        self.propagate_max(id);
    }

    fn borrow_from_right(&mut self, id: NodeId, right: NodeId) {
        self.stats.borrows += 1;

        let lender = self.node_mut(right);
        let key = lender.keys.remove(0);
        let bucket = (!lender.buckets.is_empty()).then(|| lender.buckets.remove(0));
        let child = (!lender.children.is_empty()).then(|| lender.children.remove(0));

        let node = self.node_mut(id);
        node.keys.push(key);
        if let Some(bucket) = bucket {
            node.buckets.push(bucket);
        }
        if let Some(child) = child {
            node.children.push(child);
            self.node_mut(child).parent = Some(id);
        }

        self.propagate_max(id);
    }

    /// Folds `right` into `left` (adjacent siblings) and drops `right`'s
    /// slot from their parent.
    fn merge(&mut self, left: NodeId, right: NodeId) {
        self.stats.merges += 1;

        let parent = self.node(right).parent;
        let slot = parent.map(|p| self.child_position(p, right));
        let mut absorbed = self.release(right);

        for &child in &absorbed.children {
            self.node_mut(child).parent = Some(left);
        }
        let node = self.node_mut(left);
        node.keys.append(&mut absorbed.keys);
        node.buckets.append(&mut absorbed.buckets);
        node.children.append(&mut absorbed.children);
        if node.is_leaf {
            node.next = absorbed.next;
        }

        if let (Some(parent), Some(slot)) = (parent, slot) {
            let parent_node = self.node_mut(parent);
            parent_node.keys.remove(slot);
            parent_node.children.remove(slot);
        }
        self.propagate_max(left);
    }

    /// Replaces a single-child internal root by its child, and drops an
    /// empty leaf root.
    fn collapse_root(&mut self) {
        while let Some(root) = self.root {
            let node = self.node(root);
            if node.is_leaf {
                if node.keys.is_empty() {
                    self.release(root);
                    self.root = None;
                    self.first_leaf = None;
                }
                return;
            }
            if node.children.len() != 1 {
                return;
            }
            let child = node.children[0];
            self.release(root);
            self.node_mut(child).parent = None;
            self.root = Some(child);
            self.stats.root_collapses += 1;
        }
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    fn check_node(
        &self,
        id: NodeId,
        depth: usize,
        leaves: &mut Vec<NodeId>,
        leaf_depth: &mut Option<usize>,
    ) -> Result<u32, InvariantViolation> {
        let node = self.node(id);
        let len = node.keys.len();

        if !node.keys.windows(2).all(|w| w[0] < w[1]) {
            return Err(InvariantViolation::Unordered {
                node: id,
                keys: node.keys.clone(),
            });
        }

        let (min, max) = match node.parent {
            Some(_) => (self.config.least_len, self.config.max_len),
            None if node.is_leaf => (1, self.config.max_len),
            None => (2, self.config.max_len),
        };
        if len < min || len > max {
            return Err(InvariantViolation::Unbalanced {
                node: id,
                len,
                min,
                max,
            });
        }

        if node.is_leaf {
            if node.buckets.len() != len || !node.children.is_empty() {
                return Err(InvariantViolation::SlotMismatch {
                    node: id,
                    keys: len,
                    slots: node.buckets.len(),
                });
            }
            if let Some(i) = node.buckets.iter().position(Vec::is_empty) {
                return Err(InvariantViolation::EmptyBucket { key: node.keys[i] });
            }
            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(first) if first != depth => {
                    return Err(InvariantViolation::UnevenDepth {
                        first,
                        other: depth,
                    });
                }
                Some(_) => {}
            }
            leaves.push(id);
        } else {
            if node.children.len() != len || !node.buckets.is_empty() {
                return Err(InvariantViolation::SlotMismatch {
                    node: id,
                    keys: len,
                    slots: node.children.len(),
                });
            }
            for (index, &child) in node.children.iter().enumerate() {
                if self.node(child).parent != Some(id) {
                    return Err(InvariantViolation::BrokenParent { node: child });
                }
                let expected = self.check_node(child, depth + 1, leaves, leaf_depth)?;
                if node.keys[index] != expected {
                    return Err(InvariantViolation::StaleMaxKey {
                        node: id,
                        index,
                        found: node.keys[index],
                        expected,
                    });
                }
            }
        }

        Ok(node.keys[len - 1])
    }
}

impl StorageIndex for BPlusTree {
    fn search(&self, hashed: u32, original_key: &str) -> Option<Lookup> {
        let root = self.root?;
        let leaf = self.node(self.find_leaf(root, hashed));
        let index = find_index(&leaf.keys, hashed);
        if leaf.keys.get(index) != Some(&hashed) {
            return None;
        }
        let bucket = &leaf.buckets[index];
        let bucket_index = find_in_bucket(bucket, original_key)?;
        Some(Lookup {
            record: Arc::clone(&bucket[bucket_index]),
            bucket_index,
        })
    }

    fn insert(&mut self, hashed: u32, record: Record) -> Insertion {
        let Some(root) = self.root else {
            let mut leaf = Node::leaf(None);
            leaf.keys.push(hashed);
            leaf.buckets.push(vec![Arc::new(record)]);
            let id = self.alloc(leaf);
            self.root = Some(id);
            self.first_leaf = Some(id);
            return Insertion::Created;
        };

        let max_len = self.config.max_len;
        let leaf_id = self.find_leaf(root, hashed);
        let leaf = self.node_mut(leaf_id);
        let index = find_index(&leaf.keys, hashed);

        if leaf.keys.get(index) == Some(&hashed) {
            let bucket = &mut leaf.buckets[index];
            return match find_in_bucket(bucket, record.original_key()) {
                Some(i) => {
                    let (value, version) = record.into_write();
                    bucket[i].overwrite(value, version);
                    Insertion::Updated
                }
                None => {
                    bucket.push(Arc::new(record));
                    Insertion::Created
                }
            };
        }

        let new_max = index == leaf.keys.len();
        leaf.keys.insert(index, hashed);
        leaf.buckets.insert(index, vec![Arc::new(record)]);
        let overflow = leaf.keys.len() > max_len;

        if new_max {
            self.propagate_max(leaf_id);
        }
        if overflow {
            self.split(leaf_id);
        }
        Insertion::Created
    }

    fn delete(&mut self, hashed: u32, original_key: &str) -> bool {
        let Some(root) = self.root else {
            return false;
        };

        let leaf_id = self.find_leaf(root, hashed);
        let leaf = self.node_mut(leaf_id);
        let index = find_index(&leaf.keys, hashed);
        if leaf.keys.get(index) != Some(&hashed) {
            return false;
        }
        let Some(slot) = find_in_bucket(&leaf.buckets[index], original_key) else {
            return false;
        };

        if leaf.buckets[index].len() > 1 {
            leaf.buckets[index].remove(slot);
            return true;
        }

        leaf.keys.remove(index);
        leaf.buckets.remove(index);
        let removed_max = index == leaf.keys.len();
        let remaining = leaf.keys.len();
        let is_root = leaf.parent.is_none();

        if is_root {
            if remaining == 0 {
                self.collapse_root();
            }
            return true;
        }
        if removed_max {
            self.propagate_max(leaf_id);
        }
        if remaining < self.config.least_len {
            self.rebalance(leaf_id);
        }
        true
    }

    fn len(&self) -> usize {
        self.leaves()
            .flat_map(|leaf| leaf.buckets.iter())
            .map(Vec::len)
            .sum()
    }

    fn gossip_update(&self) -> Vec<GossipUpdate> {
        self.leaves()
            .flat_map(|leaf| leaf.buckets.iter().flatten())
            .filter_map(|record| record.take_dirty())
            .collect()
    }

    fn backend(&self) -> Backend {
        Backend::BPlusTree
    }

    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let Some(root) = self.root else {
            return match self.first_leaf {
                None => Ok(()),
                Some(_) => Err(InvariantViolation::BrokenLeafChain),
            };
        };
        if self.node(root).parent.is_some() {
            return Err(InvariantViolation::BrokenParent { node: root });
        }

        let mut leaves = Vec::new();
        let mut leaf_depth = None;
        self.check_node(root, 0, &mut leaves, &mut leaf_depth)?;

        let chain: Vec<NodeId> = successors(self.first_leaf, |&id| self.node(id).next).collect();
        if chain != leaves {
            return Err(InvariantViolation::BrokenLeafChain);
        }

        let keys = self.keys_in_order();
        if !keys.windows(2).all(|w| w[0] < w[1]) {
            return Err(InvariantViolation::Unordered { node: root, keys });
        }
        Ok(())
    }
}
