//! # Stable B-Tree Map
//!
//! A persistent ordered map built on contract persistent storage.
//!
//! Each map lives in its own namespace (`memory_id`) and is stored as:
//!
//! - one metadata entry, `MapKey::Meta(memory_id)`, holding the root node id,
//!   the node allocator, the entry count and the size bounds;
//! - one entry per B-tree node, `MapKey::Node(memory_id, node_id)`.
//!
//! Node ids come from a counter that only grows, so an id always refers to
//! the same region for as long as that node is alive. Keys are stored in
//! their order-preserving [`StorableKey`] encoding and values in their XDR
//! encoding, both bounded by the limits the map was created with.
//!
//! Inserts split full nodes on the way down and removals top up thin nodes
//! on the way down, so every mutation is a single root-to-leaf pass.

use core::cmp::Ordering;
use core::marker::PhantomData;

use soroban_sdk::{
    contracttype,
    xdr::{FromXdr, ToXdr},
    Bytes, Env, IntoVal, TryFromVal, Val, Vec,
};

use crate::storable::StorableKey;

/// Minimum degree of the tree. Non-root nodes hold between
/// `MIN_DEGREE - 1` and `2 * MIN_DEGREE - 1` entries.
pub const MIN_DEGREE: u32 = 6;

/// Entries in a full node.
pub const MAX_ENTRIES: u32 = 2 * MIN_DEGREE - 1;

/// Ledgers before expiry at which a read or written entry is extended.
pub const ENTRY_TTL_THRESHOLD: u32 = 17_280;

/// Touched entries are extended to this many ledgers (~30 days).
pub const ENTRY_TTL_EXTEND_TO: u32 = 518_400;

/// Storage-level failures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MapError {
    /// A key or value is over the map's bound, or the map ran out of ids
    CapacityExceeded,
    /// Stored state is missing or does not decode
    Corrupt,
}

/// Persistent storage keys owned by stable maps.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MapKey {
    Meta(u32),
    Node(u32, u32),
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MapMeta {
    pub root: Option<u32>,
    pub next_node: u32,
    pub len: u32,
    pub max_key_size: u32,
    pub max_value_size: u32,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Node {
    pub keys: Vec<Bytes>,
    pub values: Vec<Bytes>,
    /// Child ids; empty for a leaf, `keys.len() + 1` long otherwise.
    pub children: Vec<u32>,
}

impl Node {
    fn new(env: &Env) -> Self {
        Self {
            keys: Vec::new(env),
            values: Vec::new(env),
            children: Vec::new(env),
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn is_full(&self) -> bool {
        self.keys.len() >= MAX_ENTRIES
    }

    /// `Ok(index)` of the key, or `Err(index)` where it would be inserted.
    fn search(&self, key: &Bytes) -> Result<u32, u32> {
        let mut low = 0;
        let mut high = self.keys.len();
        while low < high {
            let mid = low + (high - low) / 2;
            match self.keys.get_unchecked(mid).cmp(key) {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
                Ordering::Equal => return Ok(mid),
            }
        }
        Err(low)
    }

    fn child(&self, index: u32) -> Result<u32, MapError> {
        self.children.get(index).ok_or(MapError::Corrupt)
    }

    fn entry(&self, index: u32) -> Result<(Bytes, Bytes), MapError> {
        let key = self.keys.get(index).ok_or(MapError::Corrupt)?;
        let value = self.values.get(index).ok_or(MapError::Corrupt)?;
        Ok((key, value))
    }
}

/// Persistent ordered map from `K` to `V`.
pub struct StableBTreeMap<K, V> {
    env: Env,
    memory_id: u32,
    meta: MapMeta,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> StableBTreeMap<K, V>
where
    K: StorableKey,
    V: IntoVal<Env, Val> + TryFromVal<Env, Val>,
{
    /// Opens the map stored under `memory_id`, or an empty one if nothing
    /// has been written there yet.
    ///
    /// Reopening an existing map with different bounds fails with
    /// `Corrupt`, since stored entries may not fit the new limits.
    pub fn init(
        env: &Env,
        memory_id: u32,
        max_key_size: u32,
        max_value_size: u32,
    ) -> Result<Self, MapError> {
        let meta_key = MapKey::Meta(memory_id);
        let stored: Option<MapMeta> = env.storage().persistent().get(&meta_key);
        let meta = match stored {
            Some(meta) => {
                if meta.max_key_size != max_key_size || meta.max_value_size != max_value_size {
                    return Err(MapError::Corrupt);
                }
                keep_alive(env, &meta_key);
                meta
            }
            None => MapMeta {
                root: None,
                next_node: 1,
                len: 0,
                max_key_size,
                max_value_size,
            },
        };

        Ok(Self {
            env: env.clone(),
            memory_id,
            meta,
            _marker: PhantomData,
        })
    }

    pub fn len(&self) -> u32 {
        self.meta.len
    }

    pub fn is_empty(&self) -> bool {
        self.meta.len == 0
    }

    pub fn get(&self, key: &K) -> Result<Option<V>, MapError> {
        let Some(key) = self.probe_key(key) else {
            return Ok(None);
        };
        match self.locate(&key)? {
            Some((_, node, index)) => {
                let (_, value) = node.entry(index)?;
                self.decode_value(&value).map(Some)
            }
            None => Ok(None),
        }
    }

    pub fn contains_key(&self, key: &K) -> Result<bool, MapError> {
        match self.probe_key(key) {
            Some(key) => Ok(self.locate(&key)?.is_some()),
            None => Ok(false),
        }
    }

    /// Inserts or replaces an entry, returning the previous value.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>, MapError> {
        let key = self.probe_key(&key).ok_or(MapError::CapacityExceeded)?;
        let value = self.encode_value(value)?;

        if let Some((id, mut node, index)) = self.locate(&key)? {
            let (_, previous) = node.entry(index)?;
            node.values.set(index, value);
            self.store(id, &node);
            return self.decode_value(&previous).map(Some);
        }

        let len = self
            .meta
            .len
            .checked_add(1)
            .ok_or(MapError::CapacityExceeded)?;

        match self.meta.root {
            None => {
                let id = self.allocate()?;
                let mut leaf = Node::new(&self.env);
                leaf.keys.push_back(key);
                leaf.values.push_back(value);
                self.store(id, &leaf);
                self.meta.root = Some(id);
            }
            Some(root_id) => {
                let root = self.load(root_id)?;
                if root.is_full() {
                    // Grow upwards: the old root becomes the first child.
                    let new_root_id = self.allocate()?;
                    let mut new_root = Node::new(&self.env);
                    new_root.children.push_back(root_id);
                    self.split_child(&mut new_root, 0, root)?;
                    self.store(new_root_id, &new_root);
                    self.meta.root = Some(new_root_id);
                    self.insert_non_full(new_root_id, new_root, key, value)?;
                } else {
                    self.insert_non_full(root_id, root, key, value)?;
                }
            }
        }

        self.meta.len = len;
        self.commit_meta();
        Ok(None)
    }

    /// Removes an entry, returning its value.
    pub fn remove(&mut self, key: &K) -> Result<Option<V>, MapError> {
        let Some(key) = self.probe_key(key) else {
            return Ok(None);
        };
        let Some((_, node, index)) = self.locate(&key)? else {
            return Ok(None);
        };
        let (_, removed) = node.entry(index)?;
        let root_id = self.meta.root.ok_or(MapError::Corrupt)?;

        self.delete_from(root_id, key)?;

        let root = self.load(root_id)?;
        if root.keys.is_empty() {
            // Shrink: an empty internal root hands over to its only child.
            self.meta.root = if root.is_leaf() {
                None
            } else {
                Some(root.child(0)?)
            };
            self.release(root_id);
        }

        self.meta.len = self.meta.len.checked_sub(1).ok_or(MapError::Corrupt)?;
        self.commit_meta();
        self.decode_value(&removed).map(Some)
    }

    /// Iterates over all entries in key order. Nodes are read as the walk
    /// reaches them, and each call starts a fresh walk from the root.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter::new(self)
    }

    pub fn keys(&self) -> impl Iterator<Item = Result<K, MapError>> + '_ {
        self.iter().map(|entry| entry.map(|(key, _)| key))
    }

    pub fn values(&self) -> impl Iterator<Item = Result<V, MapError>> + '_ {
        self.iter().map(|entry| entry.map(|(_, value)| value))
    }

    fn insert_non_full(
        &mut self,
        mut id: u32,
        mut node: Node,
        key: Bytes,
        value: Bytes,
    ) -> Result<(), MapError> {
        loop {
            // The caller has already ruled out an existing entry.
            let index = match node.search(&key) {
                Ok(_) => return Err(MapError::Corrupt),
                Err(index) => index,
            };

            if node.is_leaf() {
                node.keys.insert(index, key);
                node.values.insert(index, value);
                self.store(id, &node);
                return Ok(());
            }

            let child_id = node.child(index)?;
            let child = self.load(child_id)?;
            if !child.is_full() {
                id = child_id;
                node = child;
                continue;
            }

            self.split_child(&mut node, index, child)?;
            self.store(id, &node);

            let (median, _) = node.entry(index)?;
            let next = if key > median { index + 1 } else { index };
            id = node.child(next)?;
            node = self.load(id)?;
        }
    }

    /// Splits the full child at `index` around its median, which moves up
    /// into `parent`. The caller stores `parent`.
    fn split_child(&mut self, parent: &mut Node, index: u32, child: Node) -> Result<(), MapError> {
        let child_id = parent.child(index)?;
        let sibling_id = self.allocate()?;
        let mid = MIN_DEGREE - 1;
        let (median_key, median_value) = child.entry(mid)?;

        let (left_children, right_children) = if child.is_leaf() {
            (Vec::new(&self.env), Vec::new(&self.env))
        } else {
            (
                child.children.slice(..MIN_DEGREE),
                child.children.slice(MIN_DEGREE..),
            )
        };
        let left = Node {
            keys: child.keys.slice(..mid),
            values: child.values.slice(..mid),
            children: left_children,
        };
        let right = Node {
            keys: child.keys.slice(mid + 1..),
            values: child.values.slice(mid + 1..),
            children: right_children,
        };

        parent.keys.insert(index, median_key);
        parent.values.insert(index, median_value);
        parent.children.insert(index + 1, sibling_id);

        self.store(child_id, &left);
        self.store(sibling_id, &right);
        Ok(())
    }

    /// Deletes `key` from the subtree rooted at `id`. Every node entered on
    /// the way down holds at least `MIN_DEGREE` entries (the root excepted),
    /// so the leaf removal never leaves a node under the minimum.
    fn delete_from(&self, mut id: u32, mut key: Bytes) -> Result<(), MapError> {
        let mut node = self.load(id)?;
        loop {
            match node.search(&key) {
                Ok(index) if node.is_leaf() => {
                    node.keys.remove(index);
                    node.values.remove(index);
                    self.store(id, &node);
                    return Ok(());
                }
                Ok(index) => {
                    let left_id = node.child(index)?;
                    let left = self.load(left_id)?;
                    if left.keys.len() >= MIN_DEGREE {
                        let (pred_key, pred_value) = self.last_entry(left.clone())?;
                        node.keys.set(index, pred_key.clone());
                        node.values.set(index, pred_value);
                        self.store(id, &node);
                        key = pred_key;
                        id = left_id;
                        node = left;
                        continue;
                    }

                    let right_id = node.child(index + 1)?;
                    let right = self.load(right_id)?;
                    if right.keys.len() >= MIN_DEGREE {
                        let (succ_key, succ_value) = self.first_entry(right.clone())?;
                        node.keys.set(index, succ_key.clone());
                        node.values.set(index, succ_value);
                        self.store(id, &node);
                        key = succ_key;
                        id = right_id;
                        node = right;
                        continue;
                    }

                    let merged = self.merge(&mut node, index, left, right)?;
                    self.store(id, &node);
                    id = left_id;
                    node = merged;
                }
                Err(_) if node.is_leaf() => return Err(MapError::Corrupt),
                Err(index) => {
                    let (child_id, child) = self.fill_child(id, &mut node, index)?;
                    id = child_id;
                    node = child;
                }
            }
        }
    }

    /// Makes sure the child at `index` can give up an entry, borrowing from
    /// a sibling or merging with one. Returns the node to descend into.
    fn fill_child(
        &self,
        parent_id: u32,
        parent: &mut Node,
        index: u32,
    ) -> Result<(u32, Node), MapError> {
        let child_id = parent.child(index)?;
        let mut child = self.load(child_id)?;
        if child.keys.len() >= MIN_DEGREE {
            return Ok((child_id, child));
        }

        let left_sibling = match index.checked_sub(1) {
            Some(left_index) => {
                let left_id = parent.child(left_index)?;
                Some((left_id, self.load(left_id)?))
            }
            None => None,
        };
        let left_sibling = match left_sibling {
            Some((left_id, mut left)) if left.keys.len() >= MIN_DEGREE => {
                // Rotate right through the separator.
                let (sep_key, sep_value) = parent.entry(index - 1)?;
                let (last_key, last_value) = left.entry(left.keys.len() - 1)?;
                left.keys.pop_back();
                left.values.pop_back();
                child.keys.push_front(sep_key);
                child.values.push_front(sep_value);
                parent.keys.set(index - 1, last_key);
                parent.values.set(index - 1, last_value);
                if !left.is_leaf() {
                    let moved = left.children.pop_back().ok_or(MapError::Corrupt)?;
                    child.children.push_front(moved);
                }
                self.store(left_id, &left);
                self.store(child_id, &child);
                self.store(parent_id, parent);
                return Ok((child_id, child));
            }
            other => other,
        };

        let right_sibling = if index + 1 < parent.children.len() {
            let right_id = parent.child(index + 1)?;
            Some((right_id, self.load(right_id)?))
        } else {
            None
        };
        let right_sibling = match right_sibling {
            Some((right_id, mut right)) if right.keys.len() >= MIN_DEGREE => {
                // Rotate left through the separator.
                let (sep_key, sep_value) = parent.entry(index)?;
                let (first_key, first_value) = right.entry(0)?;
                right.keys.pop_front();
                right.values.pop_front();
                child.keys.push_back(sep_key);
                child.values.push_back(sep_value);
                parent.keys.set(index, first_key);
                parent.values.set(index, first_value);
                if !right.is_leaf() {
                    let moved = right.children.pop_front().ok_or(MapError::Corrupt)?;
                    child.children.push_back(moved);
                }
                self.store(right_id, &right);
                self.store(child_id, &child);
                self.store(parent_id, parent);
                return Ok((child_id, child));
            }
            other => other,
        };

        let descend_into = match (left_sibling, right_sibling) {
            (_, Some((_, right))) => (child_id, self.merge(parent, index, child, right)?),
            (Some((left_id, left)), None) => (left_id, self.merge(parent, index - 1, left, child)?),
            (None, None) => return Err(MapError::Corrupt),
        };
        self.store(parent_id, parent);
        Ok(descend_into)
    }

    /// Folds the separator at `index` and the right child into the left
    /// child. The right node is released; the caller stores `parent`.
    fn merge(&self, parent: &mut Node, index: u32, left: Node, right: Node) -> Result<Node, MapError> {
        let left_id = parent.child(index)?;
        let right_id = parent.child(index + 1)?;
        let (sep_key, sep_value) = parent.entry(index)?;

        let mut merged = left;
        merged.keys.push_back(sep_key);
        merged.values.push_back(sep_value);
        merged.keys.append(&right.keys);
        merged.values.append(&right.values);
        merged.children.append(&right.children);

        parent.keys.remove(index);
        parent.values.remove(index);
        parent.children.remove(index + 1);

        self.store(left_id, &merged);
        self.release(right_id);
        Ok(merged)
    }

    fn first_entry(&self, mut node: Node) -> Result<(Bytes, Bytes), MapError> {
        while !node.is_leaf() {
            node = self.load(node.child(0)?)?;
        }
        node.entry(0)
    }

    fn last_entry(&self, mut node: Node) -> Result<(Bytes, Bytes), MapError> {
        while !node.is_leaf() {
            node = self.load(node.child(node.children.len() - 1)?)?;
        }
        let last = node.keys.len().checked_sub(1).ok_or(MapError::Corrupt)?;
        node.entry(last)
    }

    fn locate(&self, key: &Bytes) -> Result<Option<(u32, Node, u32)>, MapError> {
        let Some(mut id) = self.meta.root else {
            return Ok(None);
        };
        loop {
            let node = self.load(id)?;
            match node.search(key) {
                Ok(index) => return Ok(Some((id, node, index))),
                Err(_) if node.is_leaf() => return Ok(None),
                Err(index) => id = node.child(index)?,
            }
        }
    }

    /// Encoded key, or `None` if the key could never be stored here.
    fn probe_key(&self, key: &K) -> Option<Bytes> {
        key.to_key_bytes(&self.env)
            .filter(|bytes| bytes.len() <= self.meta.max_key_size)
    }

    fn decode_key(&self, bytes: &Bytes) -> Result<K, MapError> {
        K::from_key_bytes(&self.env, bytes).ok_or(MapError::Corrupt)
    }

    fn encode_value(&self, value: V) -> Result<Bytes, MapError> {
        let bytes = value.to_xdr(&self.env);
        if bytes.len() > self.meta.max_value_size {
            return Err(MapError::CapacityExceeded);
        }
        Ok(bytes)
    }

    fn decode_value(&self, bytes: &Bytes) -> Result<V, MapError> {
        V::from_xdr(&self.env, bytes).map_err(|_| MapError::Corrupt)
    }

    fn allocate(&mut self) -> Result<u32, MapError> {
        let id = self.meta.next_node;
        self.meta.next_node = id.checked_add(1).ok_or(MapError::CapacityExceeded)?;
        Ok(id)
    }

    /// Reads a node and renews its TTL, so entries that are only ever read
    /// stay live as long as the map is in use.
    fn load(&self, id: u32) -> Result<Node, MapError> {
        let key = MapKey::Node(self.memory_id, id);
        let node = self
            .env
            .storage()
            .persistent()
            .get(&key)
            .ok_or(MapError::Corrupt)?;
        keep_alive(&self.env, &key);
        Ok(node)
    }

    fn store(&self, id: u32, node: &Node) {
        let key = MapKey::Node(self.memory_id, id);
        self.env.storage().persistent().set(&key, node);
        keep_alive(&self.env, &key);
    }

    fn release(&self, id: u32) {
        self.env
            .storage()
            .persistent()
            .remove(&MapKey::Node(self.memory_id, id));
    }

    fn commit_meta(&self) {
        let key = MapKey::Meta(self.memory_id);
        self.env.storage().persistent().set(&key, &self.meta);
        keep_alive(&self.env, &key);
    }
}

fn keep_alive(env: &Env, key: &MapKey) {
    env.storage()
        .persistent()
        .extend_ttl(key, ENTRY_TTL_THRESHOLD, ENTRY_TTL_EXTEND_TO);
}

/// In-order walk over a [`StableBTreeMap`].
///
/// The walk keeps the path from the root to the current node; a node is
/// loaded from storage only when the walk first enters it.
pub struct Iter<'a, K, V> {
    map: &'a StableBTreeMap<K, V>,
    path: Vec<Node>,
    cursors: Vec<u32>,
    pending: Option<MapError>,
}

impl<'a, K, V> Iter<'a, K, V>
where
    K: StorableKey,
    V: IntoVal<Env, Val> + TryFromVal<Env, Val>,
{
    fn new(map: &'a StableBTreeMap<K, V>) -> Self {
        let mut iter = Self {
            map,
            path: Vec::new(&map.env),
            cursors: Vec::new(&map.env),
            pending: None,
        };
        if let Some(root) = map.meta.root {
            if let Err(error) = iter.descend(root) {
                iter.pending = Some(error);
            }
        }
        iter
    }

    /// Pushes the leftmost path below `id`.
    fn descend(&mut self, mut id: u32) -> Result<(), MapError> {
        loop {
            let node = self.map.load(id)?;
            let next = if node.is_leaf() {
                None
            } else {
                Some(node.child(0)?)
            };
            self.path.push_back(node);
            self.cursors.push_back(0);
            match next {
                Some(child) => id = child,
                None => return Ok(()),
            }
        }
    }

    fn next_entry(&mut self) -> Result<Option<(Bytes, Bytes)>, MapError> {
        loop {
            let Some(node) = self.path.last() else {
                return Ok(None);
            };
            let depth = self.path.len() - 1;
            let cursor = self.cursors.get(depth).ok_or(MapError::Corrupt)?;

            if cursor < node.keys.len() {
                let entry = node.entry(cursor)?;
                self.cursors.set(depth, cursor + 1);
                if !node.is_leaf() {
                    self.descend(node.child(cursor + 1)?)?;
                }
                return Ok(Some(entry));
            }

            self.path.pop_back();
            self.cursors.pop_back();
        }
    }

    fn abandon(&mut self) {
        self.path = Vec::new(&self.map.env);
        self.cursors = Vec::new(&self.map.env);
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V>
where
    K: StorableKey,
    V: IntoVal<Env, Val> + TryFromVal<Env, Val>,
{
    type Item = Result<(K, V), MapError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(error) = self.pending.take() {
            self.abandon();
            return Some(Err(error));
        }
        match self.next_entry() {
            Ok(Some((key, value))) => {
                let decoded = self
                    .map
                    .decode_key(&key)
                    .and_then(|key| Ok((key, self.map.decode_value(&value)?)));
                Some(decoded)
            }
            Ok(None) => None,
            Err(error) => {
                self.abandon();
                Some(Err(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::BudgetLedgerContract;
    use soroban_sdk::testutils::{storage::Persistent as _, Ledger as _};
    use soroban_sdk::String;
    use std::vec::Vec as StdVec;

    const KEY_SIZE: u32 = 4;
    const VALUE_SIZE: u32 = 64;

    #[allow(deprecated)]
    fn with_map<F>(test: F)
    where
        F: FnOnce(&Env),
    {
        let env = Env::default();
        // Bulk tests run hundreds of mutations inside one frame.
        env.budget().reset_unlimited();
        let contract_id = env.register(BudgetLedgerContract, ());
        env.as_contract(&contract_id, || test(&env));
    }

    fn open(env: &Env) -> StableBTreeMap<u32, u64> {
        StableBTreeMap::init(env, 7, KEY_SIZE, VALUE_SIZE).unwrap()
    }

    fn collect_keys(map: &StableBTreeMap<u32, u64>) -> StdVec<u32> {
        map.keys().map(|key| key.unwrap()).collect()
    }

    /// Visits 0..n in a scrambled order; `stride` must be coprime with `n`.
    fn scrambled(n: u32, stride: u32) -> impl Iterator<Item = u32> {
        (0..n).map(move |i| (i * stride) % n)
    }

    #[test]
    fn test_insert_get_and_replace() {
        with_map(|env| {
            let mut map = open(env);
            assert!(map.is_empty());
            assert_eq!(map.get(&1).unwrap(), None);

            assert_eq!(map.insert(1, 100).unwrap(), None);
            assert_eq!(map.insert(2, 200).unwrap(), None);
            assert_eq!(map.insert(1, 150).unwrap(), Some(100));

            assert_eq!(map.len(), 2);
            assert_eq!(map.get(&1).unwrap(), Some(150));
            assert_eq!(map.get(&2).unwrap(), Some(200));
            assert!(map.contains_key(&2).unwrap());
            assert!(!map.contains_key(&3).unwrap());
        });
    }

    #[test]
    fn test_many_inserts_iterate_in_key_order() {
        with_map(|env| {
            let mut map = open(env);
            for key in scrambled(256, 73) {
                map.insert(key, u64::from(key) * 10).unwrap();
            }

            assert_eq!(map.len(), 256);
            let expected: StdVec<u32> = (0..256).collect();
            assert_eq!(collect_keys(&map), expected);

            for (key, value) in map.iter().map(|entry| entry.unwrap()) {
                assert_eq!(value, u64::from(key) * 10);
            }
        });
    }

    #[test]
    fn test_removals_keep_tree_consistent() {
        with_map(|env| {
            let mut map = open(env);
            for key in scrambled(300, 7) {
                map.insert(key, u64::from(key)).unwrap();
            }

            let mut remaining: StdVec<u32> = (0..300).collect();
            for (step, key) in scrambled(300, 131).enumerate() {
                assert_eq!(map.remove(&key).unwrap(), Some(u64::from(key)));
                assert_eq!(map.get(&key).unwrap(), None);
                remaining.retain(|k| *k != key);
                assert_eq!(map.len() as usize, remaining.len());

                if step % 37 == 0 {
                    assert_eq!(collect_keys(&map), remaining);
                }
            }

            assert!(map.is_empty());
            assert_eq!(map.iter().count(), 0);
        });
    }

    #[test]
    fn test_emptied_map_releases_nodes() {
        with_map(|env| {
            let mut map = open(env);
            for key in 0..40 {
                map.insert(key, 1).unwrap();
            }
            for key in 0..40 {
                map.remove(&key).unwrap();
            }

            let meta: MapMeta = env
                .storage()
                .persistent()
                .get(&MapKey::Meta(7))
                .unwrap();
            assert_eq!(meta.root, None);
            for id in 1..meta.next_node {
                assert!(!env.storage().persistent().has(&MapKey::Node(7, id)));
            }
        });
    }

    #[test]
    fn test_remove_missing_key_is_noop() {
        with_map(|env| {
            let mut map = open(env);
            map.insert(5, 50).unwrap();

            assert_eq!(map.remove(&6).unwrap(), None);
            assert_eq!(map.len(), 1);
            assert_eq!(map.remove(&5).unwrap(), Some(50));
            assert_eq!(map.remove(&5).unwrap(), None);
        });
    }

    #[test]
    fn test_reopened_map_sees_committed_entries() {
        with_map(|env| {
            {
                let mut map = open(env);
                for key in 0..30 {
                    map.insert(key, u64::from(key) + 1).unwrap();
                }
                map.remove(&10).unwrap();
            }

            let map = open(env);
            assert_eq!(map.len(), 29);
            assert_eq!(map.get(&29).unwrap(), Some(30));
            assert_eq!(map.get(&10).unwrap(), None);
        });
    }

    #[test]
    fn test_reopen_with_other_bounds_is_corrupt() {
        with_map(|env| {
            let mut map = open(env);
            map.insert(1, 1).unwrap();

            let reopened = StableBTreeMap::<u32, u64>::init(env, 7, KEY_SIZE, VALUE_SIZE * 2);
            assert_eq!(reopened.err(), Some(MapError::Corrupt));
        });
    }

    #[test]
    fn test_maps_with_distinct_memory_ids_are_isolated() {
        with_map(|env| {
            let mut first: StableBTreeMap<u32, u64> =
                StableBTreeMap::init(env, 1, KEY_SIZE, VALUE_SIZE).unwrap();
            let mut second: StableBTreeMap<u32, u64> =
                StableBTreeMap::init(env, 2, KEY_SIZE, VALUE_SIZE).unwrap();

            first.insert(1, 10).unwrap();
            second.insert(1, 20).unwrap();

            assert_eq!(first.get(&1).unwrap(), Some(10));
            assert_eq!(second.get(&1).unwrap(), Some(20));
        });
    }

    #[test]
    fn test_oversized_value_is_rejected() {
        with_map(|env| {
            let mut map: StableBTreeMap<u32, String> =
                StableBTreeMap::init(env, 3, KEY_SIZE, VALUE_SIZE).unwrap();
            let big = String::from_bytes(env, &[b'x'; 128]);

            assert_eq!(map.insert(1, big), Err(MapError::CapacityExceeded));
            assert!(map.is_empty());
        });
    }

    #[test]
    fn test_oversized_key_is_rejected_on_insert_and_absent_on_lookup() {
        with_map(|env| {
            let mut map: StableBTreeMap<String, u64> =
                StableBTreeMap::init(env, 4, 8, VALUE_SIZE).unwrap();
            let long = String::from_str(env, "much-too-long-key");

            assert_eq!(map.insert(long.clone(), 1), Err(MapError::CapacityExceeded));
            assert_eq!(map.get(&long).unwrap(), None);
            assert_eq!(map.remove(&long).unwrap(), None);
        });
    }

    #[test]
    fn test_string_keys_iterate_lexicographically() {
        with_map(|env| {
            let mut map: StableBTreeMap<String, u64> =
                StableBTreeMap::init(env, 5, 16, VALUE_SIZE).unwrap();
            for (i, id) in ["pay-b", "pay-a", "pay-ab", "office", "zeta"].iter().enumerate() {
                map.insert(String::from_str(env, id), i as u64).unwrap();
            }

            let keys: StdVec<String> = map.keys().map(|key| key.unwrap()).collect();
            let expected: StdVec<String> = ["office", "pay-a", "pay-ab", "pay-b", "zeta"]
                .iter()
                .map(|id| String::from_str(env, id))
                .collect();
            assert_eq!(keys, expected);
        });
    }

    #[test]
    fn test_iteration_is_restartable() {
        with_map(|env| {
            let mut map = open(env);
            for key in scrambled(50, 3) {
                map.insert(key, 0).unwrap();
            }

            let mut iter = map.iter();
            let first_two: StdVec<u32> = (&mut iter).take(2).map(|e| e.unwrap().0).collect();
            assert_eq!(first_two, [0, 1]);

            assert_eq!(collect_keys(&map).len(), 50);
            assert_eq!(map.iter().count(), 50);
        });
    }

    #[test]
    fn test_missing_node_is_reported_as_corrupt() {
        with_map(|env| {
            let mut map = open(env);
            for key in 0..30 {
                map.insert(key, 0).unwrap();
            }
            let meta: MapMeta = env
                .storage()
                .persistent()
                .get(&MapKey::Meta(7))
                .unwrap();
            let root = meta.root.unwrap();
            env.storage().persistent().remove(&MapKey::Node(7, root));

            let map = open(env);
            assert_eq!(map.get(&3), Err(MapError::Corrupt));
            let mut iter = map.iter();
            assert_eq!(iter.next(), Some(Err(MapError::Corrupt)));
            assert_eq!(iter.next(), None);
        });
    }

    #[test]
    fn test_reads_renew_entry_ttl() {
        with_map(|env| {
            env.storage()
                .instance()
                .extend_ttl(ENTRY_TTL_EXTEND_TO, ENTRY_TTL_EXTEND_TO * 2);

            let mut map = open(env);
            map.insert(1, 10).unwrap();
            let node_key = MapKey::Node(7, map.meta.root.unwrap());
            let meta_key = MapKey::Meta(7);

            env.ledger().with_mut(|li| {
                li.sequence_number += ENTRY_TTL_EXTEND_TO - ENTRY_TTL_THRESHOLD + 1;
            });
            assert!(env.storage().persistent().get_ttl(&node_key) < ENTRY_TTL_THRESHOLD);
            assert!(env.storage().persistent().get_ttl(&meta_key) < ENTRY_TTL_THRESHOLD);

            let map = open(env);
            assert_eq!(map.get(&1).unwrap(), Some(10));
            assert_eq!(env.storage().persistent().get_ttl(&node_key), ENTRY_TTL_EXTEND_TO);
            assert_eq!(env.storage().persistent().get_ttl(&meta_key), ENTRY_TTL_EXTEND_TO);
        });
    }
}
