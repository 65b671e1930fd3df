//! Sharded hash table with fine-grained locking.
//!
//! Keys hash to one of `S` shards; each shard is an independently locked
//! chain of entries, so operations on unrelated keys proceed concurrently.
//! No operation ever holds two shard locks, which rules out lock-ordering
//! deadlocks by construction.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Mutex;

use log::debug;

use crate::errors::ShmKvError;
use crate::queue::{Operation, Request};

type Link<K, V> = Option<Box<Node<K, V>>>;

struct Node<K, V> {
    key: K,
    value: V,
    next: Link<K, V>,
}

/// One shard's chain of entries, no duplicate keys. Not synchronized on
/// its own; the table wraps each store in its shard mutex.
struct BucketStore<K, V> {
    head: Link<K, V>,
}

impl<K: Eq, V> BucketStore<K, V> {
    fn new() -> BucketStore<K, V> {
        BucketStore { head: None }
    }

    /// Overwrites in place when the key already exists; otherwise appends.
    fn insert(&mut self, key: K, value: V) {
        let mut cursor = &mut self.head;
        while let Some(node) = cursor {
            if node.key == key {
                node.value = value;
                return;
            }
            cursor = &mut node.next;
        }
        *cursor = Some(Box::new(Node {
            key,
            value,
            next: None,
        }));
    }

    fn get(&self, key: &K) -> Option<&V> {
        let mut cursor = self.head.as_deref();
        while let Some(node) = cursor {
            if &node.key == key {
                return Some(&node.value);
            }
            cursor = node.next.as_deref();
        }
        None
    }

    fn remove(&mut self, key: &K) -> bool {
        Self::remove_from(&mut self.head, key)
    }

    fn remove_from(link: &mut Link<K, V>, key: &K) -> bool {
        match link {
            None => false,
            Some(node) if &node.key == key => {
                let next = node.next.take();
                *link = next;
                true
            }
            Some(node) => Self::remove_from(&mut node.next, key),
        }
    }

    fn len(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.head.as_deref();
        while let Some(node) = cursor {
            count += 1;
            cursor = node.next.as_deref();
        }
        count
    }
}

pub struct ShardedTable<K, V> {
    shards: Vec<Mutex<BucketStore<K, V>>>,
    hash_builder: RandomState,
}

impl<K: Hash + Eq, V: Clone> ShardedTable<K, V> {
    /// Creates a table with `shards` independently locked partitions. The
    /// table outlives all worker threads and is torn down at process exit.
    pub fn new(shards: usize) -> Result<ShardedTable<K, V>, ShmKvError> {
        if shards == 0 {
            return Err(ShmKvError::Logic(
                "shard count must be positive".to_string(),
            ));
        }
        let mut stores = Vec::with_capacity(shards);
        for _ in 0..shards {
            stores.push(Mutex::new(BucketStore::new()));
        }
        Ok(ShardedTable {
            shards: stores,
            hash_builder: RandomState::new(),
        })
    }

    /// Deterministic within one table instance, which is what the
    /// no-duplicate-key invariant needs across repeated inserts.
    fn shard_index(&self, key: &K) -> usize {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    /// Inserts or overwrites, locking the owning shard only.
    pub fn insert(&self, key: K, value: V) -> Result<(), ShmKvError> {
        let mut shard = self.shards[self.shard_index(&key)].lock()?;
        shard.insert(key, value);
        Ok(())
    }

    /// Not-found is a normal outcome, never an error.
    pub fn read(&self, key: &K) -> Result<Option<V>, ShmKvError> {
        let shard = self.shards[self.shard_index(key)].lock()?;
        Ok(shard.get(key).cloned())
    }

    /// Returns whether an entry was removed; deleting an absent key is a
    /// no-op.
    pub fn delete(&self, key: &K) -> Result<bool, ShmKvError> {
        let mut shard = self.shards[self.shard_index(key)].lock()?;
        Ok(shard.remove(key))
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Total entry count, taken one shard lock at a time.
    pub fn len(&self) -> Result<usize, ShmKvError> {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.lock()?.len();
        }
        Ok(total)
    }

    pub fn is_empty(&self) -> Result<bool, ShmKvError> {
        Ok(self.len()? == 0)
    }
}

impl ShardedTable<String, String> {
    /// Dispatches one dequeued request. Read returns the value found, the
    /// other operations return `None`; misses are logged as diagnostics.
    pub fn apply(&self, request: &Request) -> Result<Option<String>, ShmKvError> {
        match request.operation {
            Operation::Insert => {
                let value = request.value.clone().ok_or_else(|| {
                    ShmKvError::Logic(format!(
                        "insert for key {:?} carries no value",
                        request.key
                    ))
                })?;
                self.insert(request.key.clone(), value)?;
                Ok(None)
            }
            Operation::Read => {
                let value = self.read(&request.key)?;
                if value.is_none() {
                    debug!("read miss for key {:?}", request.key);
                }
                Ok(value)
            }
            Operation::Delete => {
                if !self.delete(&request.key)? {
                    debug!("delete miss for key {:?}", request.key);
                }
                Ok(None)
            }
        }
    }
}
