//! Address-keyed concurrent map
//!
//! A fixed set of `parking_lot` mutexes, each guarding an `FxHashMap`. Keys are native
//! addresses, which are mixed before picking a shard because allocators hand out
//! aligned addresses whose low bits are always zero.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;

pub(crate) struct ShardedMap<V> {
    shards: Box<[Mutex<FxHashMap<usize, V>>]>,
    mask: usize,
}

impl<V> ShardedMap<V> {
    /// `shards` is rounded up to a power of two.
    pub(crate) fn new(shards: usize) -> Self {
        let count = shards.max(1).next_power_of_two();
        let shards = (0..count)
            .map(|_| Mutex::new(FxHashMap::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            mask: count - 1,
        }
    }

    fn shard(&self, key: usize) -> &Mutex<FxHashMap<usize, V>> {
        let mixed = (key as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32;
        &self.shards[mixed as usize & self.mask]
    }

    pub(crate) fn insert(&self, key: usize, value: V) -> Option<V> {
        self.shard(key).lock().insert(key, value)
    }

    /// Insert unless `key` is present; an occupied key hands `value` back.
    pub(crate) fn try_insert(&self, key: usize, value: V) -> Result<(), V> {
        match self.shard(key).lock().entry(key) {
            Entry::Occupied(_) => Err(value),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
        }
    }

    /// Atomic with respect to every other operation on `key`: exactly one of several
    /// concurrent removers observes `Some`.
    pub(crate) fn remove(&self, key: usize) -> Option<V> {
        self.shard(key).lock().remove(&key)
    }

    pub(crate) fn contains(&self, key: usize) -> bool {
        self.shard(key).lock().contains_key(&key)
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.lock().is_empty())
    }

    #[cfg(test)]
    pub(crate) fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Remove every entry.
    pub(crate) fn drain(&self) -> Vec<(usize, V)> {
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            out.extend(shard.lock().drain());
        }
        out
    }
}

impl<V: Clone> ShardedMap<V> {
    pub(crate) fn get(&self, key: usize) -> Option<V> {
        self.shard(key).lock().get(&key).cloned()
    }
}
