// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::any::Any;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

use crate::hamt::Hamt;
use crate::{StmResult, TVar, Transaction};

/// A transactional hash map.
///
/// The whole map lives in one `TVar` holding a persistent `Hamt`. An
/// update writes a new root that shares almost all nodes with the old
/// one, so from the STM's point of view every mutation is a plain write
/// of a single var and takes part in the commit protocol without any
/// per-key locking. A transaction that read the map keeps its snapshot
/// until it commits.
///
/// Note that two transactions updating different keys still conflict on
/// the single var. If that contention matters, shard into several maps.
#[derive(Clone)]
pub struct TMap<K, V> {
    var: TVar<Hamt<K, V>>,
    /// Hash factory, shared by all clones so every handle addresses the
    /// trie the same way.
    state: RandomState,
}

impl<K, V> TMap<K, V>
where
    K: Any + Send + Sync + Clone + Hash + Eq,
    V: Any + Send + Sync + Clone,
{
    /// Create an empty `TMap`.
    pub fn new() -> TMap<K, V> {
        TMap {
            var: TVar::new(Hamt::new()),
            state: RandomState::new(),
        }
    }

    fn hash_of(&self, k: &K) -> u64 {
        let mut hasher = self.state.build_hasher();
        k.hash(&mut hasher);
        hasher.finish()
    }

    /// Check if a key is present.
    pub fn member(&self, transaction: &mut Transaction, k: &K) -> StmResult<bool> {
        Ok(self.lookup(transaction, k)?.is_some())
    }

    /// Look up the value stored under a key.
    pub fn lookup(&self, transaction: &mut Transaction, k: &K) -> StmResult<Option<V>> {
        let map = self.var.read(transaction)?;
        Ok(map.lookup_with_hash(self.hash_of(k), |q| q == k).cloned())
    }

    /// Insert a value, replacing any previous one under the same key.
    pub fn insert(&self, transaction: &mut Transaction, k: K, v: V) -> StmResult<()> {
        let hash = self.hash_of(&k);
        self.var.modify(transaction, move |map| {
            map.alter_with_hash(hash, |q| *q == k, |_| Some((k.clone(), v)))
        })
    }

    /// Apply `f` to the value under `k`, if present. Does nothing for a
    /// missing key.
    pub fn update<F>(&self, transaction: &mut Transaction, k: &K, f: F) -> StmResult<()>
    where
        F: FnOnce(V) -> V,
    {
        let hash = self.hash_of(k);
        let k = k.clone();
        self.var.modify(transaction, move |map| {
            map.alter_with_hash(
                hash,
                |q| *q == k,
                |entry| entry.map(|(q, v)| (q.clone(), f(v.clone()))),
            )
        })
    }

    /// Remove the entry under a key. Does nothing for a missing key.
    pub fn remove(&self, transaction: &mut Transaction, k: &K) -> StmResult<()> {
        let hash = self.hash_of(k);
        let k = k.clone();
        self.var
            .modify(transaction, move |map| {
                map.alter_with_hash(hash, |q| *q == k, |_| None)
            })
    }

    /// Number of entries in the map.
    pub fn size(&self, transaction: &mut Transaction) -> StmResult<usize> {
        Ok(self.var.read(transaction)?.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::atomically;
    use std::thread;

    #[test]
    fn insert_lookup() {
        let map = TMap::new();

        atomically(|tx| map.insert(tx, "one", 1));

        let (x, y) = atomically(|tx| {
            let x = map.lookup(tx, &"one")?;
            let y = map.lookup(tx, &"two")?;
            Ok((x, y))
        });

        assert_eq!(x, Some(1));
        assert_eq!(y, None);
    }

    #[test]
    fn insert_replaces() {
        let map = TMap::new();

        atomically(|tx| {
            map.insert(tx, 1, "one")?;
            map.insert(tx, 1, "uno")
        });

        assert_eq!(atomically(|tx| map.lookup(tx, &1)), Some("uno"));
        assert_eq!(atomically(|tx| map.size(tx)), 1);
    }

    #[test]
    fn update_existing() {
        let map = TMap::new();

        atomically(|tx| map.insert(tx, 1, 10));
        atomically(|tx| map.update(tx, &1, |v| v + 1));
        atomically(|tx| map.update(tx, &2, |v| v + 1));

        assert_eq!(atomically(|tx| map.lookup(tx, &1)), Some(11));
        assert_eq!(atomically(|tx| map.member(tx, &2)), false);
    }

    #[test]
    fn remove_entry() {
        let map = TMap::new();

        atomically(|tx| {
            map.insert(tx, 1, "one")?;
            map.insert(tx, 2, "two")
        });
        atomically(|tx| map.remove(tx, &1));

        assert_eq!(atomically(|tx| map.member(tx, &1)), false);
        assert_eq!(atomically(|tx| map.lookup(tx, &2)), Some("two"));
    }

    /// Inserts and removes inside one transaction commit as a unit.
    #[test]
    fn compound_transaction() {
        let map = TMap::new();

        atomically(|tx| map.insert(tx, 1, 1));
        atomically(|tx| {
            map.remove(tx, &1)?;
            map.insert(tx, 2, 2)?;
            map.insert(tx, 3, 3)
        });

        assert_eq!(atomically(|tx| map.size(tx)), 2);
        assert_eq!(atomically(|tx| map.member(tx, &1)), false);
    }

    /// Concurrent inserts of disjoint keys must all survive, even though
    /// they conflict on the shared root var and have to rerun.
    #[test]
    fn threaded_inserts() {
        let map = TMap::new();

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let map = map.clone();
                thread::spawn(move || {
                    for i in 0..25 {
                        let key = t * 100 + i;
                        atomically(|tx| map.insert(tx, key, key));
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(atomically(|tx| map.size(tx)), 100);
    }
}
