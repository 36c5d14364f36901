// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A persistent hash array mapped trie.
//!
//! `Hamt` is the payload type behind `TMap` and `TSet`. Every update
//! returns a new root that shares all unaffected subtrees with the old
//! one, so a whole map fits into a single `TVar`. The map then takes part
//! in the usual commit protocol as one variable, without any per-key
//! locking, and old snapshots stay readable by transactions that already
//! recorded them.
//!
//! Keys are addressed by a caller supplied 64 bit hash, consumed five
//! bits per level (branching factor 32). Colliding hashes share a leaf
//! and are disambiguated by a caller supplied key predicate.

use std::sync::Arc;

/// Bits consumed per trie level.
const HASH_BITS: u32 = 5;

/// Mask for one level's chunk of the hash.
const LEVEL_MASK: u64 = (1 << HASH_BITS) - 1;

enum Node<K, V> {
    /// Sparse inner node. Bit `i` of `bitmap` tells whether slot `i` is
    /// occupied; the child's position in `children` is the popcount of
    /// the bits below `i`.
    Branch {
        bitmap: u32,
        children: Vec<Arc<Node<K, V>>>,
    },

    /// All entries whose full hash equals `hash`. Almost always a single
    /// pair; longer only on hash collisions.
    Leaf { hash: u64, entries: Vec<(K, V)> },
}

/// Result of rebuilding a path through the trie.
enum Change<K, V> {
    /// Nothing to do, keep the old node.
    Unchanged,
    /// Same number of entries, new node.
    Updated(Arc<Node<K, V>>),
    /// One entry more.
    Inserted(Arc<Node<K, V>>),
    /// One entry less. The node may disappear entirely.
    Removed(Option<Arc<Node<K, V>>>),
}

/// An immutable, structurally shared hash map.
///
/// `clone` is O(1) and updates are O(log32 n). See the module docs.
pub struct Hamt<K, V> {
    root: Option<Arc<Node<K, V>>>,
    len: usize,
}

impl<K, V> Clone for Hamt<K, V> {
    fn clone(&self) -> Self {
        Hamt {
            root: self.root.clone(),
            len: self.len,
        }
    }
}

impl<K, V> Hamt<K, V>
where
    K: Clone,
    V: Clone,
{
    /// Create an empty trie.
    pub fn new() -> Hamt<K, V> {
        Hamt { root: None, len: 0 }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` if the trie holds no entry.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Look up the value stored under the key with the given hash.
    ///
    /// `matches` disambiguates colliding hashes. Pure lookup, never
    /// blocks and never allocates.
    pub fn lookup_with_hash<M>(&self, hash: u64, matches: M) -> Option<&V>
    where
        M: Fn(&K) -> bool,
    {
        let mut node = self.root.as_deref()?;
        let mut shift = 0;

        loop {
            match node {
                Node::Leaf { hash: h, entries } => {
                    return if *h == hash {
                        entries.iter().find(|(k, _)| matches(k)).map(|(_, v)| v)
                    } else {
                        None
                    };
                }
                Node::Branch { bitmap, children } => {
                    let bit = level_bit(hash, shift);
                    if bitmap & bit == 0 {
                        return None;
                    }
                    node = &children[sparse_index(*bitmap, bit)];
                    shift += HASH_BITS;
                }
            }
        }
    }

    /// Insert, update or remove the entry stored under `hash`.
    ///
    /// `f` receives the current entry, or `None` if the key is absent,
    /// and returns the new entry, or `None` for removal. Only the path
    /// from the root to the touched slot is rebuilt; every sibling
    /// subtree is shared with `self`, which stays fully usable.
    pub fn alter_with_hash<M, F>(&self, hash: u64, matches: M, f: F) -> Hamt<K, V>
    where
        M: Fn(&K) -> bool,
        F: FnOnce(Option<(&K, &V)>) -> Option<(K, V)>,
    {
        match alter_node(self.root.as_ref(), 0, hash, &matches, f) {
            Change::Unchanged => self.clone(),
            Change::Updated(node) => Hamt {
                root: Some(node),
                len: self.len,
            },
            Change::Inserted(node) => Hamt {
                root: Some(node),
                len: self.len + 1,
            },
            Change::Removed(node) => Hamt {
                root: node,
                len: self.len - 1,
            },
        }
    }

    /// Call `f` on every entry, in no particular order.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        fn walk<K, V, F: FnMut(&K, &V)>(node: &Node<K, V>, f: &mut F) {
            match node {
                Node::Leaf { entries, .. } => {
                    for (k, v) in entries {
                        f(k, v);
                    }
                }
                Node::Branch { children, .. } => {
                    for child in children {
                        walk(child, f);
                    }
                }
            }
        }

        if let Some(ref root) = self.root {
            walk(root, &mut f);
        }
    }
}

/// The occupancy bit of `hash` at trie depth `shift`.
fn level_bit(hash: u64, shift: u32) -> u32 {
    1 << ((hash >> shift) & LEVEL_MASK)
}

/// Position of `bit`'s child within the sparse child vector.
fn sparse_index(bitmap: u32, bit: u32) -> usize {
    (bitmap & (bit - 1)).count_ones() as usize
}

/// Build the smallest subtree holding two leaves with distinct hashes.
///
/// Descends shared hash prefixes until the two chunks differ. The hashes
/// are known to be unequal, so the loop terminates before the hash runs
/// out of bits.
fn join_leaves<K, V>(
    shift: u32,
    a: Arc<Node<K, V>>,
    hash_a: u64,
    b: Arc<Node<K, V>>,
    hash_b: u64,
) -> Arc<Node<K, V>> {
    let bit_a = level_bit(hash_a, shift);
    let bit_b = level_bit(hash_b, shift);

    if bit_a == bit_b {
        let child = join_leaves(shift + HASH_BITS, a, hash_a, b, hash_b);
        return Arc::new(Node::Branch {
            bitmap: bit_a,
            children: vec![child],
        });
    }

    let children = if bit_a < bit_b { vec![a, b] } else { vec![b, a] };
    Arc::new(Node::Branch {
        bitmap: bit_a | bit_b,
        children,
    })
}

fn alter_node<K, V, M, F>(
    node: Option<&Arc<Node<K, V>>>,
    shift: u32,
    hash: u64,
    matches: &M,
    f: F,
) -> Change<K, V>
where
    K: Clone,
    V: Clone,
    M: Fn(&K) -> bool,
    F: FnOnce(Option<(&K, &V)>) -> Option<(K, V)>,
{
    let node = match node {
        None => {
            // Empty slot. Only an insertion changes anything.
            return match f(None) {
                Some((k, v)) => Change::Inserted(Arc::new(Node::Leaf {
                    hash,
                    entries: vec![(k, v)],
                })),
                None => Change::Unchanged,
            };
        }
        Some(node) => node,
    };

    match **node {
        Node::Leaf {
            hash: leaf_hash,
            ref entries,
        } => {
            if leaf_hash == hash {
                // The slot for this hash. Find the entry among possible
                // collisions.
                match entries.iter().position(|(k, _)| matches(k)) {
                    Some(at) => {
                        let (ref k, ref v) = entries[at];
                        match f(Some((k, v))) {
                            Some(entry) => {
                                let mut entries = entries.clone();
                                entries[at] = entry;
                                Change::Updated(Arc::new(Node::Leaf { hash, entries }))
                            }
                            None if entries.len() == 1 => Change::Removed(None),
                            None => {
                                let mut entries = entries.clone();
                                entries.remove(at);
                                Change::Removed(Some(Arc::new(Node::Leaf { hash, entries })))
                            }
                        }
                    }
                    None => match f(None) {
                        Some(entry) => {
                            // A genuine hash collision.
                            let mut entries = entries.clone();
                            entries.push(entry);
                            Change::Inserted(Arc::new(Node::Leaf { hash, entries }))
                        }
                        None => Change::Unchanged,
                    },
                }
            } else {
                // A different key's leaf sits on our path.
                match f(None) {
                    Some((k, v)) => {
                        let new_leaf = Arc::new(Node::Leaf {
                            hash,
                            entries: vec![(k, v)],
                        });
                        Change::Inserted(join_leaves(
                            shift,
                            node.clone(),
                            leaf_hash,
                            new_leaf,
                            hash,
                        ))
                    }
                    None => Change::Unchanged,
                }
            }
        }

        Node::Branch {
            bitmap,
            ref children,
        } => {
            let bit = level_bit(hash, shift);
            let pos = sparse_index(bitmap, bit);
            let child = if bitmap & bit == 0 {
                None
            } else {
                Some(&children[pos])
            };

            match alter_node(child, shift + HASH_BITS, hash, matches, f) {
                Change::Unchanged => Change::Unchanged,

                Change::Updated(new_child) => {
                    let mut children = children.clone();
                    children[pos] = new_child;
                    Change::Updated(Arc::new(Node::Branch { bitmap, children }))
                }

                Change::Inserted(new_child) => {
                    let mut children = children.clone();
                    let bitmap = if bitmap & bit == 0 {
                        children.insert(pos, new_child);
                        bitmap | bit
                    } else {
                        children[pos] = new_child;
                        bitmap
                    };
                    Change::Inserted(Arc::new(Node::Branch { bitmap, children }))
                }

                Change::Removed(None) => {
                    if children.len() == 1 {
                        // The last child vanished, so does this branch.
                        return Change::Removed(None);
                    }
                    let mut children = children.clone();
                    children.remove(pos);
                    let bitmap = bitmap & !bit;

                    // A branch left with a single leaf collapses into it,
                    // keeping the trie shallow after removals.
                    if children.len() == 1 {
                        if let Node::Leaf { .. } = *children[0] {
                            return Change::Removed(Some(children.pop().unwrap()));
                        }
                    }
                    Change::Removed(Some(Arc::new(Node::Branch { bitmap, children })))
                }

                Change::Removed(Some(new_child)) => {
                    let mut children = children.clone();
                    children[pos] = new_child;
                    Change::Removed(Some(Arc::new(Node::Branch { bitmap, children })))
                }
            }
        }
    }
}
