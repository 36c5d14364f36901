// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::any::Any;
use std::hash::Hash;

use super::TMap;
use crate::{StmResult, Transaction};

/// A transactional hash set.
///
/// Internally a `TMap` with unit values, sharing all of its properties:
/// one persistent trie in one var, snapshot reads, no per-element
/// locking.
#[derive(Clone)]
pub struct TSet<T> {
    map: TMap<T, ()>,
}

impl<T> TSet<T>
where
    T: Any + Send + Sync + Clone + Hash + Eq,
{
    /// Create an empty `TSet`.
    pub fn new() -> TSet<T> {
        TSet { map: TMap::new() }
    }

    /// Check if a value is in the set.
    pub fn member(&self, transaction: &mut Transaction, value: &T) -> StmResult<bool> {
        self.map.member(transaction, value)
    }

    /// Add a value to the set.
    pub fn insert(&self, transaction: &mut Transaction, value: T) -> StmResult<()> {
        self.map.insert(transaction, value, ())
    }

    /// Remove a value from the set. Does nothing for a missing value.
    pub fn remove(&self, transaction: &mut Transaction, value: &T) -> StmResult<()> {
        self.map.remove(transaction, value)
    }

    /// Number of elements in the set.
    pub fn size(&self, transaction: &mut Transaction) -> StmResult<usize> {
        self.map.size(transaction)
    }
}
