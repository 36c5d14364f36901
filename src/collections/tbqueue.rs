// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::any::Any;

use super::TQueue;
use crate::{guard, StmResult, TVar, Transaction};

/// Bounded transactional FIFO queue.
///
/// A composition of the unbounded `TQueue` with a capacity var. Writes
/// retry while the queue is full, reads free up capacity. Either both
/// steps of an operation commit or neither does, so the capacity can
/// never drift out of sync with the queue.
#[derive(Clone)]
pub struct TBQueue<T> {
    /// Remaining free slots.
    capacity: TVar<u32>,
    queue: TQueue<T>,
}

impl<T> TBQueue<T>
where
    T: Any + Sync + Send + Clone,
{
    /// Create an empty `TBQueue` with room for `capacity` elements.
    pub fn new(capacity: u32) -> TBQueue<T> {
        TBQueue {
            capacity: TVar::new(capacity),
            queue: TQueue::new(),
        }
    }

    /// Push to the end of the queue, or retry until a slot is free.
    pub fn write(&self, transaction: &mut Transaction, value: T) -> StmResult<()> {
        let capacity = self.capacity.read(transaction)?;
        guard(capacity > 0)?;
        self.capacity.write(transaction, capacity - 1)?;

        self.queue.write(transaction, value)
    }

    /// Pop the head of the queue, or retry until there is an element.
    pub fn read(&self, transaction: &mut Transaction) -> StmResult<T> {
        self.capacity.modify(transaction, |c| c + 1)?;
        self.queue.read(transaction)
    }

    /// Pop the head of the queue, or return `None` if it is empty.
    pub fn try_read(&self, transaction: &mut Transaction) -> StmResult<Option<T>> {
        let value = self.queue.try_read(transaction)?;
        if value.is_some() {
            self.capacity.modify(transaction, |c| c + 1)?;
        }
        Ok(value)
    }

    /// Check if the queue holds no elements.
    pub fn is_empty(&self, transaction: &mut Transaction) -> StmResult<bool> {
        self.queue.is_empty(transaction)
    }
}
