// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::any::Any;

use crate::{retry, StmResult, TVar, Transaction};

/// Unbounded transactional FIFO queue.
///
/// The queue writes to one vector and reads from the other until the
/// read vector becomes empty and the two need to be swapped. That way
/// reads don't conflict with writes most of the time and both have an
/// amortised cost of O(1).
#[derive(Clone)]
pub struct TQueue<T> {
    /// Elements to pop, stored in reverse order.
    read: TVar<Vec<T>>,
    /// Elements pushed since the last swap, in insertion order.
    write: TVar<Vec<T>>,
}

impl<T> TQueue<T>
where
    T: Any + Sync + Send + Clone,
{
    /// Create an empty `TQueue`.
    pub fn new() -> TQueue<T> {
        TQueue {
            read: TVar::new(Vec::new()),
            write: TVar::new(Vec::new()),
        }
    }

    /// Push to the end of the queue.
    pub fn write(&self, transaction: &mut Transaction, value: T) -> StmResult<()> {
        let mut v = self.write.read(transaction)?;
        v.push(value);
        self.write.write(transaction, v)
    }

    /// Pop the head of the queue, or retry until there is an element.
    pub fn read(&self, transaction: &mut Transaction) -> StmResult<T> {
        match self.try_read(transaction)? {
            Some(value) => Ok(value),
            None => retry(),
        }
    }

    /// Pop the head of the queue, or return `None` if it is empty.
    pub fn try_read(&self, transaction: &mut Transaction) -> StmResult<Option<T>> {
        let mut rv = self.read.read(transaction)?;
        match rv.pop() {
            Some(value) => {
                self.read.write(transaction, rv)?;
                Ok(Some(value))
            }
            None => {
                let mut wv = self.write.read(transaction)?;
                if wv.is_empty() {
                    Ok(None)
                } else {
                    wv.reverse();
                    let value = wv.pop().unwrap();
                    self.read.write(transaction, wv)?;
                    self.write.write(transaction, Vec::new())?;
                    Ok(Some(value))
                }
            }
        }
    }

    /// Read the head of the queue without removing it, or retry until
    /// there is an element.
    pub fn peek(&self, transaction: &mut Transaction) -> StmResult<T> {
        match self.try_peek(transaction)? {
            Some(value) => Ok(value),
            None => retry(),
        }
    }

    /// Read the head of the queue without removing it.
    pub fn try_peek(&self, transaction: &mut Transaction) -> StmResult<Option<T>> {
        let rv = self.read.read(transaction)?;
        if let Some(value) = rv.last() {
            return Ok(Some(value.clone()));
        }
        let wv = self.write.read(transaction)?;
        Ok(wv.first().cloned())
    }

    /// Take all elements out of the queue, in FIFO order.
    pub fn flush(&self, transaction: &mut Transaction) -> StmResult<Vec<T>> {
        let mut rv = self.read.read(transaction)?;
        let wv = self.write.read(transaction)?;

        rv.reverse();
        rv.extend(wv);

        if !rv.is_empty() {
            self.read.write(transaction, Vec::new())?;
            self.write.write(transaction, Vec::new())?;
        }
        Ok(rv)
    }

    /// Check if the queue holds no elements.
    pub fn is_empty(&self, transaction: &mut Transaction) -> StmResult<bool> {
        if self.read.read(transaction)?.is_empty() {
            Ok(self.write.read(transaction)?.is_empty())
        } else {
            Ok(false)
        }
    }

    /// Number of elements in the queue.
    pub fn size(&self, transaction: &mut Transaction) -> StmResult<usize> {
        let r = self.read.read(transaction)?.len();
        let w = self.write.read(transaction)?.len();
        Ok(r + w)
    }
}
