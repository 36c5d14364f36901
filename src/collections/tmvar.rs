// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::any::Any;

use crate::{retry, StmResult, TVar, Transaction};

/// A mutable slot that is either empty or full.
///
/// `take` on an empty and `put` on a full `TMVar` retry until another
/// transaction fills or empties the slot. The `try_*` variants return
/// instead of blocking. Useful as a hand-off point between threads.
#[derive(Clone)]
pub struct TMVar<T> {
    var: TVar<Option<T>>,
}

impl<T> TMVar<T>
where
    T: Any + Sync + Send + Clone,
{
    /// Create a new filled `TMVar`.
    pub fn new(value: T) -> TMVar<T> {
        TMVar {
            var: TVar::new(Some(value)),
        }
    }

    /// Create a new empty `TMVar`.
    pub fn new_empty() -> TMVar<T> {
        TMVar {
            var: TVar::new(None),
        }
    }

    /// Take the value out, leaving the slot empty. Retries while empty.
    pub fn take(&self, transaction: &mut Transaction) -> StmResult<T> {
        match self.var.replace(transaction, None)? {
            Some(value) => Ok(value),
            None => retry(),
        }
    }

    /// Fill the slot. Retries while it is already full.
    pub fn put(&self, transaction: &mut Transaction, value: T) -> StmResult<()> {
        match self.var.read(transaction)? {
            Some(_) => retry(),
            None => self.var.write(transaction, Some(value)),
        }
    }

    /// Read the value without taking it out. Retries while empty.
    pub fn read(&self, transaction: &mut Transaction) -> StmResult<T> {
        match self.var.read(transaction)? {
            Some(value) => Ok(value),
            None => retry(),
        }
    }

    /// Take the value, or return `None` if the slot is empty.
    pub fn try_take(&self, transaction: &mut Transaction) -> StmResult<Option<T>> {
        let value = self.var.read(transaction)?;
        if value.is_some() {
            self.var.write(transaction, None)?;
        }
        Ok(value)
    }

    /// Fill the slot, or return `false` if it is already full.
    pub fn try_put(&self, transaction: &mut Transaction, value: T) -> StmResult<bool> {
        match self.var.read(transaction)? {
            Some(_) => Ok(false),
            None => {
                self.var.write(transaction, Some(value))?;
                Ok(true)
            }
        }
    }

    /// Read the value, or return `None` if the slot is empty.
    pub fn try_read(&self, transaction: &mut Transaction) -> StmResult<Option<T>> {
        self.var.read(transaction)
    }

    /// Check if the slot is empty.
    pub fn is_empty(&self, transaction: &mut Transaction) -> StmResult<bool> {
        Ok(self.var.read(transaction)?.is_none())
    }

    /// Exchange the content for a new value, returning the old one.
    /// Retries while the slot is empty.
    pub fn swap(&self, transaction: &mut Transaction, value: T) -> StmResult<T> {
        match self.var.replace(transaction, Some(value))? {
            Some(old) => Ok(old),
            None => retry(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::atomically;
    use crate::test;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn take_put_round_trip() {
        let mvar = TMVar::new(42);

        let x = atomically(|tx| mvar.take(tx));
        assert_eq!(42, x);

        atomically(|tx| mvar.put(tx, 31));
        let y = atomically(|tx| mvar.read(tx));
        assert_eq!(31, y);
    }

    #[test]
    fn take_empty_blocks() {
        let mvar = TMVar::<i32>::new_empty();

        let terminated = test::terminates(300, move || {
            atomically(|tx| mvar.take(tx));
        });
        assert!(!terminated);
    }

    #[test]
    fn put_full_blocks() {
        let mvar = TMVar::new(1);

        let terminated = test::terminates(300, move || {
            atomically(|tx| mvar.put(tx, 2));
        });
        assert!(!terminated);
    }

    #[test]
    fn try_variants() {
        let mvar = TMVar::<i32>::new_empty();

        let (a, b, c, d) = atomically(|tx| {
            let a = mvar.try_take(tx)?;
            let b = mvar.try_put(tx, 1)?;
            let c = mvar.try_put(tx, 2)?;
            let d = mvar.try_read(tx)?;
            Ok((a, b, c, d))
        });

        assert_eq!(a, None);
        assert!(b);
        assert!(!c);
        assert_eq!(d, Some(1));
    }

    #[test]
    fn swap_exchanges() {
        let mvar = TMVar::new(1);
        let old = atomically(|tx| mvar.swap(tx, 2));
        assert_eq!(old, 1);
        assert_eq!(atomically(|tx| mvar.read(tx)), 2);
    }

    /// A handoff between two threads wakes the blocked taker.
    #[test]
    fn threaded_handoff() {
        let mvar1 = TMVar::<i32>::new_empty();
        let mvar2 = mvar1.clone();

        let x = test::run_async(
            500,
            move || atomically(|tx| mvar2.take(tx)),
            move || {
                thread::sleep(Duration::from_millis(100));
                atomically(|tx| mvar1.put(tx, 42));
            },
        )
        .unwrap();

        assert_eq!(42, x);
    }
}
