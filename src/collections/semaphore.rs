// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::{guard, StmResult, TVar, Transaction};

/// `Semaphore` is an implementation of semaphores on top of software
/// transactional memory.
///
/// This is a very simple datastructure and serves as a simple thread
/// synchronization primitive. Unlike an OS semaphore, acquiring and
/// releasing composes with any other transactional operation.
#[derive(Clone, Debug)]
pub struct Semaphore {
    /// Semaphores are internally just a number.
    num: TVar<u32>,
}

impl Semaphore {
    /// Create a new semaphore with `n` initial tokens.
    pub fn new(n: u32) -> Semaphore {
        Semaphore { num: TVar::new(n) }
    }

    /// Number of currently available tokens.
    pub fn available(&self, tx: &mut Transaction) -> StmResult<u32> {
        self.num.read(tx)
    }

    /// Take a token from the semaphore, or retry until one is left.
    pub fn acquire(&self, tx: &mut Transaction) -> StmResult<()> {
        let n = self.num.read(tx)?;
        guard(n != 0)?;
        self.num.write(tx, n - 1)
    }

    /// Take a token if one is left.
    pub fn try_acquire(&self, tx: &mut Transaction) -> StmResult<bool> {
        let n = self.num.read(tx)?;
        if n == 0 {
            Ok(false)
        } else {
            self.num.write(tx, n - 1)?;
            Ok(true)
        }
    }

    /// Free a token.
    pub fn release(&self, tx: &mut Transaction) -> StmResult<()> {
        self.num.modify(tx, |n| n + 1)
    }
}
