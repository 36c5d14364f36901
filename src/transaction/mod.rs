// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

pub mod control_block;
pub mod log_var;

use std::any::Any;
use std::cell::Cell;
use std::collections::btree_map::Entry::*;
use std::collections::BTreeMap;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use self::control_block::ControlBlock;
use self::log_var::LogVar;
use self::log_var::LogVar::*;
use super::result::StmError::*;
use super::result::*;
use super::tvar::{ArcAny, TVar, VarControlBlock};

thread_local!(static TRANSACTION_RUNNING: Cell<bool> = Cell::new(false));

/// Process wide counter for commit attempt owners.
///
/// A commit marks the lock sentinels it takes with this id, so that a
/// release through a stale reference can be detected.
static NEXT_TX_ID: AtomicU64 = AtomicU64::new(0);

/// `TransactionGuard` checks against nested STM calls.
///
/// Use guard, so that it correctly marks the Transaction as finished.
struct TransactionGuard;

impl TransactionGuard {
    pub fn new() -> TransactionGuard {
        TRANSACTION_RUNNING.with(|t| {
            assert!(!t.get(), "STM: Nested Transaction");
            t.set(true);
        });
        TransactionGuard
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        TRANSACTION_RUNNING.with(|t| {
            t.set(false);
        });
    }
}

/// Result of a `control` function of `Transaction::with_control`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionControl {
    Retry,
    Abort,
}

/// Transaction tracks all the read and written variables of one attempt.
///
/// It is used for checking vars, to ensure atomicity.
pub struct Transaction {
    /// Id marking the lock sentinels this transaction takes at commit time.
    id: u64,

    /// Map of all accessed vars mapping the `VarControlBlock` of a var
    /// to a `LogVar`.
    ///
    /// `VarControlBlock`s are ordered by their unique id. Iterating the
    /// map therefore visits the vars in ascending id order, which is the
    /// global lock acquisition order that prevents deadlocks on commit.
    vars: BTreeMap<Arc<VarControlBlock>, LogVar>,
}

impl Transaction {
    /// Create a new log.
    ///
    /// Normally you don't need to call this directly.
    /// Use `atomically` instead.
    fn new() -> Transaction {
        Transaction {
            id: NEXT_TX_ID.fetch_add(1, Ordering::Relaxed),
            vars: BTreeMap::new(),
        }
    }

    /// Run a function with a transaction.
    ///
    /// It is equivalent to `atomically`.
    pub fn with<T, F>(f: F) -> T
    where
        F: Fn(&mut Transaction) -> StmResult<T>,
    {
        match Transaction::with_control(|_| TransactionControl::Retry, f) {
            Some(t) => t,
            None => unreachable!(),
        }
    }

    /// Run a function with a transaction.
    ///
    /// `with_control` takes another control function, that
    /// can steer the control flow and possibly terminate early.
    ///
    /// `control` can react to counters, timeouts or external inputs.
    ///
    /// It allows the user to fall back to another strategy, like a global lock
    /// in the case of too much contention.
    ///
    /// Please note, that the transaction may still infinitely wait for changes when `retry` is
    /// called and `control` does not abort.
    /// If you need a timeout, another thread should signal this through a `TVar`.
    pub fn with_control<T, F, C>(mut control: C, f: F) -> Option<T>
    where
        F: Fn(&mut Transaction) -> StmResult<T>,
        C: FnMut(StmError) -> TransactionControl,
    {
        let _guard = TransactionGuard::new();

        let mut transaction = Transaction::new();

        // loop until success
        loop {
            // run the computation
            match f(&mut transaction) {
                // on success exit loop
                Ok(t) => {
                    if transaction.commit() {
                        return Some(t);
                    }
                }

                Err(e) => {
                    // Check if the user wants to abort the transaction.
                    if let TransactionControl::Abort = control(e) {
                        return None;
                    }

                    // on retry wait for changes
                    if let Retry = e {
                        transaction.wait_for_change();
                    }
                }
            }

            // clear log before retrying computation
            transaction.clear();
        }
    }

    /// Run a fallible function with a transaction.
    ///
    /// Conflicts and retries are handled as in `with`, but an `Abort`
    /// leaves the loop immediately and hands the error to the caller.
    /// None of the pending writes of the aborted attempt become visible.
    pub fn with_err<T, F>(f: F) -> Result<T, BoxedError>
    where
        F: Fn(&mut Transaction) -> StmDynResult<T>,
    {
        let _guard = TransactionGuard::new();

        let mut transaction = Transaction::new();

        loop {
            match f(&mut transaction) {
                Ok(t) => {
                    if transaction.commit() {
                        return Ok(t);
                    }
                }

                // Conflict detected. Just run again.
                Err(StmDynError::Control(Failure)) => {}

                // Block until a read var changes.
                Err(StmDynError::Control(Retry)) => {
                    transaction.wait_for_change();
                }

                // Discard the attempt and surface the error.
                Err(StmDynError::Abort(e)) => {
                    return Err(e);
                }
            }

            transaction.clear();
        }
    }

    /// Perform a downcast on a var.
    fn downcast<T: Any + Clone>(var: Arc<dyn Any>) -> T {
        match var.downcast_ref::<T>() {
            Some(s) => s.clone(),
            None => unreachable!("TVar has wrong type"),
        }
    }

    /// Read a variable and return the value.
    ///
    /// The returned value is not always consistent with the current value of the var,
    /// but may be an outdated or not yet committed value.
    ///
    /// The used code should be capable of handling inconsistent states
    /// without running into infinite loops.
    /// Just the commit of wrong values is prevented by STM.
    pub fn read<T: Send + Sync + Any + Clone>(&mut self, var: &TVar<T>) -> StmResult<T> {
        let ctrl = var.control_block().clone();
        // Check if the same var was accessed before.
        let value = match self.vars.entry(ctrl) {
            // If the variable has been accessed before, then load that value.
            Occupied(mut entry) => entry.get_mut().read(),

            // Else load the variable from the shared cell.
            Vacant(entry) => {
                let value = var.read_ref_atomic();

                // Record the value as the baseline for the commit checks.
                entry.insert(Read(value.clone()));
                value
            }
        };

        Ok(Transaction::downcast(value))
    }

    /// Write a variable.
    ///
    /// The write is not immediately visible to other threads,
    /// but atomically committed at the end of the computation.
    pub fn write<T: Any + Send + Sync + Clone>(&mut self, var: &TVar<T>, value: T) -> StmResult<()> {
        // box the value
        let boxed = Arc::new(value);

        let ctrl = var.control_block().clone();
        // update or create new entry
        match self.vars.entry(ctrl) {
            Occupied(mut entry) => entry.get_mut().write(boxed),
            Vacant(entry) => {
                entry.insert(Write(boxed));
            }
        }

        Ok(())
    }

    /// Combine two calculations. When one blocks with `retry`,
    /// run the other, but don't commit the changes in the first.
    ///
    /// If both block, `Transaction::or` still waits for `TVar`s in both functions.
    /// Use `Transaction::or` instead of handling errors directly with the `Result::or`.
    /// The latter does not handle all the blocking correctly.
    pub fn or<T, F1, F2>(&mut self, first: F1, second: F2) -> StmResult<T>
    where
        F1: Fn(&mut Transaction) -> StmResult<T>,
        F2: Fn(&mut Transaction) -> StmResult<T>,
    {
        // Create a backup of the log.
        let mut copy = Transaction {
            id: self.id,
            vars: self.vars.clone(),
        };

        // Run the first computation.
        let f = first(self);

        match f {
            // Run other on manual retry call.
            Err(Retry) => {
                // swap, so that self is the current run
                mem::swap(self, &mut copy);

                // Run other action.
                let s = second(self);

                // If the second one fails, there is no need to remember
                // the first branch's reads.
                match s {
                    Err(Failure) => Err(Failure),
                    s => {
                        self.combine(copy);
                        s
                    }
                }
            }

            // Return success and failure directly
            x => x,
        }
    }

    /// Run a fallible branch `f` and recover from an `Abort` with `on_error`.
    ///
    /// No write of `f` reaches a var before commit, so on failure the
    /// pending writes of `f` are simply discarded and `on_error` runs
    /// against the state from before the branch. A plain `try`/`catch`
    /// around direct mutation could not roll back like this.
    ///
    /// Control flow errors (`Failure`, `Retry`) are not caught. They are
    /// handled by the transaction runner.
    pub fn catch<T, F1, F2>(&mut self, f: F1, on_error: F2) -> StmDynResult<T>
    where
        F1: Fn(&mut Transaction) -> StmDynResult<T>,
        F2: Fn(&mut Transaction, BoxedError) -> StmDynResult<T>,
    {
        // Create a backup of the log.
        let mut copy = Transaction {
            id: self.id,
            vars: self.vars.clone(),
        };

        match f(self) {
            Err(StmDynError::Abort(e)) => {
                // Throw away everything the failed branch did.
                mem::swap(self, &mut copy);
                on_error(self, e)
            }
            x => x,
        }
    }

    /// Combine two logs into a single log, to allow waiting for all reads.
    fn combine(&mut self, other: Transaction) {
        // combine reads
        for (var, value) in other.vars {
            // only insert new values
            if let Some(value) = value.obsolete() {
                self.vars.entry(var).or_insert(value);
            }
        }
    }

    /// Clear the log's data.
    ///
    /// This should be used before redoing a computation, but
    /// nowhere else.
    fn clear(&mut self) {
        self.vars.clear();
    }

    /// Wait for any variable to change,
    /// because the change may lead to a new calculation result.
    fn wait_for_change(&mut self) {
        // Create control block for waiting.
        let ctrl = Arc::new(ControlBlock::new());

        let vars = mem::replace(&mut self.vars, BTreeMap::new());
        let mut reads = Vec::with_capacity(vars.len());

        let blocking = vars
            .into_iter()
            .filter_map(|(a, b)| b.into_read_value().map(|b| (a, b)))
            // Check for consistency.
            .all(|(var, value)| {
                var.wait(&ctrl);
                let x = var.is_unchanged(&value);
                reads.push(var);
                x
            });

        // If no var has changed, then block.
        if blocking {
            // Probably wait until one var has changed.
            ctrl.wait();
        }

        // Let others know that ctrl is dead.
        // It does not matter, if we set too many
        // to dead since it may slightly reduce performance
        // but not break the semantics.
        for var in &reads {
            var.set_dead();
        }
    }

    /// Write the log back to the variables.
    ///
    /// Return true for success and false, if a read var has changed.
    fn commit(&mut self) -> bool {
        // First phase: lock the write set.
        //
        // The log iterates in ascending var id order, so all committing
        // transactions take their locks in the same global order. A lock
        // taken on a var that was also read is conditioned on the var
        // still holding the recorded value.

        // Vars of the read set with their recorded baseline.
        let mut read_vec = Vec::with_capacity(self.vars.len());

        // Locked vars with their pending value.
        let mut write_vec: Vec<(&Arc<VarControlBlock>, ArcAny)> =
            Vec::with_capacity(self.vars.len());

        let mut success = true;

        'lock: for (var, value) in &self.vars {
            match *value {
                // Write without dependency on the original. Take the lock
                // whatever the cell holds.
                Write(ref w) | ReadObsoleteWrite(_, ref w) => {
                    var.lock(self.id);
                    write_vec.push((var, w.clone()));
                }

                // Lock, conditioned on the value recorded at read time.
                ReadWrite(ref original, ref w) => {
                    if !var.lock_if_eq(self.id, original) {
                        success = false;
                        break 'lock;
                    }
                    write_vec.push((var, w.clone()));
                }

                // Nothing to do. ReadObsolete is only needed for blocking,
                // not for consistency checks.
                ReadObsolete(_) => {}

                // Pure reads are validated in the second phase, without
                // ever locking them. This keeps read-only transactions
                // running in parallel with each other and with unrelated
                // writers.
                Read(ref original) => {
                    read_vec.push((var, original));
                }
            }
        }

        // Second phase: with the write set locked, check every read for
        // consistency. A cell that is locked by another commit counts as
        // changed, so validation never waits.
        success = success
            && read_vec
                .iter()
                .all(|&(var, original)| var.is_unchanged(original));

        if !success {
            // Restore the original values of all locks taken so far.
            for (var, _) in write_vec {
                var.release_aborted(self.id);
            }
            return false;
        }

        // Third phase: publish the pending values and wake the waiters.
        for &(var, ref w) in &write_vec {
            var.release(self.id, w.clone());
        }

        for &(var, _) in &write_vec {
            // Unblock all threads waiting for it.
            var.wake_all();
        }

        // Commit succeeded.
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::result::StmDynError;

    #[test]
    fn read() {
        let mut log = Transaction::new();
        let var = TVar::new(vec![1, 2, 3, 4]);

        // The variable can be read.
        assert_eq!(&*log.read(&var).unwrap(), &[1, 2, 3, 4]);
    }

    #[test]
    fn write_read() {
        let mut log = Transaction::new();
        let var = TVar::new(vec![1, 2]);

        log.write(&var, vec![1, 2, 3, 4]).unwrap();

        // Consecutive reads get the updated version.
        assert_eq!(log.read(&var).unwrap(), [1, 2, 3, 4]);

        // The original value is still preserved.
        assert_eq!(var.read_atomic(), [1, 2]);
    }

    #[test]
    fn transaction_simple() {
        let x = Transaction::with(|_| Ok(42));
        assert_eq!(x, 42);
    }

    #[test]
    fn transaction_read() {
        let read = TVar::new(42);

        let x = Transaction::with(|trans| read.read(trans));

        assert_eq!(x, 42);
    }

    /// Run a transaction with a control function, that always aborts.
    /// The transaction still tries to run a single time and should successfully
    /// commit in this test.
    #[test]
    fn transaction_with_control_abort_on_single_run() {
        let read = TVar::new(42);

        let x = Transaction::with_control(|_| TransactionControl::Abort, |tx| read.read(tx));

        assert_eq!(x, Some(42));
    }

    /// Run a transaction with a control function, that always aborts.
    /// The transaction retries infinitely often. The control function will abort this loop.
    #[test]
    fn transaction_with_control_abort_on_retry() {
        let x: Option<i32> = Transaction::with_control(|_| TransactionControl::Abort, |_| Err(Retry));

        assert_eq!(x, None);
    }

    #[test]
    fn transaction_write() {
        let write = TVar::new(42);

        Transaction::with(|trans| write.write(trans, 0));

        assert_eq!(write.read_atomic(), 0);
    }

    #[test]
    fn transaction_copy() {
        let read = TVar::new(42);
        let write = TVar::new(0);

        Transaction::with(|trans| {
            let r = read.read(trans)?;
            write.write(trans, r)
        });

        assert_eq!(write.read_atomic(), 42);
    }

    /// Test if nested transactions are correctly detected.
    #[test]
    #[should_panic]
    fn transaction_nested_fail() {
        Transaction::with(|_| {
            Transaction::with(|_| Ok(42));
            Ok(1)
        });
    }

    /// An aborted run must not commit any writes.
    #[test]
    fn transaction_with_err_abort_discards_writes() {
        use std::io::{Error, ErrorKind};

        let var = TVar::new(42);
        let varc = var.clone();

        let x: Result<i32, BoxedError> = Transaction::with_err(move |tx| {
            varc.write(tx, 0)?;
            Err(StmDynError::Abort(Box::new(Error::new(
                ErrorKind::Other,
                "boom",
            ))))
        });

        assert!(x.is_err());
        assert_eq!(var.read_atomic(), 42);
    }

    /// A successful fallible run commits as usual.
    #[test]
    fn transaction_with_err_commits() {
        let var = TVar::new(0);
        let varc = var.clone();

        let x: Result<i32, BoxedError> = Transaction::with_err(move |tx| {
            varc.write(tx, 42)?;
            Ok(1)
        });

        assert_eq!(x.unwrap(), 1);
        assert_eq!(var.read_atomic(), 42);
    }
}
