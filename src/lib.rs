// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! This library implements
//! [software transactional memory](https://en.wikipedia.org/wiki/Software_transactional_memory),
//! often abbreviated with STM.
//!
//! It is designed closely to haskells STM library. Read Simon Marlow's
//! *Parallel and Concurrent Programming in Haskell*
//! for more info. Especially the chapter about
//! Performance is also important for using STM in rust.
//!
//! With locks the sequential composition of two
//! threadsafe actions is no longer threadsafe because
//! other threads may interfer in between of these actions.
//! Applying a third lock to protect both may lead to common sources of errors
//! like deadlocks or race conditions.
//!
//! Unlike locks Software transactional memory is composable.
//! It is typically implemented by writing all read and write
//! operations in a log. When the action has finished and
//! all the used `TVar`s are consistent, the writes are commited as
//! a single atomic operation.
//! Otherwise the computation repeats. This may lead to starvation,
//! but avoids common sources of bugs.
//!
//! The commit itself never takes a global lock. Every var carries a
//! unique id, write sets are locked in ascending id order and reads are
//! validated by comparison only, so read-only transactions run fully in
//! parallel with each other and with unrelated writers.
//!
//! Panicing within STM does not poison the `TVar`s. STM ensures consistency by
//! never committing on panic.
//!
//! # Usage
//!
//! You should only use the functions that are transaction-safe.
//! Transaction-safe functions don't have side effects, except those provided by `TVar`.
//! Mutexes and other blocking mechanisms are especially dangerous, because they can
//! interfere with the internal locking scheme of the transaction and therefore
//! cause deadlocks.
//!
//! Note, that Transaction-safety does *not* mean safety in the rust sense, but is a
//! subset of allowed behavior. Even if code is not transaction-safe, no segmentation
//! faults will happen.
//!
//! You can run the top-level atomic operation by calling `atomically`.
//!
//!
//! ```
//! # use stm::atomically;
//! atomically(|trans| {
//!     // some action
//!     // return value as `Result`, for example
//!     Ok(42)
//! });
//! ```
//!
//! Nested calls to `atomically` are not allowed. A run-time check prevents this.
//! Instead of using atomically internally, add a `&mut Transaction` parameter and
//! return `StmResult`.
//!
//! Use ? on `StmResult`, to propagate a transaction error through the system.
//! Do not handle the error yourself.
//!
//! ```
//! # use stm::{atomically, TVar};
//! let var = TVar::new(0);
//!
//! let x = atomically(|trans| {
//!     var.write(trans, 42)?; // Pass failure to parent.
//!     var.read(trans) // Return the value saved in var.
//! });
//!
//! println!("var = {}", x);
//! // var = 42
//!
//! ```
//!
//! # Transaction safety
//!
//! Software transactional memory is completely safe in the rust sense, so
//! undefined behavior will never occur.
//! Still there are multiple rules that
//! you should obey when dealing with software transactional memory.
//!
//! * Don't run code with side effects, especially no IO-code.
//! Transactions repeat in failure cases. Using IO would repeat this IO-code.
//! Return a closure if you have to.
//! * Don't handle `StmResult` yourself.
//! Use `Transaction::or` to combine alternative paths and `optionally` to check if an inner
//! function has failed. Always use `?` and
//! never ignore a `StmResult`.
//! * Don't run `atomically` inside of another. `atomically` is designed to have side effects
//! and will therefore break transaction safety.
//! Nested calls are detected at runtime and handled with panicking.
//! When you use STM in the inner of a function, then
//! express it in the public interface, by taking `&mut Transaction` as parameter and
//! returning `StmResult<T>`. Callers can safely compose it into
//! larger blocks.
//! * Don't mix locks and transactions. Your code will easily deadlock or slow
//! down unpredictably.
//! * Don't use inner mutability to change the content of a `TVar`.
//!
//! Panicking in a transaction is transaction-safe. The transaction aborts and
//! all changes are discarded. No poisoning or half written transactions happen.
//!
//! # Speed
//!
//! Generally keep your atomic blocks as small as possible, because
//! the more time you spend, the more likely it is, to collide with
//! other threads. For STM, reading `TVar`s is quite slow, because it
//! needs to look them up in the log every time.
//! Every used `TVar` increases the chance of collisions. Therefore you should
//! keep the amount of accessed variables as low as needed.
//!

pub mod collections;
pub mod hamt;
mod result;
mod transaction;
mod tvar;


pub use crate::result::*;
pub use crate::transaction::Transaction;
pub use crate::transaction::TransactionControl;
pub use crate::tvar::TVar;

use std::error::Error;

#[inline]
/// Call `retry` to abort an operation and run the whole transaction again.
///
/// Semantically `retry` allows spin-lock-like behavior, but the library
/// blocks until one of the used `TVar`s has changed, to keep CPU-usage low.
///
/// `Transaction::or` allows to define alternatives. If the first function
/// wants to retry, then the second one has a chance to run.
///
/// # Examples
///
/// ```no_run
/// # use stm::*;
/// let infinite_retry: i32 = atomically(|_| retry());
/// ```
pub fn retry<T>() -> StmResult<T> {
    Err(StmError::Retry)
}

/// Abort the transaction with an error.
///
/// Only allowed within `atomically_or_err`, which passes the error on to
/// the caller. Nothing of the aborted attempt is committed.
///
/// # Examples
///
/// ```
/// # use stm::*;
/// # use std::io::{Error, ErrorKind};
/// let r: Result<i32, _> = atomically_or_err(|_| {
///     abort(Error::new(ErrorKind::Other, "out of luck"))
/// });
/// assert!(r.is_err());
/// ```
pub fn abort<T, E>(e: E) -> StmDynResult<T>
where
    E: Error + Send + Sync + 'static,
{
    Err(StmDynError::Abort(Box::new(e)))
}

/// Run a function atomically by using Software Transactional Memory.
/// It calls to `Transaction::with` internally, but is more explicit.
pub fn atomically<T, F>(f: F) -> T
where
    F: Fn(&mut Transaction) -> StmResult<T>,
{
    Transaction::with(f)
}

/// Run a fallible function atomically.
///
/// Like `atomically`, but the transaction may additionally end with
/// `abort`, which hands the error to the caller. Pair with
/// `Transaction::catch` to recover from an abort within the transaction.
pub fn atomically_or_err<T, F>(f: F) -> Result<T, BoxedError>
where
    F: Fn(&mut Transaction) -> StmDynResult<T>,
{
    Transaction::with_err(f)
}

#[inline]
/// Unwrap `Option` or call retry if it is `None`.
///
/// `optionally` is the inverse of `unwrap_or_retry`.
///
/// # Example
///
/// ```
/// # use stm::*;
/// let x = TVar::new(Some(42));
///
/// atomically(|tx| {
///         let inner = unwrap_or_retry(x.read(tx)?)?;
///         assert_eq!(inner, 42); // inner is always 42.
///         Ok(inner)
///     }
/// );
/// ```
pub fn unwrap_or_retry<T>(option: Option<T>) -> StmResult<T> {
    match option {
        Some(x) => Ok(x),
        None => retry(),
    }
}

#[inline]
/// Retry until `cond` is true.
///
/// # Example
///
/// ```
/// # use stm::*;
/// let var = TVar::new(42);
///
/// let x = atomically(|tx| {
///     let v = var.read(tx)?;
///     guard(v==42)?;
///     // v is now always 42.
///     Ok(v)
/// });
/// assert_eq!(x, 42);
/// ```
pub fn guard(cond: bool) -> StmResult<()> {
    if cond {
        Ok(())
    } else {
        retry()
    }
}

#[inline]
/// Optionally run a transaction `f`. If `f` fails with a `retry()`, it does
/// not cancel the whole transaction, but returns `None`.
///
/// Note that `optionally` does not always recover the function, if
/// inconsistencies where found.
///
/// `unwrap_or_retry` is the inverse of `optionally`.
///
/// # Example
///
/// ```
/// # use stm::*;
/// let x:Option<i32> = atomically(|tx|
///     optionally(tx, |_| retry()));
/// assert_eq!(x, None);
/// ```
pub fn optionally<T, F>(tx: &mut Transaction, f: F) -> StmResult<Option<T>>
where
    F: Fn(&mut Transaction) -> StmResult<T>,
{
    tx.or(|t| f(t).map(Some), |_| Ok(None))
}

#[cfg(test)]
mod test_lib {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use thiserror::Error;

    #[derive(Error, Debug)]
    #[error("expected failure")]
    struct TestError;

    #[test]
    fn infinite_retry() {
        let terminated = test::terminates(300, || {
            let _infinite_retry: i32 = atomically(|_| retry());
        });
        assert!(!terminated);
    }

    #[test]
    fn stm_nested() {
        let var = TVar::new(0);

        let x = atomically(|tx| {
            var.write(tx, 42)?;
            var.read(tx)
        });

        assert_eq!(42, x);
    }

    /// Run multiple threads.
    ///
    /// Thread 1: Read a var, block until it is not 0 and then
    /// return that value.
    ///
    /// Thread 2: Wait a bit. Then write a value.
    ///
    /// Check if Thread 1 is woken up correctly and then check for
    /// correctness.
    #[test]
    fn threaded() {
        let var = TVar::new(0);
        // Clone for other thread.
        let varc = var.clone();

        let x = test::run_async(
            800,
            move || {
                atomically(|tx| {
                    let x = varc.read(tx)?;
                    if x == 0 {
                        retry()
                    } else {
                        Ok(x)
                    }
                })
            },
            || {
                thread::sleep(Duration::from_millis(100));

                atomically(|tx| var.write(tx, 42));
            },
        )
        .unwrap();

        assert_eq!(42, x);
    }

    /// test if a STM calculation is rerun when a Var changes while executing
    #[test]
    fn read_write_interfere() {
        // create var
        let var = TVar::new(0);
        let varc = var.clone(); // Clone for other thread.

        // spawn a thread
        let t = thread::spawn(move || {
            atomically(|tx| {
                // read the var
                let x = varc.read(tx)?;
                // ensure that var changes in between
                thread::sleep(Duration::from_millis(500));

                // write back modified data this should only
                // happen when the value has not changed
                varc.write(tx, x + 10)
            });
        });

        // ensure that the thread has started and already read the var
        thread::sleep(Duration::from_millis(100));

        // now change it
        atomically(|tx| var.write(tx, 32));

        // finish and compare
        let _ = t.join();
        assert_eq!(42, var.read_atomic());
    }

    /// The classic STM counter test: no increment is ever lost, no matter
    /// how the threads interleave.
    #[test]
    fn counter_increments_not_lost() {
        const THREADS: u32 = 4;
        const PER_THREAD: u32 = 250;

        let var = TVar::new(0u32);

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let var = var.clone();
                thread::spawn(move || {
                    for _ in 0..PER_THREAD {
                        atomically(|tx| var.modify(tx, |x| x + 1));
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(var.read_atomic(), THREADS * PER_THREAD);
    }

    /// Two transactions touching two vars in opposite orders must not
    /// deadlock, because commit locks are taken in var id order, not in
    /// access order.
    #[test]
    fn opposite_order_writes_make_progress() {
        let a = TVar::new(0u32);
        let b = TVar::new(0u32);
        let (a2, b2) = (a.clone(), b.clone());
        let (a3, b3) = (a.clone(), b.clone());

        let terminated = test::terminates(5000, move || {
            let t1 = thread::spawn(move || {
                for _ in 0..500 {
                    atomically(|tx| {
                        let x = a2.read(tx)?;
                        b2.write(tx, x + 1)
                    });
                }
            });
            let t2 = thread::spawn(move || {
                for _ in 0..500 {
                    atomically(|tx| {
                        let x = b3.read(tx)?;
                        a3.write(tx, x + 1)
                    });
                }
            });
            t1.join().unwrap();
            t2.join().unwrap();
        });

        assert!(terminated);
    }

    /// A transaction blocked on var `a` must sleep through writes to an
    /// unrelated var `b` and wake on a write to `a`.
    #[test]
    fn retry_wakes_only_on_relevant_change() {
        let a = TVar::new(0);
        let b = TVar::new(0);
        let ac = a.clone();

        let (done, check) = mpsc::channel();
        thread::spawn(move || {
            let x = atomically(|tx| {
                let x = ac.read(tx)?;
                guard(x != 0)?;
                Ok(x)
            });
            let _ = done.send(x);
        });

        // Let the other thread block on `a`.
        thread::sleep(Duration::from_millis(100));

        // An unrelated write must not wake it.
        atomically(|tx| b.write(tx, 1));
        thread::sleep(Duration::from_millis(200));
        assert!(check.try_recv().is_err());

        // A write to the dependency does.
        atomically(|tx| a.write(tx, 42));
        let x = check.recv_timeout(Duration::from_millis(2000)).unwrap();
        assert_eq!(x, 42);
    }

    #[test]
    fn or_simple() {
        let var = TVar::new(42);

        let x = atomically(|tx| tx.or(|_| retry(), |tx| var.read(tx)));

        assert_eq!(x, 42);
    }

    /// A variable should not be written,
    /// when another branch was taken
    #[test]
    fn or_nocommit() {
        let var = TVar::new(42);

        let x = atomically(|tx| {
            tx.or(
                |tx| {
                    var.write(tx, 23)?;
                    retry()
                },
                |tx| var.read(tx),
            )
        });

        assert_eq!(x, 42);
    }

    /// The first branch wins without running the second.
    #[test]
    fn or_left_biased() {
        let var = TVar::new(42);

        let x = atomically(|tx| {
            tx.or(
                |_| Ok(1),
                |tx| {
                    var.write(tx, 23)?;
                    Ok(2)
                },
            )
        });

        assert_eq!(x, 1);
        // The second branch never ran, so nothing was written.
        assert_eq!(var.read_atomic(), 42);
    }

    #[test]
    fn or_nested_first() {
        let var = TVar::new(42);

        let x = atomically(|tx| {
            tx.or(
                |tx| tx.or(|_| retry(), |_| retry()),
                |tx| var.read(tx),
            )
        });

        assert_eq!(x, 42);
    }

    #[test]
    fn or_nested_second() {
        let var = TVar::new(42);

        let x = atomically(|tx| {
            tx.or(
                |_| retry(),
                |t| t.or(|t2| var.read(t2), |_| retry()),
            )
        });

        assert_eq!(x, 42);
    }

    /// A blocked `or` wakes up on writes to vars of either branch.
    #[test]
    fn or_waits_on_both_branches() {
        let a = TVar::new(0);
        let b = TVar::new(0);
        let (ac, bc) = (a.clone(), b.clone());

        let x = test::run_async(
            800,
            move || {
                atomically(|tx| {
                    tx.or(
                        |tx| {
                            let x = ac.read(tx)?;
                            guard(x != 0)?;
                            Ok(x)
                        },
                        |tx| {
                            let x = bc.read(tx)?;
                            guard(x != 0)?;
                            Ok(x)
                        },
                    )
                })
            },
            || {
                thread::sleep(Duration::from_millis(100));
                // Write only to the second branch's var.
                atomically(|tx| b.write(tx, 42));
            },
        )
        .unwrap();

        assert_eq!(x, 42);
    }

    /// `catch` discards the pending writes of the failed branch and runs
    /// the handler against the state from before the branch.
    #[test]
    fn catch_rolls_back_writes() {
        let var = TVar::new(42);
        let varc = var.clone();

        let x = atomically_or_err(move |tx| {
            tx.catch(
                |tx| {
                    varc.write(tx, 23)?;
                    abort(TestError)
                },
                |tx, _err| varc.read(tx).map_err(Into::into),
            )
        })
        .unwrap();

        // The handler already saw the old value again.
        assert_eq!(x, 42);
        // And nothing of the failed branch was committed.
        assert_eq!(var.read_atomic(), 42);
    }

    /// A successful first branch passes `catch` through untouched.
    #[test]
    fn catch_success_commits() {
        let var = TVar::new(0);
        let varc = var.clone();

        let x = atomically_or_err(move |tx| {
            tx.catch(
                |tx| {
                    varc.write(tx, 42)?;
                    Ok(1)
                },
                |_, _err| Ok(2),
            )
        })
        .unwrap();

        assert_eq!(x, 1);
        assert_eq!(var.read_atomic(), 42);
    }

    /// An abort without an enclosing `catch` leaves the vars untouched
    /// and surfaces the error.
    #[test]
    fn uncaught_abort_discards_and_propagates() {
        let var = TVar::new(42);
        let varc = var.clone();

        let r: Result<i32, _> = atomically_or_err(move |tx| {
            varc.write(tx, 0)?;
            abort(TestError)
        });

        assert!(r.is_err());
        assert_eq!(var.read_atomic(), 42);
    }

    #[test]
    fn unwrap_some() {
        let x = Some(42);
        let y = atomically(|_| unwrap_or_retry(x));
        assert_eq!(y, 42);
    }

    #[test]
    fn unwrap_none() {
        let x: Option<i32> = None;
        assert_eq!(unwrap_or_retry(x), retry());
    }

    #[test]
    fn guard_true() {
        let x = guard(true);
        assert_eq!(x, Ok(()));
    }

    #[test]
    fn guard_false() {
        let x = guard(false);
        assert_eq!(x, retry());
    }

    #[test]
    fn optionally_succeed() {
        let x = atomically(|t| optionally(t, |_| Ok(42)));
        assert_eq!(x, Some(42));
    }

    #[test]
    fn optionally_fail() {
        let x: Option<i32> = atomically(|t| optionally(t, |_| retry()));
        assert_eq!(x, None);
    }
}
