// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::any::Any;
use std::cmp;
use std::fmt::{self, Debug};
use std::hint;
use std::marker::PhantomData;
use std::mem;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::transaction::control_block::ControlBlock;
use super::Transaction;
use crate::result::StmResult;

/// Type erased value of a `TVar`.
pub type ArcAny = Arc<dyn Any + Send + Sync>;

/// Process wide counter for `TVar` ids.
///
/// The id gives all vars a total order, which the commit protocol uses
/// for acquiring locks. All transactions locking their write sets in
/// ascending id order is what rules out deadlock.
static NEXT_VAR_ID: AtomicU64 = AtomicU64::new(0);

/// The state of the shared cell of a var.
///
/// The cell holds the last committed value, except for the short critical
/// section of a commit, where the committing transaction parks a lock
/// sentinel in it. The sentinel is never visible to transaction bodies;
/// readers spin until a committed value reappears.
enum CellState {
    /// The last committed value.
    Committed(ArcAny),

    /// Locked by the commit attempt with the given id.
    ///
    /// `prev` keeps the previously committed value, so that a failing
    /// commit can restore it.
    Locked { owner: u64, prev: ArcAny },
}

/// `VarControlBlock` contains all the useful data for a `TVar` while being the same type.
///
/// The control block is accessed from other threads directly whereas `TVar`
/// is just a typesafe wrapper around it.
pub struct VarControlBlock {
    /// Unique, monotonically assigned id of this var.
    ///
    /// The id doubles as the sort key for the transaction log and as the
    /// global lock acquisition order.
    id: u64,

    /// The shared cell holding the value or a transient lock sentinel.
    cell: Mutex<CellState>,

    /// `waiting_threads` is a list of all waiting threads protected by a mutex.
    waiting_threads: Mutex<Vec<Weak<ControlBlock>>>,

    /// `dead_threads` is a counter for all dead threads.
    ///
    /// When there are many dead threads waiting for a change, but
    /// nobody changes the value, then an automatic collection is
    /// performed.
    dead_threads: AtomicUsize,
}

impl VarControlBlock {
    /// Create a new `VarControlBlock` holding `val`.
    pub fn new<T>(val: T) -> Arc<VarControlBlock>
    where
        T: Any + Sync + Send,
    {
        let ctrl = VarControlBlock {
            id: NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed),
            cell: Mutex::new(CellState::Committed(Arc::new(val))),
            waiting_threads: Mutex::new(Vec::new()),
            dead_threads: AtomicUsize::new(0),
        };
        Arc::new(ctrl)
    }

    /// The id of this var.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Read the last committed value.
    ///
    /// Spins while a commit holds the lock sentinel. Sentinels are only
    /// held for the duration of a commit critical section, never for a
    /// whole transaction body, so the spin is short.
    pub fn read_committed(&self) -> ArcAny {
        loop {
            {
                let cell = self.cell.lock();
                if let CellState::Committed(ref v) = *cell {
                    return v.clone();
                }
            }
            hint::spin_loop();
        }
    }

    /// Check if the cell still holds exactly the committed value `expected`.
    ///
    /// A cell that is currently locked counts as changed. This keeps
    /// validation non-blocking: two commits validating each others write
    /// sets must not wait for each other.
    pub fn is_unchanged(&self, expected: &ArcAny) -> bool {
        let cell = self.cell.lock();
        match *cell {
            CellState::Committed(ref v) => Arc::ptr_eq(v, expected),
            CellState::Locked { .. } => false,
        }
    }

    /// Lock the cell for the commit attempt `owner`, but only if it still
    /// holds the value `expected` that the transaction recorded at read time.
    ///
    /// Spins while another commit holds the sentinel. Returns `false` if a
    /// concurrent writer got there first, in which case the whole
    /// transaction must rerun.
    pub fn lock_if_eq(&self, owner: u64, expected: &ArcAny) -> bool {
        loop {
            {
                let mut cell = self.cell.lock();
                if let CellState::Committed(ref v) = *cell {
                    if !Arc::ptr_eq(v, expected) {
                        return false;
                    }
                    let prev = v.clone();
                    *cell = CellState::Locked { owner, prev };
                    return true;
                }
            }
            hint::spin_loop();
        }
    }

    /// Lock the cell for the commit attempt `owner` unconditionally.
    ///
    /// Used for vars that were written without being read. There is no
    /// recorded value to compare against, so any committed value will do.
    pub fn lock(&self, owner: u64) {
        loop {
            {
                let mut cell = self.cell.lock();
                if let CellState::Committed(ref v) = *cell {
                    let prev = v.clone();
                    *cell = CellState::Locked { owner, prev };
                    return;
                }
            }
            hint::spin_loop();
        }
    }

    /// Replace the lock sentinel with the new committed value.
    ///
    /// Only the commit attempt that holds the sentinel may release it.
    /// The owner check guards against releasing through a stale reference
    /// after another path already released the var.
    pub fn release(&self, owner: u64, value: ArcAny) {
        let mut cell = self.cell.lock();
        if let CellState::Locked { owner: o, .. } = *cell {
            if o == owner {
                *cell = CellState::Committed(value);
            }
        }
    }

    /// Abort a commit by restoring the value that was committed before
    /// the sentinel was taken.
    pub fn release_aborted(&self, owner: u64) {
        let mut cell = self.cell.lock();
        if let CellState::Locked { owner: o, ref prev } = *cell {
            if o == owner {
                let prev = prev.clone();
                *cell = CellState::Committed(prev);
            }
        }
    }

    /// Wake all threads that are waiting for this var.
    pub fn wake_all(&self) {
        // Atomically take all waiting threads from the value.
        let threads = {
            let mut guard = self.waiting_threads.lock();
            let inner: &mut Vec<_> = &mut guard;
            mem::replace(inner, Vec::new())
        };

        // Take all, that are still alive.
        let threads = threads.iter().filter_map(Weak::upgrade);

        // Release all the semaphores to start the thread.
        for thread in threads {
            // Inform thread that this var has changed.
            thread.set_changed();
        }
    }

    /// Add another thread, that waits for mutations of `self`.
    pub fn wait(&self, thread: &Arc<ControlBlock>) {
        let mut guard = self.waiting_threads.lock();

        guard.push(Arc::downgrade(thread));
    }

    /// Mark another `ControlBlock` as dead.
    ///
    /// If the count of dead control blocks is too high,
    /// perform a cleanup.
    /// This prevents masses of old `ControlBlock`s to
    /// pile up when a variable is often read but rarely written.
    pub fn set_dead(&self) {
        // Increase by one.
        let deads = self.dead_threads.fetch_add(1, Ordering::Relaxed);

        // If there are too many then cleanup.

        // There is a potential data race that may occur when
        // one thread reads the number and then operates on
        // outdated data, but no serious mistakes may happen.
        if deads >= 64 {
            let mut guard = self.waiting_threads.lock();
            self.dead_threads.store(0, Ordering::SeqCst);

            // Remove all dead ones. Possibly free up the memory.
            guard.retain(|t| t.upgrade().is_some());
        }
    }
}

// Vars are ordered by id, so that all transactions acquire their commit
// locks in the same global order.

impl PartialEq for VarControlBlock {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for VarControlBlock {}

impl Ord for VarControlBlock {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl PartialOrd for VarControlBlock {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A variable that can be used in a STM-Block
#[derive(Clone)]
pub struct TVar<T> {
    /// The control block is the inner of the variable.
    ///
    /// The rest of `TVar` is just the typesafe interface.
    control_block: Arc<VarControlBlock>,

    /// This marker is needed so that the variable can be used in a typesafe
    /// manner.
    _marker: PhantomData<T>,
}

impl<T> TVar<T>
where
    T: Any + Sync + Send + Clone,
{
    /// Create a new `TVar`.
    ///
    /// Creating a var outside of a transaction is cheap. It needs no
    /// transactional machinery and can not conflict with anything.
    pub fn new(val: T) -> TVar<T> {
        TVar {
            control_block: VarControlBlock::new(val),
            _marker: PhantomData,
        }
    }

    /// `read_atomic` reads a value atomically, without starting a transaction.
    ///
    /// It is semantically equivalent to
    ///
    /// ```
    /// # use stm::*;
    /// let var = TVar::new(0);
    /// atomically(|trans| var.read(trans));
    /// ```
    ///
    /// but more efficient.
    ///
    /// `read_atomic` returns a clone of the value.
    pub fn read_atomic(&self) -> T {
        let val = self.read_ref_atomic();

        (&*val as &dyn Any)
            .downcast_ref::<T>()
            .expect("wrong type in TVar<T>")
            .clone()
    }

    /// Read a value atomically but return a reference.
    ///
    /// This is mostly used internally, but can be useful in
    /// some cases, because `read_atomic` clones the
    /// inner value, which may be expensive.
    pub fn read_ref_atomic(&self) -> ArcAny {
        self.control_block.read_committed()
    }

    /// The normal way to access a var.
    ///
    /// It is equivalent to `transaction.read(&var)`, but more
    /// convenient.
    pub fn read(&self, transaction: &mut Transaction) -> StmResult<T> {
        transaction.read(self)
    }

    /// The normal way to write a var.
    ///
    /// It is equivalent to `transaction.write(&var, value)`, but more
    /// convenient.
    pub fn write(&self, transaction: &mut Transaction, value: T) -> StmResult<()> {
        transaction.write(self, value)
    }

    /// Modify the content of a `TVar` with the function f.
    ///
    /// ```
    /// # use stm::*;
    /// let var = TVar::new(21);
    /// atomically(|trans|
    ///     var.modify(trans, |x| x*2)
    /// );
    ///
    /// assert_eq!(var.read_atomic(), 42);
    /// ```
    pub fn modify<F>(&self, transaction: &mut Transaction, f: F) -> StmResult<()>
    where
        F: FnOnce(T) -> T,
    {
        let old = self.read(transaction)?;
        self.write(transaction, f(old))
    }

    /// Replaces the value of a `TVar` with a new one, returning
    /// the old one.
    ///
    /// ```
    /// # use stm::*;
    /// let var = TVar::new(0);
    /// let x = atomically(|trans|
    ///     var.replace(trans, 42)
    /// );
    ///
    /// assert_eq!(x, 0);
    /// assert_eq!(var.read_atomic(), 42);
    /// ```
    pub fn replace(&self, transaction: &mut Transaction, value: T) -> StmResult<T> {
        let old = self.read(transaction)?;
        self.write(transaction, value)?;
        Ok(old)
    }

    /// Check if two `TVar`s refer to the same position.
    pub fn ref_eq(this: &TVar<T>, other: &TVar<T>) -> bool {
        Arc::ptr_eq(&this.control_block, &other.control_block)
    }

    /// Access the control block of the var.
    ///
    /// Internal use only!
    pub fn control_block(&self) -> &Arc<VarControlBlock> {
        &self.control_block
    }
}

/// Debug output a struct.
///
/// Note that this function does not print the state atomically.
/// If another thread modifies the datastructure at the same time, it may print an inconsistent state.
/// If you need an accurate view, that reflects current thread-local state, you can implement it easily yourself with
/// atomically.
impl<T> Debug for TVar<T>
where
    T: Any + Sync + Send + Clone,
    T: Debug,
{
    #[inline(never)]
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        let x = self.read_atomic();
        f.debug_struct("TVar").field("value", &x).finish()
    }
}
