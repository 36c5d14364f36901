// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use parking_lot::{Condvar, Mutex};

/// A control block for a currently blocked transaction.
///
/// A transaction blocks on all read variables if retry was called.
/// This control block is used to let the vars wake the parked thread up,
/// when a write commits to one of them.
///
/// Be careful when using this, because you can easily create deadlocks.
pub struct ControlBlock {
    /// `true`, while the transaction has to keep waiting.
    ///
    /// Set to `false` once any of the watched vars has changed.
    blocked: Mutex<bool>,

    /// Condition variable that is used for pausing and
    /// waking the thread.
    wait_cvar: Condvar,
}

impl ControlBlock {
    /// Create a new `ControlBlock`.
    pub fn new() -> ControlBlock {
        ControlBlock {
            blocked: Mutex::new(true),
            wait_cvar: Condvar::new(),
        }
    }

    /// Inform the control block that a variable has changed.
    ///
    /// Needs to be called from outside of the blocked transaction.
    pub fn set_changed(&self) {
        let mut blocked = self.blocked.lock();
        *blocked = false;
        // Wake the thread.
        self.wait_cvar.notify_one();
    }

    /// Block until one variable has changed.
    ///
    /// `wait` may immediately return, when a variable has
    /// changed between registration and blocking.
    ///
    /// `wait` needs to be called by the blocked transaction itself.
    pub fn wait(&self) {
        let mut blocked = self.blocked.lock();
        while *blocked {
            self.wait_cvar.wait(&mut blocked);
        }
    }
}
