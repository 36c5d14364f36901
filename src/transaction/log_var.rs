// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::tvar::ArcAny;

/// `LogVar` is the entry of a transaction log. It tracks if a var was
/// read, written or both.
///
/// Depending on the type, the commit has to write the var, validate it
/// against the recorded read or block on it.
#[derive(Clone)]
pub enum LogVar {
    /// Var has been read.
    ///
    /// The recorded value is the baseline the commit validates against.
    Read(ArcAny),

    /// Var has been written and no dependency on the original exists.
    ///
    /// There is no need to check for consistency.
    Write(ArcAny),

    /// ReadWrite(original value, pending value).
    ///
    /// Var has been read first and then written.
    ///
    /// It needs to be checked for consistency.
    ReadWrite(ArcAny, ArcAny),

    /// Var has been read on a branch that was not taken.
    ///
    /// Don't check for consistency, but block on the var,
    /// so that the thread wakes up when the first branch
    /// becomes runnable again.
    ReadObsolete(ArcAny),

    /// ReadObsoleteWrite(original value, pending value).
    ///
    /// Var has been read on a not taken branch and then written on the
    /// taken one.
    ///
    /// Write it back, but don't check the read for consistency.
    ReadObsoleteWrite(ArcAny, ArcAny),
    // Here would be WriteObsolete, but writes of a not taken branch can be
    // discarded immediately and don't need a representation in the log.
}

impl LogVar {
    /// Read a value and potentially upgrade the state.
    pub fn read(&mut self) -> ArcAny {
        use self::LogVar::*;

        let this;
        let val;
        match *self {
            // Use the last read value or get the written one.
            Read(ref v) | Write(ref v) | ReadWrite(_, ref v) => {
                return v.clone();
            }

            ReadObsoleteWrite(ref w, ref v) => {
                val = v.clone();
                this = ReadWrite(w.clone(), v.clone());
            }

            // Upgrade to a real Read.
            ReadObsolete(ref v) => {
                val = v.clone();
                this = Read(v.clone());
            }
        };
        *self = this;
        val
    }

    /// Write a value and potentially upgrade the state.
    pub fn write(&mut self, w: ArcAny) {
        use self::LogVar::*;

        let this = self.clone();

        *self = match this {
            Write(_) => Write(w),

            // Register write
            ReadObsolete(r) | ReadObsoleteWrite(r, _) => ReadObsoleteWrite(r, w),

            // Register write
            Read(r) | ReadWrite(r, _) => ReadWrite(r, w),
        };
    }

    /// Turn `self` into an obsolete version.
    ///
    /// Used when a branch of `Transaction::or` was not taken, but its
    /// reads still matter for blocking.
    pub fn obsolete(self) -> Option<LogVar> {
        self.into_read_value().map(LogVar::ReadObsolete)
    }

    /// Ignore all writes and get the original value of a var.
    pub fn into_read_value(self) -> Option<ArcAny> {
        use self::LogVar::*;
        match self {
            Read(v) | ReadWrite(v, _) | ReadObsolete(v) | ReadObsoleteWrite(v, _) => Some(v),
            Write(_) => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    /// Test if writes are ignored, when a var is set to obsolete.
    #[test]
    fn write_obsolete_ignore() {
        let t = LogVar::Write(Arc::new(42)).obsolete();
        assert!(t.is_none());
    }

    /// An obsolete read upgrades to a real read on access.
    #[test]
    fn obsolete_read_upgrades() {
        let v: ArcAny = Arc::new(42);
        let mut t = LogVar::ReadObsolete(v.clone());
        let r = t.read();
        assert!(Arc::ptr_eq(&r, &v));
        assert!(matches!(t, LogVar::Read(_)));
    }
}
