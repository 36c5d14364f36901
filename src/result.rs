// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use thiserror::Error;

/// A boxed error used to abort a transaction with `abort`.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// `StmError` describes the control flow of a running transaction.
///
/// It is internal control flow and never surfaces to the caller of
/// `atomically`. Always pass it on with `?` and never handle it yourself,
/// or blocking and consistency checks will break.
#[derive(Error, Eq, PartialEq, Clone, Copy, Debug)]
pub enum StmError {
    /// The call failed, because a variable, the computation
    /// depends on, has changed.
    #[error("a variable the transaction depends on has changed")]
    Failure,

    /// `retry` was called.
    ///
    /// It may block until at least one read variable has changed.
    #[error("the transaction called retry and waits for a change")]
    Retry,
}

/// `StmResult` is the result of a single step of a transaction body.
pub type StmResult<T> = Result<T, StmError>;

/// `StmDynError` extends `StmError` with the ability to abort a
/// transaction with a user supplied error.
///
/// It is kept separate, so that `atomically` can not throw. Only
/// `atomically_or_err` allows abortions.
#[derive(Error, Debug)]
pub enum StmDynError {
    /// Regular control flow. Handled by the transaction runner.
    #[error("{0}")]
    Control(#[from] StmError),

    /// Abort the transaction and return the error to the caller.
    #[error("transaction aborted: {0}")]
    Abort(BoxedError),
}

/// `StmDynResult` is the result of a single step of a fallible
/// transaction body.
pub type StmDynResult<T> = Result<T, StmDynError>;
