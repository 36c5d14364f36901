// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Transactional data structures.
//!
//! All of them are plain compositions of `TVar::read`, `TVar::write` and
//! `retry`. They add domain semantics, but no new concurrency primitive,
//! and therefore compose freely with each other inside a single
//! transaction.

mod semaphore;
mod tbqueue;
mod tmap;
mod tmvar;
mod tqueue;
mod tset;

pub use self::semaphore::Semaphore;
pub use self::tbqueue::TBQueue;
pub use self::tmap::TMap;
pub use self::tmvar::TMVar;
pub use self::tqueue::TQueue;
pub use self::tset::TSet;
