//! Application layer: the optimistic balance-change operation and the
//! retrying client that drives it.

pub mod balance;
pub mod retry;
