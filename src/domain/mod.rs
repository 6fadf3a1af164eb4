//! Domain model: accounts, audit entries, outcomes and the storage port.

pub mod account;
pub mod outcome;
pub mod ports;
pub mod transaction;
