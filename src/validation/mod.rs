//! Validation module - Addresses, payloads and transactions

mod address;
mod data;
mod transaction;

pub use address::*;
pub use data::*;
pub use transaction::*;
