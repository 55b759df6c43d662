//! Storage module - Backing stores and the ledger index

mod store;
mod ledger;
pub mod db;

pub use store::*;
pub use ledger::*;
pub use db::SledStore;
