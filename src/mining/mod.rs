//! Mining module - Nonce search and the external worker template

mod miner;
mod template;

pub use miner::*;
pub use template::*;
