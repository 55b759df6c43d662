//! Consensus module - Block structure, difficulty, rewards, validation and the chain engine

mod block;
mod chain;
mod difficulty;
mod rewards;
mod validation;

pub use block::*;
pub use chain::*;
pub use difficulty::*;
pub use rewards::*;
pub use validation::*;
