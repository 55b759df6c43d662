//! Block reward calculation
//!
//! Each block mints a fixed fraction of whatever the SUPPLY sentinel still
//! holds, so rewards decay geometrically and the supply is never exceeded.

use crate::config::ChainParams;

/// Reward for the next block given the current SUPPLY balance
pub fn calculate_reward(supply_balance: u64, params: &ChainParams) -> u64 {
    supply_balance.checked_div(params.reward_division).unwrap_or(0)
}
