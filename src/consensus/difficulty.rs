//! Difficulty adjustment algorithm
//!
//! A target is a 256-bit big-endian number; a block hash meets it when the
//! hash is numerically less than or equal to it. Headers carry targets in a
//! compact 32-bit form: byte width in the high byte, then the three most
//! significant bytes.

use crate::config::ChainParams;

/// 256-bit big-endian target
pub type Target = [u8; 32];

/// Smallest width kept by the compact encoding
const MIN_WIDTH: usize = 3;

/// Compact form of a target. Only the three most significant bytes survive.
pub fn compress(target: &Target) -> u32 {
    let leading_zeros = target.iter().take_while(|b| **b == 0).count();
    let start = leading_zeros.min(32 - MIN_WIDTH);
    let width = (32 - start) as u32;
    let mantissa = u32::from_be_bytes([0, target[start], target[start + 1], target[start + 2]]);
    (width << 24) | mantissa
}

/// Expand a compact target; `None` when the width does not fit 32 bytes.
/// Widths below three behave as three.
pub fn decompress(compact: u32) -> Option<Target> {
    let width = ((compact >> 24) as usize).max(MIN_WIDTH);
    if width > 32 {
        return None;
    }
    let mut target = [0u8; 32];
    let start = 32 - width;
    target[start..start + 3].copy_from_slice(&compact.to_be_bytes()[1..]);
    Some(target)
}

/// Truncate to what the compact form can express
pub fn normalize(target: &Target) -> Target {
    let mut out = [0u8; 32];
    let leading_zeros = target.iter().take_while(|b| **b == 0).count();
    let start = leading_zeros.min(32 - MIN_WIDTH);
    out[start..start + 3].copy_from_slice(&target[start..start + 3]);
    out
}

/// Big-endian numeric `a <= b`
pub fn less_or_equal(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a <= b
}

/// `target * numerator / denominator`, `None` on overflow or a zero denominator
pub fn multiply(target: &Target, numerator: u64, denominator: u64) -> Option<Target> {
    if denominator == 0 {
        return None;
    }

    // 40 bytes hold any 256-bit by 64-bit product
    let mut product = [0u8; 40];
    let mut carry: u128 = 0;
    for i in (0..40).rev() {
        let byte = if i >= 8 { target[i - 8] as u128 } else { 0 };
        let value = byte * numerator as u128 + carry;
        product[i] = (value & 0xff) as u8;
        carry = value >> 8;
    }

    let mut quotient = [0u8; 40];
    let mut remainder: u128 = 0;
    for i in 0..40 {
        let value = (remainder << 8) | product[i] as u128;
        quotient[i] = (value / denominator as u128) as u8;
        remainder = value % denominator as u128;
    }

    if quotient[..8].iter().any(|b| *b != 0) {
        return None;
    }
    let mut result = [0u8; 32];
    result.copy_from_slice(&quotient[8..]);
    Some(result)
}

/// Whether a block at `index` starts a new retarget period
pub fn should_adjust_difficulty(index: u32, span: u32) -> bool {
    span > 0 && index > 0 && index % span == 0
}

/// New target after a retarget period.
///
/// `average_block_time` is the mean spacing over the last span. The target
/// shrinks by at most the configured ratio per retarget and never exceeds
/// the floor.
pub fn calculate_next_target(current: &Target, average_block_time: u64, params: &ChainParams) -> Target {
    let (mut numerator, mut denominator) = (average_block_time, params.target_time_per_block);
    if u128::from(denominator) > u128::from(params.difficulty_change_ratio_limit) * u128::from(numerator) {
        numerator = 1;
        denominator = params.difficulty_change_ratio_limit;
    }

    match multiply(current, numerator, denominator) {
        Some(scaled) => {
            let next = normalize(&scaled);
            if less_or_equal(&params.minimum_target, &next) {
                params.minimum_target
            } else {
                next
            }
        }
        None => params.minimum_target,
    }
}
