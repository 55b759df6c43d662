//! Daten Core Library
//!
//! A deterministic proof-of-work ledger that doubles as a hierarchical
//! name registry: accounts register dotted names that resolve to their
//! public key, and later transactions may target those names.

pub mod codec;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod validation;
pub mod storage;
pub mod mining;
pub mod node;

/// Protocol constants - HARD-CODED, NEVER CONFIGURABLE
pub mod constants {
    /// Highest transaction version this software understands
    pub const VERSION: u8 = 1;

    /// Total token supply (in base units)
    pub const TOTAL_SUPPLY: u64 = 100_000_000 * 100_000_000;

    /// Founder allocation, 10% of supply
    pub const FOUNDER_ALLOCATION: u64 = TOTAL_SUPPLY / 10;

    /// Contributors allocation, 20% of supply
    pub const CONTRIBUTORS_ALLOCATION: u64 = TOTAL_SUPPLY / 5;

    /// Unminted remainder held by the SUPPLY sentinel at genesis
    pub const SUPPLY_ALLOCATION: u64 = TOTAL_SUPPLY - FOUNDER_ALLOCATION - CONTRIBUTORS_ALLOCATION;

    /// Genesis timestamp (Unix seconds)
    pub const GENESIS_TIMESTAMP: u32 = 1_514_628_754;

    /// Compressed secp256k1 public key of the founder
    pub const FOUNDER_KEY: [u8; 33] = [
        0x02, 0xf4, 0x6d, 0x41, 0xc9, 0x45, 0xd6, 0x36, 0xe0, 0x07, 0x29,
        0xe2, 0xf3, 0x35, 0x5c, 0x7c, 0x60, 0x2e, 0x8a, 0x37, 0x03, 0xc1,
        0xa1, 0xdb, 0x13, 0x8d, 0x99, 0x19, 0xd7, 0x9b, 0x4e, 0x10, 0x17,
    ];

    /// Compressed secp256k1 public key of the contributors fund
    pub const CONTRIBUTORS_KEY: [u8; 33] = [
        0x02, 0x81, 0x90, 0xdd, 0xa7, 0x7e, 0xa5, 0x25, 0x28, 0x62, 0xd2,
        0xa8, 0x6e, 0xa1, 0xa0, 0x1b, 0x79, 0xa4, 0xc2, 0xb6, 0x18, 0x43,
        0x1e, 0xd4, 0x64, 0xbc, 0xcf, 0xe0, 0x67, 0x3e, 0x41, 0x88, 0xc5,
    ];

    /// Source of fee-collection transactions. Never has a tracked balance.
    pub const NOWHERE_KEY: [u8; 33] = [0u8; 33];

    /// Holder of the unminted supply. Block rewards are drawn from it.
    pub const SUPPLY_KEY: [u8; 33] = {
        let mut key = [0u8; 33];
        key[32] = 1;
        key
    };

    /// Chain name
    pub const CHAIN_NAME: &str = "Daten";
}
