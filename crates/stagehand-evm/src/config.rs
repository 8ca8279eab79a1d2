//! Session configuration.
//!
//! Everything that used to be an ambient constant lives here: the identities
//! a session may use, how they are funded, gas bounds, the receipt timeout,
//! and where the chain clock starts. A [`StageConfig`] is created once per
//! run and read-only afterward.

use alloy_primitives::{Address, U256};
use std::time::Duration;

/// One whole token in base units (18 decimals).
pub const UNIT: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Number of funded development accounts in the default configuration.
pub const DEV_ACCOUNTS: u8 = 10;

/// Deterministic development account address for `index`.
///
/// The addresses carry a `0xDD` marker byte so they stay clear of the
/// precompile range and are easy to spot in traces.
pub fn dev_account(index: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[18] = 0xDD;
    bytes[19] = index;
    Address::from(bytes)
}

/// Configuration for one deployment/testing session.
#[derive(Clone, Debug)]
pub struct StageConfig {
    /// Identity that deploys artifacts and owns instances unless a plan says
    /// otherwise.
    pub master: Address,
    /// Funded identities available to the session.
    pub accounts: Vec<Address>,
    /// Balance assigned to every account when the backend is constructed.
    pub initial_balance: U256,
    /// Gas limit for submitted operations (deployments and mutating calls).
    pub gas_limit: u64,
    /// Gas limit for read-only view calls.
    pub call_gas_limit: u64,
    /// Upper bound on waiting for a finalized receipt.
    pub receipt_timeout: Duration,
    /// Chain-clock timestamp at session start, in seconds.
    ///
    /// The clock never follows wall time; it moves only when a caller
    /// advances it.
    pub genesis_timestamp: u64,
}

impl Default for StageConfig {
    fn default() -> Self {
        let accounts: Vec<Address> = (0..DEV_ACCOUNTS).map(dev_account).collect();
        Self {
            master: accounts[0],
            accounts,
            initial_balance: UNIT.saturating_mul(U256::from(1_000_000u64)),
            gas_limit: 8_000_000,
            call_gas_limit: 50_000_000,
            receipt_timeout: Duration::from_secs(30),
            genesis_timestamp: 1_800_000_000,
        }
    }
}
