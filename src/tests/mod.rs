// Tests module
// Integration tests drive the whole engine through the public transaction
// surface; invariant tests replay randomized operation sequences.

pub mod invariants;

use crate::staking::constants::Params;
use crate::staking::{BalanceSink, DriverSink, Sfc, TransferRejected};
use crate::time::ManualTimeSource;
use crate::types::{Address, Balance, ValidatorId};
use std::collections::BTreeMap;
use tracing_subscriber::EnvFilter;

pub const DAY: u64 = 86_400;
pub const GENESIS: u64 = 1_700_000_000;

/// Captures every weight update the engine pushes toward the consensus driver.
#[derive(Default)]
pub struct RecordingDriver {
    pub updates: Vec<(ValidatorId, Balance, Balance)>,
}

impl DriverSink for RecordingDriver {
    fn on_validator_weight(&mut self, validator: ValidatorId, current: Balance, next: Balance) {
        self.updates.push((validator, current, next));
    }
}

/// In-memory balance ledger standing in for the token side of the system.
#[derive(Default)]
pub struct Bank {
    pub credits: BTreeMap<Address, Balance>,
    pub burned: Balance,
}

impl Bank {
    pub fn credited(&self, to: Address) -> Balance {
        self.credits.get(&to).copied().unwrap_or(0)
    }

    pub fn total_credited(&self) -> Balance {
        self.credits.values().sum()
    }
}

impl BalanceSink for Bank {
    fn credit(&mut self, to: Address, amount: Balance) -> Result<(), TransferRejected> {
        *self.credits.entry(to).or_insert(0) += amount;
        Ok(())
    }

    fn burn(&mut self, amount: Balance) {
        self.burned += amount;
    }
}

pub type TestSfc = Sfc<RecordingDriver, Bank>;

pub fn addr(b: u8) -> Address {
    Address::from_bytes([b; 20])
}

pub fn owner() -> Address {
    addr(0xaa)
}

pub fn driver() -> Address {
    addr(0xdd)
}

pub fn new_engine(clock: &ManualTimeSource, params: Params) -> TestSfc {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
    Sfc::new(
        owner(),
        driver(),
        params,
        Box::new(clock.clone()),
        RecordingDriver::default(),
        Bank::default(),
    )
    .unwrap()
}

/// Stages `ids`, advances the clock by `secs` and seals the epoch with full
/// uptime and no fees.
pub fn seal_epoch_after(sfc: &mut TestSfc, clock: &ManualTimeSource, ids: &[ValidatorId], secs: u64) {
    sfc.seal_epoch_validators(driver(), ids.to_vec()).unwrap();
    clock.advance(secs);
    let n = ids.len();
    sfc.seal_epoch(driver(), &vec![0; n], &vec![0; n], &vec![secs; n], &vec![0; n], 0)
        .unwrap();
}
