// Constants - Tunable economic parameters
// Principle: Every economic knob named, documented, range-checked, owner-gated

use super::StakingError;
use crate::types::{percent, Address, Balance, EpochNumber, Timestamp, MILLITOKEN, TOKEN, UNIT};
use serde::{Deserialize, Serialize};

/// Economic parameters of the staking engine.
///
/// Ratios are `UNIT`-scaled fixed-point values (`UNIT` = 100%). Durations
/// are in seconds. Defaults reproduce the reference network configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// Minimum self-stake to register a validator
    pub min_self_stake: Balance,

    /// Maximum ratio of received stake to self-stake (UNIT-scaled; 16x)
    pub max_delegated_ratio: u128,

    /// Validator commission on the whole raw epoch reward
    pub validator_commission: u128,

    /// Share of epoch fees destroyed outright
    pub burnt_fee_share: u128,

    /// Share of epoch fees diverted to the treasury
    pub treasury_fee_share: u128,

    /// Reward weight of fully unlocked stake relative to a notional full
    /// unit of 1.0; locked stake earns the remainder pro rata to duration
    pub unlocked_reward_ratio: u128,

    /// Minimum lockup duration in seconds
    pub min_lockup_duration: u64,

    /// Maximum lockup duration in seconds; a lock of exactly this length
    /// earns the full non-base reward weight
    pub max_lockup_duration: u64,

    /// Seconds a withdrawal request must age before withdrawal
    pub withdrawal_period_time: Timestamp,

    /// Sealed epochs a withdrawal request must age before withdrawal
    pub withdrawal_period_epochs: EpochNumber,

    /// Offline time (seconds within the sealed epoch) beyond which a
    /// validator is deactivated as offline
    pub offline_penalty_threshold_time: u64,

    /// Offline blocks within the sealed epoch beyond which a validator is
    /// deactivated as offline (both thresholds must be exceeded)
    pub offline_penalty_threshold_blocks: u64,

    /// Base reward minted per second of epoch duration, shared by weight
    pub base_reward_per_second: Balance,

    /// Gas-power target for the min-gas-price feedback loop
    pub target_gas_power_per_second: u64,

    /// Smoothing counterweight (seconds) bounding the per-epoch rate of
    /// change of the min gas price
    pub gas_price_balancing_counterweight: u64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            min_self_stake: 500_000 * TOKEN,
            max_delegated_ratio: 16 * UNIT,
            validator_commission: percent(15),
            burnt_fee_share: percent(20),
            treasury_fee_share: percent(10),
            unlocked_reward_ratio: percent(30),
            min_lockup_duration: 14 * 86_400,
            max_lockup_duration: 365 * 86_400,
            withdrawal_period_time: 7 * 86_400,
            withdrawal_period_epochs: 3,
            offline_penalty_threshold_time: 5 * 86_400,
            offline_penalty_threshold_blocks: 1_000,
            base_reward_per_second: 2_600 * MILLITOKEN,
            target_gas_power_per_second: 2_000_000,
            gas_price_balancing_counterweight: 6 * 3_600,
        }
    }
}

impl Params {
    /// Rejects parameter combinations the reward math cannot support.
    pub fn validate(&self) -> Result<(), StakingError> {
        if self.min_self_stake == 0 {
            return Err(StakingError::InvalidParameter("min_self_stake must be positive"));
        }
        if self.max_delegated_ratio < UNIT {
            return Err(StakingError::InvalidParameter("max_delegated_ratio below 1.0"));
        }
        if self.validator_commission > UNIT / 2 {
            return Err(StakingError::InvalidParameter("validator_commission above 50%"));
        }
        if self.burnt_fee_share + self.treasury_fee_share > UNIT {
            return Err(StakingError::InvalidParameter("fee shares exceed 100%"));
        }
        if self.unlocked_reward_ratio > UNIT {
            return Err(StakingError::InvalidParameter("unlocked_reward_ratio above 100%"));
        }
        if self.min_lockup_duration == 0 || self.min_lockup_duration > self.max_lockup_duration {
            return Err(StakingError::InvalidParameter("lockup duration bounds inverted"));
        }
        Ok(())
    }
}

/// Owner-gated parameter store. Reads are free; every mutation checks the
/// caller and re-validates the resulting parameter set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstantsStore {
    owner: Address,
    params: Params,
}

impl ConstantsStore {
    pub fn new(owner: Address, params: Params) -> Result<Self, StakingError> {
        params.validate()?;
        Ok(Self { owner, params })
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Applies an owner-authorized update to a single parameter.
    ///
    /// The closure mutates a scratch copy; the update commits only if the
    /// resulting set validates, so a bad value can never become live.
    pub fn update(
        &mut self,
        caller: Address,
        mutate: impl FnOnce(&mut Params),
    ) -> Result<(), StakingError> {
        if caller != self.owner {
            return Err(StakingError::Unauthorized);
        }
        let mut next = self.params.clone();
        mutate(&mut next);
        next.validate()?;
        self.params = next;
        Ok(())
    }
}
