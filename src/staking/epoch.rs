// Epoch snapshots - append-only record of sealed accounting periods
// Counters are cumulative per validator so reward deltas can be derived
// between any two epochs of membership without replaying history.

use crate::types::{Balance, EpochNumber, Timestamp, ValidatorId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-validator record inside a sealed epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorEpochRecord {
    /// Received stake at the moment the epoch's validator set was sealed
    pub received_stake: Balance,

    /// Cumulative reward per staked token (UNIT-scaled), monotonically
    /// non-decreasing across this validator's epochs of membership
    pub accumulated_reward_per_token: u128,

    /// Cumulative uptime seconds across epochs of membership
    pub accumulated_uptime: u64,

    /// Cumulative originated transaction fees across epochs of membership
    pub accumulated_originated_txs_fee: Balance,

    /// Offline seconds within this epoch alone
    pub offline_time: u64,

    /// Offline blocks within this epoch alone
    pub offline_blocks: u64,
}

/// Immutable record of one sealed epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochSnapshot {
    pub epoch: EpochNumber,

    /// Membership, fixed when the epoch's validator set was sealed
    pub validator_ids: Vec<ValidatorId>,
    pub validators: BTreeMap<ValidatorId, ValidatorEpochRecord>,

    pub end_time: Timestamp,
    pub duration: u64,

    /// Total fees originated during the epoch
    pub epoch_fee: Balance,

    pub total_base_reward_weight: u128,
    pub total_tx_reward_weight: u128,

    /// Base reward rate the epoch was sealed with
    pub base_reward_per_second: Balance,

    /// Total stake across all validators at seal time
    pub total_stake: Balance,
}

impl EpochSnapshot {
    /// Genesis baseline: epoch 0, no validators, ends at genesis time.
    pub fn baseline(genesis_time: Timestamp) -> Self {
        Self {
            epoch: 0,
            validator_ids: Vec::new(),
            validators: BTreeMap::new(),
            end_time: genesis_time,
            duration: 0,
            epoch_fee: 0,
            total_base_reward_weight: 0,
            total_tx_reward_weight: 0,
            base_reward_per_second: 0,
            total_stake: 0,
        }
    }
}

/// Membership and stake weights for the currently open epoch, recorded by
/// `sealEpochValidators` and consumed by the next `sealEpoch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedEpoch {
    pub epoch: EpochNumber,
    pub validator_ids: Vec<ValidatorId>,
    pub received_stake: BTreeMap<ValidatorId, Balance>,
}

/// Append-only sequence of sealed epochs, indexed by epoch number.
/// Snapshots are immutable once inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochSnapshotStore {
    snapshots: BTreeMap<EpochNumber, EpochSnapshot>,
    staged: Option<StagedEpoch>,
}

impl EpochSnapshotStore {
    pub fn new(genesis_time: Timestamp) -> Self {
        let mut snapshots = BTreeMap::new();
        snapshots.insert(0, EpochSnapshot::baseline(genesis_time));
        Self {
            snapshots,
            staged: None,
        }
    }

    pub fn last_sealed_epoch(&self) -> EpochNumber {
        // the baseline at 0 always exists
        *self.snapshots.keys().next_back().unwrap_or(&0)
    }

    pub fn sealed(&self, epoch: EpochNumber) -> Option<&EpochSnapshot> {
        self.snapshots.get(&epoch)
    }

    pub fn staged(&self) -> Option<&StagedEpoch> {
        self.staged.as_ref()
    }

    pub fn stage(&mut self, staged: StagedEpoch) {
        self.staged = Some(staged);
    }

    pub fn take_staged(&mut self) -> Option<StagedEpoch> {
        self.staged.take()
    }

    /// Appends a sealed snapshot. Epoch numbers must advance by exactly 1.
    pub fn seal(&mut self, snapshot: EpochSnapshot) {
        debug_assert_eq!(snapshot.epoch, self.last_sealed_epoch() + 1, "epoch seal out of order");
        self.snapshots.insert(snapshot.epoch, snapshot);
    }

    /// Cumulative reward-per-token for `validator` at its last epoch of
    /// membership at or before `epoch`. Zero if it was never a member.
    pub fn reward_per_token_at(&self, validator: ValidatorId, epoch: EpochNumber) -> u128 {
        self.snapshots
            .range(..=epoch)
            .rev()
            .find_map(|(_, snap)| snap.validators.get(&validator))
            .map(|rec| rec.accumulated_reward_per_token)
            .unwrap_or(0)
    }

    /// Cumulative (uptime, originated fee) with the same fallback rule.
    pub fn accumulated_metrics_at(
        &self,
        validator: ValidatorId,
        epoch: EpochNumber,
    ) -> (u64, Balance) {
        self.snapshots
            .range(..=epoch)
            .rev()
            .find_map(|(_, snap)| snap.validators.get(&validator))
            .map(|rec| (rec.accumulated_uptime, rec.accumulated_originated_txs_fee))
            .unwrap_or((0, 0))
    }

    /// End time of a sealed epoch; genesis time for epoch 0.
    pub fn end_time(&self, epoch: EpochNumber) -> Option<Timestamp> {
        self.snapshots.get(&epoch).map(|s| s.end_time)
    }
}
