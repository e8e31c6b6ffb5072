// Stake ledger - per-(staker, validator) delegation records
// Holds amounts, lockups, reward checkpoints and pending withdrawal
// requests. All multi-record mutations are orchestrated by the engine.

use super::rewards::Rewards;
use crate::types::{Address, Balance, EpochNumber, Timestamp, ValidatorId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Maximum relocks allowed within the sliding window
pub const MAX_RELOCKS_PER_WINDOW: usize = 3;

/// Sliding window for the relock rate limiter (14 days, same time basis
/// as lockup end-time math)
pub const RELOCK_WINDOW: u64 = 14 * 86_400;

/// Voluntary lockup of part of a stake. All-or-nothing: either every field
/// is zero (no lock) or none is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockupInfo {
    pub locked_stake: Balance,

    /// First epoch the lock covers
    pub from_epoch: EpochNumber,

    /// Lock expiry; at exactly this instant the stake counts as unlocked
    pub end_time: Timestamp,

    pub duration: u64,
}

impl LockupInfo {
    /// Whether any lock fields are set (possibly expired).
    pub fn is_set(&self) -> bool {
        self.locked_stake != 0
    }

    /// Whether the lock is currently binding.
    pub fn is_active(&self, now: Timestamp) -> bool {
        self.locked_stake != 0 && self.end_time > now
    }

    pub fn clear(&mut self) {
        *self = LockupInfo::default();
    }
}

/// Undelegated (or unlocked) funds waiting out the withdrawal period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub amount: Balance,

    /// Epoch the request was created in
    pub epoch: EpochNumber,

    /// Time the request was created at
    pub time: Timestamp,
}

/// Sliding-window rate limiter for relocks. Bounded: at most
/// `MAX_RELOCKS_PER_WINDOW` timestamps retained.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelockTracker {
    timestamps: VecDeque<Timestamp>,
}

impl RelockTracker {
    fn prune(&mut self, now: Timestamp) {
        let cutoff = now.saturating_sub(RELOCK_WINDOW);
        while matches!(self.timestamps.front(), Some(&t) if t <= cutoff) {
            self.timestamps.pop_front();
        }
    }

    /// Whether one more relock is allowed at `now`.
    pub fn allowed(&mut self, now: Timestamp) -> bool {
        self.prune(now);
        self.timestamps.len() < MAX_RELOCKS_PER_WINDOW
    }

    /// Records a performed relock.
    pub fn record(&mut self, now: Timestamp) {
        self.prune(now);
        self.timestamps.push_back(now);
        debug_assert!(self.timestamps.len() <= MAX_RELOCKS_PER_WINDOW);
    }
}

/// Delegation record for one (staker, validator) pair. Never deleted; a
/// zero amount is a valid terminal state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stake {
    /// Total staked amount
    pub amount: Balance,

    /// At most one lockup per pair; `lockup.locked_stake <= amount`
    pub lockup: LockupInfo,

    /// Realized but unclaimed rewards, kept per component so a restake can
    /// keep the locked-attributable share locked
    pub stashed_rewards: Rewards,

    /// Epoch watermark up to which rewards have been moved into the stash
    pub stashed_rewards_until_epoch: EpochNumber,

    /// Accrued early-unlock penalty base; decremented proportionally on
    /// each partial unlock, reset when a fresh lock starts
    pub early_unlock_penalty: Balance,

    /// First epoch fully covered by the most recent lock or relock; zero if
    /// never locked. Kept for state snapshots and audit tooling; runtime
    /// lock decisions use `lockup` directly
    pub highest_lockup_epoch: EpochNumber,

    /// Pending withdrawal requests by id
    pub withdrawal_requests: BTreeMap<u64, WithdrawalRequest>,

    /// Relock rate-limiter state
    pub relocks: RelockTracker,
}

impl Stake {
    /// Total realized-but-unclaimed reward ("paid ordinary reward").
    pub fn paid_ordinary_reward(&self) -> Balance {
        self.stashed_rewards.total()
    }

    /// Stake not bound by an active lock at `now`.
    pub fn unlocked_stake(&self, now: Timestamp) -> Balance {
        if self.lockup.is_active(now) {
            self.amount - self.lockup.locked_stake
        } else {
            self.amount
        }
    }

    /// Next free withdrawal-request id (greater than every existing id, so
    /// it can never collide with caller-chosen ids).
    pub fn next_wr_id(&self) -> u64 {
        self.withdrawal_requests
            .keys()
            .next_back()
            .map(|id| id + 1)
            .unwrap_or(0)
    }
}

/// All delegation records plus the global stake counter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StakeLedger {
    stakes: BTreeMap<(Address, ValidatorId), Stake>,
    total_stake: Balance,
}

impl StakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_stake(&self) -> Balance {
        self.total_stake
    }

    pub fn get(&self, staker: Address, validator: ValidatorId) -> Option<&Stake> {
        self.stakes.get(&(staker, validator))
    }

    pub(crate) fn get_mut(&mut self, staker: Address, validator: ValidatorId) -> Option<&mut Stake> {
        self.stakes.get_mut(&(staker, validator))
    }

    /// Fetches or creates the record, initializing the reward watermark at
    /// `sealed` so already-sealed epochs never pay a newcomer.
    pub(crate) fn get_or_create(
        &mut self,
        staker: Address,
        validator: ValidatorId,
        sealed: EpochNumber,
    ) -> &mut Stake {
        self.stakes.entry((staker, validator)).or_insert_with(|| Stake {
            stashed_rewards_until_epoch: sealed,
            ..Stake::default()
        })
    }

    pub(crate) fn add_total_stake(&mut self, amount: Balance) {
        self.total_stake += amount;
    }

    pub(crate) fn sub_total_stake(&mut self, amount: Balance) {
        debug_assert!(self.total_stake >= amount, "total stake underflow");
        self.total_stake -= amount;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(Address, ValidatorId), &Stake)> {
        self.stakes.iter()
    }

    /// Stakers delegated to `validator`, for conservation checks.
    pub fn stakes_of_validator(
        &self,
        validator: ValidatorId,
    ) -> impl Iterator<Item = (&Address, &Stake)> {
        self.stakes
            .iter()
            .filter(move |((_, v), _)| *v == validator)
            .map(|((s, _), stake)| (s, stake))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lockup_all_or_nothing() {
        let mut lockup = LockupInfo::default();
        assert!(!lockup.is_set());
        assert!(!lockup.is_active(0));

        lockup = LockupInfo {
            locked_stake: 100,
            from_epoch: 2,
            end_time: 1_000,
            duration: 500,
        };
        assert!(lockup.is_active(999));
        // exactly at end_time the stake counts as unlocked
        assert!(!lockup.is_active(1_000));
        assert!(lockup.is_set());

        lockup.clear();
        assert_eq!(lockup, LockupInfo::default());
    }

    #[test]
    fn test_unlocked_stake() {
        let stake = Stake {
            amount: 1_000,
            lockup: LockupInfo {
                locked_stake: 600,
                from_epoch: 1,
                end_time: 5_000,
                duration: 5_000,
            },
            ..Stake::default()
        };
        assert_eq!(stake.unlocked_stake(4_999), 400);
        assert_eq!(stake.unlocked_stake(5_000), 1_000); // expired
    }

    #[test]
    fn test_relock_window() {
        let mut tracker = RelockTracker::default();
        let t0 = 1_000_000;

        for i in 0..MAX_RELOCKS_PER_WINDOW {
            assert!(tracker.allowed(t0 + i as u64));
            tracker.record(t0 + i as u64);
        }
        assert!(!tracker.allowed(t0 + 10));

        // the window slides: after 14 days the oldest entries fall out
        assert!(tracker.allowed(t0 + RELOCK_WINDOW + 3));
    }

    #[test]
    fn test_next_wr_id_skips_taken_ids() {
        let mut stake = Stake::default();
        assert_eq!(stake.next_wr_id(), 0);
        stake.withdrawal_requests.insert(
            7,
            WithdrawalRequest {
                amount: 1,
                epoch: 1,
                time: 0,
            },
        );
        assert_eq!(stake.next_wr_id(), 8);
    }

    #[test]
    fn test_watermark_initialized_at_sealed() {
        let mut ledger = StakeLedger::new();
        let staker = Address::from_bytes([1; 20]);
        let stake = ledger.get_or_create(staker, 1, 42);
        assert_eq!(stake.stashed_rewards_until_epoch, 42);

        // existing records keep their watermark
        stake.stashed_rewards_until_epoch = 10;
        assert_eq!(ledger.get_or_create(staker, 1, 42).stashed_rewards_until_epoch, 10);
    }
}
