// Reward engine core - pure accrual math
// Rewards accrue lazily: nothing is computed at seal time for stakers,
// everything is derived on demand from cumulative snapshot counters and
// the per-stake epoch watermark. These functions are side-effect free.

use super::constants::Params;
use super::epoch::EpochSnapshotStore;
use super::ledger::Stake;
use super::registry::Validator;
use crate::types::{mul_div, Balance, EpochNumber, Timestamp, ValidatorId, UNIT};
use serde::{Deserialize, Serialize};

/// Reward split by attribution. The locked components exist so a restake
/// can keep locked-capital earnings locked and so the early-unlock penalty
/// can be derived without replaying history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rewards {
    /// Duration-proportional bonus earned by locked stake
    pub lockup_extra: Balance,

    /// Base-weight reward earned by locked stake
    pub lockup_base: Balance,

    /// Reward earned by unlocked stake (base weight only)
    pub unlocked: Balance,
}

impl Rewards {
    pub const ZERO: Rewards = Rewards {
        lockup_extra: 0,
        lockup_base: 0,
        unlocked: 0,
    };

    pub fn total(&self) -> Balance {
        self.lockup_extra + self.lockup_base + self.unlocked
    }

    /// Share attributable to locked capital.
    pub fn locked_total(&self) -> Balance {
        self.lockup_extra + self.lockup_base
    }

    /// Amount fed into the early-unlock penalty accumulator when this
    /// reward is stashed: the full bonus plus half the locked base.
    pub fn penalty_contribution(&self) -> Balance {
        self.lockup_extra + self.lockup_base / 2
    }

    pub fn add(&mut self, other: Rewards) {
        self.lockup_extra += other.lockup_extra;
        self.lockup_base += other.lockup_base;
        self.unlocked += other.unlocked;
    }
}

/// Scales a full-weight reward by lockup duration.
///
/// `lock_duration == 0` means unlocked capital: it earns only the
/// `unlocked_reward_ratio` share. Locked capital earns that base share plus
/// a bonus growing linearly from 0 to the full remaining weight as the
/// duration approaches `max_lockup_duration`. All divisions truncate.
pub fn scale_lockup_reward(full_reward: Balance, lock_duration: u64, params: &Params) -> Rewards {
    let mut reward = Rewards::ZERO;
    if lock_duration != 0 {
        let max_extra_ratio = UNIT - params.unlocked_reward_ratio;
        let extra_ratio = mul_div(
            max_extra_ratio,
            lock_duration as u128,
            params.max_lockup_duration as u128,
        );
        let total_scaled = mul_div(full_reward, params.unlocked_reward_ratio + extra_ratio, UNIT);
        reward.lockup_base = mul_div(full_reward, params.unlocked_reward_ratio, UNIT);
        reward.lockup_extra = total_scaled - reward.lockup_base;
    } else {
        reward.unlocked = mul_div(full_reward, params.unlocked_reward_ratio, UNIT);
    }
    reward
}

/// Full-weight (unscaled) reward earned by `amount` staked with
/// `validator` over the half-open epoch range `(from, to]`, integrating
/// reward-per-token deltas. Epochs where the validator was not a member
/// contribute nothing.
pub fn raw_rewards_of(
    amount: Balance,
    validator: ValidatorId,
    store: &EpochSnapshotStore,
    from: EpochNumber,
    to: EpochNumber,
) -> Balance {
    if amount == 0 || to <= from {
        return 0;
    }
    let mut prev = store.reward_per_token_at(validator, from);
    let mut sum = 0;
    for epoch in from + 1..=to {
        if let Some(rec) = store.sealed(epoch).and_then(|s| s.validators.get(&validator)) {
            let cur = rec.accumulated_reward_per_token;
            debug_assert!(cur >= prev, "reward per token must be monotonic");
            sum += mul_div(cur - prev, amount, UNIT);
            prev = cur;
        }
    }
    sum
}

/// Largest epoch in `[lo, hi]` whose end time is covered by the lock
/// (`snapshot.end_time <= lock_end`), if any. Epoch end times are strictly
/// increasing, so this is a plain binary search.
fn highest_covered_epoch(
    store: &EpochSnapshotStore,
    lo: EpochNumber,
    hi: EpochNumber,
    lock_end: Timestamp,
) -> Option<EpochNumber> {
    let covered = |e: EpochNumber| store.end_time(e).map(|t| t <= lock_end).unwrap_or(false);
    if lo > hi || !covered(lo) {
        return None;
    }
    let (mut lo, mut hi) = (lo, hi);
    while lo < hi {
        let mid = (lo + hi + 1) / 2;
        if covered(mid) {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    Some(lo)
}

/// Rewards accrued by `stake` since its watermark, up to the last payable
/// sealed epoch. The range splits into lock-covered epochs (locked stake at
/// full lockup scale, the remainder at unlocked scale) and plain epochs
/// (whole amount at unlocked scale).
pub fn rewards_of(
    stake: &Stake,
    validator: &Validator,
    store: &EpochSnapshotStore,
    params: &Params,
    sealed: EpochNumber,
) -> Rewards {
    let payable = validator.highest_payable_epoch(sealed);
    let stashed = stake.stashed_rewards_until_epoch;
    if payable <= stashed || stake.amount == 0 {
        return Rewards::ZERO;
    }

    let lockup = &stake.lockup;
    let (locked_lo, locked_hi) = if lockup.is_set() && lockup.from_epoch <= payable {
        let lo = stashed.max(lockup.from_epoch - 1);
        let hi = highest_covered_epoch(store, lo + 1, payable, lockup.end_time).unwrap_or(lo);
        (lo, hi)
    } else {
        (stashed, stashed)
    };

    let mut out = Rewards::ZERO;

    // epochs before the lock began
    let pre = raw_rewards_of(stake.amount, validator.id, store, stashed, locked_lo);
    out.add(scale_lockup_reward(pre, 0, params));

    // lock-covered epochs
    if locked_hi > locked_lo {
        let free = stake.amount - lockup.locked_stake;
        let free_raw = raw_rewards_of(free, validator.id, store, locked_lo, locked_hi);
        out.add(scale_lockup_reward(free_raw, 0, params));

        let locked_raw = raw_rewards_of(lockup.locked_stake, validator.id, store, locked_lo, locked_hi);
        out.add(scale_lockup_reward(locked_raw, lockup.duration, params));
    }

    // epochs after the lock expired
    let tail = raw_rewards_of(stake.amount, validator.id, store, locked_hi.max(locked_lo), payable);
    out.add(scale_lockup_reward(tail, 0, params));

    out
}
