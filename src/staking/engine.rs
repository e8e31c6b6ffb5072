// Engine - the staking state machine behind one transactional facade
// Principle: Validate first, mutate once, every operation all-or-nothing
//
// The engine owns all staking state and exposes the operations callers
// submit as transactions. External effects go through two injected sinks:
// the driver (consensus weight updates) and the balance ledger (credits
// and burns). Rewards are realized lazily; seal operations are the only
// place new value enters the system.

use super::constants::{ConstantsStore, Params};
use super::epoch::{EpochSnapshot, EpochSnapshotStore, StagedEpoch, ValidatorEpochRecord};
use super::gas_price::{self, INITIAL_MIN_GAS_PRICE};
use super::ledger::{LockupInfo, Stake, StakeLedger, WithdrawalRequest};
use super::registry::{ValidatorRegistry, OFFLINE_BIT, WITHDRAWN_BIT};
use super::rewards::{rewards_of, scale_lockup_reward, Rewards};
use super::sealer;
use super::{StakingError, Validator};
use crate::time::TimeSource;
use crate::types::{apply_ratio, mul_div, Address, Balance, EpochNumber, ValidatorId, UNIT};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

/// Receives validator weight updates for the consensus layer. `current` is
/// the weight the open epoch was staged with; `next` is the live received
/// stake the next epoch will be staged with (zero once the validator is no
/// longer in good standing).
pub trait DriverSink {
    fn on_validator_weight(&mut self, validator: ValidatorId, current: Balance, next: Balance);
}

/// A credit refused by the balance ledger. The triggering operation rolls
/// back entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("transfer rejected by balance sink")]
pub struct TransferRejected;

/// Moves value out of the engine: credits to staker balances and burns of
/// penalties and fee shares.
pub trait BalanceSink {
    fn credit(&mut self, to: Address, amount: Balance) -> Result<(), TransferRejected>;
    fn burn(&mut self, amount: Balance);
}

/// Entire persistent state of the staking engine. Serializable as one unit
/// so a node can snapshot and restore deterministically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SfcState {
    pub(crate) constants: ConstantsStore,
    pub(crate) registry: ValidatorRegistry,
    pub(crate) ledger: StakeLedger,
    pub(crate) snapshots: EpochSnapshotStore,
    pub(crate) current_sealed_epoch: EpochNumber,
    pub(crate) min_gas_price: u128,
    pub(crate) slashing_refund_ratio: BTreeMap<ValidatorId, u128>,
    pub(crate) driver: Address,
}

/// The staking engine. Generic over the two effect sinks so tests can
/// observe and reject external transfers.
pub struct Sfc<D: DriverSink, B: BalanceSink> {
    state: SfcState,
    time: Box<dyn TimeSource>,
    driver_sink: D,
    balance: B,
}

impl<D: DriverSink, B: BalanceSink> Sfc<D, B> {
    pub fn new(
        owner: Address,
        driver: Address,
        params: Params,
        time: Box<dyn TimeSource>,
        driver_sink: D,
        balance: B,
    ) -> Result<Self, StakingError> {
        let constants = ConstantsStore::new(owner, params)?;
        let genesis_time = time.now();
        Ok(Self {
            state: SfcState {
                constants,
                registry: ValidatorRegistry::new(),
                ledger: StakeLedger::new(),
                snapshots: EpochSnapshotStore::new(genesis_time),
                current_sealed_epoch: 0,
                min_gas_price: INITIAL_MIN_GAS_PRICE,
                slashing_refund_ratio: BTreeMap::new(),
                driver,
            },
            time,
            driver_sink,
            balance,
        })
    }

    /// Rebuilds an engine around previously serialized state.
    pub fn from_state(state: SfcState, time: Box<dyn TimeSource>, driver_sink: D, balance: B) -> Self {
        Self {
            state,
            time,
            driver_sink,
            balance,
        }
    }

    pub fn state(&self) -> &SfcState {
        &self.state
    }

    pub fn driver_sink(&self) -> &D {
        &self.driver_sink
    }

    pub fn balance_sink(&self) -> &B {
        &self.balance
    }

    /// The open (not yet sealed) epoch.
    pub fn current_epoch(&self) -> EpochNumber {
        self.state.current_sealed_epoch + 1
    }

    pub fn current_sealed_epoch(&self) -> EpochNumber {
        self.state.current_sealed_epoch
    }

    pub fn min_gas_price(&self) -> u128 {
        self.state.min_gas_price
    }

    pub fn total_stake(&self) -> Balance {
        self.state.ledger.total_stake()
    }

    pub fn params(&self) -> &Params {
        self.state.constants.params()
    }

    pub fn validator(&self, id: ValidatorId) -> Option<&Validator> {
        self.state.registry.get(id)
    }

    pub fn validator_id_of(&self, auth: Address) -> Option<ValidatorId> {
        self.state.registry.id_by_auth(auth)
    }

    pub fn last_validator_id(&self) -> ValidatorId {
        self.state.registry.last_validator_id()
    }

    pub fn stake(&self, staker: Address, validator: ValidatorId) -> Option<&Stake> {
        self.state.ledger.get(staker, validator)
    }

    pub fn epoch_snapshot(&self, epoch: EpochNumber) -> Option<&EpochSnapshot> {
        self.state.snapshots.sealed(epoch)
    }

    pub fn slashing_refund_ratio(&self, validator: ValidatorId) -> u128 {
        self.state
            .slashing_refund_ratio
            .get(&validator)
            .copied()
            .unwrap_or(0)
    }

    /// Owner-gated parameter update; see [`ConstantsStore::update`].
    pub fn update_params(
        &mut self,
        caller: Address,
        mutate: impl FnOnce(&mut Params),
    ) -> Result<(), StakingError> {
        self.state.constants.update(caller, mutate)
    }

    // ---- validator lifecycle ----

    /// Registers a validator and stakes `amount` as its self-stake.
    pub fn create_validator(
        &mut self,
        auth: Address,
        pubkey: Vec<u8>,
        amount: Balance,
    ) -> Result<ValidatorId, StakingError> {
        if amount < self.state.constants.params().min_self_stake {
            return Err(StakingError::InsufficientSelfStake);
        }
        let epoch = self.current_epoch();
        let now = self.time.now();
        let id = self.state.registry.register(auth, pubkey, epoch, now)?;
        self.delegate(auth, id, amount)?;
        Ok(id)
    }

    /// ORs fault bits into a validator's status. Driver-only.
    pub fn deactivate_validator(
        &mut self,
        caller: Address,
        validator: ValidatorId,
        bits: u64,
    ) -> Result<(), StakingError> {
        if caller != self.state.driver {
            return Err(StakingError::Unauthorized);
        }
        let epoch = self.current_epoch();
        let now = self.time.now();
        self.state.registry.deactivate(validator, bits, epoch, now)?;
        self.notify_weight(validator);
        Ok(())
    }

    /// Sets the refund ratio applied to a slashed validator's withdrawals.
    /// Owner-only; the validator must carry a cheater bit.
    pub fn update_slashing_refund_ratio(
        &mut self,
        caller: Address,
        validator: ValidatorId,
        ratio: u128,
    ) -> Result<(), StakingError> {
        if caller != self.state.constants.owner() {
            return Err(StakingError::Unauthorized);
        }
        let v = self
            .state
            .registry
            .get(validator)
            .ok_or(StakingError::UnknownValidator)?;
        if !v.status.is_cheater() {
            return Err(StakingError::ValidatorNotSlashed);
        }
        if ratio > UNIT {
            return Err(StakingError::InvalidParameter("refund ratio above 100%"));
        }
        self.state.slashing_refund_ratio.insert(validator, ratio);
        info!(validator, ratio, "slashing refund ratio updated");
        Ok(())
    }

    // ---- staking ----

    /// Adds `amount` to the (staker, validator) stake. Rewards accrued so
    /// far are stashed first so the new capital never earns retroactively.
    pub fn delegate(
        &mut self,
        staker: Address,
        to_validator: ValidatorId,
        amount: Balance,
    ) -> Result<(), StakingError> {
        if amount == 0 {
            return Err(StakingError::ZeroAmount);
        }
        let v = self
            .state
            .registry
            .get(to_validator)
            .ok_or(StakingError::UnknownValidator)?;
        if !v.status.is_ok() {
            return Err(StakingError::ValidatorNotOK);
        }
        let auth = v.auth;
        let received_after = v.received_stake + amount;
        let self_stake = self
            .state
            .ledger
            .get(auth, to_validator)
            .map(|s| s.amount)
            .unwrap_or(0);
        let self_after = self_stake + if staker == auth { amount } else { 0 };
        let max_ratio = self.state.constants.params().max_delegated_ratio;
        if received_after > apply_ratio(self_after, max_ratio) {
            return Err(StakingError::ExceedsDelegationRatio);
        }

        self.stash_internal(staker, to_validator);

        let sealed = self.state.current_sealed_epoch;
        self.state
            .ledger
            .get_or_create(staker, to_validator, sealed)
            .amount += amount;
        if let Some(v) = self.state.registry.get_mut(to_validator) {
            v.received_stake += amount;
        }
        self.state.ledger.add_total_stake(amount);

        debug!(%staker, validator = to_validator, amount, "delegated");
        self.notify_weight(to_validator);
        Ok(())
    }

    /// Moves `amount` of unlocked stake into a pending withdrawal request
    /// under the caller-chosen `wr_id`.
    pub fn undelegate(
        &mut self,
        staker: Address,
        to_validator: ValidatorId,
        wr_id: u64,
        amount: Balance,
    ) -> Result<(), StakingError> {
        if amount == 0 {
            return Err(StakingError::ZeroAmount);
        }
        self.state
            .registry
            .get(to_validator)
            .ok_or(StakingError::UnknownValidator)?;
        let now = self.time.now();
        {
            let stake = self
                .state
                .ledger
                .get(staker, to_validator)
                .ok_or(StakingError::InsufficientUnlockedStake)?;
            if amount > stake.unlocked_stake(now) {
                return Err(StakingError::InsufficientUnlockedStake);
            }
            if stake.withdrawal_requests.contains_key(&wr_id) {
                return Err(StakingError::RequestIdInUse);
            }
        }

        self.stash_internal(staker, to_validator);

        let epoch = self.current_epoch();
        if let Some(stake) = self.state.ledger.get_mut(staker, to_validator) {
            stake.amount -= amount;
            stake
                .withdrawal_requests
                .insert(wr_id, WithdrawalRequest { amount, epoch, time: now });
        }
        if let Some(v) = self.state.registry.get_mut(to_validator) {
            v.received_stake -= amount;
        }
        self.state.ledger.sub_total_stake(amount);

        info!(%staker, validator = to_validator, wr_id, amount, "undelegated");
        self.enforce_self_stake_floor(staker, to_validator);
        self.notify_weight(to_validator);
        Ok(())
    }

    /// Pays out a matured withdrawal request. For a slashed validator the
    /// payout is scaled by the refund ratio and the remainder burnt.
    pub fn withdraw(
        &mut self,
        staker: Address,
        to_validator: ValidatorId,
        wr_id: u64,
    ) -> Result<Balance, StakingError> {
        let now = self.time.now();
        let epoch = self.current_epoch();
        let (period_time, period_epochs) = {
            let p = self.state.constants.params();
            (p.withdrawal_period_time, p.withdrawal_period_epochs)
        };
        let (request, cheater) = {
            let v = self
                .state
                .registry
                .get(to_validator)
                .ok_or(StakingError::UnknownValidator)?;
            let stake = self
                .state
                .ledger
                .get(staker, to_validator)
                .ok_or(StakingError::RequestNotFound)?;
            let request = *stake
                .withdrawal_requests
                .get(&wr_id)
                .ok_or(StakingError::RequestNotFound)?;
            (request, v.status.is_cheater())
        };
        if now < request.time + period_time || epoch < request.epoch + period_epochs {
            return Err(StakingError::NotYetMatured);
        }

        let payout = if cheater {
            apply_ratio(request.amount, self.slashing_refund_ratio(to_validator))
        } else {
            request.amount
        };
        let burned = request.amount - payout;

        // credit before committing: a rejected transfer leaves the request intact
        if payout > 0 {
            self.balance
                .credit(staker, payout)
                .map_err(|_| StakingError::TransferFailed)?;
        }
        if let Some(stake) = self.state.ledger.get_mut(staker, to_validator) {
            stake.withdrawal_requests.remove(&wr_id);
        }
        if burned > 0 {
            self.balance.burn(burned);
        }

        info!(%staker, validator = to_validator, wr_id, payout, burned, "withdrawn");
        Ok(payout)
    }

    // ---- lockups ----

    /// Locks `amount` of the stake for `duration` seconds in exchange for
    /// a duration-proportional reward bonus.
    pub fn lock_stake(
        &mut self,
        staker: Address,
        to_validator: ValidatorId,
        duration: u64,
        amount: Balance,
    ) -> Result<(), StakingError> {
        if amount == 0 {
            return Err(StakingError::ZeroAmount);
        }
        let now = self.time.now();
        let (min_duration, max_duration) = {
            let p = self.state.constants.params();
            (p.min_lockup_duration, p.max_lockup_duration)
        };
        if duration < min_duration || duration > max_duration {
            return Err(StakingError::DurationOutOfRange);
        }
        let v = self
            .state
            .registry
            .get(to_validator)
            .ok_or(StakingError::UnknownValidator)?;
        if !v.status.is_ok() {
            return Err(StakingError::ValidatorNotOK);
        }
        let auth = v.auth;
        if staker != auth {
            self.check_validator_lock_covers(auth, to_validator, now + duration, now)?;
        }
        {
            let stake = self
                .state
                .ledger
                .get(staker, to_validator)
                .ok_or(StakingError::InsufficientUnlockedStake)?;
            if stake.lockup.is_active(now) {
                return Err(StakingError::ExistingLockConflict);
            }
            if amount > stake.unlocked_stake(now) {
                return Err(StakingError::InsufficientUnlockedStake);
            }
        }

        // stash under the old (expired or absent) lock state first, then
        // start the new lock with a clean penalty slate
        self.stash_internal(staker, to_validator);

        let epoch = self.current_epoch();
        if let Some(stake) = self.state.ledger.get_mut(staker, to_validator) {
            stake.early_unlock_penalty = 0;
            stake.lockup = LockupInfo {
                locked_stake: amount,
                from_epoch: epoch,
                end_time: now + duration,
                duration,
            };
            stake.highest_lockup_epoch = epoch + 1;
        }

        debug!(%staker, validator = to_validator, amount, duration, "stake locked");
        Ok(())
    }

    /// Extends an active lock and optionally adds `extra_amount` to it. The
    /// penalty accumulator carries over: a relock is continuous, not fresh.
    pub fn relock_stake(
        &mut self,
        staker: Address,
        to_validator: ValidatorId,
        duration: u64,
        extra_amount: Balance,
    ) -> Result<(), StakingError> {
        let now = self.time.now();
        let (min_duration, max_duration) = {
            let p = self.state.constants.params();
            (p.min_lockup_duration, p.max_lockup_duration)
        };
        let v = self
            .state
            .registry
            .get(to_validator)
            .ok_or(StakingError::UnknownValidator)?;
        if !v.status.is_ok() {
            return Err(StakingError::ValidatorNotOK);
        }
        let auth = v.auth;
        {
            let stake = self
                .state
                .ledger
                .get(staker, to_validator)
                .ok_or(StakingError::NotLockedUp)?;
            if !stake.lockup.is_active(now) {
                return Err(StakingError::NotLockedUp);
            }
            // a relock can never shorten the lock
            if duration < min_duration || duration > max_duration || now + duration < stake.lockup.end_time {
                return Err(StakingError::DurationOutOfRange);
            }
            if extra_amount > stake.unlocked_stake(now) {
                return Err(StakingError::InsufficientUnlockedStake);
            }
        }
        if staker != auth {
            self.check_validator_lock_covers(auth, to_validator, now + duration, now)?;
        }
        if let Some(stake) = self.state.ledger.get_mut(staker, to_validator) {
            if !stake.relocks.allowed(now) {
                return Err(StakingError::TooFrequentRelocks);
            }
        }

        self.stash_internal(staker, to_validator);

        let epoch = self.current_epoch();
        if let Some(stake) = self.state.ledger.get_mut(staker, to_validator) {
            stake.lockup.locked_stake += extra_amount;
            stake.lockup.duration = duration;
            stake.lockup.end_time = now + duration;
            stake.highest_lockup_epoch = epoch + 1;
            stake.relocks.record(now);
        }

        debug!(%staker, validator = to_validator, extra_amount, duration, "stake relocked");
        Ok(())
    }

    /// Breaks an active lock early. The penalty (accrued lockup earnings,
    /// capped at the amount) is burnt; the remainder becomes a withdrawal
    /// request under an auto-allocated id.
    pub fn unlock_stake(
        &mut self,
        staker: Address,
        to_validator: ValidatorId,
        amount: Balance,
    ) -> Result<(Balance, u64), StakingError> {
        if amount == 0 {
            return Err(StakingError::ZeroAmount);
        }
        self.state
            .registry
            .get(to_validator)
            .ok_or(StakingError::UnknownValidator)?;
        let now = self.time.now();
        {
            let stake = self
                .state
                .ledger
                .get(staker, to_validator)
                .ok_or(StakingError::NotLockedUp)?;
            if !stake.lockup.is_active(now) {
                return Err(StakingError::NotLockedUp);
            }
            if amount > stake.lockup.locked_stake {
                return Err(StakingError::InsufficientLockedStake);
            }
        }

        self.stash_internal(staker, to_validator);

        let epoch = self.current_epoch();
        let Some(stake) = self.state.ledger.get_mut(staker, to_validator) else {
            return Err(StakingError::NotLockedUp);
        };
        let locked = stake.lockup.locked_stake;
        // proportional share of the accumulated penalty, capped at the amount
        let share = mul_div(stake.early_unlock_penalty, amount, locked);
        stake.early_unlock_penalty -= share;
        let penalty = share.min(amount);

        stake.lockup.locked_stake -= amount;
        if stake.lockup.locked_stake == 0 {
            stake.lockup.clear();
        }
        stake.amount -= amount;
        let wr_id = stake.next_wr_id();
        stake.withdrawal_requests.insert(
            wr_id,
            WithdrawalRequest {
                amount: amount - penalty,
                epoch,
                time: now,
            },
        );

        if let Some(v) = self.state.registry.get_mut(to_validator) {
            v.received_stake -= amount;
        }
        self.state.ledger.sub_total_stake(amount);
        if penalty > 0 {
            self.balance.burn(penalty);
        }

        info!(%staker, validator = to_validator, amount, penalty, wr_id, "stake unlocked early");
        self.enforce_self_stake_floor(staker, to_validator);
        self.notify_weight(to_validator);
        Ok((penalty, wr_id))
    }

    /// Penalty `unlock_stake` would charge right now, without mutating.
    pub fn unlock_penalty(
        &self,
        staker: Address,
        to_validator: ValidatorId,
        amount: Balance,
    ) -> Result<Balance, StakingError> {
        if amount == 0 {
            return Err(StakingError::ZeroAmount);
        }
        let v = self
            .state
            .registry
            .get(to_validator)
            .ok_or(StakingError::UnknownValidator)?;
        let stake = self
            .state
            .ledger
            .get(staker, to_validator)
            .ok_or(StakingError::NotLockedUp)?;
        let now = self.time.now();
        if !stake.lockup.is_active(now) {
            return Err(StakingError::NotLockedUp);
        }
        if amount > stake.lockup.locked_stake {
            return Err(StakingError::InsufficientLockedStake);
        }
        let pending = rewards_of(
            stake,
            v,
            &self.state.snapshots,
            self.state.constants.params(),
            self.state.current_sealed_epoch,
        );
        let accumulated = stake.early_unlock_penalty + pending.penalty_contribution();
        let share = mul_div(accumulated, amount, stake.lockup.locked_stake);
        Ok(share.min(amount))
    }

    // ---- rewards ----

    /// Realized plus accrued-but-unrealized rewards for a stake.
    pub fn pending_rewards(&self, staker: Address, to_validator: ValidatorId) -> Balance {
        let Some(v) = self.state.registry.get(to_validator) else {
            return 0;
        };
        let Some(stake) = self.state.ledger.get(staker, to_validator) else {
            return 0;
        };
        let accrued = rewards_of(
            stake,
            v,
            &self.state.snapshots,
            self.state.constants.params(),
            self.state.current_sealed_epoch,
        );
        stake.paid_ordinary_reward() + accrued.total()
    }

    /// Moves accrued rewards into the stash and advances the watermark.
    pub fn stash_rewards(
        &mut self,
        staker: Address,
        to_validator: ValidatorId,
    ) -> Result<(), StakingError> {
        let v = self
            .state
            .registry
            .get(to_validator)
            .ok_or(StakingError::UnknownValidator)?;
        let stake = self
            .state
            .ledger
            .get(staker, to_validator)
            .ok_or(StakingError::ZeroRewards)?;
        let payable = v.highest_payable_epoch(self.state.current_sealed_epoch);
        if payable <= stake.stashed_rewards_until_epoch {
            return Err(StakingError::ZeroRewards);
        }
        self.stash_internal(staker, to_validator);
        Ok(())
    }

    /// Pays out the whole reward stash to the staker's balance.
    pub fn claim_rewards(
        &mut self,
        staker: Address,
        to_validator: ValidatorId,
    ) -> Result<Balance, StakingError> {
        self.state
            .registry
            .get(to_validator)
            .ok_or(StakingError::UnknownValidator)?;
        let saved = self
            .state
            .ledger
            .get(staker, to_validator)
            .cloned()
            .ok_or(StakingError::ZeroRewards)?;

        self.stash_internal(staker, to_validator);
        let total = self
            .state
            .ledger
            .get(staker, to_validator)
            .map(|s| s.paid_ordinary_reward())
            .unwrap_or(0);
        if total == 0 {
            self.restore_stake(staker, to_validator, saved);
            return Err(StakingError::ZeroRewards);
        }
        if self.balance.credit(staker, total).is_err() {
            self.restore_stake(staker, to_validator, saved);
            return Err(StakingError::TransferFailed);
        }
        if let Some(stake) = self.state.ledger.get_mut(staker, to_validator) {
            stake.stashed_rewards = Rewards::ZERO;
        }

        info!(%staker, validator = to_validator, amount = total, "rewards claimed");
        Ok(total)
    }

    /// Compounds the whole reward stash back into the stake. The share
    /// earned by locked capital rejoins the lock while it is active.
    pub fn restake_rewards(
        &mut self,
        staker: Address,
        to_validator: ValidatorId,
    ) -> Result<Balance, StakingError> {
        let now = self.time.now();
        let (auth, ok) = {
            let v = self
                .state
                .registry
                .get(to_validator)
                .ok_or(StakingError::UnknownValidator)?;
            (v.auth, v.status.is_ok())
        };
        if !ok {
            return Err(StakingError::ValidatorNotOK);
        }
        let saved = self
            .state
            .ledger
            .get(staker, to_validator)
            .cloned()
            .ok_or(StakingError::ZeroRewards)?;

        self.stash_internal(staker, to_validator);
        let (total, locked_part) = match self.state.ledger.get(staker, to_validator) {
            Some(s) => (
                s.paid_ordinary_reward(),
                if s.lockup.is_active(now) {
                    s.stashed_rewards.locked_total()
                } else {
                    0
                },
            ),
            None => (0, 0),
        };
        if total == 0 {
            self.restore_stake(staker, to_validator, saved);
            return Err(StakingError::ZeroRewards);
        }

        let received_after = self
            .state
            .registry
            .get(to_validator)
            .map(|v| v.received_stake + total)
            .unwrap_or(total);
        let self_stake = self
            .state
            .ledger
            .get(auth, to_validator)
            .map(|s| s.amount)
            .unwrap_or(0);
        let self_after = self_stake + if staker == auth { total } else { 0 };
        let max_ratio = self.state.constants.params().max_delegated_ratio;
        if received_after > apply_ratio(self_after, max_ratio) {
            self.restore_stake(staker, to_validator, saved);
            return Err(StakingError::ExceedsDelegationRatio);
        }

        if let Some(stake) = self.state.ledger.get_mut(staker, to_validator) {
            stake.stashed_rewards = Rewards::ZERO;
            stake.amount += total;
            stake.lockup.locked_stake += locked_part;
        }
        if let Some(v) = self.state.registry.get_mut(to_validator) {
            v.received_stake += total;
        }
        self.state.ledger.add_total_stake(total);

        info!(%staker, validator = to_validator, amount = total, locked_part, "rewards restaked");
        self.notify_weight(to_validator);
        Ok(total)
    }

    // ---- epoch sealing ----

    /// Stages the validator set and stake weights for the open epoch.
    /// Driver-only; must precede `seal_epoch` for the same epoch.
    pub fn seal_epoch_validators(
        &mut self,
        caller: Address,
        validator_ids: Vec<ValidatorId>,
    ) -> Result<(), StakingError> {
        if caller != self.state.driver {
            return Err(StakingError::Unauthorized);
        }
        let epoch = self.current_epoch();
        let mut received_stake = BTreeMap::new();
        for &id in &validator_ids {
            let v = self
                .state
                .registry
                .get(id)
                .ok_or(StakingError::UnknownValidator)?;
            received_stake.insert(id, v.received_stake);
        }
        self.state.snapshots.stage(StagedEpoch {
            epoch,
            validator_ids: validator_ids.clone(),
            received_stake,
        });

        debug!(epoch, validators = validator_ids.len(), "validator set sealed");
        for id in validator_ids {
            self.notify_weight(id);
        }
        Ok(())
    }

    /// Closes the open epoch: distributes epoch rewards by stake weight and
    /// uptime, stashes validator commissions, deactivates validators that
    /// exceeded both offline thresholds, appends the epoch snapshot and
    /// recalibrates the min gas price. Driver-only.
    pub fn seal_epoch(
        &mut self,
        caller: Address,
        offline_time: &[u64],
        offline_blocks: &[u64],
        uptime: &[u64],
        originated_txs_fee: &[Balance],
        epoch_gas_used: u128,
    ) -> Result<(), StakingError> {
        if caller != self.state.driver {
            return Err(StakingError::Unauthorized);
        }
        let sealing = self.current_epoch();
        let staged = match self.state.snapshots.staged() {
            Some(s) if s.epoch == sealing => s.clone(),
            _ => return Err(StakingError::ValidatorSetNotSealed),
        };
        let now = self.time.now();
        let prev_sealed = self.state.current_sealed_epoch;
        let prev_end = self
            .state
            .snapshots
            .end_time(prev_sealed)
            .ok_or(StakingError::ValidatorSetNotSealed)?;
        if now <= prev_end {
            return Err(StakingError::InvalidMetrics);
        }
        let duration = now - prev_end;

        let members: Vec<(ValidatorId, Balance)> = staged
            .validator_ids
            .iter()
            .map(|id| (*id, staged.received_stake.get(id).copied().unwrap_or(0)))
            .collect();
        let params = self.state.constants.params().clone();
        let outcome = sealer::compute_epoch_outcome(
            &members,
            offline_time,
            offline_blocks,
            uptime,
            originated_txs_fee,
            duration,
            &params,
        )?;

        for v in &outcome.validators {
            if v.offline {
                let flagged = self
                    .state
                    .registry
                    .get(v.id)
                    .map(|r| r.status.contains(OFFLINE_BIT))
                    .unwrap_or(true);
                if !flagged {
                    // cannot fail: the bit was checked absent above
                    let _ = self.state.registry.deactivate(v.id, OFFLINE_BIT, sealing, now);
                }
            }
        }

        let mut records = BTreeMap::new();
        for v in &outcome.validators {
            let commission = apply_ratio(v.raw_reward, params.validator_commission);
            let delegators_reward = v.raw_reward - commission;
            let rpt_delta = if v.received_stake > 0 {
                mul_div(delegators_reward, UNIT, v.received_stake)
            } else {
                0
            };
            let rpt_prev = self.state.snapshots.reward_per_token_at(v.id, prev_sealed);
            let (uptime_prev, fee_prev) = self.state.snapshots.accumulated_metrics_at(v.id, prev_sealed);
            records.insert(
                v.id,
                ValidatorEpochRecord {
                    received_stake: v.received_stake,
                    accumulated_reward_per_token: rpt_prev + rpt_delta,
                    accumulated_uptime: uptime_prev + v.uptime,
                    accumulated_originated_txs_fee: fee_prev + v.originated_txs_fee,
                    offline_time: v.offline_time,
                    offline_blocks: v.offline_blocks,
                },
            );

            // commission goes straight to the owner's stash, scaled by the
            // owner's own lock like any other reward
            if commission > 0 {
                if let Some(auth) = self.state.registry.get(v.id).map(|r| r.auth) {
                    let lock_duration = self
                        .state
                        .ledger
                        .get(auth, v.id)
                        .map(|s| if s.lockup.is_active(now) { s.lockup.duration } else { 0 })
                        .unwrap_or(0);
                    let scaled = scale_lockup_reward(commission, lock_duration, &params);
                    let stake = self.state.ledger.get_or_create(auth, v.id, prev_sealed);
                    stake.stashed_rewards.add(scaled);
                    stake.early_unlock_penalty += scaled.penalty_contribution();
                }
            }
        }

        let snapshot = EpochSnapshot {
            epoch: sealing,
            validator_ids: staged.validator_ids,
            validators: records,
            end_time: now,
            duration,
            epoch_fee: outcome.epoch_fee,
            total_base_reward_weight: outcome.total_base_reward_weight,
            total_tx_reward_weight: outcome.total_tx_reward_weight,
            base_reward_per_second: params.base_reward_per_second,
            total_stake: self.state.ledger.total_stake(),
        };
        self.state.snapshots.take_staged();
        self.state.snapshots.seal(snapshot);
        self.state.current_sealed_epoch = sealing;

        self.state.min_gas_price = gas_price::recalibrate(
            self.state.min_gas_price,
            duration,
            epoch_gas_used,
            params.target_gas_power_per_second,
            params.gas_price_balancing_counterweight,
        );

        info!(
            epoch = sealing,
            duration,
            epoch_fee = outcome.epoch_fee,
            min_gas_price = self.state.min_gas_price,
            "epoch sealed"
        );
        Ok(())
    }

    // ---- internals ----

    /// Realizes accrued rewards into the stash and advances the watermark.
    /// No-op for unknown pairs.
    fn stash_internal(&mut self, staker: Address, to_validator: ValidatorId) {
        let (accrued, payable) = {
            let state = &self.state;
            let Some(v) = state.registry.get(to_validator) else {
                return;
            };
            let Some(stake) = state.ledger.get(staker, to_validator) else {
                return;
            };
            let payable = v.highest_payable_epoch(state.current_sealed_epoch);
            let accrued = rewards_of(
                stake,
                v,
                &state.snapshots,
                state.constants.params(),
                state.current_sealed_epoch,
            );
            (accrued, payable)
        };
        let now = self.time.now();
        if let Some(stake) = self.state.ledger.get_mut(staker, to_validator) {
            stake.stashed_rewards.add(accrued);
            stake.early_unlock_penalty += accrued.penalty_contribution();
            stake.stashed_rewards_until_epoch = payable;
            // an expired lock no longer binds anything; release it once its
            // covered epochs are stashed so `locked_stake <= amount` keeps
            // holding through later amount reductions
            if stake.lockup.is_set() && !stake.lockup.is_active(now) {
                stake.lockup.clear();
                stake.early_unlock_penalty = 0;
            }
        }
    }

    fn restore_stake(&mut self, staker: Address, to_validator: ValidatorId, saved: Stake) {
        if let Some(stake) = self.state.ledger.get_mut(staker, to_validator) {
            *stake = saved;
        }
    }

    /// Deactivates a validator whose self-stake dropped below the minimum.
    fn enforce_self_stake_floor(&mut self, staker: Address, to_validator: ValidatorId) {
        let (auth, ok) = match self.state.registry.get(to_validator) {
            Some(v) => (v.auth, v.status.is_ok()),
            None => return,
        };
        if staker != auth || !ok {
            return;
        }
        let self_stake = self
            .state
            .ledger
            .get(auth, to_validator)
            .map(|s| s.amount)
            .unwrap_or(0);
        if self_stake < self.state.constants.params().min_self_stake {
            let epoch = self.current_epoch();
            let now = self.time.now();
            // cannot fail: status was just checked OK
            let _ = self
                .state
                .registry
                .deactivate(to_validator, WITHDRAWN_BIT, epoch, now);
        }
    }

    /// A delegator's lock must stay within its validator's own lock.
    fn check_validator_lock_covers(
        &self,
        auth: Address,
        to_validator: ValidatorId,
        lock_end: u64,
        now: u64,
    ) -> Result<(), StakingError> {
        let covered = self
            .state
            .ledger
            .get(auth, to_validator)
            .map(|s| s.lockup.is_active(now) && lock_end <= s.lockup.end_time)
            .unwrap_or(false);
        if covered {
            Ok(())
        } else {
            Err(StakingError::ValidatorLockupTooShort)
        }
    }

    fn notify_weight(&mut self, validator: ValidatorId) {
        let current = self
            .state
            .snapshots
            .staged()
            .and_then(|s| s.received_stake.get(&validator).copied())
            .unwrap_or(0);
        let next = self
            .state
            .registry
            .get(validator)
            .filter(|v| v.status.is_ok())
            .map(|v| v.received_stake)
            .unwrap_or(0);
        self.driver_sink.on_validator_weight(validator, current, next);
    }

    /// Structural conservation checks for tests and replay auditing.
    pub fn verify_invariants(&self) -> Result<(), String> {
        for v in self.state.registry.iter() {
            let sum: Balance = self
                .state
                .ledger
                .stakes_of_validator(v.id)
                .map(|(_, s)| s.amount)
                .sum();
            if sum != v.received_stake {
                return Err(format!(
                    "validator {}: received stake {} != stake sum {}",
                    v.id, v.received_stake, sum
                ));
            }
        }
        let mut total = 0;
        for ((staker, validator), stake) in self.state.ledger.iter() {
            let lockup = &stake.lockup;
            if lockup.locked_stake > stake.amount {
                return Err(format!(
                    "stake ({staker}, {validator}): locked {} exceeds amount {}",
                    lockup.locked_stake, stake.amount
                ));
            }
            let set = lockup.is_set();
            if set != (lockup.end_time != 0) || set != (lockup.duration != 0) || set != (lockup.from_epoch != 0) {
                return Err(format!("stake ({staker}, {validator}): lockup fields not all-or-nothing"));
            }
            total += stake.amount;
        }
        if total != self.state.ledger.total_stake() {
            return Err(format!(
                "total stake {} != stake sum {}",
                self.state.ledger.total_stake(),
                total
            ));
        }
        Ok(())
    }
}
