// Validator registry - identity, status bitmask, received stake
// Status is a monotonic union of fault bits: once non-OK, never OK again.

use super::StakingError;
use crate::types::{Address, Balance, EpochNumber, Timestamp, ValidatorId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Validator deactivated voluntarily or by dropping below the self-stake floor
pub const WITHDRAWN_BIT: u64 = 1;

/// Validator exceeded the offline penalty thresholds during a sealed epoch
pub const OFFLINE_BIT: u64 = 1 << 3;

/// Validator produced conflicting blocks; subject to slashing
pub const DOUBLESIGN_BIT: u64 = 1 << 7;

/// Bits that make a validator a cheater (stakers' withdrawals get scaled
/// by the slashing refund ratio)
pub const CHEATER_MASK: u64 = DOUBLESIGN_BIT;

/// Monotonic fault bitmask. `OK` is the empty set; bits are only ever added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ValidatorStatus(u64);

impl ValidatorStatus {
    pub const OK: ValidatorStatus = ValidatorStatus(0);

    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }

    pub fn is_cheater(&self) -> bool {
        self.0 & CHEATER_MASK != 0
    }

    pub fn contains(&self, bits: u64) -> bool {
        self.0 & bits == bits
    }

    pub fn union(&self, bits: u64) -> ValidatorStatus {
        ValidatorStatus(self.0 | bits)
    }
}

/// Registered validator. Never deleted; deactivated at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validator {
    /// Sequential identifier, > 0
    pub id: ValidatorId,

    /// Owner identity; the self-stake is the stake of this address
    pub auth: Address,

    /// Opaque consensus public key (never verified here)
    pub pubkey: Vec<u8>,

    /// Fault bitmask; empty while the validator is in good standing
    pub status: ValidatorStatus,

    /// Sum of all stakes delegated to this validator (incl. self-stake)
    pub received_stake: Balance,

    pub created_epoch: EpochNumber,
    pub created_time: Timestamp,

    /// Zero while active; set exactly once, on the first OK -> non-OK transition
    pub deactivated_epoch: EpochNumber,
    pub deactivated_time: Timestamp,
}

impl Validator {
    /// Last epoch this validator can earn rewards for.
    pub fn highest_payable_epoch(&self, sealed: EpochNumber) -> EpochNumber {
        if self.deactivated_epoch != 0 {
            sealed.min(self.deactivated_epoch)
        } else {
            sealed
        }
    }
}

/// Validator identity store. Ids are allocated sequentially and survive
/// deactivation; lookups by owner address are kept in a parallel index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorRegistry {
    validators: BTreeMap<ValidatorId, Validator>,
    by_auth: BTreeMap<Address, ValidatorId>,
    last_validator_id: ValidatorId,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_validator_id(&self) -> ValidatorId {
        self.last_validator_id
    }

    pub fn get(&self, id: ValidatorId) -> Option<&Validator> {
        self.validators.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ValidatorId) -> Option<&mut Validator> {
        self.validators.get_mut(&id)
    }

    pub fn id_by_auth(&self, auth: Address) -> Option<ValidatorId> {
        self.by_auth.get(&auth).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Validator> {
        self.validators.values()
    }

    /// Registers a new validator. The self-stake minimum is checked by the
    /// engine, which owns the attached amount.
    pub fn register(
        &mut self,
        auth: Address,
        pubkey: Vec<u8>,
        epoch: EpochNumber,
        time: Timestamp,
    ) -> Result<ValidatorId, StakingError> {
        if pubkey.is_empty() {
            return Err(StakingError::InvalidPubkey);
        }
        if self.by_auth.contains_key(&auth) {
            return Err(StakingError::DuplicateIdentity);
        }

        let id = self.last_validator_id + 1;
        self.last_validator_id = id;
        self.by_auth.insert(auth, id);
        self.validators.insert(
            id,
            Validator {
                id,
                auth,
                pubkey,
                status: ValidatorStatus::OK,
                received_stake: 0,
                created_epoch: epoch,
                created_time: time,
                deactivated_epoch: 0,
                deactivated_time: 0,
            },
        );

        info!(validator = id, %auth, "validator created");
        Ok(id)
    }

    /// ORs fault bits into the validator's status. Fails if the bits are
    /// empty or already present. Records the deactivation epoch/time on the
    /// first OK -> non-OK transition only.
    pub fn deactivate(
        &mut self,
        id: ValidatorId,
        bits: u64,
        epoch: EpochNumber,
        time: Timestamp,
    ) -> Result<(), StakingError> {
        let validator = self.validators.get_mut(&id).ok_or(StakingError::UnknownValidator)?;
        if bits == 0 || validator.status.contains(bits) {
            return Err(StakingError::WrongStatus);
        }

        let was_ok = validator.status.is_ok();
        validator.status = validator.status.union(bits);
        if was_ok {
            validator.deactivated_epoch = epoch;
            validator.deactivated_time = time;
        }

        info!(validator = id, bits, epoch, "validator deactivated");
        Ok(())
    }
}
