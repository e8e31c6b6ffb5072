// Staking - SFC staking and reward accounting
// Principle: Lazy reward realization, strict conservation, deterministic replay

pub mod constants;
pub mod engine;
pub mod epoch;
pub mod gas_price;
pub mod ledger;
pub mod registry;
pub mod rewards;
pub mod sealer;

use thiserror::Error;

/// Named failure conditions. Every error aborts the triggering operation
/// with no partial state mutation; resubmission is the caller's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StakingError {
    #[error("caller is not authorized")]
    Unauthorized,
    #[error("empty pubkey")]
    InvalidPubkey,
    #[error("validator already exists for this identity")]
    DuplicateIdentity,
    #[error("insufficient self-stake")]
    InsufficientSelfStake,
    #[error("validator doesn't exist")]
    UnknownValidator,
    #[error("validator isn't active")]
    ValidatorNotOK,
    #[error("wrong status bits")]
    WrongStatus,
    #[error("validator's delegations limit is exceeded")]
    ExceedsDelegationRatio,
    #[error("zero amount")]
    ZeroAmount,
    #[error("zero rewards")]
    ZeroRewards,
    #[error("not locked up")]
    NotLockedUp,
    #[error("lock already exists")]
    ExistingLockConflict,
    #[error("not enough locked stake")]
    InsufficientLockedStake,
    #[error("not enough unlocked stake")]
    InsufficientUnlockedStake,
    #[error("incorrect lockup duration")]
    DurationOutOfRange,
    #[error("validator's lockup will end too early")]
    ValidatorLockupTooShort,
    #[error("too frequent relocks")]
    TooFrequentRelocks,
    #[error("request doesn't exist")]
    RequestNotFound,
    #[error("request id already exists")]
    RequestIdInUse,
    #[error("not enough time or epochs passed")]
    NotYetMatured,
    #[error("validator isn't slashed")]
    ValidatorNotSlashed,
    #[error("validator set wasn't sealed for the open epoch")]
    ValidatorSetNotSealed,
    #[error("invalid epoch metrics")]
    InvalidMetrics,
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("balance transfer failed")]
    TransferFailed,
}

pub use engine::{BalanceSink, DriverSink, Sfc, SfcState, TransferRejected};
pub use registry::{Validator, ValidatorRegistry, ValidatorStatus};
