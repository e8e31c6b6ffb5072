// Epoch sealing math - per-validator weights and raw rewards
// Pure functions consumed by the engine's sealEpoch transaction; nothing
// here touches state.

use super::constants::Params;
use super::StakingError;
use crate::types::{apply_ratio, mul_div, Balance, ValidatorId, UNIT};

/// Per-validator result of closing an epoch.
#[derive(Debug, Clone)]
pub struct SealedValidatorOutcome {
    pub id: ValidatorId,

    /// Stake weight the epoch was opened with
    pub received_stake: Balance,

    pub uptime: u64,
    pub offline_time: u64,
    pub offline_blocks: u64,
    pub originated_txs_fee: Balance,

    /// Exceeded both offline thresholds: earns nothing and gets marked
    pub offline: bool,

    pub base_reward_weight: u128,
    pub tx_reward_weight: u128,

    /// Whole-epoch reward before the commission split
    pub raw_reward: Balance,
}

/// Aggregate result of closing an epoch.
#[derive(Debug, Clone)]
pub struct EpochOutcome {
    pub validators: Vec<SealedValidatorOutcome>,
    pub total_base_reward_weight: u128,
    pub total_tx_reward_weight: u128,
    pub epoch_fee: Balance,
}

/// Computes weights and raw rewards for the epoch being closed.
///
/// `members` are the staged (validator, stake) pairs; the metric slices are
/// indexed in parallel. Base rewards split `duration * baseRewardPerSecond`
/// proportionally to `stake * uptime / duration`; fee rewards split the
/// non-burnt, non-treasury share of epoch fees proportionally to
/// `originatedFee * uptime / duration`.
pub fn compute_epoch_outcome(
    members: &[(ValidatorId, Balance)],
    offline_time: &[u64],
    offline_blocks: &[u64],
    uptime: &[u64],
    originated_txs_fee: &[Balance],
    duration: u64,
    params: &Params,
) -> Result<EpochOutcome, StakingError> {
    let n = members.len();
    if offline_time.len() != n
        || offline_blocks.len() != n
        || uptime.len() != n
        || originated_txs_fee.len() != n
        || duration == 0
    {
        return Err(StakingError::InvalidMetrics);
    }
    if uptime.iter().any(|&u| u > duration) {
        return Err(StakingError::InvalidMetrics);
    }

    let mut validators: Vec<SealedValidatorOutcome> = Vec::with_capacity(n);
    let mut total_base_weight = 0u128;
    let mut total_tx_weight = 0u128;
    let mut epoch_fee = 0;

    for (i, &(id, received_stake)) in members.iter().enumerate() {
        let offline = offline_time[i] > params.offline_penalty_threshold_time
            && offline_blocks[i] > params.offline_penalty_threshold_blocks;

        let (base_weight, tx_weight) = if offline {
            (0, 0)
        } else {
            (
                mul_div(received_stake, uptime[i] as u128, duration as u128),
                mul_div(originated_txs_fee[i], uptime[i] as u128, duration as u128),
            )
        };

        total_base_weight += base_weight;
        total_tx_weight += tx_weight;
        epoch_fee += originated_txs_fee[i];

        validators.push(SealedValidatorOutcome {
            id,
            received_stake,
            uptime: uptime[i],
            offline_time: offline_time[i],
            offline_blocks: offline_blocks[i],
            originated_txs_fee: originated_txs_fee[i],
            offline,
            base_reward_weight: base_weight,
            tx_reward_weight: tx_weight,
            raw_reward: 0,
        });
    }

    let total_base_reward = duration as Balance * params.base_reward_per_second;
    let fee_reward_pool = apply_ratio(
        epoch_fee,
        UNIT - params.burnt_fee_share - params.treasury_fee_share,
    );

    for v in &mut validators {
        let base = if total_base_weight > 0 {
            mul_div(total_base_reward, v.base_reward_weight, total_base_weight)
        } else {
            0
        };
        let tx = if total_tx_weight > 0 {
            mul_div(fee_reward_pool, v.tx_reward_weight, total_tx_weight)
        } else {
            0
        };
        v.raw_reward = base + tx;
    }

    Ok(EpochOutcome {
        validators,
        total_base_reward_weight: total_base_weight,
        total_tx_reward_weight: total_tx_weight,
        epoch_fee,
    })
}
