// Invariant Tests
// Randomized operation sequences against the conservation rules: received
// stake always equals the sum of its delegations, locks never exceed their
// stake, penalties never exceed the unlocked amount.

use super::{addr, new_engine, seal_epoch_after, DAY, GENESIS};
use crate::staking::constants::Params;
use crate::staking::SfcState;
use crate::time::ManualTimeSource;
use crate::types::{Address, Balance, TOKEN};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Delegate { staker: usize, validator: u64, amount: Balance },
    Undelegate { staker: usize, validator: u64, amount: Balance },
    Lock { staker: usize, validator: u64, days: u64, amount: Balance },
    Unlock { staker: usize, validator: u64, amount: Balance },
    Claim { staker: usize, validator: u64 },
    Restake { staker: usize, validator: u64 },
    SealEpoch,
    Advance { days: u64 },
}

// stakers 2 and 3 are the validator owners, so sequences can also drive a
// validator below its self-stake floor
fn stakers() -> [Address; 4] {
    [addr(10), addr(11), addr(1), addr(2)]
}

fn arb_op() -> impl Strategy<Value = Op> {
    let staker = 0..4usize;
    let validator = 1..=2u64;
    let amount = 1u128..=5 * TOKEN;
    prop_oneof![
        (staker.clone(), validator.clone(), amount.clone())
            .prop_map(|(staker, validator, amount)| Op::Delegate { staker, validator, amount }),
        (staker.clone(), validator.clone(), amount.clone())
            .prop_map(|(staker, validator, amount)| Op::Undelegate { staker, validator, amount }),
        (staker.clone(), validator.clone(), 14..=365u64, amount.clone())
            .prop_map(|(staker, validator, days, amount)| Op::Lock { staker, validator, days, amount }),
        (staker.clone(), validator.clone(), amount)
            .prop_map(|(staker, validator, amount)| Op::Unlock { staker, validator, amount }),
        (staker.clone(), validator.clone())
            .prop_map(|(staker, validator)| Op::Claim { staker, validator }),
        (staker, validator).prop_map(|(staker, validator)| Op::Restake { staker, validator }),
        Just(Op::SealEpoch),
        // long enough jumps that locks placed earlier in a sequence expire
        (1..=200u64).prop_map(|days| Op::Advance { days }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn proptest_operations_preserve_conservation(ops in proptest::collection::vec(arb_op(), 1..40)) {
        let clock = ManualTimeSource::new(GENESIS);
        let mut sfc = new_engine(&clock, Params {
            min_self_stake: 10 * TOKEN,
            base_reward_per_second: 1,
            ..Params::default()
        });
        sfc.create_validator(addr(1), vec![0x01; 33], 10 * TOKEN).unwrap();
        sfc.create_validator(addr(2), vec![0x02; 33], 10 * TOKEN).unwrap();
        let stakers = stakers();

        // individual operations may fail; the invariants must hold either way
        for op in ops {
            match op {
                Op::Delegate { staker, validator, amount } => {
                    let _ = sfc.delegate(stakers[staker], validator, amount);
                }
                Op::Undelegate { staker, validator, amount } => {
                    let _ = sfc.undelegate(stakers[staker], validator, staker as u64, amount);
                }
                Op::Lock { staker, validator, days, amount } => {
                    let _ = sfc.lock_stake(stakers[staker], validator, days * DAY, amount);
                }
                Op::Unlock { staker, validator, amount } => {
                    if let Ok((penalty, _)) = sfc.unlock_stake(stakers[staker], validator, amount) {
                        prop_assert!(penalty <= amount, "penalty {penalty} exceeds unlocked {amount}");
                    }
                }
                Op::Claim { staker, validator } => {
                    let _ = sfc.claim_rewards(stakers[staker], validator);
                }
                Op::Restake { staker, validator } => {
                    let _ = sfc.restake_rewards(stakers[staker], validator);
                }
                Op::SealEpoch => {
                    seal_epoch_after(&mut sfc, &clock, &[1, 2], DAY);
                }
                Op::Advance { days } => {
                    clock.advance(days * DAY);
                }
            }
            let check = sfc.verify_invariants();
            prop_assert!(check.is_ok(), "invariant violated: {:?}", check);
        }

        // whatever the sequence did, the state must survive a snapshot cycle
        let bytes = bincode::serialize(sfc.state()).unwrap();
        let restored: SfcState = bincode::deserialize(&bytes).unwrap();
        prop_assert_eq!(bincode::serialize(&restored).unwrap(), bytes);
    }

    #[test]
    fn proptest_rewards_monotone_across_seals(
        amount in TOKEN..=10 * TOKEN,
        epochs in 1usize..6,
    ) {
        let clock = ManualTimeSource::new(GENESIS);
        let mut sfc = new_engine(&clock, Params {
            min_self_stake: 10 * TOKEN,
            base_reward_per_second: 1,
            ..Params::default()
        });
        let v = sfc.create_validator(addr(1), vec![0x01; 33], 10 * TOKEN).unwrap();
        let d = addr(10);
        sfc.delegate(d, v, amount).unwrap();

        let mut last = 0;
        for _ in 0..epochs {
            seal_epoch_after(&mut sfc, &clock, &[v], DAY);
            let pending = sfc.pending_rewards(d, v);
            prop_assert!(pending >= last, "rewards shrank from {last} to {pending}");
            last = pending;
        }
    }

    #[test]
    fn proptest_equal_stakes_earn_equal_rewards(
        amount in 1u128..=10 * TOKEN,
        epochs in 1usize..4,
    ) {
        let clock = ManualTimeSource::new(GENESIS);
        let mut sfc = new_engine(&clock, Params {
            min_self_stake: 10 * TOKEN,
            base_reward_per_second: 1,
            ..Params::default()
        });
        let v = sfc.create_validator(addr(1), vec![0x01; 33], 10 * TOKEN).unwrap();
        sfc.delegate(addr(10), v, amount).unwrap();
        sfc.delegate(addr(11), v, amount).unwrap();

        for _ in 0..epochs {
            seal_epoch_after(&mut sfc, &clock, &[v], DAY);
        }
        prop_assert_eq!(
            sfc.pending_rewards(addr(10), v),
            sfc.pending_rewards(addr(11), v)
        );
    }
}
