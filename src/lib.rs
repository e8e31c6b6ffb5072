// SFC Engine - epoch-based staking and reward accounting
// Principle: Lazy reward realization, strict conservation, deterministic replay
//
// The crate models a proof-of-stake fee contract: validators register and
// receive delegations, epochs are sealed in two phases by a trusted driver,
// and rewards accrue lazily from cumulative per-epoch counters. All value
// movement in and out of the engine goes through injected sinks.

pub mod staking;
pub mod time;
pub mod types;

#[cfg(test)]
mod tests;

pub use staking::{BalanceSink, DriverSink, Sfc, SfcState, StakingError};
pub use time::{ManualTimeSource, SystemTimeSource, TimeSource};
