// Fundamental SFC types
// Principle: Minimal, auditable, durable

pub mod primitives;

pub use primitives::*;
