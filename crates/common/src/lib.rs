//! # LSR Common Crate
//!
//! Shared primitives for the liquid-staking router core.
//!
//! ## Modules
//! - `types`: address/pubkey newtypes, basis-point constants, checked narrowing casts
//! - `constants`: protocol ceilings and wire-format widths
//! - `rate_limiter`: replenishing-quota primitive (pure state transitions)

pub mod constants;
pub mod rate_limiter;
pub mod types;

pub use rate_limiter::{RateLimitError, RateLimitState};
pub use types::{checked_u64, Address, CastError, PublicKey};
pub use types::{TARGET_SHARE_UNSET, TOTAL_BASIS_POINTS};
