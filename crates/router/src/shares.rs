//! # Target-Share Normalization
//!
//! Converts per-module target-share settings into concrete basis-point
//! allocations that sum to exactly 10_000.
//!
//! A share equal to [`TARGET_SHARE_UNSET`] means "unset — split whatever the
//! defined shares leave over, equally". The remainder of the equal split is
//! handed out one basis point at a time to the first unset slots in input
//! order, so the result is fully deterministic given the registry's stable
//! ascending-ID enumeration order.
//!
//! This function is PURE — no mutations, no side effects.

use lsr_common::{TARGET_SHARE_UNSET, TOTAL_BASIS_POINTS};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShareError {
    /// The defined (non-sentinel) shares already exceed 100%.
    #[error("defined shares sum to {total} BP, exceeding {TOTAL_BASIS_POINTS}")]
    BasisPointsOverflow { total: u32 },

    /// A share above 10_000 BP is meaningless and always a caller bug.
    #[error("share value {0} exceeds {TOTAL_BASIS_POINTS} BP")]
    ShareAboveMax(u16),
}

/// Normalize target shares, resolving the unset sentinel.
///
/// - With no sentinel present, the input is returned unchanged (the defined
///   shares are allowed to sum below 100% in that case — the caller opted
///   out of full allocation).
/// - With sentinels present, the remaining basis points are split evenly
///   over the sentinel slots; the division remainder goes one unit each to
///   the first `remainder` sentinel slots in order. The output then sums to
///   exactly 10_000.
pub fn normalize_target_shares(values: &[u16]) -> Result<Vec<u16>, ShareError> {
    let mut total_defined: u32 = 0;
    let mut undefined_count: u32 = 0;
    for &v in values {
        if v > TOTAL_BASIS_POINTS {
            return Err(ShareError::ShareAboveMax(v));
        }
        if v == TARGET_SHARE_UNSET {
            undefined_count += 1;
        } else {
            total_defined += v as u32;
        }
    }
    if total_defined > TOTAL_BASIS_POINTS as u32 {
        return Err(ShareError::BasisPointsOverflow {
            total: total_defined,
        });
    }
    if undefined_count == 0 {
        return Ok(values.to_vec());
    }

    let remaining = TOTAL_BASIS_POINTS as u32 - total_defined;
    let share = remaining / undefined_count;
    let mut remainder = remaining % undefined_count;

    let mut out = Vec::with_capacity(values.len());
    for &v in values {
        if v == TARGET_SHARE_UNSET {
            let extra = if remainder > 0 {
                remainder -= 1;
                1
            } else {
                0
            };
            // share + extra ≤ 10_000 by construction, the cast cannot lose.
            out.push((share + extra) as u16);
        } else {
            out.push(v);
        }
    }
    Ok(out)
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
