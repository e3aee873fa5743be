//! # Allocation Engine
//!
//! Pouring math: distribute a deposit or withdrawal amount across modules so
//! each module's balance share of the new total approaches its target share,
//! without exceeding spare capacity (deposits) or current balance
//! (withdrawals).
//!
//! This is an integer-only two-pass heuristic, not an exact optimizer:
//!
//! - Pass 1 fills each module toward its proportional target, in the stable
//!   module enumeration order, biasing funds to under-allocated modules.
//! - Pass 2 pours whatever pass 1 could not place into any remaining spare
//!   room, again in order.
//!
//! Anything still unplaced is returned as `leftover` rather than failing:
//! capacity exhaustion is an expected operating condition. What is NOT
//! tolerated is a broken conservation sum — `sum(fills) + leftover` must
//! equal the requested amount exactly, and no fill may exceed its clamp.
//! Both are re-checked after the passes; a violation means a bug in the
//! engine itself, not bad input.

use lsr_common::TOTAL_BASIS_POINTS;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// The shares/balances/capacities slices must describe the same modules.
    #[error("allocation input length mismatch: {shares} shares, {balances} balances, {capacities} capacities")]
    LengthMismatch {
        shares: usize,
        balances: usize,
        capacities: usize,
    },

    /// Target computation overflowed u128. Only reachable with absurd pool
    /// sizes, but checked rather than wrapped.
    #[error("arithmetic overflow computing allocation targets")]
    ArithmeticOverflow,

    /// The engine produced fills that do not conserve the requested amount
    /// or exceed a clamp. Always a bug.
    #[error("allocation conservation violated: fills {filled} + leftover {leftover} != amount {amount}")]
    ConservationViolated {
        filled: u128,
        leftover: u128,
        amount: u128,
    },
}

/// Result of one allocation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// Per-module fill, in the input enumeration order.
    pub fills: Vec<u128>,
    /// Total placed: `amount - leftover`.
    pub allocated: u128,
    /// Amount that could not be placed under the clamps.
    pub leftover: u128,
}

/// Per-module balance target after the move: `new_total * share / 10_000`.
fn target_balance(new_total: u128, share_bp: u16) -> Result<u128, AllocationError> {
    new_total
        .checked_mul(share_bp as u128)
        .map(|v| v / TOTAL_BASIS_POINTS as u128)
        .ok_or(AllocationError::ArithmeticOverflow)
}

/// Distribute `amount` of new deposits across modules.
///
/// Each module's fill is clamped by its spare capacity
/// (`capacity.saturating_sub(balance)`); a fully saturated module receives
/// zero regardless of its target share. Targets are computed against the
/// post-deposit total `total_pool + amount`.
pub fn allocate_deposit(
    shares: &[u16],
    balances: &[u128],
    capacities: &[u128],
    total_pool: u128,
    amount: u128,
) -> Result<Allocation, AllocationError> {
    if shares.len() != balances.len() || shares.len() != capacities.len() {
        return Err(AllocationError::LengthMismatch {
            shares: shares.len(),
            balances: balances.len(),
            capacities: capacities.len(),
        });
    }

    let new_total = total_pool
        .checked_add(amount)
        .ok_or(AllocationError::ArithmeticOverflow)?;
    let mut fills = vec![0u128; shares.len()];
    let mut remaining = amount;

    // Pass 1: fill toward the proportional target, clamped by spare capacity.
    for i in 0..shares.len() {
        if remaining == 0 {
            break;
        }
        let spare = capacities[i].saturating_sub(balances[i]);
        let target = target_balance(new_total, shares[i])?;
        let wanted = target.saturating_sub(balances[i]);
        let fill = wanted.min(spare).min(remaining);
        fills[i] = fill;
        remaining -= fill;
    }

    // Pass 2: pour the capacity-constrained remainder into any spare room.
    for i in 0..shares.len() {
        if remaining == 0 {
            break;
        }
        let spare = capacities[i].saturating_sub(balances[i]);
        let extra = (spare - fills[i]).min(remaining);
        fills[i] += extra;
        remaining -= extra;
    }

    finish(fills, remaining, amount, |i, fill| {
        fill <= capacities[i].saturating_sub(balances[i])
    })
}

/// Distribute `amount` of withdrawals across modules.
///
/// Symmetric to deposits but without a capacity ceiling: a module can always
/// be drained toward zero, bounded only by its current balance. Targets are
/// computed against the post-withdrawal total; modules above their protect
/// share are drained first.
///
/// A zero pool has no meaningful targets and nothing to drain: the whole
/// amount comes back as leftover.
pub fn allocate_withdrawal(
    shares: &[u16],
    balances: &[u128],
    total_pool: u128,
    amount: u128,
) -> Result<Allocation, AllocationError> {
    if shares.len() != balances.len() {
        return Err(AllocationError::LengthMismatch {
            shares: shares.len(),
            balances: balances.len(),
            capacities: balances.len(),
        });
    }
    if total_pool == 0 {
        return Ok(Allocation {
            fills: vec![0u128; shares.len()],
            allocated: 0,
            leftover: amount,
        });
    }

    let new_total = total_pool.saturating_sub(amount);
    let mut fills = vec![0u128; shares.len()];
    let mut remaining = amount;

    // Pass 1: drain each module down toward its share of the reduced total.
    for i in 0..shares.len() {
        if remaining == 0 {
            break;
        }
        let target = target_balance(new_total, shares[i])?;
        let excess = balances[i].saturating_sub(target);
        let fill = excess.min(remaining);
        fills[i] = fill;
        remaining -= fill;
    }

    // Pass 2: drain remaining balances in order.
    for i in 0..shares.len() {
        if remaining == 0 {
            break;
        }
        let extra = (balances[i] - fills[i]).min(remaining);
        fills[i] += extra;
        remaining -= extra;
    }

    finish(fills, remaining, amount, |i, fill| fill <= balances[i])
}

/// Re-check conservation and the per-module clamp before returning.
fn finish(
    fills: Vec<u128>,
    leftover: u128,
    amount: u128,
    clamp_ok: impl Fn(usize, u128) -> bool,
) -> Result<Allocation, AllocationError> {
    let filled: u128 = fills.iter().sum();
    let conserved = filled.checked_add(leftover) == Some(amount);
    let clamped = fills.iter().enumerate().all(|(i, &f)| clamp_ok(i, f));
    if !conserved || !clamped {
        return Err(AllocationError::ConservationViolated {
            filled,
            leftover,
            amount,
        });
    }
    if leftover > 0 {
        debug!("allocation left {} of {} unplaced", leftover, amount);
    }
    Ok(Allocation {
        fills,
        allocated: filled,
        leftover,
    })
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
