//! # Exit Accounting Reconciler
//!
//! Drives the per-frame exited-validator reporting protocol:
//!
//! ```text
//! Idle → TotalsSubmitted → PerOperatorDetailInProgress → ReportingFinished → Idle
//! ```
//!
//! 1. [`update_exited_validators_counts`] — one call per frame with
//!    router-level totals per module.
//! 2. [`report_exited_counts_by_operator`] — any number of calls forwarding
//!    packed per-operator detail to the module backends.
//! 3. [`finish_exited_counts_reporting`] — finalization callback to every
//!    module whose own summary has caught up with the stored total.
//!
//! ## Two-tier callback policy
//!
//! Backend notifications that fail with NON-EMPTY revert data are swallowed
//! and logged — the module keeps its degraded state until the next frame.
//! EMPTY revert data is propagated as fatal (see `backend` module docs).
//! Data-carrying calls (summary reads, per-operator report forwarding) are
//! always fatal on failure: the protocol cannot proceed without them.

use crate::backend::{BackendDirectory, BackendError};
use crate::state::{ModuleStatus, RouterState};
use lsr_common::constants::{OPERATOR_COUNT_BYTES, OPERATOR_ID_BYTES};
use lsr_common::{checked_u64, CastError};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcilerError {
    #[error("staking module {0} is not registered")]
    ModuleNotFound(u32),

    #[error("no backend registered for module {0}")]
    BackendUnavailable(u32),

    #[error("module id and exited count arrays differ in length: {ids} vs {counts}")]
    LengthMismatch { ids: usize, counts: usize },

    #[error("exited-count report must not be empty")]
    EmptyReport,

    #[error("module {0} appears more than once in the exited-count report")]
    DuplicateModuleId(u32),

    #[error("newly-exited total overflows u64")]
    NewlyExitedOverflow,

    #[error("packed operator ids length {0} is not a multiple of {OPERATOR_ID_BYTES}")]
    UnalignedOperatorIds(usize),

    #[error("packed counts length {0} is not a multiple of {OPERATOR_COUNT_BYTES}")]
    UnalignedCounts(usize),

    #[error("packed report element counts differ: {ids} operator ids vs {counts} counts")]
    ElementCountMismatch { ids: usize, counts: usize },

    #[error("packed exited count for element {index} out of range: {source}")]
    CountOutOfRange {
        index: usize,
        #[source]
        source: CastError,
    },

    #[error(
        "exited validators count of module {module_id} cannot decrease: stored {stored}, reported {reported}"
    )]
    ExitedCountCannotDecrease {
        module_id: u32,
        stored: u64,
        reported: u64,
    },

    #[error(
        "module {module_id} reported {reported} exited validators, above its {deposited} deposited"
    )]
    ExitedCountExceedsDeposited {
        module_id: u32,
        reported: u64,
        deposited: u64,
    },

    /// Compare-and-swap conflict on the privileged override: the caller's
    /// attested current value is stale.
    #[error(
        "stale expected value for module {module_id}: stored {stored}, caller asserted {expected}"
    )]
    StaleExpectedValue {
        module_id: u32,
        stored: u64,
        expected: u64,
    },

    /// A backend call failed with empty revert data, or a data-carrying call
    /// failed at all. Never swallowed.
    #[error("fatal backend failure for module {module_id}: {source}")]
    FatalBackendFailure {
        module_id: u32,
        #[source]
        source: BackendError,
    },
}

fn fatal(module_id: u32) -> impl FnOnce(BackendError) -> ReconcilerError {
    move |source| ReconcilerError::FatalBackendFailure { module_id, source }
}

/// Apply the two-tier policy to a notification result.
///
/// Returns `Ok(true)` when the callback succeeded, `Ok(false)` when a
/// business-logic revert was swallowed (and logged), and an error when the
/// failure carried no revert data.
fn notify_module(
    module_id: u32,
    callback: &'static str,
    result: Result<(), BackendError>,
) -> Result<bool, ReconcilerError> {
    match result {
        Ok(()) => Ok(true),
        Err(err) if err.is_fatal() => Err(ReconcilerError::FatalBackendFailure {
            module_id,
            source: err,
        }),
        Err(err) => {
            warn!(
                "module {} {} callback reverted, skipping until next frame: {}",
                module_id, callback, err
            );
            Ok(false)
        }
    }
}

/// Phase 1: apply router-level exited totals for a set of modules.
///
/// All validation happens before any mutation: a rejected module leaves
/// every count untouched. Returns the protocol-wide newly-exited delta.
///
/// A module whose own live summary still trails the previously stored total
/// has simply not processed all per-operator detail yet; that is logged as
/// an incomplete-reporting warning, not a failure.
pub fn update_exited_validators_counts(
    state: &mut RouterState,
    directory: &dyn BackendDirectory,
    module_ids: &[u32],
    exited_counts: &[u64],
) -> Result<u64, ReconcilerError> {
    if module_ids.len() != exited_counts.len() {
        return Err(ReconcilerError::LengthMismatch {
            ids: module_ids.len(),
            counts: exited_counts.len(),
        });
    }
    if module_ids.is_empty() {
        return Err(ReconcilerError::EmptyReport);
    }

    // Validation pass: uniqueness, existence, monotonicity, deposited bound.
    // The newly-exited total is also summed here so an overflow rejects the
    // whole report before any count is written.
    let mut seen = HashSet::with_capacity(module_ids.len());
    let mut newly_exited: u64 = 0;
    let mut summaries = Vec::with_capacity(module_ids.len());
    for (&module_id, &reported) in module_ids.iter().zip(exited_counts) {
        if !seen.insert(module_id) {
            return Err(ReconcilerError::DuplicateModuleId(module_id));
        }
        let stored = state
            .module(module_id)
            .ok_or(ReconcilerError::ModuleNotFound(module_id))?
            .accounting
            .exited_validators_count;
        let summary = directory
            .backend(module_id)
            .ok_or(ReconcilerError::BackendUnavailable(module_id))?
            .summary()
            .map_err(fatal(module_id))?;
        if reported < stored {
            return Err(ReconcilerError::ExitedCountCannotDecrease {
                module_id,
                stored,
                reported,
            });
        }
        if reported > summary.deposited_validators {
            return Err(ReconcilerError::ExitedCountExceedsDeposited {
                module_id,
                reported,
                deposited: summary.deposited_validators,
            });
        }
        newly_exited = newly_exited
            .checked_add(reported - stored)
            .ok_or(ReconcilerError::NewlyExitedOverflow)?;
        summaries.push((stored, summary));
    }

    // Mutation pass.
    for ((&module_id, &reported), (stored, summary)) in
        module_ids.iter().zip(exited_counts).zip(summaries)
    {
        if summary.exited_validators < stored {
            warn!(
                "module {} exited-count reporting incomplete: backend reports {}, router had {}",
                module_id, summary.exited_validators, stored
            );
        }
        let module = state
            .module_mut(module_id)
            .ok_or(ReconcilerError::ModuleNotFound(module_id))?;
        module.accounting.exited_validators_count = reported;
    }
    state.frame_newly_exited = state.frame_newly_exited.saturating_add(newly_exited);
    info!(
        "frame totals submitted for {} modules, {} newly exited",
        module_ids.len(),
        newly_exited
    );
    Ok(newly_exited)
}

/// Phase 2: forward validated per-operator detail to one module backend.
///
/// The packed encoding is 8 bytes per operator ID and 16 bytes per count,
/// with matching element counts and at least one element. May be called
/// multiple times per frame for different operator subsets.
pub fn report_exited_counts_by_operator(
    state: &RouterState,
    directory: &mut dyn BackendDirectory,
    module_id: u32,
    packed_operator_ids: &[u8],
    packed_counts: &[u8],
) -> Result<(), ReconcilerError> {
    if state.module(module_id).is_none() {
        return Err(ReconcilerError::ModuleNotFound(module_id));
    }
    if packed_operator_ids.is_empty() || packed_counts.is_empty() {
        return Err(ReconcilerError::EmptyReport);
    }
    if packed_operator_ids.len() % OPERATOR_ID_BYTES != 0 {
        return Err(ReconcilerError::UnalignedOperatorIds(
            packed_operator_ids.len(),
        ));
    }
    if packed_counts.len() % OPERATOR_COUNT_BYTES != 0 {
        return Err(ReconcilerError::UnalignedCounts(packed_counts.len()));
    }
    let id_elems = packed_operator_ids.len() / OPERATOR_ID_BYTES;
    let count_elems = packed_counts.len() / OPERATOR_COUNT_BYTES;
    if id_elems != count_elems {
        return Err(ReconcilerError::ElementCountMismatch {
            ids: id_elems,
            counts: count_elems,
        });
    }
    // The wire format carries 16-byte counts; exited counts are 64-bit.
    for (index, chunk) in packed_counts.chunks_exact(OPERATOR_COUNT_BYTES).enumerate() {
        let mut raw = [0u8; OPERATOR_COUNT_BYTES];
        raw.copy_from_slice(chunk);
        checked_u64(u128::from_be_bytes(raw))
            .map_err(|source| ReconcilerError::CountOutOfRange { index, source })?;
    }

    directory
        .backend_mut(module_id)
        .ok_or(ReconcilerError::BackendUnavailable(module_id))?
        .update_exited_validators_count(packed_operator_ids, packed_counts)
        .map_err(fatal(module_id))
}

/// Phase 3: finalize the frame.
///
/// Every module whose live summary has caught up with the router-stored
/// total gets its finalization callback, under the two-tier policy. Resets
/// the frame's newly-exited counter.
pub fn finish_exited_counts_reporting(
    state: &mut RouterState,
    directory: &mut dyn BackendDirectory,
) -> Result<(), ReconcilerError> {
    let modules: Vec<(u32, u64)> = state
        .modules()
        .iter()
        .map(|m| (m.id, m.accounting.exited_validators_count))
        .collect();

    for (module_id, stored) in modules {
        let backend = directory
            .backend_mut(module_id)
            .ok_or(ReconcilerError::BackendUnavailable(module_id))?;
        let summary = backend.summary().map_err(fatal(module_id))?;
        if summary.exited_validators == stored {
            notify_module(
                module_id,
                "exited-counts-updated",
                backend.on_exited_counts_updated(),
            )?;
        }
    }
    state.frame_newly_exited = 0;
    Ok(())
}

/// Privileged escape hatch bypassing monotonicity.
///
/// Optimistic-lock style: the caller attests the value it believes is
/// stored; a mismatch is a conflict, not an overwrite. The new count is
/// still validated against the backend's live deposited count before the
/// write, and the finalization hook is optionally re-triggered when the
/// backend already agrees with the new value.
pub fn unsafe_set_exited_validators_count(
    state: &mut RouterState,
    directory: &mut dyn BackendDirectory,
    module_id: u32,
    expected_current: u64,
    new_count: u64,
    trigger_hook: bool,
) -> Result<(), ReconcilerError> {
    let stored = state
        .module(module_id)
        .ok_or(ReconcilerError::ModuleNotFound(module_id))?
        .accounting
        .exited_validators_count;
    if stored != expected_current {
        return Err(ReconcilerError::StaleExpectedValue {
            module_id,
            stored,
            expected: expected_current,
        });
    }
    let summary = directory
        .backend(module_id)
        .ok_or(ReconcilerError::BackendUnavailable(module_id))?
        .summary()
        .map_err(fatal(module_id))?;
    if new_count > summary.deposited_validators {
        return Err(ReconcilerError::ExitedCountExceedsDeposited {
            module_id,
            reported: new_count,
            deposited: summary.deposited_validators,
        });
    }

    let module = state
        .module_mut(module_id)
        .ok_or(ReconcilerError::ModuleNotFound(module_id))?;
    module.accounting.exited_validators_count = new_count;
    warn!(
        "module {} exited count force-set: {} → {} (was attested as {})",
        module_id, stored, new_count, expected_current
    );

    if trigger_hook && summary.exited_validators == new_count {
        let backend = directory
            .backend_mut(module_id)
            .ok_or(ReconcilerError::BackendUnavailable(module_id))?;
        notify_module(
            module_id,
            "exited-counts-updated",
            backend.on_exited_counts_updated(),
        )?;
    }
    Ok(())
}

/// Privileged per-operator counterpart of the override: forwards a corrected
/// count for one node operator straight to the module backend. Data-carrying
/// call, so any failure is fatal.
pub fn unsafe_update_operator_count(
    state: &RouterState,
    directory: &mut dyn BackendDirectory,
    module_id: u32,
    operator_id: u64,
    new_count: u64,
) -> Result<(), ReconcilerError> {
    if state.module(module_id).is_none() {
        return Err(ReconcilerError::ModuleNotFound(module_id));
    }
    directory
        .backend_mut(module_id)
        .ok_or(ReconcilerError::BackendUnavailable(module_id))?
        .unsafe_update_validators_count(operator_id, new_count)
        .map_err(fatal(module_id))?;
    warn!(
        "module {} operator {} count force-set to {}",
        module_id, operator_id, new_count
    );
    Ok(())
}

/// Per-module rewards-minted notifications, two-tier.
pub fn notify_rewards_minted(
    state: &RouterState,
    directory: &mut dyn BackendDirectory,
    module_ids: &[u32],
    amounts: &[u128],
) -> Result<(), ReconcilerError> {
    if module_ids.len() != amounts.len() {
        return Err(ReconcilerError::LengthMismatch {
            ids: module_ids.len(),
            counts: amounts.len(),
        });
    }
    for &module_id in module_ids {
        if state.module(module_id).is_none() {
            return Err(ReconcilerError::ModuleNotFound(module_id));
        }
    }
    for (&module_id, &amount) in module_ids.iter().zip(amounts) {
        let backend = directory
            .backend_mut(module_id)
            .ok_or(ReconcilerError::BackendUnavailable(module_id))?;
        notify_module(module_id, "rewards-minted", backend.on_rewards_minted(amount))?;
    }
    Ok(())
}

/// Withdrawal-credentials-changed broadcast.
///
/// A module that swallows the callback (business-logic revert) is
/// automatically moved to `DepositsPaused`: its deposit pipeline cannot be
/// trusted against the new credentials until it reconciles.
pub fn notify_withdrawal_credentials_changed(
    state: &mut RouterState,
    directory: &mut dyn BackendDirectory,
) -> Result<(), ReconcilerError> {
    let module_ids: Vec<u32> = state.modules().iter().map(|m| m.id).collect();
    for module_id in module_ids {
        let backend = directory
            .backend_mut(module_id)
            .ok_or(ReconcilerError::BackendUnavailable(module_id))?;
        let delivered = notify_module(
            module_id,
            "withdrawal-credentials-changed",
            backend.on_withdrawal_credentials_changed(),
        )?;
        if !delivered {
            let module = state
                .module_mut(module_id)
                .ok_or(ReconcilerError::ModuleNotFound(module_id))?;
            if module.config.status == ModuleStatus::Active {
                module.config.status = ModuleStatus::DepositsPaused;
                warn!(
                    "module {} deposits paused: withdrawal-credentials callback rejected",
                    module_id
                );
            }
        }
    }
    Ok(())
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
