//! # Withdrawal Gateway
//!
//! Entry point for triggering full validator withdrawals. One call handles a
//! batch of requests end to end: rate limiting, per-request fee collection
//! through the sink, backend notifications, and refund of excess payment.
//!
//! State mutated before a failure (the consumed rate-limit quota) is the
//! caller's transaction to roll back; the service facade commits the
//! working state only on success.

use crate::backend::{
    BackendDirectory, NativeTransfer, OracleError, SinkError, TransferError,
    WithdrawalFeeOracle, WithdrawalRequestSink,
};
use crate::reconciler::ReconcilerError;
use crate::state::RouterState;
use lsr_common::constants::WITHDRAWAL_REQUEST_SIZE;
use lsr_common::rate_limiter::RateLimitError;
use lsr_common::{Address, PublicKey};
use thiserror::Error;
use tracing::{info, warn};

/// One full-withdrawal request. The amount field of the packed wire format
/// is always zero for full withdrawals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawalRequest {
    pub module_id: u32,
    pub operator_id: u64,
    pub pubkey: PublicKey,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("withdrawal batch must not be empty")]
    EmptyBatch,

    #[error("staking module {0} is not registered")]
    ModuleNotFound(u32),

    #[error("no backend registered for module {0}")]
    BackendUnavailable(u32),

    #[error(transparent)]
    RateLimited(#[from] RateLimitError),

    #[error("fee oracle failed: {0}")]
    Oracle(#[from] OracleError),

    #[error("total withdrawal fee overflows: {fee_per_request} per request, {requests} requests")]
    FeeOverflow { fee_per_request: u128, requests: usize },

    #[error("insufficient payment: sent {sent}, total fee is {required}")]
    InsufficientFee { sent: u128, required: u128 },

    #[error("withdrawal request sink rejected the batch: {0}")]
    Sink(#[from] SinkError),

    #[error("refund of {0} failed: {1}")]
    RefundFailed(u128, #[source] TransferError),

    #[error(transparent)]
    Backend(#[from] ReconcilerError),
}

/// Pack a batch into the 56-byte-per-request wire format: 48-byte public
/// key followed by an 8-byte big-endian amount, zero for full withdrawals.
fn pack_requests(requests: &[WithdrawalRequest]) -> Vec<u8> {
    let mut packed = Vec::with_capacity(requests.len() * WITHDRAWAL_REQUEST_SIZE);
    for request in requests {
        packed.extend_from_slice(&request.pubkey.0);
        packed.extend_from_slice(&0u64.to_be_bytes());
    }
    packed
}

/// Trigger full withdrawals for a batch of validators.
///
/// Steps, in order:
/// 1. reject empty batches and unknown modules,
/// 2. consume `requests.len()` units from the shared rate limiter,
/// 3. quote the per-request fee and compute the batch total,
/// 4. submit the packed batch to the request sink with the total fee,
/// 5. notify each module backend, two-tier (business reverts are logged and
///    skipped, empty revert data aborts),
/// 6. refund `msg_value - total_fee` to the refund recipient (defaults to
///    the caller); a failed refund aborts.
///
/// On success the amount of native currency paid out (fee plus refund)
/// exactly equals `msg_value`. Returns the refunded amount.
pub fn trigger_full_withdrawals(
    state: &mut RouterState,
    directory: &mut dyn BackendDirectory,
    oracle: &dyn WithdrawalFeeOracle,
    sink: &mut dyn WithdrawalRequestSink,
    transfers: &mut dyn NativeTransfer,
    now: u64,
    requests: &[WithdrawalRequest],
    msg_value: u128,
    refund_recipient: Option<Address>,
    caller: Address,
    exit_type: u8,
) -> Result<u128, GatewayError> {
    if requests.is_empty() {
        return Err(GatewayError::EmptyBatch);
    }
    for request in requests {
        if state.module(request.module_id).is_none() {
            return Err(GatewayError::ModuleNotFound(request.module_id));
        }
        if directory.backend(request.module_id).is_none() {
            return Err(GatewayError::BackendUnavailable(request.module_id));
        }
    }

    state
        .withdrawal_rate_limit
        .consume(now, requests.len() as u64)?;

    let fee_per_request = oracle.fee_per_request()?;
    let total_fee = fee_per_request
        .checked_mul(requests.len() as u128)
        .ok_or(GatewayError::FeeOverflow {
            fee_per_request,
            requests: requests.len(),
        })?;
    if msg_value < total_fee {
        return Err(GatewayError::InsufficientFee {
            sent: msg_value,
            required: total_fee,
        });
    }

    sink.submit(&pack_requests(requests), total_fee)?;

    for request in requests {
        let backend = directory
            .backend_mut(request.module_id)
            .ok_or(GatewayError::BackendUnavailable(request.module_id))?;
        match backend.on_validator_exit_triggered(
            request.operator_id,
            &request.pubkey,
            fee_per_request,
            exit_type,
        ) {
            Ok(()) => {}
            Err(err) if err.is_fatal() => {
                return Err(ReconcilerError::FatalBackendFailure {
                    module_id: request.module_id,
                    source: err,
                }
                .into());
            }
            Err(err) => {
                warn!(
                    "module {} exit-triggered callback reverted for operator {}: {}",
                    request.module_id, request.operator_id, err
                );
            }
        }
    }

    // Fee plus refund consume msg_value exactly; nothing is retained.
    let refund = msg_value - total_fee;
    if refund > 0 {
        let recipient = refund_recipient.unwrap_or(caller);
        transfers
            .transfer(recipient, refund)
            .map_err(|err| GatewayError::RefundFailed(refund, err))?;
    }

    info!(
        "triggered {} full withdrawals, fee {} per request, refunded {}",
        requests.len(),
        fee_per_request,
        refund
    );
    Ok(refund)
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::registry::ModuleParams;
    use crate::state::ModuleType;
    use crate::testing::{MockBackend, MockDirectory, MockFeeOracle, MockSink, MockTransfers};
    use lsr_common::rate_limiter::RateLimitState;
    use lsr_common::TARGET_SHARE_UNSET;

    const CALLER: Address = Address([0xCA; 20]);

    fn setup() -> (RouterState, MockDirectory, MockFeeOracle, MockSink, MockTransfers) {
        let mut state = RouterState::new();
        let mut dir = MockDirectory::default();
        let id = state
            .add_module(ModuleParams {
                name: "curated".into(),
                address: Address([1; 20]),
                module_type: ModuleType::New,
                fee_bp: 500,
                treasury_fee_bp: 500,
                deposit_target_share_bp: TARGET_SHARE_UNSET,
                withdrawal_protect_share_bp: TARGET_SHARE_UNSET,
                max_deposits_per_block: 150,
                min_deposit_block_distance: 25,
            })
            .expect("add ok");
        dir.insert(id, MockBackend::with_summary(0, 100, 50));
        (
            state,
            dir,
            MockFeeOracle::with_fee(10),
            MockSink::default(),
            MockTransfers::default(),
        )
    }

    fn request(operator_id: u64, fill: u8) -> WithdrawalRequest {
        WithdrawalRequest {
            module_id: 1,
            operator_id,
            pubkey: PublicKey([fill; 48]),
        }
    }

    #[test]
    fn test_batch_packs_and_pays_exact_fee() {
        let (mut state, mut dir, oracle, mut sink, mut transfers) = setup();
        let batch = [request(7, 0xAA), request(8, 0xBB)];

        trigger_full_withdrawals(
            &mut state, &mut dir, &oracle, &mut sink, &mut transfers,
            0, &batch, 20, None, CALLER, 1,
        )
        .expect("ok");

        let (packed, fee) = &sink.submissions[0];
        assert_eq!(*fee, 20);
        assert_eq!(packed.len(), 2 * WITHDRAWAL_REQUEST_SIZE);
        assert_eq!(&packed[..48], &[0xAA; 48]);
        assert_eq!(&packed[48..56], &0u64.to_be_bytes());
        assert_eq!(&packed[56..104], &[0xBB; 48]);

        // Exact payment: no refund transfer happens.
        assert!(transfers.sent.is_empty());
        assert_eq!(
            dir.mock(1).exits_triggered,
            vec![
                (7, PublicKey([0xAA; 48]), 10, 1),
                (8, PublicKey([0xBB; 48]), 10, 1)
            ]
        );
    }

    #[test]
    fn test_excess_payment_refunded_to_caller() {
        let (mut state, mut dir, oracle, mut sink, mut transfers) = setup();
        trigger_full_withdrawals(
            &mut state, &mut dir, &oracle, &mut sink, &mut transfers,
            0, &[request(1, 1)], 35, None, CALLER, 1,
        )
        .expect("ok");
        assert_eq!(transfers.sent, vec![(CALLER, 25)]);
        assert_eq!(sink.collected_fees, 10);
        // Nothing retained: what the sink collected plus what was refunded
        // accounts for the full payment.
        assert_eq!(sink.collected_fees + transfers.sent[0].1, 35);
    }

    #[test]
    fn test_refund_recipient_override() {
        let (mut state, mut dir, oracle, mut sink, mut transfers) = setup();
        let other = Address([0x0D; 20]);
        trigger_full_withdrawals(
            &mut state, &mut dir, &oracle, &mut sink, &mut transfers,
            0, &[request(1, 1)], 15, Some(other), CALLER, 1,
        )
        .expect("ok");
        assert_eq!(transfers.sent, vec![(other, 5)]);
    }

    #[test]
    fn test_insufficient_fee_rejected_before_submission() {
        let (mut state, mut dir, oracle, mut sink, mut transfers) = setup();
        state.withdrawal_rate_limit = RateLimitState::new(100, 10, 60, 0).expect("valid");

        let err = trigger_full_withdrawals(
            &mut state, &mut dir, &oracle, &mut sink, &mut transfers,
            0, &[request(1, 1), request(2, 2)], 19, None, CALLER, 1,
        );
        assert_eq!(
            err,
            Err(GatewayError::InsufficientFee { sent: 19, required: 20 })
        );
        assert!(sink.submissions.is_empty());
        assert!(dir.mock(1).exits_triggered.is_empty());
        // Quota is consumed before the fee check; the transactional caller
        // discards this working state on error.
        assert_eq!(state.withdrawal_rate_limit.current_quota(0), 98);
    }

    #[test]
    fn test_rate_limit_enforced() {
        let (mut state, mut dir, oracle, mut sink, mut transfers) = setup();
        state.withdrawal_rate_limit = RateLimitState::new(1, 1, 60, 0).expect("valid");

        trigger_full_withdrawals(
            &mut state, &mut dir, &oracle, &mut sink, &mut transfers,
            0, &[request(1, 1)], 10, None, CALLER, 1,
        )
        .expect("first within quota");

        let err = trigger_full_withdrawals(
            &mut state, &mut dir, &oracle, &mut sink, &mut transfers,
            30, &[request(2, 2)], 10, None, CALLER, 1,
        );
        assert_eq!(
            err,
            Err(GatewayError::RateLimited(RateLimitError::QuotaExceeded {
                requested: 1,
                available: 0
            }))
        );
        assert_eq!(sink.submissions.len(), 1);
    }

    #[test]
    fn test_empty_batch_and_unknown_module() {
        let (mut state, mut dir, oracle, mut sink, mut transfers) = setup();
        assert_eq!(
            trigger_full_withdrawals(
                &mut state, &mut dir, &oracle, &mut sink, &mut transfers,
                0, &[], 0, None, CALLER, 1,
            ),
            Err(GatewayError::EmptyBatch)
        );

        let stray = WithdrawalRequest {
            module_id: 42,
            operator_id: 1,
            pubkey: PublicKey([0; 48]),
        };
        assert_eq!(
            trigger_full_withdrawals(
                &mut state, &mut dir, &oracle, &mut sink, &mut transfers,
                0, &[stray], 10, None, CALLER, 1,
            ),
            Err(GatewayError::ModuleNotFound(42))
        );
    }

    #[test]
    fn test_sink_rejection_propagates() {
        let (mut state, mut dir, oracle, mut sink, mut transfers) = setup();
        sink.fail = Some(SinkError::Rejected("queue full".into()));
        let err = trigger_full_withdrawals(
            &mut state, &mut dir, &oracle, &mut sink, &mut transfers,
            0, &[request(1, 1)], 10, None, CALLER, 1,
        );
        assert_eq!(
            err,
            Err(GatewayError::Sink(SinkError::Rejected("queue full".into())))
        );
        assert!(dir.mock(1).exits_triggered.is_empty());
    }

    #[test]
    fn test_backend_business_revert_swallowed() {
        let (mut state, mut dir, oracle, mut sink, mut transfers) = setup();
        dir.mock_mut(1)
            .fail_next_notification(BackendError::reverted(b"unknown key".to_vec()));
        trigger_full_withdrawals(
            &mut state, &mut dir, &oracle, &mut sink, &mut transfers,
            0, &[request(1, 1), request(2, 2)], 20, None, CALLER, 1,
        )
        .expect("swallowed");
        // First notification failed, second recorded.
        assert_eq!(dir.mock(1).exits_triggered.len(), 1);
        assert_eq!(sink.submissions.len(), 1);
    }

    #[test]
    fn test_backend_empty_revert_fatal() {
        let (mut state, mut dir, oracle, mut sink, mut transfers) = setup();
        dir.mock_mut(1).fail_next_notification(BackendError::empty());
        let err = trigger_full_withdrawals(
            &mut state, &mut dir, &oracle, &mut sink, &mut transfers,
            0, &[request(1, 1)], 10, None, CALLER, 1,
        );
        assert!(matches!(
            err,
            Err(GatewayError::Backend(ReconcilerError::FatalBackendFailure {
                module_id: 1,
                ..
            }))
        ));
    }

    #[test]
    fn test_refund_failure_is_an_error() {
        let (mut state, mut dir, oracle, mut sink, mut transfers) = setup();
        transfers.fail_for = Some(CALLER);
        let err = trigger_full_withdrawals(
            &mut state, &mut dir, &oracle, &mut sink, &mut transfers,
            0, &[request(1, 1)], 50, None, CALLER, 1,
        );
        assert!(matches!(err, Err(GatewayError::RefundFailed(40, _))));
    }

    #[test]
    fn test_oracle_failure_propagates() {
        let (mut state, mut dir, mut oracle, mut sink, mut transfers) = setup();
        oracle.fail = Some(OracleError::Reverted);
        let err = trigger_full_withdrawals(
            &mut state, &mut dir, &oracle, &mut sink, &mut transfers,
            0, &[request(1, 1)], 10, None, CALLER, 1,
        );
        assert_eq!(err, Err(GatewayError::Oracle(OracleError::Reverted)));
    }
}
