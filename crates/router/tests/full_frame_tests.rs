//! # Full-Frame Integration Tests
//!
//! Drives a complete reporting frame end to end through the service facade:
//! - register modules with mixed defined/unset shares
//! - plan a deposit allocation against the normalized shares
//! - run the three-phase exited-validator reconciliation
//! - trigger rate-limited full withdrawals with fee refund
//! - snapshot and restore the resulting state

use lsr_common::{Address, PublicKey, TARGET_SHARE_UNSET};
use lsr_router::testing::{MockBackend, MockDirectory, MockFeeOracle, MockSink, MockTransfers};
use lsr_router::{
    GatewayError, ModuleParams, ModuleStatus, ModuleType, RouterError, RouterService,
    WithdrawalRequest,
};

// ════════════════════════════════════════════════════════════════════════════
// HELPERS
// ════════════════════════════════════════════════════════════════════════════

const CALLER: Address = Address([0xCA; 20]);
const FEE: u128 = 1_000_000_000;

fn module_params(i: u8, target_bp: u16) -> ModuleParams {
    ModuleParams {
        name: format!("module-{i}"),
        address: Address([i; 20]),
        module_type: ModuleType::New,
        fee_bp: 500,
        treasury_fee_bp: 500,
        deposit_target_share_bp: target_bp,
        withdrawal_protect_share_bp: target_bp,
        max_deposits_per_block: 150,
        min_deposit_block_distance: 25,
    }
}

fn build_service(summaries: &[(u64, u64, u64)], targets: &[u16]) -> RouterService {
    let mut directory = MockDirectory::default();
    for (i, &(exited, deposited, depositable)) in summaries.iter().enumerate() {
        directory.insert(
            i as u32 + 1,
            MockBackend::with_summary(exited, deposited, depositable),
        );
    }
    let service = RouterService::new(
        Box::new(directory),
        Box::new(MockFeeOracle::with_fee(FEE)),
        Box::new(MockSink::default()),
        Box::new(MockTransfers::default()),
    );
    for (i, &target) in targets.iter().enumerate() {
        service
            .add_module(module_params(i as u8 + 1, target))
            .expect("module registered");
    }
    service
}

fn pubkey(fill: u8) -> PublicKey {
    PublicKey([fill; 48])
}

// ════════════════════════════════════════════════════════════════════════════
// 1. REGISTRATION + ALLOCATION
// ════════════════════════════════════════════════════════════════════════════

#[test]
fn mixed_shares_normalize_and_allocate() {
    // One module at a defined 30%, two splitting the remaining 70%.
    let service = build_service(
        &[(0, 100, 50), (0, 100, 50), (0, 100, 50)],
        &[3_000, TARGET_SHARE_UNSET, TARGET_SHARE_UNSET],
    );

    // Empty pool, ample capacity: the deposit lands proportionally to the
    // normalized shares 3000/3500/3500.
    let allocation = service
        .plan_deposit_allocation(&[100_000, 100_000, 100_000], 10_000)
        .expect("planned");
    assert_eq!(allocation.fills, vec![3_000, 3_500, 3_500]);
    assert_eq!(allocation.allocated, 10_000);
    assert_eq!(allocation.leftover, 0);
}

#[test]
fn capacity_clamped_deposit_spills_to_next_module() {
    let service = build_service(
        &[(0, 100, 50), (0, 100, 50)],
        &[5_000, 5_000],
    );

    // Module 1 can only hold 40 more; the rest of its proportional target
    // spills into module 2.
    let allocation = service
        .plan_deposit_allocation(&[40, 1_000], 100)
        .expect("planned");
    assert_eq!(allocation.fills, vec![40, 60]);
    assert_eq!(allocation.leftover, 0);
}

#[test]
fn withdrawal_drains_over_target_modules_first() {
    let service = build_service(&[(0, 100, 50), (0, 100, 50)], &[5_000, 5_000]);
    service
        .set_effective_balance_gwei(1, 150)
        .expect("balance set");
    service
        .set_effective_balance_gwei(2, 50)
        .expect("balance set");

    let allocation = service.plan_withdrawal_allocation(100).expect("planned");
    assert_eq!(allocation.fills, vec![100, 0]);
    assert_eq!(allocation.leftover, 0);
}

// ════════════════════════════════════════════════════════════════════════════
// 2. RECONCILIATION FRAME
// ════════════════════════════════════════════════════════════════════════════

#[test]
fn full_reconciliation_frame() -> anyhow::Result<()> {
    let service = build_service(
        &[(5, 100, 50), (3, 100, 50)],
        &[TARGET_SHARE_UNSET, TARGET_SHARE_UNSET],
    );

    // Phase 1: totals.
    let newly = service.update_exited_validators_counts(&[1, 2], &[5, 3])?;
    assert_eq!(newly, 8);

    // Phase 2: per-operator detail for module 1 (two operators).
    let mut operator_ids = Vec::new();
    operator_ids.extend_from_slice(&1u64.to_be_bytes());
    operator_ids.extend_from_slice(&2u64.to_be_bytes());
    let mut counts = Vec::new();
    counts.extend_from_slice(&3u128.to_be_bytes());
    counts.extend_from_slice(&2u128.to_be_bytes());
    service.report_exited_counts_by_operator(1, &operator_ids, &counts)?;

    // Phase 3: both backends agree with the stored totals.
    service.finish_exited_counts_reporting()?;

    assert_eq!(
        service
            .module(1)
            .expect("found")
            .accounting
            .exited_validators_count,
        5
    );
    Ok(())
}

#[test]
fn decreasing_report_rejected_and_state_intact() {
    let service = build_service(&[(10, 100, 50)], &[TARGET_SHARE_UNSET]);
    service
        .update_exited_validators_counts(&[1], &[10])
        .expect("accepted");

    let err = service.update_exited_validators_counts(&[1], &[9]);
    assert!(matches!(err, Err(RouterError::Reconciler(_))));
    assert_eq!(
        service
            .module(1)
            .expect("found")
            .accounting
            .exited_validators_count,
        10
    );
}

#[test]
fn repeated_module_id_in_one_report_rejected() {
    let service = build_service(&[(0, 100, 50)], &[TARGET_SHARE_UNSET]);

    // Listing a module twice must not let the later entry slip past the
    // monotonicity check against a pre-batch snapshot, nor double-count the
    // newly-exited delta.
    let err = service.update_exited_validators_counts(&[1, 1], &[10, 9]);
    assert!(matches!(err, Err(RouterError::Reconciler(_))));
    assert_eq!(
        service
            .module(1)
            .expect("found")
            .accounting
            .exited_validators_count,
        0
    );
}

#[test]
fn unsafe_override_requires_attested_value() {
    let service = build_service(&[(0, 100, 50)], &[TARGET_SHARE_UNSET]);
    service
        .update_exited_validators_counts(&[1], &[10])
        .expect("accepted");

    assert!(service
        .unsafe_set_exited_validators_count(1, 9, 4, false)
        .is_err());
    service
        .unsafe_set_exited_validators_count(1, 10, 4, false)
        .expect("decrease with correct attestation");
    assert_eq!(
        service
            .module(1)
            .expect("found")
            .accounting
            .exited_validators_count,
        4
    );
}

// ════════════════════════════════════════════════════════════════════════════
// 3. WITHDRAWAL GATEWAY
// ════════════════════════════════════════════════════════════════════════════

#[test]
fn rate_limited_withdrawals_with_refund() {
    let service = build_service(&[(0, 100, 50)], &[TARGET_SHARE_UNSET]);
    service
        .set_withdrawal_limits(0, 4, 2, 60)
        .expect("limits set");

    let batch = [
        WithdrawalRequest {
            module_id: 1,
            operator_id: 1,
            pubkey: pubkey(0xA1),
        },
        WithdrawalRequest {
            module_id: 1,
            operator_id: 2,
            pubkey: pubkey(0xA2),
        },
        WithdrawalRequest {
            module_id: 1,
            operator_id: 3,
            pubkey: pubkey(0xA3),
        },
    ];

    let refund = service
        .trigger_full_withdrawals(0, &batch, 4 * FEE, None, CALLER, 1)
        .expect("triggered");
    assert_eq!(refund, FEE);
    assert_eq!(service.withdrawal_quota(0), 1);

    // Quota exhausted for a second batch of 3 within the same frame.
    let err = service.trigger_full_withdrawals(10, &batch, 3 * FEE, None, CALLER, 1);
    assert!(matches!(err, Err(RouterError::Gateway(_))));
    assert_eq!(service.withdrawal_quota(10), 1);

    // One full frame later the quota has replenished by items_per_frame.
    assert_eq!(service.withdrawal_quota(61), 3);
}

#[test]
fn insufficient_payment_rolls_back_quota() {
    let service = build_service(&[(0, 100, 50)], &[TARGET_SHARE_UNSET]);
    service
        .set_withdrawal_limits(0, 10, 1, 60)
        .expect("limits set");

    let batch = [WithdrawalRequest {
        module_id: 1,
        operator_id: 1,
        pubkey: pubkey(0xA1),
    }];
    let err = service.trigger_full_withdrawals(0, &batch, FEE - 1, None, CALLER, 1);
    assert!(matches!(
        err,
        Err(RouterError::Gateway(GatewayError::InsufficientFee { .. }))
    ));
    assert_eq!(service.withdrawal_quota(0), 10);
}

// ════════════════════════════════════════════════════════════════════════════
// 4. STATUS + PERSISTENCE
// ════════════════════════════════════════════════════════════════════════════

#[test]
fn stopped_module_is_terminal() {
    let service = build_service(&[(0, 100, 50)], &[TARGET_SHARE_UNSET]);
    service
        .set_module_status(1, ModuleStatus::Stopped)
        .expect("stopped");
    assert!(service.set_module_status(1, ModuleStatus::Active).is_err());
    assert_eq!(service.active_module_count(), 0);
}

#[test]
fn snapshot_survives_full_frame() -> anyhow::Result<()> {
    let service = build_service(
        &[(5, 100, 50), (0, 100, 50)],
        &[4_000, 6_000],
    );
    service.update_exited_validators_counts(&[1], &[5])?;
    service.set_withdrawal_limits(0, 100, 10, 60)?;
    service.set_effective_balance_gwei(2, 42)?;

    let snapshot = service.snapshot()?;
    let restored = build_service(&[], &[]);
    restored.restore(&snapshot)?;

    assert_eq!(restored.modules().len(), 2);
    assert_eq!(
        restored
            .module(1)
            .expect("found")
            .accounting
            .exited_validators_count,
        5
    );
    assert_eq!(
        restored
            .module(2)
            .expect("found")
            .accounting
            .effective_balance_gwei,
        42
    );
    assert_eq!(restored.withdrawal_quota(0), 100);
    // Derived address index rebuilt on load.
    assert_eq!(
        restored.module_by_address(&Address([2; 20])).map(|m| m.id),
        Some(2)
    );
    Ok(())
}
