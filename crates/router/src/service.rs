//! # Router Service Facade
//!
//! Owns the router state and all external collaborators behind one
//! exclusive lock. Every entry point is atomic: the operation runs against
//! a working copy of the state and the copy is committed only on success,
//! so a failure midway through a multi-step protocol never leaves the
//! stored state half-mutated. External side effects that already happened
//! before the failure (sink submissions, delivered notifications) are the
//! collaborators' concern; the ledger itself always stays consistent.

use crate::allocation::{self, Allocation, AllocationError};
use crate::backend::{
    self, BackendDirectory, NativeTransfer, WithdrawalFeeOracle, WithdrawalRequestSink,
};
use crate::gateway::{self, GatewayError, WithdrawalRequest};
use crate::persistence::{self, PersistenceError};
use crate::reconciler::{self, ReconcilerError};
use crate::registry::{ModuleParams, RegistryError};
use crate::shares::{self, ShareError};
use crate::state::{ModuleStatus, RouterState, StakingModule};
use lsr_common::rate_limiter::RateLimitError;
use lsr_common::Address;
use parking_lot::RwLock;
use thiserror::Error;

/// Top-level error for every facade entry point.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Shares(#[from] ShareError),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Reconciler(#[from] ReconcilerError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

struct Inner {
    state: RouterState,
    directory: Box<dyn BackendDirectory + Send>,
    oracle: Box<dyn WithdrawalFeeOracle + Send>,
    sink: Box<dyn WithdrawalRequestSink + Send>,
    transfers: Box<dyn NativeTransfer + Send>,
}

pub struct RouterService {
    inner: RwLock<Inner>,
}

impl RouterService {
    pub fn new(
        directory: Box<dyn BackendDirectory + Send>,
        oracle: Box<dyn WithdrawalFeeOracle + Send>,
        sink: Box<dyn WithdrawalRequestSink + Send>,
        transfers: Box<dyn NativeTransfer + Send>,
    ) -> Self {
        Self::with_state(RouterState::new(), directory, oracle, sink, transfers)
    }

    pub fn with_state(
        state: RouterState,
        directory: Box<dyn BackendDirectory + Send>,
        oracle: Box<dyn WithdrawalFeeOracle + Send>,
        sink: Box<dyn WithdrawalRequestSink + Send>,
        transfers: Box<dyn NativeTransfer + Send>,
    ) -> Self {
        RouterService {
            inner: RwLock::new(Inner {
                state,
                directory,
                oracle,
                sink,
                transfers,
            }),
        }
    }

    /// Run a mutating operation transactionally: the closure works on a
    /// copy of the state, which replaces the stored state only on success.
    fn transact<T, E>(
        &self,
        op: impl FnOnce(&mut RouterState, &mut Inner) -> Result<T, E>,
    ) -> Result<T, RouterError>
    where
        RouterError: From<E>,
    {
        let mut inner = self.inner.write();
        let mut working = inner.state.clone();
        let out = op(&mut working, &mut *inner)?;
        inner.state = working;
        Ok(out)
    }

    // ────────────────────────────────────────────────────────────────
    // registry
    // ────────────────────────────────────────────────────────────────

    pub fn add_module(&self, params: ModuleParams) -> Result<u32, RouterError> {
        self.transact(|state, _| state.add_module(params))
    }

    pub fn update_module_shares(
        &self,
        module_id: u32,
        deposit_target_share_bp: u16,
        withdrawal_protect_share_bp: u16,
    ) -> Result<(), RouterError> {
        self.transact(|state, _| {
            state.update_module_shares(
                module_id,
                deposit_target_share_bp,
                withdrawal_protect_share_bp,
            )
        })
    }

    pub fn update_module_fees(
        &self,
        module_id: u32,
        fee_bp: u16,
        treasury_fee_bp: u16,
    ) -> Result<(), RouterError> {
        self.transact(|state, _| state.update_module_fees(module_id, fee_bp, treasury_fee_bp))
    }

    pub fn update_deposit_params(
        &self,
        module_id: u32,
        max_deposits_per_block: u64,
        min_deposit_block_distance: u64,
    ) -> Result<(), RouterError> {
        self.transact(|state, _| {
            state.update_deposit_params(
                module_id,
                max_deposits_per_block,
                min_deposit_block_distance,
            )
        })
    }

    pub fn set_module_status(
        &self,
        module_id: u32,
        status: ModuleStatus,
    ) -> Result<(), RouterError> {
        self.transact(|state, _| state.set_module_status(module_id, status))
    }

    pub fn note_deposit(
        &self,
        module_id: u32,
        block: u64,
        timestamp: u64,
    ) -> Result<(), RouterError> {
        self.transact(|state, _| state.note_deposit(module_id, block, timestamp))
    }

    pub fn set_effective_balance_gwei(
        &self,
        module_id: u32,
        balance_gwei: u128,
    ) -> Result<(), RouterError> {
        self.transact(|state, _| state.set_effective_balance_gwei(module_id, balance_gwei))
    }

    /// Record a balance as the module's backend reports it. Legacy backends
    /// report gwei, New backends report wei; the unit conversion happens
    /// here, at the single seam.
    pub fn record_reported_balance(
        &self,
        module_id: u32,
        raw_balance: u128,
    ) -> Result<(), RouterError> {
        self.transact(|state, _| {
            let module_type = state
                .module(module_id)
                .ok_or(RegistryError::ModuleNotFound(module_id))?
                .config
                .module_type;
            state.set_effective_balance_gwei(
                module_id,
                backend::reported_balance_gwei(module_type, raw_balance),
            )
        })
    }

    pub fn module(&self, module_id: u32) -> Option<StakingModule> {
        self.inner.read().state.module(module_id).cloned()
    }

    pub fn module_by_address(&self, address: &Address) -> Option<StakingModule> {
        self.inner.read().state.module_by_address(address).cloned()
    }

    pub fn modules(&self) -> Vec<StakingModule> {
        self.inner.read().state.modules().to_vec()
    }

    pub fn active_module_count(&self) -> usize {
        self.inner.read().state.active_module_count()
    }

    /// Live per-operator counters straight from a module's backend.
    pub fn operator_summary(
        &self,
        module_id: u32,
        operator_id: u64,
    ) -> Result<backend::OperatorSummary, RouterError> {
        let inner = self.inner.read();
        if inner.state.module(module_id).is_none() {
            return Err(RegistryError::ModuleNotFound(module_id).into());
        }
        inner
            .directory
            .backend(module_id)
            .ok_or(ReconcilerError::BackendUnavailable(module_id))?
            .operator_summary(operator_id)
            .map_err(|source| {
                ReconcilerError::FatalBackendFailure { module_id, source }.into()
            })
    }

    // ────────────────────────────────────────────────────────────────
    // allocation
    // ────────────────────────────────────────────────────────────────

    /// Plan a deposit split across modules. Read-only: the caller applies
    /// the resulting fills through its deposit pipeline.
    pub fn plan_deposit_allocation(
        &self,
        capacities_gwei: &[u128],
        amount_gwei: u128,
    ) -> Result<Allocation, RouterError> {
        let inner = self.inner.read();
        let shares = shares::normalize_target_shares(&inner.state.deposit_target_shares())?;
        let balances = inner.state.effective_balances_gwei();
        let allocation = allocation::allocate_deposit(
            &shares,
            &balances,
            capacities_gwei,
            inner.state.total_effective_balance_gwei(),
            amount_gwei,
        )?;
        Ok(allocation)
    }

    /// Plan a withdrawal split across modules, honoring protect shares.
    pub fn plan_withdrawal_allocation(
        &self,
        amount_gwei: u128,
    ) -> Result<Allocation, RouterError> {
        let inner = self.inner.read();
        let shares =
            shares::normalize_target_shares(&inner.state.withdrawal_protect_shares())?;
        let balances = inner.state.effective_balances_gwei();
        let allocation = allocation::allocate_withdrawal(
            &shares,
            &balances,
            inner.state.total_effective_balance_gwei(),
            amount_gwei,
        )?;
        Ok(allocation)
    }

    // ────────────────────────────────────────────────────────────────
    // reconciler
    // ────────────────────────────────────────────────────────────────

    pub fn update_exited_validators_counts(
        &self,
        module_ids: &[u32],
        exited_counts: &[u64],
    ) -> Result<u64, RouterError> {
        self.transact(|state, inner| {
            reconciler::update_exited_validators_counts(
                state,
                inner.directory.as_ref(),
                module_ids,
                exited_counts,
            )
        })
    }

    pub fn report_exited_counts_by_operator(
        &self,
        module_id: u32,
        packed_operator_ids: &[u8],
        packed_counts: &[u8],
    ) -> Result<(), RouterError> {
        self.transact(|state, inner| {
            reconciler::report_exited_counts_by_operator(
                state,
                inner.directory.as_mut(),
                module_id,
                packed_operator_ids,
                packed_counts,
            )
        })
    }

    pub fn finish_exited_counts_reporting(&self) -> Result<(), RouterError> {
        self.transact(|state, inner| {
            reconciler::finish_exited_counts_reporting(state, inner.directory.as_mut())
        })
    }

    pub fn unsafe_set_exited_validators_count(
        &self,
        module_id: u32,
        expected_current: u64,
        new_count: u64,
        trigger_hook: bool,
    ) -> Result<(), RouterError> {
        self.transact(|state, inner| {
            reconciler::unsafe_set_exited_validators_count(
                state,
                inner.directory.as_mut(),
                module_id,
                expected_current,
                new_count,
                trigger_hook,
            )
        })
    }

    pub fn unsafe_update_operator_count(
        &self,
        module_id: u32,
        operator_id: u64,
        new_count: u64,
    ) -> Result<(), RouterError> {
        self.transact(|state, inner| {
            reconciler::unsafe_update_operator_count(
                state,
                inner.directory.as_mut(),
                module_id,
                operator_id,
                new_count,
            )
        })
    }

    pub fn notify_rewards_minted(
        &self,
        module_ids: &[u32],
        amounts: &[u128],
    ) -> Result<(), RouterError> {
        self.transact(|state, inner| {
            reconciler::notify_rewards_minted(state, inner.directory.as_mut(), module_ids, amounts)
        })
    }

    pub fn notify_withdrawal_credentials_changed(&self) -> Result<(), RouterError> {
        self.transact(|state, inner| {
            reconciler::notify_withdrawal_credentials_changed(state, inner.directory.as_mut())
        })
    }

    // ────────────────────────────────────────────────────────────────
    // gateway
    // ────────────────────────────────────────────────────────────────

    /// Trigger a batch of full withdrawals. Returns the refunded amount.
    #[allow(clippy::too_many_arguments)]
    pub fn trigger_full_withdrawals(
        &self,
        now: u64,
        requests: &[WithdrawalRequest],
        msg_value: u128,
        refund_recipient: Option<Address>,
        caller: Address,
        exit_type: u8,
    ) -> Result<u128, RouterError> {
        self.transact(|state, inner| {
            gateway::trigger_full_withdrawals(
                state,
                inner.directory.as_mut(),
                inner.oracle.as_ref(),
                inner.sink.as_mut(),
                inner.transfers.as_mut(),
                now,
                requests,
                msg_value,
                refund_recipient,
                caller,
                exit_type,
            )
        })
    }

    pub fn set_withdrawal_limits(
        &self,
        now: u64,
        max_limit: u64,
        items_per_frame: u64,
        frame_duration_secs: u64,
    ) -> Result<(), RouterError> {
        self.transact(|state, _| {
            state
                .withdrawal_rate_limit
                .set_limits(now, max_limit, items_per_frame, frame_duration_secs)
        })
    }

    pub fn withdrawal_quota(&self, now: u64) -> u64 {
        self.inner.read().state.withdrawal_rate_limit.current_quota(now)
    }

    // ────────────────────────────────────────────────────────────────
    // persistence
    // ────────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> Result<String, RouterError> {
        Ok(persistence::save_state(&self.inner.read().state)?)
    }

    pub fn restore(&self, snapshot: &str) -> Result<(), RouterError> {
        let state = persistence::load_state(snapshot)?;
        self.inner.write().state = state;
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::state::ModuleType;
    use crate::testing::{MockBackend, MockDirectory, MockFeeOracle, MockSink, MockTransfers};
    use lsr_common::TARGET_SHARE_UNSET;

    fn service_with_modules(n: u8) -> RouterService {
        let mut directory = MockDirectory::default();
        for i in 1..=n {
            directory.insert(u32::from(i), MockBackend::with_summary(0, 100, 50));
        }
        let service = RouterService::new(
            Box::new(directory),
            Box::new(MockFeeOracle::with_fee(10)),
            Box::new(MockSink::default()),
            Box::new(MockTransfers::default()),
        );
        for i in 1..=n {
            service
                .add_module(ModuleParams {
                    name: format!("module-{i}"),
                    address: Address([i; 20]),
                    module_type: ModuleType::New,
                    fee_bp: 500,
                    treasury_fee_bp: 500,
                    deposit_target_share_bp: TARGET_SHARE_UNSET,
                    withdrawal_protect_share_bp: TARGET_SHARE_UNSET,
                    max_deposits_per_block: 150,
                    min_deposit_block_distance: 25,
                })
                .expect("add ok");
        }
        service
    }

    #[test]
    fn test_registry_roundtrip_through_facade() {
        let service = service_with_modules(2);
        assert_eq!(service.active_module_count(), 2);
        assert_eq!(service.module(1).expect("found").name, "module-1");
        assert_eq!(
            service
                .module_by_address(&Address([2; 20]))
                .expect("found")
                .id,
            2
        );
    }

    #[test]
    fn test_failed_batch_rolls_back_state() {
        let service = service_with_modules(2);
        service
            .update_exited_validators_counts(&[1], &[10])
            .expect("ok");

        // Module 2's count exceeds its deposited total, so the whole batch
        // fails; module 1's would-be update must not stick.
        let err = service.update_exited_validators_counts(&[1, 2], &[20, 500]);
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
    fn test_gateway_failure_preserves_rate_limit_quota() {
        let service = service_with_modules(1);
        service.set_withdrawal_limits(0, 10, 1, 60).expect("ok");

        let request = WithdrawalRequest {
            module_id: 1,
            operator_id: 7,
            pubkey: lsr_common::PublicKey([0xAB; 48]),
        };
        let err = service.trigger_full_withdrawals(
            0,
            &[request],
            5, // fee is 10: insufficient
            None,
            Address([0xCA; 20]),
            1,
        );
        assert!(matches!(
            err,
            Err(RouterError::Gateway(GatewayError::InsufficientFee { .. }))
        ));
        assert_eq!(service.withdrawal_quota(0), 10);
    }

    #[test]
    fn test_full_withdrawal_consumes_quota_and_refunds() {
        let service = service_with_modules(1);
        service.set_withdrawal_limits(0, 10, 1, 60).expect("ok");

        let request = WithdrawalRequest {
            module_id: 1,
            operator_id: 7,
            pubkey: lsr_common::PublicKey([0xAB; 48]),
        };
        let refund = service
            .trigger_full_withdrawals(0, &[request], 25, None, Address([0xCA; 20]), 1)
            .expect("ok");
        assert_eq!(refund, 15);
        assert_eq!(service.withdrawal_quota(0), 9);
    }

    #[test]
    fn test_operator_summary_passthrough() {
        use crate::backend::OperatorSummary;

        let mut directory = MockDirectory::default();
        let mut backend = MockBackend::with_summary(0, 100, 50);
        backend.operators.insert(
            7,
            OperatorSummary {
                exited_validators: 2,
                deposited_validators: 10,
            },
        );
        directory.insert(1, backend);
        let service = RouterService::new(
            Box::new(directory),
            Box::new(MockFeeOracle::with_fee(10)),
            Box::new(MockSink::default()),
            Box::new(MockTransfers::default()),
        );
        service
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

        let summary = service.operator_summary(1, 7).expect("known operator");
        assert_eq!(summary.deposited_validators, 10);
        assert!(service.operator_summary(1, 8).is_err());
        assert!(matches!(
            service.operator_summary(2, 7),
            Err(RouterError::Registry(RegistryError::ModuleNotFound(2)))
        ));
    }

    #[test]
    fn test_record_reported_balance_converts_per_module_type() {
        let service = service_with_modules(1);
        // Module 2 is Legacy and reports gwei directly.
        service
            .add_module(ModuleParams {
                name: "legacy".into(),
                address: Address([9; 20]),
                module_type: ModuleType::Legacy,
                fee_bp: 500,
                treasury_fee_bp: 500,
                deposit_target_share_bp: TARGET_SHARE_UNSET,
                withdrawal_protect_share_bp: TARGET_SHARE_UNSET,
                max_deposits_per_block: 150,
                min_deposit_block_distance: 25,
            })
            .expect("add ok");

        // New module reports wei: 32 ETH in wei lands as 32e9 gwei.
        service
            .record_reported_balance(1, 32_000_000_000_000_000_000)
            .expect("recorded");
        service
            .record_reported_balance(2, 32_000_000_000)
            .expect("recorded");

        assert_eq!(
            service
                .module(1)
                .expect("found")
                .accounting
                .effective_balance_gwei,
            32_000_000_000
        );
        assert_eq!(
            service
                .module(2)
                .expect("found")
                .accounting
                .effective_balance_gwei,
            32_000_000_000
        );
    }

    #[test]
    fn test_plan_deposit_allocation_even_split() {
        let service = service_with_modules(2);
        let allocation = service
            .plan_deposit_allocation(&[1_000, 1_000], 100)
            .expect("ok");
        assert_eq!(allocation.fills, vec![50, 50]);
        assert_eq!(allocation.leftover, 0);
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let service = service_with_modules(2);
        service
            .update_exited_validators_counts(&[1], &[3])
            .expect("ok");
        let snapshot = service.snapshot().expect("save");

        let restored = service_with_modules(0);
        restored.restore(&snapshot).expect("restore");
        assert_eq!(restored.modules().len(), 2);
        assert_eq!(
            restored
                .module(1)
                .expect("found")
                .accounting
                .exited_validators_count,
            3
        );
    }

    #[test]
    fn test_swallowed_callback_does_not_abort() {
        let mut directory = MockDirectory::default();
        let mut backend = MockBackend::with_summary(0, 100, 50);
        backend.fail_next_notification(BackendError::reverted(b"later".to_vec()));
        directory.insert(1, backend);
        let service = RouterService::new(
            Box::new(directory),
            Box::new(MockFeeOracle::with_fee(10)),
            Box::new(MockSink::default()),
            Box::new(MockTransfers::default()),
        );
        service
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

        // The armed business-logic revert is swallowed, not propagated.
        service
            .notify_rewards_minted(&[1], &[1_000])
            .expect("swallowed");
    }
}
