//! Mock collaborators for unit and integration tests.
//!
//! Follows the same pattern as the production traits in `backend`: each mock
//! records the calls it receives and can be armed to fail in either failure
//! tier, so tests can drive every branch of the two-tier policy.

use crate::backend::{
    BackendError, ModuleSummary, OperatorSummary, OracleError, NativeTransfer, SinkError,
    StakingModuleBackend, TransferError, WithdrawalFeeOracle, WithdrawalRequestSink,
};
use crate::backend::BackendDirectory;
use lsr_common::{Address, PublicKey};
use std::collections::{BTreeMap, HashMap};

/// Directory of [`MockBackend`]s keyed by module ID, inspectable after use.
#[derive(Debug, Default)]
pub struct MockDirectory {
    pub backends: BTreeMap<u32, MockBackend>,
}

impl MockDirectory {
    pub fn insert(&mut self, module_id: u32, backend: MockBackend) {
        self.backends.insert(module_id, backend);
    }

    pub fn mock(&self, module_id: u32) -> &MockBackend {
        self.backends.get(&module_id).expect("mock backend registered")
    }

    pub fn mock_mut(&mut self, module_id: u32) -> &mut MockBackend {
        self.backends
            .get_mut(&module_id)
            .expect("mock backend registered")
    }
}

impl BackendDirectory for MockDirectory {
    fn backend(&self, module_id: u32) -> Option<&dyn StakingModuleBackend> {
        self.backends.get(&module_id).map(|b| b as _)
    }

    fn backend_mut(&mut self, module_id: u32) -> Option<&mut dyn StakingModuleBackend> {
        self.backends.get_mut(&module_id).map(|b| b as _)
    }
}

/// In-memory staking-module backend.
#[derive(Debug, Default)]
pub struct MockBackend {
    pub summary: ModuleSummary,
    pub operators: HashMap<u64, OperatorSummary>,
    /// Armed failure for the next notification call, if any.
    pub next_notification_failure: Option<BackendError>,
    /// Received (packed_ids, packed_counts) per-operator reports.
    pub operator_reports: Vec<(Vec<u8>, Vec<u8>)>,
    pub finish_callbacks: u64,
    pub rewards_minted: Vec<u128>,
    pub credentials_changes: u64,
    pub exits_triggered: Vec<(u64, PublicKey, u128, u8)>,
    pub unsafe_overrides: Vec<(u64, u64)>,
}

impl MockBackend {
    pub fn with_summary(exited: u64, deposited: u64, depositable: u64) -> Self {
        MockBackend {
            summary: ModuleSummary {
                exited_validators: exited,
                deposited_validators: deposited,
                depositable_validators: depositable,
            },
            ..Default::default()
        }
    }

    /// Arm the next notification to fail with the given error.
    pub fn fail_next_notification(&mut self, err: BackendError) {
        self.next_notification_failure = Some(err);
    }

    fn take_failure(&mut self) -> Result<(), BackendError> {
        match self.next_notification_failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl StakingModuleBackend for MockBackend {
    fn summary(&self) -> Result<ModuleSummary, BackendError> {
        Ok(self.summary)
    }

    fn operator_summary(&self, operator_id: u64) -> Result<OperatorSummary, BackendError> {
        self.operators
            .get(&operator_id)
            .copied()
            .ok_or_else(|| BackendError::reverted(b"unknown operator".to_vec()))
    }

    fn update_exited_validators_count(
        &mut self,
        packed_operator_ids: &[u8],
        packed_counts: &[u8],
    ) -> Result<(), BackendError> {
        self.take_failure()?;
        self.operator_reports
            .push((packed_operator_ids.to_vec(), packed_counts.to_vec()));
        Ok(())
    }

    fn unsafe_update_validators_count(
        &mut self,
        operator_id: u64,
        new_count: u64,
    ) -> Result<(), BackendError> {
        self.take_failure()?;
        self.unsafe_overrides.push((operator_id, new_count));
        Ok(())
    }

    fn on_exited_counts_updated(&mut self) -> Result<(), BackendError> {
        self.take_failure()?;
        self.finish_callbacks += 1;
        Ok(())
    }

    fn on_rewards_minted(&mut self, amount: u128) -> Result<(), BackendError> {
        self.take_failure()?;
        self.rewards_minted.push(amount);
        Ok(())
    }

    fn on_withdrawal_credentials_changed(&mut self) -> Result<(), BackendError> {
        self.take_failure()?;
        self.credentials_changes += 1;
        Ok(())
    }

    fn on_validator_exit_triggered(
        &mut self,
        operator_id: u64,
        pubkey: &PublicKey,
        paid_fee: u128,
        exit_type: u8,
    ) -> Result<(), BackendError> {
        self.take_failure()?;
        self.exits_triggered
            .push((operator_id, *pubkey, paid_fee, exit_type));
        Ok(())
    }
}

/// Fixed-fee oracle, optionally armed to fail.
#[derive(Debug, Clone)]
pub struct MockFeeOracle {
    pub fee: u128,
    pub fail: Option<OracleError>,
}

impl MockFeeOracle {
    pub fn with_fee(fee: u128) -> Self {
        MockFeeOracle { fee, fail: None }
    }
}

impl WithdrawalFeeOracle for MockFeeOracle {
    fn fee_per_request(&self) -> Result<u128, OracleError> {
        match &self.fail {
            Some(err) => Err(err.clone()),
            None => Ok(self.fee),
        }
    }
}

/// Recording withdrawal-request sink.
#[derive(Debug, Default)]
pub struct MockSink {
    /// (packed batch, fee paid) per accepted submission.
    pub submissions: Vec<(Vec<u8>, u128)>,
    pub fail: Option<SinkError>,
    /// Total fees the sink has collected.
    pub collected_fees: u128,
}

impl WithdrawalRequestSink for MockSink {
    fn submit(&mut self, packed_requests: &[u8], fee: u128) -> Result<(), SinkError> {
        if let Some(err) = self.fail.take() {
            return Err(err);
        }
        self.collected_fees += fee;
        self.submissions.push((packed_requests.to_vec(), fee));
        Ok(())
    }
}

/// Recording native-currency transfer ledger.
#[derive(Debug, Default)]
pub struct MockTransfers {
    pub sent: Vec<(Address, u128)>,
    pub fail_for: Option<Address>,
}

impl NativeTransfer for MockTransfers {
    fn transfer(&mut self, recipient: Address, amount: u128) -> Result<(), TransferError> {
        if self.fail_for == Some(recipient) {
            return Err(TransferError { recipient, amount });
        }
        self.sent.push((recipient, amount));
        Ok(())
    }
}
