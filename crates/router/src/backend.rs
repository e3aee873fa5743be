//! # External Module Collaborators
//!
//! Trait contracts for everything the router calls but does not implement:
//! staking-module backends, the withdrawal fee oracle, the withdrawal-request
//! sink, and native-currency transfers. Mock implementations live in
//! `crate::testing`.
//!
//! ## Two-tier failure policy
//!
//! Every backend notification distinguishes two failure classes by the
//! revert payload the external call came back with:
//!
//! - **Non-empty revert data** — an intentional business-logic revert. The
//!   caller may swallow it, log it, and retry next frame.
//! - **Empty revert data** — indistinguishable from resource exhaustion or a
//!   corrupted call. Always fatal: swallowing it would let gas-estimation
//!   tooling misprice the enclosing transaction.
//!
//! [`BackendError::is_fatal`] encodes exactly this split; every notification
//! site applies it identically.

use crate::state::ModuleType;
use lsr_common::PublicKey;
use thiserror::Error;

/// Wei per gwei.
pub const GWEI: u128 = 1_000_000_000;

/// Aggregate validator counters a module backend reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModuleSummary {
    /// Total validators that have fully exited, as the module itself knows.
    pub exited_validators: u64,
    /// Total validators ever deposited through this module.
    pub deposited_validators: u64,
    /// Validators ready to receive new deposits.
    pub depositable_validators: u64,
}

/// Per-node-operator counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperatorSummary {
    pub exited_validators: u64,
    pub deposited_validators: u64,
}

/// Failure of an external module call, carrying the raw revert payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("module backend call failed: revert data 0x{}", hex::encode(revert_data))]
pub struct BackendError {
    pub revert_data: Vec<u8>,
}

impl BackendError {
    /// A business-logic revert with an explanatory payload (swallowable).
    pub fn reverted(data: impl Into<Vec<u8>>) -> Self {
        BackendError {
            revert_data: data.into(),
        }
    }

    /// A bare failure with no revert data (always fatal).
    pub fn empty() -> Self {
        BackendError {
            revert_data: Vec::new(),
        }
    }

    /// Empty revert data must never be swallowed.
    pub fn is_fatal(&self) -> bool {
        self.revert_data.is_empty()
    }
}

/// Contract every staking-module backend exposes to the router.
pub trait StakingModuleBackend {
    fn summary(&self) -> Result<ModuleSummary, BackendError>;

    fn operator_summary(&self, operator_id: u64) -> Result<OperatorSummary, BackendError>;

    /// Apply a tightly-packed per-operator exited-count report
    /// (8-byte operator IDs, 16-byte counts; see `reconciler`).
    fn update_exited_validators_count(
        &mut self,
        packed_operator_ids: &[u8],
        packed_counts: &[u8],
    ) -> Result<(), BackendError>;

    /// Privileged per-operator count override, used by the router's own
    /// compare-and-swap escape hatch.
    fn unsafe_update_validators_count(
        &mut self,
        operator_id: u64,
        new_count: u64,
    ) -> Result<(), BackendError>;

    /// Reporting-finished callback for the current frame.
    fn on_exited_counts_updated(&mut self) -> Result<(), BackendError>;

    fn on_rewards_minted(&mut self, amount: u128) -> Result<(), BackendError>;

    fn on_withdrawal_credentials_changed(&mut self) -> Result<(), BackendError>;

    fn on_validator_exit_triggered(
        &mut self,
        operator_id: u64,
        pubkey: &PublicKey,
        paid_fee: u128,
        exit_type: u8,
    ) -> Result<(), BackendError>;
}

/// Resolves module IDs to their backend handles.
pub trait BackendDirectory {
    fn backend(&self, module_id: u32) -> Option<&dyn StakingModuleBackend>;
    fn backend_mut(&mut self, module_id: u32) -> Option<&mut dyn StakingModuleBackend>;
}

impl BackendDirectory for std::collections::HashMap<u32, Box<dyn StakingModuleBackend + Send>> {
    fn backend(&self, module_id: u32) -> Option<&dyn StakingModuleBackend> {
        self.get(&module_id).map(|b| b.as_ref() as _)
    }

    fn backend_mut(&mut self, module_id: u32) -> Option<&mut dyn StakingModuleBackend> {
        self.get_mut(&module_id).map(|b| b.as_mut() as _)
    }
}

/// External per-request withdrawal fee feed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// Empty or malformed return data. Never interpreted as a zero fee.
    #[error("fee oracle returned malformed data")]
    MalformedResponse,
    #[error("fee oracle call reverted")]
    Reverted,
}

pub trait WithdrawalFeeOracle {
    fn fee_per_request(&self) -> Result<u128, OracleError>;
}

/// External withdrawal-request sink accepting the packed batch plus an exact
/// fee payment.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("withdrawal sink rejected the batch: {0}")]
    Rejected(String),
    #[error("withdrawal sink rejected the fee payment: expected {expected}, got {provided}")]
    WrongFee { expected: u128, provided: u128 },
}

pub trait WithdrawalRequestSink {
    fn submit(&mut self, packed_requests: &[u8], fee: u128) -> Result<(), SinkError>;
}

/// Native-currency transfer used for gateway refunds.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("transfer of {amount} to {recipient} failed")]
pub struct TransferError {
    pub recipient: lsr_common::Address,
    pub amount: u128,
}

pub trait NativeTransfer {
    fn transfer(
        &mut self,
        recipient: lsr_common::Address,
        amount: u128,
    ) -> Result<(), TransferError>;
}

/// The single Legacy/New accounting seam.
///
/// `Legacy` backends report effective balances in gwei; `New` backends in
/// wei. Everything above this function works in gwei. Sub-gwei wei dust from
/// a `New` backend is truncated — the consensus layer never accounts below
/// gwei granularity.
pub fn reported_balance_gwei(module_type: ModuleType, raw_balance: u128) -> u128 {
    match module_type {
        ModuleType::Legacy => raw_balance,
        ModuleType::New => raw_balance / GWEI,
    }
}
