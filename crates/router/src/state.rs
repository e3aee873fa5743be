//! # Router State
//!
//! `StakingModule` records and the `RouterState` store they live in.
//!
//! ## Invariant Preservation
//!
//! Every mutating operation (see `registry`) preserves the index invariants:
//!
//! 1. Every module in `modules` has an entry in `address_index`.
//! 2. `address_index[module.address] == module.id`.
//! 3. No two modules share an address; no two modules share an ID.
//! 4. `modules` is ordered by ascending module ID — this is the
//!    caller-visible enumeration order that share normalization and
//!    allocation depend on for determinism.
//!
//! Module IDs are never reused. There is no deletion path: a module leaves
//! service only by transitioning to `Stopped`.

use lsr_common::{Address, RateLimitState, TARGET_SHARE_UNSET};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Operational status of a staking module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleStatus {
    /// Deposits and rewards distribution are allowed.
    Active,
    /// No new deposits; the module keeps accruing and reporting.
    DepositsPaused,
    /// Terminal: no deposits, no reward distribution.
    Stopped,
}

impl ModuleStatus {
    /// Closed set of legal status transitions.
    ///
    /// ```text
    /// Active         → DepositsPaused   (governance, or failed module callback)
    /// Active         → Stopped          (governance)
    /// DepositsPaused → Active           (governance)
    /// DepositsPaused → Stopped          (governance)
    /// Stopped        → (none)           (terminal)
    /// ```
    pub fn can_transition_to(self, next: ModuleStatus) -> bool {
        use ModuleStatus::*;
        match (self, next) {
            (Active, DepositsPaused) | (Active, Stopped) => true,
            (DepositsPaused, Active) | (DepositsPaused, Stopped) => true,
            (Stopped, _) => false,
            _ => false,
        }
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleStatus::Active => "active",
            ModuleStatus::DepositsPaused => "deposits-paused",
            ModuleStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Accounting variant of a module backend.
///
/// `Legacy` backends report balances in gwei; `New` backends report wei.
/// The conversion happens at exactly one seam, `backend::reported_balance_gwei`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleType {
    Legacy,
    New,
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleType::Legacy => "legacy",
            ModuleType::New => "new",
        };
        f.write_str(s)
    }
}

/// Fee, share, and status configuration of a module.
///
/// All percentage fields are basis points out of 10_000. A share field equal
/// to [`TARGET_SHARE_UNSET`] means "unset — split the remainder equally".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub fee_bp: u16,
    pub treasury_fee_bp: u16,
    pub deposit_target_share_bp: u16,
    pub withdrawal_protect_share_bp: u16,
    pub status: ModuleStatus,
    pub module_type: ModuleType,
}

/// Per-module deposit-pacing bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositTracking {
    pub last_deposit_at: u64,
    pub last_deposit_block: u64,
    pub max_deposits_per_block: u64,
    pub min_deposit_block_distance: u64,
}

/// Per-module accounting counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleAccounting {
    /// Consensus-layer effective balance attributed to this module, in gwei.
    pub effective_balance_gwei: u128,
    /// Cumulative, monotone count of fully exited validators. Decreases only
    /// through the privileged compare-and-swap override.
    pub exited_validators_count: u64,
}

/// One registered staking module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingModule {
    /// Unique positive ID, immutable once assigned, never reused.
    pub id: u32,
    /// External module contract address; unique across all modules.
    pub address: Address,
    /// Short human-readable name, ≤31 bytes UTF-8.
    pub name: String,
    pub config: ModuleConfig,
    pub deposits: DepositTracking,
    pub accounting: ModuleAccounting,
}

impl StakingModule {
    /// Whether this module currently accepts deposits.
    pub fn accepts_deposits(&self) -> bool {
        self.config.status == ModuleStatus::Active
    }

    /// Deposit target share, or the unset sentinel.
    pub fn deposit_target_share(&self) -> u16 {
        self.config.deposit_target_share_bp
    }

    /// Withdrawal protect share, or the unset sentinel.
    pub fn withdrawal_protect_share(&self) -> u16 {
        self.config.withdrawal_protect_share_bp
    }

    pub fn has_unset_deposit_share(&self) -> bool {
        self.config.deposit_target_share_bp == TARGET_SHARE_UNSET
    }
}

/// The full persisted router state.
///
/// `address_index` is derived data: it is rebuilt from `modules` after
/// deserialization and is skipped by serde.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterState {
    /// Modules in ascending-ID order (insertion order; IDs only grow).
    pub modules: Vec<StakingModule>,
    /// Highest module ID ever assigned; the next module gets `last_module_id + 1`.
    pub last_module_id: u32,
    /// Quota state for the triggerable-withdrawal gateway.
    pub withdrawal_rate_limit: RateLimitState,
    /// Validators newly reported as exited during the current reporting
    /// frame; reset when per-operator reporting finishes.
    pub frame_newly_exited: u64,
    /// Reverse index: module address → module ID. Derived, rebuilt on load.
    #[serde(skip)]
    pub(crate) address_index: HashMap<Address, u32>,
}

impl RouterState {
    pub fn new() -> Self {
        RouterState {
            modules: Vec::new(),
            last_module_id: 0,
            withdrawal_rate_limit: RateLimitState::unlimited(),
            frame_newly_exited: 0,
            address_index: HashMap::new(),
        }
    }

    /// Rebuild the derived address index from `modules`.
    ///
    /// Called after deserialization and by the persistence migrations.
    pub fn rebuild_index(&mut self) {
        self.address_index = self
            .modules
            .iter()
            .map(|m| (m.address, m.id))
            .collect();
    }

    /// Number of registered modules (any status).
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Number of modules currently accepting deposits.
    pub fn active_module_count(&self) -> usize {
        self.modules.iter().filter(|m| m.accepts_deposits()).count()
    }

    /// Look up a module by ID.
    pub fn module(&self, module_id: u32) -> Option<&StakingModule> {
        // IDs are assigned densely in practice but holes are legal once a
        // future variant gains removal, so search rather than index.
        self.modules.iter().find(|m| m.id == module_id)
    }

    pub(crate) fn module_mut(&mut self, module_id: u32) -> Option<&mut StakingModule> {
        self.modules.iter_mut().find(|m| m.id == module_id)
    }

    /// Look up a module by its contract address via the reverse index.
    pub fn module_by_address(&self, address: &Address) -> Option<&StakingModule> {
        let id = *self.address_index.get(address)?;
        self.module(id)
    }

    /// All modules in ascending-ID enumeration order.
    pub fn modules(&self) -> &[StakingModule] {
        &self.modules
    }

    /// Deposit target shares in enumeration order (raw, possibly sentinel).
    pub fn deposit_target_shares(&self) -> Vec<u16> {
        self.modules
            .iter()
            .map(|m| m.config.deposit_target_share_bp)
            .collect()
    }

    /// Withdrawal protect shares in enumeration order (raw, possibly sentinel).
    pub fn withdrawal_protect_shares(&self) -> Vec<u16> {
        self.modules
            .iter()
            .map(|m| m.config.withdrawal_protect_share_bp)
            .collect()
    }

    /// Effective balances in enumeration order, gwei.
    pub fn effective_balances_gwei(&self) -> Vec<u128> {
        self.modules
            .iter()
            .map(|m| m.accounting.effective_balance_gwei)
            .collect()
    }

    /// Total effective balance across all modules, gwei.
    pub fn total_effective_balance_gwei(&self) -> u128 {
        self.modules
            .iter()
            .map(|m| m.accounting.effective_balance_gwei)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transition_closed_set() {
        use ModuleStatus::*;
        assert!(Active.can_transition_to(DepositsPaused));
        assert!(Active.can_transition_to(Stopped));
        assert!(DepositsPaused.can_transition_to(Active));
        assert!(DepositsPaused.can_transition_to(Stopped));
        // Stopped is terminal.
        assert!(!Stopped.can_transition_to(Active));
        assert!(!Stopped.can_transition_to(DepositsPaused));
        // Self-transitions are not transitions.
        assert!(!Active.can_transition_to(Active));
    }

    #[test]
    fn test_empty_state() {
        let state = RouterState::new();
        assert_eq!(state.module_count(), 0);
        assert_eq!(state.active_module_count(), 0);
        assert_eq!(state.last_module_id, 0);
        assert!(state.module(1).is_none());
        assert_eq!(state.total_effective_balance_gwei(), 0);
    }
}
