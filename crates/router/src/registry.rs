//! # Module Registry Operations
//!
//! Add/update/status/deposit-bookkeeping operations over [`RouterState`].
//!
//! Every operation performs ALL validations before ANY mutation: a failed
//! call leaves the state byte-identical to what it was. This is load-bearing
//! for the transactional execution model — callers rely on "reject before
//! mutate" to compose operations without snapshots.

use crate::state::{
    DepositTracking, ModuleAccounting, ModuleConfig, ModuleStatus, ModuleType, RouterState,
    StakingModule,
};
use lsr_common::constants::{MAX_MODULE_NAME_BYTES, MAX_STAKING_MODULES};
use lsr_common::{Address, TARGET_SHARE_UNSET, TOTAL_BASIS_POINTS};
use thiserror::Error;
use tracing::info;

/// Validation failures for registry operations. All variants reject the
/// operation before any state mutation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("staking module {0} is not registered")]
    ModuleNotFound(u32),

    #[error("module address must not be the zero address")]
    ZeroAddress,

    #[error("module address {0} is already registered")]
    DuplicateAddress(Address),

    #[error("module name must be non-empty and at most {MAX_MODULE_NAME_BYTES} bytes, got {0} bytes")]
    InvalidNameLength(usize),

    #[error("module count ceiling reached ({MAX_STAKING_MODULES})")]
    TooManyModules,

    #[error("module fee {fee_bp} + treasury fee {treasury_fee_bp} exceeds {TOTAL_BASIS_POINTS} BP")]
    FeeSumExceeds100Percent { fee_bp: u16, treasury_fee_bp: u16 },

    #[error(
        "deposit target share {target_bp} exceeds withdrawal protect share {protect_bp}"
    )]
    TargetShareAboveProtectShare { target_bp: u16, protect_bp: u16 },

    #[error("share value {0} exceeds {TOTAL_BASIS_POINTS} BP")]
    ShareAboveMax(u16),

    #[error("defined {kind} shares sum to {total} BP, exceeding {TOTAL_BASIS_POINTS}")]
    DefinedSharesExceed100Percent { kind: &'static str, total: u32 },

    #[error("invalid status transition for module {module_id}: {from} → {to}")]
    InvalidStatusTransition {
        module_id: u32,
        from: ModuleStatus,
        to: ModuleStatus,
    },

    #[error("module {0} is not accepting deposits")]
    DepositsNotAllowed(u32),

    #[error(
        "deposit to module {module_id} too soon: last deposit block {last_block}, \
         current block {block}, required distance {min_distance}"
    )]
    DepositTooFrequent {
        module_id: u32,
        last_block: u64,
        block: u64,
        min_distance: u64,
    },

    #[error("min deposit block distance must be nonzero")]
    ZeroDepositBlockDistance,
}

/// Parameters for registering a new staking module.
#[derive(Debug, Clone)]
pub struct ModuleParams {
    pub name: String,
    pub address: Address,
    pub module_type: ModuleType,
    pub fee_bp: u16,
    pub treasury_fee_bp: u16,
    pub deposit_target_share_bp: u16,
    pub withdrawal_protect_share_bp: u16,
    pub max_deposits_per_block: u64,
    pub min_deposit_block_distance: u64,
}

fn validate_fees(fee_bp: u16, treasury_fee_bp: u16) -> Result<(), RegistryError> {
    let sum = fee_bp as u32 + treasury_fee_bp as u32;
    if sum > TOTAL_BASIS_POINTS as u32 {
        return Err(RegistryError::FeeSumExceeds100Percent {
            fee_bp,
            treasury_fee_bp,
        });
    }
    Ok(())
}

fn validate_share_pair(target_bp: u16, protect_bp: u16) -> Result<(), RegistryError> {
    // The unset sentinel equals TOTAL_BASIS_POINTS, so it passes both checks
    // without special-casing.
    if target_bp > TOTAL_BASIS_POINTS {
        return Err(RegistryError::ShareAboveMax(target_bp));
    }
    if protect_bp > TOTAL_BASIS_POINTS {
        return Err(RegistryError::ShareAboveMax(protect_bp));
    }
    if target_bp > protect_bp {
        return Err(RegistryError::TargetShareAboveProtectShare {
            target_bp,
            protect_bp,
        });
    }
    Ok(())
}

impl RouterState {
    /// Register a new staking module and return its assigned ID.
    ///
    /// Validates the address (non-zero, unique), the name length, the fee
    /// and share sums, and the module-count ceiling — all before mutating.
    pub fn add_module(&mut self, params: ModuleParams) -> Result<u32, RegistryError> {
        if params.address.is_zero() {
            return Err(RegistryError::ZeroAddress);
        }
        if self.address_index.contains_key(&params.address) {
            return Err(RegistryError::DuplicateAddress(params.address));
        }
        let name_len = params.name.len();
        if name_len == 0 || name_len > MAX_MODULE_NAME_BYTES {
            return Err(RegistryError::InvalidNameLength(name_len));
        }
        if self.modules.len() >= MAX_STAKING_MODULES {
            return Err(RegistryError::TooManyModules);
        }
        if params.min_deposit_block_distance == 0 {
            return Err(RegistryError::ZeroDepositBlockDistance);
        }
        validate_fees(params.fee_bp, params.treasury_fee_bp)?;
        validate_share_pair(
            params.deposit_target_share_bp,
            params.withdrawal_protect_share_bp,
        )?;
        self.check_defined_share_budget(
            None,
            params.deposit_target_share_bp,
            params.withdrawal_protect_share_bp,
        )?;

        let id = self.last_module_id + 1;
        let module = StakingModule {
            id,
            address: params.address,
            name: params.name,
            config: ModuleConfig {
                fee_bp: params.fee_bp,
                treasury_fee_bp: params.treasury_fee_bp,
                deposit_target_share_bp: params.deposit_target_share_bp,
                withdrawal_protect_share_bp: params.withdrawal_protect_share_bp,
                status: ModuleStatus::Active,
                module_type: params.module_type,
            },
            deposits: DepositTracking {
                last_deposit_at: 0,
                last_deposit_block: 0,
                max_deposits_per_block: params.max_deposits_per_block,
                min_deposit_block_distance: params.min_deposit_block_distance,
            },
            accounting: ModuleAccounting {
                effective_balance_gwei: 0,
                exited_validators_count: 0,
            },
        };

        info!(
            "staking module {} ({}) registered at {} as id {}",
            module.name, module.config.module_type, module.address, id
        );

        self.address_index.insert(module.address, id);
        self.modules.push(module);
        self.last_module_id = id;
        Ok(id)
    }

    /// Update the deposit-target and withdrawal-protect shares of a module.
    pub fn update_module_shares(
        &mut self,
        module_id: u32,
        deposit_target_share_bp: u16,
        withdrawal_protect_share_bp: u16,
    ) -> Result<(), RegistryError> {
        validate_share_pair(deposit_target_share_bp, withdrawal_protect_share_bp)?;
        self.check_defined_share_budget(
            Some(module_id),
            deposit_target_share_bp,
            withdrawal_protect_share_bp,
        )?;
        let module = self
            .module_mut(module_id)
            .ok_or(RegistryError::ModuleNotFound(module_id))?;
        module.config.deposit_target_share_bp = deposit_target_share_bp;
        module.config.withdrawal_protect_share_bp = withdrawal_protect_share_bp;
        info!(
            "module {} shares updated: target {} BP, protect {} BP",
            module_id, deposit_target_share_bp, withdrawal_protect_share_bp
        );
        Ok(())
    }

    /// Update the module and treasury fees of a module.
    pub fn update_module_fees(
        &mut self,
        module_id: u32,
        fee_bp: u16,
        treasury_fee_bp: u16,
    ) -> Result<(), RegistryError> {
        validate_fees(fee_bp, treasury_fee_bp)?;
        let module = self
            .module_mut(module_id)
            .ok_or(RegistryError::ModuleNotFound(module_id))?;
        module.config.fee_bp = fee_bp;
        module.config.treasury_fee_bp = treasury_fee_bp;
        Ok(())
    }

    /// Update deposit-pacing parameters of a module.
    pub fn update_deposit_params(
        &mut self,
        module_id: u32,
        max_deposits_per_block: u64,
        min_deposit_block_distance: u64,
    ) -> Result<(), RegistryError> {
        if min_deposit_block_distance == 0 {
            return Err(RegistryError::ZeroDepositBlockDistance);
        }
        let module = self
            .module_mut(module_id)
            .ok_or(RegistryError::ModuleNotFound(module_id))?;
        module.deposits.max_deposits_per_block = max_deposits_per_block;
        module.deposits.min_deposit_block_distance = min_deposit_block_distance;
        Ok(())
    }

    /// Transition a module to a new status, enforcing the closed transition
    /// set of [`ModuleStatus::can_transition_to`].
    pub fn set_module_status(
        &mut self,
        module_id: u32,
        new_status: ModuleStatus,
    ) -> Result<(), RegistryError> {
        let module = self
            .module_mut(module_id)
            .ok_or(RegistryError::ModuleNotFound(module_id))?;
        let current = module.config.status;
        if !current.can_transition_to(new_status) {
            return Err(RegistryError::InvalidStatusTransition {
                module_id,
                from: current,
                to: new_status,
            });
        }
        module.config.status = new_status;
        info!("module {} status: {} → {}", module_id, current, new_status);
        Ok(())
    }

    /// Record a successful deposit against a module.
    ///
    /// Rejects when the module is not accepting deposits or the deposit
    /// arrives closer than `min_deposit_block_distance` to the previous one.
    pub fn note_deposit(
        &mut self,
        module_id: u32,
        block: u64,
        timestamp: u64,
    ) -> Result<(), RegistryError> {
        let module = self
            .module_mut(module_id)
            .ok_or(RegistryError::ModuleNotFound(module_id))?;
        if !module.accepts_deposits() {
            return Err(RegistryError::DepositsNotAllowed(module_id));
        }
        let last_block = module.deposits.last_deposit_block;
        let min_distance = module.deposits.min_deposit_block_distance;
        if last_block != 0 && block < last_block.saturating_add(min_distance) {
            return Err(RegistryError::DepositTooFrequent {
                module_id,
                last_block,
                block,
                min_distance,
            });
        }
        module.deposits.last_deposit_block = block;
        module.deposits.last_deposit_at = timestamp;
        Ok(())
    }

    /// Store a module's reported effective balance (already converted to gwei
    /// at the `backend::reported_balance_gwei` seam).
    pub fn set_effective_balance_gwei(
        &mut self,
        module_id: u32,
        balance_gwei: u128,
    ) -> Result<(), RegistryError> {
        let module = self
            .module_mut(module_id)
            .ok_or(RegistryError::ModuleNotFound(module_id))?;
        module.accounting.effective_balance_gwei = balance_gwei;
        Ok(())
    }

    /// Verify that the sum of DEFINED shares (sentinel slots excluded) stays
    /// within the 10_000 BP budget, for both share kinds, with the module
    /// `replacing` (if any) taking `new_target`/`new_protect` instead of its
    /// stored values.
    fn check_defined_share_budget(
        &self,
        replacing: Option<u32>,
        new_target: u16,
        new_protect: u16,
    ) -> Result<(), RegistryError> {
        let mut target_total: u32 = 0;
        let mut protect_total: u32 = 0;
        for module in &self.modules {
            let (target, protect) = if Some(module.id) == replacing {
                (new_target, new_protect)
            } else {
                (
                    module.config.deposit_target_share_bp,
                    module.config.withdrawal_protect_share_bp,
                )
            };
            if target != TARGET_SHARE_UNSET {
                target_total += target as u32;
            }
            if protect != TARGET_SHARE_UNSET {
                protect_total += protect as u32;
            }
        }
        if replacing.is_none() {
            if new_target != TARGET_SHARE_UNSET {
                target_total += new_target as u32;
            }
            if new_protect != TARGET_SHARE_UNSET {
                protect_total += new_protect as u32;
            }
        }
        if target_total > TOTAL_BASIS_POINTS as u32 {
            return Err(RegistryError::DefinedSharesExceed100Percent {
                kind: "deposit-target",
                total: target_total,
            });
        }
        if protect_total > TOTAL_BASIS_POINTS as u32 {
            return Err(RegistryError::DefinedSharesExceed100Percent {
                kind: "withdrawal-protect",
                total: protect_total,
            });
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
