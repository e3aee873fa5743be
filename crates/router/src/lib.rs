//! # LSR Router Crate
//!
//! On-chain accounting and allocation core of the liquid-staking protocol:
//! tracks the staking-module registry, allocates deposits and withdrawals
//! across modules under share and capacity constraints, reconciles reported
//! exited-validator counts, and gates triggerable-withdrawal requests behind
//! a replenishing rate limit.
//!
//! ## Module Structure
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `state` | `StakingModule` records, `RouterState` store, status machine |
//! | `registry` | Module add/update/status/deposit-bookkeeping operations |
//! | `shares` | Target-share normalization (unset sentinel → exact 100%) |
//! | `allocation` | Deposit/withdrawal pouring math with conservation checks |
//! | `backend` | External collaborator traits and the two-tier failure policy |
//! | `reconciler` | Two-phase exited-validator reporting protocol |
//! | `gateway` | Rate-limited, fee-exact triggerable-withdrawal relay |
//! | `persistence` | Schema-versioned state envelope with explicit migrations |
//! | `service` | Exclusive-lock facade with transactional rollback |
//! | `testing` | Mock collaborators for unit and integration tests |
//!
//! ## Execution model
//!
//! Every public entry point is atomic: it either commits all of its state
//! changes or none of them. The [`service::RouterService`] facade enforces
//! this with a single exclusive lock and copy-then-commit semantics, which
//! is the host-side equivalent of the original serially-ordered transaction
//! model.

pub mod allocation;
pub mod backend;
pub mod gateway;
pub mod persistence;
pub mod reconciler;
pub mod registry;
pub mod service;
pub mod shares;
pub mod state;
pub mod testing;

pub use allocation::{allocate_deposit, allocate_withdrawal, Allocation, AllocationError};
pub use backend::{
    BackendDirectory, BackendError, ModuleSummary, NativeTransfer, OperatorSummary,
    StakingModuleBackend, WithdrawalFeeOracle, WithdrawalRequestSink,
};
pub use gateway::{trigger_full_withdrawals, GatewayError, WithdrawalRequest};
pub use registry::{ModuleParams, RegistryError};
pub use service::{RouterError, RouterService};
pub use shares::{normalize_target_shares, ShareError};
pub use state::{ModuleStatus, ModuleType, RouterState, StakingModule};
