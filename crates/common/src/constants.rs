//! Protocol ceilings and wire-format widths.
//!
//! These values bound every O(N) loop in allocation and reconciliation and
//! size every packed-bytes validation. They are consensus-critical for the
//! deployed protocol: changing any of them changes which inputs the router
//! accepts.

/// Hard ceiling on registered staking modules.
///
/// Bounds allocation and reconciliation loops to a known-safe cost. The
/// registry rejects `add_module` once this many modules exist.
pub const MAX_STAKING_MODULES: usize = 32;

/// Maximum module name length in bytes (UTF-8).
pub const MAX_MODULE_NAME_BYTES: usize = 31;

/// One packed withdrawal request on the sink wire: 48-byte pubkey followed
/// by an 8-byte big-endian amount.
pub const WITHDRAWAL_REQUEST_SIZE: usize = 56;

/// Width of one packed node-operator ID in a per-operator exited-count report.
pub const OPERATOR_ID_BYTES: usize = 8;

/// Width of one packed exited-validator count in a per-operator report.
pub const OPERATOR_COUNT_BYTES: usize = 16;
