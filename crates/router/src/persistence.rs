//! JSON snapshot persistence with versioned schema migration.
//!
//! Snapshots are a small envelope around [`RouterState`]:
//!
//! ```json
//! { "schema_version": 2, "state": { ... } }
//! ```
//!
//! Version 1 predates the withdrawal rate limiter and frame counters; v1
//! snapshots load with an unlimited limiter and a zeroed frame. Unknown
//! versions are rejected, never guessed at.

use crate::state::RouterState;
use lsr_common::rate_limiter::RateLimitState;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("snapshot is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("snapshot has no schema_version field")]
    MissingVersion,

    #[error("unsupported snapshot schema version {found}, supported up to {SCHEMA_VERSION}")]
    UnsupportedSchema { found: u32 },
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    schema_version: u32,
    state: Value,
}

/// Serialize the full router state as a current-version snapshot.
pub fn save_state(state: &RouterState) -> Result<String, PersistenceError> {
    let envelope = Envelope {
        schema_version: SCHEMA_VERSION,
        state: serde_json::to_value(state)?,
    };
    Ok(serde_json::to_string_pretty(&envelope)?)
}

/// Load a snapshot of any supported schema version.
///
/// Older versions are migrated forward in place before decoding. The
/// derived address index is always rebuilt from the module list.
pub fn load_state(snapshot: &str) -> Result<RouterState, PersistenceError> {
    let envelope: Envelope = serde_json::from_str(snapshot)?;
    let mut raw = envelope.state;
    match envelope.schema_version {
        1 => migrate_v1(&mut raw)?,
        2 => {}
        0 => return Err(PersistenceError::MissingVersion),
        other => return Err(PersistenceError::UnsupportedSchema { found: other }),
    }

    let mut state: RouterState = serde_json::from_value(raw)?;
    state.rebuild_index();
    Ok(state)
}

/// v1 → v2: the rate limiter and frame counter did not exist yet.
fn migrate_v1(raw: &mut Value) -> Result<(), PersistenceError> {
    if let Value::Object(map) = raw {
        map.entry("withdrawal_rate_limit")
            .or_insert(serde_json::to_value(RateLimitState::unlimited())?);
        map.entry("frame_newly_exited").or_insert(json!(0));
    }
    info!("migrated state snapshot from schema v1");
    Ok(())
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
