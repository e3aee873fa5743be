//! Replenishing-quota rate limiter.
//!
//! A token-bucket style counter indexed by block timestamp: the remaining
//! quota grows linearly by `items_per_frame` for every full `frame_duration`
//! elapsed since the last consumption, capped at `max_limit`. Consumption is
//! strict — a request larger than the currently available quota fails whole,
//! with no partial fulfillment.
//!
//! ## Invariants
//!
//! 1. `prev_limit <= max_limit` whenever a limit is active.
//! 2. `items_per_frame <= max_limit` and `frame_duration > 0` whenever a
//!    limit is active.
//! 3. Quota after a successful consume is always ≤ quota before it.
//! 4. `max_limit == 0` is the "no limit configured" sentinel: every quota
//!    check is bypassed, never treated as zero capacity.
//!
//! ## Limit changes
//!
//! `set_limits` reconciles mid-frame: remaining quota is recomputed as of
//! "now" under the OLD parameters first, then clamped to the new maximum.
//! A limit change therefore never grants a free instantaneous top-up and
//! never zeroes out quota that had legitimately replenished.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by rate-limit configuration and consumption.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// The request exceeds the currently available quota. The caller must
    /// retry with a smaller batch or wait for replenishment.
    #[error("rate limit exceeded: requested {requested}, available {available}")]
    QuotaExceeded { requested: u64, available: u64 },

    /// An active limit requires a nonzero frame duration.
    #[error("frame duration must be nonzero when a limit is active")]
    ZeroFrameDuration,

    /// Replenishment per frame may never exceed the bucket capacity.
    #[error("items per frame {items_per_frame} exceeds max limit {max_limit}")]
    ItemsPerFrameExceedsMax { items_per_frame: u64, max_limit: u64 },
}

/// Persisted rate-limit state. Pure value type; all transitions take the
/// current timestamp as an explicit argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    /// Bucket capacity. Zero means "no limit configured".
    pub max_limit: u64,
    /// Remaining quota as of `prev_timestamp`.
    pub prev_limit: u64,
    /// Timestamp the stored quota was last reconciled at.
    pub prev_timestamp: u64,
    /// Seconds per replenishment tick.
    pub frame_duration_secs: u64,
    /// Quota restored per elapsed frame.
    pub items_per_frame: u64,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl RateLimitState {
    /// The "no limit configured" state.
    pub fn unlimited() -> Self {
        RateLimitState {
            max_limit: 0,
            prev_limit: 0,
            prev_timestamp: 0,
            frame_duration_secs: 0,
            items_per_frame: 0,
        }
    }

    /// Create an active limit starting with a full bucket.
    pub fn new(
        max_limit: u64,
        items_per_frame: u64,
        frame_duration_secs: u64,
        now: u64,
    ) -> Result<Self, RateLimitError> {
        let mut state = Self::unlimited();
        state.set_limits(now, max_limit, items_per_frame, frame_duration_secs)?;
        Ok(state)
    }

    /// True when no limit is configured.
    pub fn is_unlimited(&self) -> bool {
        self.max_limit == 0
    }

    /// Quota available at `now`.
    ///
    /// Grows by `items_per_frame` per full elapsed frame, capped at
    /// `max_limit`. Timestamps before `prev_timestamp` yield the stored
    /// quota unchanged (the clock never runs backwards in the execution
    /// model; tolerate it rather than underflow).
    pub fn current_quota(&self, now: u64) -> u64 {
        if self.is_unlimited() {
            return u64::MAX;
        }
        let elapsed = now.saturating_sub(self.prev_timestamp);
        let frames = elapsed / self.frame_duration_secs;
        let replenished = frames.saturating_mul(self.items_per_frame);
        self.prev_limit
            .saturating_add(replenished)
            .min(self.max_limit)
    }

    /// Consume `requested` units at `now`, strictly.
    ///
    /// Fails with [`RateLimitError::QuotaExceeded`] — without mutating the
    /// state — when the request exceeds the available quota. On success the
    /// stored timestamp advances by whole frames only, so partial-frame
    /// replenishment progress is preserved for the next call.
    pub fn consume(&mut self, now: u64, requested: u64) -> Result<(), RateLimitError> {
        if self.is_unlimited() {
            return Ok(());
        }
        let available = self.current_quota(now);
        if requested > available {
            return Err(RateLimitError::QuotaExceeded {
                requested,
                available,
            });
        }
        let elapsed = now.saturating_sub(self.prev_timestamp);
        let frames = elapsed / self.frame_duration_secs;
        self.prev_limit = available - requested;
        self.prev_timestamp = self
            .prev_timestamp
            .saturating_add(frames.saturating_mul(self.frame_duration_secs));
        Ok(())
    }

    /// Reconfigure the limit at `now`, reconciling already-consumed state.
    ///
    /// A new `max_limit` of zero disables the limit entirely. Otherwise the
    /// remaining quota is recomputed under the old parameters as of `now`
    /// and clamped into the new maximum. Enabling a limit from the unlimited
    /// state starts with a full bucket.
    pub fn set_limits(
        &mut self,
        now: u64,
        max_limit: u64,
        items_per_frame: u64,
        frame_duration_secs: u64,
    ) -> Result<(), RateLimitError> {
        if max_limit == 0 {
            *self = Self::unlimited();
            return Ok(());
        }
        if frame_duration_secs == 0 {
            return Err(RateLimitError::ZeroFrameDuration);
        }
        if items_per_frame > max_limit {
            return Err(RateLimitError::ItemsPerFrameExceedsMax {
                items_per_frame,
                max_limit,
            });
        }

        let carried = if self.is_unlimited() {
            max_limit
        } else {
            self.current_quota(now).min(max_limit)
        };

        self.max_limit = max_limit;
        self.prev_limit = carried;
        self.prev_timestamp = now;
        self.items_per_frame = items_per_frame;
        self.frame_duration_secs = frame_duration_secs;
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
