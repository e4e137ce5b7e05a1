//! Idle-timeout state machine.
//!
//! Evaluation is a pure function of the spec, the recorded idle-since
//! timestamp, whether clients were observed and the current time. The pass
//! persists the resulting idle-since in status and, on `Triggering`,
//! disables the instance.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};

use slumber_core::InstanceSpec;

/// Idle state of an instance for one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdleState {
    /// Clients present, timeout disabled or instance already disabled.
    Active,
    /// No clients; threshold not exceeded yet.
    Counting,
    /// Threshold exceeded; the instance must be disabled.
    Triggering,
}

impl fmt::Display for IdleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Counting => write!(f, "counting"),
            Self::Triggering => write!(f, "triggering"),
        }
    }
}

/// Result of evaluating the idle timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleDecision {
    pub state: IdleState,
    /// Value to record as the status idle-since.
    pub idle_since: Option<DateTime<Utc>>,
}

impl IdleDecision {
    const fn active(idle_since: Option<DateTime<Utc>>) -> Self {
        Self {
            state: IdleState::Active,
            idle_since,
        }
    }

    /// Time spent idle as of `now`, if counting.
    #[must_use]
    pub fn idle_for(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.idle_since.map(|since| now - since)
    }
}

/// Evaluate the idle timeout for one observation.
///
/// With clients present the idle-since is reset to `now`. A disabled
/// instance or a non-positive threshold clears it.
#[must_use]
pub fn evaluate(
    spec: &InstanceSpec,
    idle_since: Option<DateTime<Utc>>,
    has_players: bool,
    now: DateTime<Utc>,
) -> IdleDecision {
    if !spec.enabled || !spec.idle_timeout_enabled() {
        return IdleDecision::active(None);
    }

    if has_players {
        return IdleDecision::active(Some(now));
    }

    let Some(since) = idle_since else {
        return IdleDecision {
            state: IdleState::Counting,
            idle_since: Some(now),
        };
    };

    let threshold = TimeDelta::seconds(spec.idle_timeout_seconds);
    let state = if now - since > threshold {
        IdleState::Triggering
    } else {
        IdleState::Counting
    };

    IdleDecision {
        state,
        idle_since: Some(since),
    }
}
