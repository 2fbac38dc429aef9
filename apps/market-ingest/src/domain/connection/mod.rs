//! Source Connection State Machine
//!
//! ```text
//! Uninitialized → Connected      (handshake succeeded)
//! Uninitialized → Failed         (handshake failed)
//! Connected     → Degraded       (transient failure, retry scheduled)
//! Degraded      → Degraded       (another transient failure, budget left)
//! Degraded      → Connected      (retry succeeded)
//! Degraded      → Failed         (retry budget exhausted)
//! ```
//!
//! `Failed` is terminal: the source leaves active rotation, the engine keeps
//! running.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one upstream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Created, handshake not yet attempted.
    Uninitialized,
    /// Serving requests.
    Connected,
    /// Transient failure observed, retrying.
    Degraded,
    /// Retry budget exhausted or handshake failed. Terminal.
    Failed,
}

impl ConnectionState {
    /// Whether requests may be issued in this state.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Connected | Self::Degraded)
    }

    /// Whether no transition out of this state exists.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Whether `self → next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Uninitialized, Self::Connected | Self::Failed)
                | (Self::Connected, Self::Degraded)
                | (Self::Degraded, Self::Degraded | Self::Connected | Self::Failed)
        )
    }

    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempted transition that the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal connection transition {from} -> {to}")]
pub struct IllegalTransition {
    /// State before.
    pub from: ConnectionState,
    /// Requested state.
    pub to: ConnectionState,
}
