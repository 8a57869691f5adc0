//! Bridge error taxonomy.
//!
//! Errors here mean the bridge itself cannot proceed. Failures reported by
//! the remote tool are data (`ToolOutcome` with `success: false`), never a
//! `BridgeError`, so one bad call cannot destabilize a pooled connection or
//! an enclosing request loop.

use thiserror::Error;

use super::StoreError;

/// Errors surfaced by bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Bad, disabled, or non-stdio configuration. Fatal, never retried.
    #[error("invalid server configuration: {0}")]
    Configuration(String),

    /// Configuration lookup failed.
    #[error(transparent)]
    NotFound(#[from] StoreError),

    /// Process spawn failed after exhausting retries. The caller may retry
    /// later; repeated failures will open the circuit.
    #[error("failed to spawn MCP server process: {0}")]
    SpawnFailed(String),

    /// The circuit for this process key is open; no spawn was attempted.
    #[error("circuit open for this server; retry in {retry_after_secs}s")]
    CircuitOpen {
        /// Seconds until the cooldown elapses.
        retry_after_secs: u64,
    },

    /// Wire-protocol failure: framing, correlation mismatch, or timeout.
    #[error("MCP protocol error: {0}")]
    Protocol(String),
}

impl BridgeError {
    /// Whether a caller could reasonably retry this operation later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SpawnFailed(_) | Self::CircuitOpen { .. } | Self::Protocol(_)
        )
    }
}
