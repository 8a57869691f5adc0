//! Tool and runtime-status value types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Runtime status of a managed server process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// Process spawned, handshake not yet complete
    Starting,
    /// Handshake complete, tools discovered
    Ready,
    /// Handshake or protocol failure; process kept for diagnosis
    Error,
    /// No process exists for this key
    #[default]
    Stopped,
}

/// Tool definition advertised by an MCP server via `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name (function name).
    pub name: String,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for input parameters.
    #[serde(
        default,
        rename = "inputSchema",
        skip_serializing_if = "Option::is_none"
    )]
    pub input_schema: Option<serde_json::Value>,
}

impl Tool {
    /// Create a new tool definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: None,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

/// Error reported by the remote tool itself.
///
/// These are data, not exceptions: a failing tool call must never kill the
/// pooled process or propagate as an error from the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFault {
    /// JSON-RPC error code reported by the server.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

/// Normalized result of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Whether the call succeeded.
    pub success: bool,

    /// Normalized textual content (if success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Error reported by the server (if failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFault>,

    /// Wall-clock duration of the call in milliseconds.
    pub execution_time_ms: u64,
}

impl ToolOutcome {
    /// Create a success outcome.
    #[must_use]
    pub const fn ok(content: String) -> Self {
        Self {
            success: true,
            content: Some(content),
            error: None,
            execution_time_ms: 0,
        }
    }

    /// Create a failure outcome from a server-reported error.
    pub fn fault(code: i64, message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: None,
            error: Some(ToolFault {
                code,
                message: message.into(),
            }),
            execution_time_ms: 0,
        }
    }

    /// Set the measured execution time.
    #[must_use]
    pub const fn with_execution_time(mut self, millis: u64) -> Self {
        self.execution_time_ms = millis;
        self
    }
}

/// Snapshot of a bridged server's runtime state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatusReport {
    /// Current process status.
    pub status: ProcessStatus,

    /// Time of the last successful exchange, if a process exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,

    /// Number of cached tools.
    pub tools_count: usize,
}

impl ServerStatusReport {
    /// Report for a key with no pooled process.
    #[must_use]
    pub const fn stopped() -> Self {
        Self {
            status: ProcessStatus::Stopped,
            last_activity: None,
            tools_count: 0,
        }
    }
}
