//! Stdio MCP bridge.
//!
//! Turns an untrusted, user-authored launch configuration into a safely
//! reused, crash-recovering JSON-RPC channel to a local MCP server process:
//!
//! - [`protocol`]: JSON-RPC 2.0 envelopes, built and validated once at the
//!   wire boundary.
//! - [`validator`]: the sole security gate between a configuration and
//!   local process execution; runs before every spawn.
//! - [`pool`]: OS subprocess lifecycle, the initialize/tools-discovery
//!   handshake, and the serialized one-request-one-response exchange.
//! - [`bridge`]: session-facing facade; process reuse, crash detection,
//!   circuit breaker, retry with backoff, result normalization.

pub mod bridge;
pub mod content;
pub(crate) mod path;
pub mod pool;
pub mod protocol;
pub mod validator;

// Re-export domain types from core for convenience
pub use toolbridge_core::{
    BridgeError, ConfigurationStore, ProcessStatus, ServerConfiguration, ServerStatusReport,
    ServerType, StdioLaunch, StoreError, Tool, ToolFault, ToolOutcome,
};

// Re-export this crate's public types
pub use bridge::{BridgeManager, RetryPolicy};
pub use content::{ToolContent, format_tool_result};
pub use pool::{ManagedProcess, PoolError, ProcessKey, ProcessPool};
pub use protocol::{JsonRpcRequest, JsonRpcResponse, ProtocolError, RequestId, RpcError};
pub use validator::{ProbeReport, ValidationReport, test_connection, validate};
