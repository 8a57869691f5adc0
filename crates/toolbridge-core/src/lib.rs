//! Core domain types and port definitions for toolbridge.
//!
//! This crate holds the configuration contract shared with the (external)
//! persistence layer, the value types returned to callers, and the error
//! taxonomy of the stdio bridge. It contains no process or I/O code.

pub mod domain;
pub mod ports;

// Re-export commonly used types for convenience
pub use domain::{
    ProcessStatus, ServerConfiguration, ServerStatusReport, ServerType, StdioLaunch, Tool,
    ToolFault, ToolOutcome,
};
pub use ports::{BridgeError, ConfigurationStore, StoreError};
