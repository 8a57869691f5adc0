//! Domain types for the stdio bridge.

mod config;
mod tool;

pub use config::{ServerConfiguration, ServerType, StdioLaunch};
pub use tool::{ProcessStatus, ServerStatusReport, Tool, ToolFault, ToolOutcome};
