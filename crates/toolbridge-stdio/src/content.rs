//! Tool result normalization.
//!
//! MCP servers return heterogeneous content shapes. They are decoded once
//! at this boundary into a tagged union and folded into a single textual
//! payload; callers never see raw wire shapes.

use serde::Deserialize;
use serde_json::Value;
use toolbridge_core::ToolOutcome;

use crate::protocol::JsonRpcResponse;

/// One `{type, text}` block from a content array.
#[derive(Debug, Clone, Deserialize)]
pub struct TextBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// The content shapes MCP servers are known to produce.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ToolContent {
    /// Array of typed blocks: `[{type: "text", text: "..."}, ...]`
    TextBlocks(Vec<TextBlock>),
    /// Object exposing a `text` field directly
    RawText { text: String },
    /// A bare string
    RawString(String),
}

impl ToolContent {
    /// Fold the content into one textual payload. Text blocks are joined
    /// with newlines; blocks without text (images, resources) are skipped.
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::TextBlocks(blocks) => blocks
                .into_iter()
                .filter_map(|block| block.text)
                .collect::<Vec<_>>()
                .join("\n"),
            Self::RawText { text } | Self::RawString(text) => text,
        }
    }
}

/// Normalize a raw `tools/call` response into a [`ToolOutcome`].
///
/// A JSON-RPC error envelope becomes `success: false` with the server's
/// code and message; it is never raised. A result is unwrapped from its
/// `content` key when present and decoded as [`ToolContent`]; shapes we do
/// not recognize fall back to their compact JSON rendering.
#[must_use]
pub fn format_tool_result(response: &JsonRpcResponse) -> ToolOutcome {
    if let Some(error) = response.error() {
        return ToolOutcome::fault(error.code, error.message.clone());
    }

    let raw = response.result().cloned().unwrap_or(Value::Null);
    let content = raw.get("content").cloned().unwrap_or(raw);

    let text = match serde_json::from_value::<ToolContent>(content.clone()) {
        Ok(decoded) => decoded.into_text(),
        Err(_) => content.to_string(),
    };

    ToolOutcome::ok(text)
}
