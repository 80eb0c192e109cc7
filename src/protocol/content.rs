//! Tool result content.
//!
//! A [`ToolResult`] is what a handler produces and what the client finally
//! sees: an ordered list of typed [`ContentBlock`]s plus an error flag.
//!
//! # Format
//!
//! ```json
//! {
//!   "content": [
//!     { "type": "text", "text": "{\"success\":true}" },
//!     { "type": "image", "data": "iVBORw0...", "mimeType": "image/png" }
//!   ],
//!   "isError": false
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// ContentBlock
// ============================================================================

/// One typed block of tool output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    /// Plain or JSON-encoded text.
    Text {
        /// Text content.
        text: String,
    },

    /// Base64-encoded image.
    Image {
        /// Base64 image bytes.
        data: String,
        /// MIME type, e.g. `image/png`.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ContentBlock {
    /// Creates a text block.
    #[inline]
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Creates an image block, base64-encoding the raw bytes.
    #[inline]
    #[must_use]
    pub fn image(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::Image {
            data: STANDARD.encode(bytes),
            mime_type: mime_type.into(),
        }
    }

    /// Returns the text if this is a text block.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Image { .. } => None,
        }
    }

    /// Decodes the image bytes if this is an image block.
    #[must_use]
    pub fn image_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Self::Image { data, .. } => STANDARD.decode(data).ok(),
            Self::Text { .. } => None,
        }
    }
}

// ============================================================================
// ToolResult
// ============================================================================

/// Outcome of one tool execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Output blocks in handler order.
    #[serde(default)]
    pub content: Vec<ContentBlock>,

    /// `true` when the tool failed.
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolResult {
    /// Creates a successful result from blocks.
    #[inline]
    #[must_use]
    pub fn new(content: Vec<ContentBlock>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    /// Creates a successful single-text result.
    #[inline]
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![ContentBlock::text(text)])
    }

    /// Creates a successful result carrying a JSON value as text.
    #[must_use]
    pub fn json(value: &Value) -> Self {
        Self::text(value.to_string())
    }

    /// Creates an error result with a readable message.
    #[inline]
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(message)],
            is_error: true,
        }
    }

    /// Joins all text blocks with newlines.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ============================================================================
// Tests
// ============================================================================
