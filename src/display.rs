//! Display formatting for node outputs.
//!
//! After a node completes, the scheduler asks the [`FormatterRegistry`] how
//! the result should be presented and attaches the answer under the
//! reserved [`DISPLAY_METADATA_KEY`] — the frontend renders from that,
//! never from raw outputs. Formatters are pure functions: no I/O, no
//! mutation, and a formatter failure only downgrades presentation to raw
//! JSON; the node still counts as completed.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// Reserved output key owned by the formatter layer. Nodes must not emit it.
pub const DISPLAY_METADATA_KEY: &str = "_display_metadata";

/// How the frontend should render a node result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayType {
    Html,
    Markdown,
    Chart,
    Table,
    Image,
    Json,
}

/// Presentation metadata attached to a completed node's outputs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DisplayMetadata {
    pub display_type: DisplayType,
    pub primary_content: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Value>,
    /// Set when a registered formatter failed and presentation fell back
    /// to raw JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DisplayMetadata {
    /// The fallback: raw outputs as JSON.
    #[must_use]
    pub fn json_fallback(outputs: &FxHashMap<String, Value>) -> Self {
        let map: serde_json::Map<String, Value> = outputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            display_type: DisplayType::Json,
            primary_content: Value::Object(map),
            attachments: Vec::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn markdown(content: impl Into<String>) -> Self {
        Self {
            display_type: DisplayType::Markdown,
            primary_content: json!(content.into()),
            attachments: Vec::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<Value>) -> Self {
        self.attachments = attachments;
        self
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A formatter rejected the outputs it was given.
#[derive(Debug, Error)]
#[error("formatter failed: {0}")]
pub struct FormatterError(pub String);

/// Pure function producing presentation metadata from raw outputs.
pub type Formatter =
    Arc<dyn Fn(&FxHashMap<String, Value>) -> Result<DisplayMetadata, FormatterError> + Send + Sync>;

/// Per-node-type formatter lookup. Populated at startup, read-only after.
#[derive(Default, Clone)]
pub struct FormatterRegistry {
    formatters: FxHashMap<String, Formatter>,
}

impl FormatterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a formatter for a node type, replacing any previous one.
    pub fn register<F>(&mut self, node_type: impl Into<String>, formatter: F)
    where
        F: Fn(&FxHashMap<String, Value>) -> Result<DisplayMetadata, FormatterError>
            + Send
            + Sync
            + 'static,
    {
        self.formatters.insert(node_type.into(), Arc::new(formatter));
    }

    /// Produce display metadata for a node's outputs. Never fails: missing
    /// or failing formatters degrade to the JSON fallback.
    #[must_use]
    pub fn format(&self, node_type: &str, outputs: &FxHashMap<String, Value>) -> DisplayMetadata {
        match self.formatters.get(node_type) {
            None => DisplayMetadata::json_fallback(outputs),
            Some(formatter) => match formatter(outputs) {
                Ok(metadata) => metadata,
                Err(err) => {
                    tracing::warn!(
                        target: "nodeflow::display",
                        node_type,
                        error = %err,
                        "formatter failed; falling back to json"
                    );
                    let mut fallback = DisplayMetadata::json_fallback(outputs);
                    fallback.error = Some(err.to_string());
                    fallback
                }
            },
        }
    }
}
