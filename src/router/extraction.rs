//! Critical-field extraction: the rescue pass after smart-merge.
//!
//! Some target types cannot run without specific fields. When the pattern
//! table left one missing, this pass scans every collected source output
//! for the standard key — including keys prefixed with the producing
//! node's id (`{source_id}_{field}`) — and fills the gap.

use serde_json::Value;

use super::patterns::{SourceClass, classify};
use super::{InputOrigin, RoutedInputs, SourceData};

/// The keys any textual output may live under, in preference order.
pub(super) const TEXTUAL_KEYS: &[&str] = &[
    "text", "output", "content", "body", "summary", "response",
];

/// Look up `field` in a source's outputs, resolving the
/// `{source_id}_{field}` prefixed form as a fallback.
fn find_field<'a>(source: &'a SourceData, field: &str) -> Option<&'a Value> {
    if let Some(value) = source.outputs.get(field) {
        return Some(value);
    }
    source
        .outputs
        .get(&format!("{}_{field}", source.node_id))
}

/// First source of a class (in collection order) carrying `field`.
fn scan<'a>(
    sources: &'a [SourceData],
    classes: &[SourceClass],
    field: &str,
) -> Option<&'a Value> {
    sources
        .iter()
        .filter(|s| classes.contains(&classify(&s.node_type, s.category)))
        .find_map(|s| find_field(s, field))
}

fn rescue(
    inputs: &mut RoutedInputs,
    key: &str,
    sources: &[SourceData],
    classes: &[SourceClass],
    field: &str,
) {
    if inputs.values.contains_key(key) {
        return;
    }
    if let Some(value) = scan(sources, classes, field) {
        inputs.set(key, value.clone(), InputOrigin::Extraction);
    }
}

/// Guarantee the type-specific indispensable fields, where any collected
/// source can supply them.
pub(super) fn extract_critical_fields(
    target_type: &str,
    target_class: SourceClass,
    inputs: &mut RoutedInputs,
    sources: &[SourceData],
) {
    match target_class {
        // Chat/LLM over retrieval: the prompt template needs the original
        // question and the retrieved context.
        SourceClass::Llm => {
            rescue(inputs, "query", sources, &[SourceClass::TextInput], "text");
            rescue(inputs, "query", sources, &[SourceClass::Retrieval], "query");
            rescue(
                inputs,
                "results",
                sources,
                &[SourceClass::Retrieval, SourceClass::Rerank],
                "results",
            );
        }
        SourceClass::Embedding => {
            rescue(inputs, "chunks", sources, &[SourceClass::Chunking], "chunks");
        }
        SourceClass::VectorStore => {
            rescue(
                inputs,
                "embeddings",
                sources,
                &[SourceClass::Embedding],
                "embeddings",
            );
            rescue(inputs, "chunks", sources, &[SourceClass::Embedding], "chunks");
        }
        SourceClass::Retrieval if target_type == "vector_search" => {
            rescue(inputs, "query", sources, &[SourceClass::TextInput], "text");
            rescue(
                inputs,
                "index_id",
                sources,
                &[SourceClass::VectorStore],
                "index_id",
            );
        }
        _ => {}
    }

    // Delivery targets accept any upstream text as the message body.
    if matches!(target_type, "email_sender" | "email" | "slack_sender" | "slack")
        && !inputs.values.contains_key("body")
        && !inputs.values.contains_key("message")
    {
        'outer: for source in sources {
            for key in TEXTUAL_KEYS {
                if let Some(value) = find_field(source, key) {
                    inputs.set("body", value.clone(), InputOrigin::Extraction);
                    break 'outer;
                }
            }
        }
    }
}
