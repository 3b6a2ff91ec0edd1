//! The declarative smart-merge layer: which source output fields feed
//! which target input fields, per source node type.
//!
//! The table is deliberately small and explicit — it is the contract the
//! whole platform's node library is written against. Rules for *direct*
//! sources are applied unconditionally in edge order; rules for *indirect*
//! sources only fill keys that are still missing.

use super::{InputOrigin, RoutedInputs, SourceData};
use crate::registry::NodeCategory;

/// Behavioural class of a source node for mapping purposes.
///
/// Exact type names win; the descriptor category is the fallback so
/// third-party node types inherit sensible rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceClass {
    TextInput,
    FileInput,
    Chunking,
    Embedding,
    VectorStore,
    Retrieval,
    Rerank,
    Llm,
    ContentGeneration,
    Other,
}

/// Classify a node for the mapping table.
#[must_use]
pub fn classify(node_type: &str, category: NodeCategory) -> SourceClass {
    match node_type {
        "text_input" => SourceClass::TextInput,
        "file_input" | "file_upload" => SourceClass::FileInput,
        "chunking" | "text_splitter" => SourceClass::Chunking,
        "embedding" => SourceClass::Embedding,
        "vector_store" => SourceClass::VectorStore,
        "vector_search" | "bm25_search" | "hybrid_search" => SourceClass::Retrieval,
        "rerank" | "reranker" => SourceClass::Rerank,
        "llm" | "chat" | "agent" | "multi_agent" => SourceClass::Llm,
        "blog_generator" | "proposal_generator" | "brand_voice" => SourceClass::ContentGeneration,
        _ => match category {
            NodeCategory::Input => SourceClass::TextInput,
            NodeCategory::Embedding => SourceClass::Embedding,
            NodeCategory::Retrieval => SourceClass::Retrieval,
            NodeCategory::Storage => SourceClass::VectorStore,
            NodeCategory::Agent => SourceClass::Llm,
            NodeCategory::Generation => SourceClass::ContentGeneration,
            NodeCategory::Transform | NodeCategory::Output => SourceClass::Other,
        },
    }
}

/// One mapping rule: when the source exposes `source_key`, copy its value
/// to every key in `targets`.
struct MappingRule {
    source_key: &'static str,
    targets: &'static [&'static str],
}

fn rules_for(class: SourceClass) -> &'static [MappingRule] {
    match class {
        SourceClass::TextInput => &[MappingRule {
            source_key: "text",
            targets: &["text", "topic"],
        }],
        SourceClass::FileInput => &[MappingRule {
            source_key: "text",
            targets: &["text", "file_content", "context", "content"],
        }],
        SourceClass::Chunking => &[MappingRule {
            source_key: "chunks",
            targets: &["chunks"],
        }],
        SourceClass::Embedding => &[
            MappingRule {
                source_key: "embeddings",
                targets: &["embeddings"],
            },
            // Chunks ride along so a downstream store can pair vectors
            // with their texts.
            MappingRule {
                source_key: "chunks",
                targets: &["chunks"],
            },
        ],
        SourceClass::VectorStore => &[MappingRule {
            source_key: "index_id",
            targets: &["index_id"],
        }],
        SourceClass::Retrieval => &[
            MappingRule {
                source_key: "results",
                targets: &["results"],
            },
            // The original query and the searched index ride along for
            // prompt templates and follow-up searches.
            MappingRule {
                source_key: "query",
                targets: &["query"],
            },
            MappingRule {
                source_key: "index_id",
                targets: &["index_id"],
            },
        ],
        SourceClass::Rerank => &[MappingRule {
            source_key: "results",
            targets: &["results"],
        }],
        SourceClass::Llm => &[
            MappingRule {
                source_key: "response",
                targets: &["output", "text", "body", "content", "message", "summary"],
            },
            MappingRule {
                source_key: "output",
                targets: &["output", "text", "body", "content", "message", "summary"],
            },
        ],
        SourceClass::ContentGeneration => &[MappingRule {
            source_key: "output",
            targets: &["body", "email_body", "message", "text"],
        }],
        SourceClass::Other => &[],
    }
}

/// Apply the mapping table for one source.
///
/// Direct sources write unconditionally; keys proposed by more than one
/// direct source are reported through `conflicts` so the caller can decide
/// whether intelligent routing should arbitrate. Indirect sources never
/// overwrite an existing key.
pub(super) fn apply_source(
    inputs: &mut RoutedInputs,
    source: &SourceData,
    conflicts: &mut Vec<String>,
) {
    let class = classify(&source.node_type, source.category);
    // For Llm sources `response` is preferred over `output`; only the
    // first source key that is actually present fires.
    let mut fired_llm_rule = false;
    for rule in rules_for(class) {
        if class == SourceClass::Llm && fired_llm_rule {
            break;
        }
        let Some(value) = source.outputs.get(rule.source_key) else {
            continue;
        };
        if class == SourceClass::Llm {
            fired_llm_rule = true;
        }
        for &target_key in rule.targets {
            if source.is_direct {
                if inputs.origin(target_key) == Some(InputOrigin::Direct)
                    && !conflicts.contains(&target_key.to_string())
                {
                    conflicts.push(target_key.to_string());
                }
                inputs.set(target_key, value.clone(), InputOrigin::Direct);
            } else {
                inputs.set_if_missing(target_key, value.clone(), InputOrigin::Indirect);
            }
        }
    }
}
