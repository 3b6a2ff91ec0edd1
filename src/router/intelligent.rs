//! The optional LLM-assisted routing layer.
//!
//! When deterministic routing cannot settle a target's inputs — two direct
//! sources collide on a key, or required inputs are still missing — the
//! router may consult a [`RoutingAdvisor`]: one model call that sees the
//! target schema and short previews of every available source output and
//! proposes a mapping. The advisor is strictly an *enhancer*: it runs
//! behind a timeout, its failures are logged and ignored, and the
//! deterministic result stands whenever it cannot help.

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

/// A short look at one available source output field.
#[derive(Clone, Debug)]
pub struct SourcePreview {
    pub source_id: String,
    pub source_type: String,
    pub key: String,
    /// Bounded single-line preview of the value.
    pub preview: String,
}

/// Everything an advisor sees for one mapping decision.
#[derive(Clone, Debug, Default)]
pub struct AdvisorRequest {
    pub target_type: String,
    /// Declared input fields: name and one-line description.
    pub target_inputs: Vec<(String, String)>,
    pub sources: Vec<SourcePreview>,
    /// The mapping deterministic routing already decided: input name →
    /// origin tag.
    pub current_mapping: FxHashMap<String, String>,
}

/// Advisor failure modes. All of them cause a fallback to the
/// deterministic result.
#[derive(Debug, Error, Diagnostic)]
pub enum AdvisorError {
    #[error("routing advisor call failed: {0}")]
    #[diagnostic(code(nodeflow::router::advisor_failed))]
    CallFailed(String),

    #[error("routing advisor returned a malformed mapping: {0}")]
    #[diagnostic(code(nodeflow::router::advisor_malformed))]
    Malformed(String),
}

/// One LLM-assisted mapping call.
///
/// Implementations return a map from target input name to a chosen source
/// key — either a bare output key, or `"{source_id}.{key}"` to pin a
/// specific source. Keys that do not name a declared input field are
/// discarded by the router.
#[async_trait]
pub trait RoutingAdvisor: Send + Sync {
    async fn advise(&self, request: AdvisorRequest)
    -> Result<FxHashMap<String, String>, AdvisorError>;
}

/// A chosen source key, as returned by an advisor.
pub(super) enum AdvisedKey<'a> {
    /// `"{source_id}.{key}"` — a specific source's output.
    Pinned { source_id: &'a str, key: &'a str },
    /// A bare key, resolved by scanning sources in collection order.
    Bare(&'a str),
}

pub(super) fn parse_advised_key(raw: &str) -> AdvisedKey<'_> {
    match raw.split_once('.') {
        Some((source_id, key)) if !source_id.is_empty() && !key.is_empty() => AdvisedKey::Pinned {
            source_id,
            key,
        },
        _ => AdvisedKey::Bare(raw),
    }
}
