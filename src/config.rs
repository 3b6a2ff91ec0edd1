//! Engine configuration with environment fallbacks.

use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::router::DEFAULT_ADVISOR_TIMEOUT;

/// Prefix for process-wide default secrets in the environment:
/// `NODEFLOW_SECRET_OPENAI_API_KEY` becomes logical key `openai_api_key`.
const SECRET_ENV_PREFIX: &str = "NODEFLOW_SECRET_";

/// Tunables applied to every execution the engine starts.
///
/// Construct with [`Default`] for code-configured embedding, or with
/// [`from_env`](Self::from_env) to honour `NODEFLOW_*` environment
/// variables (a `.env` file is loaded first when present).
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Worker pool width override; `None` leaves the scheduler default of
    /// `min(8, node count)`.
    pub max_concurrency: Option<usize>,
    /// Per-subscriber event buffer capacity.
    pub event_buffer_capacity: usize,
    /// Bounded trace write queue length.
    pub trace_queue_capacity: usize,
    /// Wall-clock bound on one intelligent-routing advisor call.
    pub advisor_timeout: Duration,
    /// Process-wide default secrets, logical key → value.
    pub default_secrets: FxHashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            event_buffer_capacity: 1024,
            trace_queue_capacity: 4096,
            advisor_timeout: DEFAULT_ADVISOR_TIMEOUT,
            default_secrets: FxHashMap::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment.
    ///
    /// Recognised variables: `NODEFLOW_MAX_CONCURRENCY`,
    /// `NODEFLOW_EVENT_BUFFER`, `NODEFLOW_TRACE_QUEUE`,
    /// `NODEFLOW_ADVISOR_TIMEOUT_MS`, and `NODEFLOW_SECRET_<KEY>` for
    /// default credentials.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        if let Some(n) = read_env("NODEFLOW_MAX_CONCURRENCY") {
            config.max_concurrency = Some(n);
        }
        if let Some(n) = read_env("NODEFLOW_EVENT_BUFFER") {
            config.event_buffer_capacity = n;
        }
        if let Some(n) = read_env("NODEFLOW_TRACE_QUEUE") {
            config.trace_queue_capacity = n;
        }
        if let Some(ms) = read_env::<u64>("NODEFLOW_ADVISOR_TIMEOUT_MS") {
            config.advisor_timeout = Duration::from_millis(ms);
        }
        for (key, value) in std::env::vars() {
            if let Some(logical) = key.strip_prefix(SECRET_ENV_PREFIX) {
                config
                    .default_secrets
                    .insert(logical.to_lowercase(), value);
            }
        }
        config
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(
                target: "nodeflow::config",
                name,
                raw,
                "ignoring unparseable environment variable"
            );
            None
        }
    }
}
