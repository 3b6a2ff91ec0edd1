//! Shared helpers used across the engine.

pub mod json_ext;

/// Collection constructors for the map types used throughout the engine.
pub mod collections {
    use rustc_hash::FxHashMap;
    use serde_json::Value;

    /// Create an empty JSON value map with the engine's standard hasher.
    #[must_use]
    pub fn new_value_map() -> FxHashMap<String, Value> {
        FxHashMap::default()
    }
}
