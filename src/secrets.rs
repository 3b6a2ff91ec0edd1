//! Credential resolution for node configurations.
//!
//! Nodes never see raw vault storage; they ask the [`SecretResolver`] on
//! their context for a logical key (`"openai_api_key"`, `"slack_token"`,
//! ...) and get back a secret string, resolved in order from:
//!
//! 1. `config["{key}_secret_id"]` — a vault reference entered in the UI,
//!    dereferenced through the external [`SecretVault`];
//! 2. `config[key]` — a literal value, a convenience for local testing;
//! 3. a process-wide default configured at engine startup (typically from
//!    the environment).
//!
//! The vault itself — storage, encryption, audit logging — is an external
//! collaborator behind the [`SecretVault`] trait.

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::utils::json_ext::non_empty_str;

/// Suffix that turns a credential field into a vault reference
/// (`foo_api_key` → `foo_api_key_secret_id`).
pub const SECRET_ID_SUFFIX: &str = "_secret_id";

/// External vault lookup, keyed by the opaque ids stored in node configs.
#[async_trait]
pub trait SecretVault: Send + Sync {
    /// Dereference a stored secret for the given user. `None` when the id
    /// is unknown or the user may not read it.
    async fn fetch(&self, user_id: Option<&str>, secret_id: &str) -> Option<String>;
}

/// The narrow interface the engine and nodes consume.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    /// Resolve `logical_key` for `user_id` against a node's config.
    async fn resolve(
        &self,
        user_id: Option<&str>,
        logical_key: &str,
        config: &FxHashMap<String, Value>,
    ) -> Option<String>;
}

/// The standard resolver: vault reference, then config literal, then
/// process-wide default.
pub struct VaultSecretResolver {
    vault: Arc<dyn SecretVault>,
    defaults: FxHashMap<String, String>,
}

impl VaultSecretResolver {
    #[must_use]
    pub fn new(vault: Arc<dyn SecretVault>) -> Self {
        Self {
            vault,
            defaults: FxHashMap::default(),
        }
    }

    /// Add process-wide fallbacks (logical key → secret), usually loaded
    /// from the environment at startup.
    #[must_use]
    pub fn with_defaults(mut self, defaults: FxHashMap<String, String>) -> Self {
        self.defaults = defaults;
        self
    }
}

#[async_trait]
impl SecretResolver for VaultSecretResolver {
    async fn resolve(
        &self,
        user_id: Option<&str>,
        logical_key: &str,
        config: &FxHashMap<String, Value>,
    ) -> Option<String> {
        let reference_key = format!("{logical_key}{SECRET_ID_SUFFIX}");
        if let Some(secret_id) = config.get(&reference_key).and_then(non_empty_str) {
            match self.vault.fetch(user_id, secret_id).await {
                Some(secret) => return Some(secret),
                None => {
                    tracing::warn!(
                        target: "nodeflow::secrets",
                        logical_key,
                        "vault reference present but secret not found"
                    );
                    // Fall through: a stale reference must not shadow a
                    // literal or default that would still work.
                }
            }
        }
        if let Some(literal) = config.get(logical_key).and_then(non_empty_str) {
            return Some(literal.to_string());
        }
        self.defaults.get(logical_key).cloned()
    }
}

/// Fixed-map resolver for tests and single-tenant embedding.
#[derive(Default, Clone)]
pub struct StaticSecrets {
    secrets: FxHashMap<String, String>,
}

impl StaticSecrets {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, logical_key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets.insert(logical_key.into(), secret.into());
        self
    }
}

#[async_trait]
impl SecretResolver for StaticSecrets {
    async fn resolve(
        &self,
        _user_id: Option<&str>,
        logical_key: &str,
        config: &FxHashMap<String, Value>,
    ) -> Option<String> {
        if let Some(literal) = config.get(logical_key).and_then(non_empty_str) {
            return Some(literal.to_string());
        }
        self.secrets.get(logical_key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::collections::new_value_map;
    use serde_json::json;

    struct FakeVault;

    #[async_trait]
    impl SecretVault for FakeVault {
        async fn fetch(&self, _user_id: Option<&str>, secret_id: &str) -> Option<String> {
            (secret_id == "sec-1").then(|| "from-vault".to_string())
        }
    }

    fn resolver() -> VaultSecretResolver {
        let mut defaults = FxHashMap::default();
        defaults.insert("openai_api_key".to_string(), "from-default".to_string());
        VaultSecretResolver::new(Arc::new(FakeVault)).with_defaults(defaults)
    }

    #[tokio::test]
    async fn vault_reference_wins_over_literal() {
        let mut config = new_value_map();
        config.insert("openai_api_key_secret_id".into(), json!("sec-1"));
        config.insert("openai_api_key".into(), json!("literal"));
        let secret = resolver()
            .resolve(Some("u1"), "openai_api_key", &config)
            .await;
        assert_eq!(secret.as_deref(), Some("from-vault"));
    }

    #[tokio::test]
    async fn stale_reference_falls_back_to_literal() {
        let mut config = new_value_map();
        config.insert("openai_api_key_secret_id".into(), json!("gone"));
        config.insert("openai_api_key".into(), json!("literal"));
        let secret = resolver().resolve(None, "openai_api_key", &config).await;
        assert_eq!(secret.as_deref(), Some("literal"));
    }

    #[tokio::test]
    async fn default_used_when_config_is_silent() {
        let config = new_value_map();
        let secret = resolver().resolve(None, "openai_api_key", &config).await;
        assert_eq!(secret.as_deref(), Some("from-default"));
        let missing = resolver().resolve(None, "other_key", &config).await;
        assert_eq!(missing, None);
    }
}
