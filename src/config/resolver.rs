//! Runtime config resolution.
//!
//! Merges organization-scoped configuration entries over global ones,
//! transparently dereferencing secret-reference values (`secret://name`)
//! against a vault, and coerces values to the type the caller asks for.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{OrchestraError, Result};
use crate::store::StoreError;

/// Prefix marking a config value as a secret reference.
const SECRET_PREFIX: &str = "secret://";

/// Raw config entry lookup, implemented by the surrounding application.
#[async_trait]
pub trait ConfigEntrySource: Send + Sync {
    /// Entry for `key` in `scope` (`None` = global), or `None` when absent.
    async fn entry(
        &self,
        scope: Option<&str>,
        key: &str,
    ) -> std::result::Result<Option<serde_json::Value>, StoreError>;
}

/// Secret vault lookup.
#[async_trait]
pub trait SecretVault: Send + Sync {
    async fn secret(&self, name: &str) -> std::result::Result<Option<String>, StoreError>;
}

/// A resolved config value with typed coercion.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValue(serde_json::Value);

impl ConfigValue {
    pub fn as_str(&self) -> Option<String> {
        match &self.0 {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match &self.0 {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.0 {
            serde_json::Value::Bool(b) => Some(*b),
            serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" => Some(false),
                _ => None,
            },
            serde_json::Value::Number(n) => n.as_i64().map(|v| v != 0),
            _ => None,
        }
    }

    /// The raw JSON value; strings holding JSON documents are parsed.
    pub fn as_json(&self) -> serde_json::Value {
        if let serde_json::Value::String(s) = &self.0 {
            if let Ok(parsed) = serde_json::from_str(s) {
                return parsed;
            }
        }
        self.0.clone()
    }
}

pub struct ConfigResolver {
    source: Arc<dyn ConfigEntrySource>,
    vault: Arc<dyn SecretVault>,
}

impl ConfigResolver {
    pub fn new(source: Arc<dyn ConfigEntrySource>, vault: Arc<dyn SecretVault>) -> Self {
        Self { source, vault }
    }

    /// Resolve `key` for a scope: the organization entry wins over the
    /// global one. Missing keys are `None`, never errors. Vault failures
    /// surface as errors only for secret-typed entries.
    pub async fn resolve(&self, scope: Option<&str>, key: &str) -> Result<Option<ConfigValue>> {
        let mut value = None;
        if let Some(org) = scope {
            value = self.source.entry(Some(org), key).await?;
        }
        if value.is_none() {
            value = self.source.entry(None, key).await?;
        }

        match value {
            Some(raw) => Ok(Some(self.dereference(raw).await?)),
            None => Ok(None),
        }
    }

    async fn dereference(&self, value: serde_json::Value) -> Result<ConfigValue> {
        if let serde_json::Value::String(s) = &value {
            if let Some(name) = s.strip_prefix(SECRET_PREFIX) {
                let secret = self.vault.secret(name).await?.ok_or_else(|| {
                    OrchestraError::Configuration(format!("secret not found: {name}"))
                })?;
                return Ok(ConfigValue(serde_json::Value::String(secret)));
            }
        }
        Ok(ConfigValue(value))
    }
}
