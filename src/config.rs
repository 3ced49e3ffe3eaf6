//! Typed configuration collaborator.
//!
//! Integrations read their settings through [`ConfigSource`] so tests can
//! substitute an in-memory map and no module reaches for a global.

use std::collections::HashMap;

/// Typed getters over a string-keyed config backend. Integer, boolean,
/// and list values are parsed from their string forms; parse failures
/// read as absent.
pub trait ConfigSource: Send + Sync {
    fn get_str(&self, key: &str) -> Option<String>;

    fn get_int(&self, key: &str) -> Option<i64> {
        self.get_str(key)?.trim().parse().ok()
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get_str(key)?.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        }
    }

    /// Comma-separated list; entries are trimmed, empty entries dropped.
    fn get_list(&self, key: &str) -> Option<Vec<String>> {
        let raw = self.get_str(key)?;
        Some(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    fn get_str_or(&self, key: &str, default: &str) -> String {
        self.get_str(key).unwrap_or_else(|| default.to_string())
    }

    fn get_int_or(&self, key: &str, default: i64) -> i64 {
        self.get_int(key).unwrap_or(default)
    }

    fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }
}

/// Reads from process environment variables. Keys are upper-cased with
/// dots mapped to underscores, optionally under a prefix:
/// `cache.ttl_secs` with prefix `MD` reads `MD_CACHE_TTL_SECS`.
pub struct EnvConfig {
    prefix: Option<String>,
}

impl EnvConfig {
    pub fn new() -> Self {
        Self { prefix: None }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn var_name(&self, key: &str) -> String {
        let key = key.replace('.', "_").to_ascii_uppercase();
        match &self.prefix {
            Some(prefix) => format!("{prefix}_{key}"),
            None => key,
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigSource for EnvConfig {
    fn get_str(&self, key: &str) -> Option<String> {
        std::env::var(self.var_name(key)).ok()
    }
}

/// In-memory config, primarily for tests and embedding.
#[derive(Default)]
pub struct MapConfig {
    values: HashMap<String, String>,
}

impl MapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl ConfigSource for MapConfig {
    fn get_str(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}
