//! Configuration loading.
//!
//! Recognized keys are merged from `/etc/authservicesapi.conf` (JSON) over
//! compiled-in defaults. Merge is a recursive [`serde_json::Value`] merge:
//! object keys recurse into nested objects, any other value (scalar or
//! array) is replaced wholesale by the override.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CassandraConfig {
    pub cluster: String,
    pub nodes: Vec<String>,
    pub port: String,
    pub auth_keyspace: String,
}

impl Default for CassandraConfig {
    fn default() -> Self {
        Self {
            cluster: "AuthServices".to_string(),
            nodes: vec!["127.0.0.1".to_string()],
            port: "9042".to_string(),
            auth_keyspace: "authdb".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultOrgConfig {
    pub name: String,
    pub defaultadminuser: String,
    pub defaultadminpass: String,
    pub defaultadminemail: String,
}

impl Default for DefaultOrgConfig {
    fn default() -> Self {
        Self {
            name: "example.net".to_string(),
            defaultadminuser: "admin".to_string(),
            defaultadminpass: "admin".to_string(),
            defaultadminemail: "admin@example.net".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub cassandra: CassandraConfig,
    pub defaultorg: DefaultOrgConfig,
}

impl Config {
    /// The well-known system config path, as read by the original
    /// `authservicesapi.conf` loader.
    pub const SYSTEM_CONFIG_PATH: &'static str = "/etc/authservicesapi.conf";

    /// Load config from `path`, merged over defaults. If `path` does not
    /// exist, returns the compiled-in defaults unmodified.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let defaults = serde_json::to_value(Config::default())?;

        let merged = if path.exists() {
            debug!(?path, "loading config file");
            let content = std::fs::read_to_string(path)?;
            let overrides: Value = serde_json::from_str(&content)?;
            merge(defaults, overrides)
        } else {
            debug!(?path, "config file not found, using defaults");
            defaults
        };

        Ok(serde_json::from_value(merged)?)
    }

    /// Load from [`Self::SYSTEM_CONFIG_PATH`].
    pub fn load() -> Result<Self> {
        Self::load_from_path(Path::new(Self::SYSTEM_CONFIG_PATH))
    }
}

/// Recursively merge `overrides` onto `base`. Object keys recurse; any
/// other value in `overrides` replaces the corresponding value in `base`
/// wholesale.
pub fn merge(base: Value, overrides: Value) -> Value {
    match (base, overrides) {
        (Value::Object(mut base_map), Value::Object(override_map)) => {
            for (key, override_val) in override_map {
                let merged = match base_map.remove(&key) {
                    Some(base_val) => merge(base_val, override_val),
                    None => override_val,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overrides) => overrides,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_original_settings() {
        let cfg = Config::default();
        assert_eq!(cfg.cassandra.auth_keyspace, "authdb");
        assert_eq!(cfg.defaultorg.name, "example.net");
    }

    #[test]
    fn missing_file_returns_defaults() {
        let cfg = Config::load_from_path(Path::new("/nonexistent/authservicesapi.conf")).unwrap();
        assert_eq!(cfg.cassandra.cluster, "AuthServices");
    }

    #[test]
    fn merge_overwrites_scalar() {
        let base = json!({"a": 1, "b": {"c": 2, "d": 3}});
        let overrides = json!({"a": 9});
        let merged = merge(base, overrides);
        assert_eq!(merged["a"], 9);
        assert_eq!(merged["b"]["c"], 2);
    }

    #[test]
    fn merge_recurses_into_nested_object() {
        let base = json!({"b": {"c": 2, "d": 3}});
        let overrides = json!({"b": {"c": 99}});
        let merged = merge(base, overrides);
        assert_eq!(merged["b"]["c"], 99);
        assert_eq!(merged["b"]["d"], 3);
    }

    #[test]
    fn merge_replaces_array_wholesale() {
        let base = json!({"nodes": ["a", "b"]});
        let overrides = json!({"nodes": ["c"]});
        let merged = merge(base, overrides);
        assert_eq!(merged["nodes"], json!(["c"]));
    }

    #[test]
    fn merge_is_idempotent() {
        let base = json!({"a": 1, "b": {"c": 2}});
        let overrides = json!({"b": {"c": 99}});
        let once = merge(base.clone(), overrides.clone());
        let twice = merge(once.clone(), overrides);
        assert_eq!(once, twice);
    }

    #[test]
    fn file_overrides_merge_depth_one_and_deeper() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authservicesapi.conf");
        std::fs::write(
            &path,
            r#"{"cassandra": {"auth_keyspace": "custom_ks"}, "defaultorg": {"name": "acme.test"}}"#,
        )
        .unwrap();

        let cfg = Config::load_from_path(&path).unwrap();
        assert_eq!(cfg.cassandra.auth_keyspace, "custom_ks");
        assert_eq!(cfg.cassandra.cluster, "AuthServices");
        assert_eq!(cfg.defaultorg.name, "acme.test");
        assert_eq!(cfg.defaultorg.defaultadminuser, "admin");
    }
}
