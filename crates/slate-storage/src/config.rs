//! Storage configuration types.
//!
//! Loading (YAML/env wiring) belongs to the caller; this module only defines
//! the recognized options with their defaults and the storage-group domain
//! resolution used to map request domains onto physical table prefixes.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Recognized storage options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the backing database file. A leading `~` expands to the home
    /// directory; `:memory:` opens a private shared-cache in-memory database.
    #[serde(default = "default_dbname")]
    pub dbname: String,

    /// Writer connection idle timeout in milliseconds. An idle writer is
    /// recycled on the next acquire once this has elapsed.
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout: u64,

    /// Upper bound of the jittered busy-retry sleep in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,

    /// Maximum busy retries per acquire/execute.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Emit compiled SQL to the log for debugging.
    #[serde(default)]
    pub show_sql: bool,

    /// Optional mapping of domains to physical name prefixes.
    #[serde(default)]
    pub storage_groups: Vec<StorageGroup>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dbname: default_dbname(),
            pool_idle_timeout: default_pool_idle_timeout(),
            retry_delay: default_retry_delay(),
            retry_limit: default_retry_limit(),
            show_sql: false,
            storage_groups: Vec::new(),
        }
    }
}

fn default_dbname() -> String {
    "slate.db".to_owned()
}

fn default_pool_idle_timeout() -> u64 {
    10_000
}

fn default_retry_delay() -> u64 {
    100
}

fn default_retry_limit() -> u32 {
    5
}

/// One storage group: a physical name prefix shared by the listed domains.
///
/// A domain entry is a literal, the wildcard `"*"`, or a `/regex/` pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageGroup {
    pub name: String,
    #[serde(default)]
    pub domains: Vec<String>,
}

impl StorageGroup {
    fn matches(&self, domain: &str) -> bool {
        self.domains.iter().any(|entry| {
            if entry == "*" || entry == domain {
                return true;
            }
            if let Some(pattern) = entry
                .strip_prefix('/')
                .and_then(|rest| rest.strip_suffix('/'))
            {
                return match Regex::new(pattern) {
                    Ok(re) => re.is_match(domain),
                    Err(e) => {
                        warn!(pattern, error = %e, "invalid storage group pattern, skipping");
                        false
                    }
                };
            }
            false
        })
    }
}

impl StorageConfig {
    /// In-memory configuration used by tests.
    pub fn in_memory() -> Self {
        Self {
            dbname: ":memory:".to_owned(),
            ..Self::default()
        }
    }

    /// Resolves the physical name prefix for a request domain: the first
    /// matching storage group's name, otherwise the domain itself.
    pub fn resolve_group<'a>(&'a self, domain: &'a str) -> &'a str {
        self.storage_groups
            .iter()
            .find(|g| g.matches(domain))
            .map_or(domain, |g| g.name.as_str())
    }

    /// The database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        if let Some(rest) = self.dbname.strip_prefix("~/") {
            if let Ok(home) = std::env::var("HOME") {
                return PathBuf::from(home).join(rest);
            }
        }
        PathBuf::from(&self.dbname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config_with_groups() -> StorageConfig {
        StorageConfig {
            storage_groups: vec![
                StorageGroup {
                    name: "wikipedia".into(),
                    domains: vec!["/\\.wikipedia\\.org$/".into()],
                },
                StorageGroup {
                    name: "local".into(),
                    domains: vec!["localhost".into()],
                },
            ],
            ..StorageConfig::default()
        }
    }

    #[test]
    fn defaults() {
        let config: StorageConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.dbname, "slate.db");
        assert_eq!(config.pool_idle_timeout, 10_000);
        assert_eq!(config.retry_delay, 100);
        assert_eq!(config.retry_limit, 5);
        assert!(!config.show_sql);
        assert!(config.storage_groups.is_empty());
    }

    #[test]
    fn literal_and_regex_groups() {
        let config = config_with_groups();
        assert_eq!(config.resolve_group("localhost"), "local");
        assert_eq!(config.resolve_group("en.wikipedia.org"), "wikipedia");
        assert_eq!(config.resolve_group("example.com"), "example.com");
    }

    #[test]
    fn wildcard_group() {
        let config = StorageConfig {
            storage_groups: vec![StorageGroup {
                name: "all".into(),
                domains: vec!["*".into()],
            }],
            ..StorageConfig::default()
        };
        assert_eq!(config.resolve_group("anything"), "all");
    }

    #[test]
    fn tilde_expansion() {
        let config = StorageConfig {
            dbname: "~/data/slate.db".into(),
            ..StorageConfig::default()
        };
        let path = config.database_path();
        if std::env::var("HOME").is_ok() {
            assert!(path.is_absolute());
            assert!(path.ends_with("data/slate.db"));
        }
    }
}
