//! Directory service configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use orgdir_core::error::{DirectoryError, DirectoryResult};

/// Configuration shared by the directory services.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Deadline applied to every service operation (default: 5 seconds).
    pub operation_timeout: Duration,
    /// Shortest accepted slug (default: 2).
    pub slug_min_length: usize,
    /// Longest accepted slug (default: 63, one DNS label).
    pub slug_max_length: usize,
    /// Bound on ancestor walks and subtree traversal (default: 64).
    pub max_hierarchy_depth: usize,
    /// Connection descriptor written into the tenant binding of every new
    /// organization (default: `primary`).
    pub default_connection: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(5),
            slug_min_length: 2,
            slug_max_length: 63,
            max_hierarchy_depth: 64,
            default_connection: "primary".into(),
        }
    }
}

impl DirectoryConfig {
    /// Reads `ORGDIR_*` variables, falling back to defaults for any that are
    /// unset:
    ///
    /// | variable | field |
    /// |---|---|
    /// | `ORGDIR_OPERATION_TIMEOUT_MS` | `operation_timeout` |
    /// | `ORGDIR_SLUG_MIN_LENGTH` | `slug_min_length` |
    /// | `ORGDIR_SLUG_MAX_LENGTH` | `slug_max_length` |
    /// | `ORGDIR_MAX_HIERARCHY_DEPTH` | `max_hierarchy_depth` |
    /// | `ORGDIR_DEFAULT_CONNECTION` | `default_connection` |
    pub fn from_env() -> DirectoryResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DirectoryResult<Self> {
        let defaults = Self::default();

        let config = Self {
            operation_timeout: parse_var(&lookup, "ORGDIR_OPERATION_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.operation_timeout),
            slug_min_length: parse_var(&lookup, "ORGDIR_SLUG_MIN_LENGTH")?
                .unwrap_or(defaults.slug_min_length),
            slug_max_length: parse_var(&lookup, "ORGDIR_SLUG_MAX_LENGTH")?
                .unwrap_or(defaults.slug_max_length),
            max_hierarchy_depth: parse_var(&lookup, "ORGDIR_MAX_HIERARCHY_DEPTH")?
                .unwrap_or(defaults.max_hierarchy_depth),
            default_connection: lookup("ORGDIR_DEFAULT_CONNECTION")
                .unwrap_or(defaults.default_connection),
        };

        if config.slug_min_length == 0 || config.slug_min_length > config.slug_max_length {
            return Err(DirectoryError::UnsupportedConfiguration {
                reason: format!(
                    "slug length bounds {}..={} are empty",
                    config.slug_min_length, config.slug_max_length
                ),
            });
        }
        if config.operation_timeout.is_zero() {
            return Err(DirectoryError::UnsupportedConfiguration {
                reason: "operation timeout must be positive".into(),
            });
        }

        Ok(config)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> DirectoryResult<Option<T>> {
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| DirectoryError::UnsupportedConfiguration {
                    reason: format!("{key} has an invalid value: {raw}"),
                })
        })
        .transpose()
}
