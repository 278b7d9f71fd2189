//! Tenant storage binding model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DirectoryError;

/// Storage-access mode bound to a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageStrategy {
    /// Tenant data lives in the shared pool.
    Shared,
    /// Tenant data lives behind a dedicated connection. Recognized but not
    /// executable.
    Isolated,
}

impl StorageStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Isolated => "isolated",
        }
    }
}

impl fmt::Display for StorageStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageStrategy {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shared" => Ok(Self::Shared),
            "isolated" => Ok(Self::Isolated),
            other => Err(DirectoryError::UnsupportedConfiguration {
                reason: format!("unknown storage strategy: {other}"),
            }),
        }
    }
}

/// Persisted per-organization storage binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantBinding {
    pub organization_id: Uuid,
    pub strategy: StorageStrategy,
    /// Pool name for `shared`, connection string for `isolated`.
    pub connection: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
