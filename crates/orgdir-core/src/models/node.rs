//! Attributes and tagging shared by organizations and units.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DirectoryError;
use crate::models::organization::Organization;
use crate::models::unit::Unit;

/// Descriptive attributes carried by every node of the directory tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAttributes {
    pub name: String,
    pub description: String,
    /// Free-form metadata. Stored and returned as-is, never interpreted.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Type tag used by lookups that accept either kind of node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Organization,
    Unit,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Unit => "unit",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "organization" | "org" => Ok(Self::Organization),
            "unit" => Ok(Self::Unit),
            other => Err(DirectoryError::validation(format!(
                "unknown node type: {other}"
            ))),
        }
    }
}

/// Result of a type-tagged lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DirectoryNode {
    Organization(Organization),
    Unit(Unit),
}

impl DirectoryNode {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Organization(org) => org.id,
            Self::Unit(unit) => unit.id,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Organization(_) => NodeKind::Organization,
            Self::Unit(_) => NodeKind::Unit,
        }
    }

    pub fn attributes(&self) -> &NodeAttributes {
        match self {
            Self::Organization(org) => &org.attributes,
            Self::Unit(unit) => &unit.attributes,
        }
    }
}

/// Partial update for an organization or unit.
///
/// `None` leaves a field untouched; `Some(String::new())` clears it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateNode {
    pub name: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl UpdateNode {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.metadata.is_none()
    }
}
