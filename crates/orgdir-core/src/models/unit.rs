//! Unit domain model.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::node::NodeAttributes;

/// A node in an organization's internal hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub id: Uuid,
    /// Owning organization. Fixed at creation.
    pub organization_id: Uuid,
    #[serde(flatten)]
    pub attributes: NodeAttributes,
    /// Set only on the organization's default unit, which can never be
    /// deleted, moved or detached.
    pub is_default: bool,
    pub placement: UnitPlacement,
}

impl Unit {
    pub fn parent_id(&self) -> Option<Uuid> {
        match self.placement {
            UnitPlacement::Attached { parent_id } => Some(parent_id),
            UnitPlacement::Root | UnitPlacement::Detached => None,
        }
    }
}

/// Where a unit currently sits in the tree, derived from its parent edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UnitPlacement {
    /// The default unit: has the absent-parent edge marker.
    Root,
    /// Has a parent edge.
    Attached { parent_id: Uuid },
    /// No edge. Extant but unreachable from the root; its descendants keep
    /// their own edges and form an orphaned sub-forest.
    Detached,
}

/// Fields required to create a unit under an existing parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUnit {
    pub parent_id: Uuid,
    pub name: String,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
}
