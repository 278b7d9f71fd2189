//! Organization domain model.
//!
//! An organization is the tenant root. It always owns exactly one default
//! unit, created with it and sharing its id, which anchors the unit tree and
//! holds organization-level membership.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::node::NodeAttributes;
use crate::models::unit::Unit;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    #[serde(flatten)]
    pub attributes: NodeAttributes,
    /// Current slug (the open entry of the slug history).
    pub slug: String,
    pub owner_id: Uuid,
    /// The organization's root unit. Its id equals `id` and its
    /// `is_default` flag is set.
    pub default_unit: Unit,
}

/// Fields required to create a new organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrganization {
    pub name: String,
    pub description: String,
    pub slug: String,
    pub owner_id: Uuid,
    pub metadata: Option<serde_json::Value>,
}
