//! Membership models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A `(unit, member)` pair. Organization-level membership is a membership
/// of the organization's default unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub unit_id: Uuid,
    pub member_id: Uuid,
    pub organization_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Member identity plus display fields from the identity collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSummary {
    pub id: Uuid,
    /// `None` when the identity collaborator no longer knows the member.
    pub email: Option<String>,
    pub display_name: Option<String>,
}
