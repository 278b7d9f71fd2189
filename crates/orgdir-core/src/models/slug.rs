//! Slug history models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One binding of a slug to an organization over a time span.
///
/// Entries are append-only: once `ended_at` is set the entry never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlugHistoryEntry {
    pub id: Uuid,
    pub slug: String,
    pub organization_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// `None` while the binding is active.
    pub ended_at: Option<DateTime<Utc>>,
}

impl SlugHistoryEntry {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Availability of a slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlugStatus {
    pub slug: String,
    pub available: bool,
    pub organization_id: Option<Uuid>,
}
