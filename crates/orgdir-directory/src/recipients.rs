//! Flattened, deduplicated audiences for broadcast features.

use std::collections::{HashMap, HashSet};

use orgdir_core::error::{DirectoryError, DirectoryResult};
use orgdir_core::repository::{MembershipRepository, UnitRepository};
use tracing::debug;
use uuid::Uuid;

use crate::config::DirectoryConfig;
use crate::deadline::bounded;

/// Computes recipient sets from organization and unit ids. Pure read, never
/// cached.
#[derive(Clone)]
pub struct RecipientResolver<U: UnitRepository, M: MembershipRepository> {
    units: U,
    memberships: M,
    config: DirectoryConfig,
}

impl<U: UnitRepository, M: MembershipRepository> RecipientResolver<U, M> {
    pub fn new(units: U, memberships: M, config: DirectoryConfig) -> Self {
        Self {
            units,
            memberships,
            config,
        }
    }

    /// Members of each organization's default unit followed by members of
    /// each listed unit, deduplicated in first-seen order.
    ///
    /// An id that does not resolve fails the whole call.
    pub async fn get_recipients(
        &self,
        organization_ids: &[Uuid],
        unit_ids: &[Uuid],
    ) -> DirectoryResult<Vec<Uuid>> {
        if organization_ids.is_empty() && unit_ids.is_empty() {
            return Ok(Vec::new());
        }

        bounded(self.config.operation_timeout, "get_recipients", async {
            let sources: Vec<Uuid> = organization_ids
                .iter()
                .chain(unit_ids)
                .copied()
                .collect();

            let found: HashMap<Uuid, bool> = self
                .units
                .find_many(&sources)
                .await?
                .into_iter()
                .map(|unit| (unit.id, unit.is_default))
                .collect();

            for id in organization_ids {
                if found.get(id) != Some(&true) {
                    return Err(DirectoryError::not_found("organization", id));
                }
            }
            for id in unit_ids {
                if !found.contains_key(id) {
                    return Err(DirectoryError::not_found("unit", id));
                }
            }

            let members = self.memberships.list_for_units(&sources).await?;
            let recipients = dedup_in_order(
                sources
                    .iter()
                    .map(|id| members.get(id).map(Vec::as_slice).unwrap_or_default()),
            );

            debug!(
                organizations = organization_ids.len(),
                units = unit_ids.len(),
                recipients = recipients.len(),
                "Recipients resolved"
            );
            Ok(recipients)
        })
        .await
    }
}

/// Concatenates the groups, keeping the first occurrence of each id.
fn dedup_in_order<'a>(groups: impl IntoIterator<Item = &'a [Uuid]>) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    groups
        .into_iter()
        .flatten()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect()
}
