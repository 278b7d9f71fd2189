//! Member management at organization and unit granularity.

use std::collections::HashMap;

use orgdir_core::error::{DirectoryError, DirectoryResult};
use orgdir_core::models::membership::{MemberSummary, MembershipRecord};
use orgdir_core::models::node::NodeKind;
use orgdir_core::models::unit::Unit;
use orgdir_core::repository::{MemberDirectory, MembershipRepository, UnitRepository};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::DirectoryConfig;
use crate::deadline::bounded;
use crate::validation::validate_identifier;

/// Membership service.
///
/// Adding a member to a non-default unit also adds them to the owning
/// organization (one level, unit to organization). Removal does not undo
/// that propagation: organization membership is sticky.
#[derive(Clone)]
pub struct MembershipResolver<U: UnitRepository, M: MembershipRepository, D: MemberDirectory> {
    units: U,
    memberships: M,
    members: D,
    config: DirectoryConfig,
}

impl<U, M, D> MembershipResolver<U, M, D>
where
    U: UnitRepository,
    M: MembershipRepository,
    D: MemberDirectory,
{
    pub fn new(units: U, memberships: M, members: D, config: DirectoryConfig) -> Self {
        Self {
            units,
            memberships,
            members,
            config,
        }
    }

    /// Resolves `identifier` through the identity collaborator and upserts
    /// the membership. Re-adding an existing member returns the existing
    /// record.
    pub async fn add_member(
        &self,
        kind: NodeKind,
        unit_id: Uuid,
        identifier: &str,
    ) -> DirectoryResult<MembershipRecord> {
        validate_identifier(identifier)?;

        bounded(self.config.operation_timeout, "add_member", async {
            let unit = self.target_unit(kind, unit_id).await?;
            let member = self.members.resolve(identifier).await?;

            let also_into = (!unit.is_default).then_some(unit.organization_id);
            self.memberships.add(&unit, member.id, also_into).await
        })
        .await
    }

    /// Members of a unit with display fields, oldest membership first.
    pub async fn list_members(&self, unit_id: Uuid) -> DirectoryResult<Vec<MemberSummary>> {
        bounded(self.config.operation_timeout, "list_members", async {
            let records = self.memberships.list_for_unit(unit_id).await?;
            if records.is_empty() {
                return Ok(Vec::new());
            }

            let ids: Vec<Uuid> = records.iter().map(|r| r.member_id).collect();
            let mut known: HashMap<Uuid, _> = self
                .members
                .get_many(&ids)
                .await?
                .into_iter()
                .map(|m| (m.id, m))
                .collect();

            Ok(ids
                .into_iter()
                .map(|id| match known.remove(&id) {
                    Some(member) => MemberSummary {
                        id,
                        email: Some(member.email),
                        display_name: Some(member.display_name),
                    },
                    None => {
                        warn!(unit_id = %unit_id, member_id = %id, "Member unknown to identity directory");
                        MemberSummary {
                            id,
                            email: None,
                            display_name: None,
                        }
                    }
                })
                .collect())
        })
        .await
    }

    /// Member ids per unit in one batched lookup. A unit with no members has
    /// no key in the result.
    pub async fn list_members_for_units(
        &self,
        unit_ids: &[Uuid],
    ) -> DirectoryResult<HashMap<Uuid, Vec<Uuid>>> {
        bounded(
            self.config.operation_timeout,
            "list_members_for_units",
            self.memberships.list_for_units(unit_ids),
        )
        .await
    }

    /// Idempotent. Does not touch the organization-level membership a
    /// unit-level add propagated.
    ///
    /// Under the `Organization` tag the id must name an organization: a
    /// non-default unit id is `NotFound` and nothing is removed.
    pub async fn remove_member(
        &self,
        kind: NodeKind,
        unit_id: Uuid,
        member_id: Uuid,
    ) -> DirectoryResult<()> {
        bounded(self.config.operation_timeout, "remove_member", async {
            if kind == NodeKind::Organization {
                match self.units.get_by_id(unit_id).await {
                    Ok(unit) if !unit.is_default => {
                        return Err(DirectoryError::not_found("organization", unit_id));
                    }
                    // An id that names no unit holds no memberships.
                    Ok(_) | Err(DirectoryError::NotFound { .. }) => {}
                    Err(err) => return Err(err),
                }
            }
            self.memberships.remove(unit_id, member_id).await?;
            debug!(kind = %kind, unit_id = %unit_id, member_id = %member_id, "Member removed");
            Ok(())
        })
        .await
    }

    /// Ids of the units `member_id` belongs to.
    pub async fn memberships_of(&self, member_id: Uuid) -> DirectoryResult<Vec<Uuid>> {
        let records = bounded(
            self.config.operation_timeout,
            "memberships_of",
            self.memberships.list_for_member(member_id),
        )
        .await?;
        Ok(records.into_iter().map(|r| r.unit_id).collect())
    }

    async fn target_unit(&self, kind: NodeKind, id: Uuid) -> DirectoryResult<Unit> {
        let unit = self.units.get_by_id(id).await.map_err(|err| match err {
            DirectoryError::NotFound { .. } => DirectoryError::not_found(kind.as_str(), id),
            other => other,
        })?;
        if kind == NodeKind::Organization && !unit.is_default {
            return Err(DirectoryError::not_found("organization", id));
        }
        Ok(unit)
    }
}
