//! Organization and unit hierarchy.
//!
//! Every organization owns a default unit with the same id, created in the
//! same transaction. Other units hang off it through parent edges; a unit
//! whose edge is removed is detached but kept, and so is everything below
//! it.

use std::collections::{HashSet, VecDeque};

use orgdir_core::error::{DirectoryError, DirectoryResult};
use orgdir_core::models::node::{DirectoryNode, NodeKind, UpdateNode};
use orgdir_core::models::organization::{CreateOrganization, Organization};
use orgdir_core::models::tenant::StorageStrategy;
use orgdir_core::models::unit::{CreateUnit, Unit, UnitPlacement};
use orgdir_core::repository::{
    OrganizationRepository, PaginatedResult, Pagination, TenantBindingInput, UnitRepository,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DirectoryConfig;
use crate::deadline::bounded;
use crate::validation::{validate_name, validate_slug};

/// Attempts for a structural write that keeps losing races to other writes
/// on the same organization.
const MAX_WRITE_ATTEMPTS: usize = 5;

/// Hierarchy service.
///
/// Generic over repository implementations so that the service layer has
/// no dependency on the database crate.
#[derive(Clone)]
pub struct HierarchyStore<O: OrganizationRepository, U: UnitRepository> {
    orgs: O,
    units: U,
    config: DirectoryConfig,
}

impl<O: OrganizationRepository, U: UnitRepository> HierarchyStore<O, U> {
    pub fn new(orgs: O, units: U, config: DirectoryConfig) -> Self {
        Self {
            orgs,
            units,
            config,
        }
    }

    /// Creates the organization, its shared tenant binding, its default unit
    /// and root edge marker, and its first slug binding as one unit of work.
    pub async fn create_organization(
        &self,
        input: CreateOrganization,
    ) -> DirectoryResult<Organization> {
        validate_name(&input.name)?;
        validate_slug(&input.slug, &self.config)?;

        let binding = TenantBindingInput {
            strategy: StorageStrategy::Shared,
            connection: self.config.default_connection.clone(),
        };
        bounded(
            self.config.operation_timeout,
            "create_organization",
            self.orgs.create(input, binding),
        )
        .await
    }

    /// Creates a unit under `input.parent_id`, in the parent's organization.
    ///
    /// The new unit may not sit deeper than `max_hierarchy_depth` below the
    /// top of its tree.
    pub async fn create_unit(&self, input: CreateUnit) -> DirectoryResult<Unit> {
        validate_name(&input.name)?;
        bounded(self.config.operation_timeout, "create_unit", async {
            let input = &input;
            self.retry_on_race("create_unit", || async move {
                let parent = self.parent_unit(input.parent_id).await?;
                let revision = self.units.revision(parent.organization_id).await?;

                let depth = self.ancestor_chain(&parent).await?.len() + 1;
                if depth > self.config.max_hierarchy_depth {
                    return Err(self.too_deep(parent.id));
                }

                self.units.create(&parent, input.clone(), revision).await
            })
            .await
        })
        .await
    }

    /// Kind-checked lookup. An id that exists under the other kind is
    /// `NotFound`, except that an organization id looked up as a unit yields
    /// the organization's default unit.
    ///
    /// The default unit is a unit in its own right (it has members, children
    /// and a root edge), so the `Unit` tag matches it. The reverse does not
    /// hold: a non-default unit id under the `Organization` tag is `NotFound`.
    pub async fn get_by_id(&self, id: Uuid, kind: NodeKind) -> DirectoryResult<DirectoryNode> {
        bounded(self.config.operation_timeout, "get_node", async {
            let node = match kind {
                NodeKind::Organization => DirectoryNode::Organization(self.orgs.get_by_id(id).await?),
                NodeKind::Unit => DirectoryNode::Unit(self.units.get_by_id(id).await?),
            };
            debug!(id = %id, kind = %kind, "Node fetched");
            Ok(node)
        })
        .await
    }

    /// Direct children of `parent_id`, oldest first.
    pub async fn list_children(&self, parent_id: Uuid) -> DirectoryResult<Vec<Unit>> {
        bounded(
            self.config.operation_timeout,
            "list_children",
            self.units.list_children(parent_id),
        )
        .await
    }

    pub async fn list_child_ids(&self, parent_id: Uuid) -> DirectoryResult<Vec<Uuid>> {
        bounded(
            self.config.operation_timeout,
            "list_child_ids",
            self.units.list_child_ids(parent_id),
        )
        .await
    }

    /// Partial update. Organization and default-unit attributes stay in
    /// step whichever of the two is updated.
    pub async fn update(
        &self,
        id: Uuid,
        kind: NodeKind,
        input: UpdateNode,
    ) -> DirectoryResult<DirectoryNode> {
        if let Some(name) = &input.name {
            validate_name(name)?;
        }
        if input.is_empty() {
            return self.get_by_id(id, kind).await;
        }

        bounded(self.config.operation_timeout, "update_node", async {
            Ok(match kind {
                NodeKind::Organization => {
                    DirectoryNode::Organization(self.orgs.update(id, input).await?)
                }
                NodeKind::Unit => DirectoryNode::Unit(self.units.update(id, input).await?),
            })
        })
        .await
    }

    /// Replaces the unit's parent edge, or detaches the unit when
    /// `new_parent` is `None`.
    ///
    /// The default unit never moves. A unit cannot be attached under a unit
    /// of another organization, under itself, or under one of its own
    /// descendants, and the moved subtree must stay within
    /// `max_hierarchy_depth`. The checks are re-run when a concurrent write
    /// to the same organization lands first.
    pub async fn reparent(&self, unit_id: Uuid, new_parent: Option<Uuid>) -> DirectoryResult<Unit> {
        bounded(self.config.operation_timeout, "reparent", async {
            self.retry_on_race("reparent", || async move {
                let unit = self.units.get_by_id(unit_id).await?;
                if unit.is_default {
                    return Err(DirectoryError::invariant(format!(
                        "default unit {unit_id} cannot be moved or detached"
                    )));
                }
                let revision = self.units.revision(unit.organization_id).await?;

                if let Some(parent_id) = new_parent {
                    let parent = self.parent_unit(parent_id).await?;
                    if parent.organization_id != unit.organization_id {
                        return Err(DirectoryError::invariant(format!(
                            "unit {unit_id} belongs to organization {} and cannot be attached \
                             under a unit of organization {}",
                            unit.organization_id, parent.organization_id
                        )));
                    }

                    let chain = self.ancestor_chain(&parent).await?;
                    if parent_id == unit_id || chain.iter().any(|ancestor| ancestor.id == unit_id) {
                        return Err(DirectoryError::invariant(format!(
                            "attaching unit {unit_id} under {parent_id} would create a cycle"
                        )));
                    }

                    let height = self.subtree_walk(unit_id).await?.last().map_or(0, |(_, d)| *d);
                    if chain.len() + 1 + height > self.config.max_hierarchy_depth {
                        return Err(self.too_deep(unit_id));
                    }
                }

                let moved = self.units.set_parent(&unit, new_parent, revision).await?;
                info!(
                    unit_id = %unit_id,
                    from = ?unit.parent_id(),
                    to = ?new_parent,
                    "Unit reparented"
                );
                Ok(moved)
            })
            .await
        })
        .await
    }

    /// Deletes a unit or an organization.
    ///
    /// Deleting the default unit is an invariant violation. Deleting a unit
    /// detaches its children and drops its memberships; deleting an
    /// organization removes everything it owns and releases its slug.
    pub async fn delete(&self, id: Uuid, kind: NodeKind) -> DirectoryResult<()> {
        bounded(self.config.operation_timeout, "delete_node", async {
            match kind {
                NodeKind::Unit => {
                    let unit = self.units.get_by_id(id).await?;
                    if unit.is_default || unit.id == unit.organization_id {
                        return Err(DirectoryError::invariant(format!(
                            "unit {id} is the default unit of organization {} and cannot be deleted",
                            unit.organization_id
                        )));
                    }
                    self.units.delete(id).await
                }
                NodeKind::Organization => self.orgs.delete(id).await,
            }
        })
        .await
    }

    pub async fn placement(&self, unit_id: Uuid) -> DirectoryResult<UnitPlacement> {
        let unit = bounded(
            self.config.operation_timeout,
            "placement",
            self.units.get_by_id(unit_id),
        )
        .await?;
        Ok(unit.placement)
    }

    /// Parent chain of a unit, nearest first. Ends at the default unit, or
    /// at the top of a detached sub-forest.
    pub async fn ancestors(&self, unit_id: Uuid) -> DirectoryResult<Vec<Unit>> {
        bounded(self.config.operation_timeout, "ancestors", async {
            let unit = self.units.get_by_id(unit_id).await?;
            self.ancestor_chain(&unit).await
        })
        .await
    }

    /// Whether the unit's chain terminates at its organization's default
    /// unit.
    pub async fn is_reachable(&self, unit_id: Uuid) -> DirectoryResult<bool> {
        bounded(self.config.operation_timeout, "is_reachable", async {
            let unit = self.units.get_by_id(unit_id).await?;
            if unit.placement == UnitPlacement::Root {
                return Ok(true);
            }
            let chain = self.ancestor_chain(&unit).await?;
            Ok(chain
                .last()
                .is_some_and(|top| top.placement == UnitPlacement::Root))
        })
        .await
    }

    /// Ids of every unit below `unit_id`, breadth first.
    pub async fn subtree_ids(&self, unit_id: Uuid) -> DirectoryResult<Vec<Uuid>> {
        bounded(self.config.operation_timeout, "subtree_ids", async {
            // Existence check: an unknown root is NotFound, not an empty tree.
            self.units.get_by_id(unit_id).await?;

            let ids: Vec<Uuid> = self
                .subtree_walk(unit_id)
                .await?
                .into_iter()
                .map(|(id, _)| id)
                .collect();

            debug!(unit_id = %unit_id, count = ids.len(), "Subtree collected");
            Ok(ids)
        })
        .await
    }

    /// Every unit of the organization, detached ones included.
    pub async fn list_units(&self, organization_id: Uuid) -> DirectoryResult<Vec<Unit>> {
        bounded(self.config.operation_timeout, "list_units", async {
            self.orgs.get_by_id(organization_id).await?;
            self.units.list_by_organization(organization_id).await
        })
        .await
    }

    pub async fn list_organizations(
        &self,
        pagination: Pagination,
    ) -> DirectoryResult<PaginatedResult<Organization>> {
        bounded(
            self.config.operation_timeout,
            "list_organizations",
            self.orgs.list(pagination),
        )
        .await
    }

    /// Walks parent edges upward from `unit`. A unit may have at most
    /// `max_hierarchy_depth` ancestors.
    async fn ancestor_chain(&self, unit: &Unit) -> DirectoryResult<Vec<Unit>> {
        let mut chain: Vec<Unit> = Vec::new();
        let mut next = unit.parent_id();

        while let Some(parent_id) = next {
            if chain.len() == self.config.max_hierarchy_depth {
                return Err(self.too_deep(unit.id));
            }
            let parent = self.units.get_by_id(parent_id).await?;
            next = parent.parent_id();
            chain.push(parent);
        }

        Ok(chain)
    }

    /// Descendants of `unit_id` with their depth below it, breadth first.
    /// A descendant may sit at most `max_hierarchy_depth` levels down.
    async fn subtree_walk(&self, unit_id: Uuid) -> DirectoryResult<Vec<(Uuid, usize)>> {
        let mut seen = HashSet::from([unit_id]);
        let mut found = Vec::new();
        let mut frontier = VecDeque::from([(unit_id, 0usize)]);

        while let Some((current, depth)) = frontier.pop_front() {
            for child in self.units.list_child_ids(current).await? {
                if depth + 1 > self.config.max_hierarchy_depth {
                    return Err(self.too_deep(unit_id));
                }
                if seen.insert(child) {
                    found.push((child, depth + 1));
                    frontier.push_back((child, depth + 1));
                }
            }
        }

        Ok(found)
    }

    async fn parent_unit(&self, parent_id: Uuid) -> DirectoryResult<Unit> {
        self.units.get_by_id(parent_id).await.map_err(|err| match err {
            DirectoryError::NotFound { .. } => DirectoryError::not_found("parent unit", parent_id),
            other => other,
        })
    }

    /// Runs a validate-then-write step again when its write lost a race
    /// with another structural write to the same organization.
    async fn retry_on_race<T, F, Fut>(&self, operation: &'static str, step: F) -> DirectoryResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = DirectoryResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match step().await {
                Err(err) if err.is_hierarchy_conflict() && attempt < MAX_WRITE_ATTEMPTS => {
                    debug!(operation, attempt, "Hierarchy moved underneath write, retrying");
                    attempt += 1;
                }
                Err(err) if err.is_hierarchy_conflict() => {
                    warn!(operation, attempt, "Giving up after repeated hierarchy races");
                    return Err(err);
                }
                other => return other,
            }
        }
    }

    fn too_deep(&self, unit_id: Uuid) -> DirectoryError {
        DirectoryError::invariant(format!(
            "hierarchy around unit {unit_id} exceeds {} levels",
            self.config.max_hierarchy_depth
        ))
    }
}
