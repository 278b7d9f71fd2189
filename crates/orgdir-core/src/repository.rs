//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. Multi-step writes (organization
//! creation, slug rebind, cascading deletes, membership propagation) are a
//! single unit of work in every implementation: either all steps become
//! visible or none do.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::DirectoryResult;
use crate::models::{
    member::{CreateMember, Member},
    membership::MembershipRecord,
    node::UpdateNode,
    organization::{CreateOrganization, Organization},
    slug::SlugHistoryEntry,
    tenant::{StorageStrategy, TenantBinding},
    unit::{CreateUnit, Unit},
};

/// Pagination parameters for list queries.
#[derive(Debug, Clone)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// A paginated result set.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

/// Storage strategy and connection descriptor to persist for a tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantBindingInput {
    pub strategy: StorageStrategy,
    pub connection: String,
}

// ---------------------------------------------------------------------------
// Hierarchy
// ---------------------------------------------------------------------------

pub trait OrganizationRepository: Send + Sync {
    /// Inserts the organization, its tenant binding, its default unit, the
    /// default unit's root edge marker and the first open slug binding as
    /// one unit of work.
    fn create(
        &self,
        input: CreateOrganization,
        binding: TenantBindingInput,
    ) -> impl Future<Output = DirectoryResult<Organization>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = DirectoryResult<Organization>> + Send;
    /// Updates the organization and mirrors the change onto its default unit.
    fn update(
        &self,
        id: Uuid,
        input: UpdateNode,
    ) -> impl Future<Output = DirectoryResult<Organization>> + Send;
    /// Deletes the organization with its units, edges, memberships and
    /// tenant binding; closes its open slug history entry.
    fn delete(&self, id: Uuid) -> impl Future<Output = DirectoryResult<()>> + Send;
    fn list(
        &self,
        pagination: Pagination,
    ) -> impl Future<Output = DirectoryResult<PaginatedResult<Organization>>> + Send;
}

pub trait UnitRepository: Send + Sync {
    /// Structural revision of an organization's hierarchy. Writes that
    /// validate the tree before writing pass back the revision they read.
    fn revision(&self, organization_id: Uuid) -> impl Future<Output = DirectoryResult<i64>> + Send;
    /// Inserts a unit under `parent`, in the parent's organization, together
    /// with its parent edge. Fails with `NotFound` if the parent no longer
    /// exists and with a hierarchy `Conflict` if the revision moved.
    fn create(
        &self,
        parent: &Unit,
        input: CreateUnit,
        expected_revision: i64,
    ) -> impl Future<Output = DirectoryResult<Unit>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = DirectoryResult<Unit>> + Send;
    /// Fetches every unit in `ids` that exists. Missing ids are skipped.
    fn find_many(&self, ids: &[Uuid]) -> impl Future<Output = DirectoryResult<Vec<Unit>>> + Send;
    fn update(
        &self,
        id: Uuid,
        input: UpdateNode,
    ) -> impl Future<Output = DirectoryResult<Unit>> + Send;
    /// Deletes a non-default unit, its edge, its children's edges and its
    /// memberships.
    fn delete(&self, id: Uuid) -> impl Future<Output = DirectoryResult<()>> + Send;
    fn list_children(
        &self,
        parent_id: Uuid,
    ) -> impl Future<Output = DirectoryResult<Vec<Unit>>> + Send;
    fn list_child_ids(
        &self,
        parent_id: Uuid,
    ) -> impl Future<Output = DirectoryResult<Vec<Uuid>>> + Send;
    fn list_by_organization(
        &self,
        organization_id: Uuid,
    ) -> impl Future<Output = DirectoryResult<Vec<Unit>>> + Send;
    /// Replaces the unit's parent edge, or removes it when `parent_id` is
    /// `None`. Performs no cycle or depth validation; the caller does that
    /// against `expected_revision`. Fails with a hierarchy `Conflict` if the
    /// revision moved, and with `NotFound` if the unit or parent is gone.
    fn set_parent(
        &self,
        unit: &Unit,
        parent_id: Option<Uuid>,
        expected_revision: i64,
    ) -> impl Future<Output = DirectoryResult<Unit>> + Send;
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

pub trait SlugRepository: Send + Sync {
    /// Organization currently bound to `slug`, if any.
    fn find_active(
        &self,
        slug: &str,
    ) -> impl Future<Output = DirectoryResult<Option<Uuid>>> + Send;
    /// Opens the first binding for an organization that has none.
    fn bind(
        &self,
        slug: &str,
        organization_id: Uuid,
    ) -> impl Future<Output = DirectoryResult<SlugHistoryEntry>> + Send;
    /// Closes the organization's open binding and opens one for `new_slug`.
    fn rebind(
        &self,
        organization_id: Uuid,
        new_slug: &str,
    ) -> impl Future<Output = DirectoryResult<SlugHistoryEntry>> + Send;
    /// All entries for `slug`, most recent first.
    fn history(
        &self,
        slug: &str,
    ) -> impl Future<Output = DirectoryResult<Vec<SlugHistoryEntry>>> + Send;
    /// The organization's open entry, if any.
    fn current(
        &self,
        organization_id: Uuid,
    ) -> impl Future<Output = DirectoryResult<Option<SlugHistoryEntry>>> + Send;
}

pub trait TenantBindingRepository: Send + Sync {
    fn get(
        &self,
        organization_id: Uuid,
    ) -> impl Future<Output = DirectoryResult<TenantBinding>> + Send;
    fn update(
        &self,
        organization_id: Uuid,
        input: TenantBindingInput,
    ) -> impl Future<Output = DirectoryResult<TenantBinding>> + Send;
}

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

pub trait MembershipRepository: Send + Sync {
    /// Upserts `(unit_id, member_id)`, and `(also_into, member_id)` when
    /// given, in one unit of work. Returns the `unit_id` record. Fails with
    /// `NotFound` if the unit is deleted before the write lands.
    fn add(
        &self,
        unit: &Unit,
        member_id: Uuid,
        also_into: Option<Uuid>,
    ) -> impl Future<Output = DirectoryResult<MembershipRecord>> + Send;
    /// Removes the pair. Removing an absent pair succeeds.
    fn remove(
        &self,
        unit_id: Uuid,
        member_id: Uuid,
    ) -> impl Future<Output = DirectoryResult<()>> + Send;
    /// Memberships of one unit, oldest first.
    fn list_for_unit(
        &self,
        unit_id: Uuid,
    ) -> impl Future<Output = DirectoryResult<Vec<MembershipRecord>>> + Send;
    /// Member ids per unit in one round trip. Units without members have no
    /// key in the result.
    fn list_for_units(
        &self,
        unit_ids: &[Uuid],
    ) -> impl Future<Output = DirectoryResult<HashMap<Uuid, Vec<Uuid>>>> + Send;
    fn list_for_member(
        &self,
        member_id: Uuid,
    ) -> impl Future<Output = DirectoryResult<Vec<MembershipRecord>>> + Send;
}

/// Identity collaborator: maps an external contact identifier to a stable
/// member identity and supplies display fields.
pub trait MemberDirectory: Send + Sync {
    /// Resolves an identifier (an email address, or a member id) to a member.
    /// Unknown identifiers fail with `NotFound`.
    fn resolve(&self, identifier: &str) -> impl Future<Output = DirectoryResult<Member>> + Send;
    /// Members for the given ids. Unknown ids are skipped.
    fn get_many(&self, ids: &[Uuid]) -> impl Future<Output = DirectoryResult<Vec<Member>>> + Send;
    fn register(&self, input: CreateMember) -> impl Future<Output = DirectoryResult<Member>> + Send;
}
