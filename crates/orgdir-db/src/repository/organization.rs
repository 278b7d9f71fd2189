//! SurrealDB implementation of [`OrganizationRepository`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use orgdir_core::error::{DirectoryError, DirectoryResult};
use orgdir_core::models::node::{NodeAttributes, UpdateNode};
use orgdir_core::models::organization::{CreateOrganization, Organization};
use orgdir_core::models::unit::Unit;
use orgdir_core::repository::{
    OrganizationRepository, PaginatedResult, Pagination, TenantBindingInput,
};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{DbError, parse_uuid};
use crate::repository::slug::active_binding;
use crate::repository::unit::{apply_node_update, units_by_ids};

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct OrganizationRowWithId {
    record_id: String,
    name: String,
    description: String,
    slug: String,
    owner_id: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrganizationRowWithId {
    fn try_into_organization(self, default_unit: Unit) -> Result<Organization, DbError> {
        Ok(Organization {
            id: parse_uuid(&self.record_id, "organization")?,
            attributes: NodeAttributes {
                name: self.name,
                description: self.description,
                metadata: self.metadata,
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
            slug: self.slug,
            owner_id: parse_uuid(&self.owner_id, "owner")?,
            default_unit,
        })
    }
}

/// Row struct for count queries.
#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

/// Attaches each organization's default unit. An organization row without
/// one means the store is inconsistent and is reported as such.
async fn hydrate<C: Connection>(
    db: &Surreal<C>,
    rows: Vec<OrganizationRowWithId>,
) -> Result<Vec<Organization>, DbError> {
    let ids = rows
        .iter()
        .map(|row| parse_uuid(&row.record_id, "organization"))
        .collect::<Result<Vec<_>, DbError>>()?;

    let mut defaults: HashMap<Uuid, Unit> = units_by_ids(db, &ids)
        .await?
        .into_iter()
        .filter(|unit| unit.is_default)
        .map(|unit| (unit.id, unit))
        .collect();

    rows.into_iter()
        .zip(ids)
        .map(|(row, id)| {
            let unit = defaults.remove(&id).ok_or_else(|| {
                DbError::Decode(format!("organization {id} has no default unit"))
            })?;
            row.try_into_organization(unit)
        })
        .collect()
}

async fn organization_by_id<C: Connection>(
    db: &Surreal<C>,
    id: Uuid,
) -> Result<Organization, DbError> {
    let id_str = id.to_string();

    let mut result = db
        .query("SELECT meta::id(id) AS record_id, * FROM type::record('organization', $id)")
        .bind(("id", id_str.clone()))
        .await
        .map_err(DbError::query("get_organization", "organization", &id_str))?;

    let rows: Vec<OrganizationRowWithId> = result.take(0)?;
    if rows.is_empty() {
        return Err(DbError::not_found("organization", id));
    }

    hydrate(db, rows)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| DbError::not_found("organization", id))
}

/// SurrealDB implementation of the Organization repository.
#[derive(Clone)]
pub struct SurrealOrganizationRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealOrganizationRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    fn slug_conflict(slug: &str, holder: Uuid) -> DirectoryError {
        DirectoryError::Conflict {
            entity: "slug".into(),
            reason: format!("slug '{slug}' is bound to organization {holder}"),
        }
    }
}

impl<C: Connection> OrganizationRepository for SurrealOrganizationRepository<C> {
    async fn create(
        &self,
        input: CreateOrganization,
        binding: TenantBindingInput,
    ) -> DirectoryResult<Organization> {
        if let Some(holder) = active_binding(&self.db, &input.slug).await? {
            return Err(Self::slug_conflict(&input.slug, holder));
        }

        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let history_id = Uuid::new_v4().to_string();
        let slug = input.slug.clone();
        let metadata = input
            .metadata
            .unwrap_or(serde_json::Value::Object(Default::default()));

        // Organization, tenant binding, default unit, root edge marker and
        // the first slug binding commit together or not at all.
        let response = self
            .db
            .query(
                "BEGIN TRANSACTION; \
                 CREATE type::record('organization', $id) SET \
                     name = $name, description = $description, \
                     slug = $slug, owner_id = $owner_id, \
                     metadata = $metadata; \
                 CREATE type::record('tenant_binding', $id) SET \
                     strategy = $strategy, connection = $connection; \
                 CREATE type::record('unit', $id) SET \
                     organization_id = $id, \
                     name = $name, description = $description, \
                     metadata = $metadata, is_default = true; \
                 CREATE type::record('unit_edge', $id) SET \
                     child_id = $id, parent_id = NONE, \
                     organization_id = $id; \
                 CREATE type::record('slug_binding', $slug) SET \
                     organization_id = $id, history_id = $history_id; \
                 CREATE type::record('slug_history', $history_id) SET \
                     slug = $slug, organization_id = $id, \
                     started_at = time::now(), ended_at = NONE; \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id_str.clone()))
            .bind(("name", input.name))
            .bind(("description", input.description))
            .bind(("slug", input.slug))
            .bind(("owner_id", input.owner_id.to_string()))
            .bind(("metadata", metadata))
            .bind(("strategy", binding.strategy.as_str().to_string()))
            .bind(("connection", binding.connection))
            .bind(("history_id", history_id))
            .await
            .map_err(DbError::query("create_organization", "organization", &id_str))?;

        if let Err(err) = response.check() {
            // A concurrent creation may have claimed the slug between the
            // pre-check and the commit.
            if let Some(holder) = active_binding(&self.db, &slug).await? {
                warn!(slug = %slug, holder = %holder, "Slug claimed during organization creation");
                return Err(Self::slug_conflict(&slug, holder));
            }
            return Err(DbError::query("create_organization", "organization", &id_str)(err).into());
        }

        info!(organization_id = %id, slug = %slug, "Organization created");

        Ok(organization_by_id(&self.db, id).await?)
    }

    async fn get_by_id(&self, id: Uuid) -> DirectoryResult<Organization> {
        Ok(organization_by_id(&self.db, id).await?)
    }

    async fn update(&self, id: Uuid, input: UpdateNode) -> DirectoryResult<Organization> {
        organization_by_id(&self.db, id).await?;
        apply_node_update(&self.db, id, input, &["organization", "unit"]).await?;

        Ok(organization_by_id(&self.db, id).await?)
    }

    async fn delete(&self, id: Uuid) -> DirectoryResult<()> {
        let org = organization_by_id(&self.db, id).await?;
        let id_str = id.to_string();

        // History is never deleted: the open entry is closed and the slug
        // released.
        self.db
            .query(
                "BEGIN TRANSACTION; \
                 UPDATE slug_history SET ended_at = time::now() \
                     WHERE organization_id = $id AND ended_at = NONE; \
                 DELETE slug_binding WHERE organization_id = $id; \
                 DELETE membership WHERE organization_id = $id; \
                 DELETE unit_edge WHERE organization_id = $id; \
                 DELETE unit WHERE organization_id = $id; \
                 DELETE type::record('tenant_binding', $id); \
                 DELETE type::record('hierarchy_revision', $id); \
                 DELETE type::record('organization', $id); \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::query("delete_organization", "organization", &id_str))?
            .check()
            .map_err(DbError::query("delete_organization", "organization", &id_str))?;

        info!(organization_id = %id, slug = %org.slug, "Organization deleted");

        Ok(())
    }

    async fn list(&self, pagination: Pagination) -> DirectoryResult<PaginatedResult<Organization>> {
        let mut count_result = self
            .db
            .query("SELECT count() AS total FROM organization GROUP ALL")
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * \
                 FROM organization \
                 ORDER BY created_at ASC \
                 LIMIT $limit START $offset",
            )
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<OrganizationRowWithId> = result.take(0).map_err(DbError::from)?;
        let items = hydrate(&self.db, rows).await?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
