//! SurrealDB implementation of [`UnitRepository`].
//!
//! A unit's position in the tree lives in `unit_edge`, keyed by the child
//! unit id: one record per attached unit, none for a detached unit, and a
//! record with `parent_id = NONE` for the default unit.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use orgdir_core::error::{DirectoryError, DirectoryResult};
use orgdir_core::models::node::{NodeAttributes, UpdateNode};
use orgdir_core::models::unit::{CreateUnit, Unit, UnitPlacement};
use orgdir_core::repository::UnitRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, parse_uuid};
use crate::repository::revision;

/// Aborts the enclosing transaction if `unit:$id` is gone.
const UNIT_GUARD: &str = "\
IF (SELECT VALUE id FROM type::record('unit', $id)) = [] { \
    THROW 'unit missing'; \
};";

/// Aborts the enclosing transaction if `unit:$parent_id` is gone.
const PARENT_GUARD: &str = "\
IF (SELECT VALUE id FROM type::record('unit', $parent_id)) = [] { \
    THROW 'parent unit missing'; \
};";

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct UnitRowWithId {
    record_id: String,
    organization_id: String,
    name: String,
    description: String,
    metadata: serde_json::Value,
    is_default: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct EdgeRow {
    child_id: String,
    parent_id: Option<String>,
}

#[derive(Debug, SurrealValue)]
struct IdRow {
    record_id: String,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

impl UnitRowWithId {
    fn try_into_unit(self, placement: UnitPlacement) -> Result<Unit, DbError> {
        Ok(Unit {
            id: parse_uuid(&self.record_id, "unit")?,
            organization_id: parse_uuid(&self.organization_id, "organization")?,
            attributes: NodeAttributes {
                name: self.name,
                description: self.description,
                metadata: self.metadata,
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
            is_default: self.is_default,
            placement,
        })
    }
}

fn placement_of(is_default: bool, edge: Option<&Option<String>>) -> Result<UnitPlacement, DbError> {
    match edge {
        Some(Some(parent)) => Ok(UnitPlacement::Attached {
            parent_id: parse_uuid(parent, "parent unit")?,
        }),
        Some(None) if is_default => Ok(UnitPlacement::Root),
        Some(None) | None => Ok(UnitPlacement::Detached),
    }
}

/// Joins unit rows with their edges, keeping the row order.
fn assemble(rows: Vec<UnitRowWithId>, edges: Vec<EdgeRow>) -> Result<Vec<Unit>, DbError> {
    let edges: HashMap<String, Option<String>> = edges
        .into_iter()
        .map(|e| (e.child_id, e.parent_id))
        .collect();

    rows.into_iter()
        .map(|row| {
            let placement = placement_of(row.is_default, edges.get(&row.record_id))?;
            row.try_into_unit(placement)
        })
        .collect()
}

/// Loads the units with the given ids, oldest first. Missing ids are skipped.
pub(crate) async fn units_by_ids<C: Connection>(
    db: &Surreal<C>,
    ids: &[Uuid],
) -> Result<Vec<Unit>, DbError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
    let key = ids.join(",");

    let mut result = db
        .query(
            "SELECT meta::id(id) AS record_id, * FROM unit \
             WHERE meta::id(id) IN $ids \
             ORDER BY created_at ASC; \
             SELECT child_id, parent_id FROM unit_edge \
             WHERE child_id IN $ids;",
        )
        .bind(("ids", ids))
        .await
        .map_err(DbError::query("load_units", "unit", &key))?;

    let rows: Vec<UnitRowWithId> = result.take(0)?;
    let edges: Vec<EdgeRow> = result.take(1)?;
    assemble(rows, edges)
}

pub(crate) async fn units_by_organization<C: Connection>(
    db: &Surreal<C>,
    organization_id: Uuid,
) -> Result<Vec<Unit>, DbError> {
    let org_id_str = organization_id.to_string();

    let mut result = db
        .query(
            "SELECT meta::id(id) AS record_id, * FROM unit \
             WHERE organization_id = $org_id \
             ORDER BY created_at ASC; \
             SELECT child_id, parent_id FROM unit_edge \
             WHERE organization_id = $org_id;",
        )
        .bind(("org_id", org_id_str.clone()))
        .await
        .map_err(DbError::query("list_units", "organization", &org_id_str))?;

    let rows: Vec<UnitRowWithId> = result.take(0)?;
    let edges: Vec<EdgeRow> = result.take(1)?;
    assemble(rows, edges)
}

pub(crate) async fn unit_by_id<C: Connection>(db: &Surreal<C>, id: Uuid) -> Result<Unit, DbError> {
    units_by_ids(db, &[id])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| DbError::not_found("unit", id))
}

/// Applies a partial update to the records `tables:<id>` in one
/// transaction. Organizations and their default unit share an id, so
/// passing both tables keeps them in step.
pub(crate) async fn apply_node_update<C: Connection>(
    db: &Surreal<C>,
    id: Uuid,
    input: UpdateNode,
    tables: &[&str],
) -> Result<(), DbError> {
    let id_str = id.to_string();

    let mut sets = Vec::new();
    if input.name.is_some() {
        sets.push("name = $name");
    }
    if input.description.is_some() {
        sets.push("description = $description");
    }
    if input.metadata.is_some() {
        sets.push("metadata = $metadata");
    }
    sets.push("updated_at = time::now()");
    let sets = sets.join(", ");

    let statements: Vec<String> = tables
        .iter()
        .map(|table| format!("UPDATE type::record('{table}', $id) SET {sets};"))
        .collect();
    let query = format!(
        "BEGIN TRANSACTION; {} COMMIT TRANSACTION;",
        statements.join(" ")
    );

    let mut builder = db.query(query).bind(("id", id_str.clone()));
    if let Some(name) = input.name {
        builder = builder.bind(("name", name));
    }
    if let Some(description) = input.description {
        builder = builder.bind(("description", description));
    }
    if let Some(metadata) = input.metadata {
        builder = builder.bind(("metadata", metadata));
    }

    builder
        .await
        .map_err(DbError::query("update", "unit", &id_str))?
        .check()
        .map_err(DbError::query("update", "unit", &id_str))?;

    Ok(())
}

/// SurrealDB implementation of the Unit repository.
#[derive(Clone)]
pub struct SurrealUnitRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealUnitRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    /// Turns a failed compare-and-bump write into the most specific error:
    /// the revision moved, or one of the `required` units is gone.
    async fn classify_failure(
        &self,
        organization_id: Uuid,
        expected_revision: i64,
        required: &[(Uuid, &'static str)],
        err: DbError,
    ) -> DirectoryError {
        match revision::current(&self.db, organization_id).await {
            Ok(current) if current != expected_revision => {
                debug!(organization_id = %organization_id, "Hierarchy revision moved");
                return revision::moved(organization_id);
            }
            Err(read_err) => return read_err.into(),
            Ok(_) => {}
        }
        for (id, entity) in required {
            match revision::unit_exists(&self.db, *id).await {
                Ok(false) => return DirectoryError::not_found(*entity, id),
                Err(read_err) => return read_err.into(),
                Ok(true) => {}
            }
        }
        err.into()
    }

    async fn child_rows(&self, parent_id: Uuid) -> Result<Vec<UnitRowWithId>, DbError> {
        let parent_id_str = parent_id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM unit \
                 WHERE meta::id(id) IN (\
                     SELECT VALUE child_id FROM unit_edge \
                     WHERE parent_id = $parent_id\
                 ) \
                 ORDER BY created_at ASC",
            )
            .bind(("parent_id", parent_id_str.clone()))
            .await
            .map_err(DbError::query("list_children", "unit", &parent_id_str))?;

        Ok(result.take(0)?)
    }
}

impl<C: Connection> UnitRepository for SurrealUnitRepository<C> {
    async fn revision(&self, organization_id: Uuid) -> DirectoryResult<i64> {
        Ok(revision::current(&self.db, organization_id).await?)
    }

    async fn create(
        &self,
        parent: &Unit,
        input: CreateUnit,
        expected_revision: i64,
    ) -> DirectoryResult<Unit> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let metadata = input
            .metadata
            .unwrap_or(serde_json::Value::Object(Default::default()));

        let query = [
            "BEGIN TRANSACTION;",
            revision::COMPARE_AND_BUMP,
            PARENT_GUARD,
            "CREATE type::record('unit', $id) SET \
                 organization_id = $org_id, \
                 name = $name, description = $description, \
                 metadata = $metadata, is_default = false;",
            "CREATE type::record('unit_edge', $id) SET \
                 child_id = $id, parent_id = $parent_id, \
                 organization_id = $org_id;",
            "COMMIT TRANSACTION;",
        ]
        .join(" ");

        let outcome = match self
            .db
            .query(query)
            .bind(("id", id_str.clone()))
            .bind(("org_id", parent.organization_id.to_string()))
            .bind(("expected_revision", expected_revision))
            .bind(("name", input.name))
            .bind(("description", input.description))
            .bind(("metadata", metadata))
            .bind(("parent_id", parent.id.to_string()))
            .await
        {
            Ok(response) => response.check().map(|_| ()),
            Err(err) => Err(err),
        };

        if let Err(err) = outcome {
            let err = DbError::query("create_unit", "unit", &id_str)(err);
            return Err(self
                .classify_failure(
                    parent.organization_id,
                    expected_revision,
                    &[(parent.id, "parent unit")],
                    err,
                )
                .await);
        }

        info!(
            unit_id = %id,
            parent_id = %parent.id,
            organization_id = %parent.organization_id,
            "Unit created"
        );

        Ok(unit_by_id(&self.db, id).await?)
    }

    async fn get_by_id(&self, id: Uuid) -> DirectoryResult<Unit> {
        Ok(unit_by_id(&self.db, id).await?)
    }

    async fn find_many(&self, ids: &[Uuid]) -> DirectoryResult<Vec<Unit>> {
        Ok(units_by_ids(&self.db, ids).await?)
    }

    async fn update(&self, id: Uuid, input: UpdateNode) -> DirectoryResult<Unit> {
        let unit = unit_by_id(&self.db, id).await?;
        let tables: &[&str] = if unit.is_default {
            &["unit", "organization"]
        } else {
            &["unit"]
        };
        apply_node_update(&self.db, id, input, tables).await?;

        Ok(unit_by_id(&self.db, id).await?)
    }

    async fn delete(&self, id: Uuid) -> DirectoryResult<()> {
        let unit = unit_by_id(&self.db, id).await?;
        if unit.is_default {
            return Err(DirectoryError::invariant(format!(
                "unit {id} is the default unit of organization {}",
                unit.organization_id
            )));
        }

        let id_str = id.to_string();
        let org_id_str = unit.organization_id.to_string();

        // Children lose their edge and become detached; they are not deleted.
        let query = [
            "BEGIN TRANSACTION;",
            revision::BUMP,
            UNIT_GUARD,
            "DELETE unit_edge WHERE child_id = $id OR parent_id = $id;",
            "DELETE membership WHERE unit_id = $id;",
            "DELETE type::record('unit', $id) WHERE is_default = false;",
            "COMMIT TRANSACTION;",
        ]
        .join(" ");

        let mut attempt = 1;
        loop {
            let outcome = match self
                .db
                .query(&query)
                .bind(("id", id_str.clone()))
                .bind(("org_id", org_id_str.clone()))
                .await
            {
                Ok(response) => response.check().map(|_| ()),
                Err(err) => Err(err),
            };

            let Err(err) = outcome else { break };
            if !revision::unit_exists(&self.db, id).await? {
                return Err(DbError::not_found("unit", id).into());
            }
            if attempt >= revision::MAX_ATTEMPTS {
                return Err(DbError::query("delete_unit", "unit", &id_str)(err).into());
            }
            debug!(unit_id = %id, attempt, "Unit delete collided with a concurrent write, retrying");
            attempt += 1;
        }

        info!(unit_id = %id, organization_id = %unit.organization_id, "Unit deleted");

        Ok(())
    }

    async fn list_children(&self, parent_id: Uuid) -> DirectoryResult<Vec<Unit>> {
        let rows = self.child_rows(parent_id).await?;
        debug!(parent_id = %parent_id, count = rows.len(), "Listed child units");

        rows.into_iter()
            .map(|row| row.try_into_unit(UnitPlacement::Attached { parent_id }))
            .collect::<Result<Vec<_>, DbError>>()
            .map_err(Into::into)
    }

    async fn list_child_ids(&self, parent_id: Uuid) -> DirectoryResult<Vec<Uuid>> {
        let parent_id_str = parent_id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, created_at FROM unit \
                 WHERE meta::id(id) IN (\
                     SELECT VALUE child_id FROM unit_edge \
                     WHERE parent_id = $parent_id\
                 ) \
                 ORDER BY created_at ASC",
            )
            .bind(("parent_id", parent_id_str.clone()))
            .await
            .map_err(DbError::query("list_child_ids", "unit", &parent_id_str))?;

        let rows: Vec<IdRow> = result.take(0).map_err(DbError::from)?;

        rows.iter()
            .map(|row| parse_uuid(&row.record_id, "unit"))
            .collect::<Result<Vec<_>, DbError>>()
            .map_err(Into::into)
    }

    async fn list_by_organization(&self, organization_id: Uuid) -> DirectoryResult<Vec<Unit>> {
        Ok(units_by_organization(&self.db, organization_id).await?)
    }

    async fn set_parent(
        &self,
        unit: &Unit,
        parent_id: Option<Uuid>,
        expected_revision: i64,
    ) -> DirectoryResult<Unit> {
        let id_str = unit.id.to_string();

        let mut statements = vec![
            "BEGIN TRANSACTION;",
            revision::COMPARE_AND_BUMP,
            UNIT_GUARD,
        ];
        match parent_id {
            Some(_) => statements.extend([
                PARENT_GUARD,
                "UPSERT type::record('unit_edge', $id) SET \
                     child_id = $id, parent_id = $parent_id, \
                     organization_id = $org_id, created_at = time::now();",
            ]),
            None => statements.push("DELETE type::record('unit_edge', $id);"),
        }
        statements.push("COMMIT TRANSACTION;");
        let query = statements.join(" ");

        let mut builder = self
            .db
            .query(query)
            .bind(("id", id_str.clone()))
            .bind(("org_id", unit.organization_id.to_string()))
            .bind(("expected_revision", expected_revision));
        if let Some(parent_id) = parent_id {
            builder = builder.bind(("parent_id", parent_id.to_string()));
        }

        let outcome = match builder.await {
            Ok(response) => response.check().map(|_| ()),
            Err(err) => Err(err),
        };

        if let Err(err) = outcome {
            let err = DbError::query("set_parent", "unit_edge", &id_str)(err);
            let mut required = vec![(unit.id, "unit")];
            required.extend(parent_id.map(|p| (p, "parent unit")));
            return Err(self
                .classify_failure(unit.organization_id, expected_revision, &required, err)
                .await);
        }

        info!(
            unit_id = %unit.id,
            parent_id = ?parent_id,
            "Unit parent edge replaced"
        );

        Ok(unit_by_id(&self.db, unit.id).await?)
    }
}
