//! SurrealDB implementation of [`TenantBindingRepository`].

use chrono::{DateTime, Utc};
use orgdir_core::error::DirectoryResult;
use orgdir_core::models::tenant::{StorageStrategy, TenantBinding};
use orgdir_core::repository::{TenantBindingInput, TenantBindingRepository};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;
use uuid::Uuid;

use crate::error::{DbError, parse_uuid};

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct TenantBindingRowWithId {
    record_id: String,
    strategy: String,
    connection: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TenantBindingRowWithId {
    fn try_into_binding(self) -> Result<TenantBinding, DbError> {
        let strategy: StorageStrategy = self
            .strategy
            .parse()
            .map_err(|_| DbError::Decode(format!("unknown storage strategy '{}'", self.strategy)))?;

        Ok(TenantBinding {
            organization_id: parse_uuid(&self.record_id, "organization")?,
            strategy,
            connection: self.connection,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// SurrealDB implementation of the tenant binding repository.
#[derive(Clone)]
pub struct SurrealTenantBindingRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealTenantBindingRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> TenantBindingRepository for SurrealTenantBindingRepository<C> {
    async fn get(&self, organization_id: Uuid) -> DirectoryResult<TenantBinding> {
        let id_str = organization_id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * \
                 FROM type::record('tenant_binding', $id)",
            )
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::query("get_tenant_binding", "organization", &id_str))?;

        let rows: Vec<TenantBindingRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("tenant binding", organization_id))?;

        Ok(row.try_into_binding()?)
    }

    async fn update(
        &self,
        organization_id: Uuid,
        input: TenantBindingInput,
    ) -> DirectoryResult<TenantBinding> {
        let id_str = organization_id.to_string();

        let mut result = self
            .db
            .query(
                "UPDATE type::record('tenant_binding', $id) SET \
                 strategy = $strategy, \
                 connection = $connection, \
                 updated_at = time::now(); \
                 SELECT meta::id(id) AS record_id, * \
                 FROM type::record('tenant_binding', $id);",
            )
            .bind(("id", id_str.clone()))
            .bind(("strategy", input.strategy.as_str().to_string()))
            .bind(("connection", input.connection))
            .await
            .map_err(DbError::query("update_tenant_binding", "organization", &id_str))?;

        let rows: Vec<TenantBindingRowWithId> = result.take(1).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("tenant binding", organization_id))?;

        let binding = row.try_into_binding()?;
        info!(
            organization_id = %organization_id,
            strategy = %binding.strategy,
            "Tenant binding updated"
        );
        Ok(binding)
    }
}
