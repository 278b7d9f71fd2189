//! SurrealDB implementation of [`MembershipRepository`].
//!
//! Memberships are keyed by `"{unit_id}:{member_id}"`, so adding the same
//! pair twice upserts one record and keeps its original `created_at`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use orgdir_core::error::DirectoryResult;
use orgdir_core::models::membership::MembershipRecord;
use orgdir_core::models::unit::Unit;
use orgdir_core::repository::MembershipRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, parse_uuid};
use crate::repository::revision;

#[derive(Debug, SurrealValue)]
struct MembershipRow {
    unit_id: String,
    member_id: String,
    organization_id: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MembershipRow> for MembershipRecord {
    type Error = DbError;

    fn try_from(row: MembershipRow) -> Result<Self, Self::Error> {
        Ok(MembershipRecord {
            unit_id: parse_uuid(&row.unit_id, "unit")?,
            member_id: parse_uuid(&row.member_id, "member")?,
            organization_id: parse_uuid(&row.organization_id, "organization")?,
            created_at: row.created_at,
        })
    }
}

fn membership_key(unit_id: Uuid, member_id: Uuid) -> String {
    format!("{unit_id}:{member_id}")
}

fn into_records(rows: Vec<MembershipRow>) -> Result<Vec<MembershipRecord>, DbError> {
    rows.into_iter().map(MembershipRecord::try_from).collect()
}

/// SurrealDB implementation of the Membership repository.
#[derive(Clone)]
pub struct SurrealMembershipRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealMembershipRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> MembershipRepository for SurrealMembershipRepository<C> {
    async fn add(
        &self,
        unit: &Unit,
        member_id: Uuid,
        also_into: Option<Uuid>,
    ) -> DirectoryResult<MembershipRecord> {
        let key = membership_key(unit.id, member_id);

        // Never lands after a committed delete of the unit.
        let mut statements = vec![
            "BEGIN TRANSACTION;",
            revision::BUMP,
            "IF (SELECT VALUE id FROM type::record('unit', $unit_id)) = [] { \
                 THROW 'unit missing'; \
             };",
            "UPSERT type::record('membership', $key) SET \
                 unit_id = $unit_id, member_id = $member_id, \
                 organization_id = $org_id;",
        ];
        if also_into.is_some() {
            statements.push(
                "UPSERT type::record('membership', $also_key) SET \
                     unit_id = $also_unit_id, member_id = $member_id, \
                     organization_id = $org_id;",
            );
        }
        statements.push("COMMIT TRANSACTION;");
        let query = statements.join(" ");

        let mut attempt = 1;
        loop {
            let mut builder = self
                .db
                .query(&query)
                .bind(("key", key.clone()))
                .bind(("unit_id", unit.id.to_string()))
                .bind(("member_id", member_id.to_string()))
                .bind(("org_id", unit.organization_id.to_string()));

            if let Some(target) = also_into {
                builder = builder
                    .bind(("also_key", membership_key(target, member_id)))
                    .bind(("also_unit_id", target.to_string()));
            }

            let outcome = match builder.await {
                Ok(response) => response.check().map(|_| ()),
                Err(err) => Err(err),
            };

            let Err(err) = outcome else { break };
            if !revision::unit_exists(&self.db, unit.id).await? {
                return Err(DbError::not_found("unit", unit.id).into());
            }
            if attempt >= revision::MAX_ATTEMPTS {
                return Err(DbError::query("add_membership", "membership", &key)(err).into());
            }
            debug!(unit_id = %unit.id, member_id = %member_id, attempt, "Membership write collided, retrying");
            attempt += 1;
        }

        match also_into {
            Some(target) => info!(
                unit_id = %unit.id,
                member_id = %member_id,
                propagated_to = %target,
                "Member added"
            ),
            None => info!(unit_id = %unit.id, member_id = %member_id, "Member added"),
        }

        let mut result = self
            .db
            .query("SELECT * FROM type::record('membership', $key)")
            .bind(("key", key.clone()))
            .await
            .map_err(DbError::query("get_membership", "membership", &key))?;

        let rows: Vec<MembershipRow> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("membership", &key))?;

        Ok(MembershipRecord::try_from(row)?)
    }

    async fn remove(&self, unit_id: Uuid, member_id: Uuid) -> DirectoryResult<()> {
        let key = membership_key(unit_id, member_id);

        self.db
            .query("DELETE type::record('membership', $key)")
            .bind(("key", key.clone()))
            .await
            .map_err(DbError::query("remove_membership", "membership", &key))?
            .check()
            .map_err(DbError::query("remove_membership", "membership", &key))?;

        debug!(unit_id = %unit_id, member_id = %member_id, "Membership removed");
        Ok(())
    }

    async fn list_for_unit(&self, unit_id: Uuid) -> DirectoryResult<Vec<MembershipRecord>> {
        let unit_id_str = unit_id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT * FROM membership \
                 WHERE unit_id = $unit_id \
                 ORDER BY created_at ASC",
            )
            .bind(("unit_id", unit_id_str.clone()))
            .await
            .map_err(DbError::query("list_members", "unit", &unit_id_str))?;

        let rows: Vec<MembershipRow> = result.take(0).map_err(DbError::from)?;
        Ok(into_records(rows)?)
    }

    async fn list_for_units(&self, unit_ids: &[Uuid]) -> DirectoryResult<HashMap<Uuid, Vec<Uuid>>> {
        if unit_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<String> = unit_ids.iter().map(Uuid::to_string).collect();
        let key = ids.join(",");

        let mut result = self
            .db
            .query(
                "SELECT * FROM membership \
                 WHERE unit_id IN $unit_ids \
                 ORDER BY created_at ASC",
            )
            .bind(("unit_ids", ids))
            .await
            .map_err(DbError::query("list_members_for_units", "unit", &key))?;

        let rows: Vec<MembershipRow> = result.take(0).map_err(DbError::from)?;

        let mut grouped: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for record in into_records(rows)? {
            grouped.entry(record.unit_id).or_default().push(record.member_id);
        }
        Ok(grouped)
    }

    async fn list_for_member(&self, member_id: Uuid) -> DirectoryResult<Vec<MembershipRecord>> {
        let member_id_str = member_id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT * FROM membership \
                 WHERE member_id = $member_id \
                 ORDER BY created_at ASC",
            )
            .bind(("member_id", member_id_str.clone()))
            .await
            .map_err(DbError::query("list_memberships", "member", &member_id_str))?;

        let rows: Vec<MembershipRow> = result.take(0).map_err(DbError::from)?;
        Ok(into_records(rows)?)
    }
}
