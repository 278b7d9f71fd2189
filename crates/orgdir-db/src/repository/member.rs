//! SurrealDB-backed [`MemberDirectory`].
//!
//! Stands in for the external identity service: maps an email address or a
//! member id to a stable member identity.

use chrono::{DateTime, Utc};
use orgdir_core::error::{DirectoryError, DirectoryResult};
use orgdir_core::models::member::{CreateMember, Member};
use orgdir_core::repository::MemberDirectory;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;
use uuid::Uuid;

use crate::error::{DbError, parse_uuid};

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct MemberRowWithId {
    record_id: String,
    email: String,
    display_name: String,
    created_at: DateTime<Utc>,
}

impl MemberRowWithId {
    fn try_into_member(self) -> Result<Member, DbError> {
        Ok(Member {
            id: parse_uuid(&self.record_id, "member")?,
            email: self.email,
            display_name: self.display_name,
            created_at: self.created_at,
        })
    }
}

/// SurrealDB implementation of the member directory.
#[derive(Clone)]
pub struct SurrealMemberDirectory<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealMemberDirectory<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Member>, DbError> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM member \
                 WHERE email = $email",
            )
            .bind(("email", email.to_lowercase()))
            .await
            .map_err(DbError::query("resolve_member", "member", email))?;

        let rows: Vec<MemberRowWithId> = result.take(0)?;
        rows.into_iter().next().map(|r| r.try_into_member()).transpose()
    }
}

impl<C: Connection> MemberDirectory for SurrealMemberDirectory<C> {
    async fn resolve(&self, identifier: &str) -> DirectoryResult<Member> {
        let identifier = identifier.trim();

        if let Ok(id) = Uuid::parse_str(identifier) {
            let mut found = self.get_many(&[id]).await?;
            return found
                .pop()
                .ok_or_else(|| DbError::not_found("member", id).into());
        }

        self.find_by_email(identifier)
            .await?
            .ok_or_else(|| DbError::not_found("member", identifier).into())
    }

    async fn get_many(&self, ids: &[Uuid]) -> DirectoryResult<Vec<Member>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        let key = ids.join(",");

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM member \
                 WHERE meta::id(id) IN $ids",
            )
            .bind(("ids", ids))
            .await
            .map_err(DbError::query("get_members", "member", &key))?;

        let rows: Vec<MemberRowWithId> = result.take(0).map_err(DbError::from)?;
        let members = rows
            .into_iter()
            .map(|row| row.try_into_member())
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(members)
    }

    async fn register(&self, input: CreateMember) -> DirectoryResult<Member> {
        let email = input.email.trim().to_lowercase();
        if self.find_by_email(&email).await?.is_some() {
            return Err(DirectoryError::Conflict {
                entity: "member".into(),
                reason: format!("email '{email}' is already registered"),
            });
        }

        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "CREATE type::record('member', $id) SET \
                 email = $email, display_name = $display_name; \
                 SELECT meta::id(id) AS record_id, * \
                 FROM type::record('member', $id);",
            )
            .bind(("id", id_str.clone()))
            .bind(("email", email))
            .bind(("display_name", input.display_name))
            .await
            .map_err(DbError::query("register_member", "member", &id_str))?;

        let rows: Vec<MemberRowWithId> = result.take(1).map_err(DbError::from)?;
        let member = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("member", id))?
            .try_into_member()?;

        info!(member_id = %member.id, "Member registered");
        Ok(member)
    }
}
