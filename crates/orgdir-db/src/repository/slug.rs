//! SurrealDB implementation of [`SlugRepository`].
//!
//! `slug_binding` holds the active slug of each organization, keyed by the
//! slug itself, so two organizations can never hold the same slug at once.
//! `slug_history` is append-only: entries are opened and later closed, never
//! removed.

use chrono::{DateTime, Utc};
use orgdir_core::error::{DirectoryError, DirectoryResult};
use orgdir_core::models::slug::SlugHistoryEntry;
use orgdir_core::repository::SlugRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, parse_uuid};

#[derive(Debug, SurrealValue)]
struct BindingRow {
    organization_id: String,
}

#[derive(Debug, SurrealValue)]
struct HistoryRowWithId {
    record_id: String,
    slug: String,
    organization_id: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, SurrealValue)]
struct ExistsRow {
    #[allow(dead_code)]
    record_id: String,
}

impl TryFrom<HistoryRowWithId> for SlugHistoryEntry {
    type Error = DbError;

    fn try_from(row: HistoryRowWithId) -> Result<Self, Self::Error> {
        Ok(SlugHistoryEntry {
            id: parse_uuid(&row.record_id, "slug history")?,
            slug: row.slug,
            organization_id: parse_uuid(&row.organization_id, "organization")?,
            started_at: row.started_at,
            ended_at: row.ended_at,
        })
    }
}

/// Organization currently holding `slug`, if any.
pub(crate) async fn active_binding<C: Connection>(
    db: &Surreal<C>,
    slug: &str,
) -> Result<Option<Uuid>, DbError> {
    let mut result = db
        .query("SELECT organization_id FROM type::record('slug_binding', $slug)")
        .bind(("slug", slug.to_string()))
        .await
        .map_err(DbError::query("find_slug", "slug", slug))?;

    let rows: Vec<BindingRow> = result.take(0)?;
    rows.first()
        .map(|row| parse_uuid(&row.organization_id, "organization"))
        .transpose()
}

async fn open_entry<C: Connection>(
    db: &Surreal<C>,
    organization_id: Uuid,
) -> Result<Option<SlugHistoryEntry>, DbError> {
    let org_id_str = organization_id.to_string();

    let mut result = db
        .query(
            "SELECT meta::id(id) AS record_id, * FROM slug_history \
             WHERE organization_id = $org_id AND ended_at = NONE \
             ORDER BY started_at DESC LIMIT 1",
        )
        .bind(("org_id", org_id_str.clone()))
        .await
        .map_err(DbError::query("current_slug", "organization", &org_id_str))?;

    let rows: Vec<HistoryRowWithId> = result.take(0)?;
    rows.into_iter().next().map(SlugHistoryEntry::try_from).transpose()
}

async fn organization_exists<C: Connection>(
    db: &Surreal<C>,
    organization_id: Uuid,
) -> Result<(), DbError> {
    let org_id_str = organization_id.to_string();

    let mut result = db
        .query("SELECT meta::id(id) AS record_id FROM type::record('organization', $id)")
        .bind(("id", org_id_str.clone()))
        .await
        .map_err(DbError::query("get_organization", "organization", &org_id_str))?;

    let rows: Vec<ExistsRow> = result.take(0)?;
    if rows.is_empty() {
        return Err(DbError::not_found("organization", organization_id));
    }
    Ok(())
}

fn slug_taken(slug: &str, holder: Uuid) -> DirectoryError {
    DirectoryError::Conflict {
        entity: "slug".into(),
        reason: format!("slug '{slug}' is bound to organization {holder}"),
    }
}

/// SurrealDB implementation of the Slug repository.
#[derive(Clone)]
pub struct SurrealSlugRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealSlugRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    /// Resolves a failed binding transaction into the most specific error:
    /// the slug was claimed by someone else, or the organization's own
    /// binding moved underneath us.
    async fn classify_failure(
        &self,
        slug: &str,
        organization_id: Uuid,
        previous: Option<&SlugHistoryEntry>,
        err: surrealdb::Error,
    ) -> DirectoryError {
        match active_binding(&self.db, slug).await {
            Ok(Some(holder)) if holder != organization_id => {
                warn!(slug = %slug, holder = %holder, "Slug claimed concurrently");
                return slug_taken(slug, holder);
            }
            Err(read_err) => return read_err.into(),
            _ => {}
        }

        match open_entry(&self.db, organization_id).await {
            Ok(current) if current.as_ref().map(|e| e.id) != previous.map(|e| e.id) => {
                DirectoryError::Conflict {
                    entity: "slug".into(),
                    reason: format!(
                        "slug binding of organization {organization_id} changed concurrently"
                    ),
                }
            }
            Ok(_) => DbError::query("bind_slug", "slug", slug)(err).into(),
            Err(read_err) => read_err.into(),
        }
    }
}

impl<C: Connection> SlugRepository for SurrealSlugRepository<C> {
    async fn find_active(&self, slug: &str) -> DirectoryResult<Option<Uuid>> {
        Ok(active_binding(&self.db, slug).await?)
    }

    async fn bind(&self, slug: &str, organization_id: Uuid) -> DirectoryResult<SlugHistoryEntry> {
        organization_exists(&self.db, organization_id).await?;

        let current = open_entry(&self.db, organization_id).await?;
        match active_binding(&self.db, slug).await? {
            Some(holder) if holder == organization_id => {
                if let Some(entry) = &current {
                    debug!(slug = %slug, organization_id = %organization_id, "Slug already bound");
                    return Ok(entry.clone());
                }
            }
            Some(holder) => return Err(slug_taken(slug, holder)),
            None => {}
        }
        if let Some(entry) = &current {
            return Err(DirectoryError::Conflict {
                entity: "slug".into(),
                reason: format!(
                    "organization {organization_id} is already bound to '{}'",
                    entry.slug
                ),
            });
        }

        let history_id = Uuid::new_v4().to_string();
        let response = self
            .db
            .query(
                "BEGIN TRANSACTION; \
                 CREATE type::record('slug_binding', $slug) SET \
                     organization_id = $org_id, history_id = $history_id; \
                 CREATE type::record('slug_history', $history_id) SET \
                     slug = $slug, organization_id = $org_id, \
                     started_at = time::now(), ended_at = NONE; \
                 UPDATE type::record('organization', $org_id) SET \
                     slug = $slug, updated_at = time::now(); \
                 COMMIT TRANSACTION;",
            )
            .bind(("slug", slug.to_string()))
            .bind(("org_id", organization_id.to_string()))
            .bind(("history_id", history_id))
            .await
            .map_err(DbError::query("bind_slug", "slug", slug))?;

        if let Err(err) = response.check() {
            return Err(self.classify_failure(slug, organization_id, None, err).await);
        }

        info!(slug = %slug, organization_id = %organization_id, "Slug bound");

        open_entry(&self.db, organization_id)
            .await?
            .ok_or_else(|| DbError::not_found("slug binding", organization_id).into())
    }

    async fn rebind(&self, organization_id: Uuid, new_slug: &str) -> DirectoryResult<SlugHistoryEntry> {
        organization_exists(&self.db, organization_id).await?;

        let previous = open_entry(&self.db, organization_id).await?;
        match active_binding(&self.db, new_slug).await? {
            Some(holder) if holder != organization_id => {
                return Err(slug_taken(new_slug, holder));
            }
            Some(_) => {
                if let Some(entry) = &previous {
                    debug!(slug = %new_slug, organization_id = %organization_id, "Rebind to current slug is a no-op");
                    return Ok(entry.clone());
                }
            }
            None => {}
        }

        let history_id = Uuid::new_v4().to_string();
        let response = self
            .db
            .query(
                "BEGIN TRANSACTION; \
                 UPDATE slug_history SET ended_at = time::now() \
                     WHERE organization_id = $org_id AND ended_at = NONE; \
                 DELETE slug_binding WHERE organization_id = $org_id; \
                 CREATE type::record('slug_binding', $slug) SET \
                     organization_id = $org_id, history_id = $history_id; \
                 CREATE type::record('slug_history', $history_id) SET \
                     slug = $slug, organization_id = $org_id, \
                     started_at = time::now(), ended_at = NONE; \
                 UPDATE type::record('organization', $org_id) SET \
                     slug = $slug, updated_at = time::now(); \
                 COMMIT TRANSACTION;",
            )
            .bind(("slug", new_slug.to_string()))
            .bind(("org_id", organization_id.to_string()))
            .bind(("history_id", history_id))
            .await
            .map_err(DbError::query("rebind_slug", "slug", new_slug))?;

        if let Err(err) = response.check() {
            return Err(self
                .classify_failure(new_slug, organization_id, previous.as_ref(), err)
                .await);
        }

        info!(
            organization_id = %organization_id,
            from = previous.as_ref().map(|e| e.slug.as_str()).unwrap_or(""),
            to = %new_slug,
            "Slug rebound"
        );

        open_entry(&self.db, organization_id)
            .await?
            .ok_or_else(|| DbError::not_found("slug binding", organization_id).into())
    }

    async fn history(&self, slug: &str) -> DirectoryResult<Vec<SlugHistoryEntry>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM slug_history \
                 WHERE slug = $slug \
                 ORDER BY started_at DESC",
            )
            .bind(("slug", slug.to_string()))
            .await
            .map_err(DbError::query("slug_history", "slug", slug))?;

        let rows: Vec<HistoryRowWithId> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .map(|row| SlugHistoryEntry::try_from(row).map_err(Into::into))
            .collect()
    }

    async fn current(&self, organization_id: Uuid) -> DirectoryResult<Option<SlugHistoryEntry>> {
        Ok(open_entry(&self.db, organization_id).await?)
    }
}
