//! Slug resolution and binding history.

use orgdir_core::error::{DirectoryError, DirectoryResult};
use orgdir_core::models::slug::{SlugHistoryEntry, SlugStatus};
use orgdir_core::repository::SlugRepository;
use tracing::debug;
use uuid::Uuid;

use crate::config::DirectoryConfig;
use crate::deadline::bounded;
use crate::validation::validate_slug;

/// Maps human-readable slugs to organization identities.
///
/// At most one binding per slug is open at any time; closed bindings stay
/// in the history for audit and availability reporting.
#[derive(Clone)]
pub struct SlugDirectory<S: SlugRepository> {
    repo: S,
    config: DirectoryConfig,
}

impl<S: SlugRepository> SlugDirectory<S> {
    pub fn new(repo: S, config: DirectoryConfig) -> Self {
        Self { repo, config }
    }

    /// Organization currently bound to `slug`.
    pub async fn resolve(&self, slug: &str) -> DirectoryResult<Uuid> {
        validate_slug(slug, &self.config)?;
        bounded(self.config.operation_timeout, "resolve_slug", async {
            let organization_id = self
                .repo
                .find_active(slug)
                .await?
                .ok_or_else(|| DirectoryError::not_found("slug", slug))?;
            debug!(slug = %slug, organization_id = %organization_id, "Slug resolved");
            Ok(organization_id)
        })
        .await
    }

    /// Opens the first binding for an organization. Re-binding the slug an
    /// organization already holds returns the open entry.
    pub async fn bind(&self, slug: &str, organization_id: Uuid) -> DirectoryResult<SlugHistoryEntry> {
        validate_slug(slug, &self.config)?;
        bounded(
            self.config.operation_timeout,
            "bind_slug",
            self.repo.bind(slug, organization_id),
        )
        .await
    }

    /// Closes the organization's open binding and opens one for `new_slug`
    /// atomically.
    pub async fn rebind(
        &self,
        organization_id: Uuid,
        new_slug: &str,
    ) -> DirectoryResult<SlugHistoryEntry> {
        validate_slug(new_slug, &self.config)?;
        bounded(
            self.config.operation_timeout,
            "rebind_slug",
            self.repo.rebind(organization_id, new_slug),
        )
        .await
    }

    /// Every binding `slug` has had, most recent first.
    pub async fn history(&self, slug: &str) -> DirectoryResult<Vec<SlugHistoryEntry>> {
        validate_slug(slug, &self.config)?;
        bounded(
            self.config.operation_timeout,
            "slug_history",
            self.repo.history(slug),
        )
        .await
    }

    pub async fn status(&self, slug: &str) -> DirectoryResult<SlugStatus> {
        validate_slug(slug, &self.config)?;
        let holder = bounded(
            self.config.operation_timeout,
            "slug_status",
            self.repo.find_active(slug),
        )
        .await?;

        Ok(SlugStatus {
            slug: slug.to_string(),
            available: holder.is_none(),
            organization_id: holder,
        })
    }

    /// The organization's open binding, if it has one.
    pub async fn current(&self, organization_id: Uuid) -> DirectoryResult<Option<SlugHistoryEntry>> {
        bounded(
            self.config.operation_timeout,
            "current_slug",
            self.repo.current(organization_id),
        )
        .await
    }
}
