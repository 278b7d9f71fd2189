//! Per-request tenant resolution: slug to organization to storage binding.

use orgdir_core::error::{DirectoryError, DirectoryResult};
use orgdir_core::models::tenant::TenantBinding;
use orgdir_core::repository::{SlugRepository, TenantBindingRepository};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::slug::SlugDirectory;
use crate::tenant::TenantRouter;

/// Tenant context established before any domain logic runs.
#[derive(Debug, Clone, Serialize)]
pub struct RequestScope {
    pub organization_id: Uuid,
    pub binding: TenantBinding,
}

/// Hot-path composition of [`SlugDirectory`] and [`TenantRouter`].
#[derive(Clone)]
pub struct RequestResolver<S: SlugRepository, T: TenantBindingRepository> {
    slugs: SlugDirectory<S>,
    router: TenantRouter<T>,
}

impl<S: SlugRepository, T: TenantBindingRepository> RequestResolver<S, T> {
    pub fn new(slugs: SlugDirectory<S>, router: TenantRouter<T>) -> Self {
        Self { slugs, router }
    }

    /// A request without a slug is a client error; there is no default
    /// tenant.
    pub async fn resolve(&self, slug: Option<&str>) -> DirectoryResult<RequestScope> {
        let slug = slug
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DirectoryError::validation("request does not name a tenant slug"))?;

        let organization_id = self.slugs.resolve(slug).await?;
        let binding = self.router.binding_for(organization_id).await?;

        debug!(
            slug = %slug,
            organization_id = %organization_id,
            strategy = %binding.strategy,
            "Request scope resolved"
        );
        Ok(RequestScope {
            organization_id,
            binding,
        })
    }
}
