//! Tenant storage routing.
//!
//! Routing is read from persisted state on every call, so a tenant moved to
//! a different strategy is routed correctly on its next request.

use orgdir_core::error::{DirectoryError, DirectoryResult};
use orgdir_core::models::tenant::{StorageStrategy, TenantBinding};
use orgdir_core::repository::{TenantBindingInput, TenantBindingRepository};
use tracing::{debug, error};
use uuid::Uuid;

use crate::config::DirectoryConfig;
use crate::deadline::bounded;

/// Selects the storage binding for a resolved organization.
#[derive(Clone)]
pub struct TenantRouter<T: TenantBindingRepository> {
    repo: T,
    config: DirectoryConfig,
}

impl<T: TenantBindingRepository> TenantRouter<T> {
    pub fn new(repo: T, config: DirectoryConfig) -> Self {
        Self { repo, config }
    }

    /// Binding to execute the rest of the request against.
    ///
    /// Only `shared` bindings are executable. An `isolated` binding is a
    /// fatal configuration error for the request.
    pub async fn binding_for(&self, organization_id: Uuid) -> DirectoryResult<TenantBinding> {
        let binding = self.describe(organization_id).await?;

        match binding.strategy {
            StorageStrategy::Shared => {
                debug!(
                    organization_id = %organization_id,
                    connection = %binding.connection,
                    "Routing to shared storage"
                );
                Ok(binding)
            }
            StorageStrategy::Isolated => {
                error!(
                    organization_id = %organization_id,
                    "Tenant is bound to isolated storage, which cannot be executed"
                );
                Err(DirectoryError::UnsupportedConfiguration {
                    reason: format!(
                        "organization {organization_id} uses the '{}' storage strategy",
                        binding.strategy
                    ),
                })
            }
        }
    }

    /// The persisted binding, whatever its strategy.
    pub async fn describe(&self, organization_id: Uuid) -> DirectoryResult<TenantBinding> {
        bounded(
            self.config.operation_timeout,
            "tenant_binding",
            self.repo.get(organization_id),
        )
        .await
    }
}

/// Administrative changes to tenant bindings, kept apart from the
/// read-only router.
#[derive(Clone)]
pub struct TenantBindingAdmin<T: TenantBindingRepository> {
    repo: T,
    config: DirectoryConfig,
}

impl<T: TenantBindingRepository> TenantBindingAdmin<T> {
    pub fn new(repo: T, config: DirectoryConfig) -> Self {
        Self { repo, config }
    }

    /// Moves a tenant to `strategy` with the given connection descriptor.
    pub async fn migrate(
        &self,
        organization_id: Uuid,
        strategy: StorageStrategy,
        connection: &str,
    ) -> DirectoryResult<TenantBinding> {
        if connection.trim().is_empty() {
            return Err(DirectoryError::validation(
                "connection descriptor must not be empty",
            ));
        }

        bounded(
            self.config.operation_timeout,
            "migrate_tenant",
            self.repo.update(
                organization_id,
                TenantBindingInput {
                    strategy,
                    connection: connection.to_string(),
                },
            ),
        )
        .await
    }
}
