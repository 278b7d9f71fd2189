//! Organization directory services: slug resolution, tenant routing, the
//! organization/unit hierarchy, membership and recipient resolution.
//!
//! Every service is generic over the `orgdir-core` repository traits and
//! runs each operation under [`DirectoryConfig::operation_timeout`].

pub mod config;
pub mod context;
mod deadline;
pub mod hierarchy;
pub mod membership;
pub mod recipients;
pub mod slug;
pub mod tenant;
pub mod validation;

pub use config::DirectoryConfig;
pub use context::{RequestResolver, RequestScope};
pub use hierarchy::HierarchyStore;
pub use membership::MembershipResolver;
pub use recipients::RecipientResolver;
pub use slug::SlugDirectory;
pub use tenant::{TenantBindingAdmin, TenantRouter};
