//! SurrealDB repository implementations.

mod member;
mod membership;
mod organization;
mod revision;
mod slug;
mod tenant_binding;
mod unit;

pub use member::SurrealMemberDirectory;
pub use membership::SurrealMembershipRepository;
pub use organization::SurrealOrganizationRepository;
pub use slug::SurrealSlugRepository;
pub use tenant_binding::SurrealTenantBindingRepository;
pub use unit::SurrealUnitRepository;
