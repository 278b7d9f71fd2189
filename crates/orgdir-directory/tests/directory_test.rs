//! Integration tests for the directory services over in-memory SurrealDB.

use orgdir_core::models::member::CreateMember;
use orgdir_core::models::node::{DirectoryNode, NodeKind, UpdateNode};
use orgdir_core::models::organization::{CreateOrganization, Organization};
use orgdir_core::models::tenant::StorageStrategy;
use orgdir_core::models::unit::{CreateUnit, Unit, UnitPlacement};
use orgdir_core::repository::{MemberDirectory, Pagination};
use orgdir_db::repository::{
    SurrealMemberDirectory, SurrealMembershipRepository, SurrealOrganizationRepository,
    SurrealSlugRepository, SurrealTenantBindingRepository, SurrealUnitRepository,
};
use orgdir_directory::{
    DirectoryConfig, HierarchyStore, MembershipResolver, RecipientResolver, RequestResolver,
    SlugDirectory, TenantBindingAdmin, TenantRouter,
};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

struct Directory {
    hierarchy: HierarchyStore<SurrealOrganizationRepository<Db>, SurrealUnitRepository<Db>>,
    slugs: SlugDirectory<SurrealSlugRepository<Db>>,
    router: TenantRouter<SurrealTenantBindingRepository<Db>>,
    admin: TenantBindingAdmin<SurrealTenantBindingRepository<Db>>,
    membership: MembershipResolver<
        SurrealUnitRepository<Db>,
        SurrealMembershipRepository<Db>,
        SurrealMemberDirectory<Db>,
    >,
    recipients: RecipientResolver<SurrealUnitRepository<Db>, SurrealMembershipRepository<Db>>,
    requests: RequestResolver<SurrealSlugRepository<Db>, SurrealTenantBindingRepository<Db>>,
    members: SurrealMemberDirectory<Db>,
}

/// Spin up in-memory DB, run migrations and wire every service to it.
async fn setup() -> Directory {
    setup_with(DirectoryConfig::default()).await
}

async fn setup_with(config: DirectoryConfig) -> Directory {
    let db: Surreal<Db> = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    orgdir_db::run_migrations(&db).await.unwrap();

    let orgs = SurrealOrganizationRepository::new(db.clone());
    let units = SurrealUnitRepository::new(db.clone());
    let slug_repo = SurrealSlugRepository::new(db.clone());
    let bindings = SurrealTenantBindingRepository::new(db.clone());
    let memberships = SurrealMembershipRepository::new(db.clone());
    let members = SurrealMemberDirectory::new(db.clone());

    let slugs = SlugDirectory::new(slug_repo, config.clone());
    let router = TenantRouter::new(bindings.clone(), config.clone());

    Directory {
        hierarchy: HierarchyStore::new(orgs, units.clone(), config.clone()),
        requests: RequestResolver::new(slugs.clone(), router.clone()),
        slugs,
        router,
        admin: TenantBindingAdmin::new(bindings, config.clone()),
        membership: MembershipResolver::new(
            units.clone(),
            memberships.clone(),
            members.clone(),
            config.clone(),
        ),
        recipients: RecipientResolver::new(units, memberships, config),
        members,
    }
}

impl Directory {
    async fn org(&self, name: &str, slug: &str) -> Organization {
        self.hierarchy
            .create_organization(CreateOrganization {
                name: name.into(),
                description: format!("{name} organization"),
                slug: slug.into(),
                owner_id: Uuid::new_v4(),
                metadata: None,
            })
            .await
            .unwrap()
    }

    async fn unit(&self, parent_id: Uuid, name: &str) -> Unit {
        self.hierarchy
            .create_unit(CreateUnit {
                parent_id,
                name: name.into(),
                description: String::new(),
                metadata: None,
            })
            .await
            .unwrap()
    }

    async fn member(&self, local: &str) -> Uuid {
        self.members
            .register(CreateMember {
                email: format!("{local}@example.com"),
                display_name: local.into(),
            })
            .await
            .unwrap()
            .id
    }

    async fn add(&self, kind: NodeKind, unit_id: Uuid, local: &str) {
        self.membership
            .add_member(kind, unit_id, &format!("{local}@example.com"))
            .await
            .unwrap();
    }

    /// Every attached unit points at a unit that exists, and every parent
    /// chain ends without revisiting a unit.
    async fn assert_tree_consistent(&self, organization_id: Uuid) {
        let units = self.hierarchy.list_units(organization_id).await.unwrap();
        let ids: std::collections::HashSet<Uuid> = units.iter().map(|u| u.id).collect();

        for unit in &units {
            if let UnitPlacement::Attached { parent_id } = unit.placement {
                assert!(ids.contains(&parent_id), "unit {} has a dangling edge", unit.id);
            }
            let chain = self.hierarchy.ancestors(unit.id).await.unwrap();
            assert!(
                chain.iter().all(|ancestor| ancestor.id != unit.id),
                "unit {} is its own ancestor",
                unit.id
            );
        }
    }
}

// -----------------------------------------------------------------------
// Hierarchy
// -----------------------------------------------------------------------

#[tokio::test]
async fn organization_with_default_unit_and_first_child() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;

    assert_eq!(alpha.default_unit.id, alpha.id);
    assert!(alpha.default_unit.is_default);
    assert!(dir.hierarchy.list_children(alpha.id).await.unwrap().is_empty());

    let eng = dir.unit(alpha.id, "eng").await;
    assert_eq!(eng.organization_id, alpha.id);
    assert_eq!(
        dir.hierarchy.list_child_ids(alpha.id).await.unwrap(),
        vec![eng.id]
    );
}

#[tokio::test]
async fn every_organization_has_exactly_one_default_unit() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;
    let eng = dir.unit(alpha.id, "eng").await;
    dir.unit(eng.id, "backend").await;

    let units = dir.hierarchy.list_units(alpha.id).await.unwrap();
    let defaults: Vec<&Unit> = units.iter().filter(|u| u.id == alpha.id).collect();
    assert_eq!(defaults.len(), 1);
    assert!(defaults[0].is_default);
    assert_eq!(units.iter().filter(|u| u.is_default).count(), 1);

    let err = dir
        .hierarchy
        .delete(alpha.id, NodeKind::Unit)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invariant_violation");
}

#[tokio::test]
async fn delete_unit_succeeds_but_default_unit_is_permanent() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;
    let eng = dir.unit(alpha.id, "eng").await;

    dir.hierarchy.delete(eng.id, NodeKind::Unit).await.unwrap();
    assert!(dir.hierarchy.list_child_ids(alpha.id).await.unwrap().is_empty());

    let err = dir
        .hierarchy
        .delete(alpha.default_unit.id, NodeKind::Unit)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invariant_violation");
    dir.hierarchy
        .get_by_id(alpha.id, NodeKind::Organization)
        .await
        .unwrap();
}

#[tokio::test]
async fn get_by_id_checks_kind() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;
    let eng = dir.unit(alpha.id, "eng").await;

    match dir.hierarchy.get_by_id(alpha.id, NodeKind::Organization).await.unwrap() {
        DirectoryNode::Organization(org) => assert_eq!(org.slug, "alpha-slug"),
        other => panic!("expected organization, got {:?}", other.kind()),
    }
    let node = dir.hierarchy.get_by_id(eng.id, NodeKind::Unit).await.unwrap();
    assert_eq!(node.kind(), NodeKind::Unit);
    assert_eq!(node.attributes().name, "eng");

    let err = dir
        .hierarchy
        .get_by_id(eng.id, NodeKind::Organization)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");

    let err = dir
        .hierarchy
        .get_by_id(Uuid::new_v4(), NodeKind::Unit)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn create_unit_requires_existing_parent() {
    let dir = setup().await;
    let err = dir
        .hierarchy
        .create_unit(CreateUnit {
            parent_id: Uuid::new_v4(),
            name: "eng".into(),
            description: String::new(),
            metadata: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn malformed_input_is_rejected_before_storage() {
    let dir = setup().await;
    let err = dir
        .hierarchy
        .create_organization(CreateOrganization {
            name: "Alpha".into(),
            description: String::new(),
            slug: "Alpha Slug".into(),
            owner_id: Uuid::new_v4(),
            metadata: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "validation");

    let err = dir
        .hierarchy
        .create_organization(CreateOrganization {
            name: "   ".into(),
            description: String::new(),
            slug: "alpha".into(),
            owner_id: Uuid::new_v4(),
            metadata: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "validation");
}

#[tokio::test]
async fn update_distinguishes_absent_from_empty() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;
    let eng = dir.unit(alpha.id, "eng").await;

    let node = dir
        .hierarchy
        .update(
            eng.id,
            NodeKind::Unit,
            UpdateNode {
                description: Some(String::new()),
                metadata: Some(serde_json::json!({"cost_center": 42})),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let attrs = node.attributes();
    assert_eq!(attrs.name, "eng");
    assert_eq!(attrs.description, "");
    assert_eq!(attrs.metadata["cost_center"], 42);

    // An empty update is a read.
    let unchanged = dir
        .hierarchy
        .update(eng.id, NodeKind::Unit, UpdateNode::default())
        .await
        .unwrap();
    assert_eq!(unchanged.attributes().metadata["cost_center"], 42);
}

#[tokio::test]
async fn reparent_moves_detaches_and_reattaches() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;
    let eng = dir.unit(alpha.id, "eng").await;
    let sales = dir.unit(alpha.id, "sales").await;
    let backend = dir.unit(eng.id, "backend").await;

    let moved = dir.hierarchy.reparent(backend.id, Some(sales.id)).await.unwrap();
    assert_eq!(moved.placement, UnitPlacement::Attached { parent_id: sales.id });
    assert_eq!(dir.hierarchy.list_child_ids(sales.id).await.unwrap(), vec![backend.id]);
    assert!(dir.hierarchy.list_child_ids(eng.id).await.unwrap().is_empty());

    let api = dir.unit(backend.id, "api").await;
    dir.hierarchy.reparent(backend.id, None).await.unwrap();
    assert_eq!(
        dir.hierarchy.placement(backend.id).await.unwrap(),
        UnitPlacement::Detached
    );
    // The detached sub-forest is intact but unreachable.
    assert!(!dir.hierarchy.is_reachable(api.id).await.unwrap());
    assert_eq!(dir.hierarchy.subtree_ids(backend.id).await.unwrap(), vec![api.id]);
    assert!(!dir.hierarchy.subtree_ids(alpha.id).await.unwrap().contains(&api.id));

    dir.hierarchy.reparent(backend.id, Some(eng.id)).await.unwrap();
    assert!(dir.hierarchy.is_reachable(api.id).await.unwrap());
    let chain: Vec<Uuid> = dir
        .hierarchy
        .ancestors(api.id)
        .await
        .unwrap()
        .iter()
        .map(|u| u.id)
        .collect();
    assert_eq!(chain, vec![backend.id, eng.id, alpha.id]);
}

#[tokio::test]
async fn reparent_rejects_cycles_cross_org_moves_and_default_unit() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;
    let beta = dir.org("beta", "beta-slug").await;
    let eng = dir.unit(alpha.id, "eng").await;
    let backend = dir.unit(eng.id, "backend").await;
    let research = dir.unit(beta.id, "research").await;

    let err = dir.hierarchy.reparent(eng.id, Some(backend.id)).await.unwrap_err();
    assert_eq!(err.code(), "invariant_violation");
    let err = dir.hierarchy.reparent(eng.id, Some(eng.id)).await.unwrap_err();
    assert_eq!(err.code(), "invariant_violation");

    let err = dir.hierarchy.reparent(eng.id, Some(research.id)).await.unwrap_err();
    assert_eq!(err.code(), "invariant_violation");

    let err = dir.hierarchy.reparent(alpha.id, None).await.unwrap_err();
    assert_eq!(err.code(), "invariant_violation");

    let err = dir
        .hierarchy
        .reparent(eng.id, Some(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");

    // Nothing moved.
    assert_eq!(
        dir.hierarchy.placement(eng.id).await.unwrap(),
        UnitPlacement::Attached { parent_id: alpha.id }
    );
}

#[tokio::test]
async fn subtree_is_breadth_first() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;
    let eng = dir.unit(alpha.id, "eng").await;
    let sales = dir.unit(alpha.id, "sales").await;
    let backend = dir.unit(eng.id, "backend").await;

    assert_eq!(
        dir.hierarchy.subtree_ids(alpha.id).await.unwrap(),
        vec![eng.id, sales.id, backend.id]
    );
    assert!(dir.hierarchy.subtree_ids(backend.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn depth_bound_is_enforced_when_writing() {
    let dir = setup_with(DirectoryConfig {
        max_hierarchy_depth: 2,
        ..Default::default()
    })
    .await;
    let org = dir.org("deep", "deep").await;
    let level_1 = dir.unit(org.id, "level-1").await;
    let level_2 = dir.unit(level_1.id, "level-2").await;

    let err = dir
        .hierarchy
        .create_unit(CreateUnit {
            parent_id: level_2.id,
            name: "level-3".into(),
            description: String::new(),
            metadata: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invariant_violation");

    // Everything the store accepted stays readable within the bound.
    assert_eq!(dir.hierarchy.ancestors(level_2.id).await.unwrap().len(), 2);
    assert!(dir.hierarchy.is_reachable(level_2.id).await.unwrap());
    assert_eq!(
        dir.hierarchy.subtree_ids(org.id).await.unwrap(),
        vec![level_1.id, level_2.id]
    );

    // Moving a two-level subtree under a depth-1 unit would reach depth 3.
    let side = dir.unit(org.id, "side").await;
    let side_child = dir.unit(side.id, "side-child").await;
    let err = dir
        .hierarchy
        .reparent(side.id, Some(level_1.id))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invariant_violation");
    assert_eq!(
        dir.hierarchy.placement(side.id).await.unwrap(),
        UnitPlacement::Attached { parent_id: org.id }
    );

    // A leaf fits.
    dir.hierarchy
        .reparent(side_child.id, Some(level_1.id))
        .await
        .unwrap();
    dir.assert_tree_consistent(org.id).await;
}

#[tokio::test]
async fn deleting_organization_releases_slug_and_keeps_history() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;
    let eng = dir.unit(alpha.id, "eng").await;
    dir.member("ann").await;
    dir.add(NodeKind::Unit, eng.id, "ann").await;

    dir.hierarchy
        .delete(alpha.id, NodeKind::Organization)
        .await
        .unwrap();

    let status = dir.slugs.status("alpha-slug").await.unwrap();
    assert!(status.available);
    assert_eq!(dir.slugs.history("alpha-slug").await.unwrap().len(), 1);
    assert!(dir.membership.list_members(eng.id).await.unwrap().is_empty());
    assert_eq!(
        dir.hierarchy
            .get_by_id(eng.id, NodeKind::Unit)
            .await
            .unwrap_err()
            .code(),
        "not_found"
    );
    let page = dir.hierarchy.list_organizations(Pagination::default()).await.unwrap();
    assert_eq!(page.total, 0);
}

// -----------------------------------------------------------------------
// Slugs and routing
// -----------------------------------------------------------------------

#[tokio::test]
async fn rebind_moves_resolution_and_records_history() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;

    dir.slugs.rebind(alpha.id, "new-slug").await.unwrap();

    let err = dir.slugs.resolve("alpha-slug").await.unwrap_err();
    assert_eq!(err.code(), "not_found");
    assert_eq!(dir.slugs.resolve("new-slug").await.unwrap(), alpha.id);

    let history = dir.slugs.history("alpha-slug").await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].ended_at.is_some());

    let current = dir.slugs.current(alpha.id).await.unwrap().unwrap();
    assert_eq!(current.slug, "new-slug");
}

#[tokio::test]
async fn status_reports_holder() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;

    let taken = dir.slugs.status("alpha-slug").await.unwrap();
    assert!(!taken.available);
    assert_eq!(taken.organization_id, Some(alpha.id));

    let free = dir.slugs.status("free-slug").await.unwrap();
    assert!(free.available);
    assert_eq!(free.organization_id, None);
}

#[tokio::test]
async fn bind_conflicts_with_other_holder() {
    let dir = setup().await;
    dir.org("alpha", "alpha-slug").await;
    let beta = dir.org("beta", "beta-slug").await;

    let err = dir.slugs.bind("alpha-slug", beta.id).await.unwrap_err();
    assert_eq!(err.code(), "conflict");
    let entry = dir.slugs.bind("beta-slug", beta.id).await.unwrap();
    assert!(entry.is_open());
}

#[tokio::test]
async fn concurrent_rebinds_to_one_slug_yield_one_winner() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;
    let beta = dir.org("beta", "beta-slug").await;

    let (a, b) = tokio::join!(
        dir.slugs.rebind(alpha.id, "contested"),
        dir.slugs.rebind(beta.id, "contested"),
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = outcomes.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(loser.code(), "conflict");

    let open = dir
        .slugs
        .history("contested")
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.is_open())
        .count();
    assert_eq!(open, 1);
}

#[tokio::test]
async fn concurrent_rebinds_of_one_org_keep_single_open_entries() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;

    let _ = tokio::join!(
        dir.slugs.rebind(alpha.id, "first-slug"),
        dir.slugs.rebind(alpha.id, "second-slug"),
    );

    for slug in ["alpha-slug", "first-slug", "second-slug"] {
        let open = dir
            .slugs
            .history(slug)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.is_open())
            .count();
        assert!(open <= 1, "{slug} has {open} open entries");
    }

    let current = dir.slugs.current(alpha.id).await.unwrap().unwrap();
    assert_eq!(dir.slugs.resolve(&current.slug).await.unwrap(), alpha.id);
}

#[tokio::test]
async fn router_serves_shared_and_refuses_isolated() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;

    let binding = dir.router.binding_for(alpha.id).await.unwrap();
    assert_eq!(binding.strategy, StorageStrategy::Shared);
    assert_eq!(binding.connection, "primary");

    dir.admin
        .migrate(alpha.id, StorageStrategy::Isolated, "ws://alpha-db:8000")
        .await
        .unwrap();

    let err = dir.router.binding_for(alpha.id).await.unwrap_err();
    assert_eq!(err.code(), "unsupported_configuration");
    assert!(!err.is_retryable());

    let raw = dir.router.describe(alpha.id).await.unwrap();
    assert_eq!(raw.strategy, StorageStrategy::Isolated);

    dir.admin
        .migrate(alpha.id, StorageStrategy::Shared, "primary")
        .await
        .unwrap();
    assert!(dir.router.binding_for(alpha.id).await.is_ok());
}

#[tokio::test]
async fn request_resolution_requires_a_known_slug() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;

    let scope = dir.requests.resolve(Some("alpha-slug")).await.unwrap();
    assert_eq!(scope.organization_id, alpha.id);
    assert_eq!(scope.binding.organization_id, alpha.id);

    assert_eq!(dir.requests.resolve(None).await.unwrap_err().code(), "validation");
    assert_eq!(
        dir.requests.resolve(Some("")).await.unwrap_err().code(),
        "validation"
    );
    assert_eq!(
        dir.requests.resolve(Some("unknown")).await.unwrap_err().code(),
        "not_found"
    );
}

// -----------------------------------------------------------------------
// Membership and recipients
// -----------------------------------------------------------------------

#[tokio::test]
async fn unit_membership_propagates_to_organization() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;
    let eng = dir.unit(alpha.id, "eng").await;
    let backend = dir.unit(eng.id, "backend").await;
    let ann = dir.member("ann").await;

    dir.add(NodeKind::Unit, backend.id, "ann").await;

    let org_members = dir.membership.list_members(alpha.id).await.unwrap();
    assert_eq!(org_members.len(), 1);
    assert_eq!(org_members[0].id, ann);
    assert_eq!(org_members[0].email.as_deref(), Some("ann@example.com"));
    // Propagation is one level: intermediate units are untouched.
    assert!(dir.membership.list_members(eng.id).await.unwrap().is_empty());

    let mut units = dir.membership.memberships_of(ann).await.unwrap();
    units.sort();
    let mut expected = vec![alpha.id, backend.id];
    expected.sort();
    assert_eq!(units, expected);
}

#[tokio::test]
async fn adding_twice_is_idempotent() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;
    let eng = dir.unit(alpha.id, "eng").await;
    dir.member("ann").await;

    let first = dir
        .membership
        .add_member(NodeKind::Unit, eng.id, "ann@example.com")
        .await
        .unwrap();
    let second = dir
        .membership
        .add_member(NodeKind::Unit, eng.id, "ann@example.com")
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(dir.membership.list_members(eng.id).await.unwrap().len(), 1);
    assert_eq!(dir.membership.list_members(alpha.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn add_member_errors() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;
    let eng = dir.unit(alpha.id, "eng").await;
    dir.member("ann").await;

    let err = dir
        .membership
        .add_member(NodeKind::Unit, eng.id, "nobody@example.com")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");

    let err = dir
        .membership
        .add_member(NodeKind::Unit, eng.id, " ")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "validation");

    // A non-default unit is not an organization.
    let err = dir
        .membership
        .add_member(NodeKind::Organization, eng.id, "ann@example.com")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");

    let err = dir
        .membership
        .add_member(NodeKind::Unit, Uuid::new_v4(), "ann@example.com")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn removal_does_not_reverse_propagation() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;
    let eng = dir.unit(alpha.id, "eng").await;
    let ann = dir.member("ann").await;
    dir.add(NodeKind::Unit, eng.id, "ann").await;

    dir.membership
        .remove_member(NodeKind::Unit, eng.id, ann)
        .await
        .unwrap();
    dir.membership
        .remove_member(NodeKind::Unit, eng.id, ann)
        .await
        .unwrap();

    assert!(dir.membership.list_members(eng.id).await.unwrap().is_empty());
    let org_members = dir.membership.list_members(alpha.id).await.unwrap();
    assert_eq!(org_members.len(), 1);

    dir.membership
        .remove_member(NodeKind::Organization, alpha.id, ann)
        .await
        .unwrap();
    assert!(dir.membership.list_members(alpha.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn organization_tag_never_removes_unit_memberships() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;
    let eng = dir.unit(alpha.id, "eng").await;
    let ann = dir.member("ann").await;
    dir.add(NodeKind::Unit, eng.id, "ann").await;

    let err = dir
        .membership
        .remove_member(NodeKind::Organization, eng.id, ann)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
    assert_eq!(dir.membership.list_members(eng.id).await.unwrap().len(), 1);

    // Unknown organization: nothing to remove.
    dir.membership
        .remove_member(NodeKind::Organization, Uuid::new_v4(), ann)
        .await
        .unwrap();
}

#[tokio::test]
async fn batched_lookup_omits_empty_units() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;
    let eng = dir.unit(alpha.id, "eng").await;
    let sales = dir.unit(alpha.id, "sales").await;
    let ann = dir.member("ann").await;
    dir.add(NodeKind::Unit, eng.id, "ann").await;

    let by_unit = dir
        .membership
        .list_members_for_units(&[eng.id, sales.id, alpha.id])
        .await
        .unwrap();
    assert_eq!(by_unit.get(&eng.id), Some(&vec![ann]));
    assert_eq!(by_unit.get(&alpha.id), Some(&vec![ann]));
    assert!(!by_unit.contains_key(&sales.id));
}

#[tokio::test]
async fn recipients_are_deduplicated_across_organizations_and_units() {
    let dir = setup().await;
    let org_a = dir.org("org a", "org-a").await;
    let org_b = dir.org("org b", "org-b").await;
    let u1 = dir.unit(org_a.id, "u1").await;
    let u2 = dir.unit(org_b.id, "u2").await;

    let a = dir.member("a").await;
    let b = dir.member("b").await;
    let c = dir.member("c").await;
    dir.add(NodeKind::Unit, u1.id, "a").await;
    dir.add(NodeKind::Unit, u1.id, "b").await;
    dir.add(NodeKind::Unit, u2.id, "b").await;
    dir.add(NodeKind::Unit, u2.id, "c").await;

    let recipients = dir
        .recipients
        .get_recipients(&[org_a.id], &[u2.id])
        .await
        .unwrap();
    // orgA's default unit holds a and b through propagation.
    assert_eq!(recipients, vec![a, b, c]);
}

#[tokio::test]
async fn recipients_never_repeat() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;
    let eng = dir.unit(alpha.id, "eng").await;
    dir.member("ann").await;
    dir.member("bob").await;
    dir.add(NodeKind::Unit, eng.id, "ann").await;
    dir.add(NodeKind::Organization, alpha.id, "bob").await;

    let recipients = dir
        .recipients
        .get_recipients(&[alpha.id, alpha.id], &[eng.id, alpha.id])
        .await
        .unwrap();
    let mut unique = recipients.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), recipients.len());
    assert_eq!(recipients.len(), 2);
}

#[tokio::test]
async fn recipients_fail_on_unknown_ids_and_accept_empty_input() {
    let dir = setup().await;
    let alpha = dir.org("alpha", "alpha-slug").await;
    let eng = dir.unit(alpha.id, "eng").await;

    assert!(dir.recipients.get_recipients(&[], &[]).await.unwrap().is_empty());

    let err = dir
        .recipients
        .get_recipients(&[alpha.id], &[Uuid::new_v4()])
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");

    // A plain unit id is not an organization id.
    let err = dir
        .recipients
        .get_recipients(&[eng.id], &[])
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");

    assert!(
        dir.recipients
            .get_recipients(&[alpha.id], &[eng.id])
            .await
            .unwrap()
            .is_empty()
    );
}

// -----------------------------------------------------------------------
// Concurrent structural writes
// -----------------------------------------------------------------------

const RACE_ROUNDS: usize = 20;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposite_reparents_never_form_a_cycle() {
    let dir = setup().await;

    for round in 0..RACE_ROUNDS {
        let org = dir.org("cycle", &format!("cycle-{round}")).await;
        let a = dir.unit(org.id, "a").await;
        let b = dir.unit(org.id, "b").await;

        let (first, second) = tokio::join!(
            dir.hierarchy.reparent(a.id, Some(b.id)),
            dir.hierarchy.reparent(b.id, Some(a.id)),
        );

        let moved = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert!(moved <= 1, "round {round}: both moves landed");
        for outcome in [&first, &second] {
            if let Err(err) = outcome {
                assert_eq!(err.code(), "invariant_violation", "round {round}: {err}");
            }
        }

        assert!(dir.hierarchy.is_reachable(a.id).await.unwrap());
        assert!(dir.hierarchy.is_reachable(b.id).await.unwrap());
        dir.assert_tree_consistent(org.id).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unit_created_under_a_parent_being_deleted_never_dangles() {
    let dir = setup().await;

    for round in 0..RACE_ROUNDS {
        let org = dir.org("dangle", &format!("dangle-{round}")).await;
        let parent = dir.unit(org.id, "parent").await;

        let (created, deleted) = tokio::join!(
            dir.hierarchy.create_unit(CreateUnit {
                parent_id: parent.id,
                name: "child".into(),
                description: String::new(),
                metadata: None,
            }),
            dir.hierarchy.delete(parent.id, NodeKind::Unit),
        );
        deleted.unwrap();

        match created {
            // Landed first, then lost its parent to the delete.
            Ok(child) => assert_eq!(
                dir.hierarchy.placement(child.id).await.unwrap(),
                UnitPlacement::Detached
            ),
            Err(err) => assert_eq!(err.code(), "not_found", "round {round}: {err}"),
        }
        dir.assert_tree_consistent(org.id).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn membership_added_to_a_unit_being_deleted_does_not_survive_it() {
    let dir = setup().await;
    dir.member("ann").await;

    for round in 0..RACE_ROUNDS {
        let org = dir.org("orphan", &format!("orphan-{round}")).await;
        let unit = dir.unit(org.id, "unit").await;

        let (added, deleted) = tokio::join!(
            dir.membership
                .add_member(NodeKind::Unit, unit.id, "ann@example.com"),
            dir.hierarchy.delete(unit.id, NodeKind::Unit),
        );
        deleted.unwrap();
        if let Err(err) = added {
            assert_eq!(err.code(), "not_found", "round {round}: {err}");
        }

        let left = dir
            .membership
            .list_members_for_units(&[unit.id])
            .await
            .unwrap();
        assert!(!left.contains_key(&unit.id), "round {round}: membership outlived its unit");
    }
}
