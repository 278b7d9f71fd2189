//! Schema definitions and migration runner for SurrealDB.
//!
//! Tables are SCHEMAFULL. UUIDs are stored as strings, and records whose
//! identity is a natural key (a unit's parent edge, a membership pair, an
//! active slug) use that key as the record id so that uniqueness is enforced
//! by the store itself.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
    #[allow(dead_code)]
    name: String,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "directory_schema",
    sql: SCHEMA_V1,
}];

// -----------------------------------------------------------------------
// Schema v1
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Organizations (tenant roots)
-- =======================================================================
DEFINE TABLE organization SCHEMAFULL;
DEFINE FIELD name ON TABLE organization TYPE string;
DEFINE FIELD description ON TABLE organization TYPE string;
DEFINE FIELD slug ON TABLE organization TYPE string;
DEFINE FIELD owner_id ON TABLE organization TYPE string;
DEFINE FIELD metadata ON TABLE organization TYPE object FLEXIBLE \
    DEFAULT {};
DEFINE FIELD created_at ON TABLE organization TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE organization TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_organization_slug ON TABLE organization \
    COLUMNS slug UNIQUE;

-- =======================================================================
-- Units (organization scope; the default unit shares the org id)
-- =======================================================================
DEFINE TABLE unit SCHEMAFULL;
DEFINE FIELD organization_id ON TABLE unit TYPE string;
DEFINE FIELD name ON TABLE unit TYPE string;
DEFINE FIELD description ON TABLE unit TYPE string;
DEFINE FIELD metadata ON TABLE unit TYPE object FLEXIBLE DEFAULT {};
DEFINE FIELD is_default ON TABLE unit TYPE bool DEFAULT false;
DEFINE FIELD created_at ON TABLE unit TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE unit TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_unit_organization ON TABLE unit \
    COLUMNS organization_id;

-- =======================================================================
-- Parent/child edges, keyed by child unit id
-- parent_id = NONE marks the default unit's root edge.
-- =======================================================================
DEFINE TABLE unit_edge SCHEMAFULL;
DEFINE FIELD child_id ON TABLE unit_edge TYPE string;
DEFINE FIELD parent_id ON TABLE unit_edge TYPE option<string>;
DEFINE FIELD organization_id ON TABLE unit_edge TYPE string;
DEFINE FIELD created_at ON TABLE unit_edge TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_unit_edge_parent ON TABLE unit_edge \
    COLUMNS parent_id;
DEFINE INDEX idx_unit_edge_organization ON TABLE unit_edge \
    COLUMNS organization_id;

-- =======================================================================
-- Hierarchy revision, keyed by organization id
-- Bumped by every write that depends on unit existence or placement.
-- =======================================================================
DEFINE TABLE hierarchy_revision SCHEMAFULL;
DEFINE FIELD revision ON TABLE hierarchy_revision TYPE int DEFAULT 0;

-- =======================================================================
-- Memberships, keyed by (unit, member)
-- =======================================================================
DEFINE TABLE membership SCHEMAFULL;
DEFINE FIELD unit_id ON TABLE membership TYPE string;
DEFINE FIELD member_id ON TABLE membership TYPE string;
DEFINE FIELD organization_id ON TABLE membership TYPE string;
DEFINE FIELD created_at ON TABLE membership TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_membership_unit ON TABLE membership COLUMNS unit_id;
DEFINE INDEX idx_membership_member ON TABLE membership \
    COLUMNS member_id;

-- =======================================================================
-- Slug history (append-only) and active slug bindings (keyed by slug)
-- =======================================================================
DEFINE TABLE slug_history SCHEMAFULL
    PERMISSIONS
        FOR create FULL
        FOR select FULL
        FOR update FULL
        FOR delete NONE;
DEFINE FIELD slug ON TABLE slug_history TYPE string;
DEFINE FIELD organization_id ON TABLE slug_history TYPE string;
DEFINE FIELD started_at ON TABLE slug_history TYPE datetime;
DEFINE FIELD ended_at ON TABLE slug_history TYPE option<datetime>;
DEFINE INDEX idx_slug_history_slug ON TABLE slug_history \
    COLUMNS slug, started_at;
DEFINE INDEX idx_slug_history_org ON TABLE slug_history \
    COLUMNS organization_id;

DEFINE TABLE slug_binding SCHEMAFULL;
DEFINE FIELD organization_id ON TABLE slug_binding TYPE string;
DEFINE FIELD history_id ON TABLE slug_binding TYPE string;
DEFINE FIELD bound_at ON TABLE slug_binding TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_slug_binding_org ON TABLE slug_binding \
    COLUMNS organization_id UNIQUE;

-- =======================================================================
-- Tenant storage bindings, keyed by organization id
-- =======================================================================
DEFINE TABLE tenant_binding SCHEMAFULL;
DEFINE FIELD strategy ON TABLE tenant_binding TYPE string \
    ASSERT $value IN ['shared', 'isolated'];
DEFINE FIELD connection ON TABLE tenant_binding TYPE string;
DEFINE FIELD created_at ON TABLE tenant_binding TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE tenant_binding TYPE datetime \
    DEFAULT time::now();

-- =======================================================================
-- Members (identity collaborator backing table)
-- =======================================================================
DEFINE TABLE member SCHEMAFULL;
DEFINE FIELD email ON TABLE member TYPE string;
DEFINE FIELD display_name ON TABLE member TYPE string;
DEFINE FIELD created_at ON TABLE member TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_member_email ON TABLE member COLUMNS email UNIQUE;
";

// -----------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------

/// Run all pending migrations against the given SurrealDB client.
///
/// Creates a `_migration` tracking table on first run, then applies
/// each migration whose version exceeds the current maximum.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    let mut result = db
        .query("SELECT * FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    let current_version = records.first().map(|m| m.version).unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        db.query(migration.sql).await?.check().map_err(|e| {
            DbError::Migration(format!(
                "Migration v{} '{}' failed: {}",
                migration.version, migration.name, e,
            ))
        })?;

        db.query(
            "CREATE _migration SET version = $version, \
             name = $name",
        )
        .bind(("version", migration.version))
        .bind(("name", migration.name))
        .await?
        .check()
        .map_err(|e| {
            DbError::Migration(format!(
                "Failed to record migration v{}: {}",
                migration.version, e,
            ))
        })?;

        info!(version = migration.version, "Migration applied");
    }

    Ok(())
}

/// Returns the raw schema DDL for version 1.
pub fn schema_v1() -> &'static str {
    SCHEMA_V1
}
