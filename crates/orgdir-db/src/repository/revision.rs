//! Per-organization hierarchy revision.
//!
//! `hierarchy_revision:<org_id>` is a counter bumped by every write that
//! depends on a unit existing or on where it sits: creating or deleting a
//! unit, moving an edge, adding a membership. Writes that validate the tree
//! outside the store (cycle and depth checks) carry the revision they read
//! and abort when it moved. The rest only bump it, which makes two such
//! writes on one organization collide in the store instead of interleaving.

use orgdir_core::error::DirectoryError;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::DbError;

/// Attempts for writes that retry on their own after losing a race.
pub(crate) const MAX_ATTEMPTS: usize = 5;

/// Reads the current revision into `$revision`, then bumps it.
pub(crate) const BUMP: &str = "\
LET $revision = array::first((SELECT VALUE revision FROM \
    type::record('hierarchy_revision', $org_id))) ?? 0; \
UPSERT type::record('hierarchy_revision', $org_id) SET \
    revision = $revision + 1;";

/// Aborts the enclosing transaction unless the revision still equals
/// `$expected_revision`, then bumps it.
pub(crate) const COMPARE_AND_BUMP: &str = "\
LET $revision = array::first((SELECT VALUE revision FROM \
    type::record('hierarchy_revision', $org_id))) ?? 0; \
IF $revision != $expected_revision { \
    THROW 'hierarchy revision moved'; \
}; \
UPSERT type::record('hierarchy_revision', $org_id) SET \
    revision = $revision + 1;";

#[derive(Debug, SurrealValue)]
struct RevisionRow {
    revision: i64,
}

pub(crate) async fn current<C: Connection>(
    db: &Surreal<C>,
    organization_id: Uuid,
) -> Result<i64, DbError> {
    let org_id_str = organization_id.to_string();

    let mut result = db
        .query("SELECT revision FROM type::record('hierarchy_revision', $org_id)")
        .bind(("org_id", org_id_str.clone()))
        .await
        .map_err(DbError::query("hierarchy_revision", "organization", &org_id_str))?;

    let rows: Vec<RevisionRow> = result.take(0)?;
    Ok(rows.first().map(|row| row.revision).unwrap_or(0))
}

pub(crate) async fn unit_exists<C: Connection>(db: &Surreal<C>, id: Uuid) -> Result<bool, DbError> {
    let id_str = id.to_string();

    let mut result = db
        .query("SELECT VALUE meta::id(id) FROM type::record('unit', $id)")
        .bind(("id", id_str.clone()))
        .await
        .map_err(DbError::query("unit_exists", "unit", &id_str))?;

    let rows: Vec<String> = result.take(0)?;
    Ok(!rows.is_empty())
}

/// The error a compare-and-bump write returns after losing a race.
pub(crate) fn moved(organization_id: Uuid) -> DirectoryError {
    DirectoryError::hierarchy_moved(organization_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moved_is_a_hierarchy_conflict() {
        let err = moved(Uuid::new_v4());
        assert_eq!(err.code(), "conflict");
        assert!(err.is_hierarchy_conflict());
        assert!(
            !DirectoryError::Conflict {
                entity: "slug".into(),
                reason: "taken".into(),
            }
            .is_hierarchy_conflict()
        );
    }

    #[test]
    fn compare_and_bump_checks_before_writing() {
        let check = COMPARE_AND_BUMP.find("THROW").unwrap();
        let write = COMPARE_AND_BUMP.find("UPSERT").unwrap();
        assert!(check < write);
    }
}
