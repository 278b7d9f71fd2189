//! Database-specific error types and conversions.

use orgdir_core::error::DirectoryError;
use uuid::Uuid;

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    /// A statement failed; carries enough context to log and trace.
    #[error("{operation} failed for {entity} {key}: {source}")]
    Query {
        operation: &'static str,
        entity: &'static str,
        key: String,
        #[source]
        source: surrealdb::Error,
    },

    #[error("Stored value could not be decoded: {0}")]
    Decode(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Conflict on {entity}: {reason}")]
    Conflict { entity: String, reason: String },
}

impl DbError {
    /// Builds a mapper that wraps a SurrealDB error with operation context.
    ///
    /// ```ignore
    /// db.query(q).await.map_err(DbError::query("create_unit", "unit", &id))?;
    /// ```
    pub fn query(
        operation: &'static str,
        entity: &'static str,
        key: impl ToString,
    ) -> impl FnOnce(surrealdb::Error) -> DbError {
        let key = key.to_string();
        move |source| DbError::Query {
            operation,
            entity,
            key,
            source,
        }
    }

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }
}

impl From<DbError> for DirectoryError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => DirectoryError::NotFound { entity, id },
            DbError::Conflict { entity, reason } => DirectoryError::Conflict { entity, reason },
            DbError::Query {
                operation,
                entity,
                key,
                source,
            } => DirectoryError::UpstreamFailure {
                operation: operation.to_string(),
                reason: format!("{entity} {key}: {source}"),
            },
            other => DirectoryError::UpstreamFailure {
                operation: "storage".into(),
                reason: other.to_string(),
            },
        }
    }
}

/// Parses a UUID stored as a string column.
pub(crate) fn parse_uuid(value: &str, what: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(value).map_err(|e| DbError::Decode(format!("invalid {what} UUID: {e}")))
}
