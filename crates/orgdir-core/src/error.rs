//! Error types for the organization directory.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    /// An id or slug does not resolve, or resolves to the wrong kind.
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    /// A slug is already bound elsewhere, or a concurrent write won a race.
    #[error("Conflict on {entity}: {reason}")]
    Conflict { entity: String, reason: String },

    /// The operation would break a directory invariant (default-unit
    /// permanence, hierarchy consistency).
    #[error("Invariant violation: {reason}")]
    InvariantViolation { reason: String },

    /// A tenant binding names a storage strategy that cannot be executed.
    #[error("Unsupported configuration: {reason}")]
    UnsupportedConfiguration { reason: String },

    /// Storage or the identity collaborator failed or timed out.
    #[error("Upstream failure during {operation}: {reason}")]
    UpstreamFailure { operation: String, reason: String },

    #[error("Validation error: {message}")]
    Validation { message: String },
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

impl DirectoryError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn invariant(reason: impl Into<String>) -> Self {
        Self::InvariantViolation {
            reason: reason.into(),
        }
    }

    /// A structural write lost a race with another write to the same
    /// organization's hierarchy. The caller re-validates and tries again.
    pub fn hierarchy_moved(organization_id: impl ToString) -> Self {
        Self::Conflict {
            entity: "hierarchy".into(),
            reason: format!(
                "hierarchy of organization {} changed concurrently",
                organization_id.to_string()
            ),
        }
    }

    pub fn is_hierarchy_conflict(&self) -> bool {
        matches!(self, Self::Conflict { entity, .. } if entity == "hierarchy")
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::InvariantViolation { .. } => "invariant_violation",
            Self::UnsupportedConfiguration { .. } => "unsupported_configuration",
            Self::UpstreamFailure { .. } => "upstream_failure",
            Self::Validation { .. } => "validation",
        }
    }

    /// Message that is safe to hand to API clients.
    ///
    /// Upstream failures carry storage error text in `reason`; that text is
    /// kept for logs and replaced here with a generic message.
    pub fn public_message(&self) -> String {
        match self {
            Self::UpstreamFailure { .. } => "A dependent service is unavailable".into(),
            Self::UnsupportedConfiguration { .. } => {
                "The tenant's storage configuration is not supported".into()
            }
            other => other.to_string(),
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamFailure { .. })
    }
}
