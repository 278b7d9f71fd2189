//! Input checks applied before any storage call.

use orgdir_core::error::{DirectoryError, DirectoryResult};

use crate::config::DirectoryConfig;

/// Accepts lowercase ASCII letters, digits and single inner hyphens, within
/// the configured length bounds.
pub fn validate_slug(slug: &str, config: &DirectoryConfig) -> DirectoryResult<()> {
    let len = slug.len();
    if len < config.slug_min_length || len > config.slug_max_length {
        return Err(DirectoryError::validation(format!(
            "slug must be between {} and {} characters",
            config.slug_min_length, config.slug_max_length
        )));
    }
    if let Some(bad) = slug
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(DirectoryError::validation(format!(
            "slug contains invalid character '{bad}'"
        )));
    }
    if slug.starts_with('-') || slug.ends_with('-') {
        return Err(DirectoryError::validation(
            "slug must not start or end with '-'",
        ));
    }
    if slug.contains("--") {
        return Err(DirectoryError::validation("slug must not contain '--'"));
    }
    Ok(())
}

pub fn validate_name(name: &str) -> DirectoryResult<()> {
    if name.trim().is_empty() {
        return Err(DirectoryError::validation("name must not be empty"));
    }
    Ok(())
}

pub fn validate_identifier(identifier: &str) -> DirectoryResult<()> {
    if identifier.trim().is_empty() {
        return Err(DirectoryError::validation(
            "member identifier must not be empty",
        ));
    }
    Ok(())
}
