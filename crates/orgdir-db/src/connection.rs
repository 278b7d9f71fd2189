//! Connection to the directory's SurrealDB instance.

use std::env;
use std::fmt;

use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use tracing::info;

use crate::error::DbError;
use crate::schema::run_migrations;

/// Where the directory's tables live and how to sign in.
#[derive(Clone)]
pub struct DbConfig {
    /// WebSocket address, `host:port`.
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "127.0.0.1:8000".into(),
            namespace: "orgdir".into(),
            database: "directory".into(),
            username: "root".into(),
            password: "root".into(),
        }
    }
}

// The password stays out of logs.
impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("url", &self.url)
            .field("namespace", &self.namespace)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl DbConfig {
    /// Reads `ORGDIR_DB_URL`, `ORGDIR_DB_NAMESPACE`, `ORGDIR_DB_DATABASE`,
    /// `ORGDIR_DB_USER` and `ORGDIR_DB_PASSWORD`, keeping the default for
    /// any that is unset or blank.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let read = |key: &str, default: String| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(default)
        };

        Self {
            url: read("ORGDIR_DB_URL", defaults.url),
            namespace: read("ORGDIR_DB_NAMESPACE", defaults.namespace),
            database: read("ORGDIR_DB_DATABASE", defaults.database),
            username: read("ORGDIR_DB_USER", defaults.username),
            password: read("ORGDIR_DB_PASSWORD", defaults.password),
        }
    }
}

/// Handle on the directory database.
#[derive(Clone)]
pub struct DbManager {
    db: Surreal<Client>,
}

impl DbManager {
    /// Signs in as root and selects the directory namespace and database.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            url = %config.url,
            namespace = %config.namespace,
            database = %config.database,
            "Connecting to directory database"
        );

        let db = Surreal::new::<Ws>(&config.url).await?;
        db.signin(Root {
            username: config.username.clone(),
            password: config.password.clone(),
        })
        .await?;
        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await?;

        Ok(Self { db })
    }

    /// [`connect`](Self::connect), then bring the schema up to date. The
    /// directory services expect every table to exist.
    pub async fn open(config: &DbConfig) -> Result<Self, DbError> {
        let manager = Self::connect(config).await?;
        run_migrations(&manager.db).await?;
        info!(database = %config.database, "Directory database ready");
        Ok(manager)
    }

    pub fn client(&self) -> &Surreal<Client> {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn lookup_overrides_defaults_and_ignores_blanks() {
        let vars = HashMap::from([
            ("ORGDIR_DB_URL", "db.internal:8000"),
            ("ORGDIR_DB_NAMESPACE", "  "),
            ("ORGDIR_DB_PASSWORD", "s3cret"),
        ]);
        let config = DbConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.url, "db.internal:8000");
        assert_eq!(config.namespace, "orgdir");
        assert_eq!(config.database, "directory");
        assert_eq!(config.password, "s3cret");
    }

    #[test]
    fn debug_output_hides_password() {
        let config = DbConfig {
            password: "s3cret".into(),
            ..Default::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }
}
