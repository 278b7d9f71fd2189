//! Organization directory server entry point.

use std::process::ExitCode;

use orgdir_db::{DbConfig, DbManager};
use orgdir_directory::DirectoryConfig;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is normal outside development.
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("orgdir=info".parse().unwrap()))
        .json()
        .init();

    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }

    info!("Starting organization directory...");

    let directory_config = match DirectoryConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Invalid directory configuration");
            return ExitCode::FAILURE;
        }
    };

    let db_config = DbConfig::from_env();
    let _db = match DbManager::open(&db_config).await {
        Ok(db) => db,
        Err(err) => {
            error!(error = %err, config = ?db_config, "Failed to open directory database");
            return ExitCode::FAILURE;
        }
    };

    info!(
        operation_timeout_ms = directory_config.operation_timeout.as_millis() as u64,
        max_hierarchy_depth = directory_config.max_hierarchy_depth,
        default_connection = %directory_config.default_connection,
        "Organization directory ready"
    );

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to listen for shutdown signal");
    }

    info!("Organization directory stopped.");
    ExitCode::SUCCESS
}
