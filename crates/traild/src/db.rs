use sqlx::postgres::{PgPoolOptions, PgRow};

use crate::config::Config;

/// PostgreSQL connection pool type alias.
pub type PgPool = sqlx::PgPool;
pub type Row = PgRow;

/// Create a bounded PostgreSQL connection pool from the configuration.
pub async fn create_pool(config: &Config) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(config.database_connect_timeout)
        .idle_timeout(config.database_idle_timeout)
        .connect(&config.database_url)
        .await
}
