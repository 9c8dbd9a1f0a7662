//! SQLite connection pool and table creation.
//!
//! Tables are created if absent every time a pool is opened; there is no
//! migration history.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

const CREATE_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS facilities (
        id              TEXT PRIMARY KEY,
        name            TEXT NOT NULL,
        organization_id TEXT NOT NULL,
        created_at      TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE INDEX IF NOT EXISTS idx_facilities_organization
        ON facilities (organization_id)",
    "CREATE TABLE IF NOT EXISTS equipment (
        id             TEXT PRIMARY KEY,
        facility_id    TEXT NOT NULL REFERENCES facilities (id),
        name           TEXT NOT NULL,
        equipment_type TEXT NOT NULL,
        created_at     TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at     TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE TABLE IF NOT EXISTS maintenance_records (
        id           TEXT NOT NULL,
        equipment_id TEXT NOT NULL REFERENCES equipment (id) ON DELETE CASCADE,
        performed_at TEXT NOT NULL,
        outcome      TEXT NOT NULL,
        PRIMARY KEY (equipment_id, id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_maintenance_records_performed_at
        ON maintenance_records (equipment_id, performed_at)",
];

/// Open a pool for `database_url` and create any missing tables.
///
/// In-memory databases live inside a single connection, so their pool is
/// limited to one connection that is never recycled.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = if database_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?
    };

    create_tables(&pool).await?;
    tracing::info!("Database ready");
    Ok(pool)
}

/// Create every table and index that does not exist yet.
pub async fn create_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in CREATE_TABLES {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
