//! Database migrations and initialization.

use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

/// Stamped into `PRAGMA user_version` once the schema is applied.
pub const SCHEMA_VERSION: i64 = 2;

/// Statements that bring a database stamped `version - 1` up to `version`.
/// Fresh databases get the full `schema.sql` and skip these.
const UPGRADES: [(i64, &str); 1] = [(
    2,
    "ALTER TABLE challenges ADD COLUMN closed_at INTEGER;
     UPDATE challenges SET closed_at = bought_at WHERE bought_at IS NOT NULL",
)];

const CONNECTION_PRAGMAS: [&str; 3] = [
    "PRAGMA foreign_keys = ON",
    "PRAGMA busy_timeout = 5000",
    "PRAGMA synchronous = NORMAL",
];

/// Open (creating if needed) the link database and bring its schema up to date.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _meta| Box::pin(async move { configure_connection(conn).await }))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await?;

    run_migrations(&pool).await?;

    info!("Link database ready at {}", db_path);
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let (current,): (i64,) = sqlx::query_as("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    if current > SCHEMA_VERSION {
        return Err(sqlx::Error::Protocol(format!(
            "database schema version {} is newer than supported version {}",
            current, SCHEMA_VERSION
        )));
    }

    info!(
        "Applying schema (stored version {}, target {})",
        current, SCHEMA_VERSION
    );
    let mut tx = pool.begin().await?;
    execute_script(&mut tx, include_str!("schema.sql")).await?;
    if current > 0 {
        for (version, script) in UPGRADES {
            if version > current {
                info!("Upgrading schema to version {}", version);
                execute_script(&mut tx, script).await?;
            }
        }
    }
    // PRAGMA does not accept bound parameters.
    sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(())
}

async fn execute_script(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    script: &str,
) -> Result<(), sqlx::Error> {
    for statement in script.split(';') {
        let trimmed = statement.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(&mut **tx).await?;
        }
    }
    Ok(())
}

async fn configure_connection(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    for pragma in CONNECTION_PRAGMAS {
        sqlx::query(pragma).execute(&mut *conn).await?;
    }
    // journal_mode answers with the mode actually applied
    let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode = WAL")
        .fetch_one(&mut *conn)
        .await?;
    tracing::debug!("SQLite journal_mode = {}", mode);
    Ok(())
}
