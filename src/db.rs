//! SQLite connection for the vector index.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;

/// File name of the index database inside the vector-store directory.
pub const INDEX_DB_FILE: &str = "index.sqlite";

/// Open the index database in `dir`, creating the file when `create` is set.
pub async fn connect(dir: &Path, create: bool) -> Result<SqlitePool> {
    if create {
        std::fs::create_dir_all(dir)?;
    }

    let db_path = dir.join(INDEX_DB_FILE);
    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(create)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    Ok(pool)
}
