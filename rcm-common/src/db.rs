//! Database access

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::error::Result;

/// Open a connection pool against a SQLite database URL.
///
/// A single connection is used so that `sqlite::memory:` URLs in tests see
/// one shared database, and so writes to one sink table never interleave.
pub async fn connect_pool(database_url: &str) -> Result<SqlitePool> {
    tracing::debug!(url = database_url, "Connecting to database");
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(database_url)
        .await?;
    Ok(pool)
}
