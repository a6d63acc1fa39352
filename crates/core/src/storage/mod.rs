pub mod rates;

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};

/// The store lives in a hidden directory next to the executable, never
/// in a user-supplied location.
const DATA_DIR: &str = ".data";
const DB_FILENAME: &str = "ExchangeRatesDB.sqlite";

pub fn default_database_path() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("resolve executable path failed")?;
    let dir = exe
        .parent()
        .context("executable has no parent directory")?
        .join(DATA_DIR);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create data directory {} failed", dir.display()))?;
    Ok(dir.join(DB_FILENAME))
}

/// Opens the backing file, creating it on first use. There is no
/// in-memory fallback: if the engine cannot be reached the error
/// propagates to the caller.
pub async fn connect(path: &Path) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("open exchange-rates database {} failed", path.display()))?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

pub async fn table_exists(pool: &SqlitePool, table: &str) -> anyhow::Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND lower(name) = lower(?1)",
    )
    .bind(table)
    .fetch_optional(pool)
    .await
    .context("query sqlite_master failed")?;
    Ok(row.is_some())
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    // A pool with more than one connection would hand each connection
    // its own private :memory: database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    migrate(&pool).await.expect("run migrations");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migration_creates_the_rates_table() {
        let pool = memory_pool().await;
        assert!(table_exists(&pool, "EURO_EXCHANGE_RATES").await.unwrap());
        assert!(!table_exists(&pool, "NO_SUCH_TABLE").await.unwrap());
    }
}
