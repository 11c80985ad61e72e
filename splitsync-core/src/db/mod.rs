//! Local store: the embedded SQLite database holding the syncable tables and
//! the operation queue.

mod expense_repo;
mod group_repo;
pub mod queue;
pub mod rows;

pub use expense_repo::ExpenseRepository;
pub use group_repo::GroupRepository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;

use crate::error::SyncResult;
use crate::table::{Row, SyncTable};

/// Initialize the database connection pool and run migrations
pub async fn init_db(path: &Path) -> SyncResult<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Handle on the local database.
///
/// Every mutation goes through a short-lived transaction obtained from
/// [`LocalStore::begin`]; transactions are never held across network calls.
#[derive(Debug, Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the database at `path`.
    pub async fn open(path: &Path) -> SyncResult<Self> {
        Ok(Self::new(init_db(path).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> SyncResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn get_row(&self, table: SyncTable, id: &str) -> SyncResult<Option<Row>> {
        let mut conn = self.pool.acquire().await?;
        rows::get_row(&mut conn, table, id).await
    }

    pub async fn list_rows(&self, table: SyncTable) -> SyncResult<Vec<Row>> {
        let mut conn = self.pool.acquire().await?;
        rows::list_rows(&mut conn, table).await
    }

    pub async fn pending_operations(&self) -> SyncResult<Vec<crate::operation::Operation>> {
        let mut conn = self.pool.acquire().await?;
        queue::all(&mut conn).await
    }

    pub async fn pending_count(&self) -> SyncResult<i64> {
        let mut conn = self.pool.acquire().await?;
        queue::count(&mut conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_init_db_creates_tables() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let pool = init_db(&db_path).await.unwrap();

        // Verify tables exist
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert!(table_names.contains(&"groups"));
        assert!(table_names.contains(&"expenses"));
        assert!(table_names.contains(&"sync_queue"));
    }

    #[tokio::test]
    async fn test_init_db_creates_parent_directory() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("data").join("test.db");

        init_db(&db_path).await.unwrap();

        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let store = LocalStore::open(&db_path).await.unwrap();
        let mut tx = store.begin().await.unwrap();
        let row = serde_json::json!({
            "id": "g1",
            "name": "Trip",
            "currency": "EUR",
            "members": "[]",
            "createdAt": "2024-01-01T00:00:00.000Z",
            "updatedAt": "2024-01-01T00:00:00.000Z"
        });
        rows::upsert_row(&mut tx, SyncTable::Groups, row.as_object().unwrap())
            .await
            .unwrap();
        tx.commit().await.unwrap();
        store.pool().close().await;

        let reopened = LocalStore::open(&db_path).await.unwrap();
        assert!(reopened
            .get_row(SyncTable::Groups, "g1")
            .await
            .unwrap()
            .is_some());
    }
}
