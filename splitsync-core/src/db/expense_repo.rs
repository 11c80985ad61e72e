use sqlx::SqlitePool;

use super::rows;
use crate::error::SyncResult;
use crate::models::{Entity, Expense};
use crate::table::SyncTable;

#[derive(Debug, Clone)]
pub struct ExpenseRepository {
    pool: SqlitePool,
}

impl ExpenseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: &str) -> SyncResult<Option<Expense>> {
        let mut conn = self.pool.acquire().await?;
        rows::get_row(&mut conn, SyncTable::Expenses, id)
            .await?
            .map(|row| Expense::from_row(&row))
            .transpose()
    }

    /// Live expenses of a group, newest first.
    pub async fn list_by_group(&self, group_id: &str) -> SyncResult<Vec<Expense>> {
        let mut conn = self.pool.acquire().await?;
        let mut expenses = rows::list_rows(&mut conn, SyncTable::Expenses)
            .await?
            .iter()
            .map(Expense::from_row)
            .collect::<SyncResult<Vec<_>>>()?;

        expenses.retain(|e| e.group_id == group_id && e.deleted_at.is_none());
        expenses.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(expenses)
    }
}
