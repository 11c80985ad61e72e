use sqlx::SqlitePool;

use super::rows;
use crate::error::SyncResult;
use crate::models::{Entity, Group};
use crate::table::SyncTable;

/// Read access to groups for the application layer.
///
/// Writes go through [`crate::SyncEngine`] so that they are queued for push.
#[derive(Debug, Clone)]
pub struct GroupRepository {
    pool: SqlitePool,
}

impl GroupRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: &str) -> SyncResult<Option<Group>> {
        let mut conn = self.pool.acquire().await?;
        rows::get_row(&mut conn, SyncTable::Groups, id)
            .await?
            .map(|row| Group::from_row(&row))
            .transpose()
    }

    pub async fn get_by_name(&self, name: &str) -> SyncResult<Option<Group>> {
        let groups = self.list().await?;
        Ok(groups
            .into_iter()
            .find(|g| g.name.eq_ignore_ascii_case(name)))
    }

    /// Groups that are not soft-deleted, newest first.
    pub async fn list(&self) -> SyncResult<Vec<Group>> {
        let mut groups = self.list_all().await?;
        groups.retain(|g| !g.is_deleted());
        Ok(groups)
    }

    /// Every group, soft-deleted ones included, newest first.
    pub async fn list_all(&self) -> SyncResult<Vec<Group>> {
        let mut conn = self.pool.acquire().await?;
        let mut groups = rows::list_rows(&mut conn, SyncTable::Groups)
            .await?
            .iter()
            .map(Group::from_row)
            .collect::<SyncResult<Vec<_>>>()?;

        groups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(groups)
    }
}
