//! Persistence of the operation queue (`sync_queue`).
//!
//! Drain order is `createdAt`, with insertion order (rowid) breaking ties.

use sqlx::SqliteConnection;

use crate::error::{SyncError, SyncResult};
use crate::operation::Operation;
use crate::table::{Row, SyncTable};

#[derive(sqlx::FromRow)]
#[sqlx(rename_all = "camelCase")]
struct OperationRow {
    id: String,
    operation_type: String,
    entity_table: String,
    entity_id: String,
    changes: Option<String>,
    created_at: String,
}

const SELECT_OPERATIONS: &str = r#"
    SELECT "id", "operationType", "entityTable", "entityId", "changes", "createdAt"
    FROM "sync_queue"
"#;

impl OperationRow {
    fn decode(self) -> SyncResult<Operation> {
        let changes = match self.changes {
            Some(text) => match serde_json::from_str::<serde_json::Value>(&text)? {
                serde_json::Value::Object(map) => Some(map),
                other => {
                    return Err(SyncError::InvalidRow(format!(
                        "operation {} has non-object changes: {}",
                        self.id, other
                    )))
                }
            },
            None => None,
        };

        Ok(Operation {
            operation_type: self.operation_type.parse()?,
            entity_table: self.entity_table.parse()?,
            entity_id: self.entity_id,
            changes,
            created_at: self.created_at,
            id: self.id,
        })
    }
}

fn encode_changes(changes: &Option<Row>) -> SyncResult<Option<String>> {
    Ok(changes.as_ref().map(serde_json::to_string).transpose()?)
}

/// Appends an operation. Callers run this in the same transaction as the
/// entity write it records.
pub async fn enqueue(conn: &mut SqliteConnection, operation: &Operation) -> SyncResult<()> {
    sqlx::query(
        r#"
        INSERT INTO "sync_queue" ("id", "operationType", "entityTable", "entityId", "changes", "createdAt")
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&operation.id)
    .bind(operation.operation_type.as_str())
    .bind(operation.entity_table.name())
    .bind(&operation.entity_id)
    .bind(encode_changes(&operation.changes)?)
    .bind(&operation.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// The oldest queued operation across all tables.
pub async fn next(conn: &mut SqliteConnection) -> SyncResult<Option<Operation>> {
    let sql = format!(r#"{} ORDER BY "createdAt" ASC, rowid ASC LIMIT 1"#, SELECT_OPERATIONS);
    let row: Option<OperationRow> = sqlx::query_as(&sql).fetch_optional(&mut *conn).await?;

    row.map(OperationRow::decode).transpose()
}

/// Queued operations targeting `table`, oldest first.
pub async fn for_table(
    conn: &mut SqliteConnection,
    table: SyncTable,
) -> SyncResult<Vec<Operation>> {
    let sql = format!(
        r#"{} WHERE "entityTable" = ? ORDER BY "createdAt" ASC, rowid ASC"#,
        SELECT_OPERATIONS
    );
    let rows: Vec<OperationRow> = sqlx::query_as(&sql)
        .bind(table.name())
        .fetch_all(&mut *conn)
        .await?;

    rows.into_iter().map(OperationRow::decode).collect()
}

/// Every queued operation in drain order.
pub async fn all(conn: &mut SqliteConnection) -> SyncResult<Vec<Operation>> {
    let sql = format!(r#"{} ORDER BY "createdAt" ASC, rowid ASC"#, SELECT_OPERATIONS);
    let rows: Vec<OperationRow> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;

    rows.into_iter().map(OperationRow::decode).collect()
}

/// Removes an operation. Returns false if it was already gone.
pub async fn remove(conn: &mut SqliteConnection, id: &str) -> SyncResult<bool> {
    let result = sqlx::query(r#"DELETE FROM "sync_queue" WHERE "id" = ?"#)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn count(conn: &mut SqliteConnection) -> SyncResult<i64> {
    let (count,): (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM "sync_queue""#)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}
