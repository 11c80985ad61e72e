//! Row-level access to the syncable tables.
//!
//! Column lists come from [`SyncTable`], never from caller input, so the
//! identifiers interpolated into SQL are always known names. Values are bound.

use serde_json::Value;
use sqlx::{Row as _, SqliteConnection};

use crate::error::{SyncError, SyncResult};
use crate::table::{row_id, Row, SyncTable};

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident)
}

/// Converts a JSON field to the TEXT value stored locally.
///
/// Strings are stored as-is; nested values are stored as their JSON text.
fn to_sql_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn select_sql(table: SyncTable) -> String {
    let columns: Vec<String> = table.columns().iter().map(|c| quote(c)).collect();
    format!("SELECT {} FROM {}", columns.join(", "), quote(table.name()))
}

fn decode_row(table: SyncTable, row: &sqlx::sqlite::SqliteRow) -> SyncResult<Row> {
    let mut decoded = Row::new();
    for (index, column) in table.columns().iter().enumerate() {
        let value: Option<String> = row.try_get(index)?;
        decoded.insert(
            column.to_string(),
            value.map(Value::String).unwrap_or(Value::Null),
        );
    }
    Ok(decoded)
}

/// Inserts a new row. Fails on a duplicate id or an unknown field.
pub async fn insert_row(
    conn: &mut SqliteConnection,
    table: SyncTable,
    row: &Row,
) -> SyncResult<()> {
    table.check_columns(row)?;
    if row_id(row).is_none() {
        return Err(SyncError::InvalidRow(format!("{} row without a string id", table)));
    }

    let columns: Vec<&str> = table
        .columns()
        .iter()
        .copied()
        .filter(|c| row.contains_key(*c))
        .collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(table.name()),
        columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", "),
        vec!["?"; columns.len()].join(", ")
    );

    let mut query = sqlx::query(&sql);
    for column in &columns {
        query = query.bind(row.get(*column).and_then(to_sql_value));
    }
    query.execute(&mut *conn).await?;
    Ok(())
}

/// Inserts `row`, or replaces the columns it carries when the id already exists.
///
/// Fields that are not columns of `table` are ignored.
pub async fn upsert_row(
    conn: &mut SqliteConnection,
    table: SyncTable,
    row: &Row,
) -> SyncResult<()> {
    let row = table.project(row);
    let id = row_id(&row)
        .ok_or_else(|| SyncError::InvalidRow(format!("{} row without a string id", table)))?
        .to_string();

    let columns: Vec<&str> = table
        .columns()
        .iter()
        .copied()
        .filter(|c| row.contains_key(*c))
        .collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    let assignments: Vec<String> = columns
        .iter()
        .filter(|c| **c != "id")
        .map(|c| format!("{0} = excluded.{0}", quote(c)))
        .collect();

    let conflict = if assignments.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", assignments.join(", "))
    };

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(\"id\") {}",
        quote(table.name()),
        columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", "),
        placeholders,
        conflict
    );

    let mut query = sqlx::query(&sql);
    for column in &columns {
        query = query.bind(row.get(*column).and_then(to_sql_value));
    }
    query.execute(&mut *conn).await?;

    tracing::trace!("Upserted {}/{}", table, id);
    Ok(())
}

/// Sets the given columns on the row with `id`. Returns the number of rows changed.
///
/// Unlike [`upsert_row`], unknown fields are an error: this is the
/// application write path and a typo must not be silently queued.
pub async fn update_row(
    conn: &mut SqliteConnection,
    table: SyncTable,
    id: &str,
    fields: &Row,
) -> SyncResult<u64> {
    table.check_columns(fields)?;

    let columns: Vec<&str> = table
        .columns()
        .iter()
        .copied()
        .filter(|c| *c != "id" && fields.contains_key(*c))
        .collect();

    let assignments = if columns.is_empty() {
        // Nothing to set; still report whether the row exists.
        "\"id\" = \"id\"".to_string()
    } else {
        columns
            .iter()
            .map(|c| format!("{} = ?", quote(c)))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let sql = format!(
        "UPDATE {} SET {} WHERE \"id\" = ?",
        quote(table.name()),
        assignments
    );

    let mut query = sqlx::query(&sql);
    for column in &columns {
        query = query.bind(fields.get(*column).and_then(to_sql_value));
    }
    let result = query.bind(id).execute(&mut *conn).await?;

    Ok(result.rows_affected())
}

/// Deletes the row with `id`. Returns the number of rows removed.
pub async fn delete_row(
    conn: &mut SqliteConnection,
    table: SyncTable,
    id: &str,
) -> SyncResult<u64> {
    let sql = format!("DELETE FROM {} WHERE \"id\" = ?", quote(table.name()));
    let result = sqlx::query(&sql).bind(id).execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

pub async fn get_row(
    conn: &mut SqliteConnection,
    table: SyncTable,
    id: &str,
) -> SyncResult<Option<Row>> {
    let sql = format!("{} WHERE \"id\" = ?", select_sql(table));
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(|r| decode_row(table, &r)).transpose()
}

/// All rows of `table`, ordered by id.
pub async fn list_rows(conn: &mut SqliteConnection, table: SyncTable) -> SyncResult<Vec<Row>> {
    let sql = format!("{} ORDER BY \"id\"", select_sql(table));
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;

    rows.iter().map(|r| decode_row(table, r)).collect()
}

pub async fn list_ids(conn: &mut SqliteConnection, table: SyncTable) -> SyncResult<Vec<String>> {
    let sql = format!("SELECT \"id\" FROM {}", quote(table.name()));
    let ids: Vec<(String,)> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
    Ok(ids.into_iter().map(|(id,)| id).collect())
}
