mod expense;
mod group;

pub use expense::Expense;
pub use group::Group;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::SyncError;
use crate::table::{Row, SyncTable};

/// A typed view over the rows of one syncable table.
pub trait Entity: Sized {
    const TABLE: SyncTable;

    fn id(&self) -> &str;

    /// Encodes the entity as a full row of its table.
    fn to_row(&self) -> Row;

    fn from_row(row: &Row) -> Result<Self, SyncError>;
}

pub(crate) fn required_str(row: &Row, key: &str) -> Result<String, SyncError> {
    optional_str(row, key)?.ok_or_else(|| SyncError::InvalidRow(format!("missing '{}'", key)))
}

pub(crate) fn optional_str(row: &Row, key: &str) -> Result<Option<String>, SyncError> {
    match row.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(SyncError::InvalidRow(format!(
            "'{}' should be a string, got {}",
            key, other
        ))),
    }
}

pub(crate) fn required_time(row: &Row, key: &str) -> Result<DateTime<Utc>, SyncError> {
    parse_time(key, &required_str(row, key)?)
}

pub(crate) fn optional_time(row: &Row, key: &str) -> Result<Option<DateTime<Utc>>, SyncError> {
    optional_str(row, key)?
        .map(|s| parse_time(key, &s))
        .transpose()
}

fn parse_time(key: &str, value: &str) -> Result<DateTime<Utc>, SyncError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SyncError::InvalidRow(format!("'{}' is not a timestamp: {}", key, e)))
}

/// Decodes a JSON blob column.
///
/// The local store keeps blobs as JSON text while the remote store may hand
/// them back already decoded, so both shapes are accepted.
pub(crate) fn json_blob(row: &Row, key: &str) -> Result<Option<Value>, SyncError> {
    match row.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(serde_json::from_str(s)?)),
        Some(other) => Ok(Some(other.clone())),
    }
}

pub(crate) fn time_value(time: &DateTime<Utc>) -> Value {
    Value::String(time.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
}

pub(crate) fn blob_value(value: &Value) -> Value {
    Value::String(value.to_string())
}
