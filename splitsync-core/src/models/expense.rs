use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use super::{
    blob_value, json_blob, optional_time, required_str, required_time, time_value, Entity,
};
use crate::error::SyncError;
use crate::table::{Row, SyncTable};

/// An expense paid by one group member.
///
/// The split and the receipt are opaque JSON documents owned by the
/// application; the engine stores and syncs them without interpretation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Expense {
    pub id: String,
    pub group_id: String,
    pub title: String,
    pub payer_name: String,
    pub split_expense: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub receipt: Option<Value>,
}

impl Expense {
    pub fn new(
        group_id: impl Into<String>,
        title: impl Into<String>,
        payer_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            group_id: group_id.into(),
            title: title.into(),
            payer_name: payer_name.into(),
            split_expense: Value::Object(Default::default()),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            receipt: None,
        }
    }

    pub fn with_split(mut self, split_expense: Value) -> Self {
        self.split_expense = split_expense;
        self
    }

    pub fn with_receipt(mut self, receipt: Value) -> Self {
        self.receipt = Some(receipt);
        self
    }
}

impl Entity for Expense {
    const TABLE: SyncTable = SyncTable::Expenses;

    fn id(&self) -> &str {
        &self.id
    }

    fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), Value::String(self.id.clone()));
        row.insert("groupId".into(), Value::String(self.group_id.clone()));
        row.insert("title".into(), Value::String(self.title.clone()));
        row.insert("payerName".into(), Value::String(self.payer_name.clone()));
        row.insert("splitExpense".into(), blob_value(&self.split_expense));
        row.insert("createdAt".into(), time_value(&self.created_at));
        row.insert("updatedAt".into(), time_value(&self.updated_at));
        row.insert(
            "deletedAt".into(),
            self.deleted_at.as_ref().map(time_value).unwrap_or(Value::Null),
        );
        row.insert(
            "receipt".into(),
            self.receipt.as_ref().map(blob_value).unwrap_or(Value::Null),
        );
        row
    }

    fn from_row(row: &Row) -> Result<Self, SyncError> {
        Ok(Self {
            id: required_str(row, "id")?,
            group_id: required_str(row, "groupId")?,
            title: required_str(row, "title")?,
            payer_name: required_str(row, "payerName")?,
            split_expense: json_blob(row, "splitExpense")?.unwrap_or(Value::Null),
            created_at: required_time(row, "createdAt")?,
            updated_at: required_time(row, "updatedAt")?,
            deleted_at: optional_time(row, "deletedAt")?,
            receipt: json_blob(row, "receipt")?,
        })
    }
}

impl fmt::Display for Expense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        writeln!(f, "{}", "=".repeat(self.title.len()))?;
        writeln!(f, "ID: {}", self.id)?;
        writeln!(f, "Group: {}", self.group_id)?;
        writeln!(f, "Paid by: {}", self.payer_name)?;
        writeln!(f, "Created: {}", self.created_at.format("%Y-%m-%d %H:%M"))?;

        if self.receipt.is_some() {
            writeln!(f, "Receipt: attached")?;
        }

        Ok(())
    }
}
