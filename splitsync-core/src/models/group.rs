use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use super::{blob_value, json_blob, optional_time, required_str, required_time, time_value, Entity};
use crate::error::SyncError;
use crate::table::{Row, SyncTable};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub id: String,
    pub name: String,
    /// ISO-4217 currency code
    pub currency: String,
    pub members: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Group {
    pub fn new(name: impl Into<String>, currency: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            currency: currency.into(),
            members: Vec::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_members(mut self, members: Vec<String>) -> Self {
        self.members = members;
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl Entity for Group {
    const TABLE: SyncTable = SyncTable::Groups;

    fn id(&self) -> &str {
        &self.id
    }

    fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), Value::String(self.id.clone()));
        row.insert("name".into(), Value::String(self.name.clone()));
        row.insert("currency".into(), Value::String(self.currency.clone()));
        row.insert("members".into(), blob_value(&Value::from(self.members.clone())));
        row.insert("createdAt".into(), time_value(&self.created_at));
        row.insert("updatedAt".into(), time_value(&self.updated_at));
        row.insert(
            "deletedAt".into(),
            self.deleted_at.as_ref().map(time_value).unwrap_or(Value::Null),
        );
        row
    }

    fn from_row(row: &Row) -> Result<Self, SyncError> {
        let members = match json_blob(row, "members")? {
            Some(value) => serde_json::from_value(value)?,
            None => Vec::new(),
        };

        Ok(Self {
            id: required_str(row, "id")?,
            name: required_str(row, "name")?,
            currency: required_str(row, "currency")?,
            members,
            created_at: required_time(row, "createdAt")?,
            updated_at: required_time(row, "updatedAt")?,
            deleted_at: optional_time(row, "deletedAt")?,
        })
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(f, "{}", "=".repeat(self.name.len()))?;
        writeln!(f, "ID: {}", self.id)?;
        writeln!(f, "Currency: {}", self.currency)?;

        if !self.members.is_empty() {
            writeln!(f, "Members: {}", self.members.join(", "))?;
        }

        if let Some(deleted_at) = &self.deleted_at {
            writeln!(f, "Deleted: {}", deleted_at.format("%Y-%m-%d %H:%M"))?;
        }

        Ok(())
    }
}
