use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::{Executor, Sqlite};

use crate::{AppError, AppResult};

/// Every table the store owns. Observers and transactions are keyed by these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Contacts,
    Companies,
    Interactions,
    Events,
    Reminders,
    Tags,
    CustomFieldDefs,
    UserProfile,
    AppSettings,
}

/// Tables carried by backups and cleared by an overwrite restore.
pub const BUSINESS_TABLES: &[Table] = &[
    Table::Contacts,
    Table::Companies,
    Table::Interactions,
    Table::Events,
    Table::Reminders,
    Table::Tags,
    Table::CustomFieldDefs,
];

/// Tables with business data that mean "this install is in use".
pub const ACTIVITY_TABLES: &[Table] = &[
    Table::Contacts,
    Table::Events,
    Table::Reminders,
    Table::Interactions,
];

impl Table {
    pub const ALL: &'static [Table] = &[
        Table::Contacts,
        Table::Companies,
        Table::Interactions,
        Table::Events,
        Table::Reminders,
        Table::Tags,
        Table::CustomFieldDefs,
        Table::UserProfile,
        Table::AppSettings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Table::Contacts => "contacts",
            Table::Companies => "companies",
            Table::Interactions => "interactions",
            Table::Events => "events",
            Table::Reminders => "reminders",
            Table::Tags => "tags",
            Table::CustomFieldDefs => "custom_field_defs",
            Table::UserProfile => "user_profile",
            Table::AppSettings => "app_settings",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub async fn count<'e, E>(exec: E, table: Table) -> AppResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT COUNT(*) FROM {table}");
    Ok(sqlx::query_scalar(&sql).fetch_one(exec).await?)
}

pub async fn exists<'e, E>(exec: E, table: Table, id: &str) -> AppResult<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT 1 FROM {table} WHERE id = ?");
    let found: Option<i64> = sqlx::query_scalar(&sql)
        .bind(id)
        .fetch_optional(exec)
        .await?;
    Ok(found.is_some())
}

/// Deletes one row. Returns whether a row was removed; a missing id is not an error.
pub async fn delete_by_id<'e, E>(exec: E, table: Table, id: &str) -> AppResult<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("DELETE FROM {table} WHERE id = ?");
    let res = sqlx::query(&sql).bind(id).execute(exec).await?;
    Ok(res.rows_affected() > 0)
}

pub async fn clear<'e, E>(exec: E, table: Table) -> AppResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("DELETE FROM {table}");
    let res = sqlx::query(&sql).execute(exec).await?;
    Ok(res.rows_affected())
}

/// Decodes a JSON text column, naming the column on failure.
pub fn decode_json<T: DeserializeOwned>(raw: &str, column: &'static str) -> AppResult<T> {
    serde_json::from_str(raw).map_err(|err| AppError::from(err).with_context("column", column))
}

pub fn encode_json<T: Serialize>(value: &T) -> AppResult<String> {
    Ok(serde_json::to_string(value)?)
}
