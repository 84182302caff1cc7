use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite};

use crate::db::Store;
use crate::model::require_text;
use crate::repo::{self, Table};
use crate::time;
use crate::{id, AppError, AppResult};

pub const DEFAULT_TAG_COLOR: &str = "#2563eb";

static HEX_COLOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<&SqliteRow> for Tag {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            color: row.try_get("color")?,
            created_at: time::from_ms(row.try_get("created_at")?)?,
        })
    }
}

pub(crate) async fn put<'e, E>(exec: E, t: &Tag) -> AppResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("INSERT OR REPLACE INTO tags (id, name, color, created_at) VALUES (?, ?, ?, ?)")
        .bind(&t.id)
        .bind(&t.name)
        .bind(&t.color)
        .bind(time::to_ms(&t.created_at))
        .execute(exec)
        .await?;
    Ok(())
}

pub(crate) async fn fetch_all<'e, E>(exec: E) -> AppResult<Vec<Tag>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query("SELECT id, name, color, created_at FROM tags ORDER BY name, id")
        .fetch_all(exec)
        .await?;
    rows.iter().map(Tag::try_from).collect()
}

pub async fn create_tag(store: &Store, name: &str, color: Option<&str>) -> AppResult<Tag> {
    let color = color.map(str::trim).unwrap_or(DEFAULT_TAG_COLOR);
    if !HEX_COLOR_RE.is_match(color) {
        return Err(AppError::validation("TAG_COLOR", "Tag color must be a hex color")
            .with_context("color", color.to_string()));
    }
    let tag = Tag {
        id: id::new_id(),
        name: require_text("name", name)?,
        color: color.to_lowercase(),
        created_at: time::now(),
    };
    let mut tx = store.begin("create_tag").await?;
    let result = put(tx.conn(), &tag).await;
    tx.touch(Table::Tags);
    tx.finish(result).await?;
    Ok(tag)
}

pub async fn list_tags(store: &Store) -> AppResult<Vec<Tag>> {
    fetch_all(store.pool()).await
}

/// Removes the tag definition. Contacts keep the tag text they carry.
pub async fn delete_tag(store: &Store, id: &str) -> AppResult<bool> {
    let mut tx = store.begin("delete_tag").await?;
    let result = repo::delete_by_id(tx.conn(), Table::Tags, id).await;
    tx.touch(Table::Tags);
    tx.finish(result).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_colors() {
        assert!(HEX_COLOR_RE.is_match("#2563eb"));
        assert!(HEX_COLOR_RE.is_match("#FFF"));
        assert!(!HEX_COLOR_RE.is_match("blue"));
        assert!(!HEX_COLOR_RE.is_match("#12345"));
    }
}
