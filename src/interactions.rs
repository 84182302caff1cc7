use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite};
use tracing::info;

use crate::contacts;
use crate::db::Store;
use crate::model::{clean_opt, InteractionType};
use crate::repo::{self, Table};
use crate::time;
use crate::{id, AppError, AppResult};

const COLUMNS: &str = "id, contact_id, type, date, notes, outcome, created_at";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub id: String,
    pub contact_id: String,
    #[serde(rename = "type")]
    pub kind: InteractionType,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<&SqliteRow> for Interaction {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            contact_id: row.try_get("contact_id")?,
            kind: row.try_get::<String, _>("type")?.parse()?,
            date: time::from_ms(row.try_get("date")?)?,
            notes: row.try_get("notes")?,
            outcome: row.try_get("outcome")?,
            created_at: time::from_ms(row.try_get("created_at")?)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInteraction {
    pub contact_id: String,
    #[serde(rename = "type")]
    pub kind: InteractionType,
    pub date: DateTime<Utc>,
    pub notes: Option<String>,
    pub outcome: Option<String>,
}

pub(crate) async fn put<'e, E>(exec: E, i: &Interaction) -> AppResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("INSERT OR REPLACE INTO interactions ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)");
    sqlx::query(&sql)
        .bind(&i.id)
        .bind(&i.contact_id)
        .bind(i.kind.as_str())
        .bind(time::to_ms(&i.date))
        .bind(&i.notes)
        .bind(&i.outcome)
        .bind(time::to_ms(&i.created_at))
        .execute(exec)
        .await?;
    Ok(())
}

pub(crate) async fn fetch_all<'e, E>(exec: E) -> AppResult<Vec<Interaction>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {COLUMNS} FROM interactions ORDER BY date DESC, id DESC");
    let rows = sqlx::query(&sql).fetch_all(exec).await?;
    rows.iter().map(Interaction::try_from).collect()
}

/// Records an interaction and overwrites the contact's `lastContactedAt`
/// with its date, even when that date is older than the current value.
pub async fn create_interaction(store: &Store, input: NewInteraction) -> AppResult<Interaction> {
    let interaction = Interaction {
        id: id::new_id(),
        contact_id: input.contact_id,
        kind: input.kind,
        date: input.date,
        notes: clean_opt(input.notes),
        outcome: clean_opt(input.outcome),
        created_at: time::now(),
    };

    let mut tx = store.begin("create_interaction").await?;
    let result: AppResult<_> = async {
        if !repo::exists(tx.conn(), Table::Contacts, &interaction.contact_id).await? {
            return Err(contacts::not_found(&interaction.contact_id));
        }
        put(tx.conn(), &interaction).await?;
        sqlx::query("UPDATE contacts SET last_contacted_at = ?, updated_at = ? WHERE id = ?")
            .bind(time::to_ms(&interaction.date))
            .bind(time::now_ms())
            .bind(&interaction.contact_id)
            .execute(tx.conn())
            .await?;
        tx.touch(Table::Interactions);
        tx.touch(Table::Contacts);
        Ok(())
    }
    .await;
    tx.finish(result).await?;
    info!(
        target: "minet",
        event = "interaction_logged",
        id = %interaction.id,
        contact_id = %interaction.contact_id
    );
    Ok(interaction)
}

/// Interactions newest first; ties ordered by id so paging is stable.
pub async fn list_interactions(
    store: &Store,
    contact_id: Option<&str>,
) -> AppResult<Vec<Interaction>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM interactions WHERE (?1 IS NULL OR contact_id = ?1) \
         ORDER BY date DESC, id DESC"
    );
    let rows = sqlx::query(&sql)
        .bind(contact_id)
        .fetch_all(store.pool())
        .await?;
    rows.iter().map(Interaction::try_from).collect()
}

pub async fn recent_interactions(
    store: &Store,
    limit: i64,
    offset: i64,
) -> AppResult<Vec<Interaction>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM interactions ORDER BY date DESC, id DESC LIMIT ? OFFSET ?"
    );
    let rows = sqlx::query(&sql)
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(store.pool())
        .await?;
    rows.iter().map(Interaction::try_from).collect()
}

/// Removes one interaction. The contact's `lastContactedAt` is left as is.
pub async fn delete_interaction(store: &Store, id: &str) -> AppResult<bool> {
    let mut tx = store.begin("delete_interaction").await?;
    let result = repo::delete_by_id(tx.conn(), Table::Interactions, id).await;
    tx.touch(Table::Interactions);
    tx.finish(result).await
}
