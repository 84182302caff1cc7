use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite};

use crate::contacts;
use crate::db::Store;
use crate::model::{clean_opt, require_text};
use crate::repo::{self, Table};
use crate::time::{self, opt_from_ms};
use crate::{id, AppError, AppResult};

const COLUMNS: &str =
    "id, contact_id, title, due_date, notes, is_completed, completed_at, created_at";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: String,
    pub contact_id: String,
    pub title: String,
    pub due_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<&SqliteRow> for Reminder {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            contact_id: row.try_get("contact_id")?,
            title: row.try_get("title")?,
            due_date: time::from_ms(row.try_get("due_date")?)?,
            notes: row.try_get("notes")?,
            is_completed: row
                .try_get::<i64, _>("is_completed")
                .map(|value| value != 0)?,
            completed_at: opt_from_ms(row.try_get("completed_at")?)?,
            created_at: time::from_ms(row.try_get("created_at")?)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReminder {
    pub contact_id: String,
    pub title: String,
    pub due_date: DateTime<Utc>,
    pub notes: Option<String>,
}

pub(crate) async fn put<'e, E>(exec: E, r: &Reminder) -> AppResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("INSERT OR REPLACE INTO reminders ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)");
    sqlx::query(&sql)
        .bind(&r.id)
        .bind(&r.contact_id)
        .bind(&r.title)
        .bind(time::to_ms(&r.due_date))
        .bind(&r.notes)
        .bind(r.is_completed as i64)
        .bind(r.completed_at.as_ref().map(time::to_ms))
        .bind(time::to_ms(&r.created_at))
        .execute(exec)
        .await?;
    Ok(())
}

pub(crate) async fn fetch_all<'e, E>(exec: E) -> AppResult<Vec<Reminder>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {COLUMNS} FROM reminders ORDER BY due_date, id");
    let rows = sqlx::query(&sql).fetch_all(exec).await?;
    rows.iter().map(Reminder::try_from).collect()
}

pub async fn create_reminder(store: &Store, input: NewReminder) -> AppResult<Reminder> {
    let reminder = Reminder {
        id: id::new_id(),
        contact_id: input.contact_id,
        title: require_text("title", &input.title)?,
        due_date: input.due_date,
        notes: clean_opt(input.notes),
        is_completed: false,
        completed_at: None,
        created_at: time::now(),
    };
    let mut tx = store.begin("create_reminder").await?;
    let result: AppResult<_> = async {
        if !repo::exists(tx.conn(), Table::Contacts, &reminder.contact_id).await? {
            return Err(contacts::not_found(&reminder.contact_id));
        }
        put(tx.conn(), &reminder).await?;
        tx.touch(Table::Reminders);
        Ok(())
    }
    .await;
    tx.finish(result).await?;
    Ok(reminder)
}

/// Marks the reminder done and stamps `completedAt`. Completing an already
/// completed reminder keeps the original stamp.
pub async fn complete_reminder(store: &Store, id: &str) -> AppResult<Reminder> {
    let mut tx = store.begin("complete_reminder").await?;
    let result: AppResult<_> = async {
        let sql = format!("SELECT {COLUMNS} FROM reminders WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(tx.conn())
            .await?
            .ok_or_else(|| {
                AppError::integrity("REMINDER_NOT_FOUND", "Reminder not found")
                    .with_context("id", id)
            })?;
        let mut reminder = Reminder::try_from(&row)?;
        if !reminder.is_completed {
            reminder.is_completed = true;
            reminder.completed_at = Some(time::now());
            put(tx.conn(), &reminder).await?;
            tx.touch(Table::Reminders);
        }
        Ok(reminder)
    }
    .await;
    tx.finish(result).await
}

pub async fn delete_reminder(store: &Store, id: &str) -> AppResult<bool> {
    let mut tx = store.begin("delete_reminder").await?;
    let result = repo::delete_by_id(tx.conn(), Table::Reminders, id).await;
    tx.touch(Table::Reminders);
    tx.finish(result).await
}

/// Open reminders by due date, for one contact or all.
pub async fn pending_reminders(
    store: &Store,
    contact_id: Option<&str>,
) -> AppResult<Vec<Reminder>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM reminders \
         WHERE is_completed = 0 AND (?1 IS NULL OR contact_id = ?1) \
         ORDER BY due_date, id"
    );
    let rows = sqlx::query(&sql)
        .bind(contact_id)
        .fetch_all(store.pool())
        .await?;
    rows.iter().map(Reminder::try_from).collect()
}

/// Open reminders due at or before `now`. Being overdue never completes them.
pub async fn due_reminders(store: &Store, now: DateTime<Utc>) -> AppResult<Vec<Reminder>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM reminders WHERE is_completed = 0 AND due_date <= ? \
         ORDER BY due_date, id"
    );
    let rows = sqlx::query(&sql)
        .bind(time::to_ms(&now))
        .fetch_all(store.pool())
        .await?;
    rows.iter().map(Reminder::try_from).collect()
}

/// Open reminders due within `[now, now + days]`.
pub async fn upcoming_reminders(
    store: &Store,
    now: DateTime<Utc>,
    days: i64,
) -> AppResult<Vec<Reminder>> {
    let until = time::add_days_saturating(now, days);
    let sql = format!(
        "SELECT {COLUMNS} FROM reminders \
         WHERE is_completed = 0 AND due_date >= ? AND due_date <= ? \
         ORDER BY due_date, id"
    );
    let rows = sqlx::query(&sql)
        .bind(time::to_ms(&now))
        .bind(time::to_ms(&until))
        .fetch_all(store.pool())
        .await?;
    rows.iter().map(Reminder::try_from).collect()
}
