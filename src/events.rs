use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite};

use crate::db::Store;
use crate::model::{clean_opt, require_text};
use crate::repo::{self, decode_json, encode_json, Table};
use crate::time::{self, format_date, opt_parse_date, parse_date};
use crate::{id, AppError, AppResult};

const COLUMNS: &str = "id, title, date, end_date, location, description, contact_ids, \
     outcome, next_steps, follow_up_date, created_at, updated_at";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub title: String,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub contact_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_steps: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<&SqliteRow> for Event {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            date: parse_date(&row.try_get::<String, _>("date")?)?,
            end_date: opt_parse_date(row.try_get("end_date")?)?,
            location: row.try_get("location")?,
            description: row.try_get("description")?,
            contact_ids: decode_json(&row.try_get::<String, _>("contact_ids")?, "contact_ids")?,
            outcome: row.try_get("outcome")?,
            next_steps: row.try_get("next_steps")?,
            follow_up_date: opt_parse_date(row.try_get("follow_up_date")?)?,
            created_at: time::from_ms(row.try_get("created_at")?)?,
            updated_at: time::from_ms(row.try_get("updated_at")?)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub title: String,
    pub date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub location: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub contact_ids: Vec<String>,
    pub outcome: Option<String>,
    pub next_steps: Option<String>,
    pub follow_up_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct EventPatch {
    pub title: Option<String>,
    pub date: Option<NaiveDate>,
    pub end_date: Option<Option<NaiveDate>>,
    pub location: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub contact_ids: Option<Vec<String>>,
    pub outcome: Option<Option<String>>,
    pub next_steps: Option<Option<String>>,
    pub follow_up_date: Option<Option<NaiveDate>>,
}

fn dedup_ids(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

fn check_range(date: &NaiveDate, end_date: Option<&NaiveDate>) -> AppResult<()> {
    match end_date {
        Some(end) if end < date => Err(AppError::validation(
            "EVENT_RANGE",
            "Event end date is before its start date",
        )
        .with_context("date", format_date(date))
        .with_context("endDate", format_date(end))),
        _ => Ok(()),
    }
}

pub(crate) async fn put<'e, E>(exec: E, e: &Event) -> AppResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "INSERT OR REPLACE INTO events ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    );
    sqlx::query(&sql)
        .bind(&e.id)
        .bind(&e.title)
        .bind(format_date(&e.date))
        .bind(e.end_date.as_ref().map(format_date))
        .bind(&e.location)
        .bind(&e.description)
        .bind(encode_json(&e.contact_ids)?)
        .bind(&e.outcome)
        .bind(&e.next_steps)
        .bind(e.follow_up_date.as_ref().map(format_date))
        .bind(time::to_ms(&e.created_at))
        .bind(time::to_ms(&e.updated_at))
        .execute(exec)
        .await?;
    Ok(())
}

/// Raw rows, including contact ids that no longer resolve. Used by backups.
pub(crate) async fn fetch_all<'e, E>(exec: E) -> AppResult<Vec<Event>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {COLUMNS} FROM events ORDER BY date DESC, id DESC");
    let rows = sqlx::query(&sql).fetch_all(exec).await?;
    rows.iter().map(Event::try_from).collect()
}

async fn live_contact_ids(store: &Store) -> AppResult<HashSet<String>> {
    let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM contacts")
        .fetch_all(store.pool())
        .await?;
    Ok(ids.into_iter().collect())
}

/// Deleting a contact leaves its id inside events. Reads drop those ids.
async fn without_dangling(store: &Store, mut events: Vec<Event>) -> AppResult<Vec<Event>> {
    if events.iter().all(|e| e.contact_ids.is_empty()) {
        return Ok(events);
    }
    let live = live_contact_ids(store).await?;
    for event in &mut events {
        event.contact_ids.retain(|id| live.contains(id));
    }
    Ok(events)
}

pub async fn create_event(store: &Store, input: NewEvent) -> AppResult<Event> {
    check_range(&input.date, input.end_date.as_ref())?;
    let now = time::now();
    let event = Event {
        id: id::new_id(),
        title: require_text("title", &input.title)?,
        date: input.date,
        end_date: input.end_date,
        location: clean_opt(input.location),
        description: clean_opt(input.description),
        contact_ids: dedup_ids(input.contact_ids),
        outcome: clean_opt(input.outcome),
        next_steps: clean_opt(input.next_steps),
        follow_up_date: input.follow_up_date,
        created_at: now,
        updated_at: now,
    };
    let mut tx = store.begin("create_event").await?;
    let result = put(tx.conn(), &event).await;
    tx.touch(Table::Events);
    tx.finish(result).await?;
    Ok(event)
}

pub async fn get_event(store: &Store, id: &str) -> AppResult<Option<Event>> {
    let sql = format!("SELECT {COLUMNS} FROM events WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(store.pool())
        .await?;
    match row.as_ref().map(Event::try_from).transpose()? {
        Some(event) => Ok(without_dangling(store, vec![event]).await?.pop()),
        None => Ok(None),
    }
}

pub async fn update_event(store: &Store, id: &str, patch: EventPatch) -> AppResult<Event> {
    let mut tx = store.begin("update_event").await?;
    let result: AppResult<_> = async {
        let sql = format!("SELECT {COLUMNS} FROM events WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(tx.conn())
            .await?
            .ok_or_else(|| {
                AppError::integrity("EVENT_NOT_FOUND", "Event not found").with_context("id", id)
            })?;
        let mut e = Event::try_from(&row)?;
        if let Some(v) = patch.title {
            e.title = require_text("title", &v)?;
        }
        if let Some(v) = patch.date {
            e.date = v;
        }
        if let Some(v) = patch.end_date {
            e.end_date = v;
        }
        if let Some(v) = patch.location {
            e.location = clean_opt(v);
        }
        if let Some(v) = patch.description {
            e.description = clean_opt(v);
        }
        if let Some(v) = patch.contact_ids {
            e.contact_ids = dedup_ids(v);
        }
        if let Some(v) = patch.outcome {
            e.outcome = clean_opt(v);
        }
        if let Some(v) = patch.next_steps {
            e.next_steps = clean_opt(v);
        }
        if let Some(v) = patch.follow_up_date {
            e.follow_up_date = v;
        }
        check_range(&e.date, e.end_date.as_ref())?;
        e.updated_at = time::now();
        put(tx.conn(), &e).await?;
        tx.touch(Table::Events);
        Ok(e)
    }
    .await;
    tx.finish(result).await
}

/// Deleting an event never touches contacts.
pub async fn delete_event(store: &Store, id: &str) -> AppResult<bool> {
    let mut tx = store.begin("delete_event").await?;
    let result = repo::delete_by_id(tx.conn(), Table::Events, id).await;
    tx.touch(Table::Events);
    tx.finish(result).await
}

/// All events, latest date first.
pub async fn list_events(store: &Store) -> AppResult<Vec<Event>> {
    let events = fetch_all(store.pool()).await?;
    without_dangling(store, events).await
}

/// Events dated `today` or later, soonest first. Today counts as upcoming.
pub async fn upcoming_events(store: &Store, today: NaiveDate, limit: i64) -> AppResult<Vec<Event>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM events WHERE date >= ? ORDER BY date ASC, id ASC LIMIT ?"
    );
    let rows = sqlx::query(&sql)
        .bind(format_date(&today))
        .bind(limit.max(0))
        .fetch_all(store.pool())
        .await?;
    let events = rows
        .iter()
        .map(Event::try_from)
        .collect::<AppResult<Vec<_>>>()?;
    without_dangling(store, events).await
}

pub async fn events_for_contact(store: &Store, contact_id: &str) -> AppResult<Vec<Event>> {
    let events = list_events(store).await?;
    Ok(events
        .into_iter()
        .filter(|e| e.contact_ids.iter().any(|id| id == contact_id))
        .collect())
}
