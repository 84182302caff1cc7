use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite};
use tracing::info;

use crate::custom_fields;
use crate::db::{Store, WriteTx};
use crate::model::{clean_opt, require_text, CustomFieldValue, RelationshipType, Tier};
use crate::repo::{self, decode_json, encode_json, Table};
use crate::time::{self, format_date, opt_from_ms, opt_parse_date};
use crate::{id, AppError, AppResult};

pub(crate) const COLUMNS: &str = "id, first_name, last_name, email, phone, company_id, title, \
     tier, relationship_type, tags, notes, birthday, linked_in, last_contacted_at, \
     next_follow_up_at, custom_fields, created_at, updated_at";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub tier: Tier,
    pub relationship_type: RelationshipType,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birthday: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_in: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_contacted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_follow_up_at: Option<DateTime<Utc>>,
    /// Custom field definition id to rendered value.
    #[serde(default)]
    pub custom_fields: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    fn matches_search(&self, needle: &str) -> bool {
        let name = self.display_name().to_lowercase();
        let email = self.email.as_deref().unwrap_or_default().to_lowercase();
        let phone = self.phone.as_deref().unwrap_or_default().to_lowercase();
        name.contains(needle) || email.contains(needle) || phone.contains(needle)
    }
}

impl TryFrom<&SqliteRow> for Contact {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            email: row.try_get("email")?,
            phone: row.try_get("phone")?,
            company_id: row.try_get("company_id")?,
            title: row.try_get("title")?,
            tier: row.try_get::<String, _>("tier")?.parse()?,
            relationship_type: row.try_get::<String, _>("relationship_type")?.parse()?,
            tags: decode_json(&row.try_get::<String, _>("tags")?, "tags")?,
            notes: row.try_get("notes")?,
            birthday: opt_parse_date(row.try_get("birthday")?)?,
            linked_in: row.try_get("linked_in")?,
            last_contacted_at: opt_from_ms(row.try_get("last_contacted_at")?)?,
            next_follow_up_at: opt_from_ms(row.try_get("next_follow_up_at")?)?,
            custom_fields: decode_json(
                &row.try_get::<String, _>("custom_fields")?,
                "custom_fields",
            )?,
            created_at: time::from_ms(row.try_get("created_at")?)?,
            updated_at: time::from_ms(row.try_get("updated_at")?)?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContact {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company_id: Option<String>,
    pub title: Option<String>,
    pub tier: Option<Tier>,
    pub relationship_type: Option<RelationshipType>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub notes: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub linked_in: Option<String>,
    pub next_follow_up_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, String>,
}

/// Partial update. Outer `None` leaves a field alone; `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct ContactPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub company_id: Option<Option<String>>,
    pub title: Option<Option<String>>,
    pub tier: Option<Tier>,
    pub relationship_type: Option<RelationshipType>,
    pub tags: Option<Vec<String>>,
    pub notes: Option<Option<String>>,
    pub birthday: Option<Option<NaiveDate>>,
    pub linked_in: Option<Option<String>>,
    pub last_contacted_at: Option<Option<DateTime<Utc>>>,
    pub next_follow_up_at: Option<Option<DateTime<Utc>>>,
}

/// List filters, combined with AND.
#[derive(Debug, Clone, Default)]
pub struct ContactFilter {
    pub tier: Option<Tier>,
    pub relationship_type: Option<RelationshipType>,
    pub tag: Option<String>,
    pub company_id: Option<String>,
    /// Case-insensitive substring over display name, email and phone.
    pub search: Option<String>,
}

/// What a contact delete removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactDeletion {
    pub contact_removed: bool,
    pub interactions_removed: u64,
    pub reminders_removed: u64,
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_string();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

/// Inserts or replaces the full row.
pub(crate) async fn put<'e, E>(exec: E, c: &Contact) -> AppResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "INSERT OR REPLACE INTO contacts ({COLUMNS}) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    );
    sqlx::query(&sql)
        .bind(&c.id)
        .bind(&c.first_name)
        .bind(&c.last_name)
        .bind(&c.email)
        .bind(&c.phone)
        .bind(&c.company_id)
        .bind(&c.title)
        .bind(c.tier.as_str())
        .bind(c.relationship_type.as_str())
        .bind(encode_json(&c.tags)?)
        .bind(&c.notes)
        .bind(c.birthday.as_ref().map(format_date))
        .bind(&c.linked_in)
        .bind(c.last_contacted_at.as_ref().map(time::to_ms))
        .bind(c.next_follow_up_at.as_ref().map(time::to_ms))
        .bind(encode_json(&c.custom_fields)?)
        .bind(time::to_ms(&c.created_at))
        .bind(time::to_ms(&c.updated_at))
        .execute(exec)
        .await?;
    Ok(())
}

pub(crate) async fn fetch<'e, E>(exec: E, id: &str) -> AppResult<Option<Contact>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {COLUMNS} FROM contacts WHERE id = ?");
    let row = sqlx::query(&sql).bind(id).fetch_optional(exec).await?;
    row.as_ref().map(Contact::try_from).transpose()
}

pub(crate) async fn fetch_all<'e, E>(exec: E) -> AppResult<Vec<Contact>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {COLUMNS} FROM contacts ORDER BY first_name, id");
    let rows = sqlx::query(&sql).fetch_all(exec).await?;
    rows.iter().map(Contact::try_from).collect()
}

pub(crate) async fn require(tx: &mut WriteTx, id: &str) -> AppResult<Contact> {
    fetch(tx.conn(), id).await?.ok_or_else(|| not_found(id))
}

pub(crate) fn not_found(id: &str) -> AppError {
    AppError::integrity("CONTACT_NOT_FOUND", "Contact not found").with_context("id", id)
}

/// Parses each raw value against its definition. Blank values are dropped
/// and keys without a definition are refused.
async fn checked_custom_fields(
    tx: &mut WriteTx,
    raw: BTreeMap<String, String>,
) -> AppResult<BTreeMap<String, String>> {
    let mut checked = BTreeMap::new();
    for (field_id, raw) in raw {
        if raw.trim().is_empty() {
            continue;
        }
        let def = custom_fields::fetch(tx.conn(), &field_id)
            .await?
            .ok_or_else(|| custom_fields::not_found(&field_id))?;
        let value = CustomFieldValue::parse(def.field_type, &raw)
            .map_err(|err| err.with_context("field", def.id.clone()))?;
        if !value.is_empty() {
            checked.insert(def.id, value.render());
        }
    }
    Ok(checked)
}

pub async fn create_contact(store: &Store, input: NewContact) -> AppResult<Contact> {
    let now = time::now();
    let mut contact = Contact {
        id: id::new_id(),
        first_name: require_text("firstName", &input.first_name)?,
        last_name: require_text("lastName", &input.last_name)?,
        email: clean_opt(input.email),
        phone: clean_opt(input.phone),
        company_id: clean_opt(input.company_id),
        title: clean_opt(input.title),
        tier: input.tier.unwrap_or(Tier::C),
        relationship_type: input.relationship_type.unwrap_or(RelationshipType::Other),
        tags: normalize_tags(input.tags),
        notes: clean_opt(input.notes),
        birthday: input.birthday,
        linked_in: clean_opt(input.linked_in),
        last_contacted_at: None,
        next_follow_up_at: input.next_follow_up_at,
        custom_fields: BTreeMap::new(),
        created_at: now,
        updated_at: now,
    };

    let raw_fields = input.custom_fields;
    let mut tx = store.begin("create_contact").await?;
    let result: AppResult<_> = async {
        contact.custom_fields = checked_custom_fields(&mut tx, raw_fields).await?;
        put(tx.conn(), &contact).await?;
        tx.touch(Table::Contacts);
        Ok(contact)
    }
    .await;
    tx.finish(result).await
}

pub async fn get_contact(store: &Store, id: &str) -> AppResult<Option<Contact>> {
    fetch(store.pool(), id).await
}

pub async fn update_contact(store: &Store, id: &str, patch: ContactPatch) -> AppResult<Contact> {
    let mut tx = store.begin("update_contact").await?;
    let result = apply_patch(&mut tx, id, patch).await;
    tx.finish(result).await
}

async fn apply_patch(tx: &mut WriteTx, id: &str, patch: ContactPatch) -> AppResult<Contact> {
    let mut c = require(tx, id).await?;
    if let Some(v) = patch.first_name {
        c.first_name = require_text("firstName", &v)?;
    }
    if let Some(v) = patch.last_name {
        c.last_name = require_text("lastName", &v)?;
    }
    if let Some(v) = patch.email {
        c.email = clean_opt(v);
    }
    if let Some(v) = patch.phone {
        c.phone = clean_opt(v);
    }
    if let Some(v) = patch.company_id {
        c.company_id = clean_opt(v);
    }
    if let Some(v) = patch.title {
        c.title = clean_opt(v);
    }
    if let Some(v) = patch.tier {
        c.tier = v;
    }
    if let Some(v) = patch.relationship_type {
        c.relationship_type = v;
    }
    if let Some(v) = patch.tags {
        c.tags = normalize_tags(v);
    }
    if let Some(v) = patch.notes {
        c.notes = clean_opt(v);
    }
    if let Some(v) = patch.birthday {
        c.birthday = v;
    }
    if let Some(v) = patch.linked_in {
        c.linked_in = clean_opt(v);
    }
    if let Some(v) = patch.last_contacted_at {
        c.last_contacted_at = v;
    }
    if let Some(v) = patch.next_follow_up_at {
        c.next_follow_up_at = v;
    }
    c.updated_at = time::now();
    put(tx.conn(), &c).await?;
    tx.touch(Table::Contacts);
    Ok(c)
}

/// Stamps `lastContactedAt` with the current time.
pub async fn log_contact_now(store: &Store, id: &str) -> AppResult<Contact> {
    let patch = ContactPatch {
        last_contacted_at: Some(Some(time::now())),
        ..ContactPatch::default()
    };
    update_contact(store, id, patch).await
}

/// Sets or clears one custom field value, validated against its definition.
pub async fn set_custom_field(
    store: &Store,
    contact_id: &str,
    field_id: &str,
    raw: Option<&str>,
) -> AppResult<Contact> {
    let mut tx = store.begin("set_custom_field").await?;
    let result: AppResult<_> = async {
        let def = custom_fields::fetch(tx.conn(), field_id)
            .await?
            .ok_or_else(|| custom_fields::not_found(field_id))?;
        let mut c = require(&mut tx, contact_id).await?;
        let value = raw
            .map(|raw| CustomFieldValue::parse(def.field_type, raw))
            .transpose()?
            .filter(|value| !value.is_empty());
        match value {
            Some(value) => {
                c.custom_fields.insert(def.id.clone(), value.render());
            }
            None if def.is_required => {
                return Err(AppError::validation(
                    "REQUIRED",
                    format!("{} is required", def.name),
                )
                .with_context("field", def.id.clone()));
            }
            None => {
                c.custom_fields.remove(&def.id);
            }
        }
        c.updated_at = time::now();
        put(tx.conn(), &c).await?;
        tx.touch(Table::Contacts);
        Ok(c)
    }
    .await;
    tx.finish(result).await
}

pub async fn list_contacts(store: &Store, filter: &ContactFilter) -> AppResult<Vec<Contact>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM contacts \
         WHERE (?1 IS NULL OR tier = ?1) \
           AND (?2 IS NULL OR relationship_type = ?2) \
           AND (?3 IS NULL OR company_id = ?3) \
         ORDER BY first_name, id"
    );
    let rows = sqlx::query(&sql)
        .bind(filter.tier.map(Tier::as_str))
        .bind(filter.relationship_type.map(RelationshipType::as_str))
        .bind(filter.company_id.as_deref())
        .fetch_all(store.pool())
        .await?;

    let needle = filter
        .search
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let contact = Contact::try_from(row)?;
        if let Some(tag) = filter.tag.as_deref() {
            if !contact.tags.iter().any(|t| t == tag) {
                continue;
            }
        }
        if let Some(needle) = needle.as_deref() {
            if !contact.matches_search(needle) {
                continue;
            }
        }
        out.push(contact);
    }
    Ok(out)
}

/// Deletes the contact together with its interactions and reminders.
/// Events keep whatever ids they hold. Deleting a missing id is a no-op.
pub async fn delete_contact(store: &Store, id: &str) -> AppResult<ContactDeletion> {
    let mut tx = store.begin("delete_contact").await?;
    let result: AppResult<_> = async {
        let contact_removed = repo::delete_by_id(tx.conn(), Table::Contacts, id).await?;
        let interactions_removed = sqlx::query("DELETE FROM interactions WHERE contact_id = ?")
            .bind(id)
            .execute(tx.conn())
            .await?
            .rows_affected();
        let reminders_removed = sqlx::query("DELETE FROM reminders WHERE contact_id = ?")
            .bind(id)
            .execute(tx.conn())
            .await?
            .rows_affected();
        tx.touch(Table::Contacts);
        tx.touch(Table::Interactions);
        tx.touch(Table::Reminders);
        Ok(ContactDeletion {
            contact_removed,
            interactions_removed,
            reminders_removed,
        })
    }
    .await;
    let deletion = tx.finish(result).await?;
    info!(
        target: "minet",
        event = "contact_cascade",
        id,
        removed = deletion.contact_removed,
        interactions = deletion.interactions_removed,
        reminders = deletion.reminders_removed
    );
    Ok(deletion)
}
