use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite};
use tracing::info;

use crate::contacts::{self, Contact};
use crate::db::{Store, WriteTx};
use crate::model::{clean_opt, require_text, CustomFieldType, CustomFieldValue, FieldCategory};
use crate::repo::{self, Table};
use crate::time;
use crate::{id, AppError, AppResult};

const COLUMNS: &str = "id, name, type, category, sort_order, is_required, placeholder, icon";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomFieldDef {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: CustomFieldType,
    pub category: FieldCategory,
    pub order: i64,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl TryFrom<&SqliteRow> for CustomFieldDef {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            field_type: row.try_get::<String, _>("type")?.parse()?,
            category: row.try_get::<String, _>("category")?.parse()?,
            order: row.try_get("sort_order")?,
            is_required: row
                .try_get::<i64, _>("is_required")
                .map(|value| value != 0)?,
            placeholder: row.try_get("placeholder")?,
            icon: row.try_get("icon")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCustomFieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: CustomFieldType,
    pub category: FieldCategory,
    #[serde(default)]
    pub is_required: bool,
    pub placeholder: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CustomFieldDefPatch {
    pub name: Option<String>,
    pub field_type: Option<CustomFieldType>,
    pub category: Option<FieldCategory>,
    pub is_required: Option<bool>,
    pub placeholder: Option<Option<String>>,
    pub icon: Option<Option<String>>,
}

/// Built-in definitions offered on first use.
pub fn presets() -> Vec<NewCustomFieldDef> {
    let preset = |name: &str, field_type, category, placeholder: &str, icon: &str| {
        NewCustomFieldDef {
            name: name.to_string(),
            field_type,
            category,
            is_required: false,
            placeholder: Some(placeholder.to_string()),
            icon: Some(icon.to_string()),
        }
    };
    use CustomFieldType::{Phone, Textarea, Url};
    use FieldCategory::{Personal, Social};
    vec![
        preset("Facebook", Url, Social, "https://facebook.com/...", "Facebook"),
        preset("Instagram", Url, Social, "https://instagram.com/...", "Instagram"),
        preset("Twitter/X", Url, Social, "https://x.com/...", "Twitter"),
        preset("Zalo", Phone, Social, "0901234567", "Phone"),
        preset("Địa chỉ nhà", Textarea, Personal, "Số nhà, đường, quận...", "Home"),
        preset("Sở thích", Textarea, Personal, "Golf, đọc sách...", "Heart"),
        preset("Fanpage", Url, Social, "https://facebook.com/...", "Globe"),
    ]
}

pub(crate) fn not_found(id: &str) -> AppError {
    AppError::integrity("CUSTOM_FIELD_NOT_FOUND", "Custom field not found").with_context("id", id)
}

pub(crate) async fn put<'e, E>(exec: E, d: &CustomFieldDef) -> AppResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("INSERT OR REPLACE INTO custom_field_defs ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)");
    sqlx::query(&sql)
        .bind(&d.id)
        .bind(&d.name)
        .bind(d.field_type.as_str())
        .bind(d.category.as_str())
        .bind(d.order)
        .bind(d.is_required as i64)
        .bind(&d.placeholder)
        .bind(&d.icon)
        .execute(exec)
        .await?;
    Ok(())
}

pub(crate) async fn fetch<'e, E>(exec: E, id: &str) -> AppResult<Option<CustomFieldDef>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {COLUMNS} FROM custom_field_defs WHERE id = ?");
    let row = sqlx::query(&sql).bind(id).fetch_optional(exec).await?;
    row.as_ref().map(CustomFieldDef::try_from).transpose()
}

pub(crate) async fn fetch_all<'e, E>(exec: E) -> AppResult<Vec<CustomFieldDef>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {COLUMNS} FROM custom_field_defs ORDER BY sort_order, id");
    let rows = sqlx::query(&sql).fetch_all(exec).await?;
    rows.iter().map(CustomFieldDef::try_from).collect()
}

async fn insert_next(tx: &mut WriteTx, input: NewCustomFieldDef) -> AppResult<CustomFieldDef> {
    let max: Option<i64> = sqlx::query_scalar("SELECT MAX(sort_order) FROM custom_field_defs")
        .fetch_one(tx.conn())
        .await?;
    let def = CustomFieldDef {
        id: id::new_id(),
        name: require_text("name", &input.name)?,
        field_type: input.field_type,
        category: input.category,
        order: max.map(|m| m + 1).unwrap_or(0),
        is_required: input.is_required,
        placeholder: clean_opt(input.placeholder),
        icon: clean_opt(input.icon),
    };
    put(tx.conn(), &def).await?;
    tx.touch(Table::CustomFieldDefs);
    Ok(def)
}

/// Appends a definition after the current highest order.
pub async fn create_custom_field_def(
    store: &Store,
    input: NewCustomFieldDef,
) -> AppResult<CustomFieldDef> {
    let mut tx = store.begin("create_custom_field_def").await?;
    let result = insert_next(&mut tx, input).await;
    tx.finish(result).await
}

/// Adds any preset whose name is not already defined. Returns what was added.
pub async fn install_presets(store: &Store) -> AppResult<Vec<CustomFieldDef>> {
    let mut tx = store.begin("install_presets").await?;
    let result: AppResult<_> = async {
        let existing: Vec<String> = sqlx::query_scalar("SELECT name FROM custom_field_defs")
            .fetch_all(tx.conn())
            .await?;
        let mut added = Vec::new();
        for preset in presets() {
            if existing.iter().any(|name| name == &preset.name) {
                continue;
            }
            added.push(insert_next(&mut tx, preset).await?);
        }
        Ok(added)
    }
    .await;
    tx.finish(result).await
}

pub async fn update_custom_field_def(
    store: &Store,
    id: &str,
    patch: CustomFieldDefPatch,
) -> AppResult<CustomFieldDef> {
    let mut tx = store.begin("update_custom_field_def").await?;
    let result: AppResult<_> = async {
        let mut def = fetch(tx.conn(), id).await?.ok_or_else(|| not_found(id))?;
        if let Some(v) = patch.name {
            def.name = require_text("name", &v)?;
        }
        if let Some(v) = patch.field_type {
            def.field_type = v;
        }
        if let Some(v) = patch.category {
            def.category = v;
        }
        if let Some(v) = patch.is_required {
            def.is_required = v;
        }
        if let Some(v) = patch.placeholder {
            def.placeholder = clean_opt(v);
        }
        if let Some(v) = patch.icon {
            def.icon = clean_opt(v);
        }
        put(tx.conn(), &def).await?;
        tx.touch(Table::CustomFieldDefs);
        Ok(def)
    }
    .await;
    tx.finish(result).await
}

/// Deletes a definition. With `purge_data`, also strips its key from every
/// contact's custom values (bumping `updatedAt` on each contact touched);
/// otherwise stored values are left orphaned. Returns contacts touched.
pub async fn delete_custom_field_def(store: &Store, id: &str, purge_data: bool) -> AppResult<u64> {
    let mut tx = store.begin("delete_custom_field_def").await?;
    let result: AppResult<_> = async {
        repo::delete_by_id(tx.conn(), Table::CustomFieldDefs, id).await?;
        tx.touch(Table::CustomFieldDefs);
        if !purge_data {
            return Ok(0);
        }
        let now = time::now();
        let mut touched = 0u64;
        for mut contact in contacts::fetch_all(tx.conn()).await? {
            if contact.custom_fields.remove(id).is_some() {
                contact.updated_at = now;
                contacts::put(tx.conn(), &contact).await?;
                touched += 1;
            }
        }
        if touched > 0 {
            tx.touch(Table::Contacts);
        }
        Ok(touched)
    }
    .await;
    let touched = tx.finish(result).await?;
    info!(target: "minet", event = "custom_field_deleted", id, purge_data, contacts = touched);
    Ok(touched)
}

/// Sets `order` to each id's index in `ordered_ids`. Ids not listed keep
/// their current order, so a partial list can produce duplicate orders.
pub async fn reorder_custom_field_defs(store: &Store, ordered_ids: &[String]) -> AppResult<()> {
    let mut tx = store.begin("reorder_custom_field_defs").await?;
    let result: AppResult<_> = async {
        for (index, id) in ordered_ids.iter().enumerate() {
            sqlx::query("UPDATE custom_field_defs SET sort_order = ? WHERE id = ?")
                .bind(index as i64)
                .bind(id)
                .execute(tx.conn())
                .await?;
        }
        tx.touch(Table::CustomFieldDefs);
        Ok(())
    }
    .await;
    tx.finish(result).await
}

pub async fn list_custom_field_defs(store: &Store) -> AppResult<Vec<CustomFieldDef>> {
    fetch_all(store.pool()).await
}

/// Typed view of a contact's custom values in definition order. Orphaned
/// keys and values that no longer parse under their definition are skipped.
pub fn typed_values(
    contact: &Contact,
    defs: &[CustomFieldDef],
) -> Vec<(CustomFieldDef, CustomFieldValue)> {
    defs.iter()
        .filter_map(|def| {
            let raw = contact.custom_fields.get(&def.id)?;
            CustomFieldValue::parse(def.field_type, raw)
                .ok()
                .map(|value| (def.clone(), value))
        })
        .collect()
}

/// Required definitions that the contact has no value for.
pub fn missing_required<'a>(contact: &Contact, defs: &'a [CustomFieldDef]) -> Vec<&'a CustomFieldDef> {
    defs.iter()
        .filter(|def| def.is_required)
        .filter(|def| {
            contact
                .custom_fields
                .get(&def.id)
                .map(|v| v.trim().is_empty())
                .unwrap_or(true)
        })
        .collect()
}
