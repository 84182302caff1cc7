use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite};
use tracing::info;

use crate::db::Store;
use crate::model::{clean_opt, require_text};
use crate::repo::{self, Table};
use crate::time;
use crate::{id, AppError, AppResult};

const COLUMNS: &str =
    "id, name, industry, website, phone, address, notes, size, created_at, updated_at";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Headcount band such as "1-10" or "500+".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<&SqliteRow> for Company {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            industry: row.try_get("industry")?,
            website: row.try_get("website")?,
            phone: row.try_get("phone")?,
            address: row.try_get("address")?,
            notes: row.try_get("notes")?,
            size: row.try_get("size")?,
            created_at: time::from_ms(row.try_get("created_at")?)?,
            updated_at: time::from_ms(row.try_get("updated_at")?)?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCompany {
    pub name: String,
    pub industry: Option<String>,
    pub website: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub size: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CompanyPatch {
    pub name: Option<String>,
    pub industry: Option<Option<String>>,
    pub website: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub address: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub size: Option<Option<String>>,
}

pub(crate) async fn put<'e, E>(exec: E, c: &Company) -> AppResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("INSERT OR REPLACE INTO companies ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)");
    sqlx::query(&sql)
        .bind(&c.id)
        .bind(&c.name)
        .bind(&c.industry)
        .bind(&c.website)
        .bind(&c.phone)
        .bind(&c.address)
        .bind(&c.notes)
        .bind(&c.size)
        .bind(time::to_ms(&c.created_at))
        .bind(time::to_ms(&c.updated_at))
        .execute(exec)
        .await?;
    Ok(())
}

pub(crate) async fn fetch_all<'e, E>(exec: E) -> AppResult<Vec<Company>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {COLUMNS} FROM companies ORDER BY name, id");
    let rows = sqlx::query(&sql).fetch_all(exec).await?;
    rows.iter().map(Company::try_from).collect()
}

pub async fn create_company(store: &Store, input: NewCompany) -> AppResult<Company> {
    let now = time::now();
    let company = Company {
        id: id::new_id(),
        name: require_text("name", &input.name)?,
        industry: clean_opt(input.industry),
        website: clean_opt(input.website),
        phone: clean_opt(input.phone),
        address: clean_opt(input.address),
        notes: clean_opt(input.notes),
        size: clean_opt(input.size),
        created_at: now,
        updated_at: now,
    };
    let mut tx = store.begin("create_company").await?;
    let result = put(tx.conn(), &company).await;
    tx.touch(Table::Companies);
    tx.finish(result).await?;
    Ok(company)
}

pub async fn get_company(store: &Store, id: &str) -> AppResult<Option<Company>> {
    let sql = format!("SELECT {COLUMNS} FROM companies WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(store.pool())
        .await?;
    row.as_ref().map(Company::try_from).transpose()
}

pub async fn update_company(store: &Store, id: &str, patch: CompanyPatch) -> AppResult<Company> {
    let mut tx = store.begin("update_company").await?;
    let result: AppResult<_> = async {
        let sql = format!("SELECT {COLUMNS} FROM companies WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(tx.conn())
            .await?
            .ok_or_else(|| {
                AppError::integrity("COMPANY_NOT_FOUND", "Company not found").with_context("id", id)
            })?;
        let mut c = Company::try_from(&row)?;
        if let Some(v) = patch.name {
            c.name = require_text("name", &v)?;
        }
        if let Some(v) = patch.industry {
            c.industry = clean_opt(v);
        }
        if let Some(v) = patch.website {
            c.website = clean_opt(v);
        }
        if let Some(v) = patch.phone {
            c.phone = clean_opt(v);
        }
        if let Some(v) = patch.address {
            c.address = clean_opt(v);
        }
        if let Some(v) = patch.notes {
            c.notes = clean_opt(v);
        }
        if let Some(v) = patch.size {
            c.size = clean_opt(v);
        }
        c.updated_at = time::now();
        put(tx.conn(), &c).await?;
        tx.touch(Table::Companies);
        Ok(c)
    }
    .await;
    tx.finish(result).await
}

/// Companies sorted by name, optionally filtered by a case-insensitive
/// substring of name or industry.
pub async fn list_companies(store: &Store, search: Option<&str>) -> AppResult<Vec<Company>> {
    let all = fetch_all(store.pool()).await?;
    let needle = search.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty());
    Ok(match needle {
        None => all,
        Some(needle) => all
            .into_iter()
            .filter(|c| {
                c.name.to_lowercase().contains(&needle)
                    || c
                        .industry
                        .as_deref()
                        .map(|i| i.to_lowercase().contains(&needle))
                        .unwrap_or(false)
            })
            .collect(),
    })
}

/// Deletes the company and detaches every contact that referenced it.
/// Returns the number of contacts detached.
pub async fn delete_company(store: &Store, id: &str) -> AppResult<u64> {
    let mut tx = store.begin("delete_company").await?;
    let result: AppResult<_> = async {
        repo::delete_by_id(tx.conn(), Table::Companies, id).await?;
        let detached = sqlx::query(
            "UPDATE contacts SET company_id = NULL, updated_at = ? WHERE company_id = ?",
        )
        .bind(time::now_ms())
        .bind(id)
        .execute(tx.conn())
        .await?
        .rows_affected();
        tx.touch(Table::Companies);
        if detached > 0 {
            tx.touch(Table::Contacts);
        }
        Ok(detached)
    }
    .await;
    let detached = tx.finish(result).await?;
    info!(target: "minet", event = "company_detach", id, contacts = detached);
    Ok(detached)
}
