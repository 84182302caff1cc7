use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite};

use crate::db::{Store, WriteTx};
use crate::model::{clean_opt, require_text};
use crate::repo::{self, Table, ACTIVITY_TABLES};
use crate::time;
use crate::{AppError, AppResult};

/// The profile table holds at most this one row.
pub const PROFILE_ID: &str = "current-user";

const COLUMNS: &str = "id, google_id, display_name, email, avatar_url, custom_avatar_base64, \
     bio, job_title, organization, updated_at";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_id: Option<String>,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_avatar_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<&SqliteRow> for UserProfile {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            google_id: row.try_get("google_id")?,
            display_name: row.try_get("display_name")?,
            email: row.try_get("email")?,
            avatar_url: row.try_get("avatar_url")?,
            custom_avatar_base64: row.try_get("custom_avatar_base64")?,
            bio: row.try_get("bio")?,
            job_title: row.try_get("job_title")?,
            organization: row.try_get("organization")?,
            updated_at: time::from_ms(row.try_get("updated_at")?)?,
        })
    }
}

/// Profile fields handed over by the identity provider after sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityProfile {
    pub subject_id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

impl UserProfile {
    pub fn from_identity(identity: &IdentityProfile) -> AppResult<Self> {
        Ok(Self {
            id: PROFILE_ID.to_string(),
            google_id: Some(require_text("subjectId", &identity.subject_id)?),
            display_name: require_text("displayName", &identity.display_name)?,
            email: clean_opt(identity.email.clone()),
            avatar_url: clean_opt(identity.avatar_url.clone()),
            custom_avatar_base64: None,
            bio: None,
            job_title: None,
            organization: None,
            updated_at: time::now(),
        })
    }
}

pub(crate) async fn fetch<'e, E>(exec: E) -> AppResult<Option<UserProfile>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {COLUMNS} FROM user_profile WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(PROFILE_ID)
        .fetch_optional(exec)
        .await?;
    row.as_ref().map(UserProfile::try_from).transpose()
}

pub(crate) async fn put_in(tx: &mut WriteTx, p: &UserProfile) -> AppResult<()> {
    let sql = format!(
        "INSERT OR REPLACE INTO user_profile ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    );
    sqlx::query(&sql)
        .bind(PROFILE_ID)
        .bind(&p.google_id)
        .bind(&p.display_name)
        .bind(&p.email)
        .bind(&p.avatar_url)
        .bind(&p.custom_avatar_base64)
        .bind(&p.bio)
        .bind(&p.job_title)
        .bind(&p.organization)
        .bind(time::to_ms(&p.updated_at))
        .execute(tx.conn())
        .await?;
    tx.touch(Table::UserProfile);
    Ok(())
}

pub async fn get_profile(store: &Store) -> AppResult<Option<UserProfile>> {
    fetch(store.pool()).await
}

/// Creates or overwrites the singleton profile. The id is always forced to
/// [`PROFILE_ID`].
pub async fn save_profile(store: &Store, profile: &UserProfile) -> AppResult<UserProfile> {
    let mut saved = profile.clone();
    saved.id = PROFILE_ID.to_string();
    saved.display_name = require_text("displayName", &saved.display_name)?;
    saved.updated_at = time::now();
    let mut tx = store.begin("save_profile").await?;
    let result = put_in(&mut tx, &saved).await;
    tx.finish(result).await?;
    Ok(saved)
}

pub async fn delete_profile(store: &Store) -> AppResult<bool> {
    let mut tx = store.begin("delete_profile").await?;
    let result = repo::delete_by_id(tx.conn(), Table::UserProfile, PROFILE_ID).await;
    tx.touch(Table::UserProfile);
    tx.finish(result).await
}

/// Whether any contacts, events, reminders or interactions exist.
pub async fn has_crm_data(store: &Store) -> AppResult<bool> {
    for table in ACTIVITY_TABLES {
        if repo::count(store.pool(), *table).await? > 0 {
            return Ok(true);
        }
    }
    Ok(false)
}
