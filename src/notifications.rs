//! Reminder and follow-up notices. The platform decides whether they may be
//! shown; when it says no, every query here comes back empty.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::contacts::{self, Contact};
use crate::db::Store;
use crate::reminders::{self, Reminder};
use crate::time;
use crate::AppResult;

pub const DEFAULT_NOTICE_LIMIT: usize = 5;

const GENERIC_TITLE: &str = "Reminder";

/// Platform notification permission, asked as a plain yes/no.
pub trait NotificationPermission: Send + Sync {
    fn granted(&self) -> bool;
}

/// Fixed answer, for hosts without a permission prompt and for tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission(pub bool);

impl NotificationPermission for StaticPermission {
    fn granted(&self) -> bool {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderNotice {
    pub title: String,
    pub body: String,
    pub reminder: Reminder,
}

fn notice_title(contact: Option<&Contact>) -> String {
    match contact {
        Some(c) => format!("{GENERIC_TITLE}: {}", c.display_name()),
        None => GENERIC_TITLE.to_string(),
    }
}

/// Open reminders already due at `now`, oldest first, at most `limit`.
pub async fn due_reminder_notices(
    store: &Store,
    permission: &dyn NotificationPermission,
    now: DateTime<Utc>,
    limit: usize,
) -> AppResult<Vec<ReminderNotice>> {
    if !permission.granted() {
        return Ok(Vec::new());
    }
    let due = reminders::due_reminders(store, now).await?;
    let mut notices = Vec::with_capacity(due.len().min(limit));
    for reminder in due.into_iter().take(limit) {
        let contact = contacts::fetch(store.pool(), &reminder.contact_id).await?;
        notices.push(ReminderNotice {
            title: notice_title(contact.as_ref()),
            body: reminder.title.clone(),
            reminder,
        });
    }
    Ok(notices)
}

/// Contacts whose planned follow-up falls within `lead_days` of `now`.
pub async fn contacts_due_for_follow_up(
    store: &Store,
    permission: &dyn NotificationPermission,
    now: DateTime<Utc>,
    lead_days: u32,
) -> AppResult<Vec<Contact>> {
    if !permission.granted() {
        return Ok(Vec::new());
    }
    let until = time::add_days_saturating(now, i64::from(lead_days));
    let mut due: Vec<Contact> = contacts::fetch_all(store.pool())
        .await?
        .into_iter()
        .filter(|c| matches!(c.next_follow_up_at, Some(at) if at >= now && at <= until))
        .collect();
    due.sort_by_key(|c| c.next_follow_up_at);
    Ok(due)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_falls_back_when_contact_missing() {
        assert_eq!(notice_title(None), "Reminder");
    }
}
