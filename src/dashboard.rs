//! Aggregate views over the store. Nothing here is persisted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::contacts::{self, Contact};
use crate::db::Store;
use crate::interactions::{self, Interaction};
use crate::repo::{self, Table};
use crate::time;
use crate::AppResult;

/// Size of the dashboard follow-up list.
pub const FOLLOW_UP_LIMIT: usize = 5;

/// Days-since value used to rank contacts that were never contacted.
const NEVER_CONTACTED_DAYS: i64 = 999;

/// Whether `contact` is overdue for a follow-up at `now`. Only tiers A and B
/// qualify; the threshold itself counts as overdue.
pub fn needs_follow_up(contact: &Contact, now: DateTime<Utc>) -> bool {
    let Some(threshold) = contact.tier.follow_up_threshold_days() else {
        return false;
    };
    match contact.last_contacted_at {
        None => true,
        Some(last) => time::days_between(&last, &now) >= threshold,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUp {
    pub contact: Contact,
    /// `None` when the contact was never reached.
    pub days_since_contact: Option<i64>,
}

impl FollowUp {
    fn rank(&self) -> i64 {
        self.days_since_contact.unwrap_or(NEVER_CONTACTED_DAYS)
    }
}

/// Ranks every overdue contact, longest-neglected first, and keeps the top
/// `limit`.
pub fn rank_follow_ups(contacts: Vec<Contact>, now: DateTime<Utc>, limit: usize) -> Vec<FollowUp> {
    let mut due: Vec<FollowUp> = contacts
        .into_iter()
        .filter(|c| needs_follow_up(c, now))
        .map(|contact| FollowUp {
            days_since_contact: contact
                .last_contacted_at
                .map(|last| time::days_between(&last, &now)),
            contact,
        })
        .collect();
    due.sort_by(|a, b| {
        b.days_since_contact
            .is_none()
            .cmp(&a.days_since_contact.is_none())
            .then(b.rank().cmp(&a.rank()))
            .then_with(|| a.contact.id.cmp(&b.contact.id))
    });
    due.truncate(limit);
    due
}

pub async fn follow_up_list(store: &Store, now: DateTime<Utc>) -> AppResult<Vec<FollowUp>> {
    let all = contacts::fetch_all(store.pool()).await?;
    Ok(rank_follow_ups(all, now, FOLLOW_UP_LIMIT))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub contacts: i64,
    pub companies: i64,
    pub events: i64,
    pub pending_reminders: i64,
}

pub async fn stats(store: &Store) -> AppResult<DashboardStats> {
    let pool = store.pool();
    let pending_reminders: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM reminders WHERE is_completed = 0")
            .fetch_one(pool)
            .await?;
    Ok(DashboardStats {
        contacts: repo::count(pool, Table::Contacts).await?,
        companies: repo::count(pool, Table::Companies).await?,
        events: repo::count(pool, Table::Events).await?,
        pending_reminders,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentInteraction {
    pub interaction: Interaction,
    /// Absent if the contact has since been deleted.
    pub contact: Option<Contact>,
}

pub async fn recent_activity(store: &Store, limit: i64) -> AppResult<Vec<RecentInteraction>> {
    let recent = interactions::recent_interactions(store, limit, 0).await?;
    let mut by_id: HashMap<String, Contact> = HashMap::new();
    for item in &recent {
        if by_id.contains_key(&item.contact_id) {
            continue;
        }
        if let Some(contact) = contacts::fetch(store.pool(), &item.contact_id).await? {
            by_id.insert(contact.id.clone(), contact);
        }
    }
    Ok(recent
        .into_iter()
        .map(|interaction| RecentInteraction {
            contact: by_id.get(&interaction.contact_id).cloned(),
            interaction,
        })
        .collect())
}

/// Tables every dashboard view reads, for wiring into a live query.
pub const DEPENDS_ON: &[Table] = &[
    Table::Contacts,
    Table::Companies,
    Table::Events,
    Table::Reminders,
    Table::Interactions,
];
