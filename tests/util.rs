#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use minet_lib::config::AppConfig;
use minet_lib::contacts::{self, Contact, ContactPatch, NewContact};
use minet_lib::db::Store;
use minet_lib::model::Tier;
use minet_lib::security::{ManualClock, NoBiometrics};
use minet_lib::AppState;

pub async fn temp_store() -> Store {
    Store::in_memory().await.expect("open in-memory store")
}

pub async fn temp_state() -> (AppState, ManualClock) {
    let clock = ManualClock::new();
    let state = AppState::with_store(
        AppConfig::at(std::env::temp_dir().join("minet-tests")),
        temp_store().await,
        Arc::new(NoBiometrics),
        Arc::new(clock.clone()),
    )
    .await
    .expect("build app state");
    (state, clock)
}

pub async fn seed_contact(store: &Store, first: &str, tier: Tier) -> Contact {
    contacts::create_contact(
        store,
        NewContact {
            first_name: first.into(),
            last_name: "Tester".into(),
            tier: Some(tier),
            ..NewContact::default()
        },
    )
    .await
    .expect("create contact")
}

pub async fn set_last_contacted(store: &Store, id: &str, at: Option<DateTime<Utc>>) -> Contact {
    contacts::update_contact(
        store,
        id,
        ContactPatch {
            last_contacted_at: Some(at),
            ..ContactPatch::default()
        },
    )
    .await
    .expect("update contact")
}

pub fn days_ago(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now - Duration::days(days)
}
