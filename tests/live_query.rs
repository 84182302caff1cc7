#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use std::time::Duration;

use minet_lib::contacts::{self, ContactFilter};
use minet_lib::live::{LiveQuery, QueryState};
use minet_lib::model::Tier;
use minet_lib::repo::Table;
use minet_lib::tags;
use util::{seed_contact, temp_store};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn reruns_after_dependency_write() {
    let store = temp_store().await;
    let mut live = LiveQuery::spawn(&store, &[Table::Contacts], |store| async move {
        contacts::list_contacts(&store, &ContactFilter::default())
            .await
            .map(|list| list.len())
    });

    let first = tokio::time::timeout(WAIT, live.wait_for(|s| !s.is_unknown()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, QueryState::Ready(0));

    seed_contact(&store, "Tuan", Tier::A).await;

    let next = tokio::time::timeout(WAIT, live.wait_for(|s| s.ready() == Some(&1)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.ready(), Some(&1));
}

#[tokio::test]
async fn unrelated_writes_do_not_rerun() {
    let store = temp_store().await;
    let mut live = LiveQuery::spawn(&store, &[Table::Contacts], |store| async move {
        contacts::list_contacts(&store, &ContactFilter::default())
            .await
            .map(|list| list.len())
    });
    tokio::time::timeout(WAIT, live.wait_for(|s| !s.is_unknown()))
        .await
        .unwrap()
        .unwrap();

    let mut rx = live.subscribe();
    rx.mark_unchanged();
    tags::create_tag(&store, "vip", None).await.unwrap();
    let changed = tokio::time::timeout(Duration::from_millis(200), rx.changed()).await;
    assert!(changed.is_err(), "tag write must not wake a contacts query");
    assert_eq!(live.current(), QueryState::Ready(0));
}

#[tokio::test]
async fn failed_rollback_publishes_nothing() {
    let store = temp_store().await;
    let mut live = LiveQuery::spawn(&store, &[Table::Contacts], |store| async move {
        contacts::list_contacts(&store, &ContactFilter::default())
            .await
            .map(|list| list.len())
    });
    tokio::time::timeout(WAIT, live.wait_for(|s| !s.is_unknown()))
        .await
        .unwrap()
        .unwrap();

    let mut rx = live.subscribe();
    rx.mark_unchanged();
    let err = contacts::update_contact(&store, "missing", Default::default()).await;
    assert!(err.is_err());
    let changed = tokio::time::timeout(Duration::from_millis(200), rx.changed()).await;
    assert!(changed.is_err());
}
