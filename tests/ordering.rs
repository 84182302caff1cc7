#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use chrono::{Duration, NaiveDate, Utc};
use minet_lib::contacts::{self, ContactFilter};
use minet_lib::events::{self, NewEvent};
use minet_lib::interactions::{self, NewInteraction};
use minet_lib::model::{InteractionType, Tier};
use minet_lib::tags;
use minet_lib::ErrorKind;
use util::{seed_contact, temp_store};

fn event_on(title: &str, date: NaiveDate) -> NewEvent {
    NewEvent {
        title: title.into(),
        date,
        end_date: None,
        location: None,
        description: None,
        contact_ids: Vec::new(),
        outcome: None,
        next_steps: None,
        follow_up_date: None,
    }
}

#[tokio::test]
async fn upcoming_events_include_today_soonest_first() {
    let store = temp_store().await;
    let today = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
    for (title, offset) in [("next week", 7), ("yesterday", -1), ("tomorrow", 1), ("today", 0)] {
        events::create_event(&store, event_on(title, today + Duration::days(offset)))
            .await
            .unwrap();
    }

    let upcoming = events::upcoming_events(&store, today, 10).await.unwrap();
    let titles: Vec<_> = upcoming.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, ["today", "tomorrow", "next week"]);

    let first = events::upcoming_events(&store, today, 1).await.unwrap();
    assert_eq!(first[0].title, "today");
}

#[tokio::test]
async fn equal_dates_order_by_id_for_stable_paging() {
    let store = temp_store().await;
    let c = seed_contact(&store, "Yen", Tier::A).await;
    let at = Utc::now() - Duration::days(2);
    let mut ids = Vec::new();
    for _ in 0..4 {
        let created = interactions::create_interaction(
            &store,
            NewInteraction {
                contact_id: c.id.clone(),
                kind: InteractionType::Message,
                date: at,
                notes: None,
                outcome: None,
            },
        )
        .await
        .unwrap();
        ids.push(created.id);
    }
    let newest = interactions::create_interaction(
        &store,
        NewInteraction {
            contact_id: c.id.clone(),
            kind: InteractionType::Call,
            date: at + Duration::hours(1),
            notes: None,
            outcome: None,
        },
    )
    .await
    .unwrap();
    ids.sort();
    ids.reverse();
    ids.insert(0, newest.id);

    let listed: Vec<_> = interactions::list_interactions(&store, Some(&c.id))
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(listed, ids);

    let mut paged = Vec::new();
    for offset in [0, 2, 4] {
        let page = interactions::recent_interactions(&store, 2, offset).await.unwrap();
        paged.extend(page.into_iter().map(|i| i.id));
    }
    assert_eq!(paged, ids);
}

#[tokio::test]
async fn constraint_failures_are_validation_errors() {
    let store = temp_store().await;
    let tag = tags::create_tag(&store, "family", None).await.unwrap();

    let err: minet_lib::AppError =
        sqlx::query("INSERT INTO tags (id, name, color, created_at) VALUES (?, 'dup', '#000000', 0)")
            .bind(&tag.id)
            .execute(store.pool())
            .await
            .unwrap_err()
            .into();
    assert!(err.code().starts_with("Sqlite/"), "{err}");
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn closed_store_reports_storage_errors() {
    let store = temp_store().await;
    seed_contact(&store, "Zung", Tier::B).await;
    store.close().await;

    let err = contacts::list_contacts(&store, &ContactFilter::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    let err = tags::create_tag(&store, "after-close", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
}
