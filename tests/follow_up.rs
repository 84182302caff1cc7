#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use chrono::{Duration, Utc};
use minet_lib::contacts;
use minet_lib::dashboard::{self, FOLLOW_UP_LIMIT};
use minet_lib::model::Tier;
use minet_lib::notifications::{self, StaticPermission};
use minet_lib::reminders::{self, NewReminder};
use util::{days_ago, seed_contact, set_last_contacted, temp_store};

#[tokio::test]
async fn tier_thresholds_are_inclusive() {
    let store = temp_store().await;
    let now = Utc::now();

    let a_due = seed_contact(&store, "ADue", Tier::A).await;
    let a_due = set_last_contacted(&store, &a_due.id, Some(days_ago(now, 14))).await;
    let a_fresh = seed_contact(&store, "AFresh", Tier::A).await;
    let a_fresh = set_last_contacted(&store, &a_fresh.id, Some(days_ago(now, 13))).await;
    let b_due = seed_contact(&store, "BDue", Tier::B).await;
    let b_due = set_last_contacted(&store, &b_due.id, Some(days_ago(now, 30))).await;
    let b_fresh = seed_contact(&store, "BFresh", Tier::B).await;
    let b_fresh = set_last_contacted(&store, &b_fresh.id, Some(days_ago(now, 29))).await;
    let c_never = seed_contact(&store, "CNever", Tier::C).await;

    assert!(dashboard::needs_follow_up(&a_due, now));
    assert!(!dashboard::needs_follow_up(&a_fresh, now));
    assert!(dashboard::needs_follow_up(&b_due, now));
    assert!(!dashboard::needs_follow_up(&b_fresh, now));
    assert!(!dashboard::needs_follow_up(&c_never, now));
}

#[tokio::test]
async fn never_contacted_rank_first_then_longest_gap() {
    let store = temp_store().await;
    let now = Utc::now();

    let old = seed_contact(&store, "Old", Tier::B).await;
    set_last_contacted(&store, &old.id, Some(days_ago(now, 90))).await;
    let recent = seed_contact(&store, "Recent", Tier::A).await;
    set_last_contacted(&store, &recent.id, Some(days_ago(now, 20))).await;
    let never = seed_contact(&store, "Never", Tier::A).await;
    seed_contact(&store, "Ignored", Tier::D).await;

    let list = dashboard::follow_up_list(&store, now).await.unwrap();
    let names: Vec<&str> = list.iter().map(|f| f.contact.first_name.as_str()).collect();
    assert_eq!(names, vec!["Never", "Old", "Recent"]);
    assert_eq!(list[0].days_since_contact, None);
    assert_eq!(list[1].days_since_contact, Some(90));
    assert_eq!(list[0].contact.id, never.id);
}

#[tokio::test]
async fn follow_up_list_is_capped() {
    let store = temp_store().await;
    for i in 0..(FOLLOW_UP_LIMIT + 3) {
        seed_contact(&store, &format!("P{i}"), Tier::A).await;
    }
    let list = dashboard::follow_up_list(&store, Utc::now()).await.unwrap();
    assert_eq!(list.len(), FOLLOW_UP_LIMIT);
}

#[tokio::test]
async fn stats_count_pending_reminders_only() {
    let store = temp_store().await;
    let c = seed_contact(&store, "Minh", Tier::B).await;
    let now = Utc::now();
    let first = reminders::create_reminder(
        &store,
        NewReminder {
            contact_id: c.id.clone(),
            title: "Call back".into(),
            due_date: now - Duration::hours(1),
            notes: None,
        },
    )
    .await
    .unwrap();
    reminders::create_reminder(
        &store,
        NewReminder {
            contact_id: c.id.clone(),
            title: "Send invoice".into(),
            due_date: now + Duration::days(2),
            notes: None,
        },
    )
    .await
    .unwrap();
    reminders::complete_reminder(&store, &first.id).await.unwrap();

    let stats = dashboard::stats(&store).await.unwrap();
    assert_eq!(stats.contacts, 1);
    assert_eq!(stats.pending_reminders, 1);
}

#[tokio::test]
async fn reminder_notices_respect_permission() {
    let store = temp_store().await;
    let c = seed_contact(&store, "Hoa", Tier::A).await;
    let now = Utc::now();
    reminders::create_reminder(
        &store,
        NewReminder {
            contact_id: c.id.clone(),
            title: "Coffee".into(),
            due_date: now - Duration::minutes(5),
            notes: None,
        },
    )
    .await
    .unwrap();

    let denied = notifications::due_reminder_notices(&store, &StaticPermission(false), now, 5)
        .await
        .unwrap();
    assert!(denied.is_empty());

    let notices = notifications::due_reminder_notices(&store, &StaticPermission(true), now, 5)
        .await
        .unwrap();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].title, "Reminder: Hoa Tester");
    assert_eq!(notices[0].body, "Coffee");

    let overdue = reminders::due_reminders(&store, now).await.unwrap();
    assert!(!overdue[0].is_completed);
    assert!(contacts::get_contact(&store, &c.id).await.unwrap().is_some());
}

#[tokio::test]
async fn huge_lead_windows_reach_the_far_future() {
    let store = temp_store().await;
    let now = Utc::now();
    let c = seed_contact(&store, "Khoa", Tier::B).await;
    contacts::update_contact(
        &store,
        &c.id,
        contacts::ContactPatch {
            next_follow_up_at: Some(Some(now + Duration::days(3650))),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    reminders::create_reminder(
        &store,
        NewReminder {
            contact_id: c.id.clone(),
            title: "Anniversary".into(),
            due_date: now + Duration::days(900),
            notes: None,
        },
    )
    .await
    .unwrap();

    let due = notifications::contacts_due_for_follow_up(
        &store,
        &StaticPermission(true),
        now,
        u32::MAX,
    )
    .await
    .unwrap();
    assert_eq!(due.len(), 1);

    let upcoming = reminders::upcoming_reminders(&store, now, i64::MAX).await.unwrap();
    assert_eq!(upcoming.len(), 1);
    assert!(reminders::upcoming_reminders(&store, now, -3).await.unwrap().is_empty());
}
