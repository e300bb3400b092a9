//! End-to-end reminder path: selection through the conversation, firing
//! through the sweep, snoozing through the conversation again.

mod support;

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;

use support::harness;

#[tokio::test]
async fn selected_event_reminder_fires_in_its_window() {
    let h = harness();
    h.link("U1").await;
    // 2026-03-02 10:00 JST.
    let now = Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).unwrap();

    h.extractor.script(json!({
        "action": "create",
        "type": "event",
        "title": "面談",
        "date": "2026-03-03",
        "startTime": "14:00",
        "endTime": "15:00"
    }));
    h.turn("U1", "明日14時に面談", now).await;
    h.turn("U1", "登録確定", now).await;
    h.turn("U1", "1時間前", now).await;
    h.turn("U1", "設定完了", now).await;

    // 1時間前 = 13:00 JST on 3/3 = 04:00 UTC.
    let sweeper = h.sweeper();
    let trigger = Utc.with_ymd_and_hms(2026, 3, 3, 4, 3, 0).unwrap();
    let stats = sweeper.sweep(trigger).await;
    assert_eq!(stats.reminders, 1);

    let push = h.notifier.last_for("U1");
    assert!(push.contains("🔔 リマインド"));
    assert!(push.contains("面談"));
    assert!(push.contains("3/3 14:00"));

    // Same window, second tick: nothing more.
    let stats = sweeper.sweep(trigger + Duration::minutes(5)).await;
    assert_eq!(stats.reminders, 0);
}

#[tokio::test]
async fn snoozed_reminder_comes_back_after_an_hour() {
    let h = harness();
    h.link("U1").await;
    let due = chrono::NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();
    h.seed_task("l1/t-1", "レポート提出", Some(due));
    h.sessions
        .save_reminder_selection(
            "U1",
            "l1/t-1",
            &shared::session::ReminderSelection {
                tags: vec![shared::reminders::ReminderTag::MorningOf],
            },
        )
        .await
        .unwrap();

    // 当日朝9時 on 3/3 = 00:00 UTC.
    let sweeper = h.sweeper();
    let fired_at = Utc.with_ymd_and_hms(2026, 3, 3, 0, 5, 0).unwrap();
    assert_eq!(sweeper.sweep(fired_at).await.reminders, 1);
    let original = h.notifier.last_for("U1");
    assert!(original.contains("レポート提出"));

    // The user pushes it back an hour; the reply names the new time.
    let reply = h.turn("U1", "スヌーズ1時間", fired_at).await;
    assert!(reply.contains("スヌーズしました"));

    // Not yet due half an hour later.
    let stats = sweeper.sweep(fired_at + Duration::minutes(30)).await;
    assert_eq!(stats.snoozes, 0);

    // Due on the tick after the hour passes, re-emitted verbatim, once.
    let stats = sweeper.sweep(fired_at + Duration::minutes(65)).await;
    assert_eq!(stats.snoozes, 1);
    assert_eq!(h.notifier.last_for("U1"), original);

    let stats = sweeper.sweep(fired_at + Duration::minutes(80)).await;
    assert_eq!(stats.snoozes, 0);
}

#[tokio::test]
async fn snooze_tomorrow_targets_nine_am_local() {
    let h = harness();
    h.link("U1").await;
    let due = chrono::NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();
    h.seed_task("l1/t-1", "レポート提出", Some(due));
    h.sessions
        .save_reminder_selection(
            "U1",
            "l1/t-1",
            &shared::session::ReminderSelection {
                tags: vec![shared::reminders::ReminderTag::MorningOf],
            },
        )
        .await
        .unwrap();

    let sweeper = h.sweeper();
    let fired_at = Utc.with_ymd_and_hms(2026, 3, 3, 0, 5, 0).unwrap();
    sweeper.sweep(fired_at).await;

    let reply = h.turn("U1", "スヌーズ明日9時", fired_at).await;
    assert!(reply.contains("明日9時"));

    // 3/4 08:55 JST: not yet.
    let early = Utc.with_ymd_and_hms(2026, 3, 3, 23, 55, 0).unwrap();
    assert_eq!(sweeper.sweep(early).await.snoozes, 0);

    // 3/4 09:05 JST.
    let later = Utc.with_ymd_and_hms(2026, 3, 4, 0, 5, 0).unwrap();
    assert_eq!(sweeper.sweep(later).await.snoozes, 1);
}

#[tokio::test]
async fn reminder_push_context_survives_for_snooze_but_not_forever() {
    let h = harness();
    h.link("U1").await;
    let due = chrono::NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();
    h.seed_task("l1/t-1", "レポート提出", Some(due));
    h.sessions
        .save_reminder_selection(
            "U1",
            "l1/t-1",
            &shared::session::ReminderSelection {
                tags: vec![shared::reminders::ReminderTag::MorningOf],
            },
        )
        .await
        .unwrap();

    let sweeper = h.sweeper();
    let fired_at = Utc.with_ymd_and_hms(2026, 3, 3, 0, 5, 0).unwrap();
    sweeper.sweep(fired_at).await;

    // A day later the context is gone; the snooze token reports expiry.
    h.store.advance_secs(86_401);
    let reply = h
        .turn("U1", "スヌーズ1時間", fired_at + Duration::seconds(86_401))
        .await;
    assert!(reply.contains("操作がタイムアウトしました"));
}
