mod support;

use chrono::{NaiveDate, NaiveTime};
use serde_json::json;

use support::{base_now, harness};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn t(h: u32, m: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(h, m, 0)
}

#[tokio::test]
async fn cancel_flow_lists_confirms_and_deletes() {
    let h = harness();
    h.link("U1").await;
    let now = base_now();
    h.seed_event("evt-1", "定例会議", d(2026, 3, 4), t(10, 0));
    h.seed_event("evt-2", "企画会議", d(2026, 3, 5), t(14, 0));

    h.extractor.script(json!({
        "action": "cancel",
        "type": "event",
        "keyword": "会議"
    }));
    h.turn("U1", "会議をキャンセル", now).await;

    let listing = h.notifier.last_for("U1");
    assert!(listing.contains("1. 3/4 10:00 定例会議"));
    assert!(listing.contains("2. 3/5 14:00 企画会議"));
    assert!(listing.contains("キャンセルする番号を入力してください"));

    // A bare number asks for explicit confirmation before deleting.
    let reply = h.turn("U1", "2", now).await;
    assert!(reply.contains("「企画会議」をキャンセルしますか？"));

    h.turn("U1", "キャンセル確定:2", now).await;
    assert!(h.notifier.last_for("U1").contains("「企画会議」をキャンセルしました"));

    let state = h.provider.state.lock().unwrap();
    assert_eq!(state.events.len(), 1);
    assert_eq!(state.events[0].id, "evt-1");
}

#[tokio::test]
async fn out_of_range_numbers_are_rejected() {
    let h = harness();
    h.link("U1").await;
    let now = base_now();
    h.seed_event("evt-1", "定例会議", d(2026, 3, 4), t(10, 0));

    h.extractor.script(json!({
        "action": "cancel",
        "type": "event",
        "keyword": "会議"
    }));
    h.turn("U1", "会議をキャンセル", now).await;

    let reply = h.turn("U1", "5", now).await;
    assert!(reply.contains("無効な番号です"));
    let reply = h.turn("U1", "0", now).await;
    assert!(reply.contains("無効な番号です"));
}

#[tokio::test]
async fn multiple_tasks_complete_in_one_message() {
    let h = harness();
    h.link("U1").await;
    let now = base_now();
    h.seed_task("l1/t-1", "資料作成", Some(d(2026, 3, 4)));
    h.seed_task("l1/t-2", "請求書送付", Some(d(2026, 3, 5)));
    h.seed_task("l1/t-3", "掃除", None);

    h.extractor.script(json!({
        "action": "complete",
        "type": "task"
    }));
    h.turn("U1", "タスクを完了にしたい", now).await;
    assert!(h.notifier.last_for("U1").contains("完了する番号を入力してください"));

    h.turn("U1", "1,2完了", now).await;
    let done = h.notifier.last_for("U1");
    assert!(done.contains("資料作成"));
    assert!(done.contains("請求書送付"));

    let state = h.provider.state.lock().unwrap();
    assert_eq!(state.tasks.len(), 1);
    assert_eq!(state.completed.len(), 2);
}

#[tokio::test]
async fn bare_number_prefers_cancel_over_complete() {
    let h = harness();
    h.link("U1").await;
    let now = base_now();
    h.seed_event("evt-1", "定例会議", d(2026, 3, 4), t(10, 0));
    h.seed_task("l1/t-1", "資料作成", Some(d(2026, 3, 4)));

    h.extractor.script(json!({
        "action": "complete",
        "type": "task"
    }));
    h.turn("U1", "タスク完了", now).await;

    h.extractor.script(json!({
        "action": "cancel",
        "type": "event",
        "keyword": "会議"
    }));
    h.turn("U1", "会議をキャンセル", now).await;

    // Both snapshots are pending; the bare number resolves to cancellation.
    let reply = h.turn("U1", "1", now).await;
    assert!(reply.contains("「定例会議」をキャンセルしますか？"));
}

#[tokio::test]
async fn update_flow_reschedules_an_event() {
    let h = harness();
    h.link("U1").await;
    let now = base_now();
    h.seed_event("evt-1", "定例会議", d(2026, 3, 4), t(10, 0));

    h.extractor.script(json!({
        "action": "update",
        "type": "event",
        "keyword": "定例"
    }));
    h.turn("U1", "定例会議を変更", now).await;
    assert!(h.notifier.last_for("U1").contains("変更する番号を入力してください"));

    let reply = h.turn("U1", "1", now).await;
    assert!(reply.contains("「定例会議」を変更します"));

    h.turn("U1", "明日15時", now).await;
    assert!(h.notifier.last_for("U1").contains("🔄 予定を変更しました"));

    let state = h.provider.state.lock().unwrap();
    assert_eq!(state.events[0].date, d(2026, 3, 3));
    assert_eq!(state.events[0].start_time, t(15, 0));
    assert_eq!(state.events[0].end_time, t(16, 0));
}

#[tokio::test]
async fn keyword_search_caps_the_snapshot_at_ten() {
    let h = harness();
    h.link("U1").await;
    let now = base_now();
    for i in 1..=15 {
        h.seed_task(&format!("l1/t-{i}"), &format!("タスク{i}"), Some(d(2026, 3, 4)));
    }

    h.extractor.script(json!({
        "action": "complete",
        "type": "task"
    }));
    h.turn("U1", "タスクを完了にしたい", now).await;

    let listing = h.notifier.last_for("U1");
    assert!(listing.contains("10. "));
    assert!(!listing.contains("11. "));

    let reply = h.turn("U1", "11完了", now).await;
    assert!(reply.contains("無効な番号です"));
}

#[tokio::test]
async fn empty_search_results_say_so() {
    let h = harness();
    h.link("U1").await;
    let now = base_now();

    h.extractor.script(json!({
        "action": "cancel",
        "type": "event",
        "keyword": "存在しない"
    }));
    h.turn("U1", "存在しないをキャンセル", now).await;
    assert!(h.notifier.last_for("U1").contains("予定は見つかりませんでした"));

    // No snapshot was stored, so numbers fall through to extraction.
    h.extractor.script(json!({ "action": "list", "type": "event" }));
    h.turn("U1", "1", now).await;
    assert!(h.notifier.last_for("U1").contains("予定は見つかりませんでした"));
}

#[tokio::test]
async fn event_listing_names_the_month_window_that_matched() {
    let h = harness();
    h.link("U1").await;
    let now = base_now();
    // Nothing this month; one event next month.
    h.seed_event("evt-1", "出張", d(2026, 4, 10), t(9, 0));

    h.extractor.script(json!({ "action": "list", "type": "event" }));
    h.turn("U1", "予定一覧", now).await;

    let listing = h.notifier.last_for("U1");
    assert!(listing.contains("予定一覧（来月）"));
    assert!(listing.contains("出張"));
}

#[tokio::test]
async fn starred_tasks_sort_first_in_listings() {
    let h = harness();
    h.link("U1").await;
    let now = base_now();
    h.seed_task("l1/t-1", "ふつうのタスク", Some(d(2026, 3, 4)));
    {
        let mut state = h.provider.state.lock().unwrap();
        state.tasks.push(shared::provider::TaskRecord {
            id: "l1/t-2".to_string(),
            title: "大事なタスク".to_string(),
            due: Some(d(2026, 3, 10)),
            list_name: Some("マイタスク".to_string()),
            starred: true,
        });
    }

    h.extractor.script(json!({ "action": "list", "type": "task" }));
    h.turn("U1", "タスク一覧", now).await;

    let listing = h.notifier.last_for("U1");
    assert!(listing.contains("1. ⭐ 大事なタスク"));
    assert!(listing.contains("2. ふつうのタスク"));
}

#[tokio::test]
async fn extracted_target_numbers_resolve_against_the_pending_list() {
    let h = harness();
    h.link("U1").await;
    let now = base_now();
    h.seed_task("l1/t-1", "資料作成", Some(d(2026, 3, 4)));
    h.seed_task("l1/t-2", "請求書送付", Some(d(2026, 3, 5)));

    h.extractor.script(json!({
        "action": "complete",
        "type": "task"
    }));
    h.turn("U1", "タスクを完了にしたい", now).await;

    // A phrasing tier-3 does not recognize; the model carries the numbers.
    h.extractor.script(json!({
        "action": "complete",
        "type": "task",
        "targetNumbers": [1, 2]
    }));
    h.turn("U1", "1と2を完了にして", now).await;

    let done = h.notifier.last_for("U1");
    assert!(done.contains("資料作成"));
    assert!(done.contains("請求書送付"));
    assert_eq!(h.provider.state.lock().unwrap().completed.len(), 2);
}

#[tokio::test]
async fn provider_failures_reach_the_user() {
    let h = harness();
    h.link("U1").await;
    let now = base_now();

    h.provider.state.lock().unwrap().fail_writes = true;
    h.extractor.script(json!({
        "action": "create",
        "type": "task",
        "title": "提出物"
    }));
    h.turn("U1", "タスク 提出物", now).await;
    h.turn("U1", "期限なし", now).await;
    h.turn("U1", "登録確定", now).await;
    assert!(h.notifier.last_for("U1").contains("処理に失敗しました"));
}

#[tokio::test]
async fn expired_authorization_prompts_a_relink() {
    let h = harness();
    h.link("U1").await;
    let now = base_now();

    h.provider.state.lock().unwrap().auth_expired = true;
    h.extractor.script(json!({ "action": "list", "type": "event" }));
    h.turn("U1", "予定一覧", now).await;

    let push = h.notifier.last_for("U1");
    assert!(push.contains("連携が切れています"));
    assert!(push.contains(support::RELINK_URL));
}
