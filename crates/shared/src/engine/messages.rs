//! Every user-facing string in one place. The quick-reply token constants are
//! matched byte-for-byte against incoming text, so wording changes here must
//! stay in sync with nothing else.

use crate::provider::{EventRecord, ItemKind, TaskRecord};
use crate::reminders::ReminderTag;
use crate::session::{DraftItem, SnapshotPurpose};
use crate::timezone;

pub const PROCESSING: &str = "⏳ 処理しています...";
pub const EXPIRED: &str = "⏰ 操作がタイムアウトしました。最初からやり直してください。";
pub const INVALID_NUMBER: &str = "無効な番号です。もう一度お試しください。";
pub const EXTRACT_FAILED: &str =
    "⚠️ メッセージを理解できませんでした。別の言い方でもう一度お試しください。";
pub const PROVIDER_FAILED: &str =
    "⚠️ 処理に失敗しました。しばらくしてからもう一度お試しください。";
pub const CREATE_ABORTED: &str = "登録を中止しました。";
pub const NOTHING_TO_ABORT: &str = "中止できる操作はありません。";

pub const CONFIRM_CREATE: &str = "登録確定";
pub const ABORT_CREATE: &str = "登録中止";
pub const STAR_YES: &str = "⭐ スター付きにする";
pub const STAR_NO: &str = "スターなしで登録";
pub const SNOOZE_HOUR: &str = "スヌーズ1時間";
pub const SNOOZE_TOMORROW: &str = "スヌーズ明日9時";
pub const REMINDER_DONE: &str = "設定完了";
pub const REMINDER_SKIP: &str = "設定しない";
pub const KIND_EVENT: &str = "予定";
pub const KIND_TASK: &str = "タスク";

pub const HELP: &str = "📖 使い方\n\
    \n\
    ■ 予定の登録\n\
    「明日14時に会議」のように送ってください。\n\
    ■ タスクの登録\n\
    「タスク 牛乳を買う」のように「タスク」を付けて送ってください。\n\
    ■ 一覧\n\
    「予定一覧」「タスク一覧」\n\
    ■ キャンセル・変更・完了\n\
    「会議をキャンセル」「ミーティングを変更」「3完了」\n\
    ■ 操作のやり直し\n\
    「登録中止」「キャンセル中止」\n\
    \n\
    毎週日曜21時に今週のタスクまとめをお送りします。";

pub const TASK_HELP: &str = "📝 タスクの登録方法\n\
    \n\
    「タスク 牛乳を買う」のように「タスク」を付けて送ってください。\n\
    期限を付けるときは「タスク レポート提出 3/10まで」のように書けます。\n\
    「タスク一覧」で未完了のタスクを確認、「3完了」「5,6,7完了」で完了にできます。\n\
    登録時にリマインドとスター（重要マーク）も設定できます。";

pub fn link_prompt(relink_url: &str) -> String {
    format!(
        "Googleアカウントが連携されていません。\nこちらから連携してください：\n{relink_url}"
    )
}

pub fn relink_prompt(relink_url: &str) -> String {
    format!(
        "⚠️ Googleアカウントの連携が切れています。\nお手数ですが再連携をお願いします：\n{relink_url}"
    )
}

pub fn ask_title(kind: ItemKind) -> String {
    match kind {
        ItemKind::Event => "予定の内容を教えてください。".to_string(),
        ItemKind::Task => "タスクの内容を教えてください。".to_string(),
    }
}

pub const ASK_KIND: &str = "「予定」と「タスク」のどちらで登録しますか？";
pub const ASK_EVENT_DATE: &str = "いつの予定ですか？（例：明日、3月10日）";
pub const ASK_EVENT_TIME: &str = "何時からですか？（例：14時、14:00〜15:00、終日）";
pub const ASK_TASK_DUE: &str = "期限はいつですか？（例：明日、3/10、期限なし）";
pub const ASK_DATE_RETRY: &str = "日付がわかりませんでした。「明日」「3月10日」のように教えてください。";
pub const ASK_TIME_RETRY: &str =
    "時刻がわかりませんでした。「14時」「14:00〜15:00」「終日」のように教えてください。";
pub const ASK_UPDATE_TEXT_RETRY: &str =
    "新しい日時がわかりませんでした。「明日15時」のように教えてください。";

pub fn ask_update_text(title: &str) -> String {
    format!("「{title}」を変更します。新しい日時を教えてください。（例：明日15時）")
}

pub fn reminder_prompt(options: &[ReminderTag]) -> String {
    let labels: Vec<&str> = options.iter().map(|tag| tag.label()).collect();
    format!(
        "リマインドを設定しますか？（複数選択できます）\n{}\n終わったら「{REMINDER_DONE}」、不要なら「{REMINDER_SKIP}」を送ってください。",
        labels.join(" / ")
    )
}

pub fn reminder_added(tag: ReminderTag, remaining: &[ReminderTag]) -> String {
    if remaining.is_empty() {
        format!("「{}」を追加しました。", tag.label())
    } else {
        let labels: Vec<&str> = remaining.iter().map(|t| t.label()).collect();
        format!(
            "「{}」を追加しました。他にも設定しますか？\n{}\n終わったら「{REMINDER_DONE}」を送ってください。",
            tag.label(),
            labels.join(" / ")
        )
    }
}

pub const REMINDERS_SAVED: &str = "🔔 リマインドを設定しました。";
pub const REMINDERS_SKIPPED: &str = "リマインドは設定しませんでした。";
pub const ASK_DUE_RETRY: &str =
    "期限がわかりませんでした。「明日」「3/10」「期限なし」のように教えてください。";

pub fn task_created(title: &str, starred: bool) -> String {
    if starred {
        format!("✅ タスクを登録しました！\n📝 ⭐ {title}")
    } else {
        format!("✅ タスクを登録しました！\n📝 {title}")
    }
}

pub fn star_prompt(title: &str) -> String {
    format!("「{title}」を登録しました！\n⭐ スターを付けますか？")
}

pub const STARRED_DONE: &str = "⭐ スターを付けました。";
pub const UNSTARRED_DONE: &str = "スターなしで登録しました。";

pub fn confirmation_summary(draft: &DraftItem) -> String {
    let mut lines = vec!["以下の内容で登録しますか？".to_string()];
    match draft.kind {
        ItemKind::Event => {
            lines.push(format!("📅 {}", draft.title.as_deref().unwrap_or("(無題)")));
            if let Some(date) = draft.date {
                if draft.is_all_day {
                    lines.push(format!("🗓 {}（終日）", timezone::format_local_date(date)));
                } else if let Some(start) = draft.start_time {
                    let range = match draft.end_time {
                        Some(end) => format!(
                            "{}〜{}",
                            timezone::format_local_time(start),
                            timezone::format_local_time(end)
                        ),
                        None => format!("{}〜", timezone::format_local_time(start)),
                    };
                    lines.push(format!("🗓 {} {}", timezone::format_local_date(date), range));
                }
            }
            if let Some(location) = &draft.location {
                lines.push(format!("📍 {location}"));
            }
            if let Some(url) = &draft.url {
                lines.push(format!("🔗 {url}"));
            }
        }
        ItemKind::Task => {
            lines.push(format!("📝 {}", draft.title.as_deref().unwrap_or("(無題)")));
            match draft.date {
                Some(due) => lines.push(format!("期限: {}", timezone::format_local_date(due))),
                None => lines.push("期限: なし".to_string()),
            }
            if let Some(list) = &draft.list_name {
                lines.push(format!("リスト: {list}"));
            }
            if !draft.selected_reminders.is_empty() {
                let labels: Vec<&str> = draft
                    .selected_reminders
                    .iter()
                    .map(|tag| tag.label())
                    .collect();
                lines.push(format!("🔔 {}", labels.join("・")));
            }
        }
    }
    lines.push(format!("「{CONFIRM_CREATE}」または「{ABORT_CREATE}」を送ってください。"));
    lines.join("\n")
}

pub fn event_created(event: &EventRecord) -> String {
    let when = if event.is_all_day {
        format!("{}（終日）", timezone::format_local_date(event.date))
    } else {
        match (event.start_time, event.end_time) {
            (Some(start), Some(end)) => format!(
                "{} {}〜{}",
                timezone::format_local_date(event.date),
                timezone::format_local_time(start),
                timezone::format_local_time(end)
            ),
            (Some(start), None) => format!(
                "{} {}〜",
                timezone::format_local_date(event.date),
                timezone::format_local_time(start)
            ),
            _ => timezone::format_local_date(event.date),
        }
    };
    format!("✅ 予定を登録しました！\n📅 {}\n🗓 {when}", event.title)
}

pub fn event_line(index: usize, event: &EventRecord) -> String {
    let when = if event.is_all_day {
        format!("{} 終日", timezone::format_local_date(event.date))
    } else if let Some(start) = event.start_time {
        format!(
            "{} {}",
            timezone::format_local_date(event.date),
            timezone::format_local_time(start)
        )
    } else {
        timezone::format_local_date(event.date)
    };
    format!("{index}. {when} {}", event.title)
}

pub fn task_line(index: usize, task: &TaskRecord) -> String {
    let star = if task.starred { "⭐ " } else { "" };
    let due = task
        .due
        .map(|due| format!("（期限: {}）", timezone::format_local_date(due)))
        .unwrap_or_default();
    format!("{index}. {star}{}{due}", task.title)
}

pub fn list_header(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::Event => "📅 予定一覧",
        ItemKind::Task => "📝 タスク一覧",
    }
}

/// Header for event listings, naming the month window the progressive
/// search landed on.
pub fn event_list_header(window: u32) -> String {
    let label = match window {
        0 => "今月",
        1 => "来月",
        _ => "翌々月",
    };
    format!("📅 予定一覧（{label}）")
}

pub const NO_EVENTS_IN_WINDOW: &str = "3ヶ月以内に予定は見つかりませんでした。";

pub fn nothing_found(kind: ItemKind) -> String {
    format!("{}は見つかりませんでした。", kind.label())
}

pub fn selection_prompt(purpose: SnapshotPurpose) -> String {
    format!("{}する番号を入力してください。", purpose.action_label())
}

pub fn cancel_confirm(index: u32, title: &str) -> String {
    format!("「{title}」をキャンセルしますか？\n「キャンセル確定:{index}」を送ると確定します。")
}

pub const CANCEL_ABORTED: &str = "キャンセルを中止しました。";
pub const UPDATE_ABORTED: &str = "変更を中止しました。";
pub const COMPLETE_ABORTED: &str = "完了操作を中止しました。";

pub fn cancelled(title: &str) -> String {
    format!("🗑 「{title}」をキャンセルしました。")
}

pub fn completed(titles: &[String]) -> String {
    if titles.len() == 1 {
        format!("✅ 「{}」を完了にしました。", titles[0])
    } else {
        let joined = titles
            .iter()
            .map(|title| format!("「{title}」"))
            .collect::<Vec<_>>()
            .join("・");
        format!("✅ {joined} を完了にしました。")
    }
}

pub fn updated(event: &EventRecord) -> String {
    let when = if event.is_all_day {
        format!("{}（終日）", timezone::format_local_date(event.date))
    } else {
        match (event.start_time, event.end_time) {
            (Some(start), Some(end)) => format!(
                "{} {}〜{}",
                timezone::format_local_date(event.date),
                timezone::format_local_time(start),
                timezone::format_local_time(end)
            ),
            (Some(start), None) => format!(
                "{} {}〜",
                timezone::format_local_date(event.date),
                timezone::format_local_time(start)
            ),
            _ => timezone::format_local_date(event.date),
        }
    };
    format!("🔄 予定を変更しました。\n📅 {}\n🗓 {when}", event.title)
}

pub fn snoozed_until(local_label: &str) -> String {
    format!("⏰ スヌーズしました。{local_label}に再通知します。")
}

pub fn reminder_push(kind: ItemKind, title: &str, when_label: &str) -> String {
    match kind {
        ItemKind::Event => format!(
            "🔔 リマインド\n📅 {title}\n🗓 {when_label}\n「{SNOOZE_HOUR}」「{SNOOZE_TOMORROW}」で後回しにできます。"
        ),
        ItemKind::Task => format!(
            "🔔 リマインド\n📝 {title}\n{when_label}\n「{SNOOZE_HOUR}」「{SNOOZE_TOMORROW}」で後回しにできます。"
        ),
    }
}
