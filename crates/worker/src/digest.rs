//! Weekly task digest: one summary push per user, Sunday evening.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use shared::provider::TaskRecord;
use shared::timezone;

/// The digest window is the first sweep tick after Sunday 21:00 local time.
/// A quarter hour matches the sweep cadence, so exactly one tick lands here.
pub fn in_window(now: DateTime<Utc>) -> bool {
    let local = timezone::local_now(now);
    local.weekday() == Weekday::Sun && local.hour() == 21 && local.minute() < 15
}

pub fn build(tasks: &[TaskRecord]) -> String {
    if tasks.is_empty() {
        return "📋 今週のタスクまとめ\n今週のタスクはすべて完了しています！お疲れさまでした🎉"
            .to_string();
    }

    let mut lines = vec!["📋 今週のタスクまとめ".to_string()];
    let mut current_list: Option<&str> = None;
    for task in tasks {
        let list_name = task.list_name.as_deref().unwrap_or("マイタスク");
        if current_list != Some(list_name) {
            lines.push(format!("【{list_name}】"));
            current_list = Some(list_name);
        }
        let star = if task.starred { "⭐ " } else { "" };
        let due = task
            .due
            .map(|due| format!("（期限: {}）", timezone::format_local_date(due)))
            .unwrap_or_default();
        lines.push(format!("□ {star}{}{due}", task.title));
    }
    lines.join("\n")
}
