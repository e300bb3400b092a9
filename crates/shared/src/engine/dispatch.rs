//! Recognition of control phrases, quick-reply echoes and numeric selections.
//! Pure text matching; the engine decides what each match means given the
//! stored session state.

use crate::provider::ItemKind;
use crate::session::SnapshotPurpose;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NumericSelection {
    /// A bare number, resolved against whichever snapshot exists.
    Bare(u32),
    /// 「3キャンセル」
    Cancel(u32),
    /// 「3完了」 or 「5,6,7完了」
    Complete(Vec<u32>),
}

pub fn is_help(text: &str) -> bool {
    matches!(text, "ヘルプ" | "使い方" | "help" | "登録方法")
}

pub fn is_task_help(text: &str) -> bool {
    text == "タスク登録方法"
}

const EVENT_MARKERS: [&str; 5] = ["会議", "ミーティング", "打ち合わせ", "面談", "予定"];

/// Explicit kind keyword in the raw message. This fixed set, not the
/// extractor's guess, decides whether a creation needs clarification.
pub fn explicit_kind(text: &str) -> Option<ItemKind> {
    if text.contains("タスク") {
        return Some(ItemKind::Task);
    }
    EVENT_MARKERS
        .iter()
        .any(|marker| text.contains(marker))
        .then_some(ItemKind::Event)
}

/// 「キャンセル中止」「変更中止」「完了中止」
pub fn parse_abort(text: &str) -> Option<SnapshotPurpose> {
    match text {
        "キャンセル中止" => Some(SnapshotPurpose::Cancel),
        "変更中止" => Some(SnapshotPurpose::Update),
        "完了中止" => Some(SnapshotPurpose::Complete),
        _ => None,
    }
}

/// 「キャンセル確定:3」 style confirmation echoes. Accepts the full-width
/// colon some clients substitute.
pub fn parse_confirm_token(text: &str) -> Option<(SnapshotPurpose, u32)> {
    let (action, number) = text.split_once(':').or_else(|| text.split_once('：'))?;
    let purpose = match action {
        "キャンセル確定" => SnapshotPurpose::Cancel,
        "変更確定" => SnapshotPurpose::Update,
        "完了確定" => SnapshotPurpose::Complete,
        _ => return None,
    };
    number.trim().parse().ok().map(|n| (purpose, n))
}

pub fn parse_numeric_selection(text: &str) -> Option<NumericSelection> {
    let text = text.trim();

    if let Ok(number) = text.parse::<u32>() {
        return Some(NumericSelection::Bare(number));
    }

    if let Some(prefix) = text.strip_suffix("キャンセル") {
        return prefix.trim().parse().ok().map(NumericSelection::Cancel);
    }

    if let Some(prefix) = text.strip_suffix("完了") {
        let numbers: Option<Vec<u32>> = prefix
            .trim()
            .split([',', '、'])
            .map(|part| part.trim().parse::<u32>().ok())
            .collect();
        return match numbers {
            Some(numbers) if !numbers.is_empty() => Some(NumericSelection::Complete(numbers)),
            _ => None,
        };
    }

    None
}

#[cfg(test)]
mod tests {
    use super::{NumericSelection, explicit_kind, parse_confirm_token, parse_numeric_selection};
    use crate::provider::ItemKind;
    use crate::session::SnapshotPurpose;

    #[test]
    fn confirm_tokens_parse_both_colons() {
        assert_eq!(
            parse_confirm_token("キャンセル確定:3"),
            Some((SnapshotPurpose::Cancel, 3))
        );
        assert_eq!(
            parse_confirm_token("完了確定：2"),
            Some((SnapshotPurpose::Complete, 2))
        );
        assert_eq!(parse_confirm_token("登録確定"), None);
        assert_eq!(parse_confirm_token("キャンセル確定:abc"), None);
    }

    #[test]
    fn numeric_selections() {
        assert_eq!(
            parse_numeric_selection("2"),
            Some(NumericSelection::Bare(2))
        );
        assert_eq!(
            parse_numeric_selection("3キャンセル"),
            Some(NumericSelection::Cancel(3))
        );
        assert_eq!(
            parse_numeric_selection("3完了"),
            Some(NumericSelection::Complete(vec![3]))
        );
        assert_eq!(
            parse_numeric_selection("5,6,7完了"),
            Some(NumericSelection::Complete(vec![5, 6, 7]))
        );
        assert_eq!(
            parse_numeric_selection("5、6完了"),
            Some(NumericSelection::Complete(vec![5, 6]))
        );
        assert_eq!(parse_numeric_selection("完了"), None);
        assert_eq!(parse_numeric_selection("明日"), None);
    }

    #[test]
    fn kind_markers() {
        assert_eq!(explicit_kind("タスク 牛乳を買う"), Some(ItemKind::Task));
        assert_eq!(explicit_kind("明日14時に会議"), Some(ItemKind::Event));
        assert_eq!(explicit_kind("面談を入れて"), Some(ItemKind::Event));
        // The task keyword wins when both appear.
        assert_eq!(explicit_kind("タスク 予定表の印刷"), Some(ItemKind::Task));
        assert_eq!(explicit_kind("牛乳を買う"), None);
    }
}
