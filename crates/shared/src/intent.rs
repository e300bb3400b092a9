use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

use crate::provider::ItemKind;
use crate::timezone;

const DEFAULT_TIMEOUT_MS: u64 = 15_000;
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_BACKOFF_MS: u64 = 1_000;

pub type ExtractFuture<'a> =
    Pin<Box<dyn Future<Output = Result<StructuredIntent, ExtractError>> + Send + 'a>>;

/// Best-effort structured guess produced by the language model. Every field
/// is optional because the model may omit or hallucinate any of them; the
/// conversation engine treats this as a hint, never as ground truth.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredIntent {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default, rename = "type")]
    pub item_type: Option<String>,
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub target_number: Option<u32>,
    #[serde(default)]
    pub target_numbers: Option<Vec<u32>>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub list_name: Option<String>,
    #[serde(default)]
    pub starred: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentAction {
    Create,
    List,
    Cancel,
    Update,
    Complete,
}

impl StructuredIntent {
    /// Unknown or missing action strings fall back to `Create`, matching the
    /// forgiving behavior users expect from free-form input.
    pub fn action(&self) -> IntentAction {
        match self.action.as_deref() {
            Some("list") => IntentAction::List,
            Some("cancel") => IntentAction::Cancel,
            Some("update") => IntentAction::Update,
            Some("complete") => IntentAction::Complete,
            _ => IntentAction::Create,
        }
    }

    pub fn kind(&self) -> Option<ItemKind> {
        match self.item_type.as_deref() {
            Some("task") => Some(ItemKind::Task),
            Some("event") => Some(ItemKind::Event),
            _ => None,
        }
    }

    /// All target numbers from either the single or the plural field.
    pub fn targets(&self) -> Vec<u32> {
        if let Some(numbers) = &self.target_numbers
            && !numbers.is_empty()
        {
            return numbers.clone();
        }
        self.target_number.into_iter().collect()
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("intent extraction request timed out")]
    Timeout,
    #[error("intent extraction request failed: {0}")]
    ProviderFailure(String),
    #[error("intent extractor returned an invalid payload: {0}")]
    InvalidPayload(String),
}

/// The natural-language capability. Implementations must be called with the
/// literal user text; `context_hint` is the bot's previous message, when one
/// is available, so short replies like "2" can be disambiguated.
pub trait IntentExtractor: Send + Sync {
    fn extract<'a>(&'a self, text: &'a str, context_hint: Option<&'a str>) -> ExtractFuture<'a>;
}

#[derive(Debug, Clone)]
pub struct GeminiExtractorConfig {
    pub generate_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
}

impl GeminiExtractorConfig {
    pub fn new(generate_url: String, api_key: String) -> Self {
        Self {
            generate_url,
            api_key,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Clone)]
pub struct GeminiExtractor {
    client: reqwest::Client,
    config: GeminiExtractorConfig,
}

impl GeminiExtractor {
    pub fn new(config: GeminiExtractorConfig) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| ExtractError::ProviderFailure(err.to_string()))?;

        Ok(Self { client, config })
    }

    async fn extract_once(
        &self,
        text: &str,
        context_hint: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<StructuredIntent, ExtractError> {
        let prompt = build_prompt(text, context_hint, now);
        let url = format!(
            "{}?key={}",
            self.config.generate_url, self.config.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "contents": [{ "parts": [{ "text": prompt }] }]
            }))
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ExtractError::Timeout
                } else {
                    ExtractError::ProviderFailure(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::ProviderFailure(format!(
                "model endpoint responded with status {status}: {body}"
            )));
        }

        let payload: GenerateContentResponse = response
            .json()
            .await
            .map_err(|err| ExtractError::InvalidPayload(err.to_string()))?;

        let raw = payload
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text)
            .ok_or_else(|| {
                ExtractError::InvalidPayload("response contained no candidates".to_string())
            })?;

        parse_intent_json(&raw)
    }
}

impl IntentExtractor for GeminiExtractor {
    fn extract<'a>(&'a self, text: &'a str, context_hint: Option<&'a str>) -> ExtractFuture<'a> {
        Box::pin(async move {
            let now = Utc::now();
            let mut backoff_ms = RETRY_BASE_BACKOFF_MS;
            let mut last_error = None;

            for attempt in 1..=MAX_ATTEMPTS {
                match self.extract_once(text, context_hint, now).await {
                    Ok(intent) => return Ok(intent),
                    Err(err) => {
                        warn!(attempt, "intent extraction attempt failed: {err}");
                        last_error = Some(err);
                        if attempt < MAX_ATTEMPTS {
                            sleep(Duration::from_millis(backoff_ms)).await;
                            backoff_ms *= 2;
                        }
                    }
                }
            }

            Err(last_error.unwrap_or_else(|| {
                ExtractError::ProviderFailure("no extraction attempt executed".to_string())
            }))
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: String,
}

/// Models often wrap JSON in a markdown fence or surround it with prose;
/// accept both before giving up.
pub fn parse_intent_json(raw: &str) -> Result<StructuredIntent, ExtractError> {
    let candidate = extract_json_block(raw)
        .ok_or_else(|| ExtractError::InvalidPayload("no JSON object in model output".to_string()))?;

    match serde_json::from_str::<Value>(candidate) {
        Ok(value) => serde_json::from_value(value)
            .map_err(|err| ExtractError::InvalidPayload(err.to_string())),
        Err(err) => Err(ExtractError::InvalidPayload(err.to_string())),
    }
}

fn extract_json_block(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();

    if let Some(fence_start) = trimmed.find("```") {
        let after_fence = &trimmed[fence_start + 3..];
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        if let Some(fence_end) = body.find("```") {
            return Some(body[..fence_end].trim());
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end > start {
        Some(&trimmed[start..=end])
    } else {
        None
    }
}

fn build_prompt(text: &str, context_hint: Option<&str>, now: DateTime<Utc>) -> String {
    let today = timezone::local_date(now).format("%Y年%-m月%-d日").to_string();
    let context_section = context_hint
        .map(|hint| format!("【直前のボット返信（文脈）】\n{hint}\n\n"))
        .unwrap_or_default();

    format!(
        "以下のテキストから情報を抽出してください。\n\
         今日は{today}です。\n\
         {context_section}\
         ユーザーの入力: \"{text}\"\n\n\
         以下のJSON形式で返してください（JSONのみ、説明不要）：\n\
         {{\n\
         \x20 \"action\": \"create\" / \"list\" / \"cancel\" / \"update\" / \"complete\",\n\
         \x20 \"type\": \"event\" または \"task\",\n\
         \x20 \"keyword\": \"検索キーワード（list/cancel/update/completeの場合）\",\n\
         \x20 \"targetNumber\": 数字（単一番号指定の場合）,\n\
         \x20 \"targetNumbers\": [数字の配列]（複数番号指定の場合）,\n\
         \x20 \"date\": \"YYYY-MM-DD\",\n\
         \x20 \"startTime\": \"HH:MM\" (予定の場合のみ),\n\
         \x20 \"endTime\": \"HH:MM\" (予定の場合のみ),\n\
         \x20 \"title\": \"タイトル\",\n\
         \x20 \"location\": \"場所（あれば）\",\n\
         \x20 \"url\": \"URL（あれば）\",\n\
         \x20 \"listName\": \"タスクリスト名（タスクの場合、あれば）\",\n\
         \x20 \"starred\": true/false (タスクの場合のみ、重要度判定)\n\
         }}\n\n\
         重要な操作判定ルール：\n\
         - 直前のボット返信に「番号を入力」「番号を送信」がある場合、数字だけの入力はその一覧からの選択と判断し、対応するactionとtargetNumberを設定する\n\
         - \"complete\": タスクを完了/終了/済み にする場合（例: 「3完了」→ targetNumber: 3、「5,6,7完了」→ targetNumbers: [5,6,7]）\n\
         - \"list\": 「予定一覧」「今日の予定」「タスク一覧」などの表現\n\
         - \"cancel\": 既存の予定/タスクを削除・キャンセルする場合（例: 「ミーティングをキャンセル」）\n\
         - \"update\": 「変更」「〜に変更」「延期」などの表現。startTimeには新しい時刻のみを設定し、endTimeは開始の1時間後\n\
         - \"create\": 上記以外の新規登録\n\
         - タスク: 「タスク」キーワードが明示的に含まれている場合のみ type=\"task\"。タイトルに「キャンセル」「変更」が含まれていても「タスク」があればaction=\"create\"\n\
         - アクションワードのみでkeywordとなる予定名がない場合はkeywordをnullにする\n\
         - 「今日」「明日」「来週月曜」などは具体的な日付に変換する\n\
         - タスクで期限の記載がない場合、dateはnull。「期限なし」「いつか」もnull\n\
         - 予定で終了時刻が未指定の場合、endTimeは開始時刻の1時間後\n\
         - 時刻は24時間形式（例：14:00）\n\
         - 場所・URL・listNameが明示されていない場合はnull\n\
         - タスクの重要度: タイトルに「重要」「緊急」「締切」「支払い」などが含まれる、または強い表現がある場合に starred: true"
    )
}

#[cfg(test)]
mod tests {
    use super::{IntentAction, parse_intent_json};

    #[test]
    fn parses_plain_json_payload() {
        let intent = parse_intent_json(
            r#"{"action":"create","type":"task","title":"牛乳を買う","date":null}"#,
        )
        .unwrap();
        assert_eq!(intent.action(), IntentAction::Create);
        assert_eq!(intent.title.as_deref(), Some("牛乳を買う"));
        assert!(intent.date.is_none());
    }

    #[test]
    fn parses_markdown_fenced_payload() {
        let raw = "```json\n{\"action\":\"cancel\",\"keyword\":\"会議\"}\n```";
        let intent = parse_intent_json(raw).unwrap();
        assert_eq!(intent.action(), IntentAction::Cancel);
        assert_eq!(intent.keyword.as_deref(), Some("会議"));
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let raw = "了解しました。\n{\"action\":\"list\",\"type\":\"task\"}\n以上です。";
        let intent = parse_intent_json(raw).unwrap();
        assert_eq!(intent.action(), IntentAction::List);
    }

    #[test]
    fn rejects_output_without_json() {
        assert!(parse_intent_json("すみません、わかりませんでした").is_err());
    }

    #[test]
    fn unknown_action_defaults_to_create() {
        let intent = parse_intent_json(r#"{"action":"banana"}"#).unwrap();
        assert_eq!(intent.action(), IntentAction::Create);
    }

    #[test]
    fn targets_prefers_plural_field() {
        let intent =
            parse_intent_json(r#"{"action":"complete","targetNumber":1,"targetNumbers":[5,6,7]}"#)
                .unwrap();
        assert_eq!(intent.targets(), vec![5, 6, 7]);
    }
}
