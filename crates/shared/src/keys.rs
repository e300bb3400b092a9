use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

const PREFIX: &str = "calbot:v1";

/// TTLs, in seconds. Flow sessions are short-lived by design; reminder
/// selections must outlive the item they belong to.
pub const FLOW_TTL_SECONDS: u64 = 600;
pub const LAST_BOT_TTL_SECONDS: u64 = 300;
pub const NOTIFICATION_CONTEXT_TTL_SECONDS: u64 = 86_400;
pub const DEDUPE_MARKER_TTL_SECONDS: u64 = 86_400;
pub const SNOOZE_TTL_SECONDS: u64 = 86_400;
pub const REMINDER_SELECTION_TTL_SECONDS: u64 = 7_776_000; // 90 days
pub const WEEKLY_DIGEST_TTL_SECONDS: u64 = 604_800;

pub fn flow(flow_tag: &str, user_id: &str) -> String {
    format!("{PREFIX}:flow:{flow_tag}:{user_id}")
}

pub fn reminder_selection(user_id: &str, item_id: &str) -> String {
    format!("{PREFIX}:reminders:{user_id}:{}", compact_item_id(item_id))
}

pub fn dedupe_marker(user_id: &str, item_id: &str, trigger_tag: &str) -> String {
    format!(
        "{PREFIX}:notified:{user_id}:{}:{trigger_tag}",
        compact_item_id(item_id)
    )
}

pub fn snooze(user_id: &str, item_id: &str) -> String {
    format!("{PREFIX}:snooze:{user_id}:{}", compact_item_id(item_id))
}

/// Set of item IDs with an outstanding snooze, so the sweep can find the
/// records without scanning the keyspace.
pub fn snooze_index(user_id: &str) -> String {
    format!("{PREFIX}:snooze_index:{user_id}")
}

pub fn notification_context(user_id: &str) -> String {
    format!("{PREFIX}:notify_ctx:{user_id}")
}

pub fn last_bot_message(user_id: &str) -> String {
    format!("{PREFIX}:last_bot:{user_id}")
}

pub fn weekly_digest_marker(user_id: &str, local_date: &str) -> String {
    format!("{PREFIX}:weekly_digest:{user_id}:{local_date}")
}

pub fn authenticated_users() -> String {
    format!("{PREFIX}:authenticated_users")
}

pub fn oauth_token(user_id: &str) -> String {
    format!("{PREFIX}:oauth_token:{user_id}")
}

/// Provider item IDs can be long and contain arbitrary characters; compact
/// them into a fixed-width digest segment so composed keys stay bounded.
fn compact_item_id(item_id: &str) -> String {
    let digest = Sha256::digest(item_id.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..12])
}
