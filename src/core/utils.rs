use std::sync::OnceLock;

use chrono::{
    Local,
    TimeZone,
    Utc,
};
use rand::Rng;
use regex::Regex;

use super::{
    HistoryRecord,
    RecordId,
};

pub const DAY_MS: i64 = 86_400_000;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Local midnight of the day containing `at_ms`.
pub fn start_of_day_ms(at_ms: i64) -> i64 {
    let Some(local) = Local.timestamp_millis_opt(at_ms).single() else {
        return at_ms - at_ms.rem_euclid(DAY_MS);
    };
    let midnight = local.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default();
    match Local.from_local_datetime(&midnight).earliest() {
        Some(start) => start.timestamp_millis(),
        None => at_ms - at_ms.rem_euclid(DAY_MS),
    }
}

pub fn display_date(at_ms: i64) -> String {
    match Local.timestamp_millis_opt(at_ms).single() {
        Some(local) => local.format("%Y/%m/%d").to_string(),
        None => String::new(),
    }
}

pub fn display_datetime(at_ms: i64) -> String {
    match Local.timestamp_millis_opt(at_ms).single() {
        Some(local) => local.format("%Y/%m/%d %H:%M:%S").to_string(),
        None => String::new(),
    }
}

/// Recency key used to order history. Falls back from `createdAt` to a numeric id,
/// then to the leading epoch digits of a string id.
pub fn history_sort_ts(record: &HistoryRecord) -> i64 {
    if let Some(created_at) = record.created_at() {
        return created_at;
    }
    match record.id() {
        RecordId::Numeric(n) => *n,
        RecordId::Text(text) => {
            static LEADING_EPOCH: OnceLock<Option<Regex>> = OnceLock::new();
            LEADING_EPOCH
                .get_or_init(|| Regex::new(r"^\d{10,}").ok())
                .as_ref()
                .and_then(|re| re.find(text))
                .and_then(|m| m.as_str().parse::<i64>().ok())
                .unwrap_or(0)
        }
    }
}

/// Newest first; equal timestamps fall back to the id compared as text, greater first.
pub fn sort_history(records: &mut [HistoryRecord]) {
    records.sort_by(|a, b| {
        history_sort_ts(b)
            .cmp(&history_sort_ts(a))
            .then_with(|| b.id().to_string().cmp(&a.id().to_string()))
    });
}

/// `"{epoch-ms}-{6 base36 chars}"`, the id shape for practice records and exam attempts.
pub fn practice_id<R: Rng + ?Sized>(now_ms: i64, rng: &mut R) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let suffix: String =
        (0..6).map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char).collect();
    format!("{now_ms}-{suffix}")
}

/// Truncates to `max_chars` characters, appending an ellipsis marker.
pub fn title_from(text: &str, max_chars: usize) -> String {
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}...")
}
