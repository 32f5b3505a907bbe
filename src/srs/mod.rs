//! Spaced-repetition scheduling: interval table, level transitions and the
//! review session state machine.

use crate::core::utils::{
    start_of_day_ms,
    DAY_MS,
};

pub mod quiz;
pub mod session;

pub use quiz::{
    Modality,
    QuizItem,
    QuizKind,
};
pub use session::{
    AnswerFeedback,
    ReviewPhase,
    ReviewSession,
    ReviewSummary,
    SrsScheduler,
    WordOutcome,
};

/// Days until the next review, indexed by mastery level.
pub const SRS_INTERVALS: [i64; 6] = [0, 1, 3, 7, 14, 30];
pub const MAX_LEVEL: u32 = (SRS_INTERVALS.len() - 1) as u32;
pub const MAX_SESSION_WORDS: usize = 10;
pub const MIN_REVIEW_WORDS: usize = 3;

pub fn interval_days(level: u32) -> i64 {
    SRS_INTERVALS[(level.min(MAX_LEVEL)) as usize]
}

/// Start of the day containing `now_ms`, plus the level's interval.
pub fn next_review_time(level: u32, now_ms: i64) -> i64 {
    start_of_day_ms(now_ms) + interval_days(level) * DAY_MS
}

/// One level up after a fully correct round, one down otherwise, clamped to the table.
/// Out-of-range levels from imported data are pulled back to the top level first.
pub fn next_level(level: u32, mastered: bool) -> u32 {
    let level = level.min(MAX_LEVEL);
    if mastered {
        (level + 1).min(MAX_LEVEL)
    } else {
        level.saturating_sub(1)
    }
}
