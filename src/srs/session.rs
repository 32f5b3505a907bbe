use std::collections::HashMap;

use futures::future::join_all;
use rand::{
    seq::{
        IndexedRandom,
        SliceRandom,
    },
    Rng,
};
use tracing::{
    debug,
    info,
    warn,
};

use super::{
    next_level,
    next_review_time,
    quiz::{
        build_word_items,
        Modality,
        QuizItem,
        QuizKind,
    },
    MAX_SESSION_WORDS,
};
use crate::{
    core::{
        SavedWord,
        TutorError,
    },
    store::LocalStore,
};

/// Per-word answers, one slot per modality. `None` until answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModalityResults {
    pub meaning: Option<bool>,
    pub recall: Option<bool>,
    pub listening: Option<bool>,
}

impl ModalityResults {
    fn record(&mut self, modality: Modality, correct: bool) {
        match modality {
            Modality::Meaning => self.meaning = Some(correct),
            Modality::Recall => self.recall = Some(correct),
            Modality::Listening => self.listening = Some(correct),
        }
    }

    pub fn correct_count(&self) -> u32 {
        [self.meaning, self.recall, self.listening].iter().filter(|r| **r == Some(true)).count()
            as u32
    }

    /// Mastered this round: every modality answered correctly.
    pub fn all_correct(&self) -> bool {
        self.correct_count() == 3
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnswerFeedback {
    pub correct: bool,
    pub correct_answer: String,
    /// Headword revealed after a listening question.
    pub reveal: Option<String>,
    /// Text to read aloud after answering.
    pub speak: String,
}

/// An in-progress review: the selected words, their shuffled questions and answers so far.
#[derive(Debug, Clone)]
pub struct ReviewSession {
    words: Vec<SavedWord>,
    questions: Vec<QuizItem>,
    current: usize,
    answered: bool,
    results: HashMap<String, ModalityResults>,
}

impl ReviewSession {
    /// Picks up to `max_words` due words uniformly at random, builds three questions
    /// for each and shuffles all of them together. Distractors come from `pool`.
    pub fn build<R: Rng + ?Sized>(
        due: &[SavedWord],
        pool: &[SavedWord],
        max_words: usize,
        rng: &mut R,
    ) -> Self {
        let words: Vec<SavedWord> = due.choose_multiple(rng, max_words).cloned().collect();

        let mut questions: Vec<QuizItem> =
            words.iter().flat_map(|w| build_word_items(w, pool, rng)).collect();
        questions.shuffle(rng);

        let results = words.iter().map(|w| (w.id.clone(), ModalityResults::default())).collect();
        Self { words, questions, current: 0, answered: false, results }
    }

    pub fn words(&self) -> &[SavedWord] {
        &self.words
    }

    pub fn questions(&self) -> &[QuizItem] {
        &self.questions
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_question(&self) -> Option<&QuizItem> {
        self.questions.get(self.current)
    }

    pub fn is_answered(&self) -> bool {
        self.answered
    }

    pub fn is_complete(&self) -> bool {
        self.current >= self.questions.len()
    }

    pub fn results_for(&self, word_id: &str) -> Option<&ModalityResults> {
        self.results.get(word_id)
    }

    /// Records the answer to the current question. The question locks on the first
    /// call; later calls return `None` until [`advance`](Self::advance).
    pub fn answer(&mut self, choice: usize) -> Option<AnswerFeedback> {
        if self.answered {
            return None;
        }
        let question = self.questions.get(self.current)?;
        self.answered = true;

        let correct = question.is_correct(choice);
        let headword = self
            .words
            .iter()
            .find(|w| w.id == question.word_id)
            .map(|w| w.headword.clone())
            .unwrap_or_default();
        let reveal = matches!(question.kind, QuizKind::ListenMeaning | QuizKind::ListenPick)
            .then(|| headword.clone());
        let feedback = AnswerFeedback {
            correct,
            correct_answer: question.correct.clone(),
            reveal,
            speak: headword,
        };

        let modality = question.modality();
        self.results.entry(question.word_id.clone()).or_default().record(modality, correct);
        Some(feedback)
    }

    /// Moves past an answered question. Returns `true` while questions remain.
    pub fn advance(&mut self) -> bool {
        if self.answered && !self.is_complete() {
            self.current += 1;
            self.answered = false;
        }
        !self.is_complete()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WordOutcome {
    /// The word as it was when the session started.
    pub word: SavedWord,
    pub old_level: u32,
    pub new_level: u32,
    pub correct_count: u32,
    pub next_review: i64,
    /// False when the word was deleted during the session or its write failed.
    pub persisted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewSummary {
    pub outcomes: Vec<WordOutcome>,
    pub total_correct: u32,
    pub total_questions: u32,
}

#[derive(Debug)]
pub enum ReviewPhase {
    Idle,
    SessionActive(ReviewSession),
    Grading,
}

pub struct SrsScheduler {
    phase: ReviewPhase,
    max_session_words: usize,
}

impl Default for SrsScheduler {
    fn default() -> Self {
        Self::new(MAX_SESSION_WORDS)
    }
}

impl SrsScheduler {
    pub fn new(max_session_words: usize) -> Self {
        Self { phase: ReviewPhase::Idle, max_session_words: max_session_words.max(1) }
    }

    pub fn phase(&self) -> &ReviewPhase {
        &self.phase
    }

    pub fn is_active(&self) -> bool {
        matches!(self.phase, ReviewPhase::SessionActive(_))
    }

    pub fn session(&self) -> Option<&ReviewSession> {
        match &self.phase {
            ReviewPhase::SessionActive(session) => Some(session),
            _ => None,
        }
    }

    pub fn session_mut(&mut self) -> Option<&mut ReviewSession> {
        match &mut self.phase {
            ReviewPhase::SessionActive(session) => Some(session),
            _ => None,
        }
    }

    pub fn start<R: Rng + ?Sized>(
        &mut self,
        due: &[SavedWord],
        pool: &[SavedWord],
        rng: &mut R,
    ) -> Result<&mut ReviewSession, TutorError> {
        if !matches!(self.phase, ReviewPhase::Idle) {
            return Err(TutorError::Custom("a review session is already running".to_string()));
        }
        if due.is_empty() {
            return Err(TutorError::Custom("no words are due for review".to_string()));
        }

        let session = ReviewSession::build(due, pool, self.max_session_words, rng);
        info!(
            words = session.words().len(),
            questions = session.questions().len(),
            "review session started"
        );
        self.phase = ReviewPhase::SessionActive(session);
        self.session_mut()
            .ok_or_else(|| TutorError::Custom("review session failed to start".to_string()))
    }

    /// Leaves an unfinished session without touching the store. Progress is lost,
    /// so the caller must pass the user's confirmation; without it nothing happens.
    pub fn abandon(&mut self, confirmed: bool) -> bool {
        match self.phase {
            ReviewPhase::SessionActive(_) if confirmed => {
                debug!("review session abandoned");
                self.phase = ReviewPhase::Idle;
                true
            }
            ReviewPhase::SessionActive(_) => false,
            _ => true,
        }
    }

    /// Applies the level changes of a completed session and writes each word.
    ///
    /// Writes are independent: a word deleted mid-session, or one whose write
    /// fails, is reported with `persisted = false` and the summary still lists it
    /// from the session snapshot. The scheduler is back to idle afterwards, even
    /// if this future is dropped before it finishes.
    pub async fn grade(
        &mut self,
        store: &LocalStore,
        now_ms: i64,
    ) -> Result<ReviewSummary, TutorError> {
        let session = match std::mem::replace(&mut self.phase, ReviewPhase::Grading) {
            ReviewPhase::SessionActive(session) if session.is_complete() => session,
            ReviewPhase::SessionActive(session) => {
                self.phase = ReviewPhase::SessionActive(session);
                return Err(TutorError::Custom("review session is not finished".to_string()));
            }
            other => {
                self.phase = other;
                return Err(TutorError::Custom("no review session to grade".to_string()));
            }
        };
        let _idle = IdleOnDrop(&mut self.phase);

        let mut outcomes: Vec<WordOutcome> = session
            .words
            .iter()
            .map(|word| {
                let results = session.results.get(&word.id).copied().unwrap_or_default();
                let new_level = next_level(word.level, results.all_correct());
                WordOutcome {
                    word: word.clone(),
                    old_level: word.level,
                    new_level,
                    correct_count: results.correct_count(),
                    next_review: next_review_time(new_level, now_ms),
                    persisted: false,
                }
            })
            .collect();

        let writes = join_all(
            outcomes.iter().map(|o| store.update_word_srs(&o.word.id, o.new_level, o.next_review)),
        )
        .await;

        for (outcome, written) in outcomes.iter_mut().zip(writes) {
            match written {
                Ok(persisted) => outcome.persisted = persisted,
                Err(e) => warn!(word = %outcome.word.id, error = %e, "failed to save review result"),
            }
        }

        let total_correct = outcomes.iter().map(|o| o.correct_count).sum();
        let total_questions = session.questions.len() as u32;
        info!(words = outcomes.len(), total_correct, total_questions, "review session graded");
        Ok(ReviewSummary { outcomes, total_correct, total_questions })
    }
}

/// Returns the scheduler to idle when grading ends, however it ends.
struct IdleOnDrop<'a>(&'a mut ReviewPhase);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        *self.0 = ReviewPhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use rand::{
        rngs::StdRng,
        SeedableRng,
    };

    use super::*;
    use crate::{
        core::utils::{
            now_ms,
            start_of_day_ms,
            DAY_MS,
        },
        srs::MAX_LEVEL,
    };

    fn word(id: &str, level: u32) -> SavedWord {
        SavedWord {
            id: id.to_string(),
            headword: id.to_string(),
            translation: format!("{id}-zh"),
            part_of_speech: String::new(),
            ipa: String::new(),
            example: String::new(),
            example_translation: String::new(),
            created_at: 0,
            next_review: 0,
            level,
        }
    }

    fn correct_choice(item: &QuizItem) -> usize {
        item.options.iter().position(|o| *o == item.correct).unwrap()
    }

    fn wrong_choice(item: &QuizItem) -> usize {
        item.options.iter().position(|o| *o != item.correct).unwrap()
    }

    /// Answers every question, getting `miss` wrong on its recall question.
    fn play(session: &mut ReviewSession, miss: Option<&str>) {
        loop {
            let item = session.current_question().unwrap().clone();
            let choice = if Some(item.word_id.as_str()) == miss && item.modality() == Modality::Recall
            {
                wrong_choice(&item)
            } else {
                correct_choice(&item)
            };
            session.answer(choice).unwrap();
            if !session.advance() {
                break;
            }
        }
    }

    async fn seeded_store(words: &[SavedWord]) -> LocalStore {
        let store = LocalStore::in_memory();
        for w in words {
            store.add_saved_word(w.clone()).await.unwrap();
        }
        store
    }

    #[test]
    fn test_session_caps_words_and_builds_three_items_each() {
        let due: Vec<SavedWord> = (0..25).map(|i| word(&format!("w{i}"), 0)).collect();
        let mut rng = StdRng::seed_from_u64(11);
        let session = ReviewSession::build(&due, &due, MAX_SESSION_WORDS, &mut rng);
        assert_eq!(session.words().len(), MAX_SESSION_WORDS);
        assert_eq!(session.questions().len(), MAX_SESSION_WORDS * 3);

        let few = &due[..4];
        let session = ReviewSession::build(few, &due, MAX_SESSION_WORDS, &mut rng);
        assert_eq!(session.words().len(), 4);

        let mut ids: Vec<&str> = session.words().iter().map(|w| w.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_answer_locks_until_advance() {
        let due = vec![word("invoice", 0), word("ledger", 0), word("audit", 0)];
        let mut rng = StdRng::seed_from_u64(12);
        let mut session = ReviewSession::build(&due, &due, 10, &mut rng);

        let first = session.current_question().unwrap().clone();
        let feedback = session.answer(wrong_choice(&first)).unwrap();
        assert!(!feedback.correct);
        assert!(session.answer(correct_choice(&first)).is_none());

        let results = session.results_for(&first.word_id).unwrap();
        let recorded = match first.modality() {
            Modality::Meaning => results.meaning,
            Modality::Recall => results.recall,
            Modality::Listening => results.listening,
        };
        assert_eq!(recorded, Some(false));

        assert!(session.advance());
        assert_eq!(session.current_index(), 1);
    }

    #[tokio::test]
    async fn test_all_correct_round_promotes_negotiate() {
        let negotiate = word("negotiate", 2);
        let pool = vec![negotiate.clone(), word("invoice", 0), word("ledger", 1)];
        let store = seeded_store(&pool).await;

        let mut scheduler = SrsScheduler::default();
        let mut rng = StdRng::seed_from_u64(13);
        let session = scheduler.start(&[negotiate.clone()], &pool, &mut rng).unwrap();
        play(session, None);

        let now = now_ms();
        let summary = scheduler.grade(&store, now).await.unwrap();
        assert!(matches!(scheduler.phase(), ReviewPhase::Idle));
        assert_eq!(summary.total_correct, 3);
        assert_eq!(summary.total_questions, 3);

        let stored = store.get_saved_word("negotiate").await.unwrap().unwrap();
        assert_eq!(stored.level, 3);
        assert_eq!(stored.next_review, start_of_day_ms(now) + 7 * DAY_MS);
    }

    #[tokio::test]
    async fn test_one_miss_demotes_and_others_promote() {
        let pool = vec![word("invoice", 0), word("ledger", 3), word("audit", MAX_LEVEL)];
        let store = seeded_store(&pool).await;

        let mut scheduler = SrsScheduler::default();
        let mut rng = StdRng::seed_from_u64(14);
        let session = scheduler.start(&pool, &pool, &mut rng).unwrap();
        play(session, Some("ledger"));

        let summary = scheduler.grade(&store, now_ms()).await.unwrap();
        let level_of = |id: &str| summary.outcomes.iter().find(|o| o.word.id == id).unwrap().new_level;
        assert_eq!(level_of("invoice"), 1);
        assert_eq!(level_of("ledger"), 2);
        assert_eq!(level_of("audit"), MAX_LEVEL);
        assert_eq!(store.get_saved_word("ledger").await.unwrap().unwrap().level, 2);
    }

    #[tokio::test]
    async fn test_word_deleted_mid_session_is_skipped() {
        let pool = vec![word("invoice", 1), word("ledger", 1), word("audit", 1)];
        let store = seeded_store(&pool).await;

        let mut scheduler = SrsScheduler::default();
        let mut rng = StdRng::seed_from_u64(15);
        let session = scheduler.start(&pool, &pool, &mut rng).unwrap();
        play(session, None);
        store.delete_saved_word("ledger").await.unwrap();

        let summary = scheduler.grade(&store, now_ms()).await.unwrap();
        assert_eq!(summary.outcomes.len(), 3);
        let ledger = summary.outcomes.iter().find(|o| o.word.id == "ledger").unwrap();
        assert!(!ledger.persisted);
        assert_eq!(ledger.word.translation, "ledger-zh");
        assert!(store.get_saved_word("ledger").await.unwrap().is_none());
        assert_eq!(store.get_saved_word("invoice").await.unwrap().unwrap().level, 2);
    }

    #[tokio::test]
    async fn test_abandon_needs_confirmation_and_writes_nothing() {
        let pool = vec![word("invoice", 2), word("ledger", 2), word("audit", 2)];
        let store = seeded_store(&pool).await;

        let mut scheduler = SrsScheduler::default();
        let mut rng = StdRng::seed_from_u64(16);
        let session = scheduler.start(&pool, &pool, &mut rng).unwrap();
        let first = session.current_question().unwrap().clone();
        session.answer(wrong_choice(&first));

        assert!(!scheduler.abandon(false));
        assert!(scheduler.is_active());
        assert!(scheduler.abandon(true));
        assert!(!scheduler.is_active());

        for w in store.get_saved_words().await.unwrap() {
            assert_eq!(w.level, 2);
        }
        assert!(scheduler.grade(&store, now_ms()).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_writes_still_return_summary() {
        let dir = tempfile::tempdir().unwrap();
        let pool = vec![word("invoice", 1), word("ledger", 1), word("audit", 1)];
        let store = LocalStore::open(dir.path());
        for w in &pool {
            store.add_saved_word(w.clone()).await.unwrap();
        }
        let words_file = dir.path().join("saved_words.json");
        std::fs::remove_file(&words_file).unwrap();
        std::fs::create_dir(&words_file).unwrap();

        let mut scheduler = SrsScheduler::default();
        let mut rng = StdRng::seed_from_u64(18);
        let session = scheduler.start(&pool, &pool, &mut rng).unwrap();
        play(session, None);

        let summary = scheduler.grade(&store, now_ms()).await.unwrap();
        assert_eq!(summary.outcomes.len(), 3);
        assert_eq!(summary.total_correct, 9);
        assert!(summary.outcomes.iter().all(|o| !o.persisted && o.new_level == 2));
        assert!(matches!(scheduler.phase(), ReviewPhase::Idle));
        assert_eq!(store.get_saved_word("invoice").await.unwrap().unwrap().level, 1);
    }

    #[tokio::test]
    async fn test_dropped_grading_returns_to_idle() {
        use futures::FutureExt;

        let dir = tempfile::tempdir().unwrap();
        let pool = vec![word("invoice", 0), word("ledger", 0), word("audit", 0)];
        let store = LocalStore::open(dir.path());
        for w in &pool {
            store.add_saved_word(w.clone()).await.unwrap();
        }

        let mut scheduler = SrsScheduler::default();
        let mut rng = StdRng::seed_from_u64(19);
        let session = scheduler.start(&pool, &pool, &mut rng).unwrap();
        play(session, None);

        let _ = scheduler.grade(&store, now_ms()).now_or_never();
        assert!(matches!(scheduler.phase(), ReviewPhase::Idle));
        assert!(scheduler.start(&pool, &pool, &mut rng).is_ok());
    }

    #[tokio::test]
    async fn test_grading_unfinished_session_is_rejected() {
        let pool = vec![word("invoice", 0), word("ledger", 0)];
        let store = seeded_store(&pool).await;
        let mut scheduler = SrsScheduler::default();
        let mut rng = StdRng::seed_from_u64(17);
        scheduler.start(&pool, &pool, &mut rng).unwrap();

        assert!(scheduler.grade(&store, now_ms()).await.is_err());
        assert!(scheduler.is_active());
    }
}
