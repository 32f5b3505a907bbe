use rand::{
    rngs::StdRng,
    SeedableRng,
};
use tokio::task::JoinHandle;
use tracing::{
    debug,
    info,
};

use crate::{
    config::AppConfig,
    core::{
        utils::now_ms,
        ArticleRecord,
        ExamResult,
        SpeakerRole,
        SpeakingRecord,
        TutorError,
        WordCard,
    },
    provider::{
        ListeningAudio,
        DEFAULT_VOICE,
        RANDOM_VOICE,
    },
    records::{
        ExamAttempt,
        ExplainedItem,
        RecordManager,
        SpeakingSession,
    },
    srs::{
        AnswerFeedback,
        ReviewSession,
        ReviewSummary,
        SrsScheduler,
    },
    store::{
        keys,
        LocalStore,
    },
    sync::{
        ConflictPrompt,
        SyncCoordinator,
        SyncOutcome,
    },
    vocab::{
        self,
        ReviewEntry,
        WordLookup,
    },
};

pub const DEFAULT_TARGET_SCORE: u32 = 700;

/// Everything the learner is currently doing.
pub struct AppState {
    pub api_key: Option<String>,
    pub target_score: u32,
    pub selected_voice: String,
    pub last_used_voice: Option<String>,
    pub current_article: Option<ArticleRecord>,
    pub exam: Option<ExamAttempt>,
    pub speaking: Option<SpeakingSession>,
    pub review: SrsScheduler,
}

impl AppState {
    pub fn new(max_session_words: usize) -> Self {
        Self {
            api_key: None,
            target_score: DEFAULT_TARGET_SCORE,
            selected_voice: RANDOM_VOICE.to_string(),
            last_used_voice: None,
            current_article: None,
            exam: None,
            speaking: None,
            review: SrsScheduler::new(max_session_words),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(crate::srs::MAX_SESSION_WORDS)
    }
}

pub struct App {
    state: AppState,
    store: LocalStore,
    sync: SyncCoordinator,
    records: RecordManager,
    rng: StdRng,
    listener: Option<JoinHandle<()>>,
}

impl App {
    pub fn new(
        store: LocalStore,
        sync: SyncCoordinator,
        records: RecordManager,
        config: &AppConfig,
    ) -> Self {
        Self::with_rng(store, sync, records, config, StdRng::from_os_rng())
    }

    pub fn with_rng(
        store: LocalStore,
        sync: SyncCoordinator,
        records: RecordManager,
        config: &AppConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            state: AppState::new(config.max_session_words),
            store,
            sync,
            records,
            rng,
            listener: None,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn sync(&self) -> &SyncCoordinator {
        &self.sync
    }

    /// Opens the store, loads the saved preferences and, when cloud sync was
    /// enabled, tries to restore the session without prompting.
    pub async fn start(&mut self) -> Result<(), TutorError> {
        self.store.init().await?;
        self.state.api_key = self
            .store
            .get_setting_as::<String>(keys::API_KEY)
            .await?
            .filter(|key| !key.trim().is_empty());
        self.state.target_score = self
            .store
            .get_setting_as::<u32>(keys::TARGET_SCORE)
            .await?
            .unwrap_or(DEFAULT_TARGET_SCORE);

        if self.listener.is_none() {
            self.listener = Some(self.sync.spawn_change_listener());
        }
        if self.store.get_setting_as::<bool>(keys::SYNC_ENABLED).await?.unwrap_or(false) {
            let restored = self.sync.silent_login().await;
            debug!(restored, "cloud session check");
        }
        info!(target_score = self.state.target_score, has_key = self.state.api_key.is_some(), "app started");
        Ok(())
    }

    pub async fn set_api_key(&mut self, key: &str) -> Result<(), TutorError> {
        let key = key.trim();
        self.store.set_setting(keys::API_KEY, key).await?;
        self.state.api_key = (!key.is_empty()).then(|| key.to_string());
        Ok(())
    }

    pub async fn set_target_score(&mut self, score: u32) -> Result<(), TutorError> {
        self.store.set_setting(keys::TARGET_SCORE, score).await?;
        self.state.target_score = score;
        Ok(())
    }

    pub fn set_voice(&mut self, voice: &str) {
        self.state.selected_voice = voice.to_string();
    }

    fn require_api_key(&self) -> Result<(), TutorError> {
        match &self.state.api_key {
            Some(_) => Ok(()),
            None => Err(TutorError::Custom("no API key configured".to_string())),
        }
    }

    // Articles

    pub async fn generate_article(&mut self, topic: Option<&str>) -> Result<&ArticleRecord, TutorError> {
        self.require_api_key()?;
        let record = self
            .records
            .generate_article(self.state.target_score, topic, &self.state.selected_voice, &mut self.rng)
            .await?;
        self.state.last_used_voice = record.voice.clone();
        Ok(&*self.state.current_article.insert(record))
    }

    /// Reopens the newest article, if the newest record is one.
    pub async fn load_last_session(&mut self) -> Result<Option<&ArticleRecord>, TutorError> {
        let Some(record) = self.records.latest_article().await? else {
            return Ok(None);
        };
        if record.voice.is_some() {
            self.state.last_used_voice = record.voice.clone();
        }
        Ok(Some(&*self.state.current_article.insert(record)))
    }

    pub async fn article_audio(&mut self) -> Result<Vec<u8>, TutorError> {
        let Some(record) = self.state.current_article.as_mut() else {
            return Err(TutorError::Custom("no article is open".to_string()));
        };
        self.records.ensure_article_audio(record, &mut self.rng).await
    }

    // Vocabulary

    pub async fn lookup(&self, word: &str) -> Result<Option<WordLookup>, TutorError> {
        let current = self.state.current_article.as_ref().map(|a| &a.data);
        vocab::lookup_word(&self.store, word, current).await
    }

    pub async fn generate_word(&self, word: &str) -> Result<WordLookup, TutorError> {
        self.require_api_key()?;
        vocab::generate_word(&self.store, self.records.provider(), word).await
    }

    pub async fn toggle_saved(&self, word: &str, card: &WordCard) -> Result<bool, TutorError> {
        vocab::toggle_saved_word(&self.store, word, card, now_ms()).await
    }

    // Review

    pub async fn review_entry(&self) -> Result<ReviewEntry, TutorError> {
        let words = self.store.get_saved_words().await?;
        Ok(vocab::review_entry(&words, now_ms()))
    }

    pub async fn start_review(&mut self) -> Result<&mut ReviewSession, TutorError> {
        let now = now_ms();
        let words = self.store.get_saved_words().await?;
        match vocab::review_entry(&words, now) {
            ReviewEntry::Ready { .. } => {}
            entry => return Err(TutorError::Custom(format!("review not available: {entry:?}"))),
        }
        let due = self.store.get_words_due_at(now).await?;
        self.state.review.start(&due, &words, &mut self.rng)
    }

    fn active_review(&mut self) -> Result<&mut ReviewSession, TutorError> {
        self.state
            .review
            .session_mut()
            .ok_or_else(|| TutorError::Custom("no review session is running".to_string()))
    }

    /// Answers the current question. `Ok(None)` when it was already answered.
    pub fn answer_review(&mut self, choice: usize) -> Result<Option<AnswerFeedback>, TutorError> {
        Ok(self.active_review()?.answer(choice))
    }

    /// `Ok(false)` once every question is answered and the session can be graded.
    pub fn advance_review(&mut self) -> Result<bool, TutorError> {
        Ok(self.active_review()?.advance())
    }

    /// Leaves the running review without saving. Needs the user's confirmation
    /// while questions remain; returns whether the session is gone.
    pub fn abandon_review(&mut self, confirmed: bool) -> bool {
        self.state.review.abandon(confirmed)
    }

    pub async fn finish_review(&mut self) -> Result<ReviewSummary, TutorError> {
        self.state.review.grade(&self.store, now_ms()).await
    }

    // Exam and speaking

    pub async fn start_exam(&mut self) -> Result<&mut ExamAttempt, TutorError> {
        self.require_api_key()?;
        let attempt = self.records.start_exam(self.state.target_score, &mut self.rng).await?;
        Ok(self.state.exam.insert(attempt))
    }

    pub async fn answer_exam(&mut self, question_id: &str, option: &str) -> Result<(), TutorError> {
        let attempt = self.state.exam.as_mut().ok_or_else(no_exam)?;
        attempt.record_answer(question_id, option).await
    }

    pub async fn submit_exam(&mut self) -> Result<&ExamResult, TutorError> {
        let attempt = self.state.exam.as_mut().ok_or_else(no_exam)?;
        attempt.submit().await
    }

    pub async fn explain_exam(&mut self) -> Result<Vec<ExplainedItem>, TutorError> {
        let attempt = self.state.exam.as_mut().ok_or_else(no_exam)?;
        self.records.explain_exam(attempt).await
    }

    /// Listening clips use the selected voice, or the default one when the
    /// selection is random, so replays hit the per-voice cache.
    pub async fn exam_listening_audio(&mut self, question_id: &str) -> Result<ListeningAudio, TutorError> {
        let voice = match self.state.selected_voice.as_str() {
            RANDOM_VOICE => DEFAULT_VOICE.to_string(),
            named => named.to_string(),
        };
        let attempt = self.state.exam.as_mut().ok_or_else(no_exam)?;
        self.records.exam_listening_audio(attempt, question_id, &voice).await
    }

    /// Starts a conversation, finishing any session still running first.
    pub async fn start_speaking(&mut self, topic: &str, level: u32) -> Result<&mut SpeakingSession, TutorError> {
        self.require_api_key()?;
        self.stop_speaking().await?;
        let session = self.records.start_speaking(topic, level, &mut self.rng).await?;
        Ok(self.state.speaking.insert(session))
    }

    pub async fn speaking_turn(&mut self, role: SpeakerRole, text: &str) -> Result<(), TutorError> {
        let session = self
            .state
            .speaking
            .as_mut()
            .ok_or_else(|| TutorError::Custom("no speaking session is running".to_string()))?;
        session.append_turn(role, text, now_ms()).await
    }

    pub async fn stop_speaking(&mut self) -> Result<Option<SpeakingRecord>, TutorError> {
        let Some(mut session) = self.state.speaking.take() else {
            return Ok(None);
        };
        match session.finish(now_ms()).await {
            Ok(record) => Ok(Some(record.clone())),
            Err(e) => {
                self.state.speaking = Some(session);
                Err(e)
            }
        }
    }

    // Cloud

    /// Interactive sign-in followed by reconciliation with the remote backup.
    /// `Ok(None)` when the user did not finish signing in.
    pub async fn login_and_reconcile(
        &mut self,
        prompt: &dyn ConflictPrompt,
    ) -> Result<Option<SyncOutcome>, TutorError> {
        if !self.sync.login().await? {
            return Ok(None);
        }
        let outcome = self.sync.compare_and_prompt_sync(prompt).await?;
        if outcome == SyncOutcome::RestoredRemote {
            self.state.current_article = None;
        }
        Ok(Some(outcome))
    }
}

fn no_exam() -> TutorError {
    TutorError::Custom("no exam is open".to_string())
}

impl Drop for App {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}
