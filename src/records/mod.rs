//! Activity records: articles, exam attempts and speaking sessions, each
//! persisted into history as it progresses.

use std::{
    sync::Arc,
    time::Duration,
};

use rand::Rng;
use tracing::{
    info,
    warn,
};

use crate::{
    config::AppConfig,
    core::{
        utils::now_ms,
        ArticleRecord,
        TutorError,
    },
    provider::{
        resolve_voice,
        ContentProvider,
        ListeningAudio,
    },
    store::LocalStore,
};

pub mod article;
pub mod exam;
pub mod speaking;

pub use article::{
    ensure_article_audio,
    latest_article,
    save_article,
    NewArticle,
};
pub use exam::{
    build_wrong_payload,
    flatten_exam_questions,
    grade_exam,
    merge_explanations,
    ExamAttempt,
    ExplainedItem,
};
pub use speaking::SpeakingSession;

/// Creates activity records by combining the content provider with the store.
#[derive(Clone)]
pub struct RecordManager {
    store: LocalStore,
    provider: Arc<dyn ContentProvider>,
    tts_attempts: u32,
    tts_delay: Duration,
}

impl RecordManager {
    pub fn new(
        store: LocalStore,
        provider: Arc<dyn ContentProvider>,
        tts_attempts: u32,
        tts_delay: Duration,
    ) -> Self {
        Self { store, provider, tts_attempts, tts_delay }
    }

    pub fn from_config(store: LocalStore, provider: Arc<dyn ContentProvider>, config: &AppConfig) -> Self {
        Self::new(store, provider, config.tts_retry_attempts, config.tts_retry_delay())
    }

    pub fn provider(&self) -> &dyn ContentProvider {
        self.provider.as_ref()
    }

    /// Generates a passage and its narration, then saves it as a new article.
    /// Narration failure still saves the article; its audio is backfilled on replay.
    pub async fn generate_article<R: Rng + ?Sized>(
        &self,
        target_score: u32,
        topic: Option<&str>,
        selected_voice: &str,
        rng: &mut R,
    ) -> Result<ArticleRecord, TutorError> {
        let voice = resolve_voice(selected_voice, rng);
        let mut content = self.provider.generate_study_content(target_score, topic).await?;
        content.fill_derived_text();

        let audio = match self.provider.synthesize_speech(&content.article_text(), &voice).await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => None,
            Err(e) => {
                warn!(voice, error = %e, "article narration failed, saving without audio");
                None
            }
        };

        let article = NewArticle {
            content,
            audio,
            voice: Some(voice),
            topic: topic.map(str::to_string),
            target_score,
        };
        save_article(&self.store, article, now_ms()).await
    }

    pub async fn ensure_article_audio<R: Rng + ?Sized>(
        &self,
        record: &mut ArticleRecord,
        rng: &mut R,
    ) -> Result<Vec<u8>, TutorError> {
        ensure_article_audio(&self.store, self.provider.as_ref(), record, rng).await
    }

    pub async fn latest_article(&self) -> Result<Option<ArticleRecord>, TutorError> {
        latest_article(&self.store).await
    }

    pub async fn start_exam<R: Rng + ?Sized>(
        &self,
        target_score: u32,
        rng: &mut R,
    ) -> Result<ExamAttempt, TutorError> {
        let generated = self.provider.generate_exam(target_score).await?;
        let now = now_ms();
        let questions = flatten_exam_questions(&generated, now, rng);
        let attempt = ExamAttempt::start(self.store.clone(), questions, target_score, now, rng).await?;
        info!(target_score, "mock exam ready");
        Ok(attempt)
    }

    pub async fn exam_listening_audio(
        &self,
        attempt: &mut ExamAttempt,
        question_id: &str,
        voice: &str,
    ) -> Result<ListeningAudio, TutorError> {
        attempt
            .listening_audio(self.provider.as_ref(), question_id, voice, self.tts_attempts, self.tts_delay)
            .await
    }

    pub async fn explain_exam(&self, attempt: &mut ExamAttempt) -> Result<Vec<ExplainedItem>, TutorError> {
        attempt.explain(self.provider.as_ref()).await
    }

    pub async fn start_speaking<R: Rng + ?Sized>(
        &self,
        topic: &str,
        level: u32,
        rng: &mut R,
    ) -> Result<SpeakingSession, TutorError> {
        SpeakingSession::start(self.store.clone(), topic, level, now_ms(), rng).await
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
        core::{
            ExamStage,
            HistoryRecord,
        },
        provider::{
            fake::FakeProvider,
            GeneratedExam,
            RawExamQuestion,
            VOICE_NAMES,
        },
    };

    fn manager(store: &LocalStore, provider: FakeProvider) -> RecordManager {
        RecordManager::new(store.clone(), Arc::new(provider), 2, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_generate_article_saves_audio_and_voice() {
        let store = LocalStore::in_memory();
        let records = manager(&store, FakeProvider::default());
        let mut rng = StdRng::seed_from_u64(40);

        let article = records.generate_article(700, Some("logistics"), "random", &mut rng).await.unwrap();
        assert!(article.audio.is_some());
        assert!(VOICE_NAMES.contains(&article.voice.as_deref().unwrap()));
        assert_eq!(article.topic.as_deref(), Some("logistics"));
        assert_eq!(records.latest_article().await.unwrap().unwrap().id, article.id);
    }

    #[tokio::test]
    async fn test_failed_narration_still_saves_article() {
        let store = LocalStore::in_memory();
        let records = manager(&store, FakeProvider { speech_failures: 1, ..Default::default() });
        let mut rng = StdRng::seed_from_u64(41);

        let mut article = records.generate_article(600, None, "Kore", &mut rng).await.unwrap();
        assert_eq!(article.audio, None);
        assert_eq!(article.voice.as_deref(), Some("Kore"));

        let bytes = records.ensure_article_audio(&mut article, &mut rng).await.unwrap();
        assert!(!bytes.is_empty());
        assert!(records.latest_article().await.unwrap().unwrap().audio.is_some());
    }

    #[tokio::test]
    async fn test_empty_exam_is_a_format_error() {
        let store = LocalStore::in_memory();
        let records = manager(&store, FakeProvider::default());
        let mut rng = StdRng::seed_from_u64(42);

        let err = records.start_exam(700, &mut rng).await.err().unwrap();
        assert!(matches!(err, TutorError::ContentFormat(_)));
        assert_eq!(store.history_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exam_flow_through_manager() {
        let store = LocalStore::in_memory();
        let provider = FakeProvider::default();
        *provider.exam.lock().unwrap() = GeneratedExam {
            grammar: vec![RawExamQuestion {
                id: Some("g1".to_string()),
                question: Some("She ___ the report yesterday.".to_string()),
                options: Some(vec!["send".to_string(), "sent".to_string()]),
                answer: Some("sent".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let records = manager(&store, provider);
        let mut rng = StdRng::seed_from_u64(43);

        let mut attempt = records.start_exam(800, &mut rng).await.unwrap();
        attempt.record_answer("g1", "send").await.unwrap();
        attempt.submit().await.unwrap();
        let explained = records.explain_exam(&mut attempt).await.unwrap();

        assert_eq!(explained.len(), 1);
        assert_eq!(explained[0].explanation.as_ref().unwrap().why_wrong, "send is not sent");
        match store.get_latest_history().await.unwrap().unwrap() {
            HistoryRecord::Exam(exam) => assert_eq!(exam.record_stage, ExamStage::Explained),
            other => panic!("unexpected record {other:?}"),
        }
    }
}
