use base64::{
    engine::general_purpose::STANDARD,
    Engine as _,
};
use rand::Rng;
use tracing::{
    debug,
    info,
};

use crate::{
    core::{
        utils::{
            display_date,
            title_from,
        },
        ArticleRecord,
        HistoryRecord,
        RecordId,
        StudyContent,
        TutorError,
    },
    provider::{
        resolve_voice,
        ContentProvider,
    },
    store::LocalStore,
};

const TITLE_CHARS: usize = 30;

/// What the reader needs to start a new article.
pub struct NewArticle {
    pub content: StudyContent,
    pub audio: Option<Vec<u8>>,
    pub voice: Option<String>,
    pub topic: Option<String>,
    pub target_score: u32,
}

fn article_title(content: &StudyContent) -> String {
    match content.segments.first() {
        Some(first) => title_from(&first.en, TITLE_CHARS),
        None => title_from(&content.article_text(), TITLE_CHARS),
    }
}

/// Inserts a new article record. Ids are epoch milliseconds, bumped forward if
/// another record already holds the same millisecond.
pub async fn save_article(
    store: &LocalStore,
    article: NewArticle,
    now_ms: i64,
) -> Result<ArticleRecord, TutorError> {
    let NewArticle { mut content, audio, voice, topic, target_score } = article;
    let has_text = !content.segments.is_empty()
        || content.article.as_deref().is_some_and(|a| !a.trim().is_empty());
    if !has_text {
        return Err(TutorError::ContentFormat("generated article has no text".to_string()));
    }
    content.fill_derived_text();

    let mut id = now_ms;
    while store.get_history_record(&RecordId::Numeric(id)).await?.is_some() {
        id += 1;
    }

    let record = ArticleRecord {
        id: RecordId::Numeric(id),
        created_at: None,
        date: display_date(now_ms),
        title: article_title(&content),
        score: Some(target_score),
        voice,
        topic,
        data: content,
        audio: audio.map(|bytes| STANDARD.encode(bytes)),
    };
    store.add_history(HistoryRecord::Article(record.clone())).await?;
    info!(id, title = %record.title, "saved article");
    Ok(record)
}

/// Returns the article's audio, synthesizing and persisting it first when the
/// record has none (backups carry no audio).
pub async fn ensure_article_audio<R: Rng + ?Sized>(
    store: &LocalStore,
    provider: &dyn ContentProvider,
    record: &mut ArticleRecord,
    rng: &mut R,
) -> Result<Vec<u8>, TutorError> {
    if let Some(encoded) = &record.audio {
        return Ok(STANDARD.decode(encoded)?);
    }

    let voice = resolve_voice(record.voice.as_deref().unwrap_or_default(), rng);
    debug!(id = %record.id, voice, "backfilling article audio");
    let bytes = provider.synthesize_speech(&record.data.article_text(), &voice).await?;
    if bytes.is_empty() {
        return Err(TutorError::ContentFormat("speech synthesis returned no audio".to_string()));
    }

    let mut updated = record.clone();
    updated.audio = Some(STANDARD.encode(&bytes));
    store.add_history(HistoryRecord::Article(updated.clone())).await?;
    *record = updated;
    Ok(bytes)
}

/// The newest history record, if it is an article.
pub async fn latest_article(store: &LocalStore) -> Result<Option<ArticleRecord>, TutorError> {
    Ok(store.get_latest_history().await?.and_then(|record| record.as_article().cloned()))
}

#[cfg(test)]
mod tests {
    use rand::{
        rngs::StdRng,
        SeedableRng,
    };

    use super::*;
    use crate::{
        core::Segment,
        provider::fake::FakeProvider,
    };

    fn content() -> StudyContent {
        StudyContent {
            segments: vec![
                Segment {
                    en: "The quarterly budget meeting has been moved to Friday.".to_string(),
                    zh: "季度預算會議改到週五。".to_string(),
                },
                Segment { en: "Please bring the invoices.".to_string(), zh: "請帶發票。".to_string() },
            ],
            vocabulary: Vec::new(),
            phrases: Vec::new(),
            article: None,
            translation: None,
        }
    }

    fn new_article(audio: Option<Vec<u8>>) -> NewArticle {
        NewArticle { content: content(), audio, voice: None, topic: None, target_score: 650 }
    }

    #[tokio::test]
    async fn test_articles_are_always_new_inserts() {
        let store = LocalStore::in_memory();
        let now = 1_700_000_000_000;
        let first = save_article(&store, new_article(None), now).await.unwrap();
        let second = save_article(&store, new_article(None), now).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(store.history_count().await.unwrap(), 2);
        assert_eq!(first.title, "The quarterly budget meeting h...");
        assert_eq!(
            first.data.article.as_deref(),
            Some("The quarterly budget meeting has been moved to Friday. Please bring the invoices.")
        );
    }

    #[tokio::test]
    async fn test_empty_article_is_rejected() {
        let store = LocalStore::in_memory();
        let mut empty = new_article(None);
        empty.content.segments.clear();
        let err = save_article(&store, empty, 1).await.unwrap_err();
        assert!(matches!(err, TutorError::ContentFormat(_)));
        assert_eq!(store.history_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_audio_is_backfilled_and_persisted() {
        let store = LocalStore::in_memory();
        let provider = FakeProvider::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut record = save_article(&store, new_article(None), 5).await.unwrap();

        let bytes = ensure_article_audio(&store, &provider, &mut record, &mut rng).await.unwrap();
        assert_eq!(bytes, record.data.article_text().into_bytes());
        let stored = latest_article(&store).await.unwrap().unwrap();
        assert_eq!(stored.audio, record.audio);
        assert!(stored.audio.is_some());

        ensure_article_audio(&store, &provider, &mut record, &mut rng).await.unwrap();
        assert_eq!(provider.speech_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_existing_audio_is_decoded() {
        let store = LocalStore::in_memory();
        let provider = FakeProvider::default();
        let mut rng = StdRng::seed_from_u64(4);
        let mut record = save_article(&store, new_article(Some(vec![1, 2, 3])), 5).await.unwrap();

        let bytes = ensure_article_audio(&store, &provider, &mut record, &mut rng).await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(provider.speech_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
