//! Word lookup, saving and the vocabulary notebook views.

use tracing::{
    debug,
    info,
};

use crate::{
    core::{
        word_key,
        SavedWord,
        StudyContent,
        TutorError,
        WordCard,
    },
    provider::ContentProvider,
    srs::{
        next_review_time,
        MAX_LEVEL,
        MAX_SESSION_WORDS,
        MIN_REVIEW_WORDS,
    },
    store::LocalStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    Article,
    Cache,
    Saved,
    Generated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WordLookup {
    pub card: WordCard,
    pub source: LookupSource,
    pub saved: bool,
}

fn checked_word(word: &str) -> Result<&str, TutorError> {
    let word = word.trim();
    if word.is_empty() {
        return Err(TutorError::ContentFormat("cannot look up an empty word".to_string()));
    }
    Ok(word)
}

fn card_from_saved(saved: &SavedWord) -> WordCard {
    WordCard {
        word: saved.headword.clone(),
        pos: saved.part_of_speech.clone(),
        ipa: saved.ipa.clone(),
        def: saved.translation.clone(),
        ex: saved.example.clone(),
        ex_zh: saved.example_translation.clone(),
    }
}

/// Finds a word without calling the content provider: the current article's
/// vocabulary first (copied into the word cache), then the cache, then the
/// notebook. `Ok(None)` means only [`generate_word`] can help.
pub async fn lookup_word(
    store: &LocalStore,
    word: &str,
    current: Option<&StudyContent>,
) -> Result<Option<WordLookup>, TutorError> {
    let word = checked_word(word)?;

    let found = if let Some(card) = current.and_then(|c| c.find_vocabulary(word)) {
        store.set_word(word, card).await?;
        Some((card.clone(), LookupSource::Article))
    } else if let Some(card) = store.get_word(word).await? {
        Some((card, LookupSource::Cache))
    } else {
        store
            .get_saved_word(&word_key(word))
            .await?
            .map(|saved| (card_from_saved(&saved), LookupSource::Saved))
    };

    let Some((card, source)) = found else {
        debug!(word, "no local details for word");
        return Ok(None);
    };
    backfill_example(store, word, &card).await?;
    let saved = store.is_saved(word).await;
    Ok(Some(WordLookup { card, source, saved }))
}

/// Asks the provider for a word card and caches it.
pub async fn generate_word(
    store: &LocalStore,
    provider: &dyn ContentProvider,
    word: &str,
) -> Result<WordLookup, TutorError> {
    let word = checked_word(word)?;
    if let Some(card) = store.get_word(word).await? {
        let saved = store.is_saved(word).await;
        return Ok(WordLookup { card, source: LookupSource::Cache, saved });
    }

    let card = provider.generate_word_card(word).await?;
    if card.def.trim().is_empty() {
        return Err(TutorError::ContentFormat(format!("word card for '{word}' has no definition")));
    }
    store.set_word(word, &card).await?;
    backfill_example(store, word, &card).await?;
    let saved = store.is_saved(word).await;
    Ok(WordLookup { card, source: LookupSource::Generated, saved })
}

/// Copies the card's example into a saved word that has none. Returns whether it wrote.
pub async fn backfill_example(
    store: &LocalStore,
    word: &str,
    card: &WordCard,
) -> Result<bool, TutorError> {
    if card.ex.is_empty() {
        return Ok(false);
    }
    let Some(mut saved) = store.get_saved_word(&word_key(word)).await? else {
        return Ok(false);
    };
    if !saved.example.is_empty() {
        return Ok(false);
    }
    saved.example = card.ex.clone();
    saved.example_translation = card.ex_zh.clone();
    store.add_saved_word(saved).await?;
    Ok(true)
}

/// Saves the word at level 0, due today, or removes it if already saved.
/// Returns the new saved state.
pub async fn toggle_saved_word(
    store: &LocalStore,
    word: &str,
    card: &WordCard,
    now_ms: i64,
) -> Result<bool, TutorError> {
    let word = checked_word(word)?;
    let id = word_key(word);
    if store.get_saved_word(&id).await?.is_some() {
        store.delete_saved_word(&id).await?;
        info!(word, "removed from notebook");
        return Ok(false);
    }
    let saved = SavedWord::from_card(card, word, now_ms, next_review_time(0, now_ms));
    store.add_saved_word(saved).await?;
    info!(word, "saved to notebook");
    Ok(true)
}

/// Whether a review can start, and why not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewEntry {
    NotEnoughWords { min: usize, current: usize },
    NotEnoughDue { min: usize, current: usize, next_due: Option<i64> },
    Ready { due_count: usize, review_count: usize },
}

pub fn review_entry(words: &[SavedWord], now_ms: i64) -> ReviewEntry {
    if words.len() < MIN_REVIEW_WORDS {
        return ReviewEntry::NotEnoughWords { min: MIN_REVIEW_WORDS, current: words.len() };
    }
    let due_count = words.iter().filter(|w| w.is_due(now_ms)).count();
    if due_count < MIN_REVIEW_WORDS {
        let next_due = words.iter().filter(|w| !w.is_due(now_ms)).map(|w| w.next_review).min();
        return ReviewEntry::NotEnoughDue { min: MIN_REVIEW_WORDS, current: due_count, next_due };
    }
    ReviewEntry::Ready { due_count, review_count: due_count.min(MAX_SESSION_WORDS) }
}

pub fn mastered_words(words: &[SavedWord]) -> Vec<&SavedWord> {
    words.iter().filter(|w| w.level >= MAX_LEVEL).collect()
}

/// Deletes every word at the top level in one write. Returns how many were removed.
pub async fn clear_mastered(store: &LocalStore) -> Result<usize, TutorError> {
    let words = store.get_saved_words().await?;
    let (mastered, kept): (Vec<SavedWord>, Vec<SavedWord>) =
        words.into_iter().partition(|w| w.level >= MAX_LEVEL);
    if mastered.is_empty() {
        return Ok(0);
    }
    store.replace_saved_words(kept).await?;
    info!(count = mastered.len(), "cleared mastered words");
    Ok(mastered.len())
}

/// Notebook order: weakest first, then soonest due.
pub fn sorted_for_display(words: &mut [SavedWord]) {
    words.sort_by(|a, b| a.level.cmp(&b.level).then(a.next_review.cmp(&b.next_review)));
}
