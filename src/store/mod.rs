//! Local store: history, word cache, settings and saved words.
//!
//! Each collection lives in memory behind its own lock and, for on-disk stores,
//! in one JSON file under the store directory. A mutation is applied in memory,
//! the collection file is atomically replaced, and the in-memory change is
//! undone if the write fails. Successful mutations are published as
//! [`StoreChange`] events.

use std::{
    collections::BTreeMap,
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
};

use serde::{
    de::DeserializeOwned,
    Serialize,
};
use serde_json::Value;
use tokio::sync::{
    broadcast,
    Mutex,
    OnceCell,
};
use tracing::{
    debug,
    error,
    warn,
};

use crate::{
    core::{
        utils::{
            now_ms,
            sort_history,
        },
        parse_history,
        word_key,
        HistoryRecord,
        RecordId,
        SavedWord,
        TutorError,
        WordCard,
    },
    persistence::{
        read_json,
        write_json_atomic,
    },
};

pub mod changes;
pub mod keys;

pub use changes::StoreChange;

const HISTORY_FILE: &str = "history.json";
const WORD_CACHE_FILE: &str = "word_cache.json";
const SETTINGS_FILE: &str = "settings.json";
const SAVED_WORDS_FILE: &str = "saved_words.json";

const CHANGE_CHANNEL_CAPACITY: usize = 256;

struct Collections {
    history: Mutex<BTreeMap<RecordId, HistoryRecord>>,
    word_cache: Mutex<BTreeMap<String, WordCard>>,
    settings: Mutex<BTreeMap<String, Value>>,
    saved_words: Mutex<BTreeMap<String, SavedWord>>,
}

/// Reverts one in-memory edit when the file write behind it fails.
enum Undo<K, V> {
    Restore(K, Option<V>),
    Replace(BTreeMap<K, V>),
}

impl<K: Ord, V> Undo<K, V> {
    fn apply(self, map: &mut BTreeMap<K, V>) {
        match self {
            Undo::Restore(key, Some(previous)) => {
                map.insert(key, previous);
            }
            Undo::Restore(key, None) => {
                map.remove(&key);
            }
            Undo::Replace(previous) => *map = previous,
        }
    }
}

struct StoreInner {
    root: Option<PathBuf>,
    collections: OnceCell<Collections>,
    changes: broadcast::Sender<StoreChange>,
}

#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<StoreInner>,
}

impl LocalStore {
    /// Store backed by JSON files in `dir`. Nothing is read until the first operation.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self::with_root(Some(dir.into()))
    }

    pub fn in_memory() -> Self {
        Self::with_root(None)
    }

    fn with_root(root: Option<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { inner: Arc::new(StoreInner { root, collections: OnceCell::new(), changes }) }
    }

    pub fn root(&self) -> Option<&Path> {
        self.inner.root.as_deref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.changes.subscribe()
    }

    /// Opens the store if needed. Idempotent; every operation calls it.
    pub async fn init(&self) -> Result<(), TutorError> {
        self.collections().await.map(|_| ())
    }

    async fn collections(&self) -> Result<&Collections, TutorError> {
        self.inner.collections.get_or_try_init(|| Self::load(self.inner.root.clone())).await
    }

    async fn load(root: Option<PathBuf>) -> Result<Collections, TutorError> {
        let Some(root) = root else {
            return Ok(Collections {
                history: Mutex::new(BTreeMap::new()),
                word_cache: Mutex::new(BTreeMap::new()),
                settings: Mutex::new(BTreeMap::new()),
                saved_words: Mutex::new(BTreeMap::new()),
            });
        };

        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| TutorError::Storage(format!("cannot create {}: {e}", root.display())))?;

        let history = parse_history(load_file::<Vec<Value>>(&root, HISTORY_FILE).await?);
        let word_cache: BTreeMap<String, WordCard> = load_file(&root, WORD_CACHE_FILE).await?;
        let settings: BTreeMap<String, Value> = load_file(&root, SETTINGS_FILE).await?;
        let saved_words: Vec<SavedWord> = load_file(&root, SAVED_WORDS_FILE).await?;

        debug!(
            root = %root.display(),
            history = history.len(),
            saved_words = saved_words.len(),
            "local store opened"
        );

        Ok(Collections {
            history: Mutex::new(history.into_iter().map(|r| (r.id().clone(), r)).collect()),
            word_cache: Mutex::new(word_cache),
            settings: Mutex::new(settings),
            saved_words: Mutex::new(saved_words.into_iter().map(|w| (w.id.clone(), w)).collect()),
        })
    }

    fn notify(&self, change: StoreChange) {
        // No subscribers is fine.
        let _ = self.inner.changes.send(change);
    }

    async fn persist_history(&self, map: &BTreeMap<RecordId, HistoryRecord>) -> Result<(), TutorError> {
        let list: Vec<&HistoryRecord> = map.values().collect();
        self.persist(HISTORY_FILE, &list).await
    }

    async fn persist_saved_words(&self, map: &BTreeMap<String, SavedWord>) -> Result<(), TutorError> {
        let list: Vec<&SavedWord> = map.values().collect();
        self.persist(SAVED_WORDS_FILE, &list).await
    }

    async fn persist<T: Serialize>(&self, file: &str, data: &T) -> Result<(), TutorError> {
        let Some(root) = &self.inner.root else {
            return Ok(());
        };
        write_json_atomic(data, &root.join(file))
            .await
            .map_err(|e| TutorError::Storage(format!("failed to write {file}: {e}")))
    }

    // Settings

    pub async fn get_setting(&self, key: &str) -> Result<Option<Value>, TutorError> {
        let settings = self.collections().await?.settings.lock().await;
        Ok(settings.get(key).filter(|v| !v.is_null()).cloned())
    }

    /// Typed read. A value of the wrong shape reads as absent.
    pub async fn get_setting_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, TutorError> {
        let Some(value) = self.get_setting(key).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(typed) => Ok(Some(typed)),
            Err(e) => {
                warn!(key, error = %e, "setting has unexpected shape");
                Ok(None)
            }
        }
    }

    /// Writes a setting. `None`/`()` values are stored as JSON null, which reads back as absent.
    pub async fn set_setting<T: Serialize>(&self, key: &str, value: T) -> Result<(), TutorError> {
        let value = serde_json::to_value(value)?;
        let collections = self.collections().await?;
        let mut settings = collections.settings.lock().await;
        let undo = Undo::Restore(key.to_string(), settings.insert(key.to_string(), value));
        if let Err(e) = self.persist(SETTINGS_FILE, &*settings).await {
            undo.apply(&mut settings);
            return Err(e);
        }
        drop(settings);
        self.notify(StoreChange::Setting(key.to_string()));
        Ok(())
    }

    // History

    /// Inserts or replaces the record with the same id.
    pub async fn add_history(&self, record: HistoryRecord) -> Result<(), TutorError> {
        let collections = self.collections().await?;
        let mut history = collections.history.lock().await;
        let id = record.id().clone();
        let undo = Undo::Restore(id.clone(), history.insert(id, record));
        if let Err(e) = self.persist_history(&history).await {
            undo.apply(&mut history);
            return Err(e);
        }
        drop(history);
        self.notify(StoreChange::History);
        Ok(())
    }

    /// All records, newest first.
    pub async fn get_history(&self) -> Result<Vec<HistoryRecord>, TutorError> {
        let history = self.collections().await?.history.lock().await;
        let mut records: Vec<HistoryRecord> = history.values().cloned().collect();
        drop(history);
        sort_history(&mut records);
        Ok(records)
    }

    pub async fn get_latest_history(&self) -> Result<Option<HistoryRecord>, TutorError> {
        Ok(self.get_history().await?.into_iter().next())
    }

    pub async fn get_history_record(&self, id: &RecordId) -> Result<Option<HistoryRecord>, TutorError> {
        let history = self.collections().await?.history.lock().await;
        Ok(history.get(id).cloned())
    }

    pub async fn history_count(&self) -> Result<usize, TutorError> {
        Ok(self.collections().await?.history.lock().await.len())
    }

    pub async fn delete_history(&self, id: &RecordId) -> Result<(), TutorError> {
        let collections = self.collections().await?;
        let mut history = collections.history.lock().await;
        let undo = Undo::Restore(id.clone(), history.remove(id));
        if let Err(e) = self.persist_history(&history).await {
            undo.apply(&mut history);
            return Err(e);
        }
        drop(history);
        self.notify(StoreChange::History);
        Ok(())
    }

    pub async fn clear_history(&self) -> Result<(), TutorError> {
        self.replace_history(Vec::new()).await
    }

    /// Clears history and inserts `records` as one write.
    pub async fn replace_history(&self, records: Vec<HistoryRecord>) -> Result<(), TutorError> {
        let collections = self.collections().await?;
        let mut history = collections.history.lock().await;
        let next = records.into_iter().map(|r| (r.id().clone(), r)).collect();
        let undo = Undo::Replace(std::mem::replace(&mut *history, next));
        if let Err(e) = self.persist_history(&history).await {
            undo.apply(&mut history);
            return Err(e);
        }
        drop(history);
        self.notify(StoreChange::History);
        Ok(())
    }

    // Word cache

    pub async fn get_word(&self, word: &str) -> Result<Option<WordCard>, TutorError> {
        let cache = self.collections().await?.word_cache.lock().await;
        Ok(cache.get(&word_key(word)).cloned())
    }

    pub async fn set_word(&self, word: &str, card: &WordCard) -> Result<(), TutorError> {
        let collections = self.collections().await?;
        let mut cache = collections.word_cache.lock().await;
        let key = word_key(word);
        let undo = Undo::Restore(key.clone(), cache.insert(key, card.clone()));
        if let Err(e) = self.persist(WORD_CACHE_FILE, &*cache).await {
            undo.apply(&mut cache);
            return Err(e);
        }
        drop(cache);
        self.notify(StoreChange::WordCache);
        Ok(())
    }

    // Saved words

    pub async fn add_saved_word(&self, word: SavedWord) -> Result<(), TutorError> {
        let collections = self.collections().await?;
        let mut saved = collections.saved_words.lock().await;
        let id = word.id.clone();
        let undo = Undo::Restore(id.clone(), saved.insert(id, word));
        if let Err(e) = self.persist_saved_words(&saved).await {
            undo.apply(&mut saved);
            return Err(e);
        }
        drop(saved);
        self.notify(StoreChange::SavedWords);
        Ok(())
    }

    pub async fn get_saved_word(&self, id: &str) -> Result<Option<SavedWord>, TutorError> {
        let saved = self.collections().await?.saved_words.lock().await;
        Ok(saved.get(id).cloned())
    }

    /// Read path for "is this saved" checks; a store failure reads as not saved.
    pub async fn is_saved(&self, word: &str) -> bool {
        match self.get_saved_word(&word_key(word)).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                warn!(word, error = %e, "saved-word lookup failed");
                false
            }
        }
    }

    pub async fn get_saved_words(&self) -> Result<Vec<SavedWord>, TutorError> {
        let saved = self.collections().await?.saved_words.lock().await;
        Ok(saved.values().cloned().collect())
    }

    pub async fn saved_word_count(&self) -> Result<usize, TutorError> {
        Ok(self.collections().await?.saved_words.lock().await.len())
    }

    pub async fn get_words_for_review(&self) -> Result<Vec<SavedWord>, TutorError> {
        self.get_words_due_at(now_ms()).await
    }

    pub async fn get_words_due_at(&self, now_ms: i64) -> Result<Vec<SavedWord>, TutorError> {
        let saved = self.collections().await?.saved_words.lock().await;
        Ok(saved.values().filter(|w| w.is_due(now_ms)).cloned().collect())
    }

    /// Updates scheduling fields. Returns `false` without writing if the word is gone.
    pub async fn update_word_srs(
        &self,
        id: &str,
        level: u32,
        next_review: i64,
    ) -> Result<bool, TutorError> {
        let collections = self.collections().await?;
        let mut saved = collections.saved_words.lock().await;
        let Some(existing) = saved.get(id) else {
            debug!(id, "word removed before SRS update, skipping");
            return Ok(false);
        };

        let mut updated = existing.clone();
        updated.level = level;
        updated.next_review = next_review;
        let undo = Undo::Restore(id.to_string(), saved.insert(id.to_string(), updated));
        if let Err(e) = self.persist_saved_words(&saved).await {
            undo.apply(&mut saved);
            return Err(e);
        }
        drop(saved);
        self.notify(StoreChange::SavedWords);
        Ok(true)
    }

    pub async fn delete_saved_word(&self, id: &str) -> Result<(), TutorError> {
        let collections = self.collections().await?;
        let mut saved = collections.saved_words.lock().await;
        let undo = Undo::Restore(id.to_string(), saved.remove(id));
        if let Err(e) = self.persist_saved_words(&saved).await {
            undo.apply(&mut saved);
            return Err(e);
        }
        drop(saved);
        self.notify(StoreChange::SavedWords);
        Ok(())
    }

    pub async fn replace_saved_words(&self, words: Vec<SavedWord>) -> Result<(), TutorError> {
        let collections = self.collections().await?;
        let mut saved = collections.saved_words.lock().await;
        let next = words.into_iter().map(|w| (w.id.clone(), w)).collect();
        let undo = Undo::Replace(std::mem::replace(&mut *saved, next));
        if let Err(e) = self.persist_saved_words(&saved).await {
            undo.apply(&mut saved);
            return Err(e);
        }
        drop(saved);
        self.notify(StoreChange::SavedWords);
        Ok(())
    }

    /// Replaces history, saved words and the given settings together. If any file
    /// write fails, every collection is put back as it was.
    pub async fn replace_all(
        &self,
        history: Option<Vec<HistoryRecord>>,
        saved_words: Option<Vec<SavedWord>>,
        settings: Vec<(String, Value)>,
    ) -> Result<(), TutorError> {
        let collections = self.collections().await?;
        let mut history_map = collections.history.lock().await;
        let mut saved_map = collections.saved_words.lock().await;
        let mut settings_map = collections.settings.lock().await;

        let history_undo = history.map(|records| {
            let next = records.into_iter().map(|r| (r.id().clone(), r)).collect();
            Undo::Replace(std::mem::replace(&mut *history_map, next))
        });
        let saved_undo = saved_words.map(|words| {
            let next = words.into_iter().map(|w| (w.id.clone(), w)).collect();
            Undo::Replace(std::mem::replace(&mut *saved_map, next))
        });
        let settings_undo = (!settings.is_empty()).then(|| {
            let previous = settings_map.clone();
            for (key, value) in &settings {
                settings_map.insert(key.clone(), value.clone());
            }
            Undo::Replace(previous)
        });

        let mut result = Ok(());
        if history_undo.is_some() {
            result = self.persist_history(&history_map).await;
        }
        if result.is_ok() && saved_undo.is_some() {
            result = self.persist_saved_words(&saved_map).await;
        }
        if result.is_ok() && settings_undo.is_some() {
            result = self.persist(SETTINGS_FILE, &*settings_map).await;
        }

        if let Err(e) = result {
            let restore_history = history_undo.is_some();
            let restore_saved = saved_undo.is_some();
            let restore_settings = settings_undo.is_some();
            if let Some(undo) = history_undo {
                undo.apply(&mut history_map);
            }
            if let Some(undo) = saved_undo {
                undo.apply(&mut saved_map);
            }
            if let Some(undo) = settings_undo {
                undo.apply(&mut settings_map);
            }
            // Put the previous files back so disk matches memory again.
            let rollback = async {
                if restore_history {
                    self.persist_history(&history_map).await?;
                }
                if restore_saved {
                    self.persist_saved_words(&saved_map).await?;
                }
                if restore_settings {
                    self.persist(SETTINGS_FILE, &*settings_map).await?;
                }
                Ok::<(), TutorError>(())
            };
            if let Err(rollback_error) = rollback.await {
                error!(error = %rollback_error, "failed to roll back store files after import error");
            }
            return Err(e);
        }

        drop(settings_map);
        drop(saved_map);
        drop(history_map);
        self.notify(StoreChange::History);
        self.notify(StoreChange::SavedWords);
        for (key, _) in settings {
            self.notify(StoreChange::Setting(key));
        }
        Ok(())
    }
}

async fn load_file<T: DeserializeOwned + Default>(root: &Path, file: &str) -> Result<T, TutorError> {
    read_json(&root.join(file))
        .await
        .map_err(|e| TutorError::Storage(format!("failed to open {file}: {e}")))
}
