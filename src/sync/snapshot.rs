use std::collections::BTreeMap;

use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;
use tracing::info;

use crate::{
    core::{
        deserialize_history_lenient,
        utils::now_ms,
        HistoryRecord,
        SavedWord,
        TutorError,
    },
    store::{
        keys,
        LocalStore,
    },
};

pub const SNAPSHOT_VERSION: u32 = 1;

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

/// Backup blob exchanged with the remote store and the export/import commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<BTreeMap<String, Value>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_history_lenient"
    )]
    pub history: Option<Vec<HistoryRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_words: Option<Vec<SavedWord>>,
}

impl Snapshot {
    /// Accepts either the snapshot object or a JSON string holding it.
    pub fn decode(value: Value) -> Result<Self, TutorError> {
        let value = match value {
            Value::String(text) => serde_json::from_str(&text)
                .map_err(|e| TutorError::ContentFormat(format!("backup is not valid JSON: {e}")))?,
            other => other,
        };
        if !value.is_object() {
            return Err(TutorError::ContentFormat("backup must be a JSON object".to_string()));
        }
        serde_json::from_value(value)
            .map_err(|e| TutorError::ContentFormat(format!("backup has unexpected shape: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TutorError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| TutorError::ContentFormat(format!("backup is not valid JSON: {e}")))?;
        Self::decode(value)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TutorError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn history_count(&self) -> usize {
        self.history.as_ref().map_or(0, Vec::len)
    }

    pub fn saved_word_count(&self) -> usize {
        self.saved_words.as_ref().map_or(0, Vec::len)
    }
}

/// Snapshot of the store: history without audio, saved words and the exported settings.
pub async fn export_store(store: &LocalStore) -> Result<Snapshot, TutorError> {
    let history: Vec<HistoryRecord> =
        store.get_history().await?.iter().map(HistoryRecord::without_audio).collect();
    let saved_words = store.get_saved_words().await?;

    let mut settings = BTreeMap::new();
    for key in keys::EXPORTED {
        if let Some(value) = store.get_setting(key).await? {
            settings.insert(key.to_string(), value);
        }
    }

    Ok(Snapshot {
        version: SNAPSHOT_VERSION,
        exported_at: Some(now_ms()),
        settings: (!settings.is_empty()).then_some(settings),
        history: Some(history),
        saved_words: Some(saved_words),
    })
}

/// Replaces history and saved words with the snapshot's (sections it lacks are
/// left alone) and restores only the exported setting keys. One atomic store write.
pub async fn apply_to_store(store: &LocalStore, snapshot: Snapshot) -> Result<(), TutorError> {
    let settings: Vec<(String, Value)> = snapshot
        .settings
        .unwrap_or_default()
        .into_iter()
        .filter(|(key, _)| keys::EXPORTED.contains(&key.as_str()))
        .collect();
    let history_count = snapshot.history.as_ref().map(Vec::len);
    let word_count = snapshot.saved_words.as_ref().map(Vec::len);

    store.replace_all(snapshot.history, snapshot.saved_words, settings).await?;
    info!(?history_count, ?word_count, "imported snapshot");
    Ok(())
}
