use async_trait::async_trait;

use super::snapshot::Snapshot;

/// Local and remote record counts disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConflict {
    pub local_history: usize,
    pub local_words: usize,
    pub remote_history: usize,
    pub remote_words: usize,
    pub remote_exported_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    KeepRemote,
    KeepLocal,
    Skip,
}

/// Asks the user how to resolve a [`SyncConflict`]. Never answered automatically.
#[async_trait]
pub trait ConflictPrompt: Send + Sync {
    async fn choose(&self, conflict: &SyncConflict) -> ConflictChoice;
}

/// Compares only the record counts. Equal counts with different content are
/// treated as in sync.
pub fn detect_conflict(
    local_history: usize,
    local_words: usize,
    remote: &Snapshot,
    remote_exported_at: i64,
) -> Option<SyncConflict> {
    let remote_history = remote.history_count();
    let remote_words = remote.saved_word_count();
    if local_history == remote_history && local_words == remote_words {
        return None;
    }
    Some(SyncConflict { local_history, local_words, remote_history, remote_words, remote_exported_at })
}
