use super::keys;

/// Published after every successful store mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Setting(String),
    History,
    WordCache,
    SavedWords,
}

impl StoreChange {
    pub fn triggers_sync(&self) -> bool {
        match self {
            StoreChange::Setting(key) => !keys::SYNC_BOOKKEEPING.contains(&key.as_str()),
            StoreChange::History | StoreChange::WordCache | StoreChange::SavedWords => true,
        }
    }
}
