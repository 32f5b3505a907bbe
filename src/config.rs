use std::{
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    core::TutorError,
    persistence::{
        get_app_data_dir,
        get_data_file_path,
        load_json_or_default,
        save_json,
    },
};

pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Overrides the per-user data directory holding the store files.
    pub data_dir: Option<PathBuf>,
    pub backup_filename: String,
    pub sync_debounce_ms: u64,
    pub max_session_words: usize,
    pub tts_retry_attempts: u32,
    pub tts_retry_delay_ms: u64,
    pub drive_api_base: String,
    pub drive_upload_base: String,
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            backup_filename: "toeic-tutor-backup.json".to_string(),
            sync_debounce_ms: 3000,
            max_session_words: 10,
            tts_retry_attempts: 2,
            tts_retry_delay_ms: 400,
            drive_api_base: "https://www.googleapis.com/drive/v3".to_string(),
            drive_upload_base: "https://www.googleapis.com/upload/drive/v3".to_string(),
            log_filter: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn path() -> PathBuf {
        get_data_file_path(CONFIG_FILE)
    }

    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Missing or unreadable files yield the defaults.
    pub fn load_from(path: &Path) -> Self {
        load_json_or_default(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), TutorError> {
        save_json(self, path)
    }

    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| get_app_data_dir().join("store"))
    }

    pub fn sync_debounce(&self) -> Duration {
        Duration::from_millis(self.sync_debounce_ms)
    }

    pub fn tts_retry_delay(&self) -> Duration {
        Duration::from_millis(self.tts_retry_delay_ms)
    }
}
