use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};

use serde::{
    de::DeserializeOwned,
    Serialize,
};
use tracing::{
    debug,
    warn,
};

use crate::core::TutorError;

const APP_NAME: &str = "toeic-tutor";

pub fn get_app_data_dir() -> PathBuf {
    if let Some(data_dir) = dirs::data_local_dir() {
        let app_dir = data_dir.join(APP_NAME);
        let _ = fs::create_dir_all(&app_dir);
        app_dir
    } else {
        PathBuf::from(".")
    }
}

pub fn get_data_file_path(filename: &str) -> PathBuf {
    get_app_data_dir().join(filename)
}

pub fn save_json<T: Serialize>(data: &T, path: &Path) -> Result<(), TutorError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(data)?;
    fs::write(path, json)?;
    debug!(path = %path.display(), "data saved");
    Ok(())
}

pub fn load_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, TutorError> {
    if !path.exists() {
        return Ok(T::default());
    }

    let json = fs::read_to_string(path)?;
    let data: T = serde_json::from_str(&json)?;
    debug!(path = %path.display(), "data loaded");
    Ok(data)
}

pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match load_json::<T>(path) {
        Ok(data) => data,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load, using defaults");
            T::default()
        }
    }
}

/// Async counterpart of [`load_json`] used by the local store.
pub async fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, TutorError> {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => Ok(serde_json::from_str(&json)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Writes to a sibling temp file and renames it over `path`, so readers see
/// either the old or the new contents.
pub async fn write_json_atomic<T: Serialize>(data: &T, path: &Path) -> Result<(), TutorError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec(data)?;
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[tokio::test]
    async fn test_atomic_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut data = BTreeMap::new();
        data.insert("target_score".to_string(), 800);
        write_json_atomic(&data, &path).await.unwrap();

        let loaded: BTreeMap<String, i32> = read_json(&path).await.unwrap();
        assert_eq!(loaded, data);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_file_reads_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Vec<String> = read_json(&dir.path().join("absent.json")).await.unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        let loaded: BTreeMap<String, String> = load_json_or_default(&path);
        assert!(loaded.is_empty());
    }
}
