use async_trait::async_trait;
use reqwest::{
    header::CONTENT_TYPE,
    Client,
};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::{
    config::AppConfig,
    core::{
        http::{
            authorized,
            ensure_success,
            http_client,
        },
        TutorError,
    },
};

/// Object store holding the backup file. Every call carries the bearer token;
/// a rejected token surfaces as [`TutorError::RemoteAuth`].
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn find_by_name(&self, token: &str, name: &str) -> Result<Option<String>, TutorError>;

    /// Creates the file when `handle` is `None`, otherwise overwrites it. Returns the handle.
    async fn put(
        &self,
        token: &str,
        handle: Option<&str>,
        name: &str,
        body: Vec<u8>,
    ) -> Result<String, TutorError>;

    async fn get(&self, token: &str, handle: &str) -> Result<Vec<u8>, TutorError>;
}

const BOUNDARY: &str = "-------DriveBackupBoundary";

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

/// Google Drive `appDataFolder` storage.
pub struct DriveTransport {
    client: Client,
    api_base: String,
    upload_base: String,
}

impl DriveTransport {
    pub fn new(client: Client, api_base: impl Into<String>, upload_base: impl Into<String>) -> Self {
        Self { client, api_base: api_base.into(), upload_base: upload_base.into() }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, TutorError> {
        Ok(Self::new(http_client()?, config.drive_api_base.clone(), config.drive_upload_base.clone()))
    }
}

/// `multipart/related` body: JSON metadata part followed by the file content.
pub fn multipart_related_body(name: &str, create: bool, content: &[u8]) -> Vec<u8> {
    let mut metadata = json!({ "name": name, "mimeType": "application/json" });
    if create {
        metadata["parents"] = json!(["appDataFolder"]);
    }

    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
         --{BOUNDARY}\r\nContent-Type: application/json\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--").as_bytes());
    body
}

#[async_trait]
impl RemoteTransport for DriveTransport {
    async fn find_by_name(&self, token: &str, name: &str) -> Result<Option<String>, TutorError> {
        let query = format!("name='{}'", name.replace('\'', "\\'"));
        let request = self.client.get(format!("{}/files", self.api_base)).query(&[
            ("spaces", "appDataFolder"),
            ("q", query.as_str()),
            ("fields", "files(id,modifiedTime)"),
            ("orderBy", "modifiedTime desc"),
            ("pageSize", "1"),
        ]);
        let resp = ensure_success(authorized(request, token).send().await?).await?;
        let list: DriveFileList = resp.json().await?;
        let found = list.files.into_iter().next().map(|f| f.id);
        debug!(name, found = found.is_some(), "looked up backup file");
        Ok(found)
    }

    async fn put(
        &self,
        token: &str,
        handle: Option<&str>,
        name: &str,
        body: Vec<u8>,
    ) -> Result<String, TutorError> {
        let payload = multipart_related_body(name, handle.is_none(), &body);
        let request = match handle {
            Some(id) => self.client.patch(format!("{}/files/{id}", self.upload_base)),
            None => self.client.post(format!("{}/files", self.upload_base)),
        }
        .query(&[("uploadType", "multipart")])
        .header(CONTENT_TYPE, format!("multipart/related; boundary={BOUNDARY}"))
        .body(payload);

        let resp = ensure_success(authorized(request, token).send().await?).await?;
        let file: DriveFile = resp.json().await?;
        Ok(file.id)
    }

    async fn get(&self, token: &str, handle: &str) -> Result<Vec<u8>, TutorError> {
        let request = self
            .client
            .get(format!("{}/files/{handle}", self.api_base))
            .query(&[("alt", "media")]);
        let resp = ensure_success(authorized(request, token).send().await?).await?;
        Ok(resp.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multipart_body_layout() {
        let body = String::from_utf8(multipart_related_body("b.json", true, b"{\"version\":1}")).unwrap();
        let parts: Vec<&str> = body.split(&format!("--{BOUNDARY}")).collect();
        assert_eq!(parts.len(), 4);
        assert!(parts[1].contains("\"parents\":[\"appDataFolder\"]"));
        assert!(parts[2].ends_with("\r\n\r\n{\"version\":1}\r\n"));
        assert_eq!(parts[3], "--");
    }

    #[test]
    fn test_endpoints_come_from_config() {
        let config = AppConfig { drive_api_base: "http://localhost:9/drive".to_string(), ..Default::default() };
        let transport = DriveTransport::from_config(&config).unwrap();
        assert_eq!(transport.api_base, "http://localhost:9/drive");
        assert_eq!(transport.upload_base, "https://www.googleapis.com/upload/drive/v3");
    }

    #[test]
    fn test_update_metadata_has_no_parents() {
        let body = String::from_utf8(multipart_related_body("b.json", false, b"{}")).unwrap();
        assert!(!body.contains("parents"));
        assert!(body.contains("\"name\":\"b.json\""));
    }
}
