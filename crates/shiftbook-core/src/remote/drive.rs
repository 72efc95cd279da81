//! Drive-style REST backend (files with parents, a trash flag and server `modifiedTime`).

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use super::{RemoteObject, RemoteStore};
use crate::auth::CredentialProvider;
use crate::util::{compact_text, is_http_url};
use crate::{Error, Result};

const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const DEFAULT_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const DATABASE_MIME_TYPE: &str = "application/x-sqlite3";
const FILE_FIELDS: &str = "id,name,modifiedTime";

/// Drive-style REST client bound to one credential.
#[derive(Clone)]
pub struct DriveStore {
    api_base: String,
    upload_base: String,
    client: Client,
    credentials: Arc<dyn CredentialProvider>,
}

#[derive(Debug, Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    modified_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveErrorBody {
    error: Option<DriveErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct DriveErrorDetail {
    message: Option<String>,
}

impl DriveFile {
    fn into_remote_object(self) -> Result<RemoteObject> {
        let modified_at = self
            .modified_time
            .as_deref()
            .map(parse_modified_time)
            .transpose()?
            .unwrap_or(0);
        Ok(RemoteObject {
            id: self.id,
            name: self.name,
            modified_at,
        })
    }
}

impl DriveStore {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        Self::with_base_urls(credentials, DEFAULT_API_BASE, DEFAULT_UPLOAD_BASE)
    }

    /// Point the client at a different API host, e.g. a proxy.
    pub fn with_base_urls(
        credentials: Arc<dyn CredentialProvider>,
        api_base: &str,
        upload_base: &str,
    ) -> Result<Self> {
        let api_base = normalize_base_url(api_base, "api_base")?;
        let upload_base = normalize_base_url(upload_base, "upload_base")?;
        Ok(Self {
            api_base,
            upload_base,
            client: Client::builder().build()?,
            credentials,
        })
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.credentials.bearer_token().await?;
        Ok(request.bearer_auth(token))
    }

    async fn query_files(&self, query: &str) -> Result<Vec<DriveFile>> {
        let url = format!(
            "{}/files?q={}&fields=files({FILE_FIELDS})&spaces=drive&pageSize=100",
            self.api_base,
            urlencoding::encode(query)
        );
        let response = self.authorized(self.client.get(url)).await?.send().await?;
        let list: DriveFileList = expect_success(response, "list").await?.json().await?;
        Ok(list.files)
    }

    fn file_url(&self, id: &str) -> String {
        format!("{}/files/{}", self.api_base, urlencoding::encode(id))
    }

    fn media_upload_url(&self, id: &str) -> String {
        format!(
            "{}/files/{}?uploadType=media&fields={FILE_FIELDS}",
            self.upload_base,
            urlencoding::encode(id)
        )
    }

    fn multipart_upload_url(&self) -> String {
        format!(
            "{}/files?uploadType=multipart&fields={FILE_FIELDS}",
            self.upload_base
        )
    }

    async fn fetch_content(&self, url: String) -> Result<Response> {
        let request = self
            .client
            .get(url)
            .header(reqwest::header::CACHE_CONTROL, "no-cache");
        Ok(self.authorized(request).await?.send().await?)
    }
}

#[async_trait]
impl RemoteStore for DriveStore {
    fn label(&self) -> &'static str {
        "drive"
    }

    async fn find_folder(&self, name: &str) -> Result<Option<String>> {
        let query = format!(
            "name = '{}' and mimeType = '{FOLDER_MIME_TYPE}' and trashed = false",
            escape_query_value(name)
        );
        let folders = self.query_files(&query).await?;
        let (newest, _) = super::select_newest(
            folders
                .into_iter()
                .map(DriveFile::into_remote_object)
                .collect::<Result<Vec<_>>>()?,
        );
        Ok(newest.map(|folder| folder.id))
    }

    async fn create_folder(&self, name: &str) -> Result<String> {
        let url = format!("{}/files?fields=id", self.api_base);
        let body = serde_json::json!({ "name": name, "mimeType": FOLDER_MIME_TYPE });
        let response = self
            .authorized(self.client.post(url).json(&body))
            .await?
            .send()
            .await?;
        let created: DriveFile = expect_success(response, "create folder").await?.json().await?;
        Ok(created.id)
    }

    async fn list_objects(&self, folder_id: &str, name: &str) -> Result<Vec<RemoteObject>> {
        let query = format!(
            "name = '{}' and '{}' in parents and trashed = false",
            escape_query_value(name),
            escape_query_value(folder_id)
        );
        self.query_files(&query)
            .await?
            .into_iter()
            .map(DriveFile::into_remote_object)
            .collect()
    }

    async fn create_object(
        &self,
        folder_id: &str,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<RemoteObject> {
        let metadata = serde_json::json!({
            "name": name,
            "parents": [folder_id],
            "mimeType": DATABASE_MIME_TYPE,
        });
        let boundary = format!("shiftbook-{}", cache_buster());
        let request = self
            .client
            .post(self.multipart_upload_url())
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(multipart_related_body(&boundary, &metadata, &bytes));
        let response = self.authorized(request).await?.send().await?;
        let created: DriveFile = expect_success(response, "create").await?.json().await?;
        created.into_remote_object()
    }

    async fn update_object(&self, object: &RemoteObject, bytes: Vec<u8>) -> Result<RemoteObject> {
        let request = self
            .client
            .patch(self.media_upload_url(&object.id))
            .header(reqwest::header::CONTENT_TYPE, DATABASE_MIME_TYPE)
            .body(bytes);
        let response = self.authorized(request).await?.send().await?;
        let updated: DriveFile = expect_success(response, "upload").await?.json().await?;
        updated.into_remote_object()
    }

    async fn download(&self, object: &RemoteObject) -> Result<Vec<u8>> {
        let busted = format!(
            "{}?alt=media&cb={}",
            self.file_url(&object.id),
            cache_buster()
        );
        let response = self.fetch_content(busted).await?;
        if response.status() == StatusCode::OK {
            return Ok(response.bytes().await?.to_vec());
        }

        tracing::warn!(
            "Cache-busted download of {} returned HTTP {}, falling back to plain content fetch",
            object.id,
            response.status().as_u16()
        );
        let plain = format!("{}?alt=media", self.file_url(&object.id));
        let response = self.fetch_content(plain).await?;
        let response = expect_success(response, "download").await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn trash(&self, object: &RemoteObject) -> Result<()> {
        let body = serde_json::json!({ "trashed": true });
        let response = self
            .authorized(self.client.patch(self.file_url(&object.id)).json(&body))
            .await?
            .send()
            .await?;
        expect_success(response, "trash").await?;
        Ok(())
    }
}

async fn expect_success(response: Response, operation: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(Error::Storage(format!(
        "Drive {operation} failed: {}",
        parse_api_error(status, &body)
    )))
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<DriveErrorBody>(body) {
        if let Some(message) = payload.error.and_then(|detail| detail.message) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn parse_modified_time(raw: &str) -> Result<i64> {
    chrono::DateTime::parse_from_rfc3339(raw.trim())
        .map(|time| time.timestamp())
        .map_err(|error| Error::Storage(format!("Invalid modifiedTime '{raw}': {error}")))
}

fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn normalize_base_url(raw: &str, field: &str) -> Result<String> {
    let value = raw.trim();
    if is_http_url(value) {
        Ok(value.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(format!(
            "Drive {field} must include http:// or https://"
        )))
    }
}

/// Metadata and content in one `multipart/related` body, so the object is
/// created with its bytes or not at all.
fn multipart_related_body(boundary: &str, metadata: &serde_json::Value, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: {DATABASE_MIME_TYPE}\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

fn cache_buster() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;

    fn store() -> DriveStore {
        DriveStore::with_base_urls(
            Arc::new(StaticToken::new("token").unwrap()),
            "https://drive.example.com/v3/",
            "https://drive.example.com/upload/v3",
        )
        .unwrap()
    }

    #[test]
    fn parses_rfc3339_modified_time() {
        assert_eq!(parse_modified_time("2024-03-01T10:15:00.123Z").unwrap(), 1_709_288_100);
        assert!(parse_modified_time("yesterday").is_err());
    }

    #[test]
    fn file_without_modified_time_reads_as_zero() {
        let file = DriveFile {
            id: "f1".to_string(),
            name: "shiftbook.db".to_string(),
            modified_time: None,
        };
        assert_eq!(file.into_remote_object().unwrap().modified_at, 0);
    }

    #[test]
    fn escapes_quotes_in_query_values() {
        assert_eq!(escape_query_value("O'Neil's db"), "O\\'Neil\\'s db");
        assert_eq!(escape_query_value("a\\b"), "a\\\\b");
    }

    #[test]
    fn rejects_base_url_without_scheme() {
        let result = DriveStore::with_base_urls(
            Arc::new(StaticToken::new("token").unwrap()),
            "drive.example.com",
            "https://drive.example.com/upload",
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn urls_are_built_from_trimmed_bases() {
        let store = store();
        assert_eq!(store.file_url("abc"), "https://drive.example.com/v3/files/abc");
        assert_eq!(
            store.media_upload_url("abc"),
            "https://drive.example.com/upload/v3/files/abc?uploadType=media&fields=id,name,modifiedTime"
        );
    }

    #[test]
    fn create_goes_through_a_single_multipart_upload() {
        assert_eq!(
            store().multipart_upload_url(),
            "https://drive.example.com/upload/v3/files?uploadType=multipart&fields=id,name,modifiedTime"
        );
    }

    #[test]
    fn multipart_body_carries_metadata_then_content() {
        let metadata = serde_json::json!({ "name": "shiftbook.db", "parents": ["f1"] });
        let body = multipart_related_body("b0", &metadata, b"SQLite format 3\0rest");

        let expected = [
            "--b0\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n",
            metadata.to_string().as_str(),
            "\r\n--b0\r\nContent-Type: application/x-sqlite3\r\n\r\n",
            "SQLite format 3\0rest",
            "\r\n--b0--\r\n",
        ]
        .concat();
        assert_eq!(body, expected.into_bytes());
    }

    #[test]
    fn parse_api_error_prefers_structured_message() {
        let body = r#"{"error":{"code":404,"message":"File not found: abc"}}"#;
        assert_eq!(
            parse_api_error(StatusCode::NOT_FOUND, body),
            "File not found: abc (404)"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
    }

    #[test]
    fn drive_file_list_tolerates_missing_files_key() {
        let list: DriveFileList = serde_json::from_str("{}").unwrap();
        assert!(list.files.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore = "Requires SHIFTBOOK_DRIVE_TOKEN plus network access"]
    async fn drive_folder_roundtrip() {
        let _ = dotenvy::dotenv();
        let token = StaticToken::from_env("SHIFTBOOK_DRIVE_TOKEN").expect("token should be set");
        let store = DriveStore::new(Arc::new(token)).unwrap();

        let folder = store.ensure_folder("ShiftbookSyncIntegration").await.unwrap();
        let again = store.ensure_folder("ShiftbookSyncIntegration").await.unwrap();
        assert_eq!(folder, again);
    }
}
