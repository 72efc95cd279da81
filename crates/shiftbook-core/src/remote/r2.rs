//! Cloudflare R2 backend. The sync folder is a key prefix inside the bucket.

use std::env;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::{primitives::ByteStream, Client};
use aws_types::region::Region;

use super::{RemoteObject, RemoteStore};
use crate::util::is_http_url;
use crate::{Error, Result};

const ENV_ACCOUNT_ID: &str = "R2_ACCOUNT_ID";
const ENV_BUCKET: &str = "R2_BUCKET";
const ENV_ACCESS_KEY_ID: &str = "R2_ACCESS_KEY_ID";
const ENV_SECRET_ACCESS_KEY: &str = "R2_SECRET_ACCESS_KEY";
const ENV_ENDPOINT_URL: &str = "R2_ENDPOINT_URL";

/// Cloudflare R2 configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct R2Config {
    /// Cloudflare account identifier.
    pub account_id: String,
    /// R2 bucket name.
    pub bucket: String,
    /// Access key id for S3-compatible auth.
    pub access_key_id: String,
    /// Secret access key for S3-compatible auth.
    pub secret_access_key: String,
    /// Endpoint override, e.g. a local S3-compatible server.
    pub endpoint_override: Option<String>,
}

impl R2Config {
    /// Load R2 configuration from environment variables.
    ///
    /// Returns `Ok(None)` when no R2 variables are set.
    /// Returns an error when only a partial configuration is provided.
    pub fn from_env() -> Result<Option<Self>> {
        parse_config(|key| env::var(key).ok())
    }

    /// S3-compatible endpoint URL.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        self.endpoint_override.clone().unwrap_or_else(|| {
            format!("https://{}.r2.cloudflarestorage.com", self.account_id)
        })
    }
}

/// R2-backed remote store.
#[derive(Clone, Debug)]
pub struct R2Store {
    config: R2Config,
    client: Client,
}

impl R2Store {
    #[must_use]
    pub fn new(config: R2Config) -> Self {
        let client = build_s3_client(&config);
        Self { config, client }
    }

    #[must_use]
    pub const fn config(&self) -> &R2Config {
        &self.config
    }

    /// Check that the configured bucket is reachable with current credentials.
    pub async fn bucket_is_reachable(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.config.bucket)
            .send()
            .await
            .map_err(|error| storage_error("head_bucket", &self.config.bucket, None, error))?;
        Ok(())
    }

    async fn put_and_stat(&self, object_key: &str, bytes: Vec<u8>) -> Result<RemoteObject> {
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(object_key)
            .content_type("application/x-sqlite3")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|error| {
                storage_error("put_object", &self.config.bucket, Some(object_key), error)
            })?;

        let head = self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(object_key)
            .send()
            .await
            .map_err(|error| {
                storage_error("head_object", &self.config.bucket, Some(object_key), error)
            })?;

        Ok(RemoteObject {
            id: object_key.to_string(),
            name: object_name(object_key),
            modified_at: head.last_modified().map_or(0, |time| time.secs()),
        })
    }
}

#[async_trait]
impl RemoteStore for R2Store {
    fn label(&self) -> &'static str {
        "r2"
    }

    async fn find_folder(&self, name: &str) -> Result<Option<String>> {
        // Prefixes exist implicitly.
        normalize_object_key(name).map(Some)
    }

    async fn create_folder(&self, name: &str) -> Result<String> {
        normalize_object_key(name)
    }

    async fn list_objects(&self, folder_id: &str, name: &str) -> Result<Vec<RemoteObject>> {
        let object_key = join_key(folder_id, name)?;
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.config.bucket)
            .prefix(&object_key)
            .send()
            .await
            .map_err(|error| {
                storage_error(
                    "list_objects_v2",
                    &self.config.bucket,
                    Some(&object_key),
                    error,
                )
            })?;

        Ok(response
            .contents()
            .iter()
            .filter(|object| object.key() == Some(object_key.as_str()))
            .map(|object| RemoteObject {
                id: object_key.clone(),
                name: name.to_string(),
                modified_at: object.last_modified().map_or(0, |time| time.secs()),
            })
            .collect())
    }

    async fn create_object(
        &self,
        folder_id: &str,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<RemoteObject> {
        let object_key = join_key(folder_id, name)?;
        self.put_and_stat(&object_key, bytes).await
    }

    async fn update_object(&self, object: &RemoteObject, bytes: Vec<u8>) -> Result<RemoteObject> {
        let object_key = normalize_object_key(&object.id)?;
        self.put_and_stat(&object_key, bytes).await
    }

    async fn download(&self, object: &RemoteObject) -> Result<Vec<u8>> {
        let object_key = normalize_object_key(&object.id)?;
        let response = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .response_cache_control("no-cache")
            .send()
            .await
            .map_err(|error| {
                storage_error("get_object", &self.config.bucket, Some(&object_key), error)
            })?;

        let payload = response.body.collect().await.map_err(|error| {
            storage_error(
                "get_object_body",
                &self.config.bucket,
                Some(&object_key),
                error,
            )
        })?;

        Ok(payload.into_bytes().to_vec())
    }

    async fn trash(&self, object: &RemoteObject) -> Result<()> {
        let object_key = normalize_object_key(&object.id)?;
        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|error| {
                storage_error(
                    "delete_object",
                    &self.config.bucket,
                    Some(&object_key),
                    error,
                )
            })?;
        Ok(())
    }
}

fn parse_config(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<R2Config>> {
    let account_id = lookup(ENV_ACCOUNT_ID).map(|value| value.trim().to_string());
    let bucket = lookup(ENV_BUCKET).map(|value| value.trim().to_string());
    let access_key_id = lookup(ENV_ACCESS_KEY_ID).map(|value| value.trim().to_string());
    let secret_access_key = lookup(ENV_SECRET_ACCESS_KEY).map(|value| value.trim().to_string());
    let endpoint_override = lookup(ENV_ENDPOINT_URL).map(|value| value.trim().to_string());

    let any_present = account_id.is_some()
        || bucket.is_some()
        || access_key_id.is_some()
        || secret_access_key.is_some()
        || endpoint_override.is_some();

    if !any_present {
        return Ok(None);
    }

    let (Some(account_id), Some(bucket), Some(access_key_id), Some(secret_access_key)) = (
        account_id.filter(|value| !value.is_empty()),
        bucket.filter(|value| !value.is_empty()),
        access_key_id.filter(|value| !value.is_empty()),
        secret_access_key.filter(|value| !value.is_empty()),
    ) else {
        let missing: Vec<&str> = [
            ENV_ACCOUNT_ID,
            ENV_BUCKET,
            ENV_ACCESS_KEY_ID,
            ENV_SECRET_ACCESS_KEY,
        ]
        .into_iter()
        .filter(|key| lookup(key).map_or(true, |value| value.trim().is_empty()))
        .collect();
        return Err(Error::InvalidInput(format!(
            "R2 configuration is incomplete. Missing: {}",
            missing.join(", ")
        )));
    };

    let endpoint_override = normalize_endpoint_url(endpoint_override)?;

    Ok(Some(R2Config {
        account_id,
        bucket,
        access_key_id,
        secret_access_key,
        endpoint_override,
    }))
}

fn build_s3_client(config: &R2Config) -> Client {
    let credentials = Credentials::new(
        config.access_key_id.clone(),
        config.secret_access_key.clone(),
        None,
        None,
        "shiftbook-core-r2-store",
    );

    let sdk_config = aws_sdk_s3::config::Builder::new()
        .region(Region::new("auto"))
        .credentials_provider(credentials)
        .endpoint_url(config.endpoint_url())
        .force_path_style(true)
        .build();

    Client::from_conf(sdk_config)
}

fn storage_error(
    operation: &str,
    bucket: &str,
    object_key: Option<&str>,
    error: impl std::fmt::Display,
) -> Error {
    let target = object_key.map_or_else(|| bucket.to_string(), |key| format!("{bucket}/{key}"));
    Error::Storage(format!("R2 {operation} failed for {target}: {error}"))
}

fn normalize_object_key(object_key: &str) -> Result<String> {
    let object_key = object_key.trim().trim_matches('/').to_string();
    if object_key.is_empty() {
        return Err(Error::InvalidInput(
            "R2 object key cannot be empty".to_string(),
        ));
    }
    Ok(object_key)
}

fn join_key(prefix: &str, name: &str) -> Result<String> {
    let prefix = normalize_object_key(prefix)?;
    let name = normalize_object_key(name)?;
    Ok(format!("{prefix}/{name}"))
}

fn object_name(object_key: &str) -> String {
    object_key
        .rsplit_once('/')
        .map_or(object_key, |(_, name)| name)
        .to_string()
}

fn normalize_endpoint_url(endpoint: Option<String>) -> Result<Option<String>> {
    let Some(value) = endpoint else {
        return Ok(None);
    };

    if value.is_empty() {
        return Ok(None);
    }
    if !is_http_url(&value) {
        return Err(Error::InvalidInput(
            "R2_ENDPOINT_URL must start with http:// or https://".to_string(),
        ));
    }

    Ok(Some(value.trim_end_matches('/').to_string()))
}
