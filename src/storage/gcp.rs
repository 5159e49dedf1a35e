//! GCP Cloud Storage backend.
//!
//! Talks to a Google Cloud Storage bucket via the GCS JSON API using
//! `reqwest`.
//!
//! Key mapping:
//!   Objects:  `{prefix}{storage_key}`
//!
//! Credentials are resolved once at construction, in this order:
//!   - `GOOGLE_OAUTH_ACCESS_TOKEN` environment variable (static token)
//!   - an `authorized_user` credentials file: the configured path,
//!     `GOOGLE_APPLICATION_CREDENTIALS`, or the gcloud ADC file
//!   - GCE metadata server (when running on Google Cloud)

use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::backend::{ByteStream, StorageBackend, StorageError, StorageResult};

/// Default GCS API base URL.
const GCS_API_BASE: &str = "https://storage.googleapis.com";

const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

// -- GCS JSON API response types -----------------------------------------------

#[derive(Debug, Deserialize)]
struct GcsErrorDetail {
    code: Option<u16>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GcsErrorResponse {
    error: Option<GcsErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// The subset of a Google credentials JSON file we understand.
#[derive(Debug, Deserialize)]
struct CredentialsFile {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    client_secret: String,
    #[serde(default)]
    refresh_token: String,
}

// -- Token management ---------------------------------------------------------

/// Where access tokens come from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CredentialSource {
    /// A pre-minted token that is never refreshed.
    Static(String),
    /// gcloud user credentials exchanged via the OAuth2 refresh flow.
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
    /// GCE metadata server.
    MetadataServer,
    /// No Authorization header at all (storage emulators).
    Anonymous,
}

/// Cached access token with expiry.
struct CachedToken {
    access_token: String,
    expiry: Instant,
}

/// Connection settings for [`GcpBackend::new`].
#[derive(Debug, Clone, Default)]
pub struct GcpSettings {
    pub bucket: String,
    pub prefix: String,
    pub credentials_file: Option<String>,
    /// Override the API base URL, e.g. for a local emulator.
    pub endpoint_url: Option<String>,
    /// Skip authentication entirely.
    pub anonymous: bool,
}

/// Backend that stores objects in GCP Cloud Storage.
pub struct GcpBackend {
    /// Provider id used in error messages.
    name: String,
    /// HTTP client for GCS JSON API calls.
    client: reqwest::Client,
    /// The upstream GCS bucket name.
    bucket: String,
    /// Key prefix for all objects in the upstream bucket.
    prefix: String,
    /// API base URL without trailing slash.
    api_base: String,
    credentials: CredentialSource,
    /// Cached OAuth2 access token.
    token_cache: Mutex<Option<CachedToken>>,
}

impl GcpBackend {
    /// Create a new GCP backend.  Credential files are read here; tokens
    /// are fetched lazily on first API call.
    pub async fn new(name: impl Into<String>, settings: GcpSettings) -> anyhow::Result<Self> {
        let name = name.into();
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        let credentials = if settings.anonymous {
            CredentialSource::Anonymous
        } else {
            resolve_credentials(settings.credentials_file.as_deref()).await?
        };

        let api_base = settings
            .endpoint_url
            .as_deref()
            .unwrap_or(GCS_API_BASE)
            .trim_end_matches('/')
            .to_string();

        info!(
            provider = %name,
            bucket = %settings.bucket,
            prefix = %settings.prefix,
            "GCP backend initialized"
        );

        Ok(Self {
            name,
            client,
            bucket: settings.bucket,
            prefix: settings.prefix,
            api_base,
            credentials,
            token_cache: Mutex::new(None),
        })
    }

    /// Map a storage key to an upstream GCS object name.
    fn gcs_name(&self, storage_key: &str) -> String {
        format!("{}{}", self.prefix, storage_key)
    }

    fn object_url(&self, storage_key: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.api_base,
            url_encode(&self.bucket),
            url_encode(&self.gcs_name(storage_key))
        )
    }

    fn upload_url(&self, storage_key: &str) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.api_base,
            url_encode(&self.bucket),
            url_encode(&self.gcs_name(storage_key))
        )
    }

    /// Return a cached token if it hasn't expired, fetching a fresh one
    /// otherwise.  Tokens are cached with a 60s safety margin.
    async fn access_token(&self) -> anyhow::Result<Option<String>> {
        let (client_id, client_secret, refresh_token) = match &self.credentials {
            CredentialSource::Anonymous => return Ok(None),
            CredentialSource::Static(token) => return Ok(Some(token.clone())),
            CredentialSource::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
            } => (Some(client_id), Some(client_secret), Some(refresh_token)),
            CredentialSource::MetadataServer => (None, None, None),
        };

        {
            let cache = self.token_cache.lock().expect("token cache mutex poisoned");
            if let Some(ref cached) = *cache {
                if cached.expiry > Instant::now() {
                    return Ok(Some(cached.access_token.clone()));
                }
            }
        }

        let request = match (client_id, client_secret, refresh_token) {
            (Some(id), Some(secret), Some(refresh)) => self.client.post(TOKEN_URI).form(&[
                ("client_id", id.as_str()),
                ("client_secret", secret.as_str()),
                ("refresh_token", refresh.as_str()),
                ("grant_type", "refresh_token"),
            ]),
            _ => self
                .client
                .get(METADATA_TOKEN_URL)
                .header("Metadata-Flavor", "Google")
                .timeout(Duration::from_secs(5)),
        };

        let resp = request
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Token request failed: {e}"))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Token request failed ({status}): {body}");
        }
        let token: TokenResponse = resp.json().await?;

        let expiry = Instant::now() + Duration::from_secs(token.expires_in.saturating_sub(60));
        {
            let mut cache = self.token_cache.lock().expect("token cache mutex poisoned");
            *cache = Some(CachedToken {
                access_token: token.access_token.clone(),
                expiry,
            });
        }
        Ok(Some(token.access_token))
    }

    /// Build authorization headers for GCS API calls.
    async fn auth_headers(&self, operation: &'static str) -> StorageResult<HeaderMap> {
        let token = self
            .access_token()
            .await
            .map_err(|e| StorageError::unavailable(&self.name, operation, format!("{e:#}")))?;
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| StorageError::unavailable(&self.name, operation, e))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    fn request_error(&self, operation: &'static str, err: reqwest::Error) -> StorageError {
        StorageError::unavailable(&self.name, operation, err)
    }

    /// Turn a non-success response into a [`StorageError`].
    async fn status_error(
        &self,
        operation: &'static str,
        storage_key: &str,
        resp: reqwest::Response,
    ) -> StorageError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        StorageError::from_status(
            &self.name,
            operation,
            storage_key,
            status.as_u16(),
            gcs_error_message(status, &body),
        )
    }
}

/// Pick a credential source from the environment and credential files.
async fn resolve_credentials(credentials_file: Option<&str>) -> anyhow::Result<CredentialSource> {
    if let Ok(token) = std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN") {
        return Ok(CredentialSource::Static(token));
    }

    let candidate = credentials_file
        .map(str::to_string)
        .or_else(|| std::env::var("GOOGLE_APPLICATION_CREDENTIALS").ok())
        .or_else(|| {
            let adc = application_default_credentials_path();
            std::path::Path::new(&adc).exists().then_some(adc)
        });

    let Some(path) = candidate else {
        return Ok(CredentialSource::MetadataServer);
    };

    let contents = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read credentials file {path}: {e}"))?;
    parse_credentials(&contents)
}

fn parse_credentials(contents: &str) -> anyhow::Result<CredentialSource> {
    let creds: CredentialsFile = serde_json::from_str(contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse credentials file: {e}"))?;
    match creds.kind.as_str() {
        "authorized_user" => Ok(CredentialSource::AuthorizedUser {
            client_id: creds.client_id,
            client_secret: creds.client_secret,
            refresh_token: creds.refresh_token,
        }),
        "service_account" => {
            warn!(
                "service account keys need JWT signing, which is not supported; \
                 falling back to the metadata server. Set GOOGLE_OAUTH_ACCESS_TOKEN to override."
            );
            Ok(CredentialSource::MetadataServer)
        }
        other => anyhow::bail!("Unsupported credential type: {other}"),
    }
}

/// Get the path to gcloud application-default credentials.
fn application_default_credentials_path() -> String {
    if let Ok(config_dir) = std::env::var("CLOUDSDK_CONFIG") {
        return format!("{config_dir}/application_default_credentials.json");
    }
    if let Ok(home) = std::env::var("HOME") {
        return format!("{home}/.config/gcloud/application_default_credentials.json");
    }
    ".config/gcloud/application_default_credentials.json".to_string()
}

/// URL-encode a GCS object name for use in API paths.
fn url_encode(name: &str) -> String {
    percent_encoding::utf8_percent_encode(name, percent_encoding::NON_ALPHANUMERIC).to_string()
}

/// Extract a readable message from a GCS error body.
fn gcs_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(err_resp) = serde_json::from_str::<GcsErrorResponse>(body) {
        if let Some(err) = err_resp.error {
            return format!(
                "{} (code {})",
                err.message.unwrap_or_default(),
                err.code.unwrap_or(status.as_u16())
            );
        }
    }
    format!("HTTP {status} - {body}")
}

impl StorageBackend for GcpBackend {
    fn put(
        &self,
        storage_key: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = StorageResult<()>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            let auth = self.auth_headers("put").await?;
            debug!("GCS upload: bucket={} key={}", self.bucket, storage_key);

            let resp = self
                .client
                .post(self.upload_url(&storage_key))
                .headers(auth)
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(data)
                .send()
                .await
                .map_err(|e| self.request_error("put", e))?;

            if !resp.status().is_success() {
                return Err(self.status_error("put", &storage_key, resp).await);
            }
            Ok(())
        })
    }

    fn get(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = StorageResult<ByteStream>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            let auth = self.auth_headers("get").await?;
            debug!("GCS download: bucket={} key={}", self.bucket, storage_key);

            let resp = self
                .client
                .get(self.object_url(&storage_key))
                .headers(auth)
                .query(&[("alt", "media")])
                .send()
                .await
                .map_err(|e| self.request_error("get", e))?;

            if !resp.status().is_success() {
                return Err(self.status_error("get", &storage_key, resp).await);
            }

            let provider = self.name.clone();
            let stream = resp
                .bytes_stream()
                .map_err(move |e| StorageError::unavailable(provider.clone(), "get", e));
            Ok(Box::pin(stream) as ByteStream)
        })
    }

    fn delete(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = StorageResult<()>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            let auth = self.auth_headers("delete").await?;
            debug!("GCS delete: bucket={} key={}", self.bucket, storage_key);

            let resp = self
                .client
                .delete(self.object_url(&storage_key))
                .headers(auth)
                .send()
                .await
                .map_err(|e| self.request_error("delete", e))?;

            // Idempotent: 404 means already gone.
            if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
                return Err(self.status_error("delete", &storage_key, resp).await);
            }
            Ok(())
        })
    }

    fn exists(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = StorageResult<bool>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            let auth = self.auth_headers("exists").await?;
            let resp = self
                .client
                .get(self.object_url(&storage_key))
                .headers(auth)
                .query(&[("fields", "name")])
                .send()
                .await
                .map_err(|e| self.request_error("exists", e))?;

            if resp.status().is_success() {
                Ok(true)
            } else if resp.status() == StatusCode::NOT_FOUND {
                Ok(false)
            } else {
                Err(self.status_error("exists", &storage_key, resp).await)
            }
        })
    }
}
