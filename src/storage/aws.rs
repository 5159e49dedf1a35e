//! AWS S3 storage backend.
//!
//! Stores every object in a single upstream S3 bucket under an optional
//! key prefix:
//!
//!   Objects:  `{prefix}{storage_key}`
//!
//! Credentials are resolved via the standard AWS credential chain
//! (env vars, `~/.aws/credentials`, IAM role, etc.) unless explicit keys
//! are configured.

use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::Client;
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info};

use super::backend::{ByteStream, StorageBackend, StorageError, StorageResult};

/// Backend that forwards operations to AWS S3.
pub struct AwsBackend {
    /// Provider id used in error messages.
    name: String,
    /// AWS S3 SDK client.
    client: Client,
    /// The upstream S3 bucket name.
    bucket: String,
    /// Key prefix for all objects in the upstream bucket.
    prefix: String,
}

/// Connection settings for [`AwsBackend::new`].
#[derive(Debug, Clone, Default)]
pub struct AwsSettings {
    pub bucket: String,
    pub region: String,
    pub prefix: String,
    pub endpoint_url: Option<String>,
    pub use_path_style: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl AwsBackend {
    /// Create a new AWS backend and initialize the S3 client for the
    /// configured region.
    pub async fn new(name: impl Into<String>, settings: AwsSettings) -> anyhow::Result<Self> {
        let name = name.into();
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(settings.region.clone()));

        if let Some(ref endpoint) = settings.endpoint_url {
            config_loader = config_loader.endpoint_url(endpoint);
        }

        if let (Some(ak), Some(sk)) = (&settings.access_key_id, &settings.secret_access_key) {
            let creds = aws_sdk_s3::config::Credentials::new(ak, sk, None, None, "shufflestore-config");
            config_loader = config_loader.credentials_provider(creds);
        }

        let sdk_config = config_loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(settings.use_path_style)
            .build();
        let client = Client::from_conf(s3_config);

        info!(
            provider = %name,
            bucket = %settings.bucket,
            prefix = %settings.prefix,
            "AWS backend initialized"
        );

        Ok(Self {
            name,
            client,
            bucket: settings.bucket,
            prefix: settings.prefix,
        })
    }

    /// Map a storage key to an upstream S3 key.
    fn s3_key(&self, storage_key: &str) -> String {
        format!("{}{}", self.prefix, storage_key)
    }

    /// Translate an SDK error into a [`StorageError`] using the HTTP status
    /// of the raw response when there is one.
    fn map_sdk_error<E>(
        &self,
        operation: &'static str,
        storage_key: &str,
        err: SdkError<E, HttpResponse>,
    ) -> StorageError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let message = DisplayErrorContext(&err).to_string();
        match err.raw_response().map(|r| r.status().as_u16()) {
            Some(status) => {
                StorageError::from_status(&self.name, operation, storage_key, status, message)
            }
            None => StorageError::unavailable(&self.name, operation, message),
        }
    }
}

impl StorageBackend for AwsBackend {
    fn put(
        &self,
        storage_key: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = StorageResult<()>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            let s3_key = self.s3_key(&storage_key);
            debug!("AWS put_object: bucket={} key={}", self.bucket, s3_key);

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&s3_key)
                .body(aws_sdk_s3::primitives::ByteStream::from(data))
                .send()
                .await
                .map_err(|e| self.map_sdk_error("put", &storage_key, e))?;
            Ok(())
        })
    }

    fn get(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = StorageResult<ByteStream>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            let s3_key = self.s3_key(&storage_key);
            debug!("AWS get_object: bucket={} key={}", self.bucket, s3_key);

            let resp = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&s3_key)
                .send()
                .await
                .map_err(|e| self.map_sdk_error("get", &storage_key, e))?;

            let provider = self.name.clone();
            let stream = futures::stream::try_unfold(resp.body, move |mut body| {
                let provider = provider.clone();
                async move {
                    match body.try_next().await {
                        Ok(Some(chunk)) => Ok(Some((chunk, body))),
                        Ok(None) => Ok(None),
                        Err(e) => Err(StorageError::unavailable(provider, "get", e)),
                    }
                }
            });
            Ok(Box::pin(stream) as ByteStream)
        })
    }

    fn delete(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = StorageResult<()>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            let s3_key = self.s3_key(&storage_key);
            debug!("AWS delete_object: bucket={} key={}", self.bucket, s3_key);

            // S3 delete_object is idempotent; a 404 from an S3-compatible
            // endpoint is treated the same way.
            match self
                .client
                .delete_object()
                .bucket(&self.bucket)
                .key(&s3_key)
                .send()
                .await
            {
                Ok(_) => Ok(()),
                Err(e) => match self.map_sdk_error("delete", &storage_key, e) {
                    StorageError::NotFound { .. } => Ok(()),
                    other => Err(other),
                },
            }
        })
    }

    fn exists(
        &self,
        storage_key: &str,
    ) -> Pin<Box<dyn Future<Output = StorageResult<bool>> + Send + '_>> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            let s3_key = self.s3_key(&storage_key);
            debug!("AWS head_object: bucket={} key={}", self.bucket, s3_key);

            match self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(&s3_key)
                .send()
                .await
            {
                Ok(_) => Ok(true),
                Err(e) => match self.map_sdk_error("exists", &storage_key, e) {
                    StorageError::NotFound { .. } => Ok(false),
                    other => Err(other),
                },
            }
        })
    }
}
