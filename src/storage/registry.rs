//! Provider registry.
//!
//! Maps provider identifiers to adapters and picks providers for new
//! uploads and migration targets.

use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::aws::{AwsBackend, AwsSettings};
use super::backend::StorageBackend;
use super::gcp::{GcpBackend, GcpSettings};
use super::local::LocalBackend;
use super::memory::MemoryBackend;
use super::timeout::TimedBackend;
use crate::config::{ProviderKind, StorageConfig};
use crate::errors::GatewayError;

#[derive(Default)]
pub struct ProviderRegistry {
    /// Registration order, for stable listing.
    order: Vec<String>,
    adapters: HashMap<String, Arc<dyn StorageBackend>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured provider, each wrapped with the configured
    /// per-call timeout.
    pub async fn from_config(config: &StorageConfig) -> anyhow::Result<Self> {
        let limit = Duration::from_secs(config.call_timeout_seconds);
        let mut registry = Self::new();

        for provider in &config.providers {
            let id = provider.id.clone();
            let adapter: Arc<dyn StorageBackend> = match &provider.kind {
                ProviderKind::Aws(aws) => Arc::new(
                    AwsBackend::new(
                        id.clone(),
                        AwsSettings {
                            bucket: aws.bucket.clone(),
                            region: aws.region.clone(),
                            prefix: aws.prefix.clone(),
                            endpoint_url: aws.endpoint_url.clone(),
                            use_path_style: aws.use_path_style,
                            access_key_id: aws.access_key_id.clone(),
                            secret_access_key: aws.secret_access_key.clone(),
                        },
                    )
                    .await?,
                ),
                ProviderKind::Gcp(gcp) => Arc::new(
                    GcpBackend::new(
                        id.clone(),
                        GcpSettings {
                            bucket: gcp.bucket.clone(),
                            prefix: gcp.prefix.clone(),
                            credentials_file: gcp.credentials_file.clone(),
                            endpoint_url: gcp.endpoint_url.clone(),
                            anonymous: gcp.anonymous,
                        },
                    )
                    .await?,
                ),
                ProviderKind::Local(local) => {
                    Arc::new(LocalBackend::new(id.clone(), &local.root_dir)?)
                }
                ProviderKind::Memory(mem) => {
                    Arc::new(MemoryBackend::with_limit(id.clone(), mem.max_size_bytes))
                }
            };
            info!(provider = %id, kind = provider.kind.name(), "storage provider registered");
            registry.register(id.clone(), Arc::new(TimedBackend::new(id, adapter, limit)))?;
        }

        Ok(registry)
    }

    /// Register an adapter under `id`.  Identifiers must be unique.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        adapter: Arc<dyn StorageBackend>,
    ) -> anyhow::Result<()> {
        let id = id.into();
        if self.adapters.contains_key(&id) {
            anyhow::bail!("provider `{id}` is already registered");
        }
        self.order.push(id.clone());
        self.adapters.insert(id, adapter);
        Ok(())
    }

    /// Look up the adapter for `id`.
    pub fn resolve(&self, id: &str) -> Result<Arc<dyn StorageBackend>, GatewayError> {
        self.adapters
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownProvider {
                provider: id.to_string(),
            })
    }

    /// Configured provider ids in registration order.
    pub fn providers(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Pick a provider uniformly at random for a new upload.
    pub fn select(&self) -> Result<String, GatewayError> {
        self.order
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no storage providers configured").into())
    }

    /// Pick a migration target for an object currently held by `current`.
    ///
    /// With more than one provider the current one is never chosen.  With
    /// exactly one, that provider is returned and the caller treats the
    /// migration as a no-op.
    pub fn select_target(&self, current: &str) -> Result<String, GatewayError> {
        if self.order.len() <= 1 {
            return self.select();
        }
        let candidates: Vec<&String> = self.order.iter().filter(|id| *id != current).collect();
        candidates
            .choose(&mut rand::thread_rng())
            .map(|id| (*id).clone())
            .ok_or_else(|| anyhow::anyhow!("no migration target available").into())
    }
}
