//! Configuration loading and types for ShuffleStore.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: networking, caller identities, metadata persistence, storage
//! providers, and the lifecycle and migration engines.

use garde::Validate;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Caller identity settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Metadata store settings.
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Storage provider settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Soft-delete retention and cleanup scheduling.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Shuffle (cross-provider migration) settings.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Maximum accepted upload size in bytes (default 100 MiB).
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
            max_upload_size: default_max_upload_size(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

/// Caller identities accepted by the static token resolver.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub identities: Vec<IdentityConfig>,
}

/// One caller: the name recorded as owner, and the token that maps to it.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub name: String,
    pub token: String,
}

/// Metadata store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// Store type: `sqlite` or `memory`.
    #[serde(default = "default_metadata_engine")]
    pub engine: String,

    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            engine: default_metadata_engine(),
            sqlite: SqliteConfig::default(),
        }
    }
}

/// SQLite-specific metadata configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_metadata_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// Storage provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Configured providers.  Uploads pick uniformly among them.
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,

    /// Upper bound on any single adapter call, in seconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            call_timeout_seconds: default_call_timeout(),
        }
    }
}

/// One named provider and the adapter behind it.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProviderConfig {
    /// Provider identifier recorded on every file stored there.
    #[garde(length(min = 1, max = 64), pattern(r"^[A-Za-z0-9][A-Za-z0-9_\-]*$"))]
    pub id: String,

    #[serde(flatten)]
    #[garde(skip)]
    pub kind: ProviderKind,
}

/// Adapter type plus its settings, selected by the `kind` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderKind {
    Aws(AwsProviderConfig),
    Gcp(GcpProviderConfig),
    Local(LocalProviderConfig),
    Memory(MemoryProviderConfig),
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Aws(_) => "aws",
            ProviderKind::Gcp(_) => "gcp",
            ProviderKind::Local(_) => "local",
            ProviderKind::Memory(_) => "memory",
        }
    }
}

/// AWS S3 provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsProviderConfig {
    /// Backing S3 bucket name.
    pub bucket: String,
    /// AWS region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Key prefix in the backing bucket.
    #[serde(default)]
    pub prefix: String,
    /// Custom S3-compatible endpoint (e.g. MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Force path-style URL addressing.
    #[serde(default)]
    pub use_path_style: bool,
    /// Explicit AWS access key (falls back to env/credential chain).
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Explicit AWS secret key (falls back to env/credential chain).
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

/// GCP Cloud Storage provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GcpProviderConfig {
    /// Backing GCS bucket name.
    pub bucket: String,
    /// Key prefix in the backing bucket.
    #[serde(default)]
    pub prefix: String,
    /// Path to an `authorized_user` credentials JSON file.
    #[serde(default)]
    pub credentials_file: Option<String>,
    /// Custom API endpoint (e.g. a local GCS emulator).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Send no credentials (emulators only).
    #[serde(default)]
    pub anonymous: bool,
}

/// Local filesystem provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalProviderConfig {
    /// Root directory for stored objects.
    pub root_dir: String,
}

/// In-memory provider configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MemoryProviderConfig {
    /// Maximum total size in bytes (0 = unlimited).
    #[serde(default)]
    pub max_size_bytes: u64,
}

/// Soft-delete retention settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Days a soft-deleted file stays restorable before cleanup purges it.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Seconds between background cleanup runs (0 disables the task).
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            cleanup_interval_seconds: default_cleanup_interval(),
        }
    }
}

/// Shuffle settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    /// Maximum records migrated at once.
    #[serde(default = "default_migration_concurrency")]
    pub concurrency: usize,

    /// Directory for temp files while relaying objects between providers.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            concurrency: default_migration_concurrency(),
            staging_dir: default_staging_dir(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_metadata_engine() -> String {
    "sqlite".to_string()
}

fn default_metadata_path() -> String {
    "./data/metadata.db".to_string()
}

fn default_providers() -> Vec<ProviderConfig> {
    ["local-a", "local-b"]
        .into_iter()
        .map(|id| ProviderConfig {
            id: id.to_string(),
            kind: ProviderKind::Local(LocalProviderConfig {
                root_dir: format!("./data/objects/{id}"),
            }),
        })
        .collect()
}

fn default_call_timeout() -> u64 {
    60
}

fn default_retention_days() -> u32 {
    7
}

fn default_cleanup_interval() -> u64 {
    3600
}

fn default_migration_concurrency() -> usize {
    4
}

fn default_staging_dir() -> String {
    "./data/staging".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_upload_size() -> u64 {
    104_857_600 // 100 MiB
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Validation --------------------------------------------------------------

/// Upper bound on `lifecycle.retention_days` (about a century).
pub const MAX_RETENTION_DAYS: u32 = 36_500;

impl Config {
    /// Reject configurations the engines cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage.providers.is_empty() {
            anyhow::bail!("storage.providers must list at least one provider");
        }
        let mut seen = HashSet::new();
        for provider in &self.storage.providers {
            provider
                .validate()
                .map_err(|e| anyhow::anyhow!("invalid provider id `{}`: {e}", provider.id))?;
            if !seen.insert(provider.id.as_str()) {
                anyhow::bail!("duplicate provider id `{}`", provider.id);
            }
        }
        if self.storage.call_timeout_seconds == 0 {
            anyhow::bail!("storage.call_timeout_seconds must be positive");
        }
        if self.lifecycle.retention_days > MAX_RETENTION_DAYS {
            anyhow::bail!(
                "lifecycle.retention_days must be at most {MAX_RETENTION_DAYS}, got {}",
                self.lifecycle.retention_days
            );
        }
        if self.migration.concurrency == 0 {
            anyhow::bail!("migration.concurrency must be positive");
        }
        match self.metadata.engine.as_str() {
            "sqlite" | "memory" => {}
            other => anyhow::bail!("unknown metadata engine `{other}`"),
        }
        let mut tokens = HashSet::new();
        for identity in &self.auth.identities {
            if identity.token.is_empty() {
                anyhow::bail!("identity `{}` has an empty token", identity.name);
            }
            if !tokens.insert(identity.token.as_str()) {
                anyhow::bail!("identity `{}` reuses another identity's token", identity.name);
            }
        }
        Ok(())
    }
}

// -- Loader ------------------------------------------------------------------

/// Load, parse and validate configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.lifecycle.retention_days, 7);
        assert_eq!(config.storage.call_timeout_seconds, 60);
        assert_eq!(config.migration.concurrency, 4);
        assert_eq!(config.metadata.engine, "sqlite");
        let ids: Vec<_> = config.storage.providers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["local-a", "local-b"]);
    }

    #[test]
    fn test_provider_kinds_parse() {
        let yaml = r#"
storage:
  providers:
    - id: aws
      kind: aws
      bucket: uploads
      region: eu-west-1
    - id: gcp
      kind: gcp
      bucket: uploads-gcs
      credentials_file: /etc/gcp.json
    - id: scratch
      kind: memory
      max_size_bytes: 1024
"#;
        let config = parse_config(yaml).unwrap();
        let providers = &config.storage.providers;
        assert_eq!(providers.len(), 3);
        match &providers[0].kind {
            ProviderKind::Aws(aws) => {
                assert_eq!(aws.bucket, "uploads");
                assert_eq!(aws.region, "eu-west-1");
                assert!(aws.endpoint_url.is_none());
            }
            other => panic!("expected aws, got {}", other.name()),
        }
        match &providers[1].kind {
            ProviderKind::Gcp(gcp) => {
                assert_eq!(gcp.credentials_file.as_deref(), Some("/etc/gcp.json"))
            }
            other => panic!("expected gcp, got {}", other.name()),
        }
        match &providers[2].kind {
            ProviderKind::Memory(mem) => assert_eq!(mem.max_size_bytes, 1024),
            other => panic!("expected memory, got {}", other.name()),
        }
    }

    #[test]
    fn test_unknown_provider_kind_rejected() {
        let yaml = "storage:\n  providers:\n    - id: az\n      kind: azure\n";
        assert!(parse_config(yaml).is_err());
    }

    #[test]
    fn test_duplicate_provider_ids_rejected() {
        let yaml = r#"
storage:
  providers:
    - { id: a, kind: memory }
    - { id: a, kind: memory }
"#;
        let err = parse_config(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate provider id"));
    }

    #[test]
    fn test_retention_days_bounded() {
        let config = parse_config("lifecycle:\n  retention_days: 36500\n").unwrap();
        assert_eq!(config.lifecycle.retention_days, MAX_RETENTION_DAYS);

        let err = parse_config("lifecycle:\n  retention_days: 100000\n").unwrap_err();
        assert!(err.to_string().contains("retention_days"));
    }

    #[test]
    fn test_empty_provider_list_rejected() {
        assert!(parse_config("storage:\n  providers: []\n").is_err());
    }

    #[test]
    fn test_bad_provider_id_rejected() {
        let yaml = "storage:\n  providers:\n    - { id: 'has space', kind: memory }\n";
        assert!(parse_config(yaml).is_err());
    }

    #[test]
    fn test_identities_parse_and_duplicate_tokens_rejected() {
        let yaml = r#"
auth:
  identities:
    - { name: alice, token: t-alice }
    - { name: bob, token: t-bob }
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.auth.identities.len(), 2);

        let dup = r#"
auth:
  identities:
    - { name: alice, token: same }
    - { name: bob, token: same }
"#;
        assert!(parse_config(dup).is_err());
    }

    #[test]
    fn test_unknown_metadata_engine_rejected() {
        assert!(parse_config("metadata:\n  engine: raft\n").is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shufflestore.yaml");
        std::fs::write(&path, "server:\n  port: 8080\nlifecycle:\n  retention_days: 30\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.lifecycle.retention_days, 30);
    }
}
