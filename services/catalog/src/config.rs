use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors raised when the loaded configuration is unusable
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Main configuration for the catalog service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Media gateway configuration
    pub media: MediaConfig,
    /// Song listing configuration
    #[serde(default)]
    pub listing: ListingConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// S3-compatible pinning gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    /// Bucket holding audio and image objects
    pub bucket: String,
    /// Region reported to the gateway
    #[serde(default = "default_region")]
    pub region: String,
    /// Gateway endpoint URL (pinning service, MinIO, LocalStack)
    pub endpoint_url: Option<String>,
    /// Force path-style access
    #[serde(default)]
    pub force_path_style: bool,
    /// Key prefix under which media objects live
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Validity of image access links in seconds
    #[serde(default = "default_image_link_ttl_secs")]
    pub image_link_ttl_secs: u64,
    /// Validity of audio access links in seconds
    #[serde(default = "default_audio_link_ttl_secs")]
    pub audio_link_ttl_secs: u64,
    /// Check that the object exists before signing a link
    #[serde(default = "default_true")]
    pub verify_exists: bool,
    /// Per-link resolution timeout in milliseconds
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
    /// Largest accepted upload in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Song listing and listing cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ListingConfig {
    /// Largest page a client may request
    #[serde(default = "default_max_take")]
    pub max_take: i64,
    /// Upper bound on how long a page stays cached
    #[serde(default = "default_max_cache_ttl_secs")]
    pub max_cache_ttl_secs: u64,
    /// Cache lifetime of pages that contain unavailable media
    #[serde(default = "default_failure_cache_ttl_secs")]
    pub failure_cache_ttl_secs: u64,
    /// Maximum cached pages (0 = unbounded)
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    /// Record store query timeout in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Concurrent media link resolutions per page
    #[serde(default = "default_resolve_concurrency")]
    pub resolve_concurrency: usize,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "catalog-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_key_prefix() -> String {
    "media".to_string()
}

fn default_image_link_ttl_secs() -> u64 {
    3600
}

fn default_audio_link_ttl_secs() -> u64 {
    900
}

fn default_resolve_timeout_ms() -> u64 {
    3000
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024 // 50MB
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_max_take() -> i64 {
    100
}

fn default_max_cache_ttl_secs() -> u64 {
    300
}

fn default_failure_cache_ttl_secs() -> u64 {
    15
}

fn default_cache_max_entries() -> usize {
    1024
}

fn default_store_timeout_ms() -> u64 {
    5000
}

fn default_resolve_concurrency() -> usize {
    8
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "catalog-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/catalog").required(false))
            .add_source(config::File::with_name("/etc/encore/catalog").required(false))
            // CATALOG__DATABASE__URL -> database.url
            .add_source(
                config::Environment::with_prefix("CATALOG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.is_empty() {
            return Err(ConfigError::MissingRequired("database.url".to_string()));
        }

        if self.media.bucket.is_empty() {
            return Err(ConfigError::MissingRequired("media.bucket".to_string()));
        }

        if self.media.image_link_ttl_secs == 0 || self.media.audio_link_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "media.*_link_ttl_secs".to_string(),
                message: "link validity must be positive".to_string(),
            });
        }

        if self.listing.max_take <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "listing.max_take".to_string(),
                message: format!("must be positive, got {}", self.listing.max_take),
            });
        }

        if self.listing.resolve_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "listing.resolve_concurrency".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl MediaConfig {
    pub fn image_link_ttl(&self) -> Duration {
        Duration::from_secs(self.image_link_ttl_secs)
    }

    pub fn audio_link_ttl(&self) -> Duration {
        Duration::from_secs(self.audio_link_ttl_secs)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }
}

impl ListingConfig {
    pub fn max_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.max_cache_ttl_secs)
    }

    pub fn failure_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.failure_cache_ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            max_take: default_max_take(),
            max_cache_ttl_secs: default_max_cache_ttl_secs(),
            failure_cache_ttl_secs: default_failure_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
            store_timeout_ms: default_store_timeout_ms(),
            resolve_concurrency: default_resolve_concurrency(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    const MINIMAL: &str = r#"
        [database]
        url = "postgres://localhost/encore"

        [media]
        bucket = "encore-media"
    "#;

    #[test]
    fn test_default_values() {
        assert_eq!(default_image_link_ttl_secs(), 3600);
        assert!(default_audio_link_ttl_secs() < default_image_link_ttl_secs());
        assert_eq!(default_max_take(), 100);
    }

    #[test]
    fn test_minimal_config_fills_defaults() {
        let config = parse(MINIMAL);

        assert_eq!(config.service.name, "catalog-service");
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.listing.resolve_concurrency, 8);
        assert_eq!(config.media.key_prefix, "media");
        assert!(config.media.verify_exists);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = parse(MINIMAL);
        config.listing.max_take = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        let mut config = parse(MINIMAL);
        config.media.bucket.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired(_))
        ));

        let mut config = parse(MINIMAL);
        config.media.audio_link_ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_helpers() {
        let config = parse(MINIMAL);
        assert_eq!(config.media.image_link_ttl(), Duration::from_secs(3600));
        assert_eq!(config.listing.store_timeout(), Duration::from_millis(5000));
        assert_eq!(config.database.connect_timeout(), Duration::from_secs(30));
    }
}
