/// Configuration management for Aurora Lens
use crate::error::{LensError, LensResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LensConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    pub identity: IdentityConfig,
    pub invites: InviteConfig,
    pub admin: AdminConfig,
    pub queue: QueueConfig,
    pub tracked: TrackedConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration (ops HTTP surface)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub service_did: String,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub db_location: PathBuf,
}

/// Firehose ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Jetstream endpoint (ws:// or wss://, /subscribe appended if missing)
    pub jetstream_url: String,
    /// Optional tap service for server-side repo filtering
    pub tap_url: Option<String>,
    /// How often the firehose cursor is persisted
    pub cursor_save_interval_secs: u64,
    /// Replay overlap subtracted from the cursor on reconnect (microseconds)
    pub replay_window_us: u64,
}

/// Identity resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub did_plc_url: String,
    pub did_cache_ttl_secs: u64,
}

/// Invite system configuration for subscriptions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteConfig {
    pub required: bool,
}

/// Admin API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Bearer token required by the admin endpoints; unset disables them
    pub token: Option<String>,
}

/// Job queue and worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub index_workers: usize,
    pub fetch_workers: usize,
    pub resolve_workers: usize,
    pub aggregate_workers: usize,
    pub backfill_workers: usize,
    pub tap_workers: usize,
    pub job_timeout_secs: u64,
    pub job_max_attempts: i64,
    pub aggregate_debounce_secs: u64,
    pub stalled_after_secs: u64,
}

/// Tracked-actor membership configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedConfig {
    /// Full rebuild period for the membership set; this is the staleness bound
    pub rebuild_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .unwrap_or(default)
}

impl LensConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> LensResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("LENS_HOSTNAME").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("LENS_PORT")
            .unwrap_or_else(|_| "8200".to_string())
            .parse()
            .map_err(|_| LensError::Config("Invalid port number".to_string()))?;

        let service_did =
            env::var("LENS_SERVICE_DID").unwrap_or_else(|_| format!("did:web:{}", hostname));
        let version = env::var("LENS_VERSION").unwrap_or_else(|_| "0.1.0".to_string());

        let data_directory: PathBuf = env::var("LENS_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let db_location = env::var("LENS_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("lens.sqlite"));

        let jetstream_url = env::var("LENS_JETSTREAM_URL")
            .unwrap_or_else(|_| "wss://jetstream1.us-east.bsky.network".to_string());
        let tap_url = env::var("LENS_TAP_URL").ok();
        let cursor_save_interval_secs = env_u64("LENS_CURSOR_SAVE_INTERVAL_SECS", 5);
        let replay_window_us = env_u64("LENS_REPLAY_WINDOW_US", 5_000_000);

        let did_plc_url =
            env::var("LENS_DID_PLC_URL").unwrap_or_else(|_| "https://plc.directory".to_string());
        let did_cache_ttl_secs = env_u64("LENS_DID_CACHE_TTL_SECS", 86400);

        let invite_required = env::var("LENS_INVITE_REQUIRED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);

        let admin_token = env::var("LENS_ADMIN_TOKEN").ok().filter(|t| !t.is_empty());

        let queue = QueueConfig {
            index_workers: env_usize("LENS_INDEX_WORKERS", 8),
            fetch_workers: env_usize("LENS_FETCH_WORKERS", 4),
            resolve_workers: env_usize("LENS_RESOLVE_WORKERS", 4),
            aggregate_workers: env_usize("LENS_AGGREGATE_WORKERS", 2),
            backfill_workers: env_usize("LENS_BACKFILL_WORKERS", 2),
            tap_workers: env_usize("LENS_TAP_WORKERS", 1),
            job_timeout_secs: env_u64("LENS_JOB_TIMEOUT_SECS", 60),
            job_max_attempts: env_u64("LENS_JOB_MAX_ATTEMPTS", 5) as i64,
            aggregate_debounce_secs: env_u64("LENS_AGGREGATE_DEBOUNCE_SECS", 5),
            stalled_after_secs: env_u64("LENS_STALLED_AFTER_SECS", 300),
        };

        let tracked = TrackedConfig {
            rebuild_interval_secs: env_u64("LENS_TRACKED_REBUILD_INTERVAL_SECS", 300),
        };

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "aurora_lens=info".to_string());

        Ok(LensConfig {
            service: ServiceConfig {
                hostname,
                port,
                service_did,
                version,
            },
            storage: StorageConfig {
                data_directory,
                db_location,
            },
            ingest: IngestConfig {
                jetstream_url,
                tap_url,
                cursor_save_interval_secs,
                replay_window_us,
            },
            identity: IdentityConfig {
                did_plc_url,
                did_cache_ttl_secs,
            },
            invites: InviteConfig {
                required: invite_required,
            },
            admin: AdminConfig { token: admin_token },
            queue,
            tracked,
            logging: LoggingConfig { level: log_level },
        })
    }

    /// A fixed configuration for tests: defaults everywhere, no debounce so
    /// enqueued jobs are immediately claimable
    #[cfg(test)]
    pub fn for_tests() -> Self {
        LensConfig {
            service: ServiceConfig {
                hostname: "127.0.0.1".to_string(),
                port: 8200,
                service_did: "did:web:127.0.0.1".to_string(),
                version: "0.1.0".to_string(),
            },
            storage: StorageConfig {
                data_directory: "./data".into(),
                db_location: "./data/lens.sqlite".into(),
            },
            ingest: IngestConfig {
                jetstream_url: "wss://jetstream1.us-east.bsky.network".to_string(),
                tap_url: None,
                cursor_save_interval_secs: 5,
                replay_window_us: 5_000_000,
            },
            identity: IdentityConfig {
                did_plc_url: "https://plc.directory".to_string(),
                did_cache_ttl_secs: 86400,
            },
            invites: InviteConfig { required: false },
            admin: AdminConfig {
                token: Some("test-admin-token".to_string()),
            },
            queue: QueueConfig {
                index_workers: 2,
                fetch_workers: 1,
                resolve_workers: 1,
                aggregate_workers: 1,
                backfill_workers: 1,
                tap_workers: 1,
                job_timeout_secs: 60,
                job_max_attempts: 5,
                aggregate_debounce_secs: 0,
                stalled_after_secs: 300,
            },
            tracked: TrackedConfig {
                rebuild_interval_secs: 300,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> LensResult<()> {
        if self.service.hostname.is_empty() {
            return Err(LensError::Config("Hostname cannot be empty".to_string()));
        }

        if !self.ingest.jetstream_url.starts_with("ws")
            && !self.ingest.jetstream_url.starts_with("http")
        {
            return Err(LensError::Config(
                "Jetstream URL must be a ws://, wss://, http:// or https:// URL".to_string(),
            ));
        }

        if self.queue.index_workers == 0 {
            return Err(LensError::Config(
                "At least one index worker is required".to_string(),
            ));
        }

        if self.queue.job_max_attempts < 1 {
            return Err(LensError::Config(
                "Job max attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config_passes() {
        assert!(LensConfig::for_tests().validate().is_ok());
    }

    #[test]
    fn test_empty_hostname_rejected() {
        let mut config = LensConfig::for_tests();
        config.service.hostname = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_jetstream_url_rejected() {
        let mut config = LensConfig::for_tests();
        config.ingest.jetstream_url = "ftp://nope".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_index_workers_rejected() {
        let mut config = LensConfig::for_tests();
        config.queue.index_workers = 0;
        assert!(config.validate().is_err());
    }
}
