use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure for the intent workflow host
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IntentWorkflowConfig {
    /// Observability settings
    pub observability: ObservabilityConfig,
    /// Where workflow records, approvals and pending emissions live
    pub storage: StorageConfig,
    /// Outbound job queue
    pub job_queue: JobQueueConfig,
    /// Boundary event retry policy
    pub emitter: EmitterConfig,
    /// Gate timeouts and fail-open quota
    pub gates: GateConfig,
    /// Database settings (optional, used by the sqlite backend)
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level, overridden by RUST_LOG
    pub log_level: String,
    /// Emit JSON lines instead of human-readable logs
    pub json_logs: bool,
    /// Log metric counters on shutdown
    pub metrics_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// JSON file used by the file backend
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JobQueueConfig {
    /// Event API base URL. Without one, events wait for `reconcile`.
    pub base_url: Option<String>,
    /// Event key (can be set via env var)
    pub event_key: Option<String>,
    /// Per-request timeout
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EmitterConfig {
    /// Total sends per event, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    /// Replays before a pending emission is left for a human
    pub max_replays: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GateConfig {
    /// Read budget for the ICP completion gate
    pub icp_read_timeout_ms: u64,
    /// Fail-open grants per minute; 0 means the gate always fails closed
    pub icp_fail_open_per_minute: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (SQLite file path or connection string)
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
            jitter: true,
            max_replays: 10,
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            icp_read_timeout_ms: 50,
            icp_fail_open_per_minute: 30,
        }
    }
}

impl Default for IntentWorkflowConfig {
    fn default() -> Self {
        Self {
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: true,
                metrics_enabled: true,
            },
            storage: StorageConfig {
                backend: StorageBackend::File,
                path: PathBuf::from(".intent-workflow/workflows.json"),
            },
            job_queue: JobQueueConfig {
                base_url: None,
                event_key: None, // Will be read from env var
                request_timeout_ms: 5_000,
            },
            emitter: EmitterConfig::default(),
            gates: GateConfig::default(),
            database: Some(DatabaseConfig {
                url: "sqlite://.intent-workflow/intent-workflow.db".to_string(),
                max_connections: 5,
                auto_migrate: true,
            }),
        }
    }
}

impl IntentWorkflowConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (intent-workflow.toml, .intent-workflow-rc)
    /// 3. Environment variables (INTENT_WORKFLOW_SECTION__KEY)
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like [`load`](Self::load), with an explicit file layered above the
    /// default file locations.
    pub fn load_from(explicit: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if Path::new("intent-workflow.toml").exists() {
            builder = builder.add_source(File::with_name("intent-workflow"));
        }

        if Path::new(".intent-workflow-rc").exists() {
            builder = builder.add_source(
                File::with_name(".intent-workflow-rc").format(config::FileFormat::Toml),
            );
        }

        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("INTENT_WORKFLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut intent_config: IntentWorkflowConfig = builder.build()?.try_deserialize()?;

        // The event key is commonly provisioned under the provider's own name
        if intent_config.job_queue.event_key.is_none() {
            if let Ok(key) = std::env::var("INNGEST_EVENT_KEY") {
                intent_config.job_queue.event_key = Some(key);
            }
        }

        Ok(intent_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists. `Ok(false)` when there is none.
    pub fn load_env_file() -> Result<bool> {
        if !Path::new(".env").exists() {
            return Ok(false);
        }
        dotenvy::dotenv()?;
        Ok(true)
    }
}
