//! Configuration for evac-daemon

use evac_graph::{PathfindingConfig, DEFAULT_DEDUP_TOLERANCE};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Queue names
    #[serde(default)]
    pub queues: QueueConfig,

    /// Route computation settings
    #[serde(default)]
    pub pathfinding: PathfindingConfig,

    /// Current-event context
    #[serde(default)]
    pub event_state: EventStateConfig,

    /// Graph cache settings
    #[serde(default)]
    pub graph: GraphConfig,

    /// Danger rule table
    #[serde(default)]
    pub rules: RulesConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage, optionally seeded from a JSON map file
    Memory {
        #[serde(default)]
        seed: Option<PathBuf>,
    },

    /// PostgreSQL storage
    Postgres {
        /// Connection URL
        url: String,

        /// Maximum connections in pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,

        /// Connection timeout in seconds
        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory { seed: None }
    }
}

/// Queue names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Inbound hazard alerts
    pub alerts: String,
    /// Inbound danger reports
    pub danger_reports: String,
    /// Routes-ready signals, published by the coordinator and relayed
    pub routes_ready: String,
    /// Per-user evacuation notices
    pub alerted_users: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            alerts: "alert_queue".to_string(),
            danger_reports: "map_manager_queue".to_string(),
            routes_ready: "evacuation_paths_queue".to_string(),
            alerted_users: "alerted_users_queue".to_string(),
        }
    }
}

/// Current-event context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStateConfig {
    /// Age beyond which the current event is not used for unlabelled reports
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
}

impl EventStateConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for EventStateConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
        }
    }
}

/// Graph cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Coordinate tolerance for node deduplication
    #[serde(default = "default_dedup_tolerance")]
    pub dedup_tolerance: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            dedup_tolerance: default_dedup_tolerance(),
        }
    }
}

/// Danger rule table location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default = "default_rules_path")]
    pub path: PathBuf,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: default_rules_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_ttl() -> u64 {
    300
}

fn default_dedup_tolerance() -> f64 {
    DEFAULT_DEDUP_TOLERANCE
}

fn default_rules_path() -> PathBuf {
    PathBuf::from("config/alerts.yaml")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then `EVAC_*`
    /// environment variables (`EVAC_EVENT_STATE__TTL_SECS=60`)
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("EVAC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
