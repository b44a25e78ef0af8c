//! Configuration management for the data coordinator
//!
//! Sources, from lowest to highest precedence:
//! - Hardcoded defaults
//! - `/etc/datacoord/datacoord.*` and `./config/datacoord.*`
//! - The file named by `DATACOORD_CONFIG`
//! - Environment variables (`DATACOORD_COMPACTION__TIMEOUT_SECS=300`)

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DataCoordConfig {
    #[serde(default)]
    pub common: CommonConfig,

    #[serde(default)]
    pub segment: SegmentConfig,

    #[serde(default)]
    pub compaction: CompactionConfig,

    #[serde(default)]
    pub handler: HandlerConfig,
}

impl DataCoordConfig {
    /// Load configuration from all sources, then validate it.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        builder = Self::set_defaults(builder)?;

        builder = builder
            .add_source(File::with_name("/etc/datacoord/datacoord").required(false))
            .add_source(File::with_name("./config/datacoord").required(false));

        if let Ok(config_path) = std::env::var("DATACOORD_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("DATACOORD")
                .separator("__")
                .try_parsing(true),
        );

        let config: DataCoordConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: DataCoordConfig = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML document layered over the defaults
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: DataCoordConfig = Self::set_defaults(Config::builder())?
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        let common = CommonConfig::default();
        let segment = SegmentConfig::default();
        let compaction = CompactionConfig::default();
        let handler = HandlerConfig::default();

        builder
            .set_default("common.retention_duration_secs", common.retention_duration_secs)?
            .set_default("segment.disk_max_size_mb", segment.disk_max_size_mb)?
            .set_default("segment.small_proportion", segment.small_proportion)?
            .set_default("segment.compactable_proportion", segment.compactable_proportion)?
            .set_default("compaction.enable_auto_compaction", compaction.enable_auto_compaction)?
            .set_default("compaction.global_interval_secs", compaction.global_interval_secs)?
            .set_default("compaction.timeout_secs", compaction.timeout_secs)?
            .set_default("compaction.max_segments_to_merge", compaction.max_segments_to_merge as u64)?
            .set_default("compaction.min_segments_to_merge", compaction.min_segments_to_merge as u64)?
            .set_default("compaction.binlog_max_num", compaction.binlog_max_num as u64)?
            .set_default("compaction.expired_log_max_size", compaction.expired_log_max_size)?
            .set_default("compaction.delete_ratio_threshold", compaction.delete_ratio_threshold)?
            .set_default(
                "compaction.deleted_rows_ratio_threshold",
                compaction.deleted_rows_ratio_threshold,
            )?
            .set_default("compaction.signal_buffer", compaction.signal_buffer as u64)?
            .set_default("handler.max_parallel_tasks", handler.max_parallel_tasks as u64)?
            .set_default("handler.node_parallelism", handler.node_parallelism as u64)?
            .set_default("handler.update_interval_ms", handler.update_interval_ms)?
            .set_default("handler.task_retention_secs", handler.task_retention_secs)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segment.disk_max_size_mb <= 0 {
            return Err(ConfigError::Message(
                "segment.disk_max_size_mb must be > 0".to_string(),
            ));
        }

        for (name, value) in [
            ("segment.small_proportion", self.segment.small_proportion),
            ("segment.compactable_proportion", self.segment.compactable_proportion),
            ("compaction.delete_ratio_threshold", self.compaction.delete_ratio_threshold),
            (
                "compaction.deleted_rows_ratio_threshold",
                self.compaction.deleted_rows_ratio_threshold,
            ),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Message(format!("{name} must be in (0, 1]")));
            }
        }

        if self.compaction.min_segments_to_merge < 2 {
            return Err(ConfigError::Message(
                "compaction.min_segments_to_merge must be >= 2".to_string(),
            ));
        }

        if self.compaction.max_segments_to_merge < self.compaction.min_segments_to_merge {
            return Err(ConfigError::Message(
                "compaction.max_segments_to_merge must be >= min_segments_to_merge".to_string(),
            ));
        }

        if self.compaction.global_interval_secs == 0 || self.compaction.signal_buffer == 0 {
            return Err(ConfigError::Message(
                "compaction.global_interval_secs and compaction.signal_buffer must be > 0"
                    .to_string(),
            ));
        }

        if self.handler.max_parallel_tasks == 0 || self.handler.node_parallelism == 0 {
            return Err(ConfigError::Message(
                "handler.max_parallel_tasks and handler.node_parallelism must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Settings shared across coordinator components
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommonConfig {
    /// How long deleted data stays visible to time-travel reads (default: 5 days)
    pub retention_duration_secs: u64,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            retention_duration_secs: 432_000,
        }
    }
}

impl CommonConfig {
    pub fn retention_duration(&self) -> Duration {
        Duration::from_secs(self.retention_duration_secs)
    }
}

/// Segment sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SegmentConfig {
    /// Target segment size in MiB for collections with an on-disk index
    pub disk_max_size_mb: i64,

    /// Segments below this share of their capacity count as small
    pub small_proportion: f64,

    /// Share of capacity a merge of small segments must exceed to be worth it
    pub compactable_proportion: f64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            disk_max_size_mb: 2048,
            small_proportion: 0.5,
            compactable_proportion: 0.5,
        }
    }
}

/// Compaction trigger settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompactionConfig {
    /// Run the periodic sweep
    pub enable_auto_compaction: bool,

    /// Interval between periodic sweeps
    pub global_interval_secs: u64,

    /// Execution deadline stamped on every plan
    pub timeout_secs: i32,

    /// Maximum segments in one plan
    pub max_segments_to_merge: usize,

    /// Minimum segments for a merge of small segments
    pub min_segments_to_merge: usize,

    /// Binlog file count that forces a single-segment compaction
    pub binlog_max_num: usize,

    /// Expired bytes that justify a single-segment compaction
    pub expired_log_max_size: i64,

    /// Deleted bytes over insert bytes that justify a rewrite
    pub delete_ratio_threshold: f64,

    /// Deleted rows over total rows that justify a rewrite
    pub deleted_rows_ratio_threshold: f64,

    /// Capacity of the trigger's signal inbox
    pub signal_buffer: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enable_auto_compaction: true,
            global_interval_secs: 60,
            timeout_secs: 180,
            max_segments_to_merge: 30,
            min_segments_to_merge: 3,
            binlog_max_num: 5000,
            expired_log_max_size: 10 * 1024 * 1024,
            delete_ratio_threshold: 0.1,
            deleted_rows_ratio_threshold: 0.2,
            signal_buffer: 100,
        }
    }
}

impl CompactionConfig {
    pub fn global_interval(&self) -> Duration {
        Duration::from_secs(self.global_interval_secs)
    }
}

/// Execution handler settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HandlerConfig {
    /// Executing tasks at which the handler reports itself full
    pub max_parallel_tasks: usize,

    /// Plans dispatched concurrently to one compute node
    pub node_parallelism: usize,

    /// Interval of the state housekeeping pass
    pub update_interval_ms: u64,

    /// Completed and failed tasks are forgotten this long after they started
    pub task_retention_secs: u64,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 100,
            node_parallelism: 4,
            update_interval_ms: 2000,
            task_retention_secs: 3600,
        }
    }
}

impl HandlerConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }
}
