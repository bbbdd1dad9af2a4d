use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SPARK_ADDR: &str = "127.0.0.1:9999";
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;
/// Offset after the wall-clock hour at which triggers start.
pub const DEFAULT_GRACE_SECS: u64 = 300;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const HOUR_MS: u64 = 60 * 60 * 1000;

/// Top-level config (tweetlens.toml + TWEETLENS_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TweetlensConfig {
    #[serde(default)]
    pub spark: SparkConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Where the compute engine listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparkConfig {
    #[serde(default = "default_spark_addr")]
    pub addr: String,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
}

impl Default for SparkConfig {
    fn default() -> Self {
        Self {
            addr: default_spark_addr(),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl DatabaseConfig {
    /// Create the directory that will hold the database file.
    pub fn ensure_parent_dir(&self) -> crate::Result<()> {
        match std::path::Path::new(&self.path).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                std::fs::create_dir_all(parent)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Defer the first trigger start to the next full hour plus `grace_secs`.
    #[serde(default = "bool_true")]
    pub align_to_hour: bool,
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// Pending jobs older than this are dropped as orphans. 0 disables expiry.
    #[serde(default)]
    pub orphan_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_triggers")]
    pub triggers: Vec<TriggerConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            align_to_hour: true,
            grace_secs: DEFAULT_GRACE_SECS,
            orphan_ttl_secs: 0,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            triggers: default_triggers(),
        }
    }
}

/// One recurring job declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Job-type name; must match a registered job type.
    pub job: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
    pub period_ms: u64,
    /// `-1` repeats forever, `N > 0` stops after N fires.
    #[serde(default = "default_repeat")]
    pub repeat: i64,
    /// Windows of historical lookback requested from the engine.
    #[serde(default = "default_time_offset")]
    pub time_offset: i64,
}

impl TriggerConfig {
    pub fn hourly(job: &str, params: Vec<serde_json::Value>) -> Self {
        Self {
            job: job.to_string(),
            params,
            period_ms: HOUR_MS,
            repeat: default_repeat(),
            time_offset: default_time_offset(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_spark_addr() -> String {
    DEFAULT_SPARK_ADDR.to_string()
}
fn default_connect_attempts() -> u32 {
    DEFAULT_CONNECT_ATTEMPTS
}
fn default_grace_secs() -> u64 {
    DEFAULT_GRACE_SECS
}
fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}
fn default_repeat() -> i64 {
    -1
}
fn default_time_offset() -> i64 {
    -1
}
fn default_triggers() -> Vec<TriggerConfig> {
    vec![
        TriggerConfig::hourly("TopHashtagJob", vec![serde_json::json!(10)]),
        TriggerConfig::hourly("LanguageDistributionJob", Vec::new()),
        TriggerConfig::hourly("OriginTweetsJob", Vec::new()),
    ]
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tweetlens/results.db", home)
}

impl TweetlensConfig {
    /// Load config from a TOML file with TWEETLENS_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.tweetlens/tweetlens.toml
    ///
    /// Nested env keys use a double underscore: `TWEETLENS_SPARK__ADDR`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("TWEETLENS_").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> crate::error::Result<Self> {
        figment
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tweetlens/tweetlens.toml", home)
}
