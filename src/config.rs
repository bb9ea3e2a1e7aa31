//! Configuration module for the indexing engine.
//!
//! Layered configuration:
//! - Default values
//! - TOML configuration file (`modraven.toml` in the data directory)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `MODRAVEN_` and use double
//! underscores to separate nested levels:
//! - `MODRAVEN_BUILD__POOL_SIZE=8` sets `build.pool_size`
//! - `MODRAVEN_VANILLA_PATH=/games/ck3/game` sets `vanilla_path`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Hard ceiling on the per-parse deadline.
pub const MAX_PARSE_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Root of the store: blobs, catalog, queue, search index, daemon files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Path to the vanilla game directory, if configured.
    #[serde(default)]
    pub vanilla_path: Option<PathBuf>,

    /// Path to the workshop content directory, if configured.
    #[serde(default)]
    pub workshop_path: Option<PathBuf>,

    /// Path to the local mods directory, if configured.
    #[serde(default)]
    pub local_mods_path: Option<PathBuf>,

    /// Build pipeline configuration.
    #[serde(default)]
    pub build: BuildConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BuildConfig {
    /// Number of persistent parse worker processes.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Per-parse deadline in seconds. Clamped to [`MAX_PARSE_TIMEOUT_SECS`].
    #[serde(default = "default_parse_timeout")]
    pub parse_timeout_secs: u64,

    /// Files larger than this are stored but flagged non-parseable.
    #[serde(default = "default_max_parse_bytes")]
    pub max_parse_bytes: u64,

    /// A worker recycles itself after this many parses.
    #[serde(default = "default_max_parses_per_worker")]
    pub max_parses_per_worker: u32,

    /// Queue mutations per durability commit.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Lease age in seconds after which an in-progress task is reclaimed.
    #[serde(default = "default_lease_timeout")]
    pub lease_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default log level: error, warn, info, debug, trace.
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides.
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".modraven")
}

fn default_pool_size() -> usize {
    4
}

fn default_parse_timeout() -> u64 {
    30
}

fn default_max_parse_bytes() -> u64 {
    2_000_000
}

fn default_max_parses_per_worker() -> u32 {
    5_000
}

fn default_batch_size() -> usize {
    500
}

fn default_lease_timeout() -> u64 {
    300
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            data_dir: default_data_dir(),
            vanilla_path: None,
            workshop_path: None,
            local_mods_path: None,
            build: BuildConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            parse_timeout_secs: default_parse_timeout(),
            max_parse_bytes: default_max_parse_bytes(),
            max_parses_per_worker: default_max_parses_per_worker(),
            batch_size: default_batch_size(),
            lease_timeout_secs: default_lease_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load settings: defaults, then `modraven.toml` next to the data dir,
    /// then `MODRAVEN_*` environment overrides.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(default_data_dir().join("modraven.toml"))
    }

    /// Load settings with an explicit config file path.
    pub fn load_from(config_path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        let mut settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path.as_ref()))
            .merge(Env::prefixed("MODRAVEN_").split("__"))
            .extract()?;
        settings.build.parse_timeout_secs =
            settings.build.parse_timeout_secs.min(MAX_PARSE_TIMEOUT_SECS);
        Ok(settings)
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("modraven.toml")
    }

    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join("catalog.json")
    }

    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join("queue.json")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    pub fn search_dir(&self) -> PathBuf {
        self.data_dir.join("search")
    }

    pub fn routing_path(&self) -> PathBuf {
        self.data_dir.join("routing.json")
    }

    pub fn daemon_dir(&self) -> PathBuf {
        self.data_dir.join("daemon")
    }

    pub fn writer_lock_path(&self) -> PathBuf {
        self.daemon_dir().join("writer.lock")
    }

    pub fn pending_refresh_path(&self) -> PathBuf {
        self.daemon_dir().join("pending_refresh.log")
    }

    pub fn stop_sentinel_path(&self) -> PathBuf {
        self.daemon_dir().join("daemon.stop")
    }

    /// Write a commented default configuration file. Returns its path.
    pub fn write_default_config(data_dir: &Path) -> std::io::Result<PathBuf> {
        let path = data_dir.join("modraven.toml");
        std::fs::create_dir_all(data_dir)?;
        let contents = format!(
            r#"# modraven configuration
#
# Any value here can be overridden with MODRAVEN_* environment variables,
# using double underscores for nesting (MODRAVEN_BUILD__POOL_SIZE=8).

version = 1
data_dir = "{}"

# Path to the vanilla game directory.
# vanilla_path = "C:/Program Files (x86)/Steam/steamapps/common/Crusader Kings III/game"

# Steam workshop content directory.
# workshop_path = "C:/Program Files (x86)/Steam/steamapps/workshop/content/1158310"

# Local mods directory.
# local_mods_path = "~/Documents/Paradox Interactive/Crusader Kings III/mod"

[build]
pool_size = 4
parse_timeout_secs = 30
max_parse_bytes = 2000000
max_parses_per_worker = 5000
batch_size = 500

[logging]
default = "warn"

[logging.modules]
# daemon = "debug"
"#,
            data_dir.display()
        );
        std::fs::write(&path, contents)?;
        Ok(path)
    }
}
