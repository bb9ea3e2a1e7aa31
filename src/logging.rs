//! Logging for the engine and daemon.
//!
//! The `[logging]` config section sets a default level and per-module
//! overrides; `RUST_LOG` takes precedence over both:
//!
//! ```bash
//! RUST_LOG=debug modraven start
//! RUST_LOG=daemon=debug,pool=trace modraven start
//! ```
//!
//! tantivy's segment-merge chatter and the directory walker are held at
//! `warn` unless a module override asks for them, so a `default = "info"`
//! daemon log stays about ingests, tasks, and conflicts.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

/// Dependencies whose info-level output drowns the daemon's own logs.
const QUIET_DEPS: &[&str] = &["tantivy", "ignore"];

/// `MM-DD HH:MM:SS.mmm` — the daemon runs for days, so the date matters;
/// the year does not.
struct DaemonTime;

impl FormatTime for DaemonTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%m-%d %H:%M:%S%.3f"))
    }
}

/// The directive string fed to the env filter when `RUST_LOG` is unset.
fn filter_spec(config: &LoggingConfig) -> String {
    let mut spec = config.default.clone();
    for dep in QUIET_DEPS {
        if !config.modules.contains_key(*dep) {
            spec.push_str(&format!(",{dep}=warn"));
        }
    }
    for (module, level) in &config.modules {
        spec.push_str(&format!(",{module}={level}"));
    }
    spec
}

/// Initialize logging with configuration.
///
/// Call at startup. Repeat calls are no-ops: a subscriber that is already
/// installed stays installed.
pub fn init_with_config(config: &LoggingConfig) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(filter_spec(config))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(DaemonTime)
        .with_target(true)
        .try_init();
}

/// Initialize logging with default configuration (quiet, `warn`).
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noisy_deps_are_quieted_by_default() {
        let config = LoggingConfig {
            default: "info".to_string(),
            modules: std::collections::HashMap::new(),
        };
        let spec = filter_spec(&config);
        assert!(spec.starts_with("info"));
        assert!(spec.contains("tantivy=warn"));
        assert!(spec.contains("ignore=warn"));
    }

    #[test]
    fn module_overrides_win_over_quieting() {
        let mut modules = std::collections::HashMap::new();
        modules.insert("tantivy".to_string(), "debug".to_string());
        modules.insert("daemon".to_string(), "trace".to_string());
        let config = LoggingConfig {
            default: "warn".to_string(),
            modules,
        };
        let spec = filter_spec(&config);
        assert!(spec.contains("tantivy=debug"));
        assert!(!spec.contains("tantivy=warn"));
        assert!(spec.contains("daemon=trace"));
    }
}
