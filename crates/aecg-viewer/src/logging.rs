//! env_logger setup, optionally driven by a TOML file given with `--logconffile`.

use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use log::LevelFilter;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

const DEFAULT_FILTER: &str = "info";
const DEFAULT_LOG_FILE: &str = "aecgviewer.log";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    #[default]
    Stderr,
    Stdout,
    File,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Default filter, in `RUST_LOG` syntax
    pub level: String,
    pub target: LogTarget,
    pub file: Option<PathBuf>,
    /// Per-module levels
    pub modules: BTreeMap<String, String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_FILTER.to_string(),
            target: LogTarget::Stderr,
            file: None,
            modules: BTreeMap::new(),
        }
    }
}

impl LogConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading logging configuration {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing logging configuration {}", path.display()))
    }

    /// Module filters parsed into levels.
    pub fn module_levels(&self) -> Result<Vec<(String, LevelFilter)>> {
        self.modules
            .iter()
            .map(|(module, level)| {
                level
                    .parse::<LevelFilter>()
                    .map(|level| (module.clone(), level))
                    .with_context(|| format!("invalid level '{level}' for module {module}"))
            })
            .collect()
    }

    pub fn builder(&self) -> Result<Builder> {
        let mut builder = Builder::new();
        builder.parse_filters(&self.level);
        for (module, level) in self.module_levels()? {
            builder.filter_module(&module, level);
        }
        match self.target {
            LogTarget::Stderr => {
                builder.target(Target::Stderr);
            }
            LogTarget::Stdout => {
                builder.target(Target::Stdout);
            }
            LogTarget::File => {
                let path = self
                    .file
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE));
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .with_context(|| format!("opening log file {}", path.display()))?;
                builder.target(Target::Pipe(Box::new(file)));
            }
        }
        builder.format_timestamp_millis();
        Ok(builder)
    }
}

/// Install the global logger. Without a configuration file `RUST_LOG` is
/// honoured with an `info` default.
pub fn init(config: Option<&Path>) -> Result<()> {
    let mut builder = match config {
        Some(path) => LogConfig::from_file(path)?.builder()?,
        None => Builder::from_env(Env::default().default_filter_or(DEFAULT_FILTER)),
    };
    builder.try_init().context("installing logger")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reads_workspace_configuration() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../test_data/logging.toml");
        let config = LogConfig::from_file(&path).unwrap();
        assert_eq!(config.level, "info");
        assert_eq!(config.target, LogTarget::Stderr);
        let levels = config.module_levels().unwrap();
        assert_eq!(
            levels,
            vec![
                ("aecg_lib".to_string(), LevelFilter::Debug),
                ("aecgviewer".to_string(), LevelFilter::Debug),
            ]
        );
        assert!(config.builder().is_ok());
    }

    #[test]
    fn missing_keys_use_defaults() {
        let config: LogConfig = toml::from_str("").unwrap();
        assert_eq!(config, LogConfig::default());
    }

    #[test]
    fn rejects_bad_levels_and_keys() {
        let config: LogConfig = toml::from_str("[modules]\naecg_lib = \"loud\"").unwrap();
        assert!(config.module_levels().is_err());
        assert!(toml::from_str::<LogConfig>("colour = true").is_err());
        assert!(toml::from_str::<LogConfig>("target = \"syslog\"").is_err());
    }

    #[test]
    fn file_target_creates_log_file() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("viewer.log");
        let config = LogConfig {
            target: LogTarget::File,
            file: Some(log_path.clone()),
            ..Default::default()
        };
        config.builder().unwrap();
        assert!(log_path.is_file());
    }
}
