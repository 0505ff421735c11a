use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::event_bus::DEFAULT_QUEUE_LIMIT;

/// Name of the settings file inside the config directory
pub const SETTINGS_FILE: &str = "stripsel.json";

/// Default log file name for `--log` without a path
pub const LOG_FILE: &str = "stripsel.log";

/// Configuration for overriding default application paths
#[derive(Debug, Clone)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Create PathConfig from CLI arguments and environment variables
    ///
    /// Priority: CLI args → ENV var (STRIPSEL_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var("STRIPSEL_CONFIG_DIR").ok().map(PathBuf::from));
        Self { config_dir }
    }
}

/// Get path to a configuration or data file
///
/// Priority:
/// 1. CLI --config-dir argument
/// 2. STRIPSEL_CONFIG_DIR environment variable
/// 3. Local folder IF any stripsel files exist there
/// 4. Platform-specific config directory from dirs-next (default)
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    get_config_dir(config).join(name)
}

/// Ensure that the configuration directory exists
pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    let config_dir = get_config_dir(config);
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;
    }
    Ok(())
}

fn has_local_config_files(dir: &Path) -> bool {
    [SETTINGS_FILE, LOG_FILE].iter().any(|f| dir.join(f).exists())
}

fn get_config_dir(config: &PathConfig) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }

    if let Ok(current_dir) = std::env::current_dir() {
        if has_local_config_files(&current_dir) {
            return current_dir;
        }
    }

    if let Some(dir) = dirs_next::config_dir() {
        return dir.join("stripsel");
    }

    PathBuf::from(".")
}

/// Persistent application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Deferred change events kept before the oldest are evicted
    pub event_queue_limit: usize,
    /// Print the final selection as JSON instead of text
    pub output_json: bool,
    /// Console log filter used when no `-v` is given and RUST_LOG is unset
    pub log_level: String,
    /// Prune expired selection entries after each script step
    pub prune_after_ops: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            event_queue_limit: DEFAULT_QUEUE_LIMIT,
            output_json: false,
            log_level: "warn".to_string(),
            prune_after_ops: false,
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid settings file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).with_context(|| format!("Failed to write settings: {}", path.display()))
    }

    /// Log level for the given `-v` count. Verbosity flags win over the setting.
    pub fn effective_log_level(&self, verbosity: u8) -> log::LevelFilter {
        match verbosity {
            0 => self.log_level.parse().unwrap_or_else(|_| {
                eprintln!("Warning: unknown log_level '{}', using warn", self.log_level);
                log::LevelFilter::Warn
            }),
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("stripsel-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_cli_dir_wins() {
        let cfg = PathConfig::from_env_and_cli(Some(PathBuf::from("/tmp/custom")));
        assert_eq!(config_file(SETTINGS_FILE, &cfg), PathBuf::from("/tmp/custom/stripsel.json"));
    }

    #[test]
    fn test_missing_settings_use_defaults() {
        let dir = temp_dir();
        let settings = Settings::load(&dir.join(SETTINGS_FILE)).unwrap();
        assert_eq!(settings, Settings::default());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_settings_roundtrip_with_partial_file() {
        let dir = temp_dir();
        let path = dir.join(SETTINGS_FILE);
        std::fs::write(&path, r#"{ "output_json": true }"#).unwrap();

        let mut settings = Settings::load(&path).unwrap();
        assert!(settings.output_json);
        assert_eq!(settings.event_queue_limit, DEFAULT_QUEUE_LIMIT);
        assert_eq!(settings.log_level, "warn");

        settings.event_queue_limit = 16;
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap().event_queue_limit, 16);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_invalid_settings_report_path() {
        let dir = temp_dir();
        let path = dir.join(SETTINGS_FILE);
        std::fs::write(&path, "not json").unwrap();
        let err = Settings::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid settings file"));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_log_level_setting_applies_without_verbosity() {
        let settings = Settings { log_level: "debug".to_string(), ..Settings::default() };
        assert_eq!(settings.effective_log_level(0), log::LevelFilter::Debug);
        assert_eq!(settings.effective_log_level(1), log::LevelFilter::Info);
        assert_eq!(settings.effective_log_level(3), log::LevelFilter::Trace);

        let bogus = Settings { log_level: "loud".to_string(), ..Settings::default() };
        assert_eq!(bogus.effective_log_level(0), log::LevelFilter::Warn);
        assert_eq!(Settings::default().effective_log_level(0), log::LevelFilter::Warn);
    }
}
