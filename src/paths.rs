use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "FRAMEPIPE_CONFIG_DIR";

/// Configuration for overriding default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Create PathConfig from CLI arguments and environment variables
    ///
    /// Priority: CLI args → ENV var (FRAMEPIPE_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from));

        Self { config_dir }
    }
}

/// Get path to a configuration file
///
/// Priority:
/// 1. CLI --config-dir argument
/// 2. FRAMEPIPE_CONFIG_DIR environment variable
/// 3. Local folder IF framepipe.json exists there
/// 4. Platform-specific config directory from dirs-next (default)
///
/// Platform paths:
/// - Linux: ~/.config/framepipe/{name}
/// - macOS: ~/Library/Application Support/framepipe/{name}
/// - Windows: %APPDATA%\framepipe\{name}
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    get_config_dir(config).join(name)
}

/// Ensure that the configuration directory exists
pub fn ensure_config_dir(config: &PathConfig) -> Result<PathBuf> {
    let dir = get_config_dir(config);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
    }
    Ok(dir)
}

fn has_local_config(dir: &Path) -> bool {
    dir.join(crate::config::CONFIG_FILE_NAME).exists()
}

fn get_config_dir(config: &PathConfig) -> PathBuf {
    // Priority 1: Custom directory from CLI or ENV
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }

    // Priority 2: Local folder IF a config file exists there
    if let Ok(current_dir) = std::env::current_dir()
        && has_local_config(&current_dir)
    {
        return current_dir;
    }

    // Priority 3: Platform-specific config directory
    if let Some(dir) = dirs_next::config_dir() {
        return dir.join("framepipe");
    }

    PathBuf::from(".")
}
