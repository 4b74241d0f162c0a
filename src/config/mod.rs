use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

/// Environment variable overriding `hot_reload.extensions_path`.
pub const EXTENSIONS_PATH_ENV: &str = "RELATIVE_EXTENSIONS_PATH";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub hot_reload: HotReloadConfig,
}

/// Hot reload configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct HotReloadConfig {
    /// Directory watched recursively, relative to the working directory
    pub watch_root: String,
    /// Where extension sources live; enumerated at startup
    pub extensions_path: String,
    /// Suffix identifying source units
    pub source_suffix: String,
    /// Function an extension must define to be loadable
    pub entry_point: String,
    /// Quiet period before a batch of changes is handed over
    pub debounce_ms: u64,
    /// Load every extension under `extensions_path` at startup
    pub load_on_startup: bool,
    /// Directory names never reported by the watcher
    pub ignore_dirs: Vec<String>,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            watch_root: ".".to_string(),
            extensions_path: "src/cogs/".to_string(),
            source_suffix: ".lua".to_string(),
            entry_point: "setup".to_string(),
            debounce_ms: 50,
            load_on_startup: true,
            ignore_dirs: [".git", ".hg", ".svn", "target", "node_modules", ".idea", ".vscode"]
                .iter()
                .map(|d| d.to_string())
                .collect(),
        }
    }
}

impl Config {
    pub async fn load(path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(path);
        info!("📄 Reading config from: {}", expanded_path);

        let content = fs::read_to_string(expanded_path.as_ref())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", expanded_path, e))?;

        let config = Self::from_toml(&content)?;
        debug!(
            "📋 Config loaded: extensions in '{}', suffix '{}'",
            config.hot_reload.extensions_path, config.hot_reload.source_suffix
        );

        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub async fn load_or_default(path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(path);
        if Path::new(expanded_path.as_ref()).exists() {
            Self::load(path).await
        } else {
            info!("📋 No config file at '{}', using defaults", expanded_path);
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RELATIVE_EXTENSIONS_PATH` if it is set.
    pub fn apply_env(&mut self) {
        self.apply_extensions_path_override(std::env::var(EXTENSIONS_PATH_ENV).ok());
    }

    fn apply_extensions_path_override(&mut self, value: Option<String>) {
        if let Some(path) = value.filter(|p| !p.is_empty()) {
            info!("📋 Extensions path overridden by {}: {}", EXTENSIONS_PATH_ENV, path);
            self.hot_reload.extensions_path = path;
        }
    }

    fn validate(&self) -> Result<()> {
        let hr = &self.hot_reload;
        if hr.source_suffix.is_empty() {
            anyhow::bail!("hot_reload.source_suffix must not be empty");
        }
        if hr.entry_point.trim().is_empty() {
            anyhow::bail!("hot_reload.entry_point must not be empty");
        }
        let mut chars = hr.entry_point.chars();
        let is_name = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !is_name {
            anyhow::bail!(
                "hot_reload.entry_point must be a plain Lua name, got '{}'",
                hr.entry_point
            );
        }
        Ok(())
    }
}
