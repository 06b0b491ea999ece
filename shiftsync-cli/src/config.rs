use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shiftsync::PortalConfig;
use shiftsync::driver::webdriver::DEFAULT_WEBDRIVER_URL;

/// Settings file for the CLI, stored as TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// WebDriver server the browser sessions are opened on.
    pub webdriver_url: String,
    pub headless: bool,
    /// Directory of the on-disk session store.
    pub session_dir: Option<PathBuf>,
    pub portal: PortalConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_string(),
            headless: true,
            session_dir: None,
            portal: PortalConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("shiftsync").join("config.toml"))
    }

    /// Load from `path`, or the default location. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path(),
        };

        let config = match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                toml::from_str::<AppConfig>(&content)
                    .with_context(|| format!("failed to parse {}", path.display()))?
            }
            _ => AppConfig::default(),
        };

        config.portal.validate().context("invalid portal configuration")?;
        Ok(config)
    }

    pub fn session_dir(&self) -> PathBuf {
        self.session_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .map(|dir| dir.join("shiftsync").join("sessions"))
                .unwrap_or_else(|| PathBuf::from("sessions"))
        })
    }

    pub fn show(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration")
    }
}
