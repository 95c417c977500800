// Configuration management for the meshsim CLI
//
// Stored as JSON in:
// - macOS: ~/Library/Application Support/meshsim/config.json
// - Linux: ~/.config/meshsim/config.json
// - Windows: %APPDATA%\meshsim\config.json
//
// `--config <path>` points at a different file.

use anyhow::{Context, Result};
use meshsim_core::{DiscoveryRule, SimConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default tracing filter when RUST_LOG is unset
    pub log_level: String,

    /// Seconds `run` lets the mesh converge before and after sending messages
    pub settle_secs: u64,

    /// Simulation settings handed to the core
    pub sim: SimConfig,

    #[serde(skip)]
    path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            settle_secs: 45,
            sim: SimConfig::default(),
            path: PathBuf::new(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("meshsim");
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        Ok(config_dir)
    }

    /// Default config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load from `path` (or the default location), creating defaults on first use
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_file()?,
        };

        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let mut config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config.path = path;
            Ok(config)
        } else {
            let config = Config {
                path,
                ..Default::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("Failed to create config directory")?;
            }
        }
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&self.path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value and persist it
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "log_level" => self.log_level = value.to_string(),
            "settle_secs" => self.settle_secs = value.parse().context("Invalid number")?,
            "inbox_interval_ms" => {
                self.sim.inbox_interval_ms = value.parse().context("Invalid number")?
            }
            "refresh_interval_ms" => {
                self.sim.refresh_interval_ms = value.parse().context("Invalid number")?
            }
            "walk_interval_ms" => {
                self.sim.walk_interval_ms = value.parse().context("Invalid number")?
            }
            "walk_enabled" => {
                self.sim.walk_enabled = value.parse().context("Invalid boolean value")?
            }
            "handshake_deadline_ms" => {
                self.sim.handshake_deadline_ms = value.parse().context("Invalid number")?
            }
            "grid_max" => self.sim.grid_max = value.parse().context("Invalid number")?,
            "walk_step" => self.sim.walk_step = value.parse().context("Invalid number")?,
            "discovery" => self.sim.discovery = value.parse::<DiscoveryRule>()?,
            "link_quality_max" => {
                self.sim.link_quality_max = value.parse().context("Invalid number")?
            }
            "seed" => {
                self.sim.seed = if value.is_empty() || value == "none" {
                    None
                } else {
                    Some(value.parse().context("Invalid seed")?)
                };
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        self.sim.validate()?;
        self.save()?;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// All config values, in display order
    pub fn list(&self) -> Vec<(String, String)> {
        let sim = &self.sim;
        vec![
            ("log_level".to_string(), self.log_level.clone()),
            ("settle_secs".to_string(), self.settle_secs.to_string()),
            ("inbox_interval_ms".to_string(), sim.inbox_interval_ms.to_string()),
            ("refresh_interval_ms".to_string(), sim.refresh_interval_ms.to_string()),
            ("walk_interval_ms".to_string(), sim.walk_interval_ms.to_string()),
            ("walk_enabled".to_string(), sim.walk_enabled.to_string()),
            ("handshake_deadline_ms".to_string(), sim.handshake_deadline_ms.to_string()),
            ("grid_max".to_string(), sim.grid_max.to_string()),
            ("walk_step".to_string(), sim.walk_step.to_string()),
            ("discovery".to_string(), sim.discovery.to_string()),
            ("link_quality_max".to_string(), sim.link_quality_max.to_string()),
            (
                "seed".to_string(),
                sim.seed.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string()),
            ),
        ]
    }
}
