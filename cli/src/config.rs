// Configuration management for the FarLink CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/farlink/config.json (via dirs)
// - Linux: ~/.config/farlink/config.json
// - Windows: %APPDATA%\farlink\config.json

use anyhow::{Context, Result};
use farlink_core::{NodeConfig, NodeRole};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// This node's mesh identifier
    pub node_id: String,

    /// Network passphrase the shared key derives from
    pub passphrase: String,

    /// leaf or gateway
    pub role: NodeRole,

    /// UDP mesh port (LAN transport)
    pub udp_port: u16,

    /// Radio poll timeout in milliseconds
    pub poll_timeout_ms: u64,

    /// Announce-reply jitter window in milliseconds
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: String::new(), // set on first start
            passphrase: "password".to_string(),
            role: NodeRole::Leaf,
            udp_port: 47800,
            poll_timeout_ms: 1000,
            jitter_min_ms: 100,
            jitter_max_ms: 3000,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("farlink");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;

        if config_file.exists() {
            let contents =
                std::fs::read_to_string(&config_file).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let config_file = Self::config_file()?;
        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_file, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "node_id" => self.node_id = value.to_string(),
            "passphrase" => self.passphrase = value.to_string(),
            "role" => {
                self.role = match value {
                    "leaf" => NodeRole::Leaf,
                    "gateway" => NodeRole::Gateway,
                    other => anyhow::bail!("Unknown role: {} (use leaf or gateway)", other),
                }
            }
            "udp_port" => self.udp_port = value.parse().context("Invalid port number")?,
            "poll_timeout_ms" => {
                self.poll_timeout_ms = value.parse().context("Invalid number")?
            }
            "jitter_min_ms" => self.jitter_min_ms = value.parse().context("Invalid number")?,
            "jitter_max_ms" => self.jitter_max_ms = value.parse().context("Invalid number")?,
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        self.save()?;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "node_id" => Some(self.node_id.clone()),
            "passphrase" => Some("(hidden)".to_string()),
            "role" => Some(self.role.to_string()),
            "udp_port" => Some(self.udp_port.to_string()),
            "poll_timeout_ms" => Some(self.poll_timeout_ms.to_string()),
            "jitter_min_ms" => Some(self.jitter_min_ms.to_string()),
            "jitter_max_ms" => Some(self.jitter_max_ms.to_string()),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        [
            "node_id",
            "role",
            "udp_port",
            "poll_timeout_ms",
            "jitter_min_ms",
            "jitter_max_ms",
        ]
        .iter()
        .map(|key| (key.to_string(), self.get(key).unwrap_or_default()))
        .collect()
    }

    /// Build the core node configuration.
    pub fn to_node_config(&self) -> NodeConfig {
        let mut node = NodeConfig::new(&self.node_id, &self.passphrase, self.role);
        node.poll_timeout_ms = self.poll_timeout_ms;
        node.jitter_min_ms = self.jitter_min_ms;
        node.jitter_max_ms = self.jitter_max_ms;
        node
    }
}
