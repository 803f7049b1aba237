//! Server configuration
//!
//! Loaded from `brainmap.toml` at startup; falls back to defaults if the file
//! is missing or unparsable. The `[ai]` section is rewritten at runtime when
//! a client sends UPDATE_AI_CONFIG.

use brainmap_agent::SchedulerConfig;
use brainmap_core::{AiConfig, MergePolicy, NodeStatus};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "brainmap.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainmapConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub scheduler: SchedulerSection,
    pub ai: AiConfig,
}

/// Bind mode for the server
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    Loopback,
    #[default]
    Lan,
}

impl BindMode {
    pub fn to_addr(&self) -> &str {
        match self {
            BindMode::Loopback => "127.0.0.1",
            BindMode::Lan => "0.0.0.0",
        }
    }

    /// Lenient CLI parsing; anything unrecognised binds to the LAN.
    pub fn parse(s: &str) -> Self {
        match s {
            "loopback" | "localhost" | "127.0.0.1" => BindMode::Loopback,
            _ => BindMode::Lan,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: BindMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// One `<name>.json` per graph.
    pub data_dir: PathBuf,
    /// Graph opened at startup.
    pub default_graph: String,
    /// Quiet period before a burst of changes is written.
    pub save_debounce_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub tick_ms: u64,
    /// Status of concepts the agent creates: "accepted" or "proposed".
    pub new_node_status: NodeStatus,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            bind: BindMode::Lan,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            default_graph: "default".into(),
            save_debounce_ms: 1000,
        }
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            new_node_status: NodeStatus::Accepted,
        }
    }
}

impl BrainmapConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {}. Using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        std::fs::write(path, self.to_toml())?;
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick: Duration::from_millis(self.scheduler.tick_ms.max(1)),
            merge_policy: MergePolicy {
                new_node_status: self.scheduler.new_node_status,
            },
        }
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.storage.save_debounce_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.bind.to_addr(), self.server.port)
    }
}
