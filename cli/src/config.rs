//! TOML configuration for the command-line client.

use std::path::{Path, PathBuf};

use anyhow::Context;
use ragbridge_bridge::BridgeConfig;
use ragbridge_embeddings::EmbeddingConfig;
use ragbridge_rag::RagConfig;
use ragbridge_vector_store::VectorStoreConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

const APP_DIR: &str = "ragbridge";

/// Every section is optional; missing ones take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub bridge: BridgeConfig,
    pub embedding: EmbeddingConfig,
    pub vector_store: VectorStoreConfig,
    pub rag: RagConfig,

    /// Where conversations are kept between runs.
    pub state_file: Option<PathBuf>,
}

impl CliConfig {
    /// `$XDG_CONFIG_HOME/ragbridge/config.toml` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    /// Load from an explicitly named file, which must exist, or from the
    /// default location when there is one.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => {
                    debug!("No configuration file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = toml::from_str(&text)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_file.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_DIR)
                .join("state.json")
        })
    }
}
