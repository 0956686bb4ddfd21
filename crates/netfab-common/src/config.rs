//! Fabricator configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NetfabError, NetfabResult};

/// Longest interface name Linux accepts (`IFNAMSIZ - 1`).
pub const MAX_IFNAME_LEN: usize = 15;

/// Configuration shared by the fabricator and the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    /// Container engine CLI binary.
    pub engine: PathBuf,
    /// Fixed prefix of derived bridge interface names.
    pub bridge_prefix: String,
    /// How many characters of the network name follow the prefix.
    pub bridge_name_chars: usize,
    /// Prefix length of the restricted dynamic allocation range.
    pub allocation_prefix: u8,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            engine: PathBuf::from("docker"),
            bridge_prefix: "br-".to_string(),
            bridge_name_chars: 12,
            allocation_prefix: 27,
        }
    }
}

impl FabricConfig {
    /// Load a configuration file, filling unset fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// fails [`FabricConfig::validate`].
    pub fn load(path: impl AsRef<Path>) -> NetfabResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| NetfabError::Config {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), ?config, "Loaded fabric config");
        Ok(config)
    }

    /// Check the derived bridge name fits an interface name and the
    /// allocation prefix leaves room inside an IPv4 block.
    ///
    /// # Errors
    ///
    /// Returns [`NetfabError::Config`] describing the first violation.
    pub fn validate(&self) -> NetfabResult<()> {
        if self.bridge_prefix.len() + self.bridge_name_chars > MAX_IFNAME_LEN {
            return Err(NetfabError::Config {
                message: format!(
                    "bridge_prefix ({}) plus bridge_name_chars ({}) exceeds {} characters",
                    self.bridge_prefix.len(),
                    self.bridge_name_chars,
                    MAX_IFNAME_LEN
                ),
            });
        }
        if self.bridge_name_chars == 0 {
            return Err(NetfabError::Config {
                message: "bridge_name_chars must be at least 1".to_string(),
            });
        }
        if !(1..=30).contains(&self.allocation_prefix) {
            return Err(NetfabError::Config {
                message: format!(
                    "allocation_prefix must be within 1..=30, got {}",
                    self.allocation_prefix
                ),
            });
        }
        Ok(())
    }

    /// Set the container engine binary.
    #[must_use]
    pub fn with_engine(mut self, engine: impl Into<PathBuf>) -> Self {
        self.engine = engine.into();
        self
    }

    /// Set the bridge name prefix.
    #[must_use]
    pub fn with_bridge_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.bridge_prefix = prefix.into();
        self
    }

    /// Set the allocation range prefix length.
    #[must_use]
    pub const fn with_allocation_prefix(mut self, prefix: u8) -> Self {
        self.allocation_prefix = prefix;
        self
    }
}
