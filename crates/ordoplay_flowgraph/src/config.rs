// SPDX-License-Identifier: MIT OR Apache-2.0
//! Flow graph runtime configuration.
//!
//! The configuration is an explicit value handed to each coordinator; there is
//! no global state. It persists as RON.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// What bubbling does when a block along the ancestor chain fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BubblePolicy {
    /// Keep notifying ancestor blocks
    #[default]
    Continue,
    /// Stop at the level where the first error happened
    HaltOnError,
}

/// Runtime settings shared by every graph under a coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowGraphConfig {
    /// Bubbling behavior on block failure
    pub bubble_error_policy: BubblePolicy,
    /// Maximum nested block activations within one event firing
    pub max_execution_depth: usize,
    /// Maximum custom events delivered by a single flush
    pub max_custom_event_deliveries: usize,
    /// Create a context on `start()` when the graph has none
    pub create_default_context: bool,
}

impl Default for FlowGraphConfig {
    fn default() -> Self {
        Self {
            bubble_error_policy: BubblePolicy::Continue,
            max_execution_depth: 256,
            max_custom_event_deliveries: 1024,
            create_default_context: true,
        }
    }
}

impl FlowGraphConfig {
    /// Parse from a RON string
    pub fn from_ron_str(content: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(content)?)
    }

    /// Serialize to a pretty RON string
    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        let config = ron::ser::PrettyConfig::default()
            .struct_names(true)
            .enumerate_arrays(false);
        Ok(ron::ser::to_string_pretty(self, config)?)
    }

    /// Load from a RON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_ron_str(&content)?;
        tracing::debug!("Loaded flow graph config from {:?}", path);
        Ok(config)
    }

    /// Save to a RON file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_ron_string()?;
        std::fs::write(path, content)?;
        tracing::debug!("Saved flow graph config to {:?}", path);
        Ok(())
    }
}

/// Configuration load/save errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Content is not valid RON for this type
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// Value could not be serialized
    #[error("Serialization error: {0}")]
    Serialize(#[from] ron::Error),
}
