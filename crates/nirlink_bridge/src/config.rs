// SPDX-License-Identifier: MIT OR Apache-2.0
//! Conversion settings.
//!
//! Settings are stored as RON:
//! - Tracing: boundary names, declared input shape, metadata stamping
//! - Interpretation: neuron time step, recurrent graph support

use crate::error::{BridgeError, Result};
use nirlink_nn::DEFAULT_DT;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current settings format version
pub const CONFIG_FORMAT_VERSION: u32 = 1;

/// Settings for tracing modules into graphs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Shape of the traced input, used to infer every node's types
    pub input_shape: Option<Vec<usize>>,
    /// Name of the synthetic input node
    pub input_name: String,
    /// Name of the synthetic output node
    pub output_name: String,
    /// Infer node types from `input_shape` after tracing
    pub infer_types: bool,
    /// Stamp each node's metadata with the module path it came from
    pub record_module_paths: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            input_shape: None,
            input_name: "input".to_string(),
            output_name: "output".to_string(),
            infer_types: true,
            record_module_paths: false,
        }
    }
}

/// Settings for interpreting graphs as modules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpretConfig {
    /// Integration time step for neuron nodes, in seconds
    pub dt: f32,
    /// Accept cycles that pass through a stateful node
    pub allow_recurrent: bool,
}

impl Default for InterpretConfig {
    fn default() -> Self {
        Self {
            dt: DEFAULT_DT,
            allow_recurrent: true,
        }
    }
}

/// Complete conversion settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Settings format version
    pub version: u32,
    /// Tracing settings
    #[serde(default)]
    pub trace: TraceConfig,
    /// Interpretation settings
    #[serde(default)]
    pub interpret: InterpretConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_FORMAT_VERSION,
            trace: TraceConfig::default(),
            interpret: InterpretConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Parse settings from RON
    pub fn from_ron(content: &str) -> Result<Self> {
        let config: BridgeConfig = ron::from_str(content).map_err(|e| BridgeError::Config(e.to_string()))?;

        // Version check
        if config.version > CONFIG_FORMAT_VERSION {
            return Err(BridgeError::Config(format!(
                "Config version {} is newer than supported version {}",
                config.version, CONFIG_FORMAT_VERSION
            )));
        }
        if config.interpret.dt.is_nan() || config.interpret.dt <= 0.0 {
            return Err(BridgeError::Config(format!(
                "Time step must be positive, got {}",
                config.interpret.dt
            )));
        }
        Ok(config)
    }

    /// Serialize settings to pretty RON
    pub fn to_ron(&self) -> Result<String> {
        let pretty = ron::ser::PrettyConfig::default()
            .struct_names(true)
            .enumerate_arrays(false);
        ron::ser::to_string_pretty(self, pretty).map_err(|e| BridgeError::Config(e.to_string()))
    }

    /// Load settings from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("{}: {e}", path.display())))?;
        let config = Self::from_ron(&content)?;
        tracing::debug!(path = %path.display(), "loaded bridge config");
        Ok(config)
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_ron()?;
        std::fs::write(path, content).map_err(|e| BridgeError::Config(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.version, CONFIG_FORMAT_VERSION);
        assert_eq!(config.trace.input_name, "input");
        assert!(config.interpret.allow_recurrent);
    }

    #[test]
    fn test_config_serialization() {
        let mut config = BridgeConfig::default();
        config.trace.input_shape = Some(vec![4]);
        config.interpret.dt = 1e-4;
        let ron_str = config.to_ron().unwrap();
        let loaded = BridgeConfig::from_ron(&ron_str).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let loaded = BridgeConfig::from_ron("(version: 1, interpret: (dt: 0.01))").unwrap();
        assert_eq!(loaded.interpret.dt, 0.01);
        assert!(loaded.interpret.allow_recurrent);
        assert_eq!(loaded.trace, TraceConfig::default());
    }

    #[test]
    fn test_newer_version_rejected() {
        let err = BridgeConfig::from_ron("(version: 99)").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }
}
