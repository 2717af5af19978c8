//! World configuration, loadable from JSON

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use crate::voxel::coords::WorldParams;

/// Streaming scheduler tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Squared section distance still served at LOD 0 (threshold for tier 0).
    pub lod0_distance_sq: f32,
    /// Maximum non-adjacent section loads started per tick.
    pub max_section_loads_per_tick: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            lod0_distance_sq: 2.0,
            max_section_loads_per_tick: 4,
        }
    }
}

/// Meshing pipeline tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshingConfig {
    /// Mesh worker threads (0 lets rayon pick).
    pub worker_threads: usize,
    /// Maximum queued chunks dispatched to workers per tick.
    pub max_dispatch_per_tick: usize,
}

impl Default for MeshingConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            max_dispatch_per_tick: 32,
        }
    }
}

/// Complete configuration for a streamed world
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Cells per chunk side (power of two)
    pub chunk_size: u32,
    /// Chunks per section side at LOD 0
    pub section_size: u32,
    /// Number of LOD levels (1 = LOD 0 only)
    pub lod_levels: u32,
    /// Palette name recorded in the world index
    pub palette: String,
    pub streaming: StreamingConfig,
    pub meshing: MeshingConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            chunk_size: 16,
            section_size: 8,
            lod_levels: 3,
            palette: "default".to_string(),
            streaming: StreamingConfig::default(),
            meshing: MeshingConfig::default(),
        }
    }
}

impl WorldConfig {
    /// Parse a configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid world config: {e}")))
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Validated world parameters.
    pub fn params(&self) -> Result<WorldParams> {
        WorldParams::new(self.chunk_size, self.section_size, self.lod_levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WorldConfig::default();
        let params = config.params().expect("default params must validate");
        assert_eq!(params.chunk_size(), 16);
        assert_eq!(params.section_size(), 8);
        assert_eq!(params.lod_levels(), 3);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = WorldConfig::from_json_str(
            r#"{ "chunk_size": 8, "streaming": { "max_section_loads_per_tick": 1 } }"#,
        )
        .unwrap();
        assert_eq!(config.chunk_size, 8);
        assert_eq!(config.section_size, 8);
        assert_eq!(config.streaming.max_section_loads_per_tick, 1);
        assert_eq!(config.streaming.lod0_distance_sq, 2.0);
        assert_eq!(config.meshing, MeshingConfig::default());
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = WorldConfig::from_json_str("{ chunk_size: ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let config = WorldConfig {
            chunk_size: 12,
            ..Default::default()
        };
        assert!(matches!(config.params(), Err(Error::Config(_))));
    }
}
