//! Block values and the block palette
//!
//! A block value is a `u16`: the low 12 bits hold the block type and the
//! high 4 bits are free-form flag bits.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Block type 0 is air
pub const AIR: u16 = 0;
/// Mask for the type portion of a block value
pub const BLOCK_TYPE_MASK: u16 = 0x0FFF;
/// First flag bit
pub const BLOCK_FLAG_SHIFT: u32 = 12;
/// Number of flag bits
pub const BLOCK_FLAG_COUNT: u32 = 4;
/// Brightest block light level
pub const MAX_LIGHT: u8 = 15;

/// Type portion of a block value
#[inline]
pub fn block_type(value: u16) -> u16 {
    value & BLOCK_TYPE_MASK
}

/// Replace the type of a block value, keeping its flag bits
#[inline]
pub fn with_block_type(value: u16, block_type: u16) -> u16 {
    (value & !BLOCK_TYPE_MASK) | (block_type & BLOCK_TYPE_MASK)
}

#[inline]
fn flag_mask(bit: u32) -> u16 {
    debug_assert!(bit < BLOCK_FLAG_COUNT, "flag bit {bit} out of range");
    1 << (BLOCK_FLAG_SHIFT + bit.min(BLOCK_FLAG_COUNT - 1))
}

/// Set flag bit `bit` (0..4)
#[inline]
pub fn with_flag(value: u16, bit: u32) -> u16 {
    value | flag_mask(bit)
}

/// Clear flag bit `bit` (0..4)
#[inline]
pub fn without_flag(value: u16, bit: u32) -> u16 {
    value & !flag_mask(bit)
}

#[inline]
pub fn has_flag(value: u16, bit: u32) -> bool {
    value & flag_mask(bit) != 0
}

/// Properties of one block type
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub name: String,
    #[serde(default = "default_light_blocking")]
    pub light_blocking: bool,
    #[serde(default)]
    pub light_emission: u8,
}

fn default_light_blocking() -> bool {
    true
}

/// Lighting-relevant properties of every block type, indexed by type id
///
/// Types without an entry are treated as opaque, non-emitting solids;
/// air never blocks light.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockPalette {
    pub name: String,
    pub blocks: Vec<BlockInfo>,
}

impl Default for BlockPalette {
    fn default() -> Self {
        let block = |name: &str, light_blocking: bool, light_emission: u8| BlockInfo {
            name: name.to_string(),
            light_blocking,
            light_emission,
        };
        Self {
            name: "default".to_string(),
            blocks: vec![
                block("air", false, 0),
                block("stone", true, 0),
                block("dirt", true, 0),
                block("grass", true, 0),
                block("lamp", false, MAX_LIGHT),
                block("glass", false, 0),
                block("torch", false, 12),
            ],
        }
    }
}

impl BlockPalette {
    /// Parse a palette from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid block palette: {e}")))
    }

    /// Load a palette file.
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether light may not pass through this block type
    pub fn is_light_blocking(&self, block_type: u16) -> bool {
        if block_type == AIR {
            return false;
        }
        self.blocks
            .get(block_type as usize)
            .map_or(true, |info| info.light_blocking)
    }

    /// Light level emitted by this block type (clamped to `MAX_LIGHT`)
    pub fn light_emission(&self, block_type: u16) -> u8 {
        self.blocks
            .get(block_type as usize)
            .map_or(0, |info| info.light_emission.min(MAX_LIGHT))
    }

    /// Type id for a block name
    pub fn find(&self, name: &str) -> Option<u16> {
        self.blocks
            .iter()
            .position(|info| info.name == name)
            .map(|i| i as u16)
    }
}
