//! Noise-based and flat terrain generators

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

use super::{GeneratedSection, TerrainGenerator};

/// Parameters controlling noise terrain
#[derive(Clone, Debug)]
pub struct TerrainParams {
    pub seed: u32,
    pub scale: f32,        // Horizontal scale (larger = smoother)
    pub height_scale: f32, // Max surface height in blocks
    pub octaves: u32,
    pub persistence: f32,
    pub lacunarity: f32,
    /// Sections with |x| or |y| beyond this are not generated
    pub bounds: Option<i32>,
    pub stone: u16,
    pub dirt: u16,
    pub grass: u16,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            seed: 12345,
            scale: 100.0,
            height_scale: 48.0,
            octaves: 4,
            persistence: 0.5,
            lacunarity: 2.0,
            bounds: None,
            stone: 1,
            dirt: 2,
            grass: 3,
        }
    }
}

/// Heightmap terrain from fractal Brownian motion
pub struct NoiseTerrainGenerator {
    params: TerrainParams,
    noise: Fbm<Perlin>,
}

impl NoiseTerrainGenerator {
    pub fn new(params: TerrainParams) -> Self {
        let noise = Fbm::<Perlin>::new(params.seed)
            .set_octaves(params.octaves as usize)
            .set_persistence(params.persistence as f64)
            .set_lacunarity(params.lacunarity as f64);

        Self { params, noise }
    }

    pub fn params(&self) -> &TerrainParams {
        &self.params
    }

    /// Surface height (first air block) of column (x, y)
    pub fn height_at(&self, x: f32, y: f32) -> i32 {
        let nx = (x / self.params.scale) as f64;
        let ny = (y / self.params.scale) as f64;

        // Noise is in [-1, 1]
        let normalized = ((self.noise.get([nx, ny]) + 1.0) / 2.0).clamp(0.0, 1.0);
        1 + (normalized * self.params.height_scale as f64) as i32
    }
}

impl TerrainGenerator for NoiseTerrainGenerator {
    fn can_generate_section(&self, x: i32, y: i32) -> bool {
        self.params.bounds.is_none_or(|b| x.abs() <= b && y.abs() <= b)
    }

    fn z_range(&self, _x: i32, _y: i32) -> (i32, i32) {
        // Chunk size is not known here; cover the surface with layer 0 and let
        // the section grow as blocks are written.
        (0, 0)
    }

    fn generate_blocks(&self, _x: i32, _y: i32, section: &mut GeneratedSection) -> bool {
        let origin = section.origin();
        let width = section.width();
        for y in 0..width {
            for x in 0..width {
                let height = self.height_at((origin.x + x) as f32, (origin.y + y) as f32);
                section.fill_column(x, y, 0, height - 4, self.params.stone);
                section.fill_column(x, y, (height - 4).max(0), height - 1, self.params.dirt);
                section.set_block(x, y, height - 1, self.params.grass);
            }
        }
        true
    }
}

/// Every column filled to the same height with one block
#[derive(Clone, Debug)]
pub struct FlatGenerator {
    height: i32,
    block: u16,
}

impl FlatGenerator {
    /// Blocks `0..height` of every column become `block`.
    pub fn new(height: i32, block: u16) -> Self {
        Self { height, block }
    }
}

impl TerrainGenerator for FlatGenerator {
    fn can_generate_section(&self, _x: i32, _y: i32) -> bool {
        true
    }

    fn z_range(&self, _x: i32, _y: i32) -> (i32, i32) {
        (0, 0)
    }

    fn generate_blocks(&self, _x: i32, _y: i32, section: &mut GeneratedSection) -> bool {
        let width = section.width();
        for y in 0..width {
            for x in 0..width {
                section.fill_column(x, y, 0, self.height, self.block);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{IVec2, IVec3};
    use crate::voxel::coords::WorldParams;

    #[test]
    fn test_height_is_deterministic_and_bounded() {
        let generator = NoiseTerrainGenerator::new(TerrainParams::default());
        let a = generator.height_at(10.0, 20.0);
        let b = generator.height_at(10.0, 20.0);
        assert_eq!(a, b);
        for i in 0..50 {
            let h = generator.height_at(i as f32 * 7.3, i as f32 * -3.1);
            assert!((1..=49).contains(&h), "height {h}");
        }
    }

    #[test]
    fn test_bounds() {
        let generator = NoiseTerrainGenerator::new(TerrainParams {
            bounds: Some(1),
            ..TerrainParams::default()
        });
        assert!(generator.can_generate_section(-1, 1));
        assert!(!generator.can_generate_section(2, 0));
    }

    #[test]
    fn test_noise_columns_have_grass_on_top() {
        let params = WorldParams::new(4, 2, 1).unwrap();
        let generator = NoiseTerrainGenerator::new(TerrainParams::default());
        let mut generated = GeneratedSection::new(params, IVec2::ZERO, 0, 0);
        assert!(generator.generate_blocks(0, 0, &mut generated));
        let section = generated.finish();
        let height = generator.height_at(3.0, 5.0);
        assert_eq!(section.cell(0, IVec3::new(3, 5, height - 1)).block, 3);
        assert_eq!(section.cell(0, IVec3::new(3, 5, height)).block, 0);
        assert_ne!(section.cell(0, IVec3::new(3, 5, 0)).block, 0);
    }
}
