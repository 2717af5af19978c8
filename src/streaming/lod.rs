//! Distance-to-LOD mapping for sections and chunks
//!
//! Distances are squared and measured in section units on the XY grid.
//! Each coarser LOD covers twice the linear extent of the previous one, so
//! the squared thresholds grow as `t[k] = t[k-1] * 2^(k+1)`.

use crate::core::types::{IVec2, Vec3};

/// Squared distance thresholds, one per LOD level
#[derive(Clone, Debug, PartialEq)]
pub struct LodThresholds {
    thresholds: Vec<f32>,
}

impl LodThresholds {
    /// Build thresholds for `lod_levels` levels starting from `lod0_distance_sq`.
    ///
    /// # Examples
    /// ```
    /// use vxworld::streaming::lod::LodThresholds;
    ///
    /// let t = LodThresholds::new(2.0, 3);
    /// assert_eq!(t.threshold(0), 2.0);
    /// assert_eq!(t.threshold(1), 8.0);  // 2 * 2^2
    /// assert_eq!(t.threshold(2), 64.0); // 8 * 2^3
    /// ```
    pub fn new(lod0_distance_sq: f32, lod_levels: u32) -> Self {
        let mut thresholds = Vec::with_capacity(lod_levels as usize);
        let mut current = lod0_distance_sq;
        for k in 0..lod_levels {
            if k > 0 {
                current *= (1u32 << (k + 1)) as f32;
            }
            thresholds.push(current);
        }
        Self { thresholds }
    }

    pub fn threshold(&self, lod: u32) -> f32 {
        self.thresholds[lod as usize]
    }

    /// Number of LOD levels; also the "out of range" tier
    pub fn lod_levels(&self) -> u32 {
        self.thresholds.len() as u32
    }

    /// LOD tier for a squared distance; `lod_levels` when beyond every range.
    ///
    /// # Examples
    /// ```
    /// use vxworld::streaming::lod::LodThresholds;
    ///
    /// let t = LodThresholds::new(2.0, 3);
    /// assert_eq!(t.tier(0.0), 0);
    /// assert_eq!(t.tier(2.0), 0);
    /// assert_eq!(t.tier(5.0), 1);
    /// assert_eq!(t.tier(64.0), 2);
    /// assert_eq!(t.tier(65.0), 3); // unload
    /// ```
    pub fn tier(&self, distance_sq: f32) -> u32 {
        self.thresholds
            .iter()
            .position(|&t| distance_sq <= t)
            .map_or(self.lod_levels(), |k| k as u32)
    }

    /// Largest grid distance (section units) still inside the coarsest tier
    pub fn search_radius(&self) -> i32 {
        self.thresholds
            .last()
            .map_or(0, |&t| t.max(0.0).sqrt().floor() as i32)
    }
}

/// Squared XY grid distance between two section coordinates
#[inline]
pub fn section_distance_sq(a: IVec2, b: IVec2) -> i64 {
    let dx = (a.x - b.x) as i64;
    let dy = (a.y - b.y) as i64;
    dx * dx + dy * dy
}

/// Squared XY distance from `point` to `observer`, in section units
#[inline]
pub fn xy_distance_sq(point: Vec3, observer: Vec3, section_blocks: f32) -> f32 {
    let dx = (point.x - observer.x) / section_blocks;
    let dy = (point.y - observer.y) / section_blocks;
    dx * dx + dy * dy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_grow() {
        let t = LodThresholds::new(1.0, 4);
        assert_eq!(t.threshold(0), 1.0);
        assert_eq!(t.threshold(1), 4.0);
        assert_eq!(t.threshold(2), 32.0);
        assert_eq!(t.threshold(3), 512.0);
        assert_eq!(t.lod_levels(), 4);
    }

    #[test]
    fn test_tier_boundaries() {
        let t = LodThresholds::new(2.0, 3);
        assert_eq!(t.tier(1.0), 0);
        assert_eq!(t.tier(2.5), 1);
        assert_eq!(t.tier(8.0), 1);
        assert_eq!(t.tier(8.1), 2);
        assert_eq!(t.tier(f32::MAX), 3);
    }

    #[test]
    fn test_single_level() {
        let t = LodThresholds::new(2.0, 1);
        assert_eq!(t.tier(2.0), 0);
        assert_eq!(t.tier(3.0), 1);
        assert_eq!(t.search_radius(), 1);
    }

    #[test]
    fn test_search_radius() {
        assert_eq!(LodThresholds::new(2.0, 3).search_radius(), 8);
        assert_eq!(LodThresholds::new(0.0, 2).search_radius(), 0);
    }

    #[test]
    fn test_distances() {
        assert_eq!(section_distance_sq(IVec2::new(-1, 2), IVec2::new(2, -2)), 25);
        let d = xy_distance_sq(Vec3::new(64.0, 0.0, 100.0), Vec3::ZERO, 128.0);
        assert!((d - 0.25).abs() < 1e-6);
    }
}
