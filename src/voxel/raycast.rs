//! Block ray casts (grid DDA over LOD-0 blocks)

use crate::core::types::{IVec3, Vec3};
use crate::math::Ray;
use crate::voxel::block::{block_type, AIR};
use crate::voxel::world::World;

/// First non-air block hit by a ray
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    /// Block that was hit
    pub block: IVec3,
    /// Outward normal of the face that was entered; zero when the ray starts inside
    pub normal: IVec3,
    /// Distance from the origin to the entry point
    pub distance: f32,
    /// Entry point on the hit face
    pub point: Vec3,
    /// Full block value at `block`
    pub value: u16,
}

impl RayHit {
    /// Empty cell in front of the hit face (where a placed block would go)
    pub fn adjacent(&self) -> IVec3 {
        self.block + self.normal
    }
}

impl World {
    /// Walk the ray through resident LOD-0 blocks up to `max_distance`.
    ///
    /// Nothing is loaded; non-resident blocks count as air.
    pub fn ray_cast_block(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<RayHit> {
        let ray = Ray::new(origin, direction);
        if !ray.is_valid() {
            return None;
        }
        let d = ray.direction;
        let mut cell = origin.floor().as_ivec3();
        let step = IVec3::new(axis_step(d.x), axis_step(d.y), axis_step(d.z));

        let delta = Vec3::new(inv_abs(d.x), inv_abs(d.y), inv_abs(d.z));
        let frac = origin - origin.floor();
        let mut t_max = Vec3::ZERO;
        for axis in 0..3 {
            t_max[axis] = match step[axis] {
                1 => (1.0 - frac[axis]) * delta[axis],
                -1 => frac[axis] * delta[axis],
                _ => f32::MAX,
            };
        }

        let mut normal = IVec3::ZERO;
        let mut t = 0.0f32;
        while t <= max_distance {
            if let Some(value) = self.peek_block_value(cell) {
                if block_type(value) != AIR {
                    return Some(RayHit {
                        block: cell,
                        normal,
                        distance: t,
                        point: ray.at(t),
                        value,
                    });
                }
            }

            let axis = if t_max.x < t_max.y {
                if t_max.x < t_max.z { 0 } else { 2 }
            } else if t_max.y < t_max.z {
                1
            } else {
                2
            };
            cell[axis] += step[axis];
            t = t_max[axis];
            t_max[axis] += delta[axis];
            normal = IVec3::ZERO;
            normal[axis] = -step[axis];
        }
        None
    }
}

#[inline]
fn axis_step(v: f32) -> i32 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

#[inline]
fn inv_abs(v: f32) -> f32 {
    if v.abs() < 1e-8 { f32::MAX } else { 1.0 / v.abs() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_config, test_world};

    #[test]
    fn test_hits_first_solid_block() {
        let mut world = test_world(test_config());
        world.set_block_type(IVec3::new(10, 2, 3), 1).unwrap();
        world.set_block_type(IVec3::new(12, 2, 3), 2).unwrap();

        let hit = world
            .ray_cast_block(Vec3::new(0.5, 2.5, 3.5), Vec3::X, 50.0)
            .unwrap();
        assert_eq!(hit.block, IVec3::new(10, 2, 3));
        assert_eq!(hit.normal, IVec3::new(-1, 0, 0));
        assert_eq!(hit.value, 1);
        assert!((hit.distance - 9.5).abs() < 1e-4);
        assert!(hit.point.abs_diff_eq(Vec3::new(10.0, 2.5, 3.5), 1e-4));
        assert_eq!(hit.adjacent(), IVec3::new(9, 2, 3));
    }

    #[test]
    fn test_negative_direction_and_range() {
        let mut world = test_world(test_config());
        world.set_block_type(IVec3::new(-3, 0, 0), 2).unwrap();

        let hit = world
            .ray_cast_block(Vec3::new(0.5, 0.5, 0.5), Vec3::NEG_X, 10.0)
            .unwrap();
        assert_eq!(hit.block, IVec3::new(-3, 0, 0));
        assert_eq!(hit.normal, IVec3::X);

        assert!(world.ray_cast_block(Vec3::new(0.5, 0.5, 0.5), Vec3::NEG_X, 2.0).is_none());
        assert!(world.ray_cast_block(Vec3::new(0.5, 0.5, 0.5), Vec3::ZERO, 10.0).is_none());
    }

    #[test]
    fn test_diagonal_ray() {
        let mut world = test_world(test_config());
        world.set_block_type(IVec3::new(4, 4, 4), 1).unwrap();
        let hit = world
            .ray_cast_block(Vec3::splat(0.5), Vec3::ONE, 20.0)
            .unwrap();
        assert_eq!(hit.block, IVec3::new(4, 4, 4));
        assert_ne!(hit.normal, IVec3::ZERO);
    }
}
