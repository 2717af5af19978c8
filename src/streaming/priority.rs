//! Ordering of section load candidates

use std::cmp::Ordering;

use crate::core::types::IVec2;

/// An unloaded section the scheduler wants resident
#[derive(Clone, Copy, Debug)]
pub struct SectionCandidate {
    pub pos: IVec2,
    /// Squared grid distance to the nearest observer
    pub distance_sq: i64,
    /// Target LOD tier
    pub lod: u32,
}

impl SectionCandidate {
    /// Sections under an observer are loaded regardless of the per-tick cap
    pub fn is_urgent(&self) -> bool {
        self.distance_sq == 0
    }
}

// Nearest first; coordinates break ties so the order is deterministic
impl Ord for SectionCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance_sq
            .cmp(&other.distance_sq)
            .then_with(|| self.pos.y.cmp(&other.pos.y))
            .then_with(|| self.pos.x.cmp(&other.pos.x))
    }
}

impl PartialOrd for SectionCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for SectionCandidate {}

impl PartialEq for SectionCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.pos == other.pos && self.distance_sq == other.distance_sq
    }
}

/// Candidates to load this tick: every urgent one, plus up to `cap` others,
/// nearest first.
pub fn select_loads(mut candidates: Vec<SectionCandidate>, cap: usize) -> Vec<SectionCandidate> {
    candidates.sort();
    let mut taken = 0;
    candidates
        .into_iter()
        .filter(|c| {
            if c.is_urgent() {
                return true;
            }
            if taken < cap {
                taken += 1;
                return true;
            }
            false
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(x: i32, y: i32, distance_sq: i64) -> SectionCandidate {
        SectionCandidate {
            pos: IVec2::new(x, y),
            distance_sq,
            lod: 0,
        }
    }

    #[test]
    fn test_sorted_nearest_first() {
        let mut list = vec![candidate(3, 0, 9), candidate(1, 0, 1), candidate(0, 1, 1), candidate(0, 0, 0)];
        list.sort();
        let order: Vec<IVec2> = list.iter().map(|c| c.pos).collect();
        assert_eq!(
            order,
            vec![IVec2::new(0, 0), IVec2::new(1, 0), IVec2::new(0, 1), IVec2::new(3, 0)]
        );
    }

    #[test]
    fn test_select_respects_cap_but_not_for_urgent() {
        let list = vec![
            candidate(5, 5, 50),
            candidate(0, 0, 0),
            candidate(9, 9, 0),
            candidate(1, 0, 1),
            candidate(2, 0, 4),
        ];
        let picked = select_loads(list, 1);
        let order: Vec<IVec2> = picked.iter().map(|c| c.pos).collect();
        assert_eq!(order, vec![IVec2::new(0, 0), IVec2::new(9, 9), IVec2::new(1, 0)]);
    }

    #[test]
    fn test_select_zero_cap() {
        let picked = select_loads(vec![candidate(1, 0, 1)], 0);
        assert!(picked.is_empty());
    }
}
