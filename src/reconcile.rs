//! Diff the board against the template and order the result.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::board::{ColorLookup, Coord};
use crate::palette::ColorId;
use crate::template::{Priority, TargetTemplate};

/// A target pixel whose canvas color is wrong or undetermined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MismatchEntry {
    pub coord: Coord,
    pub color: ColorId,
    /// Jittered priority; the queue is ordered ascending by this key.
    pub sort_key: Priority,
}

/// Produces a fresh, ordered list of mismatches each cycle.
///
/// Every cycle draws new jitter `j1, j2` in `[0, 1]` per entry and sorts
/// ascending by `(Ws * j1, Wp * j2)`.
#[derive(Debug)]
pub struct Reconciler<R = StdRng> {
    rng: R,
}

impl Reconciler<StdRng> {
    /// Seeded for reproducible ordering, or from OS entropy when `seed` is `None`.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        Self { rng }
    }
}

impl<R: Rng> Reconciler<R> {
    pub const fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Every target pixel whose board color is undetermined or differs from
    /// the desired color, sorted by freshly jittered key.
    pub fn recompute(
        &mut self,
        board: &impl ColorLookup,
        template: &TargetTemplate,
    ) -> Vec<MismatchEntry> {
        let mut entries: Vec<MismatchEntry> = template
            .pixels()
            .iter()
            .filter(|target| board.color_at(target.coord) != Some(target.color))
            .map(|target| MismatchEntry {
                coord: target.coord,
                color: target.color,
                sort_key: self.jitter(target.priority),
            })
            .collect();

        entries.sort_by(|a, b| a.sort_key.total_cmp(&b.sort_key));
        entries
    }

    fn jitter(&mut self, weights: Priority) -> Priority {
        let j1: f64 = self.rng.random_range(0.0..=1.0);
        let j2: f64 = self.rng.random_range(0.0..=1.0);
        Priority::new(weights.structure * j1, weights.pixel * j2)
    }
}
