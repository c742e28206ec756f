//! Harmonic bonds and their race-free chunking.
//!
//! The chunker partitions the bond list greedily so that no particle index
//! repeats within a chunk; the bonds of one chunk can then update both
//! endpoint forces in parallel without synchronization.

use crate::adders::PressureAdders;
use crate::geometry::SimBox;
use crate::pairs::SharedAxes;
use rayon::prelude::*;
use rayon::ThreadPool;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// Response of a bond to compression.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum BondBehavior {
    /// Full harmonic response.
    #[default]
    Default,
    /// Only the attractive branch acts; a compressed bond exerts no force.
    Attractive,
}

/// Harmonic bond between two particles.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct HarmonicBond {
    /// First particle index.
    pub a: u32,
    /// Second particle index.
    pub b: u32,
    /// Rest length.
    pub rest_length: f64,
    /// Force constant.
    pub force_constant: f64,
    /// Compression behavior.
    pub behavior: BondBehavior,
}

impl HarmonicBond {
    /// Scalar force along `e = (r_a - r_b) / r`; positive pushes the
    /// endpoints apart.
    #[must_use]
    pub fn scalar_force(&self, r: f64) -> f64 {
        let stretch = -self.force_constant * (r - self.rest_length);
        match self.behavior {
            BondBehavior::Default => stretch,
            // drop the repulsive branch entirely
            BondBehavior::Attractive => stretch.min(0.0),
        }
    }

    /// Harmonic bond energy at length `r`.
    #[must_use]
    pub fn potential(&self, r: f64) -> f64 {
        let d = r - self.rest_length;
        match self.behavior {
            BondBehavior::Default => 0.5 * self.force_constant * d * d,
            BondBehavior::Attractive => {
                if d > 0.0 {
                    0.5 * self.force_constant * d * d
                } else {
                    0.0
                }
            }
        }
    }
}

/// Greedy first-fit partition of the bond list into chunks in which every
/// particle index appears at most once.
///
/// Bonds are visited in input order and placed into the first chunk whose
/// touched-index set contains neither endpoint, so the result is
/// deterministic for a given bond list.
#[must_use]
pub fn chunk_bonds(bonds: &[HarmonicBond]) -> Vec<Vec<HarmonicBond>> {
    let mut chunks: Vec<Vec<HarmonicBond>> = Vec::new();
    let mut touched: Vec<FxHashSet<u32>> = Vec::new();
    for &bond in bonds {
        let slot = touched
            .iter()
            .position(|set| !set.contains(&bond.a) && !set.contains(&bond.b));
        match slot {
            Some(index) => {
                chunks[index].push(bond);
                touched[index].insert(bond.a);
                touched[index].insert(bond.b);
            }
            None => {
                chunks.push(vec![bond]);
                let mut set = FxHashSet::default();
                set.insert(bond.a);
                set.insert(bond.b);
                touched.push(set);
            }
        }
    }
    chunks
}

/// Evaluates all bond forces into `forces`, chunk by chunk, with the bonds
/// of each chunk running in parallel.
pub fn add_bond_forces(
    chunks: &[Vec<HarmonicBond>],
    r: &[Vec<f64>; 3],
    sim_box: &SimBox,
    forces: SharedAxes<'_>,
    pool: &ThreadPool,
) {
    pool.install(|| {
        for chunk in chunks {
            chunk.par_iter().for_each(|bond| {
                let i = bond.a as usize;
                let j = bond.b as usize;
                let delta = sim_box.correct_displacement([
                    r[0][i] - r[0][j],
                    r[1][i] - r[1][j],
                    r[2][i] - r[2][j],
                ]);
                let r2 = delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2];
                let length = r2.sqrt();
                let scale = bond.scalar_force(length) / length;
                let force = delta.map(|d| scale * d);
                // SAFETY: within a chunk no particle index repeats, so the
                // two endpoint slots are owned by this task
                unsafe {
                    forces.add(i, force);
                    forces.add(j, [-force[0], -force[1], -force[2]]);
                }
            });
        }
    });
}

/// Total bond potential, with optional virial accumulation.
#[must_use]
pub fn bond_potential(
    chunks: &[Vec<HarmonicBond>],
    r: &[Vec<f64>; 3],
    sim_box: &SimBox,
    pressure: Option<&PressureAdders>,
) -> f64 {
    let mut total = 0.0;
    for bond in chunks.iter().flatten() {
        let i = bond.a as usize;
        let j = bond.b as usize;
        let delta = sim_box.correct_displacement([
            r[0][i] - r[0][j],
            r[1][i] - r[1][j],
            r[2][i] - r[2][j],
        ]);
        let r2 = delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2];
        let length = r2.sqrt();
        total += bond.potential(length);
        if let Some(adders) = pressure {
            let scale = bond.scalar_force(length) / length;
            adders.add_pair(delta, delta.map(|d| scale * d));
        }
    }
    total
}
