//! Output-cadence property calculators: radius of gyration and
//! nearest-neighbor statistics.

use crate::cells::{CellAssignment, CellGrid, FORWARD_OFFSETS};
use crate::convert;
use crate::geometry::SimBox;
use crate::particle::ParticleSet;

/// Mass-weighted radius of gyration of one particle slice.
#[must_use]
pub fn radius_of_gyration(
    r: &[Vec<f64>; 3],
    mass: &[f64],
    first: usize,
    exclusive_last: usize,
) -> f64 {
    let total_mass: f64 = mass[first..exclusive_last].iter().sum();
    if total_mass <= 0.0 {
        return 0.0;
    }
    let mut center = [0.0_f64; 3];
    for axis in 0..3 {
        for p in first..exclusive_last {
            center[axis] += mass[p] * r[axis][p];
        }
        center[axis] /= total_mass;
    }
    let mut second_moment = 0.0;
    for p in first..exclusive_last {
        let mut d2 = 0.0;
        for axis in 0..3 {
            let d = r[axis][p] - center[axis];
            d2 += d * d;
        }
        second_moment += mass[p] * d2;
    }
    (second_moment / total_mass).sqrt()
}

/// Mean radius of gyration over all molecule instances of `molecule_type`.
#[must_use]
pub fn mean_radius_of_gyration(particles: &ParticleSet, molecule_type: u32) -> f64 {
    let mut total = 0.0;
    let mut count = 0_usize;
    let n = particles.len();
    let mut start = 0;
    while start < n {
        if particles.molecule_type[start] != molecule_type {
            start += 1;
            continue;
        }
        let instance = particles.molecule_index[start];
        let mut end = start + 1;
        while end < n
            && particles.molecule_type[end] == molecule_type
            && particles.molecule_index[end] == instance
        {
            end += 1;
        }
        total += radius_of_gyration(&particles.r, &particles.mass, start, end);
        count += 1;
        start = end;
    }
    if count == 0 {
        0.0
    } else {
        total / convert::f64_from_usize(count)
    }
}

/// Nearest-neighbor statistics over all particle pairs inside the grid
/// cutoff.
#[derive(Clone, Debug)]
pub struct NearestNeighborStats {
    /// `counts[s][t]`: how often the nearest neighbor of a particle of
    /// species `s` has species `t`.
    pub species_counts: Vec<Vec<u64>>,
    /// Histogram of nearest-neighbor distances over `[0, cutoff)`.
    pub distance_histogram: Vec<u64>,
    /// Width of one histogram bin.
    pub bin_width: f64,
}

/// Finds each particle's nearest neighbor within the grid cutoff with one
/// serial sweep over the cell structure.
#[must_use]
pub fn nearest_neighbors(
    particles: &ParticleSet,
    sim_box: &SimBox,
    grid: &CellGrid,
    assignment: &CellAssignment,
    species_count: usize,
    bins: usize,
) -> NearestNeighborStats {
    let n = particles.len();
    let r = &particles.r;
    let cutoff2 = grid.cutoff() * grid.cutoff();
    let mut nearest = vec![(f64::INFINITY, usize::MAX); n];

    let mut consider = |i: usize, j: usize, r2: f64| {
        if r2 < nearest[i].0 {
            nearest[i] = (r2, j);
        }
        if r2 < nearest[j].0 {
            nearest[j] = (r2, i);
        }
    };

    for cell in 0..grid.cell_count() {
        let members = assignment.members(cell);
        for (m, &i) in members.iter().enumerate() {
            let i = i as usize;
            for &j in &members[m + 1..] {
                let j = j as usize;
                let delta = sim_box.correct_displacement([
                    r[0][i] - r[0][j],
                    r[1][i] - r[1][j],
                    r[2][i] - r[2][j],
                ]);
                let r2 = delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2];
                if r2 <= cutoff2 {
                    consider(i, j, r2);
                }
            }
        }
        let coords = grid.cell_coords(cell);
        for offset in FORWARD_OFFSETS {
            let Some((neighbor, wrap)) = grid.forward_neighbor(coords, offset) else {
                continue;
            };
            for &i in members {
                let i = i as usize;
                for &j in assignment.members(neighbor) {
                    let j = j as usize;
                    let dx = r[0][i] - (r[0][j] + wrap[0]);
                    let dy = r[1][i] - (r[1][j] + wrap[1]);
                    let dz = r[2][i] - (r[2][j] + wrap[2]);
                    let r2 = dx * dx + dy * dy + dz * dz;
                    if r2 <= cutoff2 {
                        consider(i, j, r2);
                    }
                }
            }
        }
    }

    let bins = bins.max(1);
    let bin_width = grid.cutoff() / convert::f64_from_usize(bins);
    let mut species_counts = vec![vec![0_u64; species_count]; species_count];
    let mut distance_histogram = vec![0_u64; bins];
    for (p, &(r2, partner)) in nearest.iter().enumerate() {
        if partner == usize::MAX {
            continue;
        }
        let si = particles.species[p] as usize;
        let sj = particles.species[partner] as usize;
        species_counts[si][sj] += 1;
        let bin = convert::cell_index_from_f64(r2.sqrt() / bin_width).min(bins - 1);
        distance_histogram[bin] += 1;
    }
    NearestNeighborStats {
        species_counts,
        distance_histogram,
        bin_width,
    }
}
