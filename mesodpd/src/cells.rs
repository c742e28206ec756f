//! Cell-list partitioning of the box into cubic cells of side >= cutoff.
//!
//! The grid provides three things to the pair driver: the forward-neighbor
//! stencil that enumerates every unordered cell pair once, a deterministic
//! partition of all cells into stencil-disjoint chunks for race-free
//! parallel iteration, and the counting-sort assignment of particles to
//! cells.

use crate::convert;
use crate::error::{Error, Result};
use crate::geometry::{Axis, SimBox};

/// The 13 forward offsets out of the 27-cell neighborhood. Together with
/// the cell itself they enumerate every unordered cell pair exactly once:
/// an offset is "forward" when its highest differing coordinate is
/// positive.
pub const FORWARD_OFFSETS: [[i64; 3]; 13] = [
    [1, 0, 0],
    [-1, 1, 0],
    [0, 1, 0],
    [1, 1, 0],
    [-1, -1, 1],
    [0, -1, 1],
    [1, -1, 1],
    [-1, 0, 1],
    [0, 0, 1],
    [1, 0, 1],
    [-1, 1, 1],
    [0, 1, 1],
    [1, 1, 1],
];

/// Cell grid over a [`SimBox`] for a fixed interaction cutoff.
#[derive(Clone, Debug)]
pub struct CellGrid {
    counts: [usize; 3],
    sides: [f64; 3],
    lengths: [f64; 3],
    periodic: [bool; 3],
    cutoff: f64,
    chunks: Vec<Vec<usize>>,
}

impl CellGrid {
    /// Partitions the box into cells of side `>= cutoff`.
    ///
    /// Every axis gets `max(3, floor(L / cutoff))` cells. A periodic axis
    /// that cannot hold three cells of cutoff size is rejected, because the
    /// minimum-image convention breaks down there.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for a non-positive cutoff, [`Error::BoxTooSmall`]
    /// for a too-small periodic axis.
    pub fn new(sim_box: &SimBox, cutoff: f64) -> Result<Self> {
        if !(cutoff.is_finite() && cutoff > 0.0) {
            return Err(Error::config(format!(
                "interaction cutoff must be positive, got {cutoff}"
            )));
        }
        let mut counts = [0_usize; 3];
        for axis in 0..3 {
            let fitting = convert::cell_index_from_f64(sim_box.length(axis) / cutoff);
            if fitting < 3 {
                if sim_box.is_periodic(axis) {
                    return Err(Error::BoxTooSmall {
                        axis: Axis::from_index(axis),
                        cells: fitting,
                    });
                }
                counts[axis] = 3;
            } else {
                counts[axis] = fitting;
            }
        }
        let sides = [
            sim_box.length(0) / convert::f64_from_usize(counts[0]),
            sim_box.length(1) / convert::f64_from_usize(counts[1]),
            sim_box.length(2) / convert::f64_from_usize(counts[2]),
        ];
        let chunks = build_chunks(counts, sim_box.periodic());
        Ok(Self {
            counts,
            sides,
            lengths: sim_box.lengths(),
            periodic: sim_box.periodic(),
            cutoff,
            chunks,
        })
    }

    /// Number of cells along each axis.
    #[must_use]
    pub const fn counts(&self) -> [usize; 3] {
        self.counts
    }

    /// Total number of cells.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.counts[0] * self.counts[1] * self.counts[2]
    }

    /// Interaction cutoff the grid was built for.
    #[must_use]
    pub const fn cutoff(&self) -> f64 {
        self.cutoff
    }

    /// The stencil-disjoint cell chunks, in deterministic order.
    ///
    /// Within one chunk, any two cells are at least three cells apart (in
    /// wrapped coordinates) on some axis, so their write stencils cannot
    /// overlap.
    #[must_use]
    pub fn chunks(&self) -> &[Vec<usize>] {
        &self.chunks
    }

    /// Linear index of the cell with the given per-axis coordinates.
    #[must_use]
    pub fn cell_index(&self, coords: [usize; 3]) -> usize {
        (coords[2] * self.counts[1] + coords[1]) * self.counts[0] + coords[0]
    }

    /// Per-axis coordinates of the cell with linear index `cell`.
    #[must_use]
    pub fn cell_coords(&self, cell: usize) -> [usize; 3] {
        let x = cell % self.counts[0];
        let rest = cell / self.counts[0];
        [x, rest % self.counts[1], rest / self.counts[1]]
    }

    /// Cell that contains the position `(x, y, z)`, clamped to the grid.
    #[must_use]
    pub fn cell_of(&self, x: f64, y: f64, z: f64) -> usize {
        let ix = convert::cell_index_from_f64(x / self.sides[0]).min(self.counts[0] - 1);
        let iy = convert::cell_index_from_f64(y / self.sides[1]).min(self.counts[1] - 1);
        let iz = convert::cell_index_from_f64(z / self.sides[2]).min(self.counts[2] - 1);
        self.cell_index([ix, iy, iz])
    }

    /// Forward neighbor of the cell at `coords` under `offset`.
    ///
    /// Returns the neighbor's linear index and the wrap displacement to add
    /// to the neighbor's particle positions before forming `r_i - r_j`. A
    /// neighbor that would wrap across a non-periodic face does not exist.
    #[must_use]
    pub fn forward_neighbor(&self, coords: [usize; 3], offset: [i64; 3]) -> Option<(usize, [f64; 3])> {
        let mut neighbor = [0_usize; 3];
        let mut wrap = [0.0_f64; 3];
        for axis in 0..3 {
            let count = self.counts[axis] as i64;
            let shifted = coords[axis] as i64 + offset[axis];
            if shifted < 0 {
                if !self.periodic[axis] {
                    return None;
                }
                neighbor[axis] = (shifted + count) as usize;
                wrap[axis] = -self.lengths[axis];
            } else if shifted >= count {
                if !self.periodic[axis] {
                    return None;
                }
                neighbor[axis] = (shifted - count) as usize;
                wrap[axis] = self.lengths[axis];
            } else {
                neighbor[axis] = shifted as usize;
            }
        }
        Some((self.cell_index(neighbor), wrap))
    }

    /// Assigns all particles to cells with a counting sort.
    #[must_use]
    pub fn assign(&self, r: &[Vec<f64>; 3]) -> CellAssignment {
        self.assign_iter(0..r[0].len(), r)
    }

    /// Assigns the given particle subset to cells; the assignment keeps the
    /// global particle indices.
    #[must_use]
    pub fn assign_subset(&self, r: &[Vec<f64>; 3], subset: &[usize]) -> CellAssignment {
        self.assign_iter(subset.iter().copied(), r)
    }

    // counting sort: one pass counts occupancy, the prefix sum fixes each
    // cell's slot range, the second pass scatters the indices
    fn assign_iter<I>(&self, indices: I, r: &[Vec<f64>; 3]) -> CellAssignment
    where
        I: Iterator<Item = usize>,
    {
        let cells = self.cell_count();
        let mut home = Vec::new();
        let mut offsets = vec![0_usize; cells + 1];
        for p in indices {
            let cell = self.cell_of(r[0][p], r[1][p], r[2][p]);
            home.push((u32::try_from(p).expect("particle index exceeds u32"), cell));
            offsets[cell + 1] += 1;
        }
        for cell in 0..cells {
            offsets[cell + 1] += offsets[cell];
        }
        let mut cursor = offsets[..cells].to_vec();
        let mut sorted_particles = vec![0_u32; home.len()];
        for &(p, cell) in &home {
            sorted_particles[cursor[cell]] = p;
            cursor[cell] += 1;
        }
        CellAssignment {
            cell_offsets: offsets,
            sorted_particles,
        }
    }
}

/// Particle-to-cell assignment: `sorted_particles[cell_offsets[c]..cell_offsets[c + 1]]`
/// are the (global) indices of the particles in cell `c`.
#[derive(Clone, Debug, Default)]
pub struct CellAssignment {
    /// Prefix offsets into `sorted_particles`, one entry per cell plus a
    /// trailing total.
    pub cell_offsets: Vec<usize>,
    /// Particle indices grouped by cell.
    pub sorted_particles: Vec<u32>,
}

impl CellAssignment {
    /// Particles of cell `cell`.
    #[must_use]
    pub fn members(&self, cell: usize) -> &[u32] {
        &self.sorted_particles[self.cell_offsets[cell]..self.cell_offsets[cell + 1]]
    }
}

/// Deterministic per-axis greedy coloring: cells whose wrapped distance is
/// one or two on every axis get different color triples, so equal-colored
/// cells can never see each other through the one-cell-deep stencil.
fn axis_colors(count: usize, periodic: bool) -> Vec<u8> {
    const UNSET: u8 = u8::MAX;
    let mut colors = vec![UNSET; count];
    for i in 0..count {
        let mut used = [false; 6];
        let mut mark = |j: usize| {
            if colors[j] != UNSET {
                used[colors[j] as usize] = true;
            }
        };
        for d in 1..=2_usize {
            if i >= d {
                mark(i - d);
            } else if periodic && count > d {
                mark((i + count - d) % count);
            }
            if periodic && i + d >= count && count > d {
                mark(i + d - count);
            }
        }
        colors[i] = used
            .iter()
            .position(|&taken| !taken)
            .map(|c| c as u8)
            // UNWRAP: at most five neighbors constrain a cell, six colors exist
            .unwrap_or_else(|| unreachable!());
    }
    colors
}

fn build_chunks(counts: [usize; 3], periodic: [bool; 3]) -> Vec<Vec<usize>> {
    let per_axis: Vec<Vec<u8>> = (0..3)
        .map(|axis| axis_colors(counts[axis], periodic[axis]))
        .collect();
    let color_counts: Vec<usize> = per_axis
        .iter()
        .map(|colors| colors.iter().map(|&c| c as usize).max().unwrap_or(0) + 1)
        .collect();

    let mut chunks = vec![Vec::new(); color_counts[0] * color_counts[1] * color_counts[2]];
    let mut cell = 0_usize;
    for z in 0..counts[2] {
        for y in 0..counts[1] {
            for x in 0..counts[0] {
                let color = (per_axis[2][z] as usize * color_counts[1]
                    + per_axis[1][y] as usize)
                    * color_counts[0]
                    + per_axis[0][x] as usize;
                chunks[color].push(cell);
                cell += 1;
            }
        }
    }
    chunks.retain(|chunk| !chunk.is_empty());
    chunks
}
