//! Chunk-parallel iteration over short-range particle pairs.
//!
//! The driver walks the cell chunks of a [`CellGrid`] one after another and
//! iterates the cells of the active chunk in parallel. Within one chunk the
//! stencils of any two cells are disjoint, so a kernel may write to both
//! particles of a pair without synchronization. Between chunks there is a
//! barrier, and kernels see every unordered pair exactly once with `i < j`
//! in cell-iteration order.

use crate::cells::{CellAssignment, CellGrid, FORWARD_OFFSETS};
use crate::geometry::{SimBox, TINY};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::marker::PhantomData;

/// A per-pair interaction evaluated by the driver.
///
/// `delta` is the minimum-image displacement `r_i - r_j` and `r2` its
/// squared norm, guaranteed to be at most the squared grid cutoff.
pub trait PairKernel: Sync {
    /// Evaluates the kernel for the unordered pair `(i, j)`.
    fn pair(&self, i: usize, j: usize, delta: [f64; 3], r2: f64);
}

/// Shared mutable view over the three per-axis arrays of one particle
/// quantity (forces or velocities).
///
/// The view is handed to pair kernels running on several worker threads at
/// once. Exclusive access to each particle slot is not enforced here; it
/// follows from the stencil-disjoint chunking discipline of the driver, and
/// every unsafe access site states that reliance.
pub struct SharedAxes<'a> {
    ptrs: [*mut f64; 3],
    len: usize,
    _marker: PhantomData<&'a mut [f64]>,
}

unsafe impl Send for SharedAxes<'_> {}
unsafe impl Sync for SharedAxes<'_> {}

impl<'a> SharedAxes<'a> {
    /// Wraps the three axis arrays of one particle quantity.
    #[must_use]
    pub fn new(arrays: &'a mut [Vec<f64>; 3]) -> Self {
        let len = arrays[0].len();
        debug_assert!(arrays.iter().all(|axis| axis.len() == len));
        let [x, y, z] = arrays;
        Self {
            ptrs: [x.as_mut_ptr(), y.as_mut_ptr(), z.as_mut_ptr()],
            len,
            _marker: PhantomData,
        }
    }

    /// Number of particles covered by the view.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the view covers no particles.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Adds `delta` to the three components of particle `index`.
    ///
    /// # Safety
    ///
    /// No other thread may access particle `index` concurrently; the cell
    /// chunking of the calling driver guarantees this.
    pub unsafe fn add(&self, index: usize, delta: [f64; 3]) {
        debug_assert!(index < self.len);
        for (ptr, d) in self.ptrs.iter().zip(delta) {
            // SAFETY: index is in bounds and exclusively owned per the
            // caller's contract
            unsafe { *ptr.add(index) += d };
        }
    }

    /// Reads the three components of particle `index`.
    ///
    /// # Safety
    ///
    /// No other thread may write particle `index` concurrently.
    #[must_use]
    pub unsafe fn get(&self, index: usize) -> [f64; 3] {
        debug_assert!(index < self.len);
        // SAFETY: index is in bounds and no concurrent writer exists per
        // the caller's contract
        self.ptrs.map(|ptr| unsafe { *ptr.add(index) })
    }
}

/// One cached pair with its precomputed geometry.
#[derive(Clone, Copy, Debug)]
pub struct PairEntry {
    /// First (smaller cell-iteration) particle index.
    pub i: u32,
    /// Second particle index.
    pub j: u32,
    /// Minimum-image displacement `r_i - r_j`.
    pub delta: [f64; 3],
    /// Squared pair distance.
    pub r2: f64,
    /// Pair distance.
    pub r: f64,
}

/// Pair-distance cache grouped by home cell, reusable by later kernels of
/// the same step under the same chunking discipline.
#[derive(Clone, Debug, Default)]
pub struct PairCache {
    per_cell: Vec<Vec<PairEntry>>,
}

impl PairCache {
    /// Total number of cached pairs.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.per_cell.iter().map(Vec::len).sum()
    }
}

/// Pair driver bound to one grid and box.
pub struct PairDriver<'a> {
    grid: &'a CellGrid,
    sim_box: &'a SimBox,
}

impl<'a> PairDriver<'a> {
    /// New driver over `grid` inside `sim_box`.
    #[must_use]
    pub const fn new(grid: &'a CellGrid, sim_box: &'a SimBox) -> Self {
        Self { grid, sim_box }
    }

    /// Runs `kernel` over every pair within the cutoff.
    pub fn for_each_pair<K: PairKernel>(
        &self,
        pool: &ThreadPool,
        r: &[Vec<f64>; 3],
        assignment: &CellAssignment,
        kernel: &K,
    ) {
        pool.install(|| {
            for chunk in self.grid.chunks() {
                chunk
                    .par_iter()
                    .for_each(|&cell| self.iterate_cell(cell, r, assignment, kernel, None));
            }
        });
    }

    /// Runs `kernel` over every pair within the cutoff and returns the
    /// pair-distance cache built along the way.
    #[must_use]
    pub fn for_each_pair_caching<K: PairKernel>(
        &self,
        pool: &ThreadPool,
        r: &[Vec<f64>; 3],
        assignment: &CellAssignment,
        kernel: &K,
    ) -> PairCache {
        let mut per_cell: Vec<Vec<PairEntry>> = vec![Vec::new(); self.grid.cell_count()];
        pool.install(|| {
            for chunk in self.grid.chunks() {
                // each cell is visited exactly once across all chunks, so
                // collecting per cell and scattering back is race-free
                let recorded: Vec<(usize, Vec<PairEntry>)> = chunk
                    .par_iter()
                    .map(|&cell| {
                        let mut entries = Vec::new();
                        self.iterate_cell(cell, r, assignment, kernel, Some(&mut entries));
                        (cell, entries)
                    })
                    .collect();
                for (cell, entries) in recorded {
                    per_cell[cell] = entries;
                }
            }
        });
        PairCache { per_cell }
    }

    /// Runs `kernel` over a previously built pair cache, skipping all
    /// geometry derivation.
    pub fn for_each_cached_pair<K: PairKernel>(
        &self,
        pool: &ThreadPool,
        cache: &PairCache,
        kernel: &K,
    ) {
        pool.install(|| {
            for chunk in self.grid.chunks() {
                chunk.par_iter().for_each(|&cell| {
                    for entry in &cache.per_cell[cell] {
                        kernel.pair(entry.i as usize, entry.j as usize, entry.delta, entry.r2);
                    }
                });
            }
        });
    }

    fn iterate_cell<K: PairKernel>(
        &self,
        cell: usize,
        r: &[Vec<f64>; 3],
        assignment: &CellAssignment,
        kernel: &K,
        mut record: Option<&mut Vec<PairEntry>>,
    ) {
        let cutoff2 = self.grid.cutoff() * self.grid.cutoff();
        let members = assignment.members(cell);

        for (n, &i) in members.iter().enumerate() {
            let i = i as usize;
            let ri = [r[0][i], r[1][i], r[2][i]];
            for &j in &members[n + 1..] {
                let j = j as usize;
                let delta = self.sim_box.correct_displacement([
                    ri[0] - r[0][j],
                    ri[1] - r[1][j],
                    ri[2] - r[2][j],
                ]);
                self.dispatch(kernel, i, j, delta, cutoff2, record.as_deref_mut());
            }
        }

        let coords = self.grid.cell_coords(cell);
        for offset in FORWARD_OFFSETS {
            let Some((neighbor, wrap)) = self.grid.forward_neighbor(coords, offset) else {
                continue;
            };
            for &i in members {
                let i = i as usize;
                let ri = [r[0][i], r[1][i], r[2][i]];
                for &j in assignment.members(neighbor) {
                    let j = j as usize;
                    let delta = [
                        tiny_floor(ri[0] - (r[0][j] + wrap[0])),
                        tiny_floor(ri[1] - (r[1][j] + wrap[1])),
                        tiny_floor(ri[2] - (r[2][j] + wrap[2])),
                    ];
                    self.dispatch(kernel, i, j, delta, cutoff2, record.as_deref_mut());
                }
            }
        }
    }

    #[allow(clippy::unused_self)]
    fn dispatch<K: PairKernel>(
        &self,
        kernel: &K,
        i: usize,
        j: usize,
        delta: [f64; 3],
        cutoff2: f64,
        record: Option<&mut Vec<PairEntry>>,
    ) {
        let r2 = delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2];
        if r2 > cutoff2 {
            return;
        }
        kernel.pair(i, j, delta, r2);
        if let Some(entries) = record {
            entries.push(PairEntry {
                i: u32::try_from(i).expect("particle index exceeds u32"),
                j: u32::try_from(j).expect("particle index exceeds u32"),
                delta,
                r2,
                r: r2.sqrt(),
            });
        }
    }
}

// keeps radial denominators finite for coincident images
fn tiny_floor(delta: f64) -> f64 {
    if delta.abs() < TINY {
        if delta < 0.0 {
            -TINY
        } else {
            TINY
        }
    } else {
        delta
    }
}
