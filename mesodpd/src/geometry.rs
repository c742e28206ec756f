//! Rectangular simulation box and boundary corrections.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Smallest distance the radial kernels are allowed to see. Differences
/// below this floor are lifted to it so that `1 / r` stays finite.
pub const TINY: f64 = 1e-6;

/// Retry budget for folding a runaway particle back into the box.
pub const MAX_CORRECTION_TRIALS: usize = 100;

/// Coordinate axis of the rectangular box.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Axis {
    /// First box axis.
    X,
    /// Second box axis.
    Y,
    /// Third box axis.
    Z,
}

impl Axis {
    /// All three axes in storage order.
    pub const ALL: [Self; 3] = [Self::X, Self::Y, Self::Z];

    /// Index of the axis into per-axis arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Axis for a per-axis array index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not 0, 1 or 2.
    #[must_use]
    pub const fn from_index(index: usize) -> Self {
        match index {
            0 => Self::X,
            1 => Self::Y,
            2 => Self::Z,
            _ => panic!("axis index out of range"),
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X => write!(f, "x"),
            Self::Y => write!(f, "y"),
            Self::Z => write!(f, "z"),
        }
    }
}

/// Rectangular box with a per-axis periodic or reflecting policy.
///
/// Halves and doubles of the extents are precomputed because the minimum
/// image fold and the reflection law consume them in every pair iteration.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SimBox {
    length: [f64; 3],
    half: [f64; 3],
    double: [f64; 3],
    periodic: [bool; 3],
}

impl SimBox {
    /// Creates a box from its extents and per-axis boundary policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any extent is not a positive finite
    /// number.
    pub fn new(length: [f64; 3], periodic: [bool; 3]) -> Result<Self> {
        for (axis, &l) in Axis::ALL.iter().zip(&length) {
            if !(l.is_finite() && l > 0.0) {
                return Err(Error::config(format!(
                    "box extent along {axis} must be positive and finite, got {l}"
                )));
            }
        }
        Ok(Self {
            length,
            half: length.map(|l| 0.5 * l),
            double: length.map(|l| 2.0 * l),
            periodic,
        })
    }

    /// Box extent along `axis`.
    #[must_use]
    pub const fn length(&self, axis: usize) -> f64 {
        self.length[axis]
    }

    /// All three box extents.
    #[must_use]
    pub const fn lengths(&self) -> [f64; 3] {
        self.length
    }

    /// Half the extent along `axis`.
    #[must_use]
    pub const fn half(&self, axis: usize) -> f64 {
        self.half[axis]
    }

    /// Smallest box extent.
    #[must_use]
    pub fn min_length(&self) -> f64 {
        self.length[0].min(self.length[1]).min(self.length[2])
    }

    /// Box volume.
    #[must_use]
    pub fn volume(&self) -> f64 {
        self.length[0] * self.length[1] * self.length[2]
    }

    /// Whether `axis` is periodic (otherwise it reflects).
    #[must_use]
    pub const fn is_periodic(&self, axis: usize) -> bool {
        self.periodic[axis]
    }

    /// Per-axis periodic flags.
    #[must_use]
    pub const fn periodic(&self) -> [bool; 3] {
        self.periodic
    }

    /// Corrects a per-axis position difference for the minimum image.
    ///
    /// Differences smaller than [`TINY`] in magnitude are lifted to
    /// `±TINY`, keeping their sign; an exactly zero difference maps to
    /// `+TINY`. On a periodic axis the result is folded into
    /// `(-L/2, L/2]` with a single add or subtract.
    #[must_use]
    pub fn correct_difference(&self, axis: usize, delta: f64) -> f64 {
        if delta.abs() < TINY {
            return if delta < 0.0 { -TINY } else { TINY };
        }
        if self.periodic[axis] {
            if delta > self.half[axis] {
                return delta - self.length[axis];
            }
            if delta <= -self.half[axis] {
                return delta + self.length[axis];
            }
        }
        delta
    }

    /// Corrects the full displacement `r_i - r_j` for the minimum image.
    #[must_use]
    pub fn correct_displacement(&self, delta: [f64; 3]) -> [f64; 3] {
        [
            self.correct_difference(0, delta[0]),
            self.correct_difference(1, delta[1]),
            self.correct_difference(2, delta[2]),
        ]
    }

    /// Folds `r` back into `[0, L)` along `axis`, flipping `v` on
    /// reflecting boundaries. Returns `false` once the retry budget is
    /// exhausted without reaching the box interior.
    #[must_use]
    pub fn correct_position_and_velocity(
        &self,
        axis: usize,
        r: &mut f64,
        v: &mut f64,
        max_trials: usize,
    ) -> bool {
        let l = self.length[axis];
        for _ in 0..=max_trials {
            if self.periodic[axis] {
                if *r > l {
                    *r -= l;
                } else if *r < 0.0 {
                    *r += l;
                } else if *r == l {
                    *r = 0.0;
                }
            } else if *r > l {
                *r = self.double[axis] - *r;
                *v = -*v;
            } else if *r < 0.0 {
                *r = -*r;
                *v = -*v;
            } else if *r == l {
                *r = next_below(l);
                *v = -*v;
            }
            if *r >= 0.0 && *r < l {
                return true;
            }
        }
        false
    }

    /// Applies [`Self::correct_position_and_velocity`] on all three axes of
    /// one particle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBox`] with the particle index and failing axis
    /// when the retry budget is exhausted.
    pub fn correct_particle(
        &self,
        particle: usize,
        r: [&mut f64; 3],
        v: [&mut f64; 3],
    ) -> Result<()> {
        let [rx, ry, rz] = r;
        let [vx, vy, vz] = v;
        for (axis, (r, v)) in [(rx, vx), (ry, vy), (rz, vz)].into_iter().enumerate() {
            if !self.correct_position_and_velocity(axis, r, v, MAX_CORRECTION_TRIALS) {
                return Err(Error::OutOfBox {
                    particle,
                    axis: Axis::from_index(axis),
                });
            }
        }
        Ok(())
    }
}

/// Largest representable value strictly below `limit`, found by shrinking
/// with multiples of [`TINY`].
#[must_use]
pub fn next_below(limit: f64) -> f64 {
    let mut k = 1.0;
    loop {
        let value = limit * (1.0 - k * TINY);
        if value < limit {
            return value;
        }
        k += 1.0;
    }
}
