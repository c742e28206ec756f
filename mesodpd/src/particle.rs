//! Structure-of-arrays particle state, species table and interaction
//! constants.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Table of particle species, indexed by the integer type id that the rest
/// of the engine uses. Tokens appear only at the I/O boundary.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SpeciesTable {
    tokens: Vec<String>,
    charges: Vec<f64>,
    molar_masses: Vec<f64>,
}

impl SpeciesTable {
    /// Builds the table from `(token, charge, molar mass)` rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on duplicate tokens or non-positive molar
    /// masses.
    pub fn new(rows: Vec<(String, f64, f64)>) -> Result<Self> {
        let mut table = Self::default();
        for (token, charge, molar_mass) in rows {
            if table.index_of(&token).is_some() {
                return Err(Error::config(format!("duplicate particle token `{token}`")));
            }
            if !(molar_mass.is_finite() && molar_mass > 0.0) {
                return Err(Error::config(format!(
                    "molar mass of `{token}` must be positive, got {molar_mass}"
                )));
            }
            table.tokens.push(token);
            table.charges.push(charge);
            table.molar_masses.push(molar_mass);
        }
        Ok(table)
    }

    /// Number of species.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Type id for `token`.
    #[must_use]
    pub fn index_of(&self, token: &str) -> Option<usize> {
        self.tokens.iter().position(|t| t == token)
    }

    /// Token of type `index`.
    #[must_use]
    pub fn token(&self, index: usize) -> &str {
        &self.tokens[index]
    }

    /// Charge of type `index`.
    #[must_use]
    pub fn charge(&self, index: usize) -> f64 {
        self.charges[index]
    }

    /// Molar mass of type `index`.
    #[must_use]
    pub fn molar_mass(&self, index: usize) -> f64 {
        self.molar_masses[index]
    }

    /// Smallest molar mass over all species.
    #[must_use]
    pub fn min_molar_mass(&self) -> f64 {
        self.molar_masses.iter().copied().fold(f64::INFINITY, f64::min)
    }
}

/// Symmetric table of conservative interaction constants `a_ij` by species
/// pair.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InteractionTable {
    species: usize,
    constants: Vec<f64>,
}

impl InteractionTable {
    /// Table of `species * species` constants, all initially unset.
    #[must_use]
    pub fn unset(species: usize) -> Self {
        Self {
            species,
            constants: vec![f64::NAN; species * species],
        }
    }

    /// Sets `a_ij` for the unordered species pair `(i, j)`.
    pub fn set(&mut self, i: usize, j: usize, a: f64) {
        self.constants[i * self.species + j] = a;
        self.constants[j * self.species + i] = a;
    }

    /// Interaction constant for the species pair `(i, j)`.
    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.constants[i * self.species + j]
    }

    /// Whether every pair of species has been assigned a constant.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.constants.iter().all(|a| a.is_finite())
    }
}

/// Structure-of-arrays state of all particles in the run.
///
/// Array lengths never change after construction; positions stay inside
/// `[0, L)` on every axis after each boundary correction.
#[derive(Clone, Debug, Default)]
pub struct ParticleSet {
    /// Positions in box coordinates, one array per axis.
    pub r: [Vec<f64>; 3],
    /// Velocities.
    pub v: [Vec<f64>; 3],
    /// Primary force accumulator.
    pub f: [Vec<f64>; 3],
    /// Secondary force accumulator, used by the self-consistent integrator
    /// for the dissipative component.
    pub f_two: [Vec<f64>; 3],
    /// Predicted-velocity scratch for the modified-Verlet integrators.
    pub v_new: [Vec<f64>; 3],
    /// Previous positions; allocated only while molecule fixations are
    /// active.
    pub r_old: Option<[Vec<f64>; 3]>,
    /// Species id per particle.
    pub species: Vec<u32>,
    /// Molecule type id per particle.
    pub molecule_type: Vec<u32>,
    /// Molecule instance id per particle.
    pub molecule_index: Vec<u32>,
    /// Charge per particle.
    pub charge: Vec<f64>,
    /// DPD mass per particle; all ones in unit-mass mode.
    pub mass: Vec<f64>,
    /// Molar mass per particle.
    pub molar_mass: Vec<f64>,
    /// Indices of all particles with a non-zero charge.
    pub charged: Vec<usize>,
}

impl ParticleSet {
    /// Number of particles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.r[0].len()
    }

    /// Whether the set holds no particles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.r[0].is_empty()
    }

    /// Allocates the per-particle work arrays for `n` particles.
    #[must_use]
    pub fn with_capacity(n: usize) -> Self {
        Self {
            r: [(); 3].map(|()| Vec::with_capacity(n)),
            v: [(); 3].map(|()| vec![0.0; n]),
            f: [(); 3].map(|()| vec![0.0; n]),
            f_two: [(); 3].map(|()| vec![0.0; n]),
            v_new: [(); 3].map(|()| vec![0.0; n]),
            r_old: None,
            species: Vec::with_capacity(n),
            molecule_type: Vec::with_capacity(n),
            molecule_index: Vec::with_capacity(n),
            charge: Vec::with_capacity(n),
            mass: Vec::with_capacity(n),
            molar_mass: Vec::with_capacity(n),
            charged: Vec::new(),
        }
    }

    /// Assigns DPD masses: all ones in unit-mass mode, otherwise the molar
    /// mass divided by the smallest molar mass in the species table.
    pub fn assign_masses(&mut self, unit_mass: bool, min_molar_mass: f64) {
        self.mass.clear();
        if unit_mass {
            self.mass.resize(self.len(), 1.0);
        } else {
            self.mass
                .extend(self.molar_mass.iter().map(|m| m / min_molar_mass));
        }
    }

    /// Rebuilds the charged-particle index list.
    pub fn collect_charged(&mut self) {
        self.charged = self
            .charge
            .iter()
            .enumerate()
            .filter(|(_, &q)| q != 0.0)
            .map(|(i, _)| i)
            .collect();
    }

    /// Allocates `r_old` (copying the current positions) if not yet present.
    pub fn ensure_old_positions(&mut self) {
        if self.r_old.is_none() {
            self.r_old = Some(self.r.clone());
        }
    }

    /// Saves the current positions into `r_old`, if allocated.
    pub fn save_old_positions(&mut self) {
        if let Some(r_old) = &mut self.r_old {
            for (old, current) in r_old.iter_mut().zip(&self.r) {
                old.copy_from_slice(current);
            }
        }
    }

    /// Clears the primary force accumulator.
    pub fn clear_forces(&mut self) {
        for axis in &mut self.f {
            axis.fill(0.0);
        }
    }

    /// Clears the secondary force accumulator.
    pub fn clear_secondary_forces(&mut self) {
        for axis in &mut self.f_two {
            axis.fill(0.0);
        }
    }

    /// Checks the primary force arrays for NaN or infinite components.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Numeric`] naming the particle on failure.
    pub fn check_forces_finite(&self) -> Result<()> {
        for axis in &self.f {
            if let Some(index) = axis.iter().position(|f| !f.is_finite()) {
                return Err(Error::Numeric(format!("force of particle {index}")));
            }
        }
        Ok(())
    }

    /// Checks the velocity arrays for NaN or infinite components.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Numeric`] naming the particle on failure.
    pub fn check_velocities_finite(&self) -> Result<()> {
        for axis in &self.v {
            if let Some(index) = axis.iter().position(|v| !v.is_finite()) {
                return Err(Error::Numeric(format!("velocity of particle {index}")));
            }
        }
        Ok(())
    }
}
