//! Force and potential accumulation passes.
//!
//! An [`Accumulators`] value owns the cell grids and the cached
//! cell-to-particle assignments of one integrator. The first pass after a
//! position change rebuilds the assignment (and, when enabled, the
//! pair-distance cache); later passes of the same step reuse them.

use crate::adders::{PressureAdders, ScalarAdder};
use crate::bonds::{self, HarmonicBond};
use crate::cells::{CellAssignment, CellGrid};
use crate::dpd::{
    ConservativeForceKernel, DissipativeForceKernel, DpdInputs, DpdPotentialKernel,
    FullForceKernel, PnhlnKernel, ShardlowKernel,
};
use crate::electrostatics::{CoulombForceKernel, CoulombPotentialKernel, ElectrostaticsParams};
use crate::error::Result;
use crate::geometry::SimBox;
use crate::pairs::{PairCache, PairDriver, PairKernel, SharedAxes};
use crate::particle::{InteractionTable, ParticleSet};
use crate::rng::RandomConfig;
use rayon::ThreadPool;

/// Static description of all forces acting in the run.
#[derive(Clone, Debug)]
pub struct ForceModel {
    /// DPD interaction cutoff.
    pub cutoff: f64,
    /// Target temperature `kT`.
    pub kt: f64,
    /// Random-force amplitude `sigma`.
    pub sigma: f64,
    /// Friction constant `gamma = sigma^2 / (2 kT)`.
    pub gamma: f64,
    /// Conservative interaction constants by species pair.
    pub interactions: InteractionTable,
    /// Harmonic bonds, pre-partitioned into race-free chunks.
    pub bond_chunks: Vec<Vec<HarmonicBond>>,
    /// Electrostatic interaction, if any particle carries charge.
    pub electrostatics: Option<ElectrostaticsParams>,
    /// Noise configuration shared by all stochastic kernels.
    pub random: RandomConfig,
}

impl ForceModel {
    fn inputs<'a>(&'a self, species: &'a [u32]) -> DpdInputs<'a> {
        DpdInputs {
            species,
            interactions: &self.interactions,
            cutoff: self.cutoff,
        }
    }
}

/// Which conservative contributions a pass collects.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConservativeScope {
    /// DPD pair force plus bonds plus electrostatics.
    Full,
    /// DPD pair force only.
    DpdOnly,
}

/// Potential components and virials of one collection pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct PotentialReport {
    /// DPD pair potential.
    pub dpd: f64,
    /// Harmonic bond potential.
    pub bond: f64,
    /// Electrostatic potential.
    pub electrostatic: f64,
    /// Diagonal virial sums over all force families.
    pub virial: [f64; 3],
    /// Diagonal virial sums over the DPD pair force only.
    pub dpd_virial: [f64; 3],
}

impl PotentialReport {
    /// Total potential energy.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.dpd + self.bond + self.electrostatic
    }
}

/// Grids, assignments and caches owned by one integrator.
pub struct Accumulators {
    grid: CellGrid,
    assignment: Option<CellAssignment>,
    cache: Option<PairCache>,
    use_cache: bool,
    es_grid: Option<CellGrid>,
    es_assignment: Option<CellAssignment>,
}

impl Accumulators {
    /// Builds the cell grids for the model.
    ///
    /// # Errors
    ///
    /// Propagates grid-construction failures ([`crate::Error::BoxTooSmall`]).
    pub fn new(sim_box: &SimBox, model: &ForceModel, use_cache: bool) -> Result<Self> {
        let grid = CellGrid::new(sim_box, model.cutoff)?;
        let es_grid = match &model.electrostatics {
            Some(params) => Some(CellGrid::new(sim_box, params.cutoff)?),
            None => None,
        };
        Ok(Self {
            grid,
            assignment: None,
            cache: None,
            use_cache,
            es_grid,
            es_assignment: None,
        })
    }

    /// Drops all cached geometry; must be called after any position change.
    pub fn invalidate(&mut self) {
        self.assignment = None;
        self.cache = None;
        self.es_assignment = None;
    }

    fn ensure_assignment(&mut self, r: &[Vec<f64>; 3]) {
        if self.assignment.is_none() {
            self.assignment = Some(self.grid.assign(r));
        }
    }

    fn ensure_es_assignment(&mut self, r: &[Vec<f64>; 3], charged: &[usize]) {
        if self.es_assignment.is_none() {
            if let Some(grid) = &self.es_grid {
                self.es_assignment = Some(grid.assign_subset(r, charged));
            }
        }
    }

    // one short-range pass over the DPD grid, reusing or building the pair
    // cache when caching is enabled
    fn run_pass<K: PairKernel>(
        &mut self,
        pool: &ThreadPool,
        sim_box: &SimBox,
        r: &[Vec<f64>; 3],
        kernel: &K,
    ) {
        let driver = PairDriver::new(&self.grid, sim_box);
        // UNWRAP: ensure_assignment ran before every pass
        let assignment = self.assignment.as_ref().unwrap_or_else(|| unreachable!());
        if self.use_cache {
            if let Some(cache) = &self.cache {
                driver.for_each_cached_pair(pool, cache, kernel);
            } else {
                self.cache = Some(driver.for_each_pair_caching(pool, r, assignment, kernel));
            }
        } else {
            driver.for_each_pair(pool, r, assignment, kernel);
        }
    }

    fn run_es_pass<K: PairKernel>(
        &self,
        pool: &ThreadPool,
        sim_box: &SimBox,
        r: &[Vec<f64>; 3],
        kernel: &K,
    ) {
        if let (Some(grid), Some(assignment)) = (&self.es_grid, &self.es_assignment) {
            PairDriver::new(grid, sim_box).for_each_pair(pool, r, assignment, kernel);
        }
    }

    /// Accumulates conservative forces into `f`: the DPD pair force and,
    /// for [`ConservativeScope::Full`], bonds and electrostatics.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Numeric`] if any force component is not
    /// finite afterwards.
    pub fn conservative_forces(
        &mut self,
        particles: &mut ParticleSet,
        model: &ForceModel,
        sim_box: &SimBox,
        pool: &ThreadPool,
        scope: ConservativeScope,
    ) -> Result<()> {
        self.ensure_assignment(&particles.r);
        if scope == ConservativeScope::Full {
            self.ensure_es_assignment(&particles.r, &particles.charged);
        }
        particles.clear_forces();

        let ParticleSet {
            r,
            f,
            species,
            charge,
            ..
        } = particles;
        let kernel = ConservativeForceKernel {
            inputs: model.inputs(species),
            forces: SharedAxes::new(f),
        };
        self.run_pass(pool, sim_box, r, &kernel);
        drop(kernel);

        if scope == ConservativeScope::Full {
            bonds::add_bond_forces(&model.bond_chunks, r, sim_box, SharedAxes::new(f), pool);
            if let Some(params) = model.electrostatics {
                let kernel = CoulombForceKernel {
                    params,
                    charge,
                    forces: SharedAxes::new(f),
                };
                self.run_es_pass(pool, sim_box, r, &kernel);
            }
        }
        particles.check_forces_finite()
    }

    /// Accumulates the full Groot-Warren force sum (conservative + random +
    /// dissipative) plus bonds and electrostatics into `f`.
    ///
    /// The dissipative part reads the predicted velocities when
    /// `use_predicted` is set, the current velocities otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Numeric`] on non-finite force components.
    pub fn full_forces(
        &mut self,
        particles: &mut ParticleSet,
        model: &ForceModel,
        sim_box: &SimBox,
        pool: &ThreadPool,
        dt: f64,
        step: u64,
        use_predicted: bool,
    ) -> Result<()> {
        self.ensure_assignment(&particles.r);
        self.ensure_es_assignment(&particles.r, &particles.charged);
        particles.clear_forces();

        let ParticleSet {
            r,
            v,
            v_new,
            f,
            species,
            charge,
            ..
        } = particles;
        let velocities = if use_predicted { &*v_new } else { &*v };
        let kernel = FullForceKernel {
            inputs: model.inputs(species),
            gamma: model.gamma,
            sigma: model.sigma,
            inv_sqrt_dt: 1.0 / dt.sqrt(),
            seed: model.random.seed,
            step,
            gaussian: model.random.gaussian,
            velocities,
            forces: SharedAxes::new(f),
        };
        self.run_pass(pool, sim_box, r, &kernel);
        drop(kernel);

        bonds::add_bond_forces(&model.bond_chunks, r, sim_box, SharedAxes::new(f), pool);
        if let Some(params) = model.electrostatics {
            let kernel = CoulombForceKernel {
                params,
                charge,
                forces: SharedAxes::new(f),
            };
            self.run_es_pass(pool, sim_box, r, &kernel);
        }
        particles.check_forces_finite()
    }

    /// Accumulates the dissipative force alone into the secondary force
    /// array, as the self-consistent integrator iterates it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Numeric`] on non-finite force components.
    pub fn dissipative_forces(
        &mut self,
        particles: &mut ParticleSet,
        model: &ForceModel,
        sim_box: &SimBox,
        pool: &ThreadPool,
    ) -> Result<()> {
        self.ensure_assignment(&particles.r);
        particles.clear_secondary_forces();

        let ParticleSet {
            r,
            v,
            f_two,
            species,
            ..
        } = particles;
        let kernel = DissipativeForceKernel {
            inputs: model.inputs(species),
            gamma: model.gamma,
            velocities: v,
            forces: SharedAxes::new(f_two),
        };
        self.run_pass(pool, sim_box, r, &kernel);
        drop(kernel);

        for axis in &particles.f_two {
            if let Some(index) = axis.iter().position(|x| !x.is_finite()) {
                return Err(crate::Error::Numeric(format!(
                    "dissipative force of particle {index}"
                )));
            }
        }
        Ok(())
    }

    /// Accumulates the conservative random-plus-conservative pair of the
    /// self-consistent scheme into `f` (no dissipative part).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Numeric`] on non-finite force components.
    pub fn conservative_and_random_forces(
        &mut self,
        particles: &mut ParticleSet,
        model: &ForceModel,
        sim_box: &SimBox,
        pool: &ThreadPool,
        dt: f64,
        step: u64,
    ) -> Result<()> {
        self.ensure_assignment(&particles.r);
        self.ensure_es_assignment(&particles.r, &particles.charged);
        particles.clear_forces();

        let ParticleSet {
            r,
            f,
            species,
            charge,
            ..
        } = particles;
        let inputs = model.inputs(species);
        let conservative = ConservativeForceKernel {
            inputs,
            forces: SharedAxes::new(f),
        };
        self.run_pass(pool, sim_box, r, &conservative);
        drop(conservative);
        let random = crate::dpd::RandomForceKernel {
            inputs,
            sigma: model.sigma,
            inv_sqrt_dt: 1.0 / dt.sqrt(),
            seed: model.random.seed,
            step,
            gaussian: model.random.gaussian,
            forces: SharedAxes::new(f),
        };
        self.run_pass(pool, sim_box, r, &random);
        drop(random);

        bonds::add_bond_forces(&model.bond_chunks, r, sim_box, SharedAxes::new(f), pool);
        if let Some(params) = model.electrostatics {
            let kernel = CoulombForceKernel {
                params,
                charge,
                forces: SharedAxes::new(f),
            };
            self.run_es_pass(pool, sim_box, r, &kernel);
        }
        particles.check_forces_finite()
    }

    /// Runs the Shardlow S1 pairwise velocity update in place.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Numeric`] on non-finite velocities.
    pub fn shardlow_velocity_update(
        &mut self,
        particles: &mut ParticleSet,
        model: &ForceModel,
        sim_box: &SimBox,
        pool: &ThreadPool,
        dt: f64,
        step: u64,
    ) -> Result<()> {
        self.ensure_assignment(&particles.r);
        let ParticleSet {
            r,
            v,
            species,
            mass,
            ..
        } = particles;
        let kernel = ShardlowKernel {
            inputs: model.inputs(species),
            gamma: model.gamma,
            sigma: model.sigma,
            dt,
            seed: model.random.seed,
            step,
            gaussian: model.random.gaussian,
            mass,
            velocities: SharedAxes::new(v),
        };
        self.run_pass(pool, sim_box, r, &kernel);
        drop(kernel);
        particles.check_velocities_finite()
    }

    /// Runs one PNHLN pairwise velocity half-step in place and returns the
    /// thermostat control sum when `accumulate_control` is set.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Numeric`] on non-finite velocities.
    #[allow(clippy::too_many_arguments)]
    pub fn pnhln_velocity_update(
        &mut self,
        particles: &mut ParticleSet,
        model: &ForceModel,
        sim_box: &SimBox,
        pool: &ThreadPool,
        half_dt: f64,
        xi: f64,
        stream: u64,
        accumulate_control: bool,
    ) -> Result<f64> {
        self.ensure_assignment(&particles.r);
        let control = ScalarAdder::new();
        let ParticleSet {
            r,
            v,
            species,
            mass,
            ..
        } = particles;
        let kernel = PnhlnKernel {
            inputs: model.inputs(species),
            xi,
            sigma: model.sigma,
            kt: model.kt,
            half_dt,
            seed: model.random.seed,
            step: stream,
            gaussian: model.random.gaussian,
            mass,
            velocities: SharedAxes::new(v),
            control: accumulate_control.then_some(&control),
        };
        self.run_pass(pool, sim_box, r, &kernel);
        drop(kernel);
        particles.check_velocities_finite()?;
        Ok(control.sum())
    }

    /// Collects all potential components and virials at the current
    /// positions.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible for symmetry with the force
    /// passes.
    pub fn potentials(
        &mut self,
        particles: &mut ParticleSet,
        model: &ForceModel,
        sim_box: &SimBox,
        pool: &ThreadPool,
    ) -> Result<PotentialReport> {
        self.ensure_assignment(&particles.r);
        self.ensure_es_assignment(&particles.r, &particles.charged);

        let dpd_potential = ScalarAdder::new();
        let pressure = PressureAdders::new();
        let dpd_pressure = PressureAdders::new();
        let kernel = DpdPotentialKernel {
            inputs: model.inputs(&particles.species),
            potential: &dpd_potential,
            pressure: &pressure,
            dpd_pressure: &dpd_pressure,
        };
        self.run_pass(pool, sim_box, &particles.r, &kernel);
        drop(kernel);

        let bond = bonds::bond_potential(
            &model.bond_chunks,
            &particles.r,
            sim_box,
            Some(&pressure),
        );

        let mut electrostatic = 0.0;
        if let Some(params) = model.electrostatics {
            let es_potential = ScalarAdder::new();
            let kernel = CoulombPotentialKernel {
                params,
                charge: &particles.charge,
                potential: &es_potential,
                pressure: &pressure,
            };
            self.run_es_pass(pool, sim_box, &particles.r, &kernel);
            electrostatic = es_potential.sum();
        }

        Ok(PotentialReport {
            dpd: dpd_potential.sum(),
            bond,
            electrostatic,
            virial: pressure.sums(),
            dpd_virial: dpd_pressure.sums(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::RandomConfig;
    use float_cmp::assert_approx_eq;
    use rayon::ThreadPoolBuilder;

    fn simple_model(a: f64, sigma: f64, kt: f64) -> ForceModel {
        let mut interactions = InteractionTable::unset(1);
        interactions.set(0, 0, a);
        ForceModel {
            cutoff: 1.0,
            kt,
            sigma,
            gamma: if kt > 0.0 { sigma * sigma / (2.0 * kt) } else { 0.0 },
            interactions,
            bond_chunks: Vec::new(),
            electrostatics: None,
            random: RandomConfig::with_seed(7),
        }
    }

    fn two_particle_set(separation: f64) -> ParticleSet {
        let mut particles = ParticleSet::with_capacity(2);
        particles.r = [
            vec![5.0, 5.0 + separation],
            vec![5.0, 5.0],
            vec![5.0, 5.0],
        ];
        particles.species = vec![0, 0];
        particles.charge = vec![0.0, 0.0];
        particles.molar_mass = vec![1.0, 1.0];
        particles.mass = vec![1.0, 1.0];
        particles
    }

    #[test]
    fn conservative_pass_is_newtonian() {
        let sim_box = SimBox::new([10.0; 3], [true; 3]).unwrap();
        let model = simple_model(25.0, 0.0, 1.0);
        let pool = ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let mut acc = Accumulators::new(&sim_box, &model, false).unwrap();
        let mut particles = two_particle_set(0.5);

        acc.conservative_forces(
            &mut particles,
            &model,
            &sim_box,
            &pool,
            ConservativeScope::Full,
        )
        .unwrap();
        // particle 1 sits to the right and is pushed further right
        assert!(particles.f[0][1] > 0.0);
        assert_approx_eq!(f64, particles.f[0][0], -particles.f[0][1]);
        assert_approx_eq!(f64, particles.f[0][1], 25.0 * 0.5);
    }

    #[test]
    fn cached_pass_reproduces_the_uncached_forces() {
        let sim_box = SimBox::new([10.0; 3], [true; 3]).unwrap();
        let model = simple_model(25.0, 3.0, 1.0);
        let pool = ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let mut particles = two_particle_set(0.4);

        let mut uncached = Accumulators::new(&sim_box, &model, false).unwrap();
        uncached
            .full_forces(&mut particles, &model, &sim_box, &pool, 0.04, 3, false)
            .unwrap();
        let reference = particles.f.clone();

        let mut cached = Accumulators::new(&sim_box, &model, true).unwrap();
        // first pass builds the cache, second replays it
        cached
            .full_forces(&mut particles, &model, &sim_box, &pool, 0.04, 3, false)
            .unwrap();
        cached
            .full_forces(&mut particles, &model, &sim_box, &pool, 0.04, 3, false)
            .unwrap();
        for axis in 0..3 {
            for p in 0..2 {
                assert_approx_eq!(
                    f64,
                    particles.f[axis][p],
                    reference[axis][p],
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn potential_report_matches_hand_computation() {
        let sim_box = SimBox::new([10.0; 3], [true; 3]).unwrap();
        let model = simple_model(25.0, 0.0, 1.0);
        let pool = ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let mut acc = Accumulators::new(&sim_box, &model, false).unwrap();
        let mut particles = two_particle_set(0.5);

        let report = acc
            .potentials(&mut particles, &model, &sim_box, &pool)
            .unwrap();
        // U = a c w^2 / 2 at w = 0.5
        assert_approx_eq!(f64, report.dpd, 25.0 * 0.125, epsilon = 1e-9);
        assert_approx_eq!(f64, report.total(), report.dpd);
        // virial along x only: dx * Fx = 0.5 * 12.5
        assert_approx_eq!(f64, report.virial[0], 6.25, epsilon = 1e-6);
        assert!(report.virial[1].abs() < 1e-9);
    }

    #[test]
    fn invalidation_forces_a_rebuild() {
        let sim_box = SimBox::new([10.0; 3], [true; 3]).unwrap();
        let model = simple_model(25.0, 0.0, 1.0);
        let pool = ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let mut acc = Accumulators::new(&sim_box, &model, false).unwrap();
        let mut particles = two_particle_set(0.5);

        acc.conservative_forces(
            &mut particles,
            &model,
            &sim_box,
            &pool,
            ConservativeScope::DpdOnly,
        )
        .unwrap();
        let before = particles.f[0][1];

        // move the pair apart and invalidate; the new force must shrink
        particles.r[0][1] = 5.9;
        acc.invalidate();
        acc.conservative_forces(
            &mut particles,
            &model,
            &sim_box,
            &pool,
            ConservativeScope::DpdOnly,
        )
        .unwrap();
        assert!(particles.f[0][1] < before);
    }
}
