//! Shardlow S1 splitting over velocity-Verlet.

use super::{drift, enforce_positions, kick, maybe_rescale, Integrator, StepContext};
use crate::accumulator::{Accumulators, ConservativeScope, ForceModel};
use crate::error::Result;
use crate::geometry::SimBox;

/// Velocity-Verlet with the fluctuation-dissipation pair handled by the
/// implicit Shardlow S1 sweep before the deterministic half-steps.
pub struct S1Mvv {
    accumulators: Accumulators,
    first_call: bool,
}

impl S1Mvv {
    /// Creates the integrator with its accumulator set.
    ///
    /// # Errors
    ///
    /// Propagates grid-construction failures.
    pub fn new(sim_box: &SimBox, model: &ForceModel, use_cache: bool) -> Result<Self> {
        Ok(Self {
            accumulators: Accumulators::new(sim_box, model, use_cache)?,
            first_call: true,
        })
    }
}

impl Integrator for S1Mvv {
    fn calculate(&mut self, ctx: &mut StepContext<'_>, step: u64) -> Result<()> {
        let h = ctx.dt;
        let half = 0.5 * h;

        if self.first_call {
            self.accumulators.conservative_forces(
                ctx.particles,
                ctx.model,
                ctx.sim_box,
                ctx.pool,
                ConservativeScope::Full,
            )?;
            ctx.constraints
                .add_body_forces(ctx.particles, step.saturating_sub(1));
            self.first_call = false;
        }

        self.accumulators.shardlow_velocity_update(
            ctx.particles,
            ctx.model,
            ctx.sim_box,
            ctx.pool,
            h,
            step,
        )?;

        kick(ctx.particles, half);
        drift(ctx.particles, h);
        enforce_positions(ctx, step)?;
        self.accumulators.invalidate();

        self.accumulators.conservative_forces(
            ctx.particles,
            ctx.model,
            ctx.sim_box,
            ctx.pool,
            ConservativeScope::Full,
        )?;
        let accelerated = ctx.constraints.add_body_forces(ctx.particles, step);

        kick(ctx.particles, half);
        ctx.constraints.apply_fixed_velocities(ctx.particles, step);
        maybe_rescale(ctx, step, accelerated);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::Constraints;
    use crate::particle::{InteractionTable, ParticleSet};
    use crate::rng::RandomConfig;
    use crate::utils;
    use rayon::ThreadPoolBuilder;

    fn thermostatted_model(a: f64, sigma: f64, kt: f64) -> ForceModel {
        let mut interactions = InteractionTable::unset(1);
        interactions.set(0, 0, a);
        ForceModel {
            cutoff: 1.0,
            kt,
            sigma,
            gamma: sigma * sigma / (2.0 * kt),
            interactions,
            bond_chunks: Vec::new(),
            electrostatics: None,
            random: RandomConfig::with_seed(99),
        }
    }

    fn fluid(n_per_axis: usize, spacing: f64) -> ParticleSet {
        let n = n_per_axis * n_per_axis * n_per_axis;
        let mut particles = ParticleSet::with_capacity(n);
        for z in 0..n_per_axis {
            for y in 0..n_per_axis {
                for x in 0..n_per_axis {
                    particles.r[0].push((x as f64 + 0.5) * spacing);
                    particles.r[1].push((y as f64 + 0.5) * spacing);
                    particles.r[2].push((z as f64 + 0.5) * spacing);
                }
            }
        }
        particles.species = vec![0; n];
        particles.charge = vec![0.0; n];
        particles.molar_mass = vec![1.0; n];
        particles.mass = vec![1.0; n];
        particles
    }

    #[test]
    fn thermostat_drives_a_cold_lattice_toward_the_target_temperature() {
        let n_per_axis = 4;
        let spacing = 1.0;
        let length = n_per_axis as f64 * spacing;
        let sim_box = SimBox::new([length; 3], [true; 3]).unwrap();
        let model = thermostatted_model(10.0, 3.0, 1.0);
        let pool = ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let constraints = Constraints::default();
        let mut particles = fluid(n_per_axis, spacing);
        let mut integrator = S1Mvv::new(&sim_box, &model, false).unwrap();

        for step in 1..=400 {
            let mut ctx = StepContext {
                particles: &mut particles,
                sim_box: &sim_box,
                model: &model,
                constraints: &constraints,
                pool: &pool,
                dt: 0.04,
                velocity_scaling_steps: 0,
            };
            integrator.calculate(&mut ctx, step).unwrap();
        }

        // the cold start must heat up into the vicinity of kT = 1; wide
        // margins keep the stochastic test stable
        let temperature = utils::temperature(&particles.v, &particles.mass);
        assert!(
            (0.5..2.0).contains(&temperature),
            "temperature {temperature} failed to approach the target"
        );
    }

    #[test]
    fn cached_and_uncached_runs_agree() {
        let sim_box = SimBox::new([6.0; 3], [true; 3]).unwrap();
        let model = thermostatted_model(5.0, 1.0, 1.0);
        let pool = ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let constraints = Constraints::default();

        let run = |use_cache: bool| {
            let mut particles = fluid(3, 2.0);
            let mut integrator = S1Mvv::new(&sim_box, &model, use_cache).unwrap();
            for step in 1..=10 {
                let mut ctx = StepContext {
                    particles: &mut particles,
                    sim_box: &sim_box,
                    model: &model,
                    constraints: &constraints,
                    pool: &pool,
                    dt: 0.02,
                    velocity_scaling_steps: 0,
                };
                integrator.calculate(&mut ctx, step).unwrap();
            }
            particles
        };

        let plain = run(false);
        let cached = run(true);
        for axis in 0..3 {
            for p in 0..plain.len() {
                assert!((plain.r[axis][p] - cached.r[axis][p]).abs() < 1e-12);
                assert!((plain.v[axis][p] - cached.v[axis][p]).abs() < 1e-12);
            }
        }
    }
}
