//! Groot-Warren modified velocity-Verlet.

use super::{drift, enforce_positions, kick, maybe_rescale, predict, Integrator, StepContext};
use crate::accumulator::{Accumulators, ForceModel};
use crate::error::{Error, Result};
use crate::geometry::SimBox;

/// The Groot-Warren scheme: a `lambda`-weighted velocity prediction feeds
/// the dissipative force of the corrector half-step.
pub struct GwMvv {
    lambda: f64,
    accumulators: Accumulators,
    first_call: bool,
}

impl GwMvv {
    /// Creates the integrator with its accumulator set.
    ///
    /// # Errors
    ///
    /// Rejects a `lambda` outside `[0, 1]` and propagates grid failures.
    pub fn new(lambda: f64, sim_box: &SimBox, model: &ForceModel) -> Result<Self> {
        if !(0.0..=1.0).contains(&lambda) {
            return Err(Error::config(format!(
                "GWMVV lambda must lie in [0, 1], got {lambda}"
            )));
        }
        Ok(Self {
            lambda,
            accumulators: Accumulators::new(sim_box, model, false)?,
            first_call: true,
        })
    }
}

impl Integrator for GwMvv {
    fn calculate(&mut self, ctx: &mut StepContext<'_>, step: u64) -> Result<()> {
        let h = ctx.dt;
        let half = 0.5 * h;

        if self.first_call {
            // the predictor has not run yet, so the dissipative part reads
            // the current velocities
            ctx.particles.v_new = ctx.particles.v.clone();
            self.accumulators.full_forces(
                ctx.particles,
                ctx.model,
                ctx.sim_box,
                ctx.pool,
                h,
                step.saturating_sub(1),
                true,
            )?;
            ctx.constraints
                .add_body_forces(ctx.particles, step.saturating_sub(1));
            self.first_call = false;
        }

        predict(ctx.particles, self.lambda * h);
        kick(ctx.particles, half);
        drift(ctx.particles, h);
        enforce_positions(ctx, step)?;
        self.accumulators.invalidate();

        self.accumulators.full_forces(
            ctx.particles,
            ctx.model,
            ctx.sim_box,
            ctx.pool,
            h,
            step,
            true,
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
    use float_cmp::assert_approx_eq;
    use rayon::ThreadPoolBuilder;

    fn conservative_model(a: f64) -> ForceModel {
        let mut interactions = InteractionTable::unset(1);
        interactions.set(0, 0, a);
        ForceModel {
            cutoff: 1.0,
            kt: 1.0,
            sigma: 0.0,
            gamma: 0.0,
            interactions,
            bond_chunks: Vec::new(),
            electrostatics: None,
            random: RandomConfig::with_seed(1),
        }
    }

    fn two_particles(separation: f64) -> ParticleSet {
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
    fn conservative_pair_oscillates_with_bounded_energy_drift() {
        let sim_box = SimBox::new([10.0; 3], [true; 3]).unwrap();
        let model = conservative_model(25.0);
        let pool = ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let constraints = Constraints::default();
        let mut particles = two_particles(0.5);
        let mut integrator = GwMvv::new(0.5, &sim_box, &model).unwrap();

        let u0 = 25.0 * 1.0 * 0.25 / 2.0; // a c w^2 / 2 at w = 0.5
        let mut max_separation: f64 = 0.5;
        for step in 1..=50 {
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
            let separation = (particles.r[0][1] - particles.r[0][0]).abs().min(
                10.0 - (particles.r[0][1] - particles.r[0][0]).abs(),
            );
            max_separation = max_separation.max(separation);
        }

        // the pair was pushed apart past the cutoff; all potential energy
        // has turned into kinetic energy, up to the integration error
        assert!(max_separation > 1.0);
        let kinetic = 0.5
            * (particles.v[0][0] * particles.v[0][0] + particles.v[0][1] * particles.v[0][1]);
        assert!((kinetic - u0).abs() / u0 < 1e-3);
    }

    #[test]
    fn momentum_is_conserved_without_thermostats() {
        let sim_box = SimBox::new([10.0; 3], [true; 3]).unwrap();
        let model = conservative_model(25.0);
        let pool = ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let constraints = Constraints::default();
        let mut particles = two_particles(0.5);
        particles.v[0] = vec![0.3, -0.1];
        let mut integrator = GwMvv::new(0.5, &sim_box, &model).unwrap();

        let before: f64 = particles.v[0].iter().sum();
        for step in 1..=50 {
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
        let after: f64 = particles.v[0].iter().sum();
        assert_approx_eq!(f64, before, after, epsilon = 1e-10);
    }

    #[test]
    fn reflective_wall_reverses_a_free_particle() {
        let sim_box = SimBox::new([10.0; 3], [false, true, true]).unwrap();
        let model = conservative_model(0.0);
        let pool = ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let constraints = Constraints::default();

        let mut particles = ParticleSet::with_capacity(1);
        particles.r = [vec![0.1], vec![5.0], vec![5.0]];
        particles.v = [vec![-1.0], vec![0.0], vec![0.0]];
        particles.species = vec![0];
        particles.charge = vec![0.0];
        particles.molar_mass = vec![1.0];
        particles.mass = vec![1.0];
        let mut integrator = GwMvv::new(0.5, &sim_box, &model).unwrap();

        for step in 1..=20 {
            let mut ctx = StepContext {
                particles: &mut particles,
                sim_box: &sim_box,
                model: &model,
                constraints: &constraints,
                pool: &pool,
                dt: 0.1,
                velocity_scaling_steps: 0,
            };
            integrator.calculate(&mut ctx, step).unwrap();
            if step == 2 {
                // the second step carries the particle through the wall at
                // x = 0 and the reflection puts it back at +0.1
                assert_approx_eq!(f64, particles.r[0][0], 0.1, epsilon = 1e-12);
                assert_approx_eq!(f64, particles.v[0][0], 1.0);
            }
        }
        // after the bounce the particle climbs by 0.1 per step
        assert_approx_eq!(f64, particles.r[0][0], 1.9, epsilon = 1e-9);
        assert_approx_eq!(f64, particles.v[0][0], 1.0);
    }
}
