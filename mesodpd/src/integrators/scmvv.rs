//! Self-consistent modified velocity-Verlet.

use super::{drift, enforce_positions, kick, kick_secondary, maybe_rescale, predict, Integrator,
            StepContext};
use crate::accumulator::{Accumulators, ForceModel};
use crate::error::{Error, Result};
use crate::geometry::SimBox;

/// Modified velocity-Verlet that iterates the velocity-dependent
/// dissipative force to self-consistency.
///
/// The primary force array carries the conservative and random parts, the
/// secondary array the dissipative part, so the two can be recombined in
/// every iteration without re-evaluating the expensive half.
pub struct ScMvv {
    iterations: u32,
    accumulators: Accumulators,
}

impl ScMvv {
    /// Creates the integrator with its accumulator set.
    ///
    /// # Errors
    ///
    /// Rejects zero self-consistency iterations and propagates grid
    /// failures.
    pub fn new(
        iterations: u32,
        sim_box: &SimBox,
        model: &ForceModel,
        use_cache: bool,
    ) -> Result<Self> {
        if iterations == 0 {
            return Err(Error::config(
                "SCMVV needs at least one self-consistency iteration",
            ));
        }
        Ok(Self {
            iterations,
            accumulators: Accumulators::new(sim_box, model, use_cache)?,
        })
    }
}

impl Integrator for ScMvv {
    fn calculate(&mut self, ctx: &mut StepContext<'_>, step: u64) -> Result<()> {
        let h = ctx.dt;
        let half = 0.5 * h;

        // both force arrays still hold the previous step's values; they
        // are zero on the first call
        kick(ctx.particles, half);
        kick_secondary(ctx.particles, half);

        drift(ctx.particles, h);
        enforce_positions(ctx, step)?;
        self.accumulators.invalidate();

        self.accumulators.conservative_and_random_forces(
            ctx.particles,
            ctx.model,
            ctx.sim_box,
            ctx.pool,
            h,
            step,
        )?;
        let accelerated = ctx.constraints.add_body_forces(ctx.particles, step);

        predict(ctx.particles, half);
        for _ in 0..self.iterations {
            // v = v_new + (h/2) f_two / m, then refresh the dissipative
            // force from the new velocities
            for axis in 0..3 {
                let (v, v_new) = (&mut ctx.particles.v[axis], &ctx.particles.v_new[axis]);
                v.copy_from_slice(v_new);
            }
            kick_secondary(ctx.particles, half);
            self.accumulators.dissipative_forces(
                ctx.particles,
                ctx.model,
                ctx.sim_box,
                ctx.pool,
            )?;
        }

        ctx.constraints.apply_fixed_velocities(ctx.particles, step);
        maybe_rescale(ctx, step, accelerated);
        Ok(())
    }
}
