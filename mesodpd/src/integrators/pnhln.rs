//! Pairwise Nose-Hoover-Langevin thermostat integrator.

use super::{drift, enforce_positions, kick, maybe_rescale, Integrator, StepContext};
use crate::accumulator::{Accumulators, ConservativeScope, ForceModel};
use crate::error::{Error, Result};
use crate::geometry::SimBox;
use crate::rng::{RandomConfig, RandomSource};

/// PNHLN integrator after Leimkuhler and Shang: a global thermostat
/// variable `xi` modulates the pairwise friction, while an
/// Ornstein-Uhlenbeck update keeps `xi` itself at temperature.
pub struct Pnhln {
    mu: f64,
    xi: f64,
    thermostat_rng: RandomSource,
    accumulators: Accumulators,
}

impl Pnhln {
    /// Creates the integrator; `xi` starts at the DPD friction constant.
    ///
    /// # Errors
    ///
    /// Rejects a non-positive coupling mass `mu` and propagates grid
    /// failures.
    pub fn new(mu: f64, sim_box: &SimBox, model: &ForceModel, use_cache: bool) -> Result<Self> {
        if !(mu.is_finite() && mu > 0.0) {
            return Err(Error::config(format!(
                "PNHLN coupling mass must be positive, got {mu}"
            )));
        }
        // the thermostat consumes its own stream so that pair noise stays
        // aligned between integrators
        let thermostat_config = RandomConfig {
            seed: model.random.seed.wrapping_add(0x9e37_79b9_7f4a_7c15),
            ..model.random
        };
        Ok(Self {
            mu,
            xi: model.gamma,
            thermostat_rng: RandomSource::new(&thermostat_config),
            accumulators: Accumulators::new(sim_box, model, use_cache)?,
        })
    }

    /// Current thermostat variable.
    #[must_use]
    pub const fn xi(&self) -> f64 {
        self.xi
    }
}

impl Integrator for Pnhln {
    fn calculate(&mut self, ctx: &mut StepContext<'_>, step: u64) -> Result<()> {
        let h = ctx.dt;
        let half = 0.5 * h;

        drift(ctx.particles, half);
        enforce_positions(ctx, step)?;
        self.accumulators.invalidate();

        self.accumulators.conservative_forces(
            ctx.particles,
            ctx.model,
            ctx.sim_box,
            ctx.pool,
            ConservativeScope::Full,
        )?;
        ctx.constraints.add_body_forces(ctx.particles, step);
        kick(ctx.particles, half);

        let control = self.accumulators.pnhln_velocity_update(
            ctx.particles,
            ctx.model,
            ctx.sim_box,
            ctx.pool,
            half,
            self.xi,
            2 * step,
            true,
        )?;

        // exact Ornstein-Uhlenbeck update of the thermostat variable
        let gamma = ctx.model.gamma;
        let decay = (-gamma * h).exp();
        let control_kick = control / self.mu * half;
        let noise = self.thermostat_rng.gaussian()
            * (ctx.model.kt / self.mu * (1.0 - (-2.0 * gamma * h).exp())).sqrt();
        self.xi = decay * (self.xi + control_kick) + noise + control_kick;

        self.accumulators.pnhln_velocity_update(
            ctx.particles,
            ctx.model,
            ctx.sim_box,
            ctx.pool,
            half,
            self.xi,
            2 * step + 1,
            false,
        )?;

        drift(ctx.particles, half);
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
