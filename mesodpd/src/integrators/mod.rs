//! Time-step integrators.
//!
//! Each scheme owns its [`Accumulators`] and fixes the strict operator
//! sequence of one step: force evaluations, drift and kick operators,
//! thermostat work, boundary and constraint enforcement, and the optional
//! velocity rescaling window.

mod gwmvv;
mod pnhln;
mod s1mvv;
mod scmvv;

pub use gwmvv::GwMvv;
pub use pnhln::Pnhln;
pub use s1mvv::S1Mvv;
pub use scmvv::ScMvv;

use crate::accumulator::ForceModel;
use crate::constraints::Constraints;
use crate::error::Result;
use crate::geometry::SimBox;
use crate::particle::ParticleSet;
use crate::utils;
use enum_dispatch::enum_dispatch;
use itertools::izip;
use rayon::ThreadPool;

/// Everything an integrator needs to advance one step.
pub struct StepContext<'a> {
    /// Particle state.
    pub particles: &'a mut ParticleSet,
    /// Simulation box.
    pub sim_box: &'a SimBox,
    /// Force description.
    pub model: &'a ForceModel,
    /// Constraint records.
    pub constraints: &'a Constraints,
    /// Process-wide worker pool.
    pub pool: &'a ThreadPool,
    /// Time step length.
    pub dt: f64,
    /// Steps over which initial velocity scaling stays active.
    pub velocity_scaling_steps: u64,
}

/// One time-stepping scheme.
#[enum_dispatch]
pub trait Integrator {
    /// Advances the system from step `step - 1` to step `step`.
    ///
    /// # Errors
    ///
    /// Propagates boundary-correction and numeric failures.
    fn calculate(&mut self, ctx: &mut StepContext<'_>, step: u64) -> Result<()>;
}

/// The four supported schemes behind one dispatchable type.
#[enum_dispatch(Integrator)]
pub enum IntegratorEnum {
    /// Groot-Warren modified velocity-Verlet.
    GwMvv,
    /// Shardlow S1 splitting.
    S1Mvv,
    /// Self-consistent modified velocity-Verlet.
    ScMvv,
    /// Pairwise Nose-Hoover-Langevin.
    Pnhln,
}

/// Drift operator `r += dt * v`, saving the previous positions first when
/// molecule fixations need them.
pub(crate) fn drift(particles: &mut ParticleSet, dt: f64) {
    particles.save_old_positions();
    for axis in 0..3 {
        let (r, v) = (&mut particles.r[axis], &particles.v[axis]);
        for (r, &v) in r.iter_mut().zip(v) {
            *r += dt * v;
        }
    }
}

/// Kick operator `v += dt * f / m` over the primary force array.
pub(crate) fn kick(particles: &mut ParticleSet, dt: f64) {
    for axis in 0..3 {
        let (v, f) = (&mut particles.v[axis], &particles.f[axis]);
        for (v, &f, &m) in izip!(v.iter_mut(), f, &particles.mass) {
            *v += dt * f / m;
        }
    }
}

/// Kick operator over the secondary (dissipative) force array.
pub(crate) fn kick_secondary(particles: &mut ParticleSet, dt: f64) {
    for axis in 0..3 {
        let (v, f) = (&mut particles.v[axis], &particles.f_two[axis]);
        for (v, &f, &m) in izip!(v.iter_mut(), f, &particles.mass) {
            *v += dt * f / m;
        }
    }
}

/// Writes the velocity prediction `v_new = v + dt * f / m`.
pub(crate) fn predict(particles: &mut ParticleSet, dt: f64) {
    for axis in 0..3 {
        let (v_new, v, f) = (
            &mut particles.v_new[axis],
            &particles.v[axis],
            &particles.f[axis],
        );
        for (v_new, &v, &f, &m) in izip!(v_new.iter_mut(), v, f, &particles.mass) {
            *v_new = v + dt * f / m;
        }
    }
}

/// Folds every particle back into the box, reflecting where configured.
pub(crate) fn correct_all(particles: &mut ParticleSet, sim_box: &SimBox) -> Result<()> {
    let n = particles.len();
    let [rx, ry, rz] = &mut particles.r;
    let [vx, vy, vz] = &mut particles.v;
    for p in 0..n {
        sim_box.correct_particle(
            p,
            [&mut rx[p], &mut ry[p], &mut rz[p]],
            [&mut vx[p], &mut vy[p], &mut vz[p]],
        )?;
    }
    Ok(())
}

/// The post-drift enforcement block shared by all schemes: molecule
/// fixations, box correction, boundary planes and spheres.
pub(crate) fn enforce_positions(ctx: &mut StepContext<'_>, step: u64) -> Result<()> {
    ctx.constraints.apply_fixations(ctx.particles, step);
    correct_all(ctx.particles, ctx.sim_box)?;
    ctx.constraints.apply_boundaries(ctx.particles, step);
    ctx.constraints.apply_spheres(ctx.particles, step);
    Ok(())
}

/// Applies the single-shot velocity rescaling when the step falls into the
/// configured window or a molecule acceleration fired.
pub(crate) fn maybe_rescale(ctx: &mut StepContext<'_>, step: u64, accelerated: bool) {
    if step <= ctx.velocity_scaling_steps || accelerated {
        let scale =
            utils::scale_velocities(&mut ctx.particles.v, &ctx.particles.mass, ctx.model.kt);
        tracing::trace!(step, scale, "rescaled velocities");
    }
}
