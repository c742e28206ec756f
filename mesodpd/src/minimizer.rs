//! Steepest-descent pre-minimization of the conservative potential.
//!
//! The step length doubles after every accepted move and halves after
//! every rejected one, so the minimizer feels its way along the potential
//! surface without any line search.

use crate::accumulator::{Accumulators, ConservativeScope, ForceModel};
use crate::error::Result;
use crate::geometry::SimBox;
use crate::particle::ParticleSet;
use rayon::ThreadPool;

/// Smallest step length before the minimizer gives up.
const DELTA_FLOOR: f64 = 1e-12;

/// Minimization configuration.
#[derive(Clone, Copy, Debug)]
pub struct MinimizerSettings {
    /// Number of descent iterations.
    pub steps: u64,
    /// Minimize the full conservative set (bonds and electrostatics
    /// included) instead of the DPD pair force alone.
    pub all_forces: bool,
}

/// One observed minimizer iteration.
#[derive(Clone, Copy, Debug)]
pub struct MinimizerStep {
    /// Iteration number, starting at 1.
    pub iteration: u64,
    /// Whether the move was kept.
    pub accepted: bool,
    /// Potential after the iteration.
    pub potential: f64,
    /// Step length after the iteration.
    pub delta: f64,
}

/// Outcome of a minimization run.
#[derive(Clone, Copy, Debug)]
pub struct MinimizerSummary {
    /// Accepted moves.
    pub accepted: u64,
    /// Rejected (rolled back) moves.
    pub rejected: u64,
    /// Final potential.
    pub potential: f64,
}

/// Runs the adaptive steepest descent, invoking `observe` after every
/// iteration (for snapshot output).
///
/// # Errors
///
/// Propagates force-evaluation and boundary-correction failures.
pub fn minimize<F>(
    particles: &mut ParticleSet,
    model: &ForceModel,
    sim_box: &SimBox,
    pool: &ThreadPool,
    settings: &MinimizerSettings,
    mut observe: F,
) -> Result<MinimizerSummary>
where
    F: FnMut(&MinimizerStep),
{
    let scope = if settings.all_forces {
        ConservativeScope::Full
    } else {
        ConservativeScope::DpdOnly
    };
    let mut accumulators = Accumulators::new(sim_box, model, false)?;
    let mut delta = 1e-5 * sim_box.min_length();
    let mut saved = particles.r.clone();

    let mut best = potential(&mut accumulators, particles, model, sim_box, pool, scope)?;
    let mut accepted = 0;
    let mut rejected = 0;

    for iteration in 1..=settings.steps {
        for (saved, r) in saved.iter_mut().zip(&particles.r) {
            saved.copy_from_slice(r);
        }
        accumulators.conservative_forces(particles, model, sim_box, pool, scope)?;

        let steepest = particles
            .f
            .iter()
            .flat_map(|axis| axis.iter())
            .fold(0.0_f64, |m, &f| m.max(f.abs()));
        if steepest <= 0.0 {
            break;
        }
        let scale = delta / steepest;
        for axis in 0..3 {
            let (r, f) = (&mut particles.r[axis], &particles.f[axis]);
            for (r, &f) in r.iter_mut().zip(f) {
                *r += scale * f;
            }
        }
        correct_positions(particles, sim_box)?;
        accumulators.invalidate();

        let current = potential(&mut accumulators, particles, model, sim_box, pool, scope)?;
        let kept = current < best;
        if kept {
            best = current;
            delta *= 2.0;
            accepted += 1;
        } else {
            for (r, saved) in particles.r.iter_mut().zip(&saved) {
                r.copy_from_slice(saved);
            }
            accumulators.invalidate();
            delta *= 0.5;
            rejected += 1;
        }
        observe(&MinimizerStep {
            iteration,
            accepted: kept,
            potential: best,
            delta,
        });
        if delta < DELTA_FLOOR {
            break;
        }
    }

    Ok(MinimizerSummary {
        accepted,
        rejected,
        potential: best,
    })
}

fn potential(
    accumulators: &mut Accumulators,
    particles: &mut ParticleSet,
    model: &ForceModel,
    sim_box: &SimBox,
    pool: &ThreadPool,
    scope: ConservativeScope,
) -> Result<f64> {
    let report = accumulators.potentials(particles, model, sim_box, pool)?;
    Ok(match scope {
        ConservativeScope::Full => report.total(),
        ConservativeScope::DpdOnly => report.dpd,
    })
}

fn correct_positions(particles: &mut ParticleSet, sim_box: &SimBox) -> Result<()> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::InteractionTable;
    use crate::rng::RandomConfig;
    use rayon::ThreadPoolBuilder;

    fn repulsive_model() -> ForceModel {
        let mut interactions = InteractionTable::unset(1);
        interactions.set(0, 0, 25.0);
        ForceModel {
            cutoff: 1.0,
            kt: 1.0,
            sigma: 0.0,
            gamma: 0.0,
            interactions,
            bond_chunks: Vec::new(),
            electrostatics: None,
            random: RandomConfig::with_seed(6),
        }
    }

    // 2^3 lattice crammed into a tight cube, everything overlapping
    fn crowded_lattice() -> ParticleSet {
        let mut particles = ParticleSet::with_capacity(8);
        for z in 0..2 {
            for y in 0..2 {
                for x in 0..2 {
                    particles.r[0].push(1.4 + 0.4 * f64::from(x));
                    particles.r[1].push(1.4 + 0.4 * f64::from(y));
                    particles.r[2].push(1.4 + 0.4 * f64::from(z));
                }
            }
        }
        particles.species = vec![0; 8];
        particles.charge = vec![0.0; 8];
        particles.molar_mass = vec![1.0; 8];
        particles.mass = vec![1.0; 8];
        particles
    }

    #[test]
    fn potential_is_non_increasing_over_accepted_steps() {
        let sim_box = SimBox::new([3.2; 3], [true; 3]).unwrap();
        let model = repulsive_model();
        let pool = ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let mut particles = crowded_lattice();

        let mut last_best = f64::INFINITY;
        let mut delta_after_reject = Vec::new();
        let mut deltas = vec![1e-5 * 3.2];
        let summary = minimize(
            &mut particles,
            &model,
            &sim_box,
            &pool,
            &MinimizerSettings {
                steps: 50,
                all_forces: true,
            },
            |step| {
                assert!(step.potential <= last_best + 1e-12);
                last_best = step.potential;
                if !step.accepted {
                    delta_after_reject.push((deltas.last().copied().unwrap(), step.delta));
                }
                deltas.push(step.delta);
            },
        )
        .unwrap();

        assert!(summary.accepted > 0);
        // a rejection halves the step length
        for (before, after) in delta_after_reject {
            float_cmp::assert_approx_eq!(f64, after, 0.5 * before, epsilon = 1e-20);
        }
    }

    #[test]
    fn minimization_reduces_the_potential() {
        let sim_box = SimBox::new([3.2; 3], [true; 3]).unwrap();
        let model = repulsive_model();
        let pool = ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let mut particles = crowded_lattice();

        let mut accumulators = Accumulators::new(&sim_box, &model, false).unwrap();
        let initial = accumulators
            .potentials(&mut particles, &model, &sim_box, &pool)
            .unwrap()
            .dpd;

        let summary = minimize(
            &mut particles,
            &model,
            &sim_box,
            &pool,
            &MinimizerSettings {
                steps: 50,
                all_forces: false,
            },
            |_| {},
        )
        .unwrap();
        assert!(summary.potential < initial);
    }
}
