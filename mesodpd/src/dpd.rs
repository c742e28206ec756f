//! DPD pair kernels: the Groot-Warren force triple, the Shardlow S1 and
//! PNHLN pairwise velocity updates, and the pair-potential kernel.
//!
//! All kernels share the linear weight `w(r) = 1 - r/c` for `r < c` and act
//! along the unit vector `e = delta / r`. Force kernels write through
//! [`SharedAxes`] views; the pair driver's chunking guarantees exclusive
//! access to both particles of a dispatched pair.

use crate::adders::{PressureAdders, ScalarAdder};
use crate::pairs::{PairKernel, SharedAxes};
use crate::particle::InteractionTable;
use crate::rng;

/// Read-only inputs every DPD kernel needs.
#[derive(Clone, Copy)]
pub struct DpdInputs<'a> {
    /// Species id per particle.
    pub species: &'a [u32],
    /// Symmetric conservative interaction constants.
    pub interactions: &'a InteractionTable,
    /// Interaction cutoff.
    pub cutoff: f64,
}

impl DpdInputs<'_> {
    fn weight(&self, r: f64) -> f64 {
        if r < self.cutoff {
            1.0 - r / self.cutoff
        } else {
            0.0
        }
    }

    fn constant(&self, i: usize, j: usize) -> f64 {
        self.interactions
            .get(self.species[i] as usize, self.species[j] as usize)
    }
}

/// Conservative DPD force, `F = a_ij w(r) e`.
pub struct ConservativeForceKernel<'a> {
    /// Shared inputs.
    pub inputs: DpdInputs<'a>,
    /// Force accumulator view.
    pub forces: SharedAxes<'a>,
}

impl PairKernel for ConservativeForceKernel<'_> {
    fn pair(&self, i: usize, j: usize, delta: [f64; 3], r2: f64) {
        let r = r2.sqrt();
        let w = self.inputs.weight(r);
        if w <= 0.0 {
            return;
        }
        let scale = self.inputs.constant(i, j) * w / r;
        let force = delta.map(|d| scale * d);
        // SAFETY: the driver's chunking gives this thread exclusive access
        // to particles i and j
        unsafe {
            self.forces.add(i, force);
            self.forces.add(j, [-force[0], -force[1], -force[2]]);
        }
    }
}

/// Random DPD force, `F = sigma w(r) zeta / sqrt(dt) e`, with the noise
/// drawn from the per-pair sub-stream of the current step.
pub struct RandomForceKernel<'a> {
    /// Shared inputs.
    pub inputs: DpdInputs<'a>,
    /// Noise amplitude `sigma = sqrt(2 gamma kT)`.
    pub sigma: f64,
    /// Inverse square root of the time step.
    pub inv_sqrt_dt: f64,
    /// Master seed of the run.
    pub seed: u64,
    /// Current time step.
    pub step: u64,
    /// Gaussian noise instead of the uniform interval.
    pub gaussian: bool,
    /// Force accumulator view.
    pub forces: SharedAxes<'a>,
}

impl PairKernel for RandomForceKernel<'_> {
    fn pair(&self, i: usize, j: usize, delta: [f64; 3], r2: f64) {
        let r = r2.sqrt();
        let w = self.inputs.weight(r);
        if w <= 0.0 {
            return;
        }
        let zeta = rng::pair_noise(self.seed, i, j, self.step, self.gaussian);
        let scale = self.sigma * w * zeta * self.inv_sqrt_dt / r;
        let force = delta.map(|d| scale * d);
        // SAFETY: exclusive pair access per the driver's chunking
        unsafe {
            self.forces.add(i, force);
            self.forces.add(j, [-force[0], -force[1], -force[2]]);
        }
    }
}

/// Dissipative DPD force, `F = -gamma w^2(r) (e . v_ij) e`.
pub struct DissipativeForceKernel<'a> {
    /// Shared inputs.
    pub inputs: DpdInputs<'a>,
    /// Friction constant `gamma`.
    pub gamma: f64,
    /// Velocities the friction reads; the modified-Verlet integrators pass
    /// the predicted velocities here.
    pub velocities: &'a [Vec<f64>; 3],
    /// Force accumulator view.
    pub forces: SharedAxes<'a>,
}

impl PairKernel for DissipativeForceKernel<'_> {
    fn pair(&self, i: usize, j: usize, delta: [f64; 3], r2: f64) {
        let r = r2.sqrt();
        let w = self.inputs.weight(r);
        if w <= 0.0 {
            return;
        }
        let v = self.velocities;
        let vij = [
            v[0][i] - v[0][j],
            v[1][i] - v[1][j],
            v[2][i] - v[2][j],
        ];
        // e . v_ij times 1/r, folded into the delta-based projection
        let projection = (delta[0] * vij[0] + delta[1] * vij[1] + delta[2] * vij[2]) / r2;
        let scale = -self.gamma * w * w * projection;
        let force = delta.map(|d| scale * d);
        // SAFETY: exclusive pair access per the driver's chunking
        unsafe {
            self.forces.add(i, force);
            self.forces.add(j, [-force[0], -force[1], -force[2]]);
        }
    }
}

/// One-pass Groot-Warren kernel summing the conservative, random and
/// dissipative forces, halving the traversal cost of the step.
pub struct FullForceKernel<'a> {
    /// Shared inputs.
    pub inputs: DpdInputs<'a>,
    /// Friction constant.
    pub gamma: f64,
    /// Noise amplitude.
    pub sigma: f64,
    /// Inverse square root of the time step.
    pub inv_sqrt_dt: f64,
    /// Master seed of the run.
    pub seed: u64,
    /// Current time step.
    pub step: u64,
    /// Gaussian noise instead of the uniform interval.
    pub gaussian: bool,
    /// Velocities used by the dissipative part.
    pub velocities: &'a [Vec<f64>; 3],
    /// Force accumulator view.
    pub forces: SharedAxes<'a>,
}

impl PairKernel for FullForceKernel<'_> {
    fn pair(&self, i: usize, j: usize, delta: [f64; 3], r2: f64) {
        let r = r2.sqrt();
        let w = self.inputs.weight(r);
        if w <= 0.0 {
            return;
        }
        let v = self.velocities;
        let vij = [
            v[0][i] - v[0][j],
            v[1][i] - v[1][j],
            v[2][i] - v[2][j],
        ];
        let projection = (delta[0] * vij[0] + delta[1] * vij[1] + delta[2] * vij[2]) / r2;
        let zeta = rng::pair_noise(self.seed, i, j, self.step, self.gaussian);

        let conservative = self.inputs.constant(i, j) * w / r;
        let random = self.sigma * w * zeta * self.inv_sqrt_dt / r;
        let dissipative = -self.gamma * w * w * projection;
        let scale = conservative + random + dissipative;
        let force = delta.map(|d| scale * d);
        // SAFETY: exclusive pair access per the driver's chunking
        unsafe {
            self.forces.add(i, force);
            self.forces.add(j, [-force[0], -force[1], -force[2]]);
        }
    }
}

/// Shardlow S1 pairwise velocity update: the explicit stochastic half
/// followed by the implicit dissipative half, applied to `v` in place.
pub struct ShardlowKernel<'a> {
    /// Shared inputs.
    pub inputs: DpdInputs<'a>,
    /// Friction constant.
    pub gamma: f64,
    /// Noise amplitude.
    pub sigma: f64,
    /// Time step.
    pub dt: f64,
    /// Master seed of the run.
    pub seed: u64,
    /// Current time step.
    pub step: u64,
    /// Gaussian noise instead of the uniform interval.
    pub gaussian: bool,
    /// DPD mass per particle.
    pub mass: &'a [f64],
    /// Velocity view, read and written in place.
    pub velocities: SharedAxes<'a>,
}

impl PairKernel for ShardlowKernel<'_> {
    fn pair(&self, i: usize, j: usize, delta: [f64; 3], r2: f64) {
        let r = r2.sqrt();
        let w = self.inputs.weight(r);
        if w <= 0.0 {
            return;
        }
        let e = delta.map(|d| d / r);
        let inv_mi = 1.0 / self.mass[i];
        let inv_mj = 1.0 / self.mass[j];
        let zeta = rng::pair_noise(self.seed, i, j, self.step, self.gaussian);
        let sigma_term = self.sigma * w * zeta * self.dt.sqrt();
        let gamma_w2 = self.gamma * w * w;

        // SAFETY: exclusive pair access per the driver's chunking
        unsafe {
            let vi = self.velocities.get(i);
            let vj = self.velocities.get(j);
            let along = e[0] * (vi[0] - vj[0]) + e[1] * (vi[1] - vj[1]) + e[2] * (vi[2] - vj[2]);
            let explicit = 0.5 * (sigma_term - gamma_w2 * along * self.dt);
            self.velocities.add(i, e.map(|c| explicit * inv_mi * c));
            self.velocities.add(j, e.map(|c| -explicit * inv_mj * c));

            let vi = self.velocities.get(i);
            let vj = self.velocities.get(j);
            let along = e[0] * (vi[0] - vj[0]) + e[1] * (vi[1] - vj[1]) + e[2] * (vi[2] - vj[2]);
            let denominator = 1.0 + 0.5 * gamma_w2 * self.dt * (inv_mi + inv_mj);
            let implicit = 0.5 * (sigma_term - gamma_w2 * along * self.dt) / denominator;
            self.velocities.add(i, e.map(|c| implicit * inv_mi * c));
            self.velocities.add(j, e.map(|c| -implicit * inv_mj * c));
        }
    }
}

/// Pairwise Nose-Hoover-Langevin velocity update over one half step, with
/// optional accumulation of the thermostat control sum `G`.
pub struct PnhlnKernel<'a> {
    /// Shared inputs.
    pub inputs: DpdInputs<'a>,
    /// Current thermostat friction `xi`.
    pub xi: f64,
    /// Noise amplitude.
    pub sigma: f64,
    /// Target temperature `kT`.
    pub kt: f64,
    /// Half time step covered by this pass.
    pub half_dt: f64,
    /// Master seed of the run.
    pub seed: u64,
    /// Stream selector, distinct between the two passes of one step.
    pub step: u64,
    /// Gaussian noise instead of the uniform interval.
    pub gaussian: bool,
    /// DPD mass per particle.
    pub mass: &'a [f64],
    /// Velocity view, read and written in place.
    pub velocities: SharedAxes<'a>,
    /// Thermostat control accumulator, present on the first pass only.
    pub control: Option<&'a ScalarAdder>,
}

impl PairKernel for PnhlnKernel<'_> {
    fn pair(&self, i: usize, j: usize, delta: [f64; 3], r2: f64) {
        let r = r2.sqrt();
        let w = self.inputs.weight(r);
        if w <= 0.0 {
            return;
        }
        let e = delta.map(|d| d / r);
        let inv_mi = 1.0 / self.mass[i];
        let inv_mj = 1.0 / self.mass[j];
        let zeta = rng::pair_noise(self.seed, i, j, self.step, self.gaussian);

        // SAFETY: exclusive pair access per the driver's chunking
        unsafe {
            let vi = self.velocities.get(i);
            let vj = self.velocities.get(j);
            let along = e[0] * (vi[0] - vj[0]) + e[1] * (vi[1] - vj[1]) + e[2] * (vi[2] - vj[2]);

            if let Some(control) = self.control {
                // deviation of the pair's kinetic measure from equipartition
                let reduced_mass = 1.0 / (inv_mi + inv_mj);
                control.add(w * w * (reduced_mass * along * along - self.kt));
            }

            let friction = -self.xi * w * w * along * self.half_dt;
            let noise = self.sigma * w * zeta * self.half_dt.sqrt();
            let update = friction + noise;
            self.velocities.add(i, e.map(|c| update * inv_mi * c));
            self.velocities.add(j, e.map(|c| -update * inv_mj * c));
        }
    }
}

/// DPD pair potential `U = a_ij c w^2(r) / 2` with virial accumulation.
pub struct DpdPotentialKernel<'a> {
    /// Shared inputs.
    pub inputs: DpdInputs<'a>,
    /// Potential accumulator.
    pub potential: &'a ScalarAdder,
    /// Virial accumulators fed by all force families.
    pub pressure: &'a PressureAdders,
    /// Virial accumulators fed by the DPD conservative force only.
    pub dpd_pressure: &'a PressureAdders,
}

impl PairKernel for DpdPotentialKernel<'_> {
    fn pair(&self, i: usize, j: usize, delta: [f64; 3], r2: f64) {
        let r = r2.sqrt();
        let w = self.inputs.weight(r);
        if w <= 0.0 {
            return;
        }
        let a = self.inputs.constant(i, j);
        self.potential.add(0.5 * a * self.inputs.cutoff * w * w);

        let scale = a * w / r;
        let force = delta.map(|d| scale * d);
        self.pressure.add_pair(delta, force);
        self.dpd_pressure.add_pair(delta, force);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cells::CellGrid;
    use crate::geometry::SimBox;
    use crate::pairs::PairDriver;
    use float_cmp::assert_approx_eq;
    use rayon::ThreadPoolBuilder;

    fn single_type_table(a: f64) -> InteractionTable {
        let mut table = InteractionTable::unset(1);
        table.set(0, 0, a);
        table
    }

    #[test]
    fn conservative_force_is_repulsive_and_symmetric() {
        let table = single_type_table(25.0);
        let species = vec![0_u32, 0];
        let mut forces = [vec![0.0; 2], vec![0.0; 2], vec![0.0; 2]];
        let kernel = ConservativeForceKernel {
            inputs: DpdInputs {
                species: &species,
                interactions: &table,
                cutoff: 1.0,
            },
            forces: SharedAxes::new(&mut forces),
        };
        // particle 0 sits to the right of particle 1 at distance 0.5
        kernel.pair(0, 1, [0.5, 0.0, 0.0], 0.25);
        assert_approx_eq!(f64, forces[0][0], 25.0 * 0.5);
        assert_approx_eq!(f64, forces[0][1], -25.0 * 0.5);
        assert_approx_eq!(f64, forces[1][0], 0.0);
    }

    #[test]
    fn forces_vanish_at_the_cutoff() {
        let table = single_type_table(25.0);
        let species = vec![0_u32, 0];
        let mut forces = [vec![0.0; 2], vec![0.0; 2], vec![0.0; 2]];
        let kernel = ConservativeForceKernel {
            inputs: DpdInputs {
                species: &species,
                interactions: &table,
                cutoff: 1.0,
            },
            forces: SharedAxes::new(&mut forces),
        };
        kernel.pair(0, 1, [1.0, 0.0, 0.0], 1.0);
        assert_approx_eq!(f64, forces[0][0], 0.0);
    }

    #[test]
    fn dissipative_force_opposes_relative_motion() {
        let table = single_type_table(0.0);
        let species = vec![0_u32, 0];
        let velocities = [vec![1.0, -1.0], vec![0.0, 0.0], vec![0.0, 0.0]];
        let mut forces = [vec![0.0; 2], vec![0.0; 2], vec![0.0; 2]];
        let kernel = DissipativeForceKernel {
            inputs: DpdInputs {
                species: &species,
                interactions: &table,
                cutoff: 1.0,
            },
            gamma: 4.5,
            velocities: &velocities,
            forces: SharedAxes::new(&mut forces),
        };
        kernel.pair(0, 1, [0.5, 0.0, 0.0], 0.25);
        // v_ij . e = 2, w = 0.5: F_x = -4.5 * 0.25 * 2 = -2.25 on particle 0
        assert_approx_eq!(f64, forces[0][0], -2.25);
        assert_approx_eq!(f64, forces[0][1], 2.25);
    }

    #[test]
    fn full_force_equals_sum_of_parts() {
        let table = single_type_table(18.75);
        let species = vec![0_u32, 0];
        let velocities = [vec![0.3, -0.2], vec![0.1, 0.0], vec![0.0, 0.4]];
        let delta = [0.6, 0.2, -0.1];
        let r2 = delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2];
        fn inputs<'a>(species: &'a [u32], table: &'a InteractionTable) -> DpdInputs<'a> {
            DpdInputs {
                species,
                interactions: table,
                cutoff: 1.0,
            }
        }

        let mut combined = [vec![0.0; 2], vec![0.0; 2], vec![0.0; 2]];
        FullForceKernel {
            inputs: inputs(&species, &table),
            gamma: 4.5,
            sigma: 3.0,
            inv_sqrt_dt: 5.0,
            seed: 11,
            step: 3,
            gaussian: false,
            velocities: &velocities,
            forces: SharedAxes::new(&mut combined),
        }
        .pair(0, 1, delta, r2);

        let mut separate = [vec![0.0; 2], vec![0.0; 2], vec![0.0; 2]];
        ConservativeForceKernel {
            inputs: inputs(&species, &table),
            forces: SharedAxes::new(&mut separate),
        }
        .pair(0, 1, delta, r2);
        RandomForceKernel {
            inputs: inputs(&species, &table),
            sigma: 3.0,
            inv_sqrt_dt: 5.0,
            seed: 11,
            step: 3,
            gaussian: false,
            forces: SharedAxes::new(&mut separate),
        }
        .pair(0, 1, delta, r2);
        DissipativeForceKernel {
            inputs: inputs(&species, &table),
            gamma: 4.5,
            velocities: &velocities,
            forces: SharedAxes::new(&mut separate),
        }
        .pair(0, 1, delta, r2);

        for axis in 0..3 {
            for p in 0..2 {
                assert_approx_eq!(
                    f64,
                    combined[axis][p],
                    separate[axis][p],
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn random_force_is_reproducible_and_antisymmetric() {
        let table = single_type_table(0.0);
        let species = vec![0_u32, 0];
        let run = || {
            let mut forces = [vec![0.0; 2], vec![0.0; 2], vec![0.0; 2]];
            RandomForceKernel {
                inputs: DpdInputs {
                    species: &species,
                    interactions: &table,
                    cutoff: 1.0,
                },
                sigma: 3.0,
                inv_sqrt_dt: 5.0,
                seed: 42,
                step: 7,
                gaussian: false,
                forces: SharedAxes::new(&mut forces),
            }
            .pair(0, 1, [0.5, 0.0, 0.0], 0.25);
            forces
        };
        let a = run();
        let b = run();
        assert_eq!(a[0][0].to_bits(), b[0][0].to_bits());
        assert_approx_eq!(f64, a[0][0], -a[0][1]);
    }

    #[test]
    fn shardlow_update_conserves_momentum_and_damps_motion() {
        let table = single_type_table(0.0);
        let species = vec![0_u32, 0];
        let mass = vec![1.0, 1.0];
        let mut velocities = [vec![1.0, -1.0], vec![0.0, 0.0], vec![0.0, 0.0]];
        let before = velocities[0][0] - velocities[0][1];
        ShardlowKernel {
            inputs: DpdInputs {
                species: &species,
                interactions: &table,
                cutoff: 1.0,
            },
            gamma: 4.5,
            sigma: 0.0,
            dt: 0.04,
            seed: 1,
            step: 1,
            gaussian: false,
            mass: &mass,
            velocities: SharedAxes::new(&mut velocities),
        }
        .pair(0, 1, [0.5, 0.0, 0.0], 0.25);

        let after = velocities[0][0] - velocities[0][1];
        // friction shrinks the relative velocity without moving the center
        // of mass
        assert!(after.abs() < before.abs());
        assert_approx_eq!(
            f64,
            velocities[0][0] + velocities[0][1],
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn pnhln_control_term_vanishes_at_equipartition() {
        let table = single_type_table(0.0);
        let species = vec![0_u32, 0];
        let mass = vec![2.0, 2.0];
        let kt: f64 = 1.0;
        // relative velocity chosen so that m_red (e.v_ij)^2 == kT
        let along = (kt * (1.0 / 2.0 + 1.0 / 2.0)).sqrt();
        let mut velocities = [vec![along, 0.0], vec![0.0, 0.0], vec![0.0, 0.0]];
        let control = ScalarAdder::new();
        PnhlnKernel {
            inputs: DpdInputs {
                species: &species,
                interactions: &table,
                cutoff: 1.0,
            },
            xi: 0.0,
            sigma: 0.0,
            kt,
            half_dt: 0.02,
            seed: 5,
            step: 0,
            gaussian: false,
            mass: &mass,
            velocities: SharedAxes::new(&mut velocities),
            control: Some(&control),
        }
        .pair(0, 1, [1e-9, 0.0, 0.0], 1e-18);

        // w is essentially 1 at zero separation
        assert_approx_eq!(f64, control.sum(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn potential_kernel_matches_force_integral() {
        let table = single_type_table(25.0);
        let species = vec![0_u32, 0];
        let potential = ScalarAdder::new();
        let pressure = PressureAdders::new();
        let dpd_pressure = PressureAdders::new();
        DpdPotentialKernel {
            inputs: DpdInputs {
                species: &species,
                interactions: &table,
                cutoff: 1.0,
            },
            potential: &potential,
            pressure: &pressure,
            dpd_pressure: &dpd_pressure,
        }
        .pair(0, 1, [0.5, 0.0, 0.0], 0.25);

        // U = a c w^2 / 2 with w = 0.5
        assert_approx_eq!(f64, potential.sum(), 25.0 * 0.25 * 0.5);
        // virial contribution dx * Fx = 0.5 * 12.5
        assert_approx_eq!(f64, pressure.sums()[0], 0.5 * 12.5);
        assert_approx_eq!(f64, dpd_pressure.sums()[0], 0.5 * 12.5);
    }

    #[test]
    fn kernels_run_under_the_pair_driver() {
        let sim_box = SimBox::new([6.0; 3], [true; 3]).unwrap();
        let grid = CellGrid::new(&sim_box, 1.0).unwrap();
        let table = single_type_table(25.0);
        let species = vec![0_u32; 8];
        let mut r = [Vec::new(), Vec::new(), Vec::new()];
        for p in 0..8 {
            r[0].push(0.4 * f64::from(p) + 0.2);
            r[1].push(3.0);
            r[2].push(3.0);
        }
        let mut forces = [vec![0.0; 8], vec![0.0; 8], vec![0.0; 8]];
        let assignment = grid.assign(&r);
        let pool = ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let kernel = ConservativeForceKernel {
            inputs: DpdInputs {
                species: &species,
                interactions: &table,
                cutoff: 1.0,
            },
            forces: SharedAxes::new(&mut forces),
        };
        PairDriver::new(&grid, &sim_box).for_each_pair(&pool, &r, &assignment, &kernel);
        drop(kernel);

        // the interior is symmetric, so the net force must vanish there
        // while the chain ends are pushed outward
        assert!(forces[0][0] < 0.0);
        assert!(forces[0][7] > 0.0);
        let net: f64 = forces[0].iter().sum();
        assert_approx_eq!(f64, net, 0.0, epsilon = 1e-9);
    }
}
