//! Damped short-range Coulomb kernels for charged particle fragments.
//!
//! The interaction is `U(r) = K q_i q_j r^-(e-1) chi(r) phi(r) psi(r)`,
//! where `chi` smears the point charges over a Slater-type cloud
//! (Alejandre), `phi` is the Fanourgakis polynomial that truncates the
//! interaction smoothly at the electrostatic cutoff, and `psi` is an
//! optional exponential damping. Forces follow from the analytic
//! derivative of the product, clamped to a configurable magnitude.

use crate::adders::{PressureAdders, ScalarAdder};
use crate::error::{Error, Result};
use crate::pairs::{PairKernel, SharedAxes};
use serde::{Deserialize, Serialize};

/// How the point charges are spread in space.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum ChargeDistribution {
    /// Bare point charges.
    None,
    /// Slater-type smearing after Gonzalez-Melchor/Alejandre.
    Alejandre {
        /// Decay length of the charge cloud.
        lambda: f64,
    },
}

/// How the potential is truncated at the cutoff.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Splitting {
    /// Plain truncation.
    None,
    /// Fanourgakis seventh-order polynomial, smooth to the second
    /// derivative at the cutoff.
    Fanourgakis,
}

/// Parameters of the electrostatic interaction.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct ElectrostaticsParams {
    /// Electrostatic cutoff; may exceed the DPD cutoff.
    pub cutoff: f64,
    /// Upper bound for the pair force magnitude; no clamp when zero.
    pub max_abs_force: f64,
    /// Effective exponent `e` in `r^-(e-1)`; 2 recovers Coulomb.
    pub effective_exponent: f64,
    /// Range of the exponential damping; no damping when zero.
    pub damping_distance: f64,
    /// Strength of the exponential damping.
    pub damping_factor: f64,
    /// Coupling constant `K` collecting units and the dielectric.
    pub coupling: f64,
    /// Charge smearing.
    pub distribution: ChargeDistribution,
    /// Cutoff splitting.
    pub splitting: Splitting,
    /// Multiplier on each charge used by the legacy ad-hoc variant; 1 for
    /// the physical parameterization.
    pub effective_charge_factor: f64,
}

impl ElectrostaticsParams {
    /// Validates the parameter set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for non-positive cutoff or exponent, or a
    /// non-positive smearing length.
    pub fn validate(&self) -> Result<()> {
        if !(self.cutoff.is_finite() && self.cutoff > 0.0) {
            return Err(Error::config(format!(
                "electrostatics cutoff must be positive, got {}",
                self.cutoff
            )));
        }
        if !(self.effective_exponent.is_finite() && self.effective_exponent > 1.0) {
            return Err(Error::config(format!(
                "electrostatics exponent must exceed 1, got {}",
                self.effective_exponent
            )));
        }
        if let ChargeDistribution::Alejandre { lambda } = self.distribution {
            if !(lambda.is_finite() && lambda > 0.0) {
                return Err(Error::config(format!(
                    "charge smearing length must be positive, got {lambda}"
                )));
            }
        }
        Ok(())
    }

    /// Potential and its radial derivative at distance `r` for unit
    /// charges.
    #[must_use]
    pub fn potential_and_derivative(&self, r: f64) -> (f64, f64) {
        if r >= self.cutoff {
            return (0.0, 0.0);
        }
        let exponent = self.effective_exponent - 1.0;
        let base = self.coupling * r.powf(-exponent);
        let base_d = -exponent * base / r;

        let (chi, chi_d) = match self.distribution {
            ChargeDistribution::None => (1.0, 0.0),
            ChargeDistribution::Alejandre { lambda } => alejandre_smear(r, lambda),
        };
        let (phi, phi_d) = match self.splitting {
            Splitting::None => (1.0, 0.0),
            Splitting::Fanourgakis => fanourgakis_split(r, self.cutoff),
        };
        let (psi, psi_d) = self.damping(r);

        let u = base * chi * phi * psi;
        let u_d = base_d * chi * phi * psi
            + base * chi_d * phi * psi
            + base * chi * phi_d * psi
            + base * chi * phi * psi_d;
        (u, u_d)
    }

    // optional exponential screening on top of smearing and splitting
    fn damping(&self, r: f64) -> (f64, f64) {
        if self.damping_distance <= 0.0 || self.damping_factor == 0.0 {
            return (1.0, 0.0);
        }
        let rate = self.damping_factor / self.damping_distance;
        let psi = (-rate * r).exp();
        (psi, -rate * psi)
    }

    fn charge_product(&self, qi: f64, qj: f64) -> f64 {
        let factor = self.effective_charge_factor;
        (factor * qi) * (factor * qj)
    }
}

/// Slater smearing `chi(r) = 1 - (1 + r/lambda) exp(-2 r/lambda)` and its
/// derivative.
fn alejandre_smear(r: f64, lambda: f64) -> (f64, f64) {
    let x = r / lambda;
    let decay = (-2.0 * x).exp();
    let chi = 1.0 - (1.0 + x) * decay;
    let chi_d = decay * (1.0 + 2.0 * x) / lambda;
    (chi, chi_d)
}

/// Fanourgakis splitting polynomial in `x = r / cutoff` and its derivative
/// with respect to `r`.
fn fanourgakis_split(r: f64, cutoff: f64) -> (f64, f64) {
    let x = r / cutoff;
    let x4 = x * x * x * x;
    let x5 = x4 * x;
    let x6 = x5 * x;
    let x7 = x6 * x;
    let phi = 1.0 - 1.75 * x + 5.25 * x5 - 7.0 * x6 + 2.5 * x7;
    let phi_d = (-1.75 + 26.25 * x4 - 42.0 * x5 + 17.5 * x6) / cutoff;
    (phi, phi_d)
}

/// Pair force kernel for charged particles.
pub struct CoulombForceKernel<'a> {
    /// Interaction parameters.
    pub params: ElectrostaticsParams,
    /// Charge per particle (global indexing).
    pub charge: &'a [f64],
    /// Force accumulator view.
    pub forces: SharedAxes<'a>,
}

impl PairKernel for CoulombForceKernel<'_> {
    fn pair(&self, i: usize, j: usize, delta: [f64; 3], r2: f64) {
        let r = r2.sqrt();
        let qq = self.params.charge_product(self.charge[i], self.charge[j]);
        if qq == 0.0 {
            return;
        }
        let (_, u_d) = self.params.potential_and_derivative(r);
        let mut magnitude = -qq * u_d;
        if self.params.max_abs_force > 0.0 {
            magnitude = magnitude.clamp(-self.params.max_abs_force, self.params.max_abs_force);
        }
        let scale = magnitude / r;
        let force = delta.map(|d| scale * d);
        // SAFETY: exclusive pair access per the driver's chunking
        unsafe {
            self.forces.add(i, force);
            self.forces.add(j, [-force[0], -force[1], -force[2]]);
        }
    }
}

/// Pair potential kernel for charged particles, with virial accumulation.
pub struct CoulombPotentialKernel<'a> {
    /// Interaction parameters.
    pub params: ElectrostaticsParams,
    /// Charge per particle (global indexing).
    pub charge: &'a [f64],
    /// Potential accumulator.
    pub potential: &'a ScalarAdder,
    /// Virial accumulators fed by all force families.
    pub pressure: &'a PressureAdders,
}

impl PairKernel for CoulombPotentialKernel<'_> {
    fn pair(&self, i: usize, j: usize, delta: [f64; 3], r2: f64) {
        let r = r2.sqrt();
        let qq = self.params.charge_product(self.charge[i], self.charge[j]);
        if qq == 0.0 {
            return;
        }
        let (u, u_d) = self.params.potential_and_derivative(r);
        self.potential.add(qq * u);

        let mut magnitude = -qq * u_d;
        if self.params.max_abs_force > 0.0 {
            magnitude = magnitude.clamp(-self.params.max_abs_force, self.params.max_abs_force);
        }
        let scale = magnitude / r;
        self.pressure.add_pair(delta, delta.map(|d| scale * d));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    fn coulomb_params() -> ElectrostaticsParams {
        ElectrostaticsParams {
            cutoff: 3.0,
            max_abs_force: 0.0,
            effective_exponent: 2.0,
            damping_distance: 0.0,
            damping_factor: 0.0,
            coupling: 1.0,
            distribution: ChargeDistribution::None,
            splitting: Splitting::None,
            effective_charge_factor: 1.0,
        }
    }

    #[test]
    fn bare_coulomb_matches_inverse_distance() {
        let params = coulomb_params();
        let (u, u_d) = params.potential_and_derivative(0.5);
        assert_approx_eq!(f64, u, 2.0);
        assert_approx_eq!(f64, u_d, -4.0);
    }

    #[test]
    fn potential_vanishes_beyond_cutoff() {
        let params = coulomb_params();
        assert_eq!(params.potential_and_derivative(3.5), (0.0, 0.0));
    }

    #[test]
    fn smearing_removes_the_contact_divergence_scale() {
        let smeared = ElectrostaticsParams {
            distribution: ChargeDistribution::Alejandre { lambda: 0.25 },
            ..coulomb_params()
        };
        let bare = coulomb_params();
        let (u_smeared, _) = smeared.potential_and_derivative(0.01);
        let (u_bare, _) = bare.potential_and_derivative(0.01);
        assert!(u_smeared < u_bare * 0.1);
        // far from contact the smearing is invisible
        let (u_far, _) = smeared.potential_and_derivative(2.0);
        let (u_far_bare, _) = bare.potential_and_derivative(2.0);
        assert_approx_eq!(f64, u_far, u_far_bare, epsilon = 1e-3);
    }

    #[test]
    fn fanourgakis_splitting_is_smooth_at_the_cutoff() {
        let (phi, phi_d) = fanourgakis_split(3.0, 3.0);
        assert_approx_eq!(f64, phi, 0.0, epsilon = 1e-12);
        assert_approx_eq!(f64, phi_d, 0.0, epsilon = 1e-12);
        let (phi0, _) = fanourgakis_split(0.0, 3.0);
        assert_approx_eq!(f64, phi0, 1.0);
    }

    #[test]
    fn derivative_matches_finite_differences() {
        let params = ElectrostaticsParams {
            distribution: ChargeDistribution::Alejandre { lambda: 0.5 },
            splitting: Splitting::Fanourgakis,
            damping_distance: 1.0,
            damping_factor: 0.3,
            ..coulomb_params()
        };
        let h = 1e-7;
        for r in [0.3, 0.8, 1.5, 2.4] {
            let (_, u_d) = params.potential_and_derivative(r);
            let (u_plus, _) = params.potential_and_derivative(r + h);
            let (u_minus, _) = params.potential_and_derivative(r - h);
            let numeric = (u_plus - u_minus) / (2.0 * h);
            assert_approx_eq!(f64, u_d, numeric, epsilon = 1e-5);
        }
    }

    #[test]
    fn opposite_charges_attract() {
        let params = coulomb_params();
        let charge = vec![1.0, -1.0];
        let mut forces = [vec![0.0; 2], vec![0.0; 2], vec![0.0; 2]];
        CoulombForceKernel {
            params,
            charge: &charge,
            forces: SharedAxes::new(&mut forces),
        }
        .pair(0, 1, [1.0, 0.0, 0.0], 1.0);
        // particle 0 sits at larger x; attraction pulls it back
        assert!(forces[0][0] < 0.0);
        assert_approx_eq!(f64, forces[0][0], -forces[0][1]);
    }

    #[test]
    fn force_clamp_limits_the_magnitude() {
        let params = ElectrostaticsParams {
            max_abs_force: 0.5,
            ..coulomb_params()
        };
        let charge = vec![1.0, 1.0];
        let mut forces = [vec![0.0; 2], vec![0.0; 2], vec![0.0; 2]];
        CoulombForceKernel {
            params,
            charge: &charge,
            forces: SharedAxes::new(&mut forces),
        }
        .pair(0, 1, [0.1, 0.0, 0.0], 0.01);
        assert!(forces[0][0].abs() <= 0.5 + 1e-12);
    }

    #[test]
    fn legacy_charge_factor_scales_quadratically() {
        let scaled = ElectrostaticsParams {
            effective_charge_factor: 2.0,
            ..coulomb_params()
        };
        let charge = vec![1.0, 1.0];
        let potential = ScalarAdder::new();
        let pressure = PressureAdders::new();
        CoulombPotentialKernel {
            params: scaled,
            charge: &charge,
            potential: &potential,
            pressure: &pressure,
        }
        .pair(0, 1, [1.0, 0.0, 0.0], 1.0);
        assert_approx_eq!(f64, potential.sum(), 4.0);
    }
}
