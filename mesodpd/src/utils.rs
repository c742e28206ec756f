//! Kinetic-energy, temperature and velocity-rescaling helpers.

use crate::convert;

/// Twice the kinetic energy, `sum(m_i * v_i^2)`.
#[must_use]
pub fn twice_kinetic_energy(v: &[Vec<f64>; 3], mass: &[f64]) -> f64 {
    let mut sum = 0.0;
    for axis in v {
        for (&vi, &m) in axis.iter().zip(mass) {
            sum += m * vi * vi;
        }
    }
    sum
}

/// Kinetic energy `0.5 * sum(m_i * v_i^2)`.
#[must_use]
pub fn kinetic_energy(v: &[Vec<f64>; 3], mass: &[f64]) -> f64 {
    0.5 * twice_kinetic_energy(v, mass)
}

/// Instantaneous temperature in DPD units, `sum(m v^2) / (3 N)`.
///
/// Returns zero for an empty particle set.
#[must_use]
pub fn temperature(v: &[Vec<f64>; 3], mass: &[f64]) -> f64 {
    let n = mass.len();
    if n == 0 {
        return 0.0;
    }
    twice_kinetic_energy(v, mass) / (3.0 * convert::f64_from_usize(n))
}

/// Total momentum `sum(m_i * v_i)` per axis.
#[must_use]
pub fn total_momentum(v: &[Vec<f64>; 3], mass: &[f64]) -> [f64; 3] {
    let mut p = [0.0; 3];
    for (axis, p) in v.iter().zip(&mut p) {
        for (&vi, &m) in axis.iter().zip(mass) {
            *p += m * vi;
        }
    }
    p
}

/// Removes the center-of-mass momentum so that `sum(m_i * v_i)` vanishes on
/// every axis. Returns the momentum that was removed.
pub fn remove_excess_momentum(v: &mut [Vec<f64>; 3], mass: &[f64]) -> [f64; 3] {
    let total_mass: f64 = mass.iter().sum();
    if total_mass <= 0.0 {
        return [0.0; 3];
    }
    let p = total_momentum(v, mass);
    for (axis, &p) in v.iter_mut().zip(&p) {
        let drift = p / total_mass;
        for vi in axis {
            *vi -= drift;
        }
    }
    p
}

/// Berendsen-style single-shot rescaling toward the target temperature.
///
/// The center-of-mass momentum is removed first, then all velocities are
/// multiplied by `sqrt((3 N - 3) kT / sum(m v^2))`. Returns the applied
/// scale factor, or 1 if the system carries no kinetic energy.
pub fn scale_velocities(v: &mut [Vec<f64>; 3], mass: &[f64], target_kt: f64) -> f64 {
    remove_excess_momentum(v, mass);
    let n = mass.len();
    let twice_ukin = twice_kinetic_energy(v, mass);
    if n < 2 || twice_ukin <= 0.0 {
        return 1.0;
    }
    let dof = 3.0 * convert::f64_from_usize(n) - 3.0;
    let scale = (dof * target_kt / twice_ukin).sqrt();
    for axis in v {
        for vi in axis {
            *vi *= scale;
        }
    }
    scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use rand::Rng;
    use rand_pcg::Pcg64;

    fn random_velocities(n: usize, seed: u64) -> [Vec<f64>; 3] {
        let mut rng = Pcg64::new(seed as u128, 0xa02bdbf7bb3c0a7);
        [(); 3].map(|()| (0..n).map(|_| rng.gen::<f64>() * 2.0 - 1.0).collect())
    }

    #[test]
    fn kinetic_energy_of_single_particle() {
        let v = [vec![3.0], vec![0.0], vec![4.0]];
        let mass = [2.0];
        assert_approx_eq!(f64, kinetic_energy(&v, &mass), 25.0);
    }

    #[test]
    fn momentum_removal_zeroes_the_sum() {
        let mut v = random_velocities(250, 7);
        let mass: Vec<f64> = (0..250).map(|i| 1.0 + f64::from(i % 3)).collect();
        remove_excess_momentum(&mut v, &mass);
        for p in total_momentum(&v, &mass) {
            assert!(p.abs() < 1e-10);
        }
    }

    #[test]
    fn rescaling_hits_target_temperature() {
        let n = 1000;
        let mut v = random_velocities(n, 42);
        let mass = vec![1.0; n];
        let scale = scale_velocities(&mut v, &mass, 1.0);
        assert!(scale > 0.0);

        // (1 / (3N - 3)) * sum(v^2) must equal the unit target exactly
        let dof = 3.0 * n as f64 - 3.0;
        assert_approx_eq!(
            f64,
            twice_kinetic_energy(&v, &mass) / dof,
            1.0,
            epsilon = 1e-12
        );
        for p in total_momentum(&v, &mass) {
            assert!(p.abs() < 1e-6);
        }
    }

    #[test]
    fn rescaling_with_masses_hits_target() {
        let n = 500;
        let mut v = random_velocities(n, 3);
        let mass: Vec<f64> = (0..n).map(|i| 0.5 + (i % 5) as f64).collect();
        scale_velocities(&mut v, &mass, 2.5);
        let dof = 3.0 * n as f64 - 3.0;
        assert_approx_eq!(
            f64,
            twice_kinetic_energy(&v, &mass) / dof,
            2.5,
            epsilon = 1e-12
        );
    }

    #[test]
    fn rescaling_a_single_particle_is_a_no_op() {
        let mut v = [vec![1.0], vec![2.0], vec![3.0]];
        let mass = [1.0];
        let scale = scale_velocities(&mut v, &mass, 1.0);
        assert_approx_eq!(f64, scale, 1.0);
    }
}
