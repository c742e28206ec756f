#![allow(missing_docs)]

//! End-to-end dynamics properties: box invariants, momentum conservation,
//! and time reversibility of the deterministic integrator.

use float_cmp::assert_approx_eq;
use mesodpd::accumulator::ForceModel;
use mesodpd::constraints::Constraints;
use mesodpd::geometry::SimBox;
use mesodpd::integrators::{GwMvv, Integrator, S1Mvv, StepContext};
use mesodpd::particle::{InteractionTable, ParticleSet};
use mesodpd::rng::{RandomConfig, RandomSource};
use mesodpd::utils;
use rayon::ThreadPoolBuilder;

fn model(a: f64, sigma: f64, kt: f64, seed: u64) -> ForceModel {
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
        random: RandomConfig::with_seed(seed),
    }
}

fn fluid(n_per_axis: usize, length: f64, seed: u64, kt: f64) -> ParticleSet {
    let n = n_per_axis.pow(3);
    let spacing = length / n_per_axis as f64;
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
    if kt > 0.0 {
        let mut source = RandomSource::new(&RandomConfig::with_seed(seed));
        for axis in 0..3 {
            particles.v[axis] = (0..n).map(|_| source.gaussian()).collect();
        }
        utils::scale_velocities(&mut particles.v, &particles.mass, kt);
    }
    particles
}

#[test]
fn positions_stay_inside_the_box_under_a_thermostat() {
    let length = 5.0;
    let sim_box = SimBox::new([length; 3], [true; 3]).unwrap();
    let model = model(25.0, 3.0, 1.0, 13);
    let pool = ThreadPoolBuilder::new().num_threads(4).build().unwrap();
    let constraints = Constraints::default();
    let mut particles = fluid(5, length, 13, 1.0);
    let mut integrator = S1Mvv::new(&sim_box, &model, false).unwrap();

    for step in 1..=200_u64 {
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

        for axis in 0..3 {
            for &r in &particles.r[axis] {
                assert!((0.0..length).contains(&r), "step {step}: r = {r}");
            }
            for &v in &particles.v[axis] {
                assert!(v.is_finite());
            }
            for &f in &particles.f[axis] {
                assert!(f.is_finite());
            }
        }
    }
}

#[test]
fn momentum_is_conserved_with_all_thermostats_off() {
    let length = 6.0;
    let sim_box = SimBox::new([length; 3], [true; 3]).unwrap();
    // sigma = 0: purely conservative dynamics
    let model = model(25.0, 0.0, 1.0, 17);
    let pool = ThreadPoolBuilder::new().num_threads(4).build().unwrap();
    let constraints = Constraints::default();
    let mut particles = fluid(4, length, 17, 1.0);
    let mut integrator = GwMvv::new(0.5, &sim_box, &model).unwrap();

    let n = particles.len();
    let before = utils::total_momentum(&particles.v, &particles.mass);
    let speed: f64 = particles
        .v
        .iter()
        .flat_map(|axis| axis.iter())
        .map(|v| v * v)
        .sum::<f64>()
        .sqrt();

    for step in 1..=100_u64 {
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

    let after = utils::total_momentum(&particles.v, &particles.mass);
    let tolerance = 1e-6 * (n as f64).sqrt() * speed;
    for axis in 0..3 {
        assert!(
            (after[axis] - before[axis]).abs() <= tolerance,
            "axis {axis}: {} -> {}",
            before[axis],
            after[axis]
        );
    }
}

#[test]
fn gwmvv_is_time_reversible_without_random_forces() {
    let length = 6.0;
    let sim_box = SimBox::new([length; 3], [true; 3]).unwrap();
    let model = model(25.0, 0.0, 1.0, 23);
    let pool = ThreadPoolBuilder::new().num_threads(1).build().unwrap();
    let constraints = Constraints::default();
    let steps = 25_u64;

    let mut particles = fluid(3, length, 23, 1.0);
    let initial = particles.r.clone();

    let mut forward = GwMvv::new(0.5, &sim_box, &model).unwrap();
    for step in 1..=steps {
        let mut ctx = StepContext {
            particles: &mut particles,
            sim_box: &sim_box,
            model: &model,
            constraints: &constraints,
            pool: &pool,
            dt: 0.02,
            velocity_scaling_steps: 0,
        };
        forward.calculate(&mut ctx, step).unwrap();
    }

    // reverse all velocities and integrate the same number of steps with a
    // fresh integrator
    for axis in 0..3 {
        for v in &mut particles.v[axis] {
            *v = -*v;
        }
    }
    let mut backward = GwMvv::new(0.5, &sim_box, &model).unwrap();
    for step in 1..=steps {
        let mut ctx = StepContext {
            particles: &mut particles,
            sim_box: &sim_box,
            model: &model,
            constraints: &constraints,
            pool: &pool,
            dt: 0.02,
            velocity_scaling_steps: 0,
        };
        backward.calculate(&mut ctx, step).unwrap();
    }

    let tolerance = 1e-6 * length;
    for axis in 0..3 {
        for (p, (&now, &was)) in particles.r[axis].iter().zip(&initial[axis]).enumerate() {
            let difference = (now - was).abs();
            let wrapped = difference.min(length - difference);
            assert!(
                wrapped <= tolerance,
                "axis {axis}, particle {p}: drifted by {wrapped}"
            );
        }
    }
}

#[test]
fn berendsen_rescaling_matches_the_closed_form() {
    let n = 1000;
    let mut particles = ParticleSet::with_capacity(n);
    let mut source = RandomSource::new(&RandomConfig::with_seed(5));
    for axis in 0..3 {
        particles.r[axis] = vec![0.0; n];
        particles.v[axis] = (0..n).map(|_| source.gaussian()).collect();
    }
    particles.mass = vec![1.0; n];

    utils::scale_velocities(&mut particles.v, &particles.mass, 1.0);

    let sum_squares: f64 = particles
        .v
        .iter()
        .flat_map(|axis| axis.iter())
        .map(|v| v * v)
        .sum();
    let dof = 3.0 * n as f64 - 3.0;
    assert_approx_eq!(f64, sum_squares / dof, 1.0, epsilon = 1e-12);

    let momentum = utils::total_momentum(&particles.v, &particles.mass);
    for p in momentum {
        assert!(p.abs() < 1e-6);
    }
}
