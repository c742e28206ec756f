//! Simulation driver: owns the particle state, the integrator, the worker
//! pool and the output sink, and runs the time-step loop.

use crate::accumulator::{Accumulators, ForceModel};
use crate::analysis;
use crate::bonds;
use crate::cells::CellGrid;
use crate::error::{Error, Result};
use crate::geometry::SimBox;
use crate::input::{IntegrationKind, Parameters};
use crate::integrators::{GwMvv, Integrator, IntegratorEnum, Pnhln, S1Mvv, ScMvv, StepContext};
use crate::minimizer::{self, MinimizerSettings};
use crate::output::{MinimizationRecord, RestartInfo, SimulationOutput, StepRecord};
use crate::particle::ParticleSet;
use crate::rng::RandomSource;
use crate::utils;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Result of a completed (or cooperatively stopped) run.
#[derive(Clone, Copy, Debug)]
pub struct RunSummary {
    /// Last completed time step.
    pub steps_completed: u64,
    /// Whether the run ended on the stop signal instead of the step count.
    pub stopped: bool,
    /// Temperature at the end of the run.
    pub final_temperature: f64,
}

/// A fully constructed simulation.
pub struct Simulation {
    parameters: Parameters,
    sim_box: SimBox,
    model: ForceModel,
    particles: ParticleSet,
    integrator: IntegratorEnum,
    pool: ThreadPool,
    output: Box<dyn SimulationOutput>,
    output_accumulators: Accumulators,
    stop: Arc<AtomicBool>,
    start_step: u64,
}

impl Simulation {
    /// Builds the simulation from validated parameters, adopting a restart
    /// snapshot when one is given.
    ///
    /// # Errors
    ///
    /// Configuration errors for inconsistent inputs; grid and pool
    /// construction failures.
    pub fn new(
        parameters: Parameters,
        output: Box<dyn SimulationOutput>,
        threads: usize,
        stop: Arc<AtomicBool>,
        restart: Option<RestartInfo>,
    ) -> Result<Self> {
        let sim_box = SimBox::new(parameters.box_size, parameters.periodic)?;
        let mut particles = build_particles(&parameters)?;

        let gamma = parameters.sigma * parameters.sigma / (2.0 * parameters.temperature);
        let model = ForceModel {
            // reduced DPD units: the interaction cutoff is the length unit
            cutoff: 1.0,
            kt: parameters.temperature,
            sigma: parameters.sigma,
            gamma,
            interactions: parameters.interactions.clone(),
            bond_chunks: bonds::chunk_bonds(&parameters.bonds),
            electrostatics: parameters.electrostatics,
            random: parameters.random,
        };

        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|err| Error::config(format!("worker pool construction failed: {err}")))?;

        let integrator = match parameters.integration {
            IntegrationKind::GwMvv { lambda } => {
                IntegratorEnum::from(GwMvv::new(lambda, &sim_box, &model)?)
            }
            IntegrationKind::ScMvv { iterations, cache } => {
                IntegratorEnum::from(ScMvv::new(iterations, &sim_box, &model, cache)?)
            }
            IntegrationKind::S1Mvv { cache } => {
                IntegratorEnum::from(S1Mvv::new(&sim_box, &model, cache)?)
            }
            IntegrationKind::Pnhln { mu, cache } => {
                IntegratorEnum::from(Pnhln::new(mu, &sim_box, &model, cache)?)
            }
        };

        let start_step = match restart {
            Some(info) => {
                if info.r[0].len() != particles.len() {
                    return Err(Error::config(format!(
                        "restart snapshot holds {} particles, the input defines {}",
                        info.r[0].len(),
                        particles.len()
                    )));
                }
                particles.r = info.r;
                particles.v = info.v;
                info.last_time_step
            }
            None => {
                initialize_velocities(&mut particles, &parameters);
                0
            }
        };

        correct_initial_positions(&mut particles, &sim_box)?;
        if parameters.constraints.needs_old_positions() {
            particles.ensure_old_positions();
        }

        let output_accumulators = Accumulators::new(&sim_box, &model, false)?;
        Ok(Self {
            parameters,
            sim_box,
            model,
            particles,
            integrator,
            pool,
            output,
            output_accumulators,
            stop,
            start_step,
        })
    }

    /// Shared stop flag; setting it ends the run at the next output
    /// boundary.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Read access to the particle state (snapshotting, tests).
    #[must_use]
    pub const fn particles(&self) -> &ParticleSet {
        &self.particles
    }

    /// Runs the pre-minimization (if configured) and the time loop.
    ///
    /// The worker pool shuts down when the simulation is dropped; a
    /// step-loop failure still runs `finish()` on the output writer before
    /// returning.
    ///
    /// # Errors
    ///
    /// The first fatal step error, or the deferred output failure from
    /// `finish()`.
    pub fn run(&mut self) -> Result<RunSummary> {
        let outcome = self.run_inner();
        match outcome {
            Ok(summary) => {
                self.output.finish()?;
                Ok(summary)
            }
            Err(error) => {
                tracing::error!(%error, "simulation failed, closing output");
                // the writer sees the corrupt dataset; its own error is
                // secondary to the step failure
                let _ = self.output.finish();
                Err(error)
            }
        }
    }

    fn run_inner(&mut self) -> Result<RunSummary> {
        if self.parameters.minimization_steps > 0 && self.start_step == 0 {
            self.minimize()?;
        }

        tracing::info!(
            particles = self.particles.len(),
            steps = self.parameters.time_step_number,
            start = self.start_step,
            "starting time loop"
        );
        self.write_output(self.start_step)?;

        let mut stopped = false;
        let mut last_step = self.start_step;
        for step in self.start_step + 1..=self.parameters.time_step_number {
            let mut ctx = StepContext {
                particles: &mut self.particles,
                sim_box: &self.sim_box,
                model: &self.model,
                constraints: &self.parameters.constraints,
                pool: &self.pool,
                dt: self.parameters.time_step_length,
                velocity_scaling_steps: self.parameters.velocity_scaling_steps,
            };
            self.integrator.calculate(&mut ctx, step)?;
            last_step = step;

            if step % self.parameters.output_frequency == 0 {
                self.write_output(step)?;
                if self.stop.load(Ordering::Relaxed) {
                    tracing::info!(step, "stop requested, checkpointing");
                    stopped = true;
                    break;
                }
            }
        }

        self.output.write_restart(&RestartInfo {
            last_time_step: last_step,
            r: self.particles.r.clone(),
            v: self.particles.v.clone(),
        })?;

        Ok(RunSummary {
            steps_completed: last_step,
            stopped,
            final_temperature: utils::temperature(&self.particles.v, &self.particles.mass),
        })
    }

    fn minimize(&mut self) -> Result<()> {
        let settings = MinimizerSettings {
            steps: self.parameters.minimization_steps,
            all_forces: self.parameters.minimization_all_forces,
        };
        let output = &mut self.output;
        let emit = self.parameters.minimization_output;
        let mut first_failure = None;
        let summary = minimizer::minimize(
            &mut self.particles,
            &self.model,
            &self.sim_box,
            &self.pool,
            &settings,
            |step| {
                if emit && step.accepted {
                    let record = MinimizationRecord {
                        iteration: step.iteration,
                        accepted: step.accepted,
                        potential: step.potential,
                    };
                    if let Err(error) = output.write_minimization_step(&record) {
                        if first_failure.is_none() {
                            first_failure = Some(error);
                        }
                    }
                }
            },
        )?;
        if let Some(error) = first_failure {
            return Err(error);
        }
        tracing::info!(
            accepted = summary.accepted,
            rejected = summary.rejected,
            potential = summary.potential,
            "pre-minimization finished"
        );
        Ok(())
    }

    fn write_output(&mut self, step: u64) -> Result<()> {
        self.output_accumulators.invalidate();
        let report = self.output_accumulators.potentials(
            &mut self.particles,
            &self.model,
            &self.sim_box,
            &self.pool,
        )?;

        let volume = self.sim_box.volume();
        let mut kinetic_diagonal = [0.0_f64; 3];
        for axis in 0..3 {
            for (&v, &m) in self.particles.v[axis].iter().zip(&self.particles.mass) {
                kinetic_diagonal[axis] += m * v * v;
            }
        }
        let pressure = [
            (kinetic_diagonal[0] + report.virial[0]) / volume,
            (kinetic_diagonal[1] + report.virial[1]) / volume,
            (kinetic_diagonal[2] + report.virial[2]) / volume,
        ];
        let dpd_pressure = [
            (kinetic_diagonal[0] + report.dpd_virial[0]) / volume,
            (kinetic_diagonal[1] + report.dpd_virial[1]) / volume,
            (kinetic_diagonal[2] + report.dpd_virial[2]) / volume,
        ];
        let surface_tension = [
            self.sim_box.length(0) * (pressure[0] - 0.5 * (pressure[1] + pressure[2])),
            self.sim_box.length(1) * (pressure[1] - 0.5 * (pressure[0] + pressure[2])),
            self.sim_box.length(2) * (pressure[2] - 0.5 * (pressure[0] + pressure[1])),
        ];

        let radius_of_gyration: Vec<(String, f64)> = self
            .parameters
            .radius_of_gyration_types
            .iter()
            .map(|&molecule_type| {
                (
                    self.parameters.molecules[molecule_type as usize].name.clone(),
                    analysis::mean_radius_of_gyration(&self.particles, molecule_type),
                )
            })
            .collect();

        let nearest = if self.parameters.nearest_neighbor_particle
            || self.parameters.nearest_neighbor_bins > 0
        {
            let grid = CellGrid::new(&self.sim_box, self.model.cutoff)?;
            let assignment = grid.assign(&self.particles.r);
            Some(analysis::nearest_neighbors(
                &self.particles,
                &self.sim_box,
                &grid,
                &assignment,
                self.parameters.species.len(),
                self.parameters.nearest_neighbor_bins.max(1),
            ))
        } else {
            None
        };

        let record = StepRecord {
            step,
            time: step as f64 * self.parameters.time_step_length,
            temperature: utils::temperature(&self.particles.v, &self.particles.mass),
            u_kin: utils::kinetic_energy(&self.particles.v, &self.particles.mass),
            u_pot_dpd: report.dpd,
            u_pot_bond: report.bond,
            u_pot_electrostatic: report.electrostatic,
            pressure_diagonal: pressure,
            dpd_pressure_diagonal: dpd_pressure,
            surface_tension,
            radius_of_gyration: &radius_of_gyration,
            nearest_neighbors: nearest.as_ref(),
            positions: &self.particles.r,
        };
        self.output.write_step(&record)?;
        self.output.write_restart(&RestartInfo {
            last_time_step: step,
            r: self.particles.r.clone(),
            v: self.particles.v.clone(),
        })
    }
}

/// Builds the structure-of-arrays particle state from the molecule blocks.
///
/// # Errors
///
/// Configuration errors for positions outside sensible bounds are caught
/// later by the boundary correction; this only fails on count mismatches.
pub fn build_particles(parameters: &Parameters) -> Result<ParticleSet> {
    let mut particles = ParticleSet::with_capacity(parameters.particle_number);
    for (type_index, molecule) in parameters.molecules.iter().enumerate() {
        let type_index = u32::try_from(type_index)
            .map_err(|_| Error::config("molecule table is too large"))?;
        for (offset, record) in molecule.records.iter().enumerate() {
            let instance = offset / molecule.particles_per_molecule;
            particles.r[0].push(record.position[0]);
            particles.r[1].push(record.position[1]);
            particles.r[2].push(record.position[2]);
            particles.species.push(record.species);
            particles.molecule_type.push(type_index);
            particles.molecule_index.push(
                u32::try_from(instance)
                    .map_err(|_| Error::config("molecule instance count is too large"))?,
            );
            let species = record.species as usize;
            particles.charge.push(parameters.species.charge(species));
            particles
                .molar_mass
                .push(parameters.species.molar_mass(species));
        }
    }
    let n = particles.r[0].len();
    if n != parameters.particle_number {
        return Err(Error::config(format!(
            "molecule files define {n} particles, ParticleNumber says {}",
            parameters.particle_number
        )));
    }
    for axis in 1..3 {
        debug_assert_eq!(particles.r[axis].len(), n);
    }
    particles.v = [(); 3].map(|()| vec![0.0; n]);
    particles.f = [(); 3].map(|()| vec![0.0; n]);
    particles.f_two = [(); 3].map(|()| vec![0.0; n]);
    particles.v_new = [(); 3].map(|()| vec![0.0; n]);
    particles.assign_masses(parameters.unit_mass, parameters.species.min_molar_mass());
    particles.collect_charged();
    Ok(particles)
}

// Maxwell-like start: per-particle Gaussian velocities at the target
// temperature, then one exact rescaling shot
fn initialize_velocities(particles: &mut ParticleSet, parameters: &Parameters) {
    let mut source = RandomSource::new(&parameters.random);
    let kt = parameters.temperature;
    for axis in 0..3 {
        for p in 0..particles.len() {
            let width = (kt / particles.mass[p]).sqrt();
            particles.v[axis][p] = source.gaussian() * width;
        }
    }
    utils::scale_velocities(&mut particles.v, &particles.mass, kt);
}

fn correct_initial_positions(particles: &mut ParticleSet, sim_box: &SimBox) -> Result<()> {
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
