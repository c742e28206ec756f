//! Simulation output: the writer interface the driver consumes, a
//! plain-text directory writer, and binary restart snapshots.

use crate::analysis::NearestNeighborStats;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Buffer size for all text output files.
pub const OUTPUT_BUFFER_SIZE: usize = 65_536;

/// File name of the restart snapshot inside an output directory.
pub const RESTART_FILE_NAME: &str = "restart.bin";

/// Bookkeeping written at every output step.
#[derive(Clone, Debug)]
pub struct StepRecord<'a> {
    /// Completed time step.
    pub step: u64,
    /// Physical time (`step * dt`).
    pub time: f64,
    /// Instantaneous temperature.
    pub temperature: f64,
    /// Kinetic energy.
    pub u_kin: f64,
    /// DPD pair potential.
    pub u_pot_dpd: f64,
    /// Bond potential.
    pub u_pot_bond: f64,
    /// Electrostatic potential.
    pub u_pot_electrostatic: f64,
    /// Diagonal pressure-tensor components.
    pub pressure_diagonal: [f64; 3],
    /// DPD-only diagonal pressure components.
    pub dpd_pressure_diagonal: [f64; 3],
    /// Surface tension along each axis.
    pub surface_tension: [f64; 3],
    /// Mean radius of gyration per flagged molecule type, `(name, value)`.
    pub radius_of_gyration: &'a [(String, f64)],
    /// Nearest-neighbor statistics, when enabled.
    pub nearest_neighbors: Option<&'a NearestNeighborStats>,
    /// Positions at the output step.
    pub positions: &'a [Vec<f64>; 3],
}

/// One accepted or rejected minimization step.
#[derive(Clone, Copy, Debug)]
pub struct MinimizationRecord {
    /// Iteration number.
    pub iteration: u64,
    /// Whether the move was kept.
    pub accepted: bool,
    /// Best potential so far.
    pub potential: f64,
}

/// Restartable simulation state.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RestartInfo {
    /// Last completed time step.
    pub last_time_step: u64,
    /// Positions per axis.
    pub r: [Vec<f64>; 3],
    /// Velocities per axis.
    pub v: [Vec<f64>; 3],
}

impl RestartInfo {
    /// Reads a snapshot from `path`.
    ///
    /// # Errors
    ///
    /// I/O failures and malformed snapshots are configuration errors at
    /// the call sites that adopt them.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        bincode::deserialize_from(BufReader::new(file))
            .map_err(|err| Error::config(format!("restart snapshot is unreadable: {err}")))
    }

    /// Writes a snapshot to `path`.
    ///
    /// # Errors
    ///
    /// Propagates I/O and serialization failures.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::with_capacity(OUTPUT_BUFFER_SIZE, file);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

/// Sink for everything the simulation produces.
pub trait SimulationOutput {
    /// Writes the bookkeeping and positions of one output step.
    ///
    /// # Errors
    ///
    /// I/O failures; the driver decides whether they abort the run.
    fn write_step(&mut self, record: &StepRecord<'_>) -> Result<()>;

    /// Writes one minimization step.
    ///
    /// # Errors
    ///
    /// I/O failures.
    fn write_minimization_step(&mut self, record: &MinimizationRecord) -> Result<()>;

    /// Writes the restart snapshot.
    ///
    /// # Errors
    ///
    /// I/O failures.
    fn write_restart(&mut self, info: &RestartInfo) -> Result<()>;

    /// Closes the sink; returns an error if any earlier best-effort write
    /// failed, marking the dataset as corrupt.
    ///
    /// # Errors
    ///
    /// The deferred first failure, if any.
    fn finish(&mut self) -> Result<()>;
}

/// Output sink that drops everything; used by tests and probe runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullOutput;

impl SimulationOutput for NullOutput {
    fn write_step(&mut self, _record: &StepRecord<'_>) -> Result<()> {
        Ok(())
    }

    fn write_minimization_step(&mut self, _record: &MinimizationRecord) -> Result<()> {
        Ok(())
    }

    fn write_restart(&mut self, _info: &RestartInfo) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Plain-text writer into one output directory.
///
/// In best-effort mode an I/O failure is remembered instead of raised, the
/// time loop keeps running, and [`SimulationOutput::finish`] reports the
/// first failure at the end.
pub struct TextOutput {
    directory: PathBuf,
    properties: BufWriter<File>,
    minimization: Option<BufWriter<File>>,
    best_effort: bool,
    first_failure: Option<Error>,
    write_positions: bool,
}

impl TextOutput {
    /// Creates the output directory (if needed) and the property log.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures.
    pub fn create(directory: &Path, best_effort: bool, write_positions: bool) -> Result<Self> {
        fs::create_dir_all(directory)?;
        let properties = File::create(directory.join("properties.txt"))?;
        let mut properties = BufWriter::with_capacity(OUTPUT_BUFFER_SIZE, properties);
        writeln!(
            properties,
            "# step time temperature uKin uPotDpd uPotBond uPotEs pXX pYY pZZ stX stY stZ"
        )?;
        Ok(Self {
            directory: directory.to_path_buf(),
            properties,
            minimization: None,
            best_effort,
            first_failure: None,
            write_positions,
        })
    }

    fn guard(&mut self, outcome: Result<()>) -> Result<()> {
        match outcome {
            Ok(()) => Ok(()),
            Err(error) if self.best_effort => {
                tracing::warn!(%error, "output write failed, continuing best-effort");
                if self.first_failure.is_none() {
                    self.first_failure = Some(error);
                }
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    fn write_step_inner(&mut self, record: &StepRecord<'_>) -> Result<()> {
        let p = record.pressure_diagonal;
        let st = record.surface_tension;
        writeln!(
            self.properties,
            "{} {:.6} {:.8} {:.8} {:.8} {:.8} {:.8} {:.8} {:.8} {:.8} {:.8} {:.8} {:.8}",
            record.step,
            record.time,
            record.temperature,
            record.u_kin,
            record.u_pot_dpd,
            record.u_pot_bond,
            record.u_pot_electrostatic,
            p[0],
            p[1],
            p[2],
            st[0],
            st[1],
            st[2],
        )?;
        for (name, value) in record.radius_of_gyration {
            writeln!(self.properties, "# Rg {name} {value:.8}")?;
        }
        if let Some(stats) = record.nearest_neighbors {
            writeln!(
                self.properties,
                "# nnDistanceHistogram {:?}",
                stats.distance_histogram
            )?;
        }
        self.properties.flush()?;

        if self.write_positions {
            let path = self
                .directory
                .join(format!("positions_{:010}.txt", record.step));
            let file = File::create(path)?;
            let mut writer = BufWriter::with_capacity(OUTPUT_BUFFER_SIZE, file);
            let r = record.positions;
            for p in 0..r[0].len() {
                writeln!(writer, "{:.8} {:.8} {:.8}", r[0][p], r[1][p], r[2][p])?;
            }
            writer.flush()?;
        }
        Ok(())
    }

    fn write_minimization_inner(&mut self, record: &MinimizationRecord) -> Result<()> {
        if self.minimization.is_none() {
            let file = File::create(self.directory.join("minimization.txt"))?;
            let mut writer = BufWriter::with_capacity(OUTPUT_BUFFER_SIZE, file);
            writeln!(writer, "# iteration accepted potential")?;
            self.minimization = Some(writer);
        }
        // UNWRAP: created above
        let writer = self.minimization.as_mut().unwrap_or_else(|| unreachable!());
        writeln!(
            writer,
            "{} {} {:.8}",
            record.iteration, record.accepted, record.potential
        )?;
        Ok(())
    }
}

impl SimulationOutput for TextOutput {
    fn write_step(&mut self, record: &StepRecord<'_>) -> Result<()> {
        let outcome = self.write_step_inner(record);
        self.guard(outcome)
    }

    fn write_minimization_step(&mut self, record: &MinimizationRecord) -> Result<()> {
        let outcome = self.write_minimization_inner(record);
        self.guard(outcome)
    }

    fn write_restart(&mut self, info: &RestartInfo) -> Result<()> {
        let outcome = info.save(&self.directory.join(RESTART_FILE_NAME));
        self.guard(outcome)
    }

    fn finish(&mut self) -> Result<()> {
        let flush = self
            .properties
            .flush()
            .map_err(Error::from)
            .and_then(|()| match &mut self.minimization {
                Some(writer) => writer.flush().map_err(Error::from),
                None => Ok(()),
            });
        flush?;
        match self.first_failure.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record<'a>(positions: &'a [Vec<f64>; 3], rg: &'a [(String, f64)]) -> StepRecord<'a> {
        StepRecord {
            step: 10,
            time: 0.4,
            temperature: 1.01,
            u_kin: 150.0,
            u_pot_dpd: 42.0,
            u_pot_bond: 1.5,
            u_pot_electrostatic: 0.0,
            pressure_diagonal: [23.0, 23.5, 22.8],
            dpd_pressure_diagonal: [20.0, 20.5, 19.8],
            surface_tension: [0.1, -0.1, 0.0],
            radius_of_gyration: rg,
            nearest_neighbors: None,
            positions,
        }
    }

    #[test]
    fn restart_info_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RESTART_FILE_NAME);
        let info = RestartInfo {
            last_time_step: 77,
            r: [vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]],
            v: [vec![0.1, 0.2], vec![0.3, 0.4], vec![0.5, 0.6]],
        };
        info.save(&path).unwrap();
        let loaded = RestartInfo::load(&path).unwrap();
        assert_eq!(loaded.last_time_step, 77);
        assert_eq!(loaded.r[0], vec![1.0, 2.0]);
        assert_eq!(loaded.v[2], vec![0.5, 0.6]);
    }

    #[test]
    fn text_output_writes_properties_and_positions() {
        let dir = tempfile::tempdir().unwrap();
        let positions = [vec![1.0, 2.0], vec![1.0, 2.0], vec![1.0, 2.0]];
        let rg = vec![("Water".to_string(), 0.8)];
        let mut output = TextOutput::create(dir.path(), false, true).unwrap();
        output.write_step(&sample_record(&positions, &rg)).unwrap();
        output.finish().unwrap();

        let properties = fs::read_to_string(dir.path().join("properties.txt")).unwrap();
        assert!(properties.contains("10 0.4"));
        assert!(properties.contains("# Rg Water"));
        let snapshot = fs::read_to_string(dir.path().join("positions_0000000010.txt")).unwrap();
        assert_eq!(snapshot.lines().count(), 2);
    }

    #[test]
    fn minimization_log_is_created_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = TextOutput::create(dir.path(), false, false).unwrap();
        output
            .write_minimization_step(&MinimizationRecord {
                iteration: 1,
                accepted: true,
                potential: 12.0,
            })
            .unwrap();
        output.finish().unwrap();
        let log = fs::read_to_string(dir.path().join("minimization.txt")).unwrap();
        assert!(log.contains("1 true"));
    }

    #[test]
    fn missing_restart_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RestartInfo::load(&dir.path().join("nope.bin")).is_err());
    }
}
