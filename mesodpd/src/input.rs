//! Whitespace-tokenized, line-oriented input parser.
//!
//! A job is a directory holding `input.txt` plus one positions/bonds file
//! per molecule. The main file is split into `[SECTION]` ... `[/SECTION]`
//! blocks whose keys are validated strictly: a missing required key, an
//! unknown key, or a malformed value is a configuration error naming the
//! offender.

use crate::bonds::{BondBehavior, HarmonicBond};
use crate::constraints::{
    BoundaryPlanes, Constraints, FixedVelocity, MoleculeAcceleration, MoleculeFixation,
    SphereConstraint,
};
use crate::electrostatics::{ChargeDistribution, ElectrostaticsParams, Splitting};
use crate::error::{Error, Result};
use crate::particle::{InteractionTable, SpeciesTable};
use crate::rng::{RandomConfig, RandomKind};
use rustc_hash::FxHashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the main input file inside a job directory.
pub const INPUT_FILE_NAME: &str = "input.txt";

/// The only accepted input format version.
pub const SUPPORTED_VERSION: &str = "1.0.0.0";

/// Hard ceiling on the number of time steps.
pub const MAX_TIME_STEPS: u64 = 1_000_000_000;

/// Integration scheme selection with its scheme-specific parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum IntegrationKind {
    /// Groot-Warren MVV with predictor weight `lambda`.
    GwMvv {
        /// Predictor weight in `[0, 1]`.
        lambda: f64,
    },
    /// Self-consistent MVV with a fixed iteration count.
    ScMvv {
        /// Self-consistency iterations per step.
        iterations: u32,
        /// Reuse the pair-distance cache within a step.
        cache: bool,
    },
    /// Shardlow S1 splitting.
    S1Mvv {
        /// Reuse the pair-distance cache within a step.
        cache: bool,
    },
    /// Pairwise Nose-Hoover-Langevin.
    Pnhln {
        /// Thermostat coupling mass.
        mu: f64,
        /// Reuse the pair-distance cache within a step.
        cache: bool,
    },
}

/// One molecule species: its name, structure file and parsed content.
#[derive(Clone, Debug)]
pub struct MoleculeSpec {
    /// Molecule name from the molecule table.
    pub name: String,
    /// Total particle count over all instances.
    pub total_particles: usize,
    /// Particle count of a single instance.
    pub particles_per_molecule: usize,
    /// First global particle index of this molecule block.
    pub first_particle: usize,
    /// Per-particle species ids, positions and intra-molecular bonds
    /// (indices are global).
    pub records: Vec<ParticleRecord>,
    /// Bonds of this molecule block, global indices.
    pub bonds: Vec<(usize, usize)>,
}

/// One particle line of a positions file, resolved to global indexing.
#[derive(Clone, Debug)]
pub struct ParticleRecord {
    /// Species id.
    pub species: u32,
    /// Position.
    pub position: [f64; 3],
}

/// Validated run parameters.
#[derive(Clone, Debug)]
pub struct Parameters {
    /// Box extents.
    pub box_size: [f64; 3],
    /// Per-axis periodic flags.
    pub periodic: [bool; 3],
    /// Target temperature `kT`.
    pub temperature: f64,
    /// DPD noise amplitude.
    pub sigma: f64,
    /// Species table.
    pub species: SpeciesTable,
    /// Conservative interaction constants.
    pub interactions: InteractionTable,
    /// All harmonic bonds, global indices.
    pub bonds: Vec<HarmonicBond>,
    /// Electrostatics, when configured.
    pub electrostatics: Option<ElectrostaticsParams>,
    /// Constraint records (gravity included).
    pub constraints: Constraints,
    /// Number of time steps.
    pub time_step_number: u64,
    /// Time step length.
    pub time_step_length: f64,
    /// Output cadence in steps.
    pub output_frequency: u64,
    /// Integration scheme.
    pub integration: IntegrationKind,
    /// Pre-minimization steps (0 disables).
    pub minimization_steps: u64,
    /// Minimize over all conservative forces instead of DPD only.
    pub minimization_all_forces: bool,
    /// Write a snapshot after every accepted minimization step.
    pub minimization_output: bool,
    /// All DPD masses are 1.
    pub unit_mass: bool,
    /// Steps with active initial velocity scaling.
    pub velocity_scaling_steps: u64,
    /// Random stream configuration.
    pub random: RandomConfig,
    /// Declared particle count, cross-checked against the molecule files.
    pub particle_number: usize,
    /// Molecule blocks in input order.
    pub molecules: Vec<MoleculeSpec>,
    /// Molecule types flagged for radius-of-gyration output.
    pub radius_of_gyration_types: Vec<u32>,
    /// Whether nearest-neighbor species statistics are collected.
    pub nearest_neighbor_particle: bool,
    /// Bin count for the nearest-neighbor distance histogram (0 disables).
    pub nearest_neighbor_bins: usize,
}

/// Loads and validates the job in `directory`.
///
/// # Errors
///
/// Returns [`Error::Config`] for any structural or semantic problem with
/// the input files, [`Error::Io`] if a file cannot be read.
pub fn load_job(directory: &Path) -> Result<Parameters> {
    let main = directory.join(INPUT_FILE_NAME);
    let text = fs::read_to_string(&main)?;
    parse_parameters(&text, directory)
}

/// Parses the main input text; molecule files are resolved against
/// `directory`.
///
/// # Errors
///
/// See [`load_job`].
pub fn parse_parameters(text: &str, directory: &Path) -> Result<Parameters> {
    let sections = split_sections(text)?;
    let general = require_section(&sections, "GENERAL")?;
    let particle = require_section(&sections, "PARTICLE_DESCRIPTION")?;
    let chemical = require_section(&sections, "CHEMICAL_SYSTEM_DESCRIPTION")?;
    let interaction = require_section(&sections, "INTERACTION_DESCRIPTION")?;
    let simulation = require_section(&sections, "SIMULATION_DESCRIPTION")?;
    let counts = require_section(&sections, "SIMULATION_COUNTS")?;

    // GENERAL
    general.check_known_keys(&["Version"])?;
    let version = general.required_values("Version", 1)?;
    if version[0] != SUPPORTED_VERSION {
        return Err(Error::config(format!(
            "unsupported input version `{}`, expected `{SUPPORTED_VERSION}`",
            version[0]
        )));
    }

    // PARTICLE_DESCRIPTION
    particle.check_known_keys(&["ParticleTable"])?;
    let species = parse_species(particle.required_table("ParticleTable")?)?;

    // INTERACTION_DESCRIPTION
    interaction.check_known_keys(&[
        "Temperature",
        "DpdSigma",
        "InteractionTable",
        "Bonds12Table",
        "IsGaussianRandomDpdForce",
        "Electrostatics",
        "GravitationalAcceleration",
    ])?;
    let temperature = parse_f64(&interaction.required_values("Temperature", 1)?[0], "Temperature")?;
    if temperature <= 0.0 {
        return Err(Error::config(format!(
            "Temperature must be positive, got {temperature}"
        )));
    }
    let sigma = parse_f64(&interaction.required_values("DpdSigma", 1)?[0], "DpdSigma")?;
    let interactions =
        parse_interactions(interaction.required_table("InteractionTable")?, &species)?;
    let bond_table = match interaction.optional_table("Bonds12Table")? {
        Some(rows) => parse_bond_table(rows, &species)?,
        None => FxHashMap::default(),
    };
    let gaussian = match interaction.optional_values("IsGaussianRandomDpdForce")? {
        Some(values) => parse_bool(&values[0], "IsGaussianRandomDpdForce")?,
        None => false,
    };
    let electrostatics = match interaction.optional_values("Electrostatics")? {
        Some(values) => Some(parse_electrostatics(&values)?),
        None => None,
    };
    let gravity = match interaction.optional_values("GravitationalAcceleration")? {
        Some(values) => parse_vector3(&values, "GravitationalAcceleration")?,
        None => [0.0; 3],
    };

    // SIMULATION_DESCRIPTION
    simulation.check_known_keys(&[
        "TimeStepNumber",
        "TimeStepLength",
        "TimeStepFrequencyForOutput",
        "IntegrationType",
        "InitialPotentialEnergyMinimizationStepNumber",
        "IsInitialPotentialEnergyMinimizationStepOutput",
        "PeriodicBoundaries",
        "IsDpdUnitMass",
        "InitialVelocityScalingSteps",
        "IsVelocityScaling",
        "RandomNumberGenerator",
    ])?;
    let time_step_number = parse_u64(
        &simulation.required_values("TimeStepNumber", 1)?[0],
        "TimeStepNumber",
    )?;
    if time_step_number > MAX_TIME_STEPS {
        return Err(Error::config(format!(
            "TimeStepNumber {time_step_number} exceeds the maximum of {MAX_TIME_STEPS}"
        )));
    }
    let time_step_length = parse_f64(
        &simulation.required_values("TimeStepLength", 1)?[0],
        "TimeStepLength",
    )?;
    if time_step_length <= 0.0 {
        return Err(Error::config(format!(
            "TimeStepLength must be positive, got {time_step_length}"
        )));
    }
    let output_frequency = parse_u64(
        &simulation.required_values("TimeStepFrequencyForOutput", 1)?[0],
        "TimeStepFrequencyForOutput",
    )?
    .max(1);
    let integration = parse_integration(&simulation.required_values_any("IntegrationType")?)?;
    let (minimization_steps, minimization_all_forces) =
        match simulation.optional_values("InitialPotentialEnergyMinimizationStepNumber")? {
            Some(values) => {
                let steps = parse_u64(&values[0], "InitialPotentialEnergyMinimizationStepNumber")?;
                let all = match values.get(1) {
                    Some(v) => parse_bool(v, "InitialPotentialEnergyMinimizationStepNumber")?,
                    None => true,
                };
                (steps, all)
            }
            None => (0, true),
        };
    let minimization_output =
        match simulation.optional_values("IsInitialPotentialEnergyMinimizationStepOutput")? {
            Some(values) => parse_bool(&values[0], "IsInitialPotentialEnergyMinimizationStepOutput")?,
            None => false,
        };
    let periodic_values = simulation.required_values("PeriodicBoundaries", 3)?;
    let periodic = [
        parse_bool(&periodic_values[0], "PeriodicBoundaries")?,
        parse_bool(&periodic_values[1], "PeriodicBoundaries")?,
        parse_bool(&periodic_values[2], "PeriodicBoundaries")?,
    ];
    let unit_mass = match simulation.optional_values("IsDpdUnitMass")? {
        Some(values) => parse_bool(&values[0], "IsDpdUnitMass")?,
        None => true,
    };
    let velocity_scaling_steps = match (
        simulation.optional_values("InitialVelocityScalingSteps")?,
        simulation.optional_values("IsVelocityScaling")?,
    ) {
        (Some(_), Some(_)) => {
            return Err(Error::config(
                "InitialVelocityScalingSteps and the legacy IsVelocityScaling are mutually exclusive",
            ));
        }
        (Some(values), None) => parse_u64(&values[0], "InitialVelocityScalingSteps")?,
        (None, Some(values)) => {
            // legacy switch: scaling is either permanent or off
            if parse_bool(&values[0], "IsVelocityScaling")? {
                MAX_TIME_STEPS
            } else {
                0
            }
        }
        (None, None) => 0,
    };
    let rng_values = simulation.required_values("RandomNumberGenerator", 3)?;
    let random = RandomConfig {
        kind: RandomKind::parse(&rng_values[0])?,
        seed: parse_u64(&rng_values[1], "RandomNumberGenerator seed")?,
        warmup: u32::try_from(parse_u64(&rng_values[2], "RandomNumberGenerator warmup")?)
            .map_err(|_| Error::config("RandomNumberGenerator warmup exceeds u32"))?,
        gaussian,
    };

    // SIMULATION_COUNTS
    counts.check_known_keys(&["ParticleNumber"])?;
    let particle_number = usize::try_from(parse_u64(
        &counts.required_values("ParticleNumber", 1)?[0],
        "ParticleNumber",
    )?)
    .map_err(|_| Error::config("ParticleNumber exceeds the address space"))?;

    // CHEMICAL_SYSTEM_DESCRIPTION
    chemical.check_known_keys(&[
        "MoleculeTable",
        "BoxSize",
        "MoleculeFixation",
        "MoleculeBoundary",
        "MoleculeSphere",
        "MoleculeFixedVelocity",
        "MoleculeAcceleration",
        "RadiusOfGyration",
        "NearestNeighborParticle",
        "NearestNeighborDistance",
    ])?;
    let box_values = chemical.required_values("BoxSize", 3)?;
    let box_size = parse_vector3(&box_values, "BoxSize")?;
    for (axis, &l) in box_size.iter().enumerate() {
        if l <= 0.0 {
            return Err(Error::config(format!(
                "BoxSize component {axis} must be positive, got {l}"
            )));
        }
    }

    let molecule_rows = chemical.required_table("MoleculeTable")?;
    let (molecules, bonds) =
        load_molecules(molecule_rows, directory, &species, &bond_table)?;
    let total_loaded: usize = molecules.iter().map(|m| m.total_particles).sum();
    if total_loaded != particle_number {
        return Err(Error::config(format!(
            "ParticleNumber is {particle_number} but the molecule files define {total_loaded} particles"
        )));
    }

    let molecule_range = |name: &str| -> Result<(usize, usize, u32)> {
        molecules
            .iter()
            .enumerate()
            .find(|(_, m)| m.name == name)
            .map(|(index, m)| {
                (
                    m.first_particle,
                    m.first_particle + m.total_particles,
                    u32::try_from(index).expect("molecule table exceeds u32"),
                )
            })
            .ok_or_else(|| Error::config(format!("unknown molecule `{name}`")))
    };

    let mut constraints = Constraints {
        gravity,
        ..Constraints::default()
    };
    for values in chemical.repeated_values("MoleculeFixation") {
        if values.len() != 5 {
            return Err(Error::config("MoleculeFixation needs: name x y z maxStep"));
        }
        let (first, exclusive_last, _) = molecule_range(&values[0])?;
        constraints.fixations.push(MoleculeFixation {
            first,
            exclusive_last,
            axes: [
                parse_bool(&values[1], "MoleculeFixation")?,
                parse_bool(&values[2], "MoleculeFixation")?,
                parse_bool(&values[3], "MoleculeFixation")?,
            ],
            max_time_step: parse_u64(&values[4], "MoleculeFixation")?,
        });
    }
    for values in chemical.repeated_values("MoleculeBoundary") {
        if values.len() != 5 {
            return Err(Error::config(
                "MoleculeBoundary needs: name axis min max maxStep",
            ));
        }
        let (first, exclusive_last, _) = molecule_range(&values[0])?;
        constraints.boundaries.push(BoundaryPlanes {
            first,
            exclusive_last,
            axis: parse_axis(&values[1])?,
            min: parse_f64(&values[2], "MoleculeBoundary")?,
            max: parse_f64(&values[3], "MoleculeBoundary")?,
            max_time_step: parse_u64(&values[4], "MoleculeBoundary")?,
        });
    }
    for values in chemical.repeated_values("MoleculeSphere") {
        if values.len() != 7 {
            return Err(Error::config(
                "MoleculeSphere needs: name cx cy cz diameter in|out maxStep",
            ));
        }
        let (first, exclusive_last, _) = molecule_range(&values[0])?;
        let exclusion = match values[5].as_str() {
            "out" => true,
            "in" => false,
            other => {
                return Err(Error::config(format!(
                    "MoleculeSphere mode must be `in` or `out`, got `{other}`"
                )));
            }
        };
        constraints.spheres.push(SphereConstraint {
            first,
            exclusive_last,
            center: [
                parse_f64(&values[1], "MoleculeSphere")?,
                parse_f64(&values[2], "MoleculeSphere")?,
                parse_f64(&values[3], "MoleculeSphere")?,
            ],
            diameter: parse_f64(&values[4], "MoleculeSphere")?,
            exclusion,
            max_time_step: parse_u64(&values[6], "MoleculeSphere")?,
        });
    }
    for values in chemical.repeated_values("MoleculeFixedVelocity") {
        if values.len() != 8 {
            return Err(Error::config(
                "MoleculeFixedVelocity needs: name x y z vx vy vz maxStep",
            ));
        }
        let (first, exclusive_last, _) = molecule_range(&values[0])?;
        constraints.fixed_velocities.push(FixedVelocity {
            first,
            exclusive_last,
            axes: [
                parse_bool(&values[1], "MoleculeFixedVelocity")?,
                parse_bool(&values[2], "MoleculeFixedVelocity")?,
                parse_bool(&values[3], "MoleculeFixedVelocity")?,
            ],
            velocity: [
                parse_f64(&values[4], "MoleculeFixedVelocity")?,
                parse_f64(&values[5], "MoleculeFixedVelocity")?,
                parse_f64(&values[6], "MoleculeFixedVelocity")?,
            ],
            max_time_step: parse_u64(&values[7], "MoleculeFixedVelocity")?,
        });
    }
    for values in chemical.repeated_values("MoleculeAcceleration") {
        if values.len() != 6 {
            return Err(Error::config(
                "MoleculeAcceleration needs: name ax ay az frequency maxStep",
            ));
        }
        let (first, exclusive_last, _) = molecule_range(&values[0])?;
        constraints.accelerations.push(MoleculeAcceleration {
            first,
            exclusive_last,
            acceleration: [
                parse_f64(&values[1], "MoleculeAcceleration")?,
                parse_f64(&values[2], "MoleculeAcceleration")?,
                parse_f64(&values[3], "MoleculeAcceleration")?,
            ],
            frequency: parse_u64(&values[4], "MoleculeAcceleration")?,
            max_time_step: parse_u64(&values[5], "MoleculeAcceleration")?,
        });
    }
    let mut radius_of_gyration_types = Vec::new();
    for values in chemical.repeated_values("RadiusOfGyration") {
        for name in values {
            let (_, _, molecule_type) = molecule_range(name)?;
            radius_of_gyration_types.push(molecule_type);
        }
    }
    let nearest_neighbor_particle = match chemical.optional_values("NearestNeighborParticle")? {
        Some(values) => parse_bool(&values[0], "NearestNeighborParticle")?,
        None => false,
    };
    let nearest_neighbor_bins = match chemical.optional_values("NearestNeighborDistance")? {
        Some(values) => usize::try_from(parse_u64(&values[0], "NearestNeighborDistance")?)
            .map_err(|_| Error::config("NearestNeighborDistance bin count is too large"))?,
        None => 0,
    };

    Ok(Parameters {
        box_size,
        periodic,
        temperature,
        sigma,
        species,
        interactions,
        bonds,
        electrostatics,
        constraints,
        time_step_number,
        time_step_length,
        output_frequency,
        integration,
        minimization_steps,
        minimization_all_forces,
        minimization_output,
        unit_mass,
        velocity_scaling_steps,
        random,
        particle_number,
        molecules,
        radius_of_gyration_types,
        nearest_neighbor_particle,
        nearest_neighbor_bins,
    })
}

// ---------------------------------------------------------------------------
// section scanner

#[derive(Debug, Default)]
struct Section {
    name: String,
    entries: Vec<Entry>,
}

#[derive(Debug)]
struct Entry {
    key: String,
    values: Vec<String>,
    table: Option<Vec<Vec<String>>>,
}

impl Section {
    fn check_known_keys(&self, known: &[&str]) -> Result<()> {
        for entry in &self.entries {
            if !known.contains(&entry.key.as_str()) {
                return Err(Error::config(format!(
                    "unknown key `{}` in section [{}]",
                    entry.key, self.name
                )));
            }
        }
        Ok(())
    }

    fn find(&self, key: &str) -> Option<&Entry> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    fn required_values(&self, key: &str, count: usize) -> Result<Vec<String>> {
        let values = self.required_values_any(key)?;
        if values.len() != count {
            return Err(Error::config(format!(
                "key `{key}` in section [{}] needs {count} value(s), got {}",
                self.name,
                values.len()
            )));
        }
        Ok(values)
    }

    fn required_values_any(&self, key: &str) -> Result<Vec<String>> {
        self.find(key)
            .map(|entry| entry.values.clone())
            .ok_or_else(|| {
                Error::config(format!("missing key `{key}` in section [{}]", self.name))
            })
    }

    fn optional_values(&self, key: &str) -> Result<Option<Vec<String>>> {
        match self.find(key) {
            Some(entry) if entry.values.is_empty() => Err(Error::config(format!(
                "key `{key}` in section [{}] has no value",
                self.name
            ))),
            Some(entry) => Ok(Some(entry.values.clone())),
            None => Ok(None),
        }
    }

    fn repeated_values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Vec<String>> + 'a {
        self.entries
            .iter()
            .filter(move |entry| entry.key == key)
            .map(|entry| &entry.values)
    }

    fn required_table(&self, key: &str) -> Result<&[Vec<String>]> {
        self.find(key)
            .and_then(|entry| entry.table.as_deref())
            .ok_or_else(|| {
                Error::config(format!(
                    "missing table `{key}` in section [{}]",
                    self.name
                ))
            })
    }

    fn optional_table(&self, key: &str) -> Result<Option<&[Vec<String>]>> {
        match self.find(key) {
            Some(entry) => entry.table.as_deref().map(Some).ok_or_else(|| {
                Error::config(format!(
                    "key `{key}` in section [{}] must carry a table",
                    self.name
                ))
            }),
            None => Ok(None),
        }
    }
}

fn split_sections(text: &str) -> Result<Vec<Section>> {
    let mut sections: Vec<Section> = Vec::new();
    let mut current: Option<Section> = None;
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        let tokens = tokenize(line);
        if tokens.is_empty() {
            continue;
        }
        let first = &tokens[0];
        if let Some(name) = first.strip_prefix("[/") {
            let name = name.trim_end_matches(']');
            match current.take() {
                Some(section) if section.name == name => sections.push(section),
                Some(section) => {
                    return Err(Error::config(format!(
                        "section [{}] closed by [/{name}]",
                        section.name
                    )));
                }
                None => {
                    return Err(Error::config(format!(
                        "unexpected section close [/{name}]"
                    )));
                }
            }
            continue;
        }
        if let Some(name) = first.strip_prefix('[') {
            if current.is_some() {
                return Err(Error::config("nested sections are not allowed"));
            }
            current = Some(Section {
                name: name.trim_end_matches(']').to_string(),
                entries: Vec::new(),
            });
            continue;
        }
        let Some(section) = current.as_mut() else {
            return Err(Error::config(format!(
                "stray token `{first}` outside any section"
            )));
        };

        let mut entry = Entry {
            key: tokens[0].clone(),
            values: tokens[1..].to_vec(),
            table: None,
        };
        // a TABLE_START on the following line attaches a table body
        if lines
            .peek()
            .is_some_and(|next| tokenize(next).first().is_some_and(|t| t == "TABLE_START"))
        {
            lines.next();
            let mut rows = Vec::new();
            loop {
                let Some(row_line) = lines.next() else {
                    return Err(Error::config(format!(
                        "table `{}` is missing TABLE_END",
                        entry.key
                    )));
                };
                let row = tokenize(row_line);
                if row.is_empty() {
                    continue;
                }
                if row[0] == "TABLE_END" {
                    break;
                }
                rows.push(row);
            }
            entry.table = Some(rows);
        }
        section.entries.push(entry);
    }
    if let Some(section) = current {
        return Err(Error::config(format!(
            "section [{}] is never closed",
            section.name
        )));
    }
    Ok(sections)
}

fn tokenize(line: &str) -> Vec<String> {
    let content = line.split('#').next().unwrap_or("");
    content.split_whitespace().map(str::to_string).collect()
}

fn require_section<'a>(sections: &'a [Section], name: &str) -> Result<&'a Section> {
    sections
        .iter()
        .find(|section| section.name == name)
        .ok_or_else(|| Error::config(format!("missing section [{name}]")))
}

// ---------------------------------------------------------------------------
// scalar parsers

fn parse_f64(token: &str, key: &str) -> Result<f64> {
    token
        .parse::<f64>()
        .map_err(|_| Error::config(format!("`{token}` is not a number (key {key})")))
}

fn parse_u64(token: &str, key: &str) -> Result<u64> {
    token
        .parse::<u64>()
        .map_err(|_| Error::config(format!("`{token}` is not a non-negative integer (key {key})")))
}

fn parse_bool(token: &str, key: &str) -> Result<bool> {
    match token {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::config(format!(
            "`{token}` is not a boolean (key {key})"
        ))),
    }
}

fn parse_axis(token: &str) -> Result<usize> {
    match token {
        "x" => Ok(0),
        "y" => Ok(1),
        "z" => Ok(2),
        _ => Err(Error::config(format!("`{token}` is not an axis (x|y|z)"))),
    }
}

fn parse_vector3(values: &[String], key: &str) -> Result<[f64; 3]> {
    if values.len() != 3 {
        return Err(Error::config(format!("key {key} needs three components")));
    }
    Ok([
        parse_f64(&values[0], key)?,
        parse_f64(&values[1], key)?,
        parse_f64(&values[2], key)?,
    ])
}

// ---------------------------------------------------------------------------
// composite parsers

fn parse_species(rows: &[Vec<String>]) -> Result<SpeciesTable> {
    let mut table_rows = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() != 3 {
            return Err(Error::config(
                "ParticleTable rows need: token charge molarMass",
            ));
        }
        table_rows.push((
            row[0].clone(),
            parse_f64(&row[1], "ParticleTable charge")?,
            parse_f64(&row[2], "ParticleTable molarMass")?,
        ));
    }
    SpeciesTable::new(table_rows)
}

fn parse_interactions(rows: &[Vec<String>], species: &SpeciesTable) -> Result<InteractionTable> {
    let mut table = InteractionTable::unset(species.len());
    for row in rows {
        if row.len() != 3 {
            return Err(Error::config(
                "InteractionTable rows need: tokenA tokenB a",
            ));
        }
        let i = species_index(species, &row[0])?;
        let j = species_index(species, &row[1])?;
        table.set(i, j, parse_f64(&row[2], "InteractionTable")?);
    }
    if !table.is_complete() {
        return Err(Error::config(
            "InteractionTable does not cover every species pair",
        ));
    }
    Ok(table)
}

type BondParams = (f64, f64, BondBehavior);

fn parse_bond_table(
    rows: &[Vec<String>],
    species: &SpeciesTable,
) -> Result<FxHashMap<(usize, usize), BondParams>> {
    let mut map = FxHashMap::default();
    for row in rows {
        if !(4..=5).contains(&row.len()) {
            return Err(Error::config(
                "Bonds12Table rows need: tokenA tokenB length constant [attractive]",
            ));
        }
        let i = species_index(species, &row[0])?;
        let j = species_index(species, &row[1])?;
        let behavior = match row.get(4) {
            Some(flag) if parse_bool(flag, "Bonds12Table attractive")? => {
                BondBehavior::Attractive
            }
            _ => BondBehavior::Default,
        };
        let params = (
            parse_f64(&row[2], "Bonds12Table length")?,
            parse_f64(&row[3], "Bonds12Table constant")?,
            behavior,
        );
        map.insert((i.min(j), i.max(j)), params);
    }
    Ok(map)
}

fn species_index(species: &SpeciesTable, token: &str) -> Result<usize> {
    species
        .index_of(token)
        .ok_or_else(|| Error::config(format!("unknown particle token `{token}`")))
}

fn parse_electrostatics(values: &[String]) -> Result<ElectrostaticsParams> {
    let number = |index: usize, what: &str| parse_f64(&values[index], what);
    let params = match values.len() {
        // legacy ad-hoc variant: the sixth value is the effective-charge
        // factor
        6 => ElectrostaticsParams {
            cutoff: number(0, "Electrostatics cutoff")?,
            max_abs_force: number(1, "Electrostatics maxAbsForce")?,
            effective_exponent: number(2, "Electrostatics exponent")?,
            damping_distance: number(3, "Electrostatics dampingDistance")?,
            damping_factor: number(4, "Electrostatics dampingFactor")?,
            coupling: 1.0,
            distribution: ChargeDistribution::None,
            splitting: Splitting::None,
            effective_charge_factor: number(5, "Electrostatics chargeFactor")?,
        },
        8 | 9 => {
            let mut cursor = 6;
            let distribution = match values[cursor].as_str() {
                "NONE" => {
                    cursor += 1;
                    ChargeDistribution::None
                }
                "ALEJANDRE" => {
                    let lambda = number(cursor + 1, "Electrostatics smearing length")?;
                    cursor += 2;
                    ChargeDistribution::Alejandre { lambda }
                }
                other => {
                    return Err(Error::config(format!(
                        "unknown charge distribution `{other}`"
                    )));
                }
            };
            let splitting = match values.get(cursor).map(String::as_str) {
                Some("NONE") => Splitting::None,
                Some("FANOURGAKIS") => Splitting::Fanourgakis,
                Some(other) => {
                    return Err(Error::config(format!("unknown splitting `{other}`")));
                }
                None => {
                    return Err(Error::config("Electrostatics is missing the splitting"));
                }
            };
            ElectrostaticsParams {
                cutoff: number(0, "Electrostatics cutoff")?,
                max_abs_force: number(1, "Electrostatics maxAbsForce")?,
                effective_exponent: number(2, "Electrostatics exponent")?,
                damping_distance: number(3, "Electrostatics dampingDistance")?,
                damping_factor: number(4, "Electrostatics dampingFactor")?,
                coupling: number(5, "Electrostatics coupling")?,
                distribution,
                splitting,
                effective_charge_factor: 1.0,
            }
        }
        other => {
            return Err(Error::config(format!(
                "Electrostatics needs 6 values (legacy) or 8-9 tokens, got {other}"
            )));
        }
    };
    params.validate()?;
    Ok(params)
}

fn parse_integration(values: &[String]) -> Result<IntegrationKind> {
    let scheme = values
        .first()
        .ok_or_else(|| Error::config("IntegrationType is empty"))?;
    let cache_flag = |index: usize| -> Result<bool> {
        match values.get(index) {
            Some(token) => parse_bool(token, "IntegrationType cache"),
            None => Ok(false),
        }
    };
    match scheme.as_str() {
        "GWMVV" => {
            let lambda = parse_f64(
                values
                    .get(1)
                    .ok_or_else(|| Error::config("GWMVV needs a lambda value"))?,
                "GWMVV lambda",
            )?;
            Ok(IntegrationKind::GwMvv { lambda })
        }
        "SCMVV" => {
            let iterations = parse_u64(
                values
                    .get(1)
                    .ok_or_else(|| Error::config("SCMVV needs an iteration count"))?,
                "SCMVV iterations",
            )?;
            Ok(IntegrationKind::ScMvv {
                iterations: u32::try_from(iterations)
                    .map_err(|_| Error::config("SCMVV iteration count is too large"))?,
                cache: cache_flag(2)?,
            })
        }
        "S1MVV" => Ok(IntegrationKind::S1Mvv {
            cache: cache_flag(1)?,
        }),
        "PNHLN" => {
            let mu = parse_f64(
                values
                    .get(1)
                    .ok_or_else(|| Error::config("PNHLN needs a coupling mass"))?,
                "PNHLN mu",
            )?;
            Ok(IntegrationKind::Pnhln {
                mu,
                cache: cache_flag(2)?,
            })
        }
        other => Err(Error::config(format!("unknown IntegrationType `{other}`"))),
    }
}

// ---------------------------------------------------------------------------
// molecule position/bond files

fn load_molecules(
    rows: &[Vec<String>],
    directory: &Path,
    species: &SpeciesTable,
    bond_table: &FxHashMap<(usize, usize), BondParams>,
) -> Result<(Vec<MoleculeSpec>, Vec<HarmonicBond>)> {
    let mut molecules = Vec::new();
    let mut bonds = Vec::new();
    let mut next_particle = 0_usize;
    for row in rows {
        if row.len() != 2 {
            return Err(Error::config("MoleculeTable rows need: name file"));
        }
        let path: PathBuf = directory.join(&row[1]);
        let text = fs::read_to_string(&path)?;
        let molecule = parse_molecule_file(&row[0], &text, species, next_particle)?;
        for &(a, b) in &molecule.bonds {
            bonds.push(resolve_bond(a, b, &molecule, bond_table)?);
        }
        next_particle += molecule.total_particles;
        molecules.push(molecule);
    }
    Ok((molecules, bonds))
}

fn resolve_bond(
    a: usize,
    b: usize,
    molecule: &MoleculeSpec,
    bond_table: &FxHashMap<(usize, usize), BondParams>,
) -> Result<HarmonicBond> {
    let sa = molecule.records[a - molecule.first_particle].species as usize;
    let sb = molecule.records[b - molecule.first_particle].species as usize;
    let (rest_length, force_constant, behavior) = bond_table
        .get(&(sa.min(sb), sa.max(sb)))
        .copied()
        .ok_or_else(|| {
            Error::config(format!(
                "molecule `{}` bonds species pair ({sa}, {sb}) without a Bonds12Table row",
                molecule.name
            ))
        })?;
    Ok(HarmonicBond {
        a: u32::try_from(a).expect("particle index exceeds u32"),
        b: u32::try_from(b).expect("particle index exceeds u32"),
        rest_length,
        force_constant,
        behavior,
    })
}

fn parse_molecule_file(
    name: &str,
    text: &str,
    species: &SpeciesTable,
    first_particle: usize,
) -> Result<MoleculeSpec> {
    let mut rows = text.lines().map(tokenize).filter(|row| !row.is_empty());
    let total_particles = usize::try_from(parse_u64(
        &rows
            .next()
            .ok_or_else(|| Error::config(format!("molecule `{name}`: empty file")))?[0],
        "molecule total count",
    )?)
    .map_err(|_| Error::config("molecule particle count is too large"))?;
    let particles_per_molecule = usize::try_from(parse_u64(
        &rows
            .next()
            .ok_or_else(|| Error::config(format!("molecule `{name}`: missing molecule size")))?[0],
        "molecule size",
    )?)
    .map_err(|_| Error::config("molecule size is too large"))?;
    if particles_per_molecule == 0 || total_particles % particles_per_molecule != 0 {
        return Err(Error::config(format!(
            "molecule `{name}`: total count {total_particles} is not a multiple of the molecule size {particles_per_molecule}"
        )));
    }

    let mut records = Vec::with_capacity(total_particles);
    let mut bonds = Vec::new();
    // backbone ids are scoped per molecule instance
    let mut backbone: FxHashMap<(usize, u64), usize> = FxHashMap::default();
    let mut trailing: Vec<Vec<String>> = Vec::new();

    for row in rows {
        if records.len() < total_particles {
            if row.len() < 6 {
                return Err(Error::config(format!(
                    "molecule `{name}`: particle rows need index token backbone x y z [offsets]"
                )));
            }
            let file_index = usize::try_from(parse_u64(&row[0], "particle index")?)
                .map_err(|_| Error::config("particle index is too large"))?;
            if file_index != records.len() {
                return Err(Error::config(format!(
                    "molecule `{name}`: particle rows out of order at index {file_index}"
                )));
            }
            let species_id = species_index(species, &row[1])?;
            let backbone_id = parse_u64(&row[2], "backbone index")?;
            let position = [
                parse_f64(&row[3], "particle x")?,
                parse_f64(&row[4], "particle y")?,
                parse_f64(&row[5], "particle z")?,
            ];
            let global = first_particle + file_index;
            let instance = file_index / particles_per_molecule;
            if backbone_id > 0 {
                backbone.insert((instance, backbone_id), global);
            }
            for offset_token in &row[6..] {
                let offset = offset_token.parse::<i64>().map_err(|_| {
                    Error::config(format!(
                        "molecule `{name}`: `{offset_token}` is not a bond offset"
                    ))
                })?;
                let partner = i64::try_from(global)
                    .expect("particle index exceeds i64")
                    + offset;
                let partner = usize::try_from(partner).map_err(|_| {
                    Error::config(format!(
                        "molecule `{name}`: bond offset {offset} points before the file"
                    ))
                })?;
                // store each structural bond once, from its smaller index
                if partner > global {
                    bonds.push((global, partner));
                } else {
                    bonds.push((partner, global));
                }
            }
            records.push(ParticleRecord {
                species: u32::try_from(species_id).expect("species count exceeds u32"),
                position,
            });
        } else {
            trailing.push(row);
        }
    }
    if records.len() != total_particles {
        return Err(Error::config(format!(
            "molecule `{name}`: expected {total_particles} particle rows, got {}",
            records.len()
        )));
    }

    // trailing rows bond backbone ids pairwise within every instance
    for row in trailing {
        if row.len() != 2 {
            return Err(Error::config(format!(
                "molecule `{name}`: backbone bond rows need two backbone ids"
            )));
        }
        let a_id = parse_u64(&row[0], "backbone bond")?;
        let b_id = parse_u64(&row[1], "backbone bond")?;
        for instance in 0..total_particles / particles_per_molecule {
            let a = *backbone.get(&(instance, a_id)).ok_or_else(|| {
                Error::config(format!(
                    "molecule `{name}`: unknown backbone id {a_id} in instance {instance}"
                ))
            })?;
            let b = *backbone.get(&(instance, b_id)).ok_or_else(|| {
                Error::config(format!(
                    "molecule `{name}`: unknown backbone id {b_id} in instance {instance}"
                ))
            })?;
            bonds.push((a.min(b), a.max(b)));
        }
    }
    bonds.sort_unstable();
    bonds.dedup();

    Ok(MoleculeSpec {
        name: name.to_string(),
        total_particles,
        particles_per_molecule,
        first_particle,
        records,
        bonds,
    })
}
