#![warn(clippy::all, clippy::cargo, clippy::nursery, clippy::pedantic)]
#![warn(missing_docs)]

//! `mesodpd` is a particle-based mesoscale engine that evolves soft particles
//! under conservative, random, dissipative, bond, electrostatic and body
//! forces inside a rectangular periodic or reflecting box.

pub mod accumulator;
pub mod adders;
pub mod analysis;
pub mod bonds;
pub mod cells;
pub mod constraints;
mod convert;
pub mod dpd;
pub mod electrostatics;
pub mod error;
pub mod geometry;
pub mod input;
pub mod integrators;
pub mod minimizer;
pub mod output;
pub mod pairs;
pub mod particle;
pub mod rng;
pub mod simulation;
pub mod utils;

pub use error::{Error, Result};
