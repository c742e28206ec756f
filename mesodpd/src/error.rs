//! Error type shared by all simulation phases.

use crate::geometry::Axis;
use thiserror::Error;

/// Catch-all error for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Input validation failed at construction time.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A periodic axis cannot hold the minimum of three interaction cells.
    #[error("box too small along {axis}: {cells} cells of side >= cutoff, need at least 3")]
    BoxTooSmall {
        /// Axis whose cell count fell below the minimum.
        axis: Axis,
        /// Number of cells that fit along the axis.
        cells: usize,
    },
    /// A particle escaped the box and could not be folded back within the
    /// retry budget.
    #[error("particle {particle} left the box along {axis} and could not be corrected")]
    OutOfBox {
        /// Index of the escaping particle.
        particle: usize,
        /// Axis on which the correction failed.
        axis: Axis,
    },
    /// A force or velocity component became NaN or infinite.
    #[error("non-finite value detected in {0}")]
    Numeric(String),
    /// Error from the output writer or snapshot files.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Restart snapshot could not be encoded.
    #[error(transparent)]
    Serialization(#[from] bincode::Error),
}

impl Error {
    /// Shorthand for a [`Error::Config`] from anything printable.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
