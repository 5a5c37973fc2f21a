//! Domain errors shared by the generation and analysis crates.

use thiserror::Error;

/// Result alias for the pure numeric and table components.
pub type Result<T> = std::result::Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("malformed parameter range table: {0}")]
    MalformedRangeTable(String),

    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("parameter table already exists at {0}; use resumption instead of a full generation")]
    ParameterTableExists(String),

    #[error("table I/O error: {0}")]
    TableIo(String),

    #[error("malformed dataset parameter table: {0}")]
    MalformedParameterTable(String),

    #[error("corrupt snapshot file {path}: {message}")]
    CorruptSnapshot { path: String, message: String },

    #[error("shape mismatch: {left:?} vs {right:?}")]
    ShapeMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },

    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("no value pairs of '{parameter}' differ by {difference} (tolerance {tolerance})")]
    NoCandidatePairs {
        parameter: String,
        difference: f64,
        tolerance: f64,
    },

    #[error("cannot sample pairs from an empty candidate set")]
    EmptyCandidateSet,

    #[error("all {count} similarity results were non-finite")]
    NoFiniteResults { count: usize },

    #[error("similarity results mix scalar and grid shapes")]
    InconsistentResultShapes,

    #[error("entropy of '{0}' is zero; cannot normalize")]
    ZeroEntropy(String),

    #[error("neighbour graph is disconnected ({components} components); increase the neighbour count")]
    DisconnectedGraph { components: usize },

    #[error("need at least {needed} samples, got {got}")]
    TooFewSamples { needed: usize, got: usize },

    #[error("simulation failed: {0}")]
    Simulation(String),
}
