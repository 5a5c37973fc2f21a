pub mod config;
pub mod error;
pub mod grid;
pub mod parameters;
pub mod snapshot;

// Re-exports
pub use config::{
    AnalysisConfig, DatasetConfig, DatasetSection, DifferenceGrid, EmbeddingJob, EmbeddingMethod,
    ExecutionConfig, MutualInformationJob, SimilaritySweep, SnapshotFormat, TreatmentConfig,
};
pub use error::{DatasetError, Result};
pub use grid::Grid;
pub use parameters::{ParameterKind, ParameterRange, ParameterRanges, ParameterRow, ParameterTable, ParameterValue};
pub use snapshot::{dataset_folder_name, Channel, DrawSchedule, SnapshotKey, PARAMETER_TABLE_FILE};
