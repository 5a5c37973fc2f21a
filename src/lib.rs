//! Generation and analysis of simulated tissue image datasets.
//!
//! Generation samples one parameter row per sample, runs a [`simulation::TissueSimulation`]
//! for each and writes one grid file per (sample, channel, timestep). Analysis works only from
//! those files and the parameter table: embeddings, per-pixel mutual information and pairwise
//! similarity sweeps.

pub mod analysis;
pub mod generator;
pub mod information;
pub mod metrics;
pub mod orchestrator;
pub mod pairs;
pub mod reduction;
pub mod sampler;
pub mod similarity;
pub mod simulation;
pub mod storage;
pub mod tissue;

mod progress;

pub use analysis::{DatasetAnalysis, Selection};
pub use generator::{SampleGenerator, SampleSnapshots};
pub use metrics::{Metric, MetricValue};
pub use orchestrator::{DatasetOrchestrator, GenerationReport};
pub use sampler::ParameterSampler;
pub use similarity::{ScalarSimilarityTable, SimilarityEngine, SimilarityKey};
pub use storage::DatasetStore;
pub use tissue::LatticeTissueFactory;
