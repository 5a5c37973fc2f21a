use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::snapshot::{dataset_folder_name, Channel, DrawSchedule};

// Configuration for the dataset being generated
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DatasetSection {
    /// Logical name; the folder name is derived from it and the draw/grid settings.
    pub name: String,
    #[serde(default = "default_root")]
    pub root: PathBuf,
    pub width: usize,
    pub height: usize,
    pub start_draw: u32,
    pub interval: u32,
    pub n_draws: u32,
    pub n_samples: usize,
    /// CSV range table (`Parameter,Type,Default Value,Minimum,Maximum`).
    pub parameter_ranges: PathBuf,
    pub parameters_of_interest: Vec<String>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub format: SnapshotFormat,
}

/// On-disk encoding of snapshot and artifact grids.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    /// Shape header followed by a flat native-endian f64 dump.
    #[default]
    Raw,
    Bincode,
    MessagePack,
    Json,
}

impl SnapshotFormat {
    pub fn extension(self) -> &'static str {
        match self {
            SnapshotFormat::Raw => "f64",
            SnapshotFormat::Bincode => "bin",
            SnapshotFormat::MessagePack => "msgpack",
            SnapshotFormat::Json => "json",
        }
    }
}

// Periodic dose schedule, expanded into a time-indexed signal
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TreatmentConfig {
    pub length: usize,
    pub first_dose: usize,
    pub dose_period: usize,
    pub dose: f64,
}

impl TreatmentConfig {
    /// Dose per simulated hour: `dose` at `first_dose, first_dose + dose_period, ...`, zero elsewhere.
    pub fn signal(&self) -> Vec<f64> {
        let mut signal = vec![0.0; self.length];
        if self.dose_period == 0 {
            if self.first_dose < self.length {
                signal[self.first_dose] = self.dose;
            }
            return signal;
        }
        for hour in (self.first_dose..self.length).step_by(self.dose_period) {
            signal[hour] = self.dose;
        }
        signal
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ExecutionConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Regenerate only incomplete samples instead of running a full generation.
    #[serde(default)]
    pub resume: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            workers: default_workers(),
            resume: false,
        }
    }
}

/// Differences to sweep, either listed or as an inclusive linspace.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum DifferenceGrid {
    List(Vec<f64>),
    Linspace { start: f64, stop: f64, count: usize },
}

impl DifferenceGrid {
    pub fn values(&self) -> Vec<f64> {
        match self {
            DifferenceGrid::List(values) => values.clone(),
            DifferenceGrid::Linspace { start, stop, count } => match count {
                0 => Vec::new(),
                1 => vec![*start],
                n => {
                    let step = (stop - start) / (*n - 1) as f64;
                    (0..*n).map(|i| start + step * i as f64).collect()
                }
            },
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimilaritySweep {
    /// Metric name, e.g. "ssim" or "dice"; resolved by the metric catalog.
    pub metric: String,
    pub parameter: String,
    pub differences: DifferenceGrid,
    pub tolerance: f64,
    #[serde(default)]
    pub timesteps: Option<Vec<u32>>,
    #[serde(default)]
    pub channels: Option<Vec<Channel>>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingMethod {
    Pca,
    Isomap,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EmbeddingJob {
    pub method: EmbeddingMethod,
    /// Also embed the full multi-channel multi-timestep concatenation.
    #[serde(default)]
    pub combined: bool,
    #[serde(default)]
    pub timesteps: Option<Vec<u32>>,
    #[serde(default)]
    pub channels: Option<Vec<Channel>>,
    #[serde(default = "default_neighbors")]
    pub neighbors: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MutualInformationJob {
    pub parameter: String,
    #[serde(default)]
    pub normalized: bool,
    #[serde(default)]
    pub timesteps: Option<Vec<u32>>,
    #[serde(default)]
    pub channels: Option<Vec<Channel>>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AnalysisConfig {
    pub output_dir: PathBuf,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Index pairs drawn (with replacement) per similarity evaluation.
    #[serde(default = "default_pair_draws")]
    pub pair_draws: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub similarity: Vec<SimilaritySweep>,
    #[serde(default)]
    pub embeddings: Vec<EmbeddingJob>,
    #[serde(default)]
    pub mutual_information: Vec<MutualInformationJob>,
}

// Main configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DatasetConfig {
    pub dataset: DatasetSection,
    #[serde(default)]
    pub treatment: Option<TreatmentConfig>,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub analysis: Option<AnalysisConfig>,
}

impl DatasetConfig {
    /// Loads the dataset configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config: DatasetConfig = toml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML from '{}': {}", path_ref.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.dataset;
        if d.width == 0 || d.height == 0 {
            anyhow::bail!("width and height must be positive.");
        }
        if d.n_draws == 0 {
            anyhow::bail!("n_draws must be greater than 0.");
        }
        if d.interval == 0 {
            anyhow::bail!("interval must be greater than 0.");
        }
        if d.n_samples == 0 {
            anyhow::bail!("n_samples must be greater than 0.");
        }
        if self.execution.workers == 0 {
            anyhow::bail!("execution.workers must be greater than 0.");
        }
        if let Some(analysis) = &self.analysis {
            if analysis.workers == 0 || analysis.pair_draws == 0 {
                anyhow::bail!("analysis.workers and analysis.pair_draws must be greater than 0.");
            }
            for sweep in &analysis.similarity {
                if sweep.tolerance < 0.0 {
                    anyhow::bail!("tolerance for '{}' must be non-negative.", sweep.parameter);
                }
            }
        }
        Ok(())
    }

    pub fn schedule(&self) -> DrawSchedule {
        DrawSchedule {
            start: self.dataset.start_draw,
            interval: self.dataset.interval,
            n_draws: self.dataset.n_draws,
        }
    }

    /// Canonical folder name of the configured dataset.
    pub fn folder_name(&self) -> String {
        dataset_folder_name(
            &self.dataset.name,
            &self.schedule(),
            self.dataset.width,
            self.dataset.height,
        )
    }

    pub fn dataset_dir(&self) -> PathBuf {
        self.dataset.root.join(self.folder_name())
    }

    pub fn treatment_signal(&self) -> Option<Vec<f64>> {
        self.treatment.as_ref().map(TreatmentConfig::signal)
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("datasets")
}

fn default_seed() -> u64 {
    2990
}

fn default_workers() -> usize {
    1
}

fn default_pair_draws() -> usize {
    10_000
}

fn default_neighbors() -> usize {
    15
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[dataset]
name = "baseline_treatment_dataset"
width = 64
height = 64
start_draw = 350
interval = 100
n_draws = 8
n_samples = 3200
parameter_ranges = "data/parameter_data.csv"
parameters_of_interest = ["cell_cycle"]

[treatment]
length = 1300
first_dose = 350
dose_period = 24
dose = 2.0

[execution]
workers = 12

[analysis]
output_dir = "analysis/baseline"

[[analysis.similarity]]
metric = "ssim"
parameter = "cell_cycle"
differences = { start = 0.0, stop = 0.432, count = 25 }
tolerance = 0.002
channels = ["oxygen", "glucose"]
"#;

    #[test]
    fn test_parse_config() {
        let config: DatasetConfig = toml::from_str(CONFIG).unwrap();
        config.validate().unwrap();
        assert_eq!(config.dataset.format, SnapshotFormat::Raw);
        assert_eq!(config.dataset.seed, 2990);
        assert_eq!(
            config.dataset_dir(),
            PathBuf::from("datasets/baseline_treatment_dataset_start=350_interval=100_ndraw=8_size=(64,64)")
        );
        let analysis = config.analysis.unwrap();
        assert_eq!(analysis.pair_draws, 10_000);
        let sweep = &analysis.similarity[0];
        assert_eq!(sweep.channels.as_deref(), Some(&[Channel::Oxygen, Channel::Glucose][..]));
        let diffs = sweep.differences.values();
        assert_eq!(diffs.len(), 25);
        assert_eq!(diffs[0], 0.0);
        assert!((diffs[24] - 0.432).abs() < 1e-12);
    }

    #[test]
    fn test_treatment_signal() {
        let treatment = TreatmentConfig { length: 400, first_dose: 350, dose_period: 24, dose: 2.0 };
        let signal = treatment.signal();
        assert_eq!(signal.len(), 400);
        assert_eq!(signal[350], 2.0);
        assert_eq!(signal[374], 2.0);
        assert_eq!(signal[398], 2.0);
        assert_eq!(signal.iter().filter(|&&d| d > 0.0).count(), 3);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, CONFIG).unwrap();
        let config = DatasetConfig::load(&path).unwrap();
        assert_eq!(config.execution.workers, 12);
        assert_eq!(config.treatment_signal().map(|s| s.len()), Some(1300));

        std::fs::write(&path, CONFIG.replace("n_samples = 3200", "n_samples = 0")).unwrap();
        assert!(DatasetConfig::load(&path).is_err());
        assert!(DatasetConfig::load(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_validation_rejects_zero_draws() {
        let mut config: DatasetConfig = toml::from_str(CONFIG).unwrap();
        config.dataset.n_draws = 0;
        assert!(config.validate().is_err());
    }
}
