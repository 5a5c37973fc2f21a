//! Batch evaluation of one metric over sampled index pairs, aggregation, and persistence.

use anyhow::{Context, Result};
use dataset_common::{Channel, DatasetError, Grid, SnapshotKey};
use indexmap::IndexMap;
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use crate::metrics::{Metric, MetricValue};
use crate::storage::{write_grid, DatasetStore};

/// Subfolder of the analysis output holding similarity artifacts.
pub const SIMILARITY_DIR: &str = "similarity_between_matrix";
pub const SCALAR_TABLE_FILE: &str = "scalar_similarity.csv";

/// Difference as written in keys and file names; always carries a decimal point.
pub fn format_difference(difference: f64) -> String {
    format!("{:?}", difference)
}

/// Composite key of one similarity result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityKey {
    pub metric: String,
    pub timestep: u32,
    pub channel: Channel,
    pub parameter: String,
    pub difference: f64,
}

impl SimilarityKey {
    pub fn new(metric: Metric, timestep: u32, channel: Channel, parameter: &str, difference: f64) -> Self {
        Self {
            metric: metric.label().to_string(),
            timestep,
            channel,
            parameter: parameter.to_string(),
            difference,
        }
    }

    /// `{metric}_{timestep}_{channel}_{parameter}_{difference}`
    pub fn artifact_stem(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            self.metric,
            self.timestep,
            self.channel,
            self.parameter,
            format_difference(self.difference)
        )
    }
}

// Differences compare bitwise so keys stay usable in hashed maps.
impl PartialEq for SimilarityKey {
    fn eq(&self, other: &Self) -> bool {
        self.metric == other.metric
            && self.timestep == other.timestep
            && self.channel == other.channel
            && self.parameter == other.parameter
            && self.difference.to_bits() == other.difference.to_bits()
    }
}

impl Eq for SimilarityKey {}

impl Hash for SimilarityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.metric.hash(state);
        self.timestep.hash(state);
        self.channel.hash(state);
        self.parameter.hash(state);
        self.difference.to_bits().hash(state);
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ScalarRecord {
    metric: String,
    timestep: u32,
    channel: Channel,
    parameter: String,
    difference: f64,
    mean: f64,
    std: f64,
}

/// The shared scalar result table, keyed and kept in first-insertion order.
#[derive(Debug, Default)]
pub struct ScalarSimilarityTable {
    rows: IndexMap<SimilarityKey, (f64, f64)>,
}

impl ScalarSimilarityTable {
    /// Reads `path`; a missing file is an empty table. Duplicate keys in the file keep the last row.
    pub fn load(path: &Path) -> Result<Self> {
        let mut table = Self::default();
        if !path.exists() {
            return Ok(table);
        }
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Error opening scalar similarity table '{}'", path.display()))?;
        for record in reader.deserialize::<ScalarRecord>() {
            let r = record.with_context(|| format!("Error parsing '{}'", path.display()))?;
            let key = SimilarityKey {
                metric: r.metric,
                timestep: r.timestep,
                channel: r.channel,
                parameter: r.parameter,
                difference: r.difference,
            };
            table.upsert(key, r.mean, r.std);
        }
        Ok(table)
    }

    /// Inserts or replaces in place. Returns the previous `(mean, std)` for an existing key.
    pub fn upsert(&mut self, key: SimilarityKey, mean: f64, std: f64) -> Option<(f64, f64)> {
        self.rows.insert(key, (mean, std))
    }

    pub fn get(&self, key: &SimilarityKey) -> Option<(f64, f64)> {
        self.rows.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SimilarityKey, (f64, f64))> {
        self.rows.iter().map(|(k, &v)| (k, v))
    }

    /// Rewrites `path` through a temporary file and a rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);
        {
            let file = File::create(&tmp).with_context(|| format!("Error creating '{}'", tmp.display()))?;
            let mut writer = csv::Writer::from_writer(file);
            for (key, (mean, std)) in self.iter() {
                writer.serialize(ScalarRecord {
                    metric: key.metric.clone(),
                    timestep: key.timestep,
                    channel: key.channel,
                    parameter: key.parameter.clone(),
                    difference: key.difference,
                    mean,
                    std,
                })?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, path).with_context(|| format!("Error moving '{}' into place", path.display()))?;
        Ok(())
    }
}

/// Mean and population standard deviation of the finite results.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate {
    Scalar { mean: f64, std: f64, used: usize },
    Matrix { mean: Grid, std: Grid, used: usize },
}

/// Drops non-finite results, then aggregates. All results must share one shape.
pub fn aggregate(values: Vec<MetricValue>) -> dataset_common::Result<Aggregate> {
    let count = values.len();
    let finite: Vec<MetricValue> = values.into_iter().filter(MetricValue::is_finite).collect();
    let used = finite.len();
    if used == 0 {
        return Err(DatasetError::NoFiniteResults { count });
    }
    let n = used as f64;

    match &finite[0] {
        MetricValue::Scalar(_) => {
            let scalars = finite
                .iter()
                .map(|v| v.as_scalar().ok_or(DatasetError::InconsistentResultShapes))
                .collect::<dataset_common::Result<Vec<f64>>>()?;
            let mean = scalars.iter().sum::<f64>() / n;
            let var = scalars.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            Ok(Aggregate::Scalar { mean, std: var.sqrt(), used })
        }
        MetricValue::Map(first) => {
            let (rows, cols) = first.shape();
            let grids = finite
                .iter()
                .map(|value| match value {
                    MetricValue::Map(grid) => first.check_same_shape(grid).map(|_| grid),
                    MetricValue::Scalar(_) => Err(DatasetError::InconsistentResultShapes),
                })
                .collect::<dataset_common::Result<Vec<&Grid>>>()?;

            let mut mean = vec![0.0; rows * cols];
            for grid in &grids {
                for (m, &v) in mean.iter_mut().zip(grid.as_slice()) {
                    *m += v;
                }
            }
            mean.iter_mut().for_each(|m| *m /= n);

            let mut var = vec![0.0; rows * cols];
            for grid in &grids {
                for ((acc, &v), m) in var.iter_mut().zip(grid.as_slice()).zip(&mean) {
                    *acc += (v - m).powi(2);
                }
            }
            let std: Vec<f64> = var.iter().map(|acc| (acc / n).sqrt()).collect();
            Ok(Aggregate::Matrix {
                mean: Grid::new(rows, cols, mean)?,
                std: Grid::new(rows, cols, std)?,
                used,
            })
        }
    }
}

/// Where one similarity result ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum SimilarityOutcome {
    Matrix { mean_path: PathBuf, std_path: PathBuf, used: usize },
    Scalar { mean: f64, std: f64, used: usize },
}

/// Evaluates metrics over index pairs on a fixed-size pool and persists the aggregates.
pub struct SimilarityEngine<'a> {
    store: &'a DatasetStore,
    output_dir: PathBuf,
    pool: rayon::ThreadPool,
}

impl<'a> SimilarityEngine<'a> {
    pub fn new(store: &'a DatasetStore, output_dir: &Path, workers: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()
            .context("Error building similarity worker pool")?;
        Ok(Self {
            store,
            output_dir: output_dir.join(SIMILARITY_DIR),
            pool,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn scalar_table_path(&self) -> PathBuf {
        self.output_dir.join(SCALAR_TABLE_FILE)
    }

    /// Metric value for every pair, in input order. Each involved snapshot is read once.
    pub fn evaluate(
        &self,
        metric: Metric,
        timestep: u32,
        channel: Channel,
        pairs: &[(usize, usize)],
    ) -> Result<Vec<MetricValue>> {
        let samples: Vec<usize> = pairs
            .iter()
            .flat_map(|&(i, j)| [i, j])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        self.pool.install(|| {
            let grids: HashMap<usize, Grid> = samples
                .par_iter()
                .map(|&s| {
                    let grid = self.store.read_snapshot(&SnapshotKey::new(s, channel, timestep))?;
                    Ok((s, grid))
                })
                .collect::<Result<_>>()?;
            debug!("Loaded {} snapshots of {} at t={}", grids.len(), channel, timestep);

            pairs
                .par_iter()
                .map(|(i, j)| {
                    let value = metric.evaluate(&grids[i], &grids[j])?;
                    Ok(value)
                })
                .collect()
        })
    }

    /// Evaluates, aggregates and persists one key. Matrix results become two grid files,
    /// scalar results are upserted into the shared table.
    pub fn run(&self, key: &SimilarityKey, metric: Metric, pairs: &[(usize, usize)]) -> Result<SimilarityOutcome> {
        let values = self.evaluate(metric, key.timestep, key.channel, pairs)?;
        let aggregate = aggregate(values).with_context(|| format!("Error aggregating {}", key.artifact_stem()))?;
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Error creating '{}'", self.output_dir.display()))?;

        match aggregate {
            Aggregate::Matrix { mean, std, used } => {
                let format = self.store.format();
                let stem = key.artifact_stem();
                let mean_path = self.output_dir.join(format!("mean_{}.{}", stem, format.extension()));
                let std_path = self.output_dir.join(format!("std_{}.{}", stem, format.extension()));
                write_grid(&mean_path, format, &mean)?;
                write_grid(&std_path, format, &std)?;
                info!("{}: {}/{} finite results, saved to {}", stem, used, pairs.len(), mean_path.display());
                Ok(SimilarityOutcome::Matrix { mean_path, std_path, used })
            }
            Aggregate::Scalar { mean, std, used } => {
                let path = self.scalar_table_path();
                let mut table = ScalarSimilarityTable::load(&path)?;
                if table.upsert(key.clone(), mean, std).is_some() {
                    debug!("Replaced existing row for {}", key.artifact_stem());
                }
                table.save(&path)?;
                info!(
                    "{}: mean {:.6}, std {:.6} over {}/{} finite results",
                    key.artifact_stem(),
                    mean,
                    std,
                    used,
                    pairs.len()
                );
                Ok(SimilarityOutcome::Scalar { mean, std, used })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use dataset_common::SnapshotFormat;
    use tempfile::tempdir;

    fn key(difference: f64) -> SimilarityKey {
        SimilarityKey::new(Metric::Ssim, 350, Channel::Oxygen, "cell_cycle", difference)
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SCALAR_TABLE_FILE);

        let mut table = ScalarSimilarityTable::load(&path).unwrap();
        assert!(table.is_empty());
        table.upsert(key(0.1), 0.9, 0.01);
        table.upsert(key(0.2), 0.8, 0.02);
        table.save(&path).unwrap();

        let mut table = ScalarSimilarityTable::load(&path).unwrap();
        assert_eq!(table.upsert(key(0.1), 0.5, 0.05), Some((0.9, 0.01)));
        table.save(&path).unwrap();

        let table = ScalarSimilarityTable::load(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&key(0.1)), Some((0.5, 0.05)));
        let order: Vec<f64> = table.iter().map(|(k, _)| k.difference).collect();
        assert_eq!(order, vec![0.1, 0.2]);

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("metric,timestep,channel,parameter,difference,mean,std\n"));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_aggregate_filters_non_finite() {
        let values = vec![
            MetricValue::Scalar(1.0),
            MetricValue::Scalar(f64::NAN),
            MetricValue::Scalar(3.0),
        ];
        match aggregate(values).unwrap() {
            Aggregate::Scalar { mean, std, used } => {
                assert_eq!(used, 2);
                assert_relative_eq!(mean, 2.0);
                assert_relative_eq!(std, 1.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_aggregate_all_invalid_fails() {
        let err = aggregate(vec![MetricValue::Scalar(f64::NAN), MetricValue::Scalar(f64::INFINITY)]).unwrap_err();
        assert!(matches!(err, DatasetError::NoFiniteResults { count: 2 }));
    }

    #[test]
    fn test_aggregate_maps_elementwise() {
        let values = vec![
            MetricValue::Map(Grid::filled(2, 2, 1.0)),
            MetricValue::Map(Grid::filled(2, 2, 3.0)),
        ];
        let Aggregate::Matrix { mean, std, used } = aggregate(values).unwrap() else {
            panic!("expected a matrix");
        };
        assert_eq!(used, 2);
        assert_eq!(mean, Grid::filled(2, 2, 2.0));
        assert_eq!(std, Grid::filled(2, 2, 1.0));
    }

    #[test]
    fn test_aggregate_map_std_survives_large_offsets() {
        let values = vec![
            MetricValue::Map(Grid::filled(1, 1, 1e8)),
            MetricValue::Map(Grid::filled(1, 1, 1e8 + 1.0)),
        ];
        let Aggregate::Matrix { mean, std, .. } = aggregate(values).unwrap() else {
            panic!("expected a matrix");
        };
        assert_relative_eq!(mean.as_slice()[0], 1e8 + 0.5);
        assert_relative_eq!(std.as_slice()[0], 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_aggregate_mixed_shapes_fails() {
        let values = vec![MetricValue::Scalar(1.0), MetricValue::Map(Grid::zeros(1, 1))];
        assert!(matches!(aggregate(values), Err(DatasetError::InconsistentResultShapes)));
    }

    #[test]
    fn test_run_persists_matrix_and_scalar() {
        let dir = tempdir().unwrap();
        let store = DatasetStore::create(dir.path().join("data"), SnapshotFormat::Raw).unwrap();
        for s in 0..3 {
            let grid = Grid::from_fn(8, 8, |r, c| (r * 8 + c) as f64 * (s + 1) as f64);
            store.write_snapshot(&SnapshotKey::new(s, Channel::Oxygen, 350), &grid).unwrap();
        }
        let engine = SimilarityEngine::new(&store, &dir.path().join("analysis"), 2).unwrap();
        let pairs = vec![(0, 1), (1, 2), (0, 1)];

        let diff_key = SimilarityKey::new(Metric::AbsoluteDifference, 350, Channel::Oxygen, "p", 0.5);
        let outcome = engine.run(&diff_key, Metric::AbsoluteDifference, &pairs).unwrap();
        let SimilarityOutcome::Matrix { mean_path, std_path, used } = outcome else {
            panic!("expected a matrix outcome");
        };
        assert_eq!(used, 3);
        assert!(mean_path.ends_with("mean_image absolute difference_350_oxygen_p_0.5.f64"));
        assert!(std_path.exists());

        let corr_key = SimilarityKey::new(Metric::Correlation, 350, Channel::Oxygen, "p", 0.5);
        let outcome = engine.run(&corr_key, Metric::Correlation, &pairs).unwrap();
        let SimilarityOutcome::Scalar { mean, .. } = outcome else {
            panic!("expected a scalar outcome");
        };
        assert_relative_eq!(mean, 1.0, epsilon = 1e-12);
        engine.run(&corr_key, Metric::Correlation, &pairs).unwrap();
        let table = ScalarSimilarityTable::load(&engine.scalar_table_path()).unwrap();
        assert_eq!(table.len(), 1);
    }
}
