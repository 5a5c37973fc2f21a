//! Analysis of a generated dataset: embeddings, per-pixel mutual information and pairwise
//! similarity sweeps, each persisted under its own subfolder of the output directory.

use anyhow::{Context, Result};
use dataset_common::{
    AnalysisConfig, Channel, DatasetConfig, DrawSchedule, EmbeddingMethod, Grid, ParameterTable, SnapshotKey,
};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

use crate::information::{normalize_by_entropy, per_pixel_mutual_information};
use crate::metrics::Metric;
use crate::pairs::draw_pairs;
use crate::reduction::{isomap, pca, Embedding};
use crate::similarity::{SimilarityEngine, SimilarityKey, SimilarityOutcome};
use crate::storage::{write_grid, DatasetStore};

/// Which flattened data an embedding is fitted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Single { timestep: u32, channel: Channel },
    /// Every channel at every timestep, channel-major.
    Combined,
}

/// Counts of what a batch of configured jobs produced.
#[derive(Debug, Default)]
pub struct AnalysisSummary {
    pub artifacts: Vec<PathBuf>,
    pub scalar_results: usize,
    pub failures: Vec<String>,
}

pub struct DatasetAnalysis {
    store: DatasetStore,
    table: ParameterTable,
    schedule: DrawSchedule,
    output_dir: PathBuf,
    workers: usize,
    seed: u64,
}

impl DatasetAnalysis {
    pub fn new(store: DatasetStore, schedule: DrawSchedule, output_dir: &Path, workers: usize, seed: u64) -> Result<Self> {
        let table = store.read_parameter_table()?;
        Ok(Self {
            store,
            table,
            schedule,
            output_dir: output_dir.to_path_buf(),
            workers: workers.max(1),
            seed,
        })
    }

    /// Opens the dataset named by `config` (its canonical folder) for the given analysis settings.
    pub fn open(config: &DatasetConfig, analysis: &AnalysisConfig) -> Result<Self> {
        let store = DatasetStore::open(config.dataset_dir(), config.dataset.format)?;
        Self::new(store, config.schedule(), &analysis.output_dir, analysis.workers, analysis.seed)
    }

    pub fn table(&self) -> &ParameterTable {
        &self.table
    }

    pub fn n_samples(&self) -> usize {
        self.table.len()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn check_timestep(&self, timestep: u32) -> Result<()> {
        if !self.schedule.contains(timestep) {
            anyhow::bail!("t={} is not a draw time of this dataset", timestep);
        }
        Ok(())
    }

    pub fn snapshot(&self, sample: usize, timestep: u32, channel: Channel) -> Result<Grid> {
        self.store.read_snapshot(&SnapshotKey::new(sample, channel, timestep))
    }

    /// Every channel at every draw time of one sample, flattened channel-major.
    pub fn concatenated(&self, sample: usize) -> Result<Vec<f64>> {
        let mut data = Vec::new();
        for channel in Channel::ALL {
            for timestep in self.schedule.timesteps() {
                data.extend_from_slice(self.snapshot(sample, timestep, channel)?.as_slice());
            }
        }
        Ok(data)
    }

    pub fn distinct_values(&self, parameter: &str) -> Result<Vec<f64>> {
        Ok(self.table.distinct_values(parameter)?)
    }

    pub fn indices_with_value(&self, parameter: &str, value: f64) -> Result<Vec<usize>> {
        Ok(self.table.indices_with_value(parameter, value)?)
    }

    fn grids(&self, timestep: u32, channel: Channel) -> Result<Vec<Grid>> {
        (0..self.n_samples())
            .into_par_iter()
            .map(|s| self.snapshot(s, timestep, channel))
            .collect()
    }

    fn selected_rows(&self, selection: Selection) -> Result<Vec<Vec<f64>>> {
        match selection {
            Selection::Single { timestep, channel } => {
                self.check_timestep(timestep)?;
                Ok(self.grids(timestep, channel)?.into_iter().map(Grid::into_vec).collect())
            }
            Selection::Combined => (0..self.n_samples())
                .into_par_iter()
                .map(|s| self.concatenated(s))
                .collect(),
        }
    }

    fn write_artifact(&self, folder: &str, stem: &str, grid: &Grid) -> Result<PathBuf> {
        let dir = self.output_dir.join(folder);
        fs::create_dir_all(&dir).with_context(|| format!("Error creating '{}'", dir.display()))?;
        let format = self.store.format();
        let path = dir.join(format!("{}.{}", stem, format.extension()));
        write_grid(&path, format, grid)?;
        Ok(path)
    }

    /// Fits `method` on the selection and persists the `n_samples x 2` embedding.
    pub fn embedding(&self, method: EmbeddingMethod, selection: Selection, neighbors: usize) -> Result<(Embedding, PathBuf)> {
        let rows = self.selected_rows(selection)?;
        let embedding = match method {
            EmbeddingMethod::Pca => pca(&rows)?,
            EmbeddingMethod::Isomap => isomap(&rows, neighbors)?,
        };

        let (folder, stem) = match (method, selection) {
            (EmbeddingMethod::Pca, Selection::Single { timestep, channel }) => (
                "pca",
                format!("pca_{}_{}_vr={:.2}", channel, timestep, embedding.explained_variance_ratio.unwrap_or(0.0)),
            ),
            (EmbeddingMethod::Pca, Selection::Combined) => (
                "pca",
                format!("pca_combined_vr={:.4}", embedding.explained_variance_ratio.unwrap_or(0.0)),
            ),
            (EmbeddingMethod::Isomap, Selection::Single { timestep, channel }) => {
                ("isomap", format!("isomap_{}_{}", channel, timestep))
            }
            (EmbeddingMethod::Isomap, Selection::Combined) => ("isomap", "isomap_combined".to_string()),
        };

        let data = embedding.coordinates.iter().flat_map(|p| p.iter().copied()).collect();
        let grid = Grid::new(embedding.coordinates.len(), 2, data)?;
        let path = self.write_artifact(folder, &stem, &grid)?;
        info!("Embedding saved to {}", path.display());
        Ok((embedding, path))
    }

    fn compute_mutual_information(&self, timestep: u32, channel: Channel, parameter: &str) -> Result<(Grid, Vec<f64>)> {
        self.check_timestep(timestep)?;
        let target = self.table.column(parameter)?;
        let grids = self.grids(timestep, channel)?;
        let mi = per_pixel_mutual_information(&grids, &target, channel.is_categorical(), self.seed)?;
        Ok((mi, target))
    }

    /// Per-pixel mutual information between `channel` at `timestep` and `parameter`.
    pub fn mutual_information(&self, timestep: u32, channel: Channel, parameter: &str) -> Result<(Grid, PathBuf)> {
        let (mi, _) = self.compute_mutual_information(timestep, channel, parameter)?;
        let path = self.write_artifact("mi", &format!("mi_{}_{}_{}", timestep, channel, parameter), &mi)?;
        info!("Mutual information saved to {}", path.display());
        Ok((mi, path))
    }

    /// As [`Self::mutual_information`], divided by the parameter's histogram entropy.
    pub fn normalized_mutual_information(
        &self,
        timestep: u32,
        channel: Channel,
        parameter: &str,
    ) -> Result<(Grid, PathBuf)> {
        let (mi, target) = self.compute_mutual_information(timestep, channel, parameter)?;
        let normalized = normalize_by_entropy(&mi, &target, parameter)?;
        let path = self.write_artifact(
            "normalized_mi",
            &format!("normalized_mi_{}_{}_{}", timestep, channel, parameter),
            &normalized,
        )?;
        info!("Normalized mutual information saved to {}", path.display());
        Ok((normalized, path))
    }

    /// Samples `draws` index pairs whose `parameter` differs by about `difference` and
    /// evaluates `metric` over them.
    #[allow(clippy::too_many_arguments)]
    pub fn similarity(
        &self,
        engine: &SimilarityEngine<'_>,
        metric: Metric,
        timestep: u32,
        channel: Channel,
        parameter: &str,
        difference: f64,
        tolerance: f64,
        draws: usize,
        rng: &mut StdRng,
    ) -> Result<SimilarityOutcome> {
        self.check_timestep(timestep)?;
        let pairs = draw_pairs(&self.table, parameter, difference, tolerance, draws, rng)?;
        let key = SimilarityKey::new(metric, timestep, channel, parameter, difference);
        engine.run(&key, metric, &pairs)
    }

    pub fn similarity_engine(&self) -> Result<SimilarityEngine<'_>> {
        SimilarityEngine::new(&self.store, &self.output_dir, self.workers)
    }

    /// Runs every job of `analysis`. A failing job is logged and recorded; the rest still run.
    pub fn run_jobs(&self, analysis: &AnalysisConfig) -> Result<AnalysisSummary> {
        let mut summary = AnalysisSummary::default();
        let all_timesteps: Vec<u32> = self.schedule.timesteps().collect();
        let pick_timesteps = |filter: &Option<Vec<u32>>| filter.clone().unwrap_or_else(|| all_timesteps.clone());
        let pick_channels = |filter: &Option<Vec<Channel>>| filter.clone().unwrap_or_else(|| Channel::ALL.to_vec());
        let record = |summary: &mut AnalysisSummary, what: String, outcome: Result<Option<PathBuf>>| match outcome {
            Ok(Some(path)) => summary.artifacts.push(path),
            Ok(None) => summary.scalar_results += 1,
            Err(e) => {
                warn!("{} failed: {:#}", what, e);
                summary.failures.push(format!("{}: {:#}", what, e));
            }
        };

        for job in &analysis.embeddings {
            if job.combined {
                let outcome = self.embedding(job.method, Selection::Combined, job.neighbors);
                record(&mut summary, format!("{:?} combined", job.method), outcome.map(|(_, p)| Some(p)));
                continue;
            }
            for &timestep in &pick_timesteps(&job.timesteps) {
                for &channel in &pick_channels(&job.channels) {
                    let outcome = self.embedding(job.method, Selection::Single { timestep, channel }, job.neighbors);
                    let what = format!("{:?} {} t={}", job.method, channel, timestep);
                    record(&mut summary, what, outcome.map(|(_, p)| Some(p)));
                }
            }
        }

        for job in &analysis.mutual_information {
            for &timestep in &pick_timesteps(&job.timesteps) {
                for &channel in &pick_channels(&job.channels) {
                    let outcome = if job.normalized {
                        self.normalized_mutual_information(timestep, channel, &job.parameter)
                    } else {
                        self.mutual_information(timestep, channel, &job.parameter)
                    };
                    let what = format!("MI {} {} t={}", job.parameter, channel, timestep);
                    record(&mut summary, what, outcome.map(|(_, p)| Some(p)));
                }
            }
        }

        if !analysis.similarity.is_empty() {
            let engine = self.similarity_engine()?;
            let mut rng = StdRng::seed_from_u64(self.seed);
            for sweep in &analysis.similarity {
                let metric: Metric = sweep
                    .metric
                    .parse()
                    .with_context(|| format!("Invalid similarity sweep over '{}'", sweep.parameter))?;
                for &timestep in &pick_timesteps(&sweep.timesteps) {
                    for &channel in &pick_channels(&sweep.channels) {
                        for difference in sweep.differences.values() {
                            let outcome = self.similarity(
                                &engine,
                                metric,
                                timestep,
                                channel,
                                &sweep.parameter,
                                difference,
                                sweep.tolerance,
                                analysis.pair_draws,
                                &mut rng,
                            );
                            let what = format!(
                                "{} {} {} t={} d={}",
                                metric, sweep.parameter, channel, timestep, difference
                            );
                            let outcome = outcome.map(|o| match o {
                                SimilarityOutcome::Matrix { mean_path, .. } => Some(mean_path),
                                SimilarityOutcome::Scalar { .. } => None,
                            });
                            record(&mut summary, what, outcome);
                        }
                    }
                }
            }
        }

        info!(
            "Analysis finished: {} artifacts, {} scalar results, {} failures.",
            summary.artifacts.len(),
            summary.scalar_results,
            summary.failures.len()
        );
        Ok(summary)
    }
}
