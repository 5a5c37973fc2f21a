//! Full dataset generation and the resumption pass that regenerates incomplete samples.
//!
//! Every sample is an independent unit of work: [`generate_unit`] receives an immutable
//! [`GenerationContext`] plus a sample index, reads that sample's row from the shared
//! parameter table, and writes only that sample's snapshot files. A unit that fails leaves
//! the sample short of files, so the next call to [`DatasetOrchestrator::missing_samples`]
//! reports it again.

use anyhow::{Context, Result};
use dataset_common::{DatasetConfig, ParameterRanges, ParameterTable, SnapshotKey};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::generator::SampleGenerator;
use crate::progress::progress_bar;
use crate::sampler::ParameterSampler;
use crate::simulation::SimulationFactory;
use crate::storage::DatasetStore;

/// Simulation seed of one sample: a SplitMix64 mix of the dataset seed and the index.
/// Independent of worker scheduling, so a regenerated sample matches its first run.
pub fn sample_seed(dataset_seed: u64, sample: usize) -> u64 {
    let mut z = dataset_seed ^ (sample as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Everything a generation unit reads. Shared by reference across the pool, never mutated.
pub struct GenerationContext<'a, F> {
    pub store: &'a DatasetStore,
    pub table: &'a ParameterTable,
    pub generator: &'a SampleGenerator,
    pub factory: &'a F,
    pub seed: u64,
}

/// Generates and persists every snapshot of `sample`. Returns the number of files written.
pub fn generate_unit<F: SimulationFactory>(ctx: &GenerationContext<'_, F>, sample: usize) -> Result<usize> {
    let row = ctx
        .table
        .row(sample)
        .with_context(|| format!("Sample {} is not in the parameter table", sample))?;
    let snapshots = ctx.generator.generate(ctx.factory, row, sample_seed(ctx.seed, sample))?;

    let mut written = 0;
    for (timestep, channels) in snapshots {
        for (channel, grid) in channels {
            ctx.store.write_snapshot(&SnapshotKey::new(sample, channel, timestep), &grid)?;
            written += 1;
        }
    }
    Ok(written)
}

/// Outcome of one generation batch.
#[derive(Debug, Default)]
pub struct GenerationReport {
    pub requested: usize,
    pub completed: Vec<usize>,
    pub failures: Vec<(usize, String)>,
    pub files_written: usize,
    pub elapsed: Duration,
}

impl GenerationReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.completed.len() == self.requested
    }
}

pub struct DatasetOrchestrator<F> {
    store: DatasetStore,
    sampler: ParameterSampler,
    generator: SampleGenerator,
    factory: F,
    n_samples: usize,
    workers: usize,
    seed: u64,
}

impl<F: SimulationFactory> DatasetOrchestrator<F> {
    pub fn new(
        store: DatasetStore,
        sampler: ParameterSampler,
        generator: SampleGenerator,
        factory: F,
        n_samples: usize,
        workers: usize,
        seed: u64,
    ) -> Self {
        Self {
            store,
            sampler,
            generator,
            factory,
            n_samples,
            workers: workers.max(1),
            seed,
        }
    }

    /// Wires the orchestrator from a loaded configuration, creating the dataset directory.
    pub fn from_config(config: &DatasetConfig, factory: F) -> Result<Self> {
        let d = &config.dataset;
        let ranges = ParameterRanges::load(&d.parameter_ranges)
            .with_context(|| format!("Error loading parameter ranges '{}'", d.parameter_ranges.display()))?;
        let sampler = ParameterSampler::new(ranges, &d.parameters_of_interest)?;
        let store = DatasetStore::create(config.dataset_dir(), d.format)?;
        let generator = SampleGenerator::new(d.width, d.height, config.schedule(), config.treatment_signal());
        Ok(Self::new(
            store,
            sampler,
            generator,
            factory,
            d.n_samples,
            config.execution.workers,
            d.seed,
        ))
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    /// Samples the parameter table, persists it, then generates every sample.
    /// Fails without touching anything if the dataset already has a parameter table.
    pub fn generate(&self) -> Result<GenerationReport> {
        if self.store.parameter_table_path().exists() {
            return Err(dataset_common::DatasetError::ParameterTableExists(
                self.store.parameter_table_path().display().to_string(),
            )
            .into());
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let table = self.sampler.sample(self.n_samples, &mut rng)?;
        self.store.write_parameter_table(&table)?;
        info!(
            "Parameter table with {} samples x {} parameters written to {}",
            table.len(),
            table.names().len(),
            self.store.parameter_table_path().display()
        );

        let samples: Vec<usize> = (0..table.len()).collect();
        self.run_units(&table, &samples)
    }

    /// Sample indices whose snapshot count differs from `n_draws x channels`.
    /// Only files matching the naming template and the draw schedule are counted.
    pub fn missing_samples(&self) -> Result<Vec<usize>> {
        let table = self.store.read_parameter_table()?;
        self.missing_in(&table)
    }

    fn missing_in(&self, table: &ParameterTable) -> Result<Vec<usize>> {
        let schedule = self.generator.schedule();
        let expected = schedule.snapshots_per_sample();

        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        let mut foreign = 0;
        for key in self.store.scan_snapshots()? {
            if key.sample < table.len() && schedule.contains(key.timestep) {
                *counts.entry(key.sample).or_insert(0) += 1;
            } else {
                foreign += 1;
            }
        }
        if foreign > 0 {
            warn!("Ignored {} snapshot files outside the sample range or draw schedule", foreign);
        }

        Ok((0..table.len())
            .filter(|i| counts.get(i).copied().unwrap_or(0) != expected)
            .collect())
    }

    /// Regenerates exactly the incomplete samples, leaving complete ones untouched.
    pub fn generate_missing(&self) -> Result<GenerationReport> {
        let table = self.store.read_parameter_table()?;
        let missing = self.missing_in(&table)?;
        if missing.is_empty() {
            info!("All {} samples are complete; nothing to regenerate.", table.len());
            return Ok(GenerationReport::default());
        }
        info!("Regenerating {} incomplete samples: {:?}", missing.len(), missing);
        self.run_units(&table, &missing)
    }

    fn run_units(&self, table: &ParameterTable, samples: &[usize]) -> Result<GenerationReport> {
        let ctx = GenerationContext {
            store: &self.store,
            table,
            generator: &self.generator,
            factory: &self.factory,
            seed: self.seed,
        };
        let start_time = Instant::now();
        let bar = progress_bar(samples.len(), "samples")?;

        let run = |sample: usize| {
            let unit_start = Instant::now();
            let outcome = generate_unit(&ctx, sample);
            match &outcome {
                Ok(files) => debug!(
                    "Sample {} done: {} files in {:.2} s",
                    sample,
                    files,
                    unit_start.elapsed().as_secs_f64()
                ),
                Err(e) => error!("Sample {} failed: {:#}", sample, e),
            }
            bar.inc(1);
            (sample, outcome)
        };

        let outcomes: Vec<(usize, Result<usize>)> = if self.workers == 1 {
            samples.iter().map(|&s| run(s)).collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.workers)
                .build()
                .context("Error building generation worker pool")?;
            pool.install(|| samples.par_iter().map(|&s| run(s)).collect())
        };
        bar.finish_and_clear();

        let mut report = GenerationReport {
            requested: samples.len(),
            ..Default::default()
        };
        for (sample, outcome) in outcomes {
            match outcome {
                Ok(files) => {
                    report.completed.push(sample);
                    report.files_written += files;
                }
                Err(e) => report.failures.push((sample, format!("{:#}", e))),
            }
        }
        report.elapsed = start_time.elapsed();

        info!(
            "Generated {}/{} samples ({} files) with {} workers in {:.3} seconds.",
            report.completed.len(),
            report.requested,
            report.files_written,
            self.workers,
            report.elapsed.as_secs_f64()
        );
        if !report.failures.is_empty() {
            warn!(
                "{} samples failed and remain incomplete; run again with resume enabled.",
                report.failures.len()
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::TissueSimulation;
    use dataset_common::{Channel, DrawSchedule, Grid, ParameterRow, SnapshotFormat};
    use tempfile::tempdir;

    struct Flat(f64);

    impl TissueSimulation for Flat {
        fn advance(&mut self, _: u32) -> Result<()> {
            Ok(())
        }

        fn channel(&self, _: Channel) -> Grid {
            Grid::filled(4, 4, self.0)
        }
    }

    /// Fails for one chosen sample, recognised by its derived seed.
    struct FlakyFactory {
        failing_seed: Option<u64>,
    }

    impl SimulationFactory for FlakyFactory {
        type Simulation = Flat;

        fn build(&self, _: usize, _: usize, params: ParameterRow<'_>, _: Option<&[f64]>, seed: u64) -> Result<Flat> {
            if Some(seed) == self.failing_seed {
                anyhow::bail!("injected failure");
            }
            Ok(Flat(params.require("rate")?))
        }
    }

    fn orchestrator(
        dir: &std::path::Path,
        failing_sample: Option<usize>,
        workers: usize,
    ) -> DatasetOrchestrator<FlakyFactory> {
        let ranges = ParameterRanges::from_reader(
            "Parameter,Type,Default Value,Minimum,Maximum\nrate,float,1.0,0.5,2.0\n".as_bytes(),
        )
        .unwrap();
        let sampler = ParameterSampler::new(ranges, &["rate".to_string()]).unwrap();
        let store = DatasetStore::create(dir, SnapshotFormat::Raw).unwrap();
        let generator = SampleGenerator::new(4, 4, DrawSchedule { start: 0, interval: 5, n_draws: 2 }, None);
        let factory = FlakyFactory {
            failing_seed: failing_sample.map(|s| sample_seed(11, s)),
        };
        DatasetOrchestrator::new(store, sampler, generator, factory, 5, workers, 11)
    }

    #[test]
    fn test_sample_seeds_are_distinct_and_stable() {
        let seeds: Vec<u64> = (0..100).map(|i| sample_seed(2990, i)).collect();
        let mut unique = seeds.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), seeds.len());
        assert_eq!(sample_seed(2990, 7), seeds[7]);
        assert_ne!(sample_seed(1, 7), sample_seed(2, 7));
    }

    #[test]
    fn test_failed_sample_stays_missing_until_resumed() {
        for workers in [1, 2] {
            let dir = tempdir().unwrap();
            let report = orchestrator(dir.path(), Some(3), workers).generate().unwrap();
            assert_eq!(report.failures.len(), 1);
            assert_eq!(report.failures[0].0, 3);
            assert!(!report.is_complete());

            let healthy = orchestrator(dir.path(), None, workers);
            assert_eq!(healthy.missing_samples().unwrap(), vec![3]);

            let resumed = healthy.generate_missing().unwrap();
            assert!(resumed.is_complete());
            assert_eq!(resumed.completed, vec![3]);
            assert_eq!(resumed.files_written, 8);
            assert!(healthy.missing_samples().unwrap().is_empty());
        }
    }

    #[test]
    fn test_partially_written_sample_is_regenerated_whole() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(dir.path(), None, 2);
        assert!(orchestrator.generate().unwrap().is_complete());
        let store = orchestrator.store();

        let key = |channel: usize, timestep: u32| SnapshotKey::new(1, Channel::ALL[channel], timestep);
        for lost in [key(0, 0), key(1, 0), key(2, 5)] {
            std::fs::remove_file(store.snapshot_path(&lost)).unwrap();
        }
        let mut leftover = store.snapshot_path(&key(0, 0)).into_os_string();
        leftover.push(".tmp");
        std::fs::write(&leftover, b"half a grid").unwrap();
        let stale = store.snapshot_path(&key(3, 5));
        std::fs::write(&stale, b"junk").unwrap();

        assert_eq!(orchestrator.missing_samples().unwrap(), vec![1]);
        let report = orchestrator.generate_missing().unwrap();
        assert_eq!(report.completed, vec![1]);
        assert_eq!(report.files_written, 8);

        let counts = store.snapshot_counts().unwrap();
        assert!((0..5).all(|sample| counts.get(&sample) == Some(&8)));
        assert!(orchestrator.missing_samples().unwrap().is_empty());
        assert!(!std::path::Path::new(&leftover).exists());
        assert_eq!(store.read_snapshot(&key(3, 5)).unwrap().shape(), (4, 4));
    }

    #[test]
    fn test_second_full_generation_is_refused() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(dir.path(), None, 2);
        assert!(orchestrator.generate().unwrap().is_complete());
        let err = orchestrator.generate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<dataset_common::DatasetError>(),
            Some(dataset_common::DatasetError::ParameterTableExists(_))
        ));
    }
}
