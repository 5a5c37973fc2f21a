use anyhow::Result;
use log::{debug, error, info, warn};
use std::time::Instant;

use dataset_common::DatasetConfig;
use simulation_dataset::{DatasetAnalysis, DatasetOrchestrator, LatticeTissueFactory};

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    info!("Starting Simulation Dataset Pipeline...");

    // --- Load Configuration ---
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = DatasetConfig::load(&config_path)?;
    info!("Loaded configuration from {}", config_path);
    debug!("Configuration: {:#?}", config);

    let start_time = Instant::now();

    // --- Generation ---
    let orchestrator = DatasetOrchestrator::from_config(&config, LatticeTissueFactory)?;
    info!(
        "Dataset directory: {} ({} samples, {} workers)",
        orchestrator.store().dir().display(),
        config.dataset.n_samples,
        config.execution.workers
    );

    let report = if config.execution.resume {
        info!("Resuming: regenerating incomplete samples only...");
        orchestrator.generate_missing()?
    } else {
        info!("Running full generation...");
        orchestrator.generate()?
    };
    for (sample, cause) in &report.failures {
        error!("Sample {} is incomplete: {}", sample, cause);
    }
    if !report.is_complete() {
        warn!("Skipping analysis until every sample is complete.");
        anyhow::bail!("{} samples failed to generate.", report.failures.len());
    }

    // --- Analysis ---
    if let Some(analysis_config) = &config.analysis {
        info!("Running analysis into {}...", analysis_config.output_dir.display());
        let analysis = DatasetAnalysis::open(&config, analysis_config)?;
        let summary = analysis.run_jobs(analysis_config)?;
        for failure in &summary.failures {
            warn!("{}", failure);
        }
    }

    let total_duration = start_time.elapsed();
    info!(
        "Pipeline finished in {:.3} seconds ({:.3} minutes).",
        total_duration.as_secs_f64(),
        total_duration.as_secs_f64() / 60.0
    );
    Ok(())
}
