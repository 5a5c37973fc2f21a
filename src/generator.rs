use anyhow::{Context, Result};
use dataset_common::{Channel, DrawSchedule, Grid, ParameterRow};
use log::trace;
use std::collections::BTreeMap;

use crate::simulation::{SimulationFactory, TissueSimulation};

/// Snapshots of one sample: timestep -> channel -> grid.
pub type SampleSnapshots = BTreeMap<u32, BTreeMap<Channel, Grid>>;

/// Sequences one simulation through the draw schedule.
#[derive(Debug, Clone)]
pub struct SampleGenerator {
    width: usize,
    height: usize,
    schedule: DrawSchedule,
    treatment: Option<Vec<f64>>,
}

impl SampleGenerator {
    pub fn new(width: usize, height: usize, schedule: DrawSchedule, treatment: Option<Vec<f64>>) -> Self {
        Self { width, height, schedule, treatment }
    }

    pub fn schedule(&self) -> &DrawSchedule {
        &self.schedule
    }

    /// Builds a simulation from `params`, advances it to the first draw, then captures every
    /// channel and advances by the interval, `n_draws` times.
    pub fn generate<F: SimulationFactory>(
        &self,
        factory: &F,
        params: ParameterRow<'_>,
        seed: u64,
    ) -> Result<SampleSnapshots> {
        let mut sim = factory
            .build(self.width, self.height, params, self.treatment.as_deref(), seed)
            .context("Error building simulation")?;

        sim.advance(self.schedule.start)
            .with_context(|| format!("Error advancing to first draw at t={}", self.schedule.start))?;

        let mut snapshots = SampleSnapshots::new();
        for timestep in self.schedule.timesteps() {
            let channels: BTreeMap<Channel, Grid> =
                Channel::ALL.into_iter().map(|c| (c, sim.channel(c))).collect();
            trace!("Captured {} channels at t={}", channels.len(), timestep);
            snapshots.insert(timestep, channels);
            sim.advance(self.schedule.interval)
                .with_context(|| format!("Error advancing past t={}", timestep))?;
        }
        Ok(snapshots)
    }
}
