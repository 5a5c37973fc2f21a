//! The narrow contract through which sample generation drives a tissue simulation.

use anyhow::Result;
use dataset_common::{Channel, Grid, ParameterRow};

/// A running simulation instance.
pub trait TissueSimulation {
    /// Advances the simulated state by `hours` time units.
    fn advance(&mut self, hours: u32) -> Result<()>;

    /// Current content of one channel, `height` rows by `width` columns.
    fn channel(&self, channel: Channel) -> Grid;
}

/// Builds simulation instances. Shared read-only by every generation worker.
pub trait SimulationFactory: Sync {
    type Simulation: TissueSimulation;

    /// `treatment[h]` is the dose applied at hour `h`; `seed` is specific to the sample.
    fn build(
        &self,
        width: usize,
        height: usize,
        params: ParameterRow<'_>,
        treatment: Option<&[f64]>,
        seed: u64,
    ) -> Result<Self::Simulation>;
}
