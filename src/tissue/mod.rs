//! Reference lattice tissue model implementing [`TissueSimulation`].
//!
//! Each site holds either nothing, healthy cells or cancer cells. Oxygen and glucose diffuse
//! over the lattice from a sparse set of capillary sites and are consumed by the cells at the
//! rates given in the sample's parameter row. Cells progress through their cycle while fed,
//! divide onto their own site up to a capacity (then onto an empty neighbour), die of
//! starvation, and lose a binomial fraction of their number on every treatment dose
//! (linear-quadratic survival).

mod lattice;
mod state;

use anyhow::Result;
use dataset_common::{Channel, DatasetError, Grid, ParameterRow};
use log::trace;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Binomial, Distribution, Normal};
use rayon::prelude::*;

use crate::simulation::{SimulationFactory, TissueSimulation};
use lattice::{find_first_neighbor, get_site_idx, neighbor_sum};
pub use state::{TissueState, CANCER, EMPTY, HEALTHY};

/// Parameter names the model reads from every row.
pub const REQUIRED_PARAMETERS: [&str; 6] = [
    "average_healthy_glucose_absorption",
    "average_cancer_glucose_absorption",
    "average_healthy_oxygen_consumption",
    "average_cancer_oxygen_consumption",
    "cell_cycle",
    "cancer_radiosensitivity",
];

// Field dynamics
const DIFFUSION: f64 = 0.2; // explicit scheme, stable below 0.25
const SOURCE_RATE: f64 = 0.6;
const MAX_LEVEL: f64 = 4.0;
const GLUCOSE_SCALE: f64 = 0.02;
const OXYGEN_SCALE: f64 = 0.0008;

// Cell dynamics
const OXYGEN_THRESHOLD: f64 = 0.05;
const GLUCOSE_THRESHOLD: f64 = 0.05;
const STARVATION_DEATH: f64 = 0.1;
const HEALTHY_CAPACITY: u32 = 1;
const CANCER_CAPACITY: u32 = 4;
const CANCER_CYCLE_FACTOR: f64 = 0.75;
const CYCLE_JITTER: f64 = 0.1;
const HEALTHY_ALPHA: f64 = 0.15;
const BETA_RATIO: f64 = 0.1;

/// Rates read from one sample's parameter row.
#[derive(Debug, Clone, PartialEq)]
pub struct TissueParams {
    pub healthy_glucose: f64,
    pub cancer_glucose: f64,
    pub healthy_oxygen: f64,
    pub cancer_oxygen: f64,
    /// Healthy cell cycle length in hours.
    pub cell_cycle: f64,
    /// Linear coefficient of cancer cell dose response.
    pub cancer_radiosensitivity: f64,
}

impl TissueParams {
    /// Every entry of [`REQUIRED_PARAMETERS`] must be present; nothing is defaulted.
    pub fn from_row(row: ParameterRow<'_>) -> Result<Self> {
        let params = Self {
            healthy_glucose: row.require(REQUIRED_PARAMETERS[0])?,
            cancer_glucose: row.require(REQUIRED_PARAMETERS[1])?,
            healthy_oxygen: row.require(REQUIRED_PARAMETERS[2])?,
            cancer_oxygen: row.require(REQUIRED_PARAMETERS[3])?,
            cell_cycle: row.require(REQUIRED_PARAMETERS[4])?,
            cancer_radiosensitivity: row.require(REQUIRED_PARAMETERS[5])?,
        };
        if params.cell_cycle < 1.0 {
            return Err(DatasetError::Simulation(format!(
                "cell_cycle must be at least one hour, got {}",
                params.cell_cycle
            ))
            .into());
        }
        Ok(params)
    }

    /// (oxygen, glucose) consumed per hour by a site.
    #[inline(always)]
    fn consumption(&self, kind: u8, cells: u32) -> (f64, f64) {
        let n = cells as f64;
        match kind {
            HEALTHY => (self.healthy_oxygen * OXYGEN_SCALE * n, self.healthy_glucose * GLUCOSE_SCALE * n),
            CANCER => (self.cancer_oxygen * OXYGEN_SCALE * n, self.cancer_glucose * GLUCOSE_SCALE * n),
            _ => (0.0, 0.0),
        }
    }
}

/// Manages the state and execution of one lattice tissue simulation.
pub struct LatticeTissue {
    params: TissueParams,
    state: TissueState,
    /// Sample-specific RNG for division jitter and dose survival.
    rng: StdRng,
    jitter: Normal<f64>,
    treatment: Option<Vec<f64>>,
    hour: u32,
}

impl LatticeTissue {
    pub fn new(
        width: usize,
        height: usize,
        params: TissueParams,
        treatment: Option<Vec<f64>>,
        seed: u64,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            anyhow::bail!("lattice must be at least 1x1, got {}x{}", width, height);
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let state = TissueState::new(width, height, &mut rng);
        Ok(Self {
            params,
            state,
            rng,
            jitter: Normal::new(0.0, CYCLE_JITTER)?,
            treatment,
            hour: 0,
        })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn state(&self) -> &TissueState {
        &self.state
    }

    pub fn params(&self) -> &TissueParams {
        &self.params
    }

    /// Advances the model by one hour.
    pub fn step(&mut self) -> Result<()> {
        let dose = self
            .treatment
            .as_ref()
            .and_then(|t| t.get(self.hour as usize))
            .copied()
            .unwrap_or(0.0);
        if dose > 0.0 {
            self.apply_dose(dose)?;
        }

        self.update_fields_parallel();
        self.state.swap_buffers();
        self.update_cells();

        self.hour += 1;
        Ok(())
    }

    /// Diffusion, capillary supply and consumption for both fields, one row per task.
    fn update_fields_parallel(&mut self) {
        let TissueState {
            width,
            height,
            occupant,
            cells,
            oxygen_in,
            glucose_in,
            oxygen_out,
            glucose_out,
            is_source,
            ..
        } = &mut self.state;
        let (w, h) = (*width, *height);
        let (occupant, cells, is_source): (&[u8], &[u32], &[bool]) = (occupant, cells, is_source);
        let (oxygen_in, glucose_in): (&[f64], &[f64]) = (oxygen_in, glucose_in);
        let params = &self.params;

        oxygen_out
            .par_chunks_mut(w)
            .zip(glucose_out.par_chunks_mut(w))
            .enumerate()
            .for_each(|(y, (oxygen_row, glucose_row))| {
                for x in 0..w {
                    let idx = get_site_idx(x, y, w);
                    let (oxygen_use, glucose_use) = params.consumption(occupant[idx], cells[idx]);
                    let supply = if is_source[idx] { SOURCE_RATE } else { 0.0 };

                    let o = oxygen_in[idx];
                    let o_lap = neighbor_sum(oxygen_in, x, y, w, h) - 4.0 * o;
                    oxygen_row[x] = (o + DIFFUSION * o_lap + supply - oxygen_use).clamp(0.0, MAX_LEVEL);

                    let g = glucose_in[idx];
                    let g_lap = neighbor_sum(glucose_in, x, y, w, h) - 4.0 * g;
                    glucose_row[x] = (g + DIFFUSION * g_lap + supply - glucose_use).clamp(0.0, MAX_LEVEL);
                }
            });
    }

    /// Starvation, cycle progression and division (serial: divisions write to neighbours).
    fn update_cells(&mut self) {
        let (w, h) = (self.state.width, self.state.height);
        for idx in 0..self.state.num_sites() {
            if self.state.cells[idx] == 0 {
                continue;
            }
            let kind = self.state.occupant[idx];

            let starving = self.state.oxygen_in[idx] < OXYGEN_THRESHOLD
                || self.state.glucose_in[idx] < GLUCOSE_THRESHOLD;
            if starving {
                if self.rng.random::<f64>() < STARVATION_DEATH {
                    self.state.cells[idx] -= 1;
                    if self.state.cells[idx] == 0 {
                        self.state.occupant[idx] = EMPTY;
                        self.state.cycle_progress[idx] = 0.0;
                    }
                }
                continue;
            }

            let cycle = match kind {
                CANCER => self.params.cell_cycle * CANCER_CYCLE_FACTOR,
                _ => self.params.cell_cycle,
            };
            self.state.cycle_progress[idx] += 1.0 / cycle;
            if self.state.cycle_progress[idx] < 1.0 {
                continue;
            }
            self.state.cycle_progress[idx] = self.jitter.sample(&mut self.rng);

            let capacity = if kind == CANCER { CANCER_CAPACITY } else { HEALTHY_CAPACITY };
            if self.state.cells[idx] < capacity {
                self.state.cells[idx] += 1;
                continue;
            }
            let (x, y) = (idx % w, idx / w);
            let occupant = &self.state.occupant;
            if let Some(target) = find_first_neighbor(x, y, w, h, |j| occupant[j] == EMPTY) {
                self.state.occupant[target] = kind;
                self.state.cells[target] = 1;
                self.state.cycle_progress[target] = 0.0;
            }
        }
    }

    /// Linear-quadratic survival, drawn per site.
    fn apply_dose(&mut self, dose: f64) -> Result<()> {
        let survival = |alpha: f64| (-alpha * dose - alpha * BETA_RATIO * dose * dose).exp();
        let healthy_survival = survival(HEALTHY_ALPHA);
        let cancer_survival = survival(self.params.cancer_radiosensitivity);
        let before = self.state.total_cells();

        for idx in 0..self.state.num_sites() {
            let n = self.state.cells[idx];
            if n == 0 {
                continue;
            }
            let p = match self.state.occupant[idx] {
                CANCER => cancer_survival,
                _ => healthy_survival,
            };
            let survivors = Binomial::new(n as u64, p.clamp(0.0, 1.0))?.sample(&mut self.rng) as u32;
            self.state.cells[idx] = survivors;
            if survivors == 0 {
                self.state.occupant[idx] = EMPTY;
                self.state.cycle_progress[idx] = 0.0;
            }
        }
        trace!(
            "Hour {}: dose {:.2} left {} of {} cells",
            self.hour,
            dose,
            self.state.total_cells(),
            before
        );
        Ok(())
    }
}

impl TissueSimulation for LatticeTissue {
    fn advance(&mut self, hours: u32) -> Result<()> {
        for _ in 0..hours {
            self.step()?;
        }
        Ok(())
    }

    fn channel(&self, channel: Channel) -> Grid {
        let s = &self.state;
        let w = s.width;
        match channel {
            Channel::CellsTypes => Grid::from_fn(s.height, w, |y, x| s.occupant[get_site_idx(x, y, w)] as f64),
            Channel::CellsDensities => Grid::from_fn(s.height, w, |y, x| s.cells[get_site_idx(x, y, w)] as f64),
            Channel::Oxygen => Grid::from_fn(s.height, w, |y, x| s.oxygen_in[get_site_idx(x, y, w)]),
            Channel::Glucose => Grid::from_fn(s.height, w, |y, x| s.glucose_in[get_site_idx(x, y, w)]),
        }
    }
}

/// Builds [`LatticeTissue`] instances from parameter rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatticeTissueFactory;

impl SimulationFactory for LatticeTissueFactory {
    type Simulation = LatticeTissue;

    fn build(
        &self,
        width: usize,
        height: usize,
        params: ParameterRow<'_>,
        treatment: Option<&[f64]>,
        seed: u64,
    ) -> Result<LatticeTissue> {
        let params = TissueParams::from_row(params)?;
        LatticeTissue::new(width, height, params, treatment.map(<[f64]>::to_vec), seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataset_common::{ParameterTable, ParameterValue};

    fn default_table() -> ParameterTable {
        ParameterTable::new(
            REQUIRED_PARAMETERS.iter().map(|s| s.to_string()).collect(),
            vec![vec![
                ParameterValue::Real(0.36),
                ParameterValue::Real(0.54),
                ParameterValue::Real(20.0),
                ParameterValue::Real(20.0),
                ParameterValue::Int(24),
                ParameterValue::Real(0.5),
            ]],
        )
        .unwrap()
    }

    #[test]
    fn test_missing_parameter_is_an_error() {
        let table = ParameterTable::new(vec!["cell_cycle".into()], vec![vec![ParameterValue::Int(24)]]).unwrap();
        assert!(LatticeTissueFactory.build(8, 8, table.row(0).unwrap(), None, 1).is_err());
    }

    #[test]
    fn test_channels_have_lattice_shape() {
        let table = default_table();
        let mut sim = LatticeTissueFactory.build(10, 6, table.row(0).unwrap(), None, 1).unwrap();
        sim.advance(5).unwrap();
        for channel in Channel::ALL {
            let grid = sim.channel(channel);
            assert_eq!(grid.shape(), (6, 10), "{}", channel);
            assert!(grid.is_finite());
        }
        let types = sim.channel(Channel::CellsTypes);
        assert!(types.as_slice().iter().all(|&v| v == 0.0 || v == 1.0 || v == 2.0));
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let table = default_table();
        let run = |seed| {
            let mut sim = LatticeTissueFactory.build(8, 8, table.row(0).unwrap(), None, seed).unwrap();
            sim.advance(30).unwrap();
            sim.channel(Channel::CellsDensities)
        };
        assert_eq!(run(3), run(3));
    }

    #[test]
    fn test_dose_kills_cells() {
        let table = default_table();
        let mut treatment = vec![0.0; 20];
        treatment[10] = 20.0;
        let mut sim = LatticeTissueFactory.build(8, 8, table.row(0).unwrap(), Some(&treatment), 9).unwrap();
        sim.advance(10).unwrap();
        let before = sim.state().total_cells();
        sim.advance(1).unwrap();
        assert!(sim.state().total_cells() < before);
        assert_eq!(sim.hour(), 11);
    }
}
