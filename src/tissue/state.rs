use rand::rngs::StdRng;
use rand::Rng;

use super::lattice::get_site_idx;

pub const EMPTY: u8 = 0;
pub const HEALTHY: u8 = 1;
pub const CANCER: u8 = 2;

/// Holds the lattice state vectors.
#[derive(Debug)]
pub struct TissueState {
    pub width: usize,
    pub height: usize,

    // --- Cell occupancy (updated serially) ---
    /// Cell kind per site: EMPTY, HEALTHY or CANCER.
    pub occupant: Vec<u8>,
    /// Number of cells stacked on each site.
    pub cells: Vec<u32>,
    /// Progress through the current cell cycle, division at 1.0.
    pub cycle_progress: Vec<f64>,

    // --- Ping-Pong Buffers for Parallel Field Update ---
    pub oxygen_in: Vec<f64>,
    pub glucose_in: Vec<f64>,
    pub oxygen_out: Vec<f64>,
    pub glucose_out: Vec<f64>,

    /// Sites fed by a capillary; nutrients are injected there every hour.
    pub is_source: Vec<bool>,
}

impl TissueState {
    /// Seeds healthy cells over the lattice, a small cancer nodule at the centre and a sparse
    /// set of capillary sources.
    pub fn new(width: usize, height: usize, rng: &mut StdRng) -> Self {
        let n = width * height;
        let mut occupant = vec![EMPTY; n];
        let mut cells = vec![0u32; n];
        let mut cycle_progress = vec![0.0; n];

        for idx in 0..n {
            if rng.random::<f64>() < HEALTHY_SEED_FRACTION {
                occupant[idx] = HEALTHY;
                cells[idx] = 1;
                cycle_progress[idx] = rng.random::<f64>();
            }
        }

        let (cx, cy) = (width / 2, height / 2);
        for y in cy.saturating_sub(1)..(cy + 1).min(height) {
            for x in cx.saturating_sub(1)..(cx + 1).min(width) {
                let idx = get_site_idx(x, y, width);
                occupant[idx] = CANCER;
                cells[idx] = 1;
                cycle_progress[idx] = rng.random::<f64>();
            }
        }

        let mut is_source: Vec<bool> = (0..n).map(|_| rng.random::<f64>() < SOURCE_FRACTION).collect();
        if !is_source.iter().any(|&s| s) && n > 0 {
            let idx = rng.random_range(0..n);
            is_source[idx] = true;
        }

        Self {
            width,
            height,
            occupant,
            cells,
            cycle_progress,
            oxygen_in: vec![1.0; n],
            glucose_in: vec![1.0; n],
            oxygen_out: vec![0.0; n],
            glucose_out: vec![0.0; n],
            is_source,
        }
    }

    pub fn num_sites(&self) -> usize {
        self.width * self.height
    }

    /// Output of the current field update becomes the input of the next.
    pub fn swap_buffers(&mut self) {
        std::mem::swap(&mut self.oxygen_in, &mut self.oxygen_out);
        std::mem::swap(&mut self.glucose_in, &mut self.glucose_out);
    }

    pub fn total_cells(&self) -> u64 {
        self.cells.iter().map(|&c| c as u64).sum()
    }
}

const HEALTHY_SEED_FRACTION: f64 = 0.4;
const SOURCE_FRACTION: f64 = 0.05;
