use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of the per-dataset parameter table file.
pub const PARAMETER_TABLE_FILE: &str = "dataset.csv";

/// The spatial fields captured at every draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    CellsTypes,
    CellsDensities,
    Oxygen,
    Glucose,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::CellsTypes,
        Channel::CellsDensities,
        Channel::Oxygen,
        Channel::Glucose,
    ];

    /// Stable name used in file names and tables.
    pub fn name(self) -> &'static str {
        match self {
            Channel::CellsTypes => "cells_types",
            Channel::CellsDensities => "cells_densities",
            Channel::Oxygen => "oxygen",
            Channel::Glucose => "glucose",
        }
    }

    /// Label maps hold category codes rather than continuous values.
    pub fn is_categorical(self) -> bool {
        matches!(self, Channel::CellsTypes)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| format!("unknown channel '{}'", s))
    }
}

/// The fixed sequence of draw times: `start, start + interval, ...` (`n_draws` entries).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawSchedule {
    pub start: u32,
    pub interval: u32,
    pub n_draws: u32,
}

impl DrawSchedule {
    pub fn timesteps(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.n_draws).map(move |i| self.start + i * self.interval)
    }

    pub fn contains(&self, timestep: u32) -> bool {
        timestep >= self.start
            && (timestep - self.start) % self.interval.max(1) == 0
            && (timestep - self.start) / self.interval.max(1) < self.n_draws
    }

    /// Number of snapshot files a complete sample owns.
    pub fn snapshots_per_sample(&self) -> usize {
        self.n_draws as usize * Channel::ALL.len()
    }
}

/// Composite identity of one persisted snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotKey {
    pub sample: usize,
    pub channel: Channel,
    pub timestep: u32,
}

impl SnapshotKey {
    pub fn new(sample: usize, channel: Channel, timestep: u32) -> Self {
        Self { sample, channel, timestep }
    }

    /// `image{sample}_type={channel}_time={timestep}.{extension}`
    pub fn file_name(&self, extension: &str) -> String {
        format!(
            "image{}_type={}_time={}.{}",
            self.sample, self.channel, self.timestep, extension
        )
    }

    /// Inverse of [`SnapshotKey::file_name`]. Returns `None` for anything that does not
    /// match the template exactly, including temporary files and other extensions.
    pub fn parse(file_name: &str, extension: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(extension)?.strip_suffix('.')?;
        let rest = stem.strip_prefix("image")?;
        let (sample, rest) = rest.split_once("_type=")?;
        let (channel, timestep) = rest.rsplit_once("_time=")?;
        if sample.is_empty() || !sample.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if timestep.is_empty() || !timestep.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            sample: sample.parse().ok()?,
            channel: channel.parse().ok()?,
            timestep: timestep.parse().ok()?,
        })
    }
}

/// Canonical dataset folder name; the sole addressing key for downstream analysis.
pub fn dataset_folder_name(name: &str, schedule: &DrawSchedule, width: usize, height: usize) -> String {
    format!(
        "{}_start={}_interval={}_ndraw={}_size=({},{})",
        name, schedule.start, schedule.interval, schedule.n_draws, width, height
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_round_trip() {
        let key = SnapshotKey::new(12, Channel::CellsDensities, 450);
        let name = key.file_name("f64");
        assert_eq!(name, "image12_type=cells_densities_time=450.f64");
        assert_eq!(SnapshotKey::parse(&name, "f64"), Some(key));
    }

    #[test]
    fn test_parse_rejects_foreign_files() {
        assert_eq!(SnapshotKey::parse("dataset.csv", "f64"), None);
        assert_eq!(SnapshotKey::parse("image1_type=oxygen_time=350.f64.tmp", "f64"), None);
        assert_eq!(SnapshotKey::parse("image1_type=oxygen_time=350.bin", "f64"), None);
        assert_eq!(SnapshotKey::parse("image1_type=plasma_time=350.f64", "f64"), None);
        assert_eq!(SnapshotKey::parse("image_type=oxygen_time=350.f64", "f64"), None);
    }

    #[test]
    fn test_schedule() {
        let schedule = DrawSchedule { start: 350, interval: 100, n_draws: 3 };
        assert_eq!(schedule.timesteps().collect::<Vec<_>>(), vec![350, 450, 550]);
        assert!(schedule.contains(450));
        assert!(!schedule.contains(650));
        assert!(!schedule.contains(400));
        assert_eq!(schedule.snapshots_per_sample(), 12);
    }

    #[test]
    fn test_dataset_folder_name() {
        let schedule = DrawSchedule { start: 350, interval: 100, n_draws: 8 };
        assert_eq!(
            dataset_folder_name("no_dose_dataset", &schedule, 64, 64),
            "no_dose_dataset_start=350_interval=100_ndraw=8_size=(64,64)"
        );
    }
}
