use dataset_common::{DatasetError, ParameterKind, ParameterRange, ParameterRanges, ParameterTable, ParameterValue, Result};
use log::debug;
use rand::distr::Uniform;
use rand::Rng;

/// Draws one parameter row per sample: defaults for fixed parameters, uniform draws for the
/// parameters of interest.
#[derive(Debug, Clone)]
pub struct ParameterSampler {
    ranges: ParameterRanges,
    parameters_of_interest: Vec<String>,
}

impl ParameterSampler {
    /// Fails if a parameter of interest is not in the range table.
    pub fn new(ranges: ParameterRanges, parameters_of_interest: &[String]) -> Result<Self> {
        if let Some(missing) = parameters_of_interest.iter().find(|p| ranges.get(p).is_none()) {
            return Err(DatasetError::UnknownParameter(missing.clone()));
        }
        Ok(Self {
            ranges,
            parameters_of_interest: parameters_of_interest.to_vec(),
        })
    }

    pub fn is_of_interest(&self, name: &str) -> bool {
        self.parameters_of_interest.iter().any(|p| p == name)
    }

    /// Produces a table with one column per range-table parameter and rows `0..n_samples`.
    /// Columns are drawn in range-table order, so a seeded `rng` gives a reproducible table.
    pub fn sample<R: Rng>(&self, n_samples: usize, rng: &mut R) -> Result<ParameterTable> {
        let mut names = Vec::with_capacity(self.ranges.len());
        let mut columns = Vec::with_capacity(self.ranges.len());
        for range in self.ranges.iter() {
            let column = if self.is_of_interest(&range.name) {
                draw_column(range, n_samples, rng)?
            } else {
                vec![default_value(range); n_samples]
            };
            debug!(
                "Parameter '{}': {} ({} samples)",
                range.name,
                if self.is_of_interest(&range.name) { "randomized" } else { "default" },
                n_samples
            );
            names.push(range.name.clone());
            columns.push(column);
        }

        let rows = (0..n_samples)
            .map(|i| columns.iter().map(|column| column[i]).collect())
            .collect();
        ParameterTable::new(names, rows)
    }
}

fn default_value(range: &ParameterRange) -> ParameterValue {
    match range.kind {
        ParameterKind::Int => ParameterValue::Int(range.default as i64),
        ParameterKind::Float => ParameterValue::Real(range.default),
    }
}

/// Integers: discrete uniform over `[min, max]`. Reals: continuous uniform over `[min, max)`.
fn draw_column<R: Rng>(range: &ParameterRange, n: usize, rng: &mut R) -> Result<Vec<ParameterValue>> {
    let invalid = |e: rand::distr::uniform::Error| {
        DatasetError::MalformedRangeTable(format!("'{}': {}", range.name, e))
    };
    match range.kind {
        ParameterKind::Int => {
            let dist = Uniform::new_inclusive(range.minimum as i64, range.maximum as i64).map_err(invalid)?;
            Ok((0..n).map(|_| ParameterValue::Int(rng.sample(&dist))).collect())
        }
        ParameterKind::Float if range.minimum == range.maximum => {
            Ok(vec![ParameterValue::Real(range.minimum); n])
        }
        ParameterKind::Float => {
            let dist = Uniform::new(range.minimum, range.maximum).map_err(invalid)?;
            Ok((0..n).map(|_| ParameterValue::Real(rng.sample(&dist))).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ranges() -> ParameterRanges {
        ParameterRanges::from_reader(
            "\
Parameter,Type,Default Value,Minimum,Maximum
cell_cycle,int,24,12,14
average_healthy_glucose_absorption,float,0.36,0.2,0.6
average_cancer_glucose_absorption,float,0.54,0.3,0.9
"
            .as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn test_unknown_parameter_of_interest() {
        let err = ParameterSampler::new(ranges(), &["nope".to_string()]).unwrap_err();
        assert!(matches!(err, DatasetError::UnknownParameter(name) if name == "nope"));
    }

    #[test]
    fn test_defaults_are_broadcast_and_draws_stay_in_range() {
        let sampler = ParameterSampler::new(
            ranges(),
            &["cell_cycle".to_string(), "average_healthy_glucose_absorption".to_string()],
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let table = sampler.sample(500, &mut rng).unwrap();

        assert_eq!(table.len(), 500);
        assert_eq!(table.names().len(), 3);

        let fixed = table.column("average_cancer_glucose_absorption").unwrap();
        assert!(fixed.iter().all(|&v| v == 0.54));

        let cycles = table.column("cell_cycle").unwrap();
        assert!(cycles.iter().all(|&v| (12.0..=14.0).contains(&v) && v.fract() == 0.0));
        // inclusive upper bound is reachable
        assert!(cycles.contains(&14.0));
        assert!(matches!(table.row(0).unwrap().get("cell_cycle"), Some(ParameterValue::Int(_))));

        let glucose = table.column("average_healthy_glucose_absorption").unwrap();
        assert!(glucose.iter().all(|&v| (0.2..0.6).contains(&v)));
    }

    #[test]
    fn test_same_seed_same_table() {
        let sampler = ParameterSampler::new(ranges(), &["cell_cycle".to_string()]).unwrap();
        let a = sampler.sample(20, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = sampler.sample(20, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(a, b);
    }
}
