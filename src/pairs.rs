use dataset_common::{DatasetError, ParameterTable, Result};
use log::debug;
use rand::Rng;
use std::collections::BTreeSet;

/// Value pairs `(v1, v2)` from `values` (in the given order) with `||v1 - v2| - difference| <= tolerance`.
/// Only pairs at positions `i <= j` are considered, so mirrored duplicates never appear and
/// `v1 == v2` only qualifies through the diagonal when the difference allows it.
pub fn find_value_pairs(values: &[f64], difference: f64, tolerance: f64) -> Vec<(f64, f64)> {
    let mut pairs = Vec::new();
    for (i, &v1) in values.iter().enumerate() {
        for &v2 in &values[i..] {
            if ((v1 - v2).abs() - difference).abs() <= tolerance {
                pairs.push((v1, v2));
            }
        }
    }
    pairs
}

/// Deduplicated sample-index pairs `(i, j)` with `i < j` whose values of `parameter` differ by
/// about `difference`.
pub fn candidate_pairs(
    table: &ParameterTable,
    parameter: &str,
    difference: f64,
    tolerance: f64,
) -> Result<Vec<(usize, usize)>> {
    let values = table.distinct_values(parameter)?;
    let value_pairs = find_value_pairs(&values, difference, tolerance);

    let mut pairs = BTreeSet::new();
    for (v1, v2) in &value_pairs {
        let left = table.indices_with_value(parameter, *v1)?;
        let right = table.indices_with_value(parameter, *v2)?;
        for &i in &left {
            for &j in &right {
                if i != j {
                    pairs.insert((i.min(j), i.max(j)));
                }
            }
        }
    }
    debug!(
        "'{}' difference {} (tol {}): {} value pairs, {} index pairs",
        parameter,
        difference,
        tolerance,
        value_pairs.len(),
        pairs.len()
    );

    if pairs.is_empty() {
        return Err(DatasetError::NoCandidatePairs {
            parameter: parameter.to_string(),
            difference,
            tolerance,
        });
    }
    Ok(pairs.into_iter().collect())
}

/// `draws` pairs chosen uniformly with replacement from `candidates`.
pub fn sample_pairs<R: Rng>(
    candidates: &[(usize, usize)],
    draws: usize,
    rng: &mut R,
) -> Result<Vec<(usize, usize)>> {
    if candidates.is_empty() {
        return Err(DatasetError::EmptyCandidateSet);
    }
    Ok((0..draws)
        .map(|_| candidates[rng.random_range(0..candidates.len())])
        .collect())
}

/// [`candidate_pairs`] followed by [`sample_pairs`].
pub fn draw_pairs<R: Rng>(
    table: &ParameterTable,
    parameter: &str,
    difference: f64,
    tolerance: f64,
    draws: usize,
    rng: &mut R,
) -> Result<Vec<(usize, usize)>> {
    let candidates = candidate_pairs(table, parameter, difference, tolerance)?;
    sample_pairs(&candidates, draws, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataset_common::ParameterValue;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn table(values: &[f64]) -> ParameterTable {
        ParameterTable::new(
            vec!["p".into()],
            values.iter().map(|&v| vec![ParameterValue::Real(v)]).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_value_pairs_at_half_step() {
        let pairs = find_value_pairs(&[1.0, 1.5, 2.0], 0.5, 0.01);
        assert_eq!(pairs, vec![(1.0, 1.5), (1.5, 2.0)]);
    }

    #[test]
    fn test_zero_difference_takes_the_diagonal() {
        let pairs = find_value_pairs(&[1.0, 2.0], 0.0, 0.0);
        assert_eq!(pairs, vec![(1.0, 1.0), (2.0, 2.0)]);
    }

    #[test]
    fn test_candidates_are_canonical_and_unique() {
        let table = table(&[1.0, 1.5, 2.0, 1.5, 1.0, 1.5]);
        let pairs = candidate_pairs(&table, "p", 0.5, 0.01).unwrap();
        assert!(pairs.iter().all(|&(i, j)| i < j));
        let unique: BTreeSet<_> = pairs.iter().copied().collect();
        assert_eq!(unique.len(), pairs.len());
        // 2 ones x 3 halves + 3 halves x 1 two
        assert_eq!(pairs.len(), 9);
        assert!(!pairs.contains(&(0, 2)));
    }

    #[test]
    fn test_zero_difference_drops_self_pairs() {
        let table = table(&[1.0, 1.0, 2.0]);
        let pairs = candidate_pairs(&table, "p", 0.0, 0.0).unwrap();
        assert_eq!(pairs, vec![(0, 1)]);
    }

    #[test]
    fn test_no_candidates_is_an_error() {
        let table = table(&[1.0, 1.5, 2.0]);
        let err = candidate_pairs(&table, "p", 5.0, 0.01).unwrap_err();
        assert!(matches!(err, DatasetError::NoCandidatePairs { .. }));
    }

    #[test]
    fn test_sampling_is_with_replacement() {
        let candidates = vec![(0, 1), (1, 2)];
        let mut rng = StdRng::seed_from_u64(4);
        let drawn = sample_pairs(&candidates, 50, &mut rng).unwrap();
        assert_eq!(drawn.len(), 50);
        assert!(drawn.iter().all(|p| candidates.contains(p)));
        assert!(drawn.contains(&(0, 1)) && drawn.contains(&(1, 2)));
    }

    #[test]
    fn test_sampling_from_nothing_is_an_error() {
        let mut rng = StdRng::seed_from_u64(4);
        let err = sample_pairs(&[], 100, &mut rng).unwrap_err();
        assert!(matches!(err, DatasetError::EmptyCandidateSet));
    }
}
