//! Information-theoretic estimators: nearest-neighbour mutual information (Kraskov for two
//! continuous variables, Ross for a discrete/continuous pair), label-based normalized mutual
//! information, and histogram entropy.
//!
//! Continuous inputs are scaled to unit variance and jittered with a tiny seeded Gaussian
//! noise before neighbour search, which breaks ties between repeated values.

use dataset_common::{DatasetError, Grid, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use std::collections::HashMap;

/// Neighbours used by both nearest-neighbour estimators.
pub const NEIGHBORS: usize = 3;

/// Added inside the logarithm of histogram entropy.
const LOG_FLOOR: f64 = 1e-10;
/// Entropies at or below this are treated as zero.
const ZERO_ENTROPY: f64 = 1e-9;
const NOISE_SCALE: f64 = 1e-10;

/// Digamma function for `x > 0`: recurrence up to `x >= 6`, then the asymptotic series.
pub fn digamma(x: f64) -> f64 {
    let mut x = x;
    let mut result = 0.0;
    while x < 6.0 {
        result -= 1.0 / x;
        x += 1.0;
    }
    let f = 1.0 / (x * x);
    result + x.ln()
        - 0.5 / x
        - f * (1.0 / 12.0 - f * (1.0 / 120.0 - f * (1.0 / 252.0 - f * (1.0 / 240.0 - f / 132.0))))
}

/// Linear-interpolated percentile of sorted data, `q` in `[0, 1]`.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Bin count of the "auto" rule: the narrower of the Sturges and Freedman-Diaconis widths
/// (Sturges alone when the interquartile range is zero).
pub fn auto_bin_count(values: &[f64]) -> usize {
    let n = values.len();
    if n == 0 {
        return 1;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let range = sorted[n - 1] - sorted[0];
    if range <= 0.0 {
        return 1;
    }

    let sturges = range / ((n as f64).log2() + 1.0);
    let iqr = percentile(&sorted, 0.75) - percentile(&sorted, 0.25);
    let fd = 2.0 * iqr * (n as f64).powf(-1.0 / 3.0);
    let width = if fd > 0.0 { fd.min(sturges) } else { sturges };
    ((range / width).ceil() as usize).max(1)
}

/// Histogram entropy `-sum p ln(p + floor)` with [`auto_bin_count`] equal-width bins.
pub fn histogram_entropy(values: &[f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let bins = auto_bin_count(values);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let width = (max - min) / bins as f64;

    let mut counts = vec![0usize; bins];
    for &v in values {
        let bin = if width > 0.0 {
            (((v - min) / width) as usize).min(bins - 1)
        } else {
            0
        };
        counts[bin] += 1;
    }
    -counts
        .iter()
        .map(|&c| c as f64 / n as f64)
        .map(|p| p * (p + LOG_FLOOR).ln())
        .sum::<f64>()
}

/// Class index per element; equal values share a class.
fn class_labels(values: &[f64]) -> (Vec<usize>, usize) {
    let mut classes: HashMap<u64, usize> = HashMap::new();
    let labels = values
        .iter()
        .map(|&v| {
            let next = classes.len();
            *classes.entry((v + 0.0).to_bits()).or_insert(next)
        })
        .collect();
    (labels, classes.len())
}

fn label_entropy(labels: &[usize], n_classes: usize) -> f64 {
    let n = labels.len() as f64;
    let mut counts = vec![0usize; n_classes];
    for &l in labels {
        counts[l] += 1;
    }
    -counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / n;
            p * p.ln()
        })
        .sum::<f64>()
}

/// Mutual information of two label arrays, normalized by the arithmetic mean of their
/// entropies. 1.0 when both hold a single class, 0.0 when they share no information.
pub fn normalized_mutual_information(a: &[f64], b: &[f64]) -> f64 {
    let (la, na) = class_labels(a);
    let (lb, nb) = class_labels(b);
    if (na == 1 && nb == 1) || (na == 0 && nb == 0) {
        return 1.0;
    }

    let n = a.len() as f64;
    let mut joint: HashMap<(usize, usize), usize> = HashMap::new();
    for (&x, &y) in la.iter().zip(&lb) {
        *joint.entry((x, y)).or_insert(0) += 1;
    }
    let mut count_a = vec![0usize; na];
    let mut count_b = vec![0usize; nb];
    for (&x, &y) in la.iter().zip(&lb) {
        count_a[x] += 1;
        count_b[y] += 1;
    }
    let mi: f64 = joint
        .iter()
        .map(|(&(x, y), &c)| {
            let c = c as f64;
            (c / n) * (n * c / (count_a[x] as f64 * count_b[y] as f64)).ln()
        })
        .sum::<f64>()
        .max(0.0);
    if mi <= f64::EPSILON {
        return 0.0;
    }
    let normalizer = ((label_entropy(&la, na) + label_entropy(&lb, nb)) / 2.0).max(f64::EPSILON);
    mi / normalizer
}

/// Unit-variance scaling (sample std, no centring) plus seeded noise of relative size 1e-10.
fn prepare_continuous(values: &[f64], rng: &mut StdRng) -> Vec<f64> {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = if values.len() > 1 {
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        0.0
    };
    let std = var.sqrt();
    let scaled: Vec<f64> = if std > 0.0 {
        values.iter().map(|v| v / std).collect()
    } else {
        values.to_vec()
    };
    let amplitude = NOISE_SCALE * (scaled.iter().map(|v| v.abs()).sum::<f64>() / n).max(1.0);
    scaled
        .into_iter()
        .map(|v| {
            let z: f64 = StandardNormal.sample(rng);
            v + amplitude * z
        })
        .collect()
}

/// Largest float below `r`, or `r` itself at zero. Counting `d <= shrink(r)` counts strictly
/// closer points.
#[inline(always)]
fn shrink(r: f64) -> f64 {
    if r > 0.0 {
        f64::from_bits(r.to_bits() - 1)
    } else {
        r
    }
}

/// `k`-th smallest value of `distances` (1-based).
fn kth_smallest(distances: &mut [f64], k: usize) -> f64 {
    let (_, kth, _) = distances.select_nth_unstable_by(k - 1, f64::total_cmp);
    *kth
}

/// Kraskov estimator (variant 1) under the max-norm on already prepared inputs.
fn ksg(x: &[f64], y: &[f64], k: usize) -> f64 {
    let n = x.len();
    let mut nx_terms = 0.0;
    let mut ny_terms = 0.0;
    let mut distances = Vec::with_capacity(n - 1);
    for i in 0..n {
        distances.clear();
        distances.extend(
            (0..n)
                .filter(|&j| j != i)
                .map(|j| (x[i] - x[j]).abs().max((y[i] - y[j]).abs())),
        );
        let radius = shrink(kth_smallest(&mut distances, k));
        let nx = x.iter().filter(|&&v| (x[i] - v).abs() <= radius).count() - 1;
        let ny = y.iter().filter(|&&v| (y[i] - v).abs() <= radius).count() - 1;
        nx_terms += digamma(nx as f64 + 1.0);
        ny_terms += digamma(ny as f64 + 1.0);
    }
    let n_f = n as f64;
    (digamma(n_f) + digamma(k as f64) - nx_terms / n_f - ny_terms / n_f).max(0.0)
}

/// Ross estimator for a discrete `labels` variable and a prepared continuous `c`.
/// Labels that occur once carry no neighbour information and are dropped.
fn ross(labels: &[usize], n_classes: usize, c: &[f64], k: usize) -> f64 {
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); n_classes];
    for (i, &l) in labels.iter().enumerate() {
        members[l].push(i);
    }

    // (radius, neighbours used, label count) per kept sample
    let mut kept: Vec<(usize, f64, usize, usize)> = Vec::new();
    let mut distances = Vec::new();
    for group in members.iter().filter(|g| g.len() > 1) {
        let k_label = k.min(group.len() - 1);
        for &i in group {
            distances.clear();
            distances.extend(group.iter().filter(|&&j| j != i).map(|&j| (c[i] - c[j]).abs()));
            let radius = shrink(kth_smallest(&mut distances, k_label));
            kept.push((i, radius, k_label, group.len()));
        }
    }
    if kept.is_empty() {
        return 0.0;
    }

    let kept_points: Vec<f64> = kept.iter().map(|&(i, ..)| c[i]).collect();
    let n = kept.len() as f64;
    let mut k_terms = 0.0;
    let mut label_terms = 0.0;
    let mut m_terms = 0.0;
    for &(i, radius, k_label, count) in &kept {
        let m = kept_points.iter().filter(|&&v| (c[i] - v).abs() <= radius).count();
        k_terms += digamma(k_label as f64);
        label_terms += digamma(count as f64);
        m_terms += digamma(m as f64);
    }
    (digamma(n) + k_terms / n - label_terms / n - m_terms / n).max(0.0)
}

fn check_lengths(a: &[f64], b: &[f64]) -> Result<()> {
    if a.len() != b.len() {
        return Err(DatasetError::ShapeMismatch {
            left: (a.len(), 1),
            right: (b.len(), 1),
        });
    }
    if a.len() <= NEIGHBORS {
        return Err(DatasetError::TooFewSamples {
            needed: NEIGHBORS + 1,
            got: a.len(),
        });
    }
    Ok(())
}

/// Mutual information (nats) of two continuous variables.
pub fn continuous_mutual_information(x: &[f64], y: &[f64], seed: u64) -> Result<f64> {
    check_lengths(x, y)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let x = prepare_continuous(x, &mut rng);
    let y = prepare_continuous(y, &mut rng);
    Ok(ksg(&x, &y, NEIGHBORS))
}

/// Mutual information (nats) of a discrete variable and a continuous one.
pub fn discrete_continuous_mutual_information(labels: &[f64], y: &[f64], seed: u64) -> Result<f64> {
    check_lengths(labels, y)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let (labels, n_classes) = class_labels(labels);
    let y = prepare_continuous(y, &mut rng);
    Ok(ross(&labels, n_classes, &y, NEIGHBORS))
}

/// Mutual information between every pixel (across `samples`) and the per-sample `target`.
/// `discrete` selects the label estimator for category maps. Pixels are evaluated in
/// parallel, each with its own noise stream derived from `seed`.
pub fn per_pixel_mutual_information(samples: &[Grid], target: &[f64], discrete: bool, seed: u64) -> Result<Grid> {
    let first = samples.first().ok_or(DatasetError::TooFewSamples {
        needed: NEIGHBORS + 1,
        got: 0,
    })?;
    for grid in samples {
        first.check_same_shape(grid)?;
    }
    if first.is_empty() {
        return Err(DatasetError::ShapeMismatch {
            left: first.shape(),
            right: (1, 1),
        });
    }
    let column: Vec<f64> = samples.iter().map(|g| g.as_slice()[0]).collect();
    check_lengths(&column, target)?;

    let (rows, cols) = first.shape();
    let mut rng = StdRng::seed_from_u64(seed);
    let target = prepare_continuous(target, &mut rng);

    let values: Vec<f64> = (0..rows * cols)
        .into_par_iter()
        .map(|pixel| {
            let column: Vec<f64> = samples.iter().map(|g| g.as_slice()[pixel]).collect();
            if discrete {
                let (labels, n_classes) = class_labels(&column);
                ross(&labels, n_classes, &target, NEIGHBORS)
            } else {
                let mut pixel_rng = StdRng::seed_from_u64(seed.wrapping_add(1 + pixel as u64));
                let x = prepare_continuous(&column, &mut pixel_rng);
                ksg(&x, &target, NEIGHBORS)
            }
        })
        .collect();
    Grid::new(rows, cols, values)
}

/// Divides `mi` by the histogram entropy of `target`. Fails on zero entropy.
pub fn normalize_by_entropy(mi: &Grid, target: &[f64], name: &str) -> Result<Grid> {
    let entropy = histogram_entropy(target);
    if entropy <= ZERO_ENTROPY {
        return Err(DatasetError::ZeroEntropy(name.to_string()));
    }
    Ok(mi.map(|v| v / entropy))
}
