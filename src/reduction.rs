//! Two-dimensional embeddings of flattened per-sample data, fitted in one full batch.

use dataset_common::{DatasetError, Result};
use log::debug;
use nalgebra::DMatrix;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Output dimensionality of every reducer.
pub const COMPONENTS: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    /// One `[x, y]` per sample, in input order.
    pub coordinates: Vec<[f64; 2]>,
    /// Share of total variance captured by the two components; variance-based methods only.
    pub explained_variance_ratio: Option<f64>,
}

fn check_rows(data: &[Vec<f64>], needed: usize) -> Result<usize> {
    if data.len() < needed {
        return Err(DatasetError::TooFewSamples { needed, got: data.len() });
    }
    let dim = data[0].len();
    if let Some(bad) = data.iter().find(|row| row.len() != dim) {
        return Err(DatasetError::ShapeMismatch {
            left: (1, dim),
            right: (1, bad.len()),
        });
    }
    Ok(dim)
}

/// Eigenpairs of a symmetric matrix, largest eigenvalue first.
fn top_eigenpairs(matrix: DMatrix<f64>, count: usize) -> (Vec<f64>, Vec<Vec<f64>>, f64) {
    let eig = matrix.symmetric_eigen();
    let trace = eig.eigenvalues.iter().sum::<f64>();
    let mut order: Vec<usize> = (0..eig.eigenvalues.len()).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));
    let values = order.iter().take(count).map(|&i| eig.eigenvalues[i]).collect();
    let vectors = order
        .iter()
        .take(count)
        .map(|&i| eig.eigenvectors.column(i).iter().copied().collect())
        .collect();
    (values, vectors, trace)
}

/// Principal component analysis onto two components.
///
/// Works on whichever of the sample Gram matrix or the feature covariance is smaller; both
/// give the same projection.
pub fn pca(data: &[Vec<f64>]) -> Result<Embedding> {
    let dim = check_rows(data, COMPONENTS)?;
    let n = data.len();

    let mut means = vec![0.0; dim];
    for row in data {
        for (m, v) in means.iter_mut().zip(row) {
            *m += v;
        }
    }
    means.iter_mut().for_each(|m| *m /= n as f64);
    let centered = DMatrix::from_fn(n, dim, |i, j| data[i][j] - means[j]);

    let (values, coordinates, trace) = if n <= dim {
        let gram = &centered * centered.transpose();
        let (values, vectors, trace) = top_eigenpairs(gram, COMPONENTS);
        let coordinates = (0..n)
            .map(|i| {
                let mut point = [0.0; 2];
                for (k, (value, vector)) in values.iter().zip(&vectors).enumerate() {
                    point[k] = vector[i] * value.max(0.0).sqrt();
                }
                point
            })
            .collect();
        (values, coordinates, trace)
    } else {
        let scatter = centered.transpose() * &centered;
        let (values, vectors, trace) = top_eigenpairs(scatter, COMPONENTS);
        let coordinates = (0..n)
            .map(|i| {
                let mut point = [0.0; 2];
                for (k, vector) in vectors.iter().enumerate() {
                    point[k] = (0..dim).map(|j| centered[(i, j)] * vector[j]).sum();
                }
                point
            })
            .collect();
        (values, coordinates, trace)
    };

    let captured: f64 = values.iter().map(|v| v.max(0.0)).sum();
    let ratio = if trace > 0.0 { (captured / trace).clamp(0.0, 1.0) } else { 0.0 };
    debug!("PCA over {} samples x {} features: explained variance {:.4}", n, dim, ratio);
    Ok(Embedding {
        coordinates,
        explained_variance_ratio: Some(ratio),
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Visit {
    cost: f64,
    node: usize,
}

impl Eq for Visit {}

impl Ord for Visit {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap on cost
        other.cost.total_cmp(&self.cost).then_with(|| self.node.cmp(&other.node))
    }
}

impl PartialOrd for Visit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

/// Symmetric k-nearest-neighbour graph as adjacency lists of `(neighbour, distance)`.
fn neighbor_graph(data: &[Vec<f64>], k: usize) -> Vec<Vec<(usize, f64)>> {
    let n = data.len();
    let nearest: Vec<Vec<(usize, f64)>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut distances: Vec<(usize, f64)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| (j, euclidean(&data[i], &data[j])))
                .collect();
            distances.sort_by(|a, b| a.1.total_cmp(&b.1));
            distances.truncate(k);
            distances
        })
        .collect();

    let mut graph = vec![Vec::new(); n];
    for (i, edges) in nearest.into_iter().enumerate() {
        for (j, d) in edges {
            graph[i].push((j, d));
            graph[j].push((i, d));
        }
    }
    graph
}

fn dijkstra(graph: &[Vec<(usize, f64)>], source: usize) -> Vec<f64> {
    let mut dist = vec![f64::INFINITY; graph.len()];
    let mut heap = BinaryHeap::new();
    dist[source] = 0.0;
    heap.push(Visit { cost: 0.0, node: source });
    while let Some(Visit { cost, node }) = heap.pop() {
        if cost > dist[node] {
            continue;
        }
        for &(next, weight) in &graph[node] {
            let candidate = cost + weight;
            if candidate < dist[next] {
                dist[next] = candidate;
                heap.push(Visit { cost: candidate, node: next });
            }
        }
    }
    dist
}

fn count_components(graph: &[Vec<(usize, f64)>]) -> usize {
    let mut seen = vec![false; graph.len()];
    let mut components = 0;
    for start in 0..graph.len() {
        if seen[start] {
            continue;
        }
        components += 1;
        let mut stack = vec![start];
        seen[start] = true;
        while let Some(node) = stack.pop() {
            for &(next, _) in &graph[node] {
                if !seen[next] {
                    seen[next] = true;
                    stack.push(next);
                }
            }
        }
    }
    components
}

/// Isomap: geodesic distances over the `neighbors`-nearest-neighbour graph, then classical
/// multidimensional scaling onto two components. Fails if the graph is disconnected.
pub fn isomap(data: &[Vec<f64>], neighbors: usize) -> Result<Embedding> {
    check_rows(data, COMPONENTS + 1)?;
    let n = data.len();
    let k = neighbors.clamp(1, n - 1);

    let graph = neighbor_graph(data, k);
    let geodesic: Vec<Vec<f64>> = (0..n).into_par_iter().map(|s| dijkstra(&graph, s)).collect();
    if geodesic.iter().flatten().any(|d| !d.is_finite()) {
        return Err(DatasetError::DisconnectedGraph {
            components: count_components(&graph),
        });
    }

    // double-centred squared distances
    let squared = DMatrix::from_fn(n, n, |i, j| geodesic[i][j].powi(2));
    let row_means: Vec<f64> = (0..n).map(|i| squared.row(i).sum() / n as f64).collect();
    let grand_mean = row_means.iter().sum::<f64>() / n as f64;
    let centered = DMatrix::from_fn(n, n, |i, j| -0.5 * (squared[(i, j)] - row_means[i] - row_means[j] + grand_mean));

    let (values, vectors, _) = top_eigenpairs(centered, COMPONENTS);
    let coordinates = (0..n)
        .map(|i| {
            let mut point = [0.0; 2];
            for (k, (value, vector)) in values.iter().zip(&vectors).enumerate() {
                point[k] = vector[i] * value.max(0.0).sqrt();
            }
            point
        })
        .collect();
    debug!("Isomap over {} samples with {} neighbours", n, k);
    Ok(Embedding {
        coordinates,
        explained_variance_ratio: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn plane(n: usize) -> Vec<Vec<f64>> {
        (0..n)
            .map(|i| {
                let (a, b) = ((i % 5) as f64, (i / 5) as f64);
                vec![a, b, a + b, a - b, 0.5 * a]
            })
            .collect()
    }

    #[test]
    fn test_pca_of_planar_data_is_exact() {
        let embedding = pca(&plane(25)).unwrap();
        assert_eq!(embedding.coordinates.len(), 25);
        assert_relative_eq!(embedding.explained_variance_ratio.unwrap(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pca_ratio_in_unit_interval_both_paths() {
        let wide: Vec<Vec<f64>> = (0..6).map(|i| (0..40).map(|j| ((i * 31 + j * 17) % 13) as f64).collect()).collect();
        let tall: Vec<Vec<f64>> = (0..60).map(|i| (0..4).map(|j| ((i * 7 + j * 5) % 11) as f64).collect()).collect();
        for data in [wide, tall] {
            let ratio = pca(&data).unwrap().explained_variance_ratio.unwrap();
            assert!((0.0..=1.0).contains(&ratio), "ratio {}", ratio);
        }
    }

    #[test]
    fn test_pca_preserves_distances_in_plane() {
        let data: Vec<Vec<f64>> = vec![vec![0.0, 0.0], vec![3.0, 0.0], vec![0.0, 4.0]];
        let embedding = pca(&data).unwrap();
        let [a, b, c] = [embedding.coordinates[0], embedding.coordinates[1], embedding.coordinates[2]];
        let dist = |p: [f64; 2], q: [f64; 2]| ((p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2)).sqrt();
        assert_relative_eq!(dist(a, b), 3.0, epsilon = 1e-9);
        assert_relative_eq!(dist(b, c), 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_isomap_unrolls_a_line() {
        // points on a curve; geodesic distance equals position along it
        let data: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, 0.0]).collect();
        let embedding = isomap(&data, 3).unwrap();
        assert!(embedding.explained_variance_ratio.is_none());
        let x: Vec<f64> = embedding.coordinates.iter().map(|p| p[0]).collect();
        assert_relative_eq!((x[19] - x[0]).abs(), 19.0, epsilon = 1e-6);
    }

    #[test]
    fn test_isomap_disconnected_graph() {
        let mut data: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64]).collect();
        data.extend((0..5).map(|i| vec![1000.0 + i as f64]));
        let err = isomap(&data, 2).unwrap_err();
        assert!(matches!(err, DatasetError::DisconnectedGraph { components: 2 }));
    }

    #[test]
    fn test_too_few_samples() {
        assert!(matches!(pca(&[vec![1.0]]), Err(DatasetError::TooFewSamples { .. })));
    }
}
