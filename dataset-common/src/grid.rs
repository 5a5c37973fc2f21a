use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, Result};

/// A dense row-major 2D grid of `f64` values.
///
/// Snapshots, per-pixel statistics and embeddings are all stored as grids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GridParts")]
pub struct Grid {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

// Deserialization goes through this so a decoded grid always satisfies rows * cols == len.
#[derive(Deserialize)]
struct GridParts {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl TryFrom<GridParts> for Grid {
    type Error = DatasetError;

    fn try_from(parts: GridParts) -> Result<Self> {
        Grid::new(parts.rows, parts.cols, parts.data)
    }
}

impl Grid {
    /// Wraps `data` as a `rows x cols` grid, failing if the length does not match.
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(DatasetError::ShapeMismatch {
                left: (rows, cols),
                right: (data.len(), 1),
            });
        }
        Ok(Self { rows, cols, data })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::filled(rows, cols, 0.0)
    }

    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        Self { rows, cols, data: vec![value; rows * cols] }
    }

    /// Builds a grid by evaluating `f(row, col)` for every cell.
    pub fn from_fn<F: FnMut(usize, usize) -> f64>(rows: usize, cols: usize, mut f: F) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self { rows, cols, data }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline(always)]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    #[inline(always)]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.cols + col] = value;
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// Smallest value; NaN if the grid is empty.
    pub fn min(&self) -> f64 {
        self.data.iter().copied().fold(f64::NAN, f64::min)
    }

    /// Largest value; NaN if the grid is empty.
    pub fn max(&self) -> f64 {
        self.data.iter().copied().fold(f64::NAN, f64::max)
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    pub fn map<F: Fn(f64) -> f64>(&self, f: F) -> Self {
        Self {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Elementwise combination of two equally shaped grids.
    pub fn zip_map<F: Fn(f64, f64) -> f64>(&self, other: &Grid, f: F) -> Result<Self> {
        self.check_same_shape(other)?;
        Ok(Self {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().zip(&other.data).map(|(&a, &b)| f(a, b)).collect(),
        })
    }

    pub fn check_same_shape(&self, other: &Grid) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(DatasetError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_wrong_length() {
        assert!(Grid::new(2, 3, vec![0.0; 5]).is_err());
        assert!(Grid::new(2, 3, vec![0.0; 6]).is_ok());
    }

    #[test]
    fn test_from_fn_is_row_major() {
        let grid = Grid::from_fn(2, 3, |r, c| (r * 10 + c) as f64);
        assert_eq!(grid.as_slice(), &[0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);
        assert_eq!(grid.get(1, 2), 12.0);
    }

    #[test]
    fn test_zip_map_checks_shape() {
        let a = Grid::zeros(2, 2);
        let b = Grid::zeros(2, 3);
        assert!(matches!(a.zip_map(&b, |x, y| x + y), Err(DatasetError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_min_max() {
        let grid = Grid::new(1, 4, vec![3.0, -1.0, 7.5, 0.0]).unwrap();
        assert_eq!(grid.min(), -1.0);
        assert_eq!(grid.max(), 7.5);
    }
}
