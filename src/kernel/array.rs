//! Dense row-major arrays used throughout the factorization.
//!
//! Kernels are stored as a [`Tensor3`] indexed `[channel][motif][lag]`,
//! activations and signals as a [`Matrix`] indexed `[row][time]`. Both keep a
//! flat `Vec<f64>` so whole-array passes stay cache friendly.

use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// A 2-axis row-major array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Create a zero matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Create a matrix from raw row-major data.
    ///
    /// # Panics
    /// Panics if `data.len() != rows * cols`.
    pub fn from_data(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        assert_eq!(
            data.len(),
            rows * cols,
            "Matrix data length mismatch: {}x{} needs {}, got {}",
            rows,
            cols,
            rows * cols,
            data.len()
        );
        Self { rows, cols, data }
    }

    /// Build a matrix from equal-length rows.
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let cols = rows.first().map_or(0, |r| r.len());
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            assert_eq!(row.len(), cols, "Ragged rows in Matrix::from_rows");
            data.extend_from_slice(row);
        }
        Self {
            rows: rows.len(),
            cols,
            data,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn row(&self, r: usize) -> &[f64] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    pub fn row_mut(&mut self, r: usize) -> &mut [f64] {
        &mut self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// Sum of squared entries.
    pub fn sum_sq(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum()
    }

    /// True if every entry is finite.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    #[inline]
    fn index(&self, (r, c): (usize, usize)) -> &Self::Output {
        &self.data[r * self.cols + c]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    #[inline]
    fn index_mut(&mut self, (r, c): (usize, usize)) -> &mut Self::Output {
        &mut self.data[r * self.cols + c]
    }
}

/// A 3-axis row-major array, indexed `[i][j][k]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tensor3 {
    dims: [usize; 3],
    data: Vec<f64>,
}

impl Tensor3 {
    pub fn zeros(d0: usize, d1: usize, d2: usize) -> Self {
        Self {
            dims: [d0, d1, d2],
            data: vec![0.0; d0 * d1 * d2],
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    #[inline]
    fn offset(&self, i: usize, j: usize, k: usize) -> usize {
        (i * self.dims[1] + j) * self.dims[2] + k
    }

    /// Contiguous lane along the last axis.
    pub fn lane(&self, i: usize, j: usize) -> &[f64] {
        let start = self.offset(i, j, 0);
        &self.data[start..start + self.dims[2]]
    }

    pub fn lane_mut(&mut self, i: usize, j: usize) -> &mut [f64] {
        let start = self.offset(i, j, 0);
        let len = self.dims[2];
        &mut self.data[start..start + len]
    }

    /// Slice along the middle axis: a `[d0][d2]` matrix for fixed `j`.
    pub fn slice_mid(&self, j: usize) -> Matrix {
        let [d0, _, d2] = self.dims;
        let mut out = Matrix::zeros(d0, d2);
        for i in 0..d0 {
            out.row_mut(i).copy_from_slice(self.lane(i, j));
        }
        out
    }

    /// Overwrite the middle-axis slice `j` with a `[d0][d2]` matrix.
    pub fn set_slice_mid(&mut self, j: usize, m: &Matrix) {
        let [d0, _, d2] = self.dims;
        assert_eq!((m.rows(), m.cols()), (d0, d2), "Slice shape mismatch");
        for i in 0..d0 {
            self.lane_mut(i, j).copy_from_slice(m.row(i));
        }
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

impl Index<(usize, usize, usize)> for Tensor3 {
    type Output = f64;

    #[inline]
    fn index(&self, (i, j, k): (usize, usize, usize)) -> &Self::Output {
        &self.data[self.offset(i, j, k)]
    }
}

impl IndexMut<(usize, usize, usize)> for Tensor3 {
    #[inline]
    fn index_mut(&mut self, (i, j, k): (usize, usize, usize)) -> &mut Self::Output {
        let o = self.offset(i, j, k);
        &mut self.data[o]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_indexing() {
        let mut m = Matrix::zeros(2, 3);
        m[(1, 2)] = 5.0;
        assert_eq!(m.row(1), &[0.0, 0.0, 5.0]);
        assert_eq!(m.data()[5], 5.0);
    }

    #[test]
    fn test_tensor_mid_slice() {
        let mut t = Tensor3::zeros(2, 3, 4);
        t[(1, 2, 3)] = 7.0;
        let s = t.slice_mid(2);
        assert_eq!((s.rows(), s.cols()), (2, 4));
        assert_eq!(s[(1, 3)], 7.0);

        let mut replacement = Matrix::zeros(2, 4);
        replacement[(0, 0)] = 1.0;
        t.set_slice_mid(0, &replacement);
        assert_eq!(t[(0, 0, 0)], 1.0);
        assert_eq!(t[(1, 2, 3)], 7.0);
    }
}
