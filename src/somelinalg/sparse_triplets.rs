//! Coordinate (triplet) sparse matrix used to carry Jacobians and Hessians between the
//! transcription, the scaling layer and the interior point solver.
//! Duplicates are allowed while assembling and summed by [`SparseTriplets::compress`].
use faer::sparse::{SparseColMat, Triplet};
use nalgebra::{DMatrix, DVector};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SparseTriplets {
    pub nrows: usize,
    pub ncols: usize,
    /// (row, col, value)
    pub entries: Vec<(usize, usize, f64)>,
}

impl SparseTriplets {
    pub fn new(nrows: usize, ncols: usize) -> Self {
        SparseTriplets {
            nrows,
            ncols,
            entries: Vec::new(),
        }
    }

    pub fn with_capacity(nrows: usize, ncols: usize, capacity: usize) -> Self {
        SparseTriplets {
            nrows,
            ncols,
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.nrows && col < self.ncols);
        self.entries.push((row, col, value));
    }

    pub fn extend(&mut self, other: &SparseTriplets) {
        self.entries.extend_from_slice(&other.entries);
    }

    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// sort column-major and sum duplicates; explicit zeros are kept so the
    /// structure stays the same between evaluations
    pub fn compress(&mut self) {
        self.entries.sort_by(|a, b| (a.1, a.0).cmp(&(b.1, b.0)));
        let mut merged: Vec<(usize, usize, f64)> = Vec::with_capacity(self.entries.len());
        for &(r, c, v) in &self.entries {
            match merged.last_mut() {
                Some(last) if last.0 == r && last.1 == c => last.2 += v,
                _ => merged.push((r, c, v)),
            }
        }
        self.entries = merged;
    }

    /// Merged copy with exact zeros removed, so the factorization sees the numerical
    /// structure rather than the evaluation structure.
    pub fn without_zeros(&self) -> SparseTriplets {
        let mut merged = self.clone();
        merged.compress();
        merged.entries.retain(|&(_, _, v)| v != 0.0);
        merged
    }

    /// y = A x
    pub fn mul_vec(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut y = DVector::zeros(self.nrows);
        for &(r, c, v) in &self.entries {
            y[r] += v * x[c];
        }
        y
    }

    /// y = Aᵀ x
    pub fn transpose_mul_vec(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut y = DVector::zeros(self.ncols);
        for &(r, c, v) in &self.entries {
            y[c] += v * x[r];
        }
        y
    }

    /// y = A x for a lower triangle storing a symmetric matrix
    pub fn symmetric_mul_vec(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut y = DVector::zeros(self.nrows);
        for &(r, c, v) in &self.entries {
            y[r] += v * x[c];
            if r != c {
                y[c] += v * x[r];
            }
        }
        y
    }

    /// row-wise maximum absolute value
    pub fn row_max_abs(&self) -> Vec<f64> {
        let mut m = vec![0.0_f64; self.nrows];
        for &(r, _, v) in &self.entries {
            m[r] = m[r].max(v.abs());
        }
        m
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.nrows, self.ncols);
        for &(r, c, v) in &self.entries {
            dense[(r, c)] += v;
        }
        dense
    }

    /// Symmetric dense matrix from a lower triangle.
    pub fn to_dense_symmetric(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.nrows, self.ncols);
        for &(r, c, v) in &self.entries {
            dense[(r, c)] += v;
            if r != c {
                dense[(c, r)] += v;
            }
        }
        dense
    }

    /// faer compressed column matrix; duplicates are merged first
    pub fn to_faer(&self) -> Option<SparseColMat<usize, f64>> {
        let mut merged = self.clone();
        merged.compress();
        let triplets: Vec<Triplet<usize, usize, f64>> = merged
            .entries
            .iter()
            .map(|&(r, c, v)| Triplet::new(r, c, v))
            .collect();
        SparseColMat::<usize, f64>::try_new_from_triplets(self.nrows, self.ncols, &triplets).ok()
    }
}
