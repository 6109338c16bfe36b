//! Dense and sparse (COO) matrices for phase-1 scoring.

use rayon::prelude::*;

/// Row-major `rows x dim` matrix of f32.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DenseMatrix {
    data: Vec<f32>,
    rows: usize,
    dim: usize,
}

impl DenseMatrix {
    /// Wrap a flat buffer. Returns `None` when its length is not `rows * dim`.
    pub fn from_flat(data: Vec<f32>, rows: usize, dim: usize) -> Option<Self> {
        (rows.checked_mul(dim) == Some(data.len())).then_some(Self { data, rows, dim })
    }

    /// Stack equally sized rows.
    pub fn from_rows(rows: &[Vec<f32>], dim: usize) -> Option<Self> {
        let mut data = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            if row.len() != dim {
                return None;
            }
            data.extend_from_slice(row);
        }
        Some(Self {
            data,
            rows: rows.len(),
            dim,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn row(&self, i: usize) -> Option<&[f32]> {
        (i < self.rows).then(|| &self.data[i * self.dim..(i + 1) * self.dim])
    }

    /// `self · v`, one score per row. `v` must have length `dim`.
    pub fn matvec(&self, v: &[f32]) -> Vec<f32> {
        debug_assert_eq!(v.len(), self.dim);
        if self.dim == 0 {
            return vec![0.0; self.rows];
        }
        self.data
            .par_chunks_exact(self.dim)
            .map(|row| dot(row, v))
            .collect()
    }
}

/// Sparse matrix in coordinate form.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CooMatrix {
    pub rows: Vec<u32>,
    pub cols: Vec<u32>,
    pub values: Vec<f32>,
    pub shape: (usize, usize),
}

impl CooMatrix {
    pub fn new(shape: (usize, usize)) -> Self {
        Self {
            shape,
            ..Self::default()
        }
    }

    pub fn push(&mut self, row: u32, col: u32, value: f32) {
        self.rows.push(row);
        self.cols.push(col);
        self.values.push(value);
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// `self · v` where `v` is a dense vector over columns. Columns beyond
    /// `v.len()` contribute nothing.
    pub fn matvec(&self, v: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0f32; self.shape.0];
        for ((&r, &c), &x) in self.rows.iter().zip(&self.cols).zip(&self.values) {
            if let Some(q) = v.get(c as usize) {
                out[r as usize] += x * q;
            }
        }
        out
    }
}

/// Plain dot product; the compiler auto-vectorizes this loop.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
