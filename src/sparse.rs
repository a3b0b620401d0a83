use ndarray::Array2;

use crate::error::{PipelineError, Result};

// ---------------------------------------------------------------------------
// Compressed sparse row matrix
// ---------------------------------------------------------------------------

/// Row-compressed `f32` matrix. Explicit zeros are never stored.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CsrMatrix {
    nrows: usize,
    ncols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f32>,
}

impl CsrMatrix {
    /// Empty matrix with `ncols` columns; grow it with [`CsrMatrix::push_row`].
    pub fn new(ncols: usize) -> Self {
        CsrMatrix {
            nrows: 0,
            ncols,
            indptr: vec![0],
            indices: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Append one row given as `(column, value)` pairs in ascending column order.
    pub fn push_row<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (usize, f32)>,
    {
        for (col, value) in entries {
            debug_assert!(col < self.ncols);
            if value != 0.0 {
                self.indices.push(col);
                self.data.push(value);
            }
        }
        self.indptr.push(self.indices.len());
        self.nrows += 1;
    }

    /// Build from a dense row-major slice of `nrows × ncols` values.
    pub fn from_dense(values: &[f32], ncols: usize) -> Self {
        let mut m = CsrMatrix::new(ncols);
        if ncols == 0 {
            return m;
        }
        for row in values.chunks_exact(ncols) {
            m.push_row(row.iter().copied().enumerate());
        }
        m
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of stored non-zero entries.
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// Stored `(column, value)` pairs of row `i`.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, f32)> + '_ {
        let span = self.indptr[i]..self.indptr[i + 1];
        self.indices[span.clone()]
            .iter()
            .copied()
            .zip(self.data[span].iter().copied())
    }

    /// `self · other`, accumulated in `f64` and returned dense.
    pub fn dot(&self, other: &CsrMatrix) -> Result<Array2<f64>> {
        if self.ncols != other.nrows {
            return Err(PipelineError::Shape(format!(
                "cannot multiply {}×{} by {}×{}",
                self.nrows, self.ncols, other.nrows, other.ncols
            )));
        }
        let mut out = Array2::<f64>::zeros((self.nrows, other.ncols));
        for i in 0..self.nrows {
            for (k, a) in self.row(i) {
                for (j, b) in other.row(k) {
                    out[[i, j]] += f64::from(a) * f64::from(b);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeros_are_dropped() {
        let m = CsrMatrix::from_dense(&[0.0, 1.0, 0.0, 0.0, 0.0, 2.0], 3);
        assert_eq!(m.nrows(), 2);
        assert_eq!(m.nnz(), 2);
        assert_eq!(m.row(0).collect::<Vec<_>>(), vec![(1, 1.0)]);
        assert_eq!(m.row(1).collect::<Vec<_>>(), vec![(2, 2.0)]);
    }

    #[test]
    fn dot_matches_dense_product() {
        // [[1, 0, 2], [0, 3, 0]] · [[1, 2], [0, 1], [4, 0]]
        let a = CsrMatrix::from_dense(&[1.0, 0.0, 2.0, 0.0, 3.0, 0.0], 3);
        let b = CsrMatrix::from_dense(&[1.0, 2.0, 0.0, 1.0, 4.0, 0.0], 2);
        let c = a.dot(&b).unwrap();
        assert_eq!(c, ndarray::arr2(&[[9.0, 2.0], [0.0, 3.0]]));
    }

    #[test]
    fn dot_rejects_inner_mismatch() {
        let a = CsrMatrix::from_dense(&[1.0, 2.0], 2);
        let b = CsrMatrix::from_dense(&[1.0, 2.0, 3.0], 1);
        assert!(matches!(a.dot(&b), Err(PipelineError::Shape(_))));
    }

    #[test]
    fn empty_rows_are_kept() {
        let mut m = CsrMatrix::new(4);
        m.push_row(Vec::new());
        m.push_row(vec![(3, 5.0)]);
        assert_eq!(m.nrows(), 2);
        assert_eq!(m.row(0).count(), 0);
    }
}
