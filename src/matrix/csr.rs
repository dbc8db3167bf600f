//! Compressed sparse row storage and the setup-phase matrix kernel.

use crate::error::{AmgError, Result};
#[cfg(feature = "parallel")]
use crate::kernels::PARALLEL_MIN_ROWS;
use crate::matrix::SparseOperator;
use crate::types::Precision;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Sparse matrix in compressed sparse row format.
///
/// Invariants: `row_ptr` has length `rows + 1` with `row_ptr[0] == 0` and
/// `row_ptr[rows] == nnz`; within each row the column indices are distinct.
/// Sorted row order is not globally required; operations that need it
/// (diagonal preference, factorizations) establish it first.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CsrMatrix {
    nrows: usize,
    ncols: usize,
    pub(crate) row_ptr: Vec<usize>,
    pub(crate) col_idx: Vec<usize>,
    pub(crate) values: Vec<Precision>,
}

impl CsrMatrix {
    /// Build from raw CSR arrays, validating the structural invariants.
    pub fn from_raw_parts(
        nrows: usize,
        ncols: usize,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        values: Vec<Precision>,
    ) -> Result<Self> {
        if row_ptr.len() != nrows + 1 {
            return Err(AmgError::DimensionMismatch {
                expected: nrows + 1,
                actual: row_ptr.len(),
                operation: "csr row pointer length",
            });
        }
        if col_idx.len() != values.len() {
            return Err(AmgError::DimensionMismatch {
                expected: col_idx.len(),
                actual: values.len(),
                operation: "csr value length",
            });
        }
        if row_ptr[0] != 0 || row_ptr[nrows] != col_idx.len() {
            return Err(AmgError::DimensionMismatch {
                expected: col_idx.len(),
                actual: row_ptr[nrows],
                operation: "csr row pointer range",
            });
        }
        for w in row_ptr.windows(2) {
            if w[1] < w[0] {
                return Err(AmgError::InvalidParameter {
                    name: "row_ptr",
                    message: "row pointers must be non-decreasing".into(),
                });
            }
        }
        if let Some(&bad) = col_idx.iter().find(|&&j| j >= ncols) {
            return Err(AmgError::DimensionMismatch {
                expected: ncols,
                actual: bad,
                operation: "csr column index",
            });
        }
        Ok(Self { nrows, ncols, row_ptr, col_idx, values })
    }

    /// Build from coordinate triplets, summing duplicates.
    pub fn from_triplets(
        triplets: impl IntoIterator<Item = (usize, usize, Precision)>,
        nrows: usize,
        ncols: usize,
    ) -> Result<Self> {
        let mut entries: Vec<(usize, usize, Precision)> = triplets.into_iter().collect();
        for &(i, j, _) in &entries {
            if i >= nrows || j >= ncols {
                return Err(AmgError::DimensionMismatch {
                    expected: nrows.max(ncols),
                    actual: i.max(j),
                    operation: "triplet index",
                });
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut row_ptr = vec![0usize; nrows + 1];
        let mut col_idx = Vec::with_capacity(entries.len());
        let mut values = Vec::with_capacity(entries.len());
        let mut last = None;
        for (i, j, v) in entries {
            if last == Some((i, j)) {
                *values.last_mut().unwrap() += v;
            } else {
                col_idx.push(j);
                values.push(v);
                row_ptr[i + 1] += 1;
                last = Some((i, j));
            }
        }
        for i in 0..nrows {
            row_ptr[i + 1] += row_ptr[i];
        }
        Self::from_raw_parts(nrows, ncols, row_ptr, col_idx, values)
    }

    /// The n×n identity.
    pub fn identity(n: usize) -> Self {
        Self {
            nrows: n,
            ncols: n,
            row_ptr: (0..=n).collect(),
            col_idx: (0..n).collect(),
            values: vec![1.0; n],
        }
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.nrows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.ncols
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Row pointer array.
    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    /// Column index array.
    pub fn col_indices(&self) -> &[usize] {
        &self.col_idx
    }

    /// Value array.
    pub fn values(&self) -> &[Precision] {
        &self.values
    }

    /// Mutable value array (structure stays fixed).
    pub fn values_mut(&mut self) -> &mut [Precision] {
        &mut self.values
    }

    /// Column indices and values of row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[Precision]) {
        let span = self.row_ptr[i]..self.row_ptr[i + 1];
        (&self.col_idx[span.clone()], &self.values[span])
    }

    /// Iterator over `(column, value)` pairs of row `i`.
    pub fn row_iter(&self, i: usize) -> impl Iterator<Item = (usize, Precision)> + '_ {
        let (cols, vals) = self.row(i);
        cols.iter().copied().zip(vals.iter().copied())
    }

    /// Entry at `(i, j)`, or `None` when not stored.
    pub fn get(&self, i: usize, j: usize) -> Option<Precision> {
        if i >= self.nrows {
            return None;
        }
        self.row_iter(i).find(|&(c, _)| c == j).map(|(_, v)| v)
    }

    /// Two-pass transpose; entries of each transposed row appear in source
    /// row order, so the result has sorted rows whenever every column index
    /// appears at most once per row.
    pub fn transpose(&self) -> CsrMatrix {
        let mut row_ptr = vec![0usize; self.ncols + 1];
        for &j in &self.col_idx {
            row_ptr[j + 1] += 1;
        }
        for j in 0..self.ncols {
            row_ptr[j + 1] += row_ptr[j];
        }
        let mut col_idx = vec![0usize; self.nnz()];
        let mut values = vec![0.0; self.nnz()];
        let mut next = row_ptr.clone();
        for i in 0..self.nrows {
            for (j, v) in self.row_iter(i) {
                let pos = next[j];
                col_idx[pos] = i;
                values[pos] = v;
                next[j] += 1;
            }
        }
        CsrMatrix {
            nrows: self.ncols,
            ncols: self.nrows,
            row_ptr,
            col_idx,
            values,
        }
    }

    /// Symmetric permutation Aₚ = P·A·Pᵀ where `perm[new] = old`.
    pub fn permute(&self, perm: &[usize]) -> Result<CsrMatrix> {
        if perm.len() != self.nrows || self.nrows != self.ncols {
            return Err(AmgError::DimensionMismatch {
                expected: self.nrows,
                actual: perm.len(),
                operation: "symmetric permutation",
            });
        }
        let mut inverse = vec![usize::MAX; self.nrows];
        for (new, &old) in perm.iter().enumerate() {
            if old >= self.nrows || inverse[old] != usize::MAX {
                return Err(AmgError::InvalidParameter {
                    name: "perm",
                    message: "not a permutation of 0..n".into(),
                });
            }
            inverse[old] = new;
        }
        let mut row_ptr = Vec::with_capacity(self.nrows + 1);
        let mut col_idx = Vec::with_capacity(self.nnz());
        let mut values = Vec::with_capacity(self.nnz());
        row_ptr.push(0);
        for &old in perm {
            for (j, v) in self.row_iter(old) {
                col_idx.push(inverse[j]);
                values.push(v);
            }
            row_ptr.push(col_idx.len());
        }
        Ok(CsrMatrix {
            nrows: self.nrows,
            ncols: self.ncols,
            row_ptr,
            col_idx,
            values,
        })
    }

    /// Drop entries with |a_ij| ≤ tol and compact the storage in place.
    /// Returns the number of entries removed. `tol = 0` keeps everything.
    pub fn compress(&mut self, tol: Precision) -> usize {
        let mut write = 0usize;
        let mut read_start = 0usize;
        for i in 0..self.nrows {
            let read_end = self.row_ptr[i + 1];
            for k in read_start..read_end {
                if self.values[k].abs() > tol || tol == 0.0 {
                    self.col_idx[write] = self.col_idx[k];
                    self.values[write] = self.values[k];
                    write += 1;
                }
            }
            read_start = read_end;
            self.row_ptr[i + 1] = write;
        }
        let dropped = self.values.len() - write;
        self.col_idx.truncate(write);
        self.values.truncate(write);
        dropped
    }

    /// Sort every row by column index. Idempotent.
    pub fn sort_rows(&mut self) {
        for i in 0..self.nrows {
            let span = self.row_ptr[i]..self.row_ptr[i + 1];
            let (cols, vals) = (&mut self.col_idx[span.clone()], &mut self.values[span]);
            quicksort_pairs(cols, vals);
        }
    }

    /// Whether every row is sorted by column index.
    pub fn has_sorted_rows(&self) -> bool {
        (0..self.nrows).all(|i| {
            let (cols, _) = self.row(i);
            cols.windows(2).all(|w| w[0] < w[1])
        })
    }

    /// Swap the diagonal entry of each row into the row's first slot,
    /// leaving the remaining entries in their original order. Idempotent.
    pub fn diag_first(&mut self) -> Result<()> {
        for i in 0..self.nrows {
            let start = self.row_ptr[i];
            let end = self.row_ptr[i + 1];
            let pos = (start..end)
                .find(|&k| self.col_idx[k] == i)
                .ok_or(AmgError::MissingDiagonal { row: i })?;
            if pos != start {
                // rotate [start..=pos] right by one to keep off-diagonal order
                self.col_idx[start..=pos].rotate_right(1);
                self.values[start..=pos].rotate_right(1);
            }
        }
        Ok(())
    }

    /// Extract the diagonal of the leading `n` rows.
    pub fn diagonal_head(&self, n: usize) -> Result<Vec<Precision>> {
        let n = n.min(self.nrows);
        let mut diag = Vec::with_capacity(n);
        for i in 0..n {
            let d = self
                .row_iter(i)
                .find(|&(j, _)| j == i)
                .map(|(_, v)| v)
                .ok_or(AmgError::MissingDiagonal { row: i })?;
            diag.push(d);
        }
        Ok(diag)
    }

    /// Symmetric diagonal scaling A ← D⁻¹ᐟ²·A·D⁻¹ᐟ² in place.
    pub fn sym_diag_scale(&mut self) -> Result<()> {
        let diag = self.diagonal_head(self.nrows)?;
        let mut scale = Vec::with_capacity(diag.len());
        for (i, &d) in diag.iter().enumerate() {
            if d <= 0.0 {
                return Err(AmgError::NegativeDiagonal { row: i, value: d });
            }
            scale.push(1.0 / d.sqrt());
        }
        for i in 0..self.nrows {
            let si = scale[i];
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                self.values[k] *= si * scale[self.col_idx[k]];
            }
        }
        Ok(())
    }

    /// Re-base the column indices by ±1 for one-based back-ends.
    ///
    /// The structural invariant `col < ncols` is suspended while shifted up;
    /// callers shift back down before using the matrix in this crate.
    pub fn shift_indices(&mut self, offset: i64) {
        for j in self.col_idx.iter_mut() {
            *j = (*j as i64 + offset) as usize;
        }
    }

    /// Dense copy, used by the coarsest-level factorization.
    pub fn to_dense(&self) -> nalgebra::DMatrix<Precision> {
        let mut dense = nalgebra::DMatrix::zeros(self.nrows, self.ncols);
        for i in 0..self.nrows {
            for (j, v) in self.row_iter(i) {
                dense[(i, j)] += v;
            }
        }
        dense
    }

    /// The sparsity pattern, detached from the values.
    pub fn pattern(&self) -> CsrPattern {
        CsrPattern {
            nrows: self.nrows,
            ncols: self.ncols,
            row_ptr: self.row_ptr.clone(),
            col_idx: self.col_idx.clone(),
        }
    }
}

impl SparseOperator for CsrMatrix {
    fn rows(&self) -> usize {
        self.nrows
    }

    fn cols(&self) -> usize {
        self.ncols
    }

    fn nnz(&self) -> usize {
        self.values.len()
    }

    fn apply(&self, x: &[Precision], y: &mut [Precision]) -> Result<()> {
        check_dims(self.ncols, x.len(), "spmv input")?;
        check_dims(self.nrows, y.len(), "spmv output")?;
        #[cfg(feature = "parallel")]
        {
            if self.nrows >= PARALLEL_MIN_ROWS {
                y.par_iter_mut().enumerate().for_each(|(i, yi)| {
                    let mut sum = 0.0;
                    for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                        sum += self.values[k] * x[self.col_idx[k]];
                    }
                    *yi = sum;
                });
                return Ok(());
            }
        }
        for (i, yi) in y.iter_mut().enumerate() {
            let mut sum = 0.0;
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                sum += self.values[k] * x[self.col_idx[k]];
            }
            *yi = sum;
        }
        Ok(())
    }

    fn apply_add(&self, x: &[Precision], y: &mut [Precision]) -> Result<()> {
        check_dims(self.ncols, x.len(), "spmv input")?;
        check_dims(self.nrows, y.len(), "spmv output")?;
        for (i, yi) in y.iter_mut().enumerate() {
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                *yi += self.values[k] * x[self.col_idx[k]];
            }
        }
        Ok(())
    }

    fn apply_transpose(&self, x: &[Precision], y: &mut [Precision]) -> Result<()> {
        check_dims(self.nrows, x.len(), "transposed spmv input")?;
        check_dims(self.ncols, y.len(), "transposed spmv output")?;
        y.fill(0.0);
        for i in 0..self.nrows {
            let xi = x[i];
            if xi == 0.0 {
                continue;
            }
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                y[self.col_idx[k]] += self.values[k] * xi;
            }
        }
        Ok(())
    }

    fn diagonal(&self) -> Result<Vec<Precision>> {
        self.diagonal_head(self.nrows)
    }
}

/// Value-less CSR shape, used for strength graphs and their powers.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CsrPattern {
    pub(crate) nrows: usize,
    pub(crate) ncols: usize,
    pub(crate) row_ptr: Vec<usize>,
    pub(crate) col_idx: Vec<usize>,
}

impl CsrPattern {
    /// Build from per-row adjacency lists.
    pub fn from_rows(nrows: usize, ncols: usize, rows: Vec<Vec<usize>>) -> Self {
        debug_assert_eq!(rows.len(), nrows);
        let mut row_ptr = Vec::with_capacity(nrows + 1);
        let mut col_idx = Vec::new();
        row_ptr.push(0);
        for row in rows {
            col_idx.extend(row);
            row_ptr.push(col_idx.len());
        }
        Self { nrows, ncols, row_ptr, col_idx }
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.nrows
    }

    /// Number of stored edges.
    pub fn nnz(&self) -> usize {
        self.col_idx.len()
    }

    /// Neighbors of row `i`.
    pub fn row(&self, i: usize) -> &[usize] {
        &self.col_idx[self.row_ptr[i]..self.row_ptr[i + 1]]
    }

    /// Degree of row `i`.
    pub fn degree(&self, i: usize) -> usize {
        self.row_ptr[i + 1] - self.row_ptr[i]
    }

    /// Pattern transpose via the same count-then-scatter scheme as the
    /// numeric transpose.
    pub fn transpose(&self) -> CsrPattern {
        let mut row_ptr = vec![0usize; self.ncols + 1];
        for &j in &self.col_idx {
            row_ptr[j + 1] += 1;
        }
        for j in 0..self.ncols {
            row_ptr[j + 1] += row_ptr[j];
        }
        let mut col_idx = vec![0usize; self.nnz()];
        let mut next = row_ptr.clone();
        for i in 0..self.nrows {
            for &j in self.row(i) {
                col_idx[next[j]] = i;
                next[j] += 1;
            }
        }
        CsrPattern {
            nrows: self.ncols,
            ncols: self.nrows,
            row_ptr,
            col_idx,
        }
    }
}

fn check_dims(expected: usize, actual: usize, operation: &'static str) -> Result<()> {
    if expected != actual {
        return Err(AmgError::DimensionMismatch { expected, actual, operation });
    }
    Ok(())
}

/// Recursive partition sort of a row's `(column, value)` pairs.
fn quicksort_pairs(cols: &mut [usize], vals: &mut [Precision]) {
    let n = cols.len();
    if n <= 1 {
        return;
    }
    let mid = n / 2;
    cols.swap(mid, n - 1);
    vals.swap(mid, n - 1);
    let pivot = cols[n - 1];
    let mut store = 0usize;
    for i in 0..n - 1 {
        if cols[i] < pivot {
            cols.swap(i, store);
            vals.swap(i, store);
            store += 1;
        }
    }
    cols.swap(store, n - 1);
    vals.swap(store, n - 1);
    let (cl, cr) = cols.split_at_mut(store);
    let (vl, vr) = vals.split_at_mut(store);
    quicksort_pairs(cl, vl);
    quicksort_pairs(&mut cr[1..], &mut vr[1..]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn sample() -> CsrMatrix {
        // [ 4 -1  0]
        // [-1  4 -1]
        // [ 0 -1  4]
        CsrMatrix::from_triplets(
            vec![
                (0, 0, 4.0),
                (0, 1, -1.0),
                (1, 0, -1.0),
                (1, 1, 4.0),
                (1, 2, -1.0),
                (2, 1, -1.0),
                (2, 2, 4.0),
            ],
            3,
            3,
        )
        .unwrap()
    }

    #[test]
    fn triplets_sum_duplicates() {
        let a = CsrMatrix::from_triplets(vec![(0, 0, 1.0), (0, 0, 2.0), (1, 1, 5.0)], 2, 2)
            .unwrap();
        assert_eq!(a.nnz(), 2);
        assert_relative_eq!(a.get(0, 0).unwrap(), 3.0);
    }

    #[test]
    fn empty_rows_get_valid_pointers() {
        let a = CsrMatrix::from_triplets(vec![(0, 0, 1.0), (3, 2, 2.0)], 4, 4).unwrap();
        assert_eq!(a.row(1).0.len(), 0);
        assert_eq!(a.row(2).0.len(), 0);
        assert_relative_eq!(a.get(3, 2).unwrap(), 2.0);
    }

    #[test]
    fn spmv_matches_dense() {
        let a = sample();
        let x = vec![1.0, 2.0, 3.0];
        let mut y = vec![0.0; 3];
        a.apply(&x, &mut y).unwrap();
        assert_eq!(y, vec![2.0, 4.0, 10.0]);
    }

    #[test]
    fn transpose_is_involution() {
        let a = sample();
        let att = a.transpose().transpose();
        assert_eq!(a, att);
    }

    #[test]
    fn transpose_of_rectangular() {
        let a = CsrMatrix::from_triplets(vec![(0, 0, 1.0), (0, 2, 2.0), (1, 1, 3.0)], 2, 3)
            .unwrap();
        let at = a.transpose();
        assert_eq!(at.rows(), 3);
        assert_eq!(at.cols(), 2);
        assert_relative_eq!(at.get(2, 0).unwrap(), 2.0);
    }

    #[test]
    fn compress_zero_tolerance_is_noop() {
        let mut a = sample();
        let before = a.clone();
        assert_eq!(a.compress(0.0), 0);
        assert_eq!(a, before);
    }

    #[test]
    fn compress_drops_small_entries() {
        let mut a = CsrMatrix::from_triplets(
            vec![(0, 0, 1.0), (0, 1, 1e-12), (1, 1, 2.0)],
            2,
            2,
        )
        .unwrap();
        assert_eq!(a.compress(1e-10), 1);
        assert_eq!(a.nnz(), 2);
        assert_eq!(a.get(0, 1), None);
    }

    #[test]
    fn diag_first_moves_and_is_idempotent() {
        let mut a = CsrMatrix::from_triplets(
            vec![(0, 1, -1.0), (0, 0, 4.0), (1, 0, -1.0), (1, 1, 4.0)],
            2,
            2,
        )
        .unwrap();
        a.diag_first().unwrap();
        let (cols, vals) = a.row(0);
        assert_eq!(cols[0], 0);
        assert_relative_eq!(vals[0], 4.0);
        let snapshot = a.clone();
        a.diag_first().unwrap();
        assert_eq!(a, snapshot);
    }

    #[test]
    fn diag_first_reports_missing_diagonal() {
        let mut a = CsrMatrix::from_triplets(vec![(0, 1, 1.0), (1, 0, 1.0)], 2, 2).unwrap();
        assert!(matches!(
            a.diag_first(),
            Err(AmgError::MissingDiagonal { row: 0 })
        ));
    }

    #[test]
    fn sort_rows_is_idempotent() {
        let mut a = CsrMatrix::from_raw_parts(
            2,
            3,
            vec![0, 3, 4],
            vec![2, 0, 1, 1],
            vec![3.0, 1.0, 2.0, 4.0],
        )
        .unwrap();
        a.sort_rows();
        assert!(a.has_sorted_rows());
        let snapshot = a.clone();
        a.sort_rows();
        assert_eq!(a, snapshot);
    }

    #[test]
    fn symmetric_scaling_unit_diagonal() {
        let mut a = sample();
        a.sym_diag_scale().unwrap();
        for i in 0..3 {
            assert_relative_eq!(a.get(i, i).unwrap(), 1.0);
        }
    }

    #[test]
    fn permutation_relabels_symmetrically() {
        let a = sample();
        let p = a.permute(&[2, 1, 0]).unwrap();
        // entry (0,1) of the permuted matrix is entry (2,1) of A
        assert_relative_eq!(p.get(0, 1).unwrap(), a.get(2, 1).unwrap());
        assert_relative_eq!(p.get(0, 0).unwrap(), a.get(2, 2).unwrap());
    }

    #[test]
    fn transposed_apply() {
        let a = CsrMatrix::from_triplets(vec![(0, 1, 2.0), (1, 0, 3.0)], 2, 2).unwrap();
        let x = vec![1.0, 1.0];
        let mut y = vec![0.0; 2];
        a.apply_transpose(&x, &mut y).unwrap();
        assert_eq!(y, vec![3.0, 2.0]);
    }

    #[test]
    fn pattern_transpose_roundtrip() {
        let p = sample().pattern();
        let ptt = p.transpose().transpose();
        assert_eq!(p, ptt);
    }

    #[test]
    fn shift_indices_roundtrip() {
        let mut a = sample();
        let snapshot = a.clone();
        a.shift_indices(1);
        a.shift_indices(-1);
        assert_eq!(a, snapshot);
    }

    proptest! {
        #[test]
        fn transpose_involution_random(entries in proptest::collection::vec(
            (0usize..8, 0usize..8, -10.0f64..10.0), 1..40,
        )) {
            let a = CsrMatrix::from_triplets(entries, 8, 8).unwrap();
            prop_assert_eq!(a.transpose().transpose(), a);
        }

        #[test]
        fn sort_then_sorted(entries in proptest::collection::vec(
            (0usize..6, 0usize..6, -5.0f64..5.0), 1..30,
        )) {
            let mut a = CsrMatrix::from_triplets(entries, 6, 6).unwrap();
            a.sort_rows();
            prop_assert!(a.has_sorted_rows());
        }
    }
}
