//! Incomplete LU factorizations used as smoothers and preconditioners.
//!
//! Both variants store the combined factors in one row-sorted CSR: the
//! strict lower part holds L (unit diagonal implied), the diagonal and
//! upper part hold U. A smoothing step is one forward-then-backward
//! triangular solve against the current residual, added to the iterate.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use crate::error::{AmgError, Result};
use crate::matrix::{CsrMatrix, SparseOperator};
use crate::types::{Precision, SMALL};

/// Combined L and U factors of an incomplete factorization.
#[derive(Debug, Clone)]
pub struct IluFactorization {
    n: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<Precision>,
    diag_pos: Vec<usize>,
}

/// Level-of-fill factorization ILU(k).
///
/// Fill entries inherit level `lev(i,k) + lev(k,j) + 1`; entries above the
/// requested fill level are dropped. `fill = 0` reproduces the pattern of A.
pub fn ilu_k(a: &CsrMatrix, fill: usize) -> Result<IluFactorization> {
    let n = a.rows();
    let mut factors = FactorBuilder::new(n);

    // workspace per row: column -> (value, fill level)
    for i in 0..n {
        let mut work: BTreeMap<usize, (Precision, usize)> = BTreeMap::new();
        for (j, v) in a.row_iter(i) {
            work.insert(j, (v, 0));
        }
        if !work.contains_key(&i) {
            return Err(AmgError::MissingDiagonal { row: i });
        }

        let mut last: Option<usize> = None;
        loop {
            let lower = match last {
                None => Unbounded,
                Some(k) => Excluded(k),
            };
            let next = work
                .range((lower, Excluded(i)))
                .next()
                .map(|(&k, _)| k);
            let Some(k) = next else { break };
            last = Some(k);

            let (wk, lev_k) = work[&k];
            if lev_k > fill {
                work.remove(&k);
                continue;
            }
            let pivot = factors.diag_value(k);
            if pivot.abs() < SMALL {
                return Err(AmgError::SingularPivot { row: k, context: "ilu factorization" });
            }
            let lik = wk / pivot;
            work.insert(k, (lik, lev_k));
            for (j, ukj, lev_kj) in factors.upper_entries(k) {
                let new_lev = lev_k + lev_kj + 1;
                match work.get_mut(&j) {
                    Some((v, lev)) => {
                        *v -= lik * ukj;
                        *lev = (*lev).min(new_lev);
                    }
                    None if new_lev <= fill => {
                        work.insert(j, (-lik * ukj, new_lev));
                    }
                    None => {}
                }
            }
        }

        factors.push_row(
            i,
            work.into_iter()
                .filter(|&(_, (_, lev))| lev <= fill)
                .map(|(j, (v, lev))| (j, v, lev)),
        )?;
    }
    factors.finish()
}

/// Dual-threshold factorization ILUT(lfil, droptol).
///
/// Entries below `droptol`·‖a_i‖ are dropped during elimination, and each
/// row keeps at most `lfil` lower and `lfil` upper entries beyond the
/// diagonal, largest magnitudes first.
pub fn ilut(a: &CsrMatrix, lfil: usize, droptol: Precision) -> Result<IluFactorization> {
    let n = a.rows();
    let mut factors = FactorBuilder::new(n);

    for i in 0..n {
        let mut work: BTreeMap<usize, Precision> = BTreeMap::new();
        let mut norm = 0.0;
        let mut count = 0usize;
        for (j, v) in a.row_iter(i) {
            work.insert(j, v);
            norm += v * v;
            count += 1;
        }
        if !work.contains_key(&i) {
            return Err(AmgError::MissingDiagonal { row: i });
        }
        let tau = droptol * (norm / count.max(1) as Precision).sqrt();

        let mut last: Option<usize> = None;
        loop {
            let lower = match last {
                None => Unbounded,
                Some(k) => Excluded(k),
            };
            let next = work
                .range((lower, Excluded(i)))
                .next()
                .map(|(&k, _)| k);
            let Some(k) = next else { break };
            last = Some(k);

            let pivot = factors.diag_value(k);
            if pivot.abs() < SMALL {
                return Err(AmgError::SingularPivot { row: k, context: "ilu factorization" });
            }
            let lik = work[&k] / pivot;
            if lik.abs() < tau {
                work.remove(&k);
                continue;
            }
            work.insert(k, lik);
            for (j, ukj, _) in factors.upper_entries(k) {
                *work.entry(j).or_insert(0.0) -= lik * ukj;
            }
        }

        // keep the diagonal plus the lfil largest entries of each part
        let mut lower: Vec<(usize, Precision)> = Vec::new();
        let mut upper: Vec<(usize, Precision)> = Vec::new();
        let mut diag = 0.0;
        for (j, v) in work {
            if j == i {
                diag = v;
            } else if v.abs() >= tau {
                if j < i {
                    lower.push((j, v));
                } else {
                    upper.push((j, v));
                }
            }
        }
        keep_largest(&mut lower, lfil);
        keep_largest(&mut upper, lfil);
        let mut row: Vec<(usize, Precision, usize)> = lower
            .into_iter()
            .chain(std::iter::once((i, diag)))
            .chain(upper)
            .map(|(j, v)| (j, v, 0))
            .collect();
        row.sort_by_key(|&(j, _, _)| j);
        factors.push_row(i, row)?;
    }
    factors.finish()
}

fn keep_largest(entries: &mut Vec<(usize, Precision)>, keep: usize) {
    if entries.len() > keep {
        entries.sort_by(|a, b| b.1.abs().partial_cmp(&a.1.abs()).unwrap());
        entries.truncate(keep);
    }
}

/// Incremental storage for the rows of a factorization in progress.
struct FactorBuilder {
    n: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<Precision>,
    levels: Vec<usize>,
    diag_pos: Vec<usize>,
}

impl FactorBuilder {
    fn new(n: usize) -> Self {
        Self {
            n,
            row_ptr: vec![0],
            col_idx: Vec::new(),
            values: Vec::new(),
            levels: Vec::new(),
            diag_pos: Vec::new(),
        }
    }

    fn diag_value(&self, row: usize) -> Precision {
        self.values[self.diag_pos[row]]
    }

    fn upper_entries(&self, row: usize) -> Vec<(usize, Precision, usize)> {
        let span = self.diag_pos[row] + 1..self.row_ptr[row + 1];
        span.map(|k| (self.col_idx[k], self.values[k], self.levels[k]))
            .collect()
    }

    fn push_row(
        &mut self,
        row: usize,
        entries: impl IntoIterator<Item = (usize, Precision, usize)>,
    ) -> Result<()> {
        let mut diag = None;
        for (j, v, lev) in entries {
            if j == row {
                diag = Some(self.col_idx.len());
            }
            self.col_idx.push(j);
            self.values.push(v);
            self.levels.push(lev);
        }
        let diag = diag.ok_or(AmgError::MissingDiagonal { row })?;
        self.diag_pos.push(diag);
        self.row_ptr.push(self.col_idx.len());
        Ok(())
    }

    fn finish(self) -> Result<IluFactorization> {
        // the final pivot is only touched by triangular solves; tiny values
        // surface there
        Ok(IluFactorization {
            n: self.n,
            row_ptr: self.row_ptr,
            col_idx: self.col_idx,
            values: self.values,
            diag_pos: self.diag_pos,
        })
    }
}

impl IluFactorization {
    /// Problem size.
    pub fn len(&self) -> usize {
        self.n
    }

    /// Whether the factorization is empty.
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Stored entries across both factors.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Solve L·U·z = r in place: `rz` enters holding r and leaves holding z.
    pub fn solve_in_place(&self, rz: &mut [Precision]) -> Result<()> {
        // forward: unit lower part
        for i in 0..self.n {
            let mut sum = rz[i];
            for k in self.row_ptr[i]..self.diag_pos[i] {
                sum -= self.values[k] * rz[self.col_idx[k]];
            }
            rz[i] = sum;
        }
        // backward: upper part with pivots
        for i in (0..self.n).rev() {
            let mut sum = rz[i];
            for k in self.diag_pos[i] + 1..self.row_ptr[i + 1] {
                sum -= self.values[k] * rz[self.col_idx[k]];
            }
            let pivot = self.values[self.diag_pos[i]];
            if pivot.abs() < SMALL {
                return Err(AmgError::SingularPivot { row: i, context: "triangular solve" });
            }
            rz[i] = sum / pivot;
        }
        Ok(())
    }

    /// One smoothing step: x ← x + (LU)⁻¹·(b − A·x).
    pub fn smooth(
        &self,
        a: &CsrMatrix,
        x: &mut [Precision],
        b: &[Precision],
        work: &mut [Precision],
    ) -> Result<()> {
        a.residual(x, b, work)?;
        self.solve_in_place(work)?;
        for (xv, &w) in x.iter_mut().zip(work.iter()) {
            *xv += w;
        }
        Ok(())
    }
}
