//! Galerkin triple product R·A·P.
//!
//! Two-pass symbolic-then-numeric algorithm. Pass one counts the entries of
//! each product row through a marker array tagged by row index; pass two
//! fills column indices and values, accumulating a_rk·a_kl·p_lj into the
//! slot recorded by the marker. Complexity is O(nnz(R)·avg-row(A)·avg-row(P)).
//! Under the `parallel` feature the rows of the product are built in rayon
//! tasks with per-thread marker scratch, so no atomics are needed.

use crate::error::{AmgError, Result};
#[cfg(feature = "parallel")]
use crate::kernels::PARALLEL_MIN_ROWS;
use crate::matrix::csr::CsrMatrix;
use crate::types::{Precision, UNAGGREGATED};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Compute the triple product R·A·P.
pub fn rap(r: &CsrMatrix, a: &CsrMatrix, p: &CsrMatrix) -> Result<CsrMatrix> {
    if r.cols() != a.rows() {
        return Err(AmgError::DimensionMismatch {
            expected: a.rows(),
            actual: r.cols(),
            operation: "triple product R·A",
        });
    }
    if a.cols() != p.rows() {
        return Err(AmgError::DimensionMismatch {
            expected: a.cols(),
            actual: p.rows(),
            operation: "triple product A·P",
        });
    }

    let nrows = r.rows();
    let ncols = p.cols();

    #[cfg(feature = "parallel")]
    {
        if nrows >= PARALLEL_MIN_ROWS {
            return rap_parallel(r, a, p, nrows, ncols);
        }
    }
    rap_serial(r, a, p, nrows, ncols)
}

fn rap_serial(
    r: &CsrMatrix,
    a: &CsrMatrix,
    p: &CsrMatrix,
    nrows: usize,
    ncols: usize,
) -> Result<CsrMatrix> {
    // symbolic pass: row counts
    let mut tag = vec![usize::MAX; ncols];
    let mut row_ptr = vec![0usize; nrows + 1];
    for i in 0..nrows {
        let mut count = 0usize;
        for (k, _) in r.row_iter(i) {
            for (l, _) in a.row_iter(k) {
                for (j, _) in p.row_iter(l) {
                    if tag[j] != i {
                        tag[j] = i;
                        count += 1;
                    }
                }
            }
        }
        row_ptr[i + 1] = row_ptr[i] + count;
    }

    // numeric pass
    let nnz = row_ptr[nrows];
    let mut col_idx = vec![0usize; nnz];
    let mut values = vec![0.0; nnz];
    let mut tag = vec![usize::MAX; ncols];
    let mut slot = vec![0usize; ncols];
    for i in 0..nrows {
        let start = row_ptr[i];
        let mut len = 0usize;
        for (k, rv) in r.row_iter(i) {
            for (l, av) in a.row_iter(k) {
                let partial = rv * av;
                for (j, pv) in p.row_iter(l) {
                    if tag[j] != i {
                        tag[j] = i;
                        slot[j] = start + len;
                        col_idx[start + len] = j;
                        values[start + len] = partial * pv;
                        len += 1;
                    } else {
                        values[slot[j]] += partial * pv;
                    }
                }
            }
        }
    }

    CsrMatrix::from_raw_parts(nrows, ncols, row_ptr, col_idx, values)
}

#[cfg(feature = "parallel")]
fn rap_parallel(
    r: &CsrMatrix,
    a: &CsrMatrix,
    p: &CsrMatrix,
    nrows: usize,
    ncols: usize,
) -> Result<CsrMatrix> {
    let rows: Vec<(Vec<usize>, Vec<Precision>)> = (0..nrows)
        .into_par_iter()
        .map_init(
            || (vec![usize::MAX; ncols], vec![0usize; ncols]),
            |(tag, slot), i| {
                let mut cols = Vec::new();
                let mut vals = Vec::new();
                for (k, rv) in r.row_iter(i) {
                    for (l, av) in a.row_iter(k) {
                        let partial = rv * av;
                        for (j, pv) in p.row_iter(l) {
                            if tag[j] != i {
                                tag[j] = i;
                                slot[j] = cols.len();
                                cols.push(j);
                                vals.push(partial * pv);
                            } else {
                                vals[slot[j]] += partial * pv;
                            }
                        }
                    }
                }
                (cols, vals)
            },
        )
        .collect();

    let mut row_ptr = Vec::with_capacity(nrows + 1);
    let mut col_idx = Vec::new();
    let mut values = Vec::new();
    row_ptr.push(0);
    for (cols, vals) in rows {
        col_idx.extend(cols);
        values.extend(vals);
        row_ptr.push(col_idx.len());
    }
    CsrMatrix::from_raw_parts(nrows, ncols, row_ptr, col_idx, values)
}

/// Aggregation fast path: the Galerkin product when P is the boolean
/// tentative prolongation encoded by an aggregate map.
///
/// Entry (I, J) of the result is Σ a_ij over i ∈ aggregate I, agg\[j\] = J,
/// which avoids materializing P and R entirely.
pub fn rap_agg(a: &CsrMatrix, agg: &[usize], n_agg: usize) -> Result<CsrMatrix> {
    if agg.len() != a.rows() {
        return Err(AmgError::DimensionMismatch {
            expected: a.rows(),
            actual: agg.len(),
            operation: "aggregate map length",
        });
    }

    // bucket members by aggregate
    let mut counts = vec![0usize; n_agg + 1];
    for &g in agg {
        if g != UNAGGREGATED {
            counts[g + 1] += 1;
        }
    }
    for g in 0..n_agg {
        counts[g + 1] += counts[g];
    }
    let mut members = vec![0usize; counts[n_agg]];
    let mut next = counts.clone();
    for (i, &g) in agg.iter().enumerate() {
        if g != UNAGGREGATED {
            members[next[g]] = i;
            next[g] += 1;
        }
    }

    let mut tag = vec![usize::MAX; n_agg];
    let mut slot = vec![0usize; n_agg];
    let mut row_ptr = Vec::with_capacity(n_agg + 1);
    let mut col_idx = Vec::new();
    let mut values: Vec<Precision> = Vec::new();
    row_ptr.push(0);
    for big_i in 0..n_agg {
        for &i in &members[counts[big_i]..counts[big_i + 1]] {
            for (j, v) in a.row_iter(i) {
                let big_j = agg[j];
                if big_j == UNAGGREGATED {
                    continue;
                }
                if tag[big_j] != big_i {
                    tag[big_j] = big_i;
                    slot[big_j] = col_idx.len();
                    col_idx.push(big_j);
                    values.push(v);
                } else {
                    values[slot[big_j]] += v;
                }
            }
        }
        row_ptr.push(col_idx.len());
    }
    CsrMatrix::from_raw_parts(n_agg, n_agg, row_ptr, col_idx, values)
}

/// Restriction R = Pᵀ and coarse operator A_c = R·A·P in one call.
pub fn galerkin_product(a: &CsrMatrix, p: &CsrMatrix) -> Result<(CsrMatrix, CsrMatrix)> {
    let r = p.transpose();
    let coarse = rap(&r, a, p)?;
    Ok((r, coarse))
}
