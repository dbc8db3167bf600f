//! Strength-of-connection graph driving the coarsening engines.
//!
//! An edge (i, j) of the auxiliary graph S survives iff a_ij indicates a
//! strong dependence of unknown i on unknown j under the chosen rule. S is
//! pattern-only; the numeric values of A are consulted once here and then
//! dropped.

use crate::error::{AmgError, Result};
use crate::matrix::{CsrMatrix, CsrPattern};
use crate::types::{Precision, SMALL};

/// Strength rule selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StrengthKind {
    /// M-matrix rule: a_ij ≤ θ · min_k a_ik over off-diagonal entries.
    Signed,
    /// Absolute rule: |a_ij| ≥ θ · max_k |a_ik| over off-diagonal entries.
    Absolute,
}

/// Build the strength graph of `a` for threshold `theta` and row-sum bound
/// `max_row_sum` ∈ [0, 1).
///
/// Rows whose total sum is large relative to the diagonal are declared
/// entirely weak (they are already well represented by the diagonal), which
/// steers coarsening away from near-Dirichlet rows. Returns
/// [`AmgError::NoStrongConnections`] when no edge survives anywhere.
pub fn strength_graph(
    a: &CsrMatrix,
    theta: Precision,
    max_row_sum: Precision,
    kind: StrengthKind,
    level: usize,
) -> Result<CsrPattern> {
    let n = a.rows();
    let mut rows: Vec<Vec<usize>> = Vec::with_capacity(n);
    let mut edges = 0usize;

    for i in 0..n {
        let mut diag = 0.0;
        let mut row_sum = 0.0;
        let mut row_min = Precision::INFINITY;
        let mut row_absmax: Precision = 0.0;
        for (j, v) in a.row_iter(i) {
            row_sum += v;
            if j == i {
                diag = v;
            } else {
                row_min = row_min.min(v);
                row_absmax = row_absmax.max(v.abs());
            }
        }

        let weak_row =
            max_row_sum < 1.0 && row_sum.abs() > max_row_sum * diag.abs().max(SMALL);
        if weak_row {
            rows.push(Vec::new());
            continue;
        }

        let mut strong = Vec::new();
        for (j, v) in a.row_iter(i) {
            if j == i {
                continue;
            }
            let keep = match kind {
                StrengthKind::Signed => v <= theta * row_min && v < 0.0,
                StrengthKind::Absolute => v.abs() >= theta * row_absmax && v != 0.0,
            };
            if keep {
                strong.push(j);
            }
        }
        edges += strong.len();
        rows.push(strong);
    }

    if edges == 0 {
        return Err(AmgError::NoStrongConnections { level });
    }
    Ok(CsrPattern::from_rows(n, n, rows))
}
