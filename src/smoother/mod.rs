//! Stationary smoothers applied on each hierarchy level.
//!
//! The sweep kernels are free functions over CSR; [`LevelSmoother`] bundles
//! whatever per-level state a smoother needs (inverted diagonal, ILU
//! factors, Schwarz blocks, polynomial interval) and is prepared once during
//! setup.

use log::warn;

use crate::error::{AmgError, Result};
use crate::matrix::{CsrMatrix, SparseOperator};
use crate::types::{CfMark, Precision, SmootherKind, SweepOrder, SMALL};

pub mod ilu;
pub mod poly;
pub mod schwarz;

pub use ilu::{ilu_k, ilut, IluFactorization};
pub use poly::ChebyshevSmoother;
pub use schwarz::{SchwarzConfig, SchwarzSmoother};

/// Replacement pivot installed by [`regularize_diagonal`].
pub const REGDIAG_REPLACEMENT: Precision = 1e-8;

/// Replace numerically tiny diagonal entries by a safe value, preserving the
/// M-matrix-like assumption: a strictly negative diagonal aborts with
/// [`AmgError::NegativeDiagonal`]. Returns the number of replacements.
pub fn regularize_diagonal(a: &mut CsrMatrix, eps: Precision) -> Result<usize> {
    let mut replaced = 0usize;
    for i in 0..a.rows() {
        let span = a.row_ptr[i]..a.row_ptr[i + 1];
        let mut found = false;
        for k in span {
            if a.col_idx[k] == i {
                found = true;
                let v = a.values[k];
                if v < 0.0 {
                    return Err(AmgError::NegativeDiagonal { row: i, value: v });
                }
                if v.abs() < eps {
                    a.values[k] = REGDIAG_REPLACEMENT;
                    replaced += 1;
                }
                break;
            }
        }
        if !found {
            return Err(AmgError::MissingDiagonal { row: i });
        }
    }
    Ok(replaced)
}

/// One weighted-Jacobi sweep: x ← x + ω·D⁻¹·(b − A·x).
pub fn jacobi_sweep(
    a: &CsrMatrix,
    diag_inv: &[Precision],
    x: &mut [Precision],
    b: &[Precision],
    omega: Precision,
    work: &mut [Precision],
) -> Result<()> {
    a.residual(x, b, work)?;
    for ((xv, &r), &d) in x.iter_mut().zip(work.iter()).zip(diag_inv.iter()) {
        *xv += omega * r * d;
    }
    Ok(())
}

/// One SOR sweep over the rows listed in `order`:
/// x_i ← (1−ω)·x_i + ω·(b_i − Σ_{j≠i} a_ij·x_j)/a_ii.
pub fn sor_sweep(
    a: &CsrMatrix,
    x: &mut [Precision],
    b: &[Precision],
    omega: Precision,
    order: impl Iterator<Item = usize>,
) -> Result<()> {
    for i in order {
        let mut diag = 0.0;
        let mut sum = b[i];
        for (j, v) in a.row_iter(i) {
            if j == i {
                diag = v;
            } else {
                sum -= v * x[j];
            }
        }
        if diag.abs() < SMALL {
            return Err(AmgError::SingularPivot { row: i, context: "relaxation sweep" });
        }
        x[i] = (1.0 - omega) * x[i] + omega * sum / diag;
    }
    Ok(())
}

/// Restricted sweep: identical update, but only rows with `active[i]` move.
pub fn sor_sweep_masked(
    a: &CsrMatrix,
    x: &mut [Precision],
    b: &[Precision],
    omega: Precision,
    active: &[bool],
) -> Result<()> {
    sor_sweep(a, x, b, omega, (0..a.rows()).filter(|&i| active[i]))
}

/// Per-level smoother parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SmootherConfig {
    /// Which smoother to run.
    pub kind: SmootherKind,
    /// Relaxation weight ω.
    pub relaxation: Precision,
    /// Row traversal order for relaxation-type smoothers.
    pub order: SweepOrder,
    /// Polynomial degree for the Chebyshev smoother.
    pub poly_degree: usize,
    /// ILU level of fill (ILU(k)) when non-negative fill is requested.
    pub ilu_fill: usize,
    /// ILUT drop tolerance; `0` selects the level-of-fill factorization.
    pub ilu_droptol: Precision,
    /// Schwarz block construction parameters.
    pub schwarz: SchwarzConfig,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            kind: SmootherKind::GaussSeidel,
            relaxation: 1.0,
            order: SweepOrder::Forward,
            poly_degree: 3,
            ilu_fill: 0,
            ilu_droptol: 0.0,
            schwarz: SchwarzConfig::default(),
        }
    }
}

/// Prepared per-level smoother state.
#[derive(Debug)]
pub enum LevelSmoother {
    /// Weighted Jacobi with a pre-inverted diagonal.
    Jacobi { diag_inv: Vec<Precision>, omega: Precision },
    /// SOR-type relaxation with a fixed traversal.
    Relaxation {
        omega: Precision,
        order: SweepOrder,
        /// Explicit traversal for C-first / F-first orders.
        sequence: Option<Vec<usize>>,
        symmetric: bool,
    },
    /// Chebyshev polynomial smoother.
    Polynomial(ChebyshevSmoother),
    /// Incomplete-LU smoother.
    Ilu(IluFactorization),
    /// Additive Schwarz smoother.
    Schwarz(SchwarzSmoother),
}

impl LevelSmoother {
    /// Prepare smoother state for one level. `cf` supplies the splitting
    /// when a C-first or F-first traversal is requested; without it those
    /// orders fall back to the natural order.
    ///
    /// ILU and Schwarz setup failures are recoverable: the caller demotes to
    /// Gauss-Seidel after logging.
    pub fn prepare(
        a: &CsrMatrix,
        config: &SmootherConfig,
        cf: Option<&[CfMark]>,
    ) -> Result<Self> {
        match config.kind {
            SmootherKind::Jacobi => {
                let diag = a.diagonal()?;
                let mut diag_inv = Vec::with_capacity(diag.len());
                for (i, &d) in diag.iter().enumerate() {
                    if d.abs() < SMALL {
                        return Err(AmgError::SingularPivot { row: i, context: "jacobi setup" });
                    }
                    diag_inv.push(1.0 / d);
                }
                Ok(LevelSmoother::Jacobi { diag_inv, omega: config.relaxation })
            }
            SmootherKind::GaussSeidel | SmootherKind::Sor | SmootherKind::Ssor => {
                let omega = if config.kind == SmootherKind::GaussSeidel {
                    1.0
                } else {
                    config.relaxation
                };
                let sequence = match (config.order, cf) {
                    (SweepOrder::CoarseFirst, Some(marks)) => Some(cf_sequence(marks, true)),
                    (SweepOrder::FineFirst, Some(marks)) => Some(cf_sequence(marks, false)),
                    (SweepOrder::CoarseFirst | SweepOrder::FineFirst, None) => {
                        warn!("C/F sweep order requested without a splitting; using natural order");
                        None
                    }
                    (SweepOrder::MultiColor, _) => Some(color_sequence(a)),
                    _ => None,
                };
                Ok(LevelSmoother::Relaxation {
                    omega,
                    order: config.order,
                    sequence,
                    symmetric: config.kind == SmootherKind::Ssor,
                })
            }
            SmootherKind::Polynomial => Ok(LevelSmoother::Polynomial(
                ChebyshevSmoother::prepare(a, config.poly_degree)?,
            )),
            SmootherKind::Ilu => {
                let factors = if config.ilu_droptol > 0.0 {
                    ilut(a, config.ilu_fill.max(1), config.ilu_droptol)?
                } else {
                    ilu_k(a, config.ilu_fill)?
                };
                Ok(LevelSmoother::Ilu(factors))
            }
            SmootherKind::Schwarz => Ok(LevelSmoother::Schwarz(SchwarzSmoother::prepare(
                a,
                &config.schwarz,
            )?)),
        }
    }

    /// Apply `sweeps` smoothing steps to `x`. `work` is a scratch vector of
    /// the level size.
    pub fn apply(
        &self,
        a: &CsrMatrix,
        x: &mut [Precision],
        b: &[Precision],
        sweeps: usize,
        work: &mut [Precision],
    ) -> Result<()> {
        for _ in 0..sweeps {
            match self {
                LevelSmoother::Jacobi { diag_inv, omega } => {
                    jacobi_sweep(a, diag_inv, x, b, *omega, work)?;
                }
                LevelSmoother::Relaxation { omega, order, sequence, symmetric } => {
                    match (sequence, order) {
                        (Some(seq), _) => {
                            sor_sweep(a, x, b, *omega, seq.iter().copied())?;
                            if *symmetric {
                                sor_sweep(a, x, b, *omega, seq.iter().rev().copied())?;
                            }
                        }
                        (None, SweepOrder::Backward) => {
                            sor_sweep(a, x, b, *omega, (0..a.rows()).rev())?;
                            if *symmetric {
                                sor_sweep(a, x, b, *omega, 0..a.rows())?;
                            }
                        }
                        (None, _) => {
                            sor_sweep(a, x, b, *omega, 0..a.rows())?;
                            if *symmetric {
                                sor_sweep(a, x, b, *omega, (0..a.rows()).rev())?;
                            }
                        }
                    }
                }
                LevelSmoother::Polynomial(cheb) => cheb.smooth(a, x, b)?,
                LevelSmoother::Ilu(factors) => factors.smooth(a, x, b, work)?,
                LevelSmoother::Schwarz(schwarz) => schwarz.smooth(a, x, b, work)?,
            }
        }
        Ok(())
    }
}

/// Greedy coloring of the adjacency of `a`; the returned traversal visits
/// rows color by color, so rows sharing a color touch disjoint unknowns and
/// a sweep over them is order-independent.
fn color_sequence(a: &CsrMatrix) -> Vec<usize> {
    let n = a.rows();
    let mut color = vec![usize::MAX; n];
    let mut n_colors = 0usize;
    let mut used: Vec<bool> = Vec::new();
    for i in 0..n {
        used.clear();
        used.resize(n_colors, false);
        for (j, _) in a.row_iter(i) {
            if j != i && color[j] != usize::MAX {
                used[color[j]] = true;
            }
        }
        let c = used.iter().position(|&u| !u).unwrap_or_else(|| {
            n_colors += 1;
            n_colors - 1
        });
        color[i] = c;
    }
    let mut seq = Vec::with_capacity(n);
    for c in 0..n_colors {
        for i in 0..n {
            if color[i] == c {
                seq.push(i);
            }
        }
    }
    seq
}

fn cf_sequence(marks: &[CfMark], coarse_first: bool) -> Vec<usize> {
    let mut seq = Vec::with_capacity(marks.len());
    let first = |m: CfMark| if coarse_first { m.is_coarse() } else { m.is_fine() };
    for (i, &m) in marks.iter().enumerate() {
        if first(m) {
            seq.push(i);
        }
    }
    for (i, &m) in marks.iter().enumerate() {
        if !first(m) {
            seq.push(i);
        }
    }
    seq
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::norm2;
    use approx::assert_relative_eq;

    fn laplace_1d(n: usize) -> CsrMatrix {
        let mut t = Vec::new();
        for i in 0..n {
            t.push((i, i, 2.0));
            if i > 0 {
                t.push((i, i - 1, -1.0));
            }
            if i + 1 < n {
                t.push((i, i + 1, -1.0));
            }
        }
        CsrMatrix::from_triplets(t, n, n).unwrap()
    }

    fn residual_norm(a: &CsrMatrix, x: &[Precision], b: &[Precision]) -> Precision {
        let mut r = vec![0.0; b.len()];
        a.residual(x, b, &mut r).unwrap();
        norm2(&r)
    }

    #[test]
    fn jacobi_reduces_residual() {
        let a = laplace_1d(16);
        let b = vec![1.0; 16];
        let mut x = vec![0.0; 16];
        let mut work = vec![0.0; 16];
        let smoother = LevelSmoother::prepare(&a, &SmootherConfig {
            kind: SmootherKind::Jacobi,
            relaxation: 0.8,
            ..SmootherConfig::default()
        }, None)
        .unwrap();
        let before = residual_norm(&a, &x, &b);
        smoother.apply(&a, &mut x, &b, 5, &mut work).unwrap();
        assert!(residual_norm(&a, &x, &b) < before);
    }

    #[test]
    fn gauss_seidel_converges_on_small_system() {
        let a = laplace_1d(8);
        let b = vec![1.0; 8];
        let mut x = vec![0.0; 8];
        let mut work = vec![0.0; 8];
        let smoother =
            LevelSmoother::prepare(&a, &SmootherConfig::default(), None).unwrap();
        smoother.apply(&a, &mut x, &b, 200, &mut work).unwrap();
        assert!(residual_norm(&a, &x, &b) < 1e-8);
    }

    #[test]
    fn ssor_runs_both_directions() {
        let a = laplace_1d(8);
        let b = vec![1.0; 8];
        let mut x = vec![0.0; 8];
        let mut work = vec![0.0; 8];
        let smoother = LevelSmoother::prepare(&a, &SmootherConfig {
            kind: SmootherKind::Ssor,
            relaxation: 1.2,
            ..SmootherConfig::default()
        }, None)
        .unwrap();
        let before = residual_norm(&a, &x, &b);
        smoother.apply(&a, &mut x, &b, 3, &mut work).unwrap();
        assert!(residual_norm(&a, &x, &b) < before);
    }

    #[test]
    fn multicolor_sequence_is_red_black_for_tridiagonal() {
        let a = laplace_1d(6);
        assert_eq!(color_sequence(&a), vec![0, 2, 4, 1, 3, 5]);
    }

    #[test]
    fn multicolor_gauss_seidel_reduces_residual() {
        let a = laplace_1d(16);
        let b = vec![1.0; 16];
        let mut x = vec![0.0; 16];
        let mut work = vec![0.0; 16];
        let smoother = LevelSmoother::prepare(&a, &SmootherConfig {
            order: SweepOrder::MultiColor,
            ..SmootherConfig::default()
        }, None)
        .unwrap();
        let before = residual_norm(&a, &x, &b);
        smoother.apply(&a, &mut x, &b, 3, &mut work).unwrap();
        assert!(residual_norm(&a, &x, &b) < before);
    }

    #[test]
    fn cf_ordering_visits_coarse_rows_first() {
        let marks = vec![CfMark::Fine, CfMark::Coarse, CfMark::Fine, CfMark::Coarse];
        assert_eq!(cf_sequence(&marks, true), vec![1, 3, 0, 2]);
        assert_eq!(cf_sequence(&marks, false), vec![0, 2, 1, 3]);
    }

    #[test]
    fn masked_sweep_leaves_inactive_rows() {
        let a = laplace_1d(4);
        let b = vec![1.0; 4];
        let mut x = vec![0.0; 4];
        let active = vec![true, false, true, false];
        sor_sweep_masked(&a, &mut x, &b, 1.0, &active).unwrap();
        assert_relative_eq!(x[1], 0.0);
        assert_relative_eq!(x[3], 0.0);
        assert!(x[0] != 0.0);
    }

    #[test]
    fn regdiag_replaces_tiny_and_rejects_negative() {
        let mut a = CsrMatrix::from_triplets(
            vec![(0, 0, 1e-20), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 2.0)],
            2,
            2,
        )
        .unwrap();
        assert_eq!(regularize_diagonal(&mut a, 1e-12).unwrap(), 1);
        assert_relative_eq!(a.get(0, 0).unwrap(), REGDIAG_REPLACEMENT);

        let mut bad = CsrMatrix::from_triplets(vec![(0, 0, -1.0)], 1, 1).unwrap();
        assert!(matches!(
            regularize_diagonal(&mut bad, 1e-12),
            Err(AmgError::NegativeDiagonal { .. })
        ));
    }

    #[test]
    fn zero_diagonal_row_is_a_singular_pivot() {
        let a = CsrMatrix::from_triplets(vec![(0, 1, 1.0), (0, 0, 0.0), (1, 0, 1.0), (1, 1, 1.0)], 2, 2)
            .unwrap();
        let b = vec![1.0, 1.0];
        let mut x = vec![0.0, 0.0];
        assert!(matches!(
            sor_sweep(&a, &mut x, &b, 1.0, 0..2),
            Err(AmgError::SingularPivot { .. })
        ));
    }
}
