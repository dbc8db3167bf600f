//! Coarsest-level solvers.
//!
//! The hierarchy ends either in a dense LU factorization of the coarsest
//! operator or, when that operator is singular or a factorization was not
//! requested, in a long run of the level smoother. External direct solvers
//! plug in at this seam; they are not reimplemented here.

use core::fmt;

use log::warn;
use nalgebra::{DVector, Dyn};

use crate::error::{AmgError, Result};
use crate::matrix::CsrMatrix;
use crate::smoother::LevelSmoother;
use crate::types::{CoarseSolverKind, Precision};

/// Sweep count of the smoother fallback.
pub const FALLBACK_SWEEPS: usize = 50;

/// Relative diagonal shift applied when the coarsest operator is singular.
const DIAGONAL_SHIFT: Precision = 1e-8;

/// Prepared coarsest-level solver.
pub enum CoarseSolver {
    /// Dense LU factors of the coarsest operator.
    DenseLu(nalgebra::LU<Precision, Dyn, Dyn>),
    /// Repeated sweeps of the coarsest level's smoother.
    Smoother,
}

impl fmt::Debug for CoarseSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoarseSolver::DenseLu(_) => f.write_str("CoarseSolver::DenseLu"),
            CoarseSolver::Smoother => f.write_str("CoarseSolver::Smoother"),
        }
    }
}

impl CoarseSolver {
    /// Factor the coarsest operator. A singular operator demotes to the
    /// smoother fallback, which also serves singular-but-consistent systems.
    pub fn prepare(a: &CsrMatrix, kind: CoarseSolverKind) -> Self {
        match kind {
            CoarseSolverKind::DenseLu => {
                let dense = a.to_dense();
                let lu = dense.clone().lu();
                if lu.is_invertible() && !numerically_singular(&lu) {
                    return CoarseSolver::DenseLu(lu);
                }
                // singular coarsest operator (pure Neumann problems): a
                // small diagonal shift keeps the factorization usable while
                // the null-space component of the correction stays at
                // rounding level
                let max_diag = dense.diagonal().iter().fold(0.0f64, |m, d| m.max(d.abs()));
                let delta = DIAGONAL_SHIFT * max_diag.max(1.0);
                let mut shifted = dense;
                for i in 0..shifted.nrows() {
                    shifted[(i, i)] += delta;
                }
                let lu = shifted.lu();
                if lu.is_invertible() && !numerically_singular(&lu) {
                    warn!(
                        "coarsest operator ({} unknowns) is singular; factoring with a {:.1e} shift",
                        a.rows(),
                        delta
                    );
                    CoarseSolver::DenseLu(lu)
                } else {
                    warn!(
                        "coarsest operator ({} unknowns) is singular; using smoother fallback",
                        a.rows()
                    );
                    CoarseSolver::Smoother
                }
            }
            CoarseSolverKind::SmootherFallback => CoarseSolver::Smoother,
        }
    }

    /// Solve the coarsest system into `x`.
    pub fn solve(
        &self,
        a: &CsrMatrix,
        smoother: &LevelSmoother,
        x: &mut [Precision],
        b: &[Precision],
        work: &mut [Precision],
    ) -> Result<()> {
        match self {
            CoarseSolver::DenseLu(lu) => {
                let rhs = DVector::from_column_slice(b);
                let sol = lu.solve(&rhs).ok_or(AmgError::SingularPivot {
                    row: 0,
                    context: "triangular solve",
                })?;
                x.copy_from_slice(sol.as_slice());
                Ok(())
            }
            CoarseSolver::Smoother => smoother.apply(a, x, b, FALLBACK_SWEEPS, work),
        }
    }
}

/// Pivot-ratio test: `is_invertible` only rejects exact zeros, but a
/// coarsest operator with a near-null-space (pure Neumann problems) must
/// fall back to the smoother or the LU solve amplifies rounding noise into
/// the correction.
fn numerically_singular(lu: &nalgebra::LU<Precision, Dyn, Dyn>) -> bool {
    const PIVOT_RATIO: Precision = 1e-12;
    let diag = lu.u().diagonal();
    let largest = diag.iter().fold(0.0 as Precision, |m, d| m.max(d.abs()));
    let smallest = diag.iter().fold(Precision::INFINITY, |m, d| m.min(d.abs()));
    largest == 0.0 || smallest < PIVOT_RATIO * largest
}
