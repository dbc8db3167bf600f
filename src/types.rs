//! Common types shared across the setup and solve pipelines.
//!
//! This module defines the scalar aliases, the enums selecting coarsening,
//! interpolation, smoothing and cycling strategies, and the report types
//! returned by the outer solvers.

use core::fmt;

/// Floating-point precision type.
///
/// Fixed to f64; the multigrid setup heuristics (strength thresholds,
/// truncation fractions) are tuned for double precision.
pub type Precision = f64;

/// Guard scale for divisions by near-zero diagonals.
pub const SMALL: Precision = 1e-14;

/// Classification of an unknown produced by coarsening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CfMark {
    /// Kept on the next coarser level.
    Coarse,
    /// Eliminated; interpolated from coarse neighbors.
    Fine,
    /// Disconnected unknown, assigned trivially.
    Isolated,
    /// Not yet decided (only valid while coarsening is in progress).
    Undecided,
}

impl CfMark {
    /// Whether the unknown survives to the coarse level.
    pub fn is_coarse(self) -> bool {
        matches!(self, CfMark::Coarse)
    }

    /// Whether the unknown is eliminated by interpolation.
    pub fn is_fine(self) -> bool {
        matches!(self, CfMark::Fine)
    }
}

/// Sentinel aggregate id for unknowns not yet assigned to an aggregate.
pub const UNAGGREGATED: usize = usize::MAX;

/// Multigrid cycling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CycleKind {
    /// One recursive visit per level.
    V,
    /// Two recursive visits per level.
    W,
    /// Polynomial (Chebyshev-coefficient) acceleration of the coarse visit.
    Amli,
    /// Inner Krylov iterations on the coarse system, preconditioned by the
    /// next-lower cycle.
    NonlinearAmli,
}

/// Outer Krylov method selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SolverKind {
    /// Preconditioned conjugate gradients.
    Cg,
    /// CG with the best-iterate safe net.
    SafeCg,
    /// Preconditioned MINRES.
    Minres,
    /// Restarted GMRES.
    Gmres,
    /// Flexible GMRES for iteration-dependent preconditioners.
    FlexGmres,
    /// BiCGSTAB.
    BiCgStab,
    /// BiCGSTAB with the best-iterate safe net.
    SafeBiCgStab,
    /// Standalone multigrid iteration (no Krylov acceleration).
    Amg,
}

/// Preconditioner selection for the outer methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PrecondKind {
    /// Unpreconditioned iteration.
    None,
    /// Diagonal (Jacobi) scaling.
    Diagonal,
    /// One multigrid cycle per application.
    Amg,
    /// ILU factorization of the fine-level matrix.
    Ilu,
    /// Additive Schwarz on the fine-level matrix.
    Schwarz,
}

/// Stopping criterion for the outer iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StopCriterion {
    /// ‖r‖ / ‖b‖ < tol.
    RelativeResidual,
    /// ‖B·r‖ / ‖B·b‖ < tol, measured in the preconditioned norm.
    PreconditionedResidual,
    /// ‖r‖ / ‖x‖ < tol.
    ModifiedResidual,
}

/// Hierarchy construction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AmgKind {
    /// Classical Ruge-Stüben with C/F splitting.
    Classical,
    /// Unsmoothed aggregation with a tentative prolongation.
    UnsmoothedAggregation,
}

/// C/F coarsening algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CoarseningKind {
    /// Modified Ruge-Stüben greedy splitting.
    RugeStueben,
    /// Aggressive coarsening over paths of length two, any connecting path.
    AggressiveSinglePath,
    /// Aggressive coarsening requiring two vertex-disjoint paths.
    AggressiveDoublePath,
}

/// Aggregation algorithm for aggregation-based hierarchies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AggregationKind {
    /// Vaněk-Mandel-Brezina greedy neighborhood aggregation.
    Vmb,
    /// Iterated pairwise matching.
    Pairwise,
}

/// Interpolation (prolongation synthesis) policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InterpKind {
    /// Direct interpolation from strong coarse neighbors.
    Direct,
    /// Standard interpolation through distance-2 fine intermediaries.
    Standard,
    /// Energy-minimizing interpolation with local dense solves.
    EnergyMin,
    /// Unsmoothed tentative prolongation from an aggregate map.
    Tentative,
}

/// Smoother selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SmootherKind {
    /// Weighted Jacobi.
    Jacobi,
    /// Gauss-Seidel (ω = 1 SOR).
    GaussSeidel,
    /// Successive over-relaxation.
    Sor,
    /// Forward then backward SOR in one sweep.
    Ssor,
    /// Truncated Chebyshev polynomial in D⁻¹A.
    Polynomial,
    /// Pre-factored incomplete LU applied to the residual.
    Ilu,
    /// Overlapping-block additive Schwarz.
    Schwarz,
}

/// Row traversal order for relaxation sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SweepOrder {
    /// Ascending row order.
    Forward,
    /// Descending row order.
    Backward,
    /// Coarse points first, then fine points.
    CoarseFirst,
    /// Fine points first, then coarse points.
    FineFirst,
    /// Greedy graph coloring computed at setup; rows sweep color by color,
    /// so rows of one color are independent.
    MultiColor,
}

/// Coarsest-level solver selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CoarseSolverKind {
    /// Dense LU factorization of the coarsest operator.
    DenseLu,
    /// Many sweeps of the configured smoother.
    SmootherFallback,
}

/// Termination status reported by an outer solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SolveStatus {
    /// Stopping criterion satisfied.
    Converged,
    /// Iteration limit reached before the criterion was met.
    MaxIterations,
    /// No measurable progress over consecutive iterations.
    Stagnated,
    /// The requested tolerance cannot be certified by the true residual.
    ToleranceTooSmall,
    /// Residual became NaN or infinite.
    Diverged,
}

impl SolveStatus {
    /// Whether the solve ended at the requested tolerance.
    pub fn is_converged(self) -> bool {
        matches!(self, SolveStatus::Converged)
    }
}

/// Outcome of an outer solve: iterate quality and iteration accounting.
///
/// The iterate itself is written into the caller's `x` buffer; for safe-net
/// solvers it is the best iterate observed, otherwise the last one.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolveReport {
    /// Iterations performed by the outer method.
    pub iterations: usize,
    /// Final (true) residual norm.
    pub residual_norm: Precision,
    /// Relative residual against the stopping criterion's reference norm.
    pub relative_residual: Precision,
    /// Termination status.
    pub status: SolveStatus,
}

impl SolveReport {
    /// Whether the report describes a converged solve.
    pub fn is_converged(&self) -> bool {
        self.status.is_converged()
    }
}

/// Per-hierarchy setup summary.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SetupReport {
    /// Number of levels built, including the coarsest.
    pub levels: usize,
    /// Σ_ℓ nnz(A_ℓ) / nnz(A_0).
    pub operator_complexity: Precision,
    /// Σ_ℓ n_ℓ / n_0.
    pub grid_complexity: Precision,
}

impl fmt::Display for SetupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} levels, operator complexity {:.3}, grid complexity {:.3}",
            self.levels, self.operator_complexity, self.grid_complexity
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cf_mark_predicates() {
        assert!(CfMark::Coarse.is_coarse());
        assert!(!CfMark::Coarse.is_fine());
        assert!(CfMark::Fine.is_fine());
        assert!(!CfMark::Isolated.is_coarse());
    }

    #[test]
    fn status_convergence() {
        assert!(SolveStatus::Converged.is_converged());
        assert!(!SolveStatus::Stagnated.is_converged());
    }

    #[test]
    fn setup_report_display() {
        let report = SetupReport {
            levels: 4,
            operator_complexity: 1.85,
            grid_complexity: 1.6,
        };
        let text = format!("{}", report);
        assert!(text.contains("4 levels"));
    }
}
