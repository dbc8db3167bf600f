//! Preconditioned Krylov outer methods and their shared safeguards.
//!
//! Every method follows the same contract: iterate until the configured
//! stopping rule is met or the iteration cap is reached, guard against
//! stagnation and false convergence by checking the true residual, and
//! always leave a defined iterate in `x` (the best-known one for safe-net
//! variants). Numeric trouble during the solve is reported through
//! [`SolveReport::status`], never by panicking or clobbering `x`.

use crate::error::Result;
use crate::kernels::norm2;
use crate::types::{Precision, SolveReport, SolveStatus, StopCriterion, SMALL};

pub mod bicgstab;
pub mod cg;
pub mod gmres;
pub mod minres;

pub use bicgstab::bicgstab;
pub use cg::pcg;
pub use gmres::gmres;
pub use minres::minres;

/// Ratio of the tolerance below which a step counts as stagnant.
pub const STAG_RATIO: Precision = 1e-4;

/// Consecutive stagnant steps tolerated before a restart.
pub const MAX_STAG: usize = 20;

/// Restarts attempted before declaring stagnation or an unreachable
/// tolerance.
pub const MAX_RESTART: usize = 5;

/// A preconditioner applicable to a residual.
///
/// Multigrid cycles carry mutable per-application scratch, so application
/// takes `&mut self`; stateless preconditioners simply ignore that.
pub trait Preconditioner {
    /// z ← B·r.
    fn apply(&mut self, r: &[Precision], z: &mut [Precision]) -> Result<()>;

    /// Whether the operator changes between applications (routes GMRES to
    /// the flexible variant).
    fn is_variable(&self) -> bool {
        false
    }
}

/// The identity preconditioner.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPrecond;

impl Preconditioner for IdentityPrecond {
    fn apply(&mut self, r: &[Precision], z: &mut [Precision]) -> Result<()> {
        z.copy_from_slice(r);
        Ok(())
    }
}

/// Iteration controls shared by all outer methods.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KrylovParams {
    /// Relative tolerance τ.
    pub tol: Precision,
    /// Iteration cap.
    pub max_iterations: usize,
    /// Stopping rule.
    pub stop: StopCriterion,
    /// Restart length (GMRES family).
    pub restart: usize,
}

impl Default for KrylovParams {
    fn default() -> Self {
        Self {
            tol: 1e-6,
            max_iterations: 500,
            stop: StopCriterion::RelativeResidual,
            restart: 30,
        }
    }
}

/// Relative residual under the configured stopping rule.
///
/// `precond_norm` carries √(r·B·r) when the caller tracks it; the rule
/// falls back to the plain residual norm otherwise.
pub(crate) fn relative_residual(
    stop: StopCriterion,
    residual_norm: Precision,
    precond_norm: Option<Precision>,
    b_norm: Precision,
    x_norm: Precision,
) -> Precision {
    match stop {
        StopCriterion::RelativeResidual => residual_norm / b_norm.max(SMALL),
        StopCriterion::PreconditionedResidual => {
            precond_norm.unwrap_or(residual_norm) / b_norm.max(SMALL)
        }
        StopCriterion::ModifiedResidual => {
            let reference = if x_norm > SMALL { x_norm } else { b_norm };
            residual_norm / reference.max(SMALL)
        }
    }
}

/// Bundle a finished iteration into a report.
pub(crate) fn finish(
    iterations: usize,
    residual_norm: Precision,
    relative: Precision,
    status: SolveStatus,
) -> SolveReport {
    SolveReport {
        iterations,
        residual_norm,
        relative_residual: relative,
        status,
    }
}

/// Classify a non-finite residual.
pub(crate) fn diverged(residual_norm: Precision) -> bool {
    !residual_norm.is_finite()
}

/// ‖v‖₂ shorthand re-exported for the method modules.
pub(crate) fn vec_norm(v: &[Precision]) -> Precision {
    norm2(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_preconditioner_copies() {
        let mut pc = IdentityPrecond;
        let r = vec![1.0, -2.0, 3.0];
        let mut z = vec![0.0; 3];
        pc.apply(&r, &mut z).unwrap();
        assert_eq!(z, r);
        assert!(!pc.is_variable());
    }

    #[test]
    fn relative_residual_rules() {
        let rel = relative_residual(StopCriterion::RelativeResidual, 1.0, None, 4.0, 2.0);
        assert_eq!(rel, 0.25);
        let modified = relative_residual(StopCriterion::ModifiedResidual, 1.0, None, 4.0, 2.0);
        assert_eq!(modified, 0.5);
        let prec =
            relative_residual(StopCriterion::PreconditionedResidual, 1.0, Some(0.5), 4.0, 0.0);
        assert_eq!(prec, 0.125);
    }

    #[test]
    fn modified_rule_falls_back_to_rhs_norm() {
        let rel = relative_residual(StopCriterion::ModifiedResidual, 1.0, None, 4.0, 0.0);
        assert_eq!(rel, 0.25);
    }

    #[test]
    fn divergence_detection() {
        assert!(diverged(Precision::NAN));
        assert!(diverged(Precision::INFINITY));
        assert!(!diverged(1.0));
    }
}
