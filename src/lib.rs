//! # Algebraic multigrid solver for large sparse linear systems
//!
//! This crate builds a hierarchy of progressively coarser operators from a
//! single fine-level CSR matrix and applies it either as a standalone
//! iterative solver or as a preconditioner inside a Krylov method.
//!
//! ## Quick start
//!
//! ```rust
//! use amg_solver::{solve, AmgConfig, CsrMatrix, SolverConfig};
//!
//! // 1-D Poisson problem
//! let n = 64;
//! let mut triplets = Vec::new();
//! for i in 0..n {
//!     triplets.push((i, i, 2.0));
//!     if i > 0 {
//!         triplets.push((i, i - 1, -1.0));
//!     }
//!     if i + 1 < n {
//!         triplets.push((i, i + 1, -1.0));
//!     }
//! }
//! let a = CsrMatrix::from_triplets(triplets, n, n)?;
//! let b = vec![1.0; n];
//! let mut x = vec![0.0; n];
//!
//! let report = solve(&a, &b, &mut x, &SolverConfig::default(), &AmgConfig::default())?;
//! assert!(report.is_converged());
//! # Ok::<(), amg_solver::AmgError>(())
//! ```
//!
//! ## Pipeline
//!
//! Setup runs fine to coarse: a strength-of-connection graph steers either
//! classical Ruge-Stüben splitting or aggregation, interpolation synthesizes
//! the prolongation, and the Galerkin triple product forms the next
//! operator. The solve runs coarse corrections back up through V, W, AMLI
//! or nonlinear-AMLI cycles, composed with CG, MINRES, GMRES or BiCGSTAB
//! outer iterations.

#![warn(missing_docs)]
#![allow(clippy::float_cmp)] // numerical code compares exactly where it means to

pub use config::{AmgConfig, SolverConfig};
pub use coarsen::{AggregateMap, Coarsening};
pub use cycle::{apply_cycle, CycleWorkspace};
pub use error::{AmgError, Result};
pub use hierarchy::{Hierarchy, Level};
pub use io::IndexBase;
pub use krylov::{
    bicgstab, gmres, minres, pcg, IdentityPrecond, KrylovParams, Preconditioner,
};
pub use matrix::{CsrMatrix, CsrPattern, SparseOperator};
pub use precond::{AmgPrecond, DiagonalPrecond, IluPrecond, SchwarzPrecond};
pub use smoother::{SchwarzConfig, SmootherConfig};
pub use strength::StrengthKind;
pub use types::{
    AggregationKind, AmgKind, CfMark, CoarseSolverKind, CoarseningKind, CycleKind, InterpKind,
    Precision, PrecondKind, SetupReport, SmootherKind, SolveReport, SolveStatus, SolverKind,
    StopCriterion, SweepOrder,
};

pub mod coarse;
pub mod coarsen;
pub mod config;
pub mod cycle;
pub mod error;
pub mod hierarchy;
pub mod interp;
pub mod io;
pub mod kernels;
pub mod krylov;
pub mod matrix;
pub mod precond;
pub mod smoother;
pub mod strength;
pub mod types;

use kernels::norm2;
use krylov::relative_residual;
use types::SMALL;

/// Solve Ax = b with the configured outer method and preconditioner.
///
/// This is the library-level counterpart of the original drivers: it wires
/// the hierarchy setup, the preconditioner adapters and the Krylov methods
/// together according to `solver_config.solver` × `solver_config.precond`.
/// The iterate is left in `x`; the report carries iteration count, final
/// residual and status.
pub fn solve(
    a: &CsrMatrix,
    b: &[Precision],
    x: &mut [Precision],
    solver_config: &SolverConfig,
    amg_config: &AmgConfig,
) -> Result<SolveReport> {
    solver_config.validate()?;
    amg_config.validate()?;
    if b.len() != a.rows() {
        return Err(AmgError::DimensionMismatch {
            expected: a.rows(),
            actual: b.len(),
            operation: "right-hand side length",
        });
    }
    if x.len() != a.rows() {
        return Err(AmgError::DimensionMismatch {
            expected: a.rows(),
            actual: x.len(),
            operation: "iterate length",
        });
    }

    if matches!(solver_config.solver, SolverKind::Amg) {
        return solve_standalone_amg(a, b, x, solver_config, amg_config);
    }

    let mut pc: Box<dyn Preconditioner> = match solver_config.precond {
        PrecondKind::None => Box::new(IdentityPrecond),
        PrecondKind::Diagonal => Box::new(DiagonalPrecond::new(a)?),
        PrecondKind::Amg => {
            let hierarchy = Hierarchy::setup(a.clone(), amg_config)?;
            Box::new(AmgPrecond::new(hierarchy))
        }
        PrecondKind::Ilu => {
            let factors = if amg_config.smoother.ilu_droptol > 0.0 {
                smoother::ilut(
                    a,
                    amg_config.smoother.ilu_fill.max(1),
                    amg_config.smoother.ilu_droptol,
                )?
            } else {
                smoother::ilu_k(a, amg_config.smoother.ilu_fill)?
            };
            Box::new(IluPrecond::new(factors))
        }
        PrecondKind::Schwarz => {
            let blocks = smoother::SchwarzSmoother::prepare(a, &amg_config.smoother.schwarz)?;
            Box::new(SchwarzPrecond::new(blocks))
        }
    };

    let params = KrylovParams {
        tol: solver_config.tol,
        max_iterations: solver_config.max_iterations,
        stop: solver_config.stop,
        restart: solver_config.restart,
    };

    match solver_config.solver {
        SolverKind::Cg => pcg(a, b, x, pc.as_mut(), &params, false),
        SolverKind::SafeCg => pcg(a, b, x, pc.as_mut(), &params, true),
        SolverKind::Minres => minres(a, b, x, pc.as_mut(), &params),
        SolverKind::Gmres | SolverKind::FlexGmres => gmres(a, b, x, pc.as_mut(), &params),
        SolverKind::BiCgStab => bicgstab(a, b, x, pc.as_mut(), &params, false),
        SolverKind::SafeBiCgStab => bicgstab(a, b, x, pc.as_mut(), &params, true),
        SolverKind::Amg => unreachable!("handled above"),
    }
}

/// Standalone multigrid: repeat cycles until the stopping rule is met.
fn solve_standalone_amg(
    a: &CsrMatrix,
    b: &[Precision],
    x: &mut [Precision],
    solver_config: &SolverConfig,
    amg_config: &AmgConfig,
) -> Result<SolveReport> {
    let hierarchy = Hierarchy::setup(a.clone(), amg_config)?;
    let mut ws = CycleWorkspace::new(&hierarchy);
    let b_norm = norm2(b);

    let mut r = vec![0.0; b.len()];
    a.residual(x, b, &mut r)?;
    let mut abs_res = norm2(&r);
    let mut rel_res =
        relative_residual(solver_config.stop, abs_res, None, b_norm, norm2(x));
    if rel_res < solver_config.tol {
        return Ok(SolveReport {
            iterations: 0,
            residual_norm: abs_res,
            relative_residual: rel_res,
            status: SolveStatus::Converged,
        });
    }

    let mut iterations = 0usize;
    let mut previous = abs_res;
    while iterations < solver_config.max_iterations {
        iterations += 1;
        apply_cycle(&hierarchy, &mut ws, b, x)?;
        a.residual(x, b, &mut r)?;
        abs_res = norm2(&r);
        rel_res = relative_residual(solver_config.stop, abs_res, None, b_norm, norm2(x));
        if !abs_res.is_finite() {
            return Ok(SolveReport {
                iterations,
                residual_norm: abs_res,
                relative_residual: rel_res,
                status: SolveStatus::Diverged,
            });
        }
        if rel_res < solver_config.tol {
            return Ok(SolveReport {
                iterations,
                residual_norm: abs_res,
                relative_residual: rel_res,
                status: SolveStatus::Converged,
            });
        }
        // cycles are linear iterations: no progress means none will come
        if abs_res >= previous * (1.0 - SMALL) && abs_res > 0.0 {
            return Ok(SolveReport {
                iterations,
                residual_norm: abs_res,
                relative_residual: rel_res,
                status: SolveStatus::Stagnated,
            });
        }
        previous = abs_res;
    }

    Ok(SolveReport {
        iterations,
        residual_norm: abs_res,
        relative_residual: rel_res,
        status: SolveStatus::MaxIterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn driver_solves_with_amg_preconditioned_cg() {
        let a = laplace_1d(128);
        let b = vec![1.0; 128];
        let mut x = vec![0.0; 128];
        let report = solve(
            &a,
            &b,
            &mut x,
            &SolverConfig::default(),
            &AmgConfig { coarse_dof: 10, ..AmgConfig::default() },
        )
        .unwrap();
        assert!(report.is_converged());
    }

    #[test]
    fn driver_runs_standalone_amg() {
        let a = laplace_1d(64);
        let b = vec![1.0; 64];
        let mut x = vec![0.0; 64];
        let config = SolverConfig {
            solver: SolverKind::Amg,
            tol: 1e-8,
            ..SolverConfig::default()
        };
        let report = solve(
            &a,
            &b,
            &mut x,
            &config,
            &AmgConfig { coarse_dof: 8, ..AmgConfig::default() },
        )
        .unwrap();
        assert!(report.is_converged());
        assert!(report.iterations < 30);
    }

    #[test]
    fn driver_rejects_mismatched_rhs() {
        let a = laplace_1d(8);
        let b = vec![1.0; 4];
        let mut x = vec![0.0; 8];
        assert!(matches!(
            solve(&a, &b, &mut x, &SolverConfig::default(), &AmgConfig::default()),
            Err(AmgError::DimensionMismatch { .. })
        ));
    }
}
