//! Preconditioned MINRES for symmetric (possibly indefinite) systems.
//!
//! Lanczos recurrence with on-the-fly Givens rotations; the preconditioner
//! must be symmetric positive definite for the short recurrence to remain
//! valid. The running estimate `phibar` tracks the preconditioned residual
//! norm; convergence is certified against the true residual before the
//! method returns.

use crate::error::{AmgError, Result};
use crate::kernels::{axpy, dot};
use crate::krylov::{
    diverged, finish, relative_residual, vec_norm, KrylovParams, Preconditioner, MAX_RESTART,
};
use crate::matrix::SparseOperator;
use crate::types::{Precision, SolveReport, SolveStatus, SMALL};

/// Solve Ax = b with symmetric A.
pub fn minres(
    a: &dyn SparseOperator,
    b: &[Precision],
    x: &mut [Precision],
    pc: &mut dyn Preconditioner,
    params: &KrylovParams,
) -> Result<SolveReport> {
    let n = b.len();
    let b_norm = vec_norm(b);

    let mut r1 = vec![0.0; n];
    a.residual(x, b, &mut r1)?;
    let mut y = vec![0.0; n];
    pc.apply(&r1, &mut y)?;

    let mut beta1 = dot(&r1, &y);
    if beta1 < 0.0 {
        return Err(AmgError::InvalidParameter {
            name: "precond_type",
            message: "MINRES needs a symmetric positive definite preconditioner".into(),
        });
    }
    let abs_res0 = vec_norm(&r1);
    let rel0 = relative_residual(params.stop, abs_res0, Some(beta1.sqrt()), b_norm, vec_norm(x));
    if rel0 < params.tol {
        return Ok(finish(0, abs_res0, rel0, SolveStatus::Converged));
    }
    beta1 = beta1.sqrt();

    let mut restarts = 0usize;
    let mut iterations = 0usize;
    let mut abs_res = abs_res0;
    let mut rel_res = rel0;

    'restart: loop {
        let mut r2 = r1.clone();
        let mut beta = beta1;
        let mut oldb = 0.0;
        let mut dbar = 0.0;
        let mut epsln = 0.0;
        let mut phibar = beta1;
        let mut cs: Precision = -1.0;
        let mut sn: Precision = 0.0;
        let mut w = vec![0.0; n];
        let mut w2 = vec![0.0; n];
        let mut v = vec![0.0; n];
        let mut tmp = vec![0.0; n];

        while iterations < params.max_iterations {
            iterations += 1;

            // Lanczos step
            let s = 1.0 / beta;
            for (vv, &yv) in v.iter_mut().zip(y.iter()) {
                *vv = s * yv;
            }
            a.apply(&v, &mut tmp)?;
            if oldb > 0.0 {
                axpy(-beta / oldb, &r1, &mut tmp);
            }
            let alfa = dot(&v, &tmp);
            axpy(-alfa / beta, &r2, &mut tmp);
            r1.copy_from_slice(&r2);
            r2.copy_from_slice(&tmp);
            pc.apply(&r2, &mut y)?;
            oldb = beta;
            let beta_sq = dot(&r2, &y);
            if beta_sq < 0.0 {
                return Err(AmgError::InvalidParameter {
                    name: "precond_type",
                    message: "preconditioner lost positive definiteness".into(),
                });
            }
            // a vanishing beta means the Krylov space is exhausted; the
            // clamp keeps the rotations finite until certification
            beta = beta_sq.sqrt().max(SMALL);

            // previous rotation applied to the new column
            let oldeps = epsln;
            let delta = cs * dbar + sn * alfa;
            let gbar = sn * dbar - cs * alfa;
            epsln = sn * beta;
            dbar = -cs * beta;

            // new rotation
            let gamma = (gbar * gbar + beta * beta).sqrt().max(SMALL);
            cs = gbar / gamma;
            sn = beta / gamma;
            let phi = cs * phibar;
            phibar *= sn;

            // solution update
            let denom = 1.0 / gamma;
            let w1 = w2.clone();
            w2.copy_from_slice(&w);
            for i in 0..n {
                w[i] = (v[i] - oldeps * w1[i] - delta * w2[i]) * denom;
            }
            axpy(phi, &w, x);

            abs_res = phibar;
            if diverged(abs_res) {
                return Ok(finish(iterations, abs_res, rel_res, SolveStatus::Diverged));
            }
            rel_res = relative_residual(
                params.stop,
                abs_res,
                Some(phibar),
                b_norm,
                vec_norm(x),
            );

            if rel_res < params.tol {
                // certify against the true residual
                a.residual(x, b, &mut r1)?;
                abs_res = vec_norm(&r1);
                let true_rel =
                    relative_residual(params.stop, abs_res, None, b_norm, vec_norm(x));
                if true_rel < params.tol {
                    return Ok(finish(iterations, abs_res, true_rel, SolveStatus::Converged));
                }
                restarts += 1;
                if restarts > MAX_RESTART {
                    return Ok(finish(
                        iterations,
                        abs_res,
                        true_rel,
                        SolveStatus::ToleranceTooSmall,
                    ));
                }
                pc.apply(&r1, &mut y)?;
                let fresh = dot(&r1, &y);
                if fresh <= 0.0 {
                    return Ok(finish(iterations, abs_res, true_rel, SolveStatus::Stagnated));
                }
                beta1 = fresh.sqrt();
                rel_res = true_rel;
                continue 'restart;
            }
        }

        return Ok(finish(iterations, abs_res, rel_res, SolveStatus::MaxIterations));
    }
}
