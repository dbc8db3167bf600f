//! Preconditioned conjugate gradients, with an optional best-iterate safe
//! net.

use log::debug;

use crate::error::Result;
use crate::kernels::{axpby, axpy, dot};
use crate::krylov::{
    diverged, finish, relative_residual, vec_norm, KrylovParams, Preconditioner, MAX_RESTART,
    MAX_STAG, STAG_RATIO,
};
use crate::matrix::SparseOperator;
use crate::types::{Precision, SolveReport, SolveStatus, SMALL};

/// Solve Ax = b for symmetric positive definite A.
///
/// With `safe_net` the iterate with the smallest true residual seen so far
/// is kept aside and restored if the final iterate is worse.
pub fn pcg(
    a: &dyn SparseOperator,
    b: &[Precision],
    x: &mut [Precision],
    pc: &mut dyn Preconditioner,
    params: &KrylovParams,
    safe_net: bool,
) -> Result<SolveReport> {
    let n = b.len();
    let b_norm = vec_norm(b);

    let mut r = vec![0.0; n];
    let mut z = vec![0.0; n];
    let mut p = vec![0.0; n];
    let mut ap = vec![0.0; n];

    a.residual(x, b, &mut r)?;
    pc.apply(&r, &mut z)?;
    p.copy_from_slice(&z);
    let mut rz = dot(&r, &z);

    let mut best: Option<(Vec<Precision>, Precision)> = None;
    let mut stag_steps = 0usize;
    let mut restarts = 0usize;
    let mut iterations = 0usize;

    let mut abs_res = vec_norm(&r);
    let mut rel_res = relative_residual(
        params.stop,
        abs_res,
        Some(rz.max(0.0).sqrt()),
        b_norm,
        vec_norm(x),
    );
    if rel_res < params.tol {
        return Ok(finish(0, abs_res, rel_res, SolveStatus::Converged));
    }

    while iterations < params.max_iterations {
        iterations += 1;

        a.apply(&p, &mut ap)?;
        let pap = dot(&p, &ap);
        if pap.abs() < SMALL {
            debug!("pcg: search direction annihilated at iteration {}", iterations);
            return Ok(finish(iterations, abs_res, rel_res, SolveStatus::Stagnated));
        }
        let alpha = rz / pap;
        axpy(alpha, &p, x);
        axpy(-alpha, &ap, &mut r);

        abs_res = vec_norm(&r);
        if diverged(abs_res) {
            return Ok(finish(iterations, abs_res, rel_res, SolveStatus::Diverged));
        }

        pc.apply(&r, &mut z)?;
        let rz_new = dot(&r, &z);
        rel_res = relative_residual(
            params.stop,
            abs_res,
            Some(rz_new.max(0.0).sqrt()),
            b_norm,
            vec_norm(x),
        );

        if safe_net {
            let improved = best.as_ref().map_or(true, |(_, res)| abs_res < *res);
            if improved {
                best = Some((x.to_vec(), abs_res));
            }
        }

        // stagnation guard: negligible update relative to the iterate
        let x_norm = vec_norm(x);
        if x_norm > SMALL && alpha.abs() * vec_norm(&p) / x_norm < params.tol * STAG_RATIO {
            stag_steps += 1;
        } else {
            stag_steps = 0;
        }
        if stag_steps >= MAX_STAG {
            a.residual(x, b, &mut r)?;
            abs_res = vec_norm(&r);
            rel_res = relative_residual(params.stop, abs_res, None, b_norm, x_norm);
            if rel_res < params.tol {
                return Ok(finalize(a, b, x, iterations, abs_res, rel_res, best, safe_net)?);
            }
            restarts += 1;
            stag_steps = 0;
            if restarts > MAX_RESTART {
                debug!("pcg: stagnation after {} restarts", restarts - 1);
                return Ok(finalize(
                    a, b, x, iterations, abs_res, rel_res, best, safe_net,
                )?
                .with_status(SolveStatus::Stagnated));
            }
            pc.apply(&r, &mut z)?;
            p.copy_from_slice(&z);
            rz = dot(&r, &z);
            continue;
        }

        if rel_res < params.tol {
            // certify with the true residual before declaring victory
            a.residual(x, b, &mut r)?;
            abs_res = vec_norm(&r);
            let true_rel = relative_residual(params.stop, abs_res, None, b_norm, x_norm);
            if true_rel < params.tol {
                return Ok(finalize(a, b, x, iterations, abs_res, true_rel, best, safe_net)?);
            }
            restarts += 1;
            if restarts > MAX_RESTART {
                debug!("pcg: tolerance unreachable after {} restarts", restarts - 1);
                return Ok(finalize(
                    a, b, x, iterations, abs_res, true_rel, best, safe_net,
                )?
                .with_status(SolveStatus::ToleranceTooSmall));
            }
            rel_res = true_rel;
            pc.apply(&r, &mut z)?;
            p.copy_from_slice(&z);
            rz = dot(&r, &z);
            continue;
        }

        let beta = rz_new / rz;
        rz = rz_new;
        axpby(1.0, &z, beta, &mut p);
    }

    Ok(finalize(a, b, x, iterations, abs_res, rel_res, best, safe_net)?
        .with_status(SolveStatus::MaxIterations))
}

/// Restore the best iterate when the safe net holds a better one, then
/// report convergence.
#[allow(clippy::too_many_arguments)]
fn finalize(
    a: &dyn SparseOperator,
    b: &[Precision],
    x: &mut [Precision],
    iterations: usize,
    abs_res: Precision,
    rel_res: Precision,
    best: Option<(Vec<Precision>, Precision)>,
    safe_net: bool,
) -> Result<SolveReport> {
    let mut abs_res = abs_res;
    let mut rel_res = rel_res;
    if safe_net {
        if let Some((best_x, best_res)) = best {
            if best_res < abs_res {
                x.copy_from_slice(&best_x);
                let mut r = vec![0.0; b.len()];
                a.residual(x, b, &mut r)?;
                abs_res = vec_norm(&r);
                rel_res = abs_res / vec_norm(b).max(SMALL);
            }
        }
    }
    Ok(finish(iterations, abs_res, rel_res, SolveStatus::Converged))
}

trait WithStatus {
    fn with_status(self, status: SolveStatus) -> SolveReport;
}

impl WithStatus for SolveReport {
    fn with_status(mut self, status: SolveStatus) -> SolveReport {
        self.status = status;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::krylov::IdentityPrecond;
    use crate::matrix::CsrMatrix;
    use crate::types::StopCriterion;

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
    fn cg_solves_spd_system() {
        let a = laplace_1d(50);
        let b = vec![1.0; 50];
        let mut x = vec![0.0; 50];
        let params = KrylovParams { tol: 1e-10, max_iterations: 200, ..KrylovParams::default() };
        let report = pcg(&a, &b, &mut x, &mut IdentityPrecond, &params, false).unwrap();
        assert!(report.is_converged());
        let mut r = vec![0.0; 50];
        a.residual(&x, &b, &mut r).unwrap();
        assert!(vec_norm(&r) / vec_norm(&b) < 1e-9);
    }

    #[test]
    fn starting_from_the_solution_stops_immediately() {
        let a = CsrMatrix::identity(10);
        let b = vec![3.0; 10];
        let mut x = vec![3.0; 10];
        let params = KrylovParams::default();
        let report = pcg(&a, &b, &mut x, &mut IdentityPrecond, &params, false).unwrap();
        assert!(report.is_converged());
        assert_eq!(report.iterations, 0);
    }

    #[test]
    fn identity_converges_in_one_iteration() {
        let a = CsrMatrix::identity(100);
        let b: Vec<f64> = (0..100).map(|i| (i % 7) as f64 - 3.0).collect();
        let mut x = vec![0.0; 100];
        let params = KrylovParams::default();
        let report = pcg(&a, &b, &mut x, &mut IdentityPrecond, &params, false).unwrap();
        assert!(report.is_converged());
        assert!(report.iterations <= 1);
    }

    #[test]
    fn iteration_cap_is_reported() {
        let a = laplace_1d(400);
        let b = vec![1.0; 400];
        let mut x = vec![0.0; 400];
        let params = KrylovParams {
            tol: 1e-14,
            max_iterations: 3,
            ..KrylovParams::default()
        };
        let report = pcg(&a, &b, &mut x, &mut IdentityPrecond, &params, false).unwrap();
        assert_eq!(report.status, SolveStatus::MaxIterations);
        assert_eq!(report.iterations, 3);
    }

    #[test]
    fn safe_net_keeps_a_defined_iterate() {
        let a = laplace_1d(60);
        let b = vec![1.0; 60];
        let mut x = vec![0.0; 60];
        let params = KrylovParams { tol: 1e-8, max_iterations: 300, ..KrylovParams::default() };
        let report = pcg(&a, &b, &mut x, &mut IdentityPrecond, &params, true).unwrap();
        assert!(report.is_converged());
        assert!(x.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn modified_residual_stop_converges() {
        let a = laplace_1d(30);
        let b = vec![1.0; 30];
        let mut x = vec![0.0; 30];
        let params = KrylovParams {
            stop: StopCriterion::ModifiedResidual,
            tol: 1e-8,
            max_iterations: 200,
            ..KrylovParams::default()
        };
        let report = pcg(&a, &b, &mut x, &mut IdentityPrecond, &params, false).unwrap();
        assert!(report.is_converged());
    }
}
