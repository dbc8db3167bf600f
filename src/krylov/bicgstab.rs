//! Preconditioned BiCGSTAB, with an optional best-iterate safe net.
//!
//! The stabilized bi-conjugate gradient method for nonsymmetric systems.
//! Breakdown of the bi-orthogonal recurrence (vanishing ρ, shadow product
//! or stabilization denominator) is reported as stagnation; with the safe
//! net enabled the best iterate seen replaces a worse final one.

use log::debug;

use crate::error::Result;
use crate::kernels::{axpy, dot};
use crate::krylov::{
    diverged, finish, relative_residual, vec_norm, KrylovParams, Preconditioner, MAX_RESTART,
};
use crate::matrix::SparseOperator;
use crate::types::{Precision, SolveReport, SolveStatus, SMALL};

/// Solve Ax = b for general (nonsymmetric) A.
pub fn bicgstab(
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
    a.residual(x, b, &mut r)?;
    let mut abs_res = vec_norm(&r);
    let mut rel_res = relative_residual(params.stop, abs_res, None, b_norm, vec_norm(x));
    if rel_res < params.tol {
        return Ok(finish(0, abs_res, rel_res, SolveStatus::Converged));
    }

    let r_shadow = r.clone();
    let mut p = vec![0.0; n];
    let mut v = vec![0.0; n];
    let mut phat = vec![0.0; n];
    let mut s = vec![0.0; n];
    let mut shat = vec![0.0; n];
    let mut t = vec![0.0; n];

    let mut rho: Precision = 1.0;
    let mut alpha: Precision = 1.0;
    let mut omega: Precision = 1.0;

    let mut best: Option<(Vec<Precision>, Precision)> = None;
    let mut certifications = 0usize;
    let mut iterations = 0usize;
    let mut status = SolveStatus::MaxIterations;

    while iterations < params.max_iterations {
        iterations += 1;

        let rho_new = dot(&r_shadow, &r);
        if rho_new.abs() < SMALL * abs_res.max(1.0) {
            debug!("bicgstab: shadow residual breakdown at iteration {}", iterations);
            status = SolveStatus::Stagnated;
            break;
        }
        let beta = (rho_new / rho) * (alpha / omega);
        rho = rho_new;
        // p = r + beta (p - omega v)
        for i in 0..n {
            p[i] = r[i] + beta * (p[i] - omega * v[i]);
        }

        pc.apply(&p, &mut phat)?;
        a.apply(&phat, &mut v)?;
        let shadow_v = dot(&r_shadow, &v);
        if shadow_v.abs() < SMALL {
            debug!("bicgstab: bi-orthogonality breakdown at iteration {}", iterations);
            status = SolveStatus::Stagnated;
            break;
        }
        alpha = rho / shadow_v;

        for i in 0..n {
            s[i] = r[i] - alpha * v[i];
        }
        if vec_norm(&s) < SMALL {
            axpy(alpha, &phat, x);
            a.residual(x, b, &mut r)?;
            abs_res = vec_norm(&r);
            rel_res = relative_residual(params.stop, abs_res, None, b_norm, vec_norm(x));
            status = SolveStatus::Converged;
            break;
        }

        pc.apply(&s, &mut shat)?;
        a.apply(&shat, &mut t)?;
        let tt = dot(&t, &t);
        if tt < SMALL {
            debug!("bicgstab: stabilization breakdown at iteration {}", iterations);
            status = SolveStatus::Stagnated;
            break;
        }
        omega = dot(&t, &s) / tt;

        axpy(alpha, &phat, x);
        axpy(omega, &shat, x);
        for i in 0..n {
            r[i] = s[i] - omega * t[i];
        }

        abs_res = vec_norm(&r);
        if diverged(abs_res) {
            status = SolveStatus::Diverged;
            break;
        }
        rel_res = relative_residual(params.stop, abs_res, None, b_norm, vec_norm(x));

        if safe_net {
            let improved = best.as_ref().map_or(true, |(_, res)| abs_res < *res);
            if improved {
                best = Some((x.to_vec(), abs_res));
            }
        }

        if omega.abs() < SMALL {
            debug!("bicgstab: vanishing stabilization weight at iteration {}", iterations);
            status = SolveStatus::Stagnated;
            break;
        }

        if rel_res < params.tol {
            // certify against the true residual
            a.residual(x, b, &mut r)?;
            abs_res = vec_norm(&r);
            let true_rel = relative_residual(params.stop, abs_res, None, b_norm, vec_norm(x));
            if true_rel < params.tol {
                rel_res = true_rel;
                status = SolveStatus::Converged;
                break;
            }
            certifications += 1;
            if certifications > MAX_RESTART {
                rel_res = true_rel;
                status = SolveStatus::ToleranceTooSmall;
                break;
            }
            rel_res = true_rel;
        }
    }

    if safe_net {
        if let Some((best_x, best_res)) = best {
            if best_res < abs_res {
                x.copy_from_slice(&best_x);
                a.residual(x, b, &mut r)?;
                abs_res = vec_norm(&r);
                rel_res = relative_residual(params.stop, abs_res, None, b_norm, vec_norm(x));
            }
        }
    }
    Ok(finish(iterations, abs_res, rel_res, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::krylov::IdentityPrecond;
    use crate::matrix::CsrMatrix;

    fn convection_diffusion(n: usize) -> CsrMatrix {
        let mut t = Vec::new();
        for i in 0..n {
            t.push((i, i, 3.0));
            if i > 0 {
                t.push((i, i - 1, -2.0));
            }
            if i + 1 < n {
                t.push((i, i + 1, -0.5));
            }
        }
        CsrMatrix::from_triplets(t, n, n).unwrap()
    }

    #[test]
    fn bicgstab_solves_nonsymmetric_system() {
        let a = convection_diffusion(50);
        let b = vec![1.0; 50];
        let mut x = vec![0.0; 50];
        let params = KrylovParams { tol: 1e-9, max_iterations: 300, ..KrylovParams::default() };
        let report = bicgstab(&a, &b, &mut x, &mut IdentityPrecond, &params, false).unwrap();
        assert!(report.is_converged());
        let mut r = vec![0.0; 50];
        a.residual(&x, &b, &mut r).unwrap();
        assert!(vec_norm(&r) / vec_norm(&b) < 1e-8);
    }

    #[test]
    fn safe_net_restores_best_iterate_on_breakdown() {
        // zero right-hand side with a nonzero guess: the method may break
        // down once the residual reaches rounding level, but the reported
        // iterate must stay finite and at least as good as the best seen
        let a = convection_diffusion(20);
        let b = vec![0.0; 20];
        let mut x = vec![1.0; 20];
        let params = KrylovParams { tol: 1e-12, max_iterations: 100, ..KrylovParams::default() };
        let report = bicgstab(&a, &b, &mut x, &mut IdentityPrecond, &params, true).unwrap();
        assert!(x.iter().all(|v| v.is_finite()));
        assert!(report.residual_norm.is_finite());
    }

    #[test]
    fn identity_converges_in_one_iteration() {
        let a = CsrMatrix::identity(30);
        let b = vec![2.0; 30];
        let mut x = vec![0.0; 30];
        let params = KrylovParams::default();
        let report = bicgstab(&a, &b, &mut x, &mut IdentityPrecond, &params, false).unwrap();
        assert!(report.is_converged());
        assert!(report.iterations <= 1);
    }

    #[test]
    fn iteration_cap_is_reported() {
        let a = convection_diffusion(200);
        let b = vec![1.0; 200];
        let mut x = vec![0.0; 200];
        let params = KrylovParams { tol: 1e-15, max_iterations: 2, ..KrylovParams::default() };
        let report = bicgstab(&a, &b, &mut x, &mut IdentityPrecond, &params, false).unwrap();
        assert!(!report.is_converged());
    }
}
