//! Outer-method boundary behavior across preconditioners.

use amg_solver::{
    bicgstab, gmres, minres, pcg, AmgConfig, AmgPrecond, CsrMatrix, DiagonalPrecond,
    Hierarchy, IdentityPrecond, KrylovParams, SolveStatus, SparseOperator,
};

fn norm2(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

fn laplace_2d(nx: usize) -> CsrMatrix {
    let n = nx * nx;
    let mut t = Vec::new();
    for y in 0..nx {
        for x in 0..nx {
            let i = y * nx + x;
            t.push((i, i, 4.0));
            if x > 0 {
                t.push((i, i - 1, -1.0));
            }
            if x + 1 < nx {
                t.push((i, i + 1, -1.0));
            }
            if y > 0 {
                t.push((i, i - nx, -1.0));
            }
            if y + 1 < nx {
                t.push((i, i + nx, -1.0));
            }
        }
    }
    CsrMatrix::from_triplets(t, n, n).unwrap()
}

fn solution_rhs(a: &CsrMatrix) -> (Vec<f64>, Vec<f64>) {
    let n = a.rows();
    let exact: Vec<f64> = (0..n).map(|i| ((i * 13 + 5) % 17) as f64 / 17.0).collect();
    let mut b = vec![0.0; n];
    a.apply(&exact, &mut b).unwrap();
    (exact, b)
}

#[test]
fn starting_from_the_exact_solution_terminates_at_once() {
    let a = laplace_2d(16);
    let (exact, b) = solution_rhs(&a);
    let params = KrylovParams { tol: 1e-8, ..KrylovParams::default() };

    let mut x = exact.clone();
    let report = pcg(&a, &b, &mut x, &mut IdentityPrecond, &params, false).unwrap();
    assert!(report.is_converged());
    assert!(report.iterations <= 1);

    let mut x = exact.clone();
    let report = minres(&a, &b, &mut x, &mut IdentityPrecond, &params).unwrap();
    assert!(report.is_converged());
    assert!(report.iterations <= 1);
}

#[test]
fn amg_preconditioned_cg_beats_unpreconditioned() {
    let a = laplace_2d(32);
    let (_, b) = solution_rhs(&a);
    let params = KrylovParams { tol: 1e-8, max_iterations: 1000, ..KrylovParams::default() };

    let mut x_plain = vec![0.0; a.rows()];
    let plain = pcg(&a, &b, &mut x_plain, &mut IdentityPrecond, &params, false).unwrap();

    let hierarchy =
        Hierarchy::setup(a.clone(), &AmgConfig { coarse_dof: 20, ..AmgConfig::default() })
            .unwrap();
    let mut amg = AmgPrecond::new(hierarchy);
    let mut x_amg = vec![0.0; a.rows()];
    let preconditioned = pcg(&a, &b, &mut x_amg, &mut amg, &params, false).unwrap();

    assert!(plain.is_converged());
    assert!(preconditioned.is_converged());
    assert!(preconditioned.iterations < plain.iterations);
    assert!(preconditioned.iterations <= 15);
}

#[test]
fn all_methods_agree_on_the_solution() {
    let a = laplace_2d(12);
    let (exact, b) = solution_rhs(&a);
    let params = KrylovParams { tol: 1e-10, max_iterations: 2000, ..KrylovParams::default() };

    let run = |which: &str, x: &mut Vec<f64>| {
        let report = match which {
            "cg" => pcg(&a, &b, x, &mut DiagonalPrecond::new(&a).unwrap(), &params, false)
                .unwrap(),
            "minres" => {
                minres(&a, &b, x, &mut DiagonalPrecond::new(&a).unwrap(), &params).unwrap()
            }
            "gmres" => {
                gmres(&a, &b, x, &mut DiagonalPrecond::new(&a).unwrap(), &params).unwrap()
            }
            _ => bicgstab(&a, &b, x, &mut DiagonalPrecond::new(&a).unwrap(), &params, true)
                .unwrap(),
        };
        assert!(report.is_converged(), "{} did not converge", which);
    };

    for which in ["cg", "minres", "gmres", "bicgstab"] {
        let mut x = vec![0.0; a.rows()];
        run(which, &mut x);
        let err: Vec<f64> = x.iter().zip(exact.iter()).map(|(a, b)| a - b).collect();
        assert!(
            norm2(&err) / norm2(&exact) < 1e-7,
            "{} is off the exact solution",
            which
        );
    }
}

#[test]
fn tiny_iteration_budget_reports_max_iterations() {
    let a = laplace_2d(24);
    let (_, b) = solution_rhs(&a);
    let params = KrylovParams { tol: 1e-12, max_iterations: 2, ..KrylovParams::default() };
    let mut x = vec![0.0; a.rows()];
    let report = pcg(&a, &b, &mut x, &mut IdentityPrecond, &params, false).unwrap();
    assert_eq!(report.status, SolveStatus::MaxIterations);
    // the iterate is still defined and finite
    assert!(x.iter().all(|v| v.is_finite()));
}
