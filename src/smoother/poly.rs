//! Chebyshev polynomial smoother.
//!
//! Runs a fixed-degree Chebyshev iteration for D⁻¹A on the interval
//! [λ_min, λ_max], damping the upper part of the spectrum. λ_max is
//! estimated once at setup by a seeded power iteration so repeated setups
//! are deterministic.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::{AmgError, Result};
use crate::kernels::norm2;
use crate::matrix::{CsrMatrix, SparseOperator};
use crate::types::{Precision, SMALL};

/// Fraction of λ_max taken as the lower end of the smoothing interval.
const INTERVAL_FRACTION: Precision = 0.25;

/// Iterations of the power method behind the λ_max estimate.
const POWER_ITERATIONS: usize = 20;

/// Safety margin on the estimated spectral radius.
const SPECTRAL_MARGIN: Precision = 1.1;

/// Prepared Chebyshev smoother state for one level.
#[derive(Debug, Clone)]
pub struct ChebyshevSmoother {
    degree: usize,
    lambda_min: Precision,
    lambda_max: Precision,
    diag_inv: Vec<Precision>,
}

impl ChebyshevSmoother {
    /// Estimate the spectral interval of D⁻¹A and fix the polynomial degree.
    pub fn prepare(a: &CsrMatrix, degree: usize) -> Result<Self> {
        if degree == 0 {
            return Err(AmgError::InvalidParameter {
                name: "amli_degree",
                message: "polynomial smoother needs degree at least 1".into(),
            });
        }
        let diag = a.diagonal()?;
        let mut diag_inv = Vec::with_capacity(diag.len());
        for (i, &d) in diag.iter().enumerate() {
            if d.abs() < SMALL {
                return Err(AmgError::SingularPivot { row: i, context: "polynomial setup" });
            }
            diag_inv.push(1.0 / d);
        }
        let lambda_max = estimate_lambda_max(a, &diag_inv) * SPECTRAL_MARGIN;
        Ok(Self {
            degree,
            lambda_min: lambda_max * INTERVAL_FRACTION,
            lambda_max,
            diag_inv,
        })
    }

    /// Estimated upper eigenvalue bound of D⁻¹A.
    pub fn lambda_max(&self) -> Precision {
        self.lambda_max
    }

    /// One polynomial application of the configured degree.
    pub fn smooth(&self, a: &CsrMatrix, x: &mut [Precision], b: &[Precision]) -> Result<()> {
        let n = a.rows();
        let theta = (self.lambda_max + self.lambda_min) / 2.0;
        let delta = (self.lambda_max - self.lambda_min) / 2.0;
        let sigma = theta / delta;
        let mut rho = 1.0 / sigma;

        let mut r = vec![0.0; n];
        a.residual(x, b, &mut r)?;
        for (rv, &d) in r.iter_mut().zip(self.diag_inv.iter()) {
            *rv *= d;
        }
        let mut dir: Vec<Precision> = r.iter().map(|&rv| rv / theta).collect();
        let mut tmp = vec![0.0; n];

        for k in 0..self.degree {
            for (xv, &dv) in x.iter_mut().zip(dir.iter()) {
                *xv += dv;
            }
            if k + 1 == self.degree {
                break;
            }
            a.apply(&dir, &mut tmp)?;
            for ((rv, &t), &d) in r.iter_mut().zip(tmp.iter()).zip(self.diag_inv.iter()) {
                *rv -= t * d;
            }
            let rho_next = 1.0 / (2.0 * sigma - rho);
            let dir_scale = rho_next * rho;
            let res_scale = 2.0 * rho_next / delta;
            for (dv, &rv) in dir.iter_mut().zip(r.iter()) {
                *dv = dir_scale * *dv + res_scale * rv;
            }
            rho = rho_next;
        }
        Ok(())
    }
}

fn estimate_lambda_max(a: &CsrMatrix, diag_inv: &[Precision]) -> Precision {
    let n = a.rows();
    let mut rng = SmallRng::seed_from_u64(0x5eed);
    let mut v: Vec<Precision> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let norm = norm2(&v).max(SMALL);
    for val in v.iter_mut() {
        *val /= norm;
    }
    let mut w = vec![0.0; n];
    let mut lambda: Precision = 1.0;
    for _ in 0..POWER_ITERATIONS {
        if a.apply(&v, &mut w).is_err() {
            break;
        }
        for (wv, &d) in w.iter_mut().zip(diag_inv.iter()) {
            *wv *= d;
        }
        let norm = norm2(&w);
        if norm < SMALL {
            break;
        }
        lambda = norm;
        for (vv, &wv) in v.iter_mut().zip(w.iter()) {
            *vv = wv / norm;
        }
    }
    lambda
}
