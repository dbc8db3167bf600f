//! Dense vector kernels used by the smoothers and outer methods.
//!
//! The outer Krylov loops are sequential; these row-parallel kernels are the
//! only place intra-node parallelism enters the solve phase. Each parallel
//! region is a synchronous join, gated by [`PARALLEL_MIN_ROWS`] so small
//! coarse levels stay on the serial path.

use crate::types::Precision;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Minimum problem size before the rayon path is taken.
pub const PARALLEL_MIN_ROWS: usize = 4096;

/// Dot product x·y.
pub fn dot(x: &[Precision], y: &[Precision]) -> Precision {
    debug_assert_eq!(x.len(), y.len());
    #[cfg(feature = "parallel")]
    {
        if x.len() >= PARALLEL_MIN_ROWS {
            return x
                .par_iter()
                .zip(y.par_iter())
                .map(|(&a, &b)| a * b)
                .sum();
        }
    }
    x.iter().zip(y.iter()).map(|(&a, &b)| a * b).sum()
}

/// Euclidean norm ‖x‖₂.
pub fn norm2(x: &[Precision]) -> Precision {
    dot(x, x).sqrt()
}

/// Maximum norm ‖x‖∞.
pub fn norm_inf(x: &[Precision]) -> Precision {
    x.iter().map(|v| v.abs()).fold(0.0, Precision::max)
}

/// y ← y + α·x.
pub fn axpy(alpha: Precision, x: &[Precision], y: &mut [Precision]) {
    debug_assert_eq!(x.len(), y.len());
    #[cfg(feature = "parallel")]
    {
        if x.len() >= PARALLEL_MIN_ROWS {
            y.par_iter_mut()
                .zip(x.par_iter())
                .for_each(|(yv, &xv)| *yv += alpha * xv);
            return;
        }
    }
    for (yv, &xv) in y.iter_mut().zip(x.iter()) {
        *yv += alpha * xv;
    }
}

/// y ← α·x + β·y.
pub fn axpby(alpha: Precision, x: &[Precision], beta: Precision, y: &mut [Precision]) {
    debug_assert_eq!(x.len(), y.len());
    for (yv, &xv) in y.iter_mut().zip(x.iter()) {
        *yv = alpha * xv + beta * *yv;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn dot_and_norms() {
        let x = vec![3.0, 4.0];
        assert_relative_eq!(dot(&x, &x), 25.0);
        assert_relative_eq!(norm2(&x), 5.0);
        assert_relative_eq!(norm_inf(&x), 4.0);
    }

    #[test]
    fn axpy_updates_in_place() {
        let x = vec![1.0, 2.0, 3.0];
        let mut y = vec![1.0, 1.0, 1.0];
        axpy(2.0, &x, &mut y);
        assert_eq!(y, vec![3.0, 5.0, 7.0]);
    }

    #[test]
    fn axpby_combines() {
        let x = vec![1.0, 2.0];
        let mut y = vec![10.0, 10.0];
        axpby(1.0, &x, 0.5, &mut y);
        assert_eq!(y, vec![6.0, 7.0]);
    }

    #[test]
    fn dot_above_parallel_threshold() {
        let n = PARALLEL_MIN_ROWS + 17;
        let x = vec![1.0; n];
        assert_relative_eq!(dot(&x, &x), n as Precision);
    }
}
