//! Sparse matrix storage and kernels.
//!
//! The CSR type in [`csr`] carries the whole setup-phase kernel: transpose,
//! permutation, compression, diagonal handling and the Galerkin triple
//! product in [`rap`]. Algorithms that only need to apply an operator go
//! through the [`SparseOperator`] trait so one implementation of each outer
//! method serves every format.

use crate::error::Result;
use crate::types::Precision;

pub mod csr;
pub mod rap;

pub use csr::{CsrMatrix, CsrPattern};
pub use rap::{galerkin_product, rap, rap_agg};

/// A sparse operator applicable to vectors.
///
/// This is the seam between matrix storage and the outer methods: Krylov
/// solvers and smoother drivers are written once against this trait, and
/// format-specific fast paths live in the implementations.
pub trait SparseOperator: Send + Sync {
    /// Number of rows.
    fn rows(&self) -> usize;

    /// Number of columns.
    fn cols(&self) -> usize;

    /// Number of stored entries.
    fn nnz(&self) -> usize;

    /// y ← A·x.
    fn apply(&self, x: &[Precision], y: &mut [Precision]) -> Result<()>;

    /// y ← y + A·x.
    fn apply_add(&self, x: &[Precision], y: &mut [Precision]) -> Result<()>;

    /// y ← Aᵀ·x.
    fn apply_transpose(&self, x: &[Precision], y: &mut [Precision]) -> Result<()>;

    /// Extract the diagonal.
    fn diagonal(&self) -> Result<Vec<Precision>>;

    /// r ← b − A·x.
    fn residual(&self, x: &[Precision], b: &[Precision], r: &mut [Precision]) -> Result<()> {
        self.apply(x, r)?;
        for (rv, &bv) in r.iter_mut().zip(b.iter()) {
            *rv = bv - *rv;
        }
        Ok(())
    }
}
