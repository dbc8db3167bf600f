//! Error types for matrix kernels, hierarchy setup and outer solvers.
//!
//! Setup-time numeric trouble is usually recoverable by demotion (drop the
//! ILU smoother, stop adding levels, retry with an adjusted threshold);
//! solve-time numeric trouble surfaces to the caller together with the
//! best-known iterate. [`AmgError::is_recoverable`] encodes that split.

use thiserror::Error;

use crate::types::Precision;

/// Result type alias for all solver operations.
pub type Result<T> = core::result::Result<T, AmgError>;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum AmgError {
    /// A row has no diagonal entry where one is required.
    #[error("missing diagonal entry in row {row}")]
    MissingDiagonal {
        /// Row without a diagonal entry.
        row: usize,
    },

    /// A diagonal entry is negative where an M-matrix-like sign pattern is
    /// assumed.
    #[error("negative diagonal {value:.6e} in row {row}")]
    NegativeDiagonal {
        /// Offending row.
        row: usize,
        /// Diagonal value found.
        value: Precision,
    },

    /// A zero or numerically tiny pivot was hit during a triangular solve or
    /// factorization.
    #[error("zero or near-zero pivot in row {row} during {context}")]
    SingularPivot {
        /// Row of the failing pivot.
        row: usize,
        /// Operation that hit the pivot.
        context: &'static str,
    },

    /// The residual norm became NaN or infinite.
    #[error("residual diverged at iteration {iteration} (norm = {residual_norm:.2e})")]
    DivergedResidual {
        /// Outer iteration at which divergence was detected.
        iteration: usize,
        /// Residual norm at that point.
        residual_norm: Precision,
    },

    /// The outer iteration made no measurable progress.
    #[error("solver stagnated after {iterations} iterations (residual = {residual_norm:.2e})")]
    Stagnation {
        /// Iterations performed before giving up.
        iterations: usize,
        /// True residual norm at exit.
        residual_norm: Precision,
    },

    /// The iterative residual met the tolerance but the true residual does
    /// not, even after restarts.
    #[error(
        "tolerance {tolerance:.2e} unreachable: true residual {residual_norm:.2e} \
         after {iterations} iterations"
    )]
    ToleranceTooSmall {
        /// Iterations performed.
        iterations: usize,
        /// True residual norm at exit.
        residual_norm: Precision,
        /// Requested tolerance.
        tolerance: Precision,
    },

    /// The strength graph of a level has no edges.
    #[error("no strong connections on level {level}")]
    NoStrongConnections {
        /// Level at which the strength graph came out empty.
        level: usize,
    },

    /// Coarsening produced no coarse unknowns or no aggregates.
    #[error("coarsening produced an empty coarse space on level {level}")]
    EmptyCoarsening {
        /// Level at which coarsening failed.
        level: usize,
    },

    /// An aggregate exceeded the configured size bound.
    #[error("aggregate of size {size} exceeds bound {bound} on level {level}")]
    AggregateBound {
        /// Level at which the bound was violated.
        level: usize,
        /// Observed aggregate size.
        size: usize,
        /// Configured maximum.
        bound: usize,
    },

    /// Vector or matrix dimensions do not match.
    #[error("dimension mismatch in {operation}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Dimension found.
        actual: usize,
        /// Operation that detected the mismatch.
        operation: &'static str,
    },

    /// A configuration value is out of range or inconsistent.
    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Why the value was rejected.
        message: String,
    },

    /// Underlying I/O failure while reading matrix or vector files.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A matrix or vector file did not match the expected dialect.
    #[error("format error at line {line}: {message}")]
    FormatMismatch {
        /// 1-based line number in the input.
        line: usize,
        /// What was expected.
        message: String,
    },
}

impl AmgError {
    /// Whether the setup pipeline may recover from this error by demotion:
    /// disabling a smoother, stopping at the current level, or retrying with
    /// an adjusted threshold.
    pub fn is_recoverable(&self) -> bool {
        match self {
            AmgError::NegativeDiagonal { .. } => false,
            AmgError::MissingDiagonal { .. } => false,
            AmgError::SingularPivot { context, .. } => *context != "triangular solve",
            AmgError::NoStrongConnections { .. } => true,
            AmgError::EmptyCoarsening { .. } => true,
            AmgError::AggregateBound { .. } => true,
            AmgError::Stagnation { .. } => true,
            AmgError::ToleranceTooSmall { .. } => true,
            AmgError::DivergedResidual { .. } => false,
            AmgError::DimensionMismatch { .. } => false,
            AmgError::InvalidParameter { .. } => false,
            AmgError::Io(_) => false,
            AmgError::FormatMismatch { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverability_split() {
        let structural = AmgError::NoStrongConnections { level: 2 };
        assert!(structural.is_recoverable());

        let fatal = AmgError::NegativeDiagonal { row: 3, value: -1.0 };
        assert!(!fatal.is_recoverable());

        let setup_pivot = AmgError::SingularPivot { row: 0, context: "ilu factorization" };
        assert!(setup_pivot.is_recoverable());

        let solve_pivot = AmgError::SingularPivot { row: 0, context: "triangular solve" };
        assert!(!solve_pivot.is_recoverable());
    }

    #[test]
    fn display_includes_context() {
        let err = AmgError::DimensionMismatch {
            expected: 10,
            actual: 7,
            operation: "spmv",
        };
        let text = format!("{}", err);
        assert!(text.contains("spmv"));
        assert!(text.contains("10"));
    }
}
