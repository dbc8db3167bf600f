//! Overlapping-block additive Schwarz smoother.
//!
//! Blocks are grown by breadth-first expansion from uncovered seed vertices
//! up to a configured level, capped by a maximum block size. Each block's
//! principal submatrix is factored densely at setup; a sweep solves every
//! block against its slice of the global residual and accumulates the
//! corrections.

use core::fmt;

use nalgebra::{DMatrix, DVector, Dyn};

use crate::error::{AmgError, Result};
use crate::matrix::{CsrMatrix, SparseOperator};
use crate::types::Precision;

/// Block construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchwarzConfig {
    /// Breadth-first expansion depth from each seed.
    pub max_levels: usize,
    /// Upper bound on block size.
    pub max_block_size: usize,
}

impl Default for SchwarzConfig {
    fn default() -> Self {
        Self { max_levels: 2, max_block_size: 200 }
    }
}

struct SchwarzBlock {
    dofs: Vec<usize>,
    lu: nalgebra::LU<Precision, Dyn, Dyn>,
}

/// Prepared Schwarz smoother: overlapping blocks with dense factors.
///
/// Corrections on unknowns covered by several blocks are averaged by the
/// coverage count, a partition-of-unity weighting that keeps the additive
/// sweep convergent on M-matrix-like operators.
pub struct SchwarzSmoother {
    blocks: Vec<SchwarzBlock>,
    weights: Vec<Precision>,
}

impl fmt::Debug for SchwarzSmoother {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchwarzSmoother")
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

impl SchwarzSmoother {
    /// Build the block partition of `a` and factor every block.
    pub fn prepare(a: &CsrMatrix, config: &SchwarzConfig) -> Result<Self> {
        let n = a.rows();
        if config.max_block_size == 0 {
            return Err(AmgError::InvalidParameter {
                name: "Schwarz_mmsize",
                message: "block size bound must be positive".into(),
            });
        }
        let mut covered = vec![false; n];
        let mut in_block = vec![false; n];
        let mut blocks = Vec::new();

        for seed in 0..n {
            if covered[seed] {
                continue;
            }
            let dofs = expand_block(a, seed, config, &mut in_block);
            for &i in &dofs {
                covered[i] = true;
            }

            let m = dofs.len();
            let mut local_index = vec![usize::MAX; n];
            for (p, &i) in dofs.iter().enumerate() {
                local_index[i] = p;
            }
            let mut local = DMatrix::<Precision>::zeros(m, m);
            for (p, &i) in dofs.iter().enumerate() {
                for (j, v) in a.row_iter(i) {
                    let q = local_index[j];
                    if q != usize::MAX {
                        local[(p, q)] += v;
                    }
                }
            }
            let lu = local.lu();
            if !lu.is_invertible() {
                return Err(AmgError::SingularPivot {
                    row: seed,
                    context: "schwarz factorization",
                });
            }
            blocks.push(SchwarzBlock { dofs, lu });
        }

        let mut weights = vec![0.0; n];
        for block in &blocks {
            for &i in &block.dofs {
                weights[i] += 1.0;
            }
        }
        for w in weights.iter_mut() {
            if *w > 0.0 {
                *w = 1.0 / *w;
            }
        }
        Ok(Self { blocks, weights })
    }

    /// Number of blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Preconditioner form: z ← Σ_B extend(A_BB⁻¹ · r|_B) from a zero
    /// initial guess, so no residual evaluation is needed.
    pub fn precondition(&self, r: &[Precision], z: &mut [Precision]) -> Result<()> {
        z.fill(0.0);
        for block in &self.blocks {
            let m = block.dofs.len();
            let mut rhs = DVector::<Precision>::zeros(m);
            for (p, &i) in block.dofs.iter().enumerate() {
                rhs[p] = r[i];
            }
            let sol = block.lu.solve(&rhs).ok_or(AmgError::SingularPivot {
                row: block.dofs[0],
                context: "triangular solve",
            })?;
            for (p, &i) in block.dofs.iter().enumerate() {
                z[i] += self.weights[i] * sol[p];
            }
        }
        Ok(())
    }

    /// One additive sweep: x ← x + Σ_B extend(A_BB⁻¹ · (b − A·x)|_B).
    pub fn smooth(
        &self,
        a: &CsrMatrix,
        x: &mut [Precision],
        b: &[Precision],
        work: &mut [Precision],
    ) -> Result<()> {
        a.residual(x, b, work)?;
        for block in &self.blocks {
            let m = block.dofs.len();
            let mut rhs = DVector::<Precision>::zeros(m);
            for (p, &i) in block.dofs.iter().enumerate() {
                rhs[p] = work[i];
            }
            let sol = block.lu.solve(&rhs).ok_or(AmgError::SingularPivot {
                row: block.dofs[0],
                context: "triangular solve",
            })?;
            for (p, &i) in block.dofs.iter().enumerate() {
                x[i] += self.weights[i] * sol[p];
            }
        }
        Ok(())
    }
}

/// Breadth-first neighborhood of `seed`, expanded `max_levels` times and
/// truncated at the size bound. `in_block` is caller-owned scratch reset on
/// return.
fn expand_block(
    a: &CsrMatrix,
    seed: usize,
    config: &SchwarzConfig,
    in_block: &mut [bool],
) -> Vec<usize> {
    let mut dofs = vec![seed];
    in_block[seed] = true;
    let mut frontier_start = 0usize;
    for _ in 0..config.max_levels {
        let frontier_end = dofs.len();
        if frontier_start == frontier_end || dofs.len() >= config.max_block_size {
            break;
        }
        for idx in frontier_start..frontier_end {
            let i = dofs[idx];
            for (j, _) in a.row_iter(i) {
                if !in_block[j] && dofs.len() < config.max_block_size {
                    in_block[j] = true;
                    dofs.push(j);
                }
            }
        }
        frontier_start = frontier_end;
    }
    for &i in &dofs {
        in_block[i] = false;
    }
    dofs.sort_unstable();
    dofs
}
