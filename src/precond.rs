//! Preconditioner adapters composing the hierarchy, factorizations and
//! simple scalings with the outer Krylov methods.

use crate::cycle::{apply_cycle, CycleWorkspace};
use crate::error::{AmgError, Result};
use crate::hierarchy::Hierarchy;
use crate::krylov::Preconditioner;
use crate::matrix::{CsrMatrix, SparseOperator};
use crate::smoother::{IluFactorization, SchwarzSmoother};
use crate::types::{CycleKind, Precision, SMALL};

/// Diagonal (Jacobi) scaling.
#[derive(Debug, Clone)]
pub struct DiagonalPrecond {
    inv: Vec<Precision>,
}

impl DiagonalPrecond {
    /// Invert the diagonal of `a`.
    pub fn new(a: &CsrMatrix) -> Result<Self> {
        let diag = a.diagonal()?;
        let mut inv = Vec::with_capacity(diag.len());
        for (i, &d) in diag.iter().enumerate() {
            if d.abs() < SMALL {
                return Err(AmgError::SingularPivot { row: i, context: "diagonal scaling" });
            }
            inv.push(1.0 / d);
        }
        Ok(Self { inv })
    }
}

impl Preconditioner for DiagonalPrecond {
    fn apply(&mut self, r: &[Precision], z: &mut [Precision]) -> Result<()> {
        for ((zv, &rv), &d) in z.iter_mut().zip(r.iter()).zip(self.inv.iter()) {
            *zv = rv * d;
        }
        Ok(())
    }
}

/// One multigrid cycle per application.
#[derive(Debug)]
pub struct AmgPrecond {
    hierarchy: Hierarchy,
    workspace: CycleWorkspace,
}

impl AmgPrecond {
    /// Wrap a built hierarchy.
    pub fn new(hierarchy: Hierarchy) -> Self {
        let workspace = CycleWorkspace::new(&hierarchy);
        Self { hierarchy, workspace }
    }

    /// Access the wrapped hierarchy.
    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }
}

impl Preconditioner for AmgPrecond {
    fn apply(&mut self, r: &[Precision], z: &mut [Precision]) -> Result<()> {
        z.fill(0.0);
        apply_cycle(&self.hierarchy, &mut self.workspace, r, z)
    }

    fn is_variable(&self) -> bool {
        // the nonlinear cycle's step lengths depend on the input
        matches!(self.hierarchy.cycle, CycleKind::NonlinearAmli)
    }
}

/// ILU factorization of the fine-level matrix.
#[derive(Debug, Clone)]
pub struct IluPrecond {
    factors: IluFactorization,
}

impl IluPrecond {
    /// Wrap prepared factors.
    pub fn new(factors: IluFactorization) -> Self {
        Self { factors }
    }
}

impl Preconditioner for IluPrecond {
    fn apply(&mut self, r: &[Precision], z: &mut [Precision]) -> Result<()> {
        z.copy_from_slice(r);
        self.factors.solve_in_place(z)
    }
}

/// One additive Schwarz sweep per application.
pub struct SchwarzPrecond {
    smoother: SchwarzSmoother,
}

impl SchwarzPrecond {
    /// Wrap prepared blocks.
    pub fn new(smoother: SchwarzSmoother) -> Self {
        Self { smoother }
    }
}

impl Preconditioner for SchwarzPrecond {
    fn apply(&mut self, r: &[Precision], z: &mut [Precision]) -> Result<()> {
        self.smoother.precondition(r, z)
    }
}
