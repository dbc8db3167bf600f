//! Solver and hierarchy configuration.
//!
//! [`AmgConfig`] covers everything the setup pipeline consumes; the presets
//! mirror the parameter sets the original drivers shipped with.
//! [`SolverConfig`] selects the outer method, its preconditioner and the
//! stopping rule.

use crate::error::{AmgError, Result};
use crate::smoother::SmootherConfig;
use crate::strength::StrengthKind;
use crate::types::{
    AggregationKind, AmgKind, CoarseSolverKind, CoarseningKind, CycleKind, InterpKind,
    Precision, PrecondKind, SolverKind, StopCriterion,
};

/// Diagnostics verbosity: 0 silent, 1 summary, 2 per-level.
pub type PrintLevel = u8;

/// Multigrid setup parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AmgConfig {
    /// Hierarchy construction strategy.
    pub amg_kind: AmgKind,
    /// C/F coarsening algorithm for classical hierarchies.
    pub coarsening: CoarseningKind,
    /// Interpolation policy for classical hierarchies.
    pub interpolation: InterpKind,
    /// Aggregation algorithm for aggregation hierarchies.
    pub aggregation: AggregationKind,
    /// Matching passes for pairwise aggregation.
    pub pair_number: usize,
    /// Pairwise acceptance bound; larger admits weaker pairs.
    pub quality_bound: Precision,
    /// Strength threshold used by aggregation (strong_coupled).
    pub strong_coupled: Precision,
    /// Aggregate size cap for VMB aggregation.
    pub max_aggregation: usize,
    /// Strength threshold θ for classical coarsening.
    pub strength_threshold: Precision,
    /// Strength rule.
    pub strength_kind: StrengthKind,
    /// Row-sum bound θ₂ ∈ [0, 1]; rows above it are entirely weak.
    pub max_row_sum: Precision,
    /// Interpolation truncation fraction.
    pub truncation_threshold: Precision,
    /// Energy-min refinement steps.
    pub energy_min_steps: usize,
    /// Cycling strategy.
    pub cycle: CycleKind,
    /// AMLI polynomial degree.
    pub amli_degree: usize,
    /// Inner Krylov iterations of the nonlinear AMLI cycle.
    pub nl_amli_inner: usize,
    /// Maximum number of levels including the coarsest.
    pub max_levels: usize,
    /// Stop coarsening once a level has at most this many unknowns.
    pub coarse_dof: usize,
    /// Coarsest-level solver.
    pub coarse_solver: CoarseSolverKind,
    /// Pre-smoothing sweeps per level visit.
    pub presmooth: usize,
    /// Post-smoothing sweeps per level visit.
    pub postsmooth: usize,
    /// Smoother selection and parameters.
    pub smoother: SmootherConfig,
    /// Scale the coarse correction by an A-norm line search.
    pub coarse_scaling: bool,
    /// Diagnostics verbosity.
    pub print_level: PrintLevel,
}

impl Default for AmgConfig {
    fn default() -> Self {
        Self {
            amg_kind: AmgKind::Classical,
            coarsening: CoarseningKind::RugeStueben,
            interpolation: InterpKind::Direct,
            aggregation: AggregationKind::Vmb,
            pair_number: 2,
            quality_bound: 8.0,
            strong_coupled: 0.08,
            max_aggregation: 20,
            strength_threshold: 0.25,
            strength_kind: StrengthKind::Signed,
            max_row_sum: 0.9,
            truncation_threshold: 0.2,
            energy_min_steps: 2,
            cycle: CycleKind::V,
            amli_degree: 2,
            nl_amli_inner: 2,
            max_levels: 20,
            coarse_dof: 100,
            coarse_solver: CoarseSolverKind::DenseLu,
            presmooth: 1,
            postsmooth: 1,
            smoother: SmootherConfig::default(),
            coarse_scaling: false,
            print_level: 0,
        }
    }
}

impl AmgConfig {
    /// Aggressive classical coarsening for memory-bound problems.
    pub fn aggressive() -> Self {
        Self {
            coarsening: CoarseningKind::AggressiveSinglePath,
            interpolation: InterpKind::Standard,
            strength_threshold: 0.3,
            ..Self::default()
        }
    }

    /// Unsmoothed aggregation with a nonlinear AMLI cycle.
    pub fn unsmoothed_aggregation() -> Self {
        Self {
            amg_kind: AmgKind::UnsmoothedAggregation,
            interpolation: InterpKind::Tentative,
            cycle: CycleKind::NonlinearAmli,
            ..Self::default()
        }
    }

    /// Check ranges and cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.strength_threshold) {
            return Err(AmgError::InvalidParameter {
                name: "strength_threshold",
                message: format!("{} is outside [0, 1]", self.strength_threshold),
            });
        }
        if !(0.0..=1.0).contains(&self.max_row_sum) {
            return Err(AmgError::InvalidParameter {
                name: "max_row_sum",
                message: format!("{} is outside [0, 1]", self.max_row_sum),
            });
        }
        if self.max_levels < 1 {
            return Err(AmgError::InvalidParameter {
                name: "max_levels",
                message: "at least one level is required".into(),
            });
        }
        if self.coarse_dof == 0 {
            return Err(AmgError::InvalidParameter {
                name: "coarse_dof",
                message: "coarsest size bound must be positive".into(),
            });
        }
        if self.amli_degree == 0 && matches!(self.cycle, CycleKind::Amli) {
            return Err(AmgError::InvalidParameter {
                name: "amli_degree",
                message: "AMLI cycling needs a positive polynomial degree".into(),
            });
        }
        if self.nl_amli_inner == 0 && matches!(self.cycle, CycleKind::NonlinearAmli) {
            return Err(AmgError::InvalidParameter {
                name: "nl_amli_krylov_iters",
                message: "nonlinear AMLI needs at least one inner iteration".into(),
            });
        }
        if self.amg_kind == AmgKind::UnsmoothedAggregation
            && self.interpolation != InterpKind::Tentative
        {
            return Err(AmgError::InvalidParameter {
                name: "interpolation_type",
                message: "unsmoothed aggregation requires the tentative prolongation".into(),
            });
        }
        Ok(())
    }
}

/// Outer iteration parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolverConfig {
    /// Outer method.
    pub solver: SolverKind,
    /// Preconditioner applied inside the outer method.
    pub precond: PrecondKind,
    /// Stopping criterion.
    pub stop: StopCriterion,
    /// Relative tolerance τ.
    pub tol: Precision,
    /// Iteration cap.
    pub max_iterations: usize,
    /// Restart length for GMRES-type methods.
    pub restart: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            solver: SolverKind::Cg,
            precond: PrecondKind::Amg,
            stop: StopCriterion::RelativeResidual,
            tol: 1e-6,
            max_iterations: 500,
            restart: 30,
        }
    }
}

impl SolverConfig {
    /// Check ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.tol > 0.0) {
            return Err(AmgError::InvalidParameter {
                name: "tol",
                message: format!("{} is not a positive tolerance", self.tol),
            });
        }
        if self.max_iterations == 0 {
            return Err(AmgError::InvalidParameter {
                name: "maxit",
                message: "at least one iteration is required".into(),
            });
        }
        if self.restart == 0
            && matches!(self.solver, SolverKind::Gmres | SolverKind::FlexGmres)
        {
            return Err(AmgError::InvalidParameter {
                name: "restart",
                message: "GMRES needs a positive restart length".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        AmgConfig::default().validate().unwrap();
        AmgConfig::aggressive().validate().unwrap();
        AmgConfig::unsmoothed_aggregation().validate().unwrap();
        SolverConfig::default().validate().unwrap();
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let config = AmgConfig { strength_threshold: 1.5, ..AmgConfig::default() };
        assert!(matches!(
            config.validate(),
            Err(AmgError::InvalidParameter { name: "strength_threshold", .. })
        ));
    }

    #[test]
    fn aggregation_interp_consistency() {
        let config = AmgConfig {
            amg_kind: AmgKind::UnsmoothedAggregation,
            interpolation: InterpKind::Direct,
            ..AmgConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_tolerance_is_rejected() {
        let config = SolverConfig { tol: 0.0, ..SolverConfig::default() };
        assert!(config.validate().is_err());
    }
}
