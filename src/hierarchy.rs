//! Hierarchy construction: drive coarsening, interpolation and the Galerkin
//! product until the coarse-size or level limits are met.
//!
//! Setup failures follow the demotion policy: a failed smoother setup drops
//! this level and all deeper ones to Gauss-Seidel, a failed coarsening stops
//! adding levels and leaves the current operator as the coarsest. Only
//! negative diagonals, missing diagonals and invalid parameters abort.

use log::{info, warn};

use crate::coarse::CoarseSolver;
use crate::coarsen::{aggregate_pairwise, aggregate_vmb, rs_coarsening, AggressiveMode};
use crate::config::AmgConfig;
use crate::error::{AmgError, Result};
use crate::interp::{
    direct_interpolation, energy_min_interpolation, standard_interpolation,
    tentative_prolongation, truncate_by_fraction,
};
use crate::matrix::{galerkin_product, rap_agg, CsrMatrix};
use crate::smoother::{regularize_diagonal, LevelSmoother, SmootherConfig};
use crate::strength::strength_graph;
use crate::types::{
    AggregationKind, AmgKind, CfMark, CoarseningKind, CycleKind, InterpKind, Precision,
    SetupReport, SmootherKind, SMALL,
};

/// Coarsening giving fewer coarse unknowns than this stops the hierarchy.
const MIN_COARSE_DOF: usize = 2;

/// Coarsening ratio above which a level is considered failed.
const MAX_COARSE_RATIO: Precision = 0.9;

/// Geometric decay ξ of the cycle-type recurrence.
const GAMMA_XI: Precision = 0.6;

/// Complexity-bound factor η of the cycle-type recurrence.
const GAMMA_ETA: Precision = 0.5;

/// Spectral bounds assumed for the AMLI Richardson weights.
const AMLI_LAMBDA_MIN: Precision = 0.25;
const AMLI_LAMBDA_MAX: Precision = 2.0;

/// One level of the hierarchy.
#[derive(Debug)]
pub struct Level {
    /// Level operator A_ℓ.
    pub a: CsrMatrix,
    /// Prolongation to this level from the next coarser one (absent on the
    /// coarsest level).
    pub p: Option<CsrMatrix>,
    /// Restriction R_ℓ = P_ℓᵀ (absent on the coarsest level).
    pub r: Option<CsrMatrix>,
    /// Recursive visits the cycle pays to the next coarser level.
    pub gamma: usize,
    /// Prepared smoother state.
    pub smoother: LevelSmoother,
    /// Retained C/F marks for C-first and F-first sweep orders.
    pub cf: Option<Vec<CfMark>>,
}

/// The assembled multigrid hierarchy: immutable during solve.
#[derive(Debug)]
pub struct Hierarchy {
    pub(crate) levels: Vec<Level>,
    pub(crate) cycle: CycleKind,
    pub(crate) presmooth: usize,
    pub(crate) postsmooth: usize,
    pub(crate) amli_weights: Vec<Precision>,
    pub(crate) nl_amli_inner: usize,
    pub(crate) coarse_scaling: bool,
    pub(crate) coarse_solver: CoarseSolver,
    report: SetupReport,
}

impl Hierarchy {
    /// Build the hierarchy for `a`.
    pub fn setup(a: CsrMatrix, config: &AmgConfig) -> Result<Self> {
        config.validate()?;
        if a.rows() != a.cols() {
            return Err(AmgError::DimensionMismatch {
                expected: a.rows(),
                actual: a.cols(),
                operation: "hierarchy setup",
            });
        }

        let n0 = a.rows();
        let nnz0 = a.nnz();
        let mut current = a;
        let replaced = regularize_diagonal(&mut current, SMALL)?;
        if replaced > 0 {
            warn!("regularized {} tiny diagonal entries on the finest level", replaced);
        }

        let mut smoother_cfg = config.smoother.clone();
        let mut strong_coupled = config.strong_coupled;
        let mut levels: Vec<Level> = Vec::new();

        while current.rows() > config.coarse_dof && levels.len() + 1 < config.max_levels {
            let level = levels.len();
            match build_level(&current, config, &mut smoother_cfg, strong_coupled, level) {
                Ok(Some(built)) => {
                    if config.print_level > 1 {
                        info!(
                            "level {}: {} -> {} unknowns, {} -> {} nonzeros",
                            level,
                            built.level.a.rows(),
                            built.coarse.rows(),
                            built.level.a.nnz(),
                            built.coarse.nnz()
                        );
                    }
                    strong_coupled = built.next_strong_coupled;
                    levels.push(built.level);
                    current = built.coarse;
                }
                Ok(None) => break,
                Err(err) if err.is_recoverable() => {
                    // structural or numeric trouble confined to this level:
                    // the current operator becomes the coarsest
                    warn!("coarsening stopped on level {}: {}", level, err);
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        // coarsest level
        let smoother = prepare_with_demotion(&current, &mut smoother_cfg, None)?;
        let coarse_solver = CoarseSolver::prepare(&current, config.coarse_solver);
        levels.push(Level {
            a: current,
            p: None,
            r: None,
            gamma: 1,
            smoother,
            cf: None,
        });

        assign_gamma(&mut levels, config.cycle, nnz0);

        let nnz_total: usize = levels.iter().map(|l| l.a.nnz()).sum();
        let n_total: usize = levels.iter().map(|l| l.a.rows()).sum();
        let report = SetupReport {
            levels: levels.len(),
            operator_complexity: nnz_total as Precision / nnz0.max(1) as Precision,
            grid_complexity: n_total as Precision / n0.max(1) as Precision,
        };
        if config.print_level > 0 {
            info!("amg setup: {}", report);
        }

        Ok(Self {
            levels,
            cycle: config.cycle,
            presmooth: config.presmooth,
            postsmooth: config.postsmooth,
            amli_weights: amli_weights(config.amli_degree),
            nl_amli_inner: config.nl_amli_inner,
            coarse_scaling: config.coarse_scaling,
            coarse_solver,
            report,
        })
    }

    /// Number of levels, including the coarsest.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Setup summary.
    pub fn report(&self) -> &SetupReport {
        &self.report
    }

    /// The finest-level operator.
    pub fn finest(&self) -> &CsrMatrix {
        &self.levels[0].a
    }

    /// Per-level operators, finest first.
    pub fn operators(&self) -> impl Iterator<Item = &CsrMatrix> {
        self.levels.iter().map(|l| &l.a)
    }
}

/// Successful product of one coarsening step.
struct BuiltLevel {
    level: Level,
    coarse: CsrMatrix,
    next_strong_coupled: Precision,
}

fn build_level(
    current: &CsrMatrix,
    config: &AmgConfig,
    smoother_cfg: &mut SmootherConfig,
    strong_coupled: Precision,
    level: usize,
) -> Result<Option<BuiltLevel>> {
    let n = current.rows();
    let mut next_strong_coupled = strong_coupled;

    let (p, cf, agg) = match config.amg_kind {
        AmgKind::Classical => {
            let s = strength_graph(
                current,
                config.strength_threshold,
                config.max_row_sum,
                config.strength_kind,
                level,
            )?;
            let aggressive = match config.coarsening {
                CoarseningKind::RugeStueben => None,
                CoarseningKind::AggressiveSinglePath => Some(AggressiveMode::SinglePath),
                CoarseningKind::AggressiveDoublePath => Some(AggressiveMode::DoublePath),
            };
            let coarsening = rs_coarsening(current, &s, aggressive)?;
            if !coarsening_is_usable(coarsening.n_coarse, n) {
                return Ok(None);
            }
            let mut p = match config.interpolation {
                InterpKind::Direct => direct_interpolation(current, &s, &coarsening)?,
                InterpKind::Standard => standard_interpolation(current, &s, &coarsening)?,
                InterpKind::EnergyMin => energy_min_interpolation(
                    current,
                    &s,
                    &coarsening,
                    config.energy_min_steps,
                )?,
                InterpKind::Tentative => {
                    return Err(AmgError::InvalidParameter {
                        name: "interpolation_type",
                        message: "tentative prolongation needs an aggregation hierarchy".into(),
                    })
                }
            };
            truncate_by_fraction(&mut p, config.truncation_threshold);
            (p, Some(coarsening.splitting), None)
        }
        AmgKind::UnsmoothedAggregation => {
            let map = match config.aggregation {
                AggregationKind::Vmb => {
                    let s = strength_graph(
                        current,
                        strong_coupled,
                        config.max_row_sum,
                        config.strength_kind,
                        level,
                    )?;
                    let map = aggregate_vmb(current, &s, config.max_aggregation, level)?;
                    // steer the next level's threshold toward a healthy ratio
                    let ratio = map.n_agg as Precision / n as Precision;
                    if ratio > 0.7 {
                        next_strong_coupled = (strong_coupled / 2.0).max(1e-4);
                    } else if ratio < 0.1 {
                        next_strong_coupled = (strong_coupled * 2.0).min(0.5);
                    }
                    map
                }
                AggregationKind::Pairwise => aggregate_pairwise(
                    current,
                    config.pair_number,
                    config.quality_bound,
                    level,
                )?,
            };
            if !coarsening_is_usable(map.n_agg, n) {
                return Ok(None);
            }
            let p = tentative_prolongation(&map, None)?;
            (p, None, Some(map))
        }
    };

    if p.cols() < MIN_COARSE_DOF {
        return Ok(None);
    }

    // a demotion here sticks: the failing smoother is disabled for this
    // level and every deeper one
    let smoother = match LevelSmoother::prepare(current, smoother_cfg, cf.as_deref()) {
        Ok(s) => s,
        Err(err) if err.is_recoverable() => {
            warn!(
                "smoother setup failed on level {} ({}); demoting to Gauss-Seidel",
                level, err
            );
            smoother_cfg.kind = SmootherKind::GaussSeidel;
            LevelSmoother::prepare(current, smoother_cfg, cf.as_deref())?
        }
        Err(err) => return Err(err),
    };

    let (r, coarse) = match agg {
        Some(map) => {
            let coarse = rap_agg(current, &map.agg, map.n_agg)?;
            (p.transpose(), coarse)
        }
        None => galerkin_product(current, &p)?,
    };

    Ok(Some(BuiltLevel {
        level: Level {
            a: current.clone(),
            p: Some(p),
            r: Some(r),
            gamma: 1,
            smoother,
            cf,
        },
        coarse,
        next_strong_coupled,
    }))
}

fn coarsening_is_usable(n_coarse: usize, n: usize) -> bool {
    n_coarse >= MIN_COARSE_DOF
        && (n_coarse as Precision) <= MAX_COARSE_RATIO * n as Precision
}

fn prepare_with_demotion(
    a: &CsrMatrix,
    cfg: &mut SmootherConfig,
    cf: Option<&[CfMark]>,
) -> Result<LevelSmoother> {
    match LevelSmoother::prepare(a, cfg, cf) {
        Ok(s) => Ok(s),
        Err(err) if err.is_recoverable() => {
            warn!("smoother setup failed ({}); demoting to Gauss-Seidel", err);
            cfg.kind = SmootherKind::GaussSeidel;
            LevelSmoother::prepare(a, cfg, cf)
        }
        Err(err) => Err(err),
    }
}

/// Derive the per-level number of recursive visits.
///
/// W cycles use γ_ℓ = ⌊ξ^ℓ / (η·ρ_ℓ·Πγ)⌋ clamped to [1, 2] with
/// ρ_ℓ = nnz(A_ℓ)/nnz(A_0), throttling the visit count wherever coarsening
/// slows down so the cycle cost stays bounded. V and the AMLI cycles visit
/// once per level.
fn assign_gamma(levels: &mut [Level], cycle: CycleKind, nnz0: usize) {
    match cycle {
        CycleKind::V | CycleKind::Amli | CycleKind::NonlinearAmli => {
            for level in levels.iter_mut() {
                level.gamma = 1;
            }
        }
        CycleKind::W => {
            let mut gamma_prod: Precision = 1.0;
            for (l, level) in levels.iter_mut().enumerate() {
                if l == 0 {
                    level.gamma = 1;
                    continue;
                }
                let rho = level.a.nnz() as Precision / nnz0.max(1) as Precision;
                let raw = GAMMA_XI.powi(l as i32) / (GAMMA_ETA * rho * gamma_prod);
                let gamma = (raw.floor() as usize).clamp(1, 2);
                level.gamma = gamma;
                gamma_prod *= gamma as Precision;
            }
        }
    }
}

/// Richardson weights of the AMLI polynomial: reciprocals of the degree-d
/// Chebyshev nodes mapped onto the assumed spectral interval of the
/// preconditioned coarse operator.
fn amli_weights(degree: usize) -> Vec<Precision> {
    let theta = (AMLI_LAMBDA_MAX + AMLI_LAMBDA_MIN) / 2.0;
    let delta = (AMLI_LAMBDA_MAX - AMLI_LAMBDA_MIN) / 2.0;
    (0..degree.max(1))
        .map(|k| {
            let node = theta
                + delta
                    * ((2 * k + 1) as Precision * core::f64::consts::PI
                        / (2 * degree.max(1)) as Precision)
                        .cos();
            1.0 / node
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AmgConfig;
    use approx::assert_relative_eq;

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

    #[test]
    fn poisson_builds_multiple_levels() {
        let a = laplace_2d(24);
        let config = AmgConfig { coarse_dof: 20, ..AmgConfig::default() };
        let h = Hierarchy::setup(a, &config).unwrap();
        assert!(h.level_count() >= 2);
        assert!(h.levels.last().unwrap().a.rows() <= 20 * 2);
        assert!(h.report().operator_complexity < 3.0);
    }

    #[test]
    fn galerkin_identity_holds_per_level() {
        let a = laplace_2d(12);
        let config = AmgConfig { coarse_dof: 10, ..AmgConfig::default() };
        let h = Hierarchy::setup(a, &config).unwrap();
        for l in 0..h.level_count() - 1 {
            let level = &h.levels[l];
            let p = level.p.as_ref().unwrap();
            let r = level.r.as_ref().unwrap();
            let expected = crate::matrix::rap(r, &level.a, p).unwrap();
            let actual = &h.levels[l + 1].a;
            let scale = level.a.values().iter().fold(0.0f64, |m, v| m.max(v.abs()));
            for i in 0..actual.rows() {
                for (j, v) in actual.row_iter(i) {
                    assert_relative_eq!(
                        v,
                        expected.get(i, j).unwrap_or(0.0),
                        epsilon = 1e-10 * scale.max(1.0)
                    );
                }
            }
        }
    }

    #[test]
    fn identity_matrix_builds_one_level() {
        let a = CsrMatrix::identity(50);
        let config = AmgConfig { coarse_dof: 10, ..AmgConfig::default() };
        let h = Hierarchy::setup(a, &config).unwrap();
        assert_eq!(h.level_count(), 1);
    }

    #[test]
    fn single_unknown_builds_one_level() {
        let a = CsrMatrix::identity(1);
        let h = Hierarchy::setup(a, &AmgConfig::default()).unwrap();
        assert_eq!(h.level_count(), 1);
    }

    #[test]
    fn aggregation_hierarchy_coarsens() {
        let a = laplace_2d(16);
        let config = AmgConfig {
            coarse_dof: 20,
            ..AmgConfig::unsmoothed_aggregation()
        };
        let h = Hierarchy::setup(a, &config).unwrap();
        assert!(h.level_count() >= 2);
        // tentative prolongation is boolean with one entry per row
        let p = h.levels[0].p.as_ref().unwrap();
        for i in 0..p.rows() {
            let (cols, vals) = p.row(i);
            assert_eq!(cols.len(), 1);
            assert_relative_eq!(vals[0], 1.0);
        }
    }

    #[test]
    fn negative_diagonal_aborts_setup() {
        let a = CsrMatrix::from_triplets(
            vec![(0, 0, -1.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 2.0)],
            2,
            2,
        )
        .unwrap();
        assert!(matches!(
            Hierarchy::setup(a, &AmgConfig::default()),
            Err(AmgError::NegativeDiagonal { .. })
        ));
    }

    #[test]
    fn max_levels_caps_the_hierarchy() {
        let a = laplace_2d(24);
        let config = AmgConfig { max_levels: 3, coarse_dof: 2, ..AmgConfig::default() };
        let h = Hierarchy::setup(a, &config).unwrap();
        assert!(h.level_count() <= 3);
    }

    #[test]
    fn w_cycle_gamma_stays_clamped() {
        let a = laplace_2d(24);
        let config = AmgConfig { cycle: CycleKind::W, coarse_dof: 10, ..AmgConfig::default() };
        let h = Hierarchy::setup(a, &config).unwrap();
        for level in &h.levels {
            assert!(level.gamma >= 1 && level.gamma <= 2);
        }
    }

    #[test]
    fn amli_weights_are_positive_reciprocals() {
        let w = amli_weights(3);
        assert_eq!(w.len(), 3);
        for &v in &w {
            assert!(v > 1.0 / AMLI_LAMBDA_MAX - 1e-12);
            assert!(v < 1.0 / AMLI_LAMBDA_MIN + 1e-12);
        }
    }
}
