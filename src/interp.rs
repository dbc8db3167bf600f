//! Prolongation synthesis from a C/F splitting or an aggregate map.
//!
//! All value-bearing policies share the truncation post-pass: small entries
//! are dropped by row-relative fraction and the surviving positive and
//! negative entries are rescaled separately so the row's positive and
//! negative sums are preserved. Column indices of the produced operators
//! refer to coarse unknowns by their running coarse count.

use crate::coarsen::{AggregateMap, Coarsening};
use crate::error::{AmgError, Result};
use crate::matrix::{CsrMatrix, CsrPattern};
use crate::types::{CfMark, Precision, SMALL, UNAGGREGATED};

/// Direct interpolation: fine rows take weights from their strong coarse
/// neighbors, scaled so the full off-diagonal row mass is represented.
pub fn direct_interpolation(
    a: &CsrMatrix,
    s: &CsrPattern,
    coarsening: &Coarsening,
) -> Result<CsrMatrix> {
    let n = a.rows();
    let coarse_index = coarsening.coarse_index();
    let mut rows: Vec<Vec<(usize, Precision)>> = Vec::with_capacity(n);
    let mut is_strong_coarse = vec![false; n];

    for i in 0..n {
        match coarsening.splitting[i] {
            CfMark::Coarse => {
                rows.push(vec![(coarse_index[i], 1.0)]);
                continue;
            }
            CfMark::Isolated => {
                rows.push(Vec::new());
                continue;
            }
            _ => {}
        }

        for &j in s.row(i) {
            if coarsening.splitting[j].is_coarse() {
                is_strong_coarse[j] = true;
            }
        }

        let mut diag = 0.0;
        let mut pos_all = 0.0;
        let mut neg_all = 0.0;
        let mut pos_strong = 0.0;
        let mut neg_strong = 0.0;
        for (j, v) in a.row_iter(i) {
            if j == i {
                diag = v;
                continue;
            }
            if v > 0.0 {
                pos_all += v;
                if is_strong_coarse[j] {
                    pos_strong += v;
                }
            } else if v < 0.0 {
                neg_all += v;
                if is_strong_coarse[j] {
                    neg_strong += v;
                }
            }
        }

        // missing interpolatory mass of one sign folds into the diagonal
        let mut den = diag;
        let alpha = if neg_strong < 0.0 {
            neg_all / neg_strong
        } else {
            den += neg_all;
            0.0
        };
        let beta = if pos_strong > 0.0 {
            pos_all / pos_strong
        } else {
            den += pos_all;
            0.0
        };

        let mut row = Vec::new();
        if den.abs() > SMALL {
            for (j, v) in a.row_iter(i) {
                if j == i || !is_strong_coarse[j] {
                    continue;
                }
                let scale = if v < 0.0 { alpha } else { beta };
                let w = -scale * v / den;
                if w != 0.0 {
                    row.push((coarse_index[j], w));
                }
            }
        }
        rows.push(row);

        for &j in s.row(i) {
            is_strong_coarse[j] = false;
        }
    }

    assemble(n, coarsening.n_coarse, rows)
}

/// Standard interpolation: the support of a fine row is extended to coarse
/// points at distance two through strong fine intermediaries, eliminating
/// each intermediary k through its own row (â_ij = a_ij − a_ik·a_kj/a_kk),
/// then normalized the same way as direct interpolation.
pub fn standard_interpolation(
    a: &CsrMatrix,
    s: &CsrPattern,
    coarsening: &Coarsening,
) -> Result<CsrMatrix> {
    let n = a.rows();
    let coarse_index = coarsening.coarse_index();
    let mut rows: Vec<Vec<(usize, Precision)>> = Vec::with_capacity(n);

    // scratch for the modified row â
    let mut tag = vec![usize::MAX; n];
    let mut value = vec![0.0; n];
    let mut touched: Vec<usize> = Vec::new();
    let mut strong = vec![false; n];

    for i in 0..n {
        match coarsening.splitting[i] {
            CfMark::Coarse => {
                rows.push(vec![(coarse_index[i], 1.0)]);
                continue;
            }
            CfMark::Isolated => {
                rows.push(Vec::new());
                continue;
            }
            _ => {}
        }

        for &j in s.row(i) {
            strong[j] = true;
        }
        touched.clear();

        let accumulate = |j: usize, v: Precision, tag: &mut [usize], value: &mut [Precision], touched: &mut Vec<usize>| {
            if tag[j] != i {
                tag[j] = i;
                value[j] = 0.0;
                touched.push(j);
            }
            value[j] += v;
        };

        for (j, v) in a.row_iter(i) {
            accumulate(j, v, &mut tag, &mut value, &mut touched);
        }
        // eliminate strong fine intermediaries through their rows
        for (k, aik) in a.row_iter(i) {
            if k == i || !strong[k] || !coarsening.splitting[k].is_fine() {
                continue;
            }
            let akk = a
                .row_iter(k)
                .find(|&(c, _)| c == k)
                .map(|(_, v)| v)
                .ok_or(AmgError::MissingDiagonal { row: k })?;
            if akk.abs() < SMALL {
                continue;
            }
            let factor = aik / akk;
            for (j, akj) in a.row_iter(k) {
                accumulate(j, -factor * akj, &mut tag, &mut value, &mut touched);
            }
        }

        let diag = if tag[i] == i { value[i] } else { 0.0 };
        let mut pos_all = 0.0;
        let mut neg_all = 0.0;
        let mut pos_support = 0.0;
        let mut neg_support = 0.0;
        for &j in &touched {
            if j == i {
                continue;
            }
            let v = value[j];
            let interpolatory = coarsening.splitting[j].is_coarse();
            if v > 0.0 {
                pos_all += v;
                if interpolatory {
                    pos_support += v;
                }
            } else if v < 0.0 {
                neg_all += v;
                if interpolatory {
                    neg_support += v;
                }
            }
        }

        let mut den = diag;
        let alpha = if neg_support < 0.0 {
            neg_all / neg_support
        } else {
            den += neg_all;
            0.0
        };
        let beta = if pos_support > 0.0 {
            pos_all / pos_support
        } else {
            den += pos_all;
            0.0
        };

        let mut row = Vec::new();
        if den.abs() > SMALL {
            for &j in &touched {
                if j == i || !coarsening.splitting[j].is_coarse() {
                    continue;
                }
                let v = value[j];
                let scale = if v < 0.0 { alpha } else { beta };
                let w = -scale * v / den;
                if w != 0.0 {
                    row.push((coarse_index[j], w));
                }
            }
        }
        rows.push(row);

        for &j in s.row(i) {
            strong[j] = false;
        }
    }

    assemble(n, coarsening.n_coarse, rows)
}

/// Tentative (unsmoothed aggregation) prolongation: one entry per row
/// selecting the owning aggregate. With a near-kernel vector the column
/// entries carry the vector values, normalized per aggregate, so the coarse
/// basis reproduces that mode.
pub fn tentative_prolongation(
    map: &AggregateMap,
    near_kernel: Option<&[Precision]>,
) -> Result<CsrMatrix> {
    let n = map.agg.len();
    let mut rows: Vec<Vec<(usize, Precision)>> = Vec::with_capacity(n);
    match near_kernel {
        None => {
            for &g in &map.agg {
                if g == UNAGGREGATED {
                    rows.push(Vec::new());
                } else {
                    rows.push(vec![(g, 1.0)]);
                }
            }
        }
        Some(basis) => {
            if basis.len() != n {
                return Err(AmgError::DimensionMismatch {
                    expected: n,
                    actual: basis.len(),
                    operation: "near-kernel basis length",
                });
            }
            let mut norms = vec![0.0; map.n_agg];
            for (i, &g) in map.agg.iter().enumerate() {
                if g != UNAGGREGATED {
                    norms[g] += basis[i] * basis[i];
                }
            }
            for n in norms.iter_mut() {
                *n = n.sqrt().max(SMALL);
            }
            for (i, &g) in map.agg.iter().enumerate() {
                if g == UNAGGREGATED {
                    rows.push(Vec::new());
                } else {
                    rows.push(vec![(g, basis[i] / norms[g])]);
                }
            }
        }
    }
    assemble(n, map.n_agg, rows)
}

/// Energy-minimizing interpolation.
///
/// Fine rows start from the harmonic weights obtained by inverting the
/// local Gram matrix of their strong coarse support (p = −A_JJ⁻¹·a_Ji), and
/// the composite operator is then refined by pattern-restricted descent on
/// tr(PᵀAP) with an exact line search, finishing with a row-sum restore.
pub fn energy_min_interpolation(
    a: &CsrMatrix,
    s: &CsrPattern,
    coarsening: &Coarsening,
    refine_steps: usize,
) -> Result<CsrMatrix> {
    let n = a.rows();
    let coarse_index = coarsening.coarse_index();
    let mut rows: Vec<Vec<(usize, Precision)>> = Vec::with_capacity(n);

    for i in 0..n {
        match coarsening.splitting[i] {
            CfMark::Coarse => {
                rows.push(vec![(coarse_index[i], 1.0)]);
                continue;
            }
            CfMark::Isolated => {
                rows.push(Vec::new());
                continue;
            }
            _ => {}
        }
        let support: Vec<usize> = s
            .row(i)
            .iter()
            .copied()
            .filter(|&j| coarsening.splitting[j].is_coarse())
            .collect();
        if support.is_empty() {
            rows.push(Vec::new());
            continue;
        }
        let m = support.len();
        let mut gram = nalgebra::DMatrix::<Precision>::zeros(m, m);
        let mut rhs = nalgebra::DVector::<Precision>::zeros(m);
        for (p, &jp) in support.iter().enumerate() {
            for (q, &jq) in support.iter().enumerate() {
                gram[(p, q)] = a.get(jp, jq).unwrap_or(0.0);
            }
            if gram[(p, p)] == 0.0 {
                gram[(p, p)] = SMALL;
            }
            rhs[p] = -a.get(i, jp).unwrap_or(0.0);
        }
        let weights = gram
            .lu()
            .solve(&rhs)
            .ok_or(AmgError::SingularPivot { row: i, context: "energy-min local solve" })?;
        let row = support
            .iter()
            .enumerate()
            .filter(|(p, _)| weights[*p] != 0.0)
            .map(|(p, &j)| (coarse_index[j], weights[p]))
            .collect();
        rows.push(row);
    }

    let mut p = assemble(n, coarsening.n_coarse, rows)?;
    refine_energy(a, &mut p, coarsening, refine_steps)?;
    Ok(p)
}

/// Pattern-restricted descent on tr(PᵀAP); fine rows only, coarse rows stay
/// identity. Each step uses the exact line-search α = <G,G>/<G,AG> over the
/// retained pattern.
fn refine_energy(
    a: &CsrMatrix,
    p: &mut CsrMatrix,
    coarsening: &Coarsening,
    steps: usize,
) -> Result<()> {
    for _ in 0..steps {
        // G = A·P restricted to the pattern of P on fine rows
        let full = crate::matrix::rap::rap(&CsrMatrix::identity(a.rows()), a, p)?;
        let mut gg = 0.0;
        let mut grad_rows: Vec<Vec<(usize, Precision)>> = vec![Vec::new(); p.rows()];
        for i in 0..p.rows() {
            if !coarsening.splitting[i].is_fine() {
                continue;
            }
            let (cols, _) = p.row(i);
            for &j in cols {
                let g = full.get(i, j).unwrap_or(0.0);
                if g != 0.0 {
                    grad_rows[i].push((j, g));
                    gg += g * g;
                }
            }
        }
        if gg < SMALL {
            break;
        }
        // <G, A·G> over the pattern
        let grad = assemble_from(p.rows(), p.cols(), &grad_rows)?;
        let ag = crate::matrix::rap::rap(&CsrMatrix::identity(a.rows()), a, &grad)?;
        let mut gag = 0.0;
        for i in 0..p.rows() {
            for (j, g) in grad.row_iter(i) {
                gag += g * ag.get(i, j).unwrap_or(0.0);
            }
        }
        if gag <= SMALL {
            break;
        }
        let alpha = gg / gag;
        for i in 0..p.rows() {
            if grad_rows[i].is_empty() {
                continue;
            }
            let span = p.row_ptr[i]..p.row_ptr[i + 1];
            let cols = p.col_idx[span.clone()].to_vec();
            for (j, g) in &grad_rows[i] {
                if let Some(pos) = cols.iter().position(|c| c == j) {
                    p.values[span.start + pos] -= alpha * g;
                }
            }
        }
    }
    // restore unit row sums where a row carries any weight
    for i in 0..p.rows() {
        if !coarsening.splitting[i].is_fine() {
            continue;
        }
        let span = p.row_ptr[i]..p.row_ptr[i + 1];
        let sum: Precision = p.values[span.clone()].iter().sum();
        if sum.abs() > SMALL {
            for v in &mut p.values[span] {
                *v /= sum;
            }
        }
    }
    Ok(())
}

/// Drop entries below a row-relative fraction of the extreme positive and
/// negative entries, then rescale the survivors of each sign so the row's
/// positive and negative sums are unchanged.
pub fn truncate_by_fraction(p: &mut CsrMatrix, eps: Precision) {
    if eps <= 0.0 {
        return;
    }
    let n = p.rows();
    let mut write = 0usize;
    let mut read_start = 0usize;
    let mut row_ptr_new = vec![0usize; n + 1];
    for i in 0..n {
        let read_end = p.row_ptr[i + 1];
        let row = &p.values[read_start..read_end];
        let pmax = row.iter().copied().filter(|v| *v > 0.0).fold(0.0, Precision::max);
        let nmin = row.iter().copied().filter(|v| *v < 0.0).fold(0.0, Precision::min);
        let pos_sum: Precision = row.iter().copied().filter(|v| *v > 0.0).sum();
        let neg_sum: Precision = row.iter().copied().filter(|v| *v < 0.0).sum();

        let mut kept_pos = 0.0;
        let mut kept_neg = 0.0;
        let keep_from = write;
        for k in read_start..read_end {
            let v = p.values[k];
            let keep = if v > 0.0 {
                v >= eps * pmax
            } else if v < 0.0 {
                v <= eps * nmin
            } else {
                false
            };
            if keep {
                p.col_idx[write] = p.col_idx[k];
                p.values[write] = v;
                if v > 0.0 {
                    kept_pos += v;
                } else {
                    kept_neg += v;
                }
                write += 1;
            }
        }
        let pos_scale = if kept_pos > 0.0 { pos_sum / kept_pos } else { 1.0 };
        let neg_scale = if kept_neg < 0.0 { neg_sum / kept_neg } else { 1.0 };
        for v in &mut p.values[keep_from..write] {
            *v *= if *v > 0.0 { pos_scale } else { neg_scale };
        }
        read_start = read_end;
        row_ptr_new[i + 1] = write;
    }
    p.col_idx.truncate(write);
    p.values.truncate(write);
    p.row_ptr = row_ptr_new;
}

fn assemble(
    nrows: usize,
    ncols: usize,
    rows: Vec<Vec<(usize, Precision)>>,
) -> Result<CsrMatrix> {
    assemble_from(nrows, ncols, &rows)
}

fn assemble_from(
    nrows: usize,
    ncols: usize,
    rows: &[Vec<(usize, Precision)>],
) -> Result<CsrMatrix> {
    let mut row_ptr = Vec::with_capacity(nrows + 1);
    let mut col_idx = Vec::new();
    let mut values = Vec::new();
    row_ptr.push(0);
    for row in rows {
        for &(j, v) in row {
            col_idx.push(j);
            values.push(v);
        }
        row_ptr.push(col_idx.len());
    }
    CsrMatrix::from_raw_parts(nrows, ncols, row_ptr, col_idx, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coarsen::Coarsening;
    use crate::strength::{strength_graph, StrengthKind};
    use approx::assert_relative_eq;

    fn laplace_1d(n: usize) -> CsrMatrix {
        let mut t = Vec::new();
        for i in 0..n {
            t.push((i, i, 2.0));
            if i > 0 {
                t.push((i, i - 1, -1.0));
            }
            if i + 1 < n {
                t.push((i, i + 1, -1.0));
            }
        }
        CsrMatrix::from_triplets(t, n, n).unwrap()
    }

    fn alternating_splitting(n: usize) -> Coarsening {
        Coarsening::from_splitting(
            (0..n)
                .map(|i| if i % 2 == 0 { CfMark::Coarse } else { CfMark::Fine })
                .collect(),
        )
    }

    #[test]
    fn direct_weights_on_laplacian_are_half() {
        let a = laplace_1d(5);
        let s = strength_graph(&a, 0.25, 1.0, StrengthKind::Signed, 0).unwrap();
        let c = alternating_splitting(5);
        let p = direct_interpolation(&a, &s, &c).unwrap();
        assert_eq!(p.rows(), 5);
        assert_eq!(p.cols(), 3);
        // fine row 1 sits between coarse 0 and 2
        let (cols, vals) = p.row(1);
        assert_eq!(cols.len(), 2);
        assert_relative_eq!(vals[0], 0.5);
        assert_relative_eq!(vals[1], 0.5);
        // coarse rows carry a single unit entry
        let (cols, vals) = p.row(2);
        assert_eq!(cols, &[1]);
        assert_relative_eq!(vals[0], 1.0);
    }

    #[test]
    fn standard_matches_direct_when_no_fine_fine_couplings() {
        let a = laplace_1d(7);
        let s = strength_graph(&a, 0.25, 1.0, StrengthKind::Signed, 0).unwrap();
        let c = alternating_splitting(7);
        let mut d = direct_interpolation(&a, &s, &c).unwrap();
        let mut st = standard_interpolation(&a, &s, &c).unwrap();
        d.sort_rows();
        st.sort_rows();
        for i in 0..7 {
            let (dc, dv) = d.row(i);
            let (sc, sv) = st.row(i);
            assert_eq!(dc, sc);
            for (x, y) in dv.iter().zip(sv.iter()) {
                assert_relative_eq!(x, y, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn standard_reaches_distance_two_support() {
        // coarse only at the ends: 0 and 4; interior all fine
        let a = laplace_1d(5);
        let s = strength_graph(&a, 0.25, 1.0, StrengthKind::Signed, 0).unwrap();
        let c = Coarsening::from_splitting(vec![
            CfMark::Coarse,
            CfMark::Fine,
            CfMark::Fine,
            CfMark::Fine,
            CfMark::Coarse,
        ]);
        let p = standard_interpolation(&a, &s, &c).unwrap();
        // the middle row interpolates from both ends through its fine
        // neighbors
        let (cols, _) = p.row(2);
        assert_eq!(cols.len(), 2);
    }

    #[test]
    fn tentative_is_boolean_partition() {
        let map = AggregateMap { agg: vec![0, 0, 1, 1, 2], n_agg: 3 };
        let p = tentative_prolongation(&map, None).unwrap();
        for i in 0..5 {
            let (cols, vals) = p.row(i);
            assert_eq!(cols.len(), 1);
            assert_relative_eq!(vals[0], 1.0);
        }
        // PᵀP is diagonal and counts aggregate sizes
        let pt = p.transpose();
        let ptp = crate::matrix::rap(&pt, &CsrMatrix::identity(5), &p).unwrap();
        assert_relative_eq!(ptp.get(0, 0).unwrap(), 2.0);
        assert_relative_eq!(ptp.get(2, 2).unwrap(), 1.0);
        assert_eq!(ptp.get(0, 1), None);
    }

    #[test]
    fn tentative_near_kernel_scaling() {
        let map = AggregateMap { agg: vec![0, 0, 1], n_agg: 2 };
        let basis = vec![3.0, 4.0, 2.0];
        let p = tentative_prolongation(&map, Some(&basis)).unwrap();
        let (_, v0) = p.row(0);
        let (_, v1) = p.row(1);
        // normalized per aggregate: (3,4)/5
        assert_relative_eq!(v0[0], 0.6);
        assert_relative_eq!(v1[0], 0.8);
    }

    #[test]
    fn truncation_preserves_signed_sums() {
        let mut p = CsrMatrix::from_triplets(
            vec![(0, 0, 0.6), (0, 1, 0.03), (0, 2, 0.4), (1, 0, 1.0)],
            2,
            3,
        )
        .unwrap();
        truncate_by_fraction(&mut p, 0.1);
        let (cols, vals) = p.row(0);
        assert_eq!(cols.len(), 2);
        let sum: f64 = vals.iter().sum();
        assert_relative_eq!(sum, 1.03, epsilon = 1e-12);
    }

    #[test]
    fn truncation_with_zero_fraction_is_noop() {
        let mut p = CsrMatrix::from_triplets(vec![(0, 0, 0.4), (0, 1, 0.6)], 1, 2).unwrap();
        let before = p.clone();
        truncate_by_fraction(&mut p, 0.0);
        assert_eq!(p, before);
    }

    #[test]
    fn energy_min_reproduces_half_weights() {
        let a = laplace_1d(5);
        let s = strength_graph(&a, 0.25, 1.0, StrengthKind::Signed, 0).unwrap();
        let c = alternating_splitting(5);
        let p = energy_min_interpolation(&a, &s, &c, 0).unwrap();
        let (_, vals) = p.row(1);
        // A_JJ = diag(2,2), rhs = (1,1): weights 0.5 each
        assert_relative_eq!(vals[0], 0.5);
        assert_relative_eq!(vals[1], 0.5);
    }
}
