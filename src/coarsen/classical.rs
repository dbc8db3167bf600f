//! Classical Ruge-Stüben C/F splitting.
//!
//! Phase one greedily picks coarse points by measure (how many unknowns
//! strongly depend on a candidate), phase two repairs the splitting so that
//! every pair of strongly coupled fine points shares a coarse neighbor, and
//! the aggressive variant reruns phase one on a path-2 strength graph over
//! the first-pass coarse set.

use log::debug;

use crate::coarsen::bucket::BucketList;
use crate::coarsen::Coarsening;
use crate::error::Result;
use crate::matrix::{CsrMatrix, CsrPattern};
use crate::types::CfMark;

/// Aggressive-coarsening path requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AggressiveMode {
    /// One connecting path of length ≤ 2 suffices.
    SinglePath,
    /// Two paths through distinct intermediaries are required.
    DoublePath,
}

/// Run Ruge-Stüben coarsening on the strength graph `s` of `a`.
///
/// With `aggressive` set, the first-pass coarse set is thinned by a second
/// greedy split over the induced path-2 graph, followed by a support sweep
/// that re-promotes fine points left without a coarse neighbor within
/// radius two.
pub fn rs_coarsening(
    a: &CsrMatrix,
    s: &CsrPattern,
    aggressive: Option<AggressiveMode>,
) -> Result<Coarsening> {
    let n = a.rows();
    let st = s.transpose();
    let mut splitting = vec![CfMark::Undecided; n];

    // Unknowns disconnected in A are settled before the greedy pass;
    // unknowns with no strong couplings in either direction follow them.
    let mut active = vec![false; n];
    for i in 0..n {
        let degree = a.row_ptr[i + 1] - a.row_ptr[i];
        if degree <= 1 || (s.degree(i) == 0 && st.degree(i) == 0) {
            splitting[i] = CfMark::Isolated;
        } else {
            active[i] = true;
        }
    }

    greedy_split(s, &st, &active, &mut splitting);
    enforce_common_coarse(s, &mut splitting);

    if let Some(mode) = aggressive {
        let first_pass = splitting.iter().filter(|m| m.is_coarse()).count();
        let s2 = path2_graph(s, &splitting, mode);
        let st2 = s2.transpose();
        let mut active2 = vec![false; n];
        for i in 0..n {
            if splitting[i].is_coarse() {
                splitting[i] = CfMark::Undecided;
                active2[i] = true;
            }
        }
        greedy_split(&s2, &st2, &active2, &mut splitting);
        // anything left over from the first-pass coarse set drops to fine
        for mark in splitting.iter_mut() {
            if *mark == CfMark::Undecided {
                *mark = CfMark::Fine;
            }
        }
        let promoted = ensure_radius2_support(s, &mut splitting);
        debug!(
            "aggressive coarsening: {} first-pass C, {} after thinning, {} re-promoted",
            first_pass,
            splitting.iter().filter(|m| m.is_coarse()).count() - promoted,
            promoted
        );
    }

    Ok(Coarsening::from_splitting(splitting))
}

/// Phase one: greedy measure-driven splitting over the active unknowns.
///
/// The measure of `i` counts the unknowns that strongly depend on `i`
/// (transposed-strong edges). Ties pop in reverse insertion order within a
/// bucket.
fn greedy_split(
    s: &CsrPattern,
    st: &CsrPattern,
    active: &[bool],
    splitting: &mut [CfMark],
) {
    let n = splitting.len();
    let mut list = BucketList::new(n);

    for i in 0..n {
        if !active[i] {
            continue;
        }
        let measure = st
            .row(i)
            .iter()
            .filter(|&&j| active[j])
            .count();
        if measure == 0 {
            // nobody depends on i; it can always interpolate from others
            splitting[i] = CfMark::Fine;
        } else {
            list.insert(i, measure);
        }
    }

    while let Some(m) = list.pop_max() {
        splitting[m] = CfMark::Coarse;
        // unknowns depending on m become fine and boost their other suppliers
        for &j in st.row(m) {
            if splitting[j] == CfMark::Undecided && list.contains(j) {
                splitting[j] = CfMark::Fine;
                list.remove(j);
                for &k in s.row(j) {
                    if splitting[k] == CfMark::Undecided && list.contains(k) {
                        list.increment(k);
                    }
                }
            }
        }
        // suppliers of m lose one dependent
        for &j in s.row(m) {
            if splitting[j] == CfMark::Undecided && list.contains(j) {
                if list.measure(j) <= 1 {
                    splitting[j] = CfMark::Fine;
                    list.remove(j);
                } else {
                    list.decrement(j);
                }
            }
        }
    }

    for i in 0..n {
        if active[i] && splitting[i] == CfMark::Undecided {
            splitting[i] = CfMark::Fine;
        }
    }
}

/// Phase two: guarantee that strongly coupled fine pairs share a coarse
/// strong neighbor, promoting the offending neighbor (or, when a promotion
/// is already pending for this row, the row itself, rolling the tentative
/// promotion back).
fn enforce_common_coarse(s: &CsrPattern, splitting: &mut [CfMark]) {
    let n = splitting.len();
    // marker[j] == i+1 while j is in the coarse support of row i
    let mut marker = vec![0usize; n];

    for i in 0..n {
        if !splitting[i].is_fine() {
            continue;
        }
        let stamp = i + 1;
        for &j in s.row(i) {
            if splitting[j].is_coarse() {
                marker[j] = stamp;
            }
        }
        let mut tentative: Option<usize> = None;
        for &j in s.row(i) {
            if !splitting[j].is_fine() {
                continue;
            }
            let shares = s.row(j).iter().any(|&k| marker[k] == stamp);
            if shares {
                continue;
            }
            match tentative {
                None => {
                    splitting[j] = CfMark::Coarse;
                    marker[j] = stamp;
                    tentative = Some(j);
                }
                Some(t) => {
                    // a second conflict: promoting i itself covers both
                    splitting[t] = CfMark::Fine;
                    marker[t] = 0;
                    splitting[i] = CfMark::Coarse;
                    break;
                }
            }
        }
    }
}

/// Strength graph over the coarse set with edges for paths of length ≤ 2.
fn path2_graph(s: &CsrPattern, splitting: &[CfMark], mode: AggressiveMode) -> CsrPattern {
    let n = splitting.len();
    let required = match mode {
        AggressiveMode::SinglePath => 1,
        AggressiveMode::DoublePath => 2,
    };
    let mut paths = vec![0usize; n];
    let mut touched = Vec::new();
    let mut rows = Vec::with_capacity(n);
    for i in 0..n {
        if !splitting[i].is_coarse() {
            rows.push(Vec::new());
            continue;
        }
        touched.clear();
        for &k in s.row(i) {
            // direct coarse-coarse edges count as a path of length one
            if splitting[k].is_coarse() && k != i {
                if paths[k] == 0 {
                    touched.push(k);
                }
                paths[k] = required.max(paths[k]);
            }
            for &j in s.row(k) {
                if j != i && splitting[j].is_coarse() {
                    if paths[j] == 0 {
                        touched.push(j);
                    }
                    paths[j] += 1;
                }
            }
        }
        let mut row: Vec<usize> = touched
            .iter()
            .copied()
            .filter(|&j| paths[j] >= required)
            .collect();
        row.sort_unstable();
        for &j in &touched {
            paths[j] = 0;
        }
        rows.push(row);
    }
    CsrPattern::from_rows(n, n, rows)
}

/// Phase three of the aggressive variant: fine points with no coarse point
/// within radius two of the original strength graph are promoted so that
/// standard interpolation keeps support. Returns the number promoted.
fn ensure_radius2_support(s: &CsrPattern, splitting: &mut [CfMark]) -> usize {
    let n = splitting.len();
    let mut promoted = 0usize;
    for i in 0..n {
        if !splitting[i].is_fine() || s.degree(i) == 0 {
            continue;
        }
        let mut supported = false;
        'search: for &k in s.row(i) {
            if splitting[k].is_coarse() {
                supported = true;
                break;
            }
            for &j in s.row(k) {
                if splitting[j].is_coarse() {
                    supported = true;
                    break 'search;
                }
            }
        }
        if !supported {
            splitting[i] = CfMark::Coarse;
            promoted += 1;
        }
    }
    promoted
}
