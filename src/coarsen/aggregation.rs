//! Aggregation-based coarsening: VMB greedy neighborhoods and iterated
//! pairwise matching.

use log::debug;

use crate::error::{AmgError, Result};
use crate::matrix::{rap_agg, CsrMatrix, CsrPattern};
use crate::types::{Precision, UNAGGREGATED};

/// Map from unknowns to aggregate ids.
#[derive(Debug, Clone)]
pub struct AggregateMap {
    /// `agg[i]` is the aggregate owning unknown `i`, or [`UNAGGREGATED`].
    pub agg: Vec<usize>,
    /// Number of aggregates.
    pub n_agg: usize,
}

impl AggregateMap {
    /// Size of each aggregate.
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.n_agg];
        for &g in &self.agg {
            if g != UNAGGREGATED {
                sizes[g] += 1;
            }
        }
        sizes
    }
}

/// Vaněk-Mandel-Brezina greedy aggregation.
///
/// First sweep: every unknown whose strong neighborhood is fully
/// unaggregated seeds a new aggregate from that neighborhood, capped at
/// `max_aggregate` members. Second sweep: leftovers attach to the strongest
/// already-aggregated neighbor, or open a singleton.
pub fn aggregate_vmb(
    a: &CsrMatrix,
    s: &CsrPattern,
    max_aggregate: usize,
    level: usize,
) -> Result<AggregateMap> {
    let n = a.rows();
    if max_aggregate < 2 {
        return Err(AmgError::InvalidParameter {
            name: "max_aggregation",
            message: format!("aggregate size bound {} is below 2", max_aggregate),
        });
    }
    let mut agg = vec![UNAGGREGATED; n];
    let mut sizes: Vec<usize> = Vec::new();

    for i in 0..n {
        if agg[i] != UNAGGREGATED || s.degree(i) == 0 {
            continue;
        }
        if s.row(i).iter().any(|&j| agg[j] != UNAGGREGATED) {
            continue;
        }
        let id = sizes.len();
        agg[i] = id;
        let mut size = 1usize;
        for &j in s.row(i) {
            if size >= max_aggregate {
                break;
            }
            agg[j] = id;
            size += 1;
        }
        sizes.push(size);
    }

    for i in 0..n {
        if agg[i] != UNAGGREGATED {
            continue;
        }
        // strongest aggregated neighbor by coupling magnitude, skipping
        // aggregates already at the size bound
        let mut best: Option<(usize, Precision)> = None;
        for (j, v) in a.row_iter(i) {
            if j == i || agg[j] == UNAGGREGATED || sizes[agg[j]] >= max_aggregate {
                continue;
            }
            let weight = v.abs();
            if best.map_or(true, |(_, w)| weight > w) {
                best = Some((agg[j], weight));
            }
        }
        match best {
            Some((g, _)) => {
                agg[i] = g;
                sizes[g] += 1;
            }
            None => {
                agg[i] = sizes.len();
                sizes.push(1);
            }
        }
    }

    let n_agg = sizes.len();
    if n_agg == 0 {
        return Err(AmgError::EmptyCoarsening { level });
    }
    debug!("vmb aggregation: {} unknowns into {} aggregates", n, n_agg);
    Ok(AggregateMap { agg, n_agg })
}

/// Iterated pairwise matching aggregation.
///
/// Each pass greedily pairs every unknown with its strongest unmatched
/// neighbor whose coupling clears the quality bound, then coarsens the
/// operator through the aggregation fast path and repeats; `pair_number`
/// passes yield aggregates of size up to 2^pair_number. When a pass leaves
/// coarsening too slow the bound is relaxed and the pass retried; the
/// adjustment does not carry over to other levels.
pub fn aggregate_pairwise(
    a: &CsrMatrix,
    pair_number: usize,
    quality_bound: Precision,
    level: usize,
) -> Result<AggregateMap> {
    if pair_number == 0 {
        return Err(AmgError::InvalidParameter {
            name: "pair_number",
            message: "at least one matching pass is required".into(),
        });
    }
    let n = a.rows();
    let mut composed: Vec<usize> = (0..n).collect();
    let mut current = a.clone();
    let mut n_agg = n;

    for pass in 0..pair_number {
        let mut bound = quality_bound;
        let mut map = match_pairs(&current, bound);
        // too slow: relax the acceptance bound and retry this pass
        let mut attempts = 0;
        while map.n_agg * 4 > current.rows() * 3 && attempts < 3 {
            bound *= 2.0;
            map = match_pairs(&current, bound);
            attempts += 1;
        }
        if map.n_agg == current.rows() {
            debug!("pairwise matching stalled at pass {}", pass);
            break;
        }
        for g in composed.iter_mut() {
            *g = map.agg[*g];
        }
        n_agg = map.n_agg;
        if pass + 1 < pair_number {
            current = rap_agg(&current, &map.agg, map.n_agg)?;
        }
    }

    if n_agg == n && n > 1 {
        return Err(AmgError::EmptyCoarsening { level });
    }
    debug!(
        "pairwise aggregation: {} unknowns into {} aggregates",
        n, n_agg
    );
    Ok(AggregateMap { agg: composed, n_agg })
}

/// One greedy matching pass over the current operator.
fn match_pairs(a: &CsrMatrix, quality_bound: Precision) -> AggregateMap {
    let n = a.rows();
    let mut agg = vec![UNAGGREGATED; n];
    let mut next = 0usize;
    for i in 0..n {
        if agg[i] != UNAGGREGATED {
            continue;
        }
        let mut absmax: Precision = 0.0;
        for (j, v) in a.row_iter(i) {
            if j != i {
                absmax = absmax.max(v.abs());
            }
        }
        let threshold = if quality_bound > 0.0 {
            absmax / quality_bound
        } else {
            0.0
        };
        let mut best: Option<(usize, Precision)> = None;
        for (j, v) in a.row_iter(i) {
            if j == i || agg[j] != UNAGGREGATED {
                continue;
            }
            // negative couplings pair first, by magnitude
            let weight = if v < 0.0 { v.abs() } else { v.abs() * 0.5 };
            if weight >= threshold && best.map_or(true, |(_, w)| weight > w) {
                best = Some((j, weight));
            }
        }
        agg[i] = next;
        if let Some((j, _)) = best {
            agg[j] = next;
        }
        next += 1;
    }
    AggregateMap { agg, n_agg: next }
}
