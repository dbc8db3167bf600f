//! Coarse-space selection: classical C/F splitting and aggregation.

use crate::types::CfMark;

pub mod aggregation;
pub mod bucket;
pub mod classical;

pub use aggregation::{aggregate_pairwise, aggregate_vmb, AggregateMap};
pub use bucket::BucketList;
pub use classical::{rs_coarsening, AggressiveMode};

/// Result of a C/F coarsening pass.
#[derive(Debug, Clone)]
pub struct Coarsening {
    /// Per-unknown classification.
    pub splitting: Vec<CfMark>,
    /// Number of unknowns marked coarse.
    pub n_coarse: usize,
}

impl Coarsening {
    /// Assemble from a finished splitting vector.
    pub fn from_splitting(splitting: Vec<CfMark>) -> Self {
        let n_coarse = splitting.iter().filter(|m| m.is_coarse()).count();
        Self { splitting, n_coarse }
    }

    /// Coarse indices in fine order, i.e. the coarse renumbering.
    pub fn coarse_index(&self) -> Vec<usize> {
        let mut index = vec![usize::MAX; self.splitting.len()];
        let mut next = 0usize;
        for (i, mark) in self.splitting.iter().enumerate() {
            if mark.is_coarse() {
                index[i] = next;
                next += 1;
            }
        }
        index
    }
}
