//! Cut memory (spec C9): a hash-indexed map from rounding hash to the
//! no-good constraint handle that excludes it. Append-only, the master
//! thread is the sole writer; every worker's solver clone receives a
//! mirrored cut when the map grows (spec.md §5).

use std::collections::HashMap;

use crate::model::{Sense, VarId};
use crate::solver::ConHandle;

/// Folds the sorted set of "binary j is 1" indices with the standard
/// mixer, matching spec.md §4.9.
pub fn hash_rounding(ones: &[usize]) -> u64 {
    let mut h: u64 = 0;
    for &j in ones {
        h ^= (j as u64)
            .wrapping_add(0x9e3779b9)
            .wrapping_add(h << 6)
            .wrapping_add(h >> 2);
    }
    h
}

pub fn ones_of(rounding: &[f64]) -> Vec<usize> {
    rounding
        .iter()
        .enumerate()
        .filter(|(_, &v)| v >= 0.5)
        .map(|(j, _)| j)
        .collect()
}

/// A no-good cut excluding one specific rounding (spec.md §3):
/// `sum_{S1} x_j - sum_{S0} x_j <= |S1| - 1`.
#[derive(Debug, Clone)]
pub struct NoGoodCut {
    pub hash: u64,
    pub row: Vec<(VarId, f64)>,
    pub sense: Sense,
    pub rhs: f64,
}

pub fn build_no_good(binaries: &[VarId], rounding: &[f64]) -> NoGoodCut {
    let ones: Vec<usize> = ones_of(rounding);
    let hash = hash_rounding(&ones);
    let ones_set: std::collections::HashSet<usize> = ones.iter().copied().collect();
    let row: Vec<(VarId, f64)> = binaries
        .iter()
        .map(|&v| (v, if ones_set.contains(&v.0) { 1.0 } else { -1.0 }))
        .collect();
    NoGoodCut {
        hash,
        row,
        sense: Sense::Le,
        rhs: ones.len() as f64 - 1.0,
    }
}

/// Hash-indexed, append-only, monotonically growing memory of excluded
/// roundings. `lookup(h)` always returns the same handle for a hash it has
/// already seen (spec.md §8, "Testable Properties").
#[derive(Default)]
pub struct CutMemory {
    seen: HashMap<u64, ConHandle>,
}

impl CutMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, hash: u64) -> Option<ConHandle> {
        self.seen.get(&hash).copied()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Records a newly-added cut's handle. Caller is responsible for
    /// having checked [`CutMemory::lookup`] first and only calling this
    /// once the cut has actually been installed on the master's solver.
    pub fn record(&mut self, hash: u64, handle: ConHandle) {
        self.seen.entry(hash).or_insert(handle);
    }
}
