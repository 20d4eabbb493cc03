//! Propagation-aware rounder (spec C3): round one variable, propagate,
//! iterate. Deterministic given the input fractional point and the
//! threshold source.

use rand::Rng;

use crate::domain::{Domain, DomainSnapshot};
use crate::model::VarId;

/// Supplies the per-decision rounding threshold `t` used in
/// `round(x_j + t)`. Deterministic given the same sequence of draws.
pub trait ThresholdSource {
    fn next(&mut self) -> f64;
}

/// Always the same threshold; the default per spec.md §9's open question
/// ("default to deterministic, t = 0.5").
pub struct FixedThreshold(pub f64);

impl ThresholdSource for FixedThreshold {
    fn next(&mut self) -> f64 {
        self.0
    }
}

/// Draws `t` from a per-thread RNG; deterministic as long as the RNG was
/// seeded deterministically (by the chromosome's trailing gene).
pub struct RandomThreshold<'a, R: Rng> {
    pub rng: &'a mut R,
    pub lo: f64,
    pub hi: f64,
}

impl<'a, R: Rng> ThresholdSource for RandomThreshold<'a, R> {
    fn next(&mut self) -> f64 {
        self.rng.gen_range(self.lo..=self.hi)
    }
}

#[derive(Debug, Clone)]
pub struct RoundResult {
    /// One entry per binary in `binaries`, in that order.
    pub rounded: Vec<f64>,
    pub iterations: u32,
    /// True if propagation failed and the remainder fell back to plain rounding.
    pub fell_back: bool,
}

/// Rounds a fractional point over binaries to an integer point, using
/// propagation to avoid obviously-doomed choices (spec.md §4.3).
///
/// `domain` is restored to `baseline` first so repeated calls across
/// chromosomes in the same generation don't see each other's tightenings.
pub fn round(
    domain: &mut Domain,
    baseline: &DomainSnapshot,
    binaries: &[VarId],
    frac: &[f64],
    threshold: &mut dyn ThresholdSource,
) -> RoundResult {
    domain.restore(baseline);

    let mut order: Vec<usize> = (0..binaries.len()).collect();
    order.sort_by(|&a, &b| {
        let da = (frac[a] - 0.5).abs();
        let db = (frac[b] - 0.5).abs();
        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal).then(a.cmp(&b))
    });

    let mut iterations = 0u32;
    let mut fell_back = false;

    for (pos, &idx) in order.iter().enumerate() {
        let j = binaries[idx].0;
        if domain.fixed[j] {
            continue; // fixed as a side effect of a previous propagation
        }
        let t = threshold.next();
        let value = if frac[idx] + t >= 1.0 { 1.0 } else { 0.0 };
        iterations += 1;
        if domain.fix_binary(j, value).is_err() {
            fell_back = true;
            // Plain rounding for the remainder: no more propagation calls.
            for &idx2 in &order[pos..] {
                let j2 = binaries[idx2].0;
                if !domain.fixed[j2] {
                    let v = if frac[idx2] >= 0.5 { 1.0 } else { 0.0 };
                    if v >= 0.5 {
                        domain.lb[j2] = 1.0;
                    } else {
                        domain.ub[j2] = 0.0;
                    }
                    domain.fixed[j2] = true;
                }
            }
            break;
        }
    }

    let rounded: Vec<f64> = binaries.iter().map(|v| if domain.lb[v.0] >= 0.5 { 1.0 } else { 0.0 }).collect();
    RoundResult { rounded, iterations, fell_back }
}
