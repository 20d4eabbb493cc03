//! Solver callback contract (spec.md §6): `install-info-callback`,
//! `install-incumbent-callback`, `set-terminate-flag`, generalized from the
//! teacher's single per-iteration `Callback` into the three MILP hooks plus
//! an OFP per-iteration hook used for logging and early stopping.

use std::sync::Arc;

use crate::terminators::StopController;

/// Hooks a MILP solve installs before calling `solve-MILP` (§6). The
/// contract: `on_info` fires on an info-callback tick, `on_incumbent`
/// fires whenever the solver reports a new incumbent; both return whether
/// the solve should keep going.
pub trait MilpCallback: Send {
    fn on_info(&mut self) -> bool {
        true
    }

    fn on_incumbent(&mut self, objective: f64) -> bool {
        let _ = objective;
        true
    }
}

/// Does nothing; keeps the solve running unconditionally.
pub struct NoOpMilpCallback;

impl MilpCallback for NoOpMilpCallback {}

/// Aborts the MILP solve as soon as the shared [`StopController`] says to
/// stop (spec.md §5, "Callbacks inside MILP solves check the stop
/// controller at every incumbent and at an info-callback firing").
pub struct StoppingMilpCallback {
    stop: Arc<StopController>,
}

impl StoppingMilpCallback {
    pub fn new(stop: Arc<StopController>) -> Self {
        Self { stop }
    }
}

impl MilpCallback for StoppingMilpCallback {
    fn on_info(&mut self) -> bool {
        !self.stop.must_stop()
    }

    fn on_incumbent(&mut self, objective: f64) -> bool {
        tracing::debug!(objective, "milp incumbent");
        !self.stop.must_stop()
    }
}

/// Aborts a MILP solve as soon as it reports any incumbent at all (spec.md
/// §4.6, "bounded MILP probe... feasibility emphasis"): useful when the
/// caller only needs a witness of feasibility, not an optimized one.
pub struct FirstIncumbentMilpCallback {
    stop: Arc<StopController>,
    found: bool,
}

impl FirstIncumbentMilpCallback {
    pub fn new(stop: Arc<StopController>) -> Self {
        Self { stop, found: false }
    }

    pub fn found_incumbent(&self) -> bool {
        self.found
    }
}

impl MilpCallback for FirstIncumbentMilpCallback {
    fn on_info(&mut self) -> bool {
        !self.stop.must_stop() && !self.found
    }

    fn on_incumbent(&mut self, objective: f64) -> bool {
        tracing::debug!(objective, "first incumbent reached, aborting for discovery");
        self.found = true;
        false
    }
}

/// Per-iteration hook inside one OFP decode (spec.md §4.4).
pub trait OfpCallback: Send {
    fn on_iteration(&mut self, iter: u32, alpha: f64, delta: f64, num_non_integral: usize) {
        let _ = (iter, alpha, delta, num_non_integral);
    }
}

pub struct NoOpOfpCallback;
impl OfpCallback for NoOpOfpCallback {}

/// Logs every OFP iteration at `trace` level via `tracing`, the teacher's
/// replacement for `ConvergenceOutput`'s `println!`.
pub struct TracingOfpCallback;

impl OfpCallback for TracingOfpCallback {
    fn on_iteration(&mut self, iter: u32, alpha: f64, delta: f64, num_non_integral: usize) {
        tracing::trace!(iter, alpha, delta, num_non_integral, "ofp iteration");
    }
}
