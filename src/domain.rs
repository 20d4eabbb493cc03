//! Domain & Propagation Engine (spec C2).
//!
//! Owns `(lb, ub, fixed)` for every variable, dispatches bound-change
//! events to advisors, and runs propagators in a priority-ordered queue
//! until fixpoint or infeasibility. The only sanctioned way to undo a
//! round of tightenings is [`Domain::snapshot`] / [`Domain::restore`].

use std::collections::BinaryHeap;

use crate::error::DomainError;
use crate::model::{Model, VarKind, EPS};
use crate::propagate::{self, tighten_row, PropState, Propagator, PropagatorKind};

/// Per-variable rate limit on bound-change emission per propagation round
/// (spec.md §4.2): beyond this, tightenings still apply but no longer wake
/// other propagators, which bounds oscillation on near-continuous bounds.
const MAX_EMITS_PER_ROUND: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueEntry {
    priority: i32,
    id: usize,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority.cmp(&other.priority).then(other.id.cmp(&self.id))
    }
}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone)]
pub struct Domain {
    pub lb: Vec<f64>,
    pub ub: Vec<f64>,
    pub fixed: Vec<bool>,
    pub kind: Vec<VarKind>,
    propagators: Vec<Propagator>,
    /// advisors[j] = propagator ids + coefficients touched by variable j.
    advisors: Vec<Vec<propagate::Advisor>>,
    queue: BinaryHeap<QueueEntry>,
    infeasible: bool,
    emits_this_round: Vec<u32>,
}

/// A point-in-time copy of the domain's mutable state, for speculative
/// exploration (the rounder's stock in trade).
#[derive(Clone)]
pub struct DomainSnapshot {
    lb: Vec<f64>,
    ub: Vec<f64>,
    fixed: Vec<bool>,
    prop_states: Vec<(PropState, crate::model::ActivityBounds)>,
    infeasible: bool,
}

impl Domain {
    pub fn build(model: &Model) -> Result<Self, DomainError> {
        let n = model.n_vars();
        let lb: Vec<f64> = model.variables.iter().map(|v| v.lb).collect();
        let ub: Vec<f64> = model.variables.iter().map(|v| v.ub).collect();
        let fixed: Vec<bool> = model.variables.iter().map(|v| v.kind == VarKind::Fixed).collect();
        let kind: Vec<VarKind> = model.variables.iter().map(|v| v.kind).collect();

        let mut propagators = Vec::with_capacity(model.n_cons());
        let mut advisors: Vec<Vec<propagate::Advisor>> = vec![Vec::new(); n];
        for (i, c) in model.constraints.iter().enumerate() {
            let mut p = propagate::classify(i, crate::model::ConId(i), c, model);
            p.activity = c.activity_bounds(&lb, &ub);
            for &(crate::model::VarId(j), coef) in &propagate::row_of(&p.kind) {
                advisors[j].push(propagate::Advisor { propagator_id: i, coef, unique_infinity: false });
            }
            propagators.push(p);
        }

        let mut domain = Self {
            lb,
            ub,
            fixed,
            kind,
            propagators,
            advisors,
            queue: BinaryHeap::new(),
            infeasible: false,
            emits_this_round: vec![0; n],
        };

        for i in 0..domain.propagators.len() {
            domain.mark_dirty(i);
        }
        domain.propagate()?;
        if domain.infeasible {
            return Err(DomainError::Infeasible);
        }
        Ok(domain)
    }

    fn mark_dirty(&mut self, prop_id: usize) {
        self.propagators[prop_id].header.dirty = true;
        self.queue.push(QueueEntry { priority: self.propagators[prop_id].header.priority, id: prop_id });
    }

    /// Fix a binary variable to 0 or 1 and run propagation to fixpoint.
    pub fn fix_binary(&mut self, j: usize, value: f64) -> Result<(), DomainError> {
        if self.infeasible {
            return Err(DomainError::Infeasible);
        }
        debug_assert!(self.kind[j] == VarKind::Binary);
        if value >= 0.5 {
            self.lb[j] = 1.0;
        } else {
            self.ub[j] = 0.0;
        }
        self.fixed[j] = true;
        self.notify(j);
        self.propagate()
    }

    pub fn tighten_lb(&mut self, j: usize, new_lb: f64) -> Result<(), DomainError> {
        if self.infeasible {
            return Err(DomainError::Infeasible);
        }
        let new_lb = new_lb.min(self.ub[j]);
        if new_lb > self.lb[j] + EPS {
            self.lb[j] = new_lb;
            if (self.ub[j] - self.lb[j]).abs() < EPS {
                self.fixed[j] = true;
            }
            self.rate_limited_notify(j);
        }
        self.propagate()
    }

    pub fn tighten_ub(&mut self, j: usize, new_ub: f64) -> Result<(), DomainError> {
        if self.infeasible {
            return Err(DomainError::Infeasible);
        }
        let new_ub = new_ub.max(self.lb[j]);
        if new_ub < self.ub[j] - EPS {
            self.ub[j] = new_ub;
            if (self.ub[j] - self.lb[j]).abs() < EPS {
                self.fixed[j] = true;
            }
            self.rate_limited_notify(j);
        }
        self.propagate()
    }

    fn rate_limited_notify(&mut self, j: usize) {
        if self.emits_this_round[j] < MAX_EMITS_PER_ROUND {
            self.emits_this_round[j] += 1;
            self.notify(j);
        }
    }

    fn notify(&mut self, j: usize) {
        let props: Vec<usize> = self.advisors[j].iter().map(|a| a.propagator_id).collect();
        for pid in props {
            if !self.propagators[pid].failed() {
                self.mark_dirty(pid);
            }
        }
    }

    /// Runs the propagation queue to fixpoint or infeasibility (spec.md §4.2,
    /// "Propagation loop"). Sticky: once any propagator fails, subsequent
    /// calls return `Err` immediately without processing anything further,
    /// until [`Domain::restore`] clears it.
    pub fn propagate(&mut self) -> Result<(), DomainError> {
        if self.infeasible {
            return Err(DomainError::Infeasible);
        }
        while let Some(entry) = self.queue.pop() {
            let pid = entry.id;
            if !self.propagators[pid].header.dirty {
                continue;
            }
            self.propagators[pid].header.dirty = false;
            self.step(pid)?;
            if self.infeasible {
                return Err(DomainError::Infeasible);
            }
        }
        Ok(())
    }

    fn step(&mut self, pid: usize) -> Result<(), DomainError> {
        let kind = self.propagators[pid].kind.clone();
        let activity = self.propagators[pid].activity;
        let implied = match &kind {
            PropagatorKind::Linear { row, sense, rhs } | PropagatorKind::Knapsack { row, sense, rhs } => {
                tighten_row(row, *sense, *rhs, &self.lb, &self.ub, &self.kind, &activity)
            }
            PropagatorKind::Cardinality { vars, sense, k } => self.step_cardinality(vars, *sense, *k),
            PropagatorKind::Implies { a, b, a_coef, b_coef, sense } => {
                self.step_implies(*a, *b, *a_coef, *b_coef, *sense)
            }
            PropagatorKind::Equiv { a, b, same_sign } => self.step_equiv(*a, *b, *same_sign),
            PropagatorKind::VarBound { cont, coef_c, bin, coef_b, sense, rhs } => {
                self.step_varbound(*cont, *coef_c, *bin, *coef_b, *sense, *rhs)
            }
        };

        for imp in implied {
            let crate::propagate::linear::Implication { var, new_lb, new_ub } = imp;
            if let Some(v) = new_lb {
                self.tighten_one_lb(var.0, v, pid)?;
            }
            if let Some(v) = new_ub {
                self.tighten_one_ub(var.0, v, pid)?;
            }
            if self.infeasible {
                return Err(DomainError::Infeasible);
            }
        }

        // Refresh activity and state for this propagator after tightening.
        let row = propagate::row_of(&self.propagators[pid].kind);
        let new_activity = {
            let mut min_activity = 0.0;
            let mut max_activity = 0.0;
            let mut min_inf = 0u32;
            let mut max_inf = 0u32;
            for &(crate::model::VarId(j), coef) in &row {
                let (lo, hi) = if coef > 0.0 {
                    (coef * self.lb[j], coef * self.ub[j])
                } else {
                    (coef * self.ub[j], coef * self.lb[j])
                };
                if lo.is_infinite() { min_inf += 1 } else { min_activity += lo }
                if hi.is_infinite() { max_inf += 1 } else { max_activity += hi }
            }
            crate::model::ActivityBounds { min_activity, max_activity, min_inf, max_inf }
        };
        self.propagators[pid].activity = new_activity;
        Ok(())
    }

    fn tighten_one_lb(&mut self, j: usize, v: f64, origin: usize) -> Result<(), DomainError> {
        if self.fixed[j] {
            return Ok(());
        }
        let v = v.min(self.ub[j]);
        if v > self.lb[j] + EPS {
            self.lb[j] = v;
            if (self.ub[j] - self.lb[j]).abs() < EPS {
                self.fixed[j] = true;
            }
            if v > self.ub[j] + EPS {
                self.infeasible = true;
                self.propagators[origin].header.state = PropState::Infeasible;
                return Err(DomainError::Infeasible);
            }
            self.rate_limited_notify(j);
        }
        Ok(())
    }

    fn tighten_one_ub(&mut self, j: usize, v: f64, origin: usize) -> Result<(), DomainError> {
        if self.fixed[j] {
            return Ok(());
        }
        let v = v.max(self.lb[j]);
        if v < self.ub[j] - EPS {
            self.ub[j] = v;
            if (self.ub[j] - self.lb[j]).abs() < EPS {
                self.fixed[j] = true;
            }
            if self.lb[j] > v + EPS {
                self.infeasible = true;
                self.propagators[origin].header.state = PropState::Infeasible;
                return Err(DomainError::Infeasible);
            }
            self.rate_limited_notify(j);
        }
        Ok(())
    }

    fn step_cardinality(&mut self, vars: &[crate::model::VarId], sense: crate::model::Sense, k: f64) -> Vec<crate::propagate::linear::Implication> {
        use crate::model::Sense;
        let ones = vars.iter().filter(|v| self.lb[v.0] >= 1.0 - EPS).count() as f64;
        let free: Vec<_> = vars.iter().filter(|v| !self.fixed[v.0]).copied().collect();
        let mut out = Vec::new();
        // At `k` ones already: Le/Eq force every remaining free var to 0.
        if matches!(sense, Sense::Le | Sense::Eq) && ones >= k - EPS {
            for v in &free {
                out.push(crate::propagate::linear::Implication { var: *v, new_lb: None, new_ub: Some(0.0) });
            }
        }
        // Not enough slots left to reach `k` without every free var: Ge/Eq
        // force every remaining free var to 1.
        if matches!(sense, Sense::Ge | Sense::Eq) && ones + free.len() as f64 <= k + EPS {
            for v in &free {
                out.push(crate::propagate::linear::Implication { var: *v, new_lb: Some(1.0), new_ub: None });
            }
        }
        out
    }

    fn step_implies(
        &mut self,
        a: crate::model::VarId,
        b: crate::model::VarId,
        a_coef: f64,
        b_coef: f64,
        sense: crate::model::Sense,
    ) -> Vec<crate::propagate::linear::Implication> {
        // a_coef*x_a + b_coef*x_b {<=,>=} 0, both binary. Canonical case is
        // x_a - x_b <= 0 ("a implies b"): a==1 forces b==1; b==0 forces a==0.
        use crate::model::Sense;
        let mut out = Vec::new();
        let forward = (a_coef > 0.0) == matches!(sense, Sense::Le);
        let (hi_var, lo_var) = if forward { (a, b) } else { (b, a) };
        if self.lb[hi_var.0] >= 1.0 - EPS {
            out.push(crate::propagate::linear::Implication { var: lo_var, new_lb: Some(1.0), new_ub: None });
        }
        if self.ub[lo_var.0] <= EPS {
            out.push(crate::propagate::linear::Implication { var: hi_var, new_lb: None, new_ub: Some(0.0) });
        }
        let _ = b_coef;
        out
    }

    fn step_equiv(&mut self, a: crate::model::VarId, b: crate::model::VarId, same_sign: bool) -> Vec<crate::propagate::linear::Implication> {
        let mut out = Vec::new();
        let mirror = |v: f64| if same_sign { v } else { 1.0 - v };
        if self.fixed[a.0] {
            let target = mirror(self.lb[a.0]);
            out.push(crate::propagate::linear::Implication { var: b, new_lb: Some(target), new_ub: Some(target) });
        }
        if self.fixed[b.0] {
            let target = mirror(self.lb[b.0]);
            out.push(crate::propagate::linear::Implication { var: a, new_lb: Some(target), new_ub: Some(target) });
        }
        out
    }

    fn step_varbound(
        &mut self,
        cont: crate::model::VarId,
        coef_c: f64,
        bin: crate::model::VarId,
        coef_b: f64,
        sense: crate::model::Sense,
        rhs: f64,
    ) -> Vec<crate::propagate::linear::Implication> {
        use crate::model::Sense;
        let mut out = Vec::new();
        if !self.fixed[bin.0] {
            return out;
        }
        let y = self.lb[bin.0];
        let adjusted_rhs = rhs - coef_b * y;
        let bound = adjusted_rhs / coef_c;
        match sense {
            Sense::Le => {
                if coef_c > 0.0 {
                    out.push(crate::propagate::linear::Implication { var: cont, new_lb: None, new_ub: Some(bound) });
                } else {
                    out.push(crate::propagate::linear::Implication { var: cont, new_lb: Some(bound), new_ub: None });
                }
            }
            Sense::Ge => {
                if coef_c > 0.0 {
                    out.push(crate::propagate::linear::Implication { var: cont, new_lb: Some(bound), new_ub: None });
                } else {
                    out.push(crate::propagate::linear::Implication { var: cont, new_lb: None, new_ub: Some(bound) });
                }
            }
            Sense::Eq => {
                out.push(crate::propagate::linear::Implication { var: cont, new_lb: Some(bound), new_ub: Some(bound) });
            }
        }
        out
    }

    pub fn is_infeasible(&self) -> bool {
        self.infeasible
    }

    pub fn snapshot(&self) -> DomainSnapshot {
        DomainSnapshot {
            lb: self.lb.clone(),
            ub: self.ub.clone(),
            fixed: self.fixed.clone(),
            prop_states: self.propagators.iter().map(|p| (p.header.state, p.activity)).collect(),
            infeasible: self.infeasible,
        }
    }

    /// Rewinds to a previous snapshot. Clears every propagator's dirty bit
    /// and drops the pending queue: cached "unique infinity contributor"
    /// indices are recomputed lazily on the next bound change.
    pub fn restore(&mut self, snap: &DomainSnapshot) {
        self.lb.copy_from_slice(&snap.lb);
        self.ub.copy_from_slice(&snap.ub);
        self.fixed.copy_from_slice(&snap.fixed);
        self.infeasible = snap.infeasible;
        self.queue.clear();
        for (p, (state, activity)) in self.propagators.iter_mut().zip(&snap.prop_states) {
            p.header.dirty = false;
            p.header.state = *state;
            p.activity = *activity;
        }
        self.emits_this_round.iter_mut().for_each(|e| *e = 0);
    }

    pub fn reset_round(&mut self) {
        self.emits_this_round.iter_mut().for_each(|e| *e = 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Constraint, Model, Sense, Variable};

    fn cardinality_model() -> Model {
        let vars = vec![Variable::new_binary(0.0); 5];
        let row: Vec<_> = (0..5).map(|j| (crate::model::VarId(j), 1.0)).collect();
        let cons = vec![Constraint::new("card", row, Sense::Eq, 1.0)];
        Model::new(vars, cons, true).unwrap()
    }

    #[test]
    fn fixing_one_cardinality_var_propagates_the_rest() {
        let model = cardinality_model();
        let mut domain = Domain::build(&model).unwrap();
        domain.fix_binary(0, 1.0).unwrap();
        for j in 1..5 {
            assert_eq!(domain.ub[j], 0.0, "var {j} should be forced to 0");
        }
    }

    #[test]
    fn snapshot_round_trip_is_exact() {
        let model = cardinality_model();
        let mut domain = Domain::build(&model).unwrap();
        let snap = domain.snapshot();
        domain.fix_binary(0, 1.0).unwrap();
        domain.restore(&snap);
        assert_eq!(domain.lb, snap.lb);
        assert_eq!(domain.ub, snap.ub);
        assert_eq!(domain.fixed, snap.fixed);
    }

    #[test]
    fn infeasible_domain_is_sticky() {
        let vars = vec![Variable::new_binary(0.0), Variable::new_binary(0.0)];
        let cons = vec![
            Constraint::new("c1", vec![(crate::model::VarId(0), 1.0), (crate::model::VarId(1), 1.0)], Sense::Eq, 1.0),
            Constraint::new("c2", vec![(crate::model::VarId(0), 1.0), (crate::model::VarId(1), -1.0)], Sense::Eq, 0.0),
        ];
        let model = Model::new(vars, cons, true).unwrap();
        let mut domain = Domain::build(&model).unwrap();
        domain.fix_binary(0, 1.0).unwrap();
        let res = domain.fix_binary(1, 1.0);
        assert!(res.is_err());
        assert!(domain.is_infeasible());
    }
}
