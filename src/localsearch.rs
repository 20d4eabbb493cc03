//! MIP Local Search (spec C7): consensus-fix the population's agreed
//! binaries, scan for constraints that can't be satisfied no matter how the
//! remaining free binaries land, unfix just enough to repair them, then
//! hand the rest to a bounded MILP solve.

use crate::callback::FirstIncumbentMilpCallback;
use crate::chromosome::Chromosome;
use crate::config::{ConstraintFiltering, LocalSearchParams};
use crate::cuts::{hash_rounding, CutMemory, NoGoodCut};
use crate::error::LocalSearchError;
use crate::model::{ConId, Constraint, Model, RelaxationPoint, Sense, VarId, EPS};
use crate::solver::{MilpStatus, SolverHandle};
use crate::terminators::StopController;

/// Per-binary list of the constraints it should be unfixed through during
/// BFS expansion, built once at init (spec.md §4.7, "Important-constraints list").
pub struct ImportantConstraints {
    per_binary: Vec<Vec<ConId>>,
}

impl ImportantConstraints {
    pub fn build(model: &Model, binaries: &[VarId], relaxation: &RelaxationPoint, policy: ConstraintFiltering) -> Self {
        let mut adjacency: Vec<Vec<ConId>> = vec![Vec::new(); model.n_vars()];
        for (ci, c) in model.constraints.iter().enumerate() {
            for &(VarId(j), _) in &c.row {
                adjacency[j].push(ConId(ci));
            }
        }

        let passes = |policy: ConstraintFiltering, ConId(ci): ConId| match policy {
            ConstraintFiltering::All => true,
            ConstraintFiltering::OnlyNonzeroDuals => relaxation.dual.get(ci).copied().unwrap_or(0.0).abs() > EPS,
            ConstraintFiltering::NonzeroDualsOrZeroSlacks => {
                relaxation.dual.get(ci).copied().unwrap_or(0.0).abs() > EPS
                    || relaxation.slack.get(ci).copied().unwrap_or(0.0).abs() < EPS
            }
        };

        let mut per_binary = Vec::with_capacity(binaries.len());
        for &VarId(j) in binaries {
            let mut policy = policy;
            let cons = loop {
                let mut cons: Vec<ConId> = adjacency[j].iter().copied().filter(|&cid| passes(policy, cid)).collect();
                if !cons.is_empty() || policy == ConstraintFiltering::All {
                    cons.sort_by(|&ConId(a), &ConId(b)| {
                        let da = relaxation.dual.get(a).copied().unwrap_or(0.0).abs();
                        let db = relaxation.dual.get(b).copied().unwrap_or(0.0).abs();
                        let sa = relaxation.slack.get(a).copied().unwrap_or(0.0).abs();
                        let sb = relaxation.slack.get(b).copied().unwrap_or(0.0).abs();
                        db.partial_cmp(&da).unwrap().then(sa.partial_cmp(&sb).unwrap())
                    });
                    break cons;
                }
                policy = policy.relax().expect("All never returns empty by construction");
            };
            per_binary.push(cons);
        }
        Self { per_binary }
    }

    pub fn for_binary(&self, idx: usize) -> &[ConId] {
        &self.per_binary[idx]
    }
}

#[derive(Debug, Clone)]
pub struct LocalSearchOutcome {
    pub status: MilpStatus,
    pub primal: Option<Vec<f64>>,
}

fn one_frequency(binaries: &[VarId], slice: &[&Chromosome]) -> Vec<f64> {
    let n = slice.len().max(1) as f64;
    binaries
        .iter()
        .enumerate()
        .map(|(idx, _)| slice.iter().filter(|c| c.decoded.rounded.get(idx).copied().unwrap_or(0.0) >= 0.5).count() as f64 / n)
        .collect()
}

fn partial_no_good(ones: &[VarId], zeros: &[VarId]) -> NoGoodCut {
    let hash = hash_rounding(&ones.iter().map(|v| v.0).collect::<Vec<_>>());
    let mut row: Vec<(VarId, f64)> = ones.iter().map(|&v| (v, 1.0)).collect();
    row.extend(zeros.iter().map(|&v| (v, -1.0)));
    NoGoodCut { hash, row, sense: Sense::Le, rhs: ones.len() as f64 - 1.0 }
}

/// Puts the master solver into non-relaxed, feasibility-emphasis mode for a
/// MILP solve and restores it on every exit path, including an early `?`
/// return, via `Drop` (spec.md §5, solver state is shared across workers'
/// `clone_handle()` calls and must not leak between them).
struct MilpModeGuard<'a> {
    solver: &'a mut dyn SolverHandle,
}

impl<'a> MilpModeGuard<'a> {
    fn engage(solver: &'a mut dyn SolverHandle) -> Self {
        solver.set_relaxed(false);
        solver.set_feasibility_emphasis(true);
        Self { solver }
    }
}

impl<'a> Drop for MilpModeGuard<'a> {
    fn drop(&mut self) {
        self.solver.set_relaxed(true);
        self.solver.set_feasibility_emphasis(false);
    }
}

impl<'a> std::ops::Deref for MilpModeGuard<'a> {
    type Target = dyn SolverHandle + 'a;
    fn deref(&self) -> &Self::Target {
        self.solver
    }
}

impl<'a> std::ops::DerefMut for MilpModeGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.solver
    }
}

fn install_cut_if_new(solver: &mut dyn SolverHandle, cuts: &mut CutMemory, cut: &NoGoodCut) {
    if cuts.lookup(cut.hash).is_some() {
        return;
    }
    let handle = solver.add_constraint(&cut.row, cut.sense, cut.rhs);
    cuts.record(cut.hash, handle);
}

/// Classifies a constraint's violation under the best possible assignment
/// of its still-free binaries (spec.md §4.7, Phase 2), folding continuous
/// variables in at their full-relaxation value since they are not part of
/// consensus fixing.
fn is_violated(c: &Constraint, binary_index: &[Option<usize>], fixed: &[Option<f64>], relaxation: &RelaxationPoint) -> bool {
    let mut fixed_contribution = 0.0;
    let mut pos_residual = 0.0;
    let mut neg_residual = 0.0;
    for &(VarId(j), coef) in &c.row {
        match binary_index[j] {
            Some(bidx) => match fixed[bidx] {
                Some(v) => fixed_contribution += coef * v,
                None => {
                    if coef > 0.0 {
                        pos_residual += coef;
                    } else {
                        neg_residual += coef;
                    }
                }
            },
            None => fixed_contribution += coef * relaxation.primal.get(j).copied().unwrap_or(0.0),
        }
    }
    match c.sense {
        Sense::Le => fixed_contribution + neg_residual > c.rhs + EPS,
        Sense::Ge => fixed_contribution + pos_residual < c.rhs - EPS,
        Sense::Eq => {
            let surplus = c.rhs - fixed_contribution;
            surplus < neg_residual - EPS || surplus > pos_residual + EPS
        }
    }
}

fn sign_helps(sense: Sense, coef: f64) -> bool {
    match sense {
        Sense::Le => coef < 0.0,
        Sense::Ge => coef > 0.0,
        Sense::Eq => true,
    }
}

pub fn search(
    model: &Model,
    solver: &mut dyn SolverHandle,
    binaries: &[VarId],
    slice: &[&Chromosome],
    relaxation: &RelaxationPoint,
    important: &ImportantConstraints,
    cuts: &mut CutMemory,
    params: &LocalSearchParams,
    stop: &StopController,
) -> Result<LocalSearchOutcome, LocalSearchError> {
    let budget = stop.sub_budget(std::time::Duration::from_millis(50)).ok_or(LocalSearchError::BudgetExhausted)?;
    let budget = budget.min(params.max_time);

    let mut binary_index: Vec<Option<usize>> = vec![None; model.n_vars()];
    for (idx, &VarId(j)) in binaries.iter().enumerate() {
        binary_index[j] = Some(idx);
    }

    // Phase 1: consensus fix.
    let freq = one_frequency(binaries, slice);
    let mut fixed: Vec<Option<f64>> = vec![None; binaries.len()];
    for (idx, &f) in freq.iter().enumerate() {
        if f < params.discrepancy_level {
            fixed[idx] = Some(0.0);
        } else if f > 1.0 - params.discrepancy_level {
            fixed[idx] = Some(1.0);
        }
    }
    for (idx, v) in binaries.iter().enumerate() {
        if let Some(value) = fixed[idx] {
            solver.set_bounds(*v, value, value);
        }
    }

    // Phase 2: violated-constraint scan, cut, and unfix.
    for c in &model.constraints {
        if stop.must_stop() {
            break;
        }
        if !is_violated(c, &binary_index, &fixed, relaxation) {
            continue;
        }
        let ones: Vec<VarId> =
            c.row.iter().filter_map(|&(v, _)| binary_index[v.0].and_then(|idx| if fixed[idx] == Some(1.0) { Some(v) } else { None })).collect();
        let zeros: Vec<VarId> =
            c.row.iter().filter_map(|&(v, _)| binary_index[v.0].and_then(|idx| if fixed[idx] == Some(0.0) { Some(v) } else { None })).collect();
        if !ones.is_empty() {
            install_cut_if_new(solver, cuts, &partial_no_good(&ones, &zeros));
        }

        for &(v, coef) in &c.row {
            let Some(idx) = binary_index[v.0] else { continue };
            let should_unfix = match c.sense {
                Sense::Eq => fixed[idx].is_some(),
                _ => fixed[idx] == Some(0.0) && sign_helps(c.sense, coef),
            };
            if should_unfix {
                fixed[idx] = None;
                solver.set_bounds(v, 0.0, 1.0);
            }
        }
    }

    // Phase 3. Guard restores `set_relaxed`/`set_feasibility_emphasis` on
    // every exit from here on, including the `?` below.
    let mut solver = MilpModeGuard::engage(solver);
    let mut callback = FirstIncumbentMilpCallback::new(std::sync::Arc::new(StopController::new(budget, stop.clock_kind(), stop.interrupted_flag())));
    let mut solution = solver.solve_milp(&mut callback, budget).map_err(|_| LocalSearchError::NoSolutionFound)?;

    // Phase 4: BFS unfix expansion on infeasibility.
    if solution.status == MilpStatus::Infeasible && params.unfix_levels > 0 && !stop.must_stop() {
        let ones: Vec<VarId> = binaries.iter().enumerate().filter_map(|(idx, &v)| if fixed[idx] == Some(1.0) { Some(v) } else { None }).collect();
        let zeros: Vec<VarId> = binaries.iter().enumerate().filter_map(|(idx, &v)| if fixed[idx] == Some(0.0) { Some(v) } else { None }).collect();
        if !ones.is_empty() {
            install_cut_if_new(&mut solver, cuts, &partial_no_good(&ones, &zeros));
        }

        let mut frontier: Vec<usize> = (0..binaries.len()).filter(|&idx| fixed[idx].is_none()).collect();
        for _ in 0..params.unfix_levels {
            if stop.must_stop() || frontier.is_empty() {
                break;
            }
            let mut next_frontier = Vec::new();
            for &idx in &frontier {
                for &ConId(ci) in important.for_binary(idx) {
                    for &(v, _) in &model.constraints[ci].row {
                        if let Some(bidx) = binary_index[v.0] {
                            if fixed[bidx].is_some() {
                                fixed[bidx] = None;
                                solver.set_bounds(v, 0.0, 1.0);
                                next_frontier.push(bidx);
                            }
                        }
                    }
                }
            }
            frontier = next_frontier;
        }

        let remaining = stop.sub_budget(std::time::Duration::from_millis(50));
        if let Some(remaining) = remaining {
            let budget2 = remaining.min(params.max_time);
            let mut callback2 =
                FirstIncumbentMilpCallback::new(std::sync::Arc::new(StopController::new(budget2, stop.clock_kind(), stop.interrupted_flag())));
            solution = solver.solve_milp(&mut callback2, budget2).map_err(|_| LocalSearchError::NoSolutionFound)?;
        }
    }

    Ok(LocalSearchOutcome { status: solution.status, primal: solution.primal })
}
