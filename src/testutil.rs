//! A tiny in-memory [`SolverHandle`] double for exercising OFP, the
//! histogram fixer, and local search end-to-end without a real LP/MILP
//! solver behind them. Exact for the small models these tests build:
//! `solve_lp` enumerates every vertex of the box-and-rows polytope (a
//! bounded region, so the optimum is always attained at one), and
//! `solve_milp`/`presolve_probe` enumerate the free binaries directly.
//! Not a general solver; test-only.

use std::time::{Duration, Instant};

use crate::callback::MilpCallback;
use crate::error::SolverContractError;
use crate::model::{Model, Sense, VarId};
use crate::solver::{ConHandle, LpSolution, LpStatus, MilpSolution, MilpStatus, SolverHandle};

const TOL: f64 = 1e-6;

#[derive(Clone)]
struct Row {
    handle: ConHandle,
    coef: Vec<f64>,
    sense: Sense,
    rhs: f64,
}

#[derive(Clone)]
pub struct FakeSolver {
    n: usize,
    lb: Vec<f64>,
    ub: Vec<f64>,
    rows: Vec<Row>,
    obj: Vec<f64>,
    relaxed: bool,
    feasibility_emphasis: bool,
    next_handle: u64,
}

impl FakeSolver {
    /// Builds a handle mirroring `model`'s variable bounds and constraints,
    /// the way a real adapter would be constructed from it.
    pub fn from_model(model: &Model) -> Self {
        let n = model.n_vars();
        let lb = model.variables.iter().map(|v| v.lb).collect();
        let ub = model.variables.iter().map(|v| v.ub).collect();
        let mut rows = Vec::with_capacity(model.n_cons());
        let mut next_handle = 0u64;
        for c in &model.constraints {
            let mut coef = vec![0.0; n];
            for &(VarId(j), k) in &c.row {
                coef[j] += k;
            }
            rows.push(Row { handle: ConHandle(next_handle), coef, sense: c.sense, rhs: c.rhs });
            next_handle += 1;
        }
        Self { n, lb, ub, rows, obj: vec![0.0; n], relaxed: true, feasibility_emphasis: false, next_handle }
    }

    fn row_value(row: &Row, x: &[f64]) -> f64 {
        row.coef.iter().zip(x).map(|(c, xj)| c * xj).sum()
    }

    fn row_satisfied(row: &Row, x: &[f64]) -> bool {
        let v = Self::row_value(row, x);
        match row.sense {
            Sense::Le => v <= row.rhs + TOL,
            Sense::Ge => v >= row.rhs - TOL,
            Sense::Eq => (v - row.rhs).abs() <= TOL,
        }
    }

    fn all_satisfied(&self, x: &[f64]) -> bool {
        (0..self.n).all(|j| x[j] >= self.lb[j] - TOL && x[j] <= self.ub[j] + TOL) && self.rows.iter().all(|r| Self::row_satisfied(r, x))
    }

    fn objective_value(&self, x: &[f64]) -> f64 {
        self.obj.iter().zip(x).map(|(c, xj)| c * xj).sum()
    }

    fn slacks(&self, x: &[f64]) -> Vec<f64> {
        self.rows.iter().map(|r| r.rhs - Self::row_value(r, x)).collect()
    }

    fn free_vars(&self) -> Vec<usize> {
        (0..self.n).filter(|&j| self.ub[j] - self.lb[j] > 1e-9).collect()
    }

    /// One candidate hyperplane per box bound and per constraint row, used
    /// to enumerate vertices of the feasible polytope.
    fn facets(&self) -> Vec<(Vec<f64>, f64)> {
        let mut facets = Vec::with_capacity(2 * self.n + self.rows.len());
        for j in 0..self.n {
            let mut e = vec![0.0; self.n];
            e[j] = 1.0;
            facets.push((e.clone(), self.lb[j]));
            facets.push((e, self.ub[j]));
        }
        for r in &self.rows {
            facets.push((r.coef.clone(), r.rhs));
        }
        facets
    }

    /// Enumerates every combination of `n` facets, solves the resulting
    /// square system, and keeps the feasible solution minimizing the
    /// objective. Exact for a bounded polytope: its optimum is always
    /// attained at a vertex.
    fn solve_vertex_lp(&self) -> Option<Vec<f64>> {
        let facets = self.facets();
        let k = facets.len();
        let n = self.n;
        if k < n {
            return None;
        }

        let mut best: Option<(f64, Vec<f64>)> = None;
        let mut combo: Vec<usize> = (0..n).collect();
        loop {
            let a: Vec<Vec<f64>> = combo.iter().map(|&i| facets[i].0.clone()).collect();
            let b: Vec<f64> = combo.iter().map(|&i| facets[i].1).collect();
            if let Some(x) = gaussian_solve(&a, &b) {
                if self.all_satisfied(&x) {
                    let obj = self.objective_value(&x);
                    if best.as_ref().map(|(bo, _)| obj < *bo).unwrap_or(true) {
                        best = Some((obj, x));
                    }
                }
            }
            if !next_combination(&mut combo, k) {
                break;
            }
        }
        best.map(|(_, x)| x)
    }
}

/// Advances `combo` (length `n`, values in `0..k`, strictly increasing) to
/// the next combination in lexicographic order; `false` once exhausted.
fn next_combination(combo: &mut [usize], k: usize) -> bool {
    let n = combo.len();
    if n == 0 {
        return false;
    }
    let mut i = n - 1;
    loop {
        if combo[i] < k - n + i {
            combo[i] += 1;
            for j in i + 1..n {
                combo[j] = combo[j - 1] + 1;
            }
            return true;
        }
        if i == 0 {
            return false;
        }
        i -= 1;
    }
}

/// Gauss-Jordan elimination with partial pivoting. `None` if singular.
fn gaussian_solve(a_in: &[Vec<f64>], b_in: &[f64]) -> Option<Vec<f64>> {
    let n = a_in.len();
    let mut a = a_in.to_vec();
    let mut b = b_in.to_vec();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().partial_cmp(&a[j][col].abs()).unwrap())?;
        if a[pivot][col].abs() < 1e-9 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        let pv = a[col][col];
        for k in col..n {
            a[col][k] /= pv;
        }
        b[col] /= pv;
        for r in 0..n {
            if r == col {
                continue;
            }
            let factor = a[r][col];
            if factor.abs() < 1e-12 {
                continue;
            }
            for k in col..n {
                a[r][k] -= factor * a[col][k];
            }
            b[r] -= factor * b[col];
        }
    }
    Some(b)
}

impl SolverHandle for FakeSolver {
    fn n_vars(&self) -> usize {
        self.n
    }

    fn n_cons(&self) -> usize {
        self.rows.len()
    }

    fn set_bounds(&mut self, var: VarId, lb: f64, ub: f64) {
        self.lb[var.0] = lb;
        self.ub[var.0] = ub;
    }

    fn get_bounds(&self, var: VarId) -> (f64, f64) {
        (self.lb[var.0], self.ub[var.0])
    }

    fn set_objective(&mut self, coeffs: &[f64], minimize: bool) {
        self.obj = if minimize { coeffs.to_vec() } else { coeffs.iter().map(|c| -c).collect() };
    }

    fn solve_lp(&mut self) -> Result<LpSolution, SolverContractError> {
        match self.solve_vertex_lp() {
            Some(x) => {
                let objective = self.objective_value(&x);
                Ok(LpSolution { status: LpStatus::Optimal, primal: x.clone(), dual: vec![0.0; self.rows.len()], slack: self.slacks(&x), objective })
            }
            None => Ok(LpSolution {
                status: LpStatus::Infeasible,
                primal: vec![0.0; self.n],
                dual: vec![0.0; self.rows.len()],
                slack: vec![0.0; self.rows.len()],
                objective: 0.0,
            }),
        }
    }

    fn presolve_probe(&mut self) -> Result<(), SolverContractError> {
        let free = self.free_vars();
        let k = free.len();
        if k > 20 {
            return Err(SolverContractError::Internal("too many free variables for the fake solver's probe".into()));
        }
        for mask in 0u32..(1u32 << k) {
            let mut x: Vec<f64> = (0..self.n).map(|j| self.lb[j]).collect();
            for (bit, &j) in free.iter().enumerate() {
                x[j] = if (mask >> bit) & 1 == 1 { self.ub[j] } else { self.lb[j] };
            }
            if self.all_satisfied(&x) {
                return Ok(());
            }
        }
        Err(SolverContractError::ProbeInfeasible)
    }

    fn add_constraint(&mut self, row: &[(VarId, f64)], sense: Sense, rhs: f64) -> ConHandle {
        let mut coef = vec![0.0; self.n];
        for &(VarId(j), k) in row {
            coef[j] += k;
        }
        let handle = ConHandle(self.next_handle);
        self.next_handle += 1;
        self.rows.push(Row { handle, coef, sense, rhs });
        handle
    }

    fn remove_constraint(&mut self, handle: ConHandle) {
        self.rows.retain(|r| r.handle != handle);
    }

    fn solve_milp(&mut self, callbacks: &mut dyn MilpCallback, time_budget: Duration) -> Result<MilpSolution, SolverContractError> {
        let deadline = Instant::now() + time_budget;
        let free = self.free_vars();
        let k = free.len();
        if k > 20 {
            return Ok(MilpSolution { status: MilpStatus::Unknown, primal: None, objective: None });
        }

        let mut best: Option<(f64, Vec<f64>)> = None;
        let mut aborted = false;
        for mask in 0u32..(1u32 << k) {
            if Instant::now() >= deadline || !callbacks.on_info() {
                aborted = true;
                break;
            }
            let mut x: Vec<f64> = (0..self.n).map(|j| self.lb[j]).collect();
            for (bit, &j) in free.iter().enumerate() {
                x[j] = if (mask >> bit) & 1 == 1 { self.ub[j] } else { self.lb[j] };
            }
            if !self.all_satisfied(&x) {
                continue;
            }
            let obj = self.objective_value(&x);
            if best.as_ref().map(|(bo, _)| obj < *bo).unwrap_or(true) {
                best = Some((obj, x.clone()));
                if !callbacks.on_incumbent(obj) {
                    aborted = true;
                    break;
                }
            }
        }

        match best {
            Some((obj, x)) => {
                let status = if aborted { MilpStatus::Feasible } else { MilpStatus::Optimal };
                Ok(MilpSolution { status, primal: Some(x), objective: Some(obj) })
            }
            None => {
                let status = if aborted { MilpStatus::Unknown } else { MilpStatus::Infeasible };
                Ok(MilpSolution { status, primal: None, objective: None })
            }
        }
    }

    fn set_relaxed(&mut self, relaxed: bool) {
        self.relaxed = relaxed;
    }

    fn set_feasibility_emphasis(&mut self, enabled: bool) {
        self.feasibility_emphasis = enabled;
    }

    fn clone_handle(&self) -> Box<dyn SolverHandle> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Constraint, Variable};

    fn two_binary_sat(low: f64, high: f64) -> Model {
        let vars = vec![Variable::new_binary(0.0), Variable::new_binary(0.0)];
        let row: Vec<_> = vec![(VarId(0), 1.0), (VarId(1), 1.0)];
        let cons = vec![Constraint::new("ge", row.clone(), Sense::Ge, low), Constraint::new("le", row, Sense::Le, high)];
        Model::new(vars, cons, true).unwrap()
    }

    #[test]
    fn solves_integral_vertex_directly() {
        let model = two_binary_sat(1.0, 1.0);
        let mut solver = FakeSolver::from_model(&model);
        solver.set_objective(&[0.0, 0.0], true);
        let sol = solver.solve_lp().unwrap();
        assert_eq!(sol.status, LpStatus::Optimal);
        assert!((sol.primal[0] + sol.primal[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn solves_fractional_optimum_for_degenerate_equalities() {
        let vars = vec![Variable::new_binary(0.0), Variable::new_binary(0.0)];
        let cons = vec![
            Constraint::new("sum", vec![(VarId(0), 1.0), (VarId(1), 1.0)], Sense::Eq, 1.0),
            Constraint::new("diff", vec![(VarId(0), 1.0), (VarId(1), -1.0)], Sense::Eq, 0.0),
        ];
        let model = Model::new(vars, cons, true).unwrap();
        let mut solver = FakeSolver::from_model(&model);
        solver.set_objective(&[0.0, 0.0], true);
        let sol = solver.solve_lp().unwrap();
        assert_eq!(sol.status, LpStatus::Optimal);
        assert!((sol.primal[0] - 0.5).abs() < 1e-6);
        assert!((sol.primal[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn clone_handle_mirrors_added_constraints() {
        let model = two_binary_sat(0.0, 2.0);
        let mut solver = FakeSolver::from_model(&model);
        assert_eq!(solver.n_cons(), 2);
        solver.add_constraint(&[(VarId(0), 1.0), (VarId(1), 1.0)], Sense::Le, 1.0);
        let clone = solver.clone_handle();
        assert_eq!(clone.n_cons(), 3);
    }
}
