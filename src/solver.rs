//! The solver contract (spec.md §6): the black-box abstraction every
//! engine component depends on. This crate never implements an LP/MILP
//! solver itself — that is explicitly out of scope (spec.md §1) — it only
//! defines the trait the engine is written against, so it can be backed by
//! any real solver (HiGHS, CLP/CBC, Gurobi, ...) behind a thin adapter.

use std::time::Duration;

use crate::callback::MilpCallback;
use crate::error::SolverContractError;
use crate::model::{Sense, VarId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LpStatus {
    Optimal,
    Infeasible,
    Unbounded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MilpStatus {
    Optimal,
    Feasible,
    Infeasible,
    Unknown,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct LpSolution {
    pub status: LpStatus,
    pub primal: Vec<f64>,
    pub dual: Vec<f64>,
    pub slack: Vec<f64>,
    pub objective: f64,
}

#[derive(Debug, Clone)]
pub struct MilpSolution {
    pub status: MilpStatus,
    pub primal: Option<Vec<f64>>,
    pub objective: Option<f64>,
}

/// Opaque identifier for a constraint added to a solver instance (used by
/// the cut memory, C9, to later `remove_constraint` if ever needed, and to
/// recognize which handle a mirrored cut maps to on another worker's clone).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConHandle(pub u64);

/// The abstraction the core engine depends on (spec.md §6, "Solver
/// contract"). One instance per worker thread; `clone_handle` produces an
/// independent context over the same model, as required by §5
/// ("Each worker owns a complete solver clone").
pub trait SolverHandle: Send {
    fn n_vars(&self) -> usize;
    fn n_cons(&self) -> usize;

    fn set_bounds(&mut self, var: VarId, lb: f64, ub: f64);
    fn get_bounds(&self, var: VarId) -> (f64, f64);

    /// Installs a new linear objective, replacing the previous one.
    /// `minimize = false` means the engine's caller wants `c^T x` flipped
    /// before use (the pump always minimizes internally, spec.md §4.4).
    fn set_objective(&mut self, coeffs: &[f64], minimize: bool);

    fn solve_lp(&mut self) -> Result<LpSolution, SolverContractError>;

    /// Cheap feasibility probe used by the histogram fixer and the final
    /// trim of a local-search fixing; must not mutate the LP relaxation's
    /// optimal basis for subsequent calls beyond the bound changes already
    /// applied. Returns `Err(ProbeInfeasible)` rather than panicking.
    fn presolve_probe(&mut self) -> Result<(), SolverContractError>;

    fn add_constraint(&mut self, row: &[(VarId, f64)], sense: Sense, rhs: f64) -> ConHandle;
    fn remove_constraint(&mut self, handle: ConHandle);

    /// Solves the MILP with integrality re-enabled on the current bounds,
    /// polling `callbacks` at every incumbent and info-callback firing.
    fn solve_milp(
        &mut self,
        callbacks: &mut dyn MilpCallback,
        time_budget: Duration,
    ) -> Result<MilpSolution, SolverContractError>;

    /// Disables integrality enforcement (used while the engine still wants
    /// LP relaxations of a model that nominally has integer variables).
    fn set_relaxed(&mut self, relaxed: bool);

    /// Trades optimality for speed to the first feasible incumbent (used by
    /// the histogram fixer's bounded probe and local search's Phase 3,
    /// spec.md §4.6-4.7, "feasibility emphasis").
    fn set_feasibility_emphasis(&mut self, enabled: bool);

    /// Independent solver context over the same model (spec.md §5).
    fn clone_handle(&self) -> Box<dyn SolverHandle>;
}
