//! Crate-wide error taxonomy (spec.md §7).
//!
//! Each component gets its own `derive_more`-based error enum, the way
//! `linalg::solver::LinearSolverError` does in the teacher crate. Only
//! [`ModelError`] is meant to ever be fatal (spec.md: "user input errors...
//! fail fast at startup"); every other error maps to a bounded local
//! recovery and is folded into a [`problemo::Problem`] at the boundary
//! where the caller actually needs to give up on the current call.

use derive_more::{Display, Error};

/// Rejected at model-load time. The only error class this crate treats as fatal.
#[derive(Debug, Display, Error, PartialEq, Eq, Clone)]
pub enum ModelError {
    #[display("integer variable {_0} has domain width {_1} > 1, only binaries and continuous variables are supported")]
    UnsupportedIntegerDomain(usize, i64),
    #[display("constraint {_0} is a ranged constraint (finite, distinct lb/ub); propagation does not support it")]
    RangedConstraint(usize),
    #[display("variable {_0} has lb {_1} > ub {_2}")]
    InvertedBounds(usize, f64, f64),
    #[display("model is infeasible by bound propagation alone, before any chromosome is decoded")]
    InfeasibleAtLoad,
}

/// Raised by the propagation engine (C2). Not fatal: infeasibility during
/// propagation is expected and handled by falling back to plain rounding.
#[derive(Debug, Display, Error, PartialEq, Clone, Copy)]
pub enum DomainError {
    #[display("propagation reached a fixpoint with an infeasible propagator")]
    Infeasible,
}

/// Raised by the solver-contract abstraction (§6). Every variant maps to a
/// per-decode or per-call recovery rather than a process abort.
#[derive(Debug, Display, Error, Clone)]
pub enum SolverContractError {
    #[display("LP solve failed: {_0}")]
    LpFailed(String),
    #[display("MILP solve failed: {_0}")]
    MilpFailed(String),
    #[display("presolve probe reported infeasible")]
    ProbeInfeasible,
    #[display("solver reported an internal failure: {_0}")]
    Internal(String),
}

/// Raised inside one OFP decode (C4). Always recoverable: the chromosome
/// falls back to its best-seen rounding with the worst fitness.
#[derive(Debug, Display, Error, Clone, Copy)]
pub enum OfpError {
    #[display("LP projection failed during pumping")]
    LpProjectionFailed,
    #[display("deadline reached mid-decode")]
    DeadlineReached,
}

#[derive(Debug, Display, Error, Clone, Copy)]
pub enum FixerError {
    #[display("histogram fixer probe failed and fixings were restored")]
    ProbeFailed,
}

#[derive(Debug, Display, Error, Clone, Copy)]
pub enum LocalSearchError {
    #[display("MILP local search found no solution within budget")]
    NoSolutionFound,
    #[display("local search time budget was non-positive; call skipped")]
    BudgetExhausted,
}
