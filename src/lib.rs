//! Evolutionary feasibility-pump engine for mixed-integer programs: given a
//! sparse MILP and an LP solver to drive, searches for *any*
//! integer-feasible point, not an optimized one. Finding, proving, or
//! parsing the underlying LP/MILP is out of scope; this crate is written
//! against the [`solver::SolverHandle`] trait so it can sit behind any real
//! solver, and the GA recombination step itself is supplied by the caller
//! through [`engine::Recombinator`].

pub mod callback;
pub mod chromosome;
pub mod config;
pub mod cuts;
pub mod domain;
pub mod engine;
pub mod error;
pub mod histogram;
pub mod localsearch;
pub mod model;
pub mod ofp;
pub mod population;
pub mod propagate;
pub mod rounder;
pub mod solver;
pub mod terminators;
#[cfg(test)]
mod testutil;

pub use engine::{Engine, EngineOutcome, Recombinator};

/// Outcome of one engine run (spec.md §7, "Output").
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum Status {
    #[default]
    InProgress,
    /// An integer-feasible point was found.
    Feasible,
    /// The configured stop rule (generation/target/no-improvement) was hit
    /// with no feasible point in hand.
    InfeasibleWithinBudget,
    /// The wall-clock budget was exhausted.
    TimeLimit,
    /// A Ctrl-C (or programmatic interrupt) was observed.
    Interrupted,
    /// Stopped for a reason other than budget or interrupt (e.g. a
    /// collaborator returned an unrecoverable error mid-run).
    Aborted,
}
