//! Propagators: one per constraint, analyzed once at load time into a
//! specialized form (spec.md §3, §4.2).
//!
//! Dispatch is a small `match` over a tagged enum rather than a trait
//! object: advisor updates are a handful of arithmetic operations per
//! variant and the set of variants is closed, so a vtable buys nothing
//! (spec.md §9, "advisor dispatch is a small switch, not virtual").

pub mod linear;

use crate::model::{ActivityBounds, ConId, Constraint, Model, Sense, VarId, EPS};

pub use linear::tighten_row;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropState {
    Unknown,
    Entailed,
    StronglyEntailed,
    Infeasible,
}

/// Shared header carried by every propagator variant.
#[derive(Debug, Clone)]
pub struct PropagatorHeader {
    pub id: usize,
    pub name: String,
    pub priority: i32,
    pub dirty: bool,
    pub state: PropState,
}

#[derive(Debug, Clone)]
pub enum PropagatorKind {
    /// Generic linear row; sign-partitioned coefficients, min/max activity.
    Linear { row: Vec<(VarId, f64)>, sense: Sense, rhs: f64 },
    /// `sum x_j {<=,=,>=} k`, all x binary with coefficient 1.
    Cardinality { vars: Vec<VarId>, sense: Sense, k: f64 },
    /// All coefficients positive, x >= 0.
    Knapsack { row: Vec<(VarId, f64)>, sense: Sense, rhs: f64 },
    /// Two binaries, +-1 coefficients, rhs 0, sense Le or Ge: x => y.
    Implies { a: VarId, b: VarId, a_coef: f64, b_coef: f64, sense: Sense },
    /// Two binaries, +-1 coefficients, rhs 0, sense Eq: x == y (or x == 1-y).
    Equiv { a: VarId, b: VarId, same_sign: bool },
    /// One continuous/integer + one binary: `coef_c * x {<=,>=} rhs - coef_b * y`.
    VarBound { cont: VarId, coef_c: f64, bin: VarId, coef_b: f64, sense: Sense, rhs: f64 },
}

#[derive(Debug, Clone)]
pub struct Propagator {
    pub header: PropagatorHeader,
    pub con: ConId,
    pub kind: PropagatorKind,
    pub activity: ActivityBounds,
}

impl Propagator {
    pub fn failed(&self) -> bool {
        self.header.state == PropState::Infeasible
    }
}

/// How a specific bound change on a variable updates one of its
/// propagator's activities (spec.md §3, "Advisor").
#[derive(Debug, Clone, Copy)]
pub struct Advisor {
    pub propagator_id: usize,
    pub coef: f64,
    /// True if this variable is the only +-infinity contributor on the
    /// activity side this advisor maintains (used to invalidate the
    /// "unique infinity contributor" cache on the next event).
    pub unique_infinity: bool,
}

/// Picks the most specific propagator class whose structural pattern
/// matches a constraint row (spec.md §4.2, "Construction").
pub fn classify(id: usize, con: ConId, c: &Constraint, model: &Model) -> Propagator {
    let is_binary = |v: VarId| model.variables[v.0].kind == crate::model::VarKind::Binary;
    let all_binary = c.row.iter().all(|&(v, _)| is_binary(v));
    let all_unit = c.row.iter().all(|&(_, coef)| (coef - 1.0).abs() < EPS);
    let all_positive = c.row.iter().all(|&(_, coef)| coef > 0.0);
    let all_nonneg_lb = c
        .row
        .iter()
        .all(|&(v, _)| model.variables[v.0].lb >= -EPS);

    let kind = if all_binary && all_unit && c.row.len() >= 2 {
        PropagatorKind::Cardinality {
            vars: c.row.iter().map(|&(v, _)| v).collect(),
            sense: c.sense,
            k: c.rhs,
        }
    } else if c.row.len() == 2
        && c.row.iter().all(|&(v, coef)| is_binary(v) && (coef.abs() - 1.0).abs() < EPS)
        && c.rhs.abs() < EPS
    {
        let (a, a_coef) = c.row[0];
        let (b, b_coef) = c.row[1];
        if c.sense == Sense::Eq {
            PropagatorKind::Equiv {
                a,
                b,
                same_sign: (a_coef > 0.0) == (b_coef > 0.0),
            }
        } else {
            PropagatorKind::Implies { a, b, a_coef, b_coef, sense: c.sense }
        }
    } else if c.row.len() == 2
        && c.row.iter().any(|&(v, _)| is_binary(v))
        && c.row.iter().any(|&(v, _)| !is_binary(v))
    {
        let (mut cont, mut coef_c) = (c.row[0].0, c.row[0].1);
        let (mut bin, mut coef_b) = (c.row[1].0, c.row[1].1);
        if is_binary(cont) {
            std::mem::swap(&mut cont, &mut bin);
            std::mem::swap(&mut coef_c, &mut coef_b);
        }
        PropagatorKind::VarBound { cont, coef_c, bin, coef_b, sense: c.sense, rhs: c.rhs }
    } else if all_positive && all_nonneg_lb {
        PropagatorKind::Knapsack { row: c.row.clone(), sense: c.sense, rhs: c.rhs }
    } else {
        PropagatorKind::Linear { row: c.row.clone(), sense: c.sense, rhs: c.rhs }
    };

    Propagator {
        header: PropagatorHeader {
            id,
            name: c.name.clone(),
            priority: priority_of(&kind),
            dirty: true,
            state: PropState::Unknown,
        },
        con,
        kind,
        activity: ActivityBounds::default(),
    }
}

/// More specific propagators run first: they tend to derive tighter
/// implications from fewer activity updates.
fn priority_of(kind: &PropagatorKind) -> i32 {
    match kind {
        PropagatorKind::Equiv { .. } | PropagatorKind::Implies { .. } => 100,
        PropagatorKind::VarBound { .. } => 80,
        PropagatorKind::Cardinality { .. } => 60,
        PropagatorKind::Knapsack { .. } => 40,
        PropagatorKind::Linear { .. } => 0,
    }
}

/// One row's worth of variables, for advisor registration.
pub fn row_of(kind: &PropagatorKind) -> Vec<(VarId, f64)> {
    match kind {
        PropagatorKind::Linear { row, .. } | PropagatorKind::Knapsack { row, .. } => row.clone(),
        PropagatorKind::Cardinality { vars, .. } => vars.iter().map(|&v| (v, 1.0)).collect(),
        PropagatorKind::Implies { a, b, a_coef, b_coef, .. } => vec![(*a, *a_coef), (*b, *b_coef)],
        PropagatorKind::Equiv { a, b, same_sign } => {
            vec![(*a, 1.0), (*b, if *same_sign { -1.0 } else { 1.0 })]
        }
        PropagatorKind::VarBound { cont, coef_c, bin, coef_b, .. } => {
            vec![(*cont, *coef_c), (*bin, *coef_b)]
        }
    }
}
