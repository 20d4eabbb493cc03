//! Sparse linear algebra & matrix model (spec C1).
//!
//! Constraint rows, coefficient iteration, and the full-relaxation point
//! (primal/dual/slack) obtained once at load from the underlying solver.
//! Coefficients are kept as plain `(VarId, f64)` pairs rather than a
//! column-major sparse matrix because C2's propagators need *row*-major
//! iteration (one constraint at a time) and per-row incremental activity
//! maintenance.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

pub const EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarKind {
    Binary,
    Continuous,
    /// General integer; only `{0,1}`-width domains are supported (spec.md
    /// §4.1, §6), rejected otherwise at `Model::new`.
    Integer,
    /// `lb == ub`; never unfixed by propagation, only by the outer engine
    /// restoring a saved bound pair.
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sense {
    Le,
    Ge,
    Eq,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub kind: VarKind,
    pub lb: f64,
    pub ub: f64,
    pub obj: f64,
}

impl Variable {
    pub fn new_binary(obj: f64) -> Self {
        Self {
            kind: VarKind::Binary,
            lb: 0.0,
            ub: 1.0,
            obj,
        }
    }

    pub fn new_continuous(lb: f64, ub: f64, obj: f64) -> Self {
        Self {
            kind: VarKind::Continuous,
            lb,
            ub,
            obj,
        }
    }

    pub fn new_integer(lb: f64, ub: f64, obj: f64) -> Self {
        Self {
            kind: VarKind::Integer,
            lb,
            ub,
            obj,
        }
    }
}

/// A sparse constraint row: `sum(coef * x_j) {<=,>=,=} rhs`.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub name: String,
    pub row: Vec<(VarId, f64)>,
    pub sense: Sense,
    pub rhs: f64,
    /// Set only for a genuine two-sided (ranged) row: a second, finite
    /// bound distinct from `rhs`. Propagation only handles one-sided rows
    /// (spec.md §9); `Model::new` rejects any constraint carrying this.
    pub other_bound: Option<f64>,
}

impl Constraint {
    pub fn new(name: impl Into<String>, row: Vec<(VarId, f64)>, sense: Sense, rhs: f64) -> Self {
        Self {
            name: name.into(),
            row,
            sense,
            rhs,
            other_bound: None,
        }
    }

    /// A two-sided row `lb <= sum(coef * x_j) <= ub`. Always rejected by
    /// `Model::new`; callers must split it into two one-sided rows
    /// themselves (spec.md §9).
    pub fn ranged(name: impl Into<String>, row: Vec<(VarId, f64)>, lb: f64, ub: f64) -> Self {
        Self {
            name: name.into(),
            row,
            sense: Sense::Le,
            rhs: ub,
            other_bound: Some(lb),
        }
    }

    /// Lower/upper activity bounds given current variable bounds, and the
    /// count of +/-infinity contributors to each side (spec.md §3).
    pub fn activity_bounds(&self, lb: &[f64], ub: &[f64]) -> ActivityBounds {
        let mut min_activity = 0.0;
        let mut max_activity = 0.0;
        let mut min_inf = 0u32;
        let mut max_inf = 0u32;
        for &(VarId(j), coef) in &self.row {
            if coef == 0.0 {
                continue;
            }
            let (vlb, vub) = (lb[j], ub[j]);
            let (lo, hi) = if coef > 0.0 {
                (coef * vlb, coef * vub)
            } else {
                (coef * vub, coef * vlb)
            };
            if lo.is_infinite() {
                min_inf += 1;
            } else {
                min_activity += lo;
            }
            if hi.is_infinite() {
                max_inf += 1;
            } else {
                max_activity += hi;
            }
        }
        ActivityBounds {
            min_activity,
            max_activity,
            min_inf,
            max_inf,
        }
    }

    /// A constraint is entailed iff tightening can no longer change its
    /// truth value in either direction.
    pub fn is_entailed(&self, a: &ActivityBounds) -> bool {
        let lhs_ok = self.sense == Sense::Le || a.min_activity_or_neg_inf(self.rhs) >= self.rhs - EPS;
        let rhs_ok = self.sense == Sense::Ge || a.max_activity_or_inf(self.rhs) <= self.rhs + EPS;
        lhs_ok && rhs_ok
    }

    pub fn is_infeasible(&self, a: &ActivityBounds) -> bool {
        match self.sense {
            Sense::Le => a.min_inf == 0 && a.min_activity > self.rhs + EPS,
            Sense::Ge => a.max_inf == 0 && a.max_activity < self.rhs - EPS,
            Sense::Eq => {
                (a.min_inf == 0 && a.min_activity > self.rhs + EPS)
                    || (a.max_inf == 0 && a.max_activity < self.rhs - EPS)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityBounds {
    pub min_activity: f64,
    pub max_activity: f64,
    pub min_inf: u32,
    pub max_inf: u32,
}

impl ActivityBounds {
    fn min_activity_or_neg_inf(&self, _rhs: f64) -> f64 {
        if self.min_inf > 0 {
            f64::NEG_INFINITY
        } else {
            self.min_activity
        }
    }

    fn max_activity_or_inf(&self, _rhs: f64) -> f64 {
        if self.max_inf > 0 {
            f64::INFINITY
        } else {
            self.max_activity
        }
    }
}

/// The primal/dual/slack point obtained by solving the LP relaxation once
/// at load time (spec.md §4.1, "full relaxation point").
#[derive(Debug, Clone)]
pub struct RelaxationPoint {
    pub primal: Vec<f64>,
    pub dual: Vec<f64>,
    pub slack: Vec<f64>,
}

/// The sparse model: variables, constraints, and the set of binary indices.
#[derive(Debug, Clone)]
pub struct Model {
    pub variables: Vec<Variable>,
    pub constraints: Vec<Constraint>,
    pub binaries: Vec<VarId>,
    pub objective_sense_minimize: bool,
}

impl Model {
    pub fn new(variables: Vec<Variable>, constraints: Vec<Constraint>, minimize: bool) -> Result<Self, ModelError> {
        for (j, v) in variables.iter().enumerate() {
            if v.lb > v.ub + EPS {
                return Err(ModelError::InvertedBounds(j, v.lb, v.ub));
            }
            if v.kind == VarKind::Integer && (v.ub - v.lb) > 1.0 + EPS {
                return Err(ModelError::UnsupportedIntegerDomain(j, (v.ub - v.lb) as i64));
            }
        }
        for (i, c) in constraints.iter().enumerate() {
            if let Some(other) = c.other_bound {
                if other.is_finite() && (other - c.rhs).abs() > EPS {
                    return Err(ModelError::RangedConstraint(i));
                }
            }
        }
        let binaries = variables
            .iter()
            .enumerate()
            .filter(|(_, v)| v.kind == VarKind::Binary)
            .map(|(j, _)| VarId(j))
            .collect();
        Ok(Self {
            variables,
            constraints,
            binaries,
            objective_sense_minimize: minimize,
        })
    }

    pub fn n_vars(&self) -> usize {
        self.variables.len()
    }

    pub fn n_cons(&self) -> usize {
        self.constraints.len()
    }

    pub fn objective_norm(&self) -> f64 {
        self.variables.iter().map(|v| v.obj * v.obj).sum::<f64>().sqrt()
    }

    /// `c^T x` under the model's native sense (flips sign internally for
    /// maximisation so callers always get a value consistent with minimizing).
    pub fn objective_value(&self, x: &[f64]) -> f64 {
        let raw: f64 = self.variables.iter().zip(x).map(|(v, xj)| v.obj * xj).sum();
        if self.objective_sense_minimize {
            raw
        } else {
            -raw
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_binary_cardinality() -> Model {
        let vars = vec![Variable::new_binary(0.0); 5];
        let row: Vec<_> = (0..5).map(|j| (VarId(j), 1.0)).collect();
        let cons = vec![Constraint::new("card", row, Sense::Eq, 1.0)];
        Model::new(vars, cons, true).unwrap()
    }

    #[test]
    fn cardinality_activity_bounds() {
        let model = two_binary_cardinality();
        let lb: Vec<f64> = model.variables.iter().map(|v| v.lb).collect();
        let ub: Vec<f64> = model.variables.iter().map(|v| v.ub).collect();
        let a = model.constraints[0].activity_bounds(&lb, &ub);
        assert_eq!(a.min_activity, 0.0);
        assert_eq!(a.max_activity, 5.0);
        assert_eq!(a.min_inf, 0);
        assert_eq!(a.max_inf, 0);
    }

    #[test]
    fn rejects_inverted_bounds() {
        let vars = vec![Variable::new_continuous(5.0, 1.0, 0.0)];
        let err = Model::new(vars, vec![], true).unwrap_err();
        assert_eq!(err, ModelError::InvertedBounds(0, 5.0, 1.0));
    }

    #[test]
    fn rejects_integer_domain_wider_than_binary() {
        let vars = vec![Variable::new_integer(0.0, 3.0, 0.0)];
        let err = Model::new(vars, vec![], true).unwrap_err();
        assert_eq!(err, ModelError::UnsupportedIntegerDomain(0, 3));
    }

    #[test]
    fn accepts_unit_width_integer_domain() {
        let vars = vec![Variable::new_integer(0.0, 1.0, 0.0)];
        assert!(Model::new(vars, vec![], true).is_ok());
    }

    #[test]
    fn rejects_ranged_constraint() {
        let vars = vec![Variable::new_continuous(0.0, 10.0, 0.0)];
        let cons = vec![Constraint::ranged("range", vec![(VarId(0), 1.0)], 1.0, 5.0)];
        let err = Model::new(vars, cons, true).unwrap_err();
        assert_eq!(err, ModelError::RangedConstraint(0));
    }
}
