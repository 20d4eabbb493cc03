//! Generic linear-row bound tightening, shared by the `Linear` and
//! `Knapsack` propagator variants (spec.md §4.2, "Numeric tightening for
//! continuous vars").

use crate::model::{ActivityBounds, Sense, VarId, VarKind, EPS};

/// One implied tightening: `var` can be pushed to at least/at most `value`.
#[derive(Debug, Clone, Copy)]
pub struct Implication {
    pub var: VarId,
    pub new_lb: Option<f64>,
    pub new_ub: Option<f64>,
}

/// For a row `sum(coef_j * x_j) {<=,>=,=} rhs` and the current activity
/// bounds, derive every variable's implied tightening.
///
/// For the `<=` side, a bound on `x_j` is only derivable when the *rest* of
/// the row can be made arbitrarily small without `x_j`, i.e. either every
/// term is finite (`min_inf == 0`), or `x_j` itself is the row's single
/// infinite contributor on that side (`min_inf == 1` and it's the one).
/// The `>=` side is symmetric using the max activity.
pub fn tighten_row(
    row: &[(VarId, f64)],
    sense: Sense,
    rhs: f64,
    lb: &[f64],
    ub: &[f64],
    kind: &[VarKind],
    activity: &ActivityBounds,
) -> Vec<Implication> {
    let mut out = Vec::new();
    let do_le = matches!(sense, Sense::Le | Sense::Eq);
    let do_ge = matches!(sense, Sense::Ge | Sense::Eq);

    for &(VarId(j), coef) in row {
        if coef.abs() < EPS {
            continue;
        }
        let (vlb, vub) = (lb[j], ub[j]);
        let own_min = if coef > 0.0 { coef * vlb } else { coef * vub };
        let own_max = if coef > 0.0 { coef * vub } else { coef * vlb };
        let is_min_inf_contributor = own_min.is_infinite();
        let is_max_inf_contributor = own_max.is_infinite();

        if do_le && (activity.min_inf == 0 || (activity.min_inf == 1 && is_min_inf_contributor)) {
            let without_j = if is_min_inf_contributor {
                activity.min_activity
            } else {
                activity.min_activity - own_min
            };
            let bound = (rhs - without_j) / coef;
            push_implied(VarId(j), coef > 0.0, bound, kind[j], &mut out);
        }

        if do_ge && (activity.max_inf == 0 || (activity.max_inf == 1 && is_max_inf_contributor)) {
            let without_j = if is_max_inf_contributor {
                activity.max_activity
            } else {
                activity.max_activity - own_max
            };
            let bound = (rhs - without_j) / coef;
            push_implied(VarId(j), coef < 0.0, bound, kind[j], &mut out);
        }
    }
    out
}

fn push_implied(var: VarId, implies_upper: bool, bound: f64, kind: VarKind, out: &mut Vec<Implication>) {
    let bound = match kind {
        VarKind::Continuous => bound,
        VarKind::Binary | VarKind::Integer | VarKind::Fixed => {
            if implies_upper {
                bound.floor()
            } else {
                bound.ceil()
            }
        }
    };
    if implies_upper {
        out.push(Implication { var, new_lb: None, new_ub: Some(bound) });
    } else {
        out.push(Implication { var, new_lb: Some(bound), new_ub: None });
    }
}
