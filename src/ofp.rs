//! Objective Feasibility Pump (spec C4): the per-chromosome decode. Rounds
//! the chromosome's genes, projects back onto the LP relaxation with a
//! pump-weighted objective, and iterates until an integer-feasible point is
//! found or the no-improvement budget runs out.

use rand::Rng;

use crate::callback::OfpCallback;
use crate::chromosome::Chromosome;
use crate::config::{EngineOptions, FitnessType};
use crate::cuts::hash_rounding;
use crate::domain::{Domain, DomainSnapshot};
use crate::error::OfpError;
use crate::model::{Model, VarId, EPS};
use crate::rounder::{self, FixedThreshold, RandomThreshold, ThresholdSource};
use crate::solver::{LpStatus, SolverHandle};
use crate::terminators::StopController;

#[derive(Debug, Clone)]
pub struct OfpOutcome {
    pub rounded: Vec<f64>,
    pub fp_value: f64,
    pub fractionality: f64,
    pub num_non_integral: usize,
    pub iterations: u32,
    pub fitness: f64,
    pub integer_feasible: bool,
}

fn compute_fitness(fitness_type: FitnessType, beta: f64, delta: f64, num_non_integral: usize) -> f64 {
    let beta = beta.clamp(0.0, 1.0);
    let n = num_non_integral as f64;
    match fitness_type {
        FitnessType::Convex => beta * delta + (1.0 - beta) * n,
        FitnessType::Geometric => delta.max(0.0).powf(beta) * n.powf(1.0 - beta),
    }
}

fn vectors_equal(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < EPS)
}

/// Flips the `count` binaries in `x_bar` with the smallest `|x_tilde - x_bar|`
/// (weak perturbation, spec.md §4.4 step 2).
fn perturb_short(x_bar: &mut [f64], x_tilde: &[f64], count: usize) {
    let mut order: Vec<usize> = (0..x_bar.len()).collect();
    order.sort_by(|&a, &b| {
        (x_tilde[a] - x_bar[a])
            .abs()
            .partial_cmp(&(x_tilde[b] - x_bar[b]).abs())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    for &j in order.iter().take(count) {
        x_bar[j] = 1.0 - x_bar[j];
    }
}

/// Flips each binary independently with a random strong-perturbation draw
/// (spec.md §4.4 step 3).
fn perturb_long(x_bar: &mut [f64], x_tilde: &[f64], rho_lb: f64, rho_ub: f64, rng: &mut impl Rng) {
    for j in 0..x_bar.len() {
        let u: f64 = rng.gen_range(rho_lb..=rho_ub.max(rho_lb));
        if (x_bar[j] - x_tilde[j]).abs() + u.max(0.0) > 0.5 {
            x_bar[j] = 1.0 - x_bar[j];
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn decode(
    model: &Model,
    domain: &mut Domain,
    baseline: &DomainSnapshot,
    solver: &mut dyn SolverHandle,
    chromosome: &Chromosome,
    binaries: &[VarId],
    options: &EngineOptions,
    rng: &mut impl Rng,
    stop: &StopController,
    callback: &mut dyn OfpCallback,
) -> Result<OfpOutcome, OfpError> {
    let n_binaries = binaries.len();
    let c_norm = model.objective_norm();
    let weight_scale = if c_norm > EPS { (n_binaries as f64).sqrt() / c_norm } else { 0.0 };
    let sign = if model.objective_sense_minimize { 1.0 } else { -1.0 };

    let mut alpha = options.pump_strategy.initial_alpha();
    let mut x_tilde: Vec<f64> = chromosome.alleles().to_vec();
    let mut x_bar_prev: Option<Vec<f64>> = None;
    let mut seen: std::collections::HashMap<u64, f64> = std::collections::HashMap::new();

    let mut best_delta = f64::INFINITY;
    let mut best_fractionality = f64::INFINITY;
    let mut best_num_non_integral = n_binaries;
    let mut best_rounding: Vec<f64> = vec![0.0; n_binaries];

    let mut iter: u32 = 0;
    let mut iter_no_improvement: u32 = 0;
    let mut restarts_left = options.max_restarts;

    loop {
        if stop.must_stop() {
            break;
        }

        let mut fixed_threshold = FixedThreshold(0.5);
        let mut random_threshold;
        let threshold: &mut dyn ThresholdSource = if options.fp.randomized_threshold {
            random_threshold = RandomThreshold { rng: &mut *rng, lo: options.fp.rho_lb, hi: options.fp.rho_ub.max(options.fp.rho_lb) };
            &mut random_threshold
        } else {
            &mut fixed_threshold
        };
        let round_result = rounder::round(domain, baseline, binaries, &x_tilde, threshold);
        let mut x_bar = round_result.rounded;

        if let Some(prev) = &x_bar_prev {
            if vectors_equal(prev, &x_bar) {
                if options.fp.perturb_when_cycling {
                    let width = options.fp.t.max(0.0) * n_binaries as f64;
                    let lo = (width / 2.0).round().max(0.0) as usize;
                    let hi = (1.5 * width).round().max(lo as f64) as usize;
                    let count = if hi > lo { rng.gen_range(lo..=hi) } else { lo }.min(n_binaries);
                    perturb_short(&mut x_bar, &x_tilde, count);
                } else {
                    break;
                }
            }
        }

        let ones: Vec<usize> = x_bar.iter().enumerate().filter(|(_, &v)| v >= 0.5).map(|(j, _)| j).collect();
        let hash = hash_rounding(&ones);
        if let Some(&stored_alpha) = seen.get(&hash) {
            if (stored_alpha - alpha).abs() < options.ofp.delta {
                if options.fp.perturb_when_cycling {
                    perturb_long(&mut x_bar, &x_tilde, options.fp.rho_lb, options.fp.rho_ub, rng);
                } else {
                    break;
                }
            }
        }
        seen.insert(hash, alpha);

        let mut coeffs = vec![0.0f64; model.n_vars()];
        for (idx, &VarId(j)) in binaries.iter().enumerate() {
            let at_ub = (x_bar[idx] - 1.0).abs() < EPS;
            let pump_coef = if at_ub { -(1.0 - alpha) } else { 1.0 - alpha };
            coeffs[j] += pump_coef;
        }
        if weight_scale > 0.0 {
            for (j, var) in model.variables.iter().enumerate() {
                coeffs[j] += sign * alpha * weight_scale * var.obj;
            }
        }

        solver.set_objective(&coeffs, true);
        let solution = match solver.solve_lp() {
            Ok(sol) if sol.status == LpStatus::Optimal => sol,
            _ => break,
        };
        x_tilde = solution.primal;

        let delta: f64 = binaries.iter().enumerate().map(|(idx, &VarId(j))| (x_tilde[j] - x_bar[idx]).abs()).sum();
        let num_non_integral = binaries
            .iter()
            .filter(|&&VarId(j)| x_tilde[j] > EPS && x_tilde[j] < 1.0 - EPS)
            .count();

        iter += 1;
        callback.on_iteration(iter, alpha, delta, num_non_integral);

        if num_non_integral == 0 {
            return Ok(OfpOutcome {
                rounded: x_bar,
                fp_value: 0.0,
                fractionality: 0.0,
                num_non_integral: 0,
                iterations: iter,
                fitness: 0.0,
                integer_feasible: true,
            });
        }

        if delta < best_delta - EPS {
            best_delta = delta;
            best_fractionality =
                binaries.iter().map(|&VarId(j)| x_tilde[j].min(1.0 - x_tilde[j]).max(0.0)).sum();
            best_num_non_integral = num_non_integral;
            best_rounding = x_bar.clone();
            iter_no_improvement = 0;
        } else {
            iter_no_improvement += 1;
        }

        alpha *= options.ofp.phi;
        x_bar_prev = Some(x_bar);

        if iter_no_improvement >= options.fp.iteration_limit {
            if restarts_left == 0 {
                break;
            }
            // No progress for a full window: restart from the best rounding
            // found so far with a stronger perturbation, rather than giving
            // up outright (original_source/FP2/feaspump/feaspump.cpp's
            // `restart()`, gated the same way by a restart budget).
            restarts_left -= 1;
            let mut reseeded = best_rounding.clone();
            perturb_long(&mut reseeded, &chromosome.alleles().to_vec(), options.fp.rho_lb, options.fp.rho_ub, rng);
            x_tilde = reseeded;
            alpha = options.pump_strategy.initial_alpha();
            iter_no_improvement = 0;
            x_bar_prev = None;
        }
    }

    let fitness = compute_fitness(options.fitness_type, options.minimization_factor, best_delta, best_num_non_integral);
    Ok(OfpOutcome {
        rounded: best_rounding,
        fp_value: best_delta,
        fractionality: best_fractionality,
        num_non_integral: best_num_non_integral,
        iterations: iter,
        fitness,
        integer_feasible: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;

    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    use crate::callback::NoOpOfpCallback;
    use crate::domain::Domain;
    use crate::model::{Constraint, Sense, Variable};
    use crate::testutil::FakeSolver;
    use crate::terminators::{ClockKind, StopController};

    fn stop_controller() -> StopController {
        StopController::new(Duration::from_secs(5), ClockKind::Wall, Arc::new(AtomicBool::new(false)))
    }

    fn two_binary_sat() -> Model {
        let vars = vec![Variable::new_binary(0.0), Variable::new_binary(0.0)];
        let row = vec![(VarId(0), 1.0), (VarId(1), 1.0)];
        let cons = vec![Constraint::new("ge", row.clone(), Sense::Ge, 1.0), Constraint::new("le", row, Sense::Le, 1.0)];
        Model::new(vars, cons, true).unwrap()
    }

    fn degenerate_cycling_model() -> Model {
        let vars = vec![Variable::new_binary(0.0), Variable::new_binary(0.0)];
        let cons = vec![
            Constraint::new("sum", vec![(VarId(0), 1.0), (VarId(1), 1.0)], Sense::Eq, 1.0),
            Constraint::new("diff", vec![(VarId(0), 1.0), (VarId(1), -1.0)], Sense::Eq, 0.0),
        ];
        Model::new(vars, cons, true).unwrap()
    }

    /// Spec scenario 1: pure 2-binary SAT-like model, decode from (0.5, 0.5)
    /// must land on an integer-feasible point in a handful of LP projections.
    #[test]
    fn scenario_1_two_binary_sat_decodes_to_integer_feasible() {
        let model = two_binary_sat();
        let mut domain = Domain::build(&model).unwrap();
        let baseline = domain.snapshot();
        let mut solver = FakeSolver::from_model(&model);
        let chromosome = Chromosome::new(vec![0.5, 0.5, 0.123]);
        let options = EngineOptions::default();
        let mut rng = XorShiftRng::seed_from_u64(chromosome.seed() as u64);
        let stop = stop_controller();
        let mut callback = NoOpOfpCallback;

        let outcome = decode(&model, &mut domain, &baseline, &mut solver, &chromosome, &model.binaries, &options, &mut rng, &stop, &mut callback).unwrap();

        assert!(outcome.integer_feasible);
        assert_eq!(outcome.num_non_integral, 0);
        assert!(outcome.iterations <= 3);
        assert!((outcome.rounded[0] + outcome.rounded[1] - 1.0).abs() < 1e-9);
    }

    /// Spec scenario 2: the cycling-trigger model has no integer-feasible
    /// point; OFP must exhaust its iteration budget and report a fractional
    /// best rounding rather than hang.
    #[test]
    fn scenario_2_cycling_model_exhausts_budget_without_integer_feasibility() {
        let model = degenerate_cycling_model();
        let mut domain = Domain::build(&model).unwrap();
        let baseline = domain.snapshot();
        let mut solver = FakeSolver::from_model(&model);
        let chromosome = Chromosome::new(vec![0.5, 0.5, 0.456]);
        let mut options = EngineOptions::default();
        options.fp.iteration_limit = 5;
        options.fp.perturb_when_cycling = true;
        let mut rng = XorShiftRng::seed_from_u64(chromosome.seed() as u64);
        let stop = stop_controller();
        let mut callback = NoOpOfpCallback;

        let outcome = decode(&model, &mut domain, &baseline, &mut solver, &chromosome, &model.binaries, &options, &mut rng, &stop, &mut callback).unwrap();

        assert!(!outcome.integer_feasible);
        assert!(outcome.num_non_integral >= 1);
    }

    /// `max_restarts` must actually extend the search past a single
    /// no-improvement window instead of sitting unread.
    #[test]
    fn max_restarts_runs_additional_iterations_past_one_no_improvement_window() {
        let model = degenerate_cycling_model();
        let mut domain = Domain::build(&model).unwrap();
        let baseline = domain.snapshot();

        let mut no_restart_opts = EngineOptions::default();
        no_restart_opts.fp.iteration_limit = 2;
        no_restart_opts.fp.perturb_when_cycling = true;
        no_restart_opts.max_restarts = 0;
        let mut solver = FakeSolver::from_model(&model);
        let chromosome = Chromosome::new(vec![0.5, 0.5, 0.789]);
        let mut rng = XorShiftRng::seed_from_u64(chromosome.seed() as u64);
        let stop = stop_controller();
        let mut callback = NoOpOfpCallback;
        let baseline_outcome =
            decode(&model, &mut domain, &baseline, &mut solver, &chromosome, &model.binaries, &no_restart_opts, &mut rng, &stop, &mut callback).unwrap();

        let mut restart_opts = no_restart_opts.clone();
        restart_opts.max_restarts = 3;
        let mut solver = FakeSolver::from_model(&model);
        let mut rng = XorShiftRng::seed_from_u64(chromosome.seed() as u64);
        let restarted_outcome =
            decode(&model, &mut domain, &baseline, &mut solver, &chromosome, &model.binaries, &restart_opts, &mut rng, &stop, &mut callback).unwrap();

        assert!(restarted_outcome.iterations > baseline_outcome.iterations);
    }

    #[test]
    fn convex_fitness_is_zero_weight_combination() {
        let f = compute_fitness(FitnessType::Convex, 0.5, 2.0, 4);
        assert!((f - 3.0).abs() < 1e-9);
    }

    #[test]
    fn geometric_fitness_handles_zero_fractional_count() {
        let f = compute_fitness(FitnessType::Geometric, 0.5, 1.0, 0);
        assert_eq!(f, 0.0);
    }

    #[test]
    fn perturb_short_flips_requested_count() {
        let mut x_bar = vec![0.0, 1.0, 0.0, 1.0];
        let x_tilde = vec![0.1, 0.9, 0.4, 0.6];
        let before = x_bar.clone();
        perturb_short(&mut x_bar, &x_tilde, 2);
        let flips = x_bar.iter().zip(&before).filter(|(a, b)| (**a - **b).abs() > 0.5).count();
        assert_eq!(flips, 2);
    }
}
