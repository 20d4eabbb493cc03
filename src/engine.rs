//! Top-level orchestration: wires C1-C9 together into the generational
//! loop described in spec.md §3 ("Control flow per generation"). The GA
//! recombination operator itself is a collaborator supplied by the caller
//! (spec.md §1, Non-goals) via the [`Recombinator`] trait.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use problemo::Problem;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use rayon::prelude::*;

use crate::callback::{NoOpOfpCallback, OfpCallback, TracingOfpCallback};
use crate::chromosome::{Chromosome, Decoded};
use crate::config::{EngineOptions, StopRule};
use crate::cuts::{self, CutMemory};
use crate::domain::{Domain, DomainSnapshot};
use crate::error::ModelError;
use crate::histogram;
use crate::localsearch::{self, ImportantConstraints};
use crate::model::{Model, RelaxationPoint, VarId};
use crate::ofp;
use crate::population::Population;
use crate::solver::SolverHandle;
use crate::terminators::{ClockKind, StopController};
use crate::Status;

/// Supplies chromosomes. Implementations own the actual biased random-key
/// recombination; this crate only needs the population it produces.
pub trait Recombinator: Send {
    fn initial_population(&mut self, n_binaries: usize, population_size: usize) -> Vec<Chromosome>;
    fn next_generation(&mut self, population: &Population<crate::population::Sorted>) -> Vec<Chromosome>;
}

#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub status: Status,
    pub primal: Option<Vec<f64>>,
    pub generations: u32,
    pub lp_count: u64,
    pub cuts_generated: usize,
}

/// How often (in generations) the histogram fixer and MIP local search run
/// against the current population's elite slice.
const REFINEMENT_CADENCE: u32 = 5;
const ELITE_SLICE: usize = 16;

pub struct Engine {
    model: Model,
    solver_template: Box<dyn SolverHandle>,
    binaries: Vec<VarId>,
    relaxation: RelaxationPoint,
    baseline: DomainSnapshot,
    domain_template: Domain,
    important: ImportantConstraints,
    options: EngineOptions,
    cuts: CutMemory,
    stop: Arc<StopController>,
}

impl Engine {
    pub fn new(
        model: Model,
        solver_template: Box<dyn SolverHandle>,
        relaxation: RelaxationPoint,
        mut options: EngineOptions,
        interrupted: Arc<AtomicBool>,
    ) -> Result<Self, Problem> {
        let domain_template = Domain::build(&model).map_err(|_| ModelError::InfeasibleAtLoad)?;
        let baseline = domain_template.snapshot();
        let binaries = model.binaries.clone();

        if let crate::config::FixingType::Automatic = options.histogram.var_fixing_type {
            options.histogram.var_fixing_type = histogram::resolve_automatic_fixing_type(&relaxation, &binaries);
        }

        let important = ImportantConstraints::build(&model, &binaries, &relaxation, options.constraint_filtering);
        let stop = Arc::new(StopController::new(options.max_time, ClockKind::Wall, interrupted));

        Ok(Self {
            model,
            solver_template,
            binaries,
            relaxation,
            baseline,
            domain_template,
            important,
            options,
            cuts: CutMemory::new(),
            stop,
        })
    }

    fn decode_generation(&self, chromosomes: &[Chromosome]) -> Vec<ofp::OfpOutcome> {
        chromosomes
            .par_iter()
            .map(|chrom| {
                let mut solver = self.solver_template.clone_handle();
                let mut domain = self.domain_template.clone();
                let seed = self.options.seed ^ (chrom.seed() as u64);
                let mut rng = XorShiftRng::seed_from_u64(seed);
                for _ in 0..1000 {
                    let _: u32 = rng.gen();
                }
                let mut noop_callback = NoOpOfpCallback;
                let mut tracing_callback = TracingOfpCallback;
                let callback: &mut dyn OfpCallback = match self.options.logging {
                    crate::config::LoggingVerbosity::Silent => &mut noop_callback,
                    crate::config::LoggingVerbosity::TraceIterations => &mut tracing_callback,
                };
                ofp::decode(
                    &self.model,
                    &mut domain,
                    &self.baseline,
                    solver.as_mut(),
                    chrom,
                    &self.binaries,
                    &self.options,
                    &mut rng,
                    &self.stop,
                    callback,
                )
                .expect("OFP decode never returns Err in this implementation")
            })
            .collect()
    }

    fn should_stop(&self, generation: u32, best_fitness: f64, last_improvement_generation: u32) -> bool {
        if self.stop.must_stop() {
            return true;
        }
        match self.options.stop_rule {
            StopRule::Generations(g) => generation >= g,
            StopRule::Target(v) => best_fitness <= v,
            StopRule::Improvement(k) => generation.saturating_sub(last_improvement_generation) >= k,
        }
    }

    pub fn run(&mut self, population_size: usize, recombinator: &mut dyn Recombinator) -> EngineOutcome {
        let mut chromosomes = recombinator.initial_population(self.binaries.len(), population_size);
        let mut generation: u32 = 0;
        let mut last_improvement_generation: u32 = 0;
        let mut best_seen = f64::INFINITY;
        let mut beta = self.options.minimization_factor;
        let mut lp_count: u64 = 0;

        loop {
            if self.stop.must_stop() {
                return EngineOutcome {
                    status: self.stop.status_if_stopped().unwrap_or(Status::Aborted),
                    primal: None,
                    generations: generation,
                    lp_count,
                    cuts_generated: self.cuts.len(),
                };
            }

            let results = self.decode_generation(&chromosomes);
            lp_count += results.iter().map(|r| r.iterations as u64).sum::<u64>();

            let mut pop = Population::new(chromosomes);
            for (i, r) in results.iter().enumerate() {
                pop.chromosome_mut(i).decoded = Decoded {
                    rounded: r.rounded.clone(),
                    fp_value: r.fp_value,
                    fractionality: r.fractionality,
                    num_non_integral: r.num_non_integral,
                    iterations: r.iterations,
                };
                pop.set_fitness(i, r.fitness);
            }
            let sorted = pop.into_sorted();

            if sorted.best_fitness() < best_seen - crate::model::EPS {
                best_seen = sorted.best_fitness();
                last_improvement_generation = generation;
            }

            if sorted.any_integer_feasible() {
                let best = sorted.best_chromosome();
                return EngineOutcome {
                    status: Status::Feasible,
                    primal: Some(best.decoded.rounded.clone()),
                    generations: generation,
                    lp_count,
                    cuts_generated: self.cuts.len(),
                };
            }

            self.mine_cuts(&sorted);

            if generation > 0 && generation % REFINEMENT_CADENCE == 0 {
                if let Some(outcome) = self.refine(&sorted) {
                    return outcome;
                }
            }

            generation += 1;
            if self.should_stop(generation, best_seen, last_improvement_generation) {
                return EngineOutcome {
                    status: Status::InfeasibleWithinBudget,
                    primal: None,
                    generations: generation,
                    lp_count,
                    cuts_generated: self.cuts.len(),
                };
            }

            beta *= self.options.minimization_factor_decay;
            self.options.minimization_factor = beta.clamp(0.0, 1.0);
            chromosomes = recombinator.next_generation(&sorted);
        }
    }

    /// Mines `roundcuts_percentage` of the sorted, still-infeasible
    /// population into no-good cuts on the master solver, so every
    /// worker's next `clone_handle()` inherits them (spec.md §3, §6
    /// "roundcuts_percentage").
    fn mine_cuts(&mut self, sorted: &Population<crate::population::Sorted>) {
        let fraction = self.options.roundcuts_percentage.clamp(0.0, 1.0);
        let count = (((sorted.len() as f64) * fraction).ceil() as usize).min(sorted.len());
        for k in 0..count {
            let cut = cuts::build_no_good(&self.binaries, &sorted.kth_elite(k).decoded.rounded);
            if self.cuts.lookup(cut.hash).is_none() {
                let handle = self.solver_template.add_constraint(&cut.row, cut.sense, cut.rhs);
                self.cuts.record(cut.hash, handle);
            }
        }
    }

    /// Binary bounds get fixed to probe candidates during histogram
    /// fixing and local search; both run against the master solver so
    /// their no-good cuts persist, so bounds must be reset afterward.
    fn reset_binary_bounds(&mut self) {
        for &v in &self.binaries {
            self.solver_template.set_bounds(v, 0.0, 1.0);
        }
    }

    /// Runs the histogram fixer and (if it didn't already settle things)
    /// the MIP local search against the population's elite slice.
    fn refine(&mut self, sorted: &Population<crate::population::Sorted>) -> Option<EngineOutcome> {
        let slice_size = ELITE_SLICE.min(sorted.len());
        let slice: Vec<&Chromosome> = (0..slice_size).map(|k| sorted.kth_elite(k)).collect();

        let histogram_result = histogram::fix(
            self.solver_template.as_mut(),
            &self.binaries,
            &slice,
            &self.relaxation,
            &self.options.histogram,
            &self.stop,
        );
        self.reset_binary_bounds();
        if let Ok(result) = histogram_result {
            if let Some(primal) = result.candidate {
                return Some(EngineOutcome {
                    status: Status::Feasible,
                    primal: Some(primal),
                    generations: 0,
                    lp_count: 0,
                    cuts_generated: self.cuts.len(),
                });
            }
        }

        let budget = self.stop.sub_budget(Duration::from_millis(50))?;
        let params = crate::config::LocalSearchParams { max_time: budget.min(self.options.local_search.max_time), ..self.options.local_search };
        let outcome = localsearch::search(
            &self.model,
            self.solver_template.as_mut(),
            &self.binaries,
            &slice,
            &self.relaxation,
            &self.important,
            &mut self.cuts,
            &params,
            &self.stop,
        );
        self.reset_binary_bounds();
        if let Ok(outcome) = outcome {
            if let Some(primal) = outcome.primal {
                return Some(EngineOutcome {
                    status: Status::Feasible,
                    primal: Some(primal),
                    generations: 0,
                    lp_count: 0,
                    cuts_generated: self.cuts.len(),
                });
            }
        }
        None
    }
}
