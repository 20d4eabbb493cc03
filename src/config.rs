//! Engine configuration (spec.md §6, "Configuration"). A plain struct with
//! `with_*` builder methods, the stable-Rust equivalent of the teacher's
//! proc-macro option registry (`macros::build_option_enum!`), which relied
//! on unstable compiler features this crate doesn't need.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStrategy {
    /// Classic feasibility pump: `alpha_0 = 0`, pump objective ignores `c^T x`.
    Default,
    /// Objective feasibility pump: `alpha_0 = 1`, pump objective is weighted
    /// toward the true objective from the first iteration.
    Objective,
}

impl PumpStrategy {
    pub fn initial_alpha(self) -> f64 {
        match self {
            PumpStrategy::Default => 0.0,
            PumpStrategy::Objective => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitnessType {
    Convex,
    Geometric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixingType {
    MostOnes,
    MostZeros,
    MostFractionals,
    Automatic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintFiltering {
    All,
    OnlyNonzeroDuals,
    NonzeroDualsOrZeroSlacks,
}

impl ConstraintFiltering {
    /// The next less restrictive policy, used when the chosen policy would
    /// leave a binary with zero important constraints (spec.md §4.7).
    pub fn relax(self) -> Option<ConstraintFiltering> {
        match self {
            ConstraintFiltering::NonzeroDualsOrZeroSlacks => Some(ConstraintFiltering::OnlyNonzeroDuals),
            ConstraintFiltering::OnlyNonzeroDuals => Some(ConstraintFiltering::All),
            ConstraintFiltering::All => None,
        }
    }
}

/// Controls whether OFP decode installs a [`crate::callback::TracingOfpCallback`]
/// (spec.md §6, replacing the teacher's `ConvergenceOutput` flag).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingVerbosity {
    Silent,
    TraceIterations,
}

#[derive(Debug, Clone, Copy)]
pub enum StopRule {
    Generations(u32),
    Target(f64),
    Improvement(u32),
}

/// OFP inner-loop parameters (spec.md §4.4, "Parameters").
#[derive(Debug, Clone, Copy)]
pub struct FpParams {
    pub iteration_limit: u32,
    pub perturb_when_cycling: bool,
    pub t: f64,
    pub rho_lb: f64,
    pub rho_ub: f64,
    /// Draw the per-iteration rounding threshold from `Uniform(rho_lb,
    /// rho_ub)` instead of the fixed `0.5` (spec.md §9's open question on
    /// rounder determinism; default off, matching spec.md's "default to
    /// deterministic, t = 0.5").
    pub randomized_threshold: bool,
}

impl Default for FpParams {
    fn default() -> Self {
        Self { iteration_limit: 100, perturb_when_cycling: true, t: 0.1, rho_lb: 0.0, rho_ub: 0.4, randomized_threshold: false }
    }
}

/// Objective-decay and cycle-tolerance parameters (spec.md §4.4).
#[derive(Debug, Clone, Copy)]
pub struct OfpParams {
    pub phi: f64,
    pub delta: f64,
}

impl Default for OfpParams {
    fn default() -> Self {
        Self { phi: 0.9, delta: 1e-3 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HistogramParams {
    pub var_fixing_percentage: f64,
    pub var_fixing_rate: f64,
    pub var_fixing_type: FixingType,
}

impl Default for HistogramParams {
    fn default() -> Self {
        Self { var_fixing_percentage: 0.0, var_fixing_rate: 8.0, var_fixing_type: FixingType::Automatic }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LocalSearchParams {
    pub threshold: f64,
    pub discrepancy_level: f64,
    pub unfix_levels: u32,
    pub max_time: Duration,
}

impl Default for LocalSearchParams {
    fn default() -> Self {
        Self { threshold: 0.0, discrepancy_level: 0.2, unfix_levels: 2, max_time: Duration::from_secs(10) }
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub num_threads: usize,
    pub seed: u64,
    pub pump_strategy: PumpStrategy,
    pub fitness_type: FitnessType,
    pub minimization_factor: f64,
    pub minimization_factor_decay: f64,
    pub fp: FpParams,
    pub ofp: OfpParams,
    pub histogram: HistogramParams,
    pub constraint_filtering: ConstraintFiltering,
    pub local_search: LocalSearchParams,
    pub roundcuts_percentage: f64,
    pub stop_rule: StopRule,
    pub max_time: Duration,
    /// Supplemental: caps restart attempts after exhausting a full run
    /// without a feasible incumbent (0 disables restarts, the default;
    /// see SPEC_FULL.md §C).
    pub max_restarts: u32,
    pub logging: LoggingVerbosity,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            num_threads: 1,
            seed: 0,
            pump_strategy: PumpStrategy::Objective,
            fitness_type: FitnessType::Convex,
            minimization_factor: 0.5,
            minimization_factor_decay: 1.0,
            fp: FpParams::default(),
            ofp: OfpParams::default(),
            histogram: HistogramParams::default(),
            constraint_filtering: ConstraintFiltering::NonzeroDualsOrZeroSlacks,
            local_search: LocalSearchParams::default(),
            roundcuts_percentage: 0.1,
            stop_rule: StopRule::Generations(1000),
            max_time: Duration::from_secs(300),
            max_restarts: 0,
            logging: LoggingVerbosity::Silent,
        }
    }
}

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_num_threads(mut self, n: usize) -> Self {
        self.num_threads = n.max(1);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_pump_strategy(mut self, strategy: PumpStrategy) -> Self {
        self.pump_strategy = strategy;
        self
    }

    pub fn with_fitness_type(mut self, fitness_type: FitnessType) -> Self {
        self.fitness_type = fitness_type;
        self
    }

    pub fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time = max_time;
        self
    }

    pub fn with_stop_rule(mut self, rule: StopRule) -> Self {
        self.stop_rule = rule;
        self
    }

    pub fn with_max_restarts(mut self, n: u32) -> Self {
        self.max_restarts = n;
        self
    }

    pub fn with_logging(mut self, logging: LoggingVerbosity) -> Self {
        self.logging = logging;
        self
    }
}
