//! Population & Fitness (spec C5), modeled on the sorted/unsorted invariant
//! in `population.hpp`: a population fresh off a decoding wave carries
//! unordered fitness values, and most queries (best, k-th elite,
//! heterogeneity) are only meaningful once it has been explicitly sorted.
//!
//! Lower fitness is better; `0.0` marks an integer-feasible chromosome
//! (spec.md §4.4, step 6).

use std::marker::PhantomData;

use crate::chromosome::Chromosome;
use crate::cuts::hash_rounding;

pub struct Unsorted;
pub struct Sorted;

pub struct Population<State = Unsorted> {
    chromosomes: Vec<Chromosome>,
    /// Parallel `(fitness, original_index)`, sorted ascending once `State = Sorted`.
    fitness: Vec<(f64, usize)>,
    _state: PhantomData<State>,
}

impl Population<Unsorted> {
    pub fn new(chromosomes: Vec<Chromosome>) -> Self {
        let fitness = (0..chromosomes.len()).map(|i| (f64::INFINITY, i)).collect();
        Self { chromosomes, fitness, _state: PhantomData }
    }

    pub fn set_fitness(&mut self, original_index: usize, f: f64) {
        self.fitness[original_index].0 = f;
    }

    pub fn chromosome_mut(&mut self, original_index: usize) -> &mut Chromosome {
        &mut self.chromosomes[original_index]
    }

    /// Sorts by fitness ascending, stable on original index to keep ordering
    /// deterministic regardless of which decode finished first (spec.md
    /// §7, "Ordering guarantees").
    pub fn into_sorted(mut self) -> Population<Sorted> {
        self.fitness.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.cmp(&b.1)));
        Population { chromosomes: self.chromosomes, fitness: self.fitness, _state: PhantomData }
    }
}

impl<S> Population<S> {
    pub fn len(&self) -> usize {
        self.chromosomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chromosomes.is_empty()
    }

    pub fn chromosome(&self, original_index: usize) -> &Chromosome {
        &self.chromosomes[original_index]
    }

    pub fn total_iterations(&self) -> u64 {
        self.chromosomes.iter().map(|c| c.decoded.iterations as u64).sum()
    }
}

impl Population<Sorted> {
    pub fn best_fitness(&self) -> f64 {
        self.fitness[0].0
    }

    /// The best chromosome by rank (rank 0 = fittest).
    pub fn best_chromosome(&self) -> &Chromosome {
        self.kth_elite(0)
    }

    pub fn kth_elite(&self, k: usize) -> &Chromosome {
        let idx = self.fitness[k].1;
        &self.chromosomes[idx]
    }

    pub fn fitness_at_rank(&self, k: usize) -> f64 {
        self.fitness[k].0
    }

    pub fn any_integer_feasible(&self) -> bool {
        self.fitness[0].0 <= 0.0 + f64::EPSILON
    }

    /// Distinct rounding hashes among the top `elite_fraction` of the
    /// population, divided by elite size (spec.md §4.5). `elite_fraction`
    /// is clamped to `(0, 1]`.
    pub fn heterogeneity(&self, elite_fraction: f64) -> f64 {
        let elite_fraction = elite_fraction.clamp(f64::EPSILON, 1.0);
        let elite_size = ((self.len() as f64) * elite_fraction).ceil().max(1.0) as usize;
        let elite_size = elite_size.min(self.len());
        if elite_size == 0 {
            return 0.0;
        }
        let mut hashes: Vec<u64> = self.fitness[..elite_size]
            .iter()
            .map(|&(_, idx)| {
                let ones: Vec<usize> =
                    self.chromosomes[idx].decoded.rounded.iter().enumerate().filter(|(_, &v)| v >= 0.5).map(|(j, _)| j).collect();
                hash_rounding(&ones)
            })
            .collect();
        hashes.sort_unstable();
        hashes.dedup();
        hashes.len() as f64 / elite_size as f64
    }

    /// Back to an unsorted view, e.g. before the next decoding wave
    /// overwrites `decoded` fields in place.
    pub fn into_unsorted(self) -> Population<Unsorted> {
        Population { chromosomes: self.chromosomes, fitness: self.fitness, _state: PhantomData }
    }
}
