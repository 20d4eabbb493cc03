//! Chromosome representation (spec C5): one real-valued gene per binary
//! variable, plus a trailing gene used to seed that chromosome's per-decode
//! RNG, and the fields OFP (C4) fills in after decoding.

/// The fields a completed OFP decode attaches to a chromosome (spec.md §4.4
//  and the `Chromosome` glossary entry).
#[derive(Debug, Clone, Default)]
pub struct Decoded {
    /// 0/1 per binary, in model order.
    pub rounded: Vec<f64>,
    /// Distance of the best LP projection seen from its rounding (`Δ`).
    pub fp_value: f64,
    /// Sum of fractional distances from integrality at the decode's end.
    pub fractionality: f64,
    pub num_non_integral: usize,
    pub iterations: u32,
}

impl Decoded {
    pub fn is_integer_feasible(&self) -> bool {
        self.num_non_integral == 0
    }
}

#[derive(Debug, Clone)]
pub struct Chromosome {
    /// `genes.len() == n_binaries + 1`; the last entry is the seed gene.
    pub genes: Vec<f64>,
    pub decoded: Decoded,
}

impl Chromosome {
    pub fn new(genes: Vec<f64>) -> Self {
        debug_assert!(!genes.is_empty(), "chromosome must carry at least the seed gene");
        Self { genes, decoded: Decoded::default() }
    }

    pub fn n_binaries(&self) -> usize {
        self.genes.len() - 1
    }

    /// The alleles the rounder/OFP start from, excluding the trailing seed.
    pub fn alleles(&self) -> &[f64] {
        &self.genes[..self.genes.len() - 1]
    }

    /// A deterministic 32-bit seed derived from the trailing gene, for
    /// per-decode RNGs (short/long cycling perturbation, random thresholds).
    pub fn seed(&self) -> u32 {
        let g = *self.genes.last().expect("chromosome must carry a seed gene");
        (g.to_bits() as u32) ^ ((g.to_bits() >> 32) as u32)
    }
}
